use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use futures::{Stream, TryStreamExt};
use lazy_static::lazy_static;
use mime::Mime;
use mpart_async::server::MultipartStream;
use regex::Regex;
use warp::{Buf, Rejection, Reply};

use crate::{
    AppContext,
    auth::AuthorizedVideo,
    data::{probe::MediaProber, remux::FastStartRemuxer},
    error::Error,
};

pub mod key;
pub mod probe;
pub mod process;
pub mod remux;
pub mod s3utils;
pub mod up;

pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";
pub const THUMBNAIL_CONTENT_TYPES: [&str; 2] = ["image/jpeg", "image/png"];
pub const MAX_VIDEO_UPLOAD_SIZE: usize = 1024 * 1024 * 1024;
pub const MAX_THUMBNAIL_UPLOAD_SIZE: usize = 10 * 1024 * 1024;
/// Room for boundaries, part headers and small form fields on top of the file itself.
pub const MULTIPART_OVERHEAD_ALLOWANCE: u64 = 64 * 1024;

lazy_static! {
    pub static ref VIDEO_ID_REGEX: Regex =
        Regex::new(r"^[A-Za-z0-9_-]+$").expect("Failed to compile video id regex");
}

/// Settings of the upload pipeline.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Directory the transient files of running uploads are written to.
    pub staging_dir: PathBuf,
    pub max_video_size: usize,
    pub max_thumbnail_size: usize,
    pub prober: MediaProber,
    pub remuxer: FastStartRemuxer,
}

/// A file received in a multipart form, held in memory for the duration of the request.
#[derive(Debug, Clone)]
pub struct UploadedAsset {
    pub filename: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// Result of looking up a file field in a multipart form.
#[derive(Debug)]
pub enum FormFile {
    Present(UploadedAsset),
    Missing,
    /// The field exists but is a plain value rather than a file.
    NotAFile,
}

/// Reads the multipart body and extracts the file in field `field_name`, failing once more
/// than `max_size` bytes have been read for it. Other fields are skipped.
pub async fn read_form_file<S, B>(
    mime: &Mime,
    body: S,
    field_name: &str,
    max_size: usize,
) -> Result<FormFile, Error>
where
    S: Stream<Item = Result<B, warp::Error>> + Unpin,
    B: Buf,
{
    if mime.essence_str() != "multipart/form-data" {
        return Err(Error::BadRequestError(format!(
            "Expected multipart/form-data body but got '{mime}'"
        )));
    }

    let boundary = mime
        .get_param("boundary")
        .map(|v| v.to_string())
        .ok_or_else(|| Error::BadRequestError(String::from("No mime boundary")))?;

    let mut stream = MultipartStream::new(
        boundary,
        body.map_ok(|mut buf| buf.copy_to_bytes(buf.remaining())),
    );

    loop {
        let mut field = match stream.try_next().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(FormFile::Missing),
            Err(e) => {
                return Err(Error::BadRequestError(format!(
                    "Malformed multipart body: {e}"
                )));
            }
        };

        let name = field
            .name()
            .map_err(|e| Error::BadRequestError(e.to_string()))?
            .to_string();

        if name != field_name {
            while field
                .try_next()
                .await
                .map_err(|e| Error::BadRequestError(e.to_string()))?
                .is_some()
            {}
            continue;
        }

        let filename = match field.filename() {
            Ok(filename) => filename.to_string(),
            Err(_) => return Ok(FormFile::NotAFile),
        };
        let content_type = field
            .content_type()
            .map(|content_type| content_type.to_string())
            .unwrap_or_default();

        let mut bytes = BytesMut::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| Error::BadRequestError(e.to_string()))?
        {
            if bytes.len() + chunk.len() > max_size {
                return Err(Error::BadRequestError(format!(
                    "File in field '{field_name}' exceeds the maximum size of {max_size} bytes"
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        return Ok(FormFile::Present(UploadedAsset {
            filename,
            content_type,
            bytes: bytes.freeze(),
        }));
    }
}

/// Rejects requests whose declared body length cannot possibly hold a file within `max_size`,
/// before any of the body is buffered. Requests without a `Content-Length` are checked while
/// reading instead.
pub fn check_content_length(content_length: Option<u64>, max_size: usize) -> Result<(), Error> {
    let limit = max_size as u64 + MULTIPART_OVERHEAD_ALLOWANCE;
    match content_length {
        Some(content_length) if content_length > limit => Err(Error::BadRequestError(format!(
            "Request body of {content_length} bytes exceeds the limit of {limit} bytes"
        ))),
        _ => Ok(()),
    }
}

/// Extracts and validates the uploaded file: the field must be present, hold a file of at most
/// `max_size` bytes, and declare one of `accepted_types`.
pub async fn receive_upload<S, B>(
    mime: Option<Mime>,
    content_length: Option<u64>,
    body: S,
    field_name: &str,
    max_size: usize,
    accepted_types: &[&str],
) -> Result<UploadedAsset, Error>
where
    S: Stream<Item = Result<B, warp::Error>> + Unpin,
    B: Buf,
{
    let mime = mime.ok_or_else(|| Error::BadRequestError(String::from("No content type")))?;
    check_content_length(content_length, max_size)?;

    let asset = match read_form_file(&mime, body, field_name, max_size).await? {
        FormFile::Present(asset) => asset,
        FormFile::Missing => {
            return Err(Error::BadRequestError(format!(
                "No file specified, no multipart form field found for name '{field_name}'"
            )));
        }
        FormFile::NotAFile => {
            return Err(Error::BadRequestError(format!(
                "Multipart form field '{field_name}' is not a file"
            )));
        }
    };

    if !accepted_types.contains(&asset.content_type.as_str()) {
        return Err(Error::BadRequestError(format!(
            "Unsupported content type '{}' for field '{field_name}', expected one of {}",
            &asset.content_type,
            accepted_types.join(", ")
        )));
    }

    Ok(asset)
}

pub fn validate_video_id(video_id: &str) -> Result<(), Error> {
    if VIDEO_ID_REGEX.is_match(video_id) {
        Ok(())
    } else {
        Err(Error::BadRequestError(format!(
            "Invalid video id '{video_id}'"
        )))
    }
}

pub async fn upload_video_handler(
    authorized: AuthorizedVideo,
    context: AppContext,
    mime: Option<Mime>,
    content_length: Option<u64>,
    body: impl Stream<Item = Result<impl Buf, warp::Error>> + Unpin,
) -> Result<impl Reply, Rejection> {
    validate_video_id(&authorized.video.id)?;
    let asset = receive_upload(
        mime,
        content_length,
        body,
        "video",
        context.upload_config.max_video_size,
        &[VIDEO_CONTENT_TYPE],
    )
    .await?;

    let video = up::process_video_upload(&context, authorized, asset).await?;
    Ok(warp::reply::json(&video))
}

pub async fn upload_thumbnail_handler(
    authorized: AuthorizedVideo,
    context: AppContext,
    mime: Option<Mime>,
    content_length: Option<u64>,
    body: impl Stream<Item = Result<impl Buf, warp::Error>> + Unpin,
) -> Result<impl Reply, Rejection> {
    let asset = receive_upload(
        mime,
        content_length,
        body,
        "thumbnail",
        context.upload_config.max_thumbnail_size,
        &THUMBNAIL_CONTENT_TYPES,
    )
    .await?;

    let video = up::process_thumbnail_upload(&context, authorized, asset).await?;
    Ok(warp::reply::json(&video))
}
