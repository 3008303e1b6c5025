use std::{
    io,
    path::{Path, PathBuf},
    time::Instant,
};

use uuid::Uuid;

use crate::{
    AppContext,
    auth::AuthorizedVideo,
    data::{UploadedAsset, VIDEO_CONTENT_TYPE, key::derive_key, remux::fast_start_path},
    error::Error,
    model::Video,
};

/// A request scoped file in the staging directory, removed when dropped.
///
/// Guards are created before the file is written so that a failure while writing, or a
/// cancelled request, still removes whatever has been written so far.
pub struct TransientFile {
    path: PathBuf,
}

impl TransientFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TransientFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed transient file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "Failed to remove transient file {}: {e}",
                self.path.display()
            ),
        }
    }
}

/// Path the raw upload for the given video is staged at. Stale leftovers of an earlier,
/// crashed attempt for the same video are overwritten.
pub fn staging_path(staging_dir: &Path, video_id: &str) -> PathBuf {
    staging_dir.join(format!("{video_id}.mp4"))
}

/// Runs the video pipeline for an authorized and validated upload: stage, probe, remux, store,
/// then point the record at the stored object.
///
/// Every transient file is removed before this returns, whether it succeeds or not. The record is
/// only updated once the object has been stored.
pub async fn process_video_upload(
    context: &AppContext,
    authorized: AuthorizedVideo,
    asset: UploadedAsset,
) -> Result<Video, Error> {
    let config = &context.upload_config;
    let AuthorizedVideo { user_id, video } = authorized;
    let start_time = Instant::now();

    tokio::fs::create_dir_all(&config.staging_dir).await?;
    let staged = TransientFile::new(staging_path(&config.staging_dir, &video.id));
    tokio::fs::write(staged.path(), &asset.bytes).await?;
    log::info!(
        "Staged {} ({} bytes) from user {} for video {} at {}",
        &asset.filename,
        asset.bytes.len(),
        &user_id,
        &video.id,
        staged.path().display()
    );

    let classification = config.prober.classify(staged.path()).await?;
    log::info!("Classified video {} as {}", &video.id, classification);

    let remuxed = TransientFile::new(fast_start_path(staged.path()));
    let remuxed_path = config.remuxer.remux(staged.path()).await?;
    debug_assert_eq!(remuxed_path, remuxed.path());
    log::info!("Remuxed video {} for fast start", &video.id);

    let key = derive_key(classification, &video.id);
    context
        .objects
        .put_file(&key, remuxed.path(), VIDEO_CONTENT_TYPE)
        .await?;

    let video = context
        .videos
        .set_video_url(&video.id, &context.objects.object_url(&key))
        .await?;

    log::info!(
        "Completed upload of video {} to {} after {:?}",
        &video.id,
        &key,
        start_time.elapsed()
    );

    Ok(video)
}

/// Stores a thumbnail image under a random key and sets it as the video's thumbnail. No local
/// files are involved.
pub async fn process_thumbnail_upload(
    context: &AppContext,
    authorized: AuthorizedVideo,
    asset: UploadedAsset,
) -> Result<Video, Error> {
    let AuthorizedVideo { user_id, video } = authorized;
    let extension = match asset.content_type.as_str() {
        "image/png" => "png",
        _ => "jpg",
    };
    let key = format!("thumbnails/{}.{}", Uuid::new_v4(), extension);

    log::info!(
        "Storing thumbnail {} from user {} for video {}",
        &key,
        &user_id,
        &video.id
    );
    context
        .objects
        .put_bytes(&key, &asset.bytes, &asset.content_type)
        .await?;

    context
        .videos
        .set_thumbnail_url(&video.id, &context.objects.object_url(&key))
        .await
}
