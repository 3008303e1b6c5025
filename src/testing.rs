//! Fixtures shared by the unit tests: in-memory stores, JWT minting, fake media tools and
//! multipart bodies.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use tempfile::TempDir;

use crate::{
    AppContext,
    auth::Claims,
    data::{
        MAX_THUMBNAIL_UPLOAD_SIZE, MAX_VIDEO_UPLOAD_SIZE, UploadConfig, key::playback_url,
        probe::MediaProber, process::ToolCommand, remux::FastStartRemuxer, s3utils::ObjectStore,
    },
    error::Error,
    model::Video,
    video::VideoStore,
};

pub const TEST_JWT_SECRET: &str = "test secret";
pub const BOUNDARY: &str = "videobrokertestboundary";

pub fn create_token(user_id: &str) -> String {
    create_token_with_expiry(user_id, chrono::Duration::hours(3))
}

pub fn create_token_with_expiry(user_id: &str, expires_in: chrono::Duration) -> String {
    let claims = Claims {
        exp: (Utc::now() + expires_in).timestamp() as usize,
        sub: String::from(user_id),
    };

    encode(
        &Header::new(Algorithm::HS512),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn sample_video(id: &str, user_id: &str) -> Video {
    let now = Utc::now();
    Video {
        id: String::from(id),
        user_id: String::from(user_id),
        title: Some(String::from("Sample")),
        description: None,
        video_url: None,
        thumbnail_url: None,
        creation_timestamp: now,
        update_timestamp: now,
    }
}

/// Builds a multipart/form-data body with a single part delimited by [`BOUNDARY`]. Parts without
/// a filename are plain form values.
pub fn multipart_body(
    name: &str,
    filename: Option<&str>,
    content_type: Option<&str>,
    bytes: &[u8],
) -> Vec<u8> {
    let mut body = format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"");
    if let Some(filename) = filename {
        body.push_str(&format!("; filename=\"{filename}\""));
    }
    body.push_str("\r\n");
    if let Some(content_type) = content_type {
        body.push_str(&format!("Content-Type: {content_type}\r\n"));
    }
    body.push_str("\r\n");

    let mut body = body.into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

#[derive(Default)]
pub struct MemoryVideoStore {
    videos: Mutex<HashMap<String, Video>>,
    fail_updates: AtomicBool,
}

impl MemoryVideoStore {
    pub fn insert(&self, video: Video) {
        self.videos.lock().unwrap().insert(video.id.clone(), video);
    }

    pub fn video(&self, id: &str) -> Option<Video> {
        self.videos.lock().unwrap().get(id).cloned()
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    fn modify(&self, id: &str, apply: impl FnOnce(&mut Video)) -> Result<Video, Error> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Error::QueryError(String::from("injected update failure")));
        }

        let mut videos = self.videos.lock().unwrap();
        let video = videos
            .get_mut(id)
            .ok_or_else(|| Error::VideoNotFoundError(String::from(id)))?;
        apply(video);
        video.update_timestamp = Utc::now();
        Ok(video.clone())
    }
}

#[async_trait]
impl VideoStore for MemoryVideoStore {
    async fn get(&self, id: &str) -> Result<Option<Video>, Error> {
        Ok(self.video(id))
    }

    async fn set_video_url(&self, id: &str, video_url: &str) -> Result<Video, Error> {
        self.modify(id, |video| video.video_url = Some(String::from(video_url)))
    }

    async fn set_thumbnail_url(&self, id: &str, thumbnail_url: &str) -> Result<Video, Error> {
        self.modify(id, |video| {
            video.thumbnail_url = Some(String::from(thumbnail_url))
        })
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    fail_puts: AtomicBool,
}

impl MemoryObjectStore {
    pub fn object(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        keys.sort();
        keys
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    fn check_failure(&self, key: &str) -> Result<(), Error> {
        if self.fail_puts.load(Ordering::SeqCst) {
            Err(Error::StorageError(format!("injected failure storing {key}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<(), Error> {
        self.check_failure(key)?;
        let bytes = tokio::fs::read(path).await?;
        self.objects
            .lock()
            .unwrap()
            .insert(String::from(key), (bytes, String::from(content_type)));
        Ok(())
    }

    async fn put_bytes(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), Error> {
        self.check_failure(key)?;
        self.objects
            .lock()
            .unwrap()
            .insert(String::from(key), (bytes.to_vec(), String::from(content_type)));
        Ok(())
    }

    fn object_url(&self, key: &str) -> String {
        playback_url("test-bucket", "eu-central-1", key)
    }
}

/// Directory of shell scripts standing in for ffprobe and ffmpeg. Scripts are run through `sh`
/// rather than executed directly.
pub struct ScriptDir {
    dir: TempDir,
}

impl ScriptDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn tool(&self, name: &str, body: &str) -> ToolCommand {
        let path = self.dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        ToolCommand::new("sh").arg(path)
    }

    /// Prints ffprobe json output for a single stream of the given dimensions.
    pub fn fake_ffprobe(&self, width: u32, height: u32) -> ToolCommand {
        self.tool(
            "ffprobe.sh",
            &format!(r#"echo '{{"streams": [{{"width": {width}, "height": {height}}}]}}'"#),
        )
    }

    /// Copies the `-i` input to the last argument.
    pub fn fake_ffmpeg(&self) -> ToolCommand {
        self.tool(
            "ffmpeg.sh",
            r#"prev=""
for arg; do
  if [ "$prev" = "-i" ]; then input="$arg"; fi
  prev="$arg"
  output="$arg"
done
cp "$input" "$output""#,
        )
    }

    /// Writes partial output to the last argument, then fails.
    pub fn partial_failing_ffmpeg(&self) -> ToolCommand {
        self.tool(
            "ffmpeg.sh",
            r#"for arg; do output="$arg"; done
echo "partial" > "$output"
echo "Error writing trailer" >&2
exit 1"#,
        )
    }

    pub fn failing_tool(&self, name: &str, stderr: &str) -> ToolCommand {
        self.tool(name, &format!("echo '{stderr}' >&2\nexit 1"))
    }
}

pub struct TestEnv {
    pub context: AppContext,
    pub videos: Arc<MemoryVideoStore>,
    pub objects: Arc<MemoryObjectStore>,
    staging_root: TempDir,
    _scripts: ScriptDir,
}

impl TestEnv {
    /// Environment with tools reporting a 1920x1080 video and remuxing by copying.
    pub fn new(scripts: ScriptDir) -> Self {
        Self::with_tools(scripts.fake_ffprobe(1920, 1080), scripts.fake_ffmpeg(), scripts)
    }

    pub fn with_tools(ffprobe: ToolCommand, ffmpeg: ToolCommand, scripts: ScriptDir) -> Self {
        let staging_root = tempfile::tempdir().unwrap();
        let videos = Arc::new(MemoryVideoStore::default());
        let objects = Arc::new(MemoryObjectStore::default());

        let upload_config = UploadConfig {
            staging_dir: staging_root.path().join("staging"),
            max_video_size: MAX_VIDEO_UPLOAD_SIZE,
            max_thumbnail_size: MAX_THUMBNAIL_UPLOAD_SIZE,
            prober: MediaProber {
                ffprobe,
                timeout: Duration::from_secs(10),
            },
            remuxer: FastStartRemuxer {
                ffmpeg,
                timeout: Duration::from_secs(10),
            },
        };

        let context = AppContext {
            jwt_secret: Arc::new(String::from(TEST_JWT_SECRET)),
            upload_config: Arc::new(upload_config),
            videos: videos.clone(),
            objects: objects.clone(),
        };

        Self {
            context,
            videos,
            objects,
            staging_root,
            _scripts: scripts,
        }
    }

    pub fn with_max_video_size(mut self, max_video_size: usize) -> Self {
        let mut upload_config = (*self.context.upload_config).clone();
        upload_config.max_video_size = max_video_size;
        self.context.upload_config = Arc::new(upload_config);
        self
    }

    pub fn staging_dir(&self) -> &Path {
        debug_assert!(
            self.context
                .upload_config
                .staging_dir
                .starts_with(self.staging_root.path())
        );
        &self.context.upload_config.staging_dir
    }

    /// Files currently in the staging directory.
    pub fn staged_files(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.staging_dir()) {
            Ok(entries) => entries
                .map(|entry| entry.unwrap().path())
                .collect::<Vec<_>>(),
            Err(_) => Vec::new(),
        }
    }
}
