use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    data::process::{ToolCommand, run_tool},
    error::Error,
};

pub const FAST_START_SUFFIX: &str = "_faststart.mp4";

/// Returns the path the fast-start copy of `input` is written to: the input path with
/// [`FAST_START_SUFFIX`] appended, so it never equals the input.
pub fn fast_start_path(input: &Path) -> PathBuf {
    let mut path = OsString::from(input.as_os_str());
    path.push(FAST_START_SUFFIX);
    PathBuf::from(path)
}

/// Rewrites mp4 containers with the moov atom in front of the media data using ffmpeg. Streams
/// are copied as is.
#[derive(Debug, Clone)]
pub struct FastStartRemuxer {
    pub ffmpeg: ToolCommand,
    pub timeout: Duration,
}

impl FastStartRemuxer {
    pub async fn remux(&self, input: &Path) -> Result<PathBuf, Error> {
        let output_path = fast_start_path(input);

        log::debug!(
            "Spawning ffmpeg process to remux {} to {}",
            input.display(),
            output_path.display()
        );
        run_tool(
            &self.ffmpeg,
            [
                OsStr::new("-y"),
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-i"),
                input.as_os_str(),
                OsStr::new("-map"),
                OsStr::new("0"),
                OsStr::new("-c"),
                OsStr::new("copy"),
                OsStr::new("-map_metadata"),
                OsStr::new("0"),
                OsStr::new("-movflags"),
                OsStr::new("+faststart"),
                OsStr::new("-f"),
                OsStr::new("mp4"),
                output_path.as_os_str(),
            ],
            self.timeout,
        )
        .await
        .map_err(|e| Error::RemuxError(format!("ffmpeg for {}: {e}", input.display())))?;

        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_start_path() {
        assert_eq!(
            fast_start_path(Path::new("/tmp/staging/abc123.mp4")),
            PathBuf::from("/tmp/staging/abc123.mp4_faststart.mp4")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remux_writes_output_next_to_input() {
        let scripts = crate::testing::ScriptDir::new();
        let remuxer = FastStartRemuxer {
            ffmpeg: scripts.fake_ffmpeg(),
            timeout: Duration::from_secs(5),
        };

        let input = scripts.path().join("abc123.mp4");
        std::fs::write(&input, b"source").unwrap();

        let output = remuxer.remux(&input).await.unwrap();
        assert_eq!(output, fast_start_path(&input));
        assert_eq!(std::fs::read(&output).unwrap(), b"source");
        assert_eq!(std::fs::read(&input).unwrap(), b"source");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remux_failure() {
        let scripts = crate::testing::ScriptDir::new();
        let remuxer = FastStartRemuxer {
            ffmpeg: scripts.failing_tool("ffmpeg.sh", "moov atom not found"),
            timeout: Duration::from_secs(5),
        };

        match remuxer.remux(Path::new("abc123.mp4")).await {
            Err(Error::RemuxError(msg)) => assert!(msg.contains("moov atom not found")),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
