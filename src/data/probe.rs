use std::{ffi::OsStr, fmt, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    data::process::{ToolCommand, run_tool},
    error::Error,
};

const LANDSCAPE_RATIO: f64 = 16.0 / 9.0;
const PORTRAIT_RATIO: f64 = 9.0 / 16.0;
const RATIO_TOLERANCE: f64 = 0.05;

/// Coarse bucketing of a video's width / height ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectClassification {
    Landscape,
    Portrait,
    Other,
}

impl AspectClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectClassification::Landscape => "landscape",
            AspectClassification::Portrait => "portrait",
            AspectClassification::Other => "other",
        }
    }
}

impl fmt::Display for AspectClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Deserialize)]
struct FfprobeStream {
    width: Option<serde_json::Value>,
    height: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Classifies the given dimensions: within 0.05 of 16:9 is landscape, within 0.05 of 9:16 is
/// portrait, anything else is other.
pub fn classify_dimensions(dimensions: Dimensions) -> AspectClassification {
    let ratio = dimensions.width as f64 / dimensions.height as f64;
    if (ratio - LANDSCAPE_RATIO).abs() < RATIO_TOLERANCE {
        AspectClassification::Landscape
    } else if (ratio - PORTRAIT_RATIO).abs() < RATIO_TOLERANCE {
        AspectClassification::Portrait
    } else {
        AspectClassification::Other
    }
}

fn positive_dimension(value: Option<&serde_json::Value>, name: &str) -> Result<u32, Error> {
    let value = value
        .ok_or_else(|| Error::ProbeError(format!("ffprobe output contains no stream {name}")))?;

    // numeric strings are accepted as well
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    match parsed.and_then(|v| u32::try_from(v).ok()) {
        Some(v) if v > 0 => Ok(v),
        _ => Err(Error::ProbeError(format!(
            "Invalid stream {name} from ffprobe: {value}"
        ))),
    }
}

/// Parses the JSON written by `ffprobe -show_entries stream=width,height -of json`, using the
/// first reported stream.
pub fn parse_probe_output(stdout: &[u8]) -> Result<Dimensions, Error> {
    let output = serde_json::from_slice::<FfprobeOutput>(stdout).map_err(|e| {
        Error::ProbeError(format!("Failed to deserialize ffprobe output: {e}"))
    })?;

    let stream = output
        .streams
        .first()
        .ok_or_else(|| Error::ProbeError(String::from("ffprobe found no video stream")))?;

    Ok(Dimensions {
        width: positive_dimension(stream.width.as_ref(), "width")?,
        height: positive_dimension(stream.height.as_ref(), "height")?,
    })
}

/// Media prober backed by ffprobe.
#[derive(Debug, Clone)]
pub struct MediaProber {
    pub ffprobe: ToolCommand,
    pub timeout: Duration,
}

impl MediaProber {
    pub async fn probe_dimensions(&self, path: &Path) -> Result<Dimensions, Error> {
        let output = run_tool(
            &self.ffprobe,
            [
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-select_streams"),
                OsStr::new("v:0"),
                OsStr::new("-show_entries"),
                OsStr::new("stream=width,height"),
                OsStr::new("-of"),
                OsStr::new("json"),
                path.as_os_str(),
            ],
            self.timeout,
        )
        .await
        .map_err(|e| Error::ProbeError(format!("ffprobe for {}: {e}", path.display())))?;

        parse_probe_output(&output.stdout)
    }

    pub async fn classify(&self, path: &Path) -> Result<AspectClassification, Error> {
        let dimensions = self.probe_dimensions(path).await?;
        let classification = classify_dimensions(dimensions);
        log::debug!(
            "Probed {}x{} for {}, classified as {}",
            dimensions.width,
            dimensions.height,
            path.display(),
            classification
        );
        Ok(classification)
    }
}
