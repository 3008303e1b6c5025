use crate::data::probe::AspectClassification;

/// Storage key for a video: `{classification}/{video_id}.mp4`.
///
/// Deterministic so that re-uploading a video with the same classification overwrites the
/// existing object instead of creating a new one.
pub fn derive_key(classification: AspectClassification, video_id: &str) -> String {
    format!("{classification}/{video_id}.mp4")
}

/// Public virtual-hosted style URL of an object in an AWS S3 bucket.
pub fn playback_url(bucket: &str, region: &str, key: &str) -> String {
    format!("https://{bucket}.s3.{region}.amazonaws.com/{key}")
}
