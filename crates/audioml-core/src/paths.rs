//! Deterministic object-store keys.

use uuid::Uuid;

/// Feature blob key for a segment of an audio file.
///
/// Format: `features/audio_{audio_id}/seg_{segment}.npy`
pub fn feature_storage_path(audio_id: i64, segment_index: i32) -> String {
    format!("features/audio_{audio_id}/seg_{segment_index}.npy")
}

/// Key for a raw upload. Keeps the original extension, defaulting to `.wav`.
///
/// Format: `raw/{uuid}{ext}`
pub fn raw_storage_path(id: &Uuid, filename: Option<&str>) -> String {
    let ext = filename
        .and_then(|f| std::path::Path::new(f).extension())
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "wav".to_string());
    format!("raw/{}.{}", id.as_hyphenated(), ext)
}

/// Reduce `s3://bucket/key` to `key`. Plain keys pass through unchanged.
pub fn object_key_from_url(url: &str) -> &str {
    match url.strip_prefix("s3://") {
        Some(rest) => rest.split_once('/').map(|(_, key)| key).unwrap_or(""),
        None => url.trim_start_matches('/'),
    }
}
