use std::path::{Path, PathBuf};

/// Characters that are rejected by at least one common filesystem
const FORBIDDEN_CHARS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// Name used when a title sanitizes down to nothing
const FALLBACK_TITLE: &str = "video";

/// Sanitize a media title for safe filesystem usage
///
/// Forbidden characters and line breaks are dropped (not replaced), then surrounding
/// whitespace is trimmed. Applying it twice gives the same result as applying it once.
pub fn sanitize_filename(title: &str) -> String {
    title
        .chars()
        .filter(|c| !FORBIDDEN_CHARS.contains(c) && *c != '\n' && *c != '\r')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Pick a path for `title.ext` inside `dir` that does not exist yet
///
/// On collision " (n)" is appended to the stem, starting at 1. The check is not atomic:
/// another process may still create the same path before we write to it.
pub fn unique_filepath(dir: &Path, title: &str, ext: &str) -> PathBuf {
    let title = if title.is_empty() { FALLBACK_TITLE } else { title };

    let mut candidate = dir.join(format!("{}.{}", title, ext));
    let mut counter = 1u32;
    while candidate.exists() {
        candidate = dir.join(format!("{} ({}).{}", title, counter, ext));
        counter += 1;
    }
    candidate
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Whether a directory entry looks like a leftover transcoder/merger temp file
pub fn is_temp_artifact(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    lower.starts_with("temp") && lower.ends_with(".mp4")
}
