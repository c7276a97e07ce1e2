pub mod gcs;
pub mod gemini;
pub mod veo;

/// First `max` characters of a response body, for log lines.
pub(crate) fn body_snippet(raw: &str, max: usize) -> String {
    raw.chars().take(max).collect()
}
