use thiserror::Error;

/// Failures inside a single rewrite. Never escapes the engine: every failure
/// is converted into an `ERROR` event and the original body passes through.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("unsupported or missing content type: {0}")]
    UnsupportedEncoding(String),
    #[error("body parse failed: {0}")]
    Parse(String),
    #[error("unexpected payload shape: {0}")]
    Shape(String),
}
