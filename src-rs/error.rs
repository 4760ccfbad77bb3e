use std::path::PathBuf;

pub type RenderResult<T> = Result<T, RenderError>;

/// Configuration problems that reject a render before any pixel is drawn.
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("unknown font family: {0}")]
    UnknownFont(String),

    #[error("font size must be > 0")]
    InvalidFontSize,

    #[error("wrap width must be > 0 (got {0})")]
    InvalidWrapWidth(f64),

    #[error("failed to load font {path}: {reason}")]
    FontLoad { path: PathBuf, reason: String },
}

impl RenderError {
    pub fn font_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::FontLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
