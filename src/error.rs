use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrowseError {
    /// A form, button, field, option or link lookup found nothing on the current page.
    #[error("no matching {what}: '{name}'")]
    ElementNotFound { what: &'static str, name: String },

    #[error("HTTP error {status} for {url}")]
    Http { status: u16, url: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("redirect error: {0}")]
    Redirect(String),

    #[error("gave up after {attempts} attempts: {last}")]
    ExhaustedRetries {
        attempts: usize,
        #[source]
        last: Box<BrowseError>,
    },

    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("no page loaded")]
    NoPage,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BrowseError {
    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Self::ElementNotFound {
            what,
            name: name.into(),
        }
    }

    /// Whether another attempt of the whole operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http { .. } | Self::Transport(_) | Self::Redirect(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BrowseError>;
