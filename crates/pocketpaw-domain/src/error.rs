/// Shared error type used across all PocketPaw crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("backend {backend}: {message}")]
    Backend { backend: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("bad input: {0}")]
    UserInput(String),

    #[error("cancelled")]
    Cancelled,

    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("plugin install failed: {0}")]
    PluginInstallFailed(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
