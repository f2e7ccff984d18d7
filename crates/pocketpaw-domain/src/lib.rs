pub mod capability;
pub mod config;
pub mod error;
pub mod model;
pub mod plugin;
pub mod session_key;

pub use capability::BackendInfo;
pub use error::{Error, Result};
pub use model::Turn;
pub use session_key::{resolve_session_key, SessionKey};
