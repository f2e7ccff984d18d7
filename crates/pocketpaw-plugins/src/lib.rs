//! Plugin Registry, Supervisor, and OAuth Session Manager (spec §4.H/I/J).

pub mod gallery;
pub mod install_source;
pub mod oauth;
pub mod registry;
pub mod supervisor;

pub use gallery::{builtin_gallery, find_builtin, BuiltinPlugin};
pub use install_source::{unpack, InlineFile, InstallSource};
pub use oauth::OAuthSessionManager;
pub use registry::{PluginEntry, PluginRegistry};
pub use supervisor::{PluginSupervisor, SupervisorOutcome};
