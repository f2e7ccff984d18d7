//! The bundled "AI Fast API" plugin (spec §1, §4.K): an OpenAI-compatible
//! HTTP service that rotates chat-completion requests across a chain of
//! sub-backends. Ships as its own binary so the Plugin Supervisor can
//! launch, health-check, and stop it exactly like any other installed
//! plugin (spec §4.I) -- it has no privileged access to PocketPaw's
//! process.

pub mod api;
pub mod backends;
pub mod config;
pub mod rotator_service;
pub mod sub_backend;

pub use config::Settings;
pub use rotator_service::RotatorService;
