pub mod http_proxy;
pub mod oauth_cli;

pub use http_proxy::HttpProxyBackend;
pub use oauth_cli::OAuthCliBackend;
