//! Proxy configuration: where policy and CA material live, how leaves are
//! shaped, and how logs are written.

mod loader;
mod schema;

pub use loader::{load_from_env_or_file, load_from_path, validate};
pub use schema::{CaConfig, Config, LoggingConfig, SignerConfig};
