pub mod config;
pub mod dev;
pub mod discovery;
pub mod error;
pub mod validation;
pub mod watch;

// Re-export main types
pub use config::*;
pub use dev::*;
pub use error::*;
pub use watch::*;

// Re-export discovery and validation
pub use discovery::{ConfigDiscovery, DEFAULT_CONFIG_FILE, discover};
pub use validation::{ConfigValidator, FsValidator, SchemaValidator, validate_fs, validate_schema};
