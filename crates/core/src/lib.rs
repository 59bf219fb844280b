pub mod config;
pub mod error;
pub mod paths;

pub use config::{Config, EngineKind, PoolScope, TransportMode};
pub use error::{Error, ErrorKind, Result};
pub use paths::Paths;
