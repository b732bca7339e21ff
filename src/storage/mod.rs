//! Local persistence and configuration.

pub mod config;
pub mod credentials;
pub mod kv;
pub mod paths;
pub mod schema;

pub use config::{
    Config, ConfigSource, ConfigSources, ENV_CONFIG, ENV_DATA_DIR, ENV_FORMAT, ENV_MODE,
    ENV_NO_COLOR, ENV_NO_COLOR_STD, ENV_PRETTY, ENV_SHARED_URL, ENV_TIMEOUT, ResolvedConfig,
};
pub use credentials::{CredentialStatus, CredentialStore, CredentialSummary};
pub use kv::{KvStore, MemoryKvStore, SqliteKvStore};
pub use paths::AppPaths;
pub use schema::run_migrations;
