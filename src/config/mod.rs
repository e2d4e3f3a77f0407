mod settings;

pub use settings::{Config, LedgerConfig, SessionConfig, TomlConfig, EXAMPLE_CONFIG};
