use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::engine::{EdgeOutput, MappingSettings};
use crate::ledger::MalformedRecordPolicy;
use crate::util::paths::config_path;
use crate::util::signature::DEFAULT_SIGNATURE_PREFIX;

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    /// Parameters pushed to the mapping engine at start-up
    pub mapping: MappingSettings,
    /// Object ledger behavior
    pub ledger: LedgerConfig,
    /// Session lifecycle behavior
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerConfig {
    pub malformed_records: MalformedRecordPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Prefix of generated map signatures (`{prefix}_{ticks}`)
    pub signature_prefix: String,
    /// Seed a new scan with the last persisted map instead of an empty one
    pub resume_from_current_map: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signature_prefix: DEFAULT_SIGNATURE_PREFIX.to_string(),
            resume_from_current_map: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlMappingConfig {
    pub splitter_max_distance_m: Option<f32>,
    pub splitter_max_duration_s: Option<f32>,
    pub edge_output: Option<EdgeOutput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlLedgerConfig {
    pub malformed_records: Option<MalformedRecordPolicy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlSessionConfig {
    pub signature_prefix: Option<String>,
    pub resume_from_current_map: Option<bool>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub mapping: Option<TomlMappingConfig>,
    pub ledger: Option<TomlLedgerConfig>,
    pub session: Option<TomlSessionConfig>,
}

impl Config {
    /// Load configuration from the data directory, merging with defaults
    pub fn load() -> Self {
        let config_file = config_path();

        // Create example config on first run
        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }

        Self::load_from(&config_file)
    }

    /// Load configuration from `path`. A missing or unreadable file yields
    /// the defaults.
    pub fn load_from(path: &Path) -> Self {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(_) => return Config::default(),
        };

        match Self::parse(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring invalid config file");
                Config::default()
            }
        }
    }

    /// Parse TOML config text over the defaults
    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        let toml_config = toml::from_str::<TomlConfig>(contents)?;
        let mut config = Config::default();

        if let Some(mapping) = toml_config.mapping {
            if let Some(distance) = mapping.splitter_max_distance_m {
                config.mapping.splitter_max_distance_m = distance;
            }
            if let Some(duration) = mapping.splitter_max_duration_s {
                config.mapping.splitter_max_duration_s = duration;
            }
            if let Some(edge_output) = mapping.edge_output {
                config.mapping.edge_output = edge_output;
            }
        }

        if let Some(ledger) = toml_config.ledger {
            if let Some(policy) = ledger.malformed_records {
                config.ledger.malformed_records = policy;
            }
        }

        if let Some(session) = toml_config.session {
            if let Some(prefix) = session.signature_prefix {
                config.session.signature_prefix = prefix;
            }
            if let Some(resume) = session.resume_from_current_map {
                config.session.resume_from_current_map = resume;
            }
        }

        Ok(config)
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &Path) {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    tracing::warn!(error = %e, "Failed to create config directory");
                    return;
                }
            }
        }

        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::warn!(error = %e, "Failed to write default config");
        }
    }

    pub fn with_ledger_policy(mut self, policy: MalformedRecordPolicy) -> Self {
        self.ledger.malformed_records = policy;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.session.resume_from_current_map = resume;
        self
    }
}
