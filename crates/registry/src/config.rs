//! Registry capacity configuration.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capacities enforced by a [`crate::Registry`].
///
/// Reaching a capacity is reported as `OutOfMemory`, the same way an allocator refusal is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
	/// Maximum number of registrations resident at once, live or retired.
	pub max_drivers: usize,
	/// Maximum number of operation tables a single registration may own.
	pub max_tables_per_driver: usize,
	/// Maximum number of nodes in one instance's resource tree, root included.
	pub max_nodes_per_instance: usize,
}

impl Default for RegistryConfig {
	fn default() -> Self {
		Self {
			max_drivers: 64,
			max_tables_per_driver: 256,
			max_nodes_per_instance: 65_536,
		}
	}
}

/// Errors raised while loading a [`RegistryConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("failed to parse registry config: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("invalid registry config: {0}")]
	Invalid(&'static str),
}

impl RegistryConfig {
	/// Parses a TOML document. Missing keys take their defaults.
	pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(src)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads and parses a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_toml_str(&src)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.max_drivers == 0 {
			return Err(ConfigError::Invalid("max_drivers must be at least 1"));
		}
		if self.max_tables_per_driver == 0 {
			return Err(ConfigError::Invalid("max_tables_per_driver must be at least 1"));
		}
		if self.max_nodes_per_instance == 0 {
			return Err(ConfigError::Invalid("max_nodes_per_instance must cover the root"));
		}
		Ok(())
	}
}
