//! Engine tuning.
//!
//! Values come from [`EngineConfig::default`] or a TOML document:
//!
//! ```toml
//! batch_size = 35
//! eval_timeout_ms = 5000
//! enumeration_timeout_ms = 30000
//! member_timeout_ms = 5000
//! max_detached_depth = 128
//! match_threads = 4
//! ```
//!
//! Every key is optional. Locating the document is the host's concern.

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Handles per window. Below this, per-call overhead dominates; above it the
/// compound expression's parse cost does.
pub const DEFAULT_BATCH_SIZE: NonZeroUsize = NonZeroUsize::new(35).unwrap();

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	Io {
		path: String,
		source: std::io::Error,
	},
	#[error("invalid config: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("invalid config: {0}")]
	Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
	/// Handles resolved per compound expression.
	pub batch_size: NonZeroUsize,
	/// Timeout of each window and single-name evaluation.
	pub eval_timeout_ms: u64,
	/// Timeout of the class-list evaluation that starts an enumeration.
	pub enumeration_timeout_ms: u64,
	/// Timeout of member-table and method-implementation evaluations.
	pub member_timeout_ms: u64,
	/// Step bound for hierarchy walks that cannot use a cached generation.
	pub max_detached_depth: usize,
	/// Upper bound on threads used to match large generations.
	pub match_threads: usize,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			batch_size: DEFAULT_BATCH_SIZE,
			eval_timeout_ms: 5_000,
			enumeration_timeout_ms: 30_000,
			member_timeout_ms: 5_000,
			max_detached_depth: 128,
			match_threads: 4,
		}
	}
}

impl EngineConfig {
	/// Parses and validates a TOML document.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: EngineConfig = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads and parses a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.display().to_string(),
			source,
		})?;
		Self::from_toml_str(&input)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.eval_timeout_ms == 0 || self.enumeration_timeout_ms == 0 || self.member_timeout_ms == 0 {
			return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
		}
		if self.max_detached_depth == 0 {
			return Err(ConfigError::Invalid("max_detached_depth must be non-zero".into()));
		}
		Ok(())
	}

	pub fn eval_timeout(&self) -> Duration {
		Duration::from_millis(self.eval_timeout_ms)
	}

	pub fn enumeration_timeout(&self) -> Duration {
		Duration::from_millis(self.enumeration_timeout_ms)
	}

	pub fn member_timeout(&self) -> Duration {
		Duration::from_millis(self.member_timeout_ms)
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn empty_document_yields_defaults() {
		let config = EngineConfig::from_toml_str("").unwrap();
		assert_eq!(config, EngineConfig::default());
		assert_eq!(config.batch_size.get(), 35);
	}

	#[test]
	fn partial_document_overrides_keys() {
		let config = EngineConfig::from_toml_str("batch_size = 64\neval_timeout_ms = 250\n").unwrap();
		assert_eq!(config.batch_size.get(), 64);
		assert_eq!(config.eval_timeout(), Duration::from_millis(250));
		assert_eq!(config.max_detached_depth, 128);
	}

	#[test]
	fn zero_batch_size_is_rejected() {
		assert!(matches!(EngineConfig::from_toml_str("batch_size = 0"), Err(ConfigError::Parse(_))));
	}

	#[test]
	fn unknown_keys_are_rejected() {
		assert!(EngineConfig::from_toml_str("batchsize = 10").is_err());
	}

	#[test]
	fn zero_timeout_is_invalid() {
		assert!(matches!(
			EngineConfig::from_toml_str("member_timeout_ms = 0"),
			Err(ConfigError::Invalid(_))
		));
	}

	#[test]
	fn loads_from_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "max_detached_depth = 16").unwrap();
		let config = EngineConfig::load(file.path()).unwrap();
		assert_eq!(config.max_detached_depth, 16);
		assert!(matches!(
			EngineConfig::load(file.path().with_extension("missing")),
			Err(ConfigError::Io { .. })
		));
	}
}
