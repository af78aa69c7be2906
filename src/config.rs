//! The configuration collaborator. The engine keeps no global state;
//! anything tunable is read through this trait by whoever constructs
//! the engine's options.

use std::collections::HashMap;

use crate::{PulseError, PulseResult};

pub trait Config {
	/// The value for `key`, or [PulseError::NoKey].
	fn get_value(&self, key: &str) -> PulseResult<&str>;

	/// The value for `key`, or `default` when the key is absent.
	fn get_value_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
		self.get_value(key).unwrap_or(default)
	}
}

/// A plain in-memory key/value store.
#[derive(Debug, Default, Clone)]
pub struct MapConfig {
	values: HashMap<String, String>,
}

impl MapConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
		self.values.insert(key.into(), value.into());
		self
	}
}

impl Config for MapConfig {
	fn get_value(&self, key: &str) -> PulseResult<&str> {
		self.values.get(key)
			.map(String::as_str)
			.ok_or_else(|| PulseError::NoKey(key.to_owned()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn lookup_and_default() {
		let config = MapConfig::new().set("depth", "2");
		assert_eq!("2", config.get_value("depth").unwrap());
		assert_eq!("2", config.get_value_or("depth", "1"));
		assert_eq!("300", config.get_value_or("chunk_size", "300"));
		assert!(matches!(
			config.get_value("chunk_size"),
			Err(PulseError::NoKey(_))
		));
	}
}
