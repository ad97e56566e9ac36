//! `key value` configuration file parsing.
//!
//! Mirrors `original_source/pybinsim/application.py`'s `BinSimConfig`:
//! whitespace-separated `key value` lines, a fixed default for every
//! recognized key, unknown keys logged and ignored, malformed booleans
//! logged and left at their default.

use std::path::Path;

use crate::error::ConfigError;

/// One fully-resolved engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BinSimConfig {
    pub soundfile: String,
    pub block_size: usize,
    pub filter_size: usize,
    pub filter_list: String,
    pub enable_crossfading: bool,
    pub use_headphone_filter: bool,
    pub loudness_factor: f32,
    pub max_channels: usize,
    pub sampling_rate: u32,
    pub loop_sound: bool,
}

impl Default for BinSimConfig {
    fn default() -> Self {
        Self {
            soundfile: String::new(),
            block_size: 256,
            filter_size: 16384,
            filter_list: "brirs/filter_list_kemar5.txt".to_string(),
            enable_crossfading: false,
            use_headphone_filter: false,
            loudness_factor: 1.0,
            max_channels: 8,
            sampling_rate: 44100,
            loop_sound: true,
        }
    }
}

/// Parses `"True"`/`"False"` the way the original config parser does;
/// anything else is treated as malformed and logged by the caller.
fn parse_boolean(value: &str) -> Option<bool> {
    match value {
        "True" | "true" => Some(true),
        "False" | "false" => Some(false),
        _ => None,
    }
}

impl BinSimConfig {
    /// Reads a config file, overriding defaults for every recognized key it
    /// contains. Unknown keys are logged and skipped; malformed values are
    /// logged and the default for that key is kept.
    pub fn read_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        let mut config = Self::default();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.splitn(2, char::is_whitespace);
            let key = parts.next().unwrap_or_default();
            let value = parts.next().unwrap_or_default().trim();
            if key.is_empty() || value.is_empty() {
                return Err(ConfigError::MalformedLine(line.to_string()));
            }

            config.apply(key, value);
        }

        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "soundfile" => self.soundfile = value.to_string(),
            "blockSize" => match value.parse() {
                Ok(v) => self.block_size = v,
                Err(_) => tracing::warn!(key, value, "cannot parse as integer"),
            },
            "filterSize" => match value.parse() {
                Ok(v) => self.filter_size = v,
                Err(_) => tracing::warn!(key, value, "cannot parse as integer"),
            },
            "filterList" => self.filter_list = value.to_string(),
            "enableCrossfading" => match parse_boolean(value) {
                Some(v) => self.enable_crossfading = v,
                None => tracing::warn!(key, value, "cannot convert to bool"),
            },
            "useHeadphoneFilter" => match parse_boolean(value) {
                Some(v) => self.use_headphone_filter = v,
                None => tracing::warn!(key, value, "cannot convert to bool"),
            },
            "loudnessFactor" => match value.parse() {
                Ok(v) => self.loudness_factor = v,
                Err(_) => tracing::warn!(key, value, "cannot parse as float"),
            },
            "maxChannels" => match value.parse() {
                Ok(v) => self.max_channels = v,
                Err(_) => tracing::warn!(key, value, "cannot parse as integer"),
            },
            "samplingRate" => match value.parse() {
                Ok(v) => self.sampling_rate = v,
                Err(_) => tracing::warn!(key, value, "cannot parse as integer"),
            },
            "loopSound" => match parse_boolean(value) {
                Some(v) => self.loop_sound = v,
                None => tracing::warn!(key, value, "cannot convert to bool"),
            },
            _ => tracing::warn!(key, "unknown config entry"),
        }
    }
}
