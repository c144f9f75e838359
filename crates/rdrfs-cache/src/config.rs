use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Default depth bound for a name array.
pub const DEFAULT_NAME_ARRAY_LENGTH: usize = 50;
/// Default bound on symbolic links followed by one resolution.
pub const DEFAULT_MAX_LINK_COUNT: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Server component every absolute path must start with.
    pub server_name: String,
    pub name_array_length: usize,
    pub max_link_count: usize,
    /// Substitutions tried in order for an `@sys` component.
    pub sysnames: Vec<String>,
    pub special_shares_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            server_name: "AFS".to_string(),
            name_array_length: DEFAULT_NAME_ARRAY_LENGTH,
            max_link_count: DEFAULT_MAX_LINK_COUNT,
            sysnames: vec!["amd64_win64".to_string()],
            special_shares_enabled: true,
        }
    }
}

impl CacheConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CacheConfig = serde_json::from_str(json)
            .map_err(|e| CacheError::invalid_parameter(format!("config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        debug!(path = %path.display(), server = %config.server_name, "loaded cache config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_name.is_empty() || self.server_name.contains('\\') {
            return Err(CacheError::invalid_parameter(format!(
                "server name {:?} is not a single path component",
                self.server_name
            )));
        }
        if self.name_array_length == 0 {
            return Err(CacheError::invalid_parameter(
                "name_array_length must be non-zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.server_name, "AFS");
        assert_eq!(config.name_array_length, DEFAULT_NAME_ARRAY_LENGTH);
        assert_eq!(config.max_link_count, DEFAULT_MAX_LINK_COUNT);
        assert!(config.special_shares_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = CacheConfig::from_json_str(r#"{"server_name":"CELLSRV"}"#).unwrap();
        assert_eq!(config.server_name, "CELLSRV");
        assert_eq!(config.name_array_length, DEFAULT_NAME_ARRAY_LENGTH);
    }

    #[test]
    fn test_rejects_bad_server_name() {
        assert!(CacheConfig::from_json_str(r#"{"server_name":""}"#).is_err());
        assert!(CacheConfig::from_json_str(r#"{"server_name":"a\\b"}"#).is_err());
    }

    #[test]
    fn test_rejects_zero_name_array_length() {
        assert!(CacheConfig::from_json_str(r#"{"name_array_length":0}"#).is_err());
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = CacheConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, CacheError::InvalidParameter { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"sysnames":["x86_win","i386_w2k"],"max_link_count":8}}"#).unwrap();
        let config = CacheConfig::load(file.path()).unwrap();
        assert_eq!(config.sysnames, vec!["x86_win", "i386_w2k"]);
        assert_eq!(config.max_link_count, 8);
    }

    #[test]
    fn test_load_missing_file() {
        let err = CacheConfig::load("/nonexistent/rdrfs-cache.json").unwrap_err();
        assert!(matches!(err, CacheError::Io(_)));
    }
}
