// Foxely VM Configuration
// Loaded from foxely.json; every field has a default

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the config file looked up next to a script
pub const CONFIG_FILE: &str = "foxely.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Runtime knobs for a VM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Roots searched, in order, for `<module>.fox` on import
    pub module_paths: Vec<PathBuf>,
    /// Live object count that triggers the first collection
    pub gc_initial_threshold: usize,
    pub gc_grow_factor: f64,
    /// Collect before every allocation
    pub gc_stress: bool,
    pub log_gc: bool,
    pub trace_execution: bool,
    pub print_bytecode: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            module_paths: vec![PathBuf::from(".")],
            gc_initial_threshold: 1024,
            gc_grow_factor: 2.0,
            gc_stress: false,
            log_gc: false,
            trace_execution: false,
            print_bytecode: false,
        }
    }
}

impl VmConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Load `dir/foxely.json` when present, defaults otherwise
    pub fn discover(dir: &Path) -> Result<Self, ConfigError> {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    pub fn with_module_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if !self.module_paths.contains(&path) {
            self.module_paths.insert(0, path);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = VmConfig::from_json(r#"{ "gc_stress": true, "module_paths": ["lib"] }"#).unwrap();
        assert!(config.gc_stress);
        assert_eq!(config.module_paths, vec![PathBuf::from("lib")]);
        assert_eq!(config.gc_initial_threshold, 1024);
        assert_eq!(config.gc_grow_factor, 2.0);
    }

    #[test]
    fn test_discover_without_file() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(VmConfig::discover(dir.path()).unwrap(), VmConfig::default());
    }

    #[test]
    fn test_discover_reports_bad_json() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{ not json").unwrap();
        let err = VmConfig::discover(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_with_module_path_prepends_once() {
        let config = VmConfig::default().with_module_path("scripts").with_module_path("scripts");
        assert_eq!(config.module_paths, vec![PathBuf::from("scripts"), PathBuf::from(".")]);
    }
}
