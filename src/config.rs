//! Project configuration
//!
//! Loads `facetgen.yaml` from the working directory (or an explicit path).
//! Defaults here apply to every facet; a facet declaration overrides them.

use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name looked up in the working directory
pub const CONFIG_FILE: &str = "facetgen.yaml";

/// Root configuration (`facetgen.yaml`)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FacetgenConfig {
    /// Schema version for migrations
    pub version: u32,

    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for FacetgenConfig {
    fn default() -> Self {
        Self {
            version: 1,
            defaults: DefaultsConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

/// Default settings applied to all facets
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct DefaultsConfig {
    /// Run-time nesting bound; 0 = unbounded
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Track visited objects so shared or cyclic references expand once
    #[serde(default = "default_true")]
    pub preserve_references: bool,

    #[serde(default = "default_true")]
    pub generate_projection: bool,

    /// Emit the provenance header
    #[serde(default = "default_true")]
    pub provenance: bool,

    /// Auto-format generated code
    #[serde(default = "default_true")]
    pub format: bool,
}

fn default_max_depth() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            preserve_references: true,
            generate_projection: true,
            provenance: true,
            format: true,
        }
    }
}

/// Where generated files go
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OutputConfig {
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// File pattern: {facet}, {snake}
    #[serde(default = "default_naming")]
    pub naming: String,
}

fn default_dir() -> PathBuf {
    PathBuf::from("generated")
}

fn default_naming() -> String {
    "{facet}.rs".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            naming: default_naming(),
        }
    }
}

impl FacetgenConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: FacetgenConfig = serde_norway::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", CONFIG_FILE, e)))?;

        if config.version != 1 {
            return Err(Error::Config(format!(
                "Unsupported {} version: {}",
                CONFIG_FILE, config.version
            )));
        }

        Ok(config)
    }

    /// Load an explicit config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(Error::Io)?;
        Self::from_yaml(&content)
    }

    /// Load `facetgen.yaml` from a directory, if present
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let file = dir.join(CONFIG_FILE);
        if !file.exists() {
            return Ok(None);
        }
        Self::load(&file).map(Some)
    }

    /// Explicit path wins, then the directory lookup, then built-in defaults
    pub fn resolve(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Ok(Self::load_from_dir(dir)?.unwrap_or_default()),
        }
    }
}

impl OutputConfig {
    /// Apply the naming pattern to a facet name
    pub fn apply_naming(&self, facet: &str) -> String {
        self.naming
            .replace("{facet}", facet)
            .replace("{snake}", &crate::util::to_snake_case(facet))
    }

    pub fn path_for(&self, facet: &str) -> PathBuf {
        self.dir.join(self.apply_naming(facet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_naming_pattern() {
        let output = OutputConfig::default();
        assert_eq!(output.apply_naming("PersonDto"), "PersonDto.rs");

        let output = OutputConfig {
            dir: PathBuf::from("out"),
            naming: "{snake}_facet.rs".to_string(),
        };
        assert_eq!(output.apply_naming("PersonDto"), "person_dto_facet.rs");
        assert_eq!(output.path_for("PersonDto"), PathBuf::from("out/person_dto_facet.rs"));
    }

    #[test]
    fn test_partial_defaults() {
        let config = FacetgenConfig::from_yaml(
            r#"
version: 1
defaults:
  max_depth: 3
"#,
        )
        .unwrap();
        assert_eq!(config.defaults.max_depth, 3);
        assert!(config.defaults.preserve_references);
        assert_eq!(config.output.naming, "{facet}.rs");
    }

    #[test]
    fn test_unsupported_version() {
        assert!(FacetgenConfig::from_yaml("version: 2").is_err());
    }

    #[test]
    fn test_load_from_dir() {
        let dir = TempDir::new().unwrap();
        assert!(FacetgenConfig::load_from_dir(dir.path()).unwrap().is_none());

        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "version: 1\ndefaults:\n  preserve_references: false\n",
        )
        .unwrap();
        let config = FacetgenConfig::resolve(None, dir.path()).unwrap();
        assert!(!config.defaults.preserve_references);
        assert_eq!(config.defaults.max_depth, 10);
    }
}
