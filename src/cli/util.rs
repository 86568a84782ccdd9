//! CLI utility helpers

use facetgen::{build_model, Error, FacetgenConfig, GenerationModel, Manifest, Result};
use std::fs;
use std::path::Path;

/// Resolve the project config against the working directory
pub fn load_config(explicit: Option<&Path>) -> Result<FacetgenConfig> {
    let cwd = std::env::current_dir().map_err(Error::Io)?;
    FacetgenConfig::resolve(explicit, &cwd)
}

/// Load a manifest and build one facet's model
pub fn load_model(manifest: &Path, facet: &str, config: &FacetgenConfig) -> Result<GenerationModel> {
    let manifest = Manifest::load(manifest)?;
    build_model(&manifest, facet, &config.defaults)
}

pub fn read_json(path: &Path) -> Result<serde_json::Value> {
    let content = fs::read_to_string(path).map_err(Error::Io)?;
    Ok(serde_json::from_str(&content)?)
}

/// Write content to file or stdout
pub fn write_output(path: Option<&Path>, content: &str) -> Result<()> {
    match path {
        Some(p) => {
            if let Some(parent) = p.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).map_err(Error::Io)?;
                }
            }
            fs::write(p, content).map_err(Error::Io)?;
            tracing::info!(path = %p.display(), "wrote");
        }
        None => print!("{}", content),
    }
    Ok(())
}
