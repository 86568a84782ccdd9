//! Model, projection and schema views

use super::util::{load_config, load_model};
use facetgen::projection;
use facetgen::{FacetgenConfig, GenerationModel, Manifest, ResolvedMember, Result};
use std::path::Path;

/// One line per member: name, facet type and how it is produced
pub fn describe_model(model: &GenerationModel) -> String {
    let mut out = format!(
        "max_depth: {}  preserve_references: {}  projection: {}\n",
        model.max_depth, model.preserve_references, model.generate_projection
    );
    for facet in model.facets() {
        out.push_str(&format!("\nfacet {} (source: {})\n", facet.name, facet.source));
        if let Some(base) = &facet.base {
            out.push_str(&format!("  base: {}\n", base));
        }
        for member in &facet.members {
            out.push_str(&format!("  {}: {}{}\n", member.name, member.facet_type, notes(member)));
        }
    }
    out
}

fn notes(member: &ResolvedMember) -> String {
    let mut notes = Vec::new();
    if let Some(binding) = &member.nested {
        notes.push(format!("-> {}", binding.bound_facet));
    }
    if member.is_computed() {
        notes.push("computed".to_string());
    }
    if member.is_conditional() {
        notes.push(format!("when {}", member.conditions.join(" && ")));
    }
    if !member.in_projection {
        notes.push("not projected".to_string());
    }
    if notes.is_empty() {
        String::new()
    } else {
        format!("  [{}]", notes.join(", "))
    }
}

pub fn cmd_inspect(manifest: &Path, facet: &str, json: bool, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let model = load_model(manifest, facet, &config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&model)?);
    } else {
        print!("{}", describe_model(&model));
    }
    Ok(())
}

/// Projection text of a model, or an error when the facet disables it
pub fn projection_text(model: &GenerationModel, rust: bool) -> Result<String> {
    if !model.generate_projection {
        return Err(format!("projection is disabled for facet {}", model.root.name).into());
    }
    let projection = projection::synthesize(model);
    Ok(if rust {
        projection.to_rust_builder()
    } else {
        projection.to_string()
    })
}

pub fn cmd_projection(manifest: &Path, facet: &str, rust: bool, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let model = load_model(manifest, facet, &config)?;
    println!("{}", projection_text(&model, rust)?);
    Ok(())
}

/// JSON schema of the manifest or the project config
pub fn schema_json(name: &str) -> Result<String> {
    let schema = match name {
        "manifest" => schemars::schema_for!(Manifest),
        "config" => schemars::schema_for!(FacetgenConfig),
        other => {
            return Err(format!("Unknown schema '{}' (expected manifest or config)", other).into())
        }
    };
    Ok(serde_json::to_string_pretty(&schema)?)
}

pub fn cmd_schema(name: &str) -> Result<()> {
    println!("{}", schema_json(name)?);
    Ok(())
}
