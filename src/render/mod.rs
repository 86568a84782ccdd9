//! Code rendering: Rust source for a generated facet
//!
//! One file per facet declaration. The file holds the facet struct, its
//! eager conversion (`from_source` / `from_source_with`), the reverse
//! conversion when requested, the projection tree when requested, and the
//! flatten row types. Emitted code links against `facetgen::runtime` for the
//! traversal state and `facetgen::MappingError` for faults.
//!
//! Type mapping:
//! - `bool` / `int` / `float` / `string` become `bool` / `i64` / `f64` / `String`
//! - named object types are boxed (`Box<T>`, `Option<Box<T>>`); enums are not
//! - `Seq` and `List` become `Vec<T>`, `Array` `Box<[T]>`, `ReadOnlyList`
//!   `std::sync::Arc<[T]>`; collection elements are never boxed

mod rust;

use crate::config::DefaultsConfig;
use crate::error::Result;
use crate::flatten;
use crate::format::format_or_raw;
use crate::model::GenerationModel;
use crate::typeref::{CollectionShape, ScalarKind, TypeRef};
use chrono::Utc;

/// Render configuration
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Include provenance header
    pub provenance: bool,
    /// Run prettyplease over the output
    pub format: bool,
    /// Module the source types are imported from
    pub source_module: String,
    /// Module the other generated facets are imported from
    pub facet_module: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            provenance: true,
            format: true,
            source_module: "crate".into(),
            facet_module: "super".into(),
        }
    }
}

impl RenderConfig {
    pub fn from_defaults(defaults: &DefaultsConfig) -> Self {
        Self {
            provenance: defaults.provenance,
            format: defaults.format,
            ..Self::default()
        }
    }
}

/// Render a model's root facet to Rust source
pub fn render_model(model: &GenerationModel, config: &RenderConfig) -> Result<String> {
    let plans = flatten::plans(model)?;
    let body = rust::render(model, &plans, config)?;
    let body = if config.format {
        format_or_raw(&body)
    } else {
        body
    };

    let mut out = String::new();
    if config.provenance {
        out.push_str(&format!(
            "// GENERATED FROM FACET: {} (source: {})\n",
            model.root.name, model.root.source
        ));
        out.push_str(&format!("// MODEL HASH: {}\n", model.hash));
        out.push_str(&format!("// GENERATED: {}\n", Utc::now().to_rfc3339()));
        out.push_str("// DO NOT EDIT - regenerate with: facetgen generate\n");
    }
    if let Some(namespace) = model.namespace() {
        out.push_str(&format!("// Module: {}\n", namespace));
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(&body);
    Ok(out)
}

/// Named types that are emitted behind a `Box`
pub(crate) fn is_boxed(ty: &TypeRef, model: &GenerationModel) -> bool {
    matches!(ty, TypeRef::Named(name) if !model.is_enum(name))
}

/// Rust type of a facet or source member
pub fn rust_type(ty: &TypeRef, model: &GenerationModel) -> String {
    type_text(ty, model, false)
}

fn type_text(ty: &TypeRef, model: &GenerationModel, in_collection: bool) -> String {
    match ty {
        TypeRef::Scalar(ScalarKind::Bool) => "bool".into(),
        TypeRef::Scalar(ScalarKind::Int) => "i64".into(),
        TypeRef::Scalar(ScalarKind::Float) => "f64".into(),
        TypeRef::Scalar(ScalarKind::String) => "String".into(),
        TypeRef::Named(name) if in_collection || model.is_enum(name) => name.clone(),
        TypeRef::Named(name) => format!("Box<{}>", name),
        TypeRef::Nullable(inner) => format!("Option<{}>", type_text(inner, model, in_collection)),
        TypeRef::Collection { shape, element } => {
            let element = type_text(element, model, true);
            match shape {
                CollectionShape::Sequence | CollectionShape::List => format!("Vec<{}>", element),
                CollectionShape::Array => format!("Box<[{}]>", element),
                CollectionShape::ReadOnlyList => format!("std::sync::Arc<[{}]>", element),
            }
        }
    }
}
