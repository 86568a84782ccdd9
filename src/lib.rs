// Production-quality lints
#![warn(
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
// Deny truly dangerous patterns
#![deny(clippy::mem_forget)]
// Allow common patterns in library code
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! # facetgen: declarative facet synthesis
//!
//! A facet is a reduced or reshaped view of a source type. A manifest
//! declares source types and facets; facetgen resolves each facet into a
//! [`GenerationModel`] and synthesizes from it:
//!
//! - an **eager** conversion from a live source object (and optionally back)
//! - a **projection**: an inspectable expression tree restricted to member
//!   access, object initialization, null checks and element-wise mapping
//! - **flatten** routines joining the root with one collection member
//!
//! Each artifact can be executed in-process over [`Value`] graphs or emitted
//! as Rust source.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use facetgen::{build_model, DefaultsConfig, Manifest, Mapper, Value};
//!
//! let manifest = Manifest::from_yaml(r#"
//! types:
//!   - name: Person
//!     members:
//!       - { name: name, type: string }
//!       - { name: age, type: int }
//! facets:
//!   - name: PersonDto
//!     source: Person
//!     exclude: [age]
//! "#)?;
//!
//! let model = build_model(&manifest, "PersonDto", &DefaultsConfig::default())?;
//! let source = Value::object("Person", [("name", Value::string("ada")), ("age", Value::Int(36))]);
//! let dto = Mapper::new(&model).convert(&source)?;
//!
//! let code = facetgen::render::render_model(&model, &Default::default())?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Manifest (YAML / JSON)                                      │
//! │       │                                                      │
//! │       ├──► TypeCatalog ──► MemberResolver ──► SelectionFilter│
//! │       │                                        │             │
//! │       │                          GraphResolver ◄┘            │
//! │       │                                │                     │
//! │       └──────────────► ModelBuilder ──► GenerationModel      │
//! │                                            │                 │
//! │            ┌───────────────┬───────────────┼──────────┐      │
//! │            ▼               ▼               ▼          ▼      │
//! │        eager plan      projection      flatten     render    │
//! │            │               │               │                 │
//! │         Mapper    ProjectionEvaluator  Flattener             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Depth truncation and cycle breaking are silent, successful outcomes. An
//! absent required value at conversion time is a [`MappingError`] naming
//! the member.

// Declarative input
pub mod catalog;
pub mod schema;
pub mod typeref;

// Resolution
pub mod graph;
pub mod members;
pub mod model;
pub mod select;

// Synthesis
pub mod eager;
pub mod flatten;
pub mod projection;

// Execution and emission
pub mod cel;
pub mod format;
pub mod render;
pub mod runtime;

// Ambient
pub mod config;
pub mod error;
pub mod util;

// Re-exports
pub use catalog::TypeCatalog;
pub use config::{DefaultsConfig, FacetgenConfig, OutputConfig};
pub use eager::{ConversionRoutine, EagerPlan, ReverseRoutine};
pub use error::{Error, MappingError, Result};
pub use flatten::{FlattenPlan, Flattener, Row};
pub use graph::{ExpansionStack, GraphResolver, NestedBinding};
pub use members::{resolve_members, MemberResolver, SourceMember};
pub use model::{
    build_model, generate_all, Diagnostic, FacetShape, Generated, GenerationModel,
    ModelBuilder, ResolvedMember, Severity,
};
pub use projection::{Expr, Literal, Projection, ProjectionEvaluator};
pub use render::{render_model, RenderConfig};
pub use runtime::{HookRegistry, Mapper, TraversalState, Value};
pub use schema::{EmissionShape, FacetDecl, Manifest};
pub use select::{select_members, Selection, SelectionPolicy};
pub use typeref::{CollectionShape, TypeRef};

/// Version of facetgen
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
