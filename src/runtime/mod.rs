//! In-process execution of generated semantics
//!
//! - [`Value`]: dynamic object graph with identity-bearing objects
//! - [`TraversalState`]: depth bound and visited identities for one call
//! - [`HookRegistry`]: resolves hook paths to closures
//! - [`Mapper`]: runs forward and reverse routines

pub mod hooks;
pub mod mapper;
pub mod state;
pub mod value;

pub use hooks::{HookFn, HookRegistry};
pub use mapper::Mapper;
pub use state::{address_of, Admission, TraversalState};
pub use value::{CelConverter, FacetTypes, ObjectId, ObjectRef, Record, TypeLookup, Value};
