//! CLI command implementations
//!
//! - `generate`: code emission and the `check` report
//! - `inspect`: model, projection and schema views
//! - `run`: interpreted conversion and flatten over JSON data
//! - `util`: config, manifest and IO helpers

pub mod generate;
pub mod inspect;
pub mod run;
pub mod util;

pub use generate::{cmd_check, cmd_generate, GenerateArgs};
pub use inspect::{cmd_inspect, cmd_projection, cmd_schema};
pub use run::{cmd_convert, cmd_flatten};
