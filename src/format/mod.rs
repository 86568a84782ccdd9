//! Formatting of emitted Rust
//!
//! Emitted code is parsed with syn and printed with prettyplease. Comments
//! do not survive the round trip, so headers are attached after formatting.

use thiserror::Error;

/// Format Rust code using prettyplease
pub fn format_rust(code: &str) -> Result<String, FormatError> {
    match syn::parse_file(code) {
        Ok(syntax_tree) => Ok(prettyplease::unparse(&syntax_tree)),
        Err(e) => Err(FormatError::Parse(e.to_string())),
    }
}

/// Format, or hand back the input unchanged when it does not parse
pub fn format_or_raw(code: &str) -> String {
    match format_rust(code) {
        Ok(formatted) => formatted,
        Err(e) => {
            tracing::warn!(error = %e, "emitted code left unformatted");
            code.to_string()
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    #[error("emitted Rust does not parse: {0}")]
    Parse(String),
}
