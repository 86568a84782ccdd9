//! Shared utility functions
//!
//! Identifier conversion for emitted code and content hashing for cache keys
//! and provenance.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Convert PascalCase or camelCase to snake_case
///
/// # Examples
/// ```
/// use facetgen::util::to_snake_case;
/// assert_eq!(to_snake_case("HelloWorld"), "hello_world");
/// assert_eq!(to_snake_case("fooBar"), "foo_bar");
/// ```
pub fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, c) in s.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}

/// Short, stable hash of a value's JSON form (`sha256:` + 16 hex chars)
pub fn content_hash<T: Serialize>(value: &T) -> String {
    let content = serde_json::to_string(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("sha256:{}", hex::encode(&hasher.finalize()[..8]))
}

/// Rust keywords that cannot be used as plain identifiers
const RUST_KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move",
    "mut", "pub", "ref", "return", "static", "struct", "trait", "true", "type", "unsafe", "use",
    "where", "while", "yield",
];

/// Keywords that are not allowed even as raw identifiers
const NON_RAW_KEYWORDS: &[&str] = &["crate", "self", "super"];

/// A member name usable as a Rust field identifier
pub fn rust_ident(name: &str) -> String {
    let snake = to_snake_case(name);
    if NON_RAW_KEYWORDS.contains(&snake.as_str()) {
        format!("{}_", snake)
    } else if RUST_KEYWORDS.contains(&snake.as_str()) {
        format!("r#{}", snake)
    } else {
        snake
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("HelloWorld"), "hello_world");
        assert_eq!(to_snake_case("fooBar"), "foo_bar");
        assert_eq!(to_snake_case("AccessLevel"), "access_level");
        assert_eq!(to_snake_case(""), "");
    }

    #[test]
    fn test_rust_ident() {
        assert_eq!(rust_ident("DisplayName"), "display_name");
        assert_eq!(rust_ident("type"), "r#type");
        assert_eq!(rust_ident("self"), "self_");
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = content_hash(&vec!["x", "y"]);
        assert_eq!(a, content_hash(&vec!["x", "y"]));
        assert_ne!(a, content_hash(&vec!["y", "x"]));
        assert_eq!(a.len(), "sha256:".len() + 16);
    }
}
