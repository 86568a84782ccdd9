//! Type references used by source members and facet members
//!
//! A small textual grammar keeps manifests readable:
//!
//! ```text
//! bool | int | float | string        scalars
//! Person                             a declared type or enum
//! T?  |  Option<T>                   nullable
//! Seq<T>                             lazy sequence (materialized as a Vec)
//! List<T> | Vec<T>                   growable ordered list
//! Array<T> | T[]                     fixed-size array
//! ReadOnlyList<T>                    read-only ordered view
//! ```
//!
//! The collection shape is part of the type so it survives a round trip.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Bool,
    Int,
    Float,
    String,
}

impl ScalarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
            ScalarKind::String => "string",
        }
    }
}

/// Collection wrapper shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollectionShape {
    Sequence,
    #[default]
    List,
    Array,
    ReadOnlyList,
}

impl CollectionShape {
    pub fn keyword(&self) -> &'static str {
        match self {
            CollectionShape::Sequence => "Seq",
            CollectionShape::List => "List",
            CollectionShape::Array => "Array",
            CollectionShape::ReadOnlyList => "ReadOnlyList",
        }
    }

    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "Seq" | "Sequence" => Some(CollectionShape::Sequence),
            "List" | "Vec" => Some(CollectionShape::List),
            "Array" => Some(CollectionShape::Array),
            "ReadOnlyList" => Some(CollectionShape::ReadOnlyList),
            _ => None,
        }
    }
}

/// A parsed type reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeRef {
    Scalar(ScalarKind),
    Named(String),
    Nullable(Box<TypeRef>),
    Collection {
        shape: CollectionShape,
        element: Box<TypeRef>,
    },
}

impl TypeRef {
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = Parser {
            src: text,
            pos: 0,
        };
        let ty = parser.parse_type()?;
        parser.skip_ws();
        if parser.pos != text.len() {
            return Err(Error::TypeParse(format!(
                "unexpected trailing input in '{}' at {}",
                text, parser.pos
            )));
        }
        Ok(ty)
    }

    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    pub fn nullable(inner: TypeRef) -> Self {
        match inner {
            already @ TypeRef::Nullable(_) => already,
            other => TypeRef::Nullable(Box::new(other)),
        }
    }

    pub fn collection(shape: CollectionShape, element: TypeRef) -> Self {
        TypeRef::Collection {
            shape,
            element: Box::new(element),
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, TypeRef::Nullable(_))
    }

    /// The type with one level of nullability removed
    pub fn non_null(&self) -> &TypeRef {
        match self {
            TypeRef::Nullable(inner) => inner,
            other => other,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self.non_null(), TypeRef::Collection { .. })
    }

    pub fn collection_shape(&self) -> Option<CollectionShape> {
        match self.non_null() {
            TypeRef::Collection { shape, .. } => Some(*shape),
            _ => None,
        }
    }

    /// Element type of a collection (nullability of the collection stripped)
    pub fn element(&self) -> Option<&TypeRef> {
        match self.non_null() {
            TypeRef::Collection { element, .. } => Some(element),
            _ => None,
        }
    }

    /// The named type a member ultimately refers to, looking through
    /// nullability and one collection level
    pub fn target_name(&self) -> Option<&str> {
        let base = match self.element() {
            Some(element) => element.non_null(),
            None => self.non_null(),
        };
        match base {
            TypeRef::Named(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.non_null(), TypeRef::Scalar(_))
    }

    /// Replace the named type this reference points at, keeping nullability
    /// and collection shape
    pub fn retarget(&self, name: &str) -> TypeRef {
        self.with_base(TypeRef::Named(name.to_string()))
    }

    /// Replace the innermost named type with `base`
    pub fn with_base(&self, base: TypeRef) -> TypeRef {
        match self {
            TypeRef::Nullable(inner) => TypeRef::nullable(inner.with_base(base)),
            TypeRef::Collection { shape, element } => {
                TypeRef::collection(*shape, element.with_base(base))
            }
            TypeRef::Named(_) => base,
            scalar @ TypeRef::Scalar(_) => scalar.clone(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Scalar(kind) => write!(f, "{}", kind.as_str()),
            TypeRef::Named(name) => write!(f, "{}", name),
            TypeRef::Nullable(inner) => write!(f, "{}?", inner),
            TypeRef::Collection { shape, element } => {
                write!(f, "{}<{}>", shape.keyword(), element)
            }
        }
    }
}

impl TryFrom<String> for TypeRef {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        TypeRef::parse(&value)
    }
}

impl From<TypeRef> for String {
    fn from(value: TypeRef) -> Self {
        value.to_string()
    }
}

impl std::str::FromStr for TypeRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TypeRef::parse(s)
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        let rest = &self.src[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.src[self.pos..].starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Result<&'a str> {
        self.skip_ws();
        let rest = &self.src[self.pos..];
        let len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == ':'))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(Error::TypeParse(format!(
                "expected a type name in '{}' at {}",
                self.src, self.pos
            )));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn parse_type(&mut self) -> Result<TypeRef> {
        let name = self.ident()?;
        let mut ty = if self.eat("<") {
            let inner = self.parse_type()?;
            if !self.eat(">") {
                return Err(Error::TypeParse(format!("unclosed '<' in '{}'", self.src)));
            }
            if name == "Option" {
                TypeRef::nullable(inner)
            } else if let Some(shape) = CollectionShape::from_keyword(name) {
                TypeRef::collection(shape, inner)
            } else {
                return Err(Error::TypeParse(format!(
                    "unknown generic wrapper '{}' in '{}'",
                    name, self.src
                )));
            }
        } else {
            match name {
                "bool" => TypeRef::Scalar(ScalarKind::Bool),
                "int" | "i64" | "long" => TypeRef::Scalar(ScalarKind::Int),
                "float" | "f64" | "double" => TypeRef::Scalar(ScalarKind::Float),
                "string" | "String" => TypeRef::Scalar(ScalarKind::String),
                other => TypeRef::Named(other.to_string()),
            }
        };

        loop {
            if self.eat("[]") {
                ty = TypeRef::collection(CollectionShape::Array, ty);
            } else if self.eat("?") {
                ty = TypeRef::nullable(ty);
            } else {
                break;
            }
        }
        Ok(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("int", TypeRef::Scalar(ScalarKind::Int))]
    #[case("string?", TypeRef::nullable(TypeRef::Scalar(ScalarKind::String)))]
    #[case("Option<Person>", TypeRef::nullable(TypeRef::named("Person")))]
    #[case(
        "ReadOnlyList<Book>",
        TypeRef::collection(CollectionShape::ReadOnlyList, TypeRef::named("Book"))
    )]
    #[case(
        "Tag[]",
        TypeRef::collection(CollectionShape::Array, TypeRef::named("Tag"))
    )]
    #[case(
        "Vec<int>?",
        TypeRef::nullable(TypeRef::collection(
            CollectionShape::List,
            TypeRef::Scalar(ScalarKind::Int)
        ))
    )]
    fn test_parse(#[case] text: &str, #[case] expected: TypeRef) {
        assert_eq!(TypeRef::parse(text).unwrap(), expected);
    }

    #[test]
    fn test_display_is_canonical() {
        let ty = TypeRef::parse("Option<Vec<Person>>").unwrap();
        assert_eq!(ty.to_string(), "List<Person>?");
        assert_eq!(TypeRef::parse(&ty.to_string()).unwrap(), ty);
    }

    #[test]
    fn test_target_name_looks_through_wrappers() {
        let ty = TypeRef::parse("List<Person?>?").unwrap();
        assert_eq!(ty.target_name(), Some("Person"));
        assert_eq!(ty.collection_shape(), Some(CollectionShape::List));
        assert!(ty.is_nullable());
    }

    #[test]
    fn test_retarget_keeps_shape() {
        let ty = TypeRef::parse("ReadOnlyList<Book>?").unwrap();
        assert_eq!(ty.retarget("BookDto").to_string(), "ReadOnlyList<BookDto>?");
    }

    #[test]
    fn test_parse_errors() {
        assert!(TypeRef::parse("Map<int>").is_err());
        assert!(TypeRef::parse("List<int").is_err());
        assert!(TypeRef::parse("").is_err());
        assert!(TypeRef::parse("int int").is_err());
    }
}
