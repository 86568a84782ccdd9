//! Manifest types: the declarative input
//!
//! A `Manifest` carries the source type shapes a facet can be derived from
//! and the facet declarations themselves. Each declaration is a strongly
//! typed record; nothing downstream re-reads raw YAML.
//!
//! ## Example Manifest
//!
//! ```yaml
//! types:
//!   - name: Entity
//!     members:
//!       - name: id
//!         type: int
//!   - name: Person
//!     base: Entity
//!     members:
//!       - name: name
//!         type: string
//!       - name: password
//!         type: string
//!       - name: manager
//!         type: Person?
//! facets:
//!   - name: PersonDto
//!     source: Person
//!     exclude: [password]
//!     nested:
//!       - source: Person
//!         facet: PersonDto
//!     max_depth: 2
//! ```

use crate::error::{Error, Result};
use crate::typeref::TypeRef;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A complete manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[schemars(title = "facetgen manifest", description = "Source shapes and facet declarations")]
pub struct Manifest {
    /// Source type shapes
    #[serde(default)]
    pub types: Vec<TypeDecl>,

    /// Enumerations referenced by source members
    #[serde(default)]
    pub enums: Vec<EnumDecl>,

    /// Facet declarations
    #[serde(default)]
    pub facets: Vec<FacetDecl>,
}

/// A source type shape
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TypeDecl {
    pub name: String,

    /// Base type; absent or `object` ends the inheritance chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,

    #[serde(default)]
    pub members: Vec<MemberDecl>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A member declared on a source type
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MemberDecl {
    pub name: String,

    #[serde(rename = "type")]
    #[schemars(with = "String")]
    pub typ: TypeRef,

    /// False when the member can only be set at construction
    #[serde(default = "default_true")]
    pub mutable: bool,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub kind: MemberKind,

    #[serde(default)]
    pub visibility: Visibility,
}

fn default_true() -> bool {
    true
}

/// Field vs property members
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    #[default]
    Property,
    Field,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// An enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EnumDecl {
    pub name: String,
    pub variants: Vec<String>,
}

/// Shape of the generated facet type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EmissionShape {
    /// Struct with public, settable fields
    #[default]
    MutableStruct,
    /// Immutable struct built through a positional constructor
    PositionalStruct,
    /// Immutable positional value type
    PositionalValue,
    /// Value type with public, settable fields
    MutableValue,
}

impl EmissionShape {
    /// Positional shapes cannot have every member set after construction
    pub fn is_positional(&self) -> bool {
        matches!(
            self,
            EmissionShape::PositionalStruct | EmissionShape::PositionalValue
        )
    }

    pub fn is_value(&self) -> bool {
        matches!(
            self,
            EmissionShape::PositionalValue | EmissionShape::MutableValue
        )
    }
}

/// Condition clause - a single CEL predicate or a list (AND'd together)
///
/// ```yaml
/// when: "age >= 18"
/// ```
///
/// ```yaml
/// when:
///   - age >= 18
///   - verified
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(untagged)]
pub enum WhenClause {
    Single(String),
    Multiple(Vec<String>),
}

impl WhenClause {
    /// Individual predicates, in declaration order
    pub fn predicates(&self) -> Vec<String> {
        match self {
            WhenClause::Single(s) => vec![s.clone()],
            WhenClause::Multiple(v) => v.clone(),
        }
    }

    /// Convert to a single CEL expression (joining array items with &&)
    pub fn to_cel(&self) -> String {
        match self {
            WhenClause::Single(s) => s.clone(),
            WhenClause::Multiple(v) => {
                if v.is_empty() {
                    "true".to_string()
                } else if v.len() == 1 {
                    v[0].clone()
                } else {
                    v.iter()
                        .map(|s| format!("({})", s))
                        .collect::<Vec<_>>()
                        .join(" && ")
                }
            }
        }
    }
}

impl From<&str> for WhenClause {
    fn from(s: &str) -> Self {
        WhenClause::Single(s.to_string())
    }
}

/// Target representation for a re-projected enum member
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EnumProjection {
    String,
    Int,
}

/// Per-member directive on a facet
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MemberDirective {
    /// Target member name on the facet
    pub name: String,

    /// Dotted source path (`address.city`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Facet-side type; required for members with no source counterpart
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub typ: Option<TypeRef>,

    /// CEL expression computing the value from the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed: Option<String>,

    /// CEL predicates; all must hold for the member to be assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<WhenClause>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversible: Option<bool>,

    /// Include the member in the projection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_as: Option<EnumProjection>,
}

impl MemberDirective {
    /// Source path segments, if a path was given
    pub fn path_segments(&self) -> Option<Vec<&str>> {
        self.source
            .as_deref()
            .map(|path| path.split('.').map(str::trim).collect())
    }

    pub fn predicates(&self) -> Vec<String> {
        self.when
            .as_ref()
            .map(WhenClause::predicates)
            .unwrap_or_default()
    }
}

/// Association from a source type to the facet used to convert it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct NestedBindingDecl {
    pub source: String,
    pub facet: String,
}

/// Reference to an external `(source, target)` hook function
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(untagged)]
pub enum HookRef {
    Path(String),
    Detailed {
        path: String,
        #[serde(rename = "async", default)]
        is_async: bool,
    },
}

impl HookRef {
    pub fn path(&self) -> &str {
        match self {
            HookRef::Path(path) => path,
            HookRef::Detailed { path, .. } => path,
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self, HookRef::Detailed { is_async: true, .. })
    }
}

/// Flatten routine request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct FlattenDecl {
    /// Name of the generated row type
    pub name: String,
    /// Collection member of the facet producing one row per element
    pub collection: String,
}

/// A facet declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct FacetDecl {
    pub name: String,

    /// Source type the facet is derived from
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Allow-list; when non-empty the deny-list is ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,

    /// Also take field-kind members
    #[serde(default)]
    pub include_fields: bool,

    /// Drop members declared on any of these types
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_declared_in: Vec<String>,

    /// The facet's own base shape; its members are not re-emitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,

    #[serde(default)]
    pub shape: EmissionShape,

    #[serde(default)]
    pub reverse: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested: Vec<NestedBindingDecl>,

    /// 0 = unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_references: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_hook: Option<HookRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_hook: Option<HookRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<MemberDirective>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flatten: Vec<FlattenDecl>,
}

impl FacetDecl {
    pub fn directive(&self, name: &str) -> Option<&MemberDirective> {
        self.members.iter().find(|d| d.name == name)
    }

    /// Compute hash of the declaration for cache keys and provenance
    pub fn hash(&self) -> String {
        crate::util::content_hash(self)
    }
}

impl Manifest {
    /// Parse manifest from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_norway::from_str(yaml).map_err(|e| Error::ManifestParse(e.to_string()))
    }

    /// Serialize manifest to YAML string
    pub fn to_yaml(&self) -> Result<String> {
        serde_norway::to_string(self).map_err(|e| Error::ManifestParse(e.to_string()))
    }

    /// Parse manifest from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::ManifestParse(e.to_string()))
    }

    /// Serialize manifest to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::ManifestParse(e.to_string()))
    }

    /// Load a manifest from disk; `.json` files are read as JSON, anything
    /// else as YAML
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(Error::Io)?;
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    pub fn facet(&self, name: &str) -> Option<&FacetDecl> {
        self.facets.iter().find(|f| f.name == name)
    }

    /// Structural checks that do not need type resolution
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut seen = HashSet::new();
        for ty in &self.types {
            if !seen.insert(ty.name.as_str()) {
                errors.push(format!("Duplicate type: {}", ty.name));
            }
        }
        for en in &self.enums {
            if !seen.insert(en.name.as_str()) {
                errors.push(format!("Duplicate type: {}", en.name));
            }
            if en.variants.is_empty() {
                errors.push(format!("Enum {} has no variants", en.name));
            }
        }

        let mut facet_names = HashSet::new();
        for facet in &self.facets {
            if facet.name.is_empty() {
                errors.push("Facet name is required".into());
            }
            if !facet_names.insert(facet.name.as_str()) {
                errors.push(format!("Duplicate facet: {}", facet.name));
            }
            let mut directive_names = HashSet::new();
            for directive in &facet.members {
                if !directive_names.insert(directive.name.as_str()) {
                    errors.push(format!(
                        "Facet {} has duplicate directive for member {}",
                        facet.name, directive.name
                    ));
                }
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
types:
  - name: Person
    members:
      - name: id
        type: int
        required: true
      - name: nickname
        type: string?
        mutable: false
      - name: cache
        type: string
        kind: field
facets:
  - name: PersonDto
    source: Person
    include: [id, nickname]
    exclude: [cache]
    shape: positional_struct
    before_hook: hooks::before
    after_hook:
      path: hooks::after
      async: true
    members:
      - name: label
        type: string
        computed: "nickname"
        when:
          - id > 0
          - nickname != null
"#;

    #[test]
    fn test_parse_yaml() {
        let manifest = Manifest::from_yaml(SAMPLE).unwrap();
        assert_eq!(manifest.types.len(), 1);
        let person = &manifest.types[0];
        assert_eq!(person.members.len(), 3);
        assert!(person.members[0].mutable);
        assert!(!person.members[1].mutable);
        assert_eq!(person.members[2].kind, MemberKind::Field);

        let facet = manifest.facet("PersonDto").unwrap();
        assert_eq!(facet.shape, EmissionShape::PositionalStruct);
        assert_eq!(facet.before_hook.as_ref().unwrap().path(), "hooks::before");
        assert!(facet.after_hook.as_ref().unwrap().is_async());
        let label = facet.directive("label").unwrap();
        assert_eq!(label.predicates().len(), 2);
        assert_eq!(label.typ.as_ref().unwrap().to_string(), "string");
    }

    #[test]
    fn test_json_roundtrip() {
        let manifest = Manifest::from_yaml(SAMPLE).unwrap();
        let json = manifest.to_json().unwrap();
        let back = Manifest::from_json(&json).unwrap();
        assert_eq!(back.facets[0].name, "PersonDto");
        assert_eq!(back.types[0].members[1].typ.to_string(), "string?");
    }

    #[test]
    fn test_validate_duplicates() {
        let yaml = r#"
types:
  - name: A
  - name: A
facets:
  - name: F
    source: A
    members:
      - name: x
      - name: x
"#;
        let manifest = Manifest::from_yaml(yaml).unwrap();
        let errors = manifest.validate();
        assert!(errors.iter().any(|e| e.contains("Duplicate type")));
        assert!(errors.iter().any(|e| e.contains("duplicate directive")));
    }

    #[test]
    fn test_when_clause_to_cel() {
        let clause = WhenClause::Multiple(vec!["a".into(), "b > 1".into()]);
        assert_eq!(clause.to_cel(), "(a) && (b > 1)");
        assert_eq!(WhenClause::Multiple(vec![]).to_cel(), "true");
    }

    #[test]
    fn test_path_segments() {
        let directive = MemberDirective {
            name: "city".into(),
            source: Some("address.city".into()),
            ..Default::default()
        };
        assert_eq!(directive.path_segments(), Some(vec!["address", "city"]));
    }

    #[test]
    fn test_hash_changes_with_content() {
        let manifest = Manifest::from_yaml(SAMPLE).unwrap();
        let mut facet = manifest.facets[0].clone();
        let before = facet.hash();
        facet.reverse = true;
        assert_ne!(before, facet.hash());
        assert!(before.starts_with("sha256:"));
    }
}
