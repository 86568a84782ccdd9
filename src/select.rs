//! Selection filter: which members a facet carries
//!
//! Rules, in order:
//! 1. allow-list: keep only listed names (any deny-list is ignored)
//! 2. otherwise deny-list: drop listed names
//! 3. drop members declared on any type in `exclude_declared_in`
//! 4. attach per-member directives; directives may introduce members that
//!    are not source members (renames, dotted paths, computed values)

use crate::catalog::TypeCatalog;
use crate::cel::CelCompiler;
use crate::error::{Error, Result};
use crate::members::{MemberResolver, SourceMember};
use crate::schema::{EnumProjection, FacetDecl, MemberDirective};
use crate::typeref::{ScalarKind, TypeRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

/// Inclusion mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionMode {
    AllowList,
    DenyList,
    AllowAll,
}

/// Inclusion policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionPolicy {
    pub mode: SelectionMode,
    pub names: BTreeSet<String>,
}

impl SelectionPolicy {
    pub fn allow_all() -> Self {
        Self {
            mode: SelectionMode::AllowAll,
            names: BTreeSet::new(),
        }
    }

    /// Build from the declaration's lists. A non-empty allow-list wins and the
    /// deny-list is ignored entirely.
    pub fn from_lists(include: Option<&[String]>, exclude: &[String]) -> Self {
        match include {
            Some(names) if !names.is_empty() => Self {
                mode: SelectionMode::AllowList,
                names: names.iter().cloned().collect(),
            },
            _ if !exclude.is_empty() => Self {
                mode: SelectionMode::DenyList,
                names: exclude.iter().cloned().collect(),
            },
            _ => Self::allow_all(),
        }
    }

    pub fn admits(&self, name: &str) -> bool {
        match self.mode {
            SelectionMode::AllowList => self.names.contains(name),
            SelectionMode::DenyList => !self.names.contains(name),
            SelectionMode::AllowAll => true,
        }
    }
}

/// Where a facet member's value comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MemberOrigin {
    /// Same-named source member
    Direct { member: String },
    /// Source path of one or more segments
    Path { segments: Vec<String> },
    /// CEL expression; `write_back` names the source member an explicit
    /// reversible override writes to
    Computed {
        expression: String,
        write_back: Option<String>,
    },
}

impl MemberOrigin {
    /// The source member read first, if any
    pub fn root_member(&self) -> Option<&str> {
        match self {
            MemberOrigin::Direct { member } => Some(member),
            MemberOrigin::Path { segments } => segments.first().map(String::as_str),
            MemberOrigin::Computed { .. } => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            MemberOrigin::Direct { member } => member.clone(),
            MemberOrigin::Path { segments } => segments.join("."),
            MemberOrigin::Computed { expression, .. } => format!("computed `{}`", expression),
        }
    }
}

/// A member that survived selection, with its directive metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedMember {
    pub name: String,
    pub origin: MemberOrigin,
    /// Type of the value read from the source
    pub value_type: TypeRef,
    /// Facet-side type before nested rewriting
    pub declared_type: TypeRef,
    /// A nullable segment precedes the last one on the path
    pub path_nullable: bool,
    pub conditions: Vec<String>,
    pub reversible: Option<bool>,
    pub include_in_projection: Option<bool>,
    pub enum_as: Option<EnumProjection>,
    pub is_required: bool,
    pub is_mutable: bool,
}

/// Apply policy, type-scoped exclusion and directives
pub fn select_members(
    catalog: &TypeCatalog,
    decl: &FacetDecl,
    resolved: &[SourceMember],
) -> Result<Selection> {
    SelectionFilter::new(catalog, decl).apply(resolved)
}

/// Outcome of selection
#[derive(Debug, Clone)]
pub struct Selection {
    pub policy: SelectionPolicy,
    pub members: Vec<SelectedMember>,
    pub warnings: Vec<String>,
}

/// Selection filter for one declaration
pub struct SelectionFilter<'a> {
    catalog: &'a TypeCatalog,
    decl: &'a FacetDecl,
}

impl<'a> SelectionFilter<'a> {
    pub fn new(catalog: &'a TypeCatalog, decl: &'a FacetDecl) -> Self {
        Self { catalog, decl }
    }

    fn fault(&self, message: impl Into<String>) -> Error {
        Error::declaration(&self.decl.name, message)
    }

    pub fn apply(&self, resolved: &[SourceMember]) -> Result<Selection> {
        let decl = self.decl;
        let policy = SelectionPolicy::from_lists(decl.include.as_deref(), &decl.exclude);
        let mut warnings = Vec::new();

        if policy.mode == SelectionMode::AllowList && !decl.exclude.is_empty() {
            let message = format!(
                "exclude list ignored because an include list is present ({} names)",
                decl.exclude.len()
            );
            warn!(facet = %decl.name, "{}", message);
            warnings.push(message);
        }

        for type_name in &decl.exclude_declared_in {
            if !self.catalog.contains(type_name) {
                return Err(self.fault(format!(
                    "exclude_declared_in references unknown type '{}'",
                    type_name
                )));
            }
        }

        if policy.mode == SelectionMode::AllowList {
            for name in &policy.names {
                if !resolved.iter().any(|m| &m.name == name) {
                    warnings.push(format!("include lists '{}' which is not a source member", name));
                }
            }
        }

        let kept: Vec<&SourceMember> = resolved
            .iter()
            .filter(|m| policy.admits(&m.name))
            .filter(|m| !decl.exclude_declared_in.contains(&m.declaring_type))
            .collect();

        let mut members = Vec::new();
        for member in &kept {
            let directive = decl.directive(&member.name);
            members.push(self.select(member.name.as_str(), Some(member), directive)?);
        }

        for directive in &decl.members {
            if kept.iter().any(|m| m.name == directive.name) {
                continue;
            }
            let introduces = directive.source.is_some() || directive.computed.is_some();
            if !introduces {
                if resolved.iter().any(|m| m.name == directive.name) {
                    return Err(self.fault(format!(
                        "directive targets member '{}' which the selection excludes",
                        directive.name
                    )));
                }
                return Err(self.fault(format!(
                    "directive for unknown member '{}' needs a source path or a computed expression",
                    directive.name
                )));
            }
            let same_named = resolved.iter().find(|m| m.name == directive.name);
            members.push(self.select(&directive.name, same_named, Some(directive))?);
        }

        Ok(Selection {
            policy,
            members,
            warnings,
        })
    }

    fn select(
        &self,
        name: &str,
        member: Option<&SourceMember>,
        directive: Option<&MemberDirective>,
    ) -> Result<SelectedMember> {
        let conditions = directive.map(MemberDirective::predicates).unwrap_or_default();
        for predicate in &conditions {
            CelCompiler::check(predicate)
                .map_err(|e| self.fault(format!("member '{}': {}", name, e)))?;
        }

        let (origin, value_type, path_nullable) = match directive {
            Some(d) if d.computed.is_some() => self.computed_origin(name, member, d)?,
            Some(d) if d.source.is_some() => self.path_origin(name, d)?,
            _ => match member {
                Some(m) => (
                    MemberOrigin::Direct {
                        member: m.name.clone(),
                    },
                    m.declared_type.clone(),
                    false,
                ),
                None => return Err(self.fault(format!("unknown member '{}'", name))),
            },
        };

        let declared_type = match directive.and_then(|d| d.typ.clone()) {
            Some(ty) => {
                if !matches!(origin, MemberOrigin::Computed { .. })
                    && ty.non_null() != value_type.non_null()
                {
                    return Err(self.fault(format!(
                        "member '{}' declares type {} but its source is {}",
                        name, ty, value_type
                    )));
                }
                ty
            }
            None => value_type.clone(),
        };

        let enum_as = directive.and_then(|d| d.enum_as);
        if enum_as.is_some() {
            let is_enum = declared_type
                .target_name()
                .is_some_and(|n| self.catalog.is_enum(n));
            if declared_type.is_collection() || !is_enum {
                return Err(self.fault(format!(
                    "enum_as on member '{}' requires a single enum-typed member, found {}",
                    name, declared_type
                )));
            }
        }

        let computed = matches!(origin, MemberOrigin::Computed { .. });
        let conditional = !conditions.is_empty();
        let include_in_projection = directive.and_then(|d| d.projection);
        if include_in_projection == Some(true) && (computed || conditional) {
            return Err(self.fault(format!(
                "member '{}' is computed or conditional and cannot be part of the projection",
                name
            )));
        }

        let reversible = directive.and_then(|d| d.reversible);
        if let MemberOrigin::Computed { write_back, .. } = &origin {
            if reversible == Some(true) && write_back.is_none() {
                return Err(self.fault(format!(
                    "computed member '{}' is marked reversible but names no single source member to write back to",
                    name
                )));
            }
        }

        Ok(SelectedMember {
            name: name.to_string(),
            origin,
            value_type,
            declared_type,
            path_nullable,
            conditions,
            reversible,
            include_in_projection,
            enum_as,
            is_required: member.is_some_and(|m| m.is_required),
            is_mutable: member.is_none_or(|m| m.is_mutable),
        })
    }

    fn computed_origin(
        &self,
        name: &str,
        member: Option<&SourceMember>,
        directive: &MemberDirective,
    ) -> Result<(MemberOrigin, TypeRef, bool)> {
        let expression = directive.computed.clone().unwrap_or_default();
        CelCompiler::check(&expression)
            .map_err(|e| self.fault(format!("member '{}': {}", name, e)))?;

        let value_type = match (&directive.typ, member) {
            (Some(ty), _) => ty.clone(),
            (None, Some(m)) => m.declared_type.clone(),
            (None, None) => {
                return Err(self.fault(format!(
                    "computed member '{}' needs a declared type",
                    name
                )))
            }
        };

        let write_back = match directive.path_segments() {
            Some(segments) if segments.len() == 1 => {
                let target = segments[0];
                if MemberResolver::new(self.catalog)
                    .find(&self.decl.source, target)?
                    .is_none()
                {
                    return Err(self.fault(format!(
                        "computed member '{}' writes back to unknown source member '{}'",
                        name, target
                    )));
                }
                Some(target.to_string())
            }
            Some(_) => {
                return Err(self.fault(format!(
                    "computed member '{}' can only write back to a single source member",
                    name
                )))
            }
            None => None,
        };

        Ok((
            MemberOrigin::Computed {
                expression,
                write_back,
            },
            value_type,
            false,
        ))
    }

    fn path_origin(
        &self,
        name: &str,
        directive: &MemberDirective,
    ) -> Result<(MemberOrigin, TypeRef, bool)> {
        let segments = directive.path_segments().unwrap_or_default();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(self.fault(format!("member '{}' has an empty path segment", name)));
        }

        let resolver = MemberResolver::new(self.catalog);
        let mut owner = self.decl.source.clone();
        let mut current: Option<TypeRef> = None;
        let mut path_nullable = false;

        for (i, segment) in segments.iter().enumerate() {
            if let Some(previous) = &current {
                if previous.is_collection() {
                    return Err(self.fault(format!(
                        "path '{}' of member '{}' passes through a collection at '{}'",
                        segments.join("."),
                        name,
                        segments[i - 1]
                    )));
                }
                path_nullable |= previous.is_nullable();
                owner = match previous.non_null() {
                    TypeRef::Named(n) if self.catalog.contains(n) => n.clone(),
                    other => {
                        return Err(self.fault(format!(
                            "path '{}' of member '{}' cannot descend into {}",
                            segments.join("."),
                            name,
                            other
                        )))
                    }
                };
            }
            let found = resolver.find(&owner, segment)?.ok_or_else(|| {
                self.fault(format!(
                    "path '{}' of member '{}': '{}' has no member '{}'",
                    segments.join("."),
                    name,
                    owner,
                    segment
                ))
            })?;
            current = Some(found.declared_type);
        }

        let value_type =
            current.ok_or_else(|| self.fault(format!("member '{}' has an empty path", name)))?;
        let origin = if segments.len() == 1 && segments[0] == name {
            MemberOrigin::Direct {
                member: name.to_string(),
            }
        } else {
            MemberOrigin::Path {
                segments: segments.iter().map(|s| s.to_string()).collect(),
            }
        };
        Ok((origin, value_type, path_nullable))
    }
}

/// Facet-side type of a re-projected enum
pub fn enum_projection_type(projection: EnumProjection, original: &TypeRef) -> TypeRef {
    let scalar = match projection {
        EnumProjection::String => TypeRef::Scalar(ScalarKind::String),
        EnumProjection::Int => TypeRef::Scalar(ScalarKind::Int),
    };
    if original.is_nullable() {
        TypeRef::nullable(scalar)
    } else {
        scalar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::members::{resolve_members, ResolveOptions};
    use crate::schema::Manifest;
    use pretty_assertions::assert_eq;

    const TYPES: &str = r#"
types:
  - name: Entity
    members:
      - name: id
        type: int
      - name: created
        type: string
  - name: Address
    members:
      - name: city
        type: string
      - name: tags
        type: List<string>
  - name: Person
    base: Entity
    members:
      - name: name
        type: string
      - name: password
        type: string
      - name: address
        type: Address?
      - name: status
        type: Status
enums:
  - name: Status
    variants: [Active, Inactive]
"#;

    fn run(facet_yaml: &str) -> Result<Selection> {
        let yaml = format!("{}\nfacets:\n{}", TYPES, facet_yaml);
        let manifest = Manifest::from_yaml(&yaml).unwrap();
        let catalog = TypeCatalog::from_manifest(&manifest);
        let decl = &manifest.facets[0];
        let resolved = resolve_members(&catalog, &decl.source, &ResolveOptions::default())?;
        select_members(&catalog, decl, &resolved)
    }

    fn names(selection: &Selection) -> Vec<&str> {
        selection.members.iter().map(|m| m.name.as_str()).collect()
    }

    #[test]
    fn test_allow_list_wins_over_deny_list() {
        let selection = run(
            r#"
  - name: F
    source: Person
    include: [id, name, nope]
    exclude: [name]
"#,
        )
        .unwrap();
        assert_eq!(selection.policy.mode, SelectionMode::AllowList);
        assert_eq!(names(&selection), vec!["name", "id"]);
        assert_eq!(selection.warnings.len(), 2);
    }

    #[test]
    fn test_deny_list() {
        let selection = run(
            r#"
  - name: F
    source: Person
    exclude: [password, status]
"#,
        )
        .unwrap();
        assert_eq!(names(&selection), vec!["name", "address", "id", "created"]);
    }

    #[test]
    fn test_type_scoped_exclusion() {
        let selection = run(
            r#"
  - name: F
    source: Person
    exclude_declared_in: [Entity]
"#,
        )
        .unwrap();
        assert_eq!(names(&selection), vec!["name", "password", "address", "status"]);
    }

    #[test]
    fn test_type_scoped_exclusion_unknown_type_is_declaration_fault() {
        let err = run(
            r#"
  - name: F
    source: Person
    exclude_declared_in: [Ghost]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Declaration { .. }));
    }

    #[test]
    fn test_dotted_path_member() {
        let selection = run(
            r#"
  - name: F
    source: Person
    include: [id]
    members:
      - name: city
        source: address.city
        type: string?
"#,
        )
        .unwrap();
        let city = selection.members.iter().find(|m| m.name == "city").unwrap();
        assert_eq!(
            city.origin,
            MemberOrigin::Path {
                segments: vec!["address".into(), "city".into()]
            }
        );
        assert!(city.path_nullable);
        assert_eq!(city.declared_type.to_string(), "string?");
    }

    #[test]
    fn test_path_through_collection_is_fault() {
        let err = run(
            r#"
  - name: F
    source: Person
    members:
      - name: first_tag
        source: address.tags.length
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("collection"));
    }

    #[test]
    fn test_computed_reversible_without_write_back_is_fault() {
        let err = run(
            r#"
  - name: F
    source: Person
    members:
      - name: label
        type: string
        computed: "name + '!'"
        reversible: true
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("reversible"));
    }

    #[test]
    fn test_computed_reversible_with_write_back_is_honored() {
        let selection = run(
            r#"
  - name: F
    source: Person
    include: [id]
    members:
      - name: label
        type: string
        computed: "name"
        source: name
        reversible: true
"#,
        )
        .unwrap();
        let label = selection.members.iter().find(|m| m.name == "label").unwrap();
        assert_eq!(
            label.origin,
            MemberOrigin::Computed {
                expression: "name".into(),
                write_back: Some("name".into())
            }
        );
        assert_eq!(label.reversible, Some(true));
    }

    #[test]
    fn test_directive_on_excluded_member_is_fault() {
        let err = run(
            r#"
  - name: F
    source: Person
    exclude: [name]
    members:
      - name: name
        when: "id > 0"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("excludes"));
    }

    #[test]
    fn test_enum_as_requires_enum() {
        assert!(run(
            r#"
  - name: F
    source: Person
    members:
      - name: status
        enum_as: string
"#,
        )
        .is_ok());
        let err = run(
            r#"
  - name: F
    source: Person
    members:
      - name: name
        enum_as: int
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("enum"));
    }

    #[test]
    fn test_invalid_predicate_is_fault() {
        let err = run(
            r#"
  - name: F
    source: Person
    members:
      - name: name
        when: "id > && )"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Declaration { .. }));
    }
}
