//! Member resolution: accessible members of a source type
//!
//! Walks the inheritance chain from the most-derived type outward. A name
//! seen on a more-derived type shadows every same-named base member, so the
//! derived declaration's modifiers always win.

use crate::catalog::TypeCatalog;
use crate::error::Result;
use crate::schema::{MemberKind, Visibility};
use crate::typeref::TypeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// A member reachable on a source type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMember {
    pub name: String,
    pub declared_type: TypeRef,
    pub is_mutable: bool,
    pub is_required: bool,
    pub kind: MemberKind,
    /// Type on which this member was declared
    pub declaring_type: String,
}

impl SourceMember {
    pub fn is_field(&self) -> bool {
        self.kind == MemberKind::Field
    }
}

/// Resolution options
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Keep field-kind members
    pub include_fields: bool,
    /// Names already present on the facet's own base shape
    pub hidden: HashSet<String>,
}

/// Resolve the members of `type_name`
pub fn resolve_members(
    catalog: &TypeCatalog,
    type_name: &str,
    options: &ResolveOptions,
) -> Result<Vec<SourceMember>> {
    MemberResolver::new(catalog).resolve(type_name, options)
}

/// Member resolver over a catalog
pub struct MemberResolver<'a> {
    catalog: &'a TypeCatalog,
}

impl<'a> MemberResolver<'a> {
    pub fn new(catalog: &'a TypeCatalog) -> Self {
        Self { catalog }
    }

    pub fn resolve(&self, type_name: &str, options: &ResolveOptions) -> Result<Vec<SourceMember>> {
        let chain = self.catalog.chain(type_name)?;
        let mut seen: HashSet<&str> = HashSet::new();
        let mut members = Vec::new();

        for id in chain {
            let decl = self.catalog.get(id);
            for member in &decl.members {
                if member.visibility == Visibility::Private {
                    continue;
                }
                if !seen.insert(member.name.as_str()) {
                    debug!(
                        member = %member.name,
                        declared_on = %decl.name,
                        "shadowed by a more-derived declaration"
                    );
                    continue;
                }
                if member.kind == MemberKind::Field && !options.include_fields {
                    continue;
                }
                if options.hidden.contains(&member.name) {
                    continue;
                }
                members.push(SourceMember {
                    name: member.name.clone(),
                    declared_type: member.typ.clone(),
                    is_mutable: member.mutable,
                    is_required: member.required,
                    kind: member.kind,
                    declaring_type: decl.name.clone(),
                });
            }
        }

        Ok(members)
    }

    /// Look up a single member by name, fields included
    pub fn find(&self, type_name: &str, member: &str) -> Result<Option<SourceMember>> {
        let options = ResolveOptions {
            include_fields: true,
            hidden: HashSet::new(),
        };
        Ok(self
            .resolve(type_name, &options)?
            .into_iter()
            .find(|m| m.name == member))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Manifest;
    use pretty_assertions::assert_eq;

    fn catalog() -> TypeCatalog {
        let manifest = Manifest::from_yaml(
            r#"
types:
  - name: Entity
    members:
      - name: id
        type: int
      - name: version
        type: int
        mutable: true
      - name: secret
        type: string
        visibility: private
  - name: Person
    base: Entity
    members:
      - name: name
        type: string
      - name: version
        type: string
        mutable: false
        required: true
      - name: scratch
        type: string
        kind: field
"#,
        )
        .unwrap();
        TypeCatalog::from_manifest(&manifest)
    }

    fn names(members: &[SourceMember]) -> Vec<&str> {
        members.iter().map(|m| m.name.as_str()).collect()
    }

    #[test]
    fn test_derived_first_and_private_skipped() {
        let catalog = catalog();
        let members = resolve_members(&catalog, "Person", &ResolveOptions::default()).unwrap();
        assert_eq!(names(&members), vec!["name", "version", "id"]);
    }

    #[test]
    fn test_shadowed_member_keeps_derived_modifiers() {
        let catalog = catalog();
        let members = resolve_members(&catalog, "Person", &ResolveOptions::default()).unwrap();
        let version = members.iter().find(|m| m.name == "version").unwrap();
        assert_eq!(version.declaring_type, "Person");
        assert!(!version.is_mutable);
        assert!(version.is_required);
        assert_eq!(version.declared_type.to_string(), "string");
    }

    #[test]
    fn test_fields_opt_in() {
        let catalog = catalog();
        let options = ResolveOptions {
            include_fields: true,
            ..Default::default()
        };
        let members = resolve_members(&catalog, "Person", &options).unwrap();
        assert!(names(&members).contains(&"scratch"));
    }

    #[test]
    fn test_hidden_base_shape_members() {
        let catalog = catalog();
        let options = ResolveOptions {
            include_fields: false,
            hidden: ["id".to_string()].into_iter().collect(),
        };
        let members = resolve_members(&catalog, "Person", &options).unwrap();
        assert_eq!(names(&members), vec!["name", "version"]);
    }

    #[test]
    fn test_find() {
        let catalog = catalog();
        let resolver = MemberResolver::new(&catalog);
        assert!(resolver.find("Person", "scratch").unwrap().is_some());
        assert!(resolver.find("Person", "secret").unwrap().is_none());
    }
}
