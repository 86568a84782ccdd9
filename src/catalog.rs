//! Type catalog: arena of source shapes indexed by name
//!
//! Inheritance is an explicit ordered walk over arena indices, never a
//! chain of trait objects.

use crate::error::{Error, Result};
use crate::schema::{EnumDecl, Manifest, TypeDecl};
use std::collections::HashMap;

/// Names that end an inheritance chain
pub const TERMINAL_BASES: &[&str] = &["object", "Object"];

/// Index of a type in the catalog arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub usize);

/// All source shapes and enums of a manifest
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    types: Vec<TypeDecl>,
    index: HashMap<String, TypeId>,
    enums: HashMap<String, EnumDecl>,
}

impl TypeCatalog {
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let mut catalog = TypeCatalog::default();
        for decl in &manifest.types {
            catalog.insert(decl.clone());
        }
        for en in &manifest.enums {
            catalog.enums.insert(en.name.clone(), en.clone());
        }
        catalog
    }

    pub fn insert(&mut self, decl: TypeDecl) -> TypeId {
        let id = TypeId(self.types.len());
        self.index.insert(decl.name.clone(), id);
        self.types.push(decl);
        id
    }

    pub fn id(&self, name: &str) -> Option<TypeId> {
        self.index.get(name).copied()
    }

    pub fn get(&self, id: TypeId) -> &TypeDecl {
        &self.types[id.0]
    }

    pub fn by_name(&self, name: &str) -> Option<&TypeDecl> {
        self.id(name).map(|id| self.get(id))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn enum_decl(&self, name: &str) -> Option<&EnumDecl> {
        self.enums.get(name)
    }

    pub fn is_enum(&self, name: &str) -> bool {
        self.enums.contains_key(name)
    }

    /// The type followed by its ancestors, most-derived first, stopping at
    /// the terminal root
    pub fn chain(&self, name: &str) -> Result<Vec<TypeId>> {
        let mut chain = Vec::new();
        let mut current = Some(name.to_string());

        while let Some(type_name) = current {
            if TERMINAL_BASES.contains(&type_name.as_str()) {
                break;
            }
            let id = self
                .id(&type_name)
                .ok_or_else(|| Error::Other(format!("unknown type '{}'", type_name)))?;
            if chain.contains(&id) {
                return Err(Error::Other(format!(
                    "inheritance cycle through '{}'",
                    type_name
                )));
            }
            chain.push(id);
            current = self.get(id).base.clone();
        }

        Ok(chain)
    }

    /// True when `ancestor` appears in the inheritance chain of `name`
    /// (a type is its own ancestor)
    pub fn derives_from(&self, name: &str, ancestor: &str) -> bool {
        self.chain(name)
            .map(|chain| chain.iter().any(|id| self.get(*id).name == ancestor))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> TypeCatalog {
        let manifest = Manifest::from_yaml(
            r#"
types:
  - name: Entity
    base: object
  - name: Person
    base: Entity
  - name: Employee
    base: Person
  - name: Loop
    base: Loop
enums:
  - name: Status
    variants: [Active, Inactive]
"#,
        )
        .unwrap();
        TypeCatalog::from_manifest(&manifest)
    }

    #[test]
    fn test_chain_most_derived_first() {
        let catalog = catalog();
        let names: Vec<_> = catalog
            .chain("Employee")
            .unwrap()
            .into_iter()
            .map(|id| catalog.get(id).name.clone())
            .collect();
        assert_eq!(names, vec!["Employee", "Person", "Entity"]);
    }

    #[test]
    fn test_chain_errors() {
        let catalog = catalog();
        assert!(catalog.chain("Missing").is_err());
        assert!(catalog.chain("Loop").is_err());
    }

    #[test]
    fn test_derives_from() {
        let catalog = catalog();
        assert!(catalog.derives_from("Employee", "Entity"));
        assert!(catalog.derives_from("Person", "Person"));
        assert!(!catalog.derives_from("Entity", "Person"));
        assert!(catalog.is_enum("Status"));
    }
}
