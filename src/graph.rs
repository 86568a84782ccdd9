//! Nested-facet graph resolution
//!
//! Decides which selected members are mapped through another facet. A member
//! matches a binding when its value type (or collection element type) is the
//! binding's source type, or failing that, derives from it; the nearest
//! ancestor with a binding wins.
//!
//! Generation-time cycle handling lives here too: [`ExpansionStack`] tracks
//! the facets currently being inlined. It only ever holds facet names, never
//! object identities; the run-time guard is
//! [`TraversalState`](crate::runtime::TraversalState).

use crate::catalog::TypeCatalog;
use crate::error::{Error, Result};
use crate::schema::{FacetDecl, Manifest, NestedBindingDecl};
use crate::select::SelectedMember;
use crate::typeref::{CollectionShape, TypeRef};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A member mapped through a nested facet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedBinding {
    pub member_name: String,
    /// Source type the binding was declared for (may be an ancestor of the
    /// member's own type)
    pub source_element_type: String,
    pub bound_facet: String,
    pub is_collection: bool,
    pub collection_shape: Option<CollectionShape>,
    /// The member itself may be null
    pub nullable: bool,
    /// Collection elements may be null
    pub element_nullable: bool,
}

/// Resolver over one manifest
pub struct GraphResolver<'a> {
    catalog: &'a TypeCatalog,
    manifest: &'a Manifest,
}

impl<'a> GraphResolver<'a> {
    pub fn new(catalog: &'a TypeCatalog, manifest: &'a Manifest) -> Self {
        Self { catalog, manifest }
    }

    /// Check every declared binding of `decl` against the facets it names
    pub fn validate(&self, decl: &FacetDecl) -> Result<()> {
        for binding in &decl.nested {
            self.bound_facet(decl, binding)?;
        }
        Ok(())
    }

    fn bound_facet(&self, decl: &FacetDecl, binding: &NestedBindingDecl) -> Result<&'a FacetDecl> {
        if !self.catalog.contains(&binding.source) {
            return Err(Error::resolution(
                &decl.name,
                format!("nested binding names unknown source type '{}'", binding.source),
            ));
        }
        let facet = self.manifest.facet(&binding.facet).ok_or_else(|| {
            Error::resolution(
                &decl.name,
                format!(
                    "nested binding {} -> {} names an unknown facet",
                    binding.source, binding.facet
                ),
            )
        })?;
        if !self.catalog.derives_from(&binding.source, &facet.source) {
            return Err(Error::resolution(
                &decl.name,
                format!(
                    "nested binding {} -> {}: facet '{}' is derived from '{}', which does not match",
                    binding.source, binding.facet, facet.name, facet.source
                ),
            ));
        }
        Ok(facet)
    }

    /// The binding a member must be mapped through, if any
    pub fn binding_for(
        &self,
        decl: &FacetDecl,
        member: &SelectedMember,
    ) -> Result<Option<NestedBinding>> {
        if decl.nested.is_empty() || member.enum_as.is_some() {
            return Ok(None);
        }
        if matches!(member.origin, crate::select::MemberOrigin::Computed { .. }) {
            return Ok(None);
        }
        let ty = &member.value_type;
        let target = match ty.target_name() {
            Some(name) if self.catalog.contains(name) => name,
            _ => return Ok(None),
        };

        let chain = self.catalog.chain(target).map_err(|e| {
            Error::resolution(&decl.name, format!("member '{}': {}", member.name, e))
        })?;
        let found = chain.iter().find_map(|id| {
            let name = &self.catalog.get(*id).name;
            decl.nested.iter().find(|b| &b.source == name)
        });
        let Some(binding) = found else {
            return Ok(None);
        };
        let facet = self.bound_facet(decl, binding)?;
        if binding.source != target {
            debug!(
                facet = %decl.name,
                member = %member.name,
                via = %binding.source,
                "nested binding matched through an ancestor"
            );
        }

        Ok(Some(NestedBinding {
            member_name: member.name.clone(),
            source_element_type: binding.source.clone(),
            bound_facet: facet.name.clone(),
            is_collection: ty.is_collection(),
            collection_shape: ty.collection_shape(),
            nullable: ty.is_nullable(),
            element_nullable: ty.element().is_some_and(TypeRef::is_nullable),
        }))
    }

    /// Facet-side type of a nested member: same nullability and collection
    /// shape as the source, pointing at the bound facet
    pub fn facet_type(member: &SelectedMember, binding: &NestedBinding) -> TypeRef {
        member.declared_type.retarget(&binding.bound_facet)
    }
}

/// Facets currently being inlined, innermost last
#[derive(Debug, Clone, Default)]
pub struct ExpansionStack {
    frames: Vec<String>,
}

impl ExpansionStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, facet: &str) -> bool {
        self.frames.iter().any(|f| f == facet)
    }

    pub fn enter(&mut self, facet: &str) {
        self.frames.push(facet.to_string());
    }

    pub fn exit(&mut self) {
        self.frames.pop();
    }

    /// Static nesting level; the root frame is level 0
    pub fn depth(&self) -> u32 {
        self.frames.len().saturating_sub(1) as u32
    }

    pub fn path(&self) -> String {
        self.frames.join(" -> ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::members::{resolve_members, ResolveOptions};
    use crate::select::select_members;
    use pretty_assertions::assert_eq;

    const MANIFEST: &str = r#"
types:
  - name: Author
    members:
      - name: name
        type: string
      - name: books
        type: ReadOnlyList<Book>
      - name: mentor
        type: Author?
  - name: Book
    members:
      - name: title
        type: string
      - name: author
        type: Author
  - name: Novel
    base: Book
    members:
      - name: genre
        type: string
  - name: Shelf
    members:
      - name: favourite
        type: Novel?
facets:
  - name: AuthorDto
    source: Author
    nested:
      - { source: Book, facet: BookDto }
      - { source: Author, facet: AuthorDto }
  - name: BookDto
    source: Book
    nested:
      - { source: Author, facet: AuthorDto }
  - name: ShelfDto
    source: Shelf
    nested:
      - { source: Book, facet: BookDto }
  - name: Broken
    source: Book
    nested:
      - { source: Book, facet: AuthorDto }
"#;

    fn bindings(facet: &str) -> Result<Vec<Option<NestedBinding>>> {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        let catalog = TypeCatalog::from_manifest(&manifest);
        let decl = manifest.facet(facet).unwrap();
        let resolved = resolve_members(&catalog, &decl.source, &ResolveOptions::default())?;
        let selection = select_members(&catalog, decl, &resolved)?;
        let resolver = GraphResolver::new(&catalog, &manifest);
        resolver.validate(decl)?;
        selection
            .members
            .iter()
            .map(|m| resolver.binding_for(decl, m))
            .collect()
    }

    #[test]
    fn test_collection_binding_keeps_shape() {
        let found = bindings("AuthorDto").unwrap();
        assert_eq!(found[0], None);
        let books = found[1].as_ref().unwrap();
        assert_eq!(books.bound_facet, "BookDto");
        assert!(books.is_collection);
        assert_eq!(books.collection_shape, Some(CollectionShape::ReadOnlyList));
        let mentor = found[2].as_ref().unwrap();
        assert_eq!(mentor.bound_facet, "AuthorDto");
        assert!(mentor.nullable);
        assert!(!mentor.is_collection);
    }

    #[test]
    fn test_structural_match_through_ancestor() {
        let found = bindings("ShelfDto").unwrap();
        let favourite = found[0].as_ref().unwrap();
        assert_eq!(favourite.source_element_type, "Book");
        assert_eq!(favourite.bound_facet, "BookDto");
    }

    #[test]
    fn test_mismatched_facet_source_is_resolution_fault() {
        let err = bindings("Broken").unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }

    #[test]
    fn test_expansion_stack() {
        let mut stack = ExpansionStack::new();
        stack.enter("AuthorDto");
        assert_eq!(stack.depth(), 0);
        stack.enter("BookDto");
        assert!(stack.contains("AuthorDto"));
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.path(), "AuthorDto -> BookDto");
        stack.exit();
        assert!(!stack.contains("BookDto"));
    }
}
