//! Generation model: everything the synthesizers need for one declaration
//!
//! A [`GenerationModel`] is built once per facet declaration and never
//! mutated afterwards. It carries the root facet shape, the shapes of every
//! facet reachable through nested bindings, and the source shapes needed to
//! build default values, so each synthesizer can work from the model alone.
//!
//! [`ShapeCache`] memoizes resolved facet shapes by name and declaration
//! hash. It belongs to one builder session; nothing here is global.

use crate::catalog::TypeCatalog;
use crate::config::DefaultsConfig;
use crate::error::{Error, MappingError, Result};
use crate::graph::{GraphResolver, NestedBinding};
use crate::members::{resolve_members, MemberResolver, ResolveOptions, SourceMember};
use crate::schema::{
    EmissionShape, EnumDecl, EnumProjection, FacetDecl, FlattenDecl, HookRef, Manifest,
};
use crate::select::{enum_projection_type, select_members, MemberOrigin, SelectedMember};
use crate::typeref::TypeRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

/// A facet member after selection and graph resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMember {
    pub name: String,
    pub origin: MemberOrigin,
    /// Type of the value read from the source
    pub source_type: TypeRef,
    /// Type of the member on the facet
    pub facet_type: TypeRef,
    pub path_nullable: bool,
    pub conditions: Vec<String>,
    pub reversible: bool,
    pub in_projection: bool,
    pub enum_as: Option<EnumProjection>,
    pub nested: Option<NestedBinding>,
    pub is_required: bool,
    pub is_mutable: bool,
}

impl ResolvedMember {
    pub fn is_computed(&self) -> bool {
        matches!(self.origin, MemberOrigin::Computed { .. })
    }

    pub fn is_conditional(&self) -> bool {
        !self.conditions.is_empty()
    }

    /// Source member written by the reverse routine
    pub fn write_target(&self) -> Option<&str> {
        match &self.origin {
            MemberOrigin::Direct { member } => Some(member),
            MemberOrigin::Path { segments } if segments.len() == 1 => Some(&segments[0]),
            MemberOrigin::Path { .. } => None,
            MemberOrigin::Computed { write_back, .. } => write_back.as_deref(),
        }
    }
}

/// A resolved facet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetShape {
    pub name: String,
    pub source: String,
    pub namespace: Option<String>,
    pub description: Option<String>,
    pub shape: EmissionShape,
    pub base: Option<String>,
    pub members: Vec<ResolvedMember>,
    pub before_hook: Option<HookRef>,
    pub after_hook: Option<HookRef>,
    pub generate_reverse: bool,
    /// Hash of the declaration this shape came from
    pub declaration_hash: String,
}

impl FacetShape {
    pub fn member(&self, name: &str) -> Option<&ResolvedMember> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn nested_members(&self) -> impl Iterator<Item = (&ResolvedMember, &NestedBinding)> {
        self.members
            .iter()
            .filter_map(|m| m.nested.as_ref().map(|b| (m, b)))
    }

    pub fn has_hooks(&self) -> bool {
        self.before_hook.is_some() || self.after_hook.is_some()
    }

    pub fn is_async(&self) -> bool {
        self.before_hook.as_ref().is_some_and(HookRef::is_async)
            || self.after_hook.as_ref().is_some_and(HookRef::is_async)
    }
}

/// Source shapes reachable from a model's facets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceShapes {
    pub types: BTreeMap<String, Vec<SourceMember>>,
    pub enums: BTreeMap<String, EnumDecl>,
}

impl SourceShapes {
    pub fn members(&self, type_name: &str) -> Option<&[SourceMember]> {
        self.types.get(type_name).map(Vec::as_slice)
    }

    pub fn enum_decl(&self, name: &str) -> Option<&EnumDecl> {
        self.enums.get(name)
    }

    /// Collect `roots` and every named type reachable through member types
    pub fn collect(catalog: &TypeCatalog, roots: &[&str]) -> Result<Self> {
        let mut shapes = SourceShapes::default();
        let mut queue: VecDeque<String> = roots.iter().map(|s| s.to_string()).collect();
        let resolver = MemberResolver::new(catalog);
        let options = ResolveOptions {
            include_fields: true,
            hidden: HashSet::new(),
        };

        while let Some(type_name) = queue.pop_front() {
            if shapes.types.contains_key(&type_name) {
                continue;
            }
            let members = resolver.resolve(&type_name, &options)?;
            for member in &members {
                let Some(target) = member.declared_type.target_name() else {
                    continue;
                };
                if let Some(en) = catalog.enum_decl(target) {
                    shapes.enums.insert(en.name.clone(), en.clone());
                } else if catalog.contains(target) && !shapes.types.contains_key(target) {
                    queue.push_back(target.to_string());
                }
            }
            shapes.types.insert(type_name, members);
        }

        Ok(shapes)
    }
}

/// The aggregate for one facet declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationModel {
    pub root: FacetShape,
    /// Facets reachable through nested bindings, the root excluded
    pub related: BTreeMap<String, FacetShape>,
    pub sources: SourceShapes,
    pub max_depth: u32,
    pub preserve_references: bool,
    pub generate_projection: bool,
    pub flatten: Vec<FlattenDecl>,
    pub warnings: Vec<String>,
    pub hash: String,
}

impl GenerationModel {
    pub fn facet(&self, name: &str) -> Option<&FacetShape> {
        if self.root.name == name {
            Some(&self.root)
        } else {
            self.related.get(name)
        }
    }

    pub fn require_facet(&self, name: &str) -> std::result::Result<&FacetShape, MappingError> {
        self.facet(name).ok_or_else(|| MappingError::UnknownFacet {
            facet: name.to_string(),
        })
    }

    pub fn emission_shape(&self) -> EmissionShape {
        self.root.shape
    }

    pub fn namespace(&self) -> Option<&str> {
        self.root.namespace.as_deref()
    }

    pub fn source_type(&self) -> &str {
        &self.root.source
    }

    pub fn generate_reverse(&self) -> bool {
        self.root.generate_reverse
    }

    /// Root first, then related facets by name
    pub fn facets(&self) -> impl Iterator<Item = &FacetShape> {
        std::iter::once(&self.root).chain(self.related.values())
    }

    pub fn is_enum(&self, name: &str) -> bool {
        self.sources.enums.contains_key(name)
    }
}

/// Per-session memo of resolved facet shapes
#[derive(Debug, Default)]
pub struct ShapeCache {
    entries: HashMap<(String, String), FacetShape>,
    hits: usize,
}

impl ShapeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, facet: &str, hash: &str) -> Option<FacetShape> {
        let found = self
            .entries
            .get(&(facet.to_string(), hash.to_string()))
            .cloned();
        if found.is_some() {
            self.hits += 1;
        }
        found
    }

    pub fn insert(&mut self, shape: FacetShape) {
        self.entries
            .insert((shape.name.clone(), shape.declaration_hash.clone()), shape);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }
}

/// Builds generation models from one manifest
pub struct ModelBuilder<'a> {
    manifest: &'a Manifest,
    catalog: TypeCatalog,
    defaults: DefaultsConfig,
    cache: ShapeCache,
    resolving: Vec<String>,
}

impl<'a> ModelBuilder<'a> {
    pub fn new(manifest: &'a Manifest, defaults: DefaultsConfig) -> Self {
        Self {
            manifest,
            catalog: TypeCatalog::from_manifest(manifest),
            defaults,
            cache: ShapeCache::new(),
            resolving: Vec::new(),
        }
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> &ShapeCache {
        &self.cache
    }

    /// Build the model for one facet declaration
    pub fn build(&mut self, facet: &str) -> Result<GenerationModel> {
        let decl = self.declaration(facet)?;
        let root = self.shape(facet)?;
        let mut warnings = self.selection_warnings(decl)?;

        let mut related = BTreeMap::new();
        let mut queue: VecDeque<String> = root
            .nested_members()
            .map(|(_, b)| b.bound_facet.clone())
            .collect();
        while let Some(name) = queue.pop_front() {
            if name == root.name || related.contains_key(&name) {
                continue;
            }
            let shape = self.shape(&name).map_err(|e| {
                Error::resolution(facet, format!("nested facet '{}': {}", name, e))
            })?;
            if shape.has_hooks() {
                debug!(facet = %facet, nested = %name, "nested facet carries hooks");
            }
            queue.extend(shape.nested_members().map(|(_, b)| b.bound_facet.clone()));
            related.insert(name, shape);
        }

        for plan in &decl.flatten {
            let member = root.member(&plan.collection).ok_or_else(|| {
                Error::declaration(
                    facet,
                    format!("flatten '{}' names unknown member '{}'", plan.name, plan.collection),
                )
            })?;
            if !member.facet_type.is_collection() {
                return Err(Error::declaration(
                    facet,
                    format!(
                        "flatten '{}' needs a collection member, '{}' is {}",
                        plan.name, plan.collection, member.facet_type
                    ),
                ));
            }
        }

        let mut roots: Vec<&str> = vec![root.source.as_str()];
        roots.extend(related.values().map(|s| s.source.as_str()));
        let sources = SourceShapes::collect(&self.catalog, &roots)
            .map_err(|e| Error::declaration(facet, e.to_string()))?;

        let max_depth = decl.max_depth.unwrap_or(self.defaults.max_depth);
        let preserve_references = decl
            .preserve_references
            .unwrap_or(self.defaults.preserve_references);
        if max_depth == 0 && !preserve_references && !related.is_empty() {
            let message = "max_depth 0 with preserve_references off: cyclic data will not terminate"
                .to_string();
            warn!(facet = %facet, "{}", message);
            warnings.push(message);
        }

        let mut model = GenerationModel {
            root,
            related,
            sources,
            max_depth,
            preserve_references,
            generate_projection: decl
                .projection
                .unwrap_or(self.defaults.generate_projection),
            flatten: decl.flatten.clone(),
            warnings,
            hash: String::new(),
        };
        model.hash = crate::util::content_hash(&model);

        info!(
            facet = %facet,
            members = model.root.members.len(),
            related = model.related.len(),
            "model built"
        );
        Ok(model)
    }

    fn declaration(&self, facet: &str) -> Result<&'a FacetDecl> {
        self.manifest
            .facet(facet)
            .ok_or_else(|| Error::Other(format!("unknown facet '{}'", facet)))
    }

    fn selection_warnings(&self, decl: &FacetDecl) -> Result<Vec<String>> {
        let hidden = self.hidden_members(decl)?;
        let resolved = self.resolve(decl, hidden)?;
        Ok(select_members(&self.catalog, decl, &resolved)?.warnings)
    }

    fn resolve(&self, decl: &FacetDecl, hidden: HashSet<String>) -> Result<Vec<SourceMember>> {
        if !self.catalog.contains(&decl.source) {
            return Err(Error::declaration(
                &decl.name,
                format!("unknown source type '{}'", decl.source),
            ));
        }
        let options = ResolveOptions {
            include_fields: decl.include_fields,
            hidden,
        };
        resolve_members(&self.catalog, &decl.source, &options)
            .map_err(|e| Error::declaration(&decl.name, e.to_string()))
    }

    /// Member names supplied by the facet's own base shape
    fn hidden_members(&self, decl: &FacetDecl) -> Result<HashSet<String>> {
        let Some(base) = &decl.base else {
            return Ok(HashSet::new());
        };
        if self.catalog.contains(base) {
            let options = ResolveOptions {
                include_fields: true,
                hidden: HashSet::new(),
            };
            return Ok(resolve_members(&self.catalog, base, &options)
                .map_err(|e| Error::declaration(&decl.name, e.to_string()))?
                .into_iter()
                .map(|m| m.name)
                .collect());
        }
        if let Some(shape) = self.cache.entries.values().find(|s| &s.name == base) {
            return Ok(shape.members.iter().map(|m| m.name.clone()).collect());
        }
        Err(Error::declaration(
            &decl.name,
            format!("base shape '{}' is neither a source type nor a resolved facet", base),
        ))
    }

    /// Resolve one facet's shape, memoized per declaration hash
    pub fn shape(&mut self, facet: &str) -> Result<FacetShape> {
        let decl = self.declaration(facet)?;
        let hash = decl.hash();
        if let Some(shape) = self.cache.get(facet, &hash) {
            return Ok(shape);
        }

        if self.resolving.iter().any(|f| f == facet) {
            return Err(Error::declaration(
                facet,
                format!("base shape cycle: {} -> {}", self.resolving.join(" -> "), facet),
            ));
        }
        if let Some(base) = &decl.base {
            if !self.catalog.contains(base) && self.manifest.facet(base).is_some() {
                self.resolving.push(facet.to_string());
                let result = self.shape(base);
                self.resolving.pop();
                result?;
            }
        }

        let hidden = self.hidden_members(decl)?;
        let resolved = self.resolve(decl, hidden)?;
        let selection = select_members(&self.catalog, decl, &resolved)?;

        let graph = GraphResolver::new(&self.catalog, self.manifest);
        graph.validate(decl)?;

        let mut members = Vec::with_capacity(selection.members.len());
        for selected in &selection.members {
            let nested = graph.binding_for(decl, selected)?;
            members.push(self.resolve_member(decl, selected, nested)?);
        }

        let shape = FacetShape {
            name: decl.name.clone(),
            source: decl.source.clone(),
            namespace: decl.namespace.clone(),
            description: decl.description.clone(),
            shape: decl.shape,
            base: decl.base.clone(),
            members,
            before_hook: decl.before_hook.clone(),
            after_hook: decl.after_hook.clone(),
            generate_reverse: decl.reverse,
            declaration_hash: hash,
        };
        debug!(facet = %facet, members = shape.members.len(), "facet shape resolved");
        self.cache.insert(shape.clone());
        Ok(shape)
    }

    fn resolve_member(
        &self,
        decl: &FacetDecl,
        selected: &SelectedMember,
        nested: Option<NestedBinding>,
    ) -> Result<ResolvedMember> {
        let computed = matches!(selected.origin, MemberOrigin::Computed { .. });
        let conditional = !selected.conditions.is_empty();
        let multi_segment = matches!(&selected.origin, MemberOrigin::Path { segments } if segments.len() > 1);

        let facet_type = match (&nested, selected.enum_as) {
            (Some(binding), _) => GraphResolver::facet_type(selected, binding),
            (None, Some(projection)) => enum_projection_type(projection, &selected.declared_type),
            (None, None) => selected.declared_type.clone(),
        };

        let reversible = match (&nested, selected.reversible) {
            (_, Some(true)) if multi_segment => {
                return Err(Error::declaration(
                    &decl.name,
                    format!(
                        "member '{}' reads a multi-segment path and cannot be written back",
                        selected.name
                    ),
                ))
            }
            (Some(binding), Some(true)) => {
                let bound_reverse = self
                    .manifest
                    .facet(&binding.bound_facet)
                    .is_some_and(|f| f.reverse);
                if !bound_reverse {
                    return Err(Error::declaration(
                        &decl.name,
                        format!(
                            "member '{}' is reversible but facet '{}' generates no reverse",
                            selected.name, binding.bound_facet
                        ),
                    ));
                }
                true
            }
            (_, Some(explicit)) => explicit,
            (Some(binding), None) => {
                !conditional
                    && self
                        .manifest
                        .facet(&binding.bound_facet)
                        .is_some_and(|f| f.reverse)
            }
            (None, None) => !computed && !conditional && !multi_segment,
        };

        Ok(ResolvedMember {
            name: selected.name.clone(),
            origin: selected.origin.clone(),
            source_type: selected.value_type.clone(),
            facet_type,
            path_nullable: selected.path_nullable,
            conditions: selected.conditions.clone(),
            reversible,
            in_projection: selected
                .include_in_projection
                .unwrap_or(!computed && !conditional),
            enum_as: selected.enum_as,
            nested,
            is_required: selected.is_required,
            is_mutable: selected.is_mutable,
        })
    }
}

/// Build a single model with a fresh session
pub fn build_model(
    manifest: &Manifest,
    facet: &str,
    defaults: &DefaultsConfig,
) -> Result<GenerationModel> {
    ModelBuilder::new(manifest, defaults.clone()).build(facet)
}

/// Severity of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A problem reported against one declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub facet: String,
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

impl Diagnostic {
    fn from_error(facet: &str, error: &Error) -> Self {
        let (code, message) = match error {
            Error::Declaration { message, .. } => ("declaration", message.clone()),
            Error::Resolution { message, .. } => ("resolution", message.clone()),
            other => ("manifest", other.to_string()),
        };
        Self {
            facet: facet.to_string(),
            severity: Severity::Error,
            code: code.to_string(),
            message,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}[{}] {}: {}", level, self.code, self.facet, self.message)
    }
}

/// Outcome of building every declaration in a manifest
#[derive(Debug, Default)]
pub struct Generated {
    pub models: Vec<GenerationModel>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Generated {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }
}

/// Build every declaration; a fault in one never stops the others
pub fn generate_all(manifest: &Manifest, defaults: &DefaultsConfig) -> Generated {
    let mut generated = Generated::default();
    for message in manifest.validate() {
        generated.diagnostics.push(Diagnostic {
            facet: String::new(),
            severity: Severity::Error,
            code: "manifest".to_string(),
            message,
        });
    }

    let mut builder = ModelBuilder::new(manifest, defaults.clone());
    for decl in &manifest.facets {
        match builder.build(&decl.name) {
            Ok(model) => {
                for warning in &model.warnings {
                    generated.diagnostics.push(Diagnostic {
                        facet: decl.name.clone(),
                        severity: Severity::Warning,
                        code: "selection".to_string(),
                        message: warning.clone(),
                    });
                }
                generated.models.push(model);
            }
            Err(error) => {
                warn!(facet = %decl.name, error = %error, "declaration isolated");
                generated
                    .diagnostics
                    .push(Diagnostic::from_error(&decl.name, &error));
            }
        }
    }
    generated
}
