//! Rust facet emission using genco
//!
//! Conversion bodies come from the eager routines so emitted code and the
//! interpreter agree on member order, guards and null handling. Expressions
//! are assembled as text and placed into a genco skeleton.

use crate::cel::CelCompiler;
use crate::eager::{self, Assignment, Produce, Restore, Step, WriteBack};
use crate::error::{Error, Result};
use crate::flatten::FlattenPlan;
use crate::model::{FacetShape, GenerationModel};
use crate::projection;
use crate::schema::EnumProjection;
use crate::typeref::{ScalarKind, TypeRef};
use crate::util::rust_ident;
use genco::prelude::*;
use std::collections::{BTreeSet, HashMap};

use super::{is_boxed, rust_type, RenderConfig};

/// Render the model's root facet
pub fn render(model: &GenerationModel, plans: &[FlattenPlan], config: &RenderConfig) -> Result<String> {
    let renderer = FacetRenderer::new(model, config)?;
    renderer
        .render(plans)
        .to_file_string()
        .map_err(|e| Error::Render(e.to_string()))
}

/// One hop of a member path in emitted code
struct Hop {
    ident: String,
    nullable: bool,
    boxed: bool,
}

/// A member path as an expression: a place, or an `Option<&T>` chain
struct Access {
    expr: String,
    optional: bool,
    boxed: bool,
}

impl Access {
    /// `&T` for the value at a non-optional place
    fn reference(&self) -> String {
        if self.boxed {
            format!("(&*{})", self.expr)
        } else {
            format!("(&{})", self.expr)
        }
    }
}

fn chain(root: &str, hops: &[Hop], root_optional: bool) -> Access {
    let mut expr = root.to_string();
    let mut optional = root_optional;
    let mut boxed = false;
    for hop in hops {
        let borrow = if hop.boxed { "as_deref" } else { "as_ref" };
        expr = match (optional, hop.nullable) {
            (false, false) => format!("{}.{}", expr, hop.ident),
            (false, true) => format!("{}.{}.{}()", expr, hop.ident, borrow),
            (true, true) => format!("{}.and_then(|v| v.{}.{}())", expr, hop.ident, borrow),
            (true, false) if hop.boxed => format!("{}.map(|v| &*v.{})", expr, hop.ident),
            (true, false) => format!("{}.map(|v| &v.{})", expr, hop.ident),
        };
        optional |= hop.nullable;
        boxed = hop.boxed;
    }
    Access {
        expr,
        optional,
        boxed,
    }
}

struct FacetRenderer<'a> {
    model: &'a GenerationModel,
    facet: &'a FacetShape,
    config: &'a RenderConfig,
    /// Rust text for each CEL expression of the forward routine
    cel: HashMap<String, String>,
}

impl<'a> FacetRenderer<'a> {
    fn new(model: &'a GenerationModel, config: &'a RenderConfig) -> Result<Self> {
        let facet = &model.root;
        for (member, binding) in facet.nested_members() {
            if model.facet(&binding.bound_facet).is_some_and(FacetShape::is_async) {
                return Err(Error::Render(format!(
                    "facet '{}' member '{}' nests '{}', whose hooks are async; only a root conversion can await",
                    facet.name, member.name, binding.bound_facet
                )));
            }
        }
        let source_types: HashMap<String, TypeRef> = model
            .sources
            .members(&facet.source)
            .map(|members| {
                members
                    .iter()
                    .map(|m| (m.name.clone(), m.declared_type.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let mut cel = HashMap::new();
        for step in &eager::forward_routine(facet).steps {
            let Step::Assign(assignment) = step else {
                continue;
            };
            let computed = match &assignment.produce {
                Produce::Compute { expression } => Some(expression),
                _ => None,
            };
            for expression in assignment.guard.iter().chain(computed) {
                if cel.contains_key(expression) {
                    continue;
                }
                let rust = CelCompiler::to_rust(expression, &source_types, "source").map_err(|e| {
                    Error::Render(format!(
                        "facet '{}' member '{}': {}",
                        facet.name, assignment.member, e
                    ))
                })?;
                cel.insert(expression.clone(), rust);
            }
        }
        Ok(Self {
            model,
            facet,
            config,
            cel,
        })
    }

    fn render(&self, plans: &[FlattenPlan]) -> rust::Tokens {
        let name = &self.facet.name;
        let imports = self.imports(plans);
        let derive = self.derive();
        let positional = self.facet.shape.is_positional();
        let vis = if positional { "" } else { "pub " };
        let fields: Vec<String> = self
            .facet
            .members
            .iter()
            .map(|m| {
                format!(
                    "{}{}: {},",
                    vis,
                    rust_ident(&m.name),
                    rust_type(&m.facet_type, self.model)
                )
            })
            .collect();
        let header = format!("pub struct {}", name);
        let max_depth = self.model.max_depth.to_string();
        let preserve = self.model.preserve_references.to_string();

        quote! {
            use facetgen::runtime::TraversalState;
            use facetgen::MappingError;
            $(for line in &imports join ($['\n']) => $(line))
            $['\n']

            $(derive)
            $(header) {
                $(for field in &fields join ($['\n']) => $(field))
            }
            $['\n']

            impl $(name) {
                pub const MAX_DEPTH: u32 = $(max_depth);
                pub const PRESERVE_REFERENCES: bool = $(preserve);
                $['\n']
                $(if positional => $(self.positional_api()))
                $(self.from_source())
                $['\n']
                $(self.from_source_with())
                $(if self.facet.generate_reverse => $['\n']$(self.to_source()))
                $(if self.model.generate_projection => $['\n']$(self.projection()))
                $(for plan in plans => $['\n']$(self.flatten_fn(plan)))
            }
            $(for plan in plans => $['\n']$(self.row_struct(plan)))
        }
    }

    fn imports(&self, plans: &[FlattenPlan]) -> Vec<String> {
        let mut sources: BTreeSet<String> = BTreeSet::new();
        let mut facets: BTreeSet<String> = BTreeSet::new();
        sources.insert(self.facet.source.clone());

        let mut types: Vec<&TypeRef> = self.facet.members.iter().map(|m| &m.facet_type).collect();
        types.extend(plans.iter().flat_map(|p| p.columns().map(|c| &c.ty)));
        for ty in types {
            let Some(name) = ty.target_name() else {
                continue;
            };
            if name == self.facet.name {
                continue;
            }
            if self.model.facet(name).is_some() {
                facets.insert(name.to_string());
            } else {
                sources.insert(name.to_string());
            }
        }
        if self.facet.generate_reverse {
            for write in &eager::reverse_routine(self.model, self.facet).writes {
                if let Restore::EnumParse { enum_name, .. } = &write.restore {
                    sources.insert(enum_name.clone());
                }
            }
        }

        let mut lines = vec![format!(
            "use {}::{{{}}};",
            self.config.source_module,
            sources.into_iter().collect::<Vec<_>>().join(", ")
        )];
        if !facets.is_empty() {
            lines.push(format!(
                "use {}::{{{}}};",
                self.config.facet_module,
                facets.into_iter().collect::<Vec<_>>().join(", ")
            ));
        }
        if self.model.generate_projection {
            lines.push("#[allow(unused_imports)]".into());
            lines.push(
                "use facetgen::{projection::{Expr, Literal, Origin, Projection}, schema::EnumProjection, typeref::CollectionShape};"
                    .into(),
            );
        }
        lines
    }

    fn derive(&self) -> String {
        let copy = self.facet.shape.is_value()
            && self.facet.members.iter().all(|m| match m.facet_type.non_null() {
                TypeRef::Scalar(ScalarKind::String) => false,
                TypeRef::Scalar(_) => true,
                TypeRef::Named(name) => self.model.is_enum(name),
                TypeRef::Collection { .. } | TypeRef::Nullable(_) => false,
            });
        if copy {
            "#[derive(Debug, Clone, Copy, Default, PartialEq)]".into()
        } else {
            "#[derive(Debug, Clone, Default, PartialEq)]".into()
        }
    }

    /// Positional constructor and read accessors
    fn positional_api(&self) -> rust::Tokens {
        let params: Vec<String> = self
            .facet
            .members
            .iter()
            .map(|m| format!("{}: {}", rust_ident(&m.name), rust_type(&m.facet_type, self.model)))
            .collect();
        let names: Vec<String> = self.facet.members.iter().map(|m| rust_ident(&m.name)).collect();
        let accessors: Vec<String> = self
            .facet
            .members
            .iter()
            .map(|m| {
                let ident = rust_ident(&m.name);
                format!(
                    "pub fn {}(&self) -> &{} {{ &self.{} }}",
                    ident,
                    rust_type(&m.facet_type, self.model),
                    ident
                )
            })
            .collect();
        let signature = format!("pub fn new({}) -> Self", params.join(", "));
        let names = names.join(", ");
        quote! {
            #[allow(clippy::too_many_arguments)]
            $(signature) {
                Self { $(names) }
            }
            $['\n']
            $(for accessor in &accessors join ($['\n']) => $(accessor))
            $['\n']
        }
    }

    fn async_parts(&self) -> (&'static str, &'static str) {
        if self.facet.is_async() {
            ("async ", ".await")
        } else {
            ("", "")
        }
    }

    fn from_source(&self) -> rust::Tokens {
        let (asyncness, await_) = self.async_parts();
        let signature = format!(
            "pub {}fn from_source(source: &{}) -> Result<Self, MappingError>",
            asyncness, self.facet.source
        );
        let call = format!("Self::from_source_with(source, &mut state){}", await_);
        quote! {
            $(signature) {
                let mut state = TraversalState::new(Self::MAX_DEPTH, Self::PRESERVE_REFERENCES);
                state.visit_root(facetgen::runtime::address_of(source));
                $(call)
            }
        }
    }

    fn from_source_with(&self) -> rust::Tokens {
        let (asyncness, _) = self.async_parts();
        let routine = eager::forward_routine(self.facet);
        let signature = format!(
            "pub {}fn from_source_with(source: &{}, state: &mut TraversalState) -> Result<Self, MappingError>",
            asyncness, self.facet.source
        );
        let statements: Vec<String> = routine
            .steps
            .iter()
            .map(|step| match step {
                Step::BeforeHook(hook) | Step::AfterHook(hook) => format!(
                    "{}(source, &mut target){};",
                    hook.path(),
                    if hook.is_async() { ".await" } else { "" }
                ),
                Step::Assign(assignment) => self.assignment(assignment),
            })
            .collect();
        quote! {
            #[allow(unused_variables)]
            $(signature) {
                let mut target = Self::default();
                $(for statement in &statements join ($['\n']) => $(statement))
                Ok(target)
            }
        }
    }

    fn cel(&self, expression: &str) -> &str {
        self.cel.get(expression).map_or("", String::as_str)
    }

    fn assignment(&self, assignment: &Assignment) -> String {
        let ident = rust_ident(&assignment.member);
        let statement = match &assignment.produce {
            Produce::Compute { expression } => {
                let value = self.cel(expression);
                if assignment.target_type.is_nullable() && value != "None" {
                    format!("target.{} = Some({});", ident, value)
                } else {
                    format!("target.{} = {};", ident, value)
                }
            }
            _ => {
                let access = chain("source", &self.source_hops(&assignment.path), false);
                if access.optional {
                    let none = if assignment.null_yields_null {
                        "None".to_string()
                    } else {
                        format!(
                            "return Err(MappingError::absent({:?}, {:?}))",
                            assignment.member,
                            assignment.path_text()
                        )
                    };
                    format!(
                        "target.{} = match {} {{ Some(v) => {}, None => {} }};",
                        ident,
                        access.expr,
                        self.produce(assignment, "v"),
                        none
                    )
                } else {
                    format!(
                        "target.{} = {};",
                        ident,
                        self.produce(assignment, &access.reference())
                    )
                }
            }
        };
        if assignment.guard.is_empty() {
            return statement;
        }
        let guard: Vec<String> = assignment
            .guard
            .iter()
            .map(|predicate| format!("({})", self.cel(predicate)))
            .collect();
        format!(
            "if {} {{ {} }} else {{ target.{} = Default::default(); }}",
            guard.join(" && "),
            statement,
            ident
        )
    }

    /// Member value from `r`, a `&T` expression for the value read from the
    /// source
    fn produce(&self, assignment: &Assignment, r: &str) -> String {
        let target = &assignment.target_type;
        let value = match &assignment.produce {
            Produce::Nested {
                facet,
                collection: None,
            } => {
                let expanded = format!("state.expand({}, {}::from_source_with)?.map(Box::new)", r, facet);
                return if target.is_nullable() {
                    expanded
                } else {
                    format!("{}.unwrap_or_default()", expanded)
                };
            }
            Produce::Nested {
                facet,
                collection: Some(_),
            } => {
                let element_nullable = target.element().is_some_and(TypeRef::is_nullable);
                if element_nullable {
                    format!(
                        "state.expand_each_nullable({}.iter().map(|e| e.as_ref()), {}::from_source_with)?.into()",
                        r, facet
                    )
                } else {
                    format!("state.expand_each({}.iter(), {}::from_source_with)?.into()", r, facet)
                }
            }
            Produce::EnumCast {
                target: EnumProjection::String,
            } => format!("{}.to_string()", r),
            Produce::EnumCast {
                target: EnumProjection::Int,
            } => format!("({}.clone() as i64)", r),
            Produce::Copy if is_boxed(target.non_null(), self.model) => {
                format!("Box::new({}.clone())", r)
            }
            Produce::Copy | Produce::Compute { .. } => format!("{}.clone()", r),
        };
        if target.is_nullable() {
            format!("Some({})", value)
        } else {
            value
        }
    }

    /// Hops along a source path, typed from the collected source shapes
    fn source_hops(&self, path: &[String]) -> Vec<Hop> {
        let mut current = Some(self.facet.source.clone());
        let mut hops = Vec::with_capacity(path.len());
        for segment in path {
            let declared = current
                .as_deref()
                .and_then(|ty| self.model.sources.members(ty))
                .and_then(|members| members.iter().find(|m| &m.name == segment))
                .map(|m| m.declared_type.clone());
            let (nullable, boxed) = match &declared {
                Some(ty) => (ty.is_nullable(), is_boxed(ty.non_null(), self.model)),
                None => (false, false),
            };
            hops.push(Hop {
                ident: rust_ident(segment),
                nullable,
                boxed,
            });
            current = declared.and_then(|ty| ty.target_name().map(str::to_string));
        }
        hops
    }

    fn to_source(&self) -> rust::Tokens {
        let reverse = eager::reverse_routine(self.model, self.facet);
        let signature = format!(
            "pub fn to_source(&self) -> Result<{}, MappingError>",
            self.facet.source
        );
        let writes: Vec<String> = reverse.writes.iter().map(|w| self.write_back(w)).collect();
        quote! {
            $(signature) {
                let mut source = $(&self.facet.source)::default();
                $(for write in &writes join ($['\n']) => $(write))
                Ok(source)
            }
        }
    }

    fn write_back(&self, write: &WriteBack) -> String {
        let field = format!("self.{}", rust_ident(&write.member));
        let target = format!("source.{}", rust_ident(&write.target));
        let nullable = self
            .facet
            .member(&write.member)
            .is_some_and(|m| m.facet_type.is_nullable());
        let mismatch = format!(
            "|_| MappingError::TypeMismatch {{ member: {:?}.into(), expected: {:?}.into(), found: format!(\"{{:?}}\", {}) }}",
            write.member,
            write.target_type.to_string(),
            field
        );

        let value = match &write.restore {
            Restore::Copy => format!("{}.clone()", field),
            Restore::EnumParse {
                enum_name,
                from: EnumProjection::String,
            } if nullable => format!(
                "{}.as_deref().map(str::parse::<{}>).transpose().map_err({})?",
                field, enum_name, mismatch
            ),
            Restore::EnumParse {
                enum_name,
                from: EnumProjection::String,
            } => format!("{}.parse::<{}>().map_err({})?", field, enum_name, mismatch),
            Restore::EnumParse {
                enum_name,
                from: EnumProjection::Int,
            } if nullable => format!(
                "{}.map({}::try_from).transpose().map_err({})?",
                field, enum_name, mismatch
            ),
            Restore::EnumParse {
                enum_name,
                from: EnumProjection::Int,
            } => format!("{}::try_from({}).map_err({})?", enum_name, field, mismatch),
            Restore::Nested {
                facet,
                collection: None,
            } if nullable => format!(
                "{}.as_deref().map({}::to_source).transpose()?.map(Box::new)",
                field, facet
            ),
            Restore::Nested {
                facet: _,
                collection: None,
            } => format!("Box::new({}.to_source()?)", field),
            Restore::Nested {
                facet,
                collection: Some(_),
            } => {
                let element_nullable = write.target_type.element().is_some_and(TypeRef::is_nullable);
                let each = if element_nullable {
                    format!("|e| e.as_ref().map({}::to_source).transpose()", facet)
                } else {
                    format!("{}::to_source", facet)
                };
                if nullable {
                    format!(
                        "{}.as_ref().map(|c| c.iter().map({}).collect::<Result<Vec<_>, _>>()).transpose()?.map(Into::into)",
                        field, each
                    )
                } else {
                    format!("{}.iter().map({}).collect::<Result<Vec<_>, _>>()?.into()", field, each)
                }
            }
        };
        format!("{} = {};", target, value)
    }

    fn projection(&self) -> rust::Tokens {
        let builder = projection::synthesize(self.model).to_rust_builder();
        let signature = "pub fn projection() -> Projection";
        quote! {
            $(signature) {
                $(builder)
            }
        }
    }

    /// Hops along a facet member path, starting from `facet`
    fn facet_hops(&self, facet: &FacetShape, path: &[String]) -> Vec<Hop> {
        let mut current = Some(facet);
        let mut hops = Vec::with_capacity(path.len());
        for segment in path {
            let member = current.and_then(|f| f.member(segment));
            let (nullable, boxed) = match member {
                Some(m) => (
                    m.facet_type.is_nullable(),
                    is_boxed(m.facet_type.non_null(), self.model),
                ),
                None => (false, false),
            };
            hops.push(Hop {
                ident: rust_ident(segment),
                nullable,
                boxed,
            });
            current = member
                .and_then(|m| m.nested.as_ref())
                .and_then(|b| self.model.facet(&b.bound_facet));
        }
        hops
    }

    fn column_value(&self, root: &str, root_optional: bool, hops: &[Hop]) -> String {
        if hops.is_empty() {
            return format!("{}.clone()", root);
        }
        let access = chain(root, hops, root_optional);
        if access.optional {
            format!("{}.cloned()", access.expr)
        } else {
            format!("{}.clone()", access.expr)
        }
    }

    fn flatten_fn(&self, plan: &FlattenPlan) -> rust::Tokens {
        let collection = rust_ident(&plan.collection);
        let member = self.facet.member(&plan.collection);
        let collection_nullable = member.is_some_and(|m| m.facet_type.is_nullable());
        let element_nullable = member
            .and_then(|m| m.facet_type.element())
            .is_some_and(TypeRef::is_nullable);

        let iter = if collection_nullable {
            format!("self.{}.iter().flatten()", collection)
        } else {
            format!("self.{}.iter()", collection)
        };
        let mut values: Vec<String> = plan
            .root_columns
            .iter()
            .map(|c| {
                let hops = self.facet_hops(self.facet, &c.path);
                format!("{}: {},", rust_ident(&c.name), self.column_value("self", false, &hops))
            })
            .collect();
        let element_facet = plan.element_facet.as_deref().and_then(|f| self.model.facet(f));
        let element_root = if element_nullable {
            "element.as_ref()"
        } else {
            "element"
        };
        values.extend(plan.element_columns.iter().map(|c| {
            let value = match element_facet {
                Some(facet) if !c.path.is_empty() => {
                    let hops = self.facet_hops(facet, &c.path);
                    self.column_value(element_root, element_nullable, &hops)
                }
                _ => "element.clone()".to_string(),
            };
            format!("{}: {},", rust_ident(&c.name), value)
        }));

        let signature = format!(
            "pub fn flatten_{}(&self) -> Vec<{}>",
            rust_ident(&plan.collection).trim_start_matches("r#"),
            plan.name
        );
        let row = format!("{} {{ {} }}", plan.name, values.join(" "));
        quote! {
            $(signature) {
                $(iter)
                    .map(|element| $(row))
                    .collect()
            }
        }
    }

    fn row_struct(&self, plan: &FlattenPlan) -> rust::Tokens {
        let fields: Vec<String> = plan
            .columns()
            .map(|c| format!("pub {}: {},", rust_ident(&c.name), rust_type(&c.ty, self.model)))
            .collect();
        let header = format!("pub struct {}", plan.name);
        quote! {
            #[derive(Debug, Clone, PartialEq)]
            $(header) {
                $(for field in &fields join ($['\n']) => $(field))
            }
        }
    }
}
