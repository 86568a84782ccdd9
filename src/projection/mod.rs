//! Projection synthesizer
//!
//! Builds a deferred, inspectable transformation from a source object to a
//! facet. The tree only uses operators a query evaluator can translate:
//! member access, object initialization, a null check, and an element-wise
//! map over a collection materialized into a shape. [`Expr::Cast`] is the one
//! conversion, used for enum re-projection.
//!
//! Nested facets are inlined into the enclosing initializer unless they are
//! already being expanded; then the member becomes an opaque
//! [`Expr::Call`]. Past the depth bound a member is [`Expr::Truncated`]: the
//! source is still read, then left at its default.

pub mod eval;

pub use eval::ProjectionEvaluator;

use crate::graph::ExpansionStack;
use crate::model::{FacetShape, GenerationModel, ResolvedMember};
use crate::schema::EnumProjection;
use crate::select::MemberOrigin;
use crate::typeref::{CollectionShape, ScalarKind, TypeRef};
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Literal values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Enum {
        type_name: String,
        variant: String,
        ordinal: i64,
    },
    /// Empty collection of a shape
    Empty(CollectionShape),
    /// All-default instance of a named type
    Default(String),
}

impl Literal {
    /// Default literal of a type
    pub fn default_for(ty: &TypeRef) -> Literal {
        match ty {
            TypeRef::Nullable(_) => Literal::Null,
            TypeRef::Collection { shape, .. } => Literal::Empty(*shape),
            TypeRef::Scalar(ScalarKind::Bool) => Literal::Bool(false),
            TypeRef::Scalar(ScalarKind::Int) => Literal::Int(0),
            TypeRef::Scalar(ScalarKind::Float) => Literal::Float(0.0),
            TypeRef::Scalar(ScalarKind::String) => Literal::String(String::new()),
            TypeRef::Named(name) => Literal::Default(name.clone()),
        }
    }
}

/// Source object of a nested initializer and the value used when the
/// traversal declines to expand it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Origin {
    pub source: Box<Expr>,
    pub fallback: Literal,
}

impl Origin {
    pub fn new(source: Expr, fallback: Literal) -> Self {
        Self {
            source: Box::new(source),
            fallback,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Binding {
    pub member: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    Parameter(String),
    Member {
        target: Box<Expr>,
        name: String,
    },
    Literal(Literal),
    Init {
        facet: String,
        origin: Option<Origin>,
        bindings: Vec<Binding>,
    },
    IfNull {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Select {
        source: Box<Expr>,
        parameter: String,
        body: Box<Expr>,
        shape: CollectionShape,
        /// Null elements are kept; otherwise a null element is absent
        element_nullable: bool,
    },
    /// Nested member past the depth bound
    Truncated {
        source: Box<Expr>,
        fallback: Literal,
    },
    Cast {
        operand: Box<Expr>,
        target: EnumProjection,
    },
    Call {
        facet: String,
        argument: Box<Expr>,
        fallback: Literal,
    },
}

impl Expr {
    pub fn param(name: &str) -> Expr {
        Expr::Parameter(name.to_string())
    }

    pub fn member(target: Expr, name: &str) -> Expr {
        Expr::Member {
            target: Box::new(target),
            name: name.to_string(),
        }
    }

    pub fn lit(literal: Literal) -> Expr {
        Expr::Literal(literal)
    }

    pub fn init(facet: &str, origin: Option<Origin>, bindings: Vec<(&str, Expr)>) -> Expr {
        Expr::Init {
            facet: facet.to_string(),
            origin,
            bindings: bindings
                .into_iter()
                .map(|(member, value)| Binding {
                    member: member.to_string(),
                    value,
                })
                .collect(),
        }
    }

    pub fn if_null(test: Expr, then: Expr, otherwise: Expr) -> Expr {
        Expr::IfNull {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn select(
        source: Expr,
        parameter: &str,
        body: Expr,
        shape: CollectionShape,
        element_nullable: bool,
    ) -> Expr {
        Expr::Select {
            source: Box::new(source),
            parameter: parameter.to_string(),
            body: Box::new(body),
            shape,
            element_nullable,
        }
    }

    pub fn truncated(source: Expr, fallback: Literal) -> Expr {
        Expr::Truncated {
            source: Box::new(source),
            fallback,
        }
    }

    pub fn cast(operand: Expr, target: EnumProjection) -> Expr {
        Expr::Cast {
            operand: Box::new(operand),
            target,
        }
    }

    pub fn call(facet: &str, argument: Expr, fallback: Literal) -> Expr {
        Expr::Call {
            facet: facet.to_string(),
            argument: Box::new(argument),
            fallback,
        }
    }

    /// Guard `otherwise` with a null check on `test`
    fn null_guarded(test: Expr, otherwise: Expr) -> Expr {
        Expr::if_null(test, Expr::lit(Literal::Null), otherwise)
    }

    /// Visit this node and every descendant
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Parameter(_) | Expr::Literal(_) => {}
            Expr::Member { target, .. } => target.walk(visit),
            Expr::Init {
                origin, bindings, ..
            } => {
                if let Some(origin) = origin {
                    origin.source.walk(visit);
                }
                for binding in bindings {
                    binding.value.walk(visit);
                }
            }
            Expr::IfNull {
                test,
                then,
                otherwise,
            } => {
                test.walk(visit);
                then.walk(visit);
                otherwise.walk(visit);
            }
            Expr::Select { source, body, .. } => {
                source.walk(visit);
                body.walk(visit);
            }
            Expr::Truncated { source, .. } => source.walk(visit),
            Expr::Cast { operand, .. } => operand.walk(visit),
            Expr::Call { argument, .. } => argument.walk(visit),
        }
    }
}

/// A projection for one facet: `parameter => body`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub facet: String,
    pub parameter: String,
    pub body: Expr,
}

impl Projection {
    pub fn new(facet: &str, parameter: &str, body: Expr) -> Self {
        Self {
            facet: facet.to_string(),
            parameter: parameter.to_string(),
            body,
        }
    }

    /// Facets reached through opaque calls rather than inlining
    pub fn called_facets(&self) -> Vec<&str> {
        let mut found: Vec<&str> = Vec::new();
        self.body.walk(&mut |expr| {
            if let Expr::Call { facet, .. } = expr {
                if !found.contains(&facet.as_str()) {
                    found.push(facet);
                }
            }
        });
        found
    }

    /// Rust source that rebuilds this projection with the builder API
    pub fn to_rust_builder(&self) -> String {
        format!(
            "Projection::new({:?}, {:?}, {})",
            self.facet,
            self.parameter,
            builder_expr(&self.body)
        )
    }
}

/// Synthesize the projection of a model's root facet
pub fn synthesize(model: &GenerationModel) -> Projection {
    let mut synth = Synthesizer {
        model,
        stack: ExpansionStack::new(),
    };
    let parameter = "source";
    let body = synth.init(&model.root, Expr::param(parameter), None);
    Projection::new(&model.root.name, parameter, body)
}

struct Synthesizer<'m> {
    model: &'m GenerationModel,
    stack: ExpansionStack,
}

impl<'m> Synthesizer<'m> {
    fn init(&mut self, facet: &FacetShape, receiver: Expr, origin: Option<Origin>) -> Expr {
        self.stack.enter(&facet.name);
        let bindings = facet
            .members
            .iter()
            .map(|member| Binding {
                member: member.name.clone(),
                value: self.member_expr(member, &receiver),
            })
            .collect();
        self.stack.exit();
        Expr::Init {
            facet: facet.name.clone(),
            origin,
            bindings,
        }
    }

    fn member_expr(&mut self, member: &ResolvedMember, receiver: &Expr) -> Expr {
        if !member.in_projection {
            return Expr::lit(Literal::default_for(&member.facet_type));
        }
        let segments: Vec<&str> = match &member.origin {
            MemberOrigin::Direct { member } => vec![member.as_str()],
            MemberOrigin::Path { segments } => segments.iter().map(String::as_str).collect(),
            MemberOrigin::Computed { .. } => {
                return Expr::lit(Literal::default_for(&member.facet_type));
            }
        };
        let nullable = member.facet_type.is_nullable();
        let access = path_access(receiver.clone(), &segments, nullable);

        match (&member.nested, member.enum_as) {
            (Some(binding), _) => {
                let bound = binding.bound_facet.clone();
                self.nested(member, &bound, binding.collection_shape, access)
            }
            (None, Some(target)) => Expr::cast(access, target),
            (None, None) => access,
        }
    }

    fn nested(
        &mut self,
        member: &ResolvedMember,
        bound: &str,
        collection: Option<CollectionShape>,
        access: Expr,
    ) -> Expr {
        let nullable = member.facet_type.is_nullable();
        let depth = self.stack.depth() + 1;
        let max_depth = self.model.max_depth;

        let body = if max_depth != 0 && depth > max_depth {
            debug!(member = %member.name, depth, "projection truncated at depth bound");
            let fallback = match collection {
                Some(shape) => Literal::Empty(shape),
                None => Literal::default_for(&member.facet_type),
            };
            Expr::truncated(access.clone(), fallback)
        } else {
            let fallback = if nullable {
                Literal::Null
            } else {
                Literal::Default(bound.to_string())
            };
            match collection {
                Some(shape) => {
                    let parameter = format!("x{}", depth);
                    let element = Expr::param(&parameter);
                    let body = self.element_body(bound, element);
                    let element_nullable = member
                        .facet_type
                        .element()
                        .is_some_and(TypeRef::is_nullable);
                    Expr::select(access.clone(), &parameter, body, shape, element_nullable)
                }
                None => self.expand(bound, access.clone(), fallback),
            }
        };

        if nullable {
            Expr::null_guarded(access, body)
        } else {
            body
        }
    }

    fn expand(&mut self, bound: &str, receiver: Expr, fallback: Literal) -> Expr {
        if self.stack.contains(bound) {
            debug!(facet = %bound, path = %self.stack.path(), "cycle: projection calls conversion");
            return Expr::call(bound, receiver, fallback);
        }
        match self.model.facet(bound) {
            Some(shape) => {
                let origin = Origin::new(receiver.clone(), fallback);
                self.init(shape, receiver, Some(origin))
            }
            None => Expr::call(bound, receiver, fallback),
        }
    }

    fn element_body(&mut self, bound: &str, element: Expr) -> Expr {
        self.expand(bound, element, Literal::Null)
    }
}

/// Member access along a path; when the member is nullable every proper
/// prefix is null-checked
fn path_access(receiver: Expr, segments: &[&str], nullable: bool) -> Expr {
    let mut prefixes = Vec::with_capacity(segments.len());
    let mut current = receiver;
    for segment in segments {
        current = Expr::member(current, segment);
        prefixes.push(current.clone());
    }
    if !nullable || prefixes.len() < 2 {
        return current;
    }
    let mut expr = current;
    for prefix in prefixes.into_iter().rev().skip(1) {
        expr = Expr::null_guarded(prefix, expr);
    }
    expr
}

fn builder_literal(literal: &Literal) -> String {
    match literal {
        Literal::Null => "Literal::Null".to_string(),
        Literal::Bool(b) => format!("Literal::Bool({})", b),
        Literal::Int(i) => format!("Literal::Int({})", i),
        Literal::Float(x) => format!("Literal::Float({:?})", x),
        Literal::String(s) => format!("Literal::String({:?}.into())", s),
        Literal::Enum {
            type_name,
            variant,
            ordinal,
        } => format!(
            "Literal::Enum {{ type_name: {:?}.into(), variant: {:?}.into(), ordinal: {} }}",
            type_name, variant, ordinal
        ),
        Literal::Empty(shape) => format!("Literal::Empty(CollectionShape::{:?})", shape),
        Literal::Default(name) => format!("Literal::Default({:?}.into())", name),
    }
}

fn builder_expr(expr: &Expr) -> String {
    match expr {
        Expr::Parameter(name) => format!("Expr::param({:?})", name),
        Expr::Member { target, name } => {
            format!("Expr::member({}, {:?})", builder_expr(target), name)
        }
        Expr::Literal(literal) => format!("Expr::lit({})", builder_literal(literal)),
        Expr::Init {
            facet,
            origin,
            bindings,
        } => {
            let origin = match origin {
                Some(origin) => format!(
                    "Some(Origin::new({}, {}))",
                    builder_expr(&origin.source),
                    builder_literal(&origin.fallback)
                ),
                None => "None".to_string(),
            };
            let bindings: Vec<String> = bindings
                .iter()
                .map(|b| format!("({:?}, {})", b.member, builder_expr(&b.value)))
                .collect();
            format!(
                "Expr::init({:?}, {}, vec![{}])",
                facet,
                origin,
                bindings.join(", ")
            )
        }
        Expr::IfNull {
            test,
            then,
            otherwise,
        } => format!(
            "Expr::if_null({}, {}, {})",
            builder_expr(test),
            builder_expr(then),
            builder_expr(otherwise)
        ),
        Expr::Select {
            source,
            parameter,
            body,
            shape,
            element_nullable,
        } => format!(
            "Expr::select({}, {:?}, {}, CollectionShape::{:?}, {})",
            builder_expr(source),
            parameter,
            builder_expr(body),
            shape,
            element_nullable
        ),
        Expr::Truncated { source, fallback } => format!(
            "Expr::truncated({}, {})",
            builder_expr(source),
            builder_literal(fallback)
        ),
        Expr::Cast { operand, target } => format!(
            "Expr::cast({}, EnumProjection::{:?})",
            builder_expr(operand),
            target
        ),
        Expr::Call {
            facet,
            argument,
            fallback,
        } => format!(
            "Expr::call({:?}, {}, {})",
            facet,
            builder_expr(argument),
            builder_literal(fallback)
        ),
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::String(s) => write!(f, "{:?}", s),
            Literal::Enum {
                type_name, variant, ..
            } => write!(f, "{}::{}", type_name, variant),
            Literal::Empty(shape) => write!(f, "{}[]", shape.keyword()),
            Literal::Default(name) => write!(f, "default({})", name),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Parameter(name) => write!(f, "{}", name),
            Expr::Member { target, name } => write!(f, "{}.{}", target, name),
            Expr::Literal(literal) => write!(f, "{}", literal),
            Expr::Init {
                facet, bindings, ..
            } => {
                write!(f, "{} {{ ", facet)?;
                for (i, binding) in bindings.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", binding.member, binding.value)?;
                }
                write!(f, " }}")
            }
            Expr::IfNull {
                test,
                then,
                otherwise,
            } => write!(f, "({} == null ? {} : {})", test, then, otherwise),
            Expr::Select {
                source,
                parameter,
                body,
                shape,
                ..
            } => write!(
                f,
                "{}.select({} => {}).to_{}()",
                source,
                parameter,
                body,
                crate::util::to_snake_case(shape.keyword())
            ),
            Expr::Truncated { source, fallback } => write!(f, "truncate({}, {})", source, fallback),
            Expr::Cast { operand, target } => {
                let name = match target {
                    EnumProjection::String => "string",
                    EnumProjection::Int => "int",
                };
                write!(f, "({} as {})", operand, name)
            }
            Expr::Call {
                facet, argument, ..
            } => write!(f, "{}::from_source({})", facet, argument),
        }
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.parameter, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DefaultsConfig;
    use crate::model::build_model;
    use crate::schema::Manifest;
    use pretty_assertions::assert_eq;

    const MANIFEST: &str = r#"
types:
  - name: Author
    members:
      - name: name
        type: string
      - name: books
        type: List<Book>
  - name: Book
    members:
      - name: title
        type: string
      - name: author
        type: Author?
facets:
  - name: AuthorDto
    source: Author
    max_depth: 0
    nested:
      - { source: Book, facet: BookDto }
  - name: BookDto
    source: Book
    nested:
      - { source: Author, facet: AuthorDto }
"#;

    fn projection(max_depth: Option<u32>) -> Projection {
        let mut manifest = Manifest::from_yaml(MANIFEST).unwrap();
        if let Some(depth) = max_depth {
            manifest.facets[0].max_depth = Some(depth);
        }
        let model = build_model(&manifest, "AuthorDto", &DefaultsConfig::default()).unwrap();
        synthesize(&model)
    }

    #[test]
    fn test_cycle_falls_back_to_call() {
        let projection = projection(None);
        assert_eq!(projection.called_facets(), vec!["AuthorDto"]);
        assert_eq!(
            projection.to_string(),
            "source => AuthorDto { name: source.name, books: source.books.select(x1 => \
             BookDto { title: x1.title, author: (x1.author == null ? null : AuthorDto::from_source(x1.author)) }\
             ).to_list() }"
        );
    }

    #[test]
    fn test_depth_bound_yields_literal() {
        let projection = projection(Some(1));
        assert!(projection.called_facets().is_empty());
        let text = projection.to_string();
        assert!(
            text.contains("author: (x1.author == null ? null : truncate(x1.author, null))"),
            "{}",
            text
        );
    }

    #[test]
    fn test_path_access_guards_prefixes() {
        let expr = path_access(Expr::param("s"), &["a", "b", "c"], true);
        assert_eq!(expr.to_string(), "(s.a == null ? null : (s.a.b == null ? null : s.a.b.c))");
        let plain = path_access(Expr::param("s"), &["a", "b"], false);
        assert_eq!(plain.to_string(), "s.a.b");
    }

    #[test]
    fn test_builder_text() {
        let projection = Projection::new(
            "Dto",
            "source",
            Expr::init(
                "Dto",
                None,
                vec![("tags", Expr::lit(Literal::Empty(CollectionShape::Array)))],
            ),
        );
        assert_eq!(
            projection.to_rust_builder(),
            "Projection::new(\"Dto\", \"source\", Expr::init(\"Dto\", None, \
             vec![(\"tags\", Expr::lit(Literal::Empty(CollectionShape::Array)))]))"
        );
    }
}
