//! CEL (Common Expression Language) support for member directives
//!
//! Computed members and condition predicates are written in CEL. This module:
//! - Parses CEL strings to AST (using cel-parser)
//! - Evaluates CEL expressions at conversion time (using cel-interpreter)
//! - Renders the AST as a Rust expression for emitted code
//!
//! Variables in scope are the source members by name, plus `source` for the
//! whole source object.

use crate::error::{Error, Result};
use crate::typeref::{ScalarKind, TypeRef};
use std::collections::HashMap;
use std::panic;

pub use cel_parser::Expression as CelExpr;
use cel_parser::ast::{operators, CallExpr, Expr};
use cel_parser::reference::Val;
use cel_parser::Parser;

use cel_interpreter::{Context, Program, Value};

/// Re-export cel-interpreter Value for use in evaluation
pub use cel_interpreter::Value as CelValue;

/// Names that are never variables
const BUILTINS: [&str; 3] = ["true", "false", "null"];

/// CEL compiler - parses, evaluates, and renders to Rust
pub struct CelCompiler;

impl CelCompiler {
    /// Parse CEL expression string to AST (using cel-parser)
    ///
    /// The generated parser panics on some malformed input; that is reported
    /// as a parse error like any other.
    pub fn parse(expr: &str) -> Result<CelExpr> {
        match panic::catch_unwind(|| Parser::new().parse(expr)) {
            Ok(Ok(ast)) => Ok(ast),
            Ok(Err(e)) => Err(Error::CelParse(format!("{}: {}", expr, e))),
            Err(_) => Err(Error::CelParse(format!("{}: malformed expression", expr))),
        }
    }

    /// Check if a string is a valid CEL expression
    pub fn is_valid(expr: &str) -> bool {
        Self::parse(expr).is_ok()
    }

    /// Validate, reporting the parser's complaint
    pub fn check(expr: &str) -> Result<()> {
        Self::parse(expr).map(|_| ())
    }

    /// Evaluate a CEL expression with the given variable bindings
    pub fn eval(expr: &str, vars: &HashMap<String, CelValue>) -> Result<CelValue> {
        let program = match panic::catch_unwind(|| Program::compile(expr)) {
            Ok(compiled) => compiled.map_err(|e| Error::CelParse(format!("{}: {}", expr, e)))?,
            Err(_) => return Err(Error::CelParse(format!("{}: malformed expression", expr))),
        };

        let mut context = Context::default();
        for (name, value) in vars {
            context.add_variable_from_value(name.clone(), value.clone());
        }

        program
            .execute(&context)
            .map_err(|e| Error::CelEval(format!("{}: {:?}", expr, e)))
    }

    /// Evaluate a CEL expression and return result as bool
    pub fn eval_bool(expr: &str, vars: &HashMap<String, CelValue>) -> Result<bool> {
        match Self::eval(expr, vars)? {
            Value::Bool(b) => Ok(b),
            other => Err(Error::CelEval(format!(
                "Expected bool result, got {:?}",
                other
            ))),
        }
    }

    /// Evaluate every predicate; all must hold (logical AND, short-circuit)
    pub fn eval_all(predicates: &[String], vars: &HashMap<String, CelValue>) -> Result<bool> {
        for predicate in predicates {
            if !Self::eval_bool(predicate, vars)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Free variables of an expression in order of first use; bound
    /// comprehension variables, member names after a dot and function names
    /// are not included
    pub fn identifiers(expr: &str) -> Result<Vec<String>> {
        let ast = Self::parse(expr)?;
        let mut found = Vec::new();
        collect_identifiers(&ast.expr, &mut Vec::new(), &mut found);
        Ok(found)
    }

    /// Render an expression as Rust reading from `receiver`
    ///
    /// `members` gives the type of each source member in scope. The result
    /// is an owned value: borrowed strings and other non-`Copy` members are
    /// cloned.
    pub fn to_rust(
        expr: &str,
        members: &HashMap<String, TypeRef>,
        receiver: &str,
    ) -> Result<String> {
        let ast = Self::parse(expr)?;
        let renderer = RustRenderer { members, receiver };
        let rendered = renderer
            .render(&ast.expr)
            .map_err(|e| Error::CelParse(format!("{}: {}", expr, e)))?;
        Ok(rendered.owned())
    }
}

fn collect_identifiers(expr: &Expr, bound: &mut Vec<String>, found: &mut Vec<String>) {
    match expr {
        Expr::Ident(name) => {
            if !BUILTINS.contains(&name.as_str()) && !bound.contains(name) && !found.contains(name) {
                found.push(name.clone());
            }
        }
        Expr::Select(select) => collect_identifiers(&select.operand.expr, bound, found),
        Expr::Call(call) => {
            if let Some(target) = &call.target {
                collect_identifiers(&target.expr, bound, found);
            }
            for arg in &call.args {
                collect_identifiers(&arg.expr, bound, found);
            }
        }
        Expr::List(list) => {
            for element in &list.elements {
                collect_identifiers(&element.expr, bound, found);
            }
        }
        Expr::Comprehension(comprehension) => {
            collect_identifiers(&comprehension.iter_range.expr, bound, found);
            collect_identifiers(&comprehension.accu_init.expr, bound, found);
            let depth = bound.len();
            bound.push(comprehension.iter_var.clone());
            bound.extend(comprehension.iter_var2.clone());
            bound.push(comprehension.accu_var.clone());
            for part in [
                &comprehension.loop_cond,
                &comprehension.loop_step,
                &comprehension.result,
            ] {
                collect_identifiers(&part.expr, bound, found);
            }
            bound.truncate(depth);
        }
        Expr::Map(_) | Expr::Struct(_) | Expr::Literal(_) | Expr::Unspecified => {}
    }
}

/// How a rendered expression holds its value
#[derive(Debug, Clone, Copy, PartialEq)]
enum Form {
    /// `&'static str` literal
    StrLiteral,
    /// Borrowed place; `copy` when reading it does not move
    Place { copy: bool },
    /// Fresh value
    Owned,
}

#[derive(Debug, Clone)]
struct Rendered {
    code: String,
    form: Form,
    /// Produces text, so `+` concatenates
    text: bool,
}

impl Rendered {
    fn owned_value(code: String) -> Self {
        Self {
            code,
            form: Form::Owned,
            text: false,
        }
    }

    /// The value as an owned expression
    fn owned(self) -> String {
        match self.form {
            Form::StrLiteral => format!("{}.to_string()", self.code),
            Form::Place { copy: false } => format!("{}.clone()", self.code),
            Form::Place { copy: true } | Form::Owned => self.code,
        }
    }
}

struct RustRenderer<'a> {
    members: &'a HashMap<String, TypeRef>,
    receiver: &'a str,
}

impl RustRenderer<'_> {
    fn render(&self, expr: &Expr) -> std::result::Result<Rendered, String> {
        match expr {
            Expr::Literal(val) => Ok(render_literal(val)),
            Expr::Ident(name) if name == "source" => Ok(Rendered {
                code: self.receiver.to_string(),
                form: Form::Place { copy: false },
                text: false,
            }),
            Expr::Ident(name) => match self.members.get(name) {
                Some(ty) => Ok(place(format!("{}.{}", self.receiver, name), ty)),
                None => Ok(Rendered {
                    code: name.clone(),
                    form: Form::Place { copy: false },
                    text: false,
                }),
            },
            Expr::Select(select) if select.test => {
                let operand = self.render(&select.operand.expr)?;
                Ok(Rendered::owned_value(format!(
                    "{}.{}.is_some()",
                    operand.code, select.field
                )))
            }
            Expr::Select(select) => {
                let operand = &select.operand.expr;
                if let Expr::Ident(name) = operand {
                    if name == "source" {
                        if let Some(ty) = self.members.get(&select.field) {
                            return Ok(place(format!("{}.{}", self.receiver, select.field), ty));
                        }
                    }
                }
                let operand = self.render(operand)?;
                Ok(Rendered {
                    code: format!("{}.{}", operand.code, select.field),
                    form: Form::Place { copy: false },
                    text: false,
                })
            }
            Expr::Call(call) => self.render_call(call),
            Expr::List(list) => {
                let items = list
                    .elements
                    .iter()
                    .map(|e| self.render(&e.expr).map(|r| r.code))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(Rendered::owned_value(format!("[{}]", items.join(", "))))
            }
            Expr::Comprehension(_) => Err("macros have no Rust rendering".to_string()),
            Expr::Map(_) | Expr::Struct(_) => {
                Err("map and message literals have no Rust rendering".to_string())
            }
            Expr::Unspecified => Err("empty expression".to_string()),
        }
    }

    fn render_call(&self, call: &CallExpr) -> std::result::Result<Rendered, String> {
        let args = call
            .args
            .iter()
            .map(|a| self.render(&a.expr))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let name = call.func_name.as_str();

        if let Some(target) = &call.target {
            let target = self.render(&target.expr)?;
            return self.render_method(name, target, args);
        }

        match (name, args.as_slice()) {
            (operators::CONDITIONAL, [cond, then, otherwise]) => {
                let text = then.text && otherwise.text;
                Ok(Rendered {
                    code: format!(
                        "if {} {{ {} }} else {{ {} }}",
                        cond.code,
                        then.clone().owned(),
                        otherwise.clone().owned()
                    ),
                    form: Form::Owned,
                    text,
                })
            }
            (operators::LOGICAL_AND, [l, r]) => Ok(binary(l, "&&", r)),
            (operators::LOGICAL_OR, [l, r]) => Ok(binary(l, "||", r)),
            (operators::LOGICAL_NOT, [inner]) => {
                Ok(Rendered::owned_value(format!("(!{})", inner.code)))
            }
            (operators::NEGATE, [inner]) => Ok(Rendered::owned_value(format!("(-{})", inner.code))),
            (operators::ADD, [l, r]) if l.text || r.text => Ok(concat(&[l, r])),
            (operators::IN, [l, r]) => Ok(Rendered::owned_value(format!(
                "{}.iter().any(|v| *v == {})",
                r.code, l.code
            ))),
            (operators::INDEX, [l, r]) => Ok(Rendered {
                code: format!("{}[{} as usize]", l.code, r.code),
                form: Form::Place { copy: false },
                text: false,
            }),
            ("size", [inner]) => Ok(size(inner)),
            ("int", [inner]) => Ok(Rendered::owned_value(format!("({} as i64)", inner.code))),
            ("double", [inner]) => Ok(Rendered::owned_value(format!("({} as f64)", inner.code))),
            ("string", [inner]) => Ok(Rendered {
                code: format!("{}.to_string()", inner.code),
                form: Form::Owned,
                text: true,
            }),
            (op, [l, r]) if binary_op(op).is_some() => {
                Ok(binary(l, binary_op(op).unwrap_or_default(), r))
            }
            (op, _) if op.starts_with('_') || op.starts_with('@') => {
                Err(format!("operator '{}' has no Rust rendering", op))
            }
            (func, args) => {
                let args: Vec<String> = args.iter().map(|a| a.code.clone()).collect();
                Ok(Rendered::owned_value(format!("{}({})", func, args.join(", "))))
            }
        }
    }

    fn render_method(
        &self,
        name: &str,
        target: Rendered,
        args: Vec<Rendered>,
    ) -> std::result::Result<Rendered, String> {
        let method = match name {
            "size" => return Ok(size(&target)),
            "startsWith" => "starts_with",
            "endsWith" => "ends_with",
            "contains" => "contains",
            "matches" => return Err("regular expressions have no Rust rendering".to_string()),
            "lowerAscii" => {
                return Ok(Rendered {
                    code: format!("{}.to_lowercase()", target.code),
                    form: Form::Owned,
                    text: true,
                })
            }
            "upperAscii" => {
                return Ok(Rendered {
                    code: format!("{}.to_uppercase()", target.code),
                    form: Form::Owned,
                    text: true,
                })
            }
            other => other,
        };
        let args: Vec<String> = args
            .iter()
            .map(|a| match a.form {
                Form::Place { copy: false } => format!("&{}", a.code),
                _ => a.code.clone(),
            })
            .collect();
        Ok(Rendered::owned_value(format!(
            "{}.{}({})",
            target.code,
            method,
            args.join(", ")
        )))
    }
}

fn place(code: String, ty: &TypeRef) -> Rendered {
    let copy = matches!(
        ty,
        TypeRef::Scalar(ScalarKind::Bool | ScalarKind::Int | ScalarKind::Float)
    );
    Rendered {
        code,
        form: Form::Place { copy },
        text: *ty == TypeRef::Scalar(ScalarKind::String),
    }
}

fn render_literal(val: &Val) -> Rendered {
    match val {
        Val::String(s) => Rendered {
            code: format!("{:?}", s),
            form: Form::StrLiteral,
            text: true,
        },
        Val::Boolean(b) => Rendered::owned_value(b.to_string()),
        Val::Int(i) => Rendered::owned_value(i.to_string()),
        Val::UInt(u) => Rendered::owned_value(format!("{}i64", u)),
        Val::Double(x) => Rendered::owned_value(format!("{:?}", x)),
        Val::Bytes(b) => Rendered::owned_value(format!("vec!{:?}", b)),
        Val::Null => Rendered::owned_value("None".to_string()),
    }
}

fn binary(l: &Rendered, op: &str, r: &Rendered) -> Rendered {
    Rendered::owned_value(format!("({} {} {})", l.code, op, r.code))
}

/// `size(x)` as an `int`
fn size(inner: &Rendered) -> Rendered {
    Rendered::owned_value(format!("({}.len() as i64)", inner.code))
}

/// String `+` becomes `format!`
fn concat(parts: &[&Rendered]) -> Rendered {
    let pieces: Vec<&str> = parts.iter().map(|p| p.code.as_str()).collect();
    Rendered {
        code: format!("format!(\"{}\", {})", "{}".repeat(pieces.len()), pieces.join(", ")),
        form: Form::Owned,
        text: true,
    }
}

fn binary_op(op: &str) -> Option<&'static str> {
    let symbol = match op {
        operators::ADD => "+",
        operators::SUBSTRACT => "-",
        operators::MULTIPLY => "*",
        operators::DIVIDE => "/",
        operators::MODULO => "%",
        operators::EQUALS => "==",
        operators::NOT_EQUALS => "!=",
        operators::LESS => "<",
        operators::LESS_EQUALS => "<=",
        operators::GREATER => ">",
        operators::GREATER_EQUALS => ">=",
        _ => return None,
    };
    Some(symbol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn members() -> HashMap<String, TypeRef> {
        [
            ("age", TypeRef::Scalar(ScalarKind::Int)),
            ("first", TypeRef::Scalar(ScalarKind::String)),
            ("last", TypeRef::Scalar(ScalarKind::String)),
            ("verified", TypeRef::Scalar(ScalarKind::Bool)),
            (
                "tags",
                TypeRef::Collection {
                    shape: crate::typeref::CollectionShape::List,
                    element: Box::new(TypeRef::Scalar(ScalarKind::String)),
                },
            ),
        ]
        .into_iter()
        .map(|(name, ty)| (name.to_string(), ty))
        .collect()
    }

    #[test]
    fn test_is_valid() {
        assert!(CelCompiler::is_valid("age >= 18 && verified"));
        assert!(!CelCompiler::is_valid("age >= && )"));
        assert!(matches!(
            CelCompiler::check("age >= && )"),
            Err(Error::CelParse(_))
        ));
    }

    #[test]
    fn test_eval_simple() {
        let mut vars = HashMap::new();
        vars.insert("x".to_string(), Value::Int(10));
        assert!(CelCompiler::eval_bool("x > 5", &vars).unwrap());
    }

    #[test]
    fn test_eval_all_is_conjunction() {
        let mut vars = HashMap::new();
        vars.insert("age".to_string(), Value::Int(30));
        vars.insert("verified".to_string(), Value::Bool(false));
        let predicates = vec!["age > 18".to_string(), "verified".to_string()];
        assert!(!CelCompiler::eval_all(&predicates, &vars).unwrap());
        vars.insert("verified".to_string(), Value::Bool(true));
        assert!(CelCompiler::eval_all(&predicates, &vars).unwrap());
        assert!(CelCompiler::eval_all(&[], &vars).unwrap());
    }

    #[test]
    fn test_eval_non_bool_predicate_errors() {
        let mut vars = HashMap::new();
        vars.insert("x".to_string(), Value::Int(1));
        assert!(CelCompiler::eval_bool("x + 1", &vars).is_err());
    }

    #[test]
    fn test_identifiers() {
        let ids =
            CelCompiler::identifiers("first + ' ' + last.trim() && size(tags) > 0 && source.age > 1")
                .unwrap();
        assert_eq!(ids, vec!["first", "last", "tags", "source"]);
    }

    #[test]
    fn test_identifiers_skip_bound_variables() {
        let ids = CelCompiler::identifiers("tags.exists(t, t == first)").unwrap();
        assert!(ids.contains(&"tags".to_string()));
        assert!(ids.contains(&"first".to_string()));
        assert!(!ids.contains(&"t".to_string()));
    }

    #[rstest]
    #[case("age >= 18 && verified", "((source.age >= 18) && source.verified)")]
    #[case("size(tags) > 1 ? true : false", "if ((source.tags.len() as i64) > 1) { true } else { false }")]
    #[case("first + '!'", "format!(\"{}{}\", source.first, \"!\")")]
    #[case("first + ' ' + last", "format!(\"{}{}\", format!(\"{}{}\", source.first, \" \"), source.last)")]
    #[case("first", "source.first.clone()")]
    #[case("'fixed'", "\"fixed\".to_string()")]
    #[case("age", "source.age")]
    #[case("age > 1 ? first : 'minor'", "if (source.age > 1) { source.first.clone() } else { \"minor\".to_string() }")]
    #[case("first == 'bob'", "(source.first == \"bob\")")]
    #[case("source.age * 2", "(source.age * 2)")]
    #[case("first.startsWith('a')", "source.first.starts_with(\"a\")")]
    fn test_to_rust(#[case] cel: &str, #[case] rust: &str) {
        assert_eq!(CelCompiler::to_rust(cel, &members(), "source").unwrap(), rust);
    }

    #[test]
    fn test_to_rust_output_parses() {
        for cel in [
            "first + ' ' + last",
            "size(tags) > 1 ? 'many' : first",
            "!verified || age in [1, 2, 3]",
        ] {
            let rust = CelCompiler::to_rust(cel, &members(), "source").unwrap();
            assert!(syn::parse_str::<syn::Expr>(&rust).is_ok(), "{}", rust);
        }
    }

    #[test]
    fn test_macro_has_no_rendering() {
        assert!(CelCompiler::to_rust("tags.all(t, t != '')", &members(), "source").is_err());
    }
}
