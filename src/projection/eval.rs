//! Projection evaluator
//!
//! Evaluates a [`Projection`] tree over a [`Value`] graph under the same
//! traversal rules as the eager interpreter: one [`TraversalState`] per
//! call, admission before expanding a nested object, one depth step per
//! collection and a first-visit check per element. `Call` nodes hand over
//! to [`Mapper::convert_with`] with the shared state.

use super::{synthesize, Expr, Literal, Projection};
use crate::error::MappingError;
use crate::model::GenerationModel;
use crate::runtime::mapper::cast_enum;
use crate::runtime::{Admission, FacetTypes, Mapper, Record, TraversalState, Value};
use crate::typeref::TypeRef;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::trace;

type EvalResult = std::result::Result<Value, MappingError>;
type Scope = HashMap<String, Value>;

pub struct ProjectionEvaluator<'m> {
    mapper: Mapper<'m>,
    projection: Projection,
}

impl<'m> ProjectionEvaluator<'m> {
    /// Evaluator for the model's synthesized root projection
    pub fn new(model: &'m GenerationModel) -> Self {
        Self::with_projection(model, synthesize(model))
    }

    pub fn with_projection(model: &'m GenerationModel, projection: Projection) -> Self {
        Self {
            mapper: Mapper::new(model),
            projection,
        }
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn evaluate(&self, source: &Value) -> EvalResult {
        let obj = match source {
            Value::Null => return Ok(Value::Null),
            Value::Object(obj) => obj,
            other => {
                return Err(MappingError::TypeMismatch {
                    member: self.projection.facet.clone(),
                    expected: self.mapper.model().source_type().to_string(),
                    found: other.kind(),
                })
            }
        };
        let mut state = self.mapper.new_state();
        state.visit_root(Rc::as_ptr(obj) as usize);
        let mut scope = Scope::new();
        scope.insert(self.projection.parameter.clone(), source.clone());
        self.eval(&self.projection.body, &scope, &mut state, &self.projection.facet, false)
    }

    /// `member` is the binding being evaluated, for fault attribution;
    /// `admitted` is set for the body of a `Select`, whose elements were
    /// already admitted by the collection step
    fn eval(
        &self,
        expr: &Expr,
        scope: &Scope,
        state: &mut TraversalState,
        member: &str,
        admitted: bool,
    ) -> EvalResult {
        match expr {
            Expr::Parameter(name) => Ok(scope.get(name).cloned().unwrap_or(Value::Null)),
            Expr::Member { target, name } => {
                let receiver = self.eval(target, scope, state, member, false)?;
                match receiver {
                    Value::Object(obj) => Ok(obj.borrow().get(name)),
                    Value::Null => Err(MappingError::absent(member, access_text(target))),
                    other => Err(MappingError::TypeMismatch {
                        member: member.to_string(),
                        expected: format!("object at '{}'", access_text(target)),
                        found: other.kind(),
                    }),
                }
            }
            Expr::Literal(literal) => Ok(self.literal(literal)),
            Expr::Init {
                facet,
                origin,
                bindings,
            } => {
                let origin = match origin {
                    Some(origin) if !admitted => origin,
                    _ => return self.build(facet, bindings, scope, state),
                };
                let value = self.eval(&origin.source, scope, state, member, false)?;
                let obj = match &value {
                    Value::Object(obj) => obj,
                    Value::Null => return Err(MappingError::absent(member, access_text(&origin.source))),
                    other => {
                        return Err(MappingError::TypeMismatch {
                            member: member.to_string(),
                            expected: facet.clone(),
                            found: other.kind(),
                        })
                    }
                };
                match state.admit(Rc::as_ptr(obj) as usize) {
                    Admission::Expand => {
                        let result = self.build(facet, bindings, scope, state);
                        state.ascend();
                        result
                    }
                    outcome => {
                        trace!(member, ?outcome, "projection left nested member at fallback");
                        Ok(self.literal(&origin.fallback))
                    }
                }
            }
            Expr::IfNull {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test, scope, state, member, false)?.is_null() {
                    self.eval(then, scope, state, member, admitted)
                } else {
                    self.eval(otherwise, scope, state, member, admitted)
                }
            }
            Expr::Select {
                source,
                parameter,
                body,
                shape,
                element_nullable,
            } => {
                let value = self.eval(source, scope, state, member, false)?;
                let items = match &value {
                    Value::List { items, .. } => items,
                    Value::Null => return Err(MappingError::absent(member, access_text(source))),
                    other => {
                        return Err(MappingError::TypeMismatch {
                            member: member.to_string(),
                            expected: format!("collection at '{}'", access_text(source)),
                            found: other.kind(),
                        })
                    }
                };
                if !state.try_descend() {
                    return Ok(Value::list(*shape, Vec::new()));
                }
                let elements = Elements {
                    items,
                    parameter,
                    body,
                    source,
                    nullable: *element_nullable,
                };
                let result = self.select(&elements, scope, state, member);
                state.ascend();
                result.map(|items| Value::list(*shape, items))
            }
            Expr::Truncated { source, fallback } => {
                let value = self.eval(source, scope, state, member, false)?;
                let fits = match fallback {
                    Literal::Empty(_) => value.items().is_some(),
                    _ => value.as_object().is_some(),
                };
                if value.is_null() {
                    Err(MappingError::absent(member, access_text(source)))
                } else if !fits {
                    Err(MappingError::TypeMismatch {
                        member: member.to_string(),
                        expected: fallback.to_string(),
                        found: value.kind(),
                    })
                } else {
                    trace!(member, "projection member past depth bound");
                    Ok(self.literal(fallback))
                }
            }
            Expr::Cast { operand, target } => {
                let value = self.eval(operand, scope, state, member, false)?;
                cast_enum(member, &value, *target)
            }
            Expr::Call {
                facet,
                argument,
                fallback,
            } => {
                let value = self.eval(argument, scope, state, member, false)?;
                let obj = match &value {
                    Value::Object(obj) => obj,
                    Value::Null if admitted => return Ok(Value::Null),
                    Value::Null => return Err(MappingError::absent(member, access_text(argument))),
                    other => {
                        return Err(MappingError::TypeMismatch {
                            member: member.to_string(),
                            expected: facet.clone(),
                            found: other.kind(),
                        })
                    }
                };
                if admitted {
                    return self.mapper.convert_with(facet, obj, state);
                }
                match state.admit(Rc::as_ptr(obj) as usize) {
                    Admission::Expand => {
                        let result = self.mapper.convert_with(facet, obj, state);
                        state.ascend();
                        result
                    }
                    _ => Ok(self.literal(fallback)),
                }
            }
        }
    }

    fn build(
        &self,
        facet: &str,
        bindings: &[super::Binding],
        scope: &Scope,
        state: &mut TraversalState,
    ) -> EvalResult {
        let mut record = Record::new(facet);
        for binding in bindings {
            let value = self.eval(&binding.value, scope, state, &binding.member, false)?;
            record.set(binding.member.clone(), value);
        }
        Ok(Value::Object(Rc::new(RefCell::new(record))))
    }

    fn select(
        &self,
        elements: &Elements<'_>,
        scope: &Scope,
        state: &mut TraversalState,
        member: &str,
    ) -> std::result::Result<Vec<Value>, MappingError> {
        let mut out = Vec::with_capacity(elements.items.len());
        for (i, item) in elements.items.iter().enumerate() {
            match item {
                Value::Null if elements.nullable => {
                    out.push(Value::Null);
                    continue;
                }
                Value::Null => {
                    return Err(MappingError::absent(
                        member,
                        format!("{}[{}]", access_text(elements.source), i),
                    ))
                }
                Value::Object(obj) if !state.first_visit(Rc::as_ptr(obj) as usize) => continue,
                _ => {}
            }
            let mut inner = scope.clone();
            inner.insert(elements.parameter.to_string(), item.clone());
            out.push(self.eval(elements.body, &inner, state, member, true)?);
        }
        Ok(out)
    }

    fn literal(&self, literal: &Literal) -> Value {
        match literal {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::Float(x) => Value::Float(*x),
            Literal::String(s) => Value::String(s.clone()),
            Literal::Enum {
                type_name,
                variant,
                ordinal,
            } => Value::Enum {
                type_name: type_name.clone(),
                variant: variant.clone(),
                ordinal: *ordinal,
            },
            Literal::Empty(shape) => Value::list(*shape, Vec::new()),
            Literal::Default(name) => Value::default_for(
                &TypeRef::Named(name.clone()),
                &FacetTypes(self.mapper.model()),
            ),
        }
    }
}

/// A collection being mapped by a `Select`
struct Elements<'e> {
    items: &'e [Value],
    parameter: &'e str,
    body: &'e Expr,
    source: &'e Expr,
    nullable: bool,
}

/// Dotted path of a member access chain, for fault messages
fn access_text(expr: &Expr) -> String {
    match expr {
        Expr::Member { target, name } => match access_text(target) {
            prefix if prefix.is_empty() => name.clone(),
            prefix => format!("{}.{}", prefix, name),
        },
        Expr::IfNull { otherwise, .. } => access_text(otherwise),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DefaultsConfig;
    use crate::model::build_model;
    use crate::schema::Manifest;
    use crate::typeref::CollectionShape;
    use pretty_assertions::assert_eq;

    const MANIFEST: &str = r#"
types:
  - name: Address
    members:
      - name: city
        type: string
  - name: Person
    members:
      - name: name
        type: string
      - name: status
        type: Status
      - name: address
        type: Address?
      - name: friends
        type: List<Person>
enums:
  - name: Status
    variants: [Active, Inactive]
facets:
  - name: PersonDto
    source: Person
    nested:
      - { source: Person, facet: PersonDto }
    members:
      - name: status
        enum_as: int
      - name: city
        source: address.city
        type: string?
"#;

    fn model() -> GenerationModel {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        build_model(&manifest, "PersonDto", &DefaultsConfig::default()).unwrap()
    }

    fn person(name: &str, address: Value) -> Value {
        Value::object(
            "Person",
            [
                ("name", Value::string(name)),
                (
                    "status",
                    Value::Enum {
                        type_name: "Status".into(),
                        variant: "Inactive".into(),
                        ordinal: 1,
                    },
                ),
                ("address", address),
                ("friends", Value::list(CollectionShape::List, vec![])),
            ],
        )
    }

    #[test]
    fn test_matches_eager_on_cycle() {
        let model = model();
        let ada = person("ada", Value::object("Address", [("city", Value::string("Paris"))]));
        let bob = person("bob", Value::Null);
        ada.set("friends", Value::list(CollectionShape::List, vec![bob.clone()]));
        bob.set("friends", Value::list(CollectionShape::List, vec![ada.clone()]));

        let eager = Mapper::new(&model).convert(&ada).unwrap();
        let projected = ProjectionEvaluator::new(&model).evaluate(&ada).unwrap();
        assert_eq!(projected, eager);

        assert_eq!(projected.get("status"), Value::Int(1));
        assert_eq!(projected.get("city"), Value::string("Paris"));
        let friends = projected.get("friends");
        let bob_dto = &friends.items().unwrap()[0];
        assert_eq!(bob_dto.get("city"), Value::Null);
        assert_eq!(bob_dto.get("friends").items().unwrap().len(), 0);
    }

    #[test]
    fn test_null_source_is_null() {
        let model = model();
        let evaluator = ProjectionEvaluator::new(&model);
        assert_eq!(evaluator.evaluate(&Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_access_text() {
        let expr = Expr::member(Expr::member(Expr::param("s"), "a"), "b");
        assert_eq!(access_text(&expr), "a.b");
    }
}
