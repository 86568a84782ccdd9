//! Interpreter for eager routines
//!
//! Executes the forward and reverse routines of a model over [`Value`]
//! graphs. Every top-level call owns a fresh [`TraversalState`].

use super::hooks::HookRegistry;
use super::state::{Admission, TraversalState};
use super::value::{enum_ordinal, enum_variant, CelConverter, FacetTypes, ObjectRef, Record, Value};
use crate::cel::{CelCompiler, CelValue};
use crate::eager::{self, Assignment, EagerPlan, Produce, Restore, Step, WriteBack};
use crate::error::MappingError;
use crate::model::GenerationModel;
use crate::schema::EnumProjection;
use crate::typeref::{CollectionShape, TypeRef};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::trace;

type MapResult<T> = std::result::Result<T, MappingError>;

pub struct Mapper<'m> {
    model: &'m GenerationModel,
    plan: EagerPlan,
    hooks: HookRegistry,
}

impl<'m> Mapper<'m> {
    pub fn new(model: &'m GenerationModel) -> Self {
        Self::with_hooks(model, HookRegistry::new())
    }

    pub fn with_hooks(model: &'m GenerationModel, hooks: HookRegistry) -> Self {
        Self {
            model,
            plan: eager::synthesize(model),
            hooks,
        }
    }

    pub fn model(&self) -> &GenerationModel {
        self.model
    }

    pub fn plan(&self) -> &EagerPlan {
        &self.plan
    }

    pub fn new_state(&self) -> TraversalState {
        TraversalState::new(self.model.max_depth, self.model.preserve_references)
    }

    /// Convert a source object into the root facet; null maps to null
    pub fn convert(&self, source: &Value) -> MapResult<Value> {
        let root = &self.model.root;
        let obj = match source {
            Value::Null => return Ok(Value::Null),
            Value::Object(obj) => obj,
            other => {
                return Err(MappingError::TypeMismatch {
                    member: root.name.clone(),
                    expected: root.source.clone(),
                    found: other.kind(),
                })
            }
        };
        let mut state = self.new_state();
        state.visit_root(Rc::as_ptr(obj) as usize);
        self.convert_with(&root.name, obj, &mut state)
    }

    /// Write a root facet back onto a new source object
    pub fn convert_back(&self, facet: &Value) -> MapResult<Value> {
        let root = &self.model.root;
        let obj = match facet {
            Value::Null => return Ok(Value::Null),
            Value::Object(obj) => obj,
            other => {
                return Err(MappingError::TypeMismatch {
                    member: root.name.clone(),
                    expected: root.name.clone(),
                    found: other.kind(),
                })
            }
        };
        let mut state = self.new_state();
        state.visit_root(Rc::as_ptr(obj) as usize);
        self.convert_back_with(&root.name, obj, &mut state)
    }

    /// Run one facet's forward routine under an existing traversal state
    pub fn convert_with(
        &self,
        facet: &str,
        source: &ObjectRef,
        state: &mut TraversalState,
    ) -> MapResult<Value> {
        let routine = self
            .plan
            .forward(facet)
            .ok_or_else(|| MappingError::UnknownFacet {
                facet: facet.to_string(),
            })?;
        let shape = self.model.require_facet(facet)?;
        let types = FacetTypes(self.model);

        let mut record = Record::new(facet);
        for member in &shape.members {
            record.set(member.name.clone(), Value::default_for(&member.facet_type, &types));
        }
        let target = Value::Object(Rc::new(RefCell::new(record)));
        let source_value = Value::Object(source.clone());
        let mut scope = CelScope::new(source);

        for step in &routine.steps {
            match step {
                Step::BeforeHook(hook) | Step::AfterHook(hook) => {
                    self.hooks.invoke(hook.path(), &source_value, &target)?;
                }
                Step::Assign(assignment) => {
                    let vars = scope.bind(assignment)?;
                    if !assignment.guard.is_empty() {
                        let holds = CelCompiler::eval_all(&assignment.guard, vars).map_err(|e| {
                            MappingError::Expression {
                                member: assignment.member.clone(),
                                expression: assignment.guard.join(" && "),
                                message: e.to_string(),
                            }
                        })?;
                        if !holds {
                            target.set(
                                &assignment.member,
                                Value::default_for(&assignment.target_type, &types),
                            );
                            continue;
                        }
                    }
                    let value = self.produce(assignment, source, vars, state)?;
                    target.set(&assignment.member, value);
                }
            }
        }

        Ok(target)
    }

    fn produce(
        &self,
        assignment: &Assignment,
        source: &ObjectRef,
        vars: &HashMap<String, CelValue>,
        state: &mut TraversalState,
    ) -> MapResult<Value> {
        if let Produce::Compute { expression } = &assignment.produce {
            let result = CelCompiler::eval(expression, vars).map_err(|e| {
                MappingError::Expression {
                    member: assignment.member.clone(),
                    expression: expression.clone(),
                    message: e.to_string(),
                }
            })?;
            return Value::from_cel(&result, &assignment.target_type, &FacetTypes(self.model))
                .map_err(|message| MappingError::Expression {
                    member: assignment.member.clone(),
                    expression: expression.clone(),
                    message,
                });
        }

        let value = read_path(assignment, source)?;
        if value.is_null() {
            return if assignment.null_yields_null {
                Ok(Value::Null)
            } else {
                Err(MappingError::absent(&assignment.member, assignment.path_text()))
            };
        }

        match &assignment.produce {
            Produce::Copy => {
                if value.conforms(&assignment.target_type) {
                    Ok(value)
                } else {
                    Err(MappingError::TypeMismatch {
                        member: assignment.member.clone(),
                        expected: assignment.target_type.to_string(),
                        found: value.kind(),
                    })
                }
            }
            Produce::EnumCast { target } => cast_enum(&assignment.member, &value, *target),
            Produce::Nested {
                facet,
                collection: None,
            } => self.nested_single(assignment, facet, &value, state),
            Produce::Nested {
                facet,
                collection: Some(shape),
            } => self.nested_collection(assignment, facet, *shape, &value, state),
            Produce::Compute { .. } => Ok(Value::Null),
        }
    }

    fn nested_single(
        &self,
        assignment: &Assignment,
        facet: &str,
        value: &Value,
        state: &mut TraversalState,
    ) -> MapResult<Value> {
        let Value::Object(obj) = value else {
            return Err(MappingError::TypeMismatch {
                member: assignment.member.clone(),
                expected: facet.to_string(),
                found: value.kind(),
            });
        };
        match state.admit(Rc::as_ptr(obj) as usize) {
            Admission::Expand => {
                let result = self.convert_with(facet, obj, state);
                state.ascend();
                result
            }
            outcome => {
                trace!(member = %assignment.member, ?outcome, "nested member left at default");
                Ok(Value::default_for(
                    &assignment.target_type,
                    &FacetTypes(self.model),
                ))
            }
        }
    }

    fn nested_collection(
        &self,
        assignment: &Assignment,
        facet: &str,
        shape: CollectionShape,
        value: &Value,
        state: &mut TraversalState,
    ) -> MapResult<Value> {
        let Some(items) = value.items() else {
            return Err(MappingError::TypeMismatch {
                member: assignment.member.clone(),
                expected: assignment.target_type.to_string(),
                found: value.kind(),
            });
        };
        if !state.try_descend() {
            trace!(member = %assignment.member, "collection past depth bound");
            return Ok(Value::list(shape, Vec::new()));
        }
        let element_nullable = assignment
            .target_type
            .element()
            .is_some_and(TypeRef::is_nullable);
        let result = self.map_elements(assignment, facet, items, element_nullable, state);
        state.ascend();
        result.map(|items| Value::list(shape, items))
    }

    fn map_elements(
        &self,
        assignment: &Assignment,
        facet: &str,
        items: &[Value],
        element_nullable: bool,
        state: &mut TraversalState,
    ) -> MapResult<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            match item {
                Value::Null if element_nullable => out.push(Value::Null),
                Value::Null => {
                    return Err(MappingError::absent(
                        &assignment.member,
                        format!("{}[{}]", assignment.path_text(), i),
                    ))
                }
                Value::Object(obj) => {
                    if state.first_visit(Rc::as_ptr(obj) as usize) {
                        out.push(self.convert_with(facet, obj, state)?);
                    }
                }
                other => {
                    return Err(MappingError::TypeMismatch {
                        member: assignment.member.clone(),
                        expected: facet.to_string(),
                        found: other.kind(),
                    })
                }
            }
        }
        Ok(out)
    }

    /// Run one facet's reverse routine under an existing traversal state
    pub fn convert_back_with(
        &self,
        facet: &str,
        facet_value: &ObjectRef,
        state: &mut TraversalState,
    ) -> MapResult<Value> {
        let routine = self
            .plan
            .reverse(facet)
            .ok_or_else(|| MappingError::ReverseUnavailable {
                facet: facet.to_string(),
            })?;
        let target = Value::default_for(&TypeRef::named(&routine.source_type), &self.model.sources);
        if !matches!(target, Value::Object(_)) {
            return Err(MappingError::UnknownFacet {
                facet: routine.source_type.clone(),
            });
        }

        for write in &routine.writes {
            let value = facet_value.borrow().get(&write.member);
            let restored = self.restore(write, value, state)?;
            target.set(&write.target, restored);
        }
        Ok(target)
    }

    fn restore(&self, write: &WriteBack, value: Value, state: &mut TraversalState) -> MapResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match &write.restore {
            Restore::Copy => Ok(value),
            Restore::EnumParse { enum_name, from } => {
                let en = self.model.sources.enum_decl(enum_name).ok_or_else(|| {
                    MappingError::TypeMismatch {
                        member: write.member.clone(),
                        expected: enum_name.clone(),
                        found: value.kind(),
                    }
                })?;
                let parsed = match (&value, from) {
                    (Value::String(s), EnumProjection::String) => enum_variant(en, s),
                    (Value::Int(i), EnumProjection::Int) => enum_ordinal(en, *i),
                    _ => None,
                };
                parsed.ok_or_else(|| MappingError::TypeMismatch {
                    member: write.member.clone(),
                    expected: enum_name.clone(),
                    found: format!("{:?}", value),
                })
            }
            Restore::Nested {
                facet,
                collection: None,
            } => {
                let Value::Object(obj) = &value else {
                    return Err(MappingError::TypeMismatch {
                        member: write.member.clone(),
                        expected: facet.clone(),
                        found: value.kind(),
                    });
                };
                match state.admit(Rc::as_ptr(obj) as usize) {
                    Admission::Expand => {
                        let result = self.convert_back_with(facet, obj, state);
                        state.ascend();
                        result
                    }
                    _ => Ok(Value::default_for(&write.target_type, &self.model.sources)),
                }
            }
            Restore::Nested {
                facet,
                collection: Some(shape),
            } => {
                let items = value.items().unwrap_or_default();
                if !state.try_descend() {
                    return Ok(Value::list(*shape, Vec::new()));
                }
                let mut out = Vec::with_capacity(items.len());
                let mut failure = None;
                for item in items {
                    match item {
                        Value::Object(obj) => {
                            if !state.first_visit(Rc::as_ptr(obj) as usize) {
                                continue;
                            }
                            match self.convert_back_with(facet, obj, state) {
                                Ok(v) => out.push(v),
                                Err(e) => {
                                    failure = Some(e);
                                    break;
                                }
                            }
                        }
                        other => out.push(other.clone()),
                    }
                }
                state.ascend();
                match failure {
                    Some(e) => Err(e),
                    None => Ok(Value::list(*shape, out)),
                }
            }
        }
    }
}

/// CEL variables of one source object: members by name plus `source` for
/// the whole object, converted when an expression first refers to them
struct CelScope<'s> {
    source: &'s ObjectRef,
    vars: HashMap<String, CelValue>,
    converter: CelConverter,
}

impl<'s> CelScope<'s> {
    fn new(source: &'s ObjectRef) -> Self {
        Self {
            source,
            vars: HashMap::new(),
            converter: CelConverter::default(),
        }
    }

    /// Variables named by the assignment's guard and computation
    fn bind(&mut self, assignment: &Assignment) -> MapResult<&HashMap<String, CelValue>> {
        let computed = match &assignment.produce {
            Produce::Compute { expression } => Some(expression),
            _ => None,
        };
        for expression in assignment.guard.iter().chain(computed) {
            let names = CelCompiler::identifiers(expression).map_err(|e| MappingError::Expression {
                member: assignment.member.clone(),
                expression: expression.clone(),
                message: e.to_string(),
            })?;
            for name in names {
                if self.vars.contains_key(&name) {
                    continue;
                }
                let value = if name == "source" {
                    Some(Value::Object(self.source.clone()))
                } else {
                    self.source.borrow().fields.get(&name).cloned()
                };
                if let Some(value) = value {
                    let converted = self.converter.convert(&value);
                    self.vars.insert(name, converted);
                }
            }
        }
        Ok(&self.vars)
    }
}

/// Walk the assignment's path; a null before the last segment is absent
/// unless the member is nullable
fn read_path(assignment: &Assignment, source: &ObjectRef) -> MapResult<Value> {
    let mut current = Value::Object(source.clone());
    for (i, segment) in assignment.path.iter().enumerate() {
        current = match &current {
            Value::Object(obj) => obj.borrow().get(segment),
            Value::Null if assignment.null_yields_null => return Ok(Value::Null),
            Value::Null => {
                return Err(MappingError::absent(
                    &assignment.member,
                    assignment.path[..i].join("."),
                ))
            }
            other => {
                return Err(MappingError::TypeMismatch {
                    member: assignment.member.clone(),
                    expected: format!("object at '{}'", assignment.path[..i].join(".")),
                    found: other.kind(),
                })
            }
        };
    }
    Ok(current)
}

pub(crate) fn cast_enum(member: &str, value: &Value, target: EnumProjection) -> MapResult<Value> {
    match (value, target) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::Enum { variant, .. }, EnumProjection::String) => Ok(Value::String(variant.clone())),
        (Value::Enum { ordinal, .. }, EnumProjection::Int) => Ok(Value::Int(*ordinal)),
        (other, _) => Err(MappingError::TypeMismatch {
            member: member.to_string(),
            expected: "enum".to_string(),
            found: other.kind(),
        }),
    }
}
