//! Dynamic object graph
//!
//! Objects are shared, identity-bearing records, so a graph may contain the
//! same instance twice or a cycle. Equality and `Debug` both terminate on
//! cyclic graphs.

use crate::cel::CelValue;
use crate::error::{Error, MappingError, Result};
use crate::model::{GenerationModel, SourceShapes};
use crate::schema::EnumDecl;
use crate::typeref::{CollectionShape, ScalarKind, TypeRef};
use cel_interpreter::objects::{Key, Map};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Shared handle to a record
pub type ObjectRef = Rc<RefCell<Record>>;

/// Identity of an object instance
pub type ObjectId = usize;

/// Field storage of one object
#[derive(Clone, Default)]
pub struct Record {
    pub type_name: String,
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> Value {
        self.fields.get(field).cloned().unwrap_or(Value::Null)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_record(f, self, DEBUG_DEPTH)
    }
}

/// A dynamic value
#[derive(Clone)]
pub enum Value {
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
    List {
        shape: CollectionShape,
        items: Vec<Value>,
    },
    Object(ObjectRef),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// New object from field pairs
    pub fn object<I, K>(type_name: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut record = Record::new(type_name);
        for (name, value) in fields {
            record.set(name, value);
        }
        Value::Object(Rc::new(RefCell::new(record)))
    }

    pub fn list(shape: CollectionShape, items: Vec<Value>) -> Self {
        Value::List { shape, items }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn identity(&self) -> Option<ObjectId> {
        self.as_object().map(|obj| Rc::as_ptr(obj) as ObjectId)
    }

    /// Field of an object; `Null` for anything else
    pub fn get(&self, field: &str) -> Value {
        match self {
            Value::Object(obj) => obj.borrow().get(field),
            _ => Value::Null,
        }
    }

    /// Set a field on an object; no-op for anything else
    pub fn set(&self, field: &str, value: Value) {
        if let Value::Object(obj) = self {
            obj.borrow_mut().set(field, value);
        }
    }

    pub fn items(&self) -> Option<&[Value]> {
        match self {
            Value::List { items, .. } => Some(items),
            _ => None,
        }
    }

    pub fn kind(&self) -> String {
        match self {
            Value::Null => "null".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::String(_) => "string".into(),
            Value::Enum { type_name, .. } => type_name.clone(),
            Value::List { shape, .. } => shape.keyword().to_string(),
            Value::Object(obj) => obj.borrow().type_name.clone(),
        }
    }

    /// Shallow check that the value fits a type (objects are not inspected)
    pub fn conforms(&self, ty: &TypeRef) -> bool {
        match (self, ty.non_null()) {
            (Value::Null, _) => ty.is_nullable(),
            (Value::Bool(_), TypeRef::Scalar(ScalarKind::Bool))
            | (Value::Int(_), TypeRef::Scalar(ScalarKind::Int))
            | (Value::Float(_), TypeRef::Scalar(ScalarKind::Float))
            | (Value::String(_), TypeRef::Scalar(ScalarKind::String)) => true,
            (Value::Enum { type_name, .. }, TypeRef::Named(name)) => type_name == name,
            (Value::Object(_), TypeRef::Named(_)) => true,
            (Value::List { .. }, TypeRef::Collection { .. }) => true,
            _ => false,
        }
    }

    /// The default value of a type
    ///
    /// Nullable types default to null, collections to an empty collection of
    /// their shape, enums to the first variant and named types to an
    /// instance whose members are all defaults. A type that refers back to
    /// one already being built defaults to null.
    pub fn default_for(ty: &TypeRef, types: &dyn TypeLookup) -> Value {
        let mut building = Vec::new();
        default_value(ty, types, &mut building)
    }

    /// Build a value from JSON, guided by the declared type
    ///
    /// Missing object keys take the member's default; an explicit `null` is
    /// kept as null whatever the declared type.
    pub fn from_json(json: &serde_json::Value, ty: &TypeRef, types: &dyn TypeLookup) -> Result<Value> {
        from_json_at(json, ty, types, "$")
    }

    /// JSON form; enums become their variant name and a reference back to an
    /// object already being written becomes null
    pub fn to_json(&self) -> serde_json::Value {
        let mut stack = Vec::new();
        to_json_inner(self, &mut stack)
    }

    /// CEL form; objects become maps of their fields
    pub fn to_cel(&self) -> CelValue {
        CelConverter::default().convert(self)
    }

    /// Convert a CEL result to a value of the given type
    pub fn from_cel(
        value: &CelValue,
        ty: &TypeRef,
        types: &dyn TypeLookup,
    ) -> std::result::Result<Value, String> {
        match (value, ty.non_null()) {
            (CelValue::Null, _) => Ok(Value::Null),
            (CelValue::Bool(b), _) => Ok(Value::Bool(*b)),
            (CelValue::Int(i), TypeRef::Scalar(ScalarKind::Float)) => Ok(Value::Float(*i as f64)),
            (CelValue::Int(i), _) => Ok(Value::Int(*i)),
            (CelValue::UInt(u), _) => Ok(Value::Int(*u as i64)),
            (CelValue::Float(x), _) => Ok(Value::Float(*x)),
            (CelValue::String(s), TypeRef::Named(name)) => match types.enum_decl(name) {
                Some(en) => enum_variant(en, s.as_str()).ok_or_else(|| {
                    format!("'{}' is not a variant of {}", s, name)
                }),
                None => Ok(Value::String(s.to_string())),
            },
            (CelValue::String(s), _) => Ok(Value::String(s.to_string())),
            (CelValue::List(items), other) => {
                let element = ty.element().cloned().unwrap_or_else(|| other.clone());
                let items = items
                    .iter()
                    .map(|item| Value::from_cel(item, &element, types))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(Value::List {
                    shape: ty.collection_shape().unwrap_or_default(),
                    items,
                })
            }
            (other, _) => Err(format!("unsupported expression result {:?}", other)),
        }
    }
}

/// Enum value for a variant name
pub fn enum_variant(en: &EnumDecl, variant: &str) -> Option<Value> {
    en.variants
        .iter()
        .position(|v| v == variant)
        .map(|ordinal| Value::Enum {
            type_name: en.name.clone(),
            variant: variant.to_string(),
            ordinal: ordinal as i64,
        })
}

/// Enum value for an ordinal
pub fn enum_ordinal(en: &EnumDecl, ordinal: i64) -> Option<Value> {
    usize::try_from(ordinal)
        .ok()
        .and_then(|i| en.variants.get(i))
        .map(|variant| Value::Enum {
            type_name: en.name.clone(),
            variant: variant.clone(),
            ordinal,
        })
}

/// Member layout of named types
pub trait TypeLookup {
    /// Members of a named object type, in declaration order
    fn fields(&self, type_name: &str) -> Option<Vec<(String, TypeRef)>>;

    fn enum_decl(&self, name: &str) -> Option<&EnumDecl>;
}

impl TypeLookup for SourceShapes {
    fn fields(&self, type_name: &str) -> Option<Vec<(String, TypeRef)>> {
        self.members(type_name).map(|members| {
            members
                .iter()
                .map(|m| (m.name.clone(), m.declared_type.clone()))
                .collect()
        })
    }

    fn enum_decl(&self, name: &str) -> Option<&EnumDecl> {
        self.enums.get(name)
    }
}

/// Facet-side view of a model: facet names resolve to facet shapes, other
/// names fall back to source shapes
pub struct FacetTypes<'a>(pub &'a GenerationModel);

impl TypeLookup for FacetTypes<'_> {
    fn fields(&self, type_name: &str) -> Option<Vec<(String, TypeRef)>> {
        match self.0.facet(type_name) {
            Some(shape) => Some(
                shape
                    .members
                    .iter()
                    .map(|m| (m.name.clone(), m.facet_type.clone()))
                    .collect(),
            ),
            None => self.0.sources.fields(type_name),
        }
    }

    fn enum_decl(&self, name: &str) -> Option<&EnumDecl> {
        self.0.sources.enums.get(name)
    }
}

fn default_value(ty: &TypeRef, types: &dyn TypeLookup, building: &mut Vec<String>) -> Value {
    match ty {
        TypeRef::Nullable(_) => Value::Null,
        TypeRef::Collection { shape, .. } => Value::List {
            shape: *shape,
            items: Vec::new(),
        },
        TypeRef::Scalar(ScalarKind::Bool) => Value::Bool(false),
        TypeRef::Scalar(ScalarKind::Int) => Value::Int(0),
        TypeRef::Scalar(ScalarKind::Float) => Value::Float(0.0),
        TypeRef::Scalar(ScalarKind::String) => Value::String(String::new()),
        TypeRef::Named(name) => {
            if let Some(en) = types.enum_decl(name) {
                return enum_ordinal(en, 0).unwrap_or(Value::Null);
            }
            if building.contains(name) {
                return Value::Null;
            }
            let Some(fields) = types.fields(name) else {
                return Value::Null;
            };
            building.push(name.clone());
            let mut record = Record::new(name.clone());
            for (field, field_ty) in fields {
                let value = default_value(&field_ty, types, building);
                record.set(field, value);
            }
            building.pop();
            Value::Object(Rc::new(RefCell::new(record)))
        }
    }
}

fn mismatch(at: &str, expected: &TypeRef, found: &serde_json::Value) -> Error {
    Error::Mapping(MappingError::TypeMismatch {
        member: at.to_string(),
        expected: expected.to_string(),
        found: found.to_string(),
    })
}

fn from_json_at(
    json: &serde_json::Value,
    ty: &TypeRef,
    types: &dyn TypeLookup,
    at: &str,
) -> Result<Value> {
    use serde_json::Value as Json;

    if json.is_null() {
        return Ok(Value::Null);
    }
    match ty.non_null() {
        TypeRef::Scalar(ScalarKind::Bool) => json
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| mismatch(at, ty, json)),
        TypeRef::Scalar(ScalarKind::Int) => json
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| mismatch(at, ty, json)),
        TypeRef::Scalar(ScalarKind::Float) => json
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| mismatch(at, ty, json)),
        TypeRef::Scalar(ScalarKind::String) => json
            .as_str()
            .map(Value::string)
            .ok_or_else(|| mismatch(at, ty, json)),
        TypeRef::Collection { shape, element } => {
            let Json::Array(items) = json else {
                return Err(mismatch(at, ty, json));
            };
            let items = items
                .iter()
                .enumerate()
                .map(|(i, item)| from_json_at(item, element, types, &format!("{}[{}]", at, i)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::List {
                shape: *shape,
                items,
            })
        }
        TypeRef::Named(name) => {
            if let Some(en) = types.enum_decl(name) {
                let found = match json {
                    Json::String(s) => enum_variant(en, s),
                    Json::Number(n) => n.as_i64().and_then(|i| enum_ordinal(en, i)),
                    _ => None,
                };
                return found.ok_or_else(|| mismatch(at, ty, json));
            }
            let fields = types
                .fields(name)
                .ok_or_else(|| Error::Other(format!("{}: unknown type '{}'", at, name)))?;
            let Json::Object(map) = json else {
                return Err(mismatch(at, ty, json));
            };
            let mut record = Record::new(name.clone());
            for (field, field_ty) in fields {
                let value = match map.get(&field) {
                    Some(inner) => {
                        from_json_at(inner, &field_ty, types, &format!("{}.{}", at, field))?
                    }
                    None => default_value(&field_ty, types, &mut vec![name.clone()]),
                };
                record.set(field, value);
            }
            Ok(Value::Object(Rc::new(RefCell::new(record))))
        }
        TypeRef::Nullable(_) => Ok(Value::Null),
    }
}

fn to_json_inner(value: &Value, stack: &mut Vec<ObjectId>) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(x) => Json::from(*x),
        Value::String(s) => Json::String(s.clone()),
        Value::Enum { variant, .. } => Json::String(variant.clone()),
        Value::List { items, .. } => {
            Json::Array(items.iter().map(|item| to_json_inner(item, stack)).collect())
        }
        Value::Object(obj) => {
            let id = Rc::as_ptr(obj) as ObjectId;
            if stack.contains(&id) {
                return Json::Null;
            }
            stack.push(id);
            let map = obj
                .borrow()
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), to_json_inner(v, stack)))
                .collect();
            stack.pop();
            Json::Object(map)
        }
    }
}

/// Converts values to CEL, each object instance once
///
/// A shared object converts to the same map wherever it is reached. A
/// reference back to an object still being converted becomes null.
#[derive(Default)]
pub struct CelConverter {
    done: HashMap<ObjectId, CelValue>,
    in_progress: HashSet<ObjectId>,
}

impl CelConverter {
    pub fn convert(&mut self, value: &Value) -> CelValue {
        match value {
            Value::Null => CelValue::Null,
            Value::Bool(b) => CelValue::Bool(*b),
            Value::Int(i) => CelValue::Int(*i),
            Value::Float(x) => CelValue::Float(*x),
            Value::String(s) => CelValue::String(Arc::new(s.clone())),
            Value::Enum { variant, .. } => CelValue::String(Arc::new(variant.clone())),
            Value::List { items, .. } => CelValue::List(Arc::new(
                items.iter().map(|item| self.convert(item)).collect(),
            )),
            Value::Object(obj) => {
                let id = Rc::as_ptr(obj) as ObjectId;
                if let Some(converted) = self.done.get(&id) {
                    return converted.clone();
                }
                if !self.in_progress.insert(id) {
                    return CelValue::Null;
                }
                let map: HashMap<Key, CelValue> = obj
                    .borrow()
                    .fields
                    .iter()
                    .map(|(k, v)| (Key::String(Arc::new(k.clone())), self.convert(v)))
                    .collect();
                self.in_progress.remove(&id);
                let converted = CelValue::Map(Map { map: Arc::new(map) });
                self.done.insert(id, converted.clone());
                converted
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        let mut seen = HashSet::new();
        structural_eq(self, other, &mut seen)
    }
}

fn structural_eq(a: &Value, b: &Value, seen: &mut HashSet<(ObjectId, ObjectId)>) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (
            Value::Enum {
                type_name: t1,
                variant: v1,
                ..
            },
            Value::Enum {
                type_name: t2,
                variant: v2,
                ..
            },
        ) => t1 == t2 && v1 == v2,
        (
            Value::List {
                shape: s1,
                items: i1,
            },
            Value::List {
                shape: s2,
                items: i2,
            },
        ) => {
            s1 == s2
                && i1.len() == i2.len()
                && i1.iter().zip(i2).all(|(x, y)| structural_eq(x, y, seen))
        }
        (Value::Object(x), Value::Object(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let key = (Rc::as_ptr(x) as ObjectId, Rc::as_ptr(y) as ObjectId);
            if !seen.insert(key) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.type_name == y.type_name
                && x.fields.len() == y.fields.len()
                && x.fields.iter().all(|(name, value)| {
                    y.fields
                        .get(name)
                        .is_some_and(|other| structural_eq(value, other, seen))
                })
        }
        _ => false,
    }
}

const DEBUG_DEPTH: usize = 6;

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, self, DEBUG_DEPTH)
    }
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &Value, depth: usize) -> fmt::Result {
    match value {
        Value::Null => write!(f, "null"),
        Value::Bool(b) => write!(f, "{}", b),
        Value::Int(i) => write!(f, "{}", i),
        Value::Float(x) => write!(f, "{:?}", x),
        Value::String(s) => write!(f, "{:?}", s),
        Value::Enum {
            type_name, variant, ..
        } => write!(f, "{}::{}", type_name, variant),
        Value::List { shape, items } => {
            write!(f, "{}[", shape.keyword())?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_value(f, item, depth.saturating_sub(1))?;
            }
            write!(f, "]")
        }
        Value::Object(obj) => match obj.try_borrow() {
            Ok(record) => write_record(f, &record, depth),
            Err(_) => write!(f, "<borrowed>"),
        },
    }
}

fn write_record(f: &mut fmt::Formatter<'_>, record: &Record, depth: usize) -> fmt::Result {
    if depth == 0 {
        return write!(f, "{} {{ .. }}", record.type_name);
    }
    write!(f, "{} {{ ", record.type_name)?;
    for (i, (name, value)) in record.fields.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}: ", name)?;
        write_value(f, value, depth - 1)?;
    }
    write!(f, " }}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::members::SourceMember;
    use crate::schema::MemberKind;
    use pretty_assertions::assert_eq;

    fn member(name: &str, ty: &str) -> SourceMember {
        SourceMember {
            name: name.into(),
            declared_type: TypeRef::parse(ty).unwrap(),
            is_mutable: true,
            is_required: false,
            kind: MemberKind::Property,
            declaring_type: "Node".into(),
        }
    }

    fn shapes() -> SourceShapes {
        let mut shapes = SourceShapes::default();
        shapes.types.insert(
            "Node".into(),
            vec![
                member("id", "int"),
                member("label", "string"),
                member("kind", "Kind"),
                member("next", "Node"),
                member("children", "ReadOnlyList<Node>"),
            ],
        );
        shapes.enums.insert(
            "Kind".into(),
            EnumDecl {
                name: "Kind".into(),
                variants: vec!["Leaf".into(), "Branch".into()],
            },
        );
        shapes
    }

    #[test]
    fn test_default_breaks_self_reference() {
        let value = Value::default_for(&TypeRef::named("Node"), &shapes());
        assert_eq!(value.get("id"), Value::Int(0));
        assert_eq!(value.get("label"), Value::string(""));
        assert_eq!(value.get("next"), Value::Null);
        assert_eq!(value.get("kind").kind(), "Kind");
        assert_eq!(
            value.get("children"),
            Value::list(CollectionShape::ReadOnlyList, vec![])
        );
    }

    #[test]
    fn test_from_json_fills_missing_and_keeps_null() {
        let json = serde_json::json!({"id": 1, "kind": "Branch", "next": null, "children": [{"id": 2}]});
        let value = Value::from_json(&json, &TypeRef::named("Node"), &shapes()).unwrap();
        assert_eq!(value.get("id"), Value::Int(1));
        assert_eq!(value.get("label"), Value::string(""));
        assert!(value.get("next").is_null());
        let children = value.get("children");
        assert_eq!(children.items().unwrap().len(), 1);
        assert_eq!(children.items().unwrap()[0].get("id"), Value::Int(2));
        assert_eq!(
            value.to_json(),
            serde_json::json!({
                "id": 1, "label": "", "kind": "Branch", "next": null,
                "children": [{"id": 2, "label": "", "kind": "Leaf", "next": null, "children": []}]
            })
        );
    }

    #[test]
    fn test_from_json_type_mismatch() {
        let json = serde_json::json!({"id": "one"});
        let err = Value::from_json(&json, &TypeRef::named("Node"), &shapes()).unwrap_err();
        assert!(err.to_string().contains("$.id"));
    }

    #[test]
    fn test_cyclic_equality_and_debug_terminate() {
        let a = Value::object("Node", [("id", Value::Int(1))]);
        a.set("next", a.clone());
        let b = Value::object("Node", [("id", Value::Int(1))]);
        b.set("next", b.clone());
        assert_eq!(a, b);
        assert!(format!("{:?}", a).contains("Node"));
        assert_eq!(a.to_json(), serde_json::json!({"id": 1, "next": null}));
    }

    #[test]
    fn test_cel_converts_shared_objects_once() {
        let mut node = Value::object("Node", [("id", Value::Int(0))]);
        for id in 1..64 {
            node = Value::object(
                "Node",
                [("id", Value::Int(id)), ("a", node.clone()), ("b", node)],
            );
        }

        let mut converter = CelConverter::default();
        let CelValue::Map(map) = converter.convert(&node) else {
            panic!("object should convert to a map");
        };
        assert_eq!(converter.done.len(), 64);
        assert!(matches!(
            map.map.get(&Key::String(Arc::new("a".into()))),
            Some(CelValue::Map(_))
        ));
    }

    #[test]
    fn test_cel_roundtrip_of_scalars() {
        let value = Value::object("Node", [("label", Value::string("x")), ("id", Value::Int(3))]);
        let cel = value.to_cel();
        assert!(matches!(cel, CelValue::Map(_)));
        let back = Value::from_cel(&CelValue::Int(4), &TypeRef::parse("float").unwrap(), &shapes())
            .unwrap();
        assert_eq!(back, Value::Float(4.0));
        let kind = Value::from_cel(
            &CelValue::String(Arc::new("Branch".into())),
            &TypeRef::named("Kind"),
            &shapes(),
        )
        .unwrap();
        assert_eq!(kind.kind(), "Kind");
    }
}
