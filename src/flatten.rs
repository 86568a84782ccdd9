//! Flatten synthesizer
//!
//! A flatten plan joins the root facet's scalar members with each element of
//! one collection member. Single-valued nested facets are widened into
//! prefixed columns (`address_city`) on both sides; widening stops at a facet
//! already being widened. Root columns come from the eager conversion. Each
//! element of the source collection is converted on its own at collection
//! depth, so an instance listed twice still yields two rows.

use crate::error::{Error, MappingError, Result};
use crate::model::{FacetShape, GenerationModel, ResolvedMember};
use crate::runtime::{Admission, HookRegistry, Mapper, Value};
use crate::select::MemberOrigin;
use crate::schema::FlattenDecl;
use crate::typeref::TypeRef;
use serde::Serialize;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// One output column: a facet value reached by a member path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    /// Member path from the root facet (or the element); empty for a scalar
    /// element column
    pub path: Vec<String>,
    /// Nullable when any member on the path is
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlattenPlan {
    /// Row type name
    pub name: String,
    pub facet: String,
    pub collection: String,
    /// Facet bound to the collection's elements; `None` for scalar elements
    pub element_facet: Option<String>,
    pub root_columns: Vec<Column>,
    pub element_columns: Vec<Column>,
}

impl FlattenPlan {
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.root_columns.iter().chain(self.element_columns.iter())
    }
}

/// Plan one flatten declaration against the model's root facet
pub fn plan(model: &GenerationModel, decl: &FlattenDecl) -> Result<FlattenPlan> {
    let root = &model.root;
    let member = root.member(&decl.collection).ok_or_else(|| {
        Error::declaration(
            &root.name,
            format!("flatten '{}' names unknown member '{}'", decl.name, decl.collection),
        )
    })?;
    let element = member.facet_type.element().ok_or_else(|| {
        Error::declaration(
            &root.name,
            format!("flatten '{}': '{}' is not a collection", decl.name, decl.collection),
        )
    })?;

    let mut stack = vec![root.name.clone()];
    let mut root_columns = Vec::new();
    widen(model, root, "", &[], false, &mut stack, &mut root_columns, Some(&decl.collection));

    let mut element_columns = Vec::new();
    let element_facet = member.nested.as_ref().map(|b| b.bound_facet.clone());
    match &element_facet {
        Some(facet) => {
            let shape = model.require_facet(facet)?;
            stack.push(facet.clone());
            widen(
                model,
                shape,
                &format!("{}_", decl.collection),
                &[],
                element.is_nullable(),
                &mut stack,
                &mut element_columns,
                None,
            );
        }
        None if is_flat(model, element) => element_columns.push(Column {
            name: decl.collection.clone(),
            path: Vec::new(),
            ty: element.clone(),
        }),
        None => {
            return Err(Error::declaration(
                &root.name,
                format!(
                    "flatten '{}': elements of '{}' are {}, neither scalar nor a facet",
                    decl.name, decl.collection, element
                ),
            ))
        }
    }

    let duplicate = {
        let mut names: Vec<&str> = root_columns
            .iter()
            .chain(element_columns.iter())
            .map(|c| c.name.as_str())
            .collect();
        names.sort_unstable();
        names.windows(2).find(|w| w[0] == w[1]).map(|w| w[0].to_string())
    };
    if let Some(name) = duplicate {
        return Err(Error::declaration(
            &root.name,
            format!("flatten '{}' produces column '{}' twice", decl.name, name),
        ));
    }

    Ok(FlattenPlan {
        name: decl.name.clone(),
        facet: root.name.clone(),
        collection: decl.collection.clone(),
        element_facet,
        root_columns,
        element_columns,
    })
}

/// Plans for every flatten declaration of the model
pub fn plans(model: &GenerationModel) -> Result<Vec<FlattenPlan>> {
    model.flatten.iter().map(|decl| plan(model, decl)).collect()
}

fn is_flat(model: &GenerationModel, ty: &TypeRef) -> bool {
    match ty.non_null() {
        TypeRef::Scalar(_) => true,
        TypeRef::Named(name) => model.is_enum(name),
        _ => false,
    }
}

#[allow(clippy::too_many_arguments)]
fn widen(
    model: &GenerationModel,
    facet: &FacetShape,
    prefix: &str,
    path: &[String],
    through_nullable: bool,
    stack: &mut Vec<String>,
    out: &mut Vec<Column>,
    skip: Option<&str>,
) {
    for member in &facet.members {
        if skip == Some(member.name.as_str()) || member.facet_type.is_collection() {
            continue;
        }
        let mut member_path = path.to_vec();
        member_path.push(member.name.clone());

        if let Some(binding) = &member.nested {
            if stack.contains(&binding.bound_facet) {
                debug!(member = %member.name, facet = %binding.bound_facet, "flatten stops widening at cycle");
                continue;
            }
            let Some(shape) = model.facet(&binding.bound_facet) else {
                continue;
            };
            stack.push(binding.bound_facet.clone());
            widen(
                model,
                shape,
                &format!("{}{}_", prefix, member.name),
                &member_path,
                through_nullable || member.facet_type.is_nullable(),
                stack,
                out,
                None,
            );
            stack.pop();
        } else if is_flat(model, &member.facet_type) {
            out.push(column(member, prefix, member_path, through_nullable));
        }
    }
}

fn column(member: &ResolvedMember, prefix: &str, path: Vec<String>, through_nullable: bool) -> Column {
    let ty = if through_nullable && !member.facet_type.is_nullable() {
        TypeRef::nullable(member.facet_type.clone())
    } else {
        member.facet_type.clone()
    };
    Column {
        name: format!("{}{}", prefix, member.name),
        path,
        ty,
    }
}

/// One flattened row, columns in plan order
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<(String, Value)>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .values
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Evaluates flatten plans over source values
pub struct Flattener<'m> {
    mapper: Mapper<'m>,
}

impl<'m> Flattener<'m> {
    pub fn new(model: &'m GenerationModel) -> Self {
        Self {
            mapper: Mapper::new(model),
        }
    }

    pub fn with_hooks(model: &'m GenerationModel, hooks: HookRegistry) -> Self {
        Self {
            mapper: Mapper::with_hooks(model, hooks),
        }
    }

    /// One row per element of the plan's collection; a null source or an
    /// absent or empty collection gives no rows
    pub fn rows(&self, plan: &FlattenPlan, source: &Value) -> std::result::Result<Vec<Row>, MappingError> {
        let facet = self.mapper.convert(source)?;
        if facet.is_null() {
            return Ok(Vec::new());
        }
        let root_values: Vec<(String, Value)> = plan
            .root_columns
            .iter()
            .map(|column| (column.name.clone(), read(&facet, &column.path)))
            .collect();

        let collection = facet.get(&plan.collection);
        let Some(converted) = collection.items() else {
            return Ok(Vec::new());
        };
        let elements = match (&plan.element_facet, self.source_elements(plan, source)) {
            (Some(element_facet), Some(items)) if !converted.is_empty() => items
                .iter()
                .map(|item| self.convert_element(element_facet, source, item))
                .collect::<std::result::Result<Vec<_>, _>>()?,
            _ => converted.to_vec(),
        };
        Ok(elements
            .iter()
            .map(|element| {
                let mut values = root_values.clone();
                values.extend(
                    plan.element_columns
                        .iter()
                        .map(|column| (column.name.clone(), read(element, &column.path))),
                );
                Row { values }
            })
            .collect())
    }
}

impl Flattener<'_> {
    /// Elements of the collection as read from the source; `None` for a
    /// computed collection
    fn source_elements(&self, plan: &FlattenPlan, source: &Value) -> Option<Vec<Value>> {
        let member = self.mapper.model().root.member(&plan.collection)?;
        let path = match &member.origin {
            MemberOrigin::Direct { member } => vec![member.clone()],
            MemberOrigin::Path { segments } => segments.clone(),
            MemberOrigin::Computed { .. } => return None,
        };
        read(source, &path).items().map(<[Value]>::to_vec)
    }

    /// Convert one element with a state of its own, one level below the root
    fn convert_element(
        &self,
        facet: &str,
        root: &Value,
        element: &Value,
    ) -> std::result::Result<Value, MappingError> {
        let Value::Object(obj) = element else {
            return Ok(Value::Null);
        };
        let mut state = self.mapper.new_state();
        if let Some(id) = root.identity() {
            state.visit_root(id);
        }
        match state.admit(Rc::as_ptr(obj) as usize) {
            Admission::Expand => self.mapper.convert_with(facet, obj, &mut state),
            outcome => {
                debug!(facet, ?outcome, "flatten element left empty");
                Ok(Value::Null)
            }
        }
    }
}

/// Follow a member path; null anywhere gives null
fn read(value: &Value, path: &[String]) -> Value {
    let mut current = value.clone();
    for segment in path {
        if current.as_object().is_none() {
            return Value::Null;
        }
        current = current.get(segment);
    }
    current
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
  - name: Country
    members:
      - name: code
        type: string
  - name: Address
    members:
      - name: city
        type: string
      - name: country
        type: Country
  - name: Order
    members:
      - name: total
        type: float
      - name: tags
        type: List<string>
  - name: Customer
    members:
      - name: name
        type: string
      - name: address
        type: Address?
      - name: orders
        type: List<Order>
      - name: tags
        type: List<string>
facets:
  - name: CustomerDto
    source: Customer
    nested:
      - { source: Address, facet: AddressDto }
      - { source: Order, facet: OrderDto }
    flatten:
      - { name: CustomerOrderRow, collection: orders }
      - { name: CustomerTagRow, collection: tags }
  - name: AddressDto
    source: Address
    nested:
      - { source: Country, facet: CountryDto }
  - name: CountryDto
    source: Country
  - name: OrderDto
    source: Order
"#;

    fn model() -> GenerationModel {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        build_model(&manifest, "CustomerDto", &DefaultsConfig::default()).unwrap()
    }

    fn customer(orders: Vec<Value>) -> Value {
        let country = Value::object("Country", [("code", Value::string("FR"))]);
        let address = Value::object(
            "Address",
            [("city", Value::string("Lyon")), ("country", country)],
        );
        Value::object(
            "Customer",
            [
                ("name", Value::string("ada")),
                ("address", address),
                ("orders", Value::list(CollectionShape::List, orders)),
                (
                    "tags",
                    Value::list(CollectionShape::List, vec![Value::string("vip")]),
                ),
            ],
        )
    }

    fn order(total: f64) -> Value {
        Value::object(
            "Order",
            [
                ("total", Value::Float(total)),
                ("tags", Value::list(CollectionShape::List, vec![])),
            ],
        )
    }

    #[test]
    fn test_plan_widens_single_nested() {
        let model = model();
        let plans = plans(&model).unwrap();
        let orders = &plans[0];
        let names: Vec<_> = orders.columns().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["name", "address_city", "address_country_code", "orders_total"]
        );
        assert_eq!(orders.root_columns[1].ty.to_string(), "string?");
        assert_eq!(orders.element_facet.as_deref(), Some("OrderDto"));

        let tags = &plans[1];
        assert_eq!(tags.element_columns[0].name, "tags");
        assert!(tags.element_columns[0].path.is_empty());
    }

    #[test]
    fn test_one_row_per_element() {
        let model = model();
        let plans = plans(&model).unwrap();
        let flattener = Flattener::new(&model);

        let rows = flattener
            .rows(&plans[0], &customer(vec![order(1.5), order(2.5)]))
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("address_country_code"), Some(&Value::string("FR")));
        assert_eq!(rows[0].get("name"), rows[1].get("name"));
        assert_eq!(rows[1].get("orders_total"), Some(&Value::Float(2.5)));

        let rows = flattener.rows(&plans[1], &customer(vec![])).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("tags"), Some(&Value::string("vip")));
    }

    #[test]
    fn test_repeated_instance_gives_a_row_each_time() {
        let model = model();
        let plans = plans(&model).unwrap();
        let shared = order(4.0);
        let source = customer(vec![shared.clone(), order(1.0), shared]);

        let rows = Flattener::new(&model).rows(&plans[0], &source).unwrap();
        let totals: Vec<_> = rows.iter().map(|r| r.get("orders_total").cloned()).collect();
        assert_eq!(
            totals,
            vec![
                Some(Value::Float(4.0)),
                Some(Value::Float(1.0)),
                Some(Value::Float(4.0))
            ]
        );
    }

    #[test]
    fn test_empty_or_null_gives_no_rows() {
        let model = model();
        let plans = plans(&model).unwrap();
        let flattener = Flattener::new(&model);
        assert!(flattener.rows(&plans[0], &customer(vec![])).unwrap().is_empty());
        assert!(flattener.rows(&plans[0], &Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_null_intermediate_column_is_null() {
        let model = model();
        let plans = plans(&model).unwrap();
        let source = customer(vec![order(3.0)]);
        source.set("address", Value::Null);
        let rows = Flattener::new(&model).rows(&plans[0], &source).unwrap();
        assert_eq!(rows[0].get("address_city"), Some(&Value::Null));
    }
}
