//! Reverse, flatten and projection routines checked against the eager conversion

use facetgen::flatten;
use facetgen::typeref::CollectionShape;
use facetgen::{
    build_model, render_model, DefaultsConfig, Flattener, GenerationModel, Manifest, Mapper,
    MappingError, ProjectionEvaluator, RenderConfig, Value,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;

const ACCOUNTS: &str = r#"
types:
  - name: Account
    members:
      - name: id
        type: int
      - name: owner
        type: string
      - name: balance
        type: float
      - name: status
        type: Status
      - name: note
        type: string?
      - name: internal
        type: string
enums:
  - name: Status
    variants: [Open, Frozen, Closed]
facets:
  - name: AccountDto
    source: Account
    reverse: true
    exclude: [internal]
    members:
      - name: status
        enum_as: int
      - name: balance
        reversible: false
"#;

fn status(ordinal: usize) -> Value {
    let variant = ["Open", "Frozen", "Closed"][ordinal];
    Value::Enum {
        type_name: "Status".into(),
        variant: variant.into(),
        ordinal: ordinal as i64,
    }
}

fn account(id: i64, owner: &str, balance: f64, ordinal: usize, note: Option<String>) -> Value {
    Value::object(
        "Account",
        [
            ("id", Value::Int(id)),
            ("owner", Value::string(owner)),
            ("balance", Value::Float(balance)),
            ("status", status(ordinal)),
            ("note", note.map(Value::String).unwrap_or(Value::Null)),
            ("internal", Value::string("audit-7")),
        ],
    )
}

proptest! {
    #[test]
    fn test_round_trip_restores_reversible_members(
        id in any::<i64>(),
        owner in "[a-z ]{0,12}",
        balance in -1.0e9f64..1.0e9,
        ordinal in 0usize..3,
        note in prop::option::of("[a-z]{1,8}"),
    ) {
        let manifest = Manifest::from_yaml(ACCOUNTS).unwrap();
        let model = build_model(&manifest, "AccountDto", &DefaultsConfig::default()).unwrap();
        let mapper = Mapper::new(&model);
        let source = account(id, &owner, balance, ordinal, note);

        let facet = mapper.convert(&source).unwrap();
        prop_assert_eq!(facet.get("status"), Value::Int(ordinal as i64));
        prop_assert_eq!(facet.get("balance"), Value::Float(balance));

        let back = mapper.convert_back(&facet).unwrap();
        for member in ["id", "owner", "status", "note"] {
            prop_assert_eq!(back.get(member), source.get(member));
        }
        prop_assert_eq!(back.get("balance"), Value::Float(0.0));
        prop_assert_eq!(back.get("internal"), Value::string(""));
    }
}

const CUSTOMERS: &str = r#"
types:
  - name: Order
    members:
      - name: total
        type: int
      - name: sku
        type: string
  - name: Customer
    members:
      - name: name
        type: string
      - name: region
        type: string
      - name: orders
        type: List<Order>
facets:
  - name: CustomerDto
    source: Customer
    nested:
      - { source: Order, facet: OrderDto }
    flatten:
      - { name: CustomerOrderRow, collection: orders }
  - name: OrderDto
    source: Order
"#;

fn customer_model() -> GenerationModel {
    let manifest = Manifest::from_yaml(CUSTOMERS).unwrap();
    build_model(&manifest, "CustomerDto", &DefaultsConfig::default()).unwrap()
}

proptest! {
    #[test]
    fn test_one_row_per_collection_element(
        name in "[a-z]{1,8}",
        orders in prop::collection::vec((0i64..1000, "[A-Z]{3}"), 0..20),
        repeats in prop::collection::vec(any::<prop::sample::Index>(), 0..4),
    ) {
        let model = customer_model();
        let plans = flatten::plans(&model).unwrap();
        let mut items: Vec<Value> = orders
            .iter()
            .map(|(total, sku)| {
                Value::object("Order", [("total", Value::Int(*total)), ("sku", Value::string(sku.as_str()))])
            })
            .collect();
        let mut expected = orders.clone();
        if !orders.is_empty() {
            for index in &repeats {
                let i = index.index(orders.len());
                items.push(items[i].clone());
                expected.push(orders[i].clone());
            }
        }
        let source = Value::object(
            "Customer",
            [
                ("name", Value::string(name.as_str())),
                ("region", Value::string("EU")),
                ("orders", Value::list(CollectionShape::List, items)),
            ],
        );

        let rows = Flattener::new(&model).rows(&plans[0], &source).unwrap();

        prop_assert_eq!(rows.len(), expected.len());
        for (row, (total, sku)) in rows.iter().zip(&expected) {
            prop_assert_eq!(row.get("name"), Some(&Value::string(name.as_str())));
            prop_assert_eq!(row.get("region"), Some(&Value::string("EU")));
            prop_assert_eq!(row.get("orders_total"), Some(&Value::Int(*total)));
            prop_assert_eq!(row.get("orders_sku"), Some(&Value::string(sku.as_str())));
        }
    }
}

#[test]
fn test_flatten_plan_columns() {
    let model = customer_model();
    let plans = flatten::plans(&model).unwrap();
    let names: Vec<&str> = plans[0].columns().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["name", "region", "orders_total", "orders_sku"]);
}

const PEOPLE: &str = r#"
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
    max_depth: MAX_DEPTH
    nested:
      - { source: Person, facet: PersonDto }
      - { source: Address, facet: AddressDto }
    members:
      - name: status
        enum_as: string
      - name: city
        source: address.city
        type: string?
  - name: AddressDto
    source: Address
"#;

/// Name, status ordinal, optional city and friends for each person; a
/// missing friend list or friend index is a null in the graph
type PersonSeed = (String, usize, Option<String>, Option<Vec<Option<usize>>>);

fn people() -> impl Strategy<Value = Vec<PersonSeed>> {
    (1usize..6).prop_flat_map(|n| {
        prop::collection::vec(
            (
                "[a-z]{0,6}",
                0usize..2,
                prop::option::of("[A-Z][a-z]{0,5}"),
                prop::option::weighted(
                    0.9,
                    prop::collection::vec(prop::option::weighted(0.9, 0..n), 0..4),
                ),
            ),
            n,
        )
    })
}

fn build_people(seeds: &[PersonSeed]) -> Vec<Value> {
    let persons: Vec<Value> = seeds
        .iter()
        .map(|(name, ordinal, city, _)| {
            let address = match city {
                Some(city) => Value::object("Address", [("city", Value::string(city.as_str()))]),
                None => Value::Null,
            };
            Value::object(
                "Person",
                [
                    ("name", Value::string(name.as_str())),
                    (
                        "status",
                        Value::Enum {
                            type_name: "Status".into(),
                            variant: ["Active", "Inactive"][*ordinal].into(),
                            ordinal: *ordinal as i64,
                        },
                    ),
                    ("address", address),
                    ("friends", Value::list(CollectionShape::List, vec![])),
                ],
            )
        })
        .collect();
    for (person, (_, _, _, friends)) in persons.iter().zip(seeds) {
        let friends = match friends {
            Some(friends) => Value::list(
                CollectionShape::List,
                friends
                    .iter()
                    .map(|i| i.map_or(Value::Null, |i| persons[i].clone()))
                    .collect(),
            ),
            None => Value::Null,
        };
        person.set("friends", friends);
    }
    persons
}

proptest! {
    #[test]
    fn test_projection_matches_eager(seeds in people(), max_depth in 0u32..4) {
        let yaml = PEOPLE.replace("MAX_DEPTH", &max_depth.to_string());
        let manifest = Manifest::from_yaml(&yaml).unwrap();
        let model = build_model(&manifest, "PersonDto", &DefaultsConfig::default()).unwrap();
        let persons = build_people(&seeds);

        let eager = Mapper::new(&model).convert(&persons[0]);
        let projected = ProjectionEvaluator::new(&model).evaluate(&persons[0]);
        prop_assert_eq!(projected, eager);
    }
}

const WAREHOUSE: &str = r#"
types:
  - name: Line
    members:
      - name: qty
        type: int
  - name: Order
    members:
      - name: sku
        type: string
      - name: lines
        type: List<Line>
  - name: Customer
    members:
      - name: name
        type: string
      - name: orders
        type: List<Order>
facets:
  - name: CustomerDto
    source: Customer
    max_depth: 1
    nested:
      - { source: Order, facet: OrderDto }
  - name: OrderDto
    source: Order
    nested:
      - { source: Line, facet: LineDto }
  - name: LineDto
    source: Line
"#;

fn order(sku: &str, lines: Value) -> Value {
    Value::object("Order", [("sku", Value::string(sku)), ("lines", lines)])
}

fn line(qty: i64) -> Value {
    Value::object("Line", [("qty", Value::Int(qty))])
}

fn customer(orders: Vec<Value>) -> Value {
    Value::object(
        "Customer",
        [
            ("name", Value::string("acme")),
            ("orders", Value::list(CollectionShape::List, orders)),
        ],
    )
}

#[rstest]
#[case::lines_past_bound(vec![order("a", Value::list(CollectionShape::List, vec![line(1)]))], None)]
#[case::null_lines_past_bound(vec![order("a", Value::Null)], Some(("lines", "lines")))]
#[case::null_order(vec![Value::Null], Some(("orders", "orders[0]")))]
#[case::null_after_order(
    vec![order("a", Value::list(CollectionShape::List, vec![])), Value::Null],
    Some(("orders", "orders[1]"))
)]
fn test_projection_faults_like_eager(
    #[case] orders: Vec<Value>,
    #[case] absent: Option<(&str, &str)>,
) {
    let manifest = Manifest::from_yaml(WAREHOUSE).unwrap();
    let model = build_model(&manifest, "CustomerDto", &DefaultsConfig::default()).unwrap();
    let source = customer(orders);

    let eager = Mapper::new(&model).convert(&source);
    let projected = ProjectionEvaluator::new(&model).evaluate(&source);
    assert_eq!(projected, eager);

    if let Some((member, path)) = absent {
        assert_eq!(eager.unwrap_err(), MappingError::absent(member, path));
    }
}

#[test]
fn test_emitted_code_parses() {
    let manifest = Manifest::from_yaml(&PEOPLE.replace("MAX_DEPTH", "2")).unwrap();
    let model = build_model(&manifest, "PersonDto", &DefaultsConfig::default()).unwrap();
    let code = render_model(&model, &RenderConfig::default()).unwrap();

    assert!(code.contains("pub const MAX_DEPTH: u32 = 2;"));
    assert!(syn::parse_file(&code).is_ok());

    let model = customer_model();
    let code = render_model(&model, &RenderConfig::default()).unwrap();
    assert!(code.contains("pub struct CustomerOrderRow"));
    assert!(syn::parse_file(&code).is_ok());
}

#[test]
fn test_truncated_member_of_wrong_kind_is_mismatch() {
    let manifest = Manifest::from_yaml(WAREHOUSE).unwrap();
    let model = build_model(&manifest, "CustomerDto", &DefaultsConfig::default()).unwrap();
    let source = customer(vec![order("a", Value::Int(3))]);

    let eager = Mapper::new(&model).convert(&source).unwrap_err();
    let projected = ProjectionEvaluator::new(&model).evaluate(&source).unwrap_err();
    for fault in [&eager, &projected] {
        assert!(matches!(fault, MappingError::TypeMismatch { .. }), "{}", fault);
        assert_eq!(fault.member(), Some("lines"));
    }
}
