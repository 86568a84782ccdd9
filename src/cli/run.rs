//! Interpreted conversion and flatten over JSON data

use super::util::{load_config, load_model, read_json};
use facetgen::flatten;
use facetgen::runtime::FacetTypes;
use facetgen::{Flattener, GenerationModel, Mapper, Result, TypeRef, Value};
use std::path::Path;

/// Run the forward (or reverse) conversion of the root facet over JSON
pub fn convert_json(
    model: &GenerationModel,
    input: &serde_json::Value,
    reverse: bool,
) -> Result<serde_json::Value> {
    let mapper = Mapper::new(model);
    let output = if reverse {
        if !model.generate_reverse() {
            return Err(format!("facet {} has no reverse conversion", model.root.name).into());
        }
        let ty = TypeRef::named(model.root.name.as_str());
        let facet = Value::from_json(input, &ty, &FacetTypes(model))?;
        mapper.convert_back(&facet)?
    } else {
        let ty = TypeRef::named(model.source_type());
        let source = Value::from_json(input, &ty, &model.sources)?;
        mapper.convert(&source)?
    };
    Ok(output.to_json())
}

/// Rows of one flatten declaration as a JSON array
pub fn flatten_json(
    model: &GenerationModel,
    plan: &str,
    input: &serde_json::Value,
) -> Result<serde_json::Value> {
    let plans = flatten::plans(model)?;
    let plan = plans
        .iter()
        .find(|p| p.name == plan)
        .ok_or_else(|| format!("facet {} has no flatten routine '{}'", model.root.name, plan))?;

    let ty = TypeRef::named(model.source_type());
    let source = Value::from_json(input, &ty, &model.sources)?;
    let rows = Flattener::new(model).rows(plan, &source)?;
    tracing::debug!(plan = %plan.name, rows = rows.len(), "flattened");
    Ok(serde_json::Value::Array(
        rows.iter().map(|row| row.to_json()).collect(),
    ))
}

pub fn cmd_convert(
    manifest: &Path,
    facet: &str,
    input: &Path,
    reverse: bool,
    config: Option<&Path>,
) -> Result<()> {
    let config = load_config(config)?;
    let model = load_model(manifest, facet, &config)?;
    let output = convert_json(&model, &read_json(input)?, reverse)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

pub fn cmd_flatten(
    manifest: &Path,
    facet: &str,
    plan: &str,
    input: &Path,
    config: Option<&Path>,
) -> Result<()> {
    let config = load_config(config)?;
    let model = load_model(manifest, facet, &config)?;
    let output = flatten_json(&model, plan, &read_json(input)?)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use facetgen::{build_model, DefaultsConfig, Manifest};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const MANIFEST: &str = r#"
types:
  - name: Order
    members:
      - name: total
        type: int
  - name: Customer
    members:
      - name: name
        type: string
      - name: secret
        type: string
      - name: orders
        type: List<Order>
facets:
  - name: OrderDto
    source: Order
  - name: CustomerDto
    source: Customer
    exclude: [secret]
    reverse: true
    nested:
      - source: Order
        facet: OrderDto
    flatten:
      - name: CustomerOrderRow
        collection: orders
"#;

    fn model() -> GenerationModel {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        build_model(&manifest, "CustomerDto", &DefaultsConfig::default()).unwrap()
    }

    fn input() -> serde_json::Value {
        json!({
            "name": "ada",
            "secret": "s3cr3t",
            "orders": [{ "total": 3 }, { "total": 5 }]
        })
    }

    #[test]
    fn test_convert_drops_excluded() {
        let output = convert_json(&model(), &input(), false).unwrap();
        assert_eq!(
            output,
            json!({ "name": "ada", "orders": [{ "total": 3 }, { "total": 5 }] })
        );
    }

    #[test]
    fn test_convert_back_defaults_excluded() {
        let facet = json!({ "name": "ada", "orders": [] });
        let output = convert_json(&model(), &facet, true).unwrap();
        assert_eq!(output["name"], "ada");
        assert_eq!(output["secret"], "");
    }

    #[test]
    fn test_flatten_rows() {
        let rows = flatten_json(&model(), "CustomerOrderRow", &input()).unwrap();
        assert_eq!(
            rows,
            json!([
                { "name": "ada", "orders_total": 3 },
                { "name": "ada", "orders_total": 5 }
            ])
        );
        assert!(flatten_json(&model(), "Missing", &input()).is_err());
    }
}
