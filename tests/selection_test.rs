//! Member selection over inheritance chains

use facetgen::{build_model, generate_all, DefaultsConfig, GenerationModel, Manifest, Severity};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

const SOURCE_MEMBERS: [&str; 6] = ["m0", "m1", "m2", "m3", "m4", "m5"];

fn manifest_with_lists(include: &[&str], exclude: &[&str]) -> Manifest {
    let members: String = SOURCE_MEMBERS
        .iter()
        .map(|m| format!("      - {{ name: {}, type: string }}\n", m))
        .collect();
    let yaml = format!(
        "types:\n  - name: Wide\n    members:\n{}facets:\n  - name: Narrow\n    source: Wide\n    include: [{}]\n    exclude: [{}]\n",
        members,
        include.join(", "),
        exclude.join(", ")
    );
    Manifest::from_yaml(&yaml).unwrap()
}

fn member_names(model: &GenerationModel) -> Vec<String> {
    model.root.members.iter().map(|m| m.name.clone()).collect()
}

fn candidate_names() -> Vec<&'static str> {
    let mut names = SOURCE_MEMBERS.to_vec();
    names.extend(["ghost", "phantom"]);
    names
}

proptest! {
    #[test]
    fn test_allow_list_ignores_deny_list(
        include in prop::sample::subsequence(candidate_names(), 1..=8),
        exclude in prop::sample::subsequence(candidate_names(), 0..=8),
    ) {
        let manifest = manifest_with_lists(&include, &exclude);
        let model = build_model(&manifest, "Narrow", &DefaultsConfig::default()).unwrap();

        let expected: Vec<String> = SOURCE_MEMBERS
            .iter()
            .filter(|m| include.contains(m))
            .map(|m| m.to_string())
            .collect();
        prop_assert_eq!(member_names(&model), expected);
    }

    #[test]
    fn test_deny_list_alone_removes_names(
        exclude in prop::sample::subsequence(SOURCE_MEMBERS.to_vec(), 0..=6),
    ) {
        let manifest = manifest_with_lists(&[], &exclude);
        let model = build_model(&manifest, "Narrow", &DefaultsConfig::default()).unwrap();

        let expected: Vec<String> = SOURCE_MEMBERS
            .iter()
            .filter(|m| !exclude.contains(m))
            .map(|m| m.to_string())
            .collect();
        prop_assert_eq!(member_names(&model), expected);
    }
}

const HIERARCHY: &str = r#"
types:
  - name: Entity
    members:
      - name: id
        type: int
      - name: label
        type: string?
        mutable: true
      - name: audit
        type: string
  - name: Document
    base: Entity
    members:
      - name: title
        type: string
      - name: label
        type: string
        mutable: false
        required: true
facets:
  - name: DocumentDto
    source: Document
  - name: DocumentSummary
    source: Document
    exclude_declared_in: [Entity]
"#;

#[test]
fn test_shadowed_member_uses_derived_declaration() {
    let manifest = Manifest::from_yaml(HIERARCHY).unwrap();
    let model = build_model(&manifest, "DocumentDto", &DefaultsConfig::default()).unwrap();

    assert_eq!(member_names(&model), vec!["title", "label", "id", "audit"]);
    let label = model.root.member("label").unwrap();
    assert!(!label.is_mutable);
    assert!(label.is_required);
    assert_eq!(label.facet_type.to_string(), "string");
}

#[test]
fn test_type_scoped_exclusion_keeps_shadowing_member() {
    let manifest = Manifest::from_yaml(HIERARCHY).unwrap();
    let model = build_model(&manifest, "DocumentSummary", &DefaultsConfig::default()).unwrap();
    assert_eq!(member_names(&model), vec!["title", "label"]);
}

#[test]
fn test_allow_list_with_deny_list_warns() {
    let manifest = manifest_with_lists(&["m1"], &["m1", "m2"]);
    let generated = generate_all(&manifest, &DefaultsConfig::default());

    assert!(!generated.has_errors());
    assert_eq!(member_names(&generated.models[0]), vec!["m1"]);
    assert!(generated
        .diagnostics
        .iter()
        .any(|d| d.severity == Severity::Warning && d.message.contains("exclude list ignored")));
}
