//! NRML documents evaluated through the service: topological item order,
//! relations and counting, versioned items, includes, data sources and cycles.

use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use regelrecht_machine::{
    EngineError, EvaluationRequest, LawExecutionService, PathNode, PathNodeType, TableDataSource,
    Value,
};
use serde_json::json;
use std::path::PathBuf;

fn regulation_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("regulation")
        .join("nl")
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn gezin(leeftijden: &[i64]) -> EvaluationRequest {
    let kinderen: Vec<serde_json::Value> = leeftijden.iter().map(|l| json!({"leeftijd": l})).collect();
    EvaluationRequest::new("kinderbijslag", date("2024-06-01"))
        .with_parameter("ouders", json!([{"bsn": "999993653"}]))
        .with_parameter("kinderen", json!(kinderen))
}

fn find<'a>(node: &'a PathNode, node_type: PathNodeType, name: &str) -> Option<&'a PathNode> {
    if node.node_type == node_type && node.name == name {
        return Some(node);
    }
    node.children.iter().find_map(|c| find(c, node_type, name))
}

// -----------------------------------------------------------------------------
// Kinderbijslag
// -----------------------------------------------------------------------------

#[test]
fn test_kinderbijslag_counts_young_children() {
    let service = LawExecutionService::from_directory(regulation_dir()).unwrap();
    let result = service.evaluate(&gezin(&[8, 11, 15])).unwrap();

    assert!(result.requirements_met);
    assert!(!result.missing_required);
    assert_eq!(result.output["aantal_jonge_kinderen"], Value::Int(2));
    assert_eq!(result.output["kinderbijslag"], Value::Int(53_952));
    assert!(result.input.contains_key("kinderen"));
    assert_eq!(result.rulespec_uuid, "9e0d5b3a-nrml-kinderbijslag-2024");
}

#[test]
fn test_kinderbijslag_item_version_follows_reference_date() {
    let service = LawExecutionService::from_directory(regulation_dir()).unwrap();
    let mut request = gezin(&[3, 9]);
    request.reference_date = date("2025-02-01");
    let result = service.evaluate(&request).unwrap();

    assert_eq!(result.output["kinderbijslag"], Value::Int(56_210));
}

#[test]
fn test_kinderbijslag_without_children() {
    let service = LawExecutionService::from_directory(regulation_dir()).unwrap();
    let result = service.evaluate(&gezin(&[])).unwrap();

    assert_eq!(result.output["aantal_jonge_kinderen"], Value::Int(0));
    assert_eq!(result.output["kinderbijslag"], Value::Int(0));
}

#[test]
fn test_kinderbijslag_requested_output() {
    let service = LawExecutionService::from_directory(regulation_dir()).unwrap();
    let result = service
        .evaluate(&gezin(&[8, 15]).with_requested_output("aantal_jonge_kinderen"))
        .unwrap();

    assert_eq!(result.output.len(), 1);
    assert_eq!(result.output["aantal_jonge_kinderen"], Value::Int(1));

    let err = service
        .evaluate(&gezin(&[8]).with_requested_output("kinderopvangtoeslag"))
        .unwrap_err();
    assert!(matches!(err, EngineError::OutputNotFound { .. }));
}

#[test]
fn test_kinderbijslag_trace_has_item_nodes() {
    let service = LawExecutionService::from_directory(regulation_dir()).unwrap();
    let trace = service.evaluate(&gezin(&[8])).unwrap().trace.unwrap();

    assert_eq!(trace.node_type, PathNodeType::Evaluation);
    assert_eq!(trace.name, "kinderbijslag");
    let node = find(
        &trace,
        PathNodeType::Item,
        "#/facts/regels/items/tel_jonge_kinderen",
    )
    .expect("counting item in trace");
    assert_eq!(node.result, Some(Value::Int(1)));
    assert_eq!(node.details["success"], Value::Bool(true));
}

// -----------------------------------------------------------------------------
// Inline documents
// -----------------------------------------------------------------------------

const CYCLE: &str = r##"
law: kringloop
valid_from: 2024-01-01
facts:
  f:
    items:
      x:
        versions: [{type: numeric}]
      y:
        versions: [{type: numeric}]
      bereken_x:
        versions:
          - target: {$ref: "#/facts/f/items/x"}
            expression:
              type: arithmetic
              operator: add
              arguments: [{$ref: "#/facts/f/items/y"}, 1]
      bereken_y:
        versions:
          - target: {$ref: "#/facts/f/items/y"}
            expression:
              type: arithmetic
              operator: add
              arguments: [{$ref: "#/facts/f/items/x"}, 1]
outputs:
  x:
    source: {$ref: "#/facts/f/items/x"}
"##;

#[test]
fn test_item_cycle_is_an_error() {
    let mut service = LawExecutionService::new();
    service.load_law(CYCLE).unwrap();

    match service.evaluate(&EvaluationRequest::new("kringloop", date("2024-02-01"))) {
        Err(EngineError::CircularDependency(members)) => {
            assert!(members.contains(&"#/facts/f/items/x".to_string()));
            assert!(members.contains(&"#/facts/f/items/bereken_y".to_string()));
        }
        other => panic!("expected circular dependency, got {:?}", other),
    }
}

const BASIS: &str = r#"
law: basisregeling
valid_from: 2024-01-01
properties:
  output:
    - name: grens
actions:
  - output: grens
    value: 11
"#;

const MET_INCLUDE: &str = r##"
law: afgeleid
valid_from: 2024-01-01
facts:
  f:
    items:
      grens:
        versions: [{type: numeric}]
      dubbel:
        versions: [{type: numeric}]
      bereken_dubbel:
        versions:
          - target: {$ref: "#/facts/f/items/dubbel"}
            expression:
              type: arithmetic
              operator: multiply
              arguments: [{$ref: "#/facts/f/items/grens"}, 2]
includes:
  - law: basisregeling
    output: grens
    target: {$ref: "#/facts/f/items/grens"}
outputs:
  dubbel:
    source: {$ref: "#/facts/f/items/dubbel"}
"##;

#[test]
fn test_include_evaluates_other_law() {
    let mut service = LawExecutionService::new();
    service.load_law(BASIS).unwrap();
    service.load_law(MET_INCLUDE).unwrap();

    let result = service
        .evaluate(&EvaluationRequest::new("afgeleid", date("2024-02-01")))
        .unwrap();
    assert_eq!(result.output["dubbel"], Value::Int(22));
    assert_eq!(result.input["basisregeling.grens"], Value::Int(11));

    let trace = result.trace.unwrap();
    assert!(find(&trace, PathNodeType::CrossLaw, "basisregeling.grens").is_some());
}

#[test]
fn test_missing_include_fails_output() {
    let mut service = LawExecutionService::new();
    service.load_law(MET_INCLUDE).unwrap();

    let result = service
        .evaluate(&EvaluationRequest::new("afgeleid", date("2024-02-01")))
        .unwrap();
    assert!(result.missing_required);
    assert!(!result.requirements_met);
    assert!(result.output.is_empty());
}

const MET_BRON: &str = r##"
law: premie
valid_from: 2024-01-01
facts:
  f:
    items:
      inkomen:
        versions: [{type: amount}]
      premie:
        versions: [{type: amount}]
      drempel:
        versions: [{type: amount, value: 2000000}]
      bereken_premie:
        versions:
          - target: {$ref: "#/facts/f/items/premie"}
            value: 5000
            condition:
              type: comparison
              operator: greaterThan
              arguments:
                - {$ref: "#/facts/f/items/inkomen"}
                - {$ref: "#/facts/f/items/drempel"}
inputs:
  inkomen:
    target: {$ref: "#/facts/f/items/inkomen"}
    type: amount
    source_reference:
      table: inkomens
      field: Inkomen
      select_on:
        - name: bsn
          value: BSN
outputs:
  premie:
    source: {$ref: "#/facts/f/items/premie"}
"##;

fn premie_service() -> LawExecutionService {
    let mut service = LawExecutionService::new();
    service.load_law(MET_BRON).unwrap();
    service.add_data_source(Box::new(
        TableDataSource::from_json(
            "belastingdienst",
            10,
            &json!({"inkomens": [
                {"bsn": "111", "inkomen": 2500000},
                {"bsn": "222", "inkomen": 1500000}
            ]}),
        )
        .unwrap(),
    ));
    service
}

#[test]
fn test_input_from_data_source() {
    let service = premie_service();
    let request = EvaluationRequest::new("premie", date("2024-02-01")).with_parameter("BSN", "111");
    let result = service.evaluate(&request).unwrap();

    assert_eq!(result.input["inkomen"], Value::Int(2_500_000));
    assert_eq!(result.output["premie"], Value::Int(5_000));
}

#[test]
fn test_conditional_value_not_met_is_null() {
    let service = premie_service();
    let request = EvaluationRequest::new("premie", date("2024-02-01")).with_parameter("BSN", "222");
    let result = service.evaluate(&request).unwrap();

    assert!(!result.missing_required);
    assert_eq!(result.output["premie"], Value::Null);
}

#[test]
fn test_parameter_wins_over_data_source() {
    let service = premie_service();
    let request = EvaluationRequest::new("premie", date("2024-02-01"))
        .with_parameter("BSN", "222")
        .with_parameter("inkomen", 3_000_000);
    let result = service.evaluate(&request).unwrap();

    assert_eq!(result.output["premie"], Value::Int(5_000));
}

#[test]
fn test_unmatched_row_fails_output() {
    let service = premie_service();
    let request = EvaluationRequest::new("premie", date("2024-02-01")).with_parameter("BSN", "333");
    let result = service.evaluate(&request).unwrap();

    assert!(result.missing_required);
    assert!(result.output.is_empty());
}
