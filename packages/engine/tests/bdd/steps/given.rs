//! Given step definitions
//!
//! Steps that set up the initial state for scenarios.

use cucumber::{gherkin::Step, given};
use regelrecht_machine::Value;

use crate::helpers::value_conversion::{
    convert_gherkin_value, parse_table_to_params, parse_table_to_rows,
};
use crate::world::RegelrechtWorld;

// =============================================================================
// Background steps
// =============================================================================

#[given(expr = "the calculation date is {string}")]
fn set_calculation_date(world: &mut RegelrechtWorld, date: String) {
    world.calculation_date = date;
}

#[given("a citizen with the following data:")]
fn set_citizen_data(world: &mut RegelrechtWorld, step: &Step) {
    if let Some(table) = &step.table {
        world.parameters.extend(parse_table_to_params(table));
    }
}

// =============================================================================
// External data steps
// =============================================================================

/// `the following RVIG "personen" data:` registers rows for table `personen`
/// of source `RVIG`. A `bsn` column also sets the `BSN` parameter.
#[given(regex = r#"^the following (\S+) "([^"]+)" data:$"#)]
fn set_external_data(world: &mut RegelrechtWorld, source: String, table_name: String, step: &Step) {
    let Some(table) = &step.table else {
        return;
    };
    let rows = parse_table_to_rows(table);
    if let Some(bsn) = rows.iter().find_map(|row| row.get("bsn")) {
        world.parameters.insert("BSN".to_string(), bsn.clone());
    }
    world.add_rows(&source, &table_name, rows);
}

#[given(regex = r#"^the value "([^"]+)" of law "([^"]+)" is overwritten with "([^"]+)"$"#)]
fn overwrite_law_value(world: &mut RegelrechtWorld, field: String, law: String, value: String) {
    world
        .overwrite_input
        .entry(law)
        .or_default()
        .insert(field, convert_gherkin_value(&value));
}

// =============================================================================
// Kinderbijslag steps
// =============================================================================

#[given("a parent with the following children:")]
fn set_children(world: &mut RegelrechtWorld, step: &Step) {
    let Some(table) = &step.table else {
        return;
    };
    let children: Vec<Value> = parse_table_to_rows(table)
        .into_iter()
        .map(Value::Object)
        .collect();

    let parent: Value = serde_json::json!([{"bsn": "999993653"}]).into();
    world.parameters.insert("ouders".to_string(), parent);
    world
        .parameters
        .insert("kinderen".to_string(), Value::Array(children));
}
