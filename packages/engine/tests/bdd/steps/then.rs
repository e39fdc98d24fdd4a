//! Then step definitions
//!
//! Steps that verify outcomes and assertions.

use cucumber::then;
use regelrecht_machine::Value;

use crate::helpers::value_conversion::{
    convert_gherkin_value, parse_euro_to_eurocent, values_equal_with_tolerance,
};
use crate::world::RegelrechtWorld;

/// Integer eurocent amount of an output, accepting whole floats.
fn eurocent_output(world: &RegelrechtWorld, name: &str) -> i64 {
    world.expect_result();
    match world.get_output(name) {
        Some(Value::Int(n)) => *n,
        Some(Value::Float(f)) => f.round() as i64,
        other => panic!("Expected {} to be a number, got {:?}", name, other),
    }
}

// =============================================================================
// General steps
// =============================================================================

#[then("the execution succeeds")]
fn assert_execution_succeeds(world: &mut RegelrechtWorld) {
    let result = world.expect_result();
    assert!(
        !result.missing_required,
        "Expected all required data to be present"
    );
}

#[then(regex = r#"^the execution fails with "([^"]+)"$"#)]
fn assert_execution_fails_with(world: &mut RegelrechtWorld, expected_message: String) {
    assert!(
        world.error.is_some(),
        "Expected execution to fail, but it succeeded with result: {:?}",
        world.result
    );

    let error_msg = world.error_message().unwrap_or_default();
    assert!(
        error_msg
            .to_lowercase()
            .contains(&expected_message.to_lowercase()),
        "Expected error to contain '{}', got: '{}'",
        expected_message,
        error_msg
    );
}

#[then("the requirements are not met")]
fn assert_requirements_not_met(world: &mut RegelrechtWorld) {
    let result = world.expect_result();
    assert!(!result.requirements_met, "Expected requirements not to be met");
    assert!(result.output.is_empty(), "Expected no outputs, got {:?}", result.output);
}

#[then("required data is missing")]
fn assert_missing_required(world: &mut RegelrechtWorld) {
    let result = world.expect_result();
    assert!(result.missing_required, "Expected missing required data");
    assert!(result.output.is_empty(), "Expected no outputs, got {:?}", result.output);
}

#[then(regex = r#"^the output "([^"]+)" is "([^"]*)"$"#)]
fn assert_output_value(world: &mut RegelrechtWorld, name: String, expected: String) {
    world.expect_result();
    let expected = convert_gherkin_value(&expected);
    let actual = world.get_output(&name);
    assert!(
        actual.is_some_and(|v| values_equal_with_tolerance(v, &expected)),
        "Expected {} to be {:?}, got {:?}",
        name,
        expected,
        actual
    );
}

// =============================================================================
// Zorgtoeslag steps
// =============================================================================

#[then(regex = r#"^the standard premium is "(\d+)" eurocent$"#)]
fn assert_standard_premium_eurocent(world: &mut RegelrechtWorld, expected: String) {
    let expected_amount: i64 = expected
        .parse()
        .unwrap_or_else(|_| panic!("Invalid eurocent value: {}", expected));
    assert_eq!(eurocent_output(world, "standaardpremie"), expected_amount);
}

#[then("the citizen has the right to healthcare allowance")]
fn assert_has_right_to_allowance(world: &mut RegelrechtWorld) {
    world.expect_result();
    let has_right = world.get_output("heeft_recht_op_zorgtoeslag");
    assert!(
        matches!(has_right, Some(Value::Bool(true))),
        "Expected heeft_recht_op_zorgtoeslag to be true, got {:?}",
        has_right
    );
}

#[then("the citizen does not have the right to healthcare allowance")]
fn assert_no_right_to_allowance(world: &mut RegelrechtWorld) {
    world.expect_result();
    let has_right = world.get_output("heeft_recht_op_zorgtoeslag");
    assert!(
        matches!(has_right, Some(Value::Bool(false))),
        "Expected heeft_recht_op_zorgtoeslag to be false, got {:?}",
        has_right
    );
}

#[then(regex = r#"^the allowance amount is "([0-9.]+)" euro$"#)]
fn assert_allowance_amount_euro(world: &mut RegelrechtWorld, expected: String) {
    let expected_cents = parse_euro_to_eurocent(&expected)
        .unwrap_or_else(|| panic!("Invalid euro value: {}", expected));
    let actual = eurocent_output(world, "hoogte_toeslag");
    assert_eq!(
        actual, expected_cents,
        "Expected hoogte_toeslag to be {} eurocent, got {}",
        expected_cents, actual
    );
}

// =============================================================================
// Kinderbijslag steps
// =============================================================================

#[then(regex = r#"^the number of young children is "(\d+)"$"#)]
fn assert_young_children(world: &mut RegelrechtWorld, expected: String) {
    let expected: i64 = expected
        .parse()
        .unwrap_or_else(|_| panic!("Invalid count: {}", expected));
    assert_eq!(eurocent_output(world, "aantal_jonge_kinderen"), expected);
}

#[then(regex = r#"^the child benefit is "(\d+)" eurocent$"#)]
fn assert_child_benefit(world: &mut RegelrechtWorld, expected: String) {
    let expected: i64 = expected
        .parse()
        .unwrap_or_else(|_| panic!("Invalid eurocent value: {}", expected));
    assert_eq!(eurocent_output(world, "kinderbijslag"), expected);
}
