//! When step definitions
//!
//! Steps that execute actions (law evaluations).

use cucumber::when;

use crate::world::RegelrechtWorld;

// =============================================================================
// Zorgtoeslag steps
// =============================================================================

#[when(regex = r"^I request the standard premium for year (\d+)$")]
fn request_standard_premium(world: &mut RegelrechtWorld, year: String) {
    world.calculation_date = format!("{}-01-01", year);
    world.execute_law("regeling_standaardpremie", Some("standaardpremie"));
}

#[when("the healthcare allowance law is executed")]
fn execute_healthcare_allowance(world: &mut RegelrechtWorld) {
    world.execute_law("zorgtoeslagwet", None);
}

// =============================================================================
// Kinderbijslag steps
// =============================================================================

#[when("the child benefit law is executed")]
fn execute_child_benefit(world: &mut RegelrechtWorld) {
    world.execute_law("kinderbijslag", None);
}

// =============================================================================
// Generic steps
// =============================================================================

#[when(regex = r#"^the law "([^"]+)" is executed for output "([^"]+)"$"#)]
fn execute_law_output(world: &mut RegelrechtWorld, law: String, output: String) {
    world.execute_law(&law, Some(&output));
}
