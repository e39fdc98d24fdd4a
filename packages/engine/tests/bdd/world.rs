//! World struct for Cucumber BDD tests
//!
//! Contains the test state that persists across steps in a scenario.

use chrono::NaiveDate;
use cucumber::World;
use regelrecht_machine::{
    EngineError, EvaluationRequest, EvaluationResult, LawExecutionService, Row, TableDataSource,
    Value,
};
use std::collections::BTreeMap;
use std::fmt;

use crate::helpers::regulation_loader::load_all_regulations;

/// Test world that holds state across steps in a Cucumber scenario.
#[derive(World)]
#[world(init = Self::new)]
pub struct RegelrechtWorld {
    /// Law execution service with all regulations loaded
    pub service: LawExecutionService,
    /// Calculation date for the current scenario
    pub calculation_date: String,
    /// Parameters for law execution
    pub parameters: BTreeMap<String, Value>,
    /// Injected values: `law or source -> field -> value`
    pub overwrite_input: BTreeMap<String, BTreeMap<String, Value>>,
    /// Last execution result (if successful)
    pub result: Option<EvaluationResult>,
    /// Last error (if execution failed)
    pub error: Option<EngineError>,
    /// External data: `source name -> table -> rows`
    pub external_data: BTreeMap<String, BTreeMap<String, Vec<Row>>>,
}

impl fmt::Debug for RegelrechtWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegelrechtWorld")
            .field("calculation_date", &self.calculation_date)
            .field("parameters", &self.parameters)
            .field("result", &self.result)
            .field("error", &self.error.as_ref().map(|e| e.to_string()))
            .field("external_data", &self.external_data)
            .field(
                "service",
                &format!("<{} laws loaded>", self.service.law_count()),
            )
            .finish()
    }
}

impl Default for RegelrechtWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl RegelrechtWorld {
    /// Create a new world with all regulations loaded.
    pub fn new() -> Self {
        let service = match load_all_regulations() {
            Ok(service) => service,
            Err(e) => panic!("Failed to load regulations: {}", e),
        };

        Self {
            service,
            calculation_date: "2024-01-01".to_string(),
            parameters: BTreeMap::new(),
            overwrite_input: BTreeMap::new(),
            result: None,
            error: None,
            external_data: BTreeMap::new(),
        }
    }

    /// Rows for one table of one external source.
    pub fn add_rows(&mut self, source: &str, table: &str, rows: Vec<Row>) {
        self.external_data
            .entry(source.to_string())
            .or_default()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Register the external data as data sources, in declaration order of
    /// their names.
    fn install_data_sources(&mut self) {
        self.service.clear_data_sources();
        for (index, (name, tables)) in self.external_data.iter().enumerate() {
            let priority = i32::try_from(index).unwrap_or(i32::MAX);
            let source = tables
                .iter()
                .fold(TableDataSource::new(name.as_str(), priority), |source, (table, rows)| {
                    source.with_table(table.as_str(), rows.clone())
                });
            self.service.add_data_source(Box::new(source));
        }
    }

    /// Execute a law and store the result or error
    pub fn execute_law(&mut self, law: &str, output: Option<&str>) {
        let date = NaiveDate::parse_from_str(&self.calculation_date, "%Y-%m-%d")
            .unwrap_or_else(|e| panic!("Invalid calculation date '{}': {}", self.calculation_date, e));
        self.install_data_sources();

        let mut request = EvaluationRequest::new(law, date)
            .with_parameters(self.parameters.clone())
            .with_overwrite_input(self.overwrite_input.clone());
        if let Some(output) = output {
            request = request.with_requested_output(output);
        }

        match self.service.evaluate(&request) {
            Ok(result) => {
                self.result = Some(result);
                self.error = None;
            }
            Err(e) => {
                self.result = None;
                self.error = Some(e);
            }
        }
    }

    /// Get an output value from the last result
    pub fn get_output(&self, name: &str) -> Option<&Value> {
        self.result.as_ref()?.output.get(name)
    }

    /// The last result, failing the step when execution errored
    pub fn expect_result(&self) -> &EvaluationResult {
        match &self.result {
            Some(result) => result,
            None => panic!(
                "Expected successful execution, got error: {:?}",
                self.error_message()
            ),
        }
    }

    /// Get error message if execution failed
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::RegelrechtWorld;

    #[test]
    fn test_world_initialization() {
        let world = RegelrechtWorld::new();
        // Should have laws loaded
        assert!(
            world.service.law_count() > 0,
            "Expected at least one law to be loaded"
        );
    }
}
