//! CLI binary for evaluating a law via stdin.
//!
//! Usage:
//!   echo '{"law": "zorgtoeslagwet", "reference_date": "2025-01-01", "parameters": {"BSN": "999993653"},
//!          "regulation_dir": "regulation/nl", "data_sources": {"brp": {"personen": [...]}}}' \
//!     | cargo run --bin evaluate
//!
//! Input (JSON on stdin): the fields of an evaluation request
//!   - law, reference_date, parameters, overwrite_input, overwrite_definitions,
//!     requested_output, service, claim_mode
//!
//! plus what to load before evaluating:
//!   - regulation_dir: Optional<String> - directory of law specifications
//!     (defaults to `$REGELRECHT_REGULATION_DIR` when set)
//!   - laws: Vec<String> - additional YAML specifications
//!   - data_sources: Object - `source name -> table -> [row, ...]`
//!   - claims: Vec<Claim> - claims visible to the evaluation
//!   - timeout_ms: Optional<u64> - evaluation deadline
//!
//! Output (JSON on stdout): the evaluation result, or `{"error": "..."}` with
//! exit code 1. Logs go to stderr, filtered by `RUST_LOG` (default `warn`).

use regelrecht_machine::{
    Claim, Deadline, EngineError, EvaluationRequest, EvaluationResult, InMemoryClaims,
    LawExecutionService, TableDataSource,
};
use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const REGULATION_DIR_ENV: &str = "REGELRECHT_REGULATION_DIR";

#[derive(serde::Deserialize)]
struct EvaluateInput {
    #[serde(flatten)]
    request: EvaluationRequest,
    #[serde(default)]
    regulation_dir: Option<String>,
    #[serde(default)]
    laws: Vec<String>,
    #[serde(default)]
    data_sources: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    claims: Vec<Claim>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(serde::Serialize)]
struct ErrorResponse {
    error: String,
}

fn fail(msg: String) -> ! {
    tracing::error!(error = %msg, "Evaluation failed");
    let resp = ErrorResponse { error: msg };
    println!("{}", serde_json::to_string(&resp).unwrap_or_default());
    std::process::exit(1);
}

fn build_service(input: &EvaluateInput) -> Result<LawExecutionService, EngineError> {
    let regulation_dir = input
        .regulation_dir
        .clone()
        .or_else(|| std::env::var(REGULATION_DIR_ENV).ok());

    let mut service = match regulation_dir {
        Some(dir) => LawExecutionService::from_directory(&dir)?,
        None => LawExecutionService::new(),
    };
    for yaml in &input.laws {
        service.load_law(yaml)?;
    }

    // Sources that sort first by name win ties
    let count = input.data_sources.len();
    for (index, (name, tables)) in input.data_sources.iter().enumerate() {
        let priority = i32::try_from(count - index).unwrap_or(i32::MAX);
        service.add_data_source(Box::new(TableDataSource::from_json(name.as_str(), priority, tables)?));
    }

    if !input.claims.is_empty() {
        let claims: InMemoryClaims = input.claims.iter().cloned().collect();
        service.set_claim_provider(Box::new(claims));
    }
    Ok(service)
}

fn run(input: EvaluateInput) -> Result<EvaluationResult, EngineError> {
    let service = build_service(&input)?;
    let mut request = input.request;
    if let Some(ms) = input.timeout_ms {
        request = request.with_deadline(Deadline::after(Duration::from_millis(ms)));
    }
    tracing::debug!(law = %request.law, date = %request.reference_date, laws = service.law_count(), "Evaluating");
    service.evaluate(&request)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let mut raw = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut raw) {
        fail(format!("Failed to read stdin: {e}"));
    }

    let input: EvaluateInput = match serde_json::from_str(&raw) {
        Ok(input) => input,
        Err(e) => fail(format!("Failed to parse request JSON: {e}")),
    };

    match run(input) {
        Ok(result) => match serde_json::to_string(&result) {
            Ok(json) => println!("{json}"),
            Err(e) => fail(format!("Failed to serialize result: {e}")),
        },
        Err(e) => fail(e.to_string()),
    }
}
