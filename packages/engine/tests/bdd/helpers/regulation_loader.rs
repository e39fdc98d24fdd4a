//! Regulation loader for BDD tests
//!
//! Loads every specification under the regulation/nl directory. Amendment
//! files next to a specification are applied on lookup.

use regelrecht_machine::{EngineError, LawExecutionService};
use std::path::{Path, PathBuf};

/// The `regulation/nl/` directory at the project root.
pub fn regulation_dir() -> Result<PathBuf, EngineError> {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let dir = Path::new(manifest_dir)
        .parent() // packages/
        .and_then(|p| p.parent()) // project root
        .map(|p| p.join("regulation").join("nl"))
        .ok_or_else(|| EngineError::LoadError("Could not find regulation directory".to_string()))?;

    if !dir.exists() {
        return Err(EngineError::LoadError(format!(
            "Regulation directory not found: {}",
            dir.display()
        )));
    }
    Ok(dir)
}

/// A service with all regulations loaded.
pub fn load_all_regulations() -> Result<LawExecutionService, EngineError> {
    let service = LawExecutionService::from_directory(regulation_dir()?)?;
    tracing::info!(count = service.law_count(), "Loaded regulations");
    Ok(service)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::load_all_regulations;

    #[test]
    fn test_specific_laws_loaded() {
        let service = load_all_regulations().expect("Failed to load regulations");

        assert!(service.has_law("zorgtoeslagwet"), "zorgtoeslagwet should be loaded");
        assert!(
            service.has_law("regeling_standaardpremie"),
            "regeling_standaardpremie should be loaded"
        );
        assert!(service.has_law("kinderbijslag"), "kinderbijslag should be loaded");
    }
}
