//! Rule resolver
//!
//! Provides loading and lookup of law specifications, including:
//! - Law registry by name with multi-version support
//! - Version selection based on a reference date
//! - Amendment patches applied on top of the selected version
//! - Discovery queries (audience, purpose/target type, service listing)
//!
//! # Multi-version Support
//!
//! Laws can have multiple versions with different `valid_from` dates. For a
//! reference date, versions where `valid_from <= reference_date` are valid and
//! the one with the most recent `valid_from` is selected. A date before every
//! version is an error, even when later versions exist.
//!
//! When two versions share `(law, valid_from)` they must differ by service.
//! Passing the service disambiguates; without it the most recently loaded
//! version wins.
//!
//! # Security
//!
//! The resolver enforces a maximum number of loaded specifications (see
//! [`crate::config::MAX_LOADED_LAWS`]) and a maximum document size.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::config;
use crate::error::{EngineError, Result};
use crate::patch::{self, Patch};
use crate::rule_spec::{self, Discovery, Specification};

/// Where a loaded specification came from.
#[derive(Debug, Clone)]
enum SpecOrigin {
    /// Loaded from a file; amendments are discovered next to it
    File(PathBuf),
    /// Loaded from a string; no amendments
    Inline,
}

#[derive(Debug, Clone)]
struct LoadedSpec {
    spec: Arc<Specification>,
    /// Unparsed document, the base for amendment patches
    raw: serde_json::Value,
    origin: SpecOrigin,
}

/// A discovery entry together with the law that declares it.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryMatch {
    pub law: String,
    pub service: String,
    pub discovery: Discovery,
}

/// Loads specifications and resolves `(law, reference_date, service)` to the
/// applicable version.
///
/// # Example
///
/// ```ignore
/// use regelrecht_machine::RuleResolver;
///
/// let mut resolver = RuleResolver::new();
/// resolver.load_from_directory("regulation/nl")?;
///
/// let spec = resolver.get_rule_spec("zorgtoeslagwet", date, None)?;
/// ```
#[derive(Debug, Default)]
pub struct RuleResolver {
    /// Law name -> versions, newest `valid_from` first
    law_versions: HashMap<String, Vec<LoadedSpec>>,
}

impl RuleResolver {
    /// Create a new empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, entry: LoadedSpec) -> Result<String> {
        let law = entry.spec.law().to_string();
        let valid_from = entry.spec.valid_from();
        let service = entry.spec.service().to_string();

        let versions = self.law_versions.entry(law.clone()).or_default();
        let existing = versions.iter().position(|v| {
            v.spec.valid_from() == valid_from
                && v.spec.service() == service
                && v.spec.uuid() == entry.spec.uuid()
        });

        match existing {
            Some(idx) => {
                tracing::debug!(law = %law, valid_from = %valid_from, "Replacing existing version");
                versions.remove(idx);
            }
            None => {
                let total: usize = self.law_versions.values().map(Vec::len).sum();
                if total >= config::MAX_LOADED_LAWS {
                    tracing::warn!(
                        current = total,
                        max = config::MAX_LOADED_LAWS,
                        law = %law,
                        "Maximum law count exceeded"
                    );
                    return Err(EngineError::TooManyLaws {
                        max: config::MAX_LOADED_LAWS,
                    });
                }
            }
        }

        // Newest entry goes first so that, among equal dates, the last loaded wins
        let versions = self.law_versions.entry(law.clone()).or_default();
        versions.insert(0, entry);
        versions.sort_by(|a, b| b.spec.valid_from().cmp(&a.spec.valid_from()));

        tracing::debug!(law = %law, valid_from = %valid_from, service = %service, "Law loaded");
        Ok(law)
    }

    /// Load a specification from a YAML string. Returns the law name.
    pub fn load_from_yaml(&mut self, yaml: &str) -> Result<String> {
        let raw = rule_spec::raw_from_yaml(yaml)?;
        let spec = Specification::from_json(raw.clone())?;
        self.insert(LoadedSpec {
            spec: Arc::new(spec),
            raw,
            origin: SpecOrigin::Inline,
        })
    }

    /// Load a specification file (YAML or JSON). Returns the law name.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let raw = rule_spec::raw_from_file(path)?;
        let spec = Specification::from_json(raw.clone())
            .map_err(|e| EngineError::LoadError(format!("{}: {}", path.display(), e)))?;
        self.insert(LoadedSpec {
            spec: Arc::new(spec),
            raw,
            origin: SpecOrigin::File(path.to_path_buf()),
        })
    }

    /// Load every specification below `dir`.
    ///
    /// Amendment files are skipped (they are applied on lookup). Files that fail
    /// to parse are logged and skipped. Returns the number of files loaded.
    pub fn load_from_directory(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(EngineError::LoadError(format!(
                "Regulation directory not found: {}",
                dir.display()
            )));
        }

        let mut paths: Vec<PathBuf> = WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| ext == "yaml" || ext == "yml" || ext == "json")
                    && !patch::is_amendment_file(path)
            })
            .collect();
        paths.sort();

        let mut count = 0;
        for path in paths {
            match self.load_file(&path) {
                Ok(law) => {
                    tracing::debug!(law = %law, path = %path.display(), "Loaded law");
                    count += 1;
                }
                Err(e @ EngineError::TooManyLaws { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to load law file (skipping)");
                }
            }
        }

        tracing::info!(count, dir = %dir.display(), "Loaded regulations");
        Ok(count)
    }

    // -------------------------------------------------------------------------
    // Version selection
    // -------------------------------------------------------------------------

    fn find_entry(
        &self,
        law: &str,
        reference_date: NaiveDate,
        service: Option<&str>,
    ) -> Result<&LoadedSpec> {
        let no_rules = || EngineError::NoRulesForLaw {
            law: law.to_string(),
            service: service.map(str::to_string),
        };

        let versions = self.law_versions.get(law).ok_or_else(no_rules)?;
        let mut candidates = versions
            .iter()
            .filter(|v| service.is_none_or(|s| v.spec.service() == s))
            .peekable();
        if candidates.peek().is_none() {
            return Err(no_rules());
        }

        // Versions are sorted newest first
        candidates
            .find(|v| v.spec.valid_from() <= reference_date)
            .ok_or_else(|| EngineError::NoValidVersion {
                law: law.to_string(),
                reference_date,
            })
    }

    /// Select the version of `law` valid at `reference_date`, without amendments.
    pub fn find_rule(
        &self,
        law: &str,
        reference_date: NaiveDate,
        service: Option<&str>,
    ) -> Result<Arc<Specification>> {
        self.find_entry(law, reference_date, service)
            .map(|entry| Arc::clone(&entry.spec))
    }

    /// Select the applicable version and apply its amendment patches.
    ///
    /// Patches that fail to apply, or whose result no longer parses, are
    /// skipped with a warning.
    pub fn get_rule_spec(
        &self,
        law: &str,
        reference_date: NaiveDate,
        service: Option<&str>,
    ) -> Result<Arc<Specification>> {
        let entry = self.find_entry(law, reference_date, service)?;
        let SpecOrigin::File(path) = &entry.origin else {
            return Ok(Arc::clone(&entry.spec));
        };

        let amendments = patch::discover_amendments(path);
        if amendments.is_empty() {
            return Ok(Arc::clone(&entry.spec));
        }

        let patches = amendments.iter().map(|p| Patch::from_file(p));
        let (patched, applied) = patch::apply_patches(entry.raw.clone(), patches, |doc| {
            Specification::from_json(doc.clone()).map(|_| ())
        });
        if applied.is_empty() {
            return Ok(Arc::clone(&entry.spec));
        }

        tracing::debug!(law = %law, patches = ?applied, "Applied amendments");
        Ok(Arc::new(Specification::from_json(patched)?))
    }

    // -------------------------------------------------------------------------
    // Listing and discovery
    // -------------------------------------------------------------------------

    fn all_specs(&self) -> impl Iterator<Item = &Specification> {
        self.law_versions
            .values()
            .flat_map(|versions| versions.iter().map(|v| v.spec.as_ref()))
    }

    /// Laws flagged discoverable for `audience` (case-insensitive).
    pub fn get_discoverable_laws(&self, audience: &str) -> BTreeSet<String> {
        self.all_specs()
            .filter(|s| {
                s.discoverable()
                    .is_some_and(|d| d.eq_ignore_ascii_case(audience))
            })
            .map(|s| s.law().to_string())
            .collect()
    }

    /// Discovery entries matching `purpose` and `target_type`, taken from the
    /// newest version of each law.
    pub fn get_laws_by_discovery(&self, purpose: &str, target_type: &str) -> Vec<DiscoveryMatch> {
        let mut matches: Vec<DiscoveryMatch> = self
            .law_versions
            .values()
            .filter_map(|versions| versions.first())
            .flat_map(|entry| {
                entry
                    .spec
                    .discovery()
                    .iter()
                    .filter(|d| d.purpose == purpose && d.target_type == target_type)
                    .map(|d| DiscoveryMatch {
                        law: entry.spec.law().to_string(),
                        service: entry.spec.service().to_string(),
                        discovery: d.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        matches.sort_by(|a, b| a.law.cmp(&b.law));
        matches
    }

    /// Service -> laws it owns.
    pub fn laws_by_service(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut result: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for spec in self.all_specs() {
            result
                .entry(spec.service().to_string())
                .or_default()
                .insert(spec.law().to_string());
        }
        result
    }

    /// List all loaded law names (unique, sorted).
    pub fn list_laws(&self) -> Vec<&str> {
        let mut laws: Vec<&str> = self.law_versions.keys().map(String::as_str).collect();
        laws.sort();
        laws
    }

    /// Get the number of unique laws (not counting versions).
    pub fn law_count(&self) -> usize {
        self.law_versions.len()
    }

    /// Get the total number of loaded versions.
    pub fn version_count(&self) -> usize {
        self.law_versions.values().map(Vec::len).sum()
    }

    /// Check if a law is loaded (any version).
    pub fn has_law(&self, law: &str) -> bool {
        self.law_versions.contains_key(law)
    }

    /// Unload all versions of a law.
    pub fn unload_law(&mut self, law: &str) -> bool {
        self.law_versions.remove(law).is_some()
    }
}
