//! NRML document model
//!
//! ```yaml
//! law: kinderbijslag
//! valid_from: 2024-01-01
//! facts:
//!   child:
//!     items:
//!       age:
//!         versions: [{type: numeric}]
//! inputs:
//!   kinderen:
//!     type: {$ref: "#/facts/child"}
//!     properties: {age: "#/facts/child/items/age"}
//! outputs:
//!   aantal_jonge_kinderen:
//!     source: {$ref: "#/facts/child/items/aantal"}
//! ```

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;

use super::item::Item;
use super::{item_key, ref_of, Raw};
use crate::error::{EngineError, Result};
use crate::rule_spec::Discovery;

/// `{"$ref": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefNode {
    #[serde(rename = "$ref")]
    pub reference: String,
}

/// A graph-dialect law specification.
#[derive(Debug, Clone, Deserialize)]
pub struct NrmlDocument {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    pub law: String,
    pub valid_from: NaiveDate,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub discoverable: Option<String>,
    #[serde(default)]
    pub discovery: Vec<Discovery>,
    #[serde(default)]
    pub facts: BTreeMap<String, Fact>,
    #[serde(default)]
    pub inputs: BTreeMap<String, NrmlInput>,
    #[serde(default)]
    pub outputs: BTreeMap<String, NrmlOutput>,
    #[serde(default)]
    pub includes: Vec<Include>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Fact {
    #[serde(default)]
    pub name: Option<Raw>,
    #[serde(default)]
    pub items: BTreeMap<String, Item>,
}

/// A caller-supplied input.
///
/// Either a value for one item (`target`), or a list of objects of a fact
/// type (`type` + `properties`) used by relations.
#[derive(Debug, Clone, Deserialize)]
pub struct NrmlInput {
    #[serde(default)]
    pub target: Option<RefNode>,
    #[serde(default, rename = "type")]
    pub value_type: Option<Raw>,
    /// Object property -> item key
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub source_reference: Option<NrmlSourceReference>,
}

impl NrmlInput {
    /// The fact this input supplies objects of, for `type: {$ref: ...}`.
    pub fn object_type(&self) -> Option<&str> {
        self.value_type.as_ref().and_then(ref_of)
    }
}

/// Table lookup used when an input parameter is absent.
#[derive(Debug, Clone, Deserialize)]
pub struct NrmlSourceReference {
    pub table: String,
    pub field: String,
    #[serde(default)]
    pub select_on: Vec<NrmlSelectOn>,
}

/// Row filter: column `name` must equal the parameter named by `value`.
#[derive(Debug, Clone, Deserialize)]
pub struct NrmlSelectOn {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NrmlOutput {
    pub source: RefNode,
    #[serde(default)]
    pub description: Option<String>,
}

/// An item whose value comes from an output of another law.
#[derive(Debug, Clone, Deserialize)]
pub struct Include {
    pub law: String,
    pub output: String,
    pub target: RefNode,
}

impl NrmlDocument {
    /// Items keyed by their reference, in fact/item order.
    pub fn items(&self) -> impl Iterator<Item = (String, &Item)> {
        self.facts.iter().flat_map(|(fact_id, fact)| {
            fact.items
                .iter()
                .map(move |(item_id, item)| (item_key(fact_id, item_id), item))
        })
    }

    /// Check cross-references that deserialization cannot see.
    pub fn validate(&self) -> Result<()> {
        let keys: std::collections::BTreeSet<String> = self.items().map(|(k, _)| k).collect();
        for (name, output) in &self.outputs {
            if !keys.contains(&output.source.reference) {
                return Err(EngineError::Nrml(format!(
                    "output '{}' refers to unknown item '{}'",
                    name, output.source.reference
                )));
            }
        }
        for include in &self.includes {
            if !keys.contains(&include.target.reference) {
                return Err(EngineError::Nrml(format!(
                    "include of {}.{} targets unknown item '{}'",
                    include.law, include.output, include.target.reference
                )));
            }
        }
        Ok(())
    }
}
