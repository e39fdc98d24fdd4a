//! NRML items and their versions
//!
//! The kind of an item version is detected from which keys it carries:
//!
//! | keys                              | kind                          |
//! |-----------------------------------|-------------------------------|
//! | `arguments`                       | relation definition           |
//! | `type`, no `target`               | type definition               |
//! | `target` `expression` `condition` | conditional calculated value  |
//! | `target` `value` `condition`      | conditional value             |
//! | `target` `expression`             | calculated value              |
//! | `target` `condition`              | conditional characteristic    |
//! | `target` `value`                  | value initialization          |

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeSet;

use super::expression::{Argument, Condition, Expression};
use super::{last_ref, ref_of, Raw};
use crate::types::{parse_date, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    /// Cross product of the objects supplied for two fact types
    Relation { arguments: [String; 2] },
    TypeDefinition {
        value_type: Option<String>,
        value: Option<Argument>,
        /// Allowed values of an enumeration
        values: Vec<Value>,
    },
    ConditionalCalculatedValue {
        expression: Expression,
        condition: Condition,
    },
    ConditionalValue { value: Argument, condition: Condition },
    CalculatedValue { expression: Expression },
    ConditionalCharacteristic { condition: Condition },
    ValueInitialization { value: Argument },
}

impl ItemKind {
    /// Items that must be evaluated before this one.
    pub fn references(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        match self {
            ItemKind::Relation { .. } => {}
            ItemKind::TypeDefinition { value, .. } => {
                if let Some(value) = value {
                    value.collect_refs(&mut out);
                }
            }
            ItemKind::ConditionalCalculatedValue {
                expression,
                condition,
            } => {
                expression.collect_refs(&mut out);
                condition.collect_refs(&mut out);
            }
            ItemKind::ConditionalValue { value, condition } => {
                value.collect_refs(&mut out);
                condition.collect_refs(&mut out);
            }
            ItemKind::CalculatedValue { expression } => expression.collect_refs(&mut out),
            ItemKind::ConditionalCharacteristic { condition } => condition.collect_refs(&mut out),
            ItemKind::ValueInitialization { value } => value.collect_refs(&mut out),
        }
        out
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Relation { .. } => "relationDefinition",
            ItemKind::TypeDefinition { .. } => "typeDefinition",
            ItemKind::ConditionalCalculatedValue { .. } => "conditionalCalculatedValue",
            ItemKind::ConditionalValue { .. } => "conditionalValue",
            ItemKind::CalculatedValue { .. } => "calculatedValue",
            ItemKind::ConditionalCharacteristic { .. } => "conditionalCharacteristic",
            ItemKind::ValueInitialization { .. } => "valueInitialization",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemVersion {
    pub valid_from: Option<NaiveDate>,
    pub kind: ItemKind,
    /// Item this version assigns to (last `$ref` of `target`)
    pub target: Option<String>,
    /// Items referenced by the version's expressions
    pub references: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawItem")]
pub struct Item {
    pub description: Option<String>,
    pub versions: Vec<ItemVersion>,
}

#[derive(Deserialize)]
struct RawItem {
    #[serde(default)]
    name: Option<Raw>,
    #[serde(default)]
    versions: Vec<Raw>,
}

impl TryFrom<RawItem> for Item {
    type Error = String;

    fn try_from(raw: RawItem) -> Result<Self, Self::Error> {
        if raw.versions.is_empty() {
            return Err("item has no versions".to_string());
        }
        let versions = raw
            .versions
            .iter()
            .map(ItemVersion::from_raw)
            .collect::<Result<Vec<_>, _>>()?;
        if versions.len() > 1 && versions.iter().any(|v| v.valid_from.is_none()) {
            return Err("every version of a multi-version item needs validFrom".to_string());
        }

        let description = match raw.name {
            Some(Raw::String(s)) => Some(s),
            Some(Raw::Object(map)) => map.get("nl").and_then(Raw::as_str).map(str::to_string),
            _ => None,
        };
        Ok(Item {
            description,
            versions,
        })
    }
}

impl Item {
    /// The version in force at `date`.
    ///
    /// A single version is always in force. Otherwise the latest version
    /// with `validFrom <= date`, or `None` when all start later.
    pub fn active_version(&self, date: NaiveDate) -> Option<&ItemVersion> {
        if let [only] = self.versions.as_slice() {
            return Some(only);
        }
        self.versions
            .iter()
            .filter(|v| v.valid_from.is_some_and(|from| from <= date))
            .max_by_key(|v| v.valid_from)
    }
}

impl ItemVersion {
    pub fn from_raw(raw: &Raw) -> Result<Self, String> {
        let Raw::Object(map) = raw else {
            return Err(format!("item version must be an object, got {}", raw));
        };
        let valid_from = match map.get("validFrom") {
            None => None,
            Some(value) => Some(
                value
                    .as_str()
                    .and_then(parse_date)
                    .ok_or_else(|| format!("invalid validFrom {}", value))?,
            ),
        };

        // the parse closures only run after `has` confirmed the key
        let has = |key: &str| map.contains_key(key);
        let parse_expression =
            |key: &str| -> Result<Expression, String> { Expression::from_raw(&map[key]) };
        let parse_condition =
            |key: &str| -> Result<Condition, String> { Condition::from_raw(&map[key]) };
        let parse_argument =
            |key: &str| -> Result<Argument, String> { Argument::from_raw(&map[key]) };

        let kind = if has("arguments") {
            ItemKind::Relation {
                arguments: relation_arguments(&map["arguments"])?,
            }
        } else if has("type") && !has("target") {
            ItemKind::TypeDefinition {
                value_type: map.get("type").and_then(Raw::as_str).map(str::to_string),
                value: map.get("value").map(Argument::from_raw).transpose()?,
                values: map
                    .get("values")
                    .and_then(Raw::as_array)
                    .map(|list| list.iter().cloned().map(Value::from).collect())
                    .unwrap_or_default(),
            }
        } else if !has("target") {
            return Err("item version has neither target nor type".to_string());
        } else if has("expression") && has("condition") {
            ItemKind::ConditionalCalculatedValue {
                expression: parse_expression("expression")?,
                condition: parse_condition("condition")?,
            }
        } else if has("value") && has("condition") {
            ItemKind::ConditionalValue {
                value: parse_argument("value")?,
                condition: parse_condition("condition")?,
            }
        } else if has("expression") {
            ItemKind::CalculatedValue {
                expression: parse_expression("expression")?,
            }
        } else if has("condition") {
            ItemKind::ConditionalCharacteristic {
                condition: parse_condition("condition")?,
            }
        } else if has("value") {
            ItemKind::ValueInitialization {
                value: parse_argument("value")?,
            }
        } else {
            return Err("cannot determine item type".to_string());
        };

        let references = kind.references();

        Ok(Self {
            valid_from,
            kind,
            target: map.get("target").and_then(last_ref),
            references,
        })
    }
}

fn relation_arguments(raw: &Raw) -> Result<[String; 2], String> {
    let refs: Vec<String> = raw
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|arg| arg.get("objectType").and_then(ref_of))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    match <[String; 2]>::try_from(refs) {
        Ok(pair) => Ok(pair),
        Err(found) => Err(format!(
            "relation definition must have exactly 2 arguments, found {}",
            found.len()
        )),
    }
}
