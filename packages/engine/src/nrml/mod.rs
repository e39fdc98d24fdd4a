//! NRML: the graph-based rule dialect
//!
//! An NRML document declares *facts*, each holding named *items* (type
//! definitions, calculated values, conditional characteristics, relations).
//! Items refer to each other through JSON-pointer style references
//! (`{"$ref": "#/facts/<fact>/items/<item>"}`). Evaluation collects the items a
//! requested output needs, sorts them topologically and evaluates them in
//! order, keeping a dependency-tracked [`ItemResult`] per item.
//!
//! - [`document`] - document model and load-time validation
//! - [`item`] - item kinds and active-version selection
//! - [`expression`] - expressions, conditions and arguments
//! - [`result`] - per-item results
//! - [`engine`] - scheduling and evaluation

pub mod document;
pub mod engine;
pub mod expression;
pub mod item;
pub mod result;

pub use document::{Include, NrmlDocument, NrmlInput, NrmlOutput};
pub use engine::NrmlEngine;
pub use expression::{Argument, Condition, Expression};
pub use item::{Item, ItemKind, ItemVersion};
pub use result::ItemResult;

use serde_json::Value as Raw;

/// Key of an item: `#/facts/<fact>/items/<item>`.
pub fn item_key(fact: &str, item: &str) -> String {
    format!("#/facts/{}/items/{}", fact, item)
}

/// The `$ref` of a `{"$ref": ...}` node.
pub(crate) fn ref_of(raw: &Raw) -> Option<&str> {
    raw.get("$ref").and_then(Raw::as_str)
}

/// The last `$ref` below `raw` in document order.
///
/// A target written as `[{$ref: <object type>}, {$ref: <item>}]` names the
/// item last.
pub(crate) fn last_ref(raw: &Raw) -> Option<String> {
    match raw {
        Raw::Object(map) => match map.get("$ref") {
            Some(Raw::String(r)) => Some(r.clone()),
            _ => map.values().filter_map(last_ref).last(),
        },
        Raw::Array(items) => items.iter().filter_map(last_ref).last(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_ref() {
        let target = json!([{"$ref": "#/facts/child"}, {"$ref": "#/facts/child/items/young"}]);
        assert_eq!(last_ref(&target).as_deref(), Some("#/facts/child/items/young"));
        assert_eq!(last_ref(&json!({"$ref": "#/x"})).as_deref(), Some("#/x"));
        assert_eq!(last_ref(&json!(5)), None);
    }

    #[test]
    fn test_item_key() {
        assert_eq!(item_key("child", "age"), "#/facts/child/items/age");
    }
}
