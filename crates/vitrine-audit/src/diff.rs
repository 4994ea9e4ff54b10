//! Changed-field derivation between two state snapshots.

use serde_json::Value;
use std::collections::BTreeSet;

use crate::capture::StateMap;

/// Names of the fields whose values differ between `old` and `new`, sorted.
///
/// Nothing is reported without a new snapshot. A key missing from one side
/// compares as null, and a missing old snapshot compares as empty, so every
/// non-null key of `new` is reported as newly present.
pub fn changed_fields(old: Option<&StateMap>, new: Option<&StateMap>) -> Vec<String> {
    let Some(new) = new else {
        return Vec::new();
    };
    let empty = StateMap::new();
    let old = old.unwrap_or(&empty);

    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    keys.into_iter()
        .filter(|key| old.get(*key).unwrap_or(&Value::Null) != new.get(*key).unwrap_or(&Value::Null))
        .cloned()
        .collect()
}
