use std::collections::{BTreeMap, BTreeSet};

use crate::keys::{derive_key, MatchKey};
use crate::model::SecondaryRecord;

/// Key -> secondary arena indices sharing it, in input order.
pub type KeyIndex = BTreeMap<MatchKey, Vec<usize>>;

/// Index every not-yet-consumed secondary record under its `layer` key.
///
/// Linear in the remaining pool. Records with no key for this layer are left
/// out entirely.
pub fn build_index(
    secondary: &[SecondaryRecord],
    consumed: &BTreeSet<usize>,
    layer: u8,
) -> KeyIndex {
    let mut index: KeyIndex = BTreeMap::new();
    for (idx, record) in secondary.iter().enumerate() {
        if consumed.contains(&idx) {
            continue;
        }
        if let Some(key) = derive_key(record, layer) {
            index.entry(key).or_default().push(idx);
        }
    }
    index
}
