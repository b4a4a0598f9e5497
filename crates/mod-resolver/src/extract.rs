//! Mod reference extraction from cluster override blobs
//!
//! Override blobs name their mods as `workshop-<digits>` keys. The scan below
//! finds every marker, takes the digit run that follows it and keeps the first
//! occurrence of each identifier.

use crate::core::ModId;
use std::collections::HashSet;

/// Literal preceding every mod identifier in an override blob
pub const WORKSHOP_MARKER: &str = "workshop-";

/// Extract the ordered, de-duplicated mod identifiers referenced by `blob`
///
/// Blobs without references, or with only malformed ones, yield an empty list.
pub fn extract_mod_ids(blob: &str) -> Vec<ModId> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();

    for (start, _) in blob.match_indices(WORKSHOP_MARKER) {
        let rest = &blob[start + WORKSHOP_MARKER.len()..];
        let digits_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let Some(id) = ModId::parse(&rest[..digits_len]) else {
            continue;
        };
        if seen.insert(id.clone()) {
            ids.push(id);
        }
    }

    ids
}
