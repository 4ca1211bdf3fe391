//! Cheap change detection for scene broadcasts.
//!
//! Deep comparison of the whole document on every drag frame is too
//! expensive, so a broadcast is gated on a fingerprint built from the
//! element count, the first and last element (id + version) and the set
//! of asset keys. This catches appends, edits of the boundary elements
//! and deletions from the end. An in-place edit of a middle element is
//! NOT detected; the next boundary change or reconnect resync carries it.

use crate::scene::{Element, SceneSnapshot};

const EMPTY: &str = "empty";

/// `"empty"` or `"{count}-{firstId}-{firstVersion}-{lastId}-{lastVersion}"`.
pub fn elements_fingerprint(elements: &[Element]) -> String {
    match (elements.first(), elements.last()) {
        (Some(first), Some(last)) => format!(
            "{}-{}-{}-{}-{}",
            elements.len(),
            first.id,
            first.version,
            last.id,
            last.version
        ),
        _ => EMPTY.to_string(),
    }
}

/// `"empty"` or `"{count}-{sortedKeysJoined}"`.
pub fn assets_fingerprint<'a, I>(keys: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut keys: Vec<&str> = keys.into_iter().collect();
    if keys.is_empty() {
        return EMPTY.to_string();
    }
    keys.sort_unstable();
    format!("{}-{}", keys.len(), keys.join(","))
}

/// Digest pair of a snapshot. Compared, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeFingerprint {
    pub elements: String,
    pub assets: String,
}

impl ChangeFingerprint {
    pub fn of(snapshot: &SceneSnapshot) -> Self {
        Self {
            elements: elements_fingerprint(&snapshot.elements),
            assets: assets_fingerprint(snapshot.assets.keys().map(String::as_str)),
        }
    }
}

/// True iff nothing was broadcast yet or either digest differs.
pub fn should_broadcast(prev: Option<&ChangeFingerprint>, next: &ChangeFingerprint) -> bool {
    match prev {
        Some(prev) => prev.elements != next.elements || prev.assets != next.assets,
        None => true,
    }
}

/// Remembers the fingerprint of the last scene sent or received.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last: Option<ChangeFingerprint>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `snapshot` must be broadcast, recording it if so.
    pub fn observe(&mut self, snapshot: &SceneSnapshot) -> bool {
        let next = ChangeFingerprint::of(snapshot);
        if should_broadcast(self.last.as_ref(), &next) {
            self.last = Some(next);
            true
        } else {
            false
        }
    }

    /// Record a scene without broadcasting it (remote apply, resync).
    pub fn set_baseline(&mut self, snapshot: &SceneSnapshot) {
        self.last = Some(ChangeFingerprint::of(snapshot));
    }

    pub fn last(&self) -> Option<&ChangeFingerprint> {
        self.last.as_ref()
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
