//! Scene values exchanged with the drawing surface.
//!
//! The engine never interprets element geometry: an element is an id, a
//! monotonically increasing version and an opaque payload owned by the
//! canvas.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One drawable element as seen by the session engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub id: String,
    /// Bumped by the canvas on every edit of this element.
    pub version: u64,
    pub payload: Vec<u8>,
}

impl Element {
    pub fn new(id: impl Into<String>, version: u64) -> Self {
        Self {
            id: id.into(),
            version,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}

/// Full state of the shared document: ordered elements plus the binary
/// assets (images) they reference, keyed by asset id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    pub elements: Vec<Element>,
    pub assets: BTreeMap<String, Vec<u8>>,
}

impl SceneSnapshot {
    pub fn new(elements: Vec<Element>) -> Self {
        Self {
            elements,
            assets: BTreeMap::new(),
        }
    }

    pub fn with_asset(mut self, key: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.assets.insert(key.into(), bytes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.assets.is_empty()
    }
}

/// Local pointer position in scene coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pointer {
    pub x: f64,
    pub y: f64,
}

impl Pointer {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}
