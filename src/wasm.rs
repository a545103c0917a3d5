//! WASM bindings for the overlay builder.
//!
//! Exposes stylesheet generation to JavaScript via wasm-bindgen.
//! Build with: `wasm-pack build --target web --features wasm`

use wasm_bindgen::prelude::*;

use crate::snapshot::SnapshotFormat;

/// Derive the overlay stylesheet from a saved `.dvog` document.
///
/// Returns the single-line CSS on success, or throws a JS error when the
/// document is malformed.
#[wasm_bindgen]
pub fn derive_overlay_css(base_css: &str, document: &str) -> Result<String, JsError> {
    crate::overlay_css_from_document(base_css, SnapshotFormat::Current, document)
        .map_err(|e| JsError::new(&e.to_string()))
}

/// Derive the overlay stylesheet from a legacy `.dvco` document.
#[wasm_bindgen]
pub fn derive_overlay_css_legacy(base_css: &str, document: &str) -> Result<String, JsError> {
    crate::overlay_css_from_document(base_css, SnapshotFormat::Legacy, document)
        .map_err(|e| JsError::new(&e.to_string()))
}

/// Collapse a stylesheet onto one line.
#[wasm_bindgen]
pub fn normalize_css(css: &str) -> String {
    crate::css::normalize_whitespace(css)
}
