pub mod css;
pub mod error;
pub mod overlay;
pub mod participant;
pub mod snapshot;
pub mod store;

#[cfg(feature = "wasm")]
pub mod wasm;

pub use css::{derive_css, normalize_whitespace, Animation};
pub use error::{SnapshotError, StorageError, StoreError};
pub use overlay::OverlayState;
pub use participant::{Participant, ServerRef, Timestamp};
pub use store::{Kind, SlotConfig, Store, StoreConfig};

use snapshot::SnapshotFormat;

/// Derive the overlay stylesheet straight from a saved document, without
/// touching any persistent storage.
pub fn overlay_css_from_document(
    base_css: &str,
    format: SnapshotFormat,
    text: &str,
) -> Result<String, SnapshotError> {
    let store = Store::in_memory(StoreConfig {
        logs: false,
        ..StoreConfig::default()
    });
    let state = OverlayState::new(store, base_css)?;
    snapshot::import_snapshot(&state, format, text)?;
    Ok(state.css())
}
