//! Saved overlay documents.
//!
//! Two file shapes are read: the legacy `.dvco` layout (flat server ids,
//! `url_speaking` on users) and the current `.dvog` layout. Only `.dvog`
//! is written.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{SnapshotError, StoreError};
use crate::overlay::{keys, OverlayState};
use crate::participant::{Participant, ServerRef};
use crate::store::SlotConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    /// `.dvco`: `{serverId, vcId, users: [{id, url, url_speaking}]}`
    Legacy,
    /// `.dvog`: `{defaultUser, users, server}`
    Current,
}

impl SnapshotFormat {
    pub fn from_file_name(name: &str) -> Result<Self, SnapshotError> {
        if name.ends_with(".dvco") {
            Ok(SnapshotFormat::Legacy)
        } else if name.ends_with(".dvog") {
            Ok(SnapshotFormat::Current)
        } else {
            Err(SnapshotError::UnknownFormat(name.to_string()))
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            SnapshotFormat::Legacy => "dvco",
            SnapshotFormat::Current => "dvog",
        }
    }
}

impl fmt::Display for SnapshotFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Current document shape. Absent fields are omitted, never `null`.
///
/// Participant fields this crate does not interpret are carried through
/// import and export unchanged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_user: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<Participant>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyDocument {
    #[serde(default)]
    server_id: Option<String>,
    #[serde(default)]
    vc_id: Option<String>,
    #[serde(default)]
    users: Option<Vec<LegacyUser>>,
}

#[derive(Debug, Deserialize)]
struct LegacyUser {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    url: String,
    #[serde(default)]
    url_speaking: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<LegacyUser> for Participant {
    fn from(user: LegacyUser) -> Self {
        Participant {
            id: user.id,
            url: user.url,
            url_speaking: user.url_speaking,
            date: None,
            extra: user.extra,
        }
    }
}

/// What an import writes into the store.
///
/// `users` is `Some` even when empty for legacy documents, which always
/// replace the list when they carry one.
struct ImportPlan {
    default_user: Option<Map<String, Value>>,
    users: Option<Vec<Participant>>,
    server: Option<ServerRef>,
}

impl Snapshot {
    /// Capture the non-empty parts of the current state.
    pub fn from_state(state: &OverlayState) -> Self {
        let default_user = match state.default_user_slot().get() {
            Value::Object(fields) if !fields.is_empty() => Some(fields),
            _ => None,
        };
        let users = Some(state.participants()).filter(|users| !users.is_empty());
        let server = Some(state.server()).filter(|server| !server.is_empty());
        Self {
            default_user,
            users,
            server,
        }
    }

    pub fn parse(text: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn into_plan(self) -> ImportPlan {
        ImportPlan {
            default_user: self.default_user.filter(|fields| !fields.is_empty()),
            users: self.users.filter(|users| !users.is_empty()),
            server: self.server.filter(|server| !server.is_empty()),
        }
    }
}

impl LegacyDocument {
    fn into_plan(self) -> ImportPlan {
        let server = ServerRef {
            server_id: self.server_id.filter(|id| !id.is_empty()),
            vc_id: self.vc_id.filter(|id| !id.is_empty()),
        };
        ImportPlan {
            default_user: None,
            users: self
                .users
                .map(|users| users.into_iter().map(Participant::from).collect()),
            server: Some(server).filter(|server| !server.is_empty()),
        }
    }
}

/// Export file name for `date`: `discord-vc-overlay-YYYY-MM-DD.dvog`.
pub fn export_file_name(date: NaiveDate) -> String {
    format!(
        "discord-vc-overlay-{}.{}",
        date.format("%Y-%m-%d"),
        SnapshotFormat::Current.extension()
    )
}

/// Replace the overlay state with a saved document.
///
/// The document is parsed completely before anything is touched; a
/// malformed document leaves the state as it was. Otherwise all slots are
/// reset and the document's non-empty parts are written.
///
/// If a write fails after the reset (a storage backend error), the
/// previous values are written back before the error is returned. When
/// storage keeps failing, only the in-memory state is restored and the
/// storage area may hold part of the import.
pub fn import_snapshot(
    state: &OverlayState,
    format: SnapshotFormat,
    text: &str,
) -> Result<(), SnapshotError> {
    let plan = match format {
        SnapshotFormat::Legacy => serde_json::from_str::<LegacyDocument>(text)?.into_plan(),
        SnapshotFormat::Current => Snapshot::parse(text)?.into_plan(),
    };
    let imported_users = plan.users.as_ref().map_or(0, Vec::len);
    let writes = plan.into_writes()?;

    let previous: Vec<(&str, Value)> = keys::ALL
        .iter()
        .filter_map(|&key| state.store().get(key).map(|value| (key, value)))
        .collect();
    if let Err(e) = apply(state, writes) {
        tracing::warn!(%format, error = %e, "overlay import failed, restoring previous state");
        restore(state, previous);
        return Err(e.into());
    }

    tracing::info!(%format, users = imported_users, "overlay document imported");
    Ok(())
}

impl ImportPlan {
    fn into_writes(self) -> Result<Vec<(&'static str, Value)>, SnapshotError> {
        let mut writes = Vec::new();
        if let Some(fields) = self.default_user {
            writes.push((keys::DEFAULT_USER, Value::Object(fields)));
        }
        if let Some(users) = self.users {
            let list = users
                .iter()
                .map(Participant::to_value)
                .collect::<serde_json::Result<Vec<_>>>()?;
            writes.push((keys::USERS, Value::Array(list)));
        }
        if let Some(server) = self.server {
            writes.push((keys::SERVER, serde_json::to_value(&server)?));
        }
        Ok(writes)
    }
}

fn apply(state: &OverlayState, writes: Vec<(&str, Value)>) -> Result<(), StoreError> {
    state.reset()?;
    writes
        .into_iter()
        .try_for_each(|(key, value)| state.store().set(key, value))
}

fn restore(state: &OverlayState, previous: Vec<(&str, Value)>) {
    let in_memory = SlotConfig::new().notify(true);
    for (key, value) in previous {
        if let Err(e) = state.store().set(key, value.clone()) {
            tracing::warn!(key, error = %e, "could not persist restored value");
            if let Err(e) = state.store().set_with(key, value, &in_memory) {
                tracing::warn!(key, error = %e, "could not restore value");
            }
        }
    }
}

/// [`import_snapshot`] with the format taken from the file name.
pub fn import_file(state: &OverlayState, file_name: &str, text: &str) -> Result<(), SnapshotError> {
    let format = SnapshotFormat::from_file_name(file_name)?;
    import_snapshot(state, format, text)
}
