//! The overlay builder's application state.
//!
//! Three persistent slots back every editor panel: the default
//! participant, the participant list, and the server reference. The
//! derived stylesheet is regenerated whenever either participant slot
//! changes.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::css::{self, Animation};
use crate::error::Result;
use crate::participant::{self, Participant, ServerRef};
use crate::store::{SlotConfig, Slot, Store, WeakStore};

/// Slot names, also used as durable storage keys.
pub mod keys {
    pub const DEFAULT_USER: &str = "defaultUser";
    pub const USERS: &str = "users";
    pub const SERVER: &str = "server";

    pub const ALL: [&str; 3] = [DEFAULT_USER, USERS, SERVER];
}

const OVERLAY_BASE_URL: &str = "https://streamkit.discord.com/overlay/voice";
const SERVER_PLACEHOLDER: &str = "<SERVER ID>";
const VC_PLACEHOLDER: &str = "<VOICE CHAT ID>";

/// Shared inputs of the stylesheet binding.
struct CssBinding {
    store: WeakStore,
    base_css: String,
    animation: Cell<Animation>,
    current: RefCell<String>,
}

impl CssBinding {
    fn refresh(&self) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let default_user = store
            .get(keys::DEFAULT_USER)
            .and_then(|v| participant::default_participant_from_value(&v));
        let users = store
            .get(keys::USERS)
            .map(|v| participant::participants_from_value(&v))
            .unwrap_or_default();
        let css = css::derive_css_with(
            &self.base_css,
            self.animation.get(),
            default_user.as_ref(),
            &users,
        );
        tracing::debug!(bytes = css.len(), participants = users.len(), "overlay css regenerated");
        *self.current.borrow_mut() = css;
    }
}

pub struct OverlayState {
    store: Store,
    default_user: Slot,
    users: Slot,
    server: Slot,
    binding: Rc<CssBinding>,
}

impl std::fmt::Debug for OverlayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayState")
            .field("store", &self.store)
            .field("animation", &self.binding.animation.get())
            .finish()
    }
}

impl OverlayState {
    /// Create the overlay slots on `store` and bind the stylesheet.
    ///
    /// `base_css` is the overlay page's static stylesheet; it is prepended
    /// verbatim to every regenerated stylesheet.
    pub fn new(store: Store, base_css: impl Into<String>) -> Result<Self> {
        let events = SlotConfig::new().persistent(true).notify(true);
        let default_user = store.init(keys::DEFAULT_USER, json!({}), events.clone())?;
        let users = store.init(
            keys::USERS,
            json!([]),
            events.clone().before_set(participant::order_participants),
        )?;
        let server = store.init(keys::SERVER, json!({}), events)?;

        let binding = Rc::new(CssBinding {
            store: store.downgrade(),
            base_css: base_css.into(),
            animation: Cell::new(Animation::default()),
            current: RefCell::new(String::new()),
        });
        for slot in [&default_user, &users] {
            let binding = Rc::clone(&binding);
            slot.add_listener(move |_| binding.refresh());
        }
        binding.refresh();

        Ok(Self {
            store,
            default_user,
            users,
            server,
            binding,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn default_user_slot(&self) -> &Slot {
        &self.default_user
    }

    pub fn users_slot(&self) -> &Slot {
        &self.users
    }

    pub fn server_slot(&self) -> &Slot {
        &self.server
    }

    // ── Reads ─────────────────────────────────────────────────────────

    /// Current derived stylesheet.
    pub fn css(&self) -> String {
        self.binding.current.borrow().clone()
    }

    pub fn animation(&self) -> Animation {
        self.binding.animation.get()
    }

    /// Switch the speaking effect and regenerate the stylesheet.
    pub fn set_animation(&self, animation: Animation) {
        self.binding.animation.set(animation);
        self.binding.refresh();
    }

    pub fn default_participant(&self) -> Option<Participant> {
        participant::default_participant_from_value(&self.default_user.get())
    }

    pub fn participants(&self) -> Vec<Participant> {
        participant::participants_from_value(&self.users.get())
    }

    pub fn server(&self) -> ServerRef {
        serde_json::from_value(self.server.get()).unwrap_or_default()
    }

    /// Streamkit voice overlay URL, with placeholders for unset ids.
    pub fn overlay_url(&self) -> String {
        let server = self.server();
        let server_id = non_blank(server.server_id.as_deref()).unwrap_or(SERVER_PLACEHOLDER);
        let vc_id = non_blank(server.vc_id.as_deref()).unwrap_or(VC_PLACEHOLDER);
        format!("{OVERLAY_BASE_URL}/{server_id}/{vc_id}")
    }

    // ── Default participant ───────────────────────────────────────────

    /// Replace the default participant. Returns `false` (no write) when
    /// either URL is blank.
    pub fn set_default_participant(&self, url: &str, url_speaking: &str) -> Result<bool> {
        let (Some(url), Some(url_speaking)) = (non_blank(Some(url)), non_blank(Some(url_speaking)))
        else {
            return Ok(false);
        };
        self.default_user
            .set(Participant::fallback(url, url_speaking).to_value()?)?;
        Ok(true)
    }

    /// Change the given URLs of an existing default participant; blank
    /// inputs are left alone.
    pub fn update_default_participant(
        &self,
        url: Option<&str>,
        url_speaking: Option<&str>,
    ) -> Result<bool> {
        if self.default_participant().is_none() {
            return Ok(false);
        }
        let partial = url_fields(url, url_speaking);
        if partial.is_empty() {
            return Ok(false);
        }
        self.default_user.update(partial)?;
        Ok(true)
    }

    pub fn remove_default_participant(&self) -> Result<bool> {
        if self.default_participant().is_none() {
            return Ok(false);
        }
        self.default_user.reset()?;
        Ok(true)
    }

    // ── Participant list ──────────────────────────────────────────────

    /// Append a participant stamped with the current time. Returns `false`
    /// (no write) when any field is blank. Duplicate ids are not checked.
    pub fn add_participant(&self, id: &str, url: &str, url_speaking: &str) -> Result<bool> {
        let (Some(id), Some(url), Some(url_speaking)) = (
            non_blank(Some(id)),
            non_blank(Some(url)),
            non_blank(Some(url_speaking)),
        ) else {
            return Ok(false);
        };
        let entry = Participant::new(id, url, url_speaking).with_date(Utc::now());
        let mut list = self.users_list();
        list.push(entry.to_value()?);
        self.users.set(Value::Array(list))?;
        Ok(true)
    }

    /// Change the given URLs of every entry with `id`; blank inputs are
    /// left alone.
    pub fn update_participant(
        &self,
        id: &str,
        url: Option<&str>,
        url_speaking: Option<&str>,
    ) -> Result<bool> {
        let partial = url_fields(url, url_speaking);
        if partial.is_empty() {
            return Ok(false);
        }
        let mut list = self.users_list();
        let mut changed = false;
        for entry in list.iter_mut().filter(|entry| entry_id(entry) == Some(id)) {
            if let Value::Object(fields) = entry {
                fields.extend(partial.clone());
                changed = true;
            }
        }
        if changed {
            self.users.set(Value::Array(list))?;
        }
        Ok(changed)
    }

    pub fn remove_participant(&self, id: &str) -> Result<bool> {
        let mut list = self.users_list();
        let before = list.len();
        list.retain(|entry| entry_id(entry) != Some(id));
        if list.len() == before {
            return Ok(false);
        }
        self.users.set(Value::Array(list))?;
        Ok(true)
    }

    // ── Server reference ──────────────────────────────────────────────

    /// Set or clear (blank input) the server id.
    pub fn set_server_id(&self, server_id: &str) -> Result<()> {
        self.set_server_field("serverId", server_id)
    }

    /// Set or clear (blank input) the voice channel id.
    pub fn set_vc_id(&self, vc_id: &str) -> Result<()> {
        self.set_server_field("vcId", vc_id)
    }

    fn set_server_field(&self, field: &str, text: &str) -> Result<()> {
        let mut server = match self.server.get() {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        match non_blank(Some(text)) {
            Some(text) => {
                server.insert(field.to_string(), Value::String(text.to_string()));
            }
            None => {
                server.remove(field);
            }
        }
        self.server.set(Value::Object(server))
    }

    /// Restore all three slots to their defaults.
    pub fn reset(&self) -> Result<()> {
        self.store.reset_all(&keys::ALL)
    }

    fn users_list(&self) -> Vec<Value> {
        match self.users.get() {
            Value::Array(list) => list,
            _ => Vec::new(),
        }
    }
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}

fn entry_id(entry: &Value) -> Option<&str> {
    entry.get("id").and_then(Value::as_str)
}

fn url_fields(url: Option<&str>, url_speaking: Option<&str>) -> Map<String, Value> {
    let mut fields = Map::new();
    if let Some(url) = non_blank(url) {
        fields.insert("url".into(), Value::String(url.to_string()));
    }
    if let Some(url_speaking) = non_blank(url_speaking) {
        fields.insert("urlSpeaking".into(), Value::String(url_speaking.to_string()));
    }
    fields
}
