//! Keyed slot store.
//!
//! A [`Store`] holds a handful of named JSON values. Each slot is locked to
//! the [`Kind`] of its default value, may be mirrored to a
//! [`DurableStorage`] area, may run a pre-write transform, and notifies
//! listeners synchronously on every write.
//!
//! The store is single-threaded: handles are `Rc`-based and listeners run
//! to completion inside `set`. Listeners may read or write the store
//! re-entrantly; nested dispatch deeper than [`MAX_DISPATCH_DEPTH`] is
//! refused with [`StoreError::ReentrancyLimit`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

mod kind;
mod storage;

pub use self::kind::Kind;
pub use self::storage::{DurableStorage, FileStorage, MemoryStorage};

/// Nested `set` calls allowed from inside listeners before writes are refused.
pub const MAX_DISPATCH_DEPTH: usize = 32;

/// Per-slot change listener; receives the committed value.
pub type Listener = Rc<dyn Fn(&Value)>;
/// Store-wide change listener; receives the slot key and committed value.
pub type ChangeListener = Rc<dyn Fn(&str, &Value)>;
/// Pre-write transform. An `Err` message aborts the write.
pub type BeforeSet = Rc<dyn Fn(Value) -> std::result::Result<Value, String>>;

// ── Configuration ──────────────────────────────────────────────────────

/// Store-wide options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    /// Dispatch change events for the initial value committed by `init`.
    pub emit_on_init: bool,
    /// Also broadcast every notified write on the generic change channel.
    pub change_event: bool,
    /// Log slot creation.
    pub logs: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            emit_on_init: false,
            change_event: false,
            logs: true,
        }
    }
}

/// Per-slot options, fixed at `init`.
#[derive(Clone, Default)]
pub struct SlotConfig {
    pub persistent: bool,
    pub notify: bool,
    pub before_set: Option<BeforeSet>,
}

impl SlotConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn notify(mut self, notify: bool) -> Self {
        self.notify = notify;
        self
    }

    pub fn before_set(
        mut self,
        transform: impl Fn(Value) -> std::result::Result<Value, String> + 'static,
    ) -> Self {
        self.before_set = Some(Rc::new(transform));
        self
    }
}

impl fmt::Debug for SlotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotConfig")
            .field("persistent", &self.persistent)
            .field("notify", &self.notify)
            .field("before_set", &self.before_set.is_some())
            .finish()
    }
}

// ── Store ──────────────────────────────────────────────────────────────

struct SlotEntry {
    kind: Kind,
    default: Value,
    config: SlotConfig,
    value: Value,
    listeners: Vec<Listener>,
}

struct Inner {
    config: StoreConfig,
    slots: RefCell<HashMap<String, SlotEntry>>,
    order: RefCell<Vec<String>>,
    change_listeners: RefCell<Vec<ChangeListener>>,
    storage: RefCell<Box<dyn DurableStorage>>,
    depth: Cell<usize>,
}

/// Shared handle to a slot store. Clones refer to the same store.
#[derive(Clone)]
pub struct Store {
    inner: Rc<Inner>,
}

/// Non-owning store reference for listeners that need to read other slots.
#[derive(Clone)]
pub struct WeakStore {
    inner: Weak<Inner>,
}

impl WeakStore {
    pub fn upgrade(&self) -> Option<Store> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.inner.config)
            .field("keys", &self.inner.order.borrow())
            .finish()
    }
}

/// Decrements the dispatch depth when a write finishes, even on unwind.
struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

impl Store {
    pub fn new(config: StoreConfig, storage: impl DurableStorage + 'static) -> Self {
        if config.logs {
            tracing::debug!(?config, "store created");
        }
        Self {
            inner: Rc::new(Inner {
                config,
                slots: RefCell::new(HashMap::new()),
                order: RefCell::new(Vec::new()),
                change_listeners: RefCell::new(Vec::new()),
                storage: RefCell::new(Box::new(storage)),
                depth: Cell::new(0),
            }),
        }
    }

    /// Store over a fresh, unshared in-memory storage area.
    pub fn in_memory(config: StoreConfig) -> Self {
        Self::new(config, MemoryStorage::new())
    }

    pub fn config(&self) -> StoreConfig {
        self.inner.config
    }

    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Initialized slot keys, in creation order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.order.borrow().clone()
    }

    /// Create a slot.
    ///
    /// Persistent slots restore a previously stored value when one exists,
    /// decodes to the slot's kind and passes the slot's transform; otherwise
    /// `default` is used. The default itself is never transformed.
    pub fn init(&self, key: &str, default: Value, config: SlotConfig) -> Result<Slot> {
        if self.inner.slots.borrow().contains_key(key) {
            return Err(StoreError::DuplicateKey(key.to_string()));
        }
        let kind = Kind::of(&default).ok_or_else(|| StoreError::UnsupportedKind(key.to_string()))?;

        let mut value = default.clone();
        if config.persistent {
            if let Some(text) = self.inner.storage.borrow().load(key)? {
                let restored = kind::decode(kind, &text)
                    .and_then(|restored| restore(key, kind, restored, &config));
                match restored {
                    Some(restored) => value = restored,
                    None => tracing::warn!(key, %kind, "stored value is unreadable, using default"),
                }
            }
        }

        if self.inner.config.logs {
            tracing::debug!(
                key,
                %kind,
                persistent = config.persistent,
                notify = config.notify,
                transform = config.before_set.is_some(),
                "slot initialized"
            );
        }

        let initial_write = SlotConfig {
            notify: self.inner.config.emit_on_init,
            ..config.clone()
        };
        self.inner.slots.borrow_mut().insert(
            key.to_string(),
            SlotEntry {
                kind,
                default,
                config,
                value: Value::Null,
                listeners: Vec::new(),
            },
        );
        if let Err(e) = self.commit(key, value, &initial_write) {
            self.inner.slots.borrow_mut().remove(key);
            return Err(e);
        }
        self.inner.order.borrow_mut().push(key.to_string());

        Ok(self.handle(key))
    }

    /// Handle for an existing slot.
    pub fn attach(&self, key: &str) -> Result<Slot> {
        if self.inner.slots.borrow().contains_key(key) {
            Ok(self.handle(key))
        } else {
            Err(StoreError::NotInitialized(key.to_string()))
        }
    }

    /// Current value of `key`, or `None` if no such slot exists.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.slots.borrow().get(key).map(|slot| slot.value.clone())
    }

    pub fn kind(&self, key: &str) -> Option<Kind> {
        self.inner.slots.borrow().get(key).map(|slot| slot.kind)
    }

    /// Write `value` using the slot's own configuration.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let config = self.slot_config(key)?;
        self.set_with(key, value, &config)
    }

    /// Write `value` with an explicit configuration for this one write.
    ///
    /// The value must match the slot's kind. The transform (if any) runs
    /// first, then the value is persisted, committed, and dispatched to the
    /// slot's listeners in registration order, followed by the change
    /// broadcast when enabled.
    pub fn set_with(&self, key: &str, value: Value, config: &SlotConfig) -> Result<()> {
        let kind = self
            .kind(key)
            .ok_or_else(|| StoreError::NotInitialized(key.to_string()))?;
        check_kind(key, kind, &value)?;

        let value = match &config.before_set {
            Some(transform) => {
                let transformed = transform(value).map_err(|message| StoreError::Transform {
                    key: key.to_string(),
                    message,
                })?;
                check_kind(key, kind, &transformed)?;
                transformed
            }
            None => value,
        };

        self.commit(key, value, config)
    }

    /// Restore the slot's default value.
    pub fn reset(&self, key: &str) -> Result<()> {
        let (default, config) = {
            let slots = self.inner.slots.borrow();
            let slot = slots
                .get(key)
                .ok_or_else(|| StoreError::NotInitialized(key.to_string()))?;
            (slot.default.clone(), slot.config.clone())
        };
        self.set_with(key, default, &config)
    }

    /// Reset each listed slot in order.
    pub fn reset_all<S: AsRef<str>>(&self, keys: &[S]) -> Result<()> {
        keys.iter().try_for_each(|key| self.reset(key.as_ref()))
    }

    /// Shallow-merge `partial` into an object slot and write the result.
    pub fn update(&self, key: &str, partial: Map<String, Value>) -> Result<()> {
        let kind = self
            .kind(key)
            .ok_or_else(|| StoreError::NotInitialized(key.to_string()))?;
        let mut fields = match self.get(key) {
            Some(Value::Object(fields)) if kind == Kind::Object => fields,
            _ => {
                return Err(StoreError::NotAnObject {
                    key: key.to_string(),
                    kind,
                })
            }
        };
        fields.extend(partial);
        self.set(key, Value::Object(fields))
    }

    /// Run `listener` on every future notified write of `key`.
    pub fn add_listener(&self, key: &str, listener: impl Fn(&Value) + 'static) -> Result<Slot> {
        let mut slots = self.inner.slots.borrow_mut();
        let slot = slots
            .get_mut(key)
            .ok_or_else(|| StoreError::NotInitialized(key.to_string()))?;
        slot.listeners.push(Rc::new(listener));
        drop(slots);
        Ok(self.handle(key))
    }

    /// Listen on the store-wide change channel.
    ///
    /// Only fires when [`StoreConfig::change_event`] is enabled.
    pub fn add_change_listener(&self, listener: impl Fn(&str, &Value) + 'static) {
        self.inner.change_listeners.borrow_mut().push(Rc::new(listener));
    }

    fn handle(&self, key: &str) -> Slot {
        Slot {
            store: self.clone(),
            key: Rc::from(key),
        }
    }

    fn slot_config(&self, key: &str) -> Result<SlotConfig> {
        self.inner
            .slots
            .borrow()
            .get(key)
            .map(|slot| slot.config.clone())
            .ok_or_else(|| StoreError::NotInitialized(key.to_string()))
    }

    fn commit(&self, key: &str, value: Value, config: &SlotConfig) -> Result<()> {
        let depth = self.inner.depth.get();
        if depth >= MAX_DISPATCH_DEPTH {
            tracing::warn!(key, depth, "re-entrant write refused");
            return Err(StoreError::ReentrancyLimit {
                key: key.to_string(),
                depth,
            });
        }
        self.inner.depth.set(depth + 1);
        let _guard = DepthGuard(&self.inner.depth);

        if config.persistent {
            self.inner
                .storage
                .borrow_mut()
                .save(key, &kind::encode(&value))?;
        }

        let listeners = {
            let mut slots = self.inner.slots.borrow_mut();
            let slot = slots
                .get_mut(key)
                .ok_or_else(|| StoreError::NotInitialized(key.to_string()))?;
            slot.value = value.clone();
            if !config.notify {
                return Ok(());
            }
            slot.listeners.clone()
        };

        tracing::debug!(key, listeners = listeners.len(), "dispatching change");
        for listener in &listeners {
            listener(&value);
        }

        if self.inner.config.change_event {
            let broadcast = self.inner.change_listeners.borrow().clone();
            for listener in &broadcast {
                listener(key, &value);
            }
        }
        Ok(())
    }
}

/// Run a restored value through the slot's transform. `None` rejects it.
fn restore(key: &str, kind: Kind, value: Value, config: &SlotConfig) -> Option<Value> {
    let Some(transform) = &config.before_set else {
        return Some(value);
    };
    match transform(value) {
        Ok(restored) if kind.matches(&restored) => Some(restored),
        Ok(_) => None,
        Err(message) => {
            tracing::warn!(key, %message, "stored value rejected by transform");
            None
        }
    }
}

fn check_kind(key: &str, kind: Kind, value: &Value) -> Result<()> {
    if kind.matches(value) {
        Ok(())
    } else {
        Err(StoreError::TypeMismatch {
            key: key.to_string(),
            expected: kind,
            got: kind::kind_name(value),
        })
    }
}

// ── Slot handle ────────────────────────────────────────────────────────

/// Handle bound to one slot of a [`Store`].
#[derive(Clone)]
pub struct Slot {
    store: Store,
    key: Rc<str>,
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot").field("key", &&*self.key).finish()
    }
}

impl Slot {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The slot's kind; `None` if the key has no slot in the store.
    pub fn kind(&self) -> Option<Kind> {
        self.store.kind(&self.key)
    }

    pub fn default_value(&self) -> Value {
        self.store
            .inner
            .slots
            .borrow()
            .get(&*self.key)
            .map(|slot| slot.default.clone())
            .unwrap_or_default()
    }

    pub fn get(&self) -> Value {
        self.store.get(&self.key).unwrap_or_default()
    }

    pub fn set(&self, value: Value) -> Result<()> {
        self.store.set(&self.key, value)
    }

    pub fn reset(&self) -> Result<()> {
        self.store.reset(&self.key)
    }

    pub fn update(&self, partial: Map<String, Value>) -> Result<()> {
        self.store.update(&self.key, partial)
    }

    /// Register a listener; returns `self` for chaining.
    pub fn add_listener(&self, listener: impl Fn(&Value) + 'static) -> &Self {
        if let Some(slot) = self.store.inner.slots.borrow_mut().get_mut(&*self.key) {
            slot.listeners.push(Rc::new(listener));
        }
        self
    }
}
