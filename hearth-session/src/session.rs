//! The per-request session handle.

use crate::error::SessionResult;
use crate::record::{FlashLevel, SessionRecord};
use crate::value::Value;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// What the manager must do with the record when the response starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Intent {
    /// Untouched; an idle-timeout refresh may still apply
    #[default]
    None,
    Save,
    Delete,
    /// Persist under a new identity
    Reset,
}

pub(crate) struct SessionState {
    record: SessionRecord,
    intent: Intent,
    /// Bytes as loaded, kept so an untouched session can be re-persisted
    /// with a fresh expiry without re-encoding.
    loaded: Option<Vec<u8>>,
    finalized: bool,
}

/// Everything the manager needs to persist a finished session.
pub(crate) struct Snapshot {
    pub record: SessionRecord,
    pub intent: Intent,
    pub loaded: Option<Vec<u8>>,
}

/// Session handle given to request handlers.
///
/// Accessors only change the in-memory record; the manager persists it when
/// the response is first written. Cloning the handle is cheap and every clone
/// refers to the same request's session.
///
/// # Panics
///
/// Mutating accessors panic once the response has started, because the
/// change could no longer be persisted.
#[derive(Clone)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    pub(crate) fn new(record: SessionRecord, loaded: Option<Vec<u8>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                record,
                intent: Intent::None,
                loaded,
                finalized: false,
            })),
        }
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.state.lock();
        assert!(
            !state.finalized,
            "session modified after the response was written"
        );
        f(&mut state)
    }

    fn mark_save(state: &mut SessionState) {
        if state.intent != Intent::Reset {
            state.intent = Intent::Save;
        }
    }

    /// Get a value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.lock().record.data.get(key).cloned()
    }

    /// Get a value converted to `T`. Returns `None` if the key is missing or
    /// holds a different shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.to_serde().ok())
    }

    /// Copy of all session data.
    pub fn get_all(&self) -> BTreeMap<String, Value> {
        self.state.lock().record.data.clone()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().record.data.contains_key(key)
    }

    /// Set a value and mark the session for saving.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let (key, value) = (key.into(), value.into());
        self.mutate(|state| {
            state.record.data.insert(key, value);
            Self::mark_save(state);
        });
    }

    /// Set any serializable value under its generic shape.
    pub fn set_serialized<T: Serialize + ?Sized>(
        &self,
        key: impl Into<String>,
        value: &T,
    ) -> SessionResult<()> {
        let value = Value::from_serde(value)?;
        self.set(key, value);
        Ok(())
    }

    /// Replace all session data.
    pub fn set_all(&self, data: BTreeMap<String, Value>) {
        self.mutate(|state| {
            state.record.data = data;
            Self::mark_save(state);
        });
    }

    /// Remove a single value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.mutate(|state| {
            let removed = state.record.data.remove(key);
            if removed.is_some() {
                Self::mark_save(state);
            }
            removed
        })
    }

    /// Clear the session and remove it from storage.
    pub fn delete(&self) {
        self.mutate(|state| {
            state.record = SessionRecord::new();
            state.loaded = None;
            state.intent = Intent::Delete;
        });
    }

    /// Keep the data but move it to a new identity.
    ///
    /// Call this when privileges change (login, logout) so that an identity
    /// obtained before the change can no longer be used.
    pub fn reset(&self) {
        self.mutate(|state| {
            state.loaded = None;
            state.intent = Intent::Reset;
        });
    }

    pub fn has_flash(&self) -> bool {
        self.state.lock().record.has_flash()
    }

    pub fn flash_is_error(&self) -> bool {
        self.state.lock().record.flash_level == FlashLevel::Error
    }

    /// Take the pending flash message, leaving none behind.
    ///
    /// Once the response has been written the message is still returned,
    /// but clearing it is not persisted.
    pub fn flash_message(&self) -> String {
        let mut state = self.state.lock();
        if !state.record.has_flash() {
            return String::new();
        }
        if state.finalized {
            warn!("flash message read after the response was written; it will be shown again");
        } else {
            Self::mark_save(&mut state);
        }
        state.record.flash_level = FlashLevel::None;
        std::mem::take(&mut state.record.flash_message)
    }

    /// Queue an informational flash message for the next request.
    pub fn set_flash_message(&self, message: impl Into<String>) {
        self.set_flash(FlashLevel::Info, message.into());
    }

    /// Queue an error flash message for the next request.
    pub fn set_flash_error(&self, message: impl Into<String>) {
        self.set_flash(FlashLevel::Error, message.into());
    }

    fn set_flash(&self, level: FlashLevel, message: String) {
        self.mutate(|state| {
            state.record.flash_level = level;
            state.record.flash_message = message;
            Self::mark_save(state);
        });
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.state.lock().record.created_at
    }

    /// When the session was last persisted.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().record.updated_at
    }

    pub fn is_finalized(&self) -> bool {
        self.state.lock().finalized
    }

    /// Freeze the session and hand its contents to the persister.
    ///
    /// Returns `None` if the session was already finalized.
    pub(crate) fn finalize(&self, now: DateTime<Utc>) -> Option<Snapshot> {
        let mut state = self.state.lock();
        if state.finalized {
            return None;
        }
        state.finalized = true;
        state.record.updated_at = Some(now);
        Some(Snapshot {
            record: state.record.clone(),
            intent: state.intent,
            loaded: state.loaded.take(),
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Session")
            .field("keys", &state.record.data.keys().collect::<Vec<_>>())
            .field("intent", &state.intent)
            .field("finalized", &state.finalized)
            .finish()
    }
}

#[cfg(any(test, feature = "test-util"))]
mod probe {
    use super::*;

    impl Session {
        /// A session not attached to any manager, for unit-testing handlers.
        ///
        /// Inspect what the handler did with [`Session::probe`].
        pub fn detached() -> Self {
            Self::new(SessionRecord::new(), None)
        }

        /// A detached session pre-populated with `data`.
        pub fn detached_with(data: BTreeMap<String, Value>) -> Self {
            let mut record = SessionRecord::new();
            record.data = data;
            Self::new(record, None)
        }

        /// Observe the session's pending intent and data.
        pub fn probe(&self) -> SessionProbe {
            SessionProbe {
                state: self.state.clone(),
            }
        }
    }

    /// Read-only view of a session's pending intent, for tests.
    pub struct SessionProbe {
        state: Arc<Mutex<SessionState>>,
    }

    impl SessionProbe {
        /// The session will be saved (including after a reset).
        pub fn saved(&self) -> bool {
            matches!(self.state.lock().intent, Intent::Save | Intent::Reset)
        }

        pub fn deleted(&self) -> bool {
            self.state.lock().intent == Intent::Delete
        }

        pub fn reset(&self) -> bool {
            self.state.lock().intent == Intent::Reset
        }

        pub fn data(&self) -> BTreeMap<String, Value> {
            self.state.lock().record.data.clone()
        }

        pub fn record(&self) -> SessionRecord {
            self.state.lock().record.clone()
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use probe::SessionProbe;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set() {
        let session = Session::detached();
        assert!(session.get("user").is_none());

        session.set("user", "alice");
        session.set("visits", 3);

        assert_eq!(session.get("user").unwrap().as_str(), Some("alice"));
        assert_eq!(session.get_as::<i64>("visits"), Some(3));
        assert_eq!(session.get_as::<String>("visits"), None);
        assert!(session.probe().saved());
    }

    #[test]
    fn test_untouched_session_has_no_intent() {
        let session = Session::detached();
        let _ = session.get("anything");
        let _ = session.get_all();
        let probe = session.probe();
        assert!(!probe.saved() && !probe.deleted() && !probe.reset());
    }

    #[test]
    fn test_set_all_replaces() {
        let session = Session::detached();
        session.set("a", 1);
        let mut data = BTreeMap::new();
        data.insert("b".to_string(), Value::from(2));
        session.set_all(data);

        let all = session.get_all();
        assert!(!all.contains_key("a"));
        assert_eq!(all["b"], Value::Int(2));
    }

    #[test]
    fn test_delete_clears_data() {
        let session = Session::detached();
        session.set("a", 1);
        session.delete();

        let probe = session.probe();
        assert!(probe.deleted());
        assert!(!probe.saved());
        assert!(probe.data().is_empty());
    }

    #[test]
    fn test_set_after_delete_saves() {
        let session = Session::detached();
        session.delete();
        session.set("fresh", true);
        let probe = session.probe();
        assert!(probe.saved());
        assert!(!probe.deleted());
    }

    #[test]
    fn test_reset_keeps_data_and_survives_set() {
        let session = Session::detached();
        session.set("user", "alice");
        session.reset();
        session.set("role", "admin");

        let probe = session.probe();
        assert!(probe.reset());
        assert!(probe.saved());
        assert_eq!(probe.data().len(), 2);
    }

    #[test]
    fn test_flash_messages() {
        let session = Session::detached();
        assert!(!session.has_flash());
        assert_eq!(session.flash_message(), "");
        assert!(!session.probe().saved());

        session.set_flash_error("it broke");
        assert!(session.has_flash());
        assert!(session.flash_is_error());

        assert_eq!(session.flash_message(), "it broke");
        assert!(!session.has_flash());
        assert!(!session.flash_is_error());
        assert!(session.probe().saved());

        session.set_flash_message("all good");
        assert!(!session.flash_is_error());
        assert_eq!(session.flash_message(), "all good");
    }

    #[test]
    fn test_serialized_values() {
        #[derive(Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Prefs {
            theme: String,
        }

        let session = Session::detached();
        session
            .set_serialized(
                "prefs",
                &Prefs {
                    theme: "dark".into(),
                },
            )
            .unwrap();
        assert_eq!(
            session.get_as::<Prefs>("prefs"),
            Some(Prefs {
                theme: "dark".into()
            })
        );
    }

    #[test]
    fn test_finalize_once() {
        let session = Session::detached();
        session.set("a", 1);
        let now = Utc::now();

        let snapshot = session.finalize(now).unwrap();
        assert_eq!(snapshot.intent, Intent::Save);
        assert_eq!(snapshot.record.updated_at, Some(now));
        assert!(session.finalize(now).is_none());
        assert!(session.is_finalized());

        // reads still work
        assert_eq!(session.get_as::<i64>("a"), Some(1));
    }

    #[test]
    fn test_flash_read_after_finalize() {
        let session = Session::detached();
        session.set_flash_message("welcome back");
        session.finalize(Utc::now()).unwrap();

        assert_eq!(session.flash_message(), "welcome back");
        assert_eq!(session.flash_message(), "");
    }

    #[test]
    #[should_panic(expected = "session modified after the response was written")]
    fn test_mutation_after_finalize_panics() {
        let session = Session::detached();
        session.finalize(Utc::now());
        session.set("late", true);
    }

    #[test]
    fn test_remove() {
        let session = Session::detached_with(BTreeMap::from([("k".to_string(), Value::from(1))]));
        assert!(session.remove("missing").is_none());
        assert!(!session.probe().saved());
        assert_eq!(session.remove("k"), Some(Value::Int(1)));
        assert!(session.probe().saved());
    }
}
