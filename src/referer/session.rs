//! Session records and the per-request handle over them.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::referer::store::{Referer, RefererHandle};

/// One visitor lineage's key/value data.
///
/// Owned by the referer store; handles only hold a shared reference.
#[derive(Debug)]
pub struct SessionRecord {
    id: String,
    last_access: Mutex<Instant>,
    data: Mutex<HashMap<String, Value>>,
}

impl SessionRecord {
    pub(crate) fn new(id: String, now: Instant) -> Self {
        Self {
            id,
            last_access: Mutex::new(now),
            data: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn last_access(&self) -> Instant {
        *self.last_access.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn touch(&self, now: Instant) {
        *self.last_access.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    /// True once `ttl` has fully elapsed since the last access.
    ///
    /// A deadline past the clock's range never expires.
    pub(crate) fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        self.last_access()
            .checked_add(ttl)
            .is_some_and(|deadline| deadline < now)
    }

    fn data(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-request view over one session record.
#[derive(Debug, Clone)]
pub struct Session {
    record: Arc<SessionRecord>,
    referer: RefererHandle,
}

impl Session {
    pub(crate) fn new(record: Arc<SessionRecord>, referer: RefererHandle) -> Self {
        Self { record, referer }
    }

    /// Id to hand to dependent requests so they can find this session via [`Session::old`].
    pub fn id(&self) -> &str {
        self.record.id()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.record.data().insert(key.into(), value.into());
    }

    /// Value rendered as text; empty when the key is unset.
    ///
    /// Strings come back verbatim, everything else in its JSON form.
    pub fn get(&self, key: &str) -> String {
        match self.val(key) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
        }
    }

    pub fn val(&self, key: &str) -> Option<Value> {
        self.record.data().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.record.data().remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.record.data().keys().cloned().collect()
    }

    /// Look up an earlier session by id.
    ///
    /// `None` when the id was never issued, has expired, or the store is gone.
    pub fn old(&self, id: &str) -> Option<Session> {
        self.referer.get(id)
    }

    /// Whether both handles view the same record.
    pub fn same_record(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.record, &other.record)
    }
}
