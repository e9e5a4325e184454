//! Mutually exclusive key-value store shared between threads.
//!
//! [`SynchronizedContainer`] holds configuration and result values keyed by string.
//! Every access goes through a single reentrant lock per instance, so callers never
//! need their own locking. Two independent gates control ordinary access:
//!
//! - `readable` must be set for [`get`](SynchronizedContainer::get) and friends
//! - `writeable` must be set for [`set`](SynchronizedContainer::set) and friends
//!
//! A [`BypassToken`] is generated when the container is created. It can be claimed
//! exactly once; its holder may read and write regardless of the gates. This is how
//! an owning layer keeps write access to a container it exposes read-only.
//!
//! ```
//! use plasma_daq::container::SynchronizedContainer;
//! use serde_json::json;
//!
//! let display = SynchronizedContainer::new();
//! let token = display.claim_token()?;
//! display.set_writeable(false);
//!
//! assert!(display.set("Electron temperature (eV)", json!(3.2)).is_err());
//! display.set_with_token(&token, "Electron temperature (eV)", json!(3.2))?;
//! assert_eq!(display.get("Electron temperature (eV)")?, Some(json!(3.2)));
//!
//! // The token cannot be handed out twice.
//! assert!(display.claim_token().is_err());
//! # Ok::<(), plasma_daq::ProbeError>(())
//! ```

use crate::error::{ProbeError, Result};
use parking_lot::{Mutex, ReentrantMutex};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};
use uuid::Uuid;

/// Single-use credential that bypasses the container gates.
///
/// Deliberately not `Clone`: there is exactly one holder.
#[derive(Debug, PartialEq, Eq)]
pub struct BypassToken(Uuid);

impl BypassToken {
    /// Opaque identifier of the token.
    pub fn id(&self) -> Uuid {
        self.0
    }
}

/// Lock-guarded string-keyed store with read/write gates and a bypass token.
pub struct SynchronizedContainer {
    data: ReentrantMutex<RefCell<HashMap<String, Value>>>,
    readable: AtomicBool,
    writeable: AtomicBool,
    token_id: Uuid,
    unclaimed: Mutex<Option<BypassToken>>,
}

impl SynchronizedContainer {
    /// Create an empty container with both gates open.
    pub fn new() -> Self {
        Self::with_data(HashMap::new(), true, true)
    }

    /// Create a container holding a deep copy of `map`.
    pub fn from_map(map: &HashMap<String, Value>) -> Self {
        Self::with_data(map.clone(), true, true)
    }

    /// Deep-copy another container, inheriting its gate settings.
    ///
    /// The copy gets its own, unclaimed bypass token.
    pub fn from_container(other: &SynchronizedContainer) -> Self {
        let data = {
            let guard = other.data.lock();
            let map = guard.borrow().clone();
            map
        };
        Self::with_data(data, other.is_readable(), other.is_writeable())
    }

    fn with_data(data: HashMap<String, Value>, readable: bool, writeable: bool) -> Self {
        let token_id = Uuid::new_v4();
        Self {
            data: ReentrantMutex::new(RefCell::new(data)),
            readable: AtomicBool::new(readable),
            writeable: AtomicBool::new(writeable),
            token_id,
            unclaimed: Mutex::new(Some(BypassToken(token_id))),
        }
    }

    /// Open or close the read gate.
    pub fn set_readable(&self, readable: bool) {
        self.readable.store(readable, Ordering::SeqCst);
    }

    /// Open or close the write gate.
    pub fn set_writeable(&self, writeable: bool) {
        self.writeable.store(writeable, Ordering::SeqCst);
    }

    /// Whether ordinary reads are allowed.
    pub fn is_readable(&self) -> bool {
        self.readable.load(Ordering::SeqCst)
    }

    /// Whether ordinary writes are allowed.
    pub fn is_writeable(&self) -> bool {
        self.writeable.load(Ordering::SeqCst)
    }

    /// Claim the bypass token. Succeeds exactly once per container.
    pub fn claim_token(&self) -> Result<BypassToken> {
        match self.unclaimed.lock().take() {
            Some(token) => {
                debug!(token = %token.0, "Bypass token claimed");
                Ok(token)
            }
            None => Err(ProbeError::TokenAlreadyClaimed),
        }
    }

    /// Whether the bypass token is still available.
    pub fn token_available(&self) -> bool {
        self.unclaimed.lock().is_some()
    }

    fn check_readable(&self) -> Result<()> {
        if self.is_readable() {
            Ok(())
        } else {
            Err(ProbeError::Permission("readable"))
        }
    }

    fn check_writeable(&self) -> Result<()> {
        if self.is_writeable() {
            Ok(())
        } else {
            Err(ProbeError::Permission("writeable"))
        }
    }

    fn check_token(&self, token: &BypassToken) -> Result<()> {
        if token.0 == self.token_id {
            Ok(())
        } else {
            Err(ProbeError::InvalidToken)
        }
    }

    fn read_value(&self, key: &str) -> Option<Value> {
        let guard = self.data.lock();
        let value = guard.borrow().get(key).cloned();
        value
    }

    fn write_value(&self, key: &str, value: Value) -> Option<Value> {
        trace!(key, "Container write");
        let guard = self.data.lock();
        let previous = guard.borrow_mut().insert(key.to_string(), value);
        previous
    }

    /// Read a value.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.check_readable()?;
        Ok(self.read_value(key))
    }

    /// Read a value and deserialize it into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Write a value, returning the one it replaced.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<Option<Value>> {
        self.check_writeable()?;
        Ok(self.write_value(key, value.into()))
    }

    /// Remove a key. Requires the write gate.
    pub fn remove(&self, key: &str) -> Result<Option<Value>> {
        self.check_writeable()?;
        let guard = self.data.lock();
        let removed = guard.borrow_mut().remove(key);
        Ok(removed)
    }

    /// Whether `key` is present. Requires the read gate.
    pub fn contains_key(&self, key: &str) -> Result<bool> {
        self.check_readable()?;
        let guard = self.data.lock();
        let present = guard.borrow().contains_key(key);
        Ok(present)
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        self.check_readable()?;
        let guard = self.data.lock();
        let mut keys: Vec<String> = guard.borrow().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    /// Number of entries. Not gated.
    pub fn len(&self) -> usize {
        let guard = self.data.lock();
        let len = guard.borrow().len();
        len
    }

    /// Whether the container is empty. Not gated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deep copy of the whole mapping.
    pub fn snapshot(&self) -> Result<HashMap<String, Value>> {
        self.check_readable()?;
        let guard = self.data.lock();
        let map = guard.borrow().clone();
        Ok(map)
    }

    /// Replace the whole mapping in one step. Readers never observe a mix of old
    /// and new entries.
    pub fn replace_all(&self, map: HashMap<String, Value>) -> Result<()> {
        self.check_writeable()?;
        self.replace_unchecked(map);
        Ok(())
    }

    fn replace_unchecked(&self, map: HashMap<String, Value>) {
        let guard = self.data.lock();
        *guard.borrow_mut() = map;
    }

    /// Atomically read-modify-write one key. Requires both gates.
    ///
    /// The updater runs with the container lock held but without any borrow of the
    /// map, so it may itself read other keys of the same container.
    pub fn update<F>(&self, key: &str, updater: F) -> Result<()>
    where
        F: FnOnce(Option<Value>) -> Value,
    {
        self.check_readable()?;
        self.check_writeable()?;
        let guard = self.data.lock();
        let old = guard.borrow_mut().remove(key);
        let new = updater(old);
        guard.borrow_mut().insert(key.to_string(), new);
        Ok(())
    }

    /// Read a value regardless of the gates.
    pub fn get_with_token(&self, token: &BypassToken, key: &str) -> Result<Option<Value>> {
        self.check_token(token)?;
        Ok(self.read_value(key))
    }

    /// Write a value regardless of the gates.
    pub fn set_with_token(
        &self,
        token: &BypassToken,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<Option<Value>> {
        self.check_token(token)?;
        Ok(self.write_value(key, value.into()))
    }

    /// Replace the whole mapping regardless of the gates.
    pub fn replace_all_with_token(
        &self,
        token: &BypassToken,
        map: HashMap<String, Value>,
    ) -> Result<()> {
        self.check_token(token)?;
        self.replace_unchecked(map);
        Ok(())
    }

    /// Deep copy of the mapping regardless of the gates.
    pub fn snapshot_with_token(&self, token: &BypassToken) -> Result<HashMap<String, Value>> {
        self.check_token(token)?;
        let guard = self.data.lock();
        let map = guard.borrow().clone();
        Ok(map)
    }
}

impl Default for SynchronizedContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SynchronizedContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronizedContainer")
            .field("entries", &self.len())
            .field("readable", &self.is_readable())
            .field("writeable", &self.is_writeable())
            .field("token_available", &self.token_available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_basic_get_set() {
        let container = SynchronizedContainer::new();
        assert!(container.is_empty());
        assert_eq!(container.set("gain", json!(10.0)).unwrap(), None);
        assert_eq!(container.get("gain").unwrap(), Some(json!(10.0)));
        assert_eq!(container.get_as::<f64>("gain").unwrap(), Some(10.0));
        assert_eq!(container.get("missing").unwrap(), None);
        assert_eq!(container.len(), 1);
    }

    #[test]
    fn test_gates_are_independent() {
        let container = SynchronizedContainer::new();
        container.set("a", 1).unwrap();

        container.set_readable(false);
        assert!(matches!(
            container.get("a"),
            Err(ProbeError::Permission("readable"))
        ));
        // Writes still allowed while reads are closed.
        container.set("b", 2).unwrap();

        container.set_readable(true);
        container.set_writeable(false);
        assert!(matches!(
            container.set("c", 3),
            Err(ProbeError::Permission("writeable"))
        ));
        assert_eq!(container.get("b").unwrap(), Some(json!(2)));
        assert!(container.update("a", |_| json!(9)).is_err());
    }

    #[test]
    fn test_token_single_claim() {
        let container = SynchronizedContainer::new();
        let token = container.claim_token().unwrap();
        assert!(!container.token_available());

        for i in 0..10 {
            container.set_with_token(&token, "k", i).unwrap();
            container.get_with_token(&token, "k").unwrap();
        }

        assert!(matches!(
            container.claim_token(),
            Err(ProbeError::TokenAlreadyClaimed)
        ));
        assert!(matches!(
            container.claim_token(),
            Err(ProbeError::TokenAlreadyClaimed)
        ));
    }

    #[test]
    fn test_token_bypasses_gates() {
        let container = SynchronizedContainer::new();
        let token = container.claim_token().unwrap();
        container.set_readable(false);
        container.set_writeable(false);

        container.set_with_token(&token, "x", "value").unwrap();
        assert_eq!(
            container.get_with_token(&token, "x").unwrap(),
            Some(json!("value"))
        );
        assert_eq!(container.snapshot_with_token(&token).unwrap().len(), 1);
    }

    #[test]
    fn test_foreign_token_rejected() {
        let a = SynchronizedContainer::new();
        let b = SynchronizedContainer::new();
        let token_b = b.claim_token().unwrap();
        assert!(matches!(
            a.set_with_token(&token_b, "x", 1),
            Err(ProbeError::InvalidToken)
        ));
    }

    #[test]
    fn test_from_container_inherits_gates_and_copies_deeply() {
        let original = SynchronizedContainer::new();
        original.set("nested", json!({"a": [1, 2, 3]})).unwrap();
        original.set_writeable(false);
        let _ = original.claim_token().unwrap();

        let copy = SynchronizedContainer::from_container(&original);
        assert!(copy.is_readable());
        assert!(!copy.is_writeable());
        assert!(copy.token_available());

        let token = copy.claim_token().unwrap();
        copy.set_with_token(&token, "nested", json!(null)).unwrap();
        assert_eq!(original.get("nested").unwrap(), Some(json!({"a": [1, 2, 3]})));
    }

    #[test]
    fn test_from_map_is_a_copy() {
        let mut map = HashMap::new();
        map.insert("v".to_string(), json!(1));
        let container = SynchronizedContainer::from_map(&map);
        map.insert("v".to_string(), json!(2));
        assert_eq!(container.get("v").unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_update_can_reenter() {
        let container = SynchronizedContainer::new();
        container.set("base", 5).unwrap();
        container.set("counter", 1).unwrap();
        container
            .update("counter", |old| {
                let base = container.get_as::<i64>("base").unwrap().unwrap_or(0);
                json!(old.and_then(|v| v.as_i64()).unwrap_or(0) + base)
            })
            .unwrap();
        assert_eq!(container.get_as::<i64>("counter").unwrap(), Some(6));
    }

    #[test]
    fn test_concurrent_updates_are_exclusive() {
        let container = Arc::new(SynchronizedContainer::new());
        container.set("count", 0).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&container);
                thread::spawn(move || {
                    for _ in 0..250 {
                        c.update("count", |old| {
                            json!(old.and_then(|v| v.as_i64()).unwrap_or(0) + 1)
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(container.get_as::<i64>("count").unwrap(), Some(2000));
    }

    #[test]
    fn test_replace_all() {
        let container = SynchronizedContainer::new();
        container.set("old", 1).unwrap();
        let mut fresh = HashMap::new();
        fresh.insert("new".to_string(), json!(2));
        container.replace_all(fresh).unwrap();
        assert_eq!(container.keys().unwrap(), vec!["new".to_string()]);
    }
}
