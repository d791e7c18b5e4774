//! Shared attribute registry.
//!
//! The store is the only structure touched by both the sensor side and the protocol
//! task. Values are guarded by a mutex, subscriber callbacks always run after the
//! lock has been released so a callback may call back into the store.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};

pub const MAX_ATTRIBUTES: usize = 16;
pub const MAX_SUBSCRIBERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributePath {
    pub endpoint: u16,
    pub cluster: u32,
    pub attribute: u32,
}

impl AttributePath {
    pub fn new(endpoint: u16, cluster: u32, attribute: u32) -> Self {
        Self {
            endpoint,
            cluster,
            attribute,
        }
    }
}

impl std::fmt::Display for AttributePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/0x{:04x}/0x{:04x}",
            self.endpoint, self.cluster, self.attribute
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeValue {
    Bool(bool),
    U8(u8),
    I16(i16),
    U16(u16),
    U32(u32),
}

impl AttributeValue {
    pub fn same_type(&self, other: &AttributeValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

pub type AttributeCallback = Arc<dyn Fn(AttributePath, AttributeValue) + Send + Sync>;

struct Attribute {
    path: AttributePath,
    value: AttributeValue,
    dirty: bool,
}

struct Inner {
    attributes: [Option<Attribute>; MAX_ATTRIBUTES],
    subscribers: [Option<(u32, AttributeCallback)>; MAX_SUBSCRIBERS],
    next_subscriber_id: u32,
}

impl Inner {
    fn find_mut(&mut self, path: &AttributePath) -> Option<&mut Attribute> {
        self.attributes
            .iter_mut()
            .flatten()
            .find(|a| a.path == *path)
    }

    fn callbacks(&self) -> Vec<AttributeCallback> {
        self.subscribers
            .iter()
            .flatten()
            .map(|(_, cb)| cb.clone())
            .collect()
    }
}

pub struct AttributeStore {
    inner: Mutex<Inner>,
}

impl AttributeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                attributes: std::array::from_fn(|_| None),
                subscribers: std::array::from_fn(|_| None),
                next_subscriber_id: 1,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // values stay consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register attribute with initial value. Registering an existing path is a no-op.
    pub fn register(&self, path: AttributePath, initial: AttributeValue) -> Result<()> {
        let mut inner = self.lock();
        if inner.find_mut(&path).is_some() {
            return Ok(());
        }
        let slot = inner
            .attributes
            .iter_mut()
            .find(|a| a.is_none())
            .context(format!("attribute table full, can't register {}", path))?;
        *slot = Some(Attribute {
            path,
            value: initial,
            dirty: false,
        });
        Ok(())
    }

    /// Set new value. Returns true when the value changed, subscribers are called in that case.
    /// A change nobody was subscribed to stays dirty for [AttributeStore::process_reports].
    pub fn update(&self, path: AttributePath, value: AttributeValue) -> Result<bool> {
        let callbacks = {
            let mut inner = self.lock();
            let callbacks = inner.callbacks();
            let attr = inner
                .find_mut(&path)
                .context(format!("attribute {} not registered", path))?;
            if !attr.value.same_type(&value) {
                anyhow::bail!(
                    "type mismatch for {}: stored {:?}, got {:?}",
                    path,
                    attr.value,
                    value
                );
            }
            if attr.value == value {
                return Ok(false);
            }
            attr.value = value;
            attr.dirty = callbacks.is_empty();
            callbacks
        };
        log::trace!("attribute {} = {:?}", path, value);
        for cb in callbacks {
            cb(path, value);
        }
        Ok(true)
    }

    pub fn get(&self, path: &AttributePath) -> Option<AttributeValue> {
        self.lock()
            .attributes
            .iter()
            .flatten()
            .find(|a| a.path == *path)
            .map(|a| a.value)
    }

    pub fn subscribe(&self, callback: AttributeCallback) -> Result<u32> {
        let mut inner = self.lock();
        let id = inner.next_subscriber_id;
        let slot = inner
            .subscribers
            .iter_mut()
            .find(|s| s.is_none())
            .context("attribute subscriber table full")?;
        *slot = Some((id, callback));
        inner.next_subscriber_id += 1;
        Ok(id)
    }

    pub fn unsubscribe(&self, id: u32) {
        let mut inner = self.lock();
        for slot in inner.subscribers.iter_mut() {
            if slot.as_ref().is_some_and(|(sid, _)| *sid == id) {
                *slot = None;
            }
        }
    }

    /// Clear dirty flags and notify every subscriber once per dirty attribute.
    /// Returns number of attributes reported.
    pub fn process_reports(&self) -> usize {
        let (dirty, callbacks) = {
            let mut inner = self.lock();
            let mut dirty = Vec::new();
            for a in inner.attributes.iter_mut().flatten() {
                if a.dirty {
                    a.dirty = false;
                    dirty.push((a.path, a.value));
                }
            }
            (dirty, inner.callbacks())
        };
        for (path, value) in dirty.iter() {
            for cb in callbacks.iter() {
                cb(*path, *value);
            }
        }
        dirty.len()
    }

    pub fn count(&self) -> usize {
        self.lock().attributes.iter().flatten().count()
    }

    /// Remove all attributes. Subscribers stay registered.
    pub fn clear(&self) {
        self.lock().attributes = std::array::from_fn(|_| None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ONOFF: AttributePath = AttributePath {
        endpoint: 1,
        cluster: 6,
        attribute: 0,
    };

    #[test]
    fn register_and_update() {
        let store = AttributeStore::new();
        store.register(ONOFF, AttributeValue::Bool(false)).unwrap();
        store.register(ONOFF, AttributeValue::Bool(true)).unwrap();
        assert_eq!(store.count(), 1);
        assert_eq!(store.get(&ONOFF), Some(AttributeValue::Bool(false)));

        assert!(store.update(ONOFF, AttributeValue::Bool(true)).unwrap());
        assert!(!store.update(ONOFF, AttributeValue::Bool(true)).unwrap());
        assert!(store.update(ONOFF, AttributeValue::U8(1)).is_err());
        assert!(store
            .update(AttributePath::new(9, 9, 9), AttributeValue::U8(1))
            .is_err());
        assert_eq!(store.get(&ONOFF), Some(AttributeValue::Bool(true)));
    }

    #[test]
    fn capacity() {
        let store = AttributeStore::new();
        for i in 0..MAX_ATTRIBUTES as u32 {
            store
                .register(AttributePath::new(1, 0x33, i), AttributeValue::U32(i))
                .unwrap();
        }
        assert!(store
            .register(AttributePath::new(1, 0x33, 100), AttributeValue::U32(0))
            .is_err());
        assert_eq!(store.count(), MAX_ATTRIBUTES);
        assert_eq!(
            store.get(&AttributePath::new(1, 0x33, 5)),
            Some(AttributeValue::U32(5))
        );
        store.clear();
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn subscribers_and_reports() {
        let store = AttributeStore::new();
        store.register(ONOFF, AttributeValue::Bool(false)).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = store
            .subscribe(Arc::new(move |_, _| {
                h.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        store.update(ONOFF, AttributeValue::Bool(true)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        // already delivered by update
        assert_eq!(store.process_reports(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        store.unsubscribe(id);
        store.update(ONOFF, AttributeValue::Bool(false)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        for _ in 0..MAX_SUBSCRIBERS {
            store.subscribe(Arc::new(|_, _| {})).unwrap();
        }
        assert!(store.subscribe(Arc::new(|_, _| {})).is_err());
    }

    #[test]
    fn unseen_change_reported_later() {
        let store = AttributeStore::new();
        store.register(ONOFF, AttributeValue::Bool(false)).unwrap();
        store.update(ONOFF, AttributeValue::Bool(true)).unwrap();

        let values = Arc::new(Mutex::new(Vec::new()));
        let v = values.clone();
        store
            .subscribe(Arc::new(move |_, value| {
                v.lock().unwrap().push(value);
            }))
            .unwrap();
        assert_eq!(store.process_reports(), 1);
        assert_eq!(store.process_reports(), 0);
        assert_eq!(*values.lock().unwrap(), vec![AttributeValue::Bool(true)]);
    }

    #[test]
    fn callback_may_reenter_store() {
        let store = AttributeStore::new();
        store.register(ONOFF, AttributeValue::Bool(false)).unwrap();
        let s2 = store.clone();
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        store
            .subscribe(Arc::new(move |path, _| {
                *seen2.lock().unwrap() = s2.get(&path);
            }))
            .unwrap();
        store.update(ONOFF, AttributeValue::Bool(true)).unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(AttributeValue::Bool(true)));
    }
}
