//! The subscription table.
//!
//! Maps each listening topic to the callbacks registered for it. A topic is
//! present exactly while it has at least one callback, which is also exactly
//! while the backend holds a `LISTEN` for it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::notification::Notification;

/// A subscriber callback.
///
/// Identity is the allocation: clones of one `Callback` are equal, two
/// callbacks built from identical closures are not. Keep a clone to
/// unsubscribe later.
#[derive(Clone)]
pub struct Callback(Arc<dyn Fn(&Notification) + Send + Sync>);

impl Callback {
    /// Wrap a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub(crate) fn call(&self, notification: &Notification) {
        (self.0)(notification);
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Callback {}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", Arc::as_ptr(&self.0).cast::<()>())
    }
}

pub(crate) type Callbacks = SmallVec<[Callback; 4]>;

/// Outcome of removing a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Removal {
    /// The topic or callback was not registered.
    NotFound,
    /// The callback was removed; others remain.
    Removed,
    /// The last callback was removed and the topic deleted.
    TopicEmptied,
}

#[derive(Debug, Default)]
pub(crate) struct SubscriptionTable {
    topics: HashMap<String, Callbacks>,
}

impl SubscriptionTable {
    /// Register `callback` for `topic`. Returns `true` if the topic is new.
    pub(crate) fn insert(&mut self, topic: &str, callback: Callback) -> bool {
        match self.topics.get_mut(topic) {
            Some(callbacks) => {
                if !callbacks.contains(&callback) {
                    callbacks.push(callback);
                }
                false
            }
            None => {
                let mut callbacks = Callbacks::new();
                callbacks.push(callback);
                self.topics.insert(topic.to_string(), callbacks);
                true
            }
        }
    }

    pub(crate) fn remove(&mut self, topic: &str, callback: &Callback) -> Removal {
        let Some(callbacks) = self.topics.get_mut(topic) else {
            return Removal::NotFound;
        };
        let Some(idx) = callbacks.iter().position(|c| c == callback) else {
            return Removal::NotFound;
        };
        callbacks.remove(idx);
        if callbacks.is_empty() {
            self.topics.remove(topic);
            Removal::TopicEmptied
        } else {
            Removal::Removed
        }
    }

    pub(crate) fn remove_topic(&mut self, topic: &str) {
        self.topics.remove(topic);
    }

    /// Remove every topic, returning their names.
    pub(crate) fn clear(&mut self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.drain().map(|(topic, _)| topic).collect();
        topics.sort();
        topics
    }

    pub(crate) fn callbacks(&self, topic: &str) -> Option<Callbacks> {
        self.topics.get(topic).cloned()
    }

    pub(crate) fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.keys().cloned().collect();
        topics.sort();
        topics
    }
}
