//! Last-writer-wins holder for the subject currently being displayed.
//!
//! The store is owned by whoever composes the subsystem and handed to the
//! normalizer, so unrelated streams only share it when the owner says so.
//! Observers can follow changes through a `watch` receiver.

use tokio::sync::watch;

pub struct SubjectStore {
    tx: watch::Sender<String>,
}

impl Default for SubjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SubjectStore {
    /// Starts with an empty identifier.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(String::new());
        Self { tx }
    }

    pub fn current(&self) -> String {
        self.tx.borrow().clone()
    }

    /// Overwrites the identifier. Watchers are only woken when the value changes.
    pub fn set(&self, subject_id: &str) {
        self.tx.send_if_modified(|current| {
            if current == subject_id {
                false
            } else {
                subject_id.clone_into(current);
                true
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_writer_wins() {
        let store = SubjectStore::new();
        assert_eq!(store.current(), "");
        store.set("u1");
        store.set("u2");
        assert_eq!(store.current(), "u2");
    }

    #[tokio::test]
    async fn test_watchers_see_changes_only() {
        let store = SubjectStore::new();
        let mut rx = store.subscribe();

        store.set("u1");
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), "u1");

        store.set("u1");
        assert!(!rx.has_changed().unwrap());
    }
}
