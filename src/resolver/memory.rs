//! Watched in-process address table.
//!
//! Stands in for a discovery backend: the embedding application (or a test)
//! pushes address sets and subscribed channels follow them. `disconnect` and
//! `reconnect` simulate losing and regaining the backend session.

use std::sync::Arc;

use dashmap::DashMap;

use crate::resolver::{
    normalize, same_listener, validate_address, AddressListener, AddressResolver, ResolveError,
};

#[derive(Default)]
pub struct InMemoryResolver {
    services: DashMap<String, Vec<String>>,
    listeners: DashMap<String, Vec<Arc<dyn AddressListener>>>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the address set of `name` and notify its subscribers.
    pub fn set_addresses<I, S>(&self, name: &str, addresses: I) -> Result<(), ResolveError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let addresses = normalize(addresses);
        for address in &addresses {
            validate_address(address)?;
        }
        self.services.insert(name.to_string(), addresses.clone());

        tracing::debug!(service = %name, count = addresses.len(), "Address set updated");
        for listener in self.listeners_of(name) {
            listener.on_address_changed(name, &addresses);
        }
        Ok(())
    }

    /// Report a lost backend session to every subscriber.
    pub fn disconnect(&self) {
        for (name, listeners) in self.snapshot() {
            for listener in listeners {
                listener.on_connection_closed(&name);
            }
        }
    }

    /// Redeliver the latest known set of every watched name.
    pub fn reconnect(&self) {
        for (name, listeners) in self.snapshot() {
            let Some(addresses) = self.services.get(&name).map(|a| a.clone()) else {
                continue;
            };
            for listener in listeners {
                listener.on_address_changed(&name, &addresses);
            }
        }
    }

    pub fn subscriber_count(&self, name: &str) -> usize {
        self.listeners.get(name).map(|l| l.len()).unwrap_or(0)
    }

    // Listener callbacks run without any map guard held.
    fn listeners_of(&self, name: &str) -> Vec<Arc<dyn AddressListener>> {
        self.listeners.get(name).map(|l| l.clone()).unwrap_or_default()
    }

    fn snapshot(&self) -> Vec<(String, Vec<Arc<dyn AddressListener>>)> {
        self.listeners
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl AddressResolver for InMemoryResolver {
    fn resolve(&self, name: &str) -> Result<Vec<String>, ResolveError> {
        match self.services.get(name) {
            Some(addresses) if addresses.is_empty() => Err(ResolveError::Empty(name.to_string())),
            Some(addresses) => Ok(addresses.clone()),
            None => Err(ResolveError::UnknownService(name.to_string())),
        }
    }

    fn subscribe(&self, name: &str, listener: Arc<dyn AddressListener>) {
        let mut entry = self.listeners.entry(name.to_string()).or_default();
        if !entry.iter().any(|l| same_listener(l, &listener)) {
            entry.push(listener);
        }
    }

    fn unsubscribe(&self, name: &str, listener: &Arc<dyn AddressListener>) {
        let now_empty = match self.listeners.get_mut(name) {
            Some(mut entry) => {
                entry.retain(|l| !same_listener(l, listener));
                entry.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.listeners.remove_if(name, |_, l| l.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        changes: Mutex<Vec<Vec<String>>>,
        closed: Mutex<usize>,
    }

    impl AddressListener for Recorder {
        fn on_address_changed(&self, _name: &str, addresses: &[String]) {
            self.changes.lock().push(addresses.to_vec());
        }

        fn on_connection_closed(&self, _name: &str) {
            *self.closed.lock() += 1;
        }
    }

    #[test]
    fn test_subscribers_follow_updates() {
        let resolver = InMemoryResolver::new();
        assert_eq!(
            resolver.resolve("echo"),
            Err(ResolveError::UnknownService("echo".into()))
        );

        resolver.set_addresses("echo", ["b:1", "a:1"]).unwrap();
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn AddressListener> = recorder.clone();
        resolver.subscribe("echo", listener.clone());
        resolver.subscribe("echo", listener.clone());
        assert_eq!(resolver.subscriber_count("echo"), 1);

        resolver.set_addresses("echo", ["c:1"]).unwrap();
        assert_eq!(resolver.resolve("echo").unwrap(), vec!["c:1"]);
        assert_eq!(*recorder.changes.lock(), vec![vec!["c:1".to_string()]]);

        resolver.unsubscribe("echo", &listener);
        resolver.set_addresses("echo", ["d:1"]).unwrap();
        assert_eq!(recorder.changes.lock().len(), 1);
        assert_eq!(resolver.subscriber_count("echo"), 0);
    }

    #[test]
    fn test_reconnect_redelivers_latest_set() {
        let resolver = InMemoryResolver::new();
        resolver.set_addresses("echo", ["a:1"]).unwrap();
        let recorder = Arc::new(Recorder::default());
        resolver.subscribe("echo", recorder.clone());

        resolver.disconnect();
        assert_eq!(*recorder.closed.lock(), 1);

        resolver.reconnect();
        assert_eq!(*recorder.changes.lock(), vec![vec!["a:1".to_string()]]);
    }

    #[test]
    fn test_invalid_update_is_rejected() {
        let resolver = InMemoryResolver::new();
        assert!(resolver.set_addresses("echo", ["bad"]).is_err());
        assert!(resolver.resolve("echo").is_err());
    }
}
