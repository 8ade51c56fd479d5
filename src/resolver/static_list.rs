//! Fixed address lists.
//!
//! The service name itself is the address set: `"10.0.0.1:80,10.0.0.2:80"`.

use std::sync::Arc;

use crate::resolver::{normalize, validate_address, AddressListener, AddressResolver, ResolveError};

#[derive(Debug, Default, Clone, Copy)]
pub struct StaticResolver;

impl StaticResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(list: &str) -> Result<Vec<String>, ResolveError> {
        let entries: Vec<&str> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if entries.is_empty() {
            return Err(ResolveError::Empty(list.to_string()));
        }
        for entry in &entries {
            validate_address(entry)?;
        }
        Ok(normalize(entries))
    }
}

impl AddressResolver for StaticResolver {
    fn resolve(&self, name: &str) -> Result<Vec<String>, ResolveError> {
        Self::parse(name)
    }

    // The set never changes, so there is nothing to deliver.
    fn subscribe(&self, _name: &str, _listener: Arc<dyn AddressListener>) {}

    fn unsubscribe(&self, _name: &str, _listener: &Arc<dyn AddressListener>) {}
}
