//! Address resolution.
//!
//! # Data Flow
//! ```text
//! RpcClient::channel(name)
//!     → AddressResolver::resolve(name)          initial address set
//!     → AddressResolver::subscribe(name, listener)
//!         → listener.on_address_changed(name, addresses)   every change
//!         → listener.on_connection_closed(name)            backend session lost
//! ```
//!
//! # Design Decisions
//! - Address sets are handed out sorted and deduplicated so channels can
//!   diff them with a linear merge
//! - Listeners are identified by pointer, a listener subscribes at most once
//!   per name

pub mod diff;
pub mod memory;
pub mod static_list;

use std::sync::Arc;

use thiserror::Error;

pub use diff::{diff_sorted, normalize, AddressDiff};
pub use memory::InMemoryResolver;
pub use static_list::StaticResolver;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("unknown service {0}")]
    UnknownService(String),

    #[error("service {0} has no addresses")]
    Empty(String),
}

/// Receives address updates for the names it subscribed to.
pub trait AddressListener: Send + Sync {
    fn on_address_changed(&self, name: &str, addresses: &[String]);

    /// The resolver lost its discovery backend. The latest known set is
    /// redelivered once it reconnects.
    fn on_connection_closed(&self, name: &str);
}

pub trait AddressResolver: Send + Sync {
    /// Current sorted address set for `name`.
    fn resolve(&self, name: &str) -> Result<Vec<String>, ResolveError>;

    fn subscribe(&self, name: &str, listener: Arc<dyn AddressListener>);

    fn unsubscribe(&self, name: &str, listener: &Arc<dyn AddressListener>);
}

/// Validate a `host:port` entry.
pub fn validate_address(address: &str) -> Result<(), ResolveError> {
    let invalid = || ResolveError::InvalidAddress(address.to_string());
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    let port: u16 = port.parse().map_err(|_| invalid())?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if port == 0 || host.is_empty() || host.contains(char::is_whitespace) {
        return Err(invalid());
    }
    Ok(())
}

pub(crate) fn same_listener(a: &Arc<dyn AddressListener>, b: &Arc<dyn AddressListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_address() {
        assert!(validate_address("127.0.0.1:8080").is_ok());
        assert!(validate_address("rpc.internal:80").is_ok());
        assert!(validate_address("[::1]:9000").is_ok());
        assert!(validate_address("127.0.0.1").is_err());
        assert!(validate_address(":80").is_err());
        assert!(validate_address("host:0").is_err());
        assert!(validate_address("host:http").is_err());
    }
}
