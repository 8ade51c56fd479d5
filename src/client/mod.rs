//! RPC client: the entry point that owns channels.
//!
//! # Responsibilities
//! - Wire configuration, resolver, transport, executor and clock together
//! - Create one [`ServiceChannel`] per service name on first use
//! - Keep channels subscribed to address changes
//! - Drive periodic maintenance for every channel
//! - Tear everything down on shutdown
//!
//! # Data Flow
//! ```text
//! RpcClient::channel(name)
//!     → registry hit ──────────────────────────────▶ RpcChannel
//!     → miss: resolver.resolve(name)
//!             ServiceChannel::new(addresses)
//!             resolver.subscribe(name, ChannelListener)
//!             registry.insert ─────────────────────▶ RpcChannel
//!
//! TickDriver ──▶ advance(now) ──▶ channel.advance(now) for each
//!                             ──▶ registry.sweep ──▶ evicted: shutdown + unsubscribe
//! ```
//!
//! # Design Decisions
//! - The tick driver holds a weak reference, dropping the client stops it
//! - Resolution happens under the registry lock so concurrent first calls
//!   for one name build a single channel

mod registry;

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::channel::{RpcChannel, ServiceChannel};
use crate::client::registry::{ChannelListener, ChannelRegistry, Entry};
use crate::config::{validate_config, ClientConfig, ConfigError};
use crate::error::RpcError;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::resolver::{AddressListener, AddressResolver};
use crate::runtime::{Clock, Executor, SystemClock, Tick, TickDriver, WorkerPool};
use crate::transport::{TcpTransport, Transport};

pub struct RpcClientBuilder {
    config: ClientConfig,
    resolver: Option<Arc<dyn AddressResolver>>,
    transport: Option<Arc<dyn Transport>>,
    executor: Option<Arc<dyn Executor>>,
    clock: Option<Arc<dyn Clock>>,
    runtime: Option<Handle>,
    auto_tick: bool,
}

impl RpcClientBuilder {
    fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            resolver: None,
            transport: None,
            executor: None,
            clock: None,
            runtime: None,
            auto_tick: true,
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn AddressResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Where completions run. Defaults to a worker pool sized by
    /// `workers.threads`.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Runtime for sockets and the tick driver. Defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Disable the background tick; the caller drives [`RpcClient::advance`].
    pub fn manual_tick(mut self) -> Self {
        self.auto_tick = false;
        self
    }

    pub fn build(self) -> Result<RpcClient, RpcError> {
        validate_config(&self.config).map_err(ConfigError::Validation)?;
        let config = Arc::new(self.config);

        let resolver = self
            .resolver
            .ok_or_else(|| RpcError::Config("no address resolver configured".into()))?;
        let runtime = self.runtime.or_else(|| Handle::try_current().ok());

        let transport: Arc<dyn Transport> = match (self.transport, &runtime) {
            (Some(transport), _) => transport,
            (None, Some(runtime)) => Arc::new(TcpTransport::new(runtime.clone(), &config.transport)),
            (None, None) => {
                return Err(RpcError::Config("tcp transport requires a tokio runtime".into()))
            }
        };

        let mut pool = None;
        let executor: Arc<dyn Executor> = match self.executor {
            Some(executor) => executor,
            None => {
                let workers = Arc::new(
                    WorkerPool::new(config.workers.threads)
                        .map_err(|e| RpcError::Internal(format!("failed to start workers: {}", e)))?,
                );
                pool = Some(workers.clone());
                workers
            }
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        if config.observability.metrics_enabled {
            install_metrics(&config.observability.metrics_address, runtime.as_ref());
        }

        let inner = Arc::new(ClientInner {
            registry: Mutex::new(ChannelRegistry::new(config.channel.channel_cache_size)),
            config,
            resolver,
            transport,
            executor,
            clock,
            pool,
            shutdown: Shutdown::new(),
        });

        let driver = match (&runtime, self.auto_tick) {
            (Some(runtime), true) => {
                let target = Arc::downgrade(&inner) as Weak<dyn Tick>;
                Some(TickDriver::spawn(
                    runtime,
                    target,
                    inner.clock.clone(),
                    inner.config.channel.tick_interval(),
                    inner.shutdown.subscribe(),
                ))
            }
            _ => None,
        };

        tracing::info!(
            tick_ms = inner.config.channel.tick_interval_ms,
            auto_tick = driver.is_some(),
            "Rpc client started"
        );
        Ok(RpcClient { inner, driver })
    }
}

fn install_metrics(address: &str, runtime: Option<&Handle>) {
    let addr: SocketAddr = match address.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(address = %address, error = %e, "Invalid metrics address");
            return;
        }
    };
    // The exporter spawns its listener on the ambient runtime.
    let _guard = runtime.map(Handle::enter);
    metrics::init_metrics(addr);
}

struct ClientInner {
    config: Arc<ClientConfig>,
    resolver: Arc<dyn AddressResolver>,
    transport: Arc<dyn Transport>,
    executor: Arc<dyn Executor>,
    clock: Arc<dyn Clock>,
    pool: Option<Arc<WorkerPool>>,
    registry: Mutex<ChannelRegistry>,
    shutdown: Shutdown,
}

impl ClientInner {
    fn channel(&self, name: &str) -> Result<Arc<ServiceChannel>, RpcError> {
        if self.shutdown.is_triggered() {
            return Err(RpcError::ChannelShutdown);
        }
        let mut registry = self.registry.lock();
        if let Some(channel) = registry.get(name) {
            return Ok(channel);
        }

        let addresses = self.resolver.resolve(name).map_err(|e| {
            tracing::warn!(channel = %name, error = %e, "Failed to resolve service");
            RpcError::Resolve(name.to_string())
        })?;
        let channel = ServiceChannel::new(
            name,
            addresses,
            self.config.clone(),
            self.transport.clone(),
            self.executor.clone(),
            self.clock.clone(),
        );
        let listener: Arc<dyn AddressListener> = Arc::new(ChannelListener::new(&channel));
        self.resolver.subscribe(name, listener.clone());

        tracing::info!(channel = %name, servers = channel.addresses().len(), "Channel created");
        registry.insert(name, Entry { channel: channel.clone(), listener });
        Ok(channel)
    }

    fn teardown(&self, name: &str, entry: Entry) {
        self.resolver.unsubscribe(name, &entry.listener);
        entry.channel.shutdown();
    }

    fn shutdown(&self) {
        if !self.shutdown.trigger() {
            return;
        }
        tracing::info!("Shutting down rpc client");
        let entries = self.registry.lock().drain();
        for (name, entry) in entries {
            self.teardown(&name, entry);
        }
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }
        tracing::info!("Rpc client stopped");
    }
}

impl Tick for ClientInner {
    fn advance(&self, now_ms: u64) {
        if self.shutdown.is_triggered() {
            return;
        }
        let channels = self.registry.lock().channels();
        for channel in &channels {
            channel.advance(now_ms);
        }
        drop(channels);

        let evicted = self.registry.lock().sweep();
        for (name, entry) in evicted {
            tracing::info!(channel = %name, "Evicting idle channel");
            self.teardown(&name, entry);
        }
    }
}

/// Owns every channel of one process-side RPC client.
pub struct RpcClient {
    inner: Arc<ClientInner>,
    driver: Option<TickDriver>,
}

impl RpcClient {
    pub fn builder() -> RpcClientBuilder {
        RpcClientBuilder::new()
    }

    /// Handle to the channel for `name`, creating it on first use.
    pub fn channel(&self, name: &str) -> Result<RpcChannel, RpcError> {
        self.inner.channel(name).map(RpcChannel::new)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Run one maintenance pass at `now_ms`.
    pub fn advance(&self, now_ms: u64) {
        self.inner.advance(now_ms);
    }

    /// Channels in use, followed by those parked in the idle cache.
    pub fn channel_counts(&self) -> (usize, usize) {
        let registry = self.inner.registry.lock();
        (registry.active_len(), registry.idle_len())
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_triggered()
    }

    /// Whether a background tick driver is running.
    pub fn is_ticking(&self) -> bool {
        self.driver.as_ref().is_some_and(|d| !d.is_finished())
    }

    /// Close all channels and fail every outstanding call. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (active, idle) = self.channel_counts();
        f.debug_struct("RpcClient")
            .field("active", &active)
            .field("idle", &idle)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
