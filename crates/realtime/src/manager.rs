//! Connection manager owning the single broker session.
//!
//! Holds the connection lifecycle (initialize, force reconnect, teardown),
//! the subscription registry, and the event stream. Automatic reconnection
//! with a fixed delay keeps the session alive until teardown.

use std::ops::Deref;
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};

use tokio::sync::{Mutex, mpsc, watch};
use tracing::info;

use wardbell_protocol::InboundMessage;

use crate::config::{ConfigError, RealtimeConfig};
use crate::connector::{Connector, WsConnector};
use crate::reconnection::SessionContext;
use crate::types::{ConnectionEvent, ConnectionState, SubscribeOutcome};

/// Connection manager for the realtime broker.
///
/// Dropping the manager tears the connection down.
pub struct ConnectionManager {
    pub(crate) ctx: SessionContext,
    events_rx: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
}

impl ConnectionManager {
    /// Creates a manager that connects over WebSocket.
    pub fn new(config: RealtimeConfig) -> Result<Self, ConfigError> {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Creates a manager with a custom connector.
    pub fn with_connector(
        config: RealtimeConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ConfigError> {
        let (events_tx, events_rx) = mpsc::channel(64);
        let ctx = SessionContext::new(config, connector, events_tx)?;
        Ok(Self {
            ctx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    /// Takes the event receiver. Can only be called once.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.events_rx.lock().await.take()
    }

    pub fn state(&self) -> ConnectionState {
        self.ctx.state()
    }

    /// `true` only while a broker session is live.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Reactive view of the connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.ctx.state_tx.subscribe()
    }

    /// Starts connecting after the debounce window. Repeated calls, and calls
    /// while connecting or connected, are no-ops. Re-enables automatic
    /// reconnection after a teardown.
    pub fn initialize(&self) {
        self.ctx.initialize();
    }

    /// Tears down whatever exists, in any state, and connects again at once.
    pub fn force_reconnect(&self) {
        info!("forcing reconnect");
        self.ctx.auto_reconnect.store(true, Ordering::SeqCst);
        self.ctx.abort_attempts();
        self.ctx.drop_session();
        self.ctx.connect_now();
    }

    /// Closes the session, cancels pending attempts and disables automatic
    /// reconnection until the next [`initialize`](Self::initialize).
    /// Desired subscriptions are kept.
    pub fn teardown(&self) {
        self.ctx.auto_reconnect.store(false, Ordering::SeqCst);
        self.ctx.abort_attempts();
        self.ctx.drop_session();
    }

    /// Initializes now and tears down when the guard is dropped.
    pub fn acquire(&self) -> ConnectionGuard<'_> {
        self.initialize();
        ConnectionGuard { manager: self }
    }

    /// Sets a hook run after every successful handshake, once subscriptions
    /// have been replayed.
    pub fn set_reconnect_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self
            .ctx
            .reconnect_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    /// Registers interest in a topic. Subscribes on the broker right away
    /// when connected, otherwise on the next handshake.
    pub fn subscribe_to_room(
        &self,
        topic: &str,
        handler: impl Fn(InboundMessage) + Send + Sync + 'static,
    ) -> SubscribeOutcome {
        let mut shared = self.ctx.lock();
        let (registry, session) = shared.split();
        registry.subscribe(topic, Arc::new(handler), session)
    }

    /// Drops interest in a topic. Returns `false` if it was not subscribed.
    pub fn unsubscribe_from_room(&self, topic: &str) -> bool {
        let mut shared = self.ctx.lock();
        let (registry, session) = shared.split();
        registry.unsubscribe(topic, session)
    }

    /// Topics the application wants, in order.
    pub fn desired_topics(&self) -> Vec<String> {
        self.ctx.lock().registry.desired_topics()
    }

    /// Topics currently subscribed on the broker, in order.
    pub fn live_topics(&self) -> Vec<String> {
        self.ctx.lock().registry.live_topics()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Scoped connection: initialized by [`ConnectionManager::acquire`], torn
/// down on drop.
pub struct ConnectionGuard<'a> {
    manager: &'a ConnectionManager,
}

impl Deref for ConnectionGuard<'_> {
    type Target = ConnectionManager;

    fn deref(&self) -> &ConnectionManager {
        self.manager
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.manager.teardown();
    }
}
