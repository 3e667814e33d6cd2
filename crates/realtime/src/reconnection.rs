//! Session lifecycle and reconnection.
//!
//! Contains the shared [`SessionContext`], the task slots that gate
//! initialize and reconnect attempts, session callbacks, and the fixed-delay
//! reconnect loop.
//!
//! Every connection attempt gets a new epoch. Callbacks from a session carry
//! the epoch they were created with and are ignored once it is no longer the
//! live one, so frames and close notifications from a torn-down socket can
//! never touch the state of its successor.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use wardbell_protocol::{Frame, InboundMessage};

use crate::config::{ConfigError, RealtimeConfig};
use crate::connector::Connector;
use crate::registry::{FrameSender, SubscriptionRegistry};
use crate::stomp_client::{CloseReason, ConnectRequest, SessionCallbacks, StompClient, StompError};
use crate::types::{ConnectionEvent, ConnectionState, ReconnectHook};

/// The live broker session.
pub(crate) struct Session {
    pub(crate) epoch: u64,
    pub(crate) client: StompClient,
}

/// State guarded by one lock so that session, epoch, connection state and
/// subscriptions always change together.
#[derive(Default)]
pub(crate) struct Shared {
    pub(crate) epoch: u64,
    pub(crate) session: Option<Session>,
    pub(crate) registry: SubscriptionRegistry,
}

impl Shared {
    /// Registry plus the live session as a frame sender, borrowed disjointly.
    pub(crate) fn split(&mut self) -> (&mut SubscriptionRegistry, Option<&dyn FrameSender>) {
        let sender = self
            .session
            .as_ref()
            .map(|s| &s.client as &dyn FrameSender);
        (&mut self.registry, sender)
    }

    fn live_epoch(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.epoch)
    }
}

/// Holds at most one cancellable background task.
#[derive(Default)]
pub(crate) struct TaskSlot {
    current: Mutex<Option<(u64, CancellationToken)>>,
    next_id: AtomicU64,
}

impl TaskSlot {
    /// Arms the slot if it is empty. Returns `None` if a task is already armed.
    pub(crate) fn arm(&self) -> Option<(u64, CancellationToken)> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_some() {
            return None;
        }
        let armed = self.fresh();
        *current = Some(armed.clone());
        Some(armed)
    }

    /// Cancels whatever is armed and arms a new task.
    pub(crate) fn replace(&self) -> (u64, CancellationToken) {
        let armed = self.fresh();
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(armed.clone());
        if let Some((_, token)) = previous {
            token.cancel();
        }
        armed
    }

    /// Cancels and clears the armed task, if any.
    pub(crate) fn cancel(&self) {
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((_, token)) = previous {
            token.cancel();
        }
    }

    /// Clears the slot if it still holds the task `id`.
    pub(crate) fn release(&self, id: u64) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|(armed, _)| *armed == id) {
            *current = None;
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn fresh(&self) -> (u64, CancellationToken) {
        (
            self.next_id.fetch_add(1, Ordering::Relaxed),
            CancellationToken::new(),
        )
    }
}

/// Shared handles passed to session callbacks and background tasks.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub(crate) config: Arc<RealtimeConfig>,
    pub(crate) broker_url: Arc<str>,
    pub(crate) connect_request: Arc<ConnectRequest>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) shared: Arc<Mutex<Shared>>,
    pub(crate) state_tx: Arc<watch::Sender<ConnectionState>>,
    pub(crate) events_tx: mpsc::Sender<ConnectionEvent>,
    /// Debounced initialize, or an immediate forced attempt.
    pub(crate) pending_init: Arc<TaskSlot>,
    /// Fixed-delay reconnect loop.
    pub(crate) reconnect: Arc<TaskSlot>,
    /// Cleared by teardown; set again by the next initialize.
    pub(crate) auto_reconnect: Arc<AtomicBool>,
    /// Host connectivity as last reported by the network bridge.
    pub(crate) online: Arc<AtomicBool>,
    pub(crate) reconnect_hook: Arc<Mutex<Option<ReconnectHook>>>,
}

impl SessionContext {
    pub(crate) fn new(
        config: RealtimeConfig,
        connector: Arc<dyn Connector>,
        events_tx: mpsc::Sender<ConnectionEvent>,
    ) -> Result<Self, ConfigError> {
        let broker_url = config.broker_url()?;
        let connect_request = ConnectRequest {
            host: config.broker_host()?,
            heart_beat: config.heart_beat(),
            headers: config
                .connect_headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            config: Arc::new(config),
            broker_url: broker_url.into(),
            connect_request: Arc::new(connect_request),
            connector,
            shared: Arc::new(Mutex::new(Shared::default())),
            state_tx: Arc::new(state_tx),
            events_tx,
            pending_init: Arc::new(TaskSlot::default()),
            reconnect: Arc::new(TaskSlot::default()),
            auto_reconnect: Arc::new(AtomicBool::new(false)),
            online: Arc::new(AtomicBool::new(true)),
            reconnect_hook: Arc::new(Mutex::new(None)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn should_reconnect(&self) -> bool {
        self.auto_reconnect.load(Ordering::SeqCst) && self.online.load(Ordering::SeqCst)
    }

    /// Updates the connection state and emits an event on change.
    /// Callers hold the shared lock.
    fn set_state(&self, new_state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == new_state {
                return false;
            }
            *state = new_state;
            true
        });
        if changed {
            trace!(state = ?new_state, "connection state changed");
            let _ = self
                .events_tx
                .try_send(ConnectionEvent::StateChanged(new_state));
        }
    }

    /// Requests a connection. Calls made while an attempt is pending, in
    /// flight, or established are no-ops; the first one arms a single attempt
    /// that starts after the debounce window.
    pub(crate) fn initialize(&self) {
        self.auto_reconnect.store(true, Ordering::SeqCst);
        if !self.online.load(Ordering::SeqCst) {
            debug!("network offline, initialize deferred until it returns");
            return;
        }
        let state = self.state();
        if state != ConnectionState::Disconnected {
            debug!(?state, "initialize ignored");
            return;
        }
        if self.reconnect.is_armed() {
            debug!("initialize ignored, reconnect already scheduled");
            return;
        }
        let Some((id, cancel)) = self.pending_init.arm() else {
            debug!("initialize already pending");
            return;
        };
        self.spawn_attempt(id, cancel, self.config.initialize_debounce());
    }

    /// Starts an attempt right away, cancelling any pending one.
    pub(crate) fn connect_now(&self) {
        let (id, cancel) = self.pending_init.replace();
        self.spawn_attempt(id, cancel, std::time::Duration::ZERO);
    }

    fn spawn_attempt(&self, id: u64, cancel: CancellationToken, delay: std::time::Duration) {
        let ctx = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("pending connection attempt cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                r = ctx.connect_once() => r,
            };
            ctx.pending_init.release(id);

            if let Err(e) = result {
                warn!(error = %e, "connection attempt failed");
                if ctx.should_reconnect() {
                    ctx.schedule_reconnect();
                }
            }
        });
    }

    /// Cancels pending initialize and reconnect tasks.
    pub(crate) fn abort_attempts(&self) {
        self.pending_init.cancel();
        self.reconnect.cancel();
    }

    /// Moves `Disconnected` to `Connecting` under a new epoch. Returns `None`
    /// when a session exists or another attempt owns the state.
    fn begin_connecting(&self) -> Option<u64> {
        let mut shared = self.lock();
        if shared.session.is_some() || self.state() != ConnectionState::Disconnected {
            return None;
        }
        shared.epoch += 1;
        self.set_state(ConnectionState::Connecting);
        Some(shared.epoch)
    }

    /// One socket upgrade plus STOMP handshake, bounded by the connect timeout.
    pub(crate) async fn connect_once(&self) -> Result<(), StompError> {
        let Some(epoch) = self.begin_connecting() else {
            debug!("connection attempt skipped, session already active");
            return Ok(());
        };
        info!(url = %self.broker_url, epoch, "connecting to broker");

        let attempt = async {
            let transport = self.connector.connect(&self.broker_url).await?;
            StompClient::connect(transport, &self.connect_request, self.callbacks(epoch)).await
        };
        let result = tokio::time::timeout(self.config.connect_timeout(), attempt)
            .await
            .unwrap_or(Err(StompError::Timeout));

        match result {
            Ok(client) => {
                self.on_connected(epoch, client);
                Ok(())
            }
            Err(e) => {
                let shared = self.lock();
                if shared.epoch != epoch {
                    debug!(epoch, error = %e, "stale connection attempt failed");
                    return Ok(());
                }
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    fn callbacks(&self, epoch: u64) -> SessionCallbacks {
        let on_message = {
            let ctx = self.clone();
            Box::new(move |frame| ctx.dispatch(epoch, frame))
        };
        let on_closed = {
            let ctx = self.clone();
            Box::new(move |reason| ctx.handle_closed(epoch, reason))
        };
        SessionCallbacks {
            on_message,
            on_closed,
        }
    }

    /// Installs a freshly handshaken client. Desired subscriptions are
    /// replayed before the session becomes visible to dispatch, then the
    /// reconnect hook runs.
    fn on_connected(&self, epoch: u64, client: StompClient) {
        let server = client.server().unwrap_or("unknown").to_string();
        let heart_beat = client.heart_beat().header_value();
        let count = {
            let mut shared = self.lock();
            if shared.epoch != epoch {
                debug!(epoch, "discarding session from superseded attempt");
                client.close();
                return;
            }
            let count = shared.registry.resubscribe(&client);
            shared.session = Some(Session { epoch, client });
            self.set_state(ConnectionState::Connected);
            count
        };

        info!(
            epoch,
            %server,
            %heart_beat,
            resubscribed = count,
            "connected to broker"
        );
        let _ = self
            .events_tx
            .try_send(ConnectionEvent::Resubscribed { count });

        let hook = self
            .reconnect_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Routes a MESSAGE frame to its topic handler.
    fn dispatch(&self, epoch: u64, frame: Frame) {
        let Some(subscription) = frame.header("subscription") else {
            debug!("dropping MESSAGE without subscription header");
            return;
        };
        let route = {
            let shared = self.lock();
            if shared.live_epoch() != Some(epoch) {
                debug!(epoch, "dropping frame from stale session");
                return;
            }
            shared.registry.route(subscription)
        };
        let Some((topic, handler)) = route else {
            debug!(subscription, "dropping frame for unknown subscription");
            return;
        };

        match InboundMessage::decode(&frame.body) {
            Ok(message) => {
                if message.kind().is_none() {
                    debug!(%topic, "unrecognised message shape");
                }
                trace!(%topic, kind = ?message.kind(), "dispatching message");
                handler(message);
            }
            Err(e) => warn!(%topic, error = %e, "dropping message"),
        }
    }

    /// Called by the read pump when a session ends on its own.
    fn handle_closed(&self, epoch: u64, reason: CloseReason) {
        {
            let mut shared = self.lock();
            if shared.live_epoch() != Some(epoch) {
                debug!(epoch, "ignoring close of stale session");
                return;
            }
            let session = shared.session.take();
            shared
                .registry
                .clear_live(session.as_ref().map(|s| &s.client as &dyn FrameSender));
            self.set_state(ConnectionState::Disconnected);
            drop(session);
        }

        match reason {
            CloseReason::ProtocolError(message) => {
                warn!(epoch, %message, "broker protocol error, reinitializing");
                let _ = self
                    .events_tx
                    .try_send(ConnectionEvent::ProtocolError { message });
                if self.should_reconnect() {
                    self.reconnect.cancel();
                    self.initialize();
                }
            }
            other => {
                warn!(epoch, reason = ?other, "connection lost");
                if self.should_reconnect() {
                    self.schedule_reconnect();
                }
            }
        }
    }

    /// Orderly teardown of the current session, if any. Always ends in
    /// `Disconnected` and invalidates the current epoch.
    pub(crate) fn drop_session(&self) {
        let mut shared = self.lock();
        shared.epoch += 1;
        let session = shared.session.take();
        shared
            .registry
            .clear_live(session.as_ref().map(|s| &s.client as &dyn FrameSender));
        if let Some(session) = session {
            session.client.close();
            info!(epoch = session.epoch, "broker session closed");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    pub(crate) fn schedule_reconnect(&self) {
        let (id, cancel) = self.reconnect.replace();
        tokio::spawn(reconnect_loop(self.clone(), id, cancel));
    }
}

/// Reconnection loop with a fixed delay and no attempt cap.
///
/// Returns a boxed future to break the recursive type cycle with the session
/// callbacks (a failed session schedules this loop, which creates sessions).
pub(crate) fn reconnect_loop(
    ctx: SessionContext,
    id: u64,
    cancel: CancellationToken,
) -> Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
        let delay = ctx.config.reconnect_policy().delay;
        let delay_secs = delay.as_secs_f64();
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);

            let _ = ctx.events_tx.try_send(ConnectionEvent::Reconnecting {
                attempt,
                next_retry_secs: delay_secs,
            });
            info!(
                attempt,
                delay_secs = format_args!("{delay_secs:.1}"),
                "reconnecting"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("reconnect cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if !ctx.should_reconnect() {
                debug!("reconnect no longer wanted");
                break;
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                r = ctx.connect_once() => r,
            };
            match result {
                Ok(()) => break,
                Err(e) => warn!(attempt, error = %e, "reconnect attempt failed"),
            }
        }

        ctx.reconnect.release(id);
    })
}
