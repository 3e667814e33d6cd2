//! Network-state bridge.
//!
//! Maps host online/offline transitions onto the connection manager: going
//! offline tears the session down and suspends reconnection, coming back
//! online rebuilds it from scratch.

use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::manager::ConnectionManager;
use crate::reconnection::SessionContext;
use crate::types::NetworkStatus;

impl SessionContext {
    /// Tears down any session and suspends reconnection.
    pub(crate) fn go_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
        self.abort_attempts();
        self.drop_session();
    }

    /// Rebuilds the connection if the application still wants one.
    pub(crate) fn go_online(&self) {
        self.online.store(true, Ordering::SeqCst);
        if !self.auto_reconnect.load(Ordering::SeqCst) {
            debug!("network online, no connection requested");
            return;
        }
        self.abort_attempts();
        self.drop_session();
        self.initialize();
    }
}

/// Listener task feeding network status into a [`ConnectionManager`].
///
/// Dropping the bridge stops the listener.
pub struct NetworkBridge {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl NetworkBridge {
    /// Spawns a listener applying every status change from `status_rx`.
    /// Repeated identical statuses are ignored.
    pub fn spawn(manager: &ConnectionManager, mut status_rx: mpsc::Receiver<NetworkStatus>) -> Self {
        let ctx = manager.ctx.clone();
        let cancel = CancellationToken::new();
        let c = cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                let status = tokio::select! {
                    _ = c.cancelled() => break,
                    status = status_rx.recv() => match status {
                        Some(status) => status,
                        None => break,
                    },
                };

                let online = ctx.online.load(Ordering::SeqCst);
                match status {
                    NetworkStatus::Offline if online => {
                        info!("network offline, closing broker session");
                        ctx.go_offline();
                    }
                    NetworkStatus::Online if !online => {
                        info!("network online, reconnecting");
                        ctx.go_online();
                    }
                    _ => debug!(?status, "network status unchanged"),
                }
            }
            debug!("network bridge stopped");
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Stops the listener.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for NetworkBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Polls host interfaces and reports connectivity transitions.
///
/// The host is assumed online at start, so only a change is ever sent. The
/// task ends when `cancel` fires or the receiver is dropped.
pub fn spawn_interface_monitor(
    poll: Duration,
    cancel: CancellationToken,
) -> mpsc::Receiver<NetworkStatus> {
    let (tx, rx) = mpsc::channel(8);

    tokio::spawn(async move {
        let mut last = NetworkStatus::Online;
        let mut interval = tokio::time::interval(poll);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let status = match if_addrs::get_if_addrs() {
                Ok(interfaces) => {
                    status_from_ips(interfaces.iter().filter(|i| !i.is_loopback()).map(|i| i.ip()))
                }
                Err(e) => {
                    warn!("failed to list network interfaces: {e}");
                    continue;
                }
            };

            if status != last {
                info!(?status, "host connectivity changed");
                last = status;
                if tx.send(status).await.is_err() {
                    break;
                }
            }
        }
    });

    rx
}

/// Online when at least one routable address exists.
fn status_from_ips(ips: impl IntoIterator<Item = IpAddr>) -> NetworkStatus {
    let routable = ips.into_iter().any(|ip| match ip {
        IpAddr::V4(v4) => {
            // Skip loopback and link-local (169.254.x.x)
            !(v4.is_loopback() || (v4.octets()[0] == 169 && v4.octets()[1] == 254))
        }
        IpAddr::V6(v6) => !(v6.is_loopback() || (v6.segments()[0] & 0xffc0) == 0xfe80),
    });
    if routable {
        NetworkStatus::Online
    } else {
        NetworkStatus::Offline
    }
}
