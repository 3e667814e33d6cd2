//! Subscription registry.
//!
//! Keeps the set of topics the application wants (`desired`) apart from the
//! set currently subscribed on the broker (`live`). Desired topics outlive
//! connections; live ones are cleared whenever a session ends and replayed
//! after every handshake.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use wardbell_protocol::Frame;

use crate::stomp_client::{StompClient, StompError};
use crate::types::{MessageHandler, SubscribeOutcome};

/// Something that can put a frame on the wire.
pub(crate) trait FrameSender {
    fn send_frame(&self, frame: &Frame) -> Result<(), StompError>;
}

impl FrameSender for StompClient {
    fn send_frame(&self, frame: &Frame) -> Result<(), StompError> {
        StompClient::send_frame(self, frame)
    }
}

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    desired: BTreeMap<String, MessageHandler>,
    /// topic -> subscription id
    live: BTreeMap<String, String>,
    /// subscription id -> topic
    routes: HashMap<String, String>,
    next_id: u64,
}

impl SubscriptionRegistry {
    /// Records a desired topic and, when a session is given, subscribes it
    /// on the broker right away.
    ///
    /// A topic that is already desired is left untouched, handler included.
    pub(crate) fn subscribe(
        &mut self,
        topic: &str,
        handler: MessageHandler,
        session: Option<&dyn FrameSender>,
    ) -> SubscribeOutcome {
        if self.desired.contains_key(topic) {
            debug!(topic, "already subscribed");
            return SubscribeOutcome::AlreadySubscribed;
        }
        self.desired.insert(topic.to_string(), handler);

        let Some(session) = session else {
            debug!(topic, "not connected, subscription deferred");
            return SubscribeOutcome::Deferred;
        };
        match self.go_live(topic, session) {
            Some(subscription_id) => SubscribeOutcome::Live { subscription_id },
            None => SubscribeOutcome::Deferred,
        }
    }

    /// Forgets a topic. Sends UNSUBSCRIBE when it was live on `session`.
    /// Returns `false` if the topic was not desired.
    pub(crate) fn unsubscribe(&mut self, topic: &str, session: Option<&dyn FrameSender>) -> bool {
        let was_desired = self.desired.remove(topic).is_some();
        if let Some(id) = self.live.remove(topic) {
            self.routes.remove(&id);
            if let Some(Err(e)) = session.map(|s| s.send_frame(&Frame::unsubscribe(&id))) {
                debug!(topic, "UNSUBSCRIBE not sent: {e}");
            }
        }
        was_desired
    }

    /// Subscribes every desired topic that is not yet live. Returns how many
    /// SUBSCRIBE frames were accepted.
    pub(crate) fn resubscribe(&mut self, session: &dyn FrameSender) -> usize {
        let pending: Vec<String> = self
            .desired
            .keys()
            .filter(|t| !self.live.contains_key(*t))
            .cloned()
            .collect();
        pending
            .iter()
            .filter(|topic| self.go_live(topic, session).is_some())
            .count()
    }

    /// Drops all live subscriptions. With a session, UNSUBSCRIBE is sent for
    /// each on a best-effort basis.
    pub(crate) fn clear_live(&mut self, session: Option<&dyn FrameSender>) {
        if let Some(session) = session {
            for id in self.live.values() {
                let _ = session.send_frame(&Frame::unsubscribe(id));
            }
        }
        self.live.clear();
        self.routes.clear();
    }

    /// Resolves a MESSAGE's `subscription` header to its topic and handler.
    pub(crate) fn route(&self, subscription_id: &str) -> Option<(String, MessageHandler)> {
        let topic = self.routes.get(subscription_id)?;
        let handler = self.desired.get(topic)?;
        Some((topic.clone(), handler.clone()))
    }

    pub(crate) fn desired_topics(&self) -> Vec<String> {
        self.desired.keys().cloned().collect()
    }

    pub(crate) fn live_topics(&self) -> Vec<String> {
        self.live.keys().cloned().collect()
    }

    /// Allocates an id and sends SUBSCRIBE. The entry is recorded before the
    /// frame goes out and rolled back if the send fails.
    fn go_live(&mut self, topic: &str, session: &dyn FrameSender) -> Option<String> {
        let id = format!("sub-{}", self.next_id);
        self.next_id += 1;
        self.live.insert(topic.to_string(), id.clone());
        self.routes.insert(id.clone(), topic.to_string());

        match session.send_frame(&Frame::subscribe(&id, topic)) {
            Ok(()) => {
                debug!(topic, subscription_id = %id, "subscribed");
                Some(id)
            }
            Err(e) => {
                warn!(topic, "SUBSCRIBE failed, will retry on next handshake: {e}");
                self.live.remove(topic);
                self.routes.remove(&id);
                None
            }
        }
    }
}
