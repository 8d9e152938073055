//! Discovery bridge state machine.
//!
//! Connection events and inbound publications are fed into
//! [`DiscoveryBridge::handle`] as [`BridgeEvent`]s:
//!
//! | Event            | State after    | Effect                                         |
//! |------------------|----------------|------------------------------------------------|
//! | `Connecting`     | `Connecting`   | log                                            |
//! | `Connected`      | `Connected`    | subscribe, replay every cached announcement    |
//! | `ConnectionLost` | `Disconnected` | log                                            |
//! | `Reconnecting`   | `Connecting`   | log                                            |
//! | `Message`        | unchanged      | classify, publish announcement, cache it       |
//!
//! `Connected` and `Message` may be handled concurrently; both go through the
//! cache lock.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use rumqttc::{AsyncClient, QoS};
use tracing::{debug, info, trace, warn};

use crate::cache::DiscoveryCache;
use crate::discovery::{self, Announcement};
use crate::error::{BridgeError, Result};
use crate::topic::Rejection;

/// The MQTT operations the bridge needs from its transport.
pub trait MqttSink {
    /// Subscribe to a (wildcard) topic filter.
    fn subscribe_wildcard(&self, topic: &str) -> impl Future<Output = Result<()>> + Send;

    /// Publish a retained message.
    fn publish_retained(&self, topic: &str, payload: &[u8])
    -> impl Future<Output = Result<()>> + Send;
}

impl MqttSink for AsyncClient {
    async fn subscribe_wildcard(&self, topic: &str) -> Result<()> {
        self.subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| BridgeError::Subscribe {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }

    async fn publish_retained(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.publish(topic, QoS::AtMostOnce, true, payload.to_vec())
            .await
            .map_err(|e| BridgeError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }
}

/// Broker connection state as seen by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Input to the bridge state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// First connection attempt started.
    Connecting,
    /// Broker acknowledged a connection (first or any later one).
    Connected,
    /// The connection dropped or could not be established.
    ConnectionLost { reason: String },
    /// A new connection attempt is about to be made.
    Reconnecting,
    /// A publication arrived on the subscribed topic tree.
    Message { topic: String, payload: Vec<u8> },
}

impl BridgeEvent {
    /// Whether handling this event talks to the broker.
    pub fn needs_io(&self) -> bool {
        matches!(self, Self::Connected | Self::Message { .. })
    }
}

/// Derives discovery announcements from telemetry topics and keeps them
/// announced across reconnects.
#[derive(Debug)]
pub struct DiscoveryBridge {
    subscribe_topic: String,
    config_url: String,
    cache: DiscoveryCache,
    state: Mutex<ConnectionState>,
}

/// Shared handle to the bridge.
pub type SharedBridge = Arc<DiscoveryBridge>;

impl DiscoveryBridge {
    /// Create a bridge subscribing to `subscribe_topic`; `config_url` is
    /// advertised as the device configuration URL.
    pub fn new(subscribe_topic: impl Into<String>, config_url: impl Into<String>) -> Self {
        Self {
            subscribe_topic: subscribe_topic.into(),
            config_url: config_url.into(),
            cache: DiscoveryCache::new(),
            state: Mutex::new(ConnectionState::Disconnected),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn cache(&self) -> &DiscoveryCache {
        &self.cache
    }

    pub fn subscribe_topic(&self) -> &str {
        &self.subscribe_topic
    }

    /// Apply the state change for an event and perform its effects.
    pub async fn handle<S>(&self, event: BridgeEvent, sink: &S)
    where
        S: MqttSink + Sync,
    {
        self.transition(&event);
        self.process(event, sink).await;
    }

    /// Update the connection state for an event. Never blocks on I/O.
    pub fn transition(&self, event: &BridgeEvent) {
        let next = match event {
            BridgeEvent::Connecting => {
                info!(topic = %self.subscribe_topic, "Connecting to MQTT broker");
                ConnectionState::Connecting
            }
            BridgeEvent::Reconnecting => {
                info!("MQTT reconnecting...");
                ConnectionState::Connecting
            }
            BridgeEvent::Connected => ConnectionState::Connected,
            BridgeEvent::ConnectionLost { reason } => {
                warn!(reason = %reason, "MQTT connection lost");
                ConnectionState::Disconnected
            }
            BridgeEvent::Message { .. } => return,
        };

        let previous = std::mem::replace(&mut *self.state.lock(), next);
        trace!(?previous, ?next, "Bridge state transition");
    }

    /// Perform the broker-facing effects of an event.
    pub async fn process<S>(&self, event: BridgeEvent, sink: &S)
    where
        S: MqttSink + Sync,
    {
        match event {
            BridgeEvent::Connected => self.on_connected(sink).await,
            BridgeEvent::Message { topic, payload } => {
                self.on_message(&topic, &payload, sink).await;
            }
            _ => {}
        }
    }

    async fn on_connected<S>(&self, sink: &S)
    where
        S: MqttSink + Sync,
    {
        info!(topic = %self.subscribe_topic, "MQTT connected: (re)subscribing");
        if let Err(e) = sink.subscribe_wildcard(&self.subscribe_topic).await {
            warn!(error = %e, "Subscribe failed after connect");
        }

        let entries = self.cache.entries().await;
        let mut failed = 0usize;
        for (topic, payload) in entries.iter() {
            if let Err(e) = sink.publish_retained(topic, payload).await {
                failed += 1;
                warn!(error = %e, "Republish of discovery failed");
            }
        }
        info!(
            republished = entries.len() - failed,
            failed, "Replayed discovery announcements"
        );
    }

    async fn on_message<S>(&self, topic: &str, payload: &[u8], sink: &S)
    where
        S: MqttSink + Sync,
    {
        let Some(announcement) = self.announcement_for(topic, payload) else {
            return;
        };

        if let Err(e) = sink
            .publish_retained(&announcement.topic, &announcement.payload)
            .await
        {
            warn!(error = %e, "Failed to publish discovery");
        }

        let topic = announcement.topic;
        if self.cache.record(topic.clone(), announcement.payload).await {
            debug!(discovery_topic = %topic, "New entity announced");
        }
    }

    fn announcement_for(&self, topic: &str, payload: &[u8]) -> Option<Announcement> {
        let entity = match discovery::classify(topic) {
            Ok(entity) => entity,
            Err(Rejection::UnsupportedShape) => {
                warn!(
                    topic,
                    payload = %String::from_utf8_lossy(payload),
                    "Unsupported message (extra path)"
                );
                return None;
            }
            Err(rejection) => {
                trace!(topic, ?rejection, "Ignoring telemetry topic");
                return None;
            }
        };

        match entity.announcement(&self.config_url) {
            Ok(announcement) => Some(announcement),
            Err(e) => {
                warn!(topic, error = %e, "Failed to build discovery payload");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        published: Mutex<Vec<(String, Vec<u8>)>>,
        subscribed: Mutex<Vec<String>>,
    }

    impl MqttSink for Recorder {
        async fn subscribe_wildcard(&self, topic: &str) -> Result<()> {
            self.subscribed.lock().push(topic.to_string());
            Ok(())
        }

        async fn publish_retained(&self, topic: &str, payload: &[u8]) -> Result<()> {
            self.published
                .lock()
                .push((topic.to_string(), payload.to_vec()));
            Ok(())
        }
    }

    fn message(topic: &str) -> BridgeEvent {
        BridgeEvent::Message {
            topic: topic.to_string(),
            payload: b"230.1".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let bridge = DiscoveryBridge::new("mbmd/#", "http://mbmd");
        let sink = Recorder::default();
        assert_eq!(bridge.state(), ConnectionState::Disconnected);

        bridge.handle(BridgeEvent::Connecting, &sink).await;
        assert_eq!(bridge.state(), ConnectionState::Connecting);

        bridge.handle(BridgeEvent::Connected, &sink).await;
        assert_eq!(bridge.state(), ConnectionState::Connected);

        bridge.handle(message("mbmd/this.1/Power/L1"), &sink).await;
        assert_eq!(bridge.state(), ConnectionState::Connected);

        bridge
            .handle(
                BridgeEvent::ConnectionLost {
                    reason: "eof".into(),
                },
                &sink,
            )
            .await;
        assert_eq!(bridge.state(), ConnectionState::Disconnected);

        bridge.handle(BridgeEvent::Reconnecting, &sink).await;
        assert_eq!(bridge.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_connected_subscribes() {
        let bridge = DiscoveryBridge::new("meters/#", "http://mbmd");
        let sink = Recorder::default();

        bridge.handle(BridgeEvent::Connected, &sink).await;
        assert_eq!(*sink.subscribed.lock(), vec!["meters/#".to_string()]);
        assert!(sink.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_message_publishes_and_caches() {
        let bridge = DiscoveryBridge::new("mbmd/#", "http://mbmd");
        let sink = Recorder::default();

        bridge.handle(message("mbmd/this.1/Power/L1"), &sink).await;

        let published = sink.published.lock().clone();
        assert_eq!(published.len(), 1);
        assert_eq!(
            published[0].0,
            "homeassistant/sensor/mbmd-exporter-bridge-this-1/power-l1/config"
        );
        assert_eq!(
            bridge.cache().get(&published[0].0).await,
            Some(published[0].1.clone())
        );
    }

    #[tokio::test]
    async fn test_rejected_topics_are_ignored() {
        let bridge = DiscoveryBridge::new("mbmd/#", "http://mbmd");
        let sink = Recorder::default();

        for topic in [
            "mbmd/this.1/Power",
            "mbmd/status/x/y",
            "mbmd/this.1/Power/T1",
            "mbmd/this.1/Unknown/L1",
            "mbmd/this.1/Power/L1/extra",
        ] {
            bridge.handle(message(topic), &sink).await;
        }

        assert!(sink.published.lock().is_empty());
        assert!(bridge.cache().is_empty().await);
    }

    #[test]
    fn test_needs_io() {
        assert!(BridgeEvent::Connected.needs_io());
        assert!(message("a/b/c/d").needs_io());
        assert!(!BridgeEvent::Reconnecting.needs_io());
        assert!(!BridgeEvent::Connecting.needs_io());
    }
}
