//! Drives a [`DiscoveryBridge`] from a rumqttc event loop.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, NetworkOptions, Packet};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeEvent, DiscoveryBridge, SharedBridge};
use crate::config::HassConfig;
use crate::error::Result;

/// Keep-alive interval sent to the broker.
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Capacity of the client request channel.
const REQUEST_CAPACITY: usize = 64;

/// Delay before the first reconnect attempt.
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Exponential reconnect delay, doubling up to a maximum.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Translate one event loop poll result into a bridge event.
///
/// Outgoing traffic and protocol chatter (pings, acks) yield `None`.
pub fn bridge_event(polled: std::result::Result<Event, ConnectionError>) -> Option<BridgeEvent> {
    match polled {
        Ok(Event::Incoming(Packet::ConnAck(_))) => Some(BridgeEvent::Connected),
        Ok(Event::Incoming(Packet::Publish(publish))) => Some(BridgeEvent::Message {
            topic: publish.topic,
            payload: publish.payload.to_vec(),
        }),
        Ok(Event::Incoming(Packet::Disconnect)) => Some(BridgeEvent::ConnectionLost {
            reason: "broker sent disconnect".to_string(),
        }),
        Ok(_) => None,
        Err(e) => Some(BridgeEvent::ConnectionLost {
            reason: e.to_string(),
        }),
    }
}

/// Runs the discovery bridge against an MQTT broker until shutdown.
pub struct BridgeRunner {
    config: HassConfig,
    bridge: SharedBridge,
}

impl BridgeRunner {
    /// Create a runner; `config_url` is advertised in every device block.
    pub fn new(config: HassConfig, config_url: impl Into<String>) -> Self {
        let bridge = Arc::new(DiscoveryBridge::new(config.topic.clone(), config_url));
        Self { config, bridge }
    }

    /// Get a handle to the bridge state.
    pub fn bridge(&self) -> SharedBridge {
        self.bridge.clone()
    }

    /// Build the rumqttc options from the configuration.
    pub fn mqtt_options(&self) -> Result<MqttOptions> {
        let broker = self.config.broker_address()?;
        let mut options = MqttOptions::new(&self.config.client_id, broker.host, broker.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(self.config.clean_session);
        Ok(options)
    }

    fn event_loop(&self) -> Result<(AsyncClient, EventLoop)> {
        let (client, mut eventloop) = AsyncClient::new(self.mqtt_options()?, REQUEST_CAPACITY);

        let mut network = NetworkOptions::new();
        network.set_connection_timeout(self.config.connect_timeout().as_secs());
        eventloop.set_network_options(network);

        Ok((client, eventloop))
    }

    /// Run the bridge until the shutdown signal is received.
    ///
    /// Connection failures are never fatal: they are logged and retried with
    /// a growing delay capped at the configured maximum.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (client, mut eventloop) = self.event_loop()?;
        let mut backoff =
            ReconnectBackoff::new(INITIAL_RECONNECT_DELAY, self.config.max_reconnect_interval());

        info!(
            broker = ?self.config.broker,
            topic = %self.config.topic,
            clean_session = self.config.clean_session,
            resume_subs = self.config.resume_subs,
            "Starting MQTT Home Assistant discovery"
        );
        self.dispatch(&client, BridgeEvent::Connecting);

        loop {
            tokio::select! {
                polled = eventloop.poll() => {
                    let failed = polled.is_err();
                    let Some(event) = bridge_event(polled) else {
                        continue;
                    };
                    if event == BridgeEvent::Connected {
                        backoff.reset();
                    }
                    self.dispatch(&client, event);
                    if !failed {
                        continue;
                    }

                    let dropped = self.discard_unacknowledged(&mut eventloop);
                    if dropped > 0 {
                        warn!(dropped, "Dropped requests not sent before the connection was lost");
                    }

                    let delay = backoff.next_delay();
                    debug!(delay_secs = delay.as_secs(), "Waiting before reconnect");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                    self.dispatch(&client, BridgeEvent::Reconnecting);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Discovery bridge stopped");
        Ok(())
    }

    /// Forget requests that were queued but never acknowledged, unless the
    /// configuration asks for them to be resumed.
    ///
    /// rumqttc moves them into `pending` on every connection error and
    /// re-sends them after the next ConnAck. Subscription and announcements
    /// are re-issued on every connect anyway.
    fn discard_unacknowledged(&self, eventloop: &mut EventLoop) -> usize {
        if self.config.resume_subs {
            return 0;
        }
        let dropped = eventloop.pending.len();
        eventloop.pending.clear();
        dropped
    }

    /// Apply the state change inline; broker I/O runs on its own task so the
    /// event loop keeps being polled while publishes are queued.
    fn dispatch(&self, client: &AsyncClient, event: BridgeEvent) {
        self.bridge.transition(&event);
        if !event.needs_io() {
            return;
        }

        let bridge = self.bridge.clone();
        let client = client.clone();
        tokio::spawn(async move {
            bridge.process(event, &client).await;
        });
    }
}
