//! # MQTT Session
//!
//! Broker session over `rumqttc`. The Will is configured on the connect
//! options, so the broker owns liveness once CONNACK is received. A pump task
//! drives the event loop and forwards CONNACKs, inbound publishes and
//! connection losses to the owner as [`SessionEvent`]s over an mpsc channel.
//!
//! Reconnects reuse the same options (and therefore the same Will). The
//! owner re-announces ONLINE and re-subscribes on every
//! [`SessionEvent::Connected`].

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::errors::{MessagingError, MessagingResult};
use super::transport::{InboundMessage, MqttTransport, OutboundMessage, QualityOfService, SessionEvent};
use crate::config::BrokerConfig;
use crate::connection::ReconnectPolicy;
use crate::constants::system;
use crate::logging::log_connection_event;

/// Capacity of the client request queue
const REQUEST_CHANNEL_CAPACITY: usize = 64;
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Live broker session; cheap to clone
#[derive(Clone)]
pub struct MqttSession {
    client: AsyncClient,
    client_id: String,
}

impl std::fmt::Debug for MqttSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttSession")
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// Handle on the task driving the event loop
pub struct SessionPump {
    handle: JoinHandle<MessagingResult<()>>,
}

impl SessionPump {
    /// Wait for the event loop to finish; `Err` if reconnects were exhausted
    pub async fn join(self) -> MessagingResult<()> {
        self.handle
            .await
            .map_err(|e| MessagingError::connection(format!("session task failed: {e}")))?
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl MqttSession {
    /// Configure the client and spawn the event-loop pump.
    ///
    /// `will` is registered as the MQTT Last Will. The first
    /// [`SessionEvent::Connected`] arrives once the broker acknowledges.
    pub fn start(
        broker: &BrokerConfig,
        client_id: impl Into<String>,
        will: Option<&OutboundMessage>,
        policy: ReconnectPolicy,
        shutdown: CancellationToken,
    ) -> (Self, mpsc::Receiver<SessionEvent>, SessionPump) {
        let client_id = client_id.into();
        let mut options = MqttOptions::new(&client_id, &broker.host, broker.port);
        options.set_keep_alive(Duration::from_secs(
            broker.keep_alive_seconds.max(MIN_KEEP_ALIVE_SECS),
        ));
        options.set_clean_session(true);
        if let Some(username) = &broker.username {
            options.set_credentials(username, broker.password.clone().unwrap_or_default());
        }
        if let Some(will) = will {
            options.set_last_will(LastWill::new(
                &will.topic,
                will.payload.clone(),
                will.qos.into(),
                will.retain,
            ));
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let (tx, rx) = mpsc::channel(system::INBOUND_CHANNEL_CAPACITY);

        tracing::info!(
            client_id = %client_id,
            host = %broker.host,
            port = broker.port,
            will = will.is_some(),
            "Starting MQTT session"
        );

        let handle = tokio::spawn(pump(eventloop, tx, policy, shutdown, client_id.clone()));
        (Self { client, client_id }, rx, SessionPump { handle })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

async fn pump(
    mut eventloop: EventLoop,
    tx: mpsc::Sender<SessionEvent>,
    policy: ReconnectPolicy,
    shutdown: CancellationToken,
    client_id: String,
) -> MessagingResult<()> {
    let mut attempt: u32 = 0;
    let mut connected = false;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                attempt = 0;
                connected = true;
                log_connection_event(&client_id, "connack", Some(format!("{:?}", ack.code).as_str()));
                forward(&tx, SessionEvent::Connected).await;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage::new(publish.topic.clone(), publish.payload.to_vec());
                forward(&tx, SessionEvent::Message(message)).await;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                log_connection_event(&client_id, "disconnect", None);
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                if shutdown.is_cancelled() {
                    log_connection_event(&client_id, "closed", Some(e.to_string().as_str()));
                    return Ok(());
                }
                if connected {
                    connected = false;
                    forward(
                        &tx,
                        SessionEvent::Disconnected {
                            reason: e.to_string(),
                        },
                    )
                    .await;
                }

                attempt += 1;
                if policy.exhausted(attempt) {
                    tracing::error!(
                        client_id = %client_id,
                        attempts = policy.max_attempts(),
                        error = %e,
                        "Broker unreachable, giving up"
                    );
                    return Err(MessagingError::RetriesExhausted {
                        attempts: policy.max_attempts(),
                        message: e.to_string(),
                    });
                }

                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    client_id = %client_id,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Broker connection failed, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => return Ok(()),
                }
            }
        }
    }
}

/// The receiver may be gone during shutdown; the loop must keep polling to
/// flush the final publishes.
async fn forward(tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    if tx.send(event).await.is_err() {
        tracing::trace!("Session event dropped, receiver closed");
    }
}

#[async_trait]
impl MqttTransport for MqttSession {
    async fn publish(&self, message: OutboundMessage) -> MessagingResult<()> {
        let OutboundMessage {
            topic,
            payload,
            qos,
            retain,
        } = message;
        self.client
            .publish(topic.clone(), qos.into(), retain, payload)
            .await
            .map_err(|e| MessagingError::publish(topic, e.to_string()))
    }

    async fn subscribe(&self, topic: &str, qos: QualityOfService) -> MessagingResult<()> {
        self.client
            .subscribe(topic, qos.into())
            .await
            .map_err(|e| MessagingError::subscribe(topic, e.to_string()))
    }

    async fn disconnect(&self) -> MessagingResult<()> {
        self.client.disconnect().await.map_err(MessagingError::from)
    }
}
