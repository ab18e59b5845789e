//! MQTT v5 session.
//!
//! The session owns the only references to the MQTT client. Inbound
//! publishes are forwarded from the event-loop task over a bounded channel
//! to a dispatch worker, which parses the payload, runs the dispatcher, and
//! publishes the reply on the request's response topic with its
//! correlation data echoed. Unsolicited messages from instances flow
//! through the same client handle, whose request queue keeps publishes from
//! interleaving on the wire.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dab_core::{DabError, Dispatcher, Publisher, RequestEnvelope};
use rumqttc::v5::mqttbytes::v5::{Packet, PublishProperties, SubscribeReasonCode};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::SessionError;

const DISCONNECT_DRAIN: Duration = Duration::from_secs(10);

fn default_client_id() -> String {
    "dab".to_string()
}

fn default_keep_alive() -> u64 {
    20
}

fn default_clean_start() -> bool {
    true
}

fn default_capacity() -> usize {
    10
}

fn default_fallback_topic() -> String {
    "dab/response".to_string()
}

/// MQTT session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Broker URI, e.g. `mqtt://127.0.0.1:1883`.
    pub broker_uri: String,
    /// Client identifier presented to the broker.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Start without session state on the broker.
    #[serde(default = "default_clean_start")]
    pub clean_start: bool,
    /// Capacity of the inbound hand-off channel.
    #[serde(default = "default_capacity")]
    pub channel_capacity: usize,
    /// Reply topic used when a request carries no response-topic property.
    #[serde(default = "default_fallback_topic")]
    pub fallback_reply_topic: String,
}

impl SessionConfig {
    pub fn new(broker_uri: impl Into<String>) -> Self {
        Self {
            broker_uri: broker_uri.into(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive(),
            clean_start: default_clean_start(),
            channel_capacity: default_capacity(),
            fallback_reply_topic: default_fallback_topic(),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }
}

/// What the event-loop task hands to the dispatch worker.
#[derive(Debug)]
struct InboundMessage {
    topic: String,
    payload: Bytes,
    response_topic: Option<String>,
    correlation_data: Option<Vec<u8>>,
}

/// A connected MQTT session serving one dispatcher.
pub struct MqttSession {
    client: AsyncClient,
    stopped: CancellationToken,
}

impl MqttSession {
    /// Connect, subscribe to every registry topic with QoS 1, and start the
    /// inbound pipeline.
    pub async fn connect(
        config: SessionConfig,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self, SessionError> {
        let (host, port) = parse_broker_uri(&config.broker_uri)?;

        let mut options = MqttOptions::new(config.client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_clean_start(config.clean_start);

        let (client, eventloop) = AsyncClient::new(options, config.channel_capacity);

        // hand every instance the unsolicited publish path before traffic starts
        let publisher = reply_publisher(client.clone());
        dispatcher.registry().set_publish_callback(publisher).await;

        for topic in dispatcher.registry().subscription_topics().await {
            client.subscribe(topic.clone(), QoS::AtLeastOnce).await?;
            debug!("subscribed to {}", topic);
        }

        let stopped = CancellationToken::new();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.channel_capacity);

        tokio::spawn(poll_loop(eventloop, inbound_tx, stopped.clone()));
        tokio::spawn(dispatch_loop(
            inbound_rx,
            dispatcher,
            client.clone(),
            config.fallback_reply_topic.clone(),
        ));

        info!("mqtt session connected to {}", config.broker_uri);
        Ok(Self { client, stopped })
    }

    /// Block until `disconnect` is called or the connection is lost.
    pub async fn wait(&self) {
        self.stopped.cancelled().await;
    }

    /// Issue a DISCONNECT, drain for up to ten seconds, and release waiters.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.client.disconnect().await?;
        if tokio::time::timeout(DISCONNECT_DRAIN, self.stopped.cancelled())
            .await
            .is_err()
        {
            warn!("disconnect drain timed out");
        }
        self.stopped.cancel();
        Ok(())
    }
}

/// Publisher used for both replies and unsolicited messages: QoS 0, not
/// retained, serialized with quoted names.
fn reply_publisher(client: AsyncClient) -> Publisher {
    Publisher::new(move |topic: String, payload| {
        let client = client.clone();
        async move {
            let body = payload.serialize(true);
            client
                .publish(topic, QoS::AtMostOnce, false, body.into_bytes())
                .await
                .map_err(|e| DabError::new(500, format!("error publishing message: {e}")))
        }
    })
}

async fn poll_loop(
    mut eventloop: EventLoop,
    inbound: mpsc::Sender<InboundMessage>,
    stopped: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stopped.cancelled() => break,
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let Ok(topic) = std::str::from_utf8(&publish.topic) else {
                        warn!("dropping publish with non-utf8 topic");
                        continue;
                    };
                    let (response_topic, correlation_data) = match &publish.properties {
                        Some(props) => (
                            props.response_topic.clone(),
                            props.correlation_data.as_ref().map(|data| data.to_vec()),
                        ),
                        None => (None, None),
                    };
                    let message = InboundMessage {
                        topic: topic.to_owned(),
                        payload: publish.payload.clone(),
                        response_topic,
                        correlation_data,
                    };
                    if inbound.send(message).await.is_err() {
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("mqtt broker connection acknowledged");
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    for code in &ack.return_codes {
                        match code {
                            SubscribeReasonCode::Success(_) => {}
                            other => error!("subscription rejected: {:?}", other),
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("mqtt connection lost: {}", e);
                    break;
                }
            }
        }
    }
    stopped.cancel();
}

async fn dispatch_loop(
    mut inbound: mpsc::Receiver<InboundMessage>,
    dispatcher: Arc<Dispatcher>,
    client: AsyncClient,
    fallback_reply_topic: String,
) {
    while let Some(message) = inbound.recv().await {
        let Some(request) = build_request(message) else {
            continue;
        };

        let reply = dispatcher.dispatch(&request).await;
        let body = reply.serialize(true);
        let reply_topic = request
            .response_topic
            .clone()
            .unwrap_or_else(|| fallback_reply_topic.clone());

        let properties = reply_properties(request.correlation_data.as_deref());

        if let Err(e) = client
            .publish_with_properties(
                reply_topic.clone(),
                QoS::AtMostOnce,
                false,
                body.into_bytes(),
                properties,
            )
            .await
        {
            error!("error publishing reply to {}: {}", reply_topic, e);
        }
    }
}

/// Correlation data is echoed verbatim when the request carried any.
fn reply_properties(correlation_data: Option<&[u8]>) -> PublishProperties {
    let mut properties = PublishProperties::default();
    if let Some(data) = correlation_data {
        properties.correlation_data = Some(Bytes::copy_from_slice(data));
    }
    properties
}

/// Decode an inbound message into a request envelope; parse failures are
/// logged and dropped.
fn build_request(message: InboundMessage) -> Option<RequestEnvelope> {
    let text = match std::str::from_utf8(&message.payload) {
        Ok(text) => text,
        Err(_) => {
            warn!("dropping non-utf8 payload on {}", message.topic);
            return None;
        }
    };
    let payload = match dab_json::parse(text) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("dropping unparseable payload on {}: {}", message.topic, e);
            return None;
        }
    };

    let mut request = RequestEnvelope::new(message.topic, payload);
    request.response_topic = message.response_topic;
    request.correlation_data = message.correlation_data;
    Some(request)
}

/// Accepts `mqtt://host:port`, `tcp://host:port`, or a bare `host[:port]`;
/// the port defaults to 1883.
fn parse_broker_uri(uri: &str) -> Result<(String, u16), SessionError> {
    let invalid = |reason: &str| SessionError::InvalidBrokerUri {
        uri: uri.to_owned(),
        reason: reason.to_owned(),
    };

    let candidate = if uri.contains("://") {
        uri.to_owned()
    } else {
        format!("tcp://{uri}")
    };

    let parsed = url::Url::parse(&candidate).map_err(|e| invalid(&e.to_string()))?;
    match parsed.scheme() {
        "mqtt" | "tcp" => {}
        other => return Err(invalid(&format!("unsupported scheme \"{other}\""))),
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| invalid("missing host"))?
        .to_owned();
    Ok((host, parsed.port().unwrap_or(1883)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dab_json::JsonValue;

    #[test]
    fn test_parse_broker_uri() {
        assert_eq!(
            parse_broker_uri("mqtt://10.0.0.2:1884").unwrap(),
            ("10.0.0.2".to_string(), 1884)
        );
        assert_eq!(
            parse_broker_uri("tcp://broker.local").unwrap(),
            ("broker.local".to_string(), 1883)
        );
        assert_eq!(
            parse_broker_uri("127.0.0.1:2883").unwrap(),
            ("127.0.0.1".to_string(), 2883)
        );
        assert_eq!(
            parse_broker_uri("localhost").unwrap(),
            ("localhost".to_string(), 1883)
        );
    }

    #[test]
    fn test_parse_broker_uri_rejects_other_schemes() {
        assert!(parse_broker_uri("http://10.0.0.2").is_err());
        assert!(parse_broker_uri("").is_err());
    }

    #[test]
    fn test_build_request_copies_properties() {
        let message = InboundMessage {
            topic: "dab/d1/device/info".into(),
            payload: Bytes::from_static(b"{\"a\":1}"),
            response_topic: Some("client/reply".into()),
            correlation_data: Some(vec![0x41, 0x42]),
        };
        let request = build_request(message).expect("request");
        assert_eq!(request.topic, "dab/d1/device/info");
        assert_eq!(request.payload.get("a"), Some(&JsonValue::Int(1)));
        assert_eq!(request.response_topic.as_deref(), Some("client/reply"));
        assert_eq!(request.correlation_data, Some(vec![0x41, 0x42]));
    }

    #[test]
    fn test_build_request_drops_parse_failures() {
        let message = InboundMessage {
            topic: "dab/d1/device/info".into(),
            payload: Bytes::from_static(b"{not json"),
            response_topic: None,
            correlation_data: None,
        };
        assert!(build_request(message).is_none());
    }

    #[test]
    fn test_reply_properties_echo_correlation_bytes() {
        let properties = reply_properties(Some(&[0x41, 0x42]));
        assert_eq!(
            properties.correlation_data,
            Some(Bytes::from_static(b"AB"))
        );
        assert_eq!(reply_properties(None).correlation_data, None);
    }

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::new("mqtt://127.0.0.1");
        assert_eq!(config.client_id, "dab");
        assert_eq!(config.keep_alive_secs, 20);
        assert!(config.clean_start);
        assert_eq!(config.fallback_reply_topic, "dab/response");
    }
}
