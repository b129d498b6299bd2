use crate::config::BrokerConfig;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);
const REQUEST_CAPACITY: usize = 16;

/// A single message the broker did not accept
#[derive(Debug, Error)]
#[error("Failed to publish to {topic}: {reason}")]
pub struct PublishError {
    pub topic: String,
    pub reason: String,
}

/// Fire-and-confirm publication of one message
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError>;
}

#[async_trait]
impl<T: Publisher + ?Sized> Publisher for Arc<T> {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        (**self).publish(topic, payload).await
    }
}

/// Owns the MQTT connection and the task driving its event loop.
/// Only the holder of this handle can disconnect; publishing goes through
/// [`MqttPublisher`] clones.
pub struct MqttBroker {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    event_task: JoinHandle<()>,
}

impl MqttBroker {
    /// Starts connecting in the background. An unreachable broker is logged
    /// by the event loop task and retried, it does not fail startup.
    pub fn connect(config: &BrokerConfig, client_id: &str) -> Self {
        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        info!(host = %config.host, port = config.port, client_id, "connecting to MQTT broker");

        let connected = Arc::new(AtomicBool::new(false));
        let event_task = tokio::spawn(drive_event_loop(event_loop, connected.clone()));
        Self {
            client,
            connected,
            event_task,
        }
    }

    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
            connected: self.connected.clone(),
        }
    }

    /// True between the broker's CONNACK and the next connection error
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Requests a clean disconnect and gives in-flight work up to `grace`
    /// to reach the broker before the event loop is dropped.
    pub async fn disconnect(mut self, grace: Duration) {
        if let Err(e) = self.client.try_disconnect() {
            warn!(error = %e, "could not queue MQTT disconnect");
        }

        match timeout(grace, &mut self.event_task).await {
            Ok(Ok(())) => info!("disconnected from MQTT broker"),
            Ok(Err(e)) => warn!(error = %e, "MQTT event loop task failed"),
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "MQTT disconnect timed out");
                self.event_task.abort();
            }
        }
    }
}

async fn drive_event_loop(mut event_loop: EventLoop, connected: Arc<AtomicBool>) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(code = ?ack.code, "connected to MQTT broker");
                connected.store(true, Ordering::Release);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                connected.store(false, Ordering::Release);
                break;
            }
            Ok(event) => debug!(?event, "MQTT event"),
            Err(e) => {
                connected.store(false, Ordering::Release);
                warn!(error = %e, "MQTT connection error, retrying");
                sleep(RECONNECT_BACKOFF).await;
            }
        }
    }
}

/// Cloneable publishing side of [`MqttBroker`].
/// Messages are never queued while the broker is away: a publish either
/// lands in the client's outgoing slot or fails immediately.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(PublishError {
                topic: topic.to_string(),
                reason: "not connected".to_string(),
            });
        }

        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| PublishError {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Reads one MQTT control packet, returning its first byte and body
    async fn read_packet(stream: &mut TcpStream) -> (u8, Vec<u8>) {
        let header = stream.read_u8().await.unwrap();
        let mut remaining = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await.unwrap();
            remaining |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0u8; remaining];
        stream.read_exact(&mut body).await.unwrap();
        (header, body)
    }

    fn local_config(port: u16) -> BrokerConfig {
        BrokerConfig {
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_broker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let fake_broker = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            let (connect, _) = read_packet(&mut stream).await;
            assert_eq!(connect >> 4, 1, "expected CONNECT");
            stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

            let (publish, body) = read_packet(&mut stream).await;
            assert_eq!(publish, 0x30, "expected QoS 0 PUBLISH without retain");
            let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
            let topic = String::from_utf8(body[2..2 + topic_len].to_vec()).unwrap();
            let payload = String::from_utf8(body[2 + topic_len..].to_vec()).unwrap();

            let (disconnect, _) = read_packet(&mut stream).await;
            (topic, payload, disconnect)
        });

        let broker = MqttBroker::connect(&local_config(port), "mqweather-test");
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !broker.is_connected() && tokio::time::Instant::now() < deadline {
            sleep(Duration::from_millis(10)).await;
        }
        assert!(broker.is_connected());
        broker
            .publisher()
            .publish("mqweather/KXATEST1/temperature", "20123")
            .await
            .unwrap();

        broker.disconnect(Duration::from_secs(2)).await;

        let (topic, payload, disconnect) = timeout(Duration::from_secs(5), fake_broker)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(topic, "mqweather/KXATEST1/temperature");
        assert_eq!(payload, "20123");
        assert_eq!(disconnect, 0xe0);
    }

    #[tokio::test]
    async fn test_disconnect_bounded_when_broker_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let broker = MqttBroker::connect(&local_config(port), "mqweather-test");
        assert!(broker.publisher().publish("t", "p").await.is_err());

        let started = tokio::time::Instant::now();
        broker.disconnect(Duration::from_millis(250)).await;

        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_offline_publish_fails_fast() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let broker = MqttBroker::connect(&local_config(port), "mqweather-test");
        let publisher = broker.publisher();

        // Five cycles worth of metrics, more than the client's request capacity
        for i in 0..25 {
            let result = timeout(
                Duration::from_millis(500),
                publisher.publish("mqweather/KXATEST1/wind", "10999"),
            )
            .await
            .unwrap_or_else(|_| panic!("publish {i} blocked while offline"));

            let err = result.unwrap_err();
            assert_eq!(err.topic, "mqweather/KXATEST1/wind");
            assert_eq!(err.reason, "not connected");
        }
        assert!(!broker.is_connected());

        broker.disconnect(Duration::from_millis(250)).await;
    }
}
