//! MQTT transport backed by rumqttc.
//!
//! Owns the rumqttc event loop in a background task and forwards inbound
//! publishes to the engine through a channel. One instance serves one
//! registration attempt.

use std::sync::Arc;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet, QoS, TlsConfiguration,
    Transport as MqttTransportKind,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{AuthStrategy, ConnectOptions, InboundMessage, Transport, TransportError};

/// Bound on in-flight requests handed to rumqttc.
const REQUEST_CHANNEL_CAPACITY: usize = 16;

/// MQTT transport for one registration attempt.
#[derive(Default)]
pub struct MqttTransport {
    client: Option<AsyncClient>,
    incoming: Option<mpsc::UnboundedReceiver<InboundMessage>>,
    event_task: Option<JoinHandle<()>>,
}

impl MqttTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self) -> Result<&AsyncClient, TransportError> {
        self.client.as_ref().ok_or(TransportError::Closed)
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&mut self, options: &ConnectOptions) -> Result<(), TransportError> {
        let mut mqtt_options =
            MqttOptions::new(options.client_id.as_str(), options.host.as_str(), options.port);
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_clean_session(true);

        let tls = build_tls_config(&options.auth)?;
        mqtt_options.set_transport(MqttTransportKind::Tls(TlsConfiguration::Rustls(Arc::new(
            tls,
        ))));

        match &options.auth {
            AuthStrategy::SasToken(token) => {
                mqtt_options.set_credentials(options.username.as_str(), token.as_str());
            }
            // Certificate auth presents the identity in the handshake;
            // the password field stays empty.
            AuthStrategy::ClientCertificate(_) => {
                mqtt_options.set_credentials(options.username.as_str(), "");
            }
        }

        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ready = Some(ready_tx);
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if let Some(ready) = ready.take() {
                            let outcome = match ack.code {
                                ConnectReturnCode::Success => Ok(()),
                                code => Err(TransportError::Connect(format!(
                                    "broker refused connection: {code:?}"
                                ))),
                            };
                            let _ = ready.send(outcome);
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = InboundMessage {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        };
                        if message_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if let Some(ready) = ready.take() {
                            let _ = ready.send(Err(TransportError::Connect(e.to_string())));
                        } else {
                            tracing::debug!(error = %e, "mqtt event loop terminated");
                        }
                        break;
                    }
                }
            }
        });

        ready_rx
            .await
            .map_err(|_| TransportError::Closed)
            .and_then(|outcome| outcome)?;

        self.client = Some(client);
        self.incoming = Some(message_rx);
        self.event_task = Some(task);
        Ok(())
    }

    async fn subscribe(&mut self, topic_filter: &str) -> Result<(), TransportError> {
        self.client()?
            .subscribe(topic_filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client()?
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn recv(&mut self) -> Result<InboundMessage, TransportError> {
        let incoming = self.incoming.as_mut().ok_or(TransportError::Closed)?;
        incoming.recv().await.ok_or(TransportError::Closed)
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(client) = self.client.take() {
            // Outcome is irrelevant if the connection already dropped
            let _ = client.disconnect().await;
        }
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
        self.incoming = None;
        Ok(())
    }
}

/// Build the rustls client configuration for one attempt.
///
/// Server trust comes from the platform root store. Certificate-auth
/// attempts additionally offer the client identity during the handshake.
fn build_tls_config(auth: &AuthStrategy) -> Result<rustls::ClientConfig, TransportError> {
    let mut roots = rustls::RootCertStore::empty();
    let loaded = rustls_native_certs::load_native_certs();
    for cert in loaded.certs {
        let _ = roots.add(cert);
    }
    if roots.is_empty() {
        return Err(TransportError::Tls(
            "no usable trust roots in the platform store".to_string(),
        ));
    }

    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
    match auth {
        AuthStrategy::SasToken(_) => Ok(builder.with_no_client_auth()),
        AuthStrategy::ClientCertificate(identity) => builder
            .with_client_auth_cert(vec![identity.rustls_cert()], identity.rustls_key())
            .map_err(|e| TransportError::Tls(e.to_string())),
    }
}
