//! Broker session on top of the `rumqttc` v5 client.
//!
//! [`connect`] resolves the session descriptor, builds the client options and
//! spawns the pump task. The pump polls the event loop, translates each
//! notification into a [`ClientEvent`] and hands it to the [`Dispatcher`].
//! Reconnecting is left to `rumqttc`: after a poll error the next poll dials
//! the broker again.

use std::path::PathBuf;
use std::time::Duration;

use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use rumqttc::{Outgoing, TlsConfiguration, Transport};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{SessionDescriptor, TrustPolicy};
use super::dispatcher::{Broker, Dispatcher};
use super::message::InboundMessage;
use super::mqtt_handler::{ClientEvent, ConnectionState, MessageHandler};
use crate::config::{BrokerConfig, ConfigError};
use crate::gpio::{OutputLine, OutputPin};

const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid broker configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to read CA bundle {path}: {source}")]
    CaBundle {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Running broker session. Lives until the shutdown token is cancelled.
pub struct Session {
    descriptor: SessionDescriptor,
    task: JoinHandle<()>,
}

impl Session {
    pub fn descriptor(&self) -> &SessionDescriptor {
        &self.descriptor
    }

    /// Waits for the pump to stop.
    pub async fn join(self) -> Result<(), SessionError> {
        self.task.await?;
        Ok(())
    }
}

fn mqtt_options(descriptor: &SessionDescriptor) -> Result<MqttOptions, SessionError> {
    let mut options = MqttOptions::new(
        descriptor.client_id.clone(),
        descriptor.host.clone(),
        descriptor.port,
    );
    options.set_keep_alive(descriptor.keep_alive);

    if let Some((user, password)) = &descriptor.credentials {
        options.set_credentials(user.clone(), password.clone());
    }

    match &descriptor.trust {
        TrustPolicy::Plaintext => {
            warn!("Broker connection is not encrypted");
        }
        TrustPolicy::SystemRoots => {
            options.set_transport(Transport::tls_with_default_config());
        }
        TrustPolicy::CaBundle(path) => {
            let ca = std::fs::read(path).map_err(|source| SessionError::CaBundle {
                path: path.clone(),
                source,
            })?;
            options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: None,
            }));
        }
    }

    Ok(options)
}

/// Builds the session from static configuration and starts the client. The
/// connection attempt happens in the background; this does not wait for it.
pub fn connect<L>(
    config: &BrokerConfig,
    handler: MessageHandler,
    pin: OutputPin<L>,
    shutdown: CancellationToken,
) -> Result<Session, SessionError>
where
    L: OutputLine + Send + 'static,
{
    let descriptor = SessionDescriptor::from_config(config)?;
    let options = mqtt_options(&descriptor)?;

    info!(
        "Connecting to {}:{} as {} (MQTT v{}, trust: {:?}), command topic {}",
        descriptor.host,
        descriptor.port,
        descriptor.client_id,
        descriptor.protocol_version,
        descriptor.trust,
        handler.topic()
    );

    let (client, eventloop) = AsyncClient::new(options, descriptor.capacity);
    let dispatcher = Dispatcher::new(handler, client.clone(), pin);
    let task = tokio::spawn(pump(
        eventloop,
        client,
        dispatcher,
        descriptor.reconnect_delay,
        shutdown,
    ));

    Ok(Session { descriptor, task })
}

/// Maps a client notification onto the handler's event vocabulary.
pub(crate) fn translate(event: &Event) -> ClientEvent<'_> {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => ClientEvent::Connected,
        Event::Incoming(Packet::SubAck(ack)) => ClientEvent::Subscribed {
            msg_id: ack.pkid,
            accepted: ack
                .return_codes
                .iter()
                .any(|code| matches!(code, SubscribeReasonCode::Success(_))),
        },
        Event::Incoming(Packet::Publish(publish)) => {
            ClientEvent::Data(InboundMessage::new(&publish.topic[..], &publish.payload[..]))
        }
        Event::Incoming(Packet::Disconnect(_)) => ClientEvent::Disconnected,
        Event::Incoming(packet) => ClientEvent::Other(format!("incoming {:?}", packet)),
        Event::Outgoing(Outgoing::Subscribe(pkid)) => ClientEvent::SubscribeSent { msg_id: *pkid },
        Event::Outgoing(outgoing) => ClientEvent::Other(format!("outgoing {:?}", outgoing)),
    }
}

/// Reports a failed poll to the dispatcher. Returns whether an established
/// connection was lost.
pub(crate) fn poll_failed<B: Broker, L: OutputLine>(
    dispatcher: &mut Dispatcher<B, L>,
    reason: String,
) -> bool {
    dispatcher.dispatch(&ClientEvent::Error(reason));
    if dispatcher.state().connection_state == ConnectionState::Disconnected {
        return false;
    }
    dispatcher.dispatch(&ClientEvent::Disconnected);
    true
}

async fn pump<L: OutputLine>(
    mut eventloop: EventLoop,
    client: AsyncClient,
    mut dispatcher: Dispatcher<AsyncClient, L>,
    reconnect_delay: Duration,
    shutdown: CancellationToken,
) {
    debug!("MQTT pump started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            polled = eventloop.poll() => match polled {
                Ok(event) => dispatcher.dispatch(&translate(&event)),
                Err(e) => {
                    poll_failed(&mut dispatcher, e.to_string());
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(reconnect_delay) => {}
                    }
                }
            }
        }
    }

    if dispatcher.state().connection_state != ConnectionState::Disconnected {
        disconnect(&mut eventloop, &client).await;
    }
    info!(
        "MQTT session stopped ({} unrecognized commands, output at {})",
        dispatcher.unrecognized_count(),
        dispatcher.pin().level()
    );
}

async fn disconnect(eventloop: &mut EventLoop, client: &AsyncClient) {
    if let Err(e) = client.try_disconnect() {
        error!("Failed to queue disconnect: {}", e);
        return;
    }
    let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    if flushed.is_err() {
        warn!("Broker disconnect not flushed within {:?}", DISCONNECT_GRACE);
    }
}
