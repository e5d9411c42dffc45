//! Event handling for the broker session.
//!
//! [`MessageHandler::on_event`] is a pure transition function: it takes the
//! current [`ClientState`] and one [`ClientEvent`] and returns the next state
//! plus the [`Effect`]s to perform. Nothing in here touches the pin or the
//! network; the dispatcher executes the effects.

use rumqttc::v5::mqttbytes::QoS;
use tracing::{debug, error, info};

use super::message::{Command, InboundMessage};
use crate::gpio::PinLevel;

/// Delivery guarantee requested for the command topic (at least once).
pub const SUBSCRIBE_QOS: QoS = QoS::AtLeastOnce;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Subscribed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientState {
    pub connection_state: ConnectionState,
    /// Message id of the last subscribe request sent
    pub subscribe_msg_id: Option<u16>,
}

/// Notifications delivered by the session pump.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent<'a> {
    Connected,
    Disconnected,
    /// Broker acknowledged a subscription. `accepted` is false when every
    /// requested filter was refused.
    Subscribed { msg_id: u16, accepted: bool },
    Data(InboundMessage<'a>),
    Error(String),
    /// The client put a subscribe request on the wire.
    SubscribeSent { msg_id: u16 },
    Other(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    Subscribe { topic: String, qos: QoS },
    SetPin(PinLevel),
    Unrecognized(String),
}

#[derive(Clone, Debug)]
pub struct MessageHandler {
    topic: String,
}

impl MessageHandler {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn on_event(
        &self,
        mut state: ClientState,
        event: &ClientEvent<'_>,
    ) -> (ClientState, Vec<Effect>) {
        let mut effects = Vec::new();

        match event {
            ClientEvent::Connected => {
                info!("Connected to MQTT broker");
                state.connection_state = ConnectionState::Connected;
                effects.push(Effect::Subscribe {
                    topic: self.topic.clone(),
                    qos: SUBSCRIBE_QOS,
                });
            }
            ClientEvent::Disconnected => {
                info!("Disconnected from MQTT broker");
                state.connection_state = ConnectionState::Disconnected;
            }
            ClientEvent::SubscribeSent { msg_id } => {
                info!("Subscribing to {} (msg_id={})", self.topic, msg_id);
                state.subscribe_msg_id = Some(*msg_id);
            }
            ClientEvent::Subscribed { msg_id, accepted } => {
                if *accepted {
                    info!("Subscription confirmed (msg_id={})", msg_id);
                    if state.connection_state == ConnectionState::Connected {
                        state.connection_state = ConnectionState::Subscribed;
                    }
                } else {
                    error!("Broker refused subscription to {} (msg_id={})", self.topic, msg_id);
                }
                if state.subscribe_msg_id != Some(*msg_id) {
                    debug!(
                        "Acknowledgement for msg_id={} while waiting for {:?}",
                        msg_id, state.subscribe_msg_id
                    );
                }
            }
            ClientEvent::Data(message) => {
                info!(
                    "Message received on {} at {}",
                    String::from_utf8_lossy(message.topic),
                    message.received_at.format("%H:%M:%S%.3f")
                );
                info!("Payload: {}", String::from_utf8_lossy(message.payload));

                match message.command() {
                    Command::On => {
                        info!("Output on");
                        effects.push(Effect::SetPin(PinLevel::High));
                    }
                    Command::Off => {
                        info!("Output off");
                        effects.push(Effect::SetPin(PinLevel::Low));
                    }
                    Command::Unrecognized(payload) => {
                        effects.push(Effect::Unrecognized(
                            String::from_utf8_lossy(payload).into_owned(),
                        ));
                    }
                }
            }
            ClientEvent::Error(reason) => {
                error!("MQTT client error: {}", reason);
            }
            ClientEvent::Other(kind) => {
                info!("Other MQTT event: {}", kind);
            }
        }

        (state, effects)
    }
}
