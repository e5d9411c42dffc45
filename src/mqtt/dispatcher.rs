//! Executes handler effects against the output pin and the broker client.

use rumqttc::v5::mqttbytes::QoS;
use tracing::{error, warn};

use super::mqtt_handler::{ClientEvent, ClientState, Effect, MessageHandler};
use crate::gpio::{OutputLine, OutputPin};

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Subscribe request rejected by client: {0}")]
    Subscribe(String),
}

/// Outgoing requests the handler may issue. Implementations must not block.
pub trait Broker {
    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), BrokerError>;
}

impl Broker for rumqttc::v5::AsyncClient {
    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), BrokerError> {
        self.try_subscribe(topic, qos)
            .map_err(|e| BrokerError::Subscribe(e.to_string()))
    }
}

/// Owns the session state, the pin and the broker handle; the session pump
/// feeds it one event at a time.
pub struct Dispatcher<B: Broker, L: OutputLine> {
    handler: MessageHandler,
    state: ClientState,
    broker: B,
    pin: OutputPin<L>,
    unrecognized: usize,
}

impl<B: Broker, L: OutputLine> Dispatcher<B, L> {
    pub fn new(handler: MessageHandler, broker: B, pin: OutputPin<L>) -> Self {
        Self {
            handler,
            state: ClientState::default(),
            broker,
            pin,
            unrecognized: 0,
        }
    }

    pub fn dispatch(&mut self, event: &ClientEvent<'_>) {
        let (next, effects) = self.handler.on_event(self.state.clone(), event);
        self.state = next;

        for effect in effects {
            match effect {
                Effect::Subscribe { topic, qos } => {
                    if let Err(e) = self.broker.subscribe(&topic, qos) {
                        error!("Failed to subscribe to {}: {}", topic, e);
                    }
                }
                Effect::SetPin(level) => self.pin.set(level),
                Effect::Unrecognized(payload) => {
                    self.unrecognized += 1;
                    warn!("Unknown command: {}", payload);
                }
            }
        }
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn pin(&self) -> &OutputPin<L> {
        &self.pin
    }

    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    /// Number of payloads that were neither "0" nor "1".
    pub fn unrecognized_count(&self) -> usize {
        self.unrecognized
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{Broker, BrokerError};
    use rumqttc::v5::mqttbytes::QoS;

    #[derive(Debug, Default)]
    pub struct RecordingBroker {
        pub subscriptions: Vec<(String, QoS)>,
        pub refuse: bool,
    }

    impl Broker for RecordingBroker {
        fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), BrokerError> {
            if self.refuse {
                return Err(BrokerError::Subscribe("request queue full".to_string()));
            }
            self.subscriptions.push((topic.to_string(), qos));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingBroker;
    use super::*;
    use crate::gpio::testing::RecordingLine;
    use crate::gpio::PinLevel;
    use crate::mqtt::message::InboundMessage;
    use crate::mqtt::mqtt_handler::ConnectionState;
    use proptest::prelude::*;

    const TOPIC: &str = "/ifpe/ads/embarcados/esp32/led";

    fn dispatcher(initial: PinLevel) -> (Dispatcher<RecordingBroker, RecordingLine>, RecordingLine) {
        let line = RecordingLine::default();
        let pin = OutputPin::configure(2, line.clone(), initial);
        let dispatcher = Dispatcher::new(MessageHandler::new(TOPIC), RecordingBroker::default(), pin);
        (dispatcher, line)
    }

    fn data(payload: &[u8]) -> ClientEvent<'_> {
        ClientEvent::Data(InboundMessage::new(TOPIC.as_bytes(), payload))
    }

    #[test]
    fn scenario_produces_expected_pin_trace() {
        let (mut d, _) = dispatcher(PinLevel::Low);
        let mut trace = Vec::new();

        d.dispatch(&ClientEvent::Connected);
        trace.push(None);
        for payload in [&b"1"[..], b"0", b"x", b"1"] {
            d.dispatch(&data(payload));
            trace.push(Some(d.pin().level()));
        }

        assert_eq!(
            trace,
            vec![
                None,
                Some(PinLevel::High),
                Some(PinLevel::Low),
                Some(PinLevel::Low),
                Some(PinLevel::High),
            ]
        );
        assert_eq!(
            d.broker_mut().subscriptions,
            vec![(TOPIC.to_string(), QoS::AtLeastOnce)]
        );
        assert_eq!(d.unrecognized_count(), 1);
    }

    #[test]
    fn repeated_on_is_idempotent() {
        let (mut d, line) = dispatcher(PinLevel::Low);
        for _ in 0..3 {
            d.dispatch(&data(b"1"));
        }
        assert_eq!(d.pin().level(), PinLevel::High);
        assert_eq!(d.unrecognized_count(), 0);
        assert_eq!(line.writes().last(), Some(&PinLevel::High));
    }

    #[test]
    fn two_byte_payload_does_not_match_single_digit() {
        let (mut d, line) = dispatcher(PinLevel::Low);
        d.dispatch(&data(b"10"));
        assert_eq!(d.pin().level(), PinLevel::Low);
        assert_eq!(d.unrecognized_count(), 1);
        // only the initial configure write
        assert_eq!(line.writes(), vec![PinLevel::Low]);
    }

    #[test]
    fn every_reconnect_resubscribes() {
        let (mut d, _) = dispatcher(PinLevel::Low);
        d.dispatch(&ClientEvent::Connected);
        d.dispatch(&ClientEvent::Disconnected);
        d.dispatch(&ClientEvent::Connected);

        assert_eq!(d.broker_mut().subscriptions.len(), 2);
        assert_eq!(d.state().connection_state, ConnectionState::Connected);
    }

    #[test]
    fn refused_subscribe_request_is_logged_only() {
        let (mut d, _) = dispatcher(PinLevel::Low);
        d.broker_mut().refuse = true;
        d.dispatch(&ClientEvent::Connected);

        assert!(d.broker_mut().subscriptions.is_empty());
        assert_eq!(d.state().connection_state, ConnectionState::Connected);
    }

    proptest! {
        #[test]
        fn unrecognized_payloads_keep_previous_level(
            initial in any::<bool>(),
            payload in proptest::collection::vec(any::<u8>(), 0..8)
                .prop_filter("not a command", |p| p.as_slice() != b"0" && p.as_slice() != b"1"),
        ) {
            let (mut d, _) = dispatcher(PinLevel::from(initial));
            d.dispatch(&data(&payload));
            prop_assert_eq!(d.pin().level(), PinLevel::from(initial));
            prop_assert_eq!(d.unrecognized_count(), 1);
        }

        #[test]
        fn pin_follows_last_valid_command(payloads in proptest::collection::vec(
            prop_oneof![Just(b"0".to_vec()), Just(b"1".to_vec()), Just(b"2".to_vec()), Just(Vec::new())],
            1..20,
        )) {
            let (mut d, _) = dispatcher(PinLevel::Low);
            let mut expected = PinLevel::Low;
            for payload in &payloads {
                d.dispatch(&data(payload));
                match payload.as_slice() {
                    b"1" => expected = PinLevel::High,
                    b"0" => expected = PinLevel::Low,
                    _ => {}
                }
                prop_assert_eq!(d.pin().level(), expected);
            }
        }
    }
}
