//! # MQTT Message Client
//!
//! Opens a secure session to the broker, subscribes to the command topic and
//! turns every inbound payload into an output-pin level.
//!
//! ```text
//! mqtt/
//! ├── config.rs        - Session descriptor resolved from the broker config
//! ├── message.rs       - Inbound message view and payload command parsing
//! ├── mqtt_handler.rs  - Pure event → (state, effects) transition function
//! ├── dispatcher.rs    - Executes effects against pin and broker
//! └── session.rs       - rumqttc v5 client and event pump
//! ```
//!
//! Only `"1"` and `"0"` mean anything. Every other payload leaves the pin
//! where it was and is reported as a warning.

pub mod config;
pub mod dispatcher;
pub mod message;
pub mod mqtt_handler;
pub mod session;
