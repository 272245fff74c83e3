// Bluetooth adapter control daemon
//
// Serves the `org.bluez.Adapter` method set for every local controller over
// an MQTT request bus.

pub mod bluetooth;
pub mod bus;
pub mod class;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod handlers;
pub mod hci;
pub mod ident;
pub mod message;
pub mod mqtt;
pub mod session;
pub mod store;
pub mod worker;
