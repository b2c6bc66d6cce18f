//! # Self-Healing MQTT Client for Embedded Systems
//!
//! `dynamic-mqtt` is a `no_std`, allocation-free MQTT 3.1.1 client for devices
//! that must stay connected to a single broker for as long as they run. The
//! host configures it once, binds handlers to topic filters, and then drives it
//! from its main loop with a non-blocking `tick`.
//!
//! ## Core Features
//!
//! - **`no_std` & `no_alloc`:** buffers and the binding table are fixed-size,
//!   sized through const generics and backed by `heapless`.
//! - **Cooperative:** `tick` never blocks; it performs at most one unit of I/O
//!   per call. Time is passed in by the host as an `embassy_time::Instant`.
//! - **Self-healing:** any failure closes the session and schedules a
//!   reconnect with exponential backoff (1 s, doubling, capped at 60 s).
//! - **Per-topic dispatch:** handlers are bound to filters with the `+` and
//!   `#` wildcards and invoked in registration order.
//! - **Transport agnostic:** the [`MqttTransport`] trait hides TCP, TLS or any
//!   other byte stream. With the `tls` feature, `TlsTransport` encrypts the
//!   session with `embedded-tls`; [`TcpTransport`] is the plaintext option.
//! - **Late credentials:** a [`CredentialSource`] is asked for the client id,
//!   username and password before every attempt.
//!
//! ## Features
//!
//! - `tls`: the `embedded-tls` transport in the `tls` module.
//! - `log`, `defmt`, `esp32-log`: logging backend.
//!
//! ## Usage
//!
//! ```ignore
//! use dynamic_mqtt::{ClientConfig, DynamicMqttClient};
//! use embassy_time::Instant;
//!
//! let mut on_command = |topic: &str, payload: &[u8]| {
//!     // react to the command
//! };
//!
//! let mut client = DynamicMqttClient::<_, 4, 512>::new(transport);
//! client.configure(
//!     ClientConfig::new("broker.local")
//!         .with_client_id("greenhouse-1")
//!         .with_keepalive(30),
//! )?;
//! client.register_handler("greenhouse/+/command", &mut on_command)?;
//! client.start(Instant::now())?;
//!
//! loop {
//!     client.tick(Instant::now());
//!     client.publish("greenhouse/1/temperature", b"21.5");
//!     Timer::after_millis(100).await;
//! }
//! ```
//!
//! ## Handler Lifetime Model
//!
//! Handlers are borrowed as `&'a mut dyn MessageHandler` for the lifetime of
//! the client, so they usually live in a `static` cell or on the stack of the
//! task that owns the client. Closures taking `(&str, &[u8])` implement
//! [`MessageHandler`] directly.
//!
//! Registration closes once the client has connected for the first time:
//! the subscription set is sent once per session and never changes.
//!
//! A complete TLS node is in `demos/tls_node.rs`.

#![no_std]

#[macro_use]
mod fmt;

pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod packet;
pub mod runtime;
#[cfg(feature = "tls")]
pub mod tls;
pub mod topic;
pub mod transport;
pub mod util;

pub use client::{ConnectionState, DynamicMqttClient};
pub use config::ClientConfig;
pub use credentials::{CredentialSource, Credentials};
pub use error::{ConfigError, MqttError, RegistrationError};
pub use packet::QoS;
pub use runtime::MessageHandler;
#[cfg(feature = "tls")]
pub use tls::{CertificateAuthority, NoAuthority, TlsLink, TlsTransport};
pub use transport::{Endpoint, MqttTransport, TcpTransport, TlsMode};
