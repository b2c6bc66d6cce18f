//! Static client configuration.
//!
//! A [`ClientConfig`] is assembled once at startup, usually from values baked
//! into the firmware, and validated when handed to
//! [`DynamicMqttClient::configure`](crate::DynamicMqttClient::configure).
//! String fields borrow from the caller, so `&'static str` constants work
//! without copying.

use embassy_time::Duration;

use crate::error::ConfigError;
use crate::transport::{Endpoint, TlsMode};

/// Default broker port (MQTT over TLS).
pub const DEFAULT_PORT: u16 = 8883;
/// Default keepalive interval in seconds.
pub const DEFAULT_KEEPALIVE_SECS: u16 = 30;
/// Smallest accepted keepalive interval in seconds.
pub const MIN_KEEPALIVE_SECS: u16 = 10;
/// Largest accepted keepalive interval in seconds.
pub const MAX_KEEPALIVE_SECS: u16 = 120;
/// Default time allowed for transport setup plus CONNACK.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection parameters for a single broker.
///
/// # Example
///
/// ```
/// use dynamic_mqtt::ClientConfig;
///
/// let config = ClientConfig::new("broker.local")
///     .with_client_id("greenhouse-1")
///     .with_credentials("device", "hunter2")
///     .with_keepalive(60);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig<'a> {
    broker: &'a str,
    port: u16,
    client_id: &'a str,
    username: &'a str,
    password: &'a str,
    ca_cert: &'a str,
    insecure: bool,
    tls: bool,
    keepalive: u16,
    handshake_timeout: Duration,
}

impl<'a> ClientConfig<'a> {
    /// Creates a configuration for `broker` with every other field at its default.
    pub fn new(broker: &'a str) -> Self {
        Self {
            broker,
            port: DEFAULT_PORT,
            client_id: "",
            username: "",
            password: "",
            ca_cert: "",
            insecure: false,
            tls: true,
            keepalive: DEFAULT_KEEPALIVE_SECS,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_client_id(mut self, client_id: &'a str) -> Self {
        self.client_id = client_id;
        self
    }

    /// Sets the username and password sent in CONNECT. Empty strings are omitted.
    pub fn with_credentials(mut self, username: &'a str, password: &'a str) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    /// PEM-encoded CA certificate used to validate the broker. Empty selects
    /// the transport's default trust store.
    pub fn with_ca_cert(mut self, ca_cert: &'a str) -> Self {
        self.ca_cert = ca_cert;
        self
    }

    /// Skips certificate validation. The CA certificate is ignored when set.
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Turns TLS off entirely. Only meant for brokers on a trusted network;
    /// overrides both the CA certificate and the insecure flag.
    pub fn with_tls(mut self, enabled: bool) -> Self {
        self.tls = enabled;
        self
    }

    /// Keepalive interval in seconds, 10..=120.
    pub fn with_keepalive(mut self, secs: u16) -> Self {
        self.keepalive = secs;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn broker(&self) -> &'a str {
        self.broker
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn client_id(&self) -> &'a str {
        self.client_id
    }

    pub fn username(&self) -> &'a str {
        self.username
    }

    pub fn password(&self) -> &'a str {
        self.password
    }

    pub fn ca_cert(&self) -> &'a str {
        self.ca_cert
    }

    pub fn insecure(&self) -> bool {
        self.insecure
    }

    pub fn tls(&self) -> bool {
        self.tls
    }

    pub fn keepalive_secs(&self) -> u16 {
        self.keepalive
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive as u64)
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Checks every static invariant of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.is_empty() {
            return Err(ConfigError::EmptyBroker);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if !(MIN_KEEPALIVE_SECS..=MAX_KEEPALIVE_SECS).contains(&self.keepalive) {
            return Err(ConfigError::KeepaliveOutOfRange(self.keepalive));
        }
        if self.username.is_empty() && !self.password.is_empty() {
            return Err(ConfigError::PasswordWithoutUsername);
        }
        if self.handshake_timeout == Duration::from_ticks(0) {
            return Err(ConfigError::ZeroHandshakeTimeout);
        }
        Ok(())
    }

    /// How the transport must secure the connection.
    pub fn tls_mode(&self) -> TlsMode<'a> {
        if !self.tls {
            TlsMode::Disabled
        } else if self.insecure {
            TlsMode::Insecure
        } else {
            TlsMode::Verify {
                ca_cert: (!self.ca_cert.is_empty()).then_some(self.ca_cert),
            }
        }
    }

    /// The broker endpoint handed to the transport on every connection attempt.
    pub fn endpoint(&self) -> Endpoint<'a> {
        Endpoint {
            host: self.broker,
            port: self.port,
            tls: self.tls_mode(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = ClientConfig::new("broker");
        assert_eq!(config.port(), 8883);
        assert_eq!(config.keepalive_secs(), 30);
        assert!(!config.insecure());
        assert_eq!(config.ca_cert(), "");
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn keepalive_bounds_are_inclusive() {
        for secs in 0..=200u16 {
            let result = ClientConfig::new("broker").with_keepalive(secs).validate();
            if (10..=120).contains(&secs) {
                assert!(result.is_ok(), "keepalive {secs} should be accepted");
            } else {
                assert_eq!(result, Err(ConfigError::KeepaliveOutOfRange(secs)));
            }
        }
    }

    #[test]
    fn empty_broker_and_zero_port_are_rejected() {
        assert_eq!(
            ClientConfig::new("").validate(),
            Err(ConfigError::EmptyBroker)
        );
        assert_eq!(
            ClientConfig::new("broker").with_port(0).validate(),
            Err(ConfigError::InvalidPort(0))
        );
        assert!(ClientConfig::new("broker").with_port(1).validate().is_ok());
        assert!(
            ClientConfig::new("broker")
                .with_port(u16::MAX)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn password_requires_username() {
        assert_eq!(
            ClientConfig::new("broker")
                .with_credentials("", "secret")
                .validate(),
            Err(ConfigError::PasswordWithoutUsername)
        );
        assert!(
            ClientConfig::new("broker")
                .with_credentials("user", "")
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn zero_handshake_timeout_is_rejected() {
        assert_eq!(
            ClientConfig::new("broker")
                .with_handshake_timeout(Duration::from_secs(0))
                .validate(),
            Err(ConfigError::ZeroHandshakeTimeout)
        );
    }

    #[test]
    fn tls_mode_follows_insecure_flag_and_ca() {
        assert_eq!(
            ClientConfig::new("broker").tls_mode(),
            TlsMode::Verify { ca_cert: None }
        );
        assert_eq!(
            ClientConfig::new("broker").with_ca_cert("PEM").tls_mode(),
            TlsMode::Verify {
                ca_cert: Some("PEM")
            }
        );
        assert_eq!(
            ClientConfig::new("broker")
                .with_ca_cert("PEM")
                .with_insecure(true)
                .tls_mode(),
            TlsMode::Insecure
        );
        assert_eq!(
            ClientConfig::new("broker")
                .with_insecure(true)
                .with_tls(false)
                .tls_mode(),
            TlsMode::Disabled
        );
    }
}
