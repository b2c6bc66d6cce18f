//! # Error Types
//!
//! Two families of errors live here. `ConfigError` and `RegistrationError` are
//! returned synchronously from the client's setup calls and are fatal to
//! startup. `MqttError` describes transient session failures; those are never
//! returned to the caller, they only drive the reconnect cycle and are kept
//! for inspection through `DynamicMqttClient::last_error`.

use core::fmt;

/// Invalid static configuration, detected by `configure` or `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// The broker host is empty.
    EmptyBroker,
    /// Port 0 is not a valid broker port.
    InvalidPort(u16),
    /// Keepalive must be within 10..=120 seconds.
    KeepaliveOutOfRange(u16),
    /// A password was given without a username.
    PasswordWithoutUsername,
    /// The handshake timeout must be non-zero.
    ZeroHandshakeTimeout,
    /// The client was already started; its configuration is frozen.
    AlreadyStarted,
    /// `start` was called before `configure`.
    NotConfigured,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyBroker => f.write_str("broker host is empty"),
            Self::InvalidPort(port) => write!(f, "invalid broker port {port}"),
            Self::KeepaliveOutOfRange(secs) => {
                write!(f, "keepalive {secs}s outside of 10..=120s")
            }
            Self::PasswordWithoutUsername => f.write_str("password set without a username"),
            Self::ZeroHandshakeTimeout => f.write_str("handshake timeout is zero"),
            Self::AlreadyStarted => f.write_str("client already started"),
            Self::NotConfigured => f.write_str("client started before configure"),
        }
    }
}

impl core::error::Error for ConfigError {}

/// A topic handler could not be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistrationError {
    /// The client has already been connected once; the binding table is frozen.
    WindowClosed,
    /// The binding table is full.
    TooManyBindings,
    /// The filter is longer than `MAX_TOPIC_LEN`.
    FilterTooLong,
    /// The filter is empty or misuses the `+`/`#` wildcards.
    InvalidFilter,
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WindowClosed => "handlers must be registered before the first connection",
            Self::TooManyBindings => "topic binding table is full",
            Self::FilterTooLong => "topic filter is too long",
            Self::InvalidFilter => "topic filter is malformed",
        })
    }
}

impl core::error::Error for RegistrationError {}

/// A transient session failure.
///
/// It is generic over the transport error type `T`, allowing it to wrap
/// specific errors from the underlying network transport (e.g., TCP, TLS).
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError<T> {
    /// An error occurred in the underlying transport layer.
    Transport(T),
    /// A protocol-level error occurred, indicating a violation of the MQTT specification.
    Protocol(ProtocolError),
    /// The connection was refused by the broker. The enclosed code provides the reason.
    ConnectionRefused(ConnectReasonCode),
    /// No CONNACK arrived before the handshake deadline.
    HandshakeTimeout,
    /// Nothing was heard from the broker for keepalive × 1.5.
    KeepaliveTimeout,
    /// The transport reported that the network link went down.
    LinkDown,
}

impl<T> From<ProtocolError> for MqttError<T> {
    fn from(err: ProtocolError) -> Self {
        MqttError::Protocol(err)
    }
}

/// Represents the return codes of a connection refusal (`CONNACK`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ConnectReasonCode {
    /// The connection was accepted.
    Success = 0,
    /// The broker does not support the requested MQTT protocol version.
    UnacceptableProtocolVersion = 1,
    /// The client identifier is not valid.
    IdentifierRejected = 2,
    /// The broker is unavailable.
    ServerUnavailable = 3,
    /// The username or password is not valid.
    BadUserNameOrPassword = 4,
    /// The client is not authorized to connect.
    NotAuthorized = 5,
    /// A code outside of the MQTT 3.1.1 range.
    Other(u8),
}

impl From<u8> for ConnectReasonCode {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Success,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(val),
        }
    }
}

/// Enumerates specific MQTT protocol errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// An invalid packet type was received.
    InvalidPacketType(u8),
    /// The broker sent a packet that is not valid in the current session phase.
    InvalidResponse,
    /// The connection was closed by the broker.
    ConnectionClosed,
    /// A packet was received that was not correctly formed.
    MalformedPacket,
    /// A packet does not fit the buffer it has to be written to or read into.
    PacketTooLarge,
    /// A string was not valid UTF-8.
    InvalidUtf8String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connack_codes_map_to_reasons() {
        assert_eq!(ConnectReasonCode::from(0), ConnectReasonCode::Success);
        assert_eq!(
            ConnectReasonCode::from(4),
            ConnectReasonCode::BadUserNameOrPassword
        );
        assert_eq!(ConnectReasonCode::from(0x42), ConnectReasonCode::Other(0x42));
    }

    #[test]
    fn protocol_errors_convert_into_session_errors() {
        let err: MqttError<()> = ProtocolError::MalformedPacket.into();
        assert!(matches!(
            err,
            MqttError::Protocol(ProtocolError::MalformedPacket)
        ));
    }
}
