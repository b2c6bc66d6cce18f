//! # Dynamic MQTT Client
//!
//! [`DynamicMqttClient`] owns a single broker session and keeps it alive for
//! the lifetime of the device. It is driven entirely by the host: `start`
//! kicks off the first connection attempt, after which the host calls `tick`
//! from its main loop. Every call returns immediately; time is passed in by
//! the caller rather than read from a clock.
//!
//! ## Session lifecycle
//!
//! ```text
//!  Disconnected --start--> Connecting --CONNACK--> Connected
//!                              |  ^                    |
//!            timeout / refused |  | backoff expired    | I/O error, bad frame,
//!                              v  |                    | keepalive timeout
//!                             Failing <----------------+
//! ```
//!
//! Failures are never returned to the caller. They are logged, recorded as
//! [`last_error`](DynamicMqttClient::last_error), and followed by a reconnect
//! after an exponential backoff (1 s doubling to 60 s, reset once connected).
//!
//! ## Keepalive
//!
//! A PINGREQ goes out once nothing has been written, or nothing received,
//! for a full keepalive interval. The broker then has half an interval to
//! answer, and never less than 1.5 intervals counted from the last packet it
//! sent. A missed answer fails the session. `tick` should therefore run at
//! least four times per keepalive interval.
//!
//! ## Credentials
//!
//! The client id, username and password come from the configuration unless a
//! [`CredentialSource`] is installed. A source is asked again before every
//! attempt; while it reports incomplete credentials the client stays in
//! `Connecting` without opening the transport.

use core::task::Poll;

use embassy_time::{Duration, Instant};

use crate::config::ClientConfig;
use crate::credentials::CredentialSource;
use crate::error::{ConfigError, ConnectReasonCode, MqttError, ProtocolError, RegistrationError};
use crate::fmt::Dbg;
use crate::packet::{
    self, ConnAck, Connect, Disconnect, EncodePacket, MqttPacket, PingReq, PubAck, Publish, QoS,
    SubAck, Subscribe,
};
use crate::runtime::{Backoff, HandlerRegistry, Inbox, MessageHandler, Outbox};
use crate::topic;
use crate::transport::{MqttTransport, TlsMode};

/// The externally visible connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    /// Not started yet.
    Disconnected,
    /// Transport setup or MQTT handshake in progress.
    Connecting,
    /// CONNACK received; messages flow.
    Connected,
    /// The last attempt or session failed; waiting for the backoff delay.
    Failing,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    AwaitingCredentials,
    Opening { deadline: Instant },
    AwaitingConnAck { deadline: Instant },
    Online,
    Backoff { retry_at: Instant },
}

/// What the inbound frame asks the client to do once the receive buffer is
/// no longer borrowed.
enum Inbound {
    Handled,
    ConnAck(ConnAck),
    Acknowledge(u16),
    Unexpected,
    Invalid(ProtocolError),
}

/// A self-healing MQTT client with per-topic handler dispatch.
///
/// # Type Parameters
///
/// - `T`: the transport carrying the session
/// - `MAX_BINDINGS`: capacity of the topic binding table
/// - `BUF_SIZE`: size of the inbound and outbound buffers; bounds the largest
///   packet that can be sent or received
pub struct DynamicMqttClient<'a, T, const MAX_BINDINGS: usize, const BUF_SIZE: usize>
where
    T: MqttTransport<'a>,
{
    transport: T,
    config: Option<ClientConfig<'a>>,
    credentials: Option<&'a mut dyn CredentialSource>,
    registry: HandlerRegistry<'a, MAX_BINDINGS>,
    phase: Phase,
    backoff: Backoff,
    inbox: Inbox<BUF_SIZE>,
    outbox: Outbox<BUF_SIZE>,
    ever_connected: bool,
    last_rx: Instant,
    last_tx: Instant,
    ping_sent_at: Option<Instant>,
    next_subscription: usize,
    next_packet_id: u16,
    last_error: Option<MqttError<T::Error>>,
}

impl<'a, T, const MAX_BINDINGS: usize, const BUF_SIZE: usize>
    DynamicMqttClient<'a, T, MAX_BINDINGS, BUF_SIZE>
where
    T: MqttTransport<'a>,
{
    /// Creates an unconfigured client around `transport`.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            config: None,
            credentials: None,
            registry: HandlerRegistry::new(),
            phase: Phase::Idle,
            backoff: Backoff::new(),
            inbox: Inbox::new(),
            outbox: Outbox::new(),
            ever_connected: false,
            last_rx: Instant::from_ticks(0),
            last_tx: Instant::from_ticks(0),
            ping_sent_at: None,
            next_subscription: 0,
            next_packet_id: 1,
            last_error: None,
        }
    }

    /// Validates and stores the connection parameters.
    ///
    /// May be called repeatedly until `start`; afterwards the configuration is frozen.
    pub fn configure(&mut self, config: ClientConfig<'a>) -> Result<(), ConfigError> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(ConfigError::AlreadyStarted);
        }
        config.validate()?;
        self.config = Some(config);
        Ok(())
    }

    /// Resolves the client id, username and password from `source` on every
    /// connection attempt instead of the configuration.
    ///
    /// Attempts are held back while `source` reports incomplete credentials.
    pub fn set_credential_source(
        &mut self,
        source: &'a mut dyn CredentialSource,
    ) -> Result<(), ConfigError> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(ConfigError::AlreadyStarted);
        }
        self.credentials = Some(source);
        Ok(())
    }

    /// Binds `handler` to every message whose topic matches `filter`.
    ///
    /// Registration is possible until the client has been connected once.
    /// Registering the same filter twice is allowed; both handlers fire, in
    /// registration order.
    pub fn register_handler(
        &mut self,
        filter: &str,
        handler: &'a mut dyn MessageHandler,
    ) -> Result<(), RegistrationError> {
        if self.ever_connected {
            return Err(RegistrationError::WindowClosed);
        }
        self.registry.add(filter, handler)?;
        debug!("registered handler for {}", filter);
        Ok(())
    }

    /// Begins the first connection attempt. From here on the client retries
    /// forever; there is no way back to `Disconnected`.
    pub fn start(&mut self, now: Instant) -> Result<(), ConfigError> {
        let config = self.config.ok_or(ConfigError::NotConfigured)?;
        if !matches!(self.phase, Phase::Idle) {
            debug!("start called on a running client, ignoring");
            return Ok(());
        }

        match config.tls_mode() {
            TlsMode::Insecure => {
                warn!("TLS insecure mode enabled (no certificate validation)")
            }
            TlsMode::Verify { ca_cert: Some(_) } => info!("TLS CA certificate set"),
            TlsMode::Verify { ca_cert: None } => {
                warn!("no CA certificate provided, relying on the default trust store")
            }
            TlsMode::Disabled => warn!("TLS disabled, traffic is not encrypted"),
        }

        self.begin_attempt(now);
        Ok(())
    }

    /// Advances the state machine. Never blocks.
    ///
    /// Each call performs at most one transport write and one transport read
    /// and handles at most one inbound packet. Matching handlers run before
    /// this returns.
    pub fn tick(&mut self, now: Instant) {
        match self.phase {
            Phase::Idle => {}
            Phase::Backoff { retry_at } => {
                if now >= retry_at && self.transport.link_is_up() {
                    self.begin_attempt(now);
                }
            }
            Phase::AwaitingCredentials => {
                if self.transport.link_is_up() {
                    self.begin_attempt(now);
                }
            }
            _ if !self.transport.link_is_up() => self.fail(now, MqttError::LinkDown),
            Phase::Opening { deadline } => self.poll_opening(now, deadline),
            Phase::AwaitingConnAck { deadline } => {
                if now >= deadline {
                    self.fail(now, MqttError::HandshakeTimeout);
                } else if self.pump(now) {
                    self.process_frame(now);
                }
            }
            Phase::Online => self.poll_session(now),
        }
    }

    /// Publishes `payload` on `topic` with QoS 0.
    ///
    /// Returns `false` and drops the message when the client is not
    /// connected, the topic is not a valid topic name, or the packet does not
    /// fit the outbound buffer. Accepted messages are written on the
    /// following ticks.
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> bool {
        self.enqueue_publish(Publish::new(topic, payload))
    }

    /// Like [`publish`](Self::publish) with the RETAIN flag set.
    pub fn publish_retained(&mut self, topic: &str, payload: &[u8]) -> bool {
        let mut message = Publish::new(topic, payload);
        message.retain = true;
        self.enqueue_publish(message)
    }

    pub fn state(&self) -> ConnectionState {
        match self.phase {
            Phase::Idle => ConnectionState::Disconnected,
            Phase::AwaitingCredentials | Phase::Opening { .. } | Phase::AwaitingConnAck { .. } => {
                ConnectionState::Connecting
            }
            Phase::Online => ConnectionState::Connected,
            Phase::Backoff { .. } => ConnectionState::Failing,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.phase, Phase::Online)
    }

    /// The most recent session failure, kept until the next one replaces it.
    pub fn last_error(&self) -> Option<&MqttError<T::Error>> {
        self.last_error.as_ref()
    }

    /// When the next reconnect attempt is due, while `Failing`.
    pub fn retry_at(&self) -> Option<Instant> {
        match self.phase {
            Phase::Backoff { retry_at } => Some(retry_at),
            _ => None,
        }
    }

    pub fn config(&self) -> Option<&ClientConfig<'a>> {
        self.config.as_ref()
    }

    /// Number of registered topic bindings.
    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn begin_attempt(&mut self, now: Instant) {
        let Some(config) = self.config else {
            return;
        };
        if let Some(source) = self.credentials.as_deref_mut() {
            if !source.credentials().is_complete() {
                if !matches!(self.phase, Phase::AwaitingCredentials) {
                    warn!("MQTT credentials incomplete, waiting");
                }
                self.phase = Phase::AwaitingCredentials;
                return;
            }
        }
        self.inbox.clear();
        self.outbox.clear();

        let endpoint = config.endpoint();
        info!("connecting to {}:{}", endpoint.host, endpoint.port);
        match self.transport.open(&endpoint) {
            Ok(()) => {
                self.phase = Phase::Opening {
                    deadline: now + config.handshake_timeout(),
                }
            }
            Err(e) => self.fail(now, MqttError::Transport(e)),
        }
    }

    fn poll_opening(&mut self, now: Instant, deadline: Instant) {
        if now >= deadline {
            self.fail(now, MqttError::HandshakeTimeout);
            return;
        }
        let Some(config) = self.config else {
            return;
        };
        match self.transport.poll_open() {
            Poll::Pending => {}
            Poll::Ready(Err(e)) => self.fail(now, MqttError::Transport(e)),
            Poll::Ready(Ok(())) => {
                let keepalive = config.keepalive_secs();
                let pushed = match self.credentials.as_deref_mut() {
                    Some(source) => {
                        let credentials = source.credentials();
                        let connect = Connect::new(credentials.client_id, keepalive, true)
                            .with_credentials(credentials.username, credentials.password);
                        self.outbox.push(&connect)
                    }
                    None => {
                        let connect = Connect::new(config.client_id(), keepalive, true)
                            .with_credentials(config.username(), config.password());
                        self.outbox.push(&connect)
                    }
                };
                match pushed {
                    Ok(()) => {
                        debug!("transport open, sending CONNECT");
                        self.phase = Phase::AwaitingConnAck { deadline };
                    }
                    Err(e) => self.fail(now, MqttError::Protocol(e)),
                }
            }
        }
    }

    fn poll_session(&mut self, now: Instant) {
        let keepalive = self
            .config
            .map_or(Duration::from_secs(30), |config| config.keepalive());

        if let Some(sent) = self.ping_sent_at {
            let deadline = (sent + keepalive / 2).max(self.last_rx + keepalive * 3 / 2);
            if now > deadline {
                self.fail(now, MqttError::KeepaliveTimeout);
                return;
            }
        }

        self.queue_subscriptions();

        let ping_due = now.saturating_duration_since(self.last_tx) >= keepalive
            || now.saturating_duration_since(self.last_rx) >= keepalive;
        if self.ping_sent_at.is_none() && ping_due {
            // a full outbox retries on the next tick
            if self.outbox.push(&PingReq).is_ok() {
                trace!("keepalive due, sending PINGREQ");
                self.ping_sent_at = Some(now);
            }
        }

        if self.pump(now) {
            self.process_frame(now);
        }
    }

    /// Sends one SUBSCRIBE per distinct filter, as far as the outbound buffer allows.
    fn queue_subscriptions(&mut self) {
        while self.next_subscription < self.registry.len() {
            let Some(filter) = self.registry.distinct_filter(self.next_subscription) else {
                self.next_subscription += 1;
                continue;
            };
            let subscribe = Subscribe::new(self.next_packet_id, filter, QoS::AtMostOnce);
            match self.outbox.push(&subscribe) {
                Ok(()) => {
                    debug!("subscribing to {}", filter);
                    self.next_packet_id = self.next_packet_id.wrapping_add(1).max(1);
                    self.next_subscription += 1;
                }
                Err(_) if self.outbox.is_empty() => {
                    error!("SUBSCRIBE for {} does not fit the buffer, skipping", filter);
                    self.next_subscription += 1;
                }
                Err(_) => break,
            }
        }
    }

    /// One write and, unless a complete frame is already buffered, one read.
    /// Returns `false` if the session failed.
    fn pump(&mut self, now: Instant) -> bool {
        match self.outbox.flush(&mut self.transport) {
            Poll::Ready(Ok(0)) | Poll::Pending => {}
            Poll::Ready(Ok(_)) => self.last_tx = now,
            Poll::Ready(Err(e)) => {
                self.fail(now, MqttError::Transport(e));
                return false;
            }
        }

        match self.inbox.frame_len() {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(e) => {
                self.fail(now, MqttError::Protocol(e));
                return false;
            }
        }

        match self.inbox.fill(&mut self.transport) {
            Poll::Ready(Ok(0)) => {
                self.fail(now, MqttError::Protocol(ProtocolError::ConnectionClosed));
                false
            }
            Poll::Ready(Ok(_)) | Poll::Pending => true,
            Poll::Ready(Err(e)) => {
                self.fail(now, MqttError::Transport(e));
                false
            }
        }
    }

    /// Handles the first buffered frame, if it is complete.
    fn process_frame(&mut self, now: Instant) {
        let len = match self.inbox.frame_len() {
            Ok(Some(len)) => len,
            Ok(None) => return,
            Err(e) => {
                self.fail(now, MqttError::Protocol(e));
                return;
            }
        };

        let online = matches!(self.phase, Phase::Online);
        let frame = &self.inbox.bytes()[..len];
        let inbound = match packet::decode(frame) {
            Err(e) => Inbound::Invalid(e),
            Ok(MqttPacket::ConnAck(ack)) if !online => Inbound::ConnAck(ack),
            Ok(_) if !online => Inbound::Unexpected,
            Ok(MqttPacket::Publish(message)) => {
                let invoked = self.registry.dispatch(message.topic, message.payload);
                trace!(
                    "message on {} ({} bytes) -> {} handler(s)",
                    message.topic,
                    message.payload.len(),
                    invoked
                );
                match (message.qos, message.packet_id) {
                    (QoS::AtLeastOnce, Some(id)) => Inbound::Acknowledge(id),
                    (QoS::ExactlyOnce, _) => {
                        warn!("QoS 2 delivery on {} is not acknowledged", message.topic);
                        Inbound::Handled
                    }
                    _ => Inbound::Handled,
                }
            }
            Ok(MqttPacket::SubAck(ack)) => {
                log_suback(&ack);
                Inbound::Handled
            }
            Ok(MqttPacket::PingResp) | Ok(MqttPacket::PubAck(_)) => Inbound::Handled,
            Ok(_) => Inbound::Unexpected,
        };
        self.inbox.consume(len);
        self.last_rx = now;
        self.ping_sent_at = None;

        match inbound {
            Inbound::Handled => {}
            Inbound::ConnAck(ack) => self.on_connack(now, ack),
            Inbound::Acknowledge(packet_id) => {
                if self.outbox.push(&PubAck { packet_id }).is_err() {
                    warn!("outbound buffer full, PUBACK {} dropped", packet_id);
                }
            }
            Inbound::Unexpected => {
                self.fail(now, MqttError::Protocol(ProtocolError::InvalidResponse))
            }
            Inbound::Invalid(e) => self.fail(now, MqttError::Protocol(e)),
        }
    }

    fn on_connack(&mut self, now: Instant, ack: ConnAck) {
        let code = ConnectReasonCode::from(ack.return_code);
        if code != ConnectReasonCode::Success {
            self.fail(now, MqttError::ConnectionRefused(code));
            return;
        }

        info!("MQTT connected");
        self.phase = Phase::Online;
        self.backoff.reset();
        self.ever_connected = true;
        self.last_rx = now;
        self.last_tx = now;
        self.ping_sent_at = None;
        self.next_subscription = 0;
    }

    fn enqueue_publish(&mut self, message: Publish<'_>) -> bool {
        if !self.is_connected() {
            debug!("not connected, dropping publish to {}", message.topic);
            return false;
        }
        if !topic::is_valid_topic_name(message.topic) {
            warn!("invalid topic name {}, dropping publish", message.topic);
            return false;
        }
        match self.outbox.push(&message) {
            Ok(()) => true,
            Err(_) => {
                warn!("outbound buffer full, dropping publish to {}", message.topic);
                false
            }
        }
    }

    /// Ends the current attempt or session and schedules the next one.
    fn fail(&mut self, now: Instant, error: MqttError<T::Error>) {
        if self.is_connected() {
            let mut buf = [0u8; 2];
            if let Ok(n) = Disconnect.encode(&mut buf) {
                let _ = self.transport.poll_send(&buf[..n]);
            }
        }
        self.transport.close();
        self.inbox.clear();
        self.outbox.clear();
        self.ping_sent_at = None;

        let delay = self.backoff.next_delay();
        warn!(
            "MQTT failure: {:?}, reconnecting in {} ms",
            Dbg(&error),
            delay.as_millis()
        );
        self.phase = Phase::Backoff {
            retry_at: now + delay,
        };
        self.last_error = Some(error);
    }
}

fn log_suback(ack: &SubAck) {
    for code in &ack.return_codes {
        if *code == SubAck::FAILURE {
            warn!("broker rejected subscription {}", ack.packet_id);
        } else {
            debug!("subscription {} granted with QoS {}", ack.packet_id, code);
        }
    }
}
