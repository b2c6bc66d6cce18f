//! # MQTT Transport Abstraction
//!
//! This module defines the `MqttTransport` trait, which abstracts the byte
//! stream (plain TCP, TLS over TCP, a modem UART, ...) the client runs over,
//! keeping the state machine hardware and network-stack agnostic.
//!
//! The trait is non-blocking: every method returns immediately, reporting
//! unfinished work as `Poll::Pending`. The client calls it from `tick`, so an
//! implementation must never wait on the network.

use core::task::Poll;

use embassy_futures::poll_once;
use embassy_net::tcp::{ConnectError, Error as TcpError, State, TcpSocket};
use embassy_net::{IpAddress, IpEndpoint, Stack};
use embedded_io_async::{Read, Write};

/// How the transport must secure the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TlsMode<'a> {
    /// TLS with certificate validation. `ca_cert` is a PEM certificate to
    /// validate the broker against; `None` selects the default trust store.
    Verify { ca_cert: Option<&'a str> },
    /// TLS without certificate validation. Traffic is still encrypted.
    Insecure,
    /// No TLS at all, for brokers on a trusted network.
    Disabled,
}

/// The broker a transport should connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Endpoint<'a> {
    pub host: &'a str,
    pub port: u16,
    pub tls: TlsMode<'a>,
}

/// A non-blocking byte stream to an MQTT broker.
pub trait MqttTransport<'a> {
    /// The error type returned by the transport.
    type Error: core::fmt::Debug;

    /// Whether the underlying network link is usable. New connection
    /// attempts are held back while this returns `false`.
    fn link_is_up(&self) -> bool {
        true
    }

    /// Starts connecting to `endpoint`, dropping any previous connection.
    /// The endpoint borrows from the client configuration and stays valid
    /// for `'a`.
    ///
    /// Completion is reported by [`poll_open`](Self::poll_open).
    fn open(&mut self, endpoint: &Endpoint<'a>) -> Result<(), Self::Error>;

    /// Advances connection setup (TCP handshake, TLS handshake and
    /// certificate validation). `Ready(Ok(()))` once bytes can flow.
    fn poll_open(&mut self) -> Poll<Result<(), Self::Error>>;

    /// Writes a prefix of `buf`, returning how many bytes were accepted.
    fn poll_send(&mut self, buf: &[u8]) -> Poll<Result<usize, Self::Error>>;

    /// Reads available bytes into `buf`. `Ready(Ok(0))` means the peer closed
    /// the connection.
    fn poll_recv(&mut self, buf: &mut [u8]) -> Poll<Result<usize, Self::Error>>;

    /// Tears the connection down immediately.
    fn close(&mut self);
}

/// Errors reported by [`TcpTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpTransportError {
    /// The TCP connection could not be established.
    Connect(ConnectError),
    /// Reading or writing the socket failed.
    Io(TcpError),
    /// The endpoint asks for TLS, which this transport does not provide.
    TlsRequired,
}

/// Plain TCP transport over an `embassy-net` socket.
///
/// The broker address is resolved by the caller; the endpoint host name is
/// only used for logging. This transport has no TLS layer: it only accepts
/// endpoints configured with [`TlsMode::Disabled`]. Encrypted sessions use
/// `TlsTransport` (feature `tls`).
pub struct TcpTransport<'a> {
    stack: Stack<'a>,
    socket: TcpSocket<'a>,
    address: IpAddress,
}

impl<'a> TcpTransport<'a> {
    /// Creates a new `TcpTransport` that connects `socket` to `address`.
    pub fn new(stack: Stack<'a>, socket: TcpSocket<'a>, address: IpAddress) -> Self {
        Self {
            stack,
            socket,
            address,
        }
    }
}

impl<'a> MqttTransport<'a> for TcpTransport<'_> {
    type Error = TcpTransportError;

    fn link_is_up(&self) -> bool {
        self.stack.is_link_up() && self.stack.is_config_up()
    }

    fn open(&mut self, endpoint: &Endpoint<'a>) -> Result<(), Self::Error> {
        if endpoint.tls != TlsMode::Disabled {
            return Err(TcpTransportError::TlsRequired);
        }
        debug!("connecting to {}:{} over plain TCP", endpoint.host, endpoint.port);

        self.socket.abort();
        let remote = IpEndpoint::new(self.address, endpoint.port);
        // The first poll issues the SYN; progress is tracked through the socket state.
        match poll_once(self.socket.connect(remote)) {
            Poll::Ready(Err(e)) => Err(TcpTransportError::Connect(e)),
            Poll::Ready(Ok(())) | Poll::Pending => Ok(()),
        }
    }

    fn poll_open(&mut self) -> Poll<Result<(), Self::Error>> {
        match self.socket.state() {
            State::Established => Poll::Ready(Ok(())),
            State::SynSent | State::SynReceived => Poll::Pending,
            _ => Poll::Ready(Err(TcpTransportError::Connect(
                ConnectError::ConnectionReset,
            ))),
        }
    }

    fn poll_send(&mut self, buf: &[u8]) -> Poll<Result<usize, Self::Error>> {
        match poll_once(Write::write(&mut self.socket, buf)) {
            Poll::Ready(Ok(n)) => {
                trace!("TCP TX {} bytes", n);
                Poll::Ready(Ok(n))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(TcpTransportError::Io(e))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_recv(&mut self, buf: &mut [u8]) -> Poll<Result<usize, Self::Error>> {
        match poll_once(Read::read(&mut self.socket, buf)) {
            Poll::Ready(Ok(n)) => {
                trace!("TCP RX {} bytes", n);
                Poll::Ready(Ok(n))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(TcpTransportError::Io(e))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn close(&mut self) {
        self.socket.abort();
    }
}
