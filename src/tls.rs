//! # TLS Transport over `embassy-net`
//!
//! `embedded-tls` is async-only, while [`MqttTransport`] must never wait. The
//! work is therefore split in two halves sharing a [`TlsLink`]:
//!
//! - [`TlsLink::run`] is an async task owning the socket and the TLS
//!   session. It resolves the broker, connects, performs the handshake and
//!   then pumps bytes between the connection and two pipes.
//! - [`TlsTransport`] is the client's side. It posts open and close requests
//!   and moves bytes in and out of the pipes without blocking.
//!
//! Every open request carries a session number. Status reports from an older
//! session are discarded, so a slow runner can never leak a stale failure
//! into a fresh attempt.
//!
//! ```ignore
//! static LINK: TlsLink<'static, 1024, 1024> = TlsLink::new();
//!
//! #[embassy_executor::task]
//! async fn tls_runner(stack: Stack<'static>, mut rng: Rng) -> ! {
//!     let (mut socket_rx, mut socket_tx) = ([0; 2048], [0; 2048]);
//!     let (mut tls_read, mut tls_write) = ([0; 16640], [0; 4096]);
//!     LINK.run(stack, &mut socket_rx, &mut socket_tx, &mut tls_read, &mut tls_write,
//!              &mut rng, &mut NoAuthority).await
//! }
//!
//! let transport = TlsTransport::new(&LINK, stack);
//! ```

use core::cell::Cell;
use core::task::Poll;

use embassy_futures::select::{select, select3, Either, Either3};
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::{ConnectError, TcpSocket};
use embassy_net::{IpAddress, IpEndpoint, Stack};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pipe::Pipe;
use embassy_sync::signal::Signal;
use embedded_io_async::{Read, Write};
use embedded_tls::{
    Aes128GcmSha256, CryptoProvider, NoVerify, TlsConfig, TlsConnection, TlsContext, TlsVerifier,
};
use rand_core::CryptoRngCore;

use crate::fmt::Dbg;
use crate::transport::{Endpoint, MqttTransport, TlsMode};

/// Errors reported by [`TlsTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsTransportError {
    /// The broker host name did not resolve.
    Dns,
    /// The TCP connection could not be established.
    Connect(ConnectError),
    /// The TLS handshake or certificate validation failed.
    Handshake,
    /// `TlsMode::Verify` was requested but no verifier is available for it.
    NoTrustAnchor,
    /// Reading or writing the TLS session failed.
    Io,
    /// The broker closed the connection.
    Closed,
    /// The endpoint asks for a plaintext session.
    TlsDisabled,
}

/// Supplies certificate verifiers for [`TlsMode::Verify`].
///
/// `embedded-tls` leaves certificate path validation to the application, so
/// the device decides how a PEM CA (or its built-in trust store when
/// `ca_cert` is `None`) turns into a verifier.
pub trait CertificateAuthority {
    type Verifier: TlsVerifier<Aes128GcmSha256>;

    /// Returns a verifier for `ca_cert`, or `None` when the device cannot
    /// validate against it. `None` fails the attempt.
    fn verifier(&mut self, ca_cert: Option<&str>) -> Option<&mut Self::Verifier>;
}

/// A [`CertificateAuthority`] for devices that only ever run insecure
/// sessions. Every verifying attempt fails with
/// [`TlsTransportError::NoTrustAnchor`].
pub struct NoAuthority;

impl CertificateAuthority for NoAuthority {
    type Verifier = NoVerify;

    fn verifier(&mut self, _ca_cert: Option<&str>) -> Option<&mut NoVerify> {
        None
    }
}

struct InsecureProvider<'r, R> {
    rng: &'r mut R,
    verifier: NoVerify,
}

impl<R> CryptoProvider for InsecureProvider<'_, R>
where
    R: CryptoRngCore,
{
    type CipherSuite = Aes128GcmSha256;
    type Signature = &'static [u8];

    fn rng(&mut self) -> impl CryptoRngCore {
        &mut *self.rng
    }

    fn verifier(
        &mut self,
    ) -> Result<&mut impl TlsVerifier<Self::CipherSuite>, embedded_tls::TlsError> {
        Ok(&mut self.verifier)
    }
}

struct VerifyingProvider<'r, R, V> {
    rng: &'r mut R,
    verifier: &'r mut V,
}

impl<R, V> CryptoProvider for VerifyingProvider<'_, R, V>
where
    R: CryptoRngCore,
    V: TlsVerifier<Aes128GcmSha256>,
{
    type CipherSuite = Aes128GcmSha256;
    type Signature = &'static [u8];

    fn rng(&mut self) -> impl CryptoRngCore {
        &mut *self.rng
    }

    fn verifier(
        &mut self,
    ) -> Result<&mut impl TlsVerifier<Self::CipherSuite>, embedded_tls::TlsError> {
        Ok(&mut *self.verifier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request<'a> {
    Open { session: u32, endpoint: Endpoint<'a> },
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkStatus {
    Opening,
    Open,
    Closed,
    Failed(TlsTransportError),
}

/// State shared by [`TlsLink::run`] and [`TlsTransport`].
///
/// `TX` and `RX` size the pipes carrying plaintext MQTT bytes towards and
/// from the broker.
pub struct TlsLink<'a, const TX: usize, const RX: usize> {
    requests: Signal<CriticalSectionRawMutex, Request<'a>>,
    status: Mutex<CriticalSectionRawMutex, Cell<(u32, LinkStatus)>>,
    tx: Pipe<CriticalSectionRawMutex, TX>,
    rx: Pipe<CriticalSectionRawMutex, RX>,
}

impl<'a, const TX: usize, const RX: usize> Default for TlsLink<'a, TX, RX> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const TX: usize, const RX: usize> TlsLink<'a, TX, RX> {
    pub const fn new() -> Self {
        Self {
            requests: Signal::new(),
            status: Mutex::new(Cell::new((0, LinkStatus::Closed))),
            tx: Pipe::new(),
            rx: Pipe::new(),
        }
    }

    fn request_open(&self, session: u32, endpoint: Endpoint<'a>) {
        self.status.lock(|s| s.set((session, LinkStatus::Opening)));
        self.requests.signal(Request::Open { session, endpoint });
    }

    fn request_close(&self, session: u32) {
        self.status.lock(|s| s.set((session, LinkStatus::Closed)));
        self.requests.signal(Request::Close);
    }

    /// Records `status` unless a newer session has been requested since.
    fn report(&self, session: u32, status: LinkStatus) {
        self.status.lock(|s| {
            if s.get().0 == session {
                s.set((session, status));
            }
        });
    }

    /// `Ready(Ok(()))` once `session` is open, `Pending` while it is being
    /// set up or has been superseded.
    fn check(&self, session: u32) -> Poll<Result<(), TlsTransportError>> {
        match self.status.lock(|s| s.get()) {
            (id, _) if id != session => Poll::Pending,
            (_, LinkStatus::Opening) => Poll::Pending,
            (_, LinkStatus::Open) => Poll::Ready(Ok(())),
            (_, LinkStatus::Closed) => Poll::Ready(Err(TlsTransportError::Closed)),
            (_, LinkStatus::Failed(e)) => Poll::Ready(Err(e)),
        }
    }

    fn poll_send(&self, session: u32, buf: &[u8]) -> Poll<Result<usize, TlsTransportError>> {
        match self.check(session) {
            Poll::Ready(Ok(())) => match self.tx.try_write(buf) {
                Ok(n) => Poll::Ready(Ok(n)),
                Err(_) => Poll::Pending,
            },
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_recv(&self, session: u32, buf: &mut [u8]) -> Poll<Result<usize, TlsTransportError>> {
        match self.check(session) {
            Poll::Ready(Ok(())) => match self.rx.try_read(buf) {
                Ok(n) => Poll::Ready(Ok(n)),
                Err(_) => Poll::Pending,
            },
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Serves open and close requests forever.
    ///
    /// `socket_rx`/`socket_tx` back the TCP socket. `tls_read` must hold a
    /// full TLS record (16640 bytes for arbitrary brokers); `tls_write` may
    /// be smaller. `authority` is only consulted for [`TlsMode::Verify`].
    #[allow(clippy::too_many_arguments)]
    pub async fn run<R, A>(
        &self,
        stack: Stack<'_>,
        socket_rx: &mut [u8],
        socket_tx: &mut [u8],
        tls_read: &mut [u8],
        tls_write: &mut [u8],
        rng: &mut R,
        authority: &mut A,
    ) -> !
    where
        R: CryptoRngCore,
        A: CertificateAuthority,
    {
        let mut next = None;
        loop {
            let request = match next.take() {
                Some(request) => request,
                None => self.requests.wait().await,
            };
            let Request::Open { session, endpoint } = request else {
                continue;
            };

            self.tx.clear();
            self.rx.clear();
            let result = self
                .session(
                    session,
                    endpoint,
                    stack,
                    &mut *socket_rx,
                    &mut *socket_tx,
                    &mut *tls_read,
                    &mut *tls_write,
                    &mut *rng,
                    &mut *authority,
                )
                .await;
            match result {
                Ok(request) => next = Some(request),
                Err(e) => {
                    warn!("TLS session to {} ended: {:?}", endpoint.host, Dbg(&e));
                    self.report(session, LinkStatus::Failed(e));
                }
            }
        }
    }

    /// Runs one session until it fails or a new request arrives, which is
    /// then returned.
    #[allow(clippy::too_many_arguments)]
    async fn session<R, A>(
        &self,
        session: u32,
        endpoint: Endpoint<'a>,
        stack: Stack<'_>,
        socket_rx: &mut [u8],
        socket_tx: &mut [u8],
        tls_read: &mut [u8],
        tls_write: &mut [u8],
        rng: &mut R,
        authority: &mut A,
    ) -> Result<Request<'a>, TlsTransportError>
    where
        R: CryptoRngCore,
        A: CertificateAuthority,
    {
        let address = resolve(stack, endpoint.host).await?;
        let mut socket = TcpSocket::new(stack, socket_rx, socket_tx);
        socket
            .connect(IpEndpoint::new(address, endpoint.port))
            .await
            .map_err(TlsTransportError::Connect)?;
        debug!("TCP connection to {}:{} established", endpoint.host, endpoint.port);

        let config = TlsConfig::new().with_server_name(endpoint.host);
        let mut tls = TlsConnection::<_, Aes128GcmSha256>::new(socket, tls_read, tls_write);
        let handshake = match endpoint.tls {
            TlsMode::Insecure => {
                let provider = InsecureProvider {
                    rng,
                    verifier: NoVerify,
                };
                tls.open(TlsContext::new(&config, provider)).await
            }
            TlsMode::Verify { ca_cert } => {
                let verifier = authority
                    .verifier(ca_cert)
                    .ok_or(TlsTransportError::NoTrustAnchor)?;
                let provider = VerifyingProvider { rng, verifier };
                tls.open(TlsContext::new(&config, provider)).await
            }
            TlsMode::Disabled => return Err(TlsTransportError::TlsDisabled),
        };
        handshake.map_err(|e| {
            warn!("TLS handshake with {} failed: {:?}", endpoint.host, Dbg(&e));
            TlsTransportError::Handshake
        })?;
        self.report(session, LinkStatus::Open);
        info!("TLS session to {} established", endpoint.host);

        let mut inbound = [0u8; 256];
        let mut outbound = [0u8; 256];
        loop {
            match select3(
                tls.read(&mut inbound),
                self.tx.read(&mut outbound),
                self.requests.wait(),
            )
            .await
            {
                Either3::First(Ok(0)) => return Err(TlsTransportError::Closed),
                Either3::First(Ok(n)) => {
                    if let Some(request) = self.forward(&inbound[..n]).await {
                        let _ = tls.close().await;
                        return Ok(request);
                    }
                }
                Either3::First(Err(e)) => {
                    debug!("TLS read failed: {:?}", Dbg(&e));
                    return Err(TlsTransportError::Io);
                }
                Either3::Second(n) => {
                    tls.write_all(&outbound[..n])
                        .await
                        .map_err(|_| TlsTransportError::Io)?;
                    tls.flush().await.map_err(|_| TlsTransportError::Io)?;
                }
                Either3::Third(request) => {
                    let _ = tls.close().await;
                    return Ok(request);
                }
            }
        }
    }

    /// Moves decrypted bytes into the receive pipe, giving up when a new
    /// request arrives while the client is not reading.
    async fn forward(&self, mut bytes: &[u8]) -> Option<Request<'a>> {
        while !bytes.is_empty() {
            match select(self.rx.write(bytes), self.requests.wait()).await {
                Either::First(n) => bytes = &bytes[n..],
                Either::Second(request) => return Some(request),
            }
        }
        None
    }
}

async fn resolve(stack: Stack<'_>, host: &str) -> Result<IpAddress, TlsTransportError> {
    let addresses = stack.dns_query(host, DnsQueryType::A).await.map_err(|e| {
        warn!("DNS query for {} failed: {:?}", host, Dbg(&e));
        TlsTransportError::Dns
    })?;
    addresses.first().copied().ok_or(TlsTransportError::Dns)
}

/// The client's half of a [`TlsLink`].
pub struct TlsTransport<'l, 'a, const TX: usize, const RX: usize> {
    link: &'l TlsLink<'a, TX, RX>,
    stack: Stack<'l>,
    session: u32,
}

impl<'l, 'a, const TX: usize, const RX: usize> TlsTransport<'l, 'a, TX, RX> {
    pub fn new(link: &'l TlsLink<'a, TX, RX>, stack: Stack<'l>) -> Self {
        Self {
            link,
            stack,
            session: 0,
        }
    }
}

impl<'a, const TX: usize, const RX: usize> MqttTransport<'a> for TlsTransport<'_, 'a, TX, RX> {
    type Error = TlsTransportError;

    fn link_is_up(&self) -> bool {
        self.stack.is_link_up() && self.stack.is_config_up()
    }

    fn open(&mut self, endpoint: &Endpoint<'a>) -> Result<(), Self::Error> {
        if endpoint.tls == TlsMode::Disabled {
            return Err(TlsTransportError::TlsDisabled);
        }
        self.session = self.session.wrapping_add(1);
        debug!("requesting TLS session {} to {}:{}", self.session, endpoint.host, endpoint.port);
        self.link.request_open(self.session, *endpoint);
        Ok(())
    }

    fn poll_open(&mut self) -> Poll<Result<(), Self::Error>> {
        self.link.check(self.session)
    }

    fn poll_send(&mut self, buf: &[u8]) -> Poll<Result<usize, Self::Error>> {
        self.link.poll_send(self.session, buf)
    }

    fn poll_recv(&mut self, buf: &mut [u8]) -> Poll<Result<usize, Self::Error>> {
        self.link.poll_recv(self.session, buf)
    }

    fn close(&mut self) {
        self.link.request_close(self.session);
    }
}
