//! Example: a greenhouse node on a TLS broker
//!
//! Wires `DynamicMqttClient` to an `embassy-net` stack through the
//! `embedded-tls` transport. The TLS runner and the client loop share one
//! task, so every borrow stays on its stack:
//!
//! ```ignore
//! #[embassy_executor::task]
//! async fn mqtt(stack: Stack<'static>, rng: Rng, mac: [u8; 6]) {
//!     if let Err(e) = run_node(stack, rng, mac).await {
//!         defmt::error!("node setup failed: {:?}", defmt::Debug2Format(&e));
//!     }
//! }
//! ```
//!
//! The client id is derived from the MAC address and the password is a
//! token delivered by provisioning after boot. Until it arrives the client
//! stays in `Connecting` without touching the network.
//!
//! A host build has no network driver, so `main` only checks the
//! configuration and shows the identity the node would present.

#![allow(dead_code)]

use core::cell::RefCell;
use core::fmt::Write as _;
use core::sync::atomic::{AtomicBool, Ordering};

use dynamic_mqtt::{
    ClientConfig, ConfigError, CredentialSource, Credentials, DynamicMqttClient, MqttTransport,
    NoAuthority, RegistrationError, TlsLink, TlsTransport,
};
use embassy_futures::select::select;
use embassy_net::Stack;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant, Timer};
use heapless::String;
use rand_core::CryptoRngCore;

const BROKER: &str = "mqtt.example.net";
const USERNAME: &str = "greenhouse";
const COMMAND_FILTER: &str = "greenhouse/+/command";
const TEMPERATURE_TOPIC: &str = "greenhouse/1/temperature";

/// Broker token, written by the provisioning service.
static TOKEN: Mutex<CriticalSectionRawMutex, RefCell<String<64>>> =
    Mutex::new(RefCell::new(String::new()));
static VENT_OPEN: AtomicBool = AtomicBool::new(false);

#[derive(Debug)]
enum SetupError {
    Config(ConfigError),
    Registration(RegistrationError),
}

impl From<ConfigError> for SetupError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<RegistrationError> for SetupError {
    fn from(e: RegistrationError) -> Self {
        Self::Registration(e)
    }
}

/// Stores the token handed over by provisioning.
fn provision(token: &str) {
    TOKEN.lock(|t| {
        let mut t = t.borrow_mut();
        t.clear();
        let _ = t.push_str(token);
    });
}

struct DeviceIdentity {
    client_id: String<24>,
    token: String<64>,
}

impl DeviceIdentity {
    fn new(mac: [u8; 6]) -> Self {
        let mut client_id = String::new();
        let _ = write!(
            client_id,
            "greenhouse-{:02x}{:02x}{:02x}",
            mac[3], mac[4], mac[5]
        );
        Self {
            client_id,
            token: String::new(),
        }
    }
}

impl CredentialSource for DeviceIdentity {
    fn credentials(&mut self) -> Credentials<'_> {
        TOKEN.lock(|t| {
            self.token.clear();
            let _ = self.token.push_str(&t.borrow());
        });
        Credentials::new(&self.client_id, USERNAME, &self.token)
    }
}

fn config() -> ClientConfig<'static> {
    ClientConfig::new(BROKER)
        .with_port(8883)
        .with_insecure(true)
        .with_keepalive(30)
}

async fn run_node<R>(stack: Stack<'_>, mut rng: R, mac: [u8; 6]) -> Result<(), SetupError>
where
    R: CryptoRngCore,
{
    let mut on_command = |_topic: &str, payload: &[u8]| {
        VENT_OPEN.store(payload == b"open", Ordering::Relaxed);
    };
    let mut identity = DeviceIdentity::new(mac);
    let link: TlsLink<'_, 1024, 1024> = TlsLink::new();

    let mut client = DynamicMqttClient::<_, 4, 512>::new(TlsTransport::new(&link, stack));
    client.configure(config())?;
    client.set_credential_source(&mut identity)?;
    client.register_handler(COMMAND_FILTER, &mut on_command)?;
    client.start(Instant::now())?;

    let mut socket_rx = [0u8; 2048];
    let mut socket_tx = [0u8; 2048];
    let mut tls_read = [0u8; 16640];
    let mut tls_write = [0u8; 4096];
    let runner = link.run(
        stack,
        &mut socket_rx,
        &mut socket_tx,
        &mut tls_read,
        &mut tls_write,
        &mut rng,
        &mut NoAuthority,
    );
    select(runner, drive(&mut client)).await;
    Ok(())
}

async fn drive<'a, T, const H: usize, const B: usize>(
    client: &mut DynamicMqttClient<'a, T, H, B>,
) -> !
where
    T: MqttTransport<'a>,
{
    let mut next_report = Instant::now();
    loop {
        let now = Instant::now();
        client.tick(now);
        if client.is_connected() && now >= next_report {
            let payload = if VENT_OPEN.load(Ordering::Relaxed) {
                b"21.5;vent=open".as_slice()
            } else {
                b"21.5;vent=closed".as_slice()
            };
            client.publish(TEMPERATURE_TOPIC, payload);
            next_report = now + Duration::from_secs(10);
        }
        Timer::after_millis(100).await;
    }
}

fn main() {
    let config = config();
    if let Err(e) = config.validate() {
        println!("invalid configuration: {e:?}");
        return;
    }
    let endpoint = config.endpoint();
    println!(
        "broker {}:{} with {:?}",
        endpoint.host, endpoint.port, endpoint.tls
    );

    let mut identity = DeviceIdentity::new([0x02, 0x00, 0x00, 0x12, 0x34, 0x56]);
    println!(
        "before provisioning: complete = {}",
        identity.credentials().is_complete()
    );
    provision("demo-token");
    let credentials = identity.credentials();
    println!(
        "after provisioning: client id {}, complete = {}",
        credentials.client_id,
        credentials.is_complete()
    );
}
