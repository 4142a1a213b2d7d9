//! Network connectivity: WiFi, time sync, TLS, and the MQTT broker.
//!
//! [`ConnectivityManager`] drives the connection sequence against a
//! platform [`Transport`]. It never loops waiting for the network; each call
//! to [`ConnectivityManager::connect`] is one attempt, attempts are spaced by
//! a fixed delay, and too many consecutive failures restart the system.
use crate::{
    clock::Instant,
    config::NetworkConfig,
    escalate::Restart,
    retry::{FixedDelay, RetryBudget},
};
use serde::{Deserialize, Serialize};
use std::{error::Error, fmt, net::Ipv4Addr, time::Duration};

/// The network/TLS/MQTT transport primitives provided by the platform.
///
/// Each step is fallible and may block briefly (within one tick's budget),
/// but must not wait indefinitely.
pub trait Transport {
    /// Returns `true` if the network link is currently up.
    fn network_up(&self) -> bool;

    fn join_network(&mut self) -> anyhow::Result<()>;

    /// Checks that `host` is reachable.
    fn ping(&mut self, host: &str) -> anyhow::Result<()>;

    /// Synchronizes the wall clock, returning the current Unix time in
    /// seconds.
    fn sync_clock(&mut self) -> anyhow::Result<u64>;

    fn connect_secure(&mut self, endpoint: &Endpoint, credentials: &Credentials) -> anyhow::Result<()>;

    fn connect_broker(&mut self, client_id: &str) -> anyhow::Result<()>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()>;

    fn link_info(&self) -> LinkInfo;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// The broker's address.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// TLS credentials for the broker, as PEM text.
///
/// These are opaque to the controller: they are handed to the transport
/// as-is and never printed.
#[derive(Clone, Default, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub ca_cert: String,
    pub device_cert: String,
    pub private_key: String,
}

/// Connection metadata reported in telemetry.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct LinkInfo {
    pub ssid: String,
    pub ip: Option<Ipv4Addr>,
    /// Signal strength in dBm.
    pub rssi: i8,
}

/// A step in the connection sequence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Step {
    JoinNetwork,
    SyncClock,
    ConnectSecure,
    ConnectBroker,
}

#[derive(Debug)]
pub enum ConnectError {
    /// The previous attempt failed too recently; no attempt was made.
    RetryPending { remaining: Duration },
    /// The attempt failed at `step`.
    Failed { step: Step, error: anyhow::Error },
    /// The attempt failed and used up the retry budget. A restart has been
    /// requested.
    Exhausted { step: Step, error: anyhow::Error },
}

#[derive(Debug)]
pub enum PublishError {
    NotConnected,
    Transport(anyhow::Error),
}

pub struct ConnectivityManager<T> {
    transport: T,
    state: ConnectionState,
    budget: RetryBudget,
    delay: FixedDelay,
    endpoint: Endpoint,
    credentials: Credentials,
    client_id: String,
    ping_host: Option<String>,
    synced_at: Option<u64>,
    attempts: usize,
}

const TARGET: &str = "envmon::net";

// === impl ConnectionState ===

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

// === impl Endpoint ===

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8883,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// === impl Credentials ===

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |s: &str| if s.is_empty() { "<none>" } else { "<redacted>" };
        f.debug_struct("Credentials")
            .field("ca_cert", &redact(&self.ca_cert))
            .field("device_cert", &redact(&self.device_cert))
            .field("private_key", &redact(&self.private_key))
            .finish()
    }
}

// === impl Step ===

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::JoinNetwork => "joining network",
            Self::SyncClock => "synchronizing clock",
            Self::ConnectSecure => "establishing TLS session",
            Self::ConnectBroker => "connecting to broker",
        })
    }
}

// === impl ConnectError ===

impl ConnectError {
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    #[must_use]
    pub fn step(&self) -> Option<Step> {
        match self {
            Self::RetryPending { .. } => None,
            Self::Failed { step, .. } | Self::Exhausted { step, .. } => Some(*step),
        }
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryPending { remaining } => {
                write!(f, "next connection attempt allowed in {remaining:?}")
            }
            Self::Failed { step, error } => write!(f, "failed {step}: {error:#}"),
            Self::Exhausted { step, error } => {
                write!(f, "failed {step} with no retries remaining: {error:#}")
            }
        }
    }
}

impl Error for ConnectError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::RetryPending { .. } => None,
            Self::Failed { error, .. } | Self::Exhausted { error, .. } => Some(&**error),
        }
    }
}

// === impl PublishError ===

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => f.write_str("not connected to broker"),
            Self::Transport(error) => write!(f, "publish failed: {error:#}"),
        }
    }
}

impl Error for PublishError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NotConnected => None,
            Self::Transport(error) => Some(&**error),
        }
    }
}

// === impl ConnectivityManager ===

impl<T: Transport> ConnectivityManager<T> {
    pub fn new(transport: T, config: &NetworkConfig, client_id: impl Into<String>) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            budget: RetryBudget::new(config.max_attempts).with_target(TARGET),
            delay: FixedDelay::new(config.retry_delay()).with_target(TARGET),
            endpoint: config.endpoint.clone(),
            credentials: config.credentials.clone(),
            client_id: client_id.into(),
            ping_host: config.ping_host.clone(),
            synced_at: None,
            attempts: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Returns the number of consecutive failed connection attempts.
    #[must_use]
    pub fn consecutive_failures(&self) -> usize {
        self.budget.failures()
    }

    /// Returns the total number of connection attempts made since boot.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Returns `true` if a call to [`connect`](Self::connect) at `now` would
    /// make an attempt.
    #[must_use]
    pub fn is_retry_due(&self, now: Instant) -> bool {
        !self.is_connected() && self.delay.is_ready(now)
    }

    /// Returns the Unix time obtained by the last clock sync, if any.
    #[must_use]
    pub fn synced_at(&self) -> Option<u64> {
        self.synced_at
    }

    pub fn link_info(&self) -> LinkInfo {
        self.transport.link_info()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Makes one connection attempt, unless already connected.
    ///
    /// The sequence is: join the network (if the link is down), synchronize
    /// the clock (once per boot), establish the TLS session, and connect to
    /// the broker. Any failing step aborts the attempt and leaves the
    /// manager disconnected. The `max_attempts`th consecutive failed attempt
    /// invokes `restart`.
    pub fn connect(&mut self, now: Instant, restart: &mut impl Restart) -> Result<(), ConnectError> {
        if self.is_connected() {
            return Ok(());
        }

        if !self.delay.is_ready(now) {
            return Err(ConnectError::RetryPending {
                remaining: self.delay.remaining(now),
            });
        }

        self.attempts += 1;
        self.set_state(ConnectionState::Connecting);
        match self.run_sequence() {
            Ok(()) => {
                self.budget.record_success();
                self.delay.reset();
                self.set_state(ConnectionState::Connected);
                let LinkInfo { ssid, ip, rssi } = self.transport.link_info();
                log::info!(
                    target: TARGET,
                    "connected to {} (SSID: {ssid}, IP: {}, RSSI: {rssi} dBm)",
                    self.endpoint,
                    ip.map_or_else(|| "?".to_string(), |ip| ip.to_string()),
                );
                Ok(())
            }
            Err((step, error)) => {
                self.set_state(ConnectionState::Disconnected);
                log::warn!(target: TARGET, "attempt {} failed {step}: {error:#}", self.attempts);
                self.delay.defer(now);
                if self.budget.record_failure() {
                    log::error!(
                        target: TARGET,
                        "failed to connect after {} attempts; restarting...",
                        self.budget.max()
                    );
                    restart.restart();
                    return Err(ConnectError::Exhausted { step, error });
                }
                Err(ConnectError::Failed { step, error })
            }
        }
    }

    /// Publishes `payload` to `topic`.
    ///
    /// A transport failure drops the connection; the caller should
    /// [`connect`](Self::connect) again on its own schedule.
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }

        self.transport.publish(topic, payload).map_err(|error| {
            log::warn!(target: TARGET, "publish to {topic} failed: {error:#}");
            self.set_state(ConnectionState::Disconnected);
            PublishError::Transport(error)
        })
    }

    fn run_sequence(&mut self) -> Result<(), (Step, anyhow::Error)> {
        if !self.transport.network_up() {
            log::info!(target: TARGET, "joining network...");
            self.transport
                .join_network()
                .map_err(|e| (Step::JoinNetwork, e))?;
            let LinkInfo { ssid, ip, rssi } = self.transport.link_info();
            log::info!(target: TARGET, "joined {ssid:?} (IP: {ip:?}, RSSI: {rssi} dBm)");

            if let Some(host) = self.ping_host.as_deref() {
                match self.transport.ping(host) {
                    Ok(()) => log::info!(target: TARGET, "pinging {host} done"),
                    Err(error) => log::warn!(target: TARGET, "pinging {host} failed: {error:#}"),
                }
            }
        }

        if self.synced_at.is_none() {
            let now = self
                .transport
                .sync_clock()
                .map_err(|e| (Step::SyncClock, e))?;
            log::info!(target: TARGET, "clock synchronized; unix time is {now}");
            self.synced_at = Some(now);
        }

        log::info!(target: TARGET, "connecting to {}...", self.endpoint);
        self.transport
            .connect_secure(&self.endpoint, &self.credentials)
            .map_err(|e| (Step::ConnectSecure, e))?;
        self.transport
            .connect_broker(&self.client_id)
            .map_err(|e| (Step::ConnectBroker, e))?;
        Ok(())
    }

    fn set_state(&mut self, state: ConnectionState) {
        if state != self.state {
            log::info!(target: TARGET, "connection: {} -> {state}", self.state);
            self.state = state;
        }
    }
}

impl<T> fmt::Debug for ConnectivityManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityManager")
            .field("state", &self.state)
            .field("budget", &self.budget)
            .field("delay", &self.delay)
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}
