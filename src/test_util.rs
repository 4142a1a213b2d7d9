//! Test doubles for the platform collaborators.
use crate::{
    annunciator::{Channel, Outputs},
    escalate::Restart,
    net::{Credentials, Endpoint, LinkInfo, Transport},
};
use std::collections::HashMap;

/// Remembers the last value written to each channel.
#[derive(Debug, Default)]
pub(crate) struct RecordingOutputs {
    levels: HashMap<Channel, u16>,
    writes: usize,
}

#[derive(Debug, Default)]
pub(crate) struct CountingRestart {
    pub(crate) count: usize,
}

/// A transport whose steps fail on demand.
///
/// Each `fail_*` counter is the number of upcoming calls to that step that
/// will fail.
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    pub(crate) fail_join: usize,
    pub(crate) fail_sync: usize,
    pub(crate) fail_secure: usize,
    pub(crate) fail_broker: usize,
    pub(crate) fail_publish: usize,
    pub(crate) fail_ping: bool,
    pub(crate) network_up: bool,
    pub(crate) calls: Vec<String>,
    pub(crate) published: Vec<(String, Vec<u8>)>,
}

impl RecordingOutputs {
    pub(crate) fn level(&self, channel: Channel) -> u16 {
        self.levels.get(&channel).copied().unwrap_or(0)
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes
    }
}

impl Outputs for RecordingOutputs {
    fn set_output(&mut self, channel: Channel, value: u16) {
        self.levels.insert(channel, value);
        self.writes += 1;
    }
}

impl Restart for CountingRestart {
    fn restart(&mut self) {
        self.count += 1;
    }
}

impl MockTransport {
    pub(crate) const SSID: &'static str = "test-net";
    pub(crate) const UNIX_TIME: u64 = 1_710_000_000;

    fn step(counter: &mut usize, name: &str) -> anyhow::Result<()> {
        if *counter > 0 {
            *counter -= 1;
            anyhow::bail!("{name} failed");
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn network_up(&self) -> bool {
        self.network_up
    }

    fn join_network(&mut self) -> anyhow::Result<()> {
        self.calls.push("join".into());
        Self::step(&mut self.fail_join, "join")?;
        self.network_up = true;
        Ok(())
    }

    fn ping(&mut self, host: &str) -> anyhow::Result<()> {
        self.calls.push(format!("ping:{host}"));
        anyhow::ensure!(!self.fail_ping, "{host} unreachable");
        Ok(())
    }

    fn sync_clock(&mut self) -> anyhow::Result<u64> {
        self.calls.push("sync".into());
        Self::step(&mut self.fail_sync, "sync")?;
        Ok(Self::UNIX_TIME)
    }

    fn connect_secure(&mut self, _: &Endpoint, _: &Credentials) -> anyhow::Result<()> {
        self.calls.push("connect_secure".into());
        Self::step(&mut self.fail_secure, "TLS handshake")
    }

    fn connect_broker(&mut self, client_id: &str) -> anyhow::Result<()> {
        self.calls.push(format!("connect_broker:{client_id}"));
        Self::step(&mut self.fail_broker, "MQTT connect")
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        self.calls.push(format!("publish:{topic}"));
        Self::step(&mut self.fail_publish, "publish")?;
        self.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn link_info(&self) -> LinkInfo {
        LinkInfo {
            ssid: Self::SSID.into(),
            ip: self.network_up.then(|| [192, 168, 1, 42].into()),
            rssi: -58,
        }
    }
}
