//! Minimal SNTP client (RFC 4330 client mode) and the network-time
//! collaborator fed by it.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use anyhow::{bail, Context};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use poolctl_common::NetworkTime;

/// Seconds between 1900-01-01 (NTP era 0) and 1970-01-01.
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;
const NTP_PORT: u16 = 123;
const PACKET_LEN: usize = 48;
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(3_600);
const RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Samples older than this are no longer handed to the controller, which
/// then extrapolates on its own tick counter.
const MAX_SAMPLE_AGE: Duration = Duration::from_secs(2 * 3_600);

pub async fn query(server: &str) -> anyhow::Result<i64> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("failed to bind sntp socket")?;
    socket
        .connect((server, NTP_PORT))
        .await
        .with_context(|| format!("failed to reach ntp server {server}"))?;

    // LI = 0, VN = 4, mode = 3 (client)
    let mut request = [0u8; PACKET_LEN];
    request[0] = 0x23;
    socket.send(&request).await.context("sntp send failed")?;

    let mut response = [0u8; PACKET_LEN];
    let len = tokio::time::timeout(QUERY_TIMEOUT, socket.recv(&mut response))
        .await
        .with_context(|| format!("ntp server {server} did not answer"))?
        .context("sntp receive failed")?;

    parse_response(&response[..len])
}

/// Unix seconds from the transmit timestamp of a server reply.
pub fn parse_response(packet: &[u8]) -> anyhow::Result<i64> {
    if packet.len() < PACKET_LEN {
        bail!("short sntp reply ({} bytes)", packet.len());
    }

    let mode = packet[0] & 0x07;
    if mode != 4 && mode != 5 {
        bail!("unexpected sntp mode {mode}");
    }
    if packet[1] == 0 {
        bail!("kiss-of-death reply");
    }

    let seconds = u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]);
    if seconds == 0 {
        bail!("server sent no transmit timestamp");
    }
    Ok(seconds as i64 - NTP_UNIX_OFFSET)
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    epoch: i64,
    at: Instant,
}

/// Latest SNTP result shared between the refresh task and the controller.
#[derive(Debug, Clone, Default)]
pub struct NetworkClock {
    latest: Arc<Mutex<Option<Sample>>>,
}

impl NetworkClock {
    pub fn record(&self, epoch: i64) {
        if let Ok(mut latest) = self.latest.lock() {
            *latest = Some(Sample {
                epoch,
                at: Instant::now(),
            });
        }
    }

    fn current_at(&self, now: Instant) -> Option<i64> {
        let sample = (*self.latest.lock().ok()?)?;
        let age = now.saturating_duration_since(sample.at);
        (age <= MAX_SAMPLE_AGE).then(|| sample.epoch + age.as_secs() as i64)
    }
}

impl NetworkTime for NetworkClock {
    fn fetch_epoch(&mut self) -> Option<i64> {
        self.current_at(Instant::now())
    }
}

/// Queries `server` once and records the result.
pub async fn sync_once(server: &str, clock: &NetworkClock) -> bool {
    match query(server).await {
        Ok(epoch) => {
            debug!("sntp {server}: {epoch}");
            clock.record(epoch);
            true
        }
        Err(err) => {
            warn!("sntp query failed: {err:#}");
            false
        }
    }
}

pub fn spawn_refresh(server: String, clock: NetworkClock) {
    tokio::spawn(async move {
        info!("sntp refresh against {server}");
        loop {
            let wait = if sync_once(&server, &clock).await {
                REFRESH_INTERVAL
            } else {
                RETRY_INTERVAL
            };
            tokio::time::sleep(wait).await;
        }
    });
}
