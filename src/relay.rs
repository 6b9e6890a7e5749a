//! Carries decoded commands from the detector to the fan controller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use url::Url;

use crate::config::{RelayConfig, RelayMode};
use crate::detector::DecodedCommand;
use crate::fan::FanCommand;
use crate::protocol::IntakeMessage;

const PROBE_ATTEMPTS: u32 = 3;
const PROBE_INTERVAL: Duration = Duration::from_secs(2);
const RETRY_DELAY: Duration = Duration::from_millis(250);

#[async_trait]
pub trait CommandRelay: Send + Sync {
    fn name(&self) -> &str;

    /// Check the receiving end is there.
    async fn probe(&self) -> anyhow::Result<()>;

    async fn deliver(&self, command: &DecodedCommand) -> anyhow::Result<()>;
}

/// JSON datagrams to the fan intake.
pub struct UdpRelay {
    socket: Arc<UdpSocket>,
    target_addr: String,
}

impl UdpRelay {
    pub async fn new(target_addr: &str) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            socket: Arc::new(socket),
            target_addr: target_addr.to_string(),
        })
    }
}

#[async_trait]
impl CommandRelay for UdpRelay {
    fn name(&self) -> &str {
        "udp"
    }

    async fn probe(&self) -> anyhow::Result<()> {
        let mut addrs = tokio::net::lookup_host(&self.target_addr).await?;
        if addrs.next().is_none() {
            anyhow::bail!("{} does not resolve", self.target_addr);
        }
        Ok(())
    }

    async fn deliver(&self, command: &DecodedCommand) -> anyhow::Result<()> {
        let message = IntakeMessage::level(command.level, command.at.as_millis() as u64);
        let json = serde_json::to_string(&message)?;
        self.socket
            .send_to(json.as_bytes(), &self.target_addr)
            .await?;
        Ok(())
    }
}

/// `GET /setduty` on an HTTP PWM server.
pub struct HttpRelay {
    client: reqwest::Client,
    base: Url,
}

impl HttpRelay {
    pub fn new(ip: &str, port: u16, timeout: Duration) -> anyhow::Result<Self> {
        let base = Url::parse(&format!("http://{}:{}/", ip, port))?;
        // The PWM server sits on the local network
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> anyhow::Result<Url> {
        let mut url = self.base.join(path)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("basic", "1");
        }
        Ok(url)
    }

    async fn get(&self, url: Url) -> anyhow::Result<()> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP request to {} failed: {}", url, e))?;
        if !response.status().is_success() {
            anyhow::bail!("{} answered {}", url, response.status());
        }
        Ok(())
    }
}

/// Duty rounded to two decimals, without trailing zeros.
fn format_duty(duty: f64) -> String {
    let rounded = (duty * 100.0).round() / 100.0;
    format!("{}", rounded)
}

#[async_trait]
impl CommandRelay for HttpRelay {
    fn name(&self) -> &str {
        "http"
    }

    async fn probe(&self) -> anyhow::Result<()> {
        self.get(self.endpoint("enable", &[])?).await
    }

    async fn deliver(&self, command: &DecodedCommand) -> anyhow::Result<()> {
        let duty = format_duty(command.level.duty_percent());
        self.get(self.endpoint("setduty", &[("d", duty)])?).await
    }
}

/// In-process hand-off when detector and controller share a process.
pub struct ChannelRelay {
    tx: mpsc::Sender<FanCommand>,
}

impl ChannelRelay {
    pub fn new(tx: mpsc::Sender<FanCommand>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl CommandRelay for ChannelRelay {
    fn name(&self) -> &str {
        "channel"
    }

    async fn probe(&self) -> anyhow::Result<()> {
        if self.tx.is_closed() {
            anyhow::bail!("fan controller is not running");
        }
        Ok(())
    }

    async fn deliver(&self, command: &DecodedCommand) -> anyhow::Result<()> {
        self.tx
            .send(FanCommand::Level(command.level))
            .await
            .map_err(|_| anyhow::anyhow!("fan controller is gone"))
    }
}

/// Build the relay selected in the configuration. `None` means commands are only logged.
pub async fn from_config(config: &RelayConfig) -> anyhow::Result<Option<Arc<dyn CommandRelay>>> {
    let relay: Arc<dyn CommandRelay> = match config.mode {
        RelayMode::Udp => Arc::new(UdpRelay::new(&format!("{}:{}", config.ip, config.port)).await?),
        RelayMode::Http => Arc::new(HttpRelay::new(
            &config.ip,
            config.port,
            Duration::from_secs(config.timeout_secs),
        )?),
        RelayMode::None => return Ok(None),
    };
    Ok(Some(relay))
}

/// Probe a few times at start-up. Failure only warns, the receiver may come up later.
pub async fn probe(relay: &dyn CommandRelay) -> bool {
    for attempt in 1..=PROBE_ATTEMPTS {
        match relay.probe().await {
            Ok(()) => {
                log::info!("Relay {} ready", relay.name());
                return true;
            }
            Err(e) => {
                log::warn!(
                    "Relay {} probe {}/{} failed: {}",
                    relay.name(),
                    attempt,
                    PROBE_ATTEMPTS,
                    e
                );
                if attempt < PROBE_ATTEMPTS {
                    tokio::time::sleep(PROBE_INTERVAL).await;
                }
            }
        }
    }
    false
}

/// Forward commands until the detector side closes the channel.
pub async fn run_relay(
    relay: Arc<dyn CommandRelay>,
    mut rx: mpsc::Receiver<DecodedCommand>,
    attempts: u32,
) {
    probe(relay.as_ref()).await;

    while let Some(command) = rx.recv().await {
        let mut delay = RETRY_DELAY;
        for attempt in 1..=attempts.max(1) {
            match relay.deliver(&command).await {
                Ok(()) => {
                    log::debug!("Relayed level {} via {}", command.level, relay.name());
                    break;
                }
                Err(e) => {
                    log::warn!(
                        "Relay {} failed to deliver level {} ({}/{}): {}",
                        relay.name(),
                        command.level,
                        attempt,
                        attempts,
                        e
                    );
                    if !rx.is_empty() {
                        log::info!("Newer command queued, dropping level {}", command.level);
                        break;
                    }
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
    }
    log::info!("Relay {} stopped", relay.name());
}
