use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};

use super::controller::FanCommand;
use crate::protocol::IntakeMessage;

/// Receives relay datagrams and manual overrides for the fan controller.
pub struct FanIntake {
    socket: Arc<UdpSocket>,
    tx: mpsc::Sender<FanCommand>,
}

impl FanIntake {
    pub async fn bind(addr: &str, tx: mpsc::Sender<FanCommand>) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        log::info!("Fan intake listening on {}", socket.local_addr()?);
        Ok(Self {
            socket: Arc::new(socket),
            tx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = [0u8; 1024];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            let Ok(text) = std::str::from_utf8(&buf[..len]) else {
                log::warn!("Non-UTF-8 datagram from {}", peer);
                continue;
            };
            if !self.dispatch(text, peer).await {
                log::info!("Fan controller gone, intake stopping");
                break;
            }
        }
        Ok(())
    }

    /// Returns false once the controller is gone.
    async fn dispatch(&self, text: &str, peer: SocketAddr) -> bool {
        let message = match IntakeMessage::parse(text.trim()) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Ignoring datagram from {}: {}", peer, e);
                return true;
            }
        };
        log::debug!("Intake {:?} from {}", message, peer);

        match FanCommand::from_message(message) {
            Ok(Some(command)) => self.tx.send(command).await.is_ok(),
            Ok(None) => {
                let (reply_tx, reply_rx) = oneshot::channel();
                if self.tx.send(FanCommand::Status(reply_tx)).await.is_err() {
                    return false;
                }
                let Ok(state) = reply_rx.await else {
                    return false;
                };
                match serde_json::to_string(&state) {
                    Ok(json) => {
                        if let Err(e) = self.socket.send_to(json.as_bytes(), peer).await {
                            log::warn!("Failed to answer status to {}: {}", peer, e);
                        }
                    }
                    Err(e) => log::error!("Failed to encode status: {}", e),
                }
                true
            }
            Err(e) => {
                log::error!("Rejected message from {}: {}", peer, e);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Level;
    use std::time::Duration;

    #[tokio::test]
    async fn forwards_levels_and_rejects_bad_ones() {
        let (tx, mut rx) = mpsc::channel(8);
        let intake = FanIntake::bind("127.0.0.1:0", tx).await.unwrap();
        let addr = intake.local_addr().unwrap();
        tokio::spawn(async move { intake.run().await });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(br#"{"type":"level","level":99}"#, addr).await.unwrap();
        client.send_to(b"not json", addr).await.unwrap();
        client
            .send_to(br#"{"type":"level","level":40,"at_ms":5}"#, addr)
            .await
            .unwrap();

        let command = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(command, FanCommand::Level(l) if l == Level::new(40).unwrap()));
    }

    #[tokio::test]
    async fn answers_status() {
        let (tx, mut rx) = mpsc::channel(8);
        let intake = FanIntake::bind("127.0.0.1:0", tx).await.unwrap();
        let addr = intake.local_addr().unwrap();
        tokio::spawn(async move { intake.run().await });

        // Stand-in controller
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                if let FanCommand::Status(reply) = command {
                    let _ = reply.send(crate::fan::PwmState {
                        duty: 42.0,
                        target: 42.0,
                        auto_target: 42.0,
                        mode: crate::fan::OverrideMode::Auto,
                        scale: 1.0,
                        phase: crate::fan::KickPhase::Steady,
                    });
                }
            }
        });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(br#"{"type":"status"}"#, addr).await.unwrap();
        let mut buf = [0u8; 512];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let reply: serde_json::Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(reply["duty"], 42.0);
        assert_eq!(reply["mode"], "auto");
        assert_eq!(reply["phase"], "steady");
    }
}
