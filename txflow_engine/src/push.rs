use futures_util::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use txflow_protocol::{parse_push_frame, PushEvent};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push channel connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushControl {
    Connect,
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    Connecting,
    Connected,
    Disconnected { retry_in: Option<Duration> },
}

/// Keeps the backend event channel open and forwards decoded events.
///
/// Reconnects with backoff until told to disconnect. Returns when the control channel closes
/// or nobody listens for events any more.
pub async fn run(
    url: Url,
    mut control: mpsc::Receiver<PushControl>,
    events: mpsc::Sender<PushEvent>,
    status: watch::Sender<PushStatus>,
) {
    let mut desired_connected = true;
    let mut backoff = Backoff::default();

    loop {
        if !desired_connected {
            let _ = status.send(PushStatus::Disconnected { retry_in: None });
            match control.recv().await {
                Some(PushControl::Connect) => desired_connected = true,
                Some(PushControl::Disconnect) => {}
                None => return,
            }
            continue;
        }

        let _ = status.send(PushStatus::Connecting);
        let mut socket = match connect(&url).await {
            Ok(socket) => {
                backoff.reset();
                let _ = status.send(PushStatus::Connected);
                tracing::info!(%url, "push channel connected");
                socket
            }
            Err(e) => {
                let retry = backoff.next_delay();
                tracing::warn!(
                    error = %e,
                    retry_secs = retry.as_secs(),
                    "push channel unavailable"
                );
                let _ = status.send(PushStatus::Disconnected {
                    retry_in: Some(retry),
                });
                tokio::select! {
                    cmd = control.recv() => match cmd {
                        Some(PushControl::Disconnect) => desired_connected = false,
                        Some(PushControl::Connect) => {}
                        None => return,
                    },
                    _ = tokio::time::sleep(retry) => {}
                }
                continue;
            }
        };

        loop {
            tokio::select! {
                cmd = control.recv() => {
                    match cmd {
                        Some(PushControl::Connect) => {}
                        Some(PushControl::Disconnect) => {
                            desired_connected = false;
                            let _ = socket.close(None).await;
                            break;
                        }
                        None => return,
                    }
                }
                incoming = socket.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            let Some(event) = parse_push_frame(text.as_str()) else {
                                continue;
                            };
                            if events.send(event).await.is_err() {
                                return;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("push channel closed by backend");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "push channel read failed");
                            break;
                        }
                    }
                }
            }
        }
    }
}

async fn connect(url: &Url) -> Result<Socket, PushError> {
    let (socket, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    Ok(socket)
}

#[derive(Debug, Default)]
struct Backoff {
    idx: usize,
}

impl Backoff {
    const DELAYS: [u64; 4] = [1, 2, 5, 10];

    fn reset(&mut self) {
        self.idx = 0;
    }

    fn next_delay(&mut self) -> Duration {
        let secs = Self::DELAYS.get(self.idx).copied().unwrap_or(10);
        self.idx = (self.idx + 1).min(Self::DELAYS.len());
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_caps_and_resets() {
        let mut b = Backoff::default();
        let secs: Vec<u64> = (0..6).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 5, 10, 10, 10]);
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }
}
