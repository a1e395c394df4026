use super::operation::{FribOperation, FribResponse, FribStatus};
use crate::config::FribConfig;
use crate::error::EnvoyError;
use crate::message::EmbassyMessage;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const FRIB_CHANNEL_CAPACITY: usize = 10;
const REPLY_BUFFER_SIZE: usize = 1024;

/// FRIBDAQ always reports as module 0
const FRIB_ID: usize = 0;

struct FribStreams {
    control: TcpStream,
    response: TcpStream,
}

/// Async task forwarding run-control commands to FRIBDAQ.
///
/// The control and response sockets are opened on the first operation and
/// reused afterwards. A socket error, or FRIBDAQ closing the response
/// socket, drops both so the next operation reconnects.
pub struct FribEnvoy {
    control_address: String,
    response_address: String,
    timeout: Duration,
    streams: Option<FribStreams>,
    incoming: mpsc::Receiver<EmbassyMessage>,
    outgoing: mpsc::Sender<EmbassyMessage>,
    cancel: broadcast::Receiver<EmbassyMessage>,
}

impl FribEnvoy {
    pub fn new(
        config: &FribConfig,
        timeout: Duration,
        rx: mpsc::Receiver<EmbassyMessage>,
        tx: mpsc::Sender<EmbassyMessage>,
        cancel: broadcast::Receiver<EmbassyMessage>,
    ) -> Self {
        Self {
            control_address: format!("{}:{}", config.address, config.control_port),
            response_address: format!("{}:{}", config.address, config.response_port),
            timeout,
            streams: None,
            incoming: rx,
            outgoing: tx,
            cancel,
        }
    }

    pub async fn wait_for_operation(&mut self) -> Result<(), EnvoyError> {
        loop {
            tokio::select! {
                _ = self.cancel.recv() => {
                    return Ok(())
                }

                data = self.incoming.recv() => {
                    if let Some(message) = data {
                        let response = self.submit_operation(&message).await?;
                        self.outgoing.send(response).await?;
                    } else {
                        return Ok(())
                    }
                }
            }
        }
    }

    async fn submit_operation(&mut self, message: &EmbassyMessage) -> Result<EmbassyMessage, EnvoyError> {
        let operation: FribOperation = message
            .decode()
            .map_err(|e| crate::error::OperationError::BadString(e.to_string()))?;
        tracing::info!(operation = %operation, "Submitting FRIBDAQ operation");

        let response = match self.exchange(operation).await {
            Ok(reply) => FribResponse {
                operation,
                status: FribStatus::from_reply(&reply),
                text: reply,
            },
            Err(e) => {
                tracing::error!(operation = %operation, "FRIBDAQ operation failed: {e}");
                self.streams = None;
                FribResponse {
                    operation,
                    status: FribStatus::Failed,
                    text: e.to_string(),
                }
            }
        };
        Ok(EmbassyMessage::compose(&response, FRIB_ID)?)
    }

    async fn exchange(&mut self, operation: FribOperation) -> Result<String, EnvoyError> {
        if self.streams.is_none() {
            let control = connect(&self.control_address, self.timeout).await?;
            let response = connect(&self.response_address, self.timeout).await?;
            self.streams = Some(FribStreams { control, response });
        }
        let Some(streams) = self.streams.as_mut() else {
            return Err(EnvoyError::TcpConnectionTimeout(self.control_address.clone()));
        };

        streams.control.write_all(operation.as_str().as_bytes()).await?;
        let mut buffer = [0u8; REPLY_BUFFER_SIZE];
        let n = tokio::time::timeout(self.timeout, streams.response.read(&mut buffer))
            .await
            .map_err(|_| EnvoyError::TcpConnectionTimeout(self.response_address.clone()))??;
        if n == 0 {
            return Err(EnvoyError::TcpConnectionClosed(self.response_address.clone()));
        }
        Ok(String::from_utf8_lossy(&buffer[..n]).into_owned())
    }
}

async fn connect(address: &str, timeout: Duration) -> Result<TcpStream, EnvoyError> {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(stream) => Ok(stream?),
        Err(_) => Err(EnvoyError::TcpConnectionTimeout(address.to_string())),
    }
}

/// Spawn the FRIBDAQ envoy. Returns its handle and the sender feeding it.
pub fn startup_frib_envoy(
    config: &FribConfig,
    timeout: Duration,
    frib_tx: &mpsc::Sender<EmbassyMessage>,
    cancel: &broadcast::Sender<EmbassyMessage>,
) -> (JoinHandle<()>, mpsc::Sender<EmbassyMessage>) {
    let (embassy_tx, frib_rx) = mpsc::channel::<EmbassyMessage>(FRIB_CHANNEL_CAPACITY);
    let mut envoy = FribEnvoy::new(config, timeout, frib_rx, frib_tx.clone(), cancel.subscribe());
    let handle = tokio::spawn(async move {
        if let Err(e) = envoy.wait_for_operation().await {
            tracing::error!("FRIBDAQ operation envoy ran into an error: {e}")
        }
    });
    (handle, embassy_tx)
}
