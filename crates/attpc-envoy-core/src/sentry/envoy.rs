use super::types::{
    SentryOperation, SentryOperationResponse, SentryResponse, SentryStatus,
};
use crate::config::NetworkConfig;
use crate::error::EnvoyError;
use crate::message::EmbassyMessage;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone)]
pub struct SentryConfig {
    id: usize,
    base_url: String,
}

impl SentryConfig {
    pub fn new(id: usize, network: &NetworkConfig) -> Self {
        let base_url = format!(
            "http://{}:{}",
            network.router_address(id),
            network.sentry_port
        );
        Self { id, base_url }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn status(&self) -> String {
        format!("{}/status", self.base_url)
    }

    pub fn catalog(&self) -> String {
        format!("{}/catalog", self.base_url)
    }

    pub fn backup(&self) -> String {
        format!("{}/backup", self.base_url)
    }
}

/// Async task talking to one Sentry server.
///
/// Polls `/status` on a fixed interval and listens for operations broadcast
/// by the embassy. Operations go to every Sentry at once.
#[derive(Debug)]
pub struct SentryEnvoy {
    config: SentryConfig,
    connection: Client,
    outgoing: mpsc::Sender<EmbassyMessage>,
    operations: broadcast::Receiver<EmbassyMessage>,
    cancel: broadcast::Receiver<EmbassyMessage>,
    prev_written_gb: f64,
}

impl SentryEnvoy {
    pub fn new(
        config: SentryConfig,
        tx: mpsc::Sender<EmbassyMessage>,
        operations: broadcast::Receiver<EmbassyMessage>,
        cancel: broadcast::Receiver<EmbassyMessage>,
        request_timeout: Duration,
    ) -> Result<Self, EnvoyError> {
        let client = Client::builder()
            .connect_timeout(request_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            config,
            connection: client,
            outgoing: tx,
            operations,
            cancel,
            prev_written_gb: 0.0,
        })
    }

    pub async fn run(&mut self, interval: Duration) -> Result<(), EnvoyError> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.recv() => {
                    return Ok(());
                }

                maybe = self.operations.recv() => {
                    match maybe {
                        Ok(message) => {
                            let response = self.submit_operation(&message).await?;
                            self.outgoing.send(response).await?;
                        }
                        Err(RecvError::Lagged(n)) => {
                            tracing::warn!(router = self.config.id, "Sentry envoy dropped {n} operations");
                        }
                        Err(RecvError::Closed) => return Ok(()),
                    }
                }

                _ = ticker.tick() => {
                    let status = match self.submit_check_status(interval).await {
                        Ok(status) => status,
                        Err(e) => {
                            tracing::debug!(router = self.config.id, "Sentry status check failed: {e}");
                            SentryStatus::default()
                        }
                    };
                    let message = EmbassyMessage::compose(&status, self.config.id)?;
                    self.outgoing.send(message).await?;
                }
            }
        }
    }

    async fn submit_operation(&mut self, message: &EmbassyMessage) -> Result<EmbassyMessage, EnvoyError> {
        let response = match message.decode::<SentryOperation>() {
            Ok(operation) => {
                tracing::info!(
                    router = self.config.id,
                    operation = operation.name(),
                    "Submitting Sentry operation"
                );
                match self.request_operation(&operation).await {
                    Ok(status) => SentryOperationResponse {
                        operation: operation.name().to_string(),
                        success: true,
                        status,
                    },
                    Err(e) => {
                        tracing::error!(
                            router = self.config.id,
                            operation = operation.name(),
                            "Sentry operation failed: {e}"
                        );
                        SentryOperationResponse {
                            operation: operation.name().to_string(),
                            success: false,
                            status: SentryStatus::default(),
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!(router = self.config.id, "Sentry envoy received a bad operation: {e}");
                SentryOperationResponse {
                    operation: message.kind.to_string(),
                    success: false,
                    status: SentryStatus::default(),
                }
            }
        };
        Ok(EmbassyMessage::compose(&response, self.config.id)?)
    }

    async fn request_operation(&mut self, operation: &SentryOperation) -> Result<SentryStatus, EnvoyError> {
        let url = match operation {
            SentryOperation::Backup(_) => {
                self.prev_written_gb = 0.0;
                self.config.backup()
            }
            SentryOperation::Catalog(_) => self.config.catalog(),
        };
        let response = self
            .connection
            .post(url)
            .json(operation.parameters())
            .send()
            .await?;
        if response.status() == StatusCode::INTERNAL_SERVER_ERROR {
            return Err(EnvoyError::ServerError(response.text().await?));
        }
        let parsed: SentryResponse = serde_json::from_str(&response.text().await?)?;
        Ok(SentryStatus::from_response(parsed, 0.0, 1.0))
    }

    async fn submit_check_status(&mut self, interval: Duration) -> Result<SentryStatus, EnvoyError> {
        let response = self.connection.get(self.config.status()).send().await?;
        if response.status() == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(
                router = self.config.id,
                "Sentry server error when checking status: {}",
                response.text().await?
            );
            return Ok(SentryStatus::default());
        }
        let parsed: SentryResponse = serde_json::from_str(&response.text().await?)?;
        let written = parsed.data_written_gb;
        let status = SentryStatus::from_response(parsed, self.prev_written_gb, interval.as_secs_f64());
        self.prev_written_gb += written;
        Ok(status)
    }
}

/// Spawn a SentryEnvoy per config, each subscribed to the operation
/// broadcast. Must be called from inside a tokio runtime.
pub fn startup_sentry_envoys(
    configs: &[SentryConfig],
    interval: Duration,
    request_timeout: Duration,
    tx: &mpsc::Sender<EmbassyMessage>,
    operations: &broadcast::Sender<EmbassyMessage>,
    cancel: &broadcast::Sender<EmbassyMessage>,
) -> Vec<JoinHandle<()>> {
    let mut handles: Vec<JoinHandle<()>> = vec![];

    for config in configs {
        let id = config.id();
        let envoy = SentryEnvoy::new(
            config.clone(),
            tx.clone(),
            operations.subscribe(),
            cancel.subscribe(),
            request_timeout,
        );
        let handle = tokio::spawn(async move {
            match envoy {
                Ok(mut ev) => {
                    if let Err(e) = ev.run(interval).await {
                        tracing::error!(router = id, "Sentry envoy ran into an error: {e}")
                    }
                }
                Err(e) => tracing::error!(router = id, "Error creating Sentry envoy: {e}"),
            }
        });
        handles.push(handle);
    }

    handles
}
