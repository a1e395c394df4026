//! Envoys that talk SOAP to the GET ECC servers.
//!
//! Every module gets two tasks. The transition envoy waits for operations
//! from the embassy, posts them to the module's getECCServer and forwards the
//! reply. The status envoy polls `GetState` on a fixed interval. A remote
//! failure never ends either task; it is reported to the embassy as an
//! error reply or as the default (offline) status.

use super::operation::EccOperation;
use super::soap;
use crate::config::NetworkConfig;
use crate::constants::{Topology, PROTOCOL};
use crate::error::EnvoyError;
use crate::message::{EmbassyMessage, MessageKind, MessagePayload};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Capacity of the embassy -> transition envoy channel
const TRANSITION_CHANNEL_CAPACITY: usize = 10;

/// Response type for ECC Operations (transitions)
#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
pub struct EccOperationResponse {
    pub error_code: i32,
    pub error_message: String,
    pub text: String,
}

impl MessagePayload for EccOperationResponse {
    const KIND: MessageKind = MessageKind::EccOperationResponse;
}

/// Response type for ECC Status query. A default response (state 0) means
/// the server could not be reached.
#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq)]
pub struct EccStatusResponse {
    pub error_code: i32,
    pub error_message: String,
    pub state: i32,
    pub transition: i32,
}

impl MessagePayload for EccStatusResponse {
    const KIND: MessageKind = MessageKind::EccStatus;
}

/// Minimal getECCServer configuration for one module
#[derive(Debug, Clone)]
pub struct EccConfig {
    id: usize,
    experiment: String,
    address: String,
    url: String,
    is_mutant: bool,
    router_port: u16,
    exporter_port: u16,
}

impl EccConfig {
    /// Create an ECC config from an experiment name and module ID
    pub fn new(id: usize, experiment: &str, network: &NetworkConfig, topology: &Topology) -> Self {
        let is_mutant = topology.is_mutant(id);
        let address = network.module_address(id, is_mutant);
        let url = format!("http://{}:{}", address, network.ecc_port);
        Self {
            id,
            experiment: experiment.to_string(),
            address,
            url,
            is_mutant,
            router_port: network.data_router_port,
            exporter_port: network.data_exporter_port,
        }
    }

    /// Point this config at a different server, keeping the module identity
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Compose the xml string defining the ECC configuration
    pub fn compose_config_body(&self) -> String {
        let describe = self.describe();
        let prepare = &self.experiment;
        let configure = &self.experiment;
        format!(
            r#"<configID>
                        <ConfigId>
                            <SubConfigId type="describe">
                                {describe}
                            </SubConfigId>
                            <SubConfigId type="prepare">
                                {prepare}
                            </SubConfigId>
                            <SubConfigId type="configure">
                                {configure}
                            </SubConfigId>
                        </ConfigId>
                    </configID>"#
        )
    }

    /// Compose the xml string defining the ECC data links. Every module
    /// feeds two routers: the file dump (DataRouter) and the exporter.
    pub fn compose_data_link_body(&self) -> String {
        let source = self.source();
        let ip = &self.address;
        let router = self.data_router();
        let exporter = self.data_exporter();
        let router_port = self.router_port;
        let exporter_port = self.exporter_port;
        format!(
            r#"<table>
                        <DataLinkSet>
                            <DataLink>
                                <DataSender id="{source}" />
                                <DataRouter ipAddress="{ip}" name="{router}" port="{router_port}" type="{PROTOCOL}" />
                            </DataLink>
                            <DataLink>
                                <DataSender id="{source}" />
                                <DataRouter ipAddress="{ip}" name="{exporter}" port="{exporter_port}" type="{PROTOCOL}" />
                            </DataLink>
                        </DataLinkSet>
                    </table>"#
        )
    }

    /// The describe ID
    fn describe(&self) -> String {
        if self.is_mutant {
            self.experiment.clone()
        } else {
            format!("cobo{}", self.id)
        }
    }

    /// The data source (module)
    fn source(&self) -> String {
        if self.is_mutant {
            String::from("Mutant[master]")
        } else {
            format!("CoBo[{}]", self.id)
        }
    }

    fn data_router(&self) -> String {
        format!("data{}", self.id)
    }

    fn data_exporter(&self) -> String {
        format!("exporter{}", self.id)
    }
}

/// An async task talking to one GetECCServer.
///
/// ECCEnvoys run in one of two modes. Transition envoys wait for the embassy
/// to request a configuration change. Status envoys ask the server for its
/// state on a fixed interval. Keeping the two apart means a slow transition
/// never stalls status reporting.
#[derive(Debug)]
pub struct EccEnvoy {
    config: EccConfig,
    connection: Client,
    outgoing: mpsc::Sender<EmbassyMessage>,
    cancel: broadcast::Receiver<EmbassyMessage>,
}

impl EccEnvoy {
    pub fn new(
        config: EccConfig,
        tx: mpsc::Sender<EmbassyMessage>,
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
            cancel,
        })
    }

    /// Transition task loop. Waits for an operation from the embassy and
    /// forwards it to the ECC server. Ends on cancel or when the embassy
    /// drops its sender.
    pub async fn wait_for_transition(
        &mut self,
        mut incoming: mpsc::Receiver<EmbassyMessage>,
    ) -> Result<(), EnvoyError> {
        loop {
            tokio::select! {
                _ = self.cancel.recv() => {
                    return Ok(())
                }

                data = incoming.recv() => {
                    if let Some(message) = data {
                        let response = self.submit_transition(&message).await?;
                        self.outgoing.send(response).await?;
                    } else {
                        return Ok(())
                    }
                }
            }
        }
    }

    /// Status task loop. Checks the ECC server every `interval`. A server that
    /// cannot be reached is reported with a default (offline) status.
    pub async fn wait_check_status(&mut self, interval: Duration) -> Result<(), EnvoyError> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.recv() => {
                    return Ok(());
                }

                _ = ticker.tick() => {
                    let status = match self.submit_check_status().await {
                        Ok(status) => status,
                        Err(e) => {
                            tracing::debug!(module = self.config.id, "ECC status check failed: {e}");
                            EccStatusResponse::default()
                        }
                    };
                    let message = EmbassyMessage::compose(&status, self.config.id)?;
                    self.outgoing.send(message).await?
                }
            }
        }
    }

    /// Submit a transition request and build the reply for the embassy. A
    /// failed request still produces a reply (error code -1) so the embassy
    /// can release the module.
    async fn submit_transition(&self, message: &EmbassyMessage) -> Result<EmbassyMessage, EnvoyError> {
        let response = match self.request_transition(message).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(module = self.config.id, "ECC transition request failed: {e}");
                EccOperationResponse {
                    error_code: -1,
                    error_message: e.to_string(),
                    text: String::new(),
                }
            }
        };
        Ok(EmbassyMessage::compose(&response, self.config.id)?)
    }

    async fn request_transition(
        &self,
        message: &EmbassyMessage,
    ) -> Result<EccOperationResponse, EnvoyError> {
        let op: EccOperation = message
            .decode()
            .map_err(|e| crate::error::OperationError::BadString(e.to_string()))?;
        let body = soap::compose_transition_request(
            op,
            &self.config.compose_config_body(),
            &self.config.compose_data_link_body(),
        );
        tracing::info!(module = self.config.id, operation = %op, "Submitting ECC transition");
        let text = self.post(body).await?;
        soap::parse_operation_response(&text)
    }

    async fn submit_check_status(&self) -> Result<EccStatusResponse, EnvoyError> {
        let text = self.post(soap::compose_status_request()).await?;
        soap::parse_status_response(&text)
    }

    async fn post(&self, body: String) -> Result<String, EnvoyError> {
        let response = self
            .connection
            .post(self.config.url())
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }
}

/// Spawn the ECC envoys: one transition envoy and one status envoy per module.
///
/// Returns the task handles and the switchboard mapping module id to the
/// sender feeding its transition envoy. Must be called from inside a tokio
/// runtime.
pub fn startup_ecc_envoys(
    configs: &[EccConfig],
    status_interval: Duration,
    request_timeout: Duration,
    ecc_tx: &mpsc::Sender<EmbassyMessage>,
    cancel: &broadcast::Sender<EmbassyMessage>,
) -> (
    Vec<JoinHandle<()>>,
    HashMap<usize, mpsc::Sender<EmbassyMessage>>,
) {
    let mut transition_switchboard = HashMap::new();
    let mut handles: Vec<JoinHandle<()>> = vec![];

    for config in configs {
        let id = config.id();
        let (embassy_tx, ecc_rx) = mpsc::channel::<EmbassyMessage>(TRANSITION_CHANNEL_CAPACITY);
        let envoy = EccEnvoy::new(
            config.clone(),
            ecc_tx.clone(),
            cancel.subscribe(),
            request_timeout,
        );
        let handle = tokio::spawn(async move {
            match envoy {
                Ok(mut ev) => {
                    if let Err(e) = ev.wait_for_transition(ecc_rx).await {
                        tracing::error!(module = id, "ECC transition envoy ran into an error: {e}")
                    }
                }
                Err(e) => tracing::error!(module = id, "Error creating ECC transition envoy: {e}"),
            }
        });
        transition_switchboard.insert(id, embassy_tx);
        handles.push(handle);
    }

    for config in configs {
        let id = config.id();
        let envoy = EccEnvoy::new(
            config.clone(),
            ecc_tx.clone(),
            cancel.subscribe(),
            request_timeout,
        );
        let handle = tokio::spawn(async move {
            match envoy {
                Ok(mut ev) => {
                    if let Err(e) = ev.wait_check_status(status_interval).await {
                        tracing::error!(module = id, "ECC status envoy ran into an error: {e}")
                    }
                }
                Err(e) => tracing::error!(module = id, "Error creating ECC status envoy: {e}"),
            }
        });
        handles.push(handle);
    }

    (handles, transition_switchboard)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(id: usize) -> EccConfig {
        EccConfig::new(id, "e20009", &NetworkConfig::default(), &Topology::default())
    }

    #[test]
    fn test_cobo_addressing() {
        let cfg = config(3);
        assert_eq!(cfg.address(), "192.168.41.63");
        assert_eq!(cfg.url(), "http://192.168.41.63:8083");
    }

    #[test]
    fn test_mutant_addressing() {
        let cfg = config(11);
        assert_eq!(cfg.address(), "192.168.41.1");
        assert_eq!(cfg.url(), "http://192.168.41.1:8083");
    }

    #[test]
    fn test_config_body_for_cobo() {
        let body = config(2).compose_config_body();
        assert!(body.contains("cobo2"));
        assert_eq!(body.matches("e20009").count(), 2);
    }

    #[test]
    fn test_config_body_for_mutant_uses_experiment() {
        let body = config(11).compose_config_body();
        assert!(!body.contains("cobo"));
        assert_eq!(body.matches("e20009").count(), 3);
    }

    #[test]
    fn test_data_link_body() {
        let body = config(5).compose_data_link_body();
        assert!(body.contains(r#"<DataSender id="CoBo[5]" />"#));
        assert!(body.contains(r#"name="data5" port="46005" type="TCP""#));
        assert!(body.contains(r#"name="exporter5" port="46007" type="TCP""#));
        assert!(body.contains(r#"ipAddress="192.168.41.65""#));

        let mutant = config(11).compose_data_link_body();
        assert!(mutant.contains("Mutant[master]"));
    }

    #[test]
    fn test_with_url_overrides_only_url() {
        let cfg = config(1).with_url("http://127.0.0.1:9999");
        assert_eq!(cfg.url(), "http://127.0.0.1:9999");
        assert_eq!(cfg.address(), "192.168.41.61");
        assert_eq!(cfg.id(), 1);
    }
}
