//! The embassy: the single point of contact between the application and the
//! envoy tasks.
//!
//! The embassy owns the channel ends used to talk to every envoy. It spawns
//! the envoys from an [`EnvoyPlan`], routes outgoing operations to the right
//! task, and hands incoming messages to the caller.

use crate::config::{EnvoyConfig, FribConfig, MonitorKind};
use crate::ecc::{startup_ecc_envoys, EccConfig};
use crate::error::EmbassyError;
use crate::frib::startup_frib_envoy;
use crate::message::{EmbassyMessage, MessageKind};
use crate::obs;
use crate::sentry::{startup_sentry_envoys, SentryConfig};
use crate::surveyor::{startup_surveyor_envoys, SurveyorConfig};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const ENVOY_CHANNEL_CAPACITY: usize = 64;
const BROADCAST_CAPACITY: usize = 10;

/// Everything needed to spawn a set of envoys
#[derive(Debug, Clone)]
pub struct EnvoyPlan {
    pub ecc: Vec<EccConfig>,
    pub surveyors: Vec<SurveyorConfig>,
    pub sentries: Vec<SentryConfig>,
    pub frib: Option<FribConfig>,
    pub status_interval: Duration,
    pub ecc_timeout: Duration,
    pub surveyor_timeout: Duration,
    pub sentry_timeout: Duration,
    pub frib_timeout: Duration,
}

impl EnvoyPlan {
    /// The production plan: every module of the topology, and the DataRouter
    /// monitor selected in the config.
    pub fn from_config(config: &EnvoyConfig) -> Self {
        let topology = config.topology();
        let network = &config.network;
        let ecc = topology
            .all_ids()
            .into_iter()
            .map(|id| EccConfig::new(id, &config.experiment, network, &topology))
            .collect();

        let (surveyors, sentries) = match config.monitor {
            MonitorKind::Surveyor => (
                topology
                    .cobo_ids()
                    .into_iter()
                    .map(|id| SurveyorConfig::new(id, network))
                    .collect(),
                vec![],
            ),
            MonitorKind::Sentry => (
                vec![],
                topology
                    .cobo_ids()
                    .into_iter()
                    .map(|id| SentryConfig::new(id, network))
                    .collect(),
            ),
        };

        Self {
            ecc,
            surveyors,
            sentries,
            frib: config.frib.clone(),
            status_interval: config.timing.status_interval(),
            ecc_timeout: config.timing.ecc_timeout(),
            surveyor_timeout: config.timing.surveyor_timeout(),
            sentry_timeout: config.timing.sentry_timeout(),
            frib_timeout: config.timing.frib_timeout(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Embassy {
    ecc_senders: HashMap<usize, mpsc::Sender<EmbassyMessage>>,
    sentry_sender: Option<broadcast::Sender<EmbassyMessage>>,
    frib_sender: Option<mpsc::Sender<EmbassyMessage>>,
    envoy_receiver: Option<mpsc::Receiver<EmbassyMessage>>,
    cancel: Option<broadcast::Sender<EmbassyMessage>>,
    handles: Vec<JoinHandle<()>>,
    is_connected: bool,
}

impl Embassy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn every envoy in the plan. Must be called from inside a tokio
    /// runtime. Calling this on a connected embassy does nothing.
    pub fn startup(&mut self, plan: &EnvoyPlan) {
        if self.is_connected {
            tracing::warn!("Embassy is already connected; ignoring startup");
            return;
        }
        let (envoy_tx, embassy_rx) = mpsc::channel::<EmbassyMessage>(ENVOY_CHANNEL_CAPACITY);
        let (cancel_tx, _) = broadcast::channel::<EmbassyMessage>(BROADCAST_CAPACITY);

        let (mut handles, ecc_switchboard) = startup_ecc_envoys(
            &plan.ecc,
            plan.status_interval,
            plan.ecc_timeout,
            &envoy_tx,
            &cancel_tx,
        );

        handles.extend(startup_surveyor_envoys(
            &plan.surveyors,
            plan.status_interval,
            plan.surveyor_timeout,
            &envoy_tx,
            &cancel_tx,
        ));

        if !plan.sentries.is_empty() {
            let (sentry_tx, _) = broadcast::channel::<EmbassyMessage>(BROADCAST_CAPACITY);
            handles.extend(startup_sentry_envoys(
                &plan.sentries,
                plan.status_interval,
                plan.sentry_timeout,
                &envoy_tx,
                &sentry_tx,
                &cancel_tx,
            ));
            self.sentry_sender = Some(sentry_tx);
        }

        if let Some(frib) = &plan.frib {
            let (handle, frib_tx) =
                startup_frib_envoy(frib, plan.frib_timeout, &envoy_tx, &cancel_tx);
            handles.push(handle);
            self.frib_sender = Some(frib_tx);
        }

        self.ecc_senders = ecc_switchboard;
        self.envoy_receiver = Some(embassy_rx);
        self.cancel = Some(cancel_tx);
        self.handles = handles;
        self.is_connected = true;
        obs::emit_embassy_connected(self.handles.len());
    }

    /// Cancel every envoy and wait for all of them to finish
    pub async fn shutdown(&mut self) -> Result<(), EmbassyError> {
        if let Some(tx) = self.cancel.take() {
            // Err only means every envoy already exited
            if tx.send(EmbassyMessage::compose_cancel()).is_err() {
                tracing::debug!("No envoys were listening for the cancel signal");
            }
        }
        // An envoy blocked on a full channel would never see the cancel
        self.envoy_receiver = None;
        self.ecc_senders.clear();
        self.sentry_sender = None;
        self.frib_sender = None;

        let handles = std::mem::take(&mut self.handles);
        let n_tasks = handles.len();
        let results = futures::future::join_all(handles).await;
        self.is_connected = false;
        obs::emit_embassy_disconnected(n_tasks);

        for result in results {
            result?;
        }
        Ok(())
    }

    /// Route a message to the envoy(s) that handle its kind
    pub async fn submit_message(&self, message: EmbassyMessage) -> Result<(), EmbassyError> {
        if !self.is_connected {
            return Err(EmbassyError::NotConnected);
        }
        match message.kind {
            MessageKind::EccOperation => {
                let sender = self
                    .ecc_senders
                    .get(&message.id)
                    .ok_or(EmbassyError::UnknownEnvoy(message.id))?;
                sender.send(message).await?;
            }
            MessageKind::SentryOperation => match &self.sentry_sender {
                Some(sender) => {
                    sender.send(message)?;
                }
                None => tracing::warn!("No Sentry envoys are running; dropping Sentry operation"),
            },
            MessageKind::FribOperation => match &self.frib_sender {
                Some(sender) => sender.send(message).await?,
                None => tracing::warn!("FRIBDAQ is not configured; dropping FRIB operation"),
            },
            kind => tracing::debug!("Embassy does not route messages of kind {kind}"),
        }
        Ok(())
    }

    /// Drain every message the envoys have sent so far without waiting
    pub fn poll_messages(&mut self) -> Result<Vec<EmbassyMessage>, EmbassyError> {
        let mut messages: Vec<EmbassyMessage> = vec![];
        if let Some(rx) = &mut self.envoy_receiver {
            loop {
                match rx.try_recv() {
                    Ok(message) => messages.push(message),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        return Err(EmbassyError::FailedReceive)
                    }
                }
            }
        }
        Ok(messages)
    }

    /// Wait for the next message from any envoy
    pub async fn next_message(&mut self) -> Result<EmbassyMessage, EmbassyError> {
        let rx = self
            .envoy_receiver
            .as_mut()
            .ok_or(EmbassyError::NotConnected)?;
        rx.recv().await.ok_or(EmbassyError::FailedReceive)
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    pub fn number_of_tasks(&self) -> usize {
        self.handles.len()
    }
}
