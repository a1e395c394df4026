//! Top-level run control.
//!
//! [`RunController`] ties the pieces together: it owns the configuration,
//! the embassy, the status manager, the rate graphs and the script runner,
//! and exposes the operations an operator performs during an experiment.

use crate::command::{CommandName, CommandStatus, ScriptRunner};
use crate::config::EnvoyConfig;
use crate::embassy::{Embassy, EnvoyPlan};
use crate::error::EmbassyError;
use crate::frib::{FribOperation, FribResponse};
use crate::message::{EmbassyMessage, MessageKind};
use crate::obs;
use crate::rate_graph::GraphManager;
use crate::run_table;
use crate::status_manager::StatusManager;
use crate::transition;
use chrono::Utc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

/// What happened when a run start was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// Data for this run number already exists on the DataRouters
    RunNumberUsed,
    /// The run number could not be checked
    CheckFailed,
}

#[derive(Debug)]
pub struct RunController {
    config: EnvoyConfig,
    embassy: Embassy,
    status: StatusManager,
    graphs: GraphManager,
    scripts: ScriptRunner,
}

impl RunController {
    pub fn new(config: EnvoyConfig) -> Self {
        let status = StatusManager::from_config(&config);
        let graphs = GraphManager::new(
            config.topology().data_router_count(),
            config.timing.graph_max_points,
            Duration::from_secs(config.timing.graph_interval_secs),
        );
        let scripts = ScriptRunner::from_paths(&config.paths);
        Self {
            config,
            embassy: Embassy::new(),
            status,
            graphs,
            scripts,
        }
    }

    pub fn config(&self) -> &EnvoyConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut EnvoyConfig {
        &mut self.config
    }

    pub fn status(&self) -> &StatusManager {
        &self.status
    }

    pub fn graphs(&self) -> &GraphManager {
        &self.graphs
    }

    pub fn is_connected(&self) -> bool {
        self.embassy.is_connected()
    }

    fn timeout(&self) -> Duration {
        self.config.timing.transition_timeout()
    }

    /// Spawn the envoys described by the configuration
    pub fn connect(&mut self) {
        let plan = EnvoyPlan::from_config(&self.config);
        self.connect_with(&plan);
    }

    /// Spawn the envoys of an explicit plan
    pub fn connect_with(&mut self, plan: &EnvoyPlan) {
        if !self.embassy.is_connected() {
            self.embassy.startup(plan);
            tracing::info!("Connected with {} tasks spawned", self.embassy.number_of_tasks());
        }
    }

    /// Cancel every envoy and forget their statuses
    pub async fn disconnect(&mut self) -> Result<(), EmbassyError> {
        if !self.embassy.is_connected() {
            return Ok(());
        }
        let result = self.embassy.shutdown().await;
        self.status.reset();
        tracing::info!("Disconnected the embassy and reset the status manager");
        result
    }

    /// Pull in every pending envoy message. While a run is going this also
    /// feeds the rate graphs.
    pub fn poll(&mut self) -> Result<(), EmbassyError> {
        transition::poll_embassy(&mut self.embassy, &mut self.status)?;
        if self.status.is_system_running() && self.graphs.should_update() {
            self.graphs.update(&self.status.data_rates());
        }
        Ok(())
    }

    /// Wait until every module and DataRouter has reported at least once
    pub async fn wait_for_full_status(&mut self) -> Result<(), EmbassyError> {
        let timeout = self.timeout();
        transition::wait_for(&mut self.embassy, &mut self.status, timeout, "full status", |s| {
            s.has_full_status()
        })
        .await
    }

    /// Wait until every submitted transition has been answered
    pub async fn wait_for_transitions(&mut self) -> Result<(), EmbassyError> {
        let timeout = self.timeout();
        transition::wait_for(&mut self.embassy, &mut self.status, timeout, "transition replies", |s| {
            !s.has_pending_transitions()
        })
        .await
    }

    /// Start a run: CoBos first, then the MuTaNT.
    ///
    /// The run number is checked against the DataRouters first, and the
    /// MuTaNT is reconfigured so event numbers and timestamps restart.
    pub async fn start_run(&mut self) -> Result<StartOutcome, EmbassyError> {
        let span = obs::run_span(&self.config.experiment, self.config.run_number);
        self.start_run_sequence().instrument(span).await
    }

    async fn start_run_sequence(&mut self) -> Result<StartOutcome, EmbassyError> {
        let experiment = self.config.experiment.clone();
        let run_number = self.config.run_number;
        let timeout = self.timeout();

        tracing::info!("Checking if run number is ok...");
        let routers = self.status.data_router_locations();
        match self
            .scripts
            .execute(CommandName::CheckRunExists, &routers, &experiment, run_number)
            .await
        {
            CommandStatus::Success => {
                tracing::warn!(
                    "Run {run_number} already has data. Delete the data or change the run number."
                );
                return Ok(StartOutcome::RunNumberUsed);
            }
            CommandStatus::Failure => (),
            CommandStatus::CouldNotExecute => return Ok(StartOutcome::CheckFailed),
        }

        tracing::info!("Re-configuring MuTaNT to reset timestamps...");
        transition::reconfigure_mutant(&mut self.embassy, &mut self.status, timeout).await?;
        tracing::info!("Starting CoBos...");
        transition::start_cobos(&mut self.embassy, &mut self.status, timeout).await?;
        tracing::info!("Starting MuTaNT...");
        transition::start_mutant(&mut self.embassy, &self.status).await?;

        self.config.run_started_at = Some(Utc::now());
        self.graphs.reset();
        if let Err(e) = self.config.save() {
            tracing::error!("Could not autosave config: {e}");
        }
        obs::emit_run_started(&experiment, run_number);
        Ok(StartOutcome::Started)
    }

    /// Stop a run: MuTaNT first, then the CoBos. The data and configuration
    /// are filed away, the run is logged, and the run number advances.
    pub async fn stop_run(&mut self) -> Result<(), EmbassyError> {
        let span = obs::run_span(&self.config.experiment, self.config.run_number);
        self.stop_run_sequence().instrument(span).await
    }

    async fn stop_run_sequence(&mut self) -> Result<(), EmbassyError> {
        let experiment = self.config.experiment.clone();
        let run_number = self.config.run_number;
        let timeout = self.timeout();

        tracing::info!("Stopping the MuTaNT...");
        transition::stop_mutant(&mut self.embassy, &mut self.status, timeout).await?;
        tracing::info!("Stopping CoBos...");
        transition::stop_cobos(&mut self.embassy, &self.status).await?;

        let routers = self.status.data_router_locations();
        tracing::info!("Moving .graw files...");
        if self
            .scripts
            .execute(CommandName::MoveGrawFiles, &routers, &experiment, run_number)
            .await
            == CommandStatus::Failure
        {
            tracing::error!("Unable to move the graw files after stopping the run");
        }

        tracing::info!("Backing up GET configuration...");
        if self
            .scripts
            .execute(CommandName::BackupConfig, &routers, &experiment, run_number)
            .await
            == CommandStatus::Failure
        {
            tracing::error!("Could not back up config files after stopping the run");
        }

        let duration = self.run_duration();
        match run_table::write_run_row(&self.config, duration) {
            Ok(path) => tracing::info!(path = %path.display(), "Run logged to table"),
            Err(e) => tracing::error!("Could not write the run table: {e}"),
        }
        obs::emit_run_stopped(&experiment, run_number, duration.as_secs());

        self.config.run_number += 1;
        self.config.run_started_at = None;
        match self.config.save() {
            Ok(()) => tracing::info!("Config autosaved to {}", self.config.path.display()),
            Err(e) => tracing::error!("Could not autosave config: {e}"),
        }
        Ok(())
    }

    /// Time since the recorded run start, zero if none was recorded
    pub fn run_duration(&self) -> Duration {
        self.config
            .run_started_at
            .and_then(|start| (Utc::now() - start).to_std().ok())
            .unwrap_or_default()
    }

    /// Ask the Sentries to catalog the current run
    pub async fn catalog(&mut self) -> Result<(), EmbassyError> {
        let timeout = self.timeout();
        transition::catalog_run(
            &mut self.embassy,
            &mut self.status,
            &self.config.experiment,
            self.config.run_number,
            timeout,
        )
        .await
    }

    /// Ask the Sentries to back up the current run's data
    pub async fn backup_sentries(&mut self) -> Result<(), EmbassyError> {
        let timeout = self.timeout();
        transition::backup_sentries(
            &mut self.embassy,
            &mut self.status,
            &self.config.experiment,
            self.config.run_number,
            timeout,
        )
        .await
    }

    pub async fn progress(&mut self) -> Result<(), EmbassyError> {
        let timeout = self.timeout();
        transition::forward_transition_all(&mut self.embassy, &mut self.status, timeout).await
    }

    pub async fn regress(&mut self) -> Result<(), EmbassyError> {
        transition::backward_transition_all(&mut self.embassy, &mut self.status).await
    }

    /// Move a single module, refusing steps that break the MuTaNT/CoBo order
    pub async fn transition_module(&mut self, id: usize, forward: bool) -> Result<(), EmbassyError> {
        if !self.status.topology().contains(id) {
            return Err(EmbassyError::UnknownEnvoy(id));
        }
        let current = self.status.ecc_status(id);
        let allowed = if forward {
            self.status.can_ecc_go_forward(id)
        } else {
            self.status.can_ecc_go_backward(id)
        };
        if !allowed {
            let op = if forward {
                current.forward_operation()
            } else {
                current.backward_operation()
            };
            return Err(EmbassyError::InvalidTransition(op));
        }
        transition::transition_ecc(&mut self.embassy, &mut self.status, &[id], forward).await
    }

    /// Send a command to FRIBDAQ and wait for its reply
    pub async fn frib(&mut self, operation: FribOperation) -> Result<FribResponse, EmbassyError> {
        if self.config.frib.is_none() {
            return Err(EmbassyError::NotConfigured("FRIBDAQ"));
        }
        self.embassy
            .submit_message(EmbassyMessage::compose(&operation, 0)?)
            .await?;

        let timeout = self.timeout();
        let deadline = Instant::now() + timeout;
        loop {
            let message = tokio::time::timeout_at(deadline, self.embassy.next_message())
                .await
                .map_err(|_| EmbassyError::Timeout {
                    waiting_for: String::from("FRIBDAQ reply"),
                    seconds: timeout.as_secs(),
                })??;
            if message.kind == MessageKind::FribResponse {
                return message.decode();
            }
            self.status.handle_messages(&[message])?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecc::EccOperation;

    fn controller() -> RunController {
        let mut config = EnvoyConfig::default();
        config.network.number_of_modules = 3;
        RunController::new(config)
    }

    #[test]
    fn test_graph_per_router() {
        let rc = controller();
        assert_eq!(rc.graphs().lines().len(), 2);
        assert!(!rc.is_connected());
    }

    #[test]
    fn test_run_duration_from_start_time() {
        let mut rc = controller();
        assert_eq!(rc.run_duration(), Duration::ZERO);
        rc.config_mut().run_started_at = Some(Utc::now() - chrono::Duration::seconds(90));
        let d = rc.run_duration().as_secs();
        assert!((90..=91).contains(&d));
    }

    fn assert_send<T: Send>(_: T) {}

    #[test]
    fn test_run_futures_can_be_spawned() {
        // The run span rides along with the future, so these stay Send
        let mut rc = controller();
        assert_send(rc.start_run());
        assert_send(rc.stop_run());
    }

    #[tokio::test]
    async fn test_transition_module_checks_range_and_order() {
        let mut rc = controller();
        assert!(matches!(
            rc.transition_module(9, true).await,
            Err(EmbassyError::UnknownEnvoy(9))
        ));
        // Offline modules have nowhere to go
        assert!(matches!(
            rc.transition_module(0, true).await,
            Err(EmbassyError::InvalidTransition(EccOperation::Invalid))
        ));
    }

    #[tokio::test]
    async fn test_frib_requires_configuration() {
        let mut rc = controller();
        assert!(matches!(
            rc.frib(FribOperation::Check).await,
            Err(EmbassyError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_when_not_connected() {
        let mut rc = controller();
        rc.disconnect().await.unwrap();
        rc.poll().unwrap();
    }
}
