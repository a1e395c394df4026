//! Sequencing of ECC transitions and run operations.
//!
//! Some transitions must happen in a particular order: the MuTaNT is
//! prepared before the CoBos, and configured after them. A run starts every
//! CoBo before the MuTaNT and stops the MuTaNT before the CoBos. The helpers
//! here submit operations through the [`Embassy`] and wait on the
//! [`StatusManager`] until the system reaches the state the next step needs.
//! Every wait is bounded; an expired wait is [`EmbassyError::Timeout`].

use crate::config::MonitorKind;
use crate::ecc::{EccOperation, EccStatus};
use crate::embassy::Embassy;
use crate::error::EmbassyError;
use crate::message::EmbassyMessage;
use crate::obs;
use crate::sentry::{SentryOperation, SentryParameters};
use crate::status_manager::StatusManager;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

const COBO_DESCRIBE_DIR: &str = "describe-cobo";

/// Move every message the envoys have sent into the status manager
pub fn poll_embassy(embassy: &mut Embassy, status: &mut StatusManager) -> Result<(), EmbassyError> {
    if !embassy.is_connected() {
        return Ok(());
    }
    let messages = embassy.poll_messages()?;
    status.handle_messages(&messages)
}

/// Wait until `predicate` holds, feeding envoy messages to the status
/// manager as they arrive
pub async fn wait_for<F>(
    embassy: &mut Embassy,
    status: &mut StatusManager,
    timeout: Duration,
    waiting_for: &str,
    predicate: F,
) -> Result<(), EmbassyError>
where
    F: Fn(&StatusManager) -> bool,
{
    let deadline = Instant::now() + timeout;
    poll_embassy(embassy, status)?;
    while !predicate(status) {
        match tokio::time::timeout_at(deadline, embassy.next_message()).await {
            Ok(message) => status.handle_messages(&[message?])?,
            Err(_) => {
                return Err(EmbassyError::Timeout {
                    waiting_for: waiting_for.to_string(),
                    seconds: timeout.as_secs(),
                })
            }
        }
    }
    Ok(())
}

/// Send a transition to some modules. The operation for each module comes
/// from its last reported status; modules without a valid operation are
/// skipped. Every addressed module is held Busy until its envoy replies.
pub async fn transition_ecc(
    embassy: &mut Embassy,
    status: &mut StatusManager,
    ids: &[usize],
    is_forward: bool,
) -> Result<(), EmbassyError> {
    if ids.is_empty() {
        return Ok(());
    }
    if !embassy.is_connected() {
        tracing::error!("Attempted an ECC transition while disconnected");
        return Ok(());
    }
    for &id in ids {
        let current = status.ecc_status(id);
        let operation = if is_forward {
            current.forward_operation()
        } else {
            current.backward_operation()
        };
        if operation == EccOperation::Invalid {
            tracing::debug!(module = id, status = %current, "No transition available");
            continue;
        }
        embassy
            .submit_message(EmbassyMessage::compose(&operation, id)?)
            .await?;
        obs::emit_transition_submitted(id, operation.as_str());
        status.set_ecc_busy(id);
    }
    Ok(())
}

/// Progress every module one step, honoring the MuTaNT/CoBo ordering
pub async fn forward_transition_all(
    embassy: &mut Embassy,
    status: &mut StatusManager,
    timeout: Duration,
) -> Result<(), EmbassyError> {
    let topology = *status.topology();
    let cobos = topology.cobo_ids();
    let mutant = [topology.mutant_id()];
    match status.system_ecc_status().forward_operation() {
        EccOperation::Describe => transition_ecc(embassy, status, &topology.all_ids(), true).await,
        EccOperation::Prepare => {
            transition_ecc(embassy, status, &mutant, true).await?;
            wait_for(embassy, status, timeout, "MuTaNT prepared", |s| {
                s.is_mutant_prepared()
            })
            .await?;
            transition_ecc(embassy, status, &cobos, true).await
        }
        EccOperation::Configure => {
            transition_ecc(embassy, status, &cobos, true).await?;
            wait_for(embassy, status, timeout, "CoBos ready", |s| {
                s.is_all_but_mutant_ready()
            })
            .await?;
            transition_ecc(embassy, status, &mutant, true).await
        }
        op => Err(EmbassyError::InvalidTransition(op)),
    }
}

/// Regress every module one step. Order does not matter going backward.
pub async fn backward_transition_all(
    embassy: &mut Embassy,
    status: &mut StatusManager,
) -> Result<(), EmbassyError> {
    let ids = status.topology().all_ids();
    transition_ecc(embassy, status, &ids, false).await
}

pub async fn start_mutant(embassy: &mut Embassy, status: &StatusManager) -> Result<(), EmbassyError> {
    let id = status.topology().mutant_id();
    submit_operation(embassy, EccOperation::Start, id).await
}

/// Stop the MuTaNT and wait until it is back at Ready
pub async fn stop_mutant(
    embassy: &mut Embassy,
    status: &mut StatusManager,
    timeout: Duration,
) -> Result<(), EmbassyError> {
    let id = status.topology().mutant_id();
    submit_operation(embassy, EccOperation::Stop, id).await?;
    wait_for(embassy, status, timeout, "MuTaNT stopped", |s| {
        s.is_mutant_stopped()
    })
    .await
}

/// Start every CoBo and wait until they are all Running
pub async fn start_cobos(
    embassy: &mut Embassy,
    status: &mut StatusManager,
    timeout: Duration,
) -> Result<(), EmbassyError> {
    for id in status.topology().cobo_ids() {
        submit_operation(embassy, EccOperation::Start, id).await?;
    }
    wait_for(embassy, status, timeout, "CoBos running", |s| {
        s.is_all_but_mutant_running()
    })
    .await
}

pub async fn stop_cobos(embassy: &mut Embassy, status: &StatusManager) -> Result<(), EmbassyError> {
    for id in status.topology().cobo_ids() {
        submit_operation(embassy, EccOperation::Stop, id).await?;
    }
    Ok(())
}

/// Regress the MuTaNT to Prepared and configure it again. This resets the
/// event numbers and timestamps before a new run.
pub async fn reconfigure_mutant(
    embassy: &mut Embassy,
    status: &mut StatusManager,
    timeout: Duration,
) -> Result<(), EmbassyError> {
    let mutant = [status.topology().mutant_id()];
    if status.ecc_status(mutant[0]) != EccStatus::Ready {
        tracing::warn!("MuTaNT is not Ready; reconfiguring anyway");
    }
    transition_ecc(embassy, status, &mutant, false).await?;
    wait_for(embassy, status, timeout, "MuTaNT prepared", |s| {
        s.is_mutant_prepared()
    })
    .await?;
    transition_ecc(embassy, status, &mutant, true).await?;
    wait_for(embassy, status, timeout, "MuTaNT ready", |s| s.is_mutant_ready()).await
}

/// Ask every Sentry to catalog the run and wait until all have answered
pub async fn catalog_run(
    embassy: &mut Embassy,
    status: &mut StatusManager,
    experiment: &str,
    run_number: i32,
    timeout: Duration,
) -> Result<(), EmbassyError> {
    let operation = SentryOperation::Catalog(SentryParameters {
        experiment: experiment.to_string(),
        run_number,
    });
    sentry_operation(embassy, status, operation, timeout, "Sentry catalog").await
}

/// Ask every Sentry to back up the run data and wait until all have answered
pub async fn backup_sentries(
    embassy: &mut Embassy,
    status: &mut StatusManager,
    experiment: &str,
    run_number: i32,
    timeout: Duration,
) -> Result<(), EmbassyError> {
    let operation = SentryOperation::Backup(SentryParameters {
        experiment: experiment.to_string(),
        run_number,
    });
    sentry_operation(embassy, status, operation, timeout, "Sentry backup").await
}

async fn sentry_operation(
    embassy: &mut Embassy,
    status: &mut StatusManager,
    operation: SentryOperation,
    timeout: Duration,
    waiting_for: &str,
) -> Result<(), EmbassyError> {
    if status.monitor() != MonitorKind::Sentry {
        tracing::warn!("{waiting_for} requested but the DataRouters are not monitored by Sentry");
        return Ok(());
    }
    status.reset_sentry_replies();
    embassy
        .submit_message(EmbassyMessage::compose(&operation, 0)?)
        .await?;
    wait_for(embassy, status, timeout, waiting_for, |s| {
        s.have_sentries_answered()
    })
    .await
}

async fn submit_operation(embassy: &Embassy, op: EccOperation, id: usize) -> Result<(), EmbassyError> {
    embassy.submit_message(EmbassyMessage::compose(&op, id)?).await?;
    obs::emit_transition_submitted(id, op.as_str());
    Ok(())
}

/// Copy the ECC configuration of an experiment into
/// `<backup_dir>/<experiment>/run_<NNNN>/`. Returns the backup directory.
pub fn backup_configs(
    config_dir: &Path,
    backup_dir: &Path,
    experiment: &str,
    run_number: i32,
) -> std::io::Result<PathBuf> {
    let cobo_dir = config_dir.join(COBO_DESCRIBE_DIR);
    let run_backup = backup_dir
        .join(experiment)
        .join(format!("run_{run_number:04}"));
    let cobo_backup = run_backup.join(COBO_DESCRIBE_DIR);
    std::fs::create_dir_all(&cobo_backup)?;

    for stage in ["prepare", "describe", "configure"] {
        let name = format!("{stage}-{experiment}.xcfg");
        std::fs::copy(config_dir.join(&name), run_backup.join(&name))?;
    }

    for entry in std::fs::read_dir(&cobo_dir)? {
        let path = entry?.path();
        if let (true, Some(name)) = (path.is_file(), path.file_name()) {
            std::fs::copy(&path, cobo_backup.join(name))?;
        }
    }
    tracing::info!(path = %run_backup.display(), "Backed up ECC configuration");
    Ok(run_backup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::constants::Topology;

    #[test]
    fn test_backup_configs_layout() {
        let config = tempfile::tempdir().unwrap();
        let backup = tempfile::tempdir().unwrap();
        for stage in ["prepare", "describe", "configure"] {
            std::fs::write(config.path().join(format!("{stage}-e20009.xcfg")), stage).unwrap();
        }
        std::fs::create_dir(config.path().join("describe-cobo")).unwrap();
        std::fs::write(config.path().join("describe-cobo/cobo0.xcfg"), "c0").unwrap();
        std::fs::write(config.path().join("describe-cobo/cobo1.xcfg"), "c1").unwrap();

        let out = backup_configs(config.path(), backup.path(), "e20009", 7).unwrap();
        assert_eq!(out, backup.path().join("e20009/run_0007"));
        assert_eq!(
            std::fs::read_to_string(out.join("configure-e20009.xcfg")).unwrap(),
            "configure"
        );
        assert_eq!(
            std::fs::read_to_string(out.join("describe-cobo/cobo1.xcfg")).unwrap(),
            "c1"
        );
    }

    #[test]
    fn test_backup_configs_missing_file() {
        let config = tempfile::tempdir().unwrap();
        let backup = tempfile::tempdir().unwrap();
        assert!(backup_configs(config.path(), backup.path(), "e20009", 1).is_err());
    }

    #[tokio::test]
    async fn test_transition_while_disconnected_is_noop() {
        let mut embassy = Embassy::new();
        let mut status =
            StatusManager::new(Topology::new(3), MonitorKind::Sentry, &NetworkConfig::default());
        transition_ecc(&mut embassy, &mut status, &[0, 1], true)
            .await
            .unwrap();
        assert_eq!(status.ecc_status(0), EccStatus::Offline);
    }

    #[tokio::test]
    async fn test_forward_from_offline_is_invalid() {
        let mut embassy = Embassy::new();
        let mut status =
            StatusManager::new(Topology::new(3), MonitorKind::Sentry, &NetworkConfig::default());
        let err = forward_transition_all(&mut embassy, &mut status, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EmbassyError::InvalidTransition(EccOperation::Invalid)));
    }

    #[tokio::test]
    async fn test_wait_for_disconnected_embassy_errors() {
        let mut embassy = Embassy::new();
        let mut status =
            StatusManager::new(Topology::new(3), MonitorKind::Sentry, &NetworkConfig::default());
        let err = wait_for(&mut embassy, &mut status, Duration::from_millis(10), "never", |_| false)
            .await
            .unwrap_err();
        assert!(matches!(err, EmbassyError::NotConnected));
    }

    #[tokio::test]
    async fn test_sentry_operations_skipped_without_sentry() {
        let mut embassy = Embassy::new();
        let mut status =
            StatusManager::new(Topology::new(3), MonitorKind::Surveyor, &NetworkConfig::default());
        catalog_run(&mut embassy, &mut status, "e20009", 1, Duration::from_millis(10))
            .await
            .unwrap();
        backup_sentries(&mut embassy, &mut status, "e20009", 1, Duration::from_millis(10))
            .await
            .unwrap();
    }
}
