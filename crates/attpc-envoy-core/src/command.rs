//! Shell script extensions.
//!
//! Some parts of running the GET DAQ are easier to do from a shell than from
//! the envoys: moving the .graw files into run directories, backing up the
//! ECC configuration, and checking whether a run number was already used on
//! the DataRouter machines. Each [`CommandName`] is tied to a script in the
//! configured script directory. Scripts are run with the configured shell
//! and report through their exit status.

use crate::config::PathConfig;
use crate::error::CommandError;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

const MOVE_GRAW_SCRIPT: &str = "move_graw.sh";
const BACKUP_CONFIG_SCRIPT: &str = "backup_configs.sh";
const TEST_GRAW_SCRIPT: &str = "test_graw.sh";

/// The outcome of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    Failure,
    CouldNotExecute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandName {
    MoveGrawFiles,
    BackupConfig,
    CheckRunExists,
}

impl std::fmt::Display for CommandName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MoveGrawFiles => write!(f, "MoveGrawFiles"),
            Self::BackupConfig => write!(f, "BackupConfig"),
            Self::CheckRunExists => write!(f, "CheckRunExists"),
        }
    }
}

impl CommandName {
    fn script(&self) -> &'static str {
        match self {
            Self::MoveGrawFiles => MOVE_GRAW_SCRIPT,
            Self::BackupConfig => BACKUP_CONFIG_SCRIPT,
            Self::CheckRunExists => TEST_GRAW_SCRIPT,
        }
    }
}

/// Where a DataRouter writes its data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRouterLocation {
    pub address: String,
    pub location: String,
}

#[derive(Debug, Clone)]
pub struct ScriptRunner {
    shell: String,
    script_dir: PathBuf,
    config_dir: PathBuf,
    backup_config_dir: PathBuf,
}

impl ScriptRunner {
    pub fn new(shell: &str, script_dir: PathBuf, config_dir: PathBuf, backup_config_dir: PathBuf) -> Self {
        Self {
            shell: shell.to_string(),
            script_dir,
            config_dir,
            backup_config_dir,
        }
    }

    pub fn from_paths(paths: &PathConfig) -> Self {
        Self::new(
            &paths.shell,
            paths.script_dir.clone(),
            paths.config_dir.clone(),
            paths.backup_config_dir.clone(),
        )
    }

    /// Run a command. Never fails; problems launching a script are logged
    /// and reported as [`CommandStatus::CouldNotExecute`].
    pub async fn execute(
        &self,
        command: CommandName,
        routers: &[DataRouterLocation],
        experiment: &str,
        run_number: i32,
    ) -> CommandStatus {
        let result = match command {
            CommandName::MoveGrawFiles => self.move_graw_files(routers, experiment, run_number).await,
            CommandName::BackupConfig => self.backup_config(experiment, run_number).await,
            CommandName::CheckRunExists => self.check_run_exists(routers, experiment, run_number).await,
        };
        match result {
            Ok(status) => {
                tracing::debug!(command = %command, ?status, "Command finished");
                status
            }
            Err(e) => {
                tracing::error!("Could not execute command {command}: {e}");
                CommandStatus::CouldNotExecute
            }
        }
    }

    /// Every router is attempted; any failure makes the whole command fail
    async fn move_graw_files(
        &self,
        routers: &[DataRouterLocation],
        experiment: &str,
        run_number: i32,
    ) -> Result<CommandStatus, CommandError> {
        let run = run_number.to_string();
        let mut status = CommandStatus::Success;
        for router in routers {
            let ok = self
                .run_script(
                    CommandName::MoveGrawFiles,
                    &[router.address.as_str(), router.location.as_str(), experiment, run.as_str()],
                )
                .await?;
            if !ok {
                tracing::warn!(address = %router.address, "Moving graw files failed");
                status = CommandStatus::Failure;
            }
        }
        Ok(status)
    }

    async fn backup_config(&self, experiment: &str, run_number: i32) -> Result<CommandStatus, CommandError> {
        let config = self.config_dir.to_string_lossy().into_owned();
        let backup = self.backup_config_dir.to_string_lossy().into_owned();
        let run = run_number.to_string();
        let ok = self
            .run_script(CommandName::BackupConfig, &[config.as_str(), backup.as_str(), experiment, run.as_str()])
            .await?;
        Ok(status_from(ok))
    }

    /// Success means the run directory already exists on the first router
    async fn check_run_exists(
        &self,
        routers: &[DataRouterLocation],
        experiment: &str,
        run_number: i32,
    ) -> Result<CommandStatus, CommandError> {
        let router = routers
            .first()
            .ok_or_else(|| CommandError::NoDataRouters(CommandName::CheckRunExists.to_string()))?;
        let run = run_number.to_string();
        let ok = self
            .run_script(
                CommandName::CheckRunExists,
                &[router.address.as_str(), router.location.as_str(), experiment, run.as_str()],
            )
            .await?;
        Ok(status_from(ok))
    }

    async fn run_script(&self, command: CommandName, args: &[&str]) -> Result<bool, CommandError> {
        let script = self.script_dir.join(command.script());
        let output = Command::new(&self.shell)
            .arg(&script)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                script: script.display().to_string(),
                source,
            })?;
        if !output.status.success() {
            tracing::debug!(
                script = %script.display(),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "Script exited with failure"
            );
        }
        Ok(output.status.success())
    }
}

fn status_from(ok: bool) -> CommandStatus {
    if ok {
        CommandStatus::Success
    } else {
        CommandStatus::Failure
    }
}
