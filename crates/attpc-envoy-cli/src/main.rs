//! AT-TPC envoy - run control for the GET DAQ
//!
//! The `attpc_envoy` command connects to the ECC servers, the DataRouters and
//! optionally FRIBDAQ, and drives the acquisition through its states.
//!
//! ## Commands
//!
//! - `init`: Write a default configuration file
//! - `status`: Print the state of every module and DataRouter
//! - `watch`: Keep printing status until interrupted
//! - `progress` / `regress`: Move the whole system one step
//! - `start-run` / `stop-run`: Start or stop a data-taking run
//! - `catalog`: Ask the Sentries to catalog the current run
//! - `sentry-backup`: Ask the Sentries to back up the current run

use anyhow::{bail, Context, Result};
use attpc_envoy_core::frib::FribOperation;
use attpc_envoy_core::surveyor::SurveyorResponse;
use attpc_envoy_core::time_format::pretty_elapsed_time;
use attpc_envoy_core::{transition, EnvoyConfig, MonitorKind, RunController, StartOutcome};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "attpc_envoy")]
#[command(author = "AT-TPC Group")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run control for the AT-TPC GET data acquisition", long_about = None)]
struct Cli {
    /// Path to the YAML configuration
    #[arg(short, long, global = true, env = "ATTPC_ENVOY_CONFIG", default_value = "envoy.yml")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Connect, print the status of the whole system, and disconnect
    Status,

    /// Keep polling and printing the system status until Ctrl-C
    Watch {
        /// Seconds between status lines
        #[arg(long, default_value_t = 2)]
        every: u64,
    },

    /// Move every module one state forward
    Progress,

    /// Move every module one state backward
    Regress,

    /// Move a single module
    Transition {
        /// Module id (the MuTaNT is the last id)
        #[arg(short, long)]
        module: usize,

        #[arg(short, long, value_enum, default_value_t = Direction::Forward)]
        direction: Direction,
    },

    /// Start a run with the configured run number
    StartRun,

    /// Stop the current run, log it, and advance the run number
    StopRun,

    /// Ask the Sentries to catalog the current run
    Catalog,

    /// Ask the Sentries to back up the current run
    SentryBackup,

    /// Copy the ECC configuration files into the backup directory
    BackupConfigs,

    /// Send a run-control command to FRIBDAQ
    Frib {
        #[arg(value_enum)]
        command: FribCommand,
    },

    /// Add or overwrite a custom field of the run log
    AddField { name: String, value: String },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Direction {
    Forward,
    Backward,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FribCommand {
    Begin,
    End,
    State,
}

impl From<FribCommand> for FribOperation {
    fn from(value: FribCommand) -> Self {
        match value {
            FribCommand::Begin => FribOperation::Begin,
            FribCommand::End => FribOperation::End,
            FribCommand::State => FribOperation::Check,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    attpc_envoy_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Init { force } => cmd_init(&cli.config, force),
        Commands::AddField { name, value } => cmd_add_field(&cli.config, name, value),
        Commands::BackupConfigs => cmd_backup_configs(&cli.config),
        command => {
            let config = load_config(&cli.config)?;
            run_connected(RunController::new(config), command).await
        }
    }
}

fn load_config(path: &Path) -> Result<EnvoyConfig> {
    EnvoyConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let config = EnvoyConfig {
        path: path.to_path_buf(),
        ..Default::default()
    };
    config
        .save()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote default configuration to {}", path.display());
    println!("✓ Configuration written to {}", path.display());
    Ok(())
}

fn cmd_add_field(path: &Path, name: String, value: String) -> Result<()> {
    if name.trim().is_empty() {
        bail!("Field name must not be empty");
    }
    let mut config = load_config(path)?;
    println!("  {name} = {value}");
    config.add_field(name, value);
    config.save().context("Failed to save configuration")?;
    Ok(())
}

fn cmd_backup_configs(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let out = transition::backup_configs(
        &config.paths.config_dir,
        &config.paths.backup_config_dir,
        &config.experiment,
        config.run_number,
    )
    .context("Failed to back up ECC configuration")?;
    println!("✓ Configuration backed up to {}", out.display());
    Ok(())
}

/// Connect, run one command, and always disconnect afterwards
async fn run_connected(mut rc: RunController, command: Commands) -> Result<()> {
    rc.connect();
    let result = dispatch(&mut rc, command).await;
    let shutdown = rc.disconnect().await;
    result?;
    shutdown.context("Failed to shut down the envoys cleanly")?;
    Ok(())
}

async fn dispatch(rc: &mut RunController, command: Commands) -> Result<()> {
    rc.wait_for_full_status()
        .await
        .context("Not every envoy reported a status")?;

    match command {
        Commands::Status => {
            print_status(rc);
            Ok(())
        }
        Commands::Watch { every } => cmd_watch(rc, Duration::from_secs(every.max(1))).await,
        Commands::Progress => {
            rc.progress().await.context("Progress failed")?;
            settle(rc).await
        }
        Commands::Regress => {
            rc.regress().await.context("Regress failed")?;
            settle(rc).await
        }
        Commands::Transition { module, direction } => {
            let forward = matches!(direction, Direction::Forward);
            rc.transition_module(module, forward)
                .await
                .with_context(|| format!("Could not transition module {module}"))?;
            settle(rc).await
        }
        Commands::StartRun => cmd_start_run(rc).await,
        Commands::StopRun => cmd_stop_run(rc).await,
        Commands::Catalog => {
            if rc.config().monitor != MonitorKind::Sentry {
                warn!("Catalog needs the Sentry monitor; nothing to do");
                return Ok(());
            }
            rc.catalog().await.context("Catalog failed")?;
            println!("✓ Run {} cataloged", rc.config().run_number);
            Ok(())
        }
        Commands::SentryBackup => {
            if rc.config().monitor != MonitorKind::Sentry {
                warn!("Sentry backup needs the Sentry monitor; nothing to do");
                return Ok(());
            }
            rc.backup_sentries().await.context("Sentry backup failed")?;
            println!("✓ Run {} backed up by the Sentries", rc.config().run_number);
            Ok(())
        }
        Commands::Frib { command } => {
            let response = rc
                .frib(command.into())
                .await
                .context("FRIBDAQ request failed")?;
            println!("{}: {} {}", response.operation, response.status, response.text);
            Ok(())
        }
        Commands::Init { .. } | Commands::AddField { .. } | Commands::BackupConfigs => {
            bail!("This command does not talk to the DAQ")
        }
    }
}

/// Wait for every transition reply, then show where the system ended up
async fn settle(rc: &mut RunController) -> Result<()> {
    rc.wait_for_transitions()
        .await
        .context("Modules did not answer the transition")?;
    print_status(rc);
    Ok(())
}

async fn cmd_start_run(rc: &mut RunController) -> Result<()> {
    if !rc.status().is_system_ready() {
        bail!(
            "The system must be Ready to start a run (currently {})",
            rc.status().system_ecc_status()
        );
    }
    let run_number = rc.config().run_number;
    match rc.start_run().await.context("Failed to start the run")? {
        StartOutcome::Started => {
            println!("✓ Run {run_number} started");
            Ok(())
        }
        StartOutcome::RunNumberUsed => {
            bail!("Run {run_number} already has data; change the run number")
        }
        StartOutcome::CheckFailed => bail!("Could not check whether run {run_number} exists"),
    }
}

async fn cmd_stop_run(rc: &mut RunController) -> Result<()> {
    if !rc.status().is_system_running() {
        bail!(
            "No run is going (system is {})",
            rc.status().system_ecc_status()
        );
    }
    let run_number = rc.config().run_number;
    let duration = rc.run_duration();
    rc.stop_run().await.context("Failed to stop the run")?;
    println!(
        "✓ Run {run_number} stopped after {}",
        pretty_elapsed_time(duration.as_secs())
    );
    println!("  Next run number: {}", rc.config().run_number);
    Ok(())
}

async fn cmd_watch(rc: &mut RunController, every: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; disconnecting");
                return Ok(());
            }
            _ = ticker.tick() => {
                rc.poll().context("Failed to poll the envoys")?;
                println!("{}", status_line(rc));
            }
        }
    }
}

fn status_line(rc: &RunController) -> String {
    let status = rc.status();
    let mut line = format!(
        "[{}] run {} | ECC: {}",
        rc.config().experiment,
        rc.config().run_number,
        status.system_ecc_status()
    );
    match status.monitor() {
        MonitorKind::Sentry => line.push_str(&format!(" | Sentry: {}", status.sentry_system_status())),
        MonitorKind::Surveyor => {
            line.push_str(&format!(" | Surveyor: {}", status.surveyor_system_status()))
        }
    }
    if status.is_system_running() {
        let total: f64 = status.data_rates().iter().sum();
        line.push_str(&format!(
            " | {} | {total:.2} MB/s",
            pretty_elapsed_time(rc.run_duration().as_secs())
        ));
    }
    line
}

fn print_status(rc: &RunController) {
    let status = rc.status();
    let topology = status.topology();
    println!("Experiment: {}  Run: {}", rc.config().experiment, rc.config().run_number);
    println!("System: {}", status.system_ecc_status());
    println!();
    println!("{:<8} {:<12}", "Module", "State");
    for id in topology.all_ids() {
        let name = if id == topology.mutant_id() {
            String::from("MuTaNT")
        } else {
            format!("CoBo {id}")
        };
        println!("{:<8} {:<12}", name, status.ecc_status(id).to_string());
    }
    println!();
    match status.monitor() {
        MonitorKind::Sentry => {
            println!("{:<8} {:<12} {:>10} {:>10}", "Router", "Sentry", "Written", "Rate");
            for (id, s) in status.sentry_status_responses().iter().enumerate() {
                println!(
                    "{:<8} {:<12} {:>7.2} GB {:>5.2} MB/s",
                    id,
                    status.sentry_status(id).to_string(),
                    s.data_written_gb,
                    s.data_rate_mb
                );
            }
        }
        MonitorKind::Surveyor => {
            println!(
                "{:<8} {:<14} {:<20} {:>8} {:>10}",
                "Router", "Surveyor", "Location", "Files", "Rate"
            );
            for (id, s) in status.surveyor_status_responses().iter().enumerate() {
                let state = status.surveyor_status(id).to_string();
                println!("{}", surveyor_row(id, &state, s));
            }
        }
    }
    if status.is_system_running() {
        println!();
        println!("Run time: {}", pretty_elapsed_time(rc.run_duration().as_secs()));
    }
}

fn surveyor_row(id: usize, state: &str, s: &SurveyorResponse) -> String {
    format!(
        "{:<8} {:<14} {:<20} {:>8} {:>5.2} MB/s",
        id, state, s.location, s.files, s.data_rate
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_global_config() {
        let cli = Cli::try_parse_from([
            "attpc_envoy",
            "transition",
            "--module",
            "3",
            "--direction",
            "backward",
            "--config",
            "/tmp/e20009.yml",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/e20009.yml"));
        match cli.command {
            Commands::Transition { module, direction } => {
                assert_eq!(module, 3);
                assert!(matches!(direction, Direction::Backward));
            }
            _ => panic!("expected transition"),
        }
    }

    #[test]
    fn test_frib_command_maps_to_operation() {
        assert_eq!(FribOperation::from(FribCommand::State), FribOperation::Check);
        let cli = Cli::try_parse_from(["attpc_envoy", "frib", "begin"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Frib {
                command: FribCommand::Begin
            }
        ));
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("envoy.yml");
        cmd_init(&path, false).unwrap();
        assert!(cmd_init(&path, false).is_err());
        cmd_init(&path, true).unwrap();
        let config = EnvoyConfig::load(&path).unwrap();
        assert_eq!(config.path, path);
    }

    #[test]
    fn test_add_field_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("envoy.yml");
        cmd_init(&path, false).unwrap();
        cmd_add_field(&path, String::from("Shift"), String::from("owl")).unwrap();
        let config = EnvoyConfig::load(&path).unwrap();
        assert_eq!(config.fields.get("Shift").map(String::as_str), Some("owl"));
        assert!(cmd_add_field(&path, String::from(" "), String::from("x")).is_err());
    }

    #[test]
    fn test_sentry_backup_parses() {
        let cli = Cli::try_parse_from(["attpc_envoy", "sentry-backup"]).unwrap();
        assert!(matches!(cli.command, Commands::SentryBackup));
    }

    #[test]
    fn test_surveyor_row_leads_with_router_id() {
        let s = SurveyorResponse {
            location: String::from("/data/e20009"),
            files: 12,
            data_rate: 3.5,
            ..Default::default()
        };
        let row = surveyor_row(4, "Online", &s);
        let cells: Vec<&str> = row.split_whitespace().collect();
        assert_eq!(cells, ["4", "Online", "/data/e20009", "12", "3.50", "MB/s"]);
    }

    #[test]
    fn test_status_line_for_fresh_controller() {
        let mut config = EnvoyConfig::default();
        config.network.number_of_modules = 3;
        let rc = RunController::new(config);
        let line = status_line(&rc);
        assert!(line.starts_with("[Exp] run 0 | ECC: "));
        assert!(line.contains("Sentry"));
    }
}
