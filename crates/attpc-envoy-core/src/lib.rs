//! # attpc_envoy_core
//!
//! Control of the AT-TPC GET data acquisition.
//!
//! Every remote service of the DAQ is represented by an *envoy*: an async
//! task that talks to exactly one endpoint.
//!
//! - [`ecc`]: the GET ECC servers driving the CoBos and the MuTaNT (SOAP)
//! - [`surveyor`]: the DataRouter status pages
//! - [`sentry`]: the DataRouter JSON API, including catalog and backup
//! - [`frib`]: the optional FRIBDAQ run-control link (plain TCP)
//!
//! The [`embassy::Embassy`] owns the channels to every envoy. The
//! [`status_manager::StatusManager`] folds what the envoys report into a
//! system view, and [`transition`] sequences operations over both.
//! [`run_control::RunController`] bundles everything behind the operations
//! an operator uses: connect, progress, regress, start and stop a run.
//!
//! The envoys and the embassy need a tokio runtime.

pub mod command;
pub mod config;
pub mod constants;
pub mod ecc;
pub mod embassy;
pub mod error;
pub mod frib;
pub mod message;
pub mod obs;
pub mod rate_graph;
pub mod run_control;
pub mod run_table;
pub mod sentry;
pub mod status_manager;
pub mod surveyor;
pub mod telemetry;
pub mod time_format;
pub mod transition;

pub use config::{EnvoyConfig, MonitorKind};
pub use constants::Topology;
pub use embassy::{Embassy, EnvoyPlan};
pub use error::{CommandError, ConfigError, EmbassyError, EnvoyError, RunTableError};
pub use message::{EmbassyMessage, MessageKind, MessagePayload};
pub use run_control::{RunController, StartOutcome};
pub use status_manager::StatusManager;
pub use telemetry::init_tracing;
