//! FRIBDAQ run-control envoy. Plain text commands over TCP.

pub mod envoy;
pub mod operation;

pub use envoy::{startup_frib_envoy, FribEnvoy};
pub use operation::{FribOperation, FribResponse, FribStatus};
