//! ECC envoys: the GET ECC server state machine and its SOAP transport.

pub mod envoy;
pub mod operation;
pub mod soap;

pub use envoy::{startup_ecc_envoys, EccConfig, EccEnvoy, EccOperationResponse, EccStatusResponse};
pub use operation::{EccOperation, EccStatus};
