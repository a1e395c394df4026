//! Aggregated status of every envoy.
//!
//! The StatusManager reads the messages drained from the embassy and keeps
//! the latest report of each module and DataRouter. It also answers the
//! system-wide questions (is everything Ready, is the MuTaNT Prepared, ...)
//! that the transition sequencing depends on.

use crate::command::DataRouterLocation;
use crate::config::{EnvoyConfig, MonitorKind, NetworkConfig};
use crate::constants::Topology;
use crate::ecc::{EccOperationResponse, EccStatus, EccStatusResponse};
use crate::error::EmbassyError;
use crate::message::{EmbassyMessage, MessageKind};
use crate::sentry::{SentryOperationResponse, SentryServerStatus, SentryStatus};
use crate::surveyor::{SurveyorResponse, SurveyorStatus};

#[derive(Debug)]
pub struct StatusManager {
    topology: Topology,
    monitor: MonitorKind,
    router_addresses: Vec<String>,
    ecc_status: Vec<EccStatusResponse>,
    ecc_holds: Vec<bool>,
    ecc_reported: Vec<bool>,
    surveyor_status: Vec<SurveyorResponse>,
    sentry_status: Vec<SentryStatus>,
    monitor_reported: Vec<bool>,
    sentry_answered: Vec<bool>,
}

impl StatusManager {
    pub fn new(topology: Topology, monitor: MonitorKind, network: &NetworkConfig) -> Self {
        let n_modules = topology.number_of_modules();
        let n_routers = topology.data_router_count();
        Self {
            topology,
            monitor,
            router_addresses: topology
                .cobo_ids()
                .into_iter()
                .map(|id| network.router_address(id))
                .collect(),
            ecc_status: vec![EccStatusResponse::default(); n_modules],
            ecc_holds: vec![false; n_modules],
            ecc_reported: vec![false; n_modules],
            surveyor_status: vec![SurveyorResponse::default(); n_routers],
            sentry_status: vec![SentryStatus::default(); n_routers],
            monitor_reported: vec![false; n_routers],
            sentry_answered: vec![false; n_routers],
        }
    }

    pub fn from_config(config: &EnvoyConfig) -> Self {
        Self::new(config.topology(), config.monitor, &config.network)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn monitor(&self) -> MonitorKind {
        self.monitor
    }

    /// Forget every report, as if no envoy had spoken yet
    pub fn reset(&mut self) {
        self.ecc_status.fill(EccStatusResponse::default());
        self.ecc_holds.fill(false);
        self.ecc_reported.fill(false);
        self.surveyor_status.fill(SurveyorResponse::default());
        self.sentry_status.fill(SentryStatus::default());
        self.monitor_reported.fill(false);
        self.sentry_answered.fill(false);
    }

    /// Fold a batch of embassy messages into the current status
    pub fn handle_messages(&mut self, messages: &[EmbassyMessage]) -> Result<(), EmbassyError> {
        for message in messages {
            let id = message.id;
            match message.kind {
                MessageKind::EccOperationResponse => {
                    let resp: EccOperationResponse = message.decode()?;
                    if resp.error_code != 0 {
                        tracing::error!(
                            module = id,
                            error_code = resp.error_code,
                            "ECC operation failed: {}",
                            resp.error_message
                        );
                    } else {
                        tracing::info!(module = id, "ECC operation completed");
                    }
                    if let Some(hold) = self.ecc_holds.get_mut(id) {
                        *hold = false;
                    }
                }
                MessageKind::EccStatus => {
                    let resp: EccStatusResponse = message.decode()?;
                    if resp.error_code != 0 {
                        tracing::error!(
                            module = id,
                            error_code = resp.error_code,
                            "ECC status failed: {}",
                            resp.error_message
                        );
                    }
                    if id < self.ecc_status.len() {
                        self.ecc_reported[id] = true;
                        if !self.ecc_holds[id] {
                            self.ecc_status[id] = resp;
                        }
                    }
                }
                MessageKind::SurveyorStatus => {
                    let resp: SurveyorResponse = message.decode()?;
                    if let Some(slot) = self.surveyor_status.get_mut(id) {
                        *slot = resp;
                        self.monitor_reported[id] = true;
                    }
                }
                MessageKind::SentryStatus => {
                    let resp: SentryStatus = message.decode()?;
                    if let Some(slot) = self.sentry_status.get_mut(id) {
                        *slot = resp;
                        self.monitor_reported[id] = true;
                    }
                }
                MessageKind::SentryOperationResponse => {
                    let resp: SentryOperationResponse = message.decode()?;
                    if resp.success {
                        tracing::info!(router = id, operation = %resp.operation, "Sentry operation completed");
                    } else {
                        tracing::error!(router = id, operation = %resp.operation, "Sentry operation failed");
                    }
                    if let Some(flag) = self.sentry_answered.get_mut(id) {
                        *flag = true;
                    }
                }
                MessageKind::FribResponse => {
                    tracing::info!("FRIBDAQ replied: {}", message.body);
                }
                kind => {
                    tracing::warn!("Received a message of kind {kind} which is not a valid receiving kind");
                }
            }
        }
        Ok(())
    }

    pub fn ecc_status_responses(&self) -> &[EccStatusResponse] {
        &self.ecc_status
    }

    /// The common status of every module, or Inconsistent if they differ
    pub fn system_ecc_status(&self) -> EccStatus {
        common_state(self.ecc_status.iter().map(|s| s.state))
            .map(EccStatus::from)
            .unwrap_or(EccStatus::Inconsistent)
    }

    pub fn is_system_ready(&self) -> bool {
        self.system_ecc_status() == EccStatus::Ready
    }

    pub fn is_system_running(&self) -> bool {
        self.system_ecc_status() == EccStatus::Running
    }

    /// Are all of the CoBos at `status` (the MuTaNT is not considered)
    fn all_cobos_at(&self, status: EccStatus) -> bool {
        let cobos = &self.ecc_status[..self.topology.mutant_id()];
        common_state(cobos.iter().map(|s| s.state)).map(EccStatus::from) == Some(status)
    }

    pub fn is_all_but_mutant_ready(&self) -> bool {
        self.all_cobos_at(EccStatus::Ready)
    }

    pub fn is_all_but_mutant_running(&self) -> bool {
        self.all_cobos_at(EccStatus::Running)
    }

    pub fn is_mutant_prepared(&self) -> bool {
        self.mutant_status() == EccStatus::Prepared
    }

    pub fn is_mutant_ready(&self) -> bool {
        self.mutant_status() == EccStatus::Ready
    }

    /// A stopped MuTaNT has returned to Ready
    pub fn is_mutant_stopped(&self) -> bool {
        self.mutant_status() == EccStatus::Ready
    }

    fn mutant_status(&self) -> EccStatus {
        self.ecc_status(self.topology.mutant_id())
    }

    /// Status of one module. Ids outside the topology read as Offline.
    pub fn ecc_status(&self, id: usize) -> EccStatus {
        self.ecc_status
            .get(id)
            .map(|s| EccStatus::from(s.state))
            .unwrap_or(EccStatus::Offline)
    }

    /// Mark a module Busy until its operation response arrives
    pub fn set_ecc_busy(&mut self, id: usize) {
        if !self.topology.contains(id) {
            return;
        }
        self.ecc_status[id].state = EccStatus::Busy.into();
        self.ecc_holds[id] = true;
    }

    /// Can this module progress, taking the MuTaNT/CoBo ordering into account.
    /// CoBos are only prepared after the MuTaNT, and the MuTaNT is only
    /// configured after every CoBo.
    pub fn can_ecc_go_forward(&self, id: usize) -> bool {
        let status = self.ecc_status(id);
        let is_mutant = self.topology.is_mutant(id);
        if status == EccStatus::Described && !is_mutant {
            matches!(self.mutant_status(), EccStatus::Prepared | EccStatus::Ready)
        } else if status == EccStatus::Prepared && is_mutant {
            self.is_all_but_mutant_ready()
        } else {
            status.can_go_forward()
        }
    }

    /// Is any module still waiting on an operation response
    pub fn has_pending_transitions(&self) -> bool {
        self.ecc_holds.iter().any(|h| *h)
    }

    pub fn can_ecc_go_backward(&self, id: usize) -> bool {
        self.ecc_status(id).can_go_backward()
    }

    pub fn surveyor_status_responses(&self) -> &[SurveyorResponse] {
        &self.surveyor_status
    }

    pub fn surveyor_system_status(&self) -> SurveyorStatus {
        common_state(self.surveyor_status.iter().map(|s| s.state))
            .map(SurveyorStatus::from)
            .unwrap_or(SurveyorStatus::Inconsistent)
    }

    pub fn surveyor_status(&self, id: usize) -> SurveyorStatus {
        self.surveyor_status
            .get(id)
            .map(|s| SurveyorStatus::from(s.state))
            .unwrap_or(SurveyorStatus::Invalid)
    }

    pub fn sentry_status_responses(&self) -> &[SentryStatus] {
        &self.sentry_status
    }

    pub fn sentry_system_status(&self) -> SentryServerStatus {
        let mut statuses = self.sentry_status.iter().map(SentryServerStatus::from);
        let Some(first) = statuses.next() else {
            return SentryServerStatus::Offline;
        };
        if statuses.all(|s| s == first) {
            first
        } else {
            SentryServerStatus::Inconsistent
        }
    }

    pub fn sentry_status(&self, id: usize) -> SentryServerStatus {
        self.sentry_status
            .get(id)
            .map(SentryServerStatus::from)
            .unwrap_or(SentryServerStatus::Offline)
    }

    pub fn reset_sentry_replies(&mut self) {
        self.sentry_answered.fill(false);
    }

    /// Has every Sentry answered the last catalog or backup request
    pub fn have_sentries_answered(&self) -> bool {
        self.sentry_answered.iter().all(|c| *c)
    }

    /// Has every module and every DataRouter monitor reported at least once
    pub fn has_full_status(&self) -> bool {
        self.ecc_reported.iter().all(|r| *r) && self.monitor_reported.iter().all(|r| *r)
    }

    /// Where each online DataRouter is writing, as reported by the active
    /// monitor
    pub fn data_router_locations(&self) -> Vec<DataRouterLocation> {
        match self.monitor {
            MonitorKind::Surveyor => self
                .surveyor_status
                .iter()
                .filter(|s| SurveyorStatus::from(s.state) == SurveyorStatus::Online)
                .map(|s| DataRouterLocation {
                    address: s.address.clone(),
                    location: s.location.clone(),
                })
                .collect(),
            MonitorKind::Sentry => self
                .sentry_status
                .iter()
                .zip(self.router_addresses.iter())
                .filter(|(s, _)| SentryServerStatus::from(*s) == SentryServerStatus::Online)
                .map(|(s, address)| DataRouterLocation {
                    address: address.clone(),
                    location: s.data_path.clone(),
                })
                .collect(),
        }
    }

    /// Latest data rate of each DataRouter in MB/s
    pub fn data_rates(&self) -> Vec<f64> {
        match self.monitor {
            MonitorKind::Surveyor => self.surveyor_status.iter().map(|s| s.data_rate).collect(),
            MonitorKind::Sentry => self.sentry_status.iter().map(|s| s.data_rate_mb).collect(),
        }
    }
}

/// The shared value if every item is equal. An empty set has none.
fn common_state(mut states: impl Iterator<Item = i32>) -> Option<i32> {
    let first = states.next()?;
    if states.all(|s| s == first) {
        Some(first)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecc::EccOperation;

    fn manager(n: usize, monitor: MonitorKind) -> StatusManager {
        StatusManager::new(Topology::new(n), monitor, &NetworkConfig::default())
    }

    fn status_msg(id: usize, status: EccStatus) -> EmbassyMessage {
        let resp = EccStatusResponse {
            state: status.into(),
            ..Default::default()
        };
        EmbassyMessage::compose(&resp, id).unwrap()
    }

    fn set_all(mgr: &mut StatusManager, status: EccStatus) {
        let msgs: Vec<_> = mgr.topology().all_ids().into_iter().map(|id| status_msg(id, status)).collect();
        mgr.handle_messages(&msgs).unwrap();
    }

    #[test]
    fn test_system_status_common_or_inconsistent() {
        let mut mgr = manager(3, MonitorKind::Sentry);
        assert_eq!(mgr.system_ecc_status(), EccStatus::Offline);
        set_all(&mut mgr, EccStatus::Ready);
        assert!(mgr.is_system_ready());
        mgr.handle_messages(&[status_msg(1, EccStatus::Running)]).unwrap();
        assert_eq!(mgr.system_ecc_status(), EccStatus::Inconsistent);
    }

    #[test]
    fn test_hold_blocks_status_until_response() {
        let mut mgr = manager(3, MonitorKind::Sentry);
        set_all(&mut mgr, EccStatus::Idle);
        mgr.set_ecc_busy(0);
        assert_eq!(mgr.ecc_status(0), EccStatus::Busy);
        assert!(mgr.has_pending_transitions());

        mgr.handle_messages(&[status_msg(0, EccStatus::Described)]).unwrap();
        assert_eq!(mgr.ecc_status(0), EccStatus::Busy);

        let done = EmbassyMessage::compose(&EccOperationResponse::default(), 0).unwrap();
        mgr.handle_messages(&[done, status_msg(0, EccStatus::Described)]).unwrap();
        assert_eq!(mgr.ecc_status(0), EccStatus::Described);
        assert!(!mgr.has_pending_transitions());
    }

    #[test]
    fn test_busy_outside_topology_is_ignored() {
        let mut mgr = manager(3, MonitorKind::Sentry);
        mgr.set_ecc_busy(5);
        assert_eq!(mgr.ecc_status(5), EccStatus::Offline);
    }

    #[test]
    fn test_mutant_ordering_rules() {
        let mut mgr = manager(3, MonitorKind::Sentry);
        set_all(&mut mgr, EccStatus::Described);
        // CoBos wait for the MuTaNT to be prepared
        assert!(!mgr.can_ecc_go_forward(0));
        assert!(mgr.can_ecc_go_forward(2));

        mgr.handle_messages(&[status_msg(2, EccStatus::Prepared)]).unwrap();
        assert!(mgr.can_ecc_go_forward(0));
        assert!(mgr.is_mutant_prepared());
        // MuTaNT waits for every CoBo to be ready
        assert!(!mgr.can_ecc_go_forward(2));

        mgr.handle_messages(&[status_msg(0, EccStatus::Ready), status_msg(1, EccStatus::Ready)])
            .unwrap();
        assert!(mgr.is_all_but_mutant_ready());
        assert!(mgr.can_ecc_go_forward(2));
    }

    #[test]
    fn test_mutant_stopped_means_ready() {
        let mut mgr = manager(2, MonitorKind::Sentry);
        mgr.handle_messages(&[status_msg(1, EccStatus::Running)]).unwrap();
        assert!(!mgr.is_mutant_stopped());
        mgr.handle_messages(&[status_msg(1, EccStatus::Ready)]).unwrap();
        assert!(mgr.is_mutant_stopped());
    }

    #[test]
    fn test_full_status_and_locations_with_surveyor() {
        let mut mgr = manager(3, MonitorKind::Surveyor);
        set_all(&mut mgr, EccStatus::Idle);
        assert!(!mgr.has_full_status());

        let online = SurveyorResponse {
            state: 1,
            address: String::from("192.168.41.60"),
            location: String::from("/data0"),
            data_rate: 1.5,
            ..Default::default()
        };
        mgr.handle_messages(&[
            EmbassyMessage::compose(&online, 0).unwrap(),
            EmbassyMessage::compose(&SurveyorResponse::default(), 1).unwrap(),
        ])
        .unwrap();
        assert!(mgr.has_full_status());
        assert_eq!(mgr.surveyor_system_status(), SurveyorStatus::Inconsistent);
        assert_eq!(mgr.surveyor_status(0), SurveyorStatus::Online);
        assert_eq!(mgr.data_rates(), vec![1.5, 0.0]);
        assert_eq!(
            mgr.data_router_locations(),
            vec![DataRouterLocation {
                address: String::from("192.168.41.60"),
                location: String::from("/data0"),
            }]
        );
    }

    #[test]
    fn test_sentry_locations_and_catalog() {
        let mut mgr = manager(3, MonitorKind::Sentry);
        let status = SentryStatus {
            disk: String::from("/dev/sdb1"),
            data_path: String::from("/data/e20009"),
            ..Default::default()
        };
        mgr.handle_messages(&[EmbassyMessage::compose(&status, 1).unwrap()])
            .unwrap();
        assert_eq!(mgr.sentry_status(1), SentryServerStatus::Online);
        assert_eq!(mgr.sentry_system_status(), SentryServerStatus::Inconsistent);
        assert_eq!(
            mgr.data_router_locations(),
            vec![DataRouterLocation {
                address: String::from("192.168.41.61"),
                location: String::from("/data/e20009"),
            }]
        );

        assert!(!mgr.have_sentries_answered());
        let reply = SentryOperationResponse {
            operation: String::from("Catalog"),
            success: true,
            status: SentryStatus::default(),
        };
        let msgs: Vec<_> = (0..2)
            .map(|id| EmbassyMessage::compose(&reply, id).unwrap())
            .collect();
        mgr.handle_messages(&msgs).unwrap();
        assert!(mgr.have_sentries_answered());
        mgr.reset_sentry_replies();
        assert!(!mgr.have_sentries_answered());
    }

    #[test]
    fn test_wrong_payload_is_an_error() {
        let mut mgr = manager(2, MonitorKind::Sentry);
        let bad = EmbassyMessage {
            kind: MessageKind::EccStatus,
            id: 0,
            body: String::from("not json"),
        };
        assert!(mgr.handle_messages(&[bad]).is_err());
        // outgoing kinds are only logged
        let op = EmbassyMessage::compose(&EccOperation::Start, 0).unwrap();
        assert!(mgr.handle_messages(&[op]).is_ok());
    }

    #[test]
    fn test_reset_clears_reports() {
        let mut mgr = manager(2, MonitorKind::Sentry);
        set_all(&mut mgr, EccStatus::Ready);
        mgr.reset();
        assert_eq!(mgr.system_ecc_status(), EccStatus::Offline);
        assert!(!mgr.has_full_status());
    }
}
