//! Constants and module topology for the GET DAQ network.

/// Number of GET modules (11 CoBos and the MuTaNT)
pub const NUMBER_OF_MODULES: usize = 12;
/// Module id of the MuTaNT, always the last module
pub const MUTANT_ID: usize = 11;
/// Transport used by the DataRouter links
pub const PROTOCOL: &str = "TCP";
pub const DATA_ROUTER_LISTENER_PORT: u16 = 46005;
pub const DATA_EXPORTER_LISTENER_PORT: u16 = 46007;
/// First three octets of the DAQ private network
pub const ADDRESS_START: &str = "192.168.41";
/// CoBo `n` lives at `ADDRESS_START.(HOST_OFFSET + n)`
pub const HOST_OFFSET: usize = 60;
pub const ECC_URL_PORT: u16 = 8083;
pub const SURVEYOR_URL_PORT: u16 = 8081;
pub const SENTRY_PORT: u16 = 8080;

/// Shape of the module set. The MuTaNT is always the last module, and every
/// module before it is a CoBo with a DataRouter attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    number_of_modules: usize,
    mutant_id: usize,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            number_of_modules: NUMBER_OF_MODULES,
            mutant_id: MUTANT_ID,
        }
    }
}

impl Topology {
    /// Create a topology with `number_of_modules` modules (at least one CoBo
    /// plus the MuTaNT). Smaller values are clamped to two.
    pub fn new(number_of_modules: usize) -> Self {
        let number_of_modules = number_of_modules.max(2);
        Self {
            number_of_modules,
            mutant_id: number_of_modules - 1,
        }
    }

    pub fn number_of_modules(&self) -> usize {
        self.number_of_modules
    }

    pub fn mutant_id(&self) -> usize {
        self.mutant_id
    }

    /// Number of DataRouters (one per CoBo)
    pub fn data_router_count(&self) -> usize {
        self.number_of_modules - 1
    }

    /// Every module id
    pub fn all_ids(&self) -> Vec<usize> {
        (0..self.number_of_modules).collect()
    }

    /// Every CoBo id (everything but the MuTaNT)
    pub fn cobo_ids(&self) -> Vec<usize> {
        (0..self.mutant_id).collect()
    }

    pub fn is_mutant(&self, id: usize) -> bool {
        id == self.mutant_id
    }

    pub fn contains(&self, id: usize) -> bool {
        id < self.number_of_modules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topology_matches_constants() {
        let topo = Topology::default();
        assert_eq!(topo.number_of_modules(), NUMBER_OF_MODULES);
        assert_eq!(topo.mutant_id(), MUTANT_ID);
        assert_eq!(topo.data_router_count(), 11);
        assert_eq!(topo.cobo_ids().len(), 11);
        assert!(!topo.cobo_ids().contains(&MUTANT_ID));
    }

    #[test]
    fn test_small_topology_keeps_mutant_last() {
        let topo = Topology::new(2);
        assert_eq!(topo.mutant_id(), 1);
        assert_eq!(topo.cobo_ids(), vec![0]);
        assert_eq!(topo.all_ids(), vec![0, 1]);
        assert!(topo.is_mutant(1));
        assert!(!topo.contains(2));
    }

    #[test]
    fn test_topology_clamps_to_one_cobo() {
        let topo = Topology::new(0);
        assert_eq!(topo.number_of_modules(), 2);
    }
}
