//! Well-known database sockets.

use std::path::Path;

/// A database served on a unix socket in the OVS run directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// Database name.
    pub database: &'static str,
    /// Socket file name.
    pub socket: &'static str,
}

impl Endpoint {
    /// Remote string for this endpoint under `rundir`.
    pub fn remote(&self, rundir: &Path) -> String {
        format!("unix:{}", rundir.join(self.socket).display())
    }
}

/// OVN northbound database.
pub const NORTHBOUND: Endpoint = Endpoint {
    database: "OVN_Northbound",
    socket: "ovnnb_db.sock",
};

/// OVN southbound database.
pub const SOUTHBOUND: Endpoint = Endpoint {
    database: "OVN_Southbound",
    socket: "ovnsb_db.sock",
};

/// Open vSwitch database.
pub const OPEN_VSWITCH: Endpoint = Endpoint {
    database: "Open_vSwitch",
    socket: "db.sock",
};

/// Default OVS run directory.
pub const DEFAULT_RUNDIR: &str = "/var/run/openvswitch";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remotes() {
        let rundir = Path::new(DEFAULT_RUNDIR);
        assert_eq!(
            NORTHBOUND.remote(rundir),
            "unix:/var/run/openvswitch/ovnnb_db.sock"
        );
        assert_eq!(SOUTHBOUND.remote(rundir), "unix:/var/run/openvswitch/ovnsb_db.sock");
        assert_eq!(OPEN_VSWITCH.remote(rundir), "unix:/var/run/openvswitch/db.sock");
    }
}
