use std::fmt;

/// Startup stages, in start order. Shutdown walks the started ones in
/// reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Metrics,
    Diagnostics,
    AdminInterfaces,
    OffsetCoordinator,
    Locality,
    Storage,
    Tables,
    DiskMonitor,
    HostStatistics,
    Producers,
    Tasks,
    Consumers,
    SecurityManager,
    ShutdownHook,
}

impl Stage {
    pub const STARTUP_ORDER: [Stage; 14] = [
        Stage::Metrics,
        Stage::Diagnostics,
        Stage::AdminInterfaces,
        Stage::OffsetCoordinator,
        Stage::Locality,
        Stage::Storage,
        Stage::Tables,
        Stage::DiskMonitor,
        Stage::HostStatistics,
        Stage::Producers,
        Stage::Tasks,
        Stage::Consumers,
        Stage::SecurityManager,
        Stage::ShutdownHook,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Metrics => "metrics",
            Stage::Diagnostics => "diagnostics",
            Stage::AdminInterfaces => "admin-interfaces",
            Stage::OffsetCoordinator => "offset-coordinator",
            Stage::Locality => "locality",
            Stage::Storage => "storage",
            Stage::Tables => "tables",
            Stage::DiskMonitor => "disk-monitor",
            Stage::HostStatistics => "host-statistics",
            Stage::Producers => "producers",
            Stage::Tasks => "tasks",
            Stage::Consumers => "consumers",
            Stage::SecurityManager => "security-manager",
            Stage::ShutdownHook => "shutdown-hook",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_order_matches_declaration_order() {
        let mut sorted = Stage::STARTUP_ORDER;
        sorted.sort();
        assert_eq!(sorted, Stage::STARTUP_ORDER);
        assert_eq!(Stage::STARTUP_ORDER.first(), Some(&Stage::Metrics));
        assert_eq!(Stage::STARTUP_ORDER.last(), Some(&Stage::ShutdownHook));
    }
}
