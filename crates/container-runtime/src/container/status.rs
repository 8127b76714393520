use std::fmt;

/// Lifecycle state of a container. Only moves forward.
///
/// ```text
/// NotStarted ──► Starting ──► Started ──► Stopped
///                   │            │
///                   └────────────┴──────► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContainerStatus {
    #[default]
    NotStarted,
    Starting,
    Started,
    Stopped,
    Failed,
}

impl ContainerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use ContainerStatus::*;
        matches!(
            (self, next),
            (NotStarted, Starting)
                | (Starting, Started)
                | (Starting, Failed)
                | (Started, Stopped)
                | (Started, Failed)
        )
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not-started",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
