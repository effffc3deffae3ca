//! Application runtime level.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle stage of the running application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeLevel {
    Unknown,
    Boot,
    Install,
    Upgrade,
    Run,
    BootFailed,
}

impl RuntimeLevel {
    fn as_u8(self) -> u8 {
        match self {
            RuntimeLevel::Unknown => 0,
            RuntimeLevel::Boot => 1,
            RuntimeLevel::Install => 2,
            RuntimeLevel::Upgrade => 3,
            RuntimeLevel::Run => 4,
            RuntimeLevel::BootFailed => 5,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => RuntimeLevel::Boot,
            2 => RuntimeLevel::Install,
            3 => RuntimeLevel::Upgrade,
            4 => RuntimeLevel::Run,
            5 => RuntimeLevel::BootFailed,
            _ => RuntimeLevel::Unknown,
        }
    }
}

impl fmt::Display for RuntimeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeLevel::Unknown => "unknown",
            RuntimeLevel::Boot => "boot",
            RuntimeLevel::Install => "install",
            RuntimeLevel::Upgrade => "upgrade",
            RuntimeLevel::Run => "run",
            RuntimeLevel::BootFailed => "boot_failed",
        };
        f.write_str(name)
    }
}

/// Shared, mutable view of the current runtime level.
#[derive(Debug)]
pub struct RuntimeState {
    level: AtomicU8,
}

impl RuntimeState {
    pub fn new(level: RuntimeLevel) -> Self {
        Self {
            level: AtomicU8::new(level.as_u8()),
        }
    }

    pub fn level(&self) -> RuntimeLevel {
        RuntimeLevel::from_u8(self.level.load(Ordering::Acquire))
    }

    pub fn set_level(&self, level: RuntimeLevel) {
        self.level.store(level.as_u8(), Ordering::Release);
    }

    /// Fully started; not booting, installing or upgrading.
    pub fn is_running(&self) -> bool {
        self.level() == RuntimeLevel::Run
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new(RuntimeLevel::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_transitions() {
        let state = RuntimeState::new(RuntimeLevel::Boot);
        assert!(!state.is_running());

        state.set_level(RuntimeLevel::Upgrade);
        assert_eq!(state.level(), RuntimeLevel::Upgrade);
        assert!(!state.is_running());

        state.set_level(RuntimeLevel::Run);
        assert!(state.is_running());
    }

    #[test]
    fn test_every_level_survives_storage() {
        for level in [
            RuntimeLevel::Unknown,
            RuntimeLevel::Boot,
            RuntimeLevel::Install,
            RuntimeLevel::Upgrade,
            RuntimeLevel::Run,
            RuntimeLevel::BootFailed,
        ] {
            assert_eq!(RuntimeLevel::from_u8(level.as_u8()), level);
        }
    }

    #[test]
    fn test_default_is_unknown() {
        assert_eq!(RuntimeState::default().level(), RuntimeLevel::Unknown);
    }
}
