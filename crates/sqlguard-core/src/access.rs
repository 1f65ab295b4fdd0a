//! Access mode and the process-wide mode cell.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Policy switch selecting how much SQL the gateway lets through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Trusted escape hatch for administrative tooling. Everything is allowed and logged.
    Unrestricted,
    /// Single read-only statements only.
    Restricted,
}

impl AccessMode {
    /// All modes, most permissive first.
    pub const ALL: [AccessMode; 2] = [AccessMode::Unrestricted, AccessMode::Restricted];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Unrestricted => "unrestricted",
            AccessMode::Restricted => "restricted",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            AccessMode::Unrestricted => 0,
            AccessMode::Restricted => 1,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => AccessMode::Unrestricted,
            _ => AccessMode::Restricted,
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unrestricted" => Ok(AccessMode::Unrestricted),
            "restricted" => Ok(AccessMode::Restricted),
            other => Err(format!(
                "unknown access mode '{}', expected 'restricted' or 'unrestricted'",
                other
            )),
        }
    }
}

/// Process-wide access mode.
///
/// Created once at startup and handed to whatever builds execution contexts. Clones share the
/// same cell, so [`AccessControl::set_mode`] is visible to every holder on their next read.
/// Readers never cache the value: the gateway calls [`AccessControl::mode`] on every validation.
///
/// Switching the mode while validations are in flight is not supported; callers quiesce
/// traffic first.
#[derive(Debug, Clone)]
pub struct AccessControl {
    mode: Arc<AtomicU8>,
}

impl AccessControl {
    pub fn new(mode: AccessMode) -> Self {
        Self {
            mode: Arc::new(AtomicU8::new(mode.to_u8())),
        }
    }

    /// Current mode.
    pub fn mode(&self) -> AccessMode {
        AccessMode::from_u8(self.mode.load(Ordering::SeqCst))
    }

    /// Administrative setter. The only way the mode changes after startup.
    ///
    /// Returns the previous mode.
    pub fn set_mode(&self, mode: AccessMode) -> AccessMode {
        let previous = AccessMode::from_u8(self.mode.swap(mode.to_u8(), Ordering::SeqCst));
        if previous != mode {
            tracing::warn!(from = %previous, to = %mode, "Access mode changed");
        }
        previous
    }
}

impl Default for AccessControl {
    fn default() -> Self {
        Self::new(AccessMode::Restricted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_restricted() {
        assert_eq!(AccessControl::default().mode(), AccessMode::Restricted);
    }

    #[test]
    fn test_clones_share_mode() {
        let control = AccessControl::new(AccessMode::Restricted);
        let handle = control.clone();

        let previous = control.set_mode(AccessMode::Unrestricted);
        assert_eq!(previous, AccessMode::Restricted);
        assert_eq!(handle.mode(), AccessMode::Unrestricted);
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("RESTRICTED".parse::<AccessMode>().unwrap(), AccessMode::Restricted);
        assert_eq!(" unrestricted ".parse::<AccessMode>().unwrap(), AccessMode::Unrestricted);
        assert!("readonly".parse::<AccessMode>().is_err());
    }

    #[test]
    fn test_mode_serialization() {
        let json = serde_json::to_string(&AccessMode::Unrestricted).unwrap();
        assert_eq!(json, "\"unrestricted\"");
    }
}
