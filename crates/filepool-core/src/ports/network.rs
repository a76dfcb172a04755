//! Network status port definition.
//!
//! Size gating and queue scheduling depend on whether the device is
//! online and whether the connection is metered. The engine polls this
//! port right before each decision instead of caching connectivity.

/// Connectivity of the device at one point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Connectivity {
    /// No usable connection.
    Offline,
    /// Online through a connection the user likely pays per byte.
    Metered,
    /// Online through an unrestricted connection (Wi-Fi or similar).
    Unmetered,
}

impl Connectivity {
    /// Whether any connection exists.
    #[must_use]
    pub const fn is_online(&self) -> bool {
        !matches!(self, Self::Offline)
    }

    /// Whether large downloads are acceptable.
    #[must_use]
    pub const fn is_unmetered(&self) -> bool {
        matches!(self, Self::Unmetered)
    }
}

/// Port reporting the current connectivity.
pub trait NetworkStatusPort: Send + Sync {
    /// The connectivity right now.
    fn connectivity(&self) -> Connectivity;
}

/// A network status source that always reports an unmetered connection.
///
/// Suitable for desktop deployments and tests; mobile embedders should
/// wire a real implementation.
#[derive(Debug, Clone, Default)]
pub struct AlwaysOnline;

impl AlwaysOnline {
    /// Create a new always-online status source.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl NetworkStatusPort for AlwaysOnline {
    fn connectivity(&self) -> Connectivity {
        Connectivity::Unmetered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_predicates() {
        assert!(!Connectivity::Offline.is_online());
        assert!(Connectivity::Metered.is_online());
        assert!(!Connectivity::Metered.is_unmetered());
        assert!(Connectivity::Unmetered.is_unmetered());
    }

    #[test]
    fn test_always_online() {
        assert_eq!(AlwaysOnline::new().connectivity(), Connectivity::Unmetered);
    }
}
