//! Advertised transport capabilities of a remote agent.
//!
//! A capability query returns one record per transport implementation. The
//! parsed [`CapabilitySet`] keeps wire order, which is also the order the
//! sweep enumerates implementations in.

use std::fmt;
use std::ops::Index;
use tunnel_types::CapabilityRecord;

/// Pseudo-algorithm for transports without congestion control.
pub const NO_CONGESTION_CONTROL: &str = "none";

/// Implementations that deliver without a connection (and so without
/// congestion control).
pub const CONNECTIONLESS_IMPLEMENTATIONS: &[&str] = &["udp"];

/// Implementations the harness cannot drive, dropped when parsing and
/// skipped when sweeping unless the configuration overrides the list.
pub const DEFAULT_EXCLUDED_IMPLEMENTATIONS: &[&str] = &["quicly"];

/// Delivery mode of the tunnel under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    /// Unreliable datagrams.
    Datagram,
    /// Reliable streams.
    Stream,
}

impl DeliveryMode {
    /// Both modes, datagram first (sweep order).
    pub const ALL: [DeliveryMode; 2] = [DeliveryMode::Datagram, DeliveryMode::Stream];

    /// Map the wire `datagrams` flag to a mode.
    pub fn from_datagrams(datagrams: bool) -> Self {
        if datagrams {
            Self::Datagram
        } else {
            Self::Stream
        }
    }

    /// Whether this is datagram mode.
    pub fn is_datagram(&self) -> bool {
        matches!(self, Self::Datagram)
    }

    /// Label used in experiment names and artifact paths.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Datagram => "dgram",
            Self::Stream => "stream",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Whether an implementation name is connectionless.
pub fn is_connectionless(implementation: &str) -> bool {
    CONNECTIONLESS_IMPLEMENTATIONS.contains(&implementation)
}

/// One supported transport implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    implementation: String,
    datagrams: bool,
    streams: bool,
    congestion_control: Vec<String>,
}

impl Capability {
    /// Build a capability from a wire record.
    ///
    /// Connectionless implementations get [`NO_CONGESTION_CONTROL`] appended
    /// after the advertised algorithms.
    pub fn from_record(record: CapabilityRecord) -> Self {
        let mut congestion_control = record.cc;
        if is_connectionless(&record.implementation) {
            congestion_control.push(NO_CONGESTION_CONTROL.to_string());
        }

        Self {
            implementation: record.implementation,
            datagrams: record.datagrams,
            streams: record.streams,
            congestion_control,
        }
    }

    /// Implementation name.
    pub fn implementation(&self) -> &str {
        &self.implementation
    }

    /// Whether datagram delivery is advertised.
    pub fn supports_datagrams(&self) -> bool {
        self.datagrams
    }

    /// Whether stream delivery is advertised.
    pub fn supports_streams(&self) -> bool {
        self.streams
    }

    /// Whether the given mode is advertised.
    pub fn supports(&self, mode: DeliveryMode) -> bool {
        match mode {
            DeliveryMode::Datagram => self.datagrams,
            DeliveryMode::Stream => self.streams,
        }
    }

    /// Congestion-control algorithms, in advertised order.
    pub fn congestion_control(&self) -> &[String] {
        &self.congestion_control
    }
}

/// Ordered set of capabilities, in the order the agent reported them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    caps: Vec<Capability>,
}

impl CapabilitySet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse wire records, dropping excluded implementations.
    pub fn from_wire<I>(records: I, excluded: &[String]) -> Self
    where
        I: IntoIterator<Item = CapabilityRecord>,
    {
        let caps = records
            .into_iter()
            .filter(|r| !excluded.iter().any(|e| e == &r.implementation))
            .map(Capability::from_record)
            .collect();
        Self { caps }
    }

    /// Number of implementations.
    pub fn len(&self) -> usize {
        self.caps.len()
    }

    /// Whether no implementation is known.
    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    /// Capability at a sweep position.
    pub fn get(&self, index: usize) -> Option<&Capability> {
        self.caps.get(index)
    }

    /// Find a capability by implementation name.
    pub fn find(&self, implementation: &str) -> Option<&Capability> {
        self.caps
            .iter()
            .find(|c| c.implementation == implementation)
    }

    /// Iterate in enumeration order.
    pub fn iter(&self) -> std::slice::Iter<'_, Capability> {
        self.caps.iter()
    }
}

impl Index<usize> for CapabilitySet {
    type Output = Capability;

    fn index(&self, index: usize) -> &Self::Output {
        &self.caps[index]
    }
}

impl<'a> IntoIterator for &'a CapabilitySet {
    type Item = &'a Capability;
    type IntoIter = std::slice::Iter<'a, Capability>;

    fn into_iter(self) -> Self::IntoIter {
        self.caps.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, datagrams: bool, streams: bool, cc: &[&str]) -> CapabilityRecord {
        CapabilityRecord {
            implementation: name.into(),
            datagrams,
            streams,
            cc: cc.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn default_excluded() -> Vec<String> {
        DEFAULT_EXCLUDED_IMPLEMENTATIONS
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn preserves_wire_order() {
        let set = CapabilitySet::from_wire(
            vec![
                record("quiche", true, true, &["cubic"]),
                record("mvfst", true, true, &["newreno"]),
                record("tcp", false, true, &["cubic"]),
            ],
            &[],
        );

        let names: Vec<_> = set.iter().map(|c| c.implementation()).collect();
        assert_eq!(names, vec!["quiche", "mvfst", "tcp"]);
        assert_eq!(set[1].implementation(), "mvfst");
    }

    #[test]
    fn excluded_implementations_are_dropped() {
        let excluded = default_excluded();
        let set = CapabilitySet::from_wire(
            vec![
                record("quicly", true, true, &["cubic"]),
                record("mvfst", true, true, &["newreno"]),
                record("quicly", false, true, &["reno"]),
            ],
            &excluded,
        );

        assert_eq!(set.len(), 1);
        for name in &excluded {
            assert!(set.find(name).is_none());
        }
    }

    #[test]
    fn connectionless_gets_exactly_one_none_appended() {
        let set = CapabilitySet::from_wire(
            vec![
                record("udp", true, false, &["ledbat"]),
                record("quiche", true, true, &["cubic"]),
            ],
            &[],
        );

        assert_eq!(set[0].congestion_control(), ["ledbat", "none"]);
        assert_eq!(set[1].congestion_control(), ["cubic"]);
    }

    #[test]
    fn connectionless_with_empty_list_gets_only_none() {
        let cap = Capability::from_record(record("udp", true, false, &[]));
        assert_eq!(cap.congestion_control(), [NO_CONGESTION_CONTROL]);
    }

    #[test]
    fn supports_reports_modes() {
        let cap = Capability::from_record(record("tcp", false, true, &["cubic"]));
        assert!(!cap.supports(DeliveryMode::Datagram));
        assert!(cap.supports(DeliveryMode::Stream));
        assert!(!cap.supports_datagrams());
        assert!(cap.supports_streams());
    }

    #[test]
    fn empty_set() {
        let set = CapabilitySet::new();
        assert!(set.is_empty());
        assert!(set.get(0).is_none());
    }

    #[test]
    fn delivery_mode_labels() {
        assert_eq!(DeliveryMode::from_datagrams(true).label(), "dgram");
        assert_eq!(DeliveryMode::from_datagrams(false).to_string(), "stream");
    }
}
