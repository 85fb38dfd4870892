//! Sweep enumeration.
//!
//! The sweep walks implementations in capability order, then delivery modes,
//! then congestion-control algorithms. Once the first advertised mode of an
//! implementation has been walked across all its algorithms, the remaining
//! mode is skipped: a capability that advertises datagrams is only swept in
//! datagram mode, a stream-only capability is swept in stream mode.

use std::fmt;

use crate::capabilities::{CapabilitySet, DeliveryMode};

/// One point of the sweep.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Combination {
    /// Implementation name
    pub implementation: String,
    /// Delivery mode
    pub mode: DeliveryMode,
    /// Congestion-control algorithm
    pub congestion_control: String,
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.implementation, self.mode, self.congestion_control
        )
    }
}

/// Ordered list of combinations for one repetition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepPlan {
    combinations: Vec<Combination>,
}

impl SweepPlan {
    /// Enumerate combinations, skipping excluded implementations.
    pub fn new(capabilities: &CapabilitySet, excluded: &[String]) -> Self {
        let mut combinations = Vec::new();

        for cap in capabilities {
            if excluded.iter().any(|e| e == cap.implementation()) {
                continue;
            }

            for mode in DeliveryMode::ALL {
                if !cap.supports(mode) {
                    continue;
                }
                for cc in cap.congestion_control() {
                    combinations.push(Combination {
                        implementation: cap.implementation().to_string(),
                        mode,
                        congestion_control: cc.clone(),
                    });
                }
                // First advertised mode only.
                break;
            }
        }

        Self { combinations }
    }

    /// Number of combinations per repetition.
    pub fn len(&self) -> usize {
        self.combinations.len()
    }

    /// Whether there is nothing to sweep.
    pub fn is_empty(&self) -> bool {
        self.combinations.is_empty()
    }

    /// Iterate in sweep order.
    pub fn iter(&self) -> std::slice::Iter<'_, Combination> {
        self.combinations.iter()
    }
}

impl<'a> IntoIterator for &'a SweepPlan {
    type Item = &'a Combination;
    type IntoIter = std::slice::Iter<'a, Combination>;

    fn into_iter(self) -> Self::IntoIter {
        self.combinations.iter()
    }
}

/// Result of one combination in one repetition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Every sub-run of the schedule completed.
    Completed,
    /// The combination was aborted.
    Failed {
        /// Error message describing the failure.
        reason: String,
    },
}

/// One line of a [`SweepReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepEntry {
    /// Zero-based repetition
    pub repetition: u32,
    /// Combination exercised
    pub combination: Combination,
    /// How it ended
    pub outcome: SweepOutcome,
}

/// What a sweep did, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    entries: Vec<SweepEntry>,
}

impl SweepReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of a combination.
    pub fn record(&mut self, repetition: u32, combination: Combination, outcome: SweepOutcome) {
        self.entries.push(SweepEntry {
            repetition,
            combination,
            outcome,
        });
    }

    /// All entries in execution order.
    pub fn entries(&self) -> &[SweepEntry] {
        &self.entries
    }

    /// Number of completed combinations.
    pub fn completed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.outcome == SweepOutcome::Completed)
            .count()
    }

    /// Failed entries.
    pub fn failures(&self) -> impl Iterator<Item = &SweepEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, SweepOutcome::Failed { .. }))
    }

    /// Whether every combination completed.
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunnel_types::CapabilityRecord;

    fn caps(records: &[(&str, bool, bool, &[&str])]) -> CapabilitySet {
        CapabilitySet::from_wire(
            records.iter().map(|(name, d, s, cc)| CapabilityRecord {
                implementation: name.to_string(),
                datagrams: *d,
                streams: *s,
                cc: cc.iter().map(|c| c.to_string()).collect(),
            }),
            &[],
        )
    }

    fn labels(plan: &SweepPlan) -> Vec<String> {
        plan.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn datagram_capable_sweeps_datagram_only() {
        let set = caps(&[("a", true, true, &["cubic", "newreno"])]);
        let plan = SweepPlan::new(&set, &[]);

        assert_eq!(labels(&plan), vec!["a/dgram/cubic", "a/dgram/newreno"]);
    }

    #[test]
    fn stream_only_sweeps_stream() {
        let set = caps(&[("tcp", false, true, &["cubic", "bbr"])]);
        let plan = SweepPlan::new(&set, &[]);

        assert_eq!(labels(&plan), vec!["tcp/stream/cubic", "tcp/stream/bbr"]);
    }

    #[test]
    fn follows_capability_order() {
        let set = caps(&[
            ("quiche", true, true, &["cubic"]),
            ("udp", true, false, &[]),
            ("tcp", false, true, &["reno"]),
        ]);
        let plan = SweepPlan::new(&set, &[]);

        assert_eq!(
            labels(&plan),
            vec!["quiche/dgram/cubic", "udp/dgram/none", "tcp/stream/reno"]
        );
    }

    #[test]
    fn skips_excluded_and_modeless() {
        let set = caps(&[
            ("x", true, true, &["cubic"]),
            ("ghost", false, false, &["cubic"]),
            ("y", false, true, &["bbr"]),
        ]);
        let plan = SweepPlan::new(&set, &["x".to_string()]);

        assert_eq!(labels(&plan), vec!["y/stream/bbr"]);
    }

    #[test]
    fn empty_capabilities_empty_plan() {
        let plan = SweepPlan::new(&CapabilitySet::new(), &[]);
        assert!(plan.is_empty());
        assert_eq!(plan.len(), 0);
    }

    #[test]
    fn report_counts_outcomes() {
        let combo = Combination {
            implementation: "a".into(),
            mode: DeliveryMode::Datagram,
            congestion_control: "cubic".into(),
        };
        let mut report = SweepReport::new();
        report.record(0, combo.clone(), SweepOutcome::Completed);
        report.record(
            1,
            combo,
            SweepOutcome::Failed {
                reason: "timeout".into(),
            },
        );

        assert_eq!(report.completed(), 1);
        assert_eq!(report.failures().count(), 1);
        assert!(!report.is_success());
        assert_eq!(report.entries()[1].repetition, 1);
    }
}
