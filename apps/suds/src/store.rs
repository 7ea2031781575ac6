//! Canonical client-side machine state.
//!
//! Replaced wholesale from feed snapshots; there is no partial-update path.
//! Everything else it offers is a pure view over the current set.

use chrono::{DateTime, Utc};
use tracing::debug;

use suds_proto::{Machine, MachineKind, MachineStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Numeric comparison of the id's digit suffix, so `W2` sorts before
    /// `W10`.
    Id,
    Status,
    TimeRemaining,
}

/// Coarse urgency band derived from `timeRemainingSeconds`. Thresholds are
/// in seconds and compared strictly, least urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBand {
    MoreThan20Min,
    Under20Min,
    FinishingSoon,
    AlmostDone,
}

impl TimeBand {
    pub fn from_seconds(seconds: u32) -> Self {
        if seconds > 1200 {
            TimeBand::MoreThan20Min
        } else if seconds > 300 {
            TimeBand::Under20Min
        } else if seconds > 60 {
            TimeBand::FinishingSoon
        } else {
            TimeBand::AlmostDone
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimeBand::MoreThan20Min => "more than 20 min",
            TimeBand::Under20Min => "under 20 min",
            TimeBand::FinishingSoon => "finishing soon",
            TimeBand::AlmostDone => "almost done",
        }
    }
}

#[derive(Default)]
pub struct MachineStore {
    machines: Vec<Machine>,
    last_seq: Option<u64>,
    last_updated: Option<DateTime<Utc>>,
    stale: bool,
}

impl MachineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the canonical set. The sole mutation entry point from the
    /// feed. Snapshots older than the last applied one are rejected; an
    /// empty snapshot is valid. Returns whether the snapshot was applied.
    pub fn replace_all(&mut self, seq: u64, machines: Vec<Machine>) -> bool {
        if let Some(last) = self.last_seq {
            if seq < last {
                debug!(seq, last, "rejecting stale snapshot");
                return false;
            }
        }
        self.machines = machines;
        self.last_seq = Some(seq);
        self.last_updated = Some(Utc::now());
        self.stale = false;
        true
    }

    pub fn machines(&self) -> &[Machine] {
        &self.machines
    }

    pub fn get(&self, machine_id: &str) -> Option<&Machine> {
        self.machines.iter().find(|m| m.id == machine_id)
    }

    pub fn filter(&self, predicate: impl Fn(&Machine) -> bool) -> Vec<&Machine> {
        self.machines.iter().filter(|m| predicate(m)).collect()
    }

    pub fn sorted_by(&self, key: SortKey) -> Vec<Machine> {
        let mut sorted = self.machines.clone();
        match key {
            SortKey::Id => sorted.sort_by(|a, b| {
                numeric_suffix(&a.id)
                    .cmp(&numeric_suffix(&b.id))
                    .then_with(|| a.id.cmp(&b.id))
            }),
            SortKey::Status => sorted.sort_by(|a, b| a.status.as_str().cmp(b.status.as_str())),
            SortKey::TimeRemaining => {
                sorted.sort_by_key(|m| m.time_remaining_seconds);
            }
        }
        sorted
    }

    pub fn count_by_status_and_kind(&self, status: MachineStatus, kind: MachineKind) -> usize {
        self.machines
            .iter()
            .filter(|m| m.status == status && m.kind == kind)
            .count()
    }

    /// Average `timeRemainingSeconds` over in-use machines of the kind, 0 if
    /// none are in use. A plain mean, not a queueing estimate; treat it as an
    /// approximation.
    pub fn estimated_wait(&self, kind: MachineKind) -> u32 {
        let remaining: Vec<u32> = self
            .machines
            .iter()
            .filter(|m| m.kind == kind && m.status == MachineStatus::InUse)
            .map(|m| m.time_remaining_seconds)
            .collect();
        if remaining.is_empty() {
            return 0;
        }
        let total: u64 = remaining.iter().map(|&secs| u64::from(secs)).sum();
        (total / remaining.len() as u64) as u32
    }

    /// Connectivity loss degrades to "last known state, marked stale".
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }
}

/// Digits embedded in an alphanumeric id, e.g. `RVREB-W12` -> 12.
fn numeric_suffix(id: &str) -> Option<u64> {
    let digits: String = id.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
