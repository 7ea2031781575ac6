//! Canonical machine table and fleet seeding.

use std::collections::BTreeMap;

use suds_proto::{Machine, MachineKind, MachineStatus, Position};

/// The canonical set of machines plus the snapshot sequence counter.
///
/// Every mutation bumps `seq`, so a snapshot taken after the mutation always
/// supersedes one taken before it, whatever order they arrive in.
pub struct MachineTable {
    machines: BTreeMap<String, Machine>,
    seq: u64,
}

impl MachineTable {
    pub fn new(fleet: Vec<Machine>) -> Self {
        let machines = fleet
            .into_iter()
            .map(|machine| (machine.id.clone(), machine))
            .collect();
        Self { machines, seq: 1 }
    }

    pub fn get(&self, machine_id: &str) -> Option<&Machine> {
        self.machines.get(machine_id)
    }

    /// Current snapshot: sequence number plus the full machine listing.
    pub fn snapshot(&self) -> (u64, Vec<Machine>) {
        (self.seq, self.machines.values().cloned().collect())
    }

    /// Apply a status report from the feed source. Returns the updated
    /// machine, or `None` if the id is unknown.
    ///
    /// `timeRemainingSeconds` is only meaningful while a cycle runs; it is
    /// reset to 0 on every other status.
    pub fn apply_status(
        &mut self,
        machine_id: &str,
        status: MachineStatus,
        time_remaining_seconds: Option<u32>,
    ) -> Option<Machine> {
        let machine = self.machines.get_mut(machine_id)?;
        machine.status = status;
        machine.time_remaining_seconds = match status {
            MachineStatus::InUse | MachineStatus::FinishingSoon => {
                time_remaining_seconds.unwrap_or(machine.time_remaining_seconds)
            }
            _ => 0,
        };
        self.seq += 1;
        Some(machine.clone())
    }
}

/// Generate the room's fleet from counts: washers `{prefix}-W1..Wn` down the
/// left wall, dryers `{prefix}-D1..Dn` down the right.
///
/// Machines start `disabled` and come alive with the first status report.
pub fn seed_fleet(prefix: &str, washers: u16, dryers: u16) -> Vec<Machine> {
    let mut fleet = Vec::with_capacity(usize::from(washers) + usize::from(dryers));
    for n in 1..=washers {
        fleet.push(Machine {
            id: format!("{prefix}-W{n}"),
            short_name: format!("W{n}"),
            kind: MachineKind::Washer,
            status: MachineStatus::Disabled,
            time_remaining_seconds: 0,
            position: Position {
                x: 20.0,
                y: 20.0 + f32::from(n - 1) * 15.0,
            },
        });
    }
    for n in 1..=dryers {
        fleet.push(Machine {
            id: format!("{prefix}-D{n}"),
            short_name: format!("D{n}"),
            kind: MachineKind::Dryer,
            status: MachineStatus::Disabled,
            time_remaining_seconds: 0,
            position: Position {
                x: 80.0,
                y: 20.0 + f32::from(n - 1) * 20.0,
            },
        });
    }
    fleet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_generates_ids_and_short_names() {
        let fleet = seed_fleet("RVREB", 8, 6);
        assert_eq!(fleet.len(), 14);
        assert_eq!(fleet[0].id, "RVREB-W1");
        assert_eq!(fleet[0].short_name, "W1");
        assert_eq!(fleet[8].id, "RVREB-D1");
        assert!(fleet.iter().all(|m| m.status == MachineStatus::Disabled));
    }

    #[test]
    fn apply_status_bumps_seq_and_resets_time() {
        let mut table = MachineTable::new(seed_fleet("RVREB", 2, 0));
        let (seq0, _) = table.snapshot();

        let updated = table
            .apply_status("RVREB-W1", MachineStatus::InUse, Some(600))
            .unwrap();
        assert_eq!(updated.time_remaining_seconds, 600);
        let (seq1, _) = table.snapshot();
        assert!(seq1 > seq0);

        let done = table
            .apply_status("RVREB-W1", MachineStatus::Complete, None)
            .unwrap();
        assert_eq!(done.time_remaining_seconds, 0);
    }

    #[test]
    fn apply_status_for_unknown_machine_is_none() {
        let mut table = MachineTable::new(seed_fleet("RVREB", 1, 0));
        assert!(table
            .apply_status("RVREB-W9", MachineStatus::Available, None)
            .is_none());
    }
}
