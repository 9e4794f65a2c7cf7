//! Dynamic host-port allocation.

use std::collections::HashSet;

use crate::task::TaskRecord;

/// Half-open range `[from, to)` of host ports handed out to tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub from: u32,
    pub to: u32,
}

impl PortRange {
    pub fn new(from: u32, to: u32) -> Self {
        Self { from, to }
    }

    pub fn len(&self) -> u32 {
        self.to.saturating_sub(self.from)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// First port of the lowest block of `count` contiguous ports in `range`
/// that contains no port from `in_use`.
///
/// `None` means no block is free and the task must not be launched. A
/// request for zero ports is trivially satisfied at the start of the range.
pub fn allocate(range: PortRange, count: u32, in_use: &HashSet<u32>) -> Option<u32> {
    if count == 0 {
        return Some(range.from);
    }
    if count > range.len() {
        return None;
    }

    let mut run_start = range.from;
    let mut run_len = 0;
    for port in range.from..range.to {
        if in_use.contains(&port) {
            run_len = 0;
            run_start = port.saturating_add(1);
            continue;
        }
        run_len += 1;
        if run_len == count {
            return Some(run_start);
        }
    }
    None
}

/// Host ports announced by any known task.
pub fn in_use_ports(records: &[TaskRecord]) -> HashSet<u32> {
    records
        .iter()
        .flat_map(TaskRecord::announced_ports)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::TaskKind;
    use crate::task::tests::record;
    use proptest::prelude::*;

    fn used(ports: &[u32]) -> HashSet<u32> {
        ports.iter().copied().collect()
    }

    #[test]
    fn test_skips_ports_held_by_existing_tasks() {
        let mut first = record(TaskKind::Datastore, "t1");
        first.assign_host_ports(31000);
        let mut second = record(TaskKind::Server, "t2");
        second.assign_host_ports(31001);

        let in_use = in_use_ports(&[first, second]);
        assert_eq!(allocate(PortRange::new(31000, 31010), 2, &in_use), Some(31002));
    }

    #[test]
    fn test_gap_too_small_is_skipped() {
        let in_use = used(&[31001, 31003]);
        assert_eq!(allocate(PortRange::new(31000, 31010), 2, &in_use), Some(31004));
        assert_eq!(allocate(PortRange::new(31000, 31010), 1, &in_use), Some(31000));
    }

    #[test]
    fn test_exhausted_range() {
        let in_use = used(&[31000, 31002]);
        assert_eq!(allocate(PortRange::new(31000, 31004), 2, &in_use), None);
        assert_eq!(allocate(PortRange::new(31000, 31004), 5, &HashSet::new()), None);
        assert_eq!(allocate(PortRange::new(31000, 31000), 1, &HashSet::new()), None);
    }

    #[test]
    fn test_block_may_end_at_range_end() {
        let in_use = used(&[31000, 31001]);
        assert_eq!(allocate(PortRange::new(31000, 31004), 2, &in_use), Some(31002));
    }

    #[test]
    fn test_unpromoted_records_hold_no_ports() {
        let pending = record(TaskKind::Agent, "t1");
        assert!(in_use_ports(&[pending]).is_empty());
    }

    proptest! {
        #[test]
        fn allocated_block_is_free_and_in_range(
            from in 1000u32..2000,
            width in 0u32..64,
            count in 1u32..8,
            taken in proptest::collection::hash_set(1000u32..2100, 0..40),
        ) {
            let range = PortRange::new(from, from + width);
            if let Some(base) = allocate(range, count, &taken) {
                prop_assert!(base >= range.from);
                prop_assert!(base + count <= range.to);
                for port in base..base + count {
                    prop_assert!(!taken.contains(&port));
                }
                // No earlier block fits.
                for earlier in range.from..base {
                    prop_assert!((earlier..earlier + count).any(|p| taken.contains(&p)));
                }
            } else {
                for start in range.from..range.to.saturating_sub(count - 1) {
                    prop_assert!((start..start + count).any(|p| taken.contains(&p)));
                }
            }
        }
    }
}
