//! Resource matching between offers and tasks.
//!
//! Pure and total: no I/O, no panics, for any offer shape.

use tierd_mesos::{Resource, CPUS, MEM, PORTS};

use crate::task::TaskRecord;

/// Returns true if `resources` can host `task`.
pub fn resources_match(resources: &[Resource], task: &TaskRecord) -> bool {
    satisfies(resources, task.cpu, task.mem, &task.required_ports())
}

/// Returns true if some `cpus` scalar is at least `cpu`, some `mem` scalar
/// is at least `mem`, and every port in `ports` lies in an advertised
/// `ports` range. An empty resource list never matches.
pub fn satisfies(resources: &[Resource], cpu: f64, mem: f64, ports: &[u32]) -> bool {
    if resources.is_empty() {
        return false;
    }

    let scalar_at_least = |name: &str, required: f64| {
        resources
            .iter()
            .filter(|resource| resource.name == name)
            .filter_map(Resource::scalar_value)
            .any(|available| available >= required)
    };

    if !scalar_at_least(CPUS, cpu) || !scalar_at_least(MEM, mem) {
        return false;
    }

    ports.iter().all(|port| {
        resources
            .iter()
            .filter(|resource| resource.name == PORTS)
            .flat_map(Resource::range_values)
            .any(|range| range.contains(u64::from(*port)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use tierd_mesos::{Range, Ranges, Scalar, ValueType};

    fn offer(cpu: f64, mem: f64, ports: &[(u64, u64)]) -> Vec<Resource> {
        vec![
            Resource::scalar(CPUS, cpu),
            Resource::scalar(MEM, mem),
            Resource::ranges(PORTS, ports.iter().copied()),
        ]
    }

    #[rstest]
    #[case::exact_fit(offer(1.0, 512.0, &[]), 1.0, 512.0, vec![], true)]
    #[case::cpu_short(offer(0.5, 512.0, &[]), 1.0, 512.0, vec![], false)]
    #[case::mem_short(offer(4.0, 256.0, &[]), 1.0, 512.0, vec![], false)]
    #[case::ports_in_range(offer(4.0, 4096.0, &[(31000, 31010)]), 1.0, 512.0, vec![31000, 31010], true)]
    #[case::port_outside(offer(4.0, 4096.0, &[(31000, 31010)]), 1.0, 512.0, vec![31011], false)]
    #[case::ports_across_ranges(offer(4.0, 4096.0, &[(31000, 31000), (32000, 32005)]), 1.0, 512.0, vec![31000, 32003], true)]
    #[case::no_ports_required(offer(4.0, 4096.0, &[]), 1.0, 512.0, vec![], true)]
    fn test_satisfies(
        #[case] resources: Vec<Resource>,
        #[case] cpu: f64,
        #[case] mem: f64,
        #[case] ports: Vec<u32>,
        #[case] expected: bool,
    ) {
        assert_eq!(satisfies(&resources, cpu, mem, &ports), expected);
    }

    #[test]
    fn test_empty_offer_never_matches() {
        assert!(!satisfies(&[], 0.0, 0.0, &[]));
    }

    #[test]
    fn test_missing_mem_resource() {
        let resources = vec![Resource::scalar(CPUS, 8.0)];
        assert!(!satisfies(&resources, 0.1, 0.0, &[]));
    }

    #[test]
    fn test_any_single_resource_may_satisfy() {
        // Resources split by role: only the second cpus entry is large enough.
        let resources = vec![
            Resource::scalar(CPUS, 0.5),
            Resource::scalar(CPUS, 2.0),
            Resource::scalar(MEM, 1024.0),
        ];
        assert!(satisfies(&resources, 1.0, 512.0, &[]));
    }

    #[test]
    fn test_malformed_resources_are_ignored() {
        let resources = vec![
            Resource {
                name: CPUS.to_string(),
                kind: ValueType::Ranges,
                scalar: Some(Scalar { value: 100.0 }),
                ranges: None,
            },
            Resource::scalar(MEM, 1024.0),
            Resource {
                name: PORTS.to_string(),
                kind: ValueType::Scalar,
                scalar: None,
                ranges: Some(Ranges {
                    range: vec![Range {
                        begin: 31000,
                        end: 32000,
                    }],
                }),
            },
        ];
        assert!(!satisfies(&resources, 1.0, 1.0, &[]));

        let mut with_cpu = resources.clone();
        with_cpu.push(Resource::scalar(CPUS, 1.0));
        assert!(satisfies(&with_cpu, 1.0, 1.0, &[]));
        assert!(!satisfies(&with_cpu, 1.0, 1.0, &[31000]));
    }

    #[test]
    fn test_nan_never_satisfies() {
        let resources = offer(f64::NAN, 1024.0, &[]);
        assert!(!satisfies(&resources, 1.0, 1.0, &[]));
    }

    fn arb_resource() -> impl Strategy<Value = Resource> {
        let name = prop_oneof![
            Just(CPUS.to_string()),
            Just(MEM.to_string()),
            Just(PORTS.to_string()),
            "[a-z]{1,6}",
        ];
        let scalar = proptest::option::of(any::<f64>().prop_map(|value| Scalar { value }));
        let ranges = proptest::option::of(
            proptest::collection::vec((any::<u64>(), any::<u64>()), 0..4).prop_map(|pairs| Ranges {
                range: pairs
                    .into_iter()
                    .map(|(begin, end)| Range { begin, end })
                    .collect(),
            }),
        );
        let kind = prop_oneof![
            Just(ValueType::Scalar),
            Just(ValueType::Ranges),
            Just(ValueType::Set),
            Just(ValueType::Unknown),
        ];
        (name, kind, scalar, ranges).prop_map(|(name, kind, scalar, ranges)| Resource {
            name,
            kind,
            scalar,
            ranges,
        })
    }

    proptest! {
        #[test]
        fn match_implies_sufficiency(
            resources in proptest::collection::vec(arb_resource(), 0..8),
            cpu in any::<f64>(),
            mem in any::<f64>(),
            ports in proptest::collection::vec(any::<u32>(), 0..4),
        ) {
            if satisfies(&resources, cpu, mem, &ports) {
                let has_at_least = |name: &str, required: f64| resources
                    .iter()
                    .filter(|r| r.name == name)
                    .filter_map(Resource::scalar_value)
                    .any(|v| v >= required);
                prop_assert!(has_at_least(CPUS, cpu));
                prop_assert!(has_at_least(MEM, mem));
                for port in &ports {
                    let port = u64::from(*port);
                    prop_assert!(resources
                        .iter()
                        .filter(|r| r.name == PORTS)
                        .flat_map(Resource::range_values)
                        .any(|range| range.begin <= port && port <= range.end));
                }
            }
        }
    }
}
