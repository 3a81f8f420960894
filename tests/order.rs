//! Integration tests for rootbuild-order crate.

use rootbuild_order::{BuildOrder, ManifestInspector, MemoryInspector, Scheduler};
use std::collections::{HashMap, HashSet};

/// Every package appears after its in-batch dependencies, and no package
/// shares a level with, or comes before, something it needs.
fn assert_valid(order: &BuildOrder, deps: &[(&str, &[&str])]) {
    let position: HashMap<&str, usize> = order
        .order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    for (id, needs) in deps {
        for need in *needs {
            assert!(position[need] < position[id], "{need} must precede {id}");
            assert!(order.group_of(need) < order.group_of(id));
        }
    }
}

// Scheduling scenarios

#[test]
fn test_x_needs_y() {
    let mut inspector = MemoryInspector::new();
    inspector.add("x.src.rpm", &["X"], &["Y"]);
    inspector.add("y.src.rpm", &["Y"], &[]);

    let order = Scheduler::new(&inspector)
        .schedule(&["x.src.rpm", "y.src.rpm"])
        .unwrap();
    assert_eq!(order.order, vec!["y.src.rpm", "x.src.rpm"]);
    assert_eq!(order.groups, vec![vec!["y.src.rpm"], vec!["x.src.rpm"]]);
    assert!(order.is_complete());
}

#[test]
fn test_diamond_is_leveled() {
    let mut inspector = MemoryInspector::new();
    inspector.add("glibc", &["glibc", "libc.so.6"], &[]);
    inspector.add("zlib", &["zlib", "zlib-devel"], &["libc.so.6"]);
    inspector.add("openssl", &["openssl-devel"], &["glibc"]);
    inspector.add("curl", &["curl", "libcurl-devel"], &["zlib-devel", "openssl-devel"]);
    inspector.add("git", &["git"], &["libcurl-devel", "zlib-devel", "perl"]);

    let order = Scheduler::new(&inspector)
        .schedule(&["git", "curl", "openssl", "zlib", "glibc"])
        .unwrap();
    assert_eq!(
        order.groups,
        vec![
            vec!["glibc"],
            vec!["openssl", "zlib"],
            vec!["curl"],
            vec!["git"]
        ]
    );
    assert_valid(
        &order,
        &[
            ("zlib", &["glibc"]),
            ("openssl", &["glibc"]),
            ("curl", &["zlib", "openssl"]),
            ("git", &["curl", "zlib"]),
        ],
    );
}

#[test]
fn test_packages_without_metadata_are_singletons() {
    let inspector = MemoryInspector::new();
    let order = Scheduler::new(&inspector).schedule(&["b", "a"]).unwrap();
    assert_eq!(order.groups, vec![vec!["a", "b"]]);
}

// Cycle handling

#[test]
fn test_mutual_dependency_is_broken() {
    let mut inspector = MemoryInspector::new();
    inspector.add("a.src.rpm", &["A"], &["B"]);
    inspector.add("b.src.rpm", &["B"], &["A"]);

    let order = Scheduler::new(&inspector)
        .schedule(&["a.src.rpm", "b.src.rpm"])
        .unwrap();
    assert_eq!(
        order.broken_cycles,
        vec![("a.src.rpm".to_string(), "b.src.rpm".to_string())]
    );
    assert_eq!(order.order, vec!["a.src.rpm", "b.src.rpm"]);
    assert!(order.is_complete());
}

#[test]
fn test_longer_cycle_terminates() {
    let mut inspector = MemoryInspector::new();
    inspector.add("p", &["P"], &["Q"]);
    inspector.add("q", &["Q"], &["R"]);
    inspector.add("r", &["R"], &["P"]);
    inspector.add("s", &["S"], &["P"]);

    let order = Scheduler::new(&inspector).schedule(&["p", "q", "r", "s"]).unwrap();
    assert!(order.is_complete());
    assert_eq!(order.broken_cycles.len(), 1);
    assert_valid(&order, &[("s", &["p"])]);
}

#[test]
fn test_loop_victim_has_fewest_open_dependencies() {
    let mut inspector = MemoryInspector::new();
    inspector.add("a", &["A"], &["B", "D"]);
    inspector.add("b", &["B"], &["C"]);
    inspector.add("c", &["C"], &["A"]);
    inspector.add("d", &["D"], &["C"]);

    let order = Scheduler::new(&inspector).schedule(&["a", "b", "c", "d"]).unwrap();
    // "a" sorts first but still waits on two packages; "b" is the smallest
    // name among those waiting on one.
    assert_eq!(
        order.broken_cycles,
        vec![
            ("b".to_string(), "c".to_string()),
            ("a".to_string(), "d".to_string()),
        ]
    );
    assert_eq!(order.groups, vec![vec!["b"], vec!["a"], vec!["c"], vec!["d"]]);
    assert!(order.is_complete());
}

#[test]
fn test_three_node_loop_frees_smallest_name() {
    let mut inspector = MemoryInspector::new();
    inspector.add("q", &["Q"], &["R"]);
    inspector.add("r", &["R"], &["P"]);
    inspector.add("p", &["P"], &["Q"]);

    let order = Scheduler::new(&inspector).schedule(&["r", "q", "p"]).unwrap();
    assert_eq!(order.broken_cycles, vec![("p".to_string(), "q".to_string())]);
    assert_eq!(order.order, vec!["p", "r", "q"]);
}

// Generated graphs

/// Small linear congruential generator so graphs are reproducible per seed.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

/// Random acyclic batch: package `i` only needs packages with a lower index,
/// plus now and then something outside the batch.
fn random_batch(seed: u64, size: usize) -> (MemoryInspector, Vec<String>, Vec<Vec<usize>>) {
    let mut rng = Lcg(seed);
    let mut inspector = MemoryInspector::new();
    let mut deps = Vec::with_capacity(size);
    for i in 0..size {
        let needs: Vec<usize> = (0..i).filter(|_| rng.below(5) == 0).collect();
        let mut requires: Vec<String> = needs.iter().map(|j| format!("cap-{j}")).collect();
        if rng.below(3) == 0 {
            requires.push("libc.so.6".to_string());
        }
        let provides = [format!("cap-{i}")];
        let provides: Vec<&str> = provides.iter().map(String::as_str).collect();
        let requires: Vec<&str> = requires.iter().map(String::as_str).collect();
        inspector.add(&format!("pkg-{i:03}.src.rpm"), &provides, &requires);
        deps.push(needs);
    }

    let mut input: Vec<String> = (0..size).map(|i| format!("pkg-{i:03}.src.rpm")).collect();
    for i in (1..input.len()).rev() {
        let j = rng.below(i as u64 + 1) as usize;
        input.swap(i, j);
    }
    (inspector, input, deps)
}

#[test]
fn test_generated_batches_keep_order_invariants() {
    for seed in 1..=40 {
        let size = 5 + (seed as usize * 7) % 36;
        let (inspector, input, deps) = random_batch(seed, size);
        let order = Scheduler::new(&inspector).schedule(&input).unwrap();
        let name = |i: usize| format!("pkg-{i:03}.src.rpm");

        assert!(order.broken_cycles.is_empty(), "seed {seed}");
        assert!(order.is_complete(), "seed {seed}");
        let seen: HashSet<&str> = order.order.iter().map(String::as_str).collect();
        assert_eq!(seen.len(), size, "seed {seed}: duplicate in order");
        assert_eq!(order.groups.iter().map(Vec::len).sum::<usize>(), size);

        for group in &order.groups {
            assert!(group.windows(2).all(|w| w[0] < w[1]), "seed {seed}: unsorted group");
        }
        let flattened: Vec<&String> = order.groups.iter().flatten().collect();
        assert_eq!(flattened, order.order.iter().collect::<Vec<_>>());

        for (i, needs) in deps.iter().enumerate() {
            let level = order.group_of(&name(i)).unwrap();
            for &j in needs {
                assert!(order.group_of(&name(j)).unwrap() < level, "seed {seed}: {j} after {i}");
            }
            // Nothing waits longer than its deepest dependency requires.
            let expected = needs
                .iter()
                .map(|&j| order.group_of(&name(j)).unwrap() + 1)
                .max()
                .unwrap_or(0);
            assert_eq!(level, expected, "seed {seed}: {i} not in earliest group");
        }
    }
}

// Manifest input

#[test]
fn test_manifest_schedule() {
    let inspector = ManifestInspector::from_json(
        r#"{
            "python3-3.12.src.rpm": {"provides": ["python3", "python3-devel"]},
            "python-six-1.16.src.rpm": {"provides": ["python3-six"], "requires": ["python3-devel"]}
        }"#,
    )
    .unwrap();
    let order = Scheduler::new(&inspector)
        .schedule(&["/srpms/python-six-1.16.src.rpm", "/srpms/python3-3.12.src.rpm"])
        .unwrap();
    assert_eq!(order.order, vec!["python3-3.12.src.rpm", "python-six-1.16.src.rpm"]);
}
