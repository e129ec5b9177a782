use procwatch_daemon::aggregator::{kb_to_mib, Aggregator, Category, GroupKey};
use procwatch_daemon::classifier::{Classifier, OwnerLookup};
use procwatch_daemon::resolver::WindowPids;
use procwatch_daemon::wire::Sample;
use std::collections::{BTreeSet, HashSet};

struct NoOwners;

impl OwnerLookup for NoOwners {
    fn owner_uid(&self, _pid: u32) -> Option<u32> {
        None
    }

    fn session_uid(&self) -> u32 {
        1000
    }
}

fn sample(pid: u32, name: &str, cpu: f64, mem_kb: u64) -> Sample {
    Sample {
        pid,
        name: name.to_string(),
        state: 'S',
        cpu_percent: cpu,
        mem_kb,
        thread_count: 1,
    }
}

#[test]
fn test_basic_frame_groups_bash_as_background() {
    let mut classifier = Classifier::new(WindowPids::new(), Box::new(NoOwners));
    let mut aggregator = Aggregator::default();
    let groups = aggregator.aggregate(&[sample(123, "bash", 0.5, 2048)], &mut classifier);

    let group = &groups[&GroupKey::new(Category::Background, "bash")];
    assert_eq!(group.cpu_percent, 0.5);
    assert_eq!(group.mem_mb, 2.0);
    assert_eq!(group.pids, BTreeSet::from([123]));
    assert_eq!(group.state, 'S');
    assert_eq!(groups.len(), 1);
}

#[test]
fn test_group_sums_are_exact_sums() {
    let mut classifier = Classifier::new(WindowPids::new(), Box::new(NoOwners));
    let mut aggregator = Aggregator::default();
    let samples = vec![
        sample(1, "firefox", 12.25, 300_000),
        sample(2, "firefox", 0.1, 1_234),
        sample(3, "firefox", 7.7, 55_555),
        sample(4, "firefox", 0.0, 1),
    ];
    let groups = aggregator.aggregate(&samples, &mut classifier);
    let group = &groups[&GroupKey::new(Category::App, "firefox")];

    let cpu: f64 = samples.iter().map(|s| s.cpu_percent).sum();
    let mem: f64 = samples.iter().map(|s| kb_to_mib(s.mem_kb)).sum();
    assert_eq!(group.cpu_percent, cpu);
    assert_eq!(group.mem_mb, mem);
    assert_eq!(group.detail.len(), 4);
    assert_eq!(group.detail[&2].mem_mb, 1_234.0 / 1024.0);

    let detail_cpu: f64 = group.detail.values().map(|d| d.cpu_percent).sum();
    assert!((group.cpu_percent - detail_cpu).abs() < 1e-9);
}

#[test]
fn test_same_name_splits_across_categories() {
    let windows = WindowPids::new();
    windows.replace(HashSet::from([11]));
    let mut classifier = Classifier::new(windows, Box::new(NoOwners));
    let mut aggregator = Aggregator::default();
    let groups = aggregator.aggregate(
        &[sample(11, "mytool", 1.0, 1024), sample(12, "mytool", 2.0, 1024)],
        &mut classifier,
    );

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[&GroupKey::new(Category::App, "mytool")].pids, BTreeSet::from([11]));
    assert_eq!(groups[&GroupKey::new(Category::Background, "mytool")].pids, BTreeSet::from([12]));
}

#[test]
fn test_group_state_comes_from_first_sample() {
    let mut classifier = Classifier::new(WindowPids::new(), Box::new(NoOwners));
    let mut aggregator = Aggregator::default();
    let mut running = sample(2, "bash", 0.0, 10);
    running.state = 'R';
    let groups = aggregator.aggregate(&[sample(1, "bash", 0.0, 10), running], &mut classifier);
    assert_eq!(groups[&GroupKey::new(Category::Background, "bash")].state, 'S');
}

#[test]
fn test_cache_cleanup_runs_every_n_cycles() {
    let mut classifier = Classifier::new(WindowPids::new(), Box::new(NoOwners));
    let mut aggregator = Aggregator::new(3);

    aggregator.aggregate(&[sample(1, "bash", 0.0, 1), sample(2, "bash", 0.0, 1)], &mut classifier);
    assert_eq!(classifier.cache_len(), 2);

    // pid 2 exits; its entry survives until the third cycle
    aggregator.aggregate(&[sample(1, "bash", 0.0, 1)], &mut classifier);
    assert_eq!(classifier.cache_len(), 2);
    aggregator.aggregate(&[sample(1, "bash", 0.0, 1)], &mut classifier);
    assert_eq!(classifier.cache_len(), 1);
    assert_eq!(classifier.cached(1), Some(false));
    assert_eq!(classifier.cached(2), None);
}

#[test]
fn test_empty_frame_yields_no_groups() {
    let mut classifier = Classifier::new(WindowPids::new(), Box::new(NoOwners));
    let mut aggregator = Aggregator::default();
    assert!(aggregator.aggregate(&[], &mut classifier).is_empty());
}

#[test]
fn test_detail_keeps_per_pid_threads_and_state() {
    let mut classifier = Classifier::new(WindowPids::new(), Box::new(NoOwners));
    let mut aggregator = Aggregator::default();
    let mut worker = sample(8, "postgres", 3.0, 4096);
    worker.thread_count = 12;
    worker.state = 'R';
    let groups = aggregator.aggregate(&[sample(7, "postgres", 1.0, 4096), worker], &mut classifier);

    let group = &groups[&GroupKey::new(Category::Background, "postgres")];
    assert_eq!(group.detail[&7].threads, 1);
    assert_eq!(group.detail[&8].threads, 12);
    assert_eq!(group.detail[&8].state, 'R');
    assert_eq!(group.thread_count(), 13);
    assert_eq!(group.state, 'S');

    let json = serde_json::to_value(group).unwrap();
    assert_eq!(json["detail"]["8"]["threads"], 12);
}
