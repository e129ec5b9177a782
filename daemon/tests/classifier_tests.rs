use procwatch_daemon::classifier::{Classifier, OwnerLookup, ProcOwners};
use procwatch_daemon::config::ClassifierConfig;
use procwatch_daemon::resolver::WindowPids;
use std::collections::{HashMap, HashSet};

const SESSION_UID: u32 = 1000;

struct FakeOwners {
    uids: HashMap<u32, u32>,
}

impl OwnerLookup for FakeOwners {
    fn owner_uid(&self, pid: u32) -> Option<u32> {
        self.uids.get(&pid).copied()
    }

    fn session_uid(&self) -> u32 {
        SESSION_UID
    }
}

fn classifier(windows: &WindowPids) -> Classifier {
    let uids = HashMap::from([(500, SESSION_UID), (501, 0)]);
    Classifier::new(windows.clone(), Box::new(FakeOwners { uids }))
}

#[test]
fn test_blacklist_is_background_even_with_window() {
    let windows = WindowPids::new();
    windows.replace(HashSet::from([10]));
    let mut c = classifier(&windows);
    assert!(!c.classify(10, "gnome-shell"));
    assert!(!c.classify(11, "bash"));
    assert!(!c.classify(12, "Xwayland"));
}

#[test]
fn test_helper_tokens_are_background() {
    let mut c = classifier(&WindowPids::new());
    assert!(!c.classify(20, "chrome_helper"));
    assert!(!c.classify(21, "firefox-crashpad"));
    assert!(!c.classify(22, "zygote"));
}

#[test]
fn test_window_owner_is_app() {
    let windows = WindowPids::new();
    windows.replace(HashSet::from([30]));
    let mut c = classifier(&windows);
    assert!(c.classify(30, "some-custom-tool"));
}

#[test]
fn test_app_patterns_match_substrings() {
    let mut c = classifier(&WindowPids::new());
    assert!(c.classify(40, "firefox-esr"));
    assert!(c.classify(41, "Code"));
    assert!(c.classify(42, "gnome-terminal-server"));
}

#[test]
fn test_unknown_process_defaults_to_background() {
    let mut c = classifier(&WindowPids::new());
    assert!(!c.classify(500, "worker"));
    assert!(!c.classify(501, "rootd"));
    // owner lookup fails for a vanished process
    assert!(!c.classify(502, "gone"));
    assert_eq!(c.cached(502), Some(false));
}

#[test]
fn test_cached_background_upgrades_when_window_appears() {
    let windows = WindowPids::new();
    let mut c = classifier(&windows);
    assert!(!c.classify(60, "mytool"));
    assert_eq!(c.cached(60), Some(false));

    windows.replace(HashSet::from([60]));
    assert!(c.classify(60, "mytool"));
    assert_eq!(c.cached(60), Some(true));
}

#[test]
fn test_app_classification_is_monotonic() {
    let windows = WindowPids::new();
    windows.replace(HashSet::from([70]));
    let mut c = classifier(&windows);
    assert!(c.classify(70, "mytool"));

    windows.replace(HashSet::new());
    for _ in 0..5 {
        assert!(c.classify(70, "mytool"));
    }
}

#[test]
fn test_cache_wins_over_later_name_rules() {
    let windows = WindowPids::new();
    windows.replace(HashSet::from([80]));
    let mut c = classifier(&windows);
    assert!(c.classify(80, "custom"));
    // pid reuse with a blacklisted name still reads the cached verdict
    assert!(c.classify(80, "bash"));
}

#[test]
fn test_purge_absent_keeps_live_pids() {
    let mut c = classifier(&WindowPids::new());
    for pid in [1, 2, 3] {
        c.classify(pid, "bash");
    }
    let purged = c.purge_absent(&HashSet::from([2]));
    assert_eq!(purged, 2);
    assert_eq!(c.cache_len(), 1);
    assert_eq!(c.cached(2), Some(false));
}

#[test]
fn test_config_extends_tables() {
    let config = ClassifierConfig {
        extra_app_patterns: vec!["MyEditor".to_string()],
        extra_background: vec!["Syncd".to_string()],
        ..ClassifierConfig::default()
    };
    let windows = WindowPids::new();
    windows.replace(HashSet::from([91]));
    let owners = FakeOwners { uids: HashMap::new() };
    let mut c = Classifier::with_config(windows, Box::new(owners), &config);
    assert!(c.classify(90, "myeditor-bin"));
    assert!(!c.classify(91, "syncd"));
}

#[test]
fn test_proc_owners_reads_current_process() {
    let owners = ProcOwners::new();
    let uid = owners.owner_uid(std::process::id());
    assert_eq!(uid, Some(owners.session_uid()));
    assert_eq!(owners.owner_uid(999_999_999), None);
}
