// tests/store_concurrency.rs
//
// Race tests for the versioned store and the refresh sequencer: concurrent
// writers to distinct keys must never corrupt each other's entries, and the
// sequence must advance by exactly one per request across threads.

use std::sync::Arc;
use std::thread;

use serde_json::{json, Value};

use ai_quota_monitor::{RefreshSequencer, VersionedStore};

const WRITERS: usize = 32;

#[test]
fn concurrent_puts_to_distinct_keys_do_not_corrupt() {
    let store = Arc::new(VersionedStore::new());

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let payload = json!({
                    "source": format!("source_{i}"),
                    "value": i,
                })
                .as_object()
                .cloned()
                .unwrap();
                // Hammer the same key a few times; last write wins.
                for _ in 0..10 {
                    store.put(&format!("source_{i}"), payload.clone());
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer thread panicked");
    }

    let all = store.get_all();
    assert_eq!(all.len(), WRITERS);
    for i in 0..WRITERS {
        let entry = all
            .get(&format!("source_{i}"))
            .unwrap_or_else(|| panic!("missing source_{i}"));
        assert_eq!(entry.payload.get("value"), Some(&json!(i)));
        assert!(
            entry
                .payload
                .get("received_at")
                .and_then(Value::as_str)
                .is_some(),
            "every entry carries a stamp"
        );
    }
}

#[test]
fn sequencer_advances_exactly_n_across_threads() {
    let seq = Arc::new(RefreshSequencer::new());
    let per_thread = 100u64;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let seq = Arc::clone(&seq);
            thread::spawn(move || {
                for _ in 0..per_thread {
                    seq.request_refresh();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("thread panicked");
    }

    assert_eq!(seq.current(), 8 * per_thread);
}
