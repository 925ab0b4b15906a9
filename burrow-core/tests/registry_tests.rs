// ABOUTME: Concurrency tests for the registry against a sequential reference
// ABOUTME: Each writer owns a disjoint key range so the final state is deterministic

use burrow_core::ConcurrentRegistry;
use std::collections::HashMap;
use std::sync::Arc;

fn ops_for(worker: u64) -> Vec<(u64, Option<u64>)> {
    // (key, Some(value)) stores, (key, None) deletes
    let base = worker * 1000;
    let mut ops = Vec::new();
    for i in 0..200 {
        ops.push((base + i % 50, Some(i)));
        if i % 7 == 0 {
            ops.push((base + i % 50, None));
        }
    }
    ops
}

fn apply_sequential(ops: &[(u64, Option<u64>)], map: &mut HashMap<u64, u64>) {
    for (key, op) in ops {
        match op {
            Some(v) => {
                map.insert(*key, *v);
            }
            None => {
                map.remove(key);
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ops_match_sequential_reference() {
    let registry = Arc::new(ConcurrentRegistry::<u64, u64>::new());
    let mut handles = Vec::new();
    for worker in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            for (key, op) in ops_for(worker) {
                match op {
                    Some(v) => {
                        registry.store(key, v);
                        assert_eq!(registry.load(&key), Some(v));
                    }
                    None => {
                        registry.load_and_delete(&key);
                        assert_eq!(registry.load(&key), None);
                    }
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let mut reference = HashMap::new();
    for worker in 0..8 {
        apply_sequential(&ops_for(worker), &mut reference);
    }

    assert_eq!(registry.len(), reference.len());
    for (key, value) in &reference {
        assert_eq!(registry.load(key), Some(*value));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_load_and_delete_hands_out_each_value_once() {
    let registry = Arc::new(ConcurrentRegistry::<u64, u64>::new());
    for i in 0..500 {
        registry.store(i, i);
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let mut got = Vec::new();
            for i in 0..500 {
                if let Some(v) = registry.load_and_delete(&i) {
                    got.push(v);
                }
            }
            got
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }
    all.sort_unstable();
    assert_eq!(all, (0..500).collect::<Vec<_>>());
    assert!(registry.is_empty());
}
