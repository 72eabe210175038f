use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use stripemap::{HasherFn, MapConfig, MapOf, ENTRIES_PER_BUCKET, MIN_TABLE_LEN};

#[test]
fn test_grow_keeps_every_entry() {
    let map: MapOf<u64, u64> = MapOf::new();
    for i in 0..1000 {
        map.store(i, i * 2);
    }
    for i in 0..1000 {
        assert_eq!(map.load(&i), Some(i * 2));
    }
    assert_eq!(map.len(), 1000);

    let stats = map.stats();
    assert!(stats.total_growths > 0);
    assert!(stats.root_buckets > MIN_TABLE_LEN);
    assert_eq!(stats.size, 1000);
    assert_eq!(stats.counter, 1000);
}

#[test]
fn test_shrink_back_to_minimum_after_deleting_everything() {
    let map: MapOf<u64, u64> = MapOf::new();
    for i in 0..10_000 {
        map.store(i, i);
    }
    let grown = map.stats();
    assert!(grown.root_buckets > MIN_TABLE_LEN);
    assert_eq!(grown.total_shrinks, 0);

    for i in 0..10_000 {
        map.delete(&i);
    }

    let stats = map.stats();
    assert!(map.is_empty());
    assert_eq!(stats.root_buckets, MIN_TABLE_LEN);
    assert!(stats.total_shrinks > 0);
    assert_eq!(stats.size, 0);
}

#[test]
fn test_shrink_keeps_survivors() {
    let map: MapOf<u64, u64> = MapOf::new();
    for i in 0..2_000 {
        map.store(i, i * 2);
    }
    for i in 0..1_990 {
        map.delete(&i);
    }
    assert!(map.stats().total_shrinks > 0);
    for i in 1_990..2_000 {
        assert_eq!(map.load(&i), Some(i * 2));
    }
    assert_eq!(map.len(), 10);
}

#[test]
fn test_grow_only_never_shrinks() {
    let map: MapOf<u64, u64> = MapConfig::new().grow_only().build().unwrap();
    for i in 0..10_000 {
        map.store(i, i);
    }
    let grown = map.stats().root_buckets;
    for i in 0..10_000 {
        map.delete(&i);
    }

    let stats = map.stats();
    assert!(map.is_empty());
    assert_eq!(stats.root_buckets, grown);
    assert_eq!(stats.total_shrinks, 0);
}

#[test]
fn test_presized_map_does_not_grow_within_hint() {
    let map: MapOf<u64, u64> = MapOf::with_presize(10_000);
    let before = map.stats().root_buckets;
    for i in 0..10_000 {
        map.store(i, i);
    }
    let stats = map.stats();
    assert_eq!(stats.root_buckets, before);
    assert_eq!(stats.total_growths, 0);
}

#[test]
fn test_presized_map_never_shrinks_below_initial_length() {
    let map: MapOf<u64, u64> = MapOf::with_presize(4_000);
    let floor = map.stats().root_buckets;
    for i in 0..40_000 {
        map.store(i, i);
    }
    for i in 0..40_000 {
        map.delete(&i);
    }
    assert_eq!(map.stats().root_buckets, floor);
}

#[test]
fn test_presize_overflow_is_an_error() {
    let err = MapConfig::new()
        .presize(usize::MAX)
        .build::<u64, u64>()
        .unwrap_err();
    assert!(matches!(err, stripemap::Error::CapacityOverflow { requested } if requested == usize::MAX));
    assert!(err.to_string().contains("presize"));
}

#[test]
#[should_panic(expected = "table size overflows")]
fn test_with_presize_panics_on_overflow() {
    let _ = MapOf::<u64, u64>::with_presize(usize::MAX);
}

#[test]
fn test_degenerate_hasher_chains_into_one_bucket() {
    let map: MapOf<u64, u64, HasherFn<u64>> = MapOf::with_hasher(HasherFn::new(|_: &u64, _| 0));
    for i in 0..500 {
        map.store(i, i + 1);
    }
    for i in 0..500 {
        assert_eq!(map.load(&i), Some(i + 1));
    }

    let stats = map.stats();
    assert_eq!(stats.size, 500);
    assert_eq!(stats.max_entries, 500);
    assert_eq!(stats.min_entries, 0);
    assert!(stats.total_buckets >= stats.root_buckets + 500 / ENTRIES_PER_BUCKET - 1);

    for i in (0..500).step_by(2) {
        map.delete(&i);
    }
    let mut count = 0;
    map.range(|k, _| {
        assert_eq!(k % 2, 1);
        count += 1;
        true
    });
    assert_eq!(count, 250);
    assert_eq!(map.len(), 250);
}

#[test]
fn test_stats_are_consistent() {
    let map: MapOf<u32, u32> = MapOf::new();
    for i in 0..777 {
        map.store(i, i);
    }
    let stats = map.stats();
    assert_eq!(stats.size, 777);
    assert_eq!(stats.counter, 777);
    assert_eq!(stats.capacity, stats.total_buckets * ENTRIES_PER_BUCKET);
    assert!(stats.total_buckets >= stats.root_buckets);
    assert!(stats.empty_buckets <= stats.total_buckets);
    assert!(stats.min_entries <= stats.max_entries);
    assert!(stats.counter_len.is_power_of_two());
    assert!(stats.to_string().contains("root_buckets"));
}

#[test]
fn test_concurrent_resize() {
    let map = Arc::new(MapOf::<u64, u64>::new());
    let mut handles = vec![];

    for thread_id in 0..4 {
        let map_clone = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            for i in 0..500 {
                let key = thread_id * 1000 + i;
                map_clone.store(key, key * 2);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(map.len(), 2000);
    for thread_id in 0..4 {
        for i in 0..500 {
            let key = thread_id * 1000 + i;
            assert_eq!(map.load(&key), Some(key * 2));
        }
    }
}

#[test]
fn test_resize_during_operations() {
    let map = Arc::new(MapOf::<u64, u64>::new());
    let mut handles = vec![];

    // inserter
    let map1 = Arc::clone(&map);
    handles.push(thread::spawn(move || {
        for i in 0..1000 {
            map1.store(i, i);
        }
    }));

    // deleter, racing the inserter on the low keys
    let map2 = Arc::clone(&map);
    handles.push(thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        for i in 0..500 {
            map2.delete(&i);
        }
    }));

    // reader
    let map3 = Arc::clone(&map);
    handles.push(thread::spawn(move || {
        for _ in 0..100 {
            for i in 0..100 {
                let _ = map3.load(&i);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }));

    for handle in handles {
        handle.join().unwrap();
    }

    for i in 500..1000 {
        assert_eq!(map.load(&i), Some(i));
    }
}

#[test]
fn test_grow_and_shrink_under_concurrent_readers() {
    let map = Arc::new(MapOf::<u64, u64>::new());
    // Pinned keys are never deleted and must stay visible through every resize.
    for i in 0..64 {
        map.store(u64::MAX - i, i);
    }
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let map = Arc::clone(&map);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    for i in 0..64 {
                        assert_eq!(map.load(&(u64::MAX - i)), Some(i));
                    }
                }
            })
        })
        .collect();

    for _ in 0..5 {
        for i in 0..20_000 {
            map.store(i, i);
        }
        for i in 0..20_000 {
            map.delete(&i);
        }
    }
    stop.store(true, Ordering::Relaxed);
    for r in readers {
        r.join().unwrap();
    }

    let stats = map.stats();
    assert!(stats.total_growths >= 5);
    assert!(stats.total_shrinks >= 5);
    assert_eq!(map.len(), 64);
}
