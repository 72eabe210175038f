use std::sync::Arc;
use std::thread;
use std::time::Duration;

use stripemap::{MapConfig, MapOf, MIN_TABLE_LEN};

#[test]
fn test_clear_basic() {
    let m: MapOf<u64, String> = MapOf::with_presize(16);

    m.store(1, "one".to_string());
    m.store(2, "two".to_string());
    m.store(3, "three".to_string());
    assert_eq!(m.len(), 3);
    assert!(!m.is_empty());

    m.clear();

    assert_eq!(m.len(), 0);
    assert!(m.is_empty());
    assert_eq!(m.load(&1), None);
    assert_eq!(m.load(&2), None);
    assert_eq!(m.load(&3), None);
}

#[test]
fn test_clear_empty_map() {
    let m: MapOf<u64, String> = MapOf::new();
    assert!(m.is_empty());

    m.clear();

    assert_eq!(m.len(), 0);
    assert!(m.is_empty());
}

#[test]
fn test_clear_and_reinsert() {
    let m: MapOf<u64, String> = MapOf::with_presize(32);

    for i in 0..10 {
        m.store(i, format!("value_{}", i));
    }
    assert_eq!(m.len(), 10);

    m.clear();
    assert!(m.is_empty());

    for i in 0..5 {
        m.store(i + 100, format!("new_value_{}", i));
    }
    assert_eq!(m.len(), 5);
    for i in 0..5 {
        assert_eq!(m.load(&(i + 100)), Some(format!("new_value_{}", i)));
    }
    for i in 0..10 {
        assert_eq!(m.load(&i), None);
    }
}

#[test]
fn test_clear_resets_table_to_initial_size() {
    let m: MapOf<u64, u64> = MapOf::new();
    for i in 0..10_000 {
        m.store(i, i * 2);
    }
    assert!(m.stats().root_buckets > MIN_TABLE_LEN);

    m.clear();

    let stats = m.stats();
    assert_eq!(stats.root_buckets, MIN_TABLE_LEN);
    assert_eq!(stats.size, 0);
    assert_eq!(stats.counter, 0);
    assert_eq!(m.load(&0), None);
    assert_eq!(m.load(&9_999), None);
}

#[test]
fn test_clear_returns_to_presized_length() {
    let m: MapOf<u64, u64> = MapConfig::new().presize(5_000).build().unwrap();
    let presized = m.stats().root_buckets;
    for i in 0..50_000 {
        m.store(i, i);
    }
    assert!(m.stats().root_buckets > presized);

    m.clear();
    assert_eq!(m.stats().root_buckets, presized);
}

#[test]
fn test_clear_grow_only_map_still_resets() {
    let m: MapOf<u64, u64> = MapConfig::new().grow_only().build().unwrap();
    for i in 0..2_000 {
        m.store(i, i);
    }
    m.clear();
    assert_eq!(m.stats().root_buckets, MIN_TABLE_LEN);
    assert!(m.is_empty());
}

#[test]
fn test_clear_from_another_thread() {
    let m = Arc::new(MapOf::<u64, u64>::with_presize(128));
    for i in 0..100 {
        m.store(i, i * 2);
    }
    assert_eq!(m.len(), 100);

    let m_clone = Arc::clone(&m);
    thread::spawn(move || m_clone.clear()).join().unwrap();

    assert_eq!(m.len(), 0);
    assert!(m.is_empty());
}

#[test]
fn test_clear_concurrent_operations() {
    let m = Arc::new(MapOf::<u64, u64>::with_presize(256));
    for i in 0..50 {
        m.store(i, i);
    }

    let m1 = Arc::clone(&m);
    let m2 = Arc::clone(&m);
    let m3 = Arc::clone(&m);

    let handles = vec![
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            m1.clear();
        }),
        thread::spawn(move || {
            for i in 100..150 {
                m2.store(i, i * 3);
                thread::sleep(Duration::from_millis(1));
            }
        }),
        thread::spawn(move || {
            for i in 0..50 {
                let _ = m3.load(&i);
                thread::sleep(Duration::from_millis(1));
            }
        }),
    ];
    for handle in handles {
        handle.join().unwrap();
    }

    // Old entries are gone; whatever survived came from the concurrent writer.
    for i in 0..50 {
        assert_eq!(m.load(&i), None, "key {i} survived clear");
    }
    let mut count = 0;
    m.range(|k, v| {
        assert!((100..150).contains(k));
        assert_eq!(*v, k * 3);
        count += 1;
        true
    });
    assert_eq!(count, m.len());
}

#[test]
fn test_clear_multiple_times() {
    let m: MapOf<u64, u64> = MapOf::with_presize(32);

    for round in 0..5 {
        for i in 0..20 {
            m.store(i + round * 100, i * round);
        }
        assert_eq!(m.len(), 20);

        m.clear();
        assert_eq!(m.len(), 0);
        assert!(m.is_empty());
    }
}

#[test]
fn test_dropping_map_drops_values() {
    let witness = Arc::new(());
    {
        let m: MapOf<u32, Arc<()>> = MapOf::new();
        for i in 0..1_000 {
            m.store(i, Arc::clone(&witness));
        }
        assert_eq!(Arc::strong_count(&witness), 1_001);
    }
    assert_eq!(Arc::strong_count(&witness), 1);
}
