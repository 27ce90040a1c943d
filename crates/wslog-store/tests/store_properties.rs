//! Property tests for the time-series store.
//!
//! Run with:
//! ```
//! cargo test -p wslog-store --test store_properties
//! ```

use proptest::prelude::*;
use time::macros::datetime;
use time::{Duration, PrimitiveDateTime};
use wslog_store::{FlushMode, Partitioning, StoreOptions, TimeSeriesStore};
use wslog_types::{Reading, Sample};

fn reading(ts: PrimitiveDateTime, n: usize) -> Reading {
    Sample {
        delay: Some(5),
        temp_out: Some(n as f64 / 10.0),
        ..Default::default()
    }
    .at(ts)
}

fn timestamps(gaps: &[u32]) -> Vec<PrimitiveDateTime> {
    let mut ts = datetime!(2023-12-30 22:00:00);
    gaps.iter()
        .map(|gap| {
            ts += Duration::minutes(i64::from(*gap));
            ts
        })
        .collect()
}

fn flush_mode() -> impl Strategy<Value = FlushMode> {
    prop_oneof![
        Just(FlushMode::Always),
        Just(FlushMode::Periodic(std::time::Duration::from_secs(3600))),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A full slice returns exactly the appended records, in order.
    #[test]
    fn slice_matches_append_order(
        gaps in proptest::collection::vec(1u32..2000, 1..150),
        cache in 1usize..4,
        flush in flush_mode(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let options = StoreOptions::default().cache_partitions(cache).flush(flush);
        let mut store: TimeSeriesStore<Reading> =
            TimeSeriesStore::open(dir.path(), Partitioning::Day, options).unwrap();

        let expected = timestamps(&gaps);
        for (n, ts) in expected.iter().enumerate() {
            store.append(reading(*ts, n)).unwrap();
        }

        let got: Vec<_> = store
            .slice(None, None)
            .map(|r| r.unwrap().timestamp)
            .collect();
        prop_assert_eq!(&got, &expected);
        prop_assert!(got.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(store.cached_partitions() <= cache);

        // Reopening reads the same sequence back from disk.
        drop(store);
        let mut store: TimeSeriesStore<Reading> =
            TimeSeriesStore::open(dir.path(), Partitioning::Day, options).unwrap();
        let reread: Vec<_> = store
            .slice(None, None)
            .map(|r| r.unwrap().timestamp)
            .collect();
        prop_assert_eq!(reread, expected);
    }

    /// Bounded slices agree with filtering the appended records.
    #[test]
    fn bounded_slice_is_filtered_sequence(
        gaps in proptest::collection::vec(1u32..600, 1..100),
        from in 0i64..3000,
        len in 0i64..3000,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let mut store: TimeSeriesStore<Reading> =
            TimeSeriesStore::open(dir.path(), Partitioning::Day, StoreOptions::default()).unwrap();
        let all = timestamps(&gaps);
        for (n, ts) in all.iter().enumerate() {
            store.append(reading(*ts, n)).unwrap();
        }

        let start = datetime!(2023-12-30 22:00:00) + Duration::minutes(from);
        let end = start + Duration::minutes(len);
        let expected: Vec<_> = all.iter().copied().filter(|t| *t >= start && *t < end).collect();
        let got: Vec<_> = store
            .slice(Some(start), Some(end))
            .map(|r| r.unwrap().timestamp)
            .collect();
        prop_assert_eq!(got, expected);

        let before = store.nearest_before(start).unwrap().map(|r| r.timestamp);
        prop_assert_eq!(before, all.iter().copied().filter(|t| *t < start).last());
        let after = store.after(start).unwrap().map(|r| r.timestamp);
        prop_assert_eq!(after, all.iter().copied().find(|t| *t >= start));
    }

    /// Appending anything not newer than the last record is rejected.
    #[test]
    fn stale_appends_are_rejected(
        gaps in proptest::collection::vec(1u32..600, 1..40),
        back in 0i64..5000,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let mut store: TimeSeriesStore<Reading> =
            TimeSeriesStore::open(dir.path(), Partitioning::Day, StoreOptions::default()).unwrap();
        let all = timestamps(&gaps);
        for (n, ts) in all.iter().enumerate() {
            store.append(reading(*ts, n)).unwrap();
        }
        let last = *all.last().unwrap();
        let stale = last - Duration::minutes(back);
        let rejected = matches!(
            store.append(reading(stale, 0)),
            Err(wslog_store::Error::OutOfOrder { .. })
        );
        prop_assert!(rejected);
        prop_assert_eq!(store.slice(None, None).count(), all.len());
    }
}
