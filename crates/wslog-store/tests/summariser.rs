//! Integration tests for summary generation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use time::macros::datetime;
use time::{Duration, PrimitiveDateTime};
use wslog_store::{DataStores, Record, StoreOptions, Summariser, SummariserConfig, SummaryRecord};
use wslog_types::{Sample, WindDirection};

fn indoor_sample() -> Sample {
    Sample {
        delay: Some(5),
        hum_in: Some(45),
        temp_in: Some(20.0),
        ..Default::default()
    }
}

fn append(stores: &mut DataStores, ts: PrimitiveDateTime, f: impl FnOnce(&mut Sample)) {
    let mut sample = indoor_sample();
    f(&mut sample);
    stores.raw.append(sample.at(ts)).unwrap();
}

fn summariser(day_end_hour: u8) -> Summariser {
    Summariser::new(SummariserConfig {
        day_end_hour,
        ..Default::default()
    })
}

fn all<R: Record>(store: &mut wslog_store::TimeSeriesStore<R>) -> Vec<R> {
    store.slice(None, None).map(|r| r.unwrap()).collect()
}

/// Every summary file under `dir`, keyed by relative path.
fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_path_buf();
                out.insert(rel, fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    for sub in ["hourly", "daily", "monthly"] {
        walk(dir, &dir.join(sub), &mut out);
    }
    out
}

/// A few days of five-minute data with a rain counter reset.
fn fill_raw(stores: &mut DataStores, from: PrimitiveDateTime, count: usize) {
    let mut rain = 50.0;
    for i in 0..count {
        let ts = from + Duration::minutes(5 * i as i64);
        if i % 37 == 0 {
            rain += 0.3;
        }
        if i == 500 {
            rain = 0.0;
        }
        let temp = 10.0 + ((i % 288) as f64 / 288.0 * std::f64::consts::TAU).sin() * 6.0;
        append(stores, ts, |s| {
            s.temp_out = Some((temp * 10.0).round() / 10.0);
            s.hum_out = Some(60 + (i % 30) as u8);
            s.abs_pressure = Some(1000.0 + (i % 50) as f64 / 10.0);
            s.wind_ave = Some((i % 7) as f64 * 0.3);
            s.wind_gust = Some((i % 7) as f64 * 0.6);
            s.wind_dir = WindDirection::new((i % 16) as u8);
            s.rain = Some((rain * 10.0_f64).round() / 10.0);
        });
    }
}

// ==========================================================================
// Scenarios
// ==========================================================================

#[test]
fn test_daily_extremes_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = DataStores::open(dir.path(), StoreOptions::default()).unwrap();
    for (ts, temp) in [
        (datetime!(2024-06-01 09:00:00), 10.0),
        (datetime!(2024-06-01 10:00:00), 12.0),
        (datetime!(2024-06-01 11:00:00), 9.0),
    ] {
        append(&mut stores, ts, |s| s.temp_out = Some(temp));
    }

    let report = summariser(24).process(&mut stores).unwrap();
    assert_eq!(report.daily, 1);
    assert_eq!(report.hourly, 3);

    let daily = all(&mut stores.daily);
    assert_eq!(daily.len(), 1);
    let day = &daily[0];
    assert_eq!(day.start, datetime!(2024-06-01 00:00:00));
    assert_eq!(day.idx, datetime!(2024-06-02 00:00:00));
    let temp = day.fields.temp_out;
    assert_eq!(temp.min, Some(9.0));
    assert_eq!(temp.min_t, Some(datetime!(2024-06-01 11:00:00)));
    assert_eq!(temp.max, Some(12.0));
    assert_eq!(temp.max_t, Some(datetime!(2024-06-01 10:00:00)));
    assert_eq!(temp.last, Some(9.0));
    assert_eq!(temp.ave, Some(10.33));
    assert_eq!(day.count, 3);
}

#[test]
fn test_rain_counter_reset_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = DataStores::open(dir.path(), StoreOptions::default()).unwrap();
    let start = datetime!(2024-06-01 12:00:00);
    for (i, rain) in [100.0, 100.3, 100.3, 0.0, 0.3].into_iter().enumerate() {
        append(&mut stores, start + Duration::minutes(5 * i as i64), |s| {
            s.rain = Some(rain)
        });
    }

    let report = summariser(24).process(&mut stores).unwrap();
    assert_eq!(report.counter_resets.len(), 1);
    let reset = report.counter_resets[0];
    assert_eq!(reset.timestamp, datetime!(2024-06-01 12:15:00));
    assert_eq!(reset.previous, 100.3);
    assert_eq!(reset.current, 0.0);

    let hourly = all(&mut stores.hourly);
    assert_eq!(hourly.len(), 1);
    assert!((hourly[0].rain - 0.6).abs() < 1e-9);
    let daily = all(&mut stores.daily);
    assert!((daily[0].rain - 0.6).abs() < 1e-9);
    assert!(daily.iter().all(|d| d.rain >= 0.0));
}

#[test]
fn test_rain_jump_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = DataStores::open(dir.path(), StoreOptions::default()).unwrap();
    let start = datetime!(2024-06-01 12:00:00);
    for (i, rain) in [10.0, 10.3, 210.3, 210.6].into_iter().enumerate() {
        append(&mut stores, start + Duration::minutes(5 * i as i64), |s| {
            s.rain = Some(rain)
        });
    }
    let report = summariser(9).process(&mut stores).unwrap();
    assert_eq!(report.rain_jumps, 1);
    assert!(report.counter_resets.is_empty());
    assert!((all(&mut stores.hourly)[0].rain - 0.6).abs() < 1e-9);
}

#[test]
fn test_rain_carries_across_missing_totals() {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = DataStores::open(dir.path(), StoreOptions::default()).unwrap();
    let start = datetime!(2024-06-01 12:00:00);
    for (i, rain) in [Some(100.0), None, Some(101.0), None, None, Some(101.3)]
        .into_iter()
        .enumerate()
    {
        append(&mut stores, start + Duration::minutes(5 * i as i64), |s| s.rain = rain);
    }

    let report = summariser(24).process(&mut stores).unwrap();
    assert!(report.counter_resets.is_empty());
    assert_eq!(report.rain_jumps, 0);
    let hourly = all(&mut stores.hourly);
    assert_eq!(hourly.len(), 1);
    assert!((hourly[0].rain - 1.3).abs() < 1e-9, "{}", hourly[0].rain);
    assert!((all(&mut stores.daily)[0].rain - 1.3).abs() < 1e-9);
}

#[test]
fn test_rain_baseline_skips_reading_without_total() {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = DataStores::open(dir.path(), StoreOptions::default()).unwrap();
    // the newest reading before the 12:00 hour has no rain total
    append(&mut stores, datetime!(2024-06-01 11:50:00), |s| s.rain = Some(100.0));
    append(&mut stores, datetime!(2024-06-01 11:55:00), |s| s.rain = None);
    append(&mut stores, datetime!(2024-06-01 12:00:00), |s| s.rain = Some(100.6));
    append(&mut stores, datetime!(2024-06-01 12:05:00), |s| s.rain = Some(100.9));

    summariser(24).process(&mut stores).unwrap();
    let hourly = all(&mut stores.hourly);
    assert_eq!(hourly.len(), 2);
    assert_eq!(hourly[0].rain, 0.0);
    assert!((hourly[1].rain - 0.9).abs() < 1e-9, "{}", hourly[1].rain);

    // recomputing the last hour on its own seeds from the same total
    let report = summariser(24).process(&mut stores).unwrap();
    assert_eq!(report.hourly, 1);
    assert!((all(&mut stores.hourly)[1].rain - 0.9).abs() < 1e-9);
}

#[test]
fn test_missing_values_mid_window() {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = DataStores::open(dir.path(), StoreOptions::default()).unwrap();
    let start = datetime!(2024-06-01 12:00:00);
    for (i, temp) in [Some(10.0), None, Some(14.0), None].into_iter().enumerate() {
        append(&mut stores, start + Duration::minutes(5 * i as i64), |s| {
            s.temp_out = temp;
            s.rain = Some(20.0);
        });
    }

    summariser(24).process(&mut stores).unwrap();
    let hour = &all(&mut stores.hourly)[0];
    assert_eq!(hour.count, 4);
    let temp = hour.fields.temp_out;
    assert_eq!(temp.count, 2);
    assert_eq!(temp.ave, Some(12.0));
    assert_eq!(temp.min, Some(10.0));
    assert_eq!(temp.max, Some(14.0));
    assert_eq!(temp.last, Some(14.0));
    assert_eq!(temp.last_t, Some(datetime!(2024-06-01 12:10:00)));
    // fields never reported stay empty
    assert_eq!(hour.fields.hum_out.count, 0);
    assert_eq!(hour.fields.hum_out.ave, None);
    assert_eq!(hour.rain, 0.0);
}

// ==========================================================================
// Window alignment
// ==========================================================================

fn daily_windows(day_end_hour: u8, times: &[PrimitiveDateTime]) -> Vec<SummaryRecord> {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = DataStores::open(dir.path(), StoreOptions::default()).unwrap();
    for ts in times {
        append(&mut stores, *ts, |s| s.temp_out = Some(1.0));
    }
    summariser(day_end_hour).process(&mut stores).unwrap();
    all(&mut stores.daily)
}

#[test]
fn test_day_end_hour_nine_alignment() {
    let days = daily_windows(
        9,
        &[datetime!(2024-06-02 08:59:00), datetime!(2024-06-02 09:01:00)],
    );
    assert_eq!(days.len(), 2);
    assert_eq!(days[0].idx, datetime!(2024-06-02 09:00:00));
    assert_eq!(days[0].fields.temp_out.last_t, Some(datetime!(2024-06-02 08:59:00)));
    assert_eq!(days[1].start, datetime!(2024-06-02 09:00:00));
    assert_eq!(days[1].fields.temp_out.last_t, Some(datetime!(2024-06-02 09:01:00)));
}

#[test]
fn test_day_end_hour_twenty_one_alignment() {
    let days = daily_windows(21, &[datetime!(2024-06-02 22:00:00)]);
    assert_eq!(days.len(), 1);
    assert_eq!(days[0].start, datetime!(2024-06-02 21:00:00));
    assert_eq!(days[0].idx, datetime!(2024-06-03 21:00:00));
}

#[test]
fn test_gaps_produce_empty_windows() {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = DataStores::open(dir.path(), StoreOptions::default()).unwrap();
    append(&mut stores, datetime!(2024-06-01 10:10:00), |s| s.temp_out = Some(5.0));
    append(&mut stores, datetime!(2024-06-01 13:20:00), |s| s.temp_out = Some(6.0));
    summariser(9).process(&mut stores).unwrap();

    let hourly = all(&mut stores.hourly);
    let counts: Vec<u32> = hourly.iter().map(|h| h.count).collect();
    assert_eq!(counts, vec![1, 0, 0, 1]);
    assert_eq!(hourly[1].fields.temp_out.ave, None);
    assert_eq!(hourly[1].rain, 0.0);
}

// ==========================================================================
// Incremental and full processing
// ==========================================================================

#[test]
fn test_reprocess_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = DataStores::open(dir.path(), StoreOptions::default()).unwrap();
    fill_raw(&mut stores, datetime!(2024-01-28 06:02:00), 1500);
    let summariser = Summariser::new(SummariserConfig {
        day_end_hour: 21,
        pressure_offset: Some(12.3),
        ..Default::default()
    });

    let first_report = summariser.reprocess(&mut stores).unwrap();
    let first = snapshot(dir.path());
    let second_report = summariser.reprocess(&mut stores).unwrap();
    let second = snapshot(dir.path());

    assert!(!first.is_empty());
    assert_eq!(first, second);
    assert_eq!(first_report, second_report);
    assert_eq!(first_report.counter_resets.len(), 1);
    assert!(first_report.monthly >= 2);
}

#[test]
fn test_incremental_matches_full_reprocess() {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = DataStores::open(dir.path(), StoreOptions::default()).unwrap();
    let summariser = summariser(9);
    let start = datetime!(2024-02-28 00:03:00);

    // Summarise after every batch, like a live logger would.
    let mut rain = 0.0;
    for batch in 0..12 {
        for i in 0..60 {
            let n = batch * 60 + i;
            let ts = start + Duration::minutes(5 * n as i64);
            if n % 11 == 0 {
                rain += 0.3;
            }
            append(&mut stores, ts, |s| {
                s.temp_out = Some(((n % 97) as f64 - 40.0) / 10.0);
                s.abs_pressure = Some(990.0 + (n % 13) as f64);
                s.rain = Some((rain * 10.0_f64).round() / 10.0);
                s.wind_ave = Some(1.2);
                s.wind_dir = WindDirection::new((n / 50 % 16) as u8);
            });
        }
        summariser.process(&mut stores).unwrap();
    }
    let incremental = snapshot(dir.path());

    summariser.reprocess(&mut stores).unwrap();
    let full = snapshot(dir.path());
    assert_eq!(incremental, full);

    let monthly = all(&mut stores.monthly);
    assert_eq!(monthly.len(), 2);
    assert_eq!(monthly[0].start, datetime!(2024-02-01 09:00:00));
    assert_eq!(monthly[1].start, datetime!(2024-03-01 09:00:00));
    let daily = all(&mut stores.daily);
    let total: f64 = daily.iter().map(|d| d.rain).sum();
    let month_total: f64 = monthly.iter().map(|m| m.rain).sum();
    assert!((total - month_total).abs() < 0.011);
}

#[test]
fn test_monthly_rain_days() {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = DataStores::open(dir.path(), StoreOptions::default()).unwrap();
    // Day one: 0.3 mm. Day two: nothing. Day three: 0.9 mm.
    let readings = [
        (datetime!(2024-05-01 10:00:00), 1.0),
        (datetime!(2024-05-01 11:00:00), 1.3),
        (datetime!(2024-05-02 10:00:00), 1.3),
        (datetime!(2024-05-03 10:00:00), 1.3),
        (datetime!(2024-05-03 11:00:00), 2.2),
    ];
    for (ts, rain) in readings {
        append(&mut stores, ts, |s| s.rain = Some(rain));
    }
    let summariser = Summariser::new(SummariserConfig {
        day_end_hour: 9,
        rain_day_threshold: 0.2,
        ..Default::default()
    });
    summariser.process(&mut stores).unwrap();

    let monthly = all(&mut stores.monthly);
    assert_eq!(monthly.len(), 1);
    assert_eq!(monthly[0].rain_days, 2);
    assert_eq!(monthly[0].days, 3);
    assert!((monthly[0].rain - 1.2).abs() < 1e-9);
}

#[test]
fn test_empty_raw_store_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let mut stores = DataStores::open(dir.path(), StoreOptions::default()).unwrap();
    let report = summariser(9).process(&mut stores).unwrap();
    assert_eq!(report, Default::default());
    assert!(all(&mut stores.hourly).is_empty());
    assert!(all(&mut stores.monthly).is_empty());
}
