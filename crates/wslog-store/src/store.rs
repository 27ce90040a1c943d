//! Main store implementation.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::ops::Bound::{Excluded, Unbounded};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use time::{Date, PrimitiveDateTime};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::partition::{
    Partition, PartitionCache, Partitioning, create_parent, drop_torn_row, row_writer,
};
use crate::record::{Record, RowWriter};

/// When appended rows reach the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Flush and sync after every append.
    #[default]
    Always,
    /// Buffer appends, flushing at most this often, on partition switch,
    /// on [`TimeSeriesStore::flush`] and on drop.
    Periodic(Duration),
}

/// Options for opening a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Number of partitions kept in memory.
    pub cache_partitions: usize,
    /// Write durability.
    pub flush: FlushMode,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            cache_partitions: 2,
            flush: FlushMode::Always,
        }
    }
}

impl StoreOptions {
    /// Set the partition cache size.
    pub fn cache_partitions(mut self, partitions: usize) -> Self {
        self.cache_partitions = partitions;
        self
    }

    /// Set the flush mode.
    pub fn flush(mut self, flush: FlushMode) -> Self {
        self.flush = flush;
        self
    }
}

/// Result of an import operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportResult {
    /// Records that were not stored before.
    pub imported: usize,
    /// Records that replaced an existing record with the same timestamp.
    pub replaced: usize,
    /// Partition files rewritten.
    pub partitions: usize,
}

struct PendingWriter {
    start: Date,
    writer: csv::Writer<File>,
    dirty: bool,
    last_flush: Instant,
}

impl PendingWriter {
    fn flush(&mut self) -> Result<()> {
        if self.dirty {
            self.writer.flush()?;
            self.writer.get_ref().sync_data()?;
            self.dirty = false;
        }
        self.last_flush = Instant::now();
        Ok(())
    }
}

/// Timestamp-ordered records split into date partition files.
///
/// Presents the partition files under one directory as a single sequence.
/// At most `cache_partitions` partitions are held in memory; everything
/// else is read from disk on demand. Appends only ever add rows to the end
/// of a file, so readers in other processes never see earlier rows change.
pub struct TimeSeriesStore<R: Record> {
    root: PathBuf,
    partitioning: Partitioning,
    flush_mode: FlushMode,
    cache: PartitionCache<R>,
    partitions: BTreeSet<Date>,
    last: Option<PrimitiveDateTime>,
    writer: Option<PendingWriter>,
}

impl<R: Record> TimeSeriesStore<R> {
    /// Open or create a store rooted at `root`.
    pub fn open<P: AsRef<Path>>(
        root: P,
        partitioning: Partitioning,
        options: StoreOptions,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            fs::create_dir_all(&root).map_err(|e| Error::CreateDirectory {
                path: root.clone(),
                source: e,
            })?;
        }
        let partitions = partitioning.scan(&root)?;
        debug!(
            "Opened store at {} with {} partitions",
            root.display(),
            partitions.len()
        );

        let mut store = Self {
            root,
            partitioning,
            flush_mode: options.flush,
            cache: PartitionCache::new(options.cache_partitions),
            partitions,
            last: None,
            writer: None,
        };
        store.last = store.last()?.map(|r| r.timestamp());
        Ok(store)
    }

    /// Directory holding the partition files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Partitioning scheme.
    pub fn partitioning(&self) -> Partitioning {
        self.partitioning
    }

    /// Timestamp of the newest record, without touching the disk.
    pub fn last_timestamp(&self) -> Option<PrimitiveDateTime> {
        self.last
    }

    /// Number of partition files.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Number of partitions currently held in memory.
    pub fn cached_partitions(&self) -> usize {
        self.cache.len()
    }

    fn partition_start(&self, ts: PrimitiveDateTime) -> Date {
        self.partitioning.start_of(ts.date())
    }

    fn next_partition(&self, after: Date) -> Option<Date> {
        self.partitions.range((Excluded(after), Unbounded)).next().copied()
    }

    fn prev_partition(&self, before: Date) -> Option<Date> {
        self.partitions.range(..before).next_back().copied()
    }

    fn partition(&mut self, start: Date) -> Result<&mut Partition<R>> {
        if !self.cache.contains(start) {
            // The file must be complete before it is read back.
            if let Some(writer) = self.writer.as_mut().filter(|w| w.start == start) {
                writer.flush()?;
            }
        }
        let path = self.partitioning.path(&self.root, start);
        self.cache
            .get_or_load(start, || Partition::load(&path, start))
    }

    // === Lookups ===

    /// The record stored at exactly `ts`.
    pub fn get(&mut self, ts: PrimitiveDateTime) -> Result<Option<R>> {
        let start = self.partition_start(ts);
        if !self.partitions.contains(&start) {
            return Ok(None);
        }
        let partition = self.partition(start)?;
        Ok(partition
            .records
            .binary_search_by_key(&ts, |r| r.timestamp())
            .ok()
            .map(|i| partition.records[i].clone()))
    }

    /// The newest record strictly before `ts`.
    pub fn nearest_before(&mut self, ts: PrimitiveDateTime) -> Result<Option<R>> {
        let mut next = self.partitions.range(..=self.partition_start(ts)).next_back().copied();
        while let Some(start) = next {
            let partition = self.partition(start)?;
            let idx = partition.records.partition_point(|r| r.timestamp() < ts);
            if idx > 0 {
                return Ok(Some(partition.records[idx - 1].clone()));
            }
            next = self.prev_partition(start);
        }
        Ok(None)
    }

    /// The oldest record at or after `ts`.
    pub fn after(&mut self, ts: PrimitiveDateTime) -> Result<Option<R>> {
        let mut next = self.partitions.range(self.partition_start(ts)..).next().copied();
        while let Some(start) = next {
            let partition = self.partition(start)?;
            let idx = partition.records.partition_point(|r| r.timestamp() < ts);
            if let Some(record) = partition.records.get(idx) {
                return Ok(Some(record.clone()));
            }
            next = self.next_partition(start);
        }
        Ok(None)
    }

    /// The oldest record.
    pub fn first(&mut self) -> Result<Option<R>> {
        let mut next = self.partitions.first().copied();
        while let Some(start) = next {
            if let Some(record) = self.partition(start)?.records.first() {
                return Ok(Some(record.clone()));
            }
            next = self.next_partition(start);
        }
        Ok(None)
    }

    /// The newest record.
    pub fn last(&mut self) -> Result<Option<R>> {
        let mut next = self.partitions.last().copied();
        while let Some(start) = next {
            if let Some(record) = self.partition(start)?.records.last() {
                return Ok(Some(record.clone()));
            }
            next = self.prev_partition(start);
        }
        Ok(None)
    }

    /// Records with `start <= timestamp < end`, oldest first.
    ///
    /// `None` leaves that side unbounded. Partitions are loaded one at a
    /// time as the iterator advances; pending appends are flushed first.
    pub fn slice(
        &mut self,
        start: Option<PrimitiveDateTime>,
        end: Option<PrimitiveDateTime>,
    ) -> Slice<'_, R> {
        let first = match start {
            Some(ts) => self.partitions.range(self.partition_start(ts)..).next().copied(),
            None => self.partitions.first().copied(),
        };
        Slice {
            store: self,
            start,
            end,
            current: first,
            index: 0,
            positioned: false,
        }
    }

    // === Writes ===

    fn writer_for(&mut self, start: Date) -> Result<&mut PendingWriter> {
        if self.writer.as_ref().is_some_and(|w| w.start != start) {
            self.close_writer()?;
        }
        if self.writer.is_none() {
            let path = self.partitioning.path(&self.root, start);
            create_parent(&path)?;
            drop_torn_row(&path)?;
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            self.writer = Some(PendingWriter {
                start,
                writer: row_writer(file),
                dirty: false,
                last_flush: Instant::now(),
            });
        }
        match self.writer.as_mut() {
            Some(writer) => Ok(writer),
            None => Err(Error::InvalidRecord(format!("no writer for partition {start}"))),
        }
    }

    fn close_writer(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Append `record` after the newest stored record.
    ///
    /// Fails with [`Error::OutOfOrder`] unless its timestamp is strictly
    /// later than every stored timestamp. Use [`TimeSeriesStore::import`]
    /// to merge older records.
    pub fn append(&mut self, record: R) -> Result<()> {
        let ts = record.timestamp();
        if let Some(last) = self.last {
            if ts <= last {
                return Err(Error::OutOfOrder {
                    last,
                    attempted: ts,
                });
            }
        }

        let start = self.partition_start(ts);
        let mut row = RowWriter::new();
        record.write_row(&mut row);

        let mode = self.flush_mode;
        let pending = self.writer_for(start)?;
        pending.writer.write_record(row.into_fields())?;
        pending.dirty = true;
        match mode {
            FlushMode::Always => pending.flush()?,
            FlushMode::Periodic(interval) => {
                if pending.last_flush.elapsed() >= interval {
                    pending.flush()?;
                }
            }
        }

        if let Some(partition) = self.cache.peek_mut(start) {
            partition.records.push(record);
        }
        self.partitions.insert(start);
        self.last = Some(ts);
        Ok(())
    }

    /// Write any buffered appends to disk.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Remove every record at or after `ts`.
    ///
    /// Affected partitions are rewritten via a temporary file and rename,
    /// or deleted when nothing is left in them.
    pub fn truncate_from(&mut self, ts: PrimitiveDateTime) -> Result<()> {
        self.close_writer()?;
        let cut = self.partition_start(ts);
        let affected: Vec<Date> = self.partitions.range(cut..).copied().collect();
        if affected.is_empty() {
            return Ok(());
        }

        let mut removed = 0usize;
        for start in affected {
            let path = self.partitioning.path(&self.root, start);
            let emptied = if start == cut {
                let partition = self.partition(start)?;
                let before = partition.records.len();
                partition.records.retain(|r| r.timestamp() < ts);
                removed += before - partition.records.len();
                Partition::rewrite(&path, &partition.records)?;
                partition.records.is_empty()
            } else {
                fs::remove_file(&path)?;
                true
            };
            if emptied {
                self.cache.remove(start);
                self.partitions.remove(&start);
            }
        }
        debug!(
            "Truncated {} from {}: dropped {} records from the cut partition",
            self.root.display(),
            ts,
            removed
        );
        self.last = self.last()?.map(|r| r.timestamp());
        Ok(())
    }

    /// Delete every record.
    pub fn clear(&mut self) -> Result<()> {
        self.writer = None;
        self.cache.clear();
        self.partitions.clear();
        self.last = None;
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        fs::create_dir_all(&self.root).map_err(|e| Error::CreateDirectory {
            path: self.root.clone(),
            source: e,
        })?;
        info!("Cleared {}", self.root.display());
        Ok(())
    }

    /// Merge records in any order, replacing records with equal timestamps.
    ///
    /// This is the offline path for bulk loads. Each affected partition is
    /// read, merged and rewritten atomically.
    pub fn import<I>(&mut self, records: I) -> Result<ImportResult>
    where
        I: IntoIterator<Item = R>,
    {
        self.close_writer()?;
        let mut grouped: BTreeMap<Date, Vec<R>> = BTreeMap::new();
        for record in records {
            grouped
                .entry(self.partition_start(record.timestamp()))
                .or_default()
                .push(record);
        }

        let mut result = ImportResult::default();
        for (start, incoming) in grouped {
            let path = self.partitioning.path(&self.root, start);
            let partition = self.partition(start)?;
            let mut merged: BTreeMap<PrimitiveDateTime, R> = partition
                .records
                .drain(..)
                .map(|r| (r.timestamp(), r))
                .collect();
            for record in incoming {
                if merged.insert(record.timestamp(), record).is_some() {
                    result.replaced += 1;
                } else {
                    result.imported += 1;
                }
            }
            partition.records = merged.into_values().collect();
            Partition::rewrite(&path, &partition.records)?;
            self.partitions.insert(start);
            result.partitions += 1;
        }

        self.last = self.last()?.map(|r| r.timestamp());
        info!(
            "Imported {} new and {} replacement records into {}",
            result.imported,
            result.replaced,
            self.root.display()
        );
        Ok(result)
    }
}

impl<R: Record> Drop for TimeSeriesStore<R> {
    fn drop(&mut self) {
        if let Err(e) = self.close_writer() {
            warn!("Failed to flush {} on close: {}", self.root.display(), e);
        }
    }
}

/// Lazy iterator over a range of a [`TimeSeriesStore`].
///
/// Created by [`TimeSeriesStore::slice`].
pub struct Slice<'a, R: Record> {
    store: &'a mut TimeSeriesStore<R>,
    start: Option<PrimitiveDateTime>,
    end: Option<PrimitiveDateTime>,
    current: Option<Date>,
    index: usize,
    positioned: bool,
}

impl<R: Record> Iterator for Slice<'_, R> {
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.positioned {
            if let Err(e) = self.store.flush() {
                self.current = None;
                return Some(Err(e));
            }
        }
        loop {
            let start = self.current?;
            if let Some(end) = self.end {
                if start > self.store.partition_start(end) {
                    self.current = None;
                    return None;
                }
            }

            let partition = match self.store.partition(start) {
                Ok(partition) => partition,
                Err(e) => {
                    self.current = None;
                    return Some(Err(e));
                }
            };
            if !self.positioned {
                self.index = match self.start {
                    Some(ts) => partition.records.partition_point(|r| r.timestamp() < ts),
                    None => 0,
                };
                self.positioned = true;
            }
            if let Some(record) = partition.records.get(self.index) {
                if self.end.is_some_and(|end| record.timestamp() >= end) {
                    self.current = None;
                    return None;
                }
                self.index += 1;
                return Some(Ok(record.clone()));
            }

            self.current = self.store.next_partition(start);
            self.index = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use wslog_types::{Reading, Sample};

    fn reading(ts: PrimitiveDateTime, temp: f64) -> Reading {
        Sample {
            delay: Some(5),
            temp_out: Some(temp),
            ..Default::default()
        }
        .at(ts)
    }

    fn open(dir: &Path) -> TimeSeriesStore<Reading> {
        TimeSeriesStore::open(dir, Partitioning::Day, StoreOptions::default()).unwrap()
    }

    fn timestamps(store: &mut TimeSeriesStore<Reading>) -> Vec<PrimitiveDateTime> {
        store
            .slice(None, None)
            .map(|r| r.unwrap().timestamp)
            .collect()
    }

    #[test]
    fn test_append_after_torn_row_starts_new_line() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("raw");
        let path = Partitioning::Day.path(&root, time::macros::date!(2024 - 06 - 01));
        {
            let mut store = open(&root);
            store.append(reading(datetime!(2024-06-01 12:00:00), 20.0)).unwrap();
            store.append(reading(datetime!(2024-06-01 12:05:00), 20.5)).unwrap();
        }
        // interrupted write of the 12:05 row
        let content = fs::read(&path).unwrap();
        fs::write(&path, &content[..content.len() - 10]).unwrap();

        let mut store = open(&root);
        assert_eq!(store.last_timestamp(), Some(datetime!(2024-06-01 12:00:00)));
        store.append(reading(datetime!(2024-06-01 12:10:00), 21.0)).unwrap();
        store.append(reading(datetime!(2024-06-01 12:15:00), 21.5)).unwrap();
        drop(store);

        let mut store = open(&root);
        assert_eq!(
            timestamps(&mut store),
            vec![
                datetime!(2024-06-01 12:00:00),
                datetime!(2024-06-01 12:10:00),
                datetime!(2024-06-01 12:15:00),
            ]
        );
        assert!(fs::read_to_string(&path).unwrap().ends_with('\n'));
    }

    #[test]
    fn test_open_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(&dir.path().join("raw"));
        assert!(store.first().unwrap().is_none());
        assert!(store.last().unwrap().is_none());
        assert_eq!(store.last_timestamp(), None);
        assert_eq!(store.slice(None, None).count(), 0);
    }

    #[test]
    fn test_append_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(dir.path());
        store.append(reading(datetime!(2024-01-01 23:55:00), 1.0)).unwrap();
        store.append(reading(datetime!(2024-01-02 00:00:00), 2.0)).unwrap();

        let r = store.get(datetime!(2024-01-02 00:00:00)).unwrap().unwrap();
        assert_eq!(r.sample.temp_out, Some(2.0));
        assert!(store.get(datetime!(2024-01-02 00:01:00)).unwrap().is_none());
        assert!(store.get(datetime!(2023-01-02 00:00:00)).unwrap().is_none());
        assert_eq!(store.partition_count(), 2);
        assert!(dir.path().join("2024/2024-01/2024-01-02.txt").exists());
    }

    #[test]
    fn test_append_out_of_order_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(dir.path());
        store.append(reading(datetime!(2024-01-01 12:00:00), 1.0)).unwrap();

        let err = store
            .append(reading(datetime!(2024-01-01 12:00:00), 1.0))
            .unwrap_err();
        assert!(matches!(err, Error::OutOfOrder { .. }));
        let err = store
            .append(reading(datetime!(2023-12-31 12:00:00), 1.0))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfOrder { last, .. } if last == datetime!(2024-01-01 12:00:00)
        ));
        assert_eq!(timestamps(&mut store).len(), 1);
    }

    #[test]
    fn test_reopen_sees_appends() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = open(dir.path());
            store.append(reading(datetime!(2024-01-01 12:00:00), 1.0)).unwrap();
            store.append(reading(datetime!(2024-01-03 12:00:00), 3.0)).unwrap();
        }
        let mut store = open(dir.path());
        assert_eq!(store.last_timestamp(), Some(datetime!(2024-01-03 12:00:00)));
        assert!(store.append(reading(datetime!(2024-01-02 12:00:00), 2.0)).is_err());
        store.append(reading(datetime!(2024-01-04 12:00:00), 4.0)).unwrap();
        assert_eq!(timestamps(&mut store).len(), 3);
    }

    #[test]
    fn test_nearest_before_and_after_cross_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(dir.path());
        store.append(reading(datetime!(2024-01-01 10:00:00), 1.0)).unwrap();
        store.append(reading(datetime!(2024-01-05 10:00:00), 5.0)).unwrap();

        let before = store.nearest_before(datetime!(2024-01-05 10:00:00)).unwrap();
        assert_eq!(before.unwrap().timestamp, datetime!(2024-01-01 10:00:00));
        assert!(store.nearest_before(datetime!(2024-01-01 10:00:00)).unwrap().is_none());

        let after = store.after(datetime!(2024-01-01 10:00:01)).unwrap();
        assert_eq!(after.unwrap().timestamp, datetime!(2024-01-05 10:00:00));
        let after = store.after(datetime!(2024-01-01 10:00:00)).unwrap();
        assert_eq!(after.unwrap().timestamp, datetime!(2024-01-01 10:00:00));
        assert!(store.after(datetime!(2024-01-05 10:00:01)).unwrap().is_none());

        assert_eq!(
            store.first().unwrap().unwrap().timestamp,
            datetime!(2024-01-01 10:00:00)
        );
    }

    #[test]
    fn test_slice_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(dir.path());
        for day in 1..=4u8 {
            for hour in [0u8, 12] {
                let ts = PrimitiveDateTime::new(
                    time::Date::from_calendar_date(2024, time::Month::March, day).unwrap(),
                    time::Time::from_hms(hour, 0, 0).unwrap(),
                );
                store.append(reading(ts, f64::from(day))).unwrap();
            }
        }

        let got: Vec<_> = store
            .slice(
                Some(datetime!(2024-03-02 00:00:00)),
                Some(datetime!(2024-03-03 12:00:00)),
            )
            .map(|r| r.unwrap().timestamp)
            .collect();
        assert_eq!(
            got,
            vec![
                datetime!(2024-03-02 00:00:00),
                datetime!(2024-03-02 12:00:00),
                datetime!(2024-03-03 00:00:00),
            ]
        );

        // Restarting yields the same sequence.
        let again = store
            .slice(
                Some(datetime!(2024-03-02 00:00:00)),
                Some(datetime!(2024-03-03 12:00:00)),
            )
            .count();
        assert_eq!(again, 3);

        let tail = store.slice(Some(datetime!(2024-03-04 06:00:00)), None).count();
        assert_eq!(tail, 1);
        assert!(store.cached_partitions() <= 2);
    }

    #[test]
    fn test_truncate_from() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(dir.path());
        store.append(reading(datetime!(2024-01-01 10:00:00), 1.0)).unwrap();
        store.append(reading(datetime!(2024-01-02 10:00:00), 2.0)).unwrap();
        store.append(reading(datetime!(2024-01-02 11:00:00), 3.0)).unwrap();
        store.append(reading(datetime!(2024-01-03 10:00:00), 4.0)).unwrap();

        store.truncate_from(datetime!(2024-01-02 11:00:00)).unwrap();
        assert_eq!(
            timestamps(&mut store),
            vec![datetime!(2024-01-01 10:00:00), datetime!(2024-01-02 10:00:00)]
        );
        assert!(!dir.path().join("2024/2024-01/2024-01-03.txt").exists());
        assert_eq!(store.last_timestamp(), Some(datetime!(2024-01-02 10:00:00)));

        // Appends may resume right after the cut.
        store.append(reading(datetime!(2024-01-02 10:30:00), 5.0)).unwrap();

        store.truncate_from(datetime!(2024-01-02 00:00:00)).unwrap();
        assert!(!dir.path().join("2024/2024-01/2024-01-02.txt").exists());
        assert_eq!(store.partition_count(), 1);
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("hourly");
        let mut store = open(&root);
        store.append(reading(datetime!(2024-01-01 10:00:00), 1.0)).unwrap();
        store.clear().unwrap();
        assert!(root.exists());
        assert_eq!(store.partition_count(), 0);
        assert!(store.last().unwrap().is_none());
        store.append(reading(datetime!(2020-01-01 10:00:00), 1.0)).unwrap();
    }

    #[test]
    fn test_import_merges_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(dir.path());
        store.append(reading(datetime!(2024-01-01 10:00:00), 1.0)).unwrap();
        store.append(reading(datetime!(2024-01-01 12:00:00), 2.0)).unwrap();

        let result = store
            .import(vec![
                reading(datetime!(2024-01-02 08:00:00), 9.0),
                reading(datetime!(2024-01-01 11:00:00), 3.0),
                reading(datetime!(2024-01-01 12:00:00), 4.0),
            ])
            .unwrap();
        assert_eq!(
            result,
            ImportResult {
                imported: 2,
                replaced: 1,
                partitions: 2
            }
        );

        let temps: Vec<_> = store
            .slice(None, None)
            .map(|r| r.unwrap().sample.temp_out.unwrap())
            .collect();
        assert_eq!(temps, vec![1.0, 3.0, 4.0, 9.0]);
        assert_eq!(store.last_timestamp(), Some(datetime!(2024-01-02 08:00:00)));
    }

    #[test]
    fn test_periodic_flush_on_drop_and_slice() {
        let dir = tempfile::tempdir().unwrap();
        let options = StoreOptions::default().flush(FlushMode::Periodic(Duration::from_secs(3600)));
        let path = dir.path().join("2024/2024-01/2024-01-01.txt");
        {
            let mut store: TimeSeriesStore<Reading> =
                TimeSeriesStore::open(dir.path(), Partitioning::Day, options).unwrap();
            store.append(reading(datetime!(2024-01-01 10:00:00), 1.0)).unwrap();
            store.append(reading(datetime!(2024-01-01 10:05:00), 1.5)).unwrap();
            assert_eq!(store.slice(None, None).count(), 2);
            assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);
            store.append(reading(datetime!(2024-01-01 10:10:00), 2.0)).unwrap();
        }
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[test]
    fn test_monthly_partitioning() {
        let dir = tempfile::tempdir().unwrap();
        let mut store: TimeSeriesStore<Reading> =
            TimeSeriesStore::open(dir.path(), Partitioning::Month, StoreOptions::default())
                .unwrap();
        store.append(reading(datetime!(2024-01-01 09:00:00), 1.0)).unwrap();
        store.append(reading(datetime!(2024-01-31 09:00:00), 2.0)).unwrap();
        store.append(reading(datetime!(2024-02-01 09:00:00), 3.0)).unwrap();
        assert_eq!(store.partition_count(), 2);
        assert!(dir.path().join("2024/2024-01-01.txt").exists());
        assert!(dir.path().join("2024/2024-02-01.txt").exists());
    }
}
