//! Partition layout, loading and the partition cache.

use std::collections::{BTreeSet, VecDeque};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use time::{Date, Month};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::record::{Record, RowReader, RowWriter};

/// How a store splits its records into files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partitioning {
    /// One file per day: `YYYY/YYYY-MM/YYYY-MM-DD.txt`.
    Day,
    /// One file per month: `YYYY/YYYY-MM-01.txt`.
    Month,
    /// One file per year: `YYYY-01-01.txt`.
    Year,
}

impl Partitioning {
    /// First day of the partition containing `date`.
    pub fn start_of(&self, date: Date) -> Date {
        let (year, month, day) = match self {
            Partitioning::Day => return date,
            Partitioning::Month => (date.year(), date.month(), 1),
            Partitioning::Year => (date.year(), Month::January, 1),
        };
        Date::from_calendar_date(year, month, day).unwrap_or(date)
    }

    /// File holding the partition that starts on `start`.
    pub fn path(&self, root: &Path, start: Date) -> PathBuf {
        let year = format!("{:04}", start.year());
        let month = format!("{year}-{:02}", u8::from(start.month()));
        match self {
            Partitioning::Day => root
                .join(&year)
                .join(&month)
                .join(format!("{month}-{:02}.txt", start.day())),
            Partitioning::Month => root.join(&year).join(format!("{month}-01.txt")),
            Partitioning::Year => root.join(format!("{year}-01-01.txt")),
        }
    }

    /// Find every partition file under `root`.
    ///
    /// Files whose names are not partition dates are ignored.
    pub fn scan(&self, root: &Path) -> Result<BTreeSet<Date>> {
        let mut found = BTreeSet::new();
        if root.is_dir() {
            self.scan_dir(root, &mut found)?;
        }
        Ok(found)
    }

    fn scan_dir(&self, dir: &Path, found: &mut BTreeSet<Date>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.scan_dir(&path, found)?;
                continue;
            }
            let Some(date) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".txt"))
                .and_then(parse_file_date)
            else {
                continue;
            };
            found.insert(self.start_of(date));
        }
        Ok(())
    }
}

fn parse_file_date(name: &str) -> Option<Date> {
    let mut parts = name.splitn(3, '-');
    let year = parts.next()?.parse().ok()?;
    let month: u8 = parts.next()?.parse().ok()?;
    let day = parts.next()?.parse().ok()?;
    Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()
}

/// The records of one partition file, in timestamp order.
#[derive(Debug, Clone)]
pub struct Partition<R> {
    /// First day covered by this partition.
    pub start: Date,
    /// Records, strictly increasing by timestamp.
    pub records: Vec<R>,
}

impl<R: Record> Partition<R> {
    /// Read a partition file. A missing file is an empty partition.
    ///
    /// Text after the last newline is a row torn by an interrupted write
    /// and is ignored. A final row that fails to decode is taken to be a
    /// write in progress by another process and skipped.
    pub fn load(path: &Path, start: Date) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                start,
                records: Vec::new(),
            });
        }
        debug!("Loading partition {}", path.display());
        let content = fs::read(path)?;
        let complete = complete_len(&content);
        if complete < content.len() {
            debug!(
                "Ignoring {} byte(s) of torn row at end of {}",
                content.len() - complete,
                path.display()
            );
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(&content[..complete]);
        let rows = reader
            .records()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            match R::read_row(&mut RowReader::new(row)) {
                Ok(record) => records.push(record),
                Err(e) if i + 1 == rows.len() => {
                    debug!("Skipping incomplete last row of {}: {}", path.display(), e);
                }
                Err(e) => {
                    return Err(Error::InvalidRecord(format!(
                        "{} row {}: {}",
                        path.display(),
                        i + 1,
                        e
                    )));
                }
            }
        }
        Ok(Self { start, records })
    }

    /// Replace the partition file with `records`.
    ///
    /// The rows are written to a temporary file which is renamed over the
    /// original, so readers see either the old or the new contents. An
    /// empty partition removes the file.
    pub fn rewrite(path: &Path, records: &[R]) -> Result<()> {
        if records.is_empty() {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(());
        }
        create_parent(path)?;
        let tmp = path.with_extension("txt.tmp");
        {
            let mut writer = row_writer(File::create(&tmp)?);
            for record in records {
                let mut row = RowWriter::new();
                record.write_row(&mut row);
                writer.write_record(row.into_fields())?;
            }
            writer.flush()?;
            let file = writer
                .into_inner()
                .map_err(|e| Error::Io(e.into_error()))?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// CSV writer configured for partition rows.
pub(crate) fn row_writer<W: Write>(inner: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(inner)
}

/// Length of `content` up to and including its last newline.
fn complete_len(content: &[u8]) -> usize {
    content
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1)
}

/// Cut a torn final row off the partition file at `path`, so the next
/// append starts on a fresh line.
pub(crate) fn drop_torn_row(path: &Path) -> Result<()> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let complete = complete_len(&content);
    if complete < content.len() {
        warn!(
            "Dropping torn row ({} bytes) at end of {}",
            content.len() - complete,
            path.display()
        );
        let file = fs::OpenOptions::new().write(true).open(path)?;
        file.set_len(complete as u64)?;
        file.sync_all()?;
    }
    Ok(())
}

pub(crate) fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Bounded least-recently-used cache of loaded partitions.
#[derive(Debug)]
pub struct PartitionCache<R> {
    capacity: usize,
    // Most recently used first.
    entries: VecDeque<Partition<R>>,
}

impl<R: Record> PartitionCache<R> {
    /// Create a cache holding at most `capacity` partitions (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Whether the partition starting on `start` is loaded.
    pub fn contains(&self, start: Date) -> bool {
        self.entries.iter().any(|p| p.start == start)
    }

    /// The cached partition starting on `start`, without touching LRU order.
    pub fn peek_mut(&mut self, start: Date) -> Option<&mut Partition<R>> {
        self.entries.iter_mut().find(|p| p.start == start)
    }

    /// Return the partition starting on `start`, loading it on a miss and
    /// evicting the least recently used entry when full.
    pub fn get_or_load(
        &mut self,
        start: Date,
        load: impl FnOnce() -> Result<Partition<R>>,
    ) -> Result<&mut Partition<R>> {
        let hit = self
            .entries
            .iter()
            .position(|p| p.start == start)
            .and_then(|pos| self.entries.remove(pos));
        let partition = match hit {
            Some(partition) => partition,
            None => load()?,
        };
        self.entries.push_front(partition);
        if self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_back() {
                debug!("Evicting partition {}", evicted.start);
            }
        }
        match self.entries.front_mut() {
            Some(partition) => Ok(partition),
            None => {
                warn!("Partition cache unexpectedly empty");
                Err(Error::InvalidRecord(format!("partition {start} not cached")))
            }
        }
    }

    /// Drop the partition starting on `start`, if cached.
    pub fn remove(&mut self, start: Date) {
        self.entries.retain(|p| p.start != start);
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of loaded partitions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is loaded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
