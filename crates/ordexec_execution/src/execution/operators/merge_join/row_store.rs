use crate::runtime::tracker::{MemoryTracker, SpillAction};
use ordexec_column::batch::Batch;
use ordexec_column::datatype::DataType;
use ordexec_column::encoding;
use ordexec_error::{OrdexecError, Result, ResultExt};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct RowStoreOpts {
    pub enable_spill: bool,

    /// High-water mark in bytes; exceeding it triggers a spill (or an error
    /// when spilling is disabled). 0 disables the mark.
    pub spill_threshold_bytes: usize,

    /// Directory to create the scratch dir in, system temp dir when None.
    pub scratch_dir: Option<PathBuf>,
}

/// Append-only store of batches making up one logical row group.
///
/// Batches are held in insertion order and can be read back by index. Under
/// memory pressure the oldest in-memory batches are written to scratch files
/// and transparently rehydrated on access.
///
/// The interior is shared so a spill handle can be registered with the
/// session's memory supervisor while the owning cursor keeps using the store.
#[derive(Debug)]
pub struct RowStore {
    shared: Arc<StoreShared>,
}

#[derive(Debug)]
struct StoreShared {
    datatypes: Vec<DataType>,
    opts: RowStoreOpts,
    mem_tracker: Arc<MemoryTracker>,
    disk_tracker: Arc<MemoryTracker>,
    state: Mutex<StoreState>,
}

#[derive(Debug, Default)]
struct StoreState {
    slots: Vec<Slot>,
    scratch: Option<TempDir>,
    mem_bytes: usize,
    disk_bytes: u64,

    /// Single-batch read cache for spilled slots.
    cache: Option<(usize, Batch)>,
}

#[derive(Debug)]
enum Slot {
    InMemory(Batch),
    Spilled {
        path: PathBuf,
        num_rows: usize,
        file_bytes: u64,
        mem_bytes: usize,
    },
}

impl RowStore {
    pub fn new(
        datatypes: Vec<DataType>,
        mem_tracker: Arc<MemoryTracker>,
        disk_tracker: Arc<MemoryTracker>,
        opts: RowStoreOpts,
    ) -> Self {
        RowStore {
            shared: Arc::new(StoreShared {
                datatypes,
                opts,
                mem_tracker,
                disk_tracker,
                state: Mutex::new(StoreState::default()),
            }),
        }
    }

    /// Take ownership of a batch's visible rows.
    ///
    /// The batch's memory is accounted to the store's tracker; the caller must
    /// stop accounting it.
    pub fn add(&self, batch: Batch) -> Result<()> {
        let bytes = batch.memory_size();
        {
            let mut state = self.shared.state.lock();
            state.slots.push(Slot::InMemory(batch));
            state.mem_bytes += bytes;
        }
        self.shared.mem_tracker.consume(bytes as i64)?;

        let over_mark = self.shared.opts.spill_threshold_bytes > 0
            && self.mem_bytes() > self.shared.opts.spill_threshold_bytes;
        if over_mark {
            if !self.shared.opts.enable_spill {
                return Err(OrdexecError::out_of_memory(format!(
                    "Row store exceeded {} bytes with spilling disabled",
                    self.shared.opts.spill_threshold_bytes
                )));
            }
            self.shared
                .spill_until_under(self.shared.opts.spill_threshold_bytes)?;
        }

        Ok(())
    }

    /// Read a batch by insertion index, rehydrating it if spilled.
    pub fn batch(&self, idx: usize) -> Result<Batch> {
        self.shared.batch(idx)
    }

    pub fn num_batches(&self) -> usize {
        self.shared.state.lock().slots.len()
    }

    pub fn num_rows(&self) -> usize {
        let state = self.shared.state.lock();
        state
            .slots
            .iter()
            .map(|slot| match slot {
                Slot::InMemory(batch) => batch.num_rows(),
                Slot::Spilled { num_rows, .. } => *num_rows,
            })
            .sum()
    }

    /// In-memory bytes currently accounted to the store.
    pub fn mem_bytes(&self) -> usize {
        self.shared.state.lock().mem_bytes
    }

    /// Drop all batches and scratch files, returning the counters to their
    /// pre-insertion values.
    pub fn reset(&self) -> Result<()> {
        self.shared.reset()
    }

    /// Spill every in-memory batch, returning the bytes freed.
    pub fn spill_all(&self) -> Result<u64> {
        self.shared.spill_until_under(0)
    }

    /// Handle suitable for registering with the session memory supervisor.
    pub fn spill_action(&self) -> Arc<dyn SpillAction> {
        Arc::new(StoreSpillHandle {
            shared: self.shared.clone(),
        })
    }
}

impl StoreShared {
    fn batch(&self, idx: usize) -> Result<Batch> {
        let mut state = self.state.lock();

        let slot = state
            .slots
            .get(idx)
            .ok_or_else(|| OrdexecError::new(format!("Store batch index {idx} out of bounds")))?;

        let (path, num_rows) = match slot {
            Slot::InMemory(batch) => return Ok(batch.clone()),
            Slot::Spilled { path, num_rows, .. } => (path.clone(), *num_rows),
        };

        if let Some((cached_idx, batch)) = &state.cache {
            if *cached_idx == idx {
                return Ok(batch.clone());
            }
        }

        trace!(idx, %num_rows, "rehydrating spilled batch");

        let file = File::open(&path).context("opening spill file")?;
        let mut reader = BufReader::new(file);
        let batch = encoding::read_batch(&mut reader, &self.datatypes)?
            .ok_or_else(|| OrdexecError::new("Spill file unexpectedly empty"))?;

        state.cache = Some((idx, batch.clone()));
        Ok(batch)
    }

    /// Spill oldest in-memory batches until the store's memory usage is at or
    /// below `target` bytes. Returns bytes freed.
    fn spill_until_under(&self, target: usize) -> Result<u64> {
        let mut state = self.state.lock();

        if state.mem_bytes == 0 || (target > 0 && state.mem_bytes <= target) {
            return Ok(0);
        }

        if state.scratch.is_none() {
            let scratch = match &self.opts.scratch_dir {
                Some(dir) => tempfile::Builder::new()
                    .prefix("ordexec-spill-")
                    .tempdir_in(dir),
                None => tempfile::Builder::new().prefix("ordexec-spill-").tempdir(),
            }
            .context("creating spill scratch directory")?;
            debug!(path = %scratch.path().display(), "created spill scratch directory");
            state.scratch = Some(scratch);
        }

        let mut freed = 0u64;
        let mut spilled_files = 0u64;
        let mut disk_added = 0u64;

        for idx in 0..state.slots.len() {
            if state.mem_bytes <= target {
                break;
            }

            let batch = match &state.slots[idx] {
                Slot::InMemory(batch) => batch.clone(),
                Slot::Spilled { .. } => continue,
            };

            let path = state
                .scratch
                .as_ref()
                .expect("scratch dir created above")
                .path()
                .join(format!("batch-{idx}.bin"));

            let file = File::create(&path).context("creating spill file")?;
            let mut writer = BufWriter::new(file);
            encoding::write_batch(&mut writer, &batch)?;
            writer.flush().context("flushing spill file")?;
            let file_bytes = writer
                .get_ref()
                .metadata()
                .context("reading spill file metadata")?
                .len();

            let mem_bytes = batch.memory_size();
            state.slots[idx] = Slot::Spilled {
                path,
                num_rows: batch.num_rows(),
                file_bytes,
                mem_bytes,
            };
            state.mem_bytes -= mem_bytes;
            state.disk_bytes += file_bytes;

            freed += mem_bytes as u64;
            disk_added += file_bytes;
            spilled_files += 1;
        }

        drop(state);

        if freed > 0 {
            debug!(freed, disk_added, spilled_files, "spilled row store batches");
            self.mem_tracker.consume(-(freed as i64))?;
            self.disk_tracker.consume(disk_added as i64)?;
        }

        Ok(freed)
    }

    fn reset(&self) -> Result<()> {
        let (mem_bytes, disk_bytes) = {
            let mut state = self.state.lock();
            let mem = state.mem_bytes;
            let disk = state.disk_bytes;
            state.slots.clear();
            state.cache = None;
            state.mem_bytes = 0;
            state.disk_bytes = 0;
            // Dropping the temp dir removes the spill files.
            state.scratch = None;
            (mem, disk)
        };

        if mem_bytes > 0 {
            self.mem_tracker.consume(-(mem_bytes as i64))?;
        }
        if disk_bytes > 0 {
            self.disk_tracker.consume(-(disk_bytes as i64))?;
        }

        Ok(())
    }
}

#[derive(Debug)]
struct StoreSpillHandle {
    shared: Arc<StoreShared>,
}

impl SpillAction for StoreSpillHandle {
    fn spill(&self) -> Result<u64> {
        self.shared.spill_until_under(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordexec_column::array::{Array, Int64Array, Utf8Array};
    use ordexec_column::testutil::assert_batches_logical_eq;

    fn test_batch(start: i64) -> Batch {
        Batch::try_new(vec![
            Array::Int64(Int64Array::from_iter(start..start + 8)),
            Array::Utf8(Utf8Array::from_iter(
                (start..start + 8).map(|_| Some("payload")),
            )),
        ])
        .unwrap()
    }

    fn store(opts: RowStoreOpts) -> (RowStore, Arc<MemoryTracker>, Arc<MemoryTracker>) {
        let mem = Arc::new(MemoryTracker::new("test.mem"));
        let disk = Arc::new(MemoryTracker::new("test.disk"));
        let store = RowStore::new(
            vec![DataType::Int64, DataType::Utf8],
            mem.clone(),
            disk.clone(),
            opts,
        );
        (store, mem, disk)
    }

    fn no_spill_opts() -> RowStoreOpts {
        RowStoreOpts {
            enable_spill: true,
            spill_threshold_bytes: 0,
            scratch_dir: None,
        }
    }

    #[test]
    fn add_and_read_back() {
        let (store, mem, _) = store(no_spill_opts());

        store.add(test_batch(0)).unwrap();
        store.add(test_batch(8)).unwrap();

        assert_eq!(2, store.num_batches());
        assert_eq!(16, store.num_rows());
        assert!(mem.bytes() > 0);

        assert_batches_logical_eq(&test_batch(8), &store.batch(1).unwrap());
    }

    #[test]
    fn reset_returns_counters_to_zero() {
        let (store, mem, disk) = store(no_spill_opts());

        store.add(test_batch(0)).unwrap();
        store.spill_all().unwrap();
        store.add(test_batch(8)).unwrap();
        assert!(disk.bytes() > 0);

        store.reset().unwrap();
        assert_eq!(0, mem.bytes());
        assert_eq!(0, disk.bytes());
        assert_eq!(0, store.num_batches());
    }

    #[test]
    fn high_water_mark_spills_oldest() {
        let mut opts = no_spill_opts();
        opts.spill_threshold_bytes = 1;
        let (store, mem, disk) = store(opts);

        store.add(test_batch(0)).unwrap();
        store.add(test_batch(8)).unwrap();

        // Everything spilled: each add pushed usage over the mark.
        assert_eq!(0, store.mem_bytes());
        assert_eq!(0, mem.bytes());
        assert!(disk.bytes() > 0);

        // Reads transparently rehydrate.
        assert_batches_logical_eq(&test_batch(0), &store.batch(0).unwrap());
        assert_batches_logical_eq(&test_batch(8), &store.batch(1).unwrap());
    }

    #[test]
    fn disabled_spill_errors_over_mark() {
        let opts = RowStoreOpts {
            enable_spill: false,
            spill_threshold_bytes: 1,
            scratch_dir: None,
        };
        let (store, _, _) = store(opts);

        let err = store.add(test_batch(0)).unwrap_err();
        assert_eq!(ordexec_error::ErrorKind::OutOfMemory, err.kind());
    }

    #[test]
    fn spill_action_frees_memory() {
        let (store, mem, disk) = store(no_spill_opts());
        store.add(test_batch(0)).unwrap();

        let action = store.spill_action();
        let freed = action.spill().unwrap();

        assert!(freed > 0);
        assert_eq!(0, mem.bytes());
        assert!(disk.bytes() > 0);
        assert_batches_logical_eq(&test_batch(0), &store.batch(0).unwrap());
    }
}
