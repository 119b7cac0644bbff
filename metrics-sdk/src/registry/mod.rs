//! Concurrent storage for per-(instrument, attribute set) records.
//!
//! [`RecordStore`] maps a [`RecordKey`] to a reference-counted [`Record`], creating records on
//! first use.  Alongside the map, every live record sits on one of two intrusive lists: the
//! primary list, walked by each collection pass, or the reclaim list, which holds records that
//! were found in use after a collection pass had already detached them.
//!
//! A record is removed from the map only when a collection pass observes that it holds no
//! references and has not been released since the previous pass.  Removal and binding race
//! freely: a binder that loses the race simply creates a fresh record.
use std::{
    hash::{BuildHasherDefault, Hash, Hasher},
    iter::repeat,
    sync::{atomic::Ordering, Arc, PoisonError, RwLock},
};

use crossbeam_utils::Backoff;
use hashbrown::{hash_map::RawEntryMut, HashMap};
use metrics_api::AttributeSet;
use parking_lot::Mutex;
use rapidhash::fast::RapidHasher;
use tracing::trace;

use crate::common::KeyHasher;

mod list;
use self::list::RecordList;

mod record;
pub use self::record::Record;
use self::record::{Link, ATTACHED, DETACHED, RECLAIM};

type StoreHashMap<T> = HashMap<RecordKey, Arc<Record<T>>, BuildHasherDefault<KeyHasher>>;

/// Default number of records visited between checks of whether collection should proceed.
pub const DEFAULT_COLLECT_BATCH_SIZE: usize = 64;

/// Identifies an instrument within an accumulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrumentId(u64);

impl InstrumentId {
    /// Creates an `InstrumentId` from a raw value.
    pub const fn from_raw(id: u64) -> Self {
        InstrumentId(id)
    }

    /// Gets the raw value of this identifier.
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// The identity of a record: an instrument and an attribute set.
#[derive(Clone, Debug)]
pub struct RecordKey {
    instrument: InstrumentId,
    attributes: AttributeSet,
    hash: u64,
}

impl RecordKey {
    /// Creates a new `RecordKey`.
    pub fn new(instrument: InstrumentId, attributes: AttributeSet) -> Self {
        let mut hasher = RapidHasher::default();
        hasher.write_u64(instrument.get());
        hasher.write_u64(attributes.hash_value());
        let hash = hasher.finish();

        RecordKey { instrument, attributes, hash }
    }

    /// Gets the instrument.
    pub fn instrument(&self) -> InstrumentId {
        self.instrument
    }

    /// Gets the attribute set.
    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }
}

impl PartialEq for RecordKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.instrument == other.instrument
            && self.attributes == other.attributes
    }
}

impl Eq for RecordKey {}

impl Hash for RecordKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// Results of a single collection pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectOutcome {
    /// Records the checkpoint function reported as checkpointed.
    pub checkpointed: usize,
    /// Records kept for the next pass, including records rescued from the reclaim list.
    pub retained: usize,
    /// Records removed from the store.
    pub reclaimed: usize,
    /// Records left unvisited because the pass was stopped early.
    pub remaining: usize,
    /// Whether or not the pass was stopped early.
    pub interrupted: bool,
}

/// A concurrent map of records with epoch-based reclamation.
///
/// `bind` and `release` may be called from any thread at any time, including while `collect` is
/// running.  `collect` calls are serialized.
pub struct RecordStore<T> {
    shards: Vec<RwLock<StoreHashMap<T>>>,
    shard_mask: usize,
    primary: RecordList<T>,
    reclaim: RecordList<T>,
    epoch: Mutex<i64>,
    batch_size: usize,
}

impl<T> RecordStore<T> {
    /// Creates a new `RecordStore`.
    pub fn new() -> Self {
        Self::with_batch_size(DEFAULT_COLLECT_BATCH_SIZE)
    }

    /// Creates a new `RecordStore` that checks whether to proceed every `batch_size` records while
    /// collecting.
    pub fn with_batch_size(batch_size: usize) -> Self {
        let shard_count = std::cmp::max(1, num_cpus::get()).next_power_of_two();
        let shard_mask = shard_count - 1;
        let shards =
            repeat(()).take(shard_count).map(|_| RwLock::new(StoreHashMap::default())).collect();

        RecordStore {
            shards,
            shard_mask,
            primary: RecordList::new(Link::Primary),
            reclaim: RecordList::new(Link::Reclaim),
            epoch: Mutex::new(0),
            batch_size: batch_size.max(1),
        }
    }

    #[inline]
    fn shard_for(&self, key: &RecordKey) -> &RwLock<StoreHashMap<T>> {
        &self.shards[key.hash as usize & self.shard_mask]
    }

    /// Gets the number of records currently reachable from the map.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().unwrap_or_else(PoisonError::into_inner).len()).sum()
    }

    /// Whether or not the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gets the record for `key`, creating it with `init` if it does not exist, and takes a
    /// reference on it.
    ///
    /// Every call must be paired with a call to [`release`][RecordStore::release].
    pub fn bind<F>(&self, key: RecordKey, init: F) -> Arc<Record<T>>
    where
        F: FnOnce() -> T,
    {
        let shard = self.shard_for(&key);

        let shard_read = shard.read().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, record)) = shard_read.raw_entry().from_key_hashed_nocheck(key.hash, &key) {
            if record.refs.try_ref() {
                return Arc::clone(record);
            }
        }
        drop(shard_read);

        let mut shard_write = shard.write().unwrap_or_else(PoisonError::into_inner);
        let record = match shard_write.raw_entry_mut().from_key_hashed_nocheck(key.hash, &key) {
            RawEntryMut::Occupied(mut entry) => {
                if entry.get().refs.try_ref() {
                    return Arc::clone(entry.get());
                }

                // The occupant was unmapped by a collection pass that has not removed it yet.
                trace!("Replacing unmapped record.");
                let record = Arc::new(Record::new(key, init()));
                let _ = entry.insert(Arc::clone(&record));
                record
            }
            RawEntryMut::Vacant(entry) => {
                let record = Arc::new(Record::new(key.clone(), init()));
                let _ = entry.insert_hashed_nocheck(key.hash, key, Arc::clone(&record));
                record
            }
        };
        drop(shard_write);

        self.primary.push(Arc::clone(&record));
        record
    }

    /// Releases a reference taken by [`bind`][RecordStore::bind].
    pub fn release(&self, record: &Arc<Record<T>>) {
        let backoff = Backoff::new();
        let behind = loop {
            let collected = record.collected_epoch.load(Ordering::Acquire);
            let modified = record.modified_epoch.load(Ordering::Acquire);
            let updated = collected + 1;

            if modified == updated {
                break false;
            }

            match record.modified_epoch.compare_exchange(
                modified,
                updated,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break modified < collected,
                Err(_) => backoff.spin(),
            }
        };

        if behind || record.membership() == DETACHED {
            self.save_from_reclaim(record);
        }

        record.refs.unref();
    }

    /// Moves a record that a collection pass detached onto the reclaim list, so the next pass sees
    /// it again.
    fn save_from_reclaim(&self, record: &Arc<Record<T>>) {
        if record.transition(DETACHED, RECLAIM) {
            self.reclaim.push(Arc::clone(record));
        }
    }

    fn remove(&self, record: &Arc<Record<T>>) {
        let key = record.key();
        let mut shard_write = self.shard_for(key).write().unwrap_or_else(PoisonError::into_inner);
        if let RawEntryMut::Occupied(entry) =
            shard_write.raw_entry_mut().from_key_hashed_nocheck(key.hash, key)
        {
            if Arc::ptr_eq(entry.get(), record) {
                let _ = entry.remove();
            }
        }
    }

    /// Runs a collection pass.
    ///
    /// Every record that was updated since it was last checkpointed is passed to `checkpoint`
    /// exactly once.  `checkpoint` returns whether it found anything to checkpoint, and only those
    /// records are counted in [`CollectOutcome::checkpointed`].  Records that are unreferenced and were not released since the previous pass
    /// are removed from the store.
    ///
    /// `proceed` is consulted between batches of records.  When it returns `false`, the pass stops
    /// and the unvisited records are put back untouched for the next pass.
    pub fn collect<F, P>(&self, mut checkpoint: F, mut proceed: P) -> CollectOutcome
    where
        F: FnMut(&Record<T>) -> bool,
        P: FnMut() -> bool,
    {
        let mut epoch = self.epoch.lock();
        let current = *epoch;
        let mut outcome = CollectOutcome::default();

        let mut visit = |record: &Record<T>, outcome: &mut CollectOutcome| {
            if record.take_modified() && checkpoint(record) {
                outcome.checkpointed += 1;
            }
        };

        let mut visited = 0;
        let mut records = self.primary.take_all();
        while let Some(record) = records.next() {
            if visited > 0 && visited % self.batch_size == 0 && !proceed() {
                outcome.interrupted = true;
                outcome.remaining = 1;
                self.primary.push(record);
                for record in records.by_ref() {
                    outcome.remaining += 1;
                    self.primary.push(record);
                }
                break;
            }
            visited += 1;

            if record.refs.refs() > 0 {
                visit(&record, &mut outcome);
                outcome.retained += 1;
                self.primary.push(record);
                continue;
            }

            let modified = record.modified_epoch.load(Ordering::Acquire);
            let collected = record.collected_epoch.load(Ordering::Acquire);
            if modified >= collected {
                visit(&record, &mut outcome);
                record.collected_epoch.store(current, Ordering::Release);
                outcome.retained += 1;
                self.primary.push(record);
                continue;
            }

            // Idle for a full pass.  Detach first, so that a binder racing with us sends the
            // record to the reclaim list on release.
            record.set_membership(DETACHED);
            if record.refs.try_unmap() {
                visit(&record, &mut outcome);
                self.remove(&record);
                outcome.reclaimed += 1;
            } else {
                visit(&record, &mut outcome);
                if record.transition(DETACHED, ATTACHED) {
                    outcome.retained += 1;
                    self.primary.push(record);
                }
            }
        }
        drop(records);

        if !outcome.interrupted {
            for record in self.reclaim.take_all() {
                record.collected_epoch.store(current, Ordering::Release);

                if record.refs.is_dead() {
                    record.set_membership(DETACHED);
                    visit(&record, &mut outcome);
                    continue;
                }

                visit(&record, &mut outcome);
                record.set_membership(ATTACHED);
                outcome.retained += 1;
                self.primary.push(record);
            }
        }

        *epoch += 1;
        outcome
    }
}

impl<T> Default for RecordStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
