use std::sync::atomic::{AtomicI64, AtomicPtr, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use metrics_api::AttributeSet;

use super::RecordKey;

/// Which of a record's two list links to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Link {
    Primary,
    Reclaim,
}

/// The record is on the primary list, or is about to be pushed onto it.
pub(crate) const ATTACHED: u8 = 0;
/// The record is on neither list.
pub(crate) const DETACHED: u8 = 1;
/// The record is on the reclaim list.
pub(crate) const RECLAIM: u8 = 2;

const DEAD: usize = 1;
const ONE_REF: usize = 2;

/// A reference count that also tracks whether its owner is still reachable from the store's map.
///
/// References are counted in steps of two; the low bit is set once the owner has been unmapped.
/// After that, no new references can be taken.
pub(crate) struct RefcountMapped {
    value: AtomicUsize,
}

impl RefcountMapped {
    /// Creates a mapped count holding a single reference.
    fn new() -> Self {
        RefcountMapped { value: AtomicUsize::new(ONE_REF) }
    }

    /// Takes a reference, unless the owner has been unmapped.
    pub fn try_ref(&self) -> bool {
        let prev = self.value.fetch_add(ONE_REF, Ordering::AcqRel);
        if prev & DEAD != 0 {
            self.value.fetch_sub(ONE_REF, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Drops a reference.
    pub fn unref(&self) {
        self.value.fetch_sub(ONE_REF, Ordering::AcqRel);
    }

    /// Marks the owner as unmapped, if no references are held.
    ///
    /// Returns `true` if the owner is unmapped, including when it already was.
    pub fn try_unmap(&self) -> bool {
        match self.value.compare_exchange(0, DEAD, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => true,
            Err(current) => current & DEAD != 0,
        }
    }

    /// Number of references currently held.
    pub fn refs(&self) -> usize {
        self.value.load(Ordering::Acquire) / ONE_REF
    }

    /// Whether or not the owner has been unmapped.
    pub fn is_dead(&self) -> bool {
        self.value.load(Ordering::Acquire) & DEAD != 0
    }
}

/// The live state for one (instrument, attribute set) pair.
///
/// Records are created on first use by [`RecordStore::bind`][super::RecordStore::bind] and stay
/// reachable until a collection pass finds them unreferenced and unmodified since the previous
/// pass.
pub struct Record<T> {
    key: RecordKey,
    pub(crate) refs: RefcountMapped,

    // The collection epoch in which the record was last released.
    pub(crate) modified_epoch: AtomicI64,
    // The collection epoch in which the record was last found to be active.
    pub(crate) collected_epoch: AtomicI64,
    membership: AtomicU8,

    next_primary: AtomicPtr<Record<T>>,
    next_reclaim: AtomicPtr<Record<T>>,

    updates: AtomicU64,
    // Only touched by the collector, which is serialized.
    collected_updates: AtomicU64,

    value: T,
}

impl<T> Record<T> {
    /// Creates a record holding one reference, for its creator.
    pub(crate) fn new(key: RecordKey, value: T) -> Self {
        Record {
            key,
            refs: RefcountMapped::new(),
            modified_epoch: AtomicI64::new(0),
            collected_epoch: AtomicI64::new(-1),
            membership: AtomicU8::new(ATTACHED),
            next_primary: AtomicPtr::default(),
            next_reclaim: AtomicPtr::default(),
            updates: AtomicU64::new(0),
            collected_updates: AtomicU64::new(0),
            value,
        }
    }

    /// Gets the key of this record.
    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    /// Gets the attribute set of this record.
    pub fn attributes(&self) -> &AttributeSet {
        self.key.attributes()
    }

    /// Gets the value stored in this record.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Notes that the value has been updated.
    ///
    /// Collection only hands records to its checkpoint function when they have been updated since
    /// the last time they were checkpointed.
    pub fn mark_updated(&self) {
        self.updates.fetch_add(1, Ordering::Release);
    }

    /// Number of references currently held on this record.
    pub fn refs(&self) -> usize {
        self.refs.refs()
    }

    pub(crate) fn take_modified(&self) -> bool {
        let updates = self.updates.load(Ordering::Acquire);
        self.collected_updates.swap(updates, Ordering::Relaxed) != updates
    }

    pub(crate) fn link(&self, link: Link) -> &AtomicPtr<Record<T>> {
        match link {
            Link::Primary => &self.next_primary,
            Link::Reclaim => &self.next_reclaim,
        }
    }

    pub(crate) fn membership(&self) -> u8 {
        self.membership.load(Ordering::Acquire)
    }

    pub(crate) fn set_membership(&self, membership: u8) {
        self.membership.store(membership, Ordering::Release);
    }

    pub(crate) fn transition(&self, from: u8, to: u8) -> bool {
        self.membership.compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }
}
