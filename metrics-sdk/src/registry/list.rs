use std::{
    marker::PhantomData,
    ptr,
    sync::{
        atomic::{AtomicPtr, Ordering},
        Arc,
    },
};

use crossbeam_utils::CachePadded;

use super::record::{Link, Record};

/// An intrusive, lock-free stack of records.
///
/// Each record carries its own link field for each list, so pushing never allocates.  Records can
/// only be removed by taking the entire list at once, which keeps the stack free of the ABA
/// problem without needing deferred reclamation: nodes are never popped individually while other
/// threads may be reading them.
///
/// The list owns one strong reference to every record on it.
pub(crate) struct RecordList<T> {
    head: CachePadded<AtomicPtr<Record<T>>>,
    link: Link,
    _owned: PhantomData<Arc<Record<T>>>,
}

impl<T> RecordList<T> {
    pub fn new(link: Link) -> Self {
        RecordList { head: CachePadded::new(AtomicPtr::new(ptr::null_mut())), link, _owned: PhantomData }
    }

    /// Pushes a record onto the list.
    ///
    /// The record must not already be on this list.
    pub fn push(&self, record: Arc<Record<T>>) {
        let node = Arc::into_raw(record) as *mut Record<T>;

        // SAFETY: `node` came from `Arc::into_raw` above, so it points to a live record, and the
        // strong reference it carries is now owned by this list.
        let next = unsafe { &*node }.link(self.link);

        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            next.store(head, Ordering::Relaxed);
            match self.head.compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => break,
                Err(current) => head = current,
            }
        }
    }

    /// Detaches every record currently on the list.
    ///
    /// Records pushed after this call land on the (now empty) list rather than in the returned
    /// chain.
    pub fn take_all(&self) -> Drain<T> {
        let head = self.head.swap(ptr::null_mut(), Ordering::AcqRel);
        Drain { next: head, link: self.link, _owned: PhantomData }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl<T> Drop for RecordList<T> {
    fn drop(&mut self) {
        drop(self.take_all());
    }
}

/// A detached chain of records, yielded in most-recently-pushed order.
pub(crate) struct Drain<T> {
    next: *mut Record<T>,
    link: Link,
    _owned: PhantomData<Arc<Record<T>>>,
}

impl<T> Iterator for Drain<T> {
    type Item = Arc<Record<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next.is_null() {
            return None;
        }

        // SAFETY: Every node in a detached chain was pushed with `Arc::into_raw` and is reachable
        // only through this chain, so we are reclaiming the strong reference the list held.
        let record = unsafe { Arc::from_raw(self.next as *const Record<T>) };

        // The link must be read before the record is handed out, as the caller is free to push it
        // onto a list again, overwriting the link.
        let link = record.link(self.link);
        self.next = link.swap(ptr::null_mut(), Ordering::Acquire);
        Some(record)
    }
}

impl<T> Drop for Drain<T> {
    fn drop(&mut self) {
        for _ in self.by_ref() {}
    }
}
