//! Arena-style object pool with an index-keyed free list.
//!
//! Provides reusable framing buffers for DIME connections. A connection
//! acquires a buffer when it opens and releases it on close.
//!
//! # Design
//!
//! - Slots are keyed by index; a leased slot is empty until released
//! - `acquire` never waits: it reuses a free slot or grows the arena
//! - The free list is behind a `Mutex` held only for the push/pop, so a
//!   pool can be shared across connection tasks
//!
//! # Usage
//!
//! ```
//! use soapwire::pool::BufferPool;
//!
//! let pool = BufferPool::new(4096);
//! let lease = pool.acquire();
//! assert!(lease.capacity() >= 4096);
//! pool.release(lease);
//! assert_eq!(pool.available(), 1);
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::BytesMut;

/// A value checked out of a [`Pool`].
#[derive(Debug)]
pub struct Lease<T> {
    index: usize,
    value: T,
}

impl<T> Lease<T> {
    /// Slot index this lease belongs to.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Lease<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

struct Slots<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
}

/// Growable pool of reusable values.
pub struct Pool<T> {
    inner: Mutex<Slots<T>>,
    create: Box<dyn Fn() -> T + Send + Sync>,
    recycle: Box<dyn Fn(&mut T) + Send + Sync>,
}

impl<T> Pool<T> {
    /// Create a pool with a factory for new values and a hook run on release.
    pub fn new<C, R>(create: C, recycle: R) -> Self
    where
        C: Fn() -> T + Send + Sync + 'static,
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        Self {
            inner: Mutex::new(Slots {
                slots: Vec::new(),
                free: Vec::new(),
            }),
            create: Box::new(create),
            recycle: Box::new(recycle),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots<T>> {
        // A panic while holding the lock cannot leave the free list
        // inconsistent (each critical section is a single push/pop).
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take a free value, or allocate a new slot.
    pub fn acquire(&self) -> Lease<T> {
        let mut inner = self.slots();
        while let Some(index) = inner.free.pop() {
            if let Some(value) = inner.slots[index].take() {
                return Lease { index, value };
            }
        }
        let index = inner.slots.len();
        inner.slots.push(None);
        drop(inner);
        Lease {
            index,
            value: (self.create)(),
        }
    }

    /// Return a leased value to its slot.
    pub fn release(&self, lease: Lease<T>) {
        let Lease { index, mut value } = lease;
        (self.recycle)(&mut value);
        let mut guard = self.slots();
        let inner = &mut *guard;
        match inner.slots.get_mut(index) {
            Some(slot) if slot.is_none() => {
                *slot = Some(value);
                inner.free.push(index);
            }
            _ => tracing::warn!("Released lease {} does not belong to this pool", index),
        }
    }

    /// Total slots ever allocated.
    pub fn len(&self) -> usize {
        self.slots().slots.len()
    }

    /// True if nothing was ever allocated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values ready to be acquired without allocating.
    pub fn available(&self) -> usize {
        self.slots().free.len()
    }
}

/// Pool of framing buffers with a fixed initial capacity.
#[derive(Clone)]
pub struct BufferPool {
    pool: Arc<Pool<BytesMut>>,
    capacity: usize,
}

impl BufferPool {
    /// Create a pool handing out buffers of at least `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: Arc::new(Pool::new(
                move || BytesMut::with_capacity(capacity),
                |buf: &mut BytesMut| buf.clear(),
            )),
            capacity,
        }
    }

    /// Capacity of freshly allocated buffers.
    pub fn buffer_capacity(&self) -> usize {
        self.capacity
    }

    /// Acquire an empty buffer.
    pub fn acquire(&self) -> Lease<BytesMut> {
        self.pool.acquire()
    }

    /// Return a buffer; its contents are cleared.
    pub fn release(&self, lease: Lease<BytesMut>) {
        self.pool.release(lease)
    }

    /// Buffers ready for reuse.
    pub fn available(&self) -> usize {
        self.pool.available()
    }

    /// Buffers allocated in total.
    pub fn allocated(&self) -> usize {
        self.pool.len()
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.capacity)
            .field("allocated", &self.allocated())
            .field("available", &self.available())
            .finish()
    }
}
