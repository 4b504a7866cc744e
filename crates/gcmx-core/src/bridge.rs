use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Returned by [`SpscRing::try_push`] when the ring is full; hands the item back.
#[derive(Debug)]
pub struct RingFull<T>(pub T);

#[repr(align(64))]
struct CacheAlignedAtomic(AtomicUsize);

/// A wait-free SPSC ring bridging the harness thread and an engine worker.
///
/// ## Mechanical Sympathy
/// - **Cache-Line Padding**: Head and Tail live on separate 64-byte lines to prevent False Sharing.
/// - **Power-of-Two Sizing**: Index wrapping uses bitwise AND instead of modulo.
///
/// Exactly one thread may push and exactly one thread may pop.
pub struct SpscRing<T> {
    head: CacheAlignedAtomic,
    tail: CacheAlignedAtomic,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
}

impl<T> SpscRing<T> {
    /// `capacity` must be a non-zero power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "Capacity must be a power of two");
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();
        Self {
            head: CacheAlignedAtomic(AtomicUsize::new(0)),
            tail: CacheAlignedAtomic(AtomicUsize::new(0)),
            slots,
            mask: capacity - 1,
        }
    }

    pub fn try_push(&self, item: T) -> Result<(), RingFull<T>> {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Acquire);

        if head.wrapping_sub(tail) > self.mask {
            return Err(RingFull(item));
        }

        // # Safety: We are the ONLY producer and the slot is free (head - tail < capacity).
        // Release on head publishes the write to the consumer.
        unsafe {
            (*self.slots[head & self.mask].get()).write(item);
        }

        self.head.0.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    pub fn pop(&self) -> Option<T> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);

        if tail == head {
            return None;
        }

        // # Safety: We are the ONLY consumer. Acquire on head makes the producer's write
        // visible, and advancing tail afterwards hands the slot back.
        let item = unsafe { (*self.slots[tail & self.mask].get()).assume_init_read() };

        self.tail.0.store(tail.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    pub fn len(&self) -> usize {
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }
}

impl<T> Drop for SpscRing<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}
