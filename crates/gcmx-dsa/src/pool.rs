use std::ptr::NonNull;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use crate::error::MemError;
use crate::region::{MemoryRegion, RegionShared};

/// Index-based handle to a buffer descriptor held by a [`BufferPool`].
///
/// The generation makes a handle that outlived its slot fail with
/// [`MemError::StaleBuffer`] instead of aliasing the next occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    index: u32,
    generation: u32,
}

impl BufferId {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// A raw `(pointer, length)` window into a started region, as seen by the engine.
///
/// Windows carry no lifetime. The pool pins both descriptors of a task for as long
/// as it is in flight, and the harness drains the engine before any region is stopped.
#[derive(Debug, Clone, Copy)]
pub struct DmaWindow {
    ptr: NonNull<u8>,
    len: usize,
}

impl DmaWindow {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// # Safety
    /// The backing region must still be mapped and nothing may write the window
    /// for the returned lifetime.
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// # Safety
    /// The backing region must still be mapped and the caller must be the only
    /// reader or writer of the window for the returned lifetime.
    pub unsafe fn as_mut_slice<'a>(&self) -> &'a mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

unsafe impl Send for DmaWindow {}
unsafe impl Sync for DmaWindow {}

struct BufferSlot {
    region: Weak<RegionShared>,
    region_id: u64,
    /// Offset of the buffer inside the region.
    head: usize,
    capacity: usize,
    /// Offset of valid data relative to `head`.
    data_offset: usize,
    data_len: usize,
    /// One reference for the owner plus one per in-flight task.
    ref_count: usize,
}

/// Fixed-capacity inventory of buffer descriptors.
///
/// ## Protocol
/// - `acquire` hands out a descriptor with a reference count of 1.
/// - `pin` / `unpin` bracket every engine task touching the descriptor.
/// - `release` drops the owner reference; the slot returns to the pool when the
///   count reaches zero, so releasing an in-flight descriptor defers the free to
///   the final `unpin`.
pub struct BufferPool {
    slots: Vec<Option<BufferSlot>>,
    generations: Vec<u32>,
    outstanding: usize,
}

impl BufferPool {
    /// One source and one destination descriptor.
    pub const PIPELINE_BUFFERS: usize = 2;

    pub fn new(max_buffers: usize) -> Self {
        let mut slots = Vec::with_capacity(max_buffers);
        slots.resize_with(max_buffers, || None);
        Self {
            slots,
            generations: vec![0; max_buffers],
            outstanding: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Descriptors currently acquired (including ones released but still pinned).
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Binds a descriptor to `[offset, offset + len)` of a started region.
    ///
    /// The new descriptor's data window covers the whole buffer.
    pub fn acquire(
        &mut self,
        region: &MemoryRegion,
        offset: usize,
        len: usize,
    ) -> Result<BufferId, MemError> {
        let shared = region.shared().ok_or_else(|| {
            MemError::Registration(format!(
                "region {}#{} is not bound",
                region.label(),
                region.id()
            ))
        })?;
        if !shared.is_started() {
            return Err(MemError::Registration(format!(
                "region {}#{} must be started before buffers are drawn from it",
                region.label(),
                region.id()
            )));
        }
        let end = offset.checked_add(len);
        if end.map_or(true, |end| end > shared.memory.len()) {
            return Err(MemError::OutOfRange {
                offset,
                len,
                capacity: shared.memory.len(),
            });
        }

        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(MemError::CapacityExceeded {
                capacity: self.slots.len(),
            })?;

        shared.buffers.fetch_add(1, Ordering::AcqRel);
        self.slots[index] = Some(BufferSlot {
            region: Arc::downgrade(shared),
            region_id: shared.id,
            head: offset,
            capacity: len,
            data_offset: 0,
            data_len: len,
            ref_count: 1,
        });
        self.outstanding += 1;

        let id = BufferId {
            index: index as u32,
            generation: self.generations[index],
        };
        tracing::trace!("BufferPool: acquired {:?} on region {} [{}+{}]", id, shared.id, offset, len);
        Ok(id)
    }

    /// Drops the owner reference of a descriptor.
    pub fn release(&mut self, id: BufferId) -> Result<(), MemError> {
        self.decrement(id)
    }

    /// Adds an in-flight reference.
    pub fn pin(&mut self, id: BufferId) -> Result<(), MemError> {
        let slot = self.slot_mut(id)?;
        slot.ref_count += 1;
        Ok(())
    }

    /// Removes an in-flight reference.
    pub fn unpin(&mut self, id: BufferId) -> Result<(), MemError> {
        self.decrement(id)
    }

    pub fn ref_count(&self, id: BufferId) -> Result<usize, MemError> {
        Ok(self.slot(id)?.ref_count)
    }

    /// Sets the valid data window to `[offset, offset + len)` relative to the buffer head.
    pub fn set_data(&mut self, id: BufferId, offset: usize, len: usize) -> Result<(), MemError> {
        let slot = self.slot_mut(id)?;
        if offset.checked_add(len).map_or(true, |end| end > slot.capacity) {
            return Err(MemError::OutOfRange {
                offset,
                len,
                capacity: slot.capacity,
            });
        }
        slot.data_offset = offset;
        slot.data_len = len;
        Ok(())
    }

    /// Empties the data window, keeping its start.
    pub fn reset_data_len(&mut self, id: BufferId) -> Result<(), MemError> {
        self.slot_mut(id)?.data_len = 0;
        Ok(())
    }

    /// Extends the data window by `len` bytes written into the tail room.
    pub fn append_data(&mut self, id: BufferId, len: usize) -> Result<(), MemError> {
        let slot = self.slot_mut(id)?;
        let room = slot.capacity - slot.data_offset - slot.data_len;
        if len > room {
            return Err(MemError::OutOfRange {
                offset: slot.data_offset + slot.data_len,
                len,
                capacity: slot.capacity,
            });
        }
        slot.data_len += len;
        Ok(())
    }

    pub fn data_len(&self, id: BufferId) -> Result<usize, MemError> {
        Ok(self.slot(id)?.data_len)
    }

    pub fn capacity_of(&self, id: BufferId) -> Result<usize, MemError> {
        Ok(self.slot(id)?.capacity)
    }

    /// Bytes available after the end of the data window.
    pub fn tailroom(&self, id: BufferId) -> Result<usize, MemError> {
        let slot = self.slot(id)?;
        Ok(slot.capacity - slot.data_offset - slot.data_len)
    }

    /// Runs `f` over the valid data of a descriptor.
    ///
    /// The region is kept alive for the duration of the call. The caller must not
    /// have a task in flight on this descriptor.
    pub fn with_data<R>(&self, id: BufferId, f: impl FnOnce(&[u8]) -> R) -> Result<R, MemError> {
        let slot = self.slot(id)?;
        let region = slot.region.upgrade().ok_or(MemError::RegionGone(slot.region_id))?;
        // # Safety: the window was range-checked against the region on every
        // mutation and `region` keeps the mapping alive until `f` returns.
        let data = unsafe {
            core::slice::from_raw_parts(
                region.memory.as_ptr().add(slot.head + slot.data_offset),
                slot.data_len,
            )
        };
        Ok(f(data))
    }

    /// Window over the valid data (engine input).
    pub fn source_window(&self, id: BufferId) -> Result<DmaWindow, MemError> {
        let slot = self.slot(id)?;
        self.window(slot, slot.data_offset, slot.data_len)
    }

    /// Window over the tail room after the valid data (engine output).
    pub fn sink_window(&self, id: BufferId) -> Result<DmaWindow, MemError> {
        let slot = self.slot(id)?;
        let start = slot.data_offset + slot.data_len;
        self.window(slot, start, slot.capacity - start)
    }

    fn window(&self, slot: &BufferSlot, offset: usize, len: usize) -> Result<DmaWindow, MemError> {
        let region = slot.region.upgrade().ok_or(MemError::RegionGone(slot.region_id))?;
        if !region.is_started() {
            return Err(MemError::Registration(format!(
                "region {} was stopped while descriptors still point into it",
                slot.region_id
            )));
        }
        // # Safety: head + offset + len <= capacity <= region length (checked at acquire
        // and on every data mutation).
        let ptr = unsafe { region.memory.as_ptr().add(slot.head + offset) };
        let ptr = NonNull::new(ptr).ok_or(MemError::RegionGone(slot.region_id))?;
        Ok(DmaWindow { ptr, len })
    }

    fn decrement(&mut self, id: BufferId) -> Result<(), MemError> {
        let slot = self.slot_mut(id)?;
        slot.ref_count -= 1;
        if slot.ref_count > 0 {
            return Ok(());
        }

        let index = id.index();
        if let Some(slot) = self.slots[index].take() {
            if let Some(region) = slot.region.upgrade() {
                region.buffers.fetch_sub(1, Ordering::AcqRel);
            }
        }
        self.generations[index] = self.generations[index].wrapping_add(1);
        self.outstanding -= 1;
        tracing::trace!("BufferPool: slot {} returned to inventory", index);
        Ok(())
    }

    fn slot(&self, id: BufferId) -> Result<&BufferSlot, MemError> {
        match self.slots.get(id.index()) {
            Some(Some(slot)) if self.generations[id.index()] == id.generation => Ok(slot),
            _ => Err(MemError::StaleBuffer(id)),
        }
    }

    fn slot_mut(&mut self, id: BufferId) -> Result<&mut BufferSlot, MemError> {
        let generation_ok = self
            .generations
            .get(id.index())
            .is_some_and(|g| *g == id.generation);
        match self.slots.get_mut(id.index()) {
            Some(Some(slot)) if generation_ok => Ok(slot),
            _ => Err(MemError::StaleBuffer(id)),
        }
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        if self.outstanding > 0 {
            tracing::warn!(
                "BufferPool dropped with {} outstanding descriptor(s)",
                self.outstanding
            );
            for slot in self.slots.iter_mut().filter_map(Option::take) {
                if let Some(region) = slot.region.upgrade() {
                    region.buffers.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }
    }
}
