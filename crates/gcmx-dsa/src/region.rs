use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use core::ffi::c_void;
use nix::errno::Errno;
use nix::sys::mman::{mprotect, ProtFlags};

use crate::error::MemError;

const PAGE_SIZE: usize = 4096;
const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

static NEXT_REGION_ID: AtomicU64 = AtomicU64::new(1);

fn round_up(len: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    len.checked_add(align - 1).map(|v| v & !(align - 1))
}

/// Page-aligned anonymous host memory handed to the execution engine.
///
/// ## Layout
/// Requests of 2MB or more first try a HugeTLB mapping (contiguous, no guards).
/// Otherwise the mapping is `[Guard] [Data pages ...] [Guard]`, where the guards are
/// `PROT_NONE`, so an engine overrunning its window faults instead of corrupting
/// neighbouring allocations.
pub struct HostMemory {
    base: NonNull<c_void>,
    map_len: usize,
    data_offset: usize,
    len: usize,
    huge: bool,
}

impl HostMemory {
    /// Maps `len` zero-filled bytes.
    pub fn allocate(len: usize) -> Result<Self, MemError> {
        if len == 0 {
            return Err(MemError::Allocation {
                requested: 0,
                reason: "zero-length mapping".to_string(),
            });
        }
        let overflow = || MemError::Allocation {
            requested: len,
            reason: "length overflows the address space".to_string(),
        };
        let data_len = round_up(len, PAGE_SIZE).ok_or_else(overflow)?;

        if data_len >= HUGE_PAGE_SIZE {
            if let Some(huge_len) = round_up(len, HUGE_PAGE_SIZE) {
                let addr = unsafe {
                    libc::mmap(
                        core::ptr::null_mut(),
                        huge_len,
                        libc::PROT_READ | libc::PROT_WRITE,
                        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB,
                        -1,
                        0,
                    )
                };
                if addr != libc::MAP_FAILED {
                    if let Some(base) = NonNull::new(addr) {
                        return Ok(Self {
                            base,
                            map_len: huge_len,
                            data_offset: 0,
                            len,
                            huge: true,
                        });
                    }
                }
                tracing::debug!("HostMemory: HugeTLB unavailable for {} bytes, using guarded 4K layout", len);
            }
        }

        let map_len = data_len.checked_add(2 * PAGE_SIZE).ok_or_else(overflow)?;
        let addr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                map_len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(MemError::Allocation {
                requested: len,
                reason: Errno::last().to_string(),
            });
        }
        let base = NonNull::new(addr).ok_or_else(|| MemError::Allocation {
            requested: len,
            reason: "mmap returned null".to_string(),
        })?;

        // Constructed before activation so a failed mprotect still unmaps on drop.
        let memory = Self {
            base,
            map_len,
            data_offset: PAGE_SIZE,
            len,
            huge: false,
        };

        // # Safety: the data pages lie strictly between the two guards of the
        // reservation made above.
        unsafe {
            let data = NonNull::new_unchecked(base.as_ptr().byte_add(PAGE_SIZE));
            mprotect(data, data_len, ProtFlags::PROT_READ | ProtFlags::PROT_WRITE)
        }
        .map_err(|e| MemError::Allocation {
            requested: len,
            reason: format!("mprotect activation failed: {e}"),
        })?;

        Ok(memory)
    }

    /// Maps a fresh allocation and fills it with `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MemError> {
        let mut memory = Self::allocate(bytes.len())?;
        memory.as_mut_slice().copy_from_slice(bytes);
        Ok(memory)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the mapping is backed by 2MB pages.
    pub fn is_huge(&self) -> bool {
        self.huge
    }

    /// Start of the usable data range. Always page-aligned.
    pub fn as_ptr(&self) -> *mut u8 {
        // # Safety: data_offset is within the mapping.
        unsafe { self.base.as_ptr().byte_add(self.data_offset) as *mut u8 }
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.as_ptr(), self.len) }
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        // # Safety: base and map_len describe the mapping owned by this struct.
        unsafe {
            libc::munmap(self.base.as_ptr(), self.map_len);
        }
    }
}

unsafe impl Send for HostMemory {}
unsafe impl Sync for HostMemory {}

/// State shared between a region and the descriptors drawn from it.
///
/// Descriptors hold a `Weak` to this; only the owning `MemoryRegion` keeps it alive.
pub(crate) struct RegionShared {
    pub(crate) id: u64,
    pub(crate) memory: HostMemory,
    /// Live descriptors referencing this region.
    pub(crate) buffers: AtomicUsize,
    started: AtomicBool,
}

impl RegionShared {
    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

/// A contiguous memory range registered with the execution engine.
///
/// ## Lifecycle
/// `create` → `bind` (attach memory) → `start` (register) → descriptors → `stop`.
/// A region cannot be stopped while any descriptor still references it.
pub struct MemoryRegion {
    id: u64,
    label: &'static str,
    capacity: usize,
    shared: Option<Arc<RegionShared>>,
    locked: bool,
}

impl MemoryRegion {
    /// Declares a region that may register at most `capacity` bytes.
    pub fn create(label: &'static str, capacity: usize) -> Self {
        Self {
            id: NEXT_REGION_ID.fetch_add(1, Ordering::Relaxed),
            label,
            capacity,
            shared: None,
            locked: false,
        }
    }

    /// Sets the live address range of the region. The region takes ownership of `memory`.
    pub fn bind(&mut self, memory: HostMemory) -> Result<(), MemError> {
        if self.is_started() {
            return Err(MemError::Registration(format!(
                "{} is started; stop it before rebinding",
                self.describe()
            )));
        }
        if memory.len() > self.capacity {
            return Err(MemError::OutOfRange {
                offset: 0,
                len: memory.len(),
                capacity: self.capacity,
            });
        }
        if let Some(shared) = &self.shared {
            let outstanding = shared.buffers.load(Ordering::Acquire);
            if outstanding > 0 {
                return Err(MemError::Registration(format!(
                    "{} still has {} descriptor(s); release them before rebinding",
                    self.describe(),
                    outstanding
                )));
            }
        }

        tracing::debug!(
            "{}: bound {} bytes (huge pages: {})",
            self.describe(),
            memory.len(),
            memory.is_huge()
        );
        self.shared = Some(Arc::new(RegionShared {
            id: self.id,
            memory,
            buffers: AtomicUsize::new(0),
            started: AtomicBool::new(false),
        }));
        Ok(())
    }

    /// Registers the bound range with the engine.
    ///
    /// Pages are locked into RAM when the process is allowed to (`RLIMIT_MEMLOCK`);
    /// failure to lock is not fatal.
    pub fn start(&mut self) -> Result<(), MemError> {
        let shared = self.shared.as_ref().ok_or_else(|| {
            MemError::Registration(format!("{} is not bound to any memory", self.describe()))
        })?;
        if shared.is_started() {
            return Err(MemError::Registration(format!(
                "{} is already started",
                self.describe()
            )));
        }

        let rc = unsafe {
            libc::mlock(
                shared.memory.as_ptr() as *const c_void,
                shared.memory.len(),
            )
        };
        self.locked = rc == 0;
        if !self.locked {
            tracing::debug!(
                "region {}#{}: mlock unavailable ({}), continuing unpinned",
                self.label,
                self.id,
                Errno::last()
            );
        }

        shared.started.store(true, Ordering::Release);
        Ok(())
    }

    /// Deregisters the region. Fails while descriptors still reference it.
    pub fn stop(&mut self) -> Result<(), MemError> {
        let shared = self.shared.as_ref().ok_or_else(|| {
            MemError::Registration(format!("{} is not bound to any memory", self.describe()))
        })?;
        if !shared.is_started() {
            return Err(MemError::Registration(format!(
                "{} is not started",
                self.describe()
            )));
        }
        let outstanding = shared.buffers.load(Ordering::Acquire);
        if outstanding > 0 {
            return Err(MemError::Registration(format!(
                "{} descriptor(s) still reference {}",
                outstanding,
                self.describe()
            )));
        }

        if self.locked {
            unsafe {
                libc::munlock(
                    shared.memory.as_ptr() as *const c_void,
                    shared.memory.len(),
                );
            }
            self.locked = false;
        }
        shared.started.store(false, Ordering::Release);
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.shared.is_some()
    }

    pub fn is_started(&self) -> bool {
        self.shared.as_ref().is_some_and(|s| s.is_started())
    }

    /// Length of the bound range, or 0 when unbound.
    pub fn len(&self) -> usize {
        self.shared.as_ref().map_or(0, |s| s.memory.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Number of live descriptors referencing this region.
    pub fn outstanding_buffers(&self) -> usize {
        self.shared
            .as_ref()
            .map_or(0, |s| s.buffers.load(Ordering::Acquire))
    }

    pub(crate) fn shared(&self) -> Option<&Arc<RegionShared>> {
        self.shared.as_ref()
    }

    fn describe(&self) -> String {
        format!("region {}#{}", self.label, self.id)
    }
}

impl Drop for MemoryRegion {
    fn drop(&mut self) {
        let Some(shared) = self.shared.take() else { return };
        let outstanding = shared.buffers.load(Ordering::Acquire);
        if outstanding > 0 {
            tracing::warn!(
                "region {}#{} freed with {} descriptor(s) still referencing it",
                self.label,
                self.id,
                outstanding
            );
        }
        if shared.is_started() {
            tracing::debug!("region {}#{} dropped while started", self.label, self.id);
            if self.locked {
                unsafe {
                    libc::munlock(
                        shared.memory.as_ptr() as *const c_void,
                        shared.memory.len(),
                    );
                }
            }
        }
    }
}
