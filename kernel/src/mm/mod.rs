//! Virtual memory manager (C4): mmap-family operations, stack allocation,
//! copy-on-write fork, and the write-fault promotion path.
//!
//! Grounded on the teacher's `mm/vas.rs` (address-space bookkeeping) and
//! `mm/page_fault.rs` (whose `try_copy_on_write` was a documented but
//! unimplemented stub — `handle_write_fault` below is its real
//! implementation). `mm/heap.rs`'s `LockedHeap` global allocator is kept
//! verbatim; its `SlabAllocator` companion is dropped as unused once this
//! module's own allocation patterns replaced the object-cache workload it
//! served in the teacher.

extern crate alloc;

pub mod frame_allocator;
pub mod heap;
pub mod page_fault;
pub mod page_table;

use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use page_table::{MapFlags, PageKind, ENTRIES_PER_TABLE, KERNEL_SPLIT, PAGE_SIZE};

/// Per-address-space bookkeeping: everything needed to reproduce or tear
/// down the low-half (user) portion of a directory.
pub struct AddressSpace {
    pub dir_phys: u32,
    /// Next free page going up from address 0 (used by `mmap`).
    head_cursor: u32,
    /// Next free page going down from the kernel split (used by
    /// `alloc_stack`).
    tail_cursor: u32,
}

impl AddressSpace {
    fn new(dir_phys: u32) -> Self {
        Self { dir_phys, head_cursor: PAGE_SIZE, tail_cursor: KERNEL_SPLIT }
    }

    /// Wrap an existing directory (e.g. the kernel's own) in a fresh
    /// bookkeeping struct, for the root process that runs in the kernel's
    /// own address space rather than a cloned one.
    pub fn wrap_existing(dir_phys: u32) -> Self {
        Self::new(dir_phys)
    }

    fn bump_tail(&mut self, size: u32) -> KernelResult<u32> {
        let new_tail = self.tail_cursor.checked_sub(size).ok_or(KernelError::NoMemory)?;
        if new_tail < self.head_cursor {
            return Err(KernelError::NoMemory);
        }
        self.tail_cursor = new_tail - (new_tail % PAGE_SIZE);
        Ok(self.tail_cursor)
    }

    /// Hand out the next `size` bytes going up from address 0. Grows from
    /// the opposite end of the same free range `bump_tail` consumes; see
    /// the documented head/tail collision in DESIGN.md.
    fn bump_head(&mut self, size: u32) -> KernelResult<u32> {
        let base = self.head_cursor;
        let new_head = base.checked_add(size).ok_or(KernelError::NoMemory)?;
        if new_head > self.tail_cursor {
            return Err(KernelError::NoMemory);
        }
        self.head_cursor = base + size.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        Ok(base)
    }
}

static KERNEL_SPACE: Mutex<Option<AddressSpace>> = Mutex::new(None);

/// Bring up the VM subsystem: seed the frame allocator from the handed-off
/// memory map and build the kernel's own address space (whose high-half
/// directory entries every other address space copies).
pub fn init(available_ranges: &[(u32, u32)]) {
    frame_allocator::init(available_ranges);
    let dir_phys = unsafe { page_table::current_directory_phys() };
    *KERNEL_SPACE.lock() = Some(AddressSpace::new(dir_phys));
}

fn map_flags(read_only: bool, kind: PageKind, cached: bool) -> MapFlags {
    MapFlags { writable: !read_only, kind, cow: false, cached }
}

/// Allocate `ceil(size/F)` frames and map them at `virt`.
pub fn mmap(virt: u32, size: u32, read_only: bool, _exec: bool) -> KernelResult<()> {
    page_table::map_range(virt, None, size, map_flags(read_only, PageKind::Regular, true))
}

/// Map an already-known physical range (MMIO, or manipulating another
/// address space's frames during fork).
pub fn mmap_direct(
    virt: u32,
    phys: u32,
    size: u32,
    read_only: bool,
    _exec: bool,
    cached: bool,
    is_hw: bool,
) -> KernelResult<()> {
    let kind = if is_hw { PageKind::Hardware } else { PageKind::Regular };
    let pages = size.div_ceil(PAGE_SIZE);
    for i in 0..pages {
        frame_allocator::acquire_ref(phys + i * PAGE_SIZE)?;
    }
    page_table::map_range(virt, Some(phys), size, map_flags(read_only, kind, cached))
}

pub fn munmap(virt: u32, size: u32) -> KernelResult<()> {
    page_table::unmap_range(virt, size)
}

/// Register `[phys, phys+size)` with the frame table as permanently
/// hardware-owned, so a later `mmap_direct(is_hw=true)` over it upholds the
/// refcounting invariant.
pub fn declare_hw_window(phys: u32, size: u32) -> KernelResult<()> {
    frame_allocator::declare_hw(phys, size)
}

pub fn virt_to_phys(virt: u32) -> Option<u32> {
    page_table::virt_to_phys(virt)
}

/// Allocate stack space from the tail of the given address space's free
/// page range.
pub fn alloc_stack(space: &mut AddressSpace, size: u32, is_kernel: bool) -> KernelResult<u32> {
    if !size.is_multiple_of(PAGE_SIZE) {
        return Err(KernelError::BadAlign);
    }
    let base = space.bump_tail(size)?;
    let kind = if is_kernel { PageKind::Private } else { PageKind::Regular };
    let current = unsafe { page_table::current_directory_phys() };
    let switched = current != space.dir_phys;
    if switched {
        unsafe { page_table::switch_directory(space.dir_phys) };
    }
    let result = page_table::map_range(base, None, size, map_flags(false, kind, true));
    if switched {
        unsafe { page_table::switch_directory(current) };
    }
    result?;
    Ok(base)
}

/// Allocate `size` bytes of fresh, zero-filled anonymous memory from the
/// head of `space`'s free range, backing the `PAGE_ALLOC` syscall (C6).
pub fn alloc_pages(space: &mut AddressSpace, size: u32) -> KernelResult<u32> {
    if size == 0 || !size.is_multiple_of(PAGE_SIZE) {
        return Err(KernelError::BadAlign);
    }
    let base = space.bump_head(size)?;
    let current = unsafe { page_table::current_directory_phys() };
    let switched = current != space.dir_phys;
    if switched {
        unsafe { page_table::switch_directory(space.dir_phys) };
    }
    let result = page_table::map_range(base, None, size, map_flags(false, PageKind::Regular, true));
    if switched {
        unsafe { page_table::switch_directory(current) };
    }
    result?;
    Ok(base)
}

pub fn kernel_space() -> spin::MutexGuard<'static, Option<AddressSpace>> {
    KERNEL_SPACE.lock()
}

/// Clone the currently active address space into a brand-new one for
/// `fork`, per SPEC_FULL.md §4.4's six-step algorithm. `current_kstack` is
/// the calling thread's kernel stack range `(base, size)`, deep-copied and
/// marked PRIVATE in the child.
pub fn clone_address_space(
    src: &AddressSpace,
    current_kstack: (u32, u32),
) -> KernelResult<AddressSpace> {
    crate::irq::with_critical_section(|| clone_address_space_locked(src, current_kstack))
}

fn clone_address_space_locked(
    src: &AddressSpace,
    current_kstack: (u32, u32),
) -> KernelResult<AddressSpace> {
    let new_dir_phys = page_table::new_address_space()?;
    let mut applied: Vec<(u32, u32, bool)> = Vec::new(); // (virt, phys, demoted_parent)

    let result = (|| -> KernelResult<()> {
        for pde in 0..(KERNEL_SPLIT >> 22) as usize {
            let dir_entry = unsafe { *page_table::directory_ptr().add(pde) };
            if dir_entry & page_table::FLAG_PRESENT == 0 {
                continue;
            }
            for pte in 0..ENTRIES_PER_TABLE {
                let virt = (pde as u32) << 22 | (pte as u32) << 12;
                let entry = unsafe { *page_table::table_ptr(pde).add(pte) };
                if entry & page_table::FLAG_PRESENT == 0 {
                    continue;
                }
                let kind = page_table::entry_kind(entry);
                let phys = page_table::entry_frame(entry);

                match kind {
                    PageKind::Private => continue, // new thread gets its own stack
                    PageKind::Hardware => {
                        frame_allocator::acquire_ref(phys)?;
                        mmap_direct_into(new_dir_phys, virt, phys, false, false, true, true)?;
                    }
                    PageKind::Regular => {
                        let writable = page_table::entry_is_writable(entry);
                        if writable && !page_table::entry_is_cow(entry) {
                            let parent_entry = unsafe { page_table::raw_entry_mut(virt) };
                            *parent_entry &= !page_table::FLAG_WRITABLE;
                            *parent_entry |= page_table::FLAG_COW;
                            applied.push((virt, phys, true));
                        }
                        frame_allocator::acquire_ref(phys)?;
                        mmap_direct_into(new_dir_phys, virt, phys, true, false, true, false)?;
                        if writable {
                            mark_cow_in(new_dir_phys, virt);
                        }
                        applied.push((virt, phys, false));
                    }
                }
            }
        }

        // Step 4: deep-copy the calling thread's kernel stack, marked PRIVATE.
        let (kstack_base, kstack_size) = current_kstack;
        let pages = kstack_size.div_ceil(PAGE_SIZE);
        for i in 0..pages {
            let virt = kstack_base + i * PAGE_SIZE;
            let new_phys = frame_allocator::alloc_frames(1)?;
            let scratch = page_table::map_transient(new_phys)?;
            unsafe {
                core::ptr::copy_nonoverlapping(virt as *const u8, scratch as *mut u8, PAGE_SIZE as usize);
            }
            page_table::unmap_transient(scratch);
            mmap_direct_into(new_dir_phys, virt, new_phys, false, false, true, false)?;
        }

        Ok(())
    })();

    if let Err(e) = result {
        // Step 6: undo demotions and release what was allocated, then the directory.
        for (virt, _phys, demoted) in applied.into_iter().rev() {
            if demoted {
                let parent_entry = unsafe { page_table::raw_entry_mut(virt) };
                *parent_entry |= page_table::FLAG_WRITABLE;
                *parent_entry &= !page_table::FLAG_COW;
            }
        }
        unsafe { page_table::switch_directory(new_dir_phys) };
        let _ = page_table::unmap_range(0, KERNEL_SPLIT);
        unsafe { page_table::switch_directory(src.dir_phys) };
        let _ = frame_allocator::free_frames(new_dir_phys, 1);
        return Err(e);
    }

    Ok(AddressSpace { dir_phys: new_dir_phys, head_cursor: src.head_cursor, tail_cursor: src.tail_cursor })
}

/// Write a single mapping into a directory that is not the currently
/// active one, via a brief address-space switch. Used only by fork, which
/// already holds the critical section for its whole duration.
fn mmap_direct_into(
    dir_phys: u32,
    virt: u32,
    phys: u32,
    read_only: bool,
    exec: bool,
    cached: bool,
    is_hw: bool,
) -> KernelResult<()> {
    let current = unsafe { page_table::current_directory_phys() };
    unsafe { page_table::switch_directory(dir_phys) };
    let kind = if is_hw { PageKind::Hardware } else { PageKind::Regular };
    let result = page_table::map_range(virt, Some(phys), PAGE_SIZE, map_flags(read_only, kind, cached));
    unsafe { page_table::switch_directory(current) };
    let _ = exec;
    result
}

fn mark_cow_in(dir_phys: u32, virt: u32) {
    let current = unsafe { page_table::current_directory_phys() };
    unsafe { page_table::switch_directory(dir_phys) };
    let entry = unsafe { page_table::raw_entry_mut(virt) };
    *entry &= !page_table::FLAG_WRITABLE;
    *entry |= page_table::FLAG_COW;
    unsafe { page_table::switch_directory(current) };
}

pub use page_fault::handle_write_fault;
