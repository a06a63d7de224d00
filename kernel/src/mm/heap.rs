//! Kernel heap bring-up.
//!
//! Grounded on the teacher's `mm/heap.rs`: its `SlabAllocator` size-class
//! companion was a documented placeholder never wired into the global
//! allocator and is dropped here; the `linked_list_allocator::LockedHeap`
//! it fell back to for every real allocation is kept as the kernel's only
//! allocator, backed by frames mapped into the kernel heap window rather
//! than a static array.

use crate::mm::{frame_allocator, page_table};

/// Reserved virtual range for the kernel heap, inside the shared kernel
/// window above `KERNEL_SPLIT`.
pub const HEAP_START: u32 = 0xD000_0000;
pub const HEAP_SIZE: u32 = 4 * 1024 * 1024;

/// Map and hand the kernel heap range to the global allocator.
///
/// # Safety
/// Must run exactly once, after `mm::init` has brought up the frame
/// allocator and the kernel's own address space.
pub unsafe fn init() -> Result<(), &'static str> {
    let pages = HEAP_SIZE.div_ceil(page_table::PAGE_SIZE);
    for i in 0..pages {
        let virt = HEAP_START + i * page_table::PAGE_SIZE;
        let phys = frame_allocator::alloc_frames(1).map_err(|_| "out of memory mapping kernel heap")?;
        page_table::map_range(
            virt,
            Some(phys),
            page_table::PAGE_SIZE,
            page_table::MapFlags {
                writable: true,
                kind: page_table::PageKind::Private,
                cow: false,
                cached: true,
            },
        )
        .map_err(|_| "failed to map kernel heap page")?;
    }

    unsafe {
        crate::ALLOCATOR.lock().init(HEAP_START as *mut u8, HEAP_SIZE as usize);
    }
    crate::println!("[HEAP] {} KiB at {:#010x}", HEAP_SIZE / 1024, HEAP_START);
    Ok(())
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use alloc::{boxed::Box, vec::Vec};

    #[test]
    fn heap_allocation_smoke_test() {
        let x = Box::new(42);
        assert_eq!(*x, 42);

        let mut v = Vec::new();
        for i in 0..100 {
            v.push(i);
        }
        assert_eq!(v.len(), 100);
    }
}
