//! ACPI platform discovery (C1): RSDP → RSDT/XSDT → MADT.
//!
//! Grounded on the teacher's `arch/x86_64/acpi.rs`. MCFG/DMAR/SRAT/SLIT
//! parsing is dropped (§1 Non-goals: no PCIe config space, no NUMA). A
//! checksum failure on any table used to be a logged warning in the teacher;
//! here it is `KernelError::Checksum` and the caller degrades to legacy PIC
//! routing rather than trusting a table that failed validation.

use core::mem::size_of;

use spin::Mutex;

use crate::{
    error::{KernelError, KernelResult},
    sync::once_lock::GlobalState,
};

const RSDP_SCAN_START: usize = 0xE0000;
const RSDP_SCAN_END: usize = 0x100000;
const RSDP_SIGNATURE: &[u8; 8] = b"RSD PTR ";

#[repr(C, packed)]
struct RsdpV1 {
    signature: [u8; 8],
    checksum: u8,
    oem_id: [u8; 6],
    revision: u8,
    rsdt_address: u32,
}

#[repr(C, packed)]
struct RsdpV2 {
    v1: RsdpV1,
    length: u32,
    xsdt_address: u64,
    extended_checksum: u8,
    _reserved: [u8; 3],
}

#[repr(C, packed)]
struct SdtHeader {
    signature: [u8; 4],
    length: u32,
    revision: u8,
    checksum: u8,
    oem_id: [u8; 6],
    oem_table_id: [u8; 8],
    oem_revision: u32,
    creator_id: u32,
    creator_revision: u32,
}

fn checksum_ok(bytes: &[u8]) -> bool {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)) == 0
}

unsafe fn bytes_of<T>(ptr: *const T) -> &'static [u8] {
    unsafe { core::slice::from_raw_parts(ptr as *const u8, size_of::<T>()) }
}

/// A CPU entry from the MADT's local-APIC records.
#[derive(Debug, Clone, Copy)]
pub struct CpuEntry {
    pub apic_id: u8,
    pub enabled: bool,
}

/// An I/O-APIC record from the MADT.
#[derive(Debug, Clone, Copy)]
pub struct IoControllerEntry {
    pub id: u8,
    pub base_address: u32,
    pub first_global_irq: u32,
}

/// A legacy-IRQ-to-GSI remap, i.e. an interrupt source override record.
#[derive(Debug, Clone, Copy)]
struct IrqOverride {
    legacy_irq: u8,
    global_irq: u32,
}

pub struct AcpiInfo {
    local_controller_base: u32,
    cpus: heapless_vec::Vec<CpuEntry, 16>,
    io_controllers: heapless_vec::Vec<IoControllerEntry, 4>,
    overrides: heapless_vec::Vec<IrqOverride, 16>,
}

/// Small fixed-capacity vec so `AcpiInfo` needs no heap allocation (ACPI
/// discovery runs before `mm::init`).
mod heapless_vec {
    pub struct Vec<T, const N: usize> {
        items: [Option<T>; N],
        len: usize,
    }

    impl<T: Copy, const N: usize> Vec<T, N> {
        pub const fn new() -> Self {
            Self { items: [None; N], len: 0 }
        }

        pub fn push(&mut self, value: T) -> bool {
            if self.len >= N {
                return false;
            }
            self.items[self.len] = Some(value);
            self.len += 1;
            true
        }

        pub fn iter(&self) -> impl Iterator<Item = &T> {
            self.items[..self.len].iter().filter_map(|o| o.as_ref())
        }

        pub fn first(&self) -> Option<&T> {
            self.iter().next()
        }
    }

    impl<T: Copy, const N: usize> Default for Vec<T, N> {
        fn default() -> Self {
            Self::new()
        }
    }
}

impl AcpiInfo {
    pub fn local_controller_base(&self) -> u32 {
        self.local_controller_base
    }

    pub fn cpus(&self) -> impl Iterator<Item = &CpuEntry> {
        self.cpus.iter()
    }

    /// First-table-wins (decided Open Question): only the first discovered
    /// I/O controller is ever consulted.
    pub fn first_io_controller(&self) -> Option<&IoControllerEntry> {
        self.io_controllers.first()
    }
}

static INFO: GlobalState<Mutex<Option<AcpiInfo>>> = GlobalState::new();

fn scan_for_rsdp() -> Option<usize> {
    let mut addr = RSDP_SCAN_START;
    while addr < RSDP_SCAN_END {
        let candidate = addr as *const [u8; 8];
        let sig = unsafe { core::ptr::read_unaligned(candidate) };
        if &sig == RSDP_SIGNATURE {
            return Some(addr);
        }
        addr += 16;
    }
    None
}

fn parse_madt(madt_addr: usize, info: &mut AcpiInfo) {
    let header = unsafe { &*(madt_addr as *const SdtHeader) };
    info.local_controller_base = unsafe { *((madt_addr + size_of::<SdtHeader>()) as *const u32) };

    let entries_start = madt_addr + size_of::<SdtHeader>() + 8;
    let entries_end = madt_addr + header.length as usize;
    let mut p = entries_start;
    while p + 2 <= entries_end {
        let entry_type = unsafe { *(p as *const u8) };
        let entry_len = unsafe { *((p + 1) as *const u8) } as usize;
        if entry_len == 0 {
            break;
        }
        match entry_type {
            0 => {
                // Processor Local APIC: [type, len, acpi_id, apic_id, flags:u32]
                let apic_id = unsafe { *((p + 3) as *const u8) };
                let flags = unsafe { *((p + 4) as *const u32) };
                info.cpus.push(CpuEntry { apic_id, enabled: flags & 1 != 0 });
            }
            1 => {
                // I/O APIC: [type, len, id, reserved, address:u32, gsi_base:u32]
                let id = unsafe { *((p + 2) as *const u8) };
                let base_address = unsafe { *((p + 4) as *const u32) };
                let first_global_irq = unsafe { *((p + 8) as *const u32) };
                info.io_controllers.push(IoControllerEntry { id, base_address, first_global_irq });
            }
            2 => {
                // Interrupt Source Override: [type, len, bus, source, gsi:u32, flags:u16]
                let legacy_irq = unsafe { *((p + 3) as *const u8) };
                let global_irq = unsafe { *((p + 4) as *const u32) };
                info.overrides.push(IrqOverride { legacy_irq, global_irq });
            }
            _ => {}
        }
        p += entry_len;
    }
}

/// Locate the RSDP, validate and walk the RSDT/XSDT, and parse the MADT.
/// Returns `KernelError::Checksum` if any table visited fails validation;
/// callers should treat this as "no APIC platform data available" and fall
/// back to legacy PIC routing for every IRQ.
pub fn init() -> KernelResult<()> {
    let rsdp_addr = scan_for_rsdp().ok_or(KernelError::NotSupported)?;

    let v1 = unsafe { &*(rsdp_addr as *const RsdpV1) };
    if !checksum_ok(unsafe { bytes_of(v1) }) {
        return Err(KernelError::Checksum);
    }

    let (sdt_addr, entry_size, is_xsdt) = if v1.revision >= 2 {
        let v2 = unsafe { &*(rsdp_addr as *const RsdpV2) };
        if !checksum_ok(unsafe { bytes_of(v2) }) {
            return Err(KernelError::Checksum);
        }
        (v2.xsdt_address as usize, 8usize, true)
    } else {
        (v1.rsdt_address as usize, 4usize, false)
    };

    let sdt_header = unsafe { &*(sdt_addr as *const SdtHeader) };
    let sdt_bytes = unsafe { core::slice::from_raw_parts(sdt_addr as *const u8, sdt_header.length as usize) };
    if !checksum_ok(sdt_bytes) {
        return Err(KernelError::Checksum);
    }

    let mut info = AcpiInfo {
        local_controller_base: 0,
        cpus: heapless_vec::Vec::new(),
        io_controllers: heapless_vec::Vec::new(),
        overrides: heapless_vec::Vec::new(),
    };

    let entries_start = sdt_addr + size_of::<SdtHeader>();
    let entry_count = (sdt_header.length as usize - size_of::<SdtHeader>()) / entry_size;
    let mut found_madt = false;
    for i in 0..entry_count {
        let table_addr = if is_xsdt {
            unsafe { *((entries_start + i * 8) as *const u64) as usize }
        } else {
            unsafe { *((entries_start + i * 4) as *const u32) as usize }
        };
        let table_header = unsafe { &*(table_addr as *const SdtHeader) };
        if &table_header.signature == b"APIC" {
            let table_bytes = unsafe {
                core::slice::from_raw_parts(table_addr as *const u8, table_header.length as usize)
            };
            if !checksum_ok(table_bytes) {
                return Err(KernelError::Checksum);
            }
            parse_madt(table_addr, &mut info);
            found_madt = true;
        }
        // MCFG/DMAR/SRAT/SLIT intentionally unvisited.
    }

    if !found_madt {
        return Err(KernelError::NotSupported);
    }

    let _ = INFO.init(Mutex::new(None));
    INFO.with(|s| *s.lock() = Some(info));
    Ok(())
}

/// Resolve a legacy ISA IRQ to its global interrupt number, honoring any
/// interrupt source override. First override table entry for a given legacy
/// IRQ wins; later conflicting entries are logged and discarded (decided
/// Open Question).
pub fn global_irq_for_legacy(irq: u8) -> u32 {
    INFO.with(|s| {
        let guard = s.lock();
        match guard.as_ref() {
            Some(info) => info
                .overrides
                .iter()
                .find(|o| o.legacy_irq == irq)
                .map(|o| o.global_irq)
                .unwrap_or(irq as u32),
            None => irq as u32,
        }
    })
    .unwrap_or(irq as u32)
}

pub fn with_info<R>(f: impl FnOnce(&AcpiInfo) -> R) -> Option<R> {
    INFO.with(|s| s.lock().as_ref().map(f)).flatten()
}
