//! C-linkage facade over the differential-fuzzing coordinator.
//!
//! The host runtime drives one strictly sequential protocol:
//!
//! ```text
//! RegisterCoverageTables* ;
//! ( StartRegistration ; EndRegistration )* ;
//! ( StartBatch ; ( StartRun ; <execute target> ; EndRun )* ; EndBatch )*
//! ```
//!
//! All state lives in one process-wide singleton behind a mutex; the
//! protocol itself is single-threaded and non-reentrant, the lock only
//! guards against accidental cross-thread misuse. Protocol violations are
//! not recoverable: the facade prints a diagnostic to stderr and aborts,
//! because continuing would corrupt the cumulative novelty sets.
//!
//! Pointer lifetimes: counter and PC-table ranges passed to
//! [`LLVMFuzzerRegisterCoverageTables`] must stay valid for the process
//! lifetime. The edge list lent out by [`LLVMFuzzerTargetCoverage`] is
//! valid only until the next facade call.

mod tables;

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_ulong};
use std::process;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use quarrel_core::{DiffManager, Reporter};
use tracing::debug;

pub use tables::{FDPCEntry, HostTables};

/// Half-open index range into the host tables.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FDRange {
    pub start: c_int,
    pub end: c_int,
}

/// Module and PC-table ranges of one registered section.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FDSection {
    pub modules: FDRange,
    pub pctables: FDRange,
}

struct FfiState {
    tables: HostTables,
    manager: DiffManager,
    /// Backing store for the pointer lent out by `LLVMFuzzerTargetCoverage`.
    coverage_scratch: Vec<c_ulong>,
}

static STATE: Lazy<Mutex<FfiState>> = Lazy::new(|| {
    Mutex::new(FfiState {
        tables: HostTables::default(),
        manager: DiffManager::new(Reporter::new("output")),
        coverage_scratch: Vec::new(),
    })
});

fn with_state<R>(f: impl FnOnce(&mut FfiState) -> R) -> R {
    match STATE.lock() {
        Ok(mut guard) => f(&mut guard),
        Err(_) => fatal("coordinator state poisoned by a previous panic"),
    }
}

fn fatal(message: impl std::fmt::Display) -> ! {
    eprintln!("quarrel: fatal protocol violation: {message}");
    process::abort();
}

unsafe fn identifier_from(id: *const c_char) -> String {
    if id.is_null() {
        return String::new();
    }
    CStr::from_ptr(id).to_string_lossy().into_owned()
}

/// Adopt one instrumented module's 8-bit counter range and PC table.
///
/// Called once per module before any registration. Empty ranges are
/// ignored.
///
/// # Safety
/// Both ranges must be valid, readable, and outlive the process; the PC
/// table must carry exactly one entry per counter byte.
#[no_mangle]
pub unsafe extern "C" fn LLVMFuzzerRegisterCoverageTables(
    counters_begin: *const u8,
    counters_end: *const u8,
    pcs_begin: *const FDPCEntry,
    pcs_end: *const FDPCEntry,
) {
    if counters_begin.is_null() || counters_begin == counters_end {
        return;
    }
    if pcs_begin.is_null() || pcs_begin == pcs_end {
        return;
    }
    with_state(|state| {
        // Safety: forwarded verbatim from the caller's contract above.
        let index = unsafe {
            state
                .tables
                .register_module(counters_begin, counters_end, pcs_begin, pcs_end)
        };
        debug!(module = index, "host module adopted");
    });
}

/// Snapshot the current table counts; the next `EndRegistration` closes
/// the delta as one section. The identifier argument is ignored here and
/// reported at `EndRegistration`.
#[no_mangle]
pub unsafe extern "C" fn LLVMFuzzerStartRegistration(_id: *const c_char) {
    with_state(|state| {
        let FfiState { tables, manager, .. } = state;
        manager.begin_registration(tables);
    });
}

/// Close the open registration and return the new target's index (which
/// doubles as its section handle).
#[no_mangle]
pub unsafe extern "C" fn LLVMFuzzerEndRegistration(id: *const c_char) -> c_int {
    let identifier = identifier_from(id);
    with_state(|state| {
        let FfiState { tables, manager, .. } = state;
        match manager.end_registration(tables, &identifier) {
            Ok(index) => index as c_int,
            Err(err) => fatal(err),
        }
    })
}

/// Copy the module/PC-table ranges of `handle` into `out`.
///
/// # Safety
/// `out` must point to writable memory for one `FDSection`.
#[no_mangle]
pub unsafe extern "C" fn LLVMFuzzerGetSectionInfo(handle: c_int, out: *mut FDSection) {
    if out.is_null() {
        fatal("GetSectionInfo with null output pointer");
    }
    let section = with_state(|state| state.manager.section(handle as usize).cloned());
    let Some(section) = section else {
        fatal(format!("GetSectionInfo for unknown handle {handle}"));
    };
    *out = FDSection {
        modules: FDRange {
            start: section.modules.start as c_int,
            end: section.modules.end as c_int,
        },
        pctables: FDRange {
            start: section.pctables.start as c_int,
            end: section.pctables.end as c_int,
        },
    };
}

/// Open a batch for the given input bytes.
///
/// # Safety
/// `data` must be readable for `size` bytes (null is accepted for an
/// empty input).
#[no_mangle]
pub unsafe extern "C" fn LLVMFuzzerStartBatch(data: *const u8, size: usize) {
    let input: &[u8] = if data.is_null() {
        if size != 0 {
            fatal("StartBatch with null data and non-zero size");
        }
        &[]
    } else {
        std::slice::from_raw_parts(data, size)
    };
    with_state(|state| {
        if let Err(err) = state.manager.start_batch(input) {
            fatal(err);
        }
    });
}

/// Yield the index of the next run; the host must pair it with `EndRun`.
#[no_mangle]
pub extern "C" fn LLVMFuzzerStartRun() -> c_int {
    with_state(|state| match state.manager.start_run() {
        Ok(index) => index as c_int,
        Err(err) => fatal(err),
    })
}

/// Commit the active run: exit code, serialized output, coverage scan.
///
/// `section_ids`/`n` may name the section handles to scan; a null or
/// empty list scans the active target's own registered sections.
///
/// # Safety
/// `section_ids` must be readable for `n` entries when non-null; `data`
/// must be readable for `size` bytes when non-null.
#[no_mangle]
pub unsafe extern "C" fn LLVMFuzzerEndRun(
    section_ids: *const c_int,
    n: c_int,
    exit_code: c_int,
    data: *const u8,
    size: usize,
) {
    let output: &[u8] = if data.is_null() {
        &[]
    } else {
        std::slice::from_raw_parts(data, size)
    };
    let sections: Option<Vec<usize>> = if section_ids.is_null() || n <= 0 {
        None
    } else {
        Some(
            std::slice::from_raw_parts(section_ids, n as usize)
                .iter()
                .map(|&id| {
                    if id < 0 {
                        fatal(format!("EndRun with negative section handle {id}"));
                    }
                    id as usize
                })
                .collect(),
        )
    };
    with_state(|state| {
        let FfiState { tables, manager, .. } = state;
        let Some(active) = manager.active_run() else {
            fatal("EndRun while no run is active");
        };
        if let Err(err) = manager.end_run(tables, active, exit_code, output, sections.as_deref()) {
            fatal(err);
        }
    });
}

/// Close the batch: admission, novelty accounting, classification,
/// reporting.
#[no_mangle]
pub extern "C" fn LLVMFuzzerEndBatch() {
    with_state(|state| match state.manager.end_batch() {
        Ok(verdict) => debug!(?verdict, "batch closed"),
        Err(err) => fatal(err),
    });
}

/// Borrow the slot-address list of the i-th target's current-batch edges.
/// The pointer is valid until the next facade call.
///
/// # Safety
/// `edges` and `n` must be writable.
#[no_mangle]
pub unsafe extern "C" fn LLVMFuzzerTargetCoverage(
    target: c_int,
    edges: *mut *const c_ulong,
    n: *mut c_int,
) {
    if edges.is_null() || n.is_null() {
        fatal("TargetCoverage with null output pointer");
    }
    // The scratch vector lives in the process-wide singleton, so the
    // pointer stays valid after the lock is released.
    let (ptr, len) = with_state(|state| {
        let Some(hits) = state.manager.edge_hits(target as usize) else {
            fatal(format!("TargetCoverage for unknown target {target}"));
        };
        state.coverage_scratch = hits.iter().map(|hit| hit.slot as c_ulong).collect();
        (state.coverage_scratch.as_ptr(), state.coverage_scratch.len())
    });
    *edges = ptr;
    *n = len as c_int;
}

/// Report the cumulative coarse/fine novelty set sizes.
///
/// # Safety
/// Both pointers must be writable.
#[no_mangle]
pub unsafe extern "C" fn LLVMFuzzerNezhaCoverage(coarse: *mut c_int, fine: *mut c_int) {
    if coarse.is_null() || fine.is_null() {
        fatal("NezhaCoverage with null output pointer");
    }
    let (coarse_count, fine_count) = with_state(|state| state.manager.novelty_counts());
    *coarse = coarse_count as c_int;
    *fine = fine_count as c_int;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leak_counters(len: usize) -> &'static mut [u8] {
        Box::leak(vec![0u8; len].into_boxed_slice())
    }

    fn leak_pcs(base: usize, len: usize) -> &'static [FDPCEntry] {
        Box::leak(
            (0..len)
                .map(|i| FDPCEntry {
                    pc: base + i,
                    flags: 0,
                })
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        )
    }

    /// The singleton makes the facade order-dependent, so the whole
    /// protocol is exercised in one sequential test.
    #[test]
    fn facade_drives_full_protocol() {
        unsafe {
            let left = leak_counters(4);
            let left_pcs = leak_pcs(0x4000, 4);
            let right = leak_counters(4);
            let right_pcs = leak_pcs(0x5000, 4);

            LLVMFuzzerRegisterCoverageTables(
                left.as_ptr(),
                left.as_ptr().add(left.len()),
                left_pcs.as_ptr(),
                left_pcs.as_ptr().add(left_pcs.len()),
            );
            LLVMFuzzerStartRegistration(std::ptr::null());
            let left_handle = LLVMFuzzerEndRegistration(c"left".as_ptr());
            assert_eq!(left_handle, 0);

            LLVMFuzzerRegisterCoverageTables(
                right.as_ptr(),
                right.as_ptr().add(right.len()),
                right_pcs.as_ptr(),
                right_pcs.as_ptr().add(right_pcs.len()),
            );
            LLVMFuzzerStartRegistration(std::ptr::null());
            let right_handle = LLVMFuzzerEndRegistration(c"right".as_ptr());
            assert_eq!(right_handle, 1);

            let mut section = FDSection::default();
            LLVMFuzzerGetSectionInfo(right_handle, &mut section);
            assert_eq!(section.modules.start, 1);
            assert_eq!(section.modules.end, 2);
            assert_eq!(section.pctables.start, 1);

            let input = b"42";
            LLVMFuzzerStartBatch(input.as_ptr(), input.len());

            let run = LLVMFuzzerStartRun();
            assert_eq!(run, 0);
            left[0] = 1;
            left[2] = 3;
            LLVMFuzzerEndRun(std::ptr::null(), 0, 0, b"42".as_ptr(), 2);

            let run = LLVMFuzzerStartRun();
            assert_eq!(run, 1);
            left.fill(0);
            right[3] = 2;
            LLVMFuzzerEndRun(std::ptr::null(), 0, 0, b"42".as_ptr(), 2);

            let mut edges: *const c_ulong = std::ptr::null();
            let mut count: c_int = 0;
            LLVMFuzzerTargetCoverage(0, &mut edges, &mut count);
            assert_eq!(count, 2);
            let slots = std::slice::from_raw_parts(edges, count as usize);
            assert_eq!(slots[0], left.as_ptr() as c_ulong);
            assert_eq!(slots[1], left.as_ptr().add(2) as c_ulong);

            LLVMFuzzerEndBatch();

            let mut coarse: c_int = -1;
            let mut fine: c_int = -1;
            LLVMFuzzerNezhaCoverage(&mut coarse, &mut fine);
            assert_eq!(coarse, 1);
            assert_eq!(fine, 1);
        }
    }
}
