//! Host coverage tables registered through the C surface.
//!
//! The host hands over raw pointer ranges once per instrumented module;
//! this module keeps them and serves the core's read-only
//! [`CoverageHost`] view. PC tables are snapshotted at registration (they
//! are immutable constants on the host side); counter bytes are re-read
//! live on every scan.

use std::slice;

use quarrel_core::coverage::{CounterRegion, CoverageHost, ModuleView, PcTableEntry};

/// Mirror of the host's PC-table entry layout.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FDPCEntry {
    pub pc: usize,
    pub flags: usize,
}

#[derive(Debug)]
struct RawModule {
    counters: *const u8,
    len: usize,
    regions: Vec<CounterRegion>,
    pc_table: Vec<PcTableEntry>,
}

/// All modules the host has registered so far.
#[derive(Debug, Default)]
pub struct HostTables {
    modules: Vec<RawModule>,
}

// The facade serializes all access behind one lock and the protocol is
// single-threaded by contract; the raw pointers never leave this module.
unsafe impl Send for HostTables {}

impl HostTables {
    /// Adopt one module's counter range and PC table.
    ///
    /// # Safety
    /// `[counters_begin, counters_end)` must stay valid and readable for
    /// the process lifetime; `[pcs_begin, pcs_end)` must be a readable
    /// array of `FDPCEntry` with exactly one entry per counter byte.
    pub unsafe fn register_module(
        &mut self,
        counters_begin: *const u8,
        counters_end: *const u8,
        pcs_begin: *const FDPCEntry,
        pcs_end: *const FDPCEntry,
    ) -> usize {
        let len = counters_end.offset_from(counters_begin) as usize;
        let pc_len = pcs_end.offset_from(pcs_begin) as usize;
        let pc_table = slice::from_raw_parts(pcs_begin, pc_len)
            .iter()
            .map(|entry| PcTableEntry {
                pc: entry.pc as u64,
                flags: entry.flags as u64,
            })
            .collect();
        let index = self.modules.len();
        self.modules.push(RawModule {
            counters: counters_begin,
            len,
            regions: vec![CounterRegion {
                begin: 0,
                end: len,
                enabled: true,
            }],
            pc_table,
        });
        index
    }
}

impl CoverageHost for HostTables {
    fn num_modules(&self) -> usize {
        self.modules.len()
    }

    fn num_pc_tables(&self) -> usize {
        self.modules.len()
    }

    fn module(&self, index: usize) -> ModuleView<'_> {
        let raw = &self.modules[index];
        // Safety: the host guarantees the counter range outlives the
        // process and is not mutated while a scan is in progress (the
        // state machine never scans during a target run).
        let counters = unsafe { slice::from_raw_parts(raw.counters, raw.len) };
        ModuleView::new(counters, &raw.regions)
    }

    fn pc_table(&self, index: usize) -> &[PcTableEntry] {
        &self.modules[index].pc_table
    }
}
