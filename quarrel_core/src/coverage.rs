//! Read-only views over the host runtime's instrumentation tables.
//!
//! The host owns the 8-bit edge counters and the PC tables; the coordinator
//! only ever borrows them between runs, through the [`CoverageHost`] trait.
//! Counter-slot addresses are treated as opaque edge identities: they are
//! stable for the lifetime of the process, which is the only scope any
//! signature derived from them is compared in.

/// One entry of a host PC table: the program counter of an instrumented
/// branch plus the host's flag word (function-entry markers and the like).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcTableEntry {
    pub pc: u64,
    pub flags: u64,
}

/// A sub-range of one module's counter array, as declared by the host.
///
/// `begin..end` are offsets into the module's counter slice. Disabled
/// regions still occupy index space (the edge-to-PC mapping is positional)
/// but are skipped by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRegion {
    pub begin: usize,
    pub end: usize,
    pub enabled: bool,
}

/// Borrowed view of one instrumented module's 8-bit counters.
#[derive(Debug, Clone, Copy)]
pub struct ModuleView<'a> {
    counters: &'a [u8],
    regions: &'a [CounterRegion],
}

impl<'a> ModuleView<'a> {
    pub fn new(counters: &'a [u8], regions: &'a [CounterRegion]) -> Self {
        Self { counters, regions }
    }

    /// Number of edges (counter slots) in this module, enabled or not.
    pub fn edge_count(&self) -> usize {
        self.counters.len()
    }

    /// Address of the first counter slot; slot `i` lives at `base + i`.
    pub fn base_address(&self) -> usize {
        self.counters.as_ptr() as usize
    }

    pub fn counters(&self) -> &'a [u8] {
        self.counters
    }

    /// Enabled regions in declared order.
    pub fn enabled_regions(&self) -> impl Iterator<Item = CounterRegion> + 'a {
        self.regions.iter().copied().filter(|r| r.enabled)
    }
}

/// The narrow read interface onto the host's coverage tables.
///
/// Module index `i` and PC-table index `i` are aligned by the host: the
/// table at `pc_table(i)` has exactly `module(i).edge_count()` entries.
/// The registry re-checks this at registration time and refuses sections
/// that violate it.
pub trait CoverageHost {
    fn num_modules(&self) -> usize;
    fn num_pc_tables(&self) -> usize;
    fn module(&self, index: usize) -> ModuleView<'_>;
    fn pc_table(&self, index: usize) -> &[PcTableEntry];
}

/// One positive-hit edge observed during a single run.
///
/// `slot` is the counter byte's address, kept as an opaque handle; it must
/// never be dereferenced after the run that recorded it. `pc` is retained
/// for post-mortem inspection only and does not feed any signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeHit {
    pub pc: u64,
    pub slot: u64,
    pub hits: u8,
}

#[cfg(test)]
pub(crate) mod test_host {
    use super::*;

    /// In-memory stand-in for the host's instrumentation tables.
    ///
    /// Each module is one heap buffer of counters with a synthetic PC table
    /// (`pc_base + slot index`), covered by a single enabled region unless
    /// the test installs its own region list.
    #[derive(Debug, Default)]
    pub struct MemHost {
        counters: Vec<Vec<u8>>,
        regions: Vec<Vec<CounterRegion>>,
        pc_tables: Vec<Vec<PcTableEntry>>,
    }

    impl MemHost {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_module(&mut self, edges: usize, pc_base: u64) -> usize {
            let index = self.counters.len();
            self.counters.push(vec![0; edges]);
            self.regions.push(vec![CounterRegion {
                begin: 0,
                end: edges,
                enabled: true,
            }]);
            self.pc_tables.push(
                (0..edges as u64)
                    .map(|i| PcTableEntry {
                        pc: pc_base + i,
                        flags: 0,
                    })
                    .collect(),
            );
            index
        }

        pub fn set_regions(&mut self, module: usize, regions: Vec<CounterRegion>) {
            self.regions[module] = regions;
        }

        pub fn set_counters(&mut self, module: usize, values: &[u8]) {
            self.counters[module].copy_from_slice(values);
        }

        /// Zero every counter, as the host does before each target run.
        pub fn clear_counters(&mut self) {
            for module in &mut self.counters {
                module.fill(0);
            }
        }

        pub fn slot_address(&self, module: usize, offset: usize) -> u64 {
            (self.counters[module].as_ptr() as usize + offset) as u64
        }
    }

    impl CoverageHost for MemHost {
        fn num_modules(&self) -> usize {
            self.counters.len()
        }

        fn num_pc_tables(&self) -> usize {
            self.pc_tables.len()
        }

        fn module(&self, index: usize) -> ModuleView<'_> {
            ModuleView::new(&self.counters[index], &self.regions[index])
        }

        fn pc_table(&self, index: usize) -> &[PcTableEntry] {
            &self.pc_tables[index]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_host::MemHost;
    use super::*;

    #[test]
    fn module_view_reports_edges_and_base() {
        let mut host = MemHost::new();
        let m = host.add_module(16, 0x1000);
        let view = host.module(m);
        assert_eq!(view.edge_count(), 16);
        assert_eq!(view.base_address() as u64, host.slot_address(m, 0));
        assert_eq!(view.enabled_regions().count(), 1);
    }

    #[test]
    fn disabled_regions_are_skipped_but_keep_index_space() {
        let mut host = MemHost::new();
        let m = host.add_module(8, 0x2000);
        host.set_regions(
            m,
            vec![
                CounterRegion {
                    begin: 0,
                    end: 4,
                    enabled: false,
                },
                CounterRegion {
                    begin: 4,
                    end: 8,
                    enabled: true,
                },
            ],
        );
        let view = host.module(m);
        let enabled: Vec<_> = view.enabled_regions().collect();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].begin, 4);
        // The PC table still addresses all eight slots positionally.
        assert_eq!(host.pc_table(m).len(), 8);
        assert_eq!(host.pc_table(m)[5].pc, 0x2005);
    }
}
