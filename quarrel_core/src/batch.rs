//! The per-batch state machine and its cumulative novelty accounting.
//!
//! The host drives one strictly sequential epoch:
//!
//! ```text
//! Registration* ; ( StartBatch ; ( StartRun ; EndRun )* ; EndBatch )*
//! ```
//!
//! Everything runs to completion synchronously; a batch abandoned mid-way
//! (process death) commits nothing, because [`DiffManager::end_batch`] is
//! the only operation that touches cumulative state.

use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, warn};

use crate::classify::{self, DivergenceClass};
use crate::coverage::{CoverageHost, EdgeHit};
use crate::hash;
use crate::registry::{Registry, RegistryError, Section};
use crate::report::{DivergenceReport, Reporter};

/// Edge-record cap per batch. Coarse and fine signatures stay exact past
/// the cap; only the post-mortem [`EdgeHit`] lists stop growing.
pub const MAX_EDGE_RECORDS: usize = 1 << 25;

/// Out-of-protocol events. The host misusing the state machine would
/// corrupt cumulative state, so callers must not continue past one of
/// these; the C facade aborts the process on all of them.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("StartBatch while a batch is already active")]
    BatchAlreadyActive,

    #[error("{op} without an active batch")]
    NoActiveBatch { op: &'static str },

    #[error("StartRun while run {0} is still active")]
    RunAlreadyActive(usize),

    #[error("StartRun beyond the {0} targets registered at batch start")]
    RunOverflow(usize),

    #[error("EndRun for target {got} while run {active} is active")]
    RunIndexMismatch { got: usize, active: usize },

    #[error("EndRun while no run is active")]
    NoActiveRun,

    #[error("EndRun names unknown section handle {0}")]
    UnknownSection(usize),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// All observations for one input across the targets of one batch.
///
/// Vectors are indexed by target; their length is fixed at
/// [`DiffManager::start_batch`] and targets registered afterwards do not
/// alter an in-flight batch.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub input: Vec<u8>,
    pub exit_codes: Vec<i32>,
    pub outputs: Vec<Vec<u8>>,
    pub coarse: Vec<u32>,
    pub fine: Vec<u32>,
    pub edges: Vec<Vec<EdgeHit>>,
}

impl BatchResult {
    fn reset(&mut self, input: &[u8], targets: usize) {
        self.input.clear();
        self.input.extend_from_slice(input);
        self.exit_codes = vec![0; targets];
        self.outputs = vec![Vec::new(); targets];
        self.coarse = vec![0; targets];
        self.fine = vec![0; targets];
        self.edges = vec![Vec::new(); targets];
    }

    pub fn target_count(&self) -> usize {
        self.exit_codes.len()
    }
}

/// Process-lifetime novelty sets; they only ever grow.
#[derive(Debug, Default)]
pub struct CumulativeResults {
    pub exit_code_hashes: HashSet<u32>,
    pub coarse_hashes: HashSet<u32>,
    pub fine_hashes: HashSet<u32>,
    pub tuple_hashes: HashSet<u32>,
}

/// What [`DiffManager::end_batch`] did with the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchVerdict {
    /// Zero targets were registered at batch start; nothing to account.
    EmptyBatch,
    /// Every target rejected the input; cumulative state untouched.
    AllRejected,
    /// The `(exit, coarse, fine)` tuple was already known.
    KnownTuple,
    /// All outputs coincide after whitespace stripping.
    OutputsAgree,
    /// The divergence matched a known structural class; suppressed.
    Classified(DivergenceClass),
    /// Unclassified divergence; artifacts were written (best effort).
    Reported { stem: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    InBatch { next_run: usize },
    InRun { index: usize },
}

/// Process-wide coordinator: registry, per-batch buffers, cumulative
/// novelty sets and the reporter. Single-threaded by contract.
#[derive(Debug)]
pub struct DiffManager {
    registry: Registry,
    reporter: Reporter,
    batch: BatchResult,
    cumulative: CumulativeResults,
    phase: Phase,
    interesting: bool,
    edge_records: usize,
    edge_cap_hit: bool,
}

impl DiffManager {
    pub fn new(reporter: Reporter) -> Self {
        Self {
            registry: Registry::new(),
            reporter,
            batch: BatchResult::default(),
            cumulative: CumulativeResults::default(),
            phase: Phase::Idle,
            interesting: false,
            edge_records: 0,
            edge_cap_hit: false,
        }
    }

    // ---- registration ----------------------------------------------------

    pub fn begin_registration(&mut self, host: &dyn CoverageHost) {
        self.registry.begin_registration(host);
    }

    pub fn end_registration(
        &mut self,
        host: &dyn CoverageHost,
        identifier: &str,
    ) -> Result<usize, RegistryError> {
        self.registry.end_registration(host, identifier)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn section(&self, handle: usize) -> Option<&Section> {
        self.registry.section(handle)
    }

    // ---- batch protocol --------------------------------------------------

    /// Open a batch for `input`. The target count is snapshotted here and
    /// every per-target vector is allocated at that width, zeroed.
    pub fn start_batch(&mut self, input: &[u8]) -> Result<(), ProtocolError> {
        if self.phase != Phase::Idle {
            return Err(ProtocolError::BatchAlreadyActive);
        }
        self.batch.reset(input, self.registry.target_count());
        self.interesting = false;
        self.edge_records = 0;
        self.edge_cap_hit = false;
        self.phase = Phase::InBatch { next_run: 0 };
        Ok(())
    }

    /// Yield the index of the next run. The host must pair it with exactly
    /// one [`end_run`](DiffManager::end_run) carrying the same index.
    pub fn start_run(&mut self) -> Result<usize, ProtocolError> {
        match self.phase {
            Phase::Idle => Err(ProtocolError::NoActiveBatch { op: "StartRun" }),
            Phase::InRun { index } => Err(ProtocolError::RunAlreadyActive(index)),
            Phase::InBatch { next_run } => {
                if next_run >= self.batch.target_count() {
                    return Err(ProtocolError::RunOverflow(self.batch.target_count()));
                }
                self.phase = Phase::InRun { index: next_run };
                Ok(next_run)
            }
        }
    }

    /// Index of the currently active run, if any.
    pub fn active_run(&self) -> Option<usize> {
        match self.phase {
            Phase::InRun { index } => Some(index),
            _ => None,
        }
    }

    /// Commit one run: record exit code and output, then walk the target's
    /// counter regions accumulating the coarse and fine signatures.
    ///
    /// `section_handles` overrides the scanned sections; `None` (or an
    /// empty list) scans the sections the active target registered. The
    /// override is how a logical target assembled from several registered
    /// sections is expressed.
    pub fn end_run(
        &mut self,
        host: &dyn CoverageHost,
        target: usize,
        exit_code: i32,
        output: &[u8],
        section_handles: Option<&[usize]>,
    ) -> Result<(), ProtocolError> {
        let active = match self.phase {
            Phase::InRun { index } => index,
            Phase::Idle => return Err(ProtocolError::NoActiveBatch { op: "EndRun" }),
            Phase::InBatch { .. } => return Err(ProtocolError::NoActiveRun),
        };
        if target != active {
            return Err(ProtocolError::RunIndexMismatch { got: target, active });
        }

        self.batch.exit_codes[target] = exit_code;
        self.batch.outputs[target] = output.to_vec();

        let sections: Vec<Section> = match section_handles {
            Some(handles) if !handles.is_empty() => handles
                .iter()
                .map(|&h| {
                    self.registry
                        .section(h)
                        .cloned()
                        .ok_or(ProtocolError::UnknownSection(h))
                })
                .collect::<Result<_, _>>()?,
            _ => self
                .registry
                .target(target)
                .ok_or(ProtocolError::UnknownSection(target))?
                .sections
                .clone(),
        };

        let mut coarse: u32 = 0;
        let mut fine: u32 = 0;
        for section in &sections {
            for (mi, pi) in section.index_pairs() {
                let module = host.module(mi);
                let pc_table = host.pc_table(pi);
                let base = module.base_address();
                let counters = module.counters();
                for region in module.enabled_regions() {
                    for offset in region.begin..region.end {
                        let hits = counters[offset];
                        if hits == 0 {
                            continue;
                        }
                        let slot = (base + offset) as u64;
                        coarse = coarse.wrapping_add(u32::from(hits));
                        fine = hash::hash_int(slot as u32, fine);
                        if self.edge_records < MAX_EDGE_RECORDS {
                            self.batch.edges[target].push(EdgeHit {
                                pc: pc_table[offset].pc,
                                slot,
                                hits,
                            });
                            self.edge_records += 1;
                        } else if !self.edge_cap_hit {
                            self.edge_cap_hit = true;
                            warn!(
                                cap = MAX_EDGE_RECORDS,
                                "edge-record cap reached; signatures stay exact, records truncated"
                            );
                        }
                    }
                }
            }
        }

        self.batch.coarse[target] = coarse;
        self.batch.fine[target] = fine;
        self.phase = Phase::InBatch {
            next_run: active + 1,
        };
        Ok(())
    }

    /// Close the batch: admission, novelty accounting, agreement check,
    /// classification, and (for unclassified divergences) reporting.
    ///
    /// Report I/O failure is logged and swallowed; the batch is still
    /// accounted in cumulative state.
    pub fn end_batch(&mut self) -> Result<BatchVerdict, ProtocolError> {
        match self.phase {
            Phase::InBatch { .. } => {}
            Phase::Idle => return Err(ProtocolError::NoActiveBatch { op: "EndBatch" }),
            Phase::InRun { index } => return Err(ProtocolError::RunAlreadyActive(index)),
        }
        self.phase = Phase::Idle;

        let batch = &self.batch;
        if batch.target_count() == 0 {
            return Ok(BatchVerdict::EmptyBatch);
        }

        // Admission: at least one target must accept.
        if batch.exit_codes.iter().all(|&code| code != 0) {
            return Ok(BatchVerdict::AllRejected);
        }

        let exit_hash = hash::hash_exit_codes(&batch.exit_codes);
        let coarse_hash = hash::hash_vector(&batch.coarse);
        let fine_hash = hash::hash_vector(&batch.fine);

        let new_exit = self.cumulative.exit_code_hashes.insert(exit_hash);
        let new_coarse = self.cumulative.coarse_hashes.insert(coarse_hash);
        let new_fine = self.cumulative.fine_hashes.insert(fine_hash);
        self.interesting = new_exit || new_coarse || new_fine;

        let joined = hash::hash_int(
            fine_hash,
            hash::hash_int(coarse_hash, hash::hash_int(exit_hash, 0)),
        );
        if !self.cumulative.tuple_hashes.insert(joined) {
            return Ok(BatchVerdict::KnownTuple);
        }

        // Outputs that coincide after whitespace stripping are one
        // behavior, not a divergence.
        let stripped: HashSet<Vec<u8>> = batch
            .outputs
            .iter()
            .map(|out| classify::strip_ascii_whitespace(out))
            .collect();
        if stripped.len() <= 1 {
            return Ok(BatchVerdict::OutputsAgree);
        }

        let accepting: Vec<&[u8]> = batch
            .exit_codes
            .iter()
            .zip(&batch.outputs)
            .filter(|(&code, _)| code == 0)
            .map(|(_, out)| out.as_slice())
            .collect();

        if let Some(class) = classify::assign_class(&batch.input, &accepting) {
            debug!(%class, "divergence matched a known class; suppressed");
            return Ok(BatchVerdict::Classified(class));
        }

        let raw_distinct: HashSet<&[u8]> =
            batch.outputs.iter().map(|out| out.as_slice()).collect();
        let report = DivergenceReport {
            input: &batch.input,
            distinct_outputs: raw_distinct.len(),
            exit_hash,
            coarse_hash,
            fine_hash,
        };
        let stem = report.artifact_stem();
        // Targets registered after this batch opened are not part of it.
        let batch_targets = &self.registry.targets()[..batch.target_count()];
        match self
            .reporter
            .write(&report, batch_targets, &batch.exit_codes, &batch.outputs)
        {
            Ok((input_path, _)) => {
                debug!(path = %input_path.display(), "divergence reported");
            }
            Err(err) => {
                warn!(%err, %stem, "failed to write divergence artifacts");
            }
        }
        Ok(BatchVerdict::Reported { stem })
    }

    // ---- queries ---------------------------------------------------------

    /// Whether the last closed batch contributed any new exit/coarse/fine
    /// signature hash.
    pub fn is_interesting_batch(&self) -> bool {
        self.interesting
    }

    pub fn batch(&self) -> &BatchResult {
        &self.batch
    }

    pub fn cumulative(&self) -> &CumulativeResults {
        &self.cumulative
    }

    /// Edge records collected for the given target in the current batch.
    pub fn edge_hits(&self, target: usize) -> Option<&[EdgeHit]> {
        self.batch.edges.get(target).map(Vec::as_slice)
    }

    /// `(|coarse hashes|, |fine hashes|)` cumulative set sizes.
    pub fn novelty_counts(&self) -> (usize, usize) {
        (
            self.cumulative.coarse_hashes.len(),
            self.cumulative.fine_hashes.len(),
        )
    }
}
