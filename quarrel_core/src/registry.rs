//! Target registration: which slices of the host's coverage tables belong
//! to which parser under test.

use std::ops::Range;

use thiserror::Error;
use tracing::info;

use crate::coverage::CoverageHost;

/// Errors raised while closing a registration. All of them indicate the
/// host is misusing the protocol; callers are expected to treat them as
/// fatal rather than recover.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registration for '{id}' closed without a matching begin")]
    UnbalancedEnd { id: String },

    #[error("registration for '{id}' produced a zero-width section")]
    EmptySection { id: String },

    #[error(
        "section of '{id}' spans {modules} modules but {pctables} PC tables"
    )]
    WidthMismatch {
        id: String,
        modules: usize,
        pctables: usize,
    },

    #[error(
        "section of '{id}': module {module} has {edges} edges but PC table {pctable} has {pcs} entries"
    )]
    EdgeCountMismatch {
        id: String,
        module: usize,
        pctable: usize,
        edges: usize,
        pcs: usize,
    },
}

/// A contiguous slice into the host coverage tables contributed by one
/// registration: `modules` and `pctables` always have equal width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub modules: Range<usize>,
    pub pctables: Range<usize>,
}

impl Section {
    /// Aligned `(module, pctable)` index pairs, ascending.
    pub fn index_pairs(&self) -> impl Iterator<Item = (usize, usize)> {
        self.modules.clone().zip(self.pctables.clone())
    }
}

/// One parser under test. Identifiers are reported verbatim and are not
/// required to be unique.
#[derive(Debug, Clone)]
pub struct Target {
    pub identifier: String,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    modules: usize,
    pctables: usize,
}

/// Owns the target records and the open-registration snapshot.
///
/// Each `begin`/`end` pair yields exactly one [`Section`] and one
/// [`Target`] owning it, so the returned handle doubles as both the
/// section handle and the target index. Targets spanning several
/// non-contiguous sections are expressed at run time by naming multiple
/// section handles in one run.
#[derive(Debug, Default)]
pub struct Registry {
    targets: Vec<Target>,
    pending: Option<Snapshot>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the current table counts; the next [`end_registration`]
    /// closes the delta. A repeated begin simply re-captures.
    ///
    /// [`end_registration`]: Registry::end_registration
    pub fn begin_registration(&mut self, host: &dyn CoverageHost) {
        self.pending = Some(Snapshot {
            modules: host.num_modules(),
            pctables: host.num_pc_tables(),
        });
    }

    /// Close the open registration as a new target and return its index.
    pub fn end_registration(
        &mut self,
        host: &dyn CoverageHost,
        identifier: &str,
    ) -> Result<usize, RegistryError> {
        let snapshot = self.pending.take().ok_or_else(|| RegistryError::UnbalancedEnd {
            id: identifier.to_owned(),
        })?;

        let section = Section {
            modules: snapshot.modules..host.num_modules(),
            pctables: snapshot.pctables..host.num_pc_tables(),
        };

        if section.modules.is_empty() && section.pctables.is_empty() {
            return Err(RegistryError::EmptySection {
                id: identifier.to_owned(),
            });
        }
        if section.modules.len() != section.pctables.len() {
            return Err(RegistryError::WidthMismatch {
                id: identifier.to_owned(),
                modules: section.modules.len(),
                pctables: section.pctables.len(),
            });
        }

        let mut edges = 0usize;
        for (mi, pi) in section.index_pairs() {
            let module_edges = host.module(mi).edge_count();
            let pc_entries = host.pc_table(pi).len();
            if module_edges != pc_entries {
                return Err(RegistryError::EdgeCountMismatch {
                    id: identifier.to_owned(),
                    module: mi,
                    pctable: pi,
                    edges: module_edges,
                    pcs: pc_entries,
                });
            }
            edges += module_edges;
        }

        let index = self.targets.len();
        info!(target_index = index, id = identifier, edges, "registered target section");

        self.targets.push(Target {
            identifier: identifier.to_owned(),
            sections: vec![section],
        });
        Ok(index)
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn target(&self, index: usize) -> Option<&Target> {
        self.targets.get(index)
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Section handles coincide with target indices by construction.
    pub fn section(&self, handle: usize) -> Option<&Section> {
        self.targets.get(handle).and_then(|t| t.sections.first())
    }
}
