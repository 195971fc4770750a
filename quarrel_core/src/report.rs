//! Artifact emission for unclassified divergences.
//!
//! Two files per reportable divergence under a fixed root: the raw input
//! under `diffs/`, and a rendered per-target summary under
//! `diffs-summary/`. The directories themselves are the host's to create;
//! a missing directory surfaces as an I/O error the caller logs and
//! swallows.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::hash;
use crate::registry::Target;

pub const DIFFS_DIR: &str = "diffs";
pub const SUMMARY_DIR: &str = "diffs-summary";

/// Signature material for one reportable divergence.
#[derive(Debug, Clone, Copy)]
pub struct DivergenceReport<'a> {
    pub input: &'a [u8],
    /// Number of distinct raw outputs across targets.
    pub distinct_outputs: usize,
    pub exit_hash: u32,
    pub coarse_hash: u32,
    pub fine_hash: u32,
}

impl DivergenceReport<'_> {
    /// Deterministic artifact stem:
    /// `diff-{k}-{hExit}-{hCoarse}-{hFine}-{sha1(input)}`.
    pub fn artifact_stem(&self) -> String {
        format!(
            "diff-{}-{}-{}-{}-{}",
            self.distinct_outputs,
            self.exit_hash,
            self.coarse_hash,
            self.fine_hash,
            hash::input_digest_hex(self.input)
        )
    }
}

/// Render output bytes for the summary: printable ASCII verbatim,
/// everything else as ` [<decimal>] `.
pub fn render_output(bytes: &[u8]) -> String {
    let mut rendered = String::with_capacity(bytes.len());
    for &byte in bytes {
        if (0x20..0x7f).contains(&byte) {
            rendered.push(byte as char);
        } else {
            let _ = write!(rendered, " [{byte}] ");
        }
    }
    rendered
}

/// Writes divergence artifacts under a fixed output root.
#[derive(Debug, Clone)]
pub struct Reporter {
    root: PathBuf,
}

impl Reporter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write the raw-input and summary artifacts; returns both paths.
    ///
    /// `targets`, `exit_codes` and `outputs` are parallel and rendered in
    /// registration order.
    pub fn write(
        &self,
        report: &DivergenceReport<'_>,
        targets: &[Target],
        exit_codes: &[i32],
        outputs: &[Vec<u8>],
    ) -> io::Result<(PathBuf, PathBuf)> {
        let stem = report.artifact_stem();
        let input_path = self.root.join(DIFFS_DIR).join(&stem);
        let summary_path = self.root.join(SUMMARY_DIR).join(format!("{stem}.txt"));

        let mut input_file = File::create(&input_path)?;
        input_file.write_all(report.input)?;

        let mut summary = File::create(&summary_path)?;
        summary.write_all(report.input)?;
        summary.write_all(b"\n")?;
        for (i, target) in targets.iter().enumerate() {
            let line = format!(
                "{} (Exit Code: {} - Size: {}): {}\n",
                target.identifier,
                exit_codes[i],
                outputs[i].len(),
                render_output(&outputs[i])
            );
            summary.write_all(line.as_bytes())?;
        }

        Ok((input_path, summary_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn target(id: &str) -> Target {
        Target {
            identifier: id.to_owned(),
            sections: Vec::new(),
        }
    }

    #[test]
    fn artifact_stem_embeds_hashes_and_digest() {
        let report = DivergenceReport {
            input: b"abc",
            distinct_outputs: 2,
            exit_hash: 1,
            coarse_hash: 22,
            fine_hash: 333,
        };
        assert_eq!(
            report.artifact_stem(),
            "diff-2-1-22-333-a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn render_output_escapes_non_printables() {
        assert_eq!(render_output(b"ok"), "ok");
        assert_eq!(render_output(b"a\nb"), "a [10] b");
        assert_eq!(render_output(&[0x00, 0x7f]), " [0]  [127] ");
    }

    #[test]
    fn write_emits_both_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(DIFFS_DIR)).unwrap();
        fs::create_dir(dir.path().join(SUMMARY_DIR)).unwrap();

        let reporter = Reporter::new(dir.path());
        let report = DivergenceReport {
            input: b"{\"a\":1}",
            distinct_outputs: 2,
            exit_hash: 10,
            coarse_hash: 20,
            fine_hash: 30,
        };
        let targets = vec![target("left"), target("right")];
        let exit_codes = vec![0, 0];
        let outputs = vec![b"{\"a\":1}".to_vec(), b"{\"A\":1}".to_vec()];

        let (input_path, summary_path) = reporter
            .write(&report, &targets, &exit_codes, &outputs)
            .unwrap();

        assert_eq!(fs::read(&input_path).unwrap(), b"{\"a\":1}");
        let summary = fs::read_to_string(&summary_path).unwrap();
        assert!(summary.starts_with("{\"a\":1}\n"));
        assert!(summary.contains("left (Exit Code: 0 - Size: 7): {\"a\":1}\n"));
        assert!(summary.contains("right (Exit Code: 0 - Size: 7): {\"A\":1}\n"));
        assert!(summary_path.extension().is_some_and(|e| e == "txt"));
    }

    #[test]
    fn write_fails_without_host_created_directories() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Reporter::new(dir.path());
        let report = DivergenceReport {
            input: b"x",
            distinct_outputs: 2,
            exit_hash: 0,
            coarse_hash: 0,
            fine_hash: 0,
        };
        let err = reporter.write(&report, &[], &[], &[]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
