//! Hand-instrumented demo parsers and the in-memory coverage tables
//! backing them.
//!
//! Real deployments get edge counters from compiler instrumentation; the
//! demo targets bump probe slots in their own counter module instead, so
//! the full pipeline can be exercised from a plain binary.

use quarrel_core::coverage::{CounterRegion, CoverageHost, ModuleView, PcTableEntry};

/// Probe slots per demo module.
pub const EDGES: usize = 16;

/// Heap-backed counter modules with synthetic PC tables.
#[derive(Debug, Default)]
pub struct DemoHost {
    counters: Vec<Vec<u8>>,
    regions: Vec<Vec<CounterRegion>>,
    pc_tables: Vec<Vec<PcTableEntry>>,
}

impl DemoHost {
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

    pub fn counters_mut(&mut self, module: usize) -> &mut [u8] {
        &mut self.counters[module]
    }

    pub fn clear_counters(&mut self) {
        for module in &mut self.counters {
            module.fill(0);
        }
    }
}

impl CoverageHost for DemoHost {
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

fn bump(probes: &mut [u8], slot: usize) {
    probes[slot] = probes[slot].saturating_add(1);
}

/// One parser under test: a name and an entry point that consumes the
/// input and bumps probe slots in its own counter module.
pub struct DemoTarget {
    pub name: &'static str,
    run: fn(&[u8], &mut [u8]) -> (i32, Vec<u8>),
}

impl DemoTarget {
    pub fn execute(&self, input: &[u8], probes: &mut [u8]) -> (i32, Vec<u8>) {
        (self.run)(input, probes)
    }
}

pub fn demo_targets() -> Vec<DemoTarget> {
    vec![
        DemoTarget {
            name: "serde-json",
            run: run_serde_json,
        },
        DemoTarget {
            name: "lax-scanner",
            run: run_lax_scanner,
        },
    ]
}

/// Strict reference target: parse with `serde_json`, reserialize compact.
fn run_serde_json(input: &[u8], probes: &mut [u8]) -> (i32, Vec<u8>) {
    bump(probes, 0);
    match serde_json::from_slice::<serde_json::Value>(input) {
        Ok(value) => {
            bump(probes, 1);
            let kind_slot = match &value {
                serde_json::Value::Null => 2,
                serde_json::Value::Bool(_) => 3,
                serde_json::Value::Number(_) => 4,
                serde_json::Value::String(_) => 5,
                serde_json::Value::Array(_) => 6,
                serde_json::Value::Object(_) => 7,
            };
            bump(probes, kind_slot);
            (0, value.to_string().into_bytes())
        }
        Err(_) => {
            bump(probes, 8);
            (1, Vec::new())
        }
    }
}

/// Permissive target: a minimal scanner that copies lexemes through
/// without decoding escapes or numbers, and ignores trailing bytes after
/// the first value.
fn run_lax_scanner(input: &[u8], probes: &mut [u8]) -> (i32, Vec<u8>) {
    bump(probes, 0);
    let mut scanner = Scanner { input, pos: 0 };
    scanner.skip_ws();
    match scanner.value(probes) {
        Ok(output) => {
            bump(probes, 1);
            (0, output)
        }
        Err(()) => {
            bump(probes, 15);
            (1, Vec::new())
        }
    }
}

struct Scanner<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Scanner<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(0x09 | 0x0a | 0x0d | 0x20)) {
            self.pos += 1;
        }
    }

    fn expect_literal(&mut self, literal: &[u8]) -> Result<(), ()> {
        if self.input[self.pos..].starts_with(literal) {
            self.pos += literal.len();
            Ok(())
        } else {
            Err(())
        }
    }

    fn value(&mut self, probes: &mut [u8]) -> Result<Vec<u8>, ()> {
        match self.peek() {
            Some(b'{') => {
                bump(probes, 2);
                self.object(probes)
            }
            Some(b'[') => {
                bump(probes, 3);
                self.array(probes)
            }
            Some(b'"') => {
                bump(probes, 4);
                self.string()
            }
            Some(b't') => {
                bump(probes, 5);
                self.expect_literal(b"true").map(|_| b"true".to_vec())
            }
            Some(b'f') => {
                bump(probes, 5);
                self.expect_literal(b"false").map(|_| b"false".to_vec())
            }
            Some(b'n') => {
                bump(probes, 6);
                self.expect_literal(b"null").map(|_| b"null".to_vec())
            }
            Some(b'-' | b'0'..=b'9') => {
                bump(probes, 7);
                self.number()
            }
            _ => Err(()),
        }
    }

    /// Copy a string lexeme verbatim, escapes included.
    fn string(&mut self) -> Result<Vec<u8>, ()> {
        let start = self.pos;
        self.pos += 1;
        loop {
            match self.peek() {
                Some(b'\\') => self.pos += 2,
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(self.input[start..self.pos].to_vec());
                }
                Some(_) => self.pos += 1,
                None => return Err(()),
            }
        }
    }

    /// Copy a number lexeme as written; no range or grammar checks.
    fn number(&mut self) -> Result<Vec<u8>, ()> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
        ) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(());
        }
        Ok(self.input[start..self.pos].to_vec())
    }

    fn object(&mut self, probes: &mut [u8]) -> Result<Vec<u8>, ()> {
        let mut out = vec![b'{'];
        self.pos += 1;
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            out.push(b'}');
            return Ok(out);
        }
        loop {
            self.skip_ws();
            if self.peek() != Some(b'"') {
                return Err(());
            }
            out.extend_from_slice(&self.string()?);
            self.skip_ws();
            if self.peek() != Some(b':') {
                return Err(());
            }
            self.pos += 1;
            out.push(b':');
            self.skip_ws();
            out.extend_from_slice(&self.value(probes)?);
            self.skip_ws();
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                    out.push(b',');
                }
                Some(b'}') => {
                    self.pos += 1;
                    out.push(b'}');
                    return Ok(out);
                }
                _ => return Err(()),
            }
        }
    }

    fn array(&mut self, probes: &mut [u8]) -> Result<Vec<u8>, ()> {
        let mut out = vec![b'['];
        self.pos += 1;
        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
            out.push(b']');
            return Ok(out);
        }
        loop {
            self.skip_ws();
            out.extend_from_slice(&self.value(probes)?);
            self.skip_ws();
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                    out.push(b',');
                }
                Some(b']') => {
                    self.pos += 1;
                    out.push(b']');
                    return Ok(out);
                }
                _ => return Err(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lax(input: &[u8]) -> (i32, Vec<u8>) {
        let mut probes = [0u8; EDGES];
        run_lax_scanner(input, &mut probes)
    }

    #[test]
    fn lax_scanner_accepts_trailing_garbage() {
        let (exit, output) = lax(b"123 xyz");
        assert_eq!(exit, 0);
        assert_eq!(output, b"123");
    }

    #[test]
    fn lax_scanner_copies_escapes_verbatim() {
        let (exit, output) = lax(b"\"\\u0041\"");
        assert_eq!(exit, 0);
        assert_eq!(output, b"\"\\u0041\"");
    }

    #[test]
    fn lax_scanner_reserializes_containers_compactly() {
        let (exit, output) = lax(b"{ \"a\" : [ 1 , true , null ] }");
        assert_eq!(exit, 0);
        assert_eq!(output, b"{\"a\":[1,true,null]}");
    }

    #[test]
    fn lax_scanner_rejects_unterminated_string() {
        let (exit, output) = lax(b"\"open");
        assert_eq!(exit, 1);
        assert!(output.is_empty());
    }

    #[test]
    fn serde_target_rejects_what_lax_accepts() {
        let mut probes = [0u8; EDGES];
        let (strict_exit, _) = run_serde_json(b"123 xyz", &mut probes);
        assert_eq!(strict_exit, 1);
        let (lax_exit, _) = lax(b"123 xyz");
        assert_eq!(lax_exit, 0);
    }

    #[test]
    fn probes_record_execution_paths() {
        let mut probes = [0u8; EDGES];
        run_serde_json(b"{\"a\":1}", &mut probes);
        assert_eq!(probes[0], 1);
        assert_eq!(probes[1], 1);
        assert_eq!(probes[7], 1, "object kind probe");

        let mut probes = [0u8; EDGES];
        run_serde_json(b"not json", &mut probes);
        assert_eq!(probes[8], 1, "parse-error probe");
    }
}
