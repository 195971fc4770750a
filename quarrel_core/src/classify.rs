//! Structural triage of inter-parser divergences.
//!
//! When at least one target accepts an input but the outputs disagree, the
//! classifier checks the input and the accepting outputs against a fixed,
//! prioritized rule set. A match means the divergence has a known
//! structural explanation and is suppressed; only unclassified divergences
//! reach the reporter. Every predicate works on raw bytes; nothing here
//! assumes valid UTF-8.

use std::fmt;

use once_cell::sync::Lazy;
use regex::bytes::Regex;

/// Full-input JSON-number shape, modulo surrounding ASCII whitespace.
static JSON_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[[:space:]]*-?(0|[1-9]?[0-9]+)(\.(0*[0-9]+))?([eE][+-]?[0-9]+)?[[:space:]]*$",
    )
    .expect("JSON number pattern compiles")
});

/// Known structural explanation for an output disagreement.
///
/// Variants are listed in evaluation order; the first matching rule wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceClass {
    NumberOnly,
    StringOnly,
    AddsComma,
    ContainsUnicodeEscape,
    AddsQuotes,
    RemovesComma,
    TrailingGarbage,
}

impl DivergenceClass {
    pub fn label(self) -> &'static str {
        match self {
            DivergenceClass::NumberOnly => "number-only",
            DivergenceClass::StringOnly => "string-only",
            DivergenceClass::AddsComma => "adds-comma",
            DivergenceClass::ContainsUnicodeEscape => "contains-unicode-escape",
            DivergenceClass::AddsQuotes => "adds-quotes",
            DivergenceClass::RemovesComma => "removes-comma",
            DivergenceClass::TrailingGarbage => "trailing-garbage",
        }
    }
}

impl fmt::Display for DivergenceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The whitespace bytes stripped before output-set comparisons.
const STRIPPED_WHITESPACE: [u8; 4] = [0x09, 0x0a, 0x0d, 0x20];

fn is_stripped_whitespace(byte: u8) -> bool {
    STRIPPED_WHITESPACE.contains(&byte)
}

/// Remove ASCII whitespace (tab, LF, CR, space) from `bytes`.
///
/// Used only to decide whether two outputs count as distinct; reported
/// artifacts always carry the raw bytes.
pub fn strip_ascii_whitespace(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .copied()
        .filter(|&b| !is_stripped_whitespace(b))
        .collect()
}

fn count_byte(haystack: &[u8], needle: u8) -> usize {
    haystack.iter().filter(|&&b| b == needle).count()
}

fn is_number_only(input: &[u8]) -> bool {
    JSON_NUMBER.is_match(input)
}

/// Input of the shape `…"X` with a second quote closing it: at least two
/// quote bytes, the first of which sits at the penultimate position.
fn is_string_only(input: &[u8]) -> bool {
    if input.len() < 2 {
        return false;
    }
    if count_byte(input, b'"') < 2 {
        return false;
    }
    match input.iter().position(|&b| b == b'"') {
        Some(first) => first + 2 == input.len(),
        None => false,
    }
}

fn adds_comma(input: &[u8], outputs: &[&[u8]]) -> bool {
    let commas = count_byte(input, b',');
    outputs.iter().any(|out| count_byte(out, b',') > commas)
}

fn contains_unicode_escape(input: &[u8]) -> bool {
    input.windows(2).any(|pair| pair == b"\\u")
}

/// Historical label: fires when some output carries *fewer* quotes than
/// the input.
fn adds_quotes(input: &[u8], outputs: &[&[u8]]) -> bool {
    let quotes = count_byte(input, b'"');
    outputs.iter().any(|out| count_byte(out, b'"') < quotes)
}

fn removes_comma(input: &[u8], outputs: &[&[u8]]) -> bool {
    let commas = count_byte(input, b',');
    outputs.iter().any(|out| count_byte(out, b',') < commas)
}

/// Does some output read as a prefix of the whitespace-deleted input?
fn is_trailing_garbage(input: &[u8], outputs: &[&[u8]]) -> bool {
    outputs.iter().any(|output| {
        let bound = input.len().min(output.len());
        let mut j = 0;
        for &byte in &input[..bound] {
            if is_stripped_whitespace(byte) {
                continue;
            }
            if output.get(j) != Some(&byte) {
                return false;
            }
            j += 1;
        }
        true
    })
}

/// Evaluate the rule chain over `(input, accepting outputs)`; first match
/// wins. `None` means the divergence has no known explanation and should
/// be reported.
pub fn assign_class(input: &[u8], outputs: &[&[u8]]) -> Option<DivergenceClass> {
    if is_number_only(input) {
        return Some(DivergenceClass::NumberOnly);
    }
    if is_string_only(input) {
        return Some(DivergenceClass::StringOnly);
    }
    if adds_comma(input, outputs) {
        return Some(DivergenceClass::AddsComma);
    }
    if contains_unicode_escape(input) {
        return Some(DivergenceClass::ContainsUnicodeEscape);
    }
    if adds_quotes(input, outputs) {
        return Some(DivergenceClass::AddsQuotes);
    }
    if removes_comma(input, outputs) {
        return Some(DivergenceClass::RemovesComma);
    }
    if is_trailing_garbage(input, outputs) {
        return Some(DivergenceClass::TrailingGarbage);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_ascii_whitespace_removes_only_the_four_bytes() {
        assert_eq!(strip_ascii_whitespace(b" a\tb\nc\rd "), b"abcd");
        // Vertical tab and form feed are not in the stripped set.
        assert_eq!(strip_ascii_whitespace(b"a\x0bb\x0cc"), b"a\x0bb\x0cc");
    }

    #[test]
    fn number_only_matches_number_grammar() {
        for input in [
            b"0".as_slice(),
            b"-17",
            b"  42  ",
            b"3.14",
            b"1e10",
            b"-2.5E-3",
            b"\t10\n",
        ] {
            assert_eq!(
                assign_class(input, &[]),
                Some(DivergenceClass::NumberOnly),
                "{:?}",
                input
            );
        }
    }

    #[test]
    fn number_only_rejects_trailing_garbage_input() {
        // Scenario: "123 xyz" is not number-only; the prefix rule picks
        // it up instead when an output matches.
        let input = b"123 xyz";
        let outputs: [&[u8]; 2] = [b"123", b"123xyz"];
        assert_eq!(
            assign_class(input, &outputs),
            Some(DivergenceClass::TrailingGarbage)
        );
    }

    #[test]
    fn string_only_requires_first_quote_at_penultimate_byte() {
        assert_eq!(assign_class(b"x\"\"", &[]), Some(DivergenceClass::StringOnly));
        // First quote too early.
        assert_eq!(assign_class(b"\"ab\"", &[]), None);
        // Only one quote byte.
        let one_quote: &[u8] = b"ab\"x";
        assert_ne!(
            assign_class(one_quote, &[]),
            Some(DivergenceClass::StringOnly)
        );
        // Too short.
        assert_ne!(assign_class(b"\"", &[]), Some(DivergenceClass::StringOnly));
    }

    #[test]
    fn adds_comma_fires_when_output_gains_commas() {
        let outputs: [&[u8]; 2] = [b"[1,2]", b"[1 2]"];
        assert_eq!(
            assign_class(b"[1 2]", &outputs),
            Some(DivergenceClass::AddsComma)
        );
    }

    #[test]
    fn unicode_escape_fires_anywhere_in_input() {
        let outputs: [&[u8]; 1] = [b"A"];
        assert_eq!(
            assign_class(b"\"\\u0041\"", &outputs),
            Some(DivergenceClass::ContainsUnicodeEscape)
        );
        assert_eq!(
            assign_class(b"{\"k\": \"\\u00e9\"}", &outputs),
            Some(DivergenceClass::ContainsUnicodeEscape)
        );
        // Backslash not followed by 'u' does not fire.
        assert_eq!(assign_class(b"\"a\\n b\" x", &[]), None);
    }

    #[test]
    fn quote_and_comma_loss_rules() {
        let fewer_quotes: [&[u8]; 1] = [b"abc"];
        assert_eq!(
            assign_class(b"{\"a\":1} junk", &fewer_quotes),
            Some(DivergenceClass::AddsQuotes)
        );
        let fewer_commas: [&[u8]; 1] = [b"[1 2] x"];
        assert_eq!(
            assign_class(b"[1,2] x", &fewer_commas),
            Some(DivergenceClass::RemovesComma)
        );
    }

    #[test]
    fn trailing_garbage_matches_whitespace_skipping_prefix() {
        let outputs: [&[u8]; 1] = [b"123"];
        assert!(is_trailing_garbage(b"1 2 3 xyz", &outputs));
        let mismatched: [&[u8]; 1] = [b"13x"];
        assert!(!is_trailing_garbage(b"1 2 3 xyz", &mismatched));
    }

    #[test]
    fn rule_order_prefers_number_only() {
        // Outputs that would match adds-comma are irrelevant: rule 1 wins.
        let outputs: [&[u8]; 1] = [b"4,2"];
        assert_eq!(
            assign_class(b"42", &outputs),
            Some(DivergenceClass::NumberOnly)
        );
    }

    #[test]
    fn unclassified_divergence_returns_none() {
        let outputs: [&[u8]; 2] = [b"{\"a\":1}", b"{\"A\":1}"];
        assert_eq!(assign_class(b"{\"a\":1}", &outputs), None);
    }
}
