//! Exact identifier parsing and repair
//!
//! Platform identifiers are 64-bit integers with 18-19 decimal digits,
//! which is more precision than an f64 mantissa carries. Any stage that
//! round-trips an identifier through floating point (spreadsheet exports,
//! permissive CSV loaders) silently truncates the trailing digits and
//! renders the value in scientific notation. This module is the single
//! place that turns textual identifiers back into exact integers, and it
//! rejects lossy renderings instead of accepting a truncated value.
//!
//! # Policy
//! Identifiers travel end-to-end as exact integers or decimal strings.
//! A scientific-notation rendering is unrecoverable from the text alone;
//! [`repair_corrupted_id`] can restore it only against a catalog of known
//! valid identifiers, and only when the match is unambiguous.

use crate::error::Error;

/// Largest integer magnitude an f64 represents exactly (2^53)
const F64_EXACT_MAX: u64 = 1 << 53;

/// Parse a textual identifier into its exact integer value.
///
/// Accepted forms:
/// - plain decimal digits (`"1392210566407524382"`)
/// - decimal digits with a trailing `.0` from a spreadsheet round-trip,
///   but only when the value is small enough that the float rendering is
///   known to be exact (below 2^53)
///
/// Rejected with [`Error::IdentifierCorrupted`]:
/// - scientific notation (`"1.3922105664075244e+18"`) — the trailing
///   digits are gone and must not be guessed
/// - a `.0` suffix on a value too large for exact f64 representation
/// - anything non-numeric
pub fn parse_exact_id(raw: &str) -> Result<u64, Error> {
    let s = raw.trim();

    if s.is_empty() {
        return Err(Error::IdentifierCorrupted("empty identifier".to_string()));
    }

    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s
            .parse::<u64>()
            .map_err(|_| Error::IdentifierCorrupted(format!("identifier out of range: {s}")));
    }

    // Spreadsheet round-trip suffix. Only trustworthy when the whole value
    // fits an f64 mantissa; an 18-digit id with ".0" already lost digits.
    if let Some(digits) = s.strip_suffix(".0") {
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            let value = digits
                .parse::<u64>()
                .map_err(|_| Error::IdentifierCorrupted(format!("identifier out of range: {s}")))?;
            if value <= F64_EXACT_MAX {
                return Ok(value);
            }
            return Err(Error::IdentifierCorrupted(format!(
                "float-rendered identifier exceeds exact range: {s}"
            )));
        }
    }

    Err(Error::IdentifierCorrupted(format!(
        "not an exact integer rendering: {s}"
    )))
}

/// Attempt to repair a float-corrupted identifier against a catalog of
/// known valid identifiers.
///
/// A corrupted rendering is the round-to-nearest f64 of the true value, so
/// the true value must round to exactly the same f64. The repair succeeds
/// only when exactly one candidate does; an ambiguous rendering (several
/// candidates within one ulp of each other) stays corrupted. Two distinct
/// identifiers therefore never repair to the same value.
pub fn repair_corrupted_id<I>(raw: &str, candidates: I) -> Option<u64>
where
    I: IntoIterator<Item = u64>,
{
    let s = raw.trim();

    // Only float renderings are repairable; reject plain digit strings so
    // a typo'd exact id is never "repaired" into a different one.
    if !s.contains(['e', 'E', '.']) {
        return None;
    }

    let rendered: f64 = s.parse().ok()?;
    if !rendered.is_finite() || rendered < 0.0 {
        return None;
    }

    let mut matched = None;
    for candidate in candidates {
        if candidate as f64 == rendered {
            if matched.is_some() {
                // Ambiguous: more than one valid id rounds to this rendering.
                return None;
            }
            matched = Some(candidate);
        }
    }
    matched
}
