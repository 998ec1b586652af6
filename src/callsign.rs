//! Callsign lexical rule, 16-byte wire form, and free-text extraction.
//!
//! A callsign is a 3-8 character alphanumeric base, optionally followed by
//! `-` and a decimal SSID in 0-15. A leading `*` marks an alias on some
//! BBS listings and is stripped on ingest. Callsigns are upper-cased on
//! ingest and compared case-sensitively afterwards.

use crate::error::{AirwalkError, Result};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Size of the persisted callsign field. NUL-terminated, so the longest
/// visible form is 15 bytes.
pub const CALLSIGN_FIELD: usize = 16;

const BASE_MIN: usize = 3;
const BASE_MAX: usize = 8;
const SSID_MAX: u8 = 15;

/// Candidate tokens inside a free-form BBS reply line. The SSID group
/// deliberately admits two digits; out-of-range values are dropped at
/// validation so that `W1ABC-16` does not degrade into `W1ABC`.
static CANDIDATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*?\b([A-Za-z0-9]{3,8})(-[0-9]{1,2})?\b").expect("invalid candidate regex")
});

/// A canonicalized callsign: upper-case base, optional `-SSID` suffix,
/// alias star already stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Callsign(String);

impl Callsign {
    /// Parse and canonicalize an input callsign.
    ///
    /// Accepts an optional leading `*` alias marker. Fails with
    /// `InvalidCallsign` on bad length, bad characters, or SSID > 15.
    pub fn parse(input: &str) -> Result<Self> {
        let bare = input.strip_prefix('*').unwrap_or(input);

        let (base, ssid) = match bare.split_once('-') {
            Some((base, ssid)) => (base, Some(ssid)),
            None => (bare, None),
        };

        if base.len() < BASE_MIN || base.len() > BASE_MAX {
            return Err(AirwalkError::InvalidCallsign(
                input.to_string(),
                "base must be 3-8 characters",
            ));
        }
        if !base.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AirwalkError::InvalidCallsign(
                input.to_string(),
                "base must be alphanumeric ASCII",
            ));
        }

        let canonical = match ssid {
            Some(digits) => {
                if digits.is_empty() || digits.len() > 2 || !digits.bytes().all(|b| b.is_ascii_digit())
                {
                    return Err(AirwalkError::InvalidCallsign(
                        input.to_string(),
                        "SSID must be 1-2 decimal digits",
                    ));
                }
                let n: u8 = digits
                    .parse()
                    .map_err(|_| AirwalkError::InvalidCallsign(input.to_string(), "bad SSID"))?;
                if n > SSID_MAX {
                    return Err(AirwalkError::InvalidCallsign(
                        input.to_string(),
                        "SSID must be 0-15",
                    ));
                }
                format!("{}-{}", base.to_ascii_uppercase(), n)
            }
            None => base.to_ascii_uppercase(),
        };

        debug_assert!(canonical.len() < CALLSIGN_FIELD);
        Ok(Callsign(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Base portion without the SSID suffix.
    pub fn base(&self) -> &str {
        match self.0.split_once('-') {
            Some((base, _)) => base,
            None => &self.0,
        }
    }

    pub fn ssid(&self) -> Option<u8> {
        self.0
            .split_once('-')
            .map(|(_, ssid)| ssid.parse().expect("canonical SSID"))
    }

    /// Encode into the fixed persisted field, NUL-terminated.
    pub fn to_field(&self) -> [u8; CALLSIGN_FIELD] {
        let mut field = [0u8; CALLSIGN_FIELD];
        field[..self.0.len()].copy_from_slice(self.0.as_bytes());
        field
    }

    /// Decode a persisted field. Only termination is checked here; the
    /// lexical rule was enforced before the callsign was ever written, so
    /// an unterminated field is file corruption, not bad input.
    pub fn from_field(field: &[u8; CALLSIGN_FIELD]) -> Result<Self> {
        let nul = field
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| AirwalkError::corrupt("unterminated callsign"))?;
        if nul == 0 {
            return Err(AirwalkError::corrupt("empty callsign field"));
        }
        let text = std::str::from_utf8(&field[..nul])
            .map_err(|_| AirwalkError::corrupt("callsign field is not ASCII"))?;
        Ok(Callsign(text.to_string()))
    }
}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scan a reply line for callsign-shaped tokens.
///
/// Returns canonical candidate strings in order of appearance, alias stars
/// stripped and bases upper-cased. A token touching a `/` is dropped; it is
/// almost certainly a date. Candidates are not validated here; `VIA`
/// keywords and over-range SSIDs are still the caller's to judge.
pub fn scan_candidates(line: &str) -> Vec<String> {
    let bytes = line.as_bytes();
    let mut out = Vec::new();

    for m in CANDIDATE_REGEX.find_iter(line) {
        let before = m.start().checked_sub(1).map(|i| bytes[i]);
        let after = bytes.get(m.end()).copied();
        if before == Some(b'/') || after == Some(b'/') {
            continue;
        }

        let token = m.as_str().strip_prefix('*').unwrap_or(m.as_str());
        out.push(token.to_ascii_uppercase());
    }
    out
}
