//! Parser for compact human-readable durations such as `4h3m2s1ms`
//!
//! Terms are `<decimal><unit>` with no separators, optionally preceded by a
//! sign. Whole-number terms go straight to `humantime`; a fractional term
//! (`1.5s`, `.5h`) is split into its whole part and a fraction of one unit.
//! The bare string `0` is accepted as zero.

use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while parsing a duration string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,
    #[error("invalid duration {input:?}: {reason}")]
    Invalid { input: String, reason: String },
    #[error("invalid duration {0:?}: negative durations are not allowed")]
    Negative(String),
    #[error("invalid duration {0:?}: value out of range")]
    Overflow(String),
}

impl DurationError {
    fn invalid(input: &str, reason: impl Into<String>) -> Self {
        DurationError::Invalid {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    fn from_humantime(input: &str, err: humantime::DurationError) -> Self {
        match err {
            humantime::DurationError::NumberOverflow => DurationError::Overflow(input.to_string()),
            other => DurationError::invalid(input, other.to_string()),
        }
    }
}

/// Parse a duration string like `4h3m2s1ms` or `1.5s`
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    if input.is_empty() {
        return Err(DurationError::Empty);
    }

    let (negative, rest) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input.strip_prefix('+').unwrap_or(input)),
    };
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(DurationError::invalid(input, "expected a number"));
    }

    let mut total = Duration::ZERO;
    for term in split_terms(rest) {
        let value = parse_term(input, term)?;
        total = total
            .checked_add(value)
            .ok_or_else(|| DurationError::Overflow(input.to_string()))?;
    }

    if negative && !total.is_zero() {
        return Err(DurationError::Negative(input.to_string()));
    }
    Ok(total)
}

/// Split `4h3m2s` into `4h`, `3m`, `2s`
fn split_terms(s: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut start = 0;
    let mut prev_numeric = true;
    for (i, c) in s.char_indices() {
        let numeric = c.is_ascii_digit() || c == '.';
        if numeric && !prev_numeric {
            terms.push(&s[start..i]);
            start = i;
        }
        prev_numeric = numeric;
    }
    terms.push(&s[start..]);
    terms
}

fn parse_term(input: &str, term: &str) -> Result<Duration, DurationError> {
    let term = normalize_micros(term);
    let parse = |s: &str| {
        humantime::parse_duration(s).map_err(|e| DurationError::from_humantime(input, e))
    };

    let Some((whole, rest)) = term.split_once('.') else {
        return parse(&term);
    };

    let frac_len = rest.bytes().take_while(u8::is_ascii_digit).count();
    let (frac, unit) = rest.split_at(frac_len);
    if whole.is_empty() && frac.is_empty() {
        return Err(DurationError::invalid(input, "expected a number"));
    }
    let whole = if whole.is_empty() { "0" } else { whole };

    let base = parse(&format!("{}{}", whole, unit))?;
    let scale = parse(&format!("1{}", unit))?.as_nanos();

    // Digits beyond nanosecond precision are truncated
    let mut nanos: u128 = 0;
    let mut place = scale;
    for digit in frac.bytes() {
        place /= 10;
        if place == 0 {
            break;
        }
        nanos += u128::from(digit - b'0') * place;
    }

    let nanos = u64::try_from(nanos).map_err(|_| DurationError::Overflow(input.to_string()))?;
    base.checked_add(Duration::from_nanos(nanos))
        .ok_or_else(|| DurationError::Overflow(input.to_string()))
}

/// Spell the micro sign variants as `us`
fn normalize_micros(term: &str) -> Cow<'_, str> {
    if term.contains('µ') || term.contains('μ') {
        Cow::Owned(term.replace(['µ', 'μ'], "u"))
    } else {
        Cow::Borrowed(term)
    }
}
