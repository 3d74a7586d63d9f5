//! ID coercion for values that arrive as text (CLI arguments, query
//! strings, JSON written by older clients) but must be positive integers
//! when they reach the backend.

use crate::error::IdError;

/// Parse a positive integer id.
///
/// Leading and trailing whitespace is ignored, and so is anything after the
/// leading run of digits (`"12abc"` is `12`).  Zero, negatives and inputs
/// without leading digits are rejected.
pub fn parse_id(input: &str, context: &str) -> Result<i64, IdError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(IdError::Missing {
            context: context.to_string(),
        });
    }

    let (sign, rest) = match trimmed.as_bytes()[0] {
        b'-' => (-1i64, &trimmed[1..]),
        b'+' => (1, &trimmed[1..]),
        _ => (1, trimmed),
    };

    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let digits = &rest[..digits_end];

    let value = digits
        .parse::<i64>()
        .map_err(|_| IdError::NotNumeric {
            context: context.to_string(),
            value: input.to_string(),
        })?
        * sign;

    if value <= 0 {
        return Err(IdError::NotPositive {
            context: context.to_string(),
            value,
        });
    }
    Ok(value)
}

/// Parse every id, reporting the failing index in the error context.
pub fn parse_ids<S: AsRef<str>>(inputs: &[S], context: &str) -> Result<Vec<i64>, IdError> {
    inputs
        .iter()
        .enumerate()
        .map(|(i, s)| parse_id(s.as_ref(), &format!("{context}[{i}]")))
        .collect()
}

/// Compare two ids regardless of whether they were carried as text or as
/// numbers.  Empty values never match.
pub fn same_id(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    !a.is_empty() && a == b
}

pub fn is_valid_id(input: &str) -> bool {
    parse_id(input, "id").is_ok()
}
