//! Analyse de l'en-tête HTTP `Range` (une seule plage d'octets).

use std::fmt;

/// Plage d'octets inclusive `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Valeur de l'en-tête `Content-Range`
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    /// En-tête illisible (400)
    Malformed,
    /// Plage hors de la ressource (416)
    Unsatisfiable,
}

impl fmt::Display for RangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeError::Malformed => write!(f, "malformed Range header"),
            RangeError::Unsatisfiable => write!(f, "range not satisfiable"),
        }
    }
}

impl std::error::Error for RangeError {}

/// Analyse `bytes=start-end`, `bytes=start-` ou `bytes=-suffix`
///
/// La fin est ramenée à `total - 1`. Seule la première plage d'une liste est
/// prise en compte.
pub fn parse_range(header: &str, total: u64) -> Result<ByteRange, RangeError> {
    let spec = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or(RangeError::Malformed)?;
    let first = spec.split(',').next().unwrap_or("").trim();
    let (start, end) = first.split_once('-').ok_or(RangeError::Malformed)?;
    let (start, end) = (start.trim(), end.trim());

    let parse = |s: &str| s.parse::<u64>().map_err(|_| RangeError::Malformed);

    if start.is_empty() {
        let suffix = parse(end)?;
        if suffix == 0 || total == 0 {
            return Err(RangeError::Unsatisfiable);
        }
        return Ok(ByteRange {
            start: total.saturating_sub(suffix),
            end: total - 1,
        });
    }

    let start = parse(start)?;
    let end = if end.is_empty() {
        total.saturating_sub(1)
    } else {
        parse(end)?.min(total.saturating_sub(1))
    };

    if total == 0 || start >= total || start > end {
        return Err(RangeError::Unsatisfiable);
    }
    Ok(ByteRange { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_range_is_clamped_to_total() {
        assert_eq!(parse_range("bytes=0-99", 1000), Ok(ByteRange { start: 0, end: 99 }));
        assert_eq!(
            parse_range("bytes=900-5000", 1000),
            Ok(ByteRange { start: 900, end: 999 })
        );
    }

    #[test]
    fn open_and_suffix_ranges() {
        assert_eq!(parse_range("bytes=500-", 1000), Ok(ByteRange { start: 500, end: 999 }));
        assert_eq!(parse_range("bytes=-100", 1000), Ok(ByteRange { start: 900, end: 999 }));
        assert_eq!(parse_range("bytes=-5000", 1000), Ok(ByteRange { start: 0, end: 999 }));
        assert_eq!(parse_range("bytes=-0", 1000), Err(RangeError::Unsatisfiable));
    }

    #[test]
    fn unsatisfiable_and_malformed() {
        assert_eq!(parse_range("bytes=1000-", 1000), Err(RangeError::Unsatisfiable));
        assert_eq!(parse_range("bytes=50-10", 1000), Err(RangeError::Unsatisfiable));
        assert_eq!(parse_range("bytes=0-", 0), Err(RangeError::Unsatisfiable));
        assert_eq!(parse_range("items=0-1", 1000), Err(RangeError::Malformed));
        assert_eq!(parse_range("bytes=a-b", 1000), Err(RangeError::Malformed));
        assert_eq!(parse_range("bytes=12", 1000), Err(RangeError::Malformed));
    }

    #[test]
    fn first_of_multiple_ranges_wins() {
        let range = parse_range("bytes=0-9, 20-29", 100).unwrap();
        assert_eq!(range.len(), 10);
        assert_eq!(range.content_range(100), "bytes 0-9/100");
    }
}
