//! Cycle header parsing.
//!
//! Each cycle block in the plate-reader export starts with a header such as
//! `Cycle 3 (1 h 2 min 3 s)`. Any of the hour/minute/second parts may be
//! omitted, but those present appear in that order.

use crate::error::FitError;

/// A parsed cycle header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTime {
    pub cycle: u32,
    pub seconds: u64,
}

/// Parse a cycle header into its cycle number and elapsed seconds.
pub fn parse_cycle_time(text: &str) -> Result<CycleTime, FitError> {
    parse_inner(text.trim()).ok_or_else(|| {
        FitError::AssayMalformed(format!("unrecognised cycle header `{text}`"))
    })
}

/// Convenience wrapper returning only the elapsed seconds.
pub fn cycle_seconds(text: &str) -> Result<u64, FitError> {
    parse_cycle_time(text).map(|c| c.seconds)
}

fn parse_inner(text: &str) -> Option<CycleTime> {
    let rest = text.strip_prefix("Cycle")?;
    let rest = rest.trim_start();
    let open = rest.find('(')?;
    let cycle: u32 = rest[..open].trim().parse().ok()?;
    let inner = rest[open + 1..].strip_suffix(')')?;

    let tokens: Vec<&str> = inner.split_whitespace().collect();
    if tokens.is_empty() || tokens.len() % 2 != 0 {
        return None;
    }

    // Units must appear in strictly decreasing magnitude.
    let mut last_rank = 0usize;
    let mut seconds = 0u64;
    for pair in tokens.chunks(2) {
        let value: u64 = pair[0].parse().ok()?;
        let (rank, scale) = match pair[1] {
            "h" => (1, 3600),
            "min" => (2, 60),
            "s" => (3, 1),
            _ => return None,
        };
        if rank <= last_rank {
            return None;
        }
        last_rank = rank;
        seconds = seconds.checked_add(value.checked_mul(scale)?)?;
    }

    Some(CycleTime { cycle, seconds })
}
