//! Integer-only conversions between micro-units and decimal amounts.
//!
//! No `f64` anywhere: prices are quoted, compared and stored as `u64`
//! micro-units and only rendered as decimals at the edge.

use crate::error::ProtocolError;
use crate::network::ASSET_DECIMALS;

/// Micro-units in one whole token.
pub const MICRO_UNITS_PER_TOKEN: u64 = 10u64.pow(ASSET_DECIMALS);

/// Render micro-units as a decimal string with trailing zeros trimmed.
/// e.g. 1_500_000 -> "1.5", 1_000_000 -> "1", 1 -> "0.000001"
pub fn format_micro_units(micro_units: u64) -> String {
    let whole = micro_units / MICRO_UNITS_PER_TOKEN;
    let fraction = micro_units % MICRO_UNITS_PER_TOKEN;
    if fraction == 0 {
        return whole.to_string();
    }
    let raw = format!(
        "{}.{:0width$}",
        whole,
        fraction,
        width = ASSET_DECIMALS as usize
    );
    raw.trim_end_matches('0').to_string()
}

/// Parse a decimal amount ("1.5", "$0.01", "3") into micro-units.
///
/// A leading `$` is tolerated. Fractional digits beyond the asset's
/// precision are only accepted when they are zeros.
pub fn parse_decimal_amount(amount: &str) -> Result<u64, ProtocolError> {
    let cleaned = amount.trim().trim_start_matches('$');
    if cleaned.is_empty() {
        return Err(ProtocolError::InvalidAmount(format!(
            "'{amount}': no numeric content"
        )));
    }
    if !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(ProtocolError::InvalidAmount(format!(
            "'{amount}': unexpected characters"
        )));
    }

    let (integer_part, fractional_part) = cleaned.split_once('.').unwrap_or((cleaned, ""));
    if fractional_part.contains('.') {
        return Err(ProtocolError::InvalidAmount(format!(
            "'{amount}': more than one decimal point"
        )));
    }

    let decimals = ASSET_DECIMALS as usize;
    let (kept, excess) = if fractional_part.len() > decimals {
        fractional_part.split_at(decimals)
    } else {
        (fractional_part, "")
    };
    if excess.chars().any(|c| c != '0') {
        return Err(ProtocolError::InvalidAmount(format!(
            "'{amount}': more than {decimals} decimal places"
        )));
    }

    let whole: u64 = if integer_part.is_empty() {
        0
    } else {
        integer_part
            .parse()
            .map_err(|e| ProtocolError::InvalidAmount(format!("'{amount}': {e}")))?
    };
    let fraction: u64 = if kept.is_empty() {
        0
    } else {
        let digits: u64 = kept
            .parse()
            .map_err(|e| ProtocolError::InvalidAmount(format!("'{amount}': {e}")))?;
        digits * 10u64.pow((decimals - kept.len()) as u32)
    };

    whole
        .checked_mul(MICRO_UNITS_PER_TOKEN)
        .and_then(|w| w.checked_add(fraction))
        .ok_or_else(|| ProtocolError::InvalidAmount(format!("'{amount}': overflow")))
}
