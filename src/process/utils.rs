/// Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> &str {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim()
    } else {
        trimmed
    }
}

/// Parse a cleaned field as a finite number.
pub fn parse_number(raw: &str) -> Option<f64> {
    let s = clean_str(raw);
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a cleaned field as an integer. Integral float text (`"202504.0"`) is accepted.
///
/// Values outside the `i64` range are rejected rather than saturated.
pub fn parse_integer(raw: &str) -> Option<i64> {
    let s = clean_str(raw);
    if let Ok(v) = s.parse::<i64>() {
        return Some(v);
    }
    let f = parse_number(s)?;
    // `i64::MAX as f64` rounds up to 2^63, which is already out of range.
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}
