//! Numeric helpers shared by the monitors and the auto-QC evaluator.

/// Computes `numerator / denominator * 100` rounded *down* to the nearest
/// whole percent, without touching any process-wide rounding state.
///
/// A zero denominator reports 100 — the worst case — rather than failing,
/// because a sample with no reads at all must never mask contamination.
///
/// ```
/// use runqc::utils::num::percent_rounded_down;
///
/// assert_eq!(percent_rounded_down(11, 574), 1);
/// assert_eq!(percent_rounded_down(0, 574), 0);
/// assert_eq!(percent_rounded_down(11, 0), 100);
/// ```
pub fn percent_rounded_down(numerator: u64, denominator: u64) -> u64 {
    if denominator == 0 {
        return 100;
    }

    numerator * 100 / denominator
}

/// Parses a metric value that may be absent or a raw string into an `f64`.
/// `None` or an unparsable string both come back as `None` so the caller can
/// decide whether that is a failure.
pub fn metric_as_f64(value: Option<&String>) -> Option<f64> {
    value.and_then(|v| v.trim().parse::<f64>().ok())
}

/// Parses a metric value into a `u64`, accepting values Dragen writes with a
/// trailing decimal part (e.g. `123456.00`).
pub fn metric_as_u64(value: Option<&String>) -> Option<u64> {
    let v = value?.trim();

    if let Ok(n) = v.parse::<u64>() {
        return Some(n);
    }

    v.parse::<f64>().ok().and_then(|f| {
        if f.is_finite() && f >= 0.0 {
            Some(f as u64)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    pub fn test_percent_rounded_down() {
        assert_eq!(percent_rounded_down(11, 574), 1);
        assert_eq!(percent_rounded_down(573, 574), 99);
        assert_eq!(percent_rounded_down(574, 574), 100);
        assert_eq!(percent_rounded_down(1, 3), 33);
    }

    #[test]
    pub fn test_percent_rounded_down_zero_denominator_is_worst_case() {
        assert_eq!(percent_rounded_down(0, 0), 100);
        assert_eq!(percent_rounded_down(9_999, 0), 100);
    }

    #[test]
    pub fn test_metric_parsing() {
        let raw = String::from("123456.00");
        assert_eq!(metric_as_u64(Some(&raw)), Some(123_456));

        let raw = String::from("0.95");
        assert_eq!(metric_as_f64(Some(&raw)), Some(0.95));

        assert_eq!(metric_as_f64(None), None);
        let raw = String::from("n/a");
        assert_eq!(metric_as_f64(Some(&raw)), None);
    }
}
