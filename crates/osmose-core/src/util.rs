//! Formatting helpers shared by the reconciler and the history pipeline.

/// Format a number of seconds as minutes and zero-padded seconds.
///
/// # Example
///
/// ```
/// use osmose_core::util::format_mmss;
///
/// assert_eq!(format_mmss(245), "4m05s");
/// assert_eq!(format_mmss(3725), "62m05s");
/// ```
pub fn format_mmss(secs: u64) -> String {
    format!("{}m{:02}s", secs / 60, secs % 60)
}

/// Like [`format_mmss`], for fractional or negative device values.
///
/// Negative and non-finite inputs are shown as zero.
pub fn format_mmss_f64(secs: f64) -> String {
    let secs = if secs.is_finite() { secs.round().max(0.0) } else { 0.0 };
    format_mmss(secs as u64)
}

/// Format an optional value, or `-` when it was never received.
pub(crate) fn or_dash<T>(value: Option<T>, format: impl FnOnce(T) -> String) -> String {
    value.map(format).unwrap_or_else(|| "-".to_string())
}
