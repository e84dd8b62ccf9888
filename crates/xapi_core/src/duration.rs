//! crates/xapi_core/src/duration.rs
//!
//! Converts elapsed milliseconds into an ISO8601 duration string.

/// Converts milliseconds to an ISO8601 duration.
///
/// The input is rounded to the nearest 0.01 seconds. Zero-valued hour and
/// minute components are omitted; the seconds component is always emitted,
/// carrying the sub-second remainder as a decimal. Negative durations are
/// signed ahead of the `PT` designator.
pub fn encode_iso8601_duration(input_milliseconds: i64) -> String {
    // Round to nearest 0.01 seconds.
    let mut centiseconds = ((input_milliseconds as f64) / 10.0).round() as i64;
    let mut out = String::new();

    if centiseconds < 0 {
        out.push('-');
        centiseconds = -centiseconds;
    }

    out.push_str("PT");

    let hours = centiseconds / 360_000;
    let minutes = (centiseconds % 360_000) / 6_000;
    let second_centis = centiseconds % 6_000;

    if hours > 0 {
        out.push_str(&format!("{hours}H"));
    }

    if minutes > 0 {
        out.push_str(&format!("{minutes}M"));
    }

    let whole = second_centis / 100;
    let fraction = second_centis % 100;

    if fraction == 0 {
        out.push_str(&format!("{whole}S"));
    } else if fraction % 10 == 0 {
        out.push_str(&format!("{whole}.{}S", fraction / 10));
    } else {
        out.push_str(&format!("{whole}.{fraction:02}S"));
    }

    out
}
