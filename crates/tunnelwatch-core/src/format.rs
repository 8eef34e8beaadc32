// ── Human-readable durations ──

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Compact elapsed time for session rows: `42s`, `17m`, `3h 5m`, `2d 4h`.
///
/// Only the two most significant units are shown and a zero second unit
/// is dropped (`3h`, `2d`).
pub fn format_elapsed(secs: u64) -> String {
    if secs < MINUTE {
        return format!("{secs}s");
    }
    if secs < HOUR {
        return format!("{}m", secs / MINUTE);
    }
    if secs < DAY {
        let (hours, minutes) = (secs / HOUR, (secs % HOUR) / MINUTE);
        return if minutes == 0 {
            format!("{hours}h")
        } else {
            format!("{hours}h {minutes}m")
        };
    }
    let (days, hours) = (secs / DAY, (secs % DAY) / HOUR);
    if hours == 0 {
        format!("{days}d")
    } else {
        format!("{days}d {hours}h")
    }
}

/// Elapsed text between two Unix timestamps; clock skew reads as `0s`.
pub fn format_since(start: i64, now: i64) -> String {
    format_elapsed(u64::try_from(now.saturating_sub(start)).unwrap_or(0))
}
