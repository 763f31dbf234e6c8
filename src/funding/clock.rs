//! Funding boundaries are UTC multiples of the cadence.

const HOUR_MS: i64 = 3_600_000;

fn cadence_ms(hours: u8) -> i64 {
    i64::from(hours.max(1)) * HOUR_MS
}

/// Latest boundary at or before `now_ms`.
pub fn last_boundary(now_ms: i64, hours: u8) -> i64 {
    let c = cadence_ms(hours);
    now_ms.div_euclid(c) * c
}

/// First boundary strictly after `now_ms`.
pub fn next_boundary(now_ms: i64, hours: u8) -> i64 {
    last_boundary(now_ms, hours) + cadence_ms(hours)
}

/// Whether a tick executing at `exec_ms` settles a symbol on this cadence.
pub fn is_due(exec_ms: i64, hours: u8) -> bool {
    exec_ms.rem_euclid(cadence_ms(hours)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-01-01T00:00:00Z
    const MIDNIGHT: i64 = 1_704_067_200_000;

    #[test]
    fn boundaries() {
        let now = MIDNIGHT + 5 * HOUR_MS + 123;
        assert_eq!(last_boundary(now, 4), MIDNIGHT + 4 * HOUR_MS);
        assert_eq!(next_boundary(now, 4), MIDNIGHT + 8 * HOUR_MS);
        assert_eq!(last_boundary(now, 8), MIDNIGHT);
        assert_eq!(next_boundary(MIDNIGHT, 8), MIDNIGHT + 8 * HOUR_MS);
        assert_eq!(last_boundary(MIDNIGHT, 8), MIDNIGHT);
    }

    #[test]
    fn four_hour_ticks_only_drive_eight_hour_symbols_every_other_time() {
        assert!(is_due(MIDNIGHT + 4 * HOUR_MS, 4));
        assert!(!is_due(MIDNIGHT + 4 * HOUR_MS, 8));
        assert!(is_due(MIDNIGHT + 16 * HOUR_MS, 8));
        assert!(!is_due(MIDNIGHT + 1, 4));
    }
}
