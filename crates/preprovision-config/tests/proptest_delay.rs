//! Property tests for approval deadline clamping.
// crates/preprovision-config/tests/proptest_delay.rs
// =============================================================================
// Module: Deadline Clamping Property Tests
// Description: Property-based checks for `clamp_max_delay`.
// Purpose: Ensure every configured value yields a deadline inside (0, 30s).
// =============================================================================

use std::time::Duration;

use preprovision_config::DEFAULT_MAX_DELAY;
use preprovision_config::clamp_max_delay;
use proptest::prelude::*;

proptest! {
    #[test]
    fn clamped_deadline_is_always_in_range(value in any::<f64>()) {
        let deadline = clamp_max_delay(Some(value));
        prop_assert!(deadline > Duration::ZERO);
        prop_assert!(deadline < Duration::from_secs(30));
    }

    #[test]
    fn in_range_values_are_preserved(ms in 1u32..30_000u32) {
        let deadline = clamp_max_delay(Some(f64::from(ms)));
        prop_assert_eq!(deadline, Duration::from_millis(u64::from(ms)));
    }

    #[test]
    fn out_of_range_values_use_default(ms in prop_oneof![-1.0e9f64..=0.0, 30_000.0f64..1.0e9]) {
        prop_assert_eq!(clamp_max_delay(Some(ms)), DEFAULT_MAX_DELAY);
    }
}
