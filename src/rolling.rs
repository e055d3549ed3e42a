//! Rolling (gray) release gate (§4.D).

use crate::annotations::types::RolloutBundle;
use crate::model::RollingState;

/// Extract the numeric ordinal suffix from a pod name (e.g. `gateway-7` ->
/// `7`). Non-matching pod names yield `-1` (§4.D).
pub fn pod_ordinal(pod_name: &str) -> i32 {
    match pod_name.rsplit_once('-') {
        Some((_, suffix)) => suffix.parse::<i32>().unwrap_or(-1),
        None => -1,
    }
}

/// Truth table from §4.D, applied identically to the ingress and secret
/// rolling gates.
pub fn rolling_state(pod_ordinal: i32, rollout: &RolloutBundle) -> RollingState {
    if !rollout.flag {
        return RollingState::Active;
    }
    if rollout.index > 0 && (0..rollout.index).contains(&pod_ordinal) {
        return RollingState::ActiveRollout;
    }
    RollingState::InactiveRollout
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("gateway-7", 7)]
    #[case("gateway-0", 0)]
    #[case("gateway", -1)]
    #[case("gateway-abc", -1)]
    fn ordinal_extraction(#[case] name: &str, #[case] expected: i32) {
        assert_eq!(pod_ordinal(name), expected);
    }

    fn rollout(flag: bool, index: i32) -> RolloutBundle {
        RolloutBundle {
            flag,
            current_ver: None,
            new_ver: None,
            index,
        }
    }

    #[rstest]
    #[case(3, false, -1, RollingState::Active)]
    #[case(3, true, 5, RollingState::ActiveRollout)]
    #[case(10, true, 5, RollingState::InactiveRollout)]
    #[case(0, true, 5, RollingState::ActiveRollout)]
    #[case(-1, true, 5, RollingState::InactiveRollout)]
    #[case(3, true, 0, RollingState::InactiveRollout)]
    #[case(3, true, -1, RollingState::InactiveRollout)]
    fn truth_table(
        #[case] ordinal: i32,
        #[case] flag: bool,
        #[case] index: i32,
        #[case] expected: RollingState,
    ) {
        assert_eq!(rolling_state(ordinal, &rollout(flag, index)), expected);
    }
}
