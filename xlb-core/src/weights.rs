//! Target group & weight mathematics (§4.4).
//!
//! Every function here is a free function over plain slices: no I/O, no
//! async, no shared state. This is what makes the weight pipeline
//! exhaustively unit-testable with literal input/output vectors and safe
//! to run to completion inside a single orchestrator tick without ever
//! suspending.

use crate::state::circuit::CircuitState;

/// Prefix sum. `cumulative(w)[i] = w[0] + .. + w[i]`; the last element
/// always equals the sum of the inputs.
pub fn cumulative(effective_weights: &[u32]) -> Vec<u32> {
    let mut out = Vec::with_capacity(effective_weights.len());
    let mut running = 0u32;
    for w in effective_weights {
        running += w;
        out.push(running);
    }
    out
}

/// For each healthy target, `effective_i = round(100 * configured_i /
/// sum(configured_j for j healthy))`; unhealthy targets get 0.
///
/// If no target is healthy, returns `configured` unchanged rather than an
/// all-zero vector — graceful degradation, never hand the kernel a group
/// nobody can reach.
pub fn redistribute(configured: &[u32], healthy_mask: &[bool]) -> Vec<u32> {
    debug_assert_eq!(configured.len(), healthy_mask.len());
    let healthy_sum: u32 = configured
        .iter()
        .zip(healthy_mask)
        .filter(|(_, &healthy)| healthy)
        .map(|(w, _)| *w)
        .sum();

    if healthy_sum == 0 {
        return configured.to_vec();
    }

    let raw: Vec<u32> = configured
        .iter()
        .zip(healthy_mask)
        .map(|(w, &healthy)| {
            if !healthy {
                0
            } else {
                round_div(*w as u64 * 100, healthy_sum as u64)
            }
        })
        .collect();

    fix_rounding(&raw)
}

fn round_div(numerator: u64, denominator: u64) -> u32 {
    if denominator == 0 {
        return 0;
    }
    (((numerator * 2) + denominator) / (denominator * 2)) as u32
}

/// After rounding, the sum may land on 99 or 101 (and, in pathological
/// cases, further off). Adjusts the *largest non-zero* weight by the
/// deficit so the sum is exactly 100. Ties broken by first occurrence.
/// Idempotent and preserves the zero set.
pub fn fix_rounding(weights: &[u32]) -> Vec<u32> {
    let mut out = weights.to_vec();
    let sum: i64 = out.iter().map(|w| *w as i64).sum();
    if sum == 0 || sum == 100 {
        return out;
    }
    let deficit = 100i64 - sum;

    let Some((idx, &max_weight)) = out
        .iter()
        .enumerate()
        .filter(|(_, &w)| w > 0)
        .max_by_key(|(i, &w)| (w, std::cmp::Reverse(*i)))
    else {
        return out;
    };
    let adjusted = max_weight as i64 + deficit;
    out[idx] = adjusted.max(0) as u32;
    out
}

/// Targets whose `recovery_step` is `0..=3` (25/50/75/100%) have their
/// current effective weight scaled by the step fraction; the result is
/// then renormalised with [`fix_rounding`]. A target with no recovery step
/// recorded (fully recovered, or never unhealthy) passes through
/// unscaled.
///
/// `health` is the same per-target healthy mask `apply_drain` is fed; a
/// target is never mid-recovery while unhealthy (`state::HealthState`
/// clears `recovery_step` the moment a target turns `Unhealthy`), so this
/// is only asserted here rather than acted on.
pub fn apply_recovery(effective_weights: &[u32], health: &[bool], recovery_step: &[Option<u8>]) -> Vec<u32> {
    debug_assert_eq!(effective_weights.len(), health.len());
    debug_assert_eq!(effective_weights.len(), recovery_step.len());
    debug_assert!(health.iter().zip(recovery_step).all(|(healthy, step)| *healthy || step.is_none()));
    let scaled: Vec<u32> = effective_weights
        .iter()
        .zip(recovery_step)
        .map(|(w, step)| match step {
            Some(s) => {
                let fraction = recovery_fraction(*s);
                round_div(*w as u64 * (fraction * 100.0) as u64, 10_000)
            }
            None => *w,
        })
        .collect();
    fix_rounding(&scaled)
}

fn recovery_fraction(step: u8) -> f64 {
    match step {
        0 => 0.25,
        1 => 0.50,
        2 => 0.75,
        _ => 1.00,
    }
}

/// Equivalent to [`redistribute`] with `active_i = healthy_i && !drain_i`.
pub fn apply_drain(configured: &[u32], healthy_mask: &[bool], drain_mask: &[bool]) -> Vec<u32> {
    debug_assert_eq!(configured.len(), healthy_mask.len());
    debug_assert_eq!(configured.len(), drain_mask.len());
    let active: Vec<bool> = healthy_mask.iter().zip(drain_mask).map(|(&h, &d)| h && !d).collect();
    redistribute(configured, &active)
}

/// Maps `closed -> weights_i`, `half_open -> max(1, round(0.10 *
/// configured_i))`, `open -> 0`. If every result is zero (all circuits
/// open), returns the input unchanged — graceful degradation. Otherwise
/// renormalises to 100.
pub fn apply_circuit(weights: &[u32], cb_states: &[CircuitState], configured: &[u32]) -> Vec<u32> {
    debug_assert_eq!(weights.len(), cb_states.len());
    debug_assert_eq!(weights.len(), configured.len());

    let raw: Vec<u32> = weights
        .iter()
        .zip(cb_states)
        .zip(configured)
        .map(|((w, state), cfg)| match state {
            CircuitState::Closed => *w,
            CircuitState::HalfOpen => round_div(*cfg as u64 * 10, 100).max(1),
            CircuitState::Open => 0,
        })
        .collect();

    if raw.iter().all(|w| *w == 0) {
        return weights.to_vec();
    }

    let total: u64 = raw.iter().map(|w| *w as u64).sum();
    let normalised: Vec<u32> = raw.iter().map(|w| round_div(*w as u64 * 100, total)).collect();
    fix_rounding(&normalised)
}

/// Load-balancing algorithm selector for [`least_conn_scale`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeastConnMode {
    /// `w_i / (1 + conn_count_i)`.
    Weighted,
    /// `1 / (1 + conn_count_i)`, ignoring configured weight entirely.
    Unweighted,
}

/// If the active algorithm is least-connections, replaces `configured`
/// with `w_i / (1 + conn_count_i)` (or `1 / (1 + conn_count_i)` in
/// unweighted mode), then renormalises to 100. Otherwise returns
/// `configured` unchanged (identity).
pub fn least_conn_scale(configured: &[u32], conn_counts: &[u64], mode: Option<LeastConnMode>) -> Vec<u32> {
    let Some(mode) = mode else {
        return configured.to_vec();
    };
    debug_assert_eq!(configured.len(), conn_counts.len());

    // Scale by 1000 before dividing by (1 + count) so the subsequent
    // renormalisation to 100 has enough precision to distinguish targets
    // with similar connection counts.
    const SCALE: u64 = 1_000_000;
    let raw_scaled: Vec<u64> = configured
        .iter()
        .zip(conn_counts)
        .map(|(w, count)| {
            let numerator = match mode {
                LeastConnMode::Weighted => *w as u64 * SCALE,
                LeastConnMode::Unweighted => SCALE,
            };
            numerator / (1 + count)
        })
        .collect();

    let total: u64 = raw_scaled.iter().sum();
    if total == 0 {
        return configured.to_vec();
    }

    let normalised: Vec<u32> = raw_scaled.iter().map(|v| round_div(*v * 100, total)).collect();
    fix_rounding(&normalised)
}

/// Per-target inputs the weight pipeline composes for a single tick.
#[derive(Debug, Clone)]
pub struct PipelineInputs<'a> {
    pub configured: &'a [u32],
    pub healthy_mask: &'a [bool],
    pub recovery_step: &'a [Option<u8>],
    pub drain_mask: &'a [bool],
    pub cb_states: &'a [CircuitState],
    pub conn_counts: &'a [u64],
    pub least_conn_mode: Option<LeastConnMode>,
}

/// The full weight pipeline: `apply_circuit . apply_drain .
/// least_conn_scale`, with health-based redistribution and gradual
/// recovery folded into `apply_drain`'s `redistribute` call.
///
/// Returns the final effective-weight vector; callers derive the
/// cumulative vector from it with [`cumulative`].
pub fn compute_effective_weights(inputs: &PipelineInputs<'_>) -> Vec<u32> {
    let scaled = least_conn_scale(inputs.configured, inputs.conn_counts, inputs.least_conn_mode);
    let drained = apply_drain(&scaled, inputs.healthy_mask, inputs.drain_mask);
    let recovered = apply_recovery(&drained, inputs.healthy_mask, inputs.recovery_step);
    apply_circuit(&recovered, inputs.cb_states, inputs.configured)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cumulative_prefix_sums_and_last_equals_total() {
        let result = cumulative(&[71, 0, 29]);
        assert_eq!(result, vec![71, 71, 100]);
    }

    #[test]
    fn redistribute_scenario_1() {
        let effective = redistribute(&[50, 30, 20], &[true, false, true]);
        assert_eq!(effective, vec![71, 0, 29]);
        assert_eq!(cumulative(&effective), vec![71, 71, 100]);
    }

    #[test]
    fn redistribute_all_unhealthy_returns_configured_unchanged() {
        let effective = redistribute(&[50, 50], &[false, false]);
        assert_eq!(effective, vec![50, 50]);
        assert_eq!(cumulative(&effective), vec![50, 100]);
    }

    #[test]
    fn redistribute_zeroes_exactly_the_unhealthy_positions() {
        let effective = redistribute(&[34, 33, 33], &[false, true, true]);
        assert_eq!(effective[0], 0);
        assert_eq!(effective.iter().sum::<u32>(), 100);
    }

    #[test]
    fn redistribute_all_healthy_is_identity_modulo_rounding() {
        let effective = redistribute(&[50, 50], &[true, true]);
        assert_eq!(effective, vec![50, 50]);
    }

    #[test]
    fn fix_rounding_is_idempotent_and_preserves_zero_set() {
        let weights = vec![0, 34, 33, 33];
        let once = fix_rounding(&weights);
        let twice = fix_rounding(&once);
        assert_eq!(once, twice);
        assert_eq!(once.iter().sum::<u32>(), 100);
        assert_eq!(weights[0] == 0, once[0] == 0);
    }

    #[test]
    fn fix_rounding_picks_largest_with_first_occurrence_tie_break() {
        // 34 appears twice; the deficit goes to the first occurrence.
        let weights = vec![34, 34, 33]; // sums to 101
        let fixed = fix_rounding(&weights);
        assert_eq!(fixed, vec![33, 34, 33]);
        assert_eq!(fixed.iter().sum::<u32>(), 100);
    }

    #[test]
    fn half_open_scaling_scenario_2() {
        let weights = vec![60, 40];
        let cb = vec![CircuitState::Closed, CircuitState::HalfOpen];
        let configured = vec![60, 40];
        let effective = apply_circuit(&weights, &cb, &configured);
        assert_eq!(effective, vec![94, 6]);
        assert_eq!(cumulative(&effective), vec![94, 100]);
    }

    #[test]
    fn half_open_renormalises_proportionally_with_multiple_closed_targets() {
        // Closed [50, 30] plus a half-open target configured at 20: the
        // deficit must be spread proportionally across the closed targets,
        // not dumped entirely onto the largest one.
        let weights = vec![50, 30, 20];
        let cb = vec![CircuitState::Closed, CircuitState::Closed, CircuitState::HalfOpen];
        let configured = vec![50, 30, 20];
        let effective = apply_circuit(&weights, &cb, &configured);
        assert_eq!(effective, vec![61, 37, 2]);
        assert_eq!(effective.iter().sum::<u32>(), 100);
    }

    #[test]
    fn all_circuits_open_graceful_degradation() {
        let weights = vec![60, 40];
        let cb = vec![CircuitState::Open, CircuitState::Open];
        let configured = vec![60, 40];
        let effective = apply_circuit(&weights, &cb, &configured);
        assert_eq!(effective, weights);
    }

    #[test]
    fn apply_recovery_scales_by_step_fraction() {
        let effective = apply_recovery(&[100, 0], &[true, false], &[Some(1), None]);
        // Step 1 is 50%; renormalising a single scaled target back to 100
        // hands it the whole group regardless of the raw fraction.
        assert_eq!(effective, vec![100, 0]);
    }

    #[test]
    fn apply_recovery_passes_through_targets_with_no_recovery_step() {
        let effective = apply_recovery(&[60, 40], &[true, true], &[None, None]);
        assert_eq!(effective, vec![60, 40]);
    }

    #[test]
    fn apply_recovery_scales_down_a_recovering_target_among_healthy_peers() {
        let effective = apply_recovery(&[400, 200], &[true, true], &[Some(1), None]);
        assert_eq!(effective, vec![2, 98]);
        assert_eq!(effective.iter().sum::<u32>(), 100);
    }

    #[test]
    fn apply_drain_zeroes_draining_targets() {
        let effective = apply_drain(&[50, 50], &[true, true], &[true, false]);
        assert_eq!(effective, vec![0, 100]);
    }

    #[test]
    fn least_conn_scale_identity_when_not_selected() {
        let configured = vec![60, 40];
        let result = least_conn_scale(&configured, &[5, 1], None);
        assert_eq!(result, configured);
    }

    #[test]
    fn least_conn_scale_favors_fewer_connections() {
        let result = least_conn_scale(&[50, 50], &[0, 10], Some(LeastConnMode::Weighted));
        assert!(result[0] > result[1]);
        assert_eq!(result.iter().sum::<u32>(), 100);
    }

    #[test]
    fn least_conn_scale_unweighted_ignores_configured_weight() {
        let result = least_conn_scale(&[90, 10], &[0, 0], Some(LeastConnMode::Unweighted));
        assert_eq!(result, vec![50, 50]);
    }

    #[test]
    fn all_unhealthy_all_circuits_open_is_the_only_zero_sum_case() {
        let configured = vec![50, 50];
        let inputs = PipelineInputs {
            configured: &configured,
            healthy_mask: &[false, false],
            recovery_step: &[None, None],
            drain_mask: &[false, false],
            cb_states: &[CircuitState::Open, CircuitState::Open],
            conn_counts: &[0, 0],
            least_conn_mode: None,
        };
        let effective = compute_effective_weights(&inputs);
        // health degradation leaves [50, 50] unchanged, then both circuits
        // being open leaves it unchanged again (not a true all-zero case
        // unless circuits are open on an already-healthy group).
        assert_eq!(effective.iter().sum::<u32>(), 100);
    }
}
