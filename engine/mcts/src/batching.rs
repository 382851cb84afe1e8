//! Batch sizing.
//!
//! Decides how many visits the next collection cycle should chase, how
//! the collection is split across two passes, how much network budget the
//! batch gets, and whether this iteration may overlap with the prior
//! batch's evaluation.

use crate::params::SearchParams;

/// Fraction of the target collected in the first pass of a split batch.
const SPLIT_FIRST_FRACTION: f32 = 0.6;

/// Minimum first-pass yield for the second pass to run.
pub const SPLIT_SECOND_PASS_MIN_YIELD: f32 = 0.667;

/// Targets below this are not worth splitting.
const MIN_SPLIT_TARGET: usize = 8;

/// Snap tolerance around a device breakpoint.
const BREAK_SNAP_TOLERANCE: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    /// Visits to collect this cycle.
    pub target: usize,
    /// First-pass share of the target.
    pub first_pass: usize,
    /// Second-pass share; runs only if first-pass yield clears the gate.
    pub second_pass: usize,
    /// Network budget; overshoot past this becomes cache-only.
    pub max_nodes_nn: usize,
    /// Whether this iteration may overlap with the prior evaluation.
    pub overlap: bool,
}

/// Compute the plan for one collection cycle.
///
/// `remaining` is the visit budget still unspent (already net of visits
/// in flight), `root_n` the root's applied visits. `forced` overrides the
/// sizer but is still clipped to the remaining budget.
pub fn plan_batch(
    remaining: usize,
    root_n: u32,
    params: &SearchParams,
    breaks: &[usize],
    evaluator_max: usize,
    forced: Option<usize>,
) -> BatchPlan {
    let early = root_n < params.small_batch_root_n;

    let target = if let Some(f) = forced {
        f.min(remaining)
    } else if !params.smart_size_batches {
        params.max_batch_size.min(remaining)
    } else if early {
        // Ramp up from single visits: tiny trees gain nothing from wide
        // batches, they only dilute the tree with shallow siblings.
        ((root_n as usize) / 4 + 1).min(96).min(remaining)
    } else {
        let grown = (params.batch_size_multiplier * (remaining as f32).sqrt()) as usize;
        grown.clamp(1, params.max_batch_size).min(remaining)
    };

    let (first_pass, second_pass) = if params.flow_split_selects && target >= MIN_SPLIT_TARGET {
        let first = ((target as f32) * SPLIT_FIRST_FRACTION).ceil() as usize;
        (first.min(target), target - first.min(target))
    } else {
        (target, 0)
    };

    let mut max_nodes_nn = if params.padded_batch_sizing {
        target
            + params.padded_extra_nodes_base
            + (params.padded_extra_nodes_multiplier * target as f32) as usize
    } else {
        target
    };
    // Snapping may round the budget below the target; the surplus
    // becomes cache-only at collection time.
    max_nodes_nn = snap_to_breakpoint(max_nodes_nn, breaks);
    max_nodes_nn = max_nodes_nn.min(evaluator_max).max(1);

    // Overlap hides evaluator latency but doubles the tree's in-flight
    // exposure; worthless (and first-iteration unsound) on a small root.
    let overlap = params.flow_direct_overlapped
        && params.flow_dual_selectors
        && !early
        && root_n > 0;

    BatchPlan {
        target,
        first_pass,
        second_pass,
        max_nodes_nn,
        overlap,
    }
}

/// Round `planned` to the nearest device breakpoint within ±20%.
fn snap_to_breakpoint(planned: usize, breaks: &[usize]) -> usize {
    if planned == 0 {
        return 0;
    }
    let mut best: Option<usize> = None;
    for &b in breaks {
        let diff = b.abs_diff(planned);
        if (diff as f32) <= BREAK_SNAP_TOLERANCE * planned as f32 {
            match best {
                Some(prev) if prev.abs_diff(planned) <= diff => {}
                _ => best = Some(b),
            }
        }
    }
    best.unwrap_or(planned)
}
