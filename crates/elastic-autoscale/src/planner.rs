//! Replica planning: how many instances to run for an observed rate.
//!
//! Everything here is pure. The same policy, rate and actual count always
//! yield the same plan, so the reconcile loop can be replayed safely.

use elastic_state::Policy;

/// Total instance count and the part of it held as buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaPlan {
    pub total: u32,
    pub buffer: u32,
}

/// Instances needed to absorb `rate` at `capacity` per instance.
pub fn base_workload(rate: f64, capacity: u32) -> u32 {
    if capacity == 0 || !rate.is_finite() || rate <= 0.0 {
        return 0;
    }
    // Float-to-int `as` saturates at u32::MAX.
    (rate / f64::from(capacity)).ceil() as u32
}

/// Grow, keep or shrink the buffer by one step.
///
/// The buffer grows when the load spilling over the base pool occupies more
/// than `threshold_percent` of the buffer's capacity, and shrinks when the
/// base pool alone covers the rate. The result is never below 1.
pub fn adjust_buffer_amount(
    rate: f64,
    total: u32,
    current_buffer: u32,
    capacity: u32,
    threshold_percent: u32,
) -> u32 {
    let capacity = f64::from(capacity);
    let base_instances = total.saturating_sub(current_buffer);
    let base_capacity = f64::from(base_instances) * capacity;

    // No base pool means the buffer is already carrying everything.
    let saturated = base_instances == 0 || rate > base_capacity;

    let adjusted = if saturated {
        let overflow = rate - base_capacity;
        let buffer_capacity = f64::from(current_buffer) * capacity;
        let ratio = if buffer_capacity > 0.0 {
            overflow / buffer_capacity
        } else if overflow > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };
        if ratio > f64::from(threshold_percent) / 100.0 {
            current_buffer.saturating_add(1)
        } else {
            current_buffer
        }
    } else {
        current_buffer.saturating_sub(1).max(1)
    };
    adjusted.max(1)
}

/// Plan the replica count of `policy` for the observed `rate`, given the
/// number of `actual` running instances.
pub fn calc_replicas(policy: &Policy, rate: f64, actual: u32) -> ReplicaPlan {
    let deployment = &policy.spec.deployment;
    let initial = policy.spec.buffer.initial;

    // Cold start: below one instance worth of load.
    if rate < f64::from(deployment.capacity) {
        return ReplicaPlan {
            total: deployment.min_replicas.saturating_add(initial),
            buffer: initial,
        };
    }

    let seed = match policy.status.buffered_replicas {
        0 => initial,
        n => n,
    };

    let base = base_workload(rate, deployment.capacity);
    let buffer = adjust_buffer_amount(
        rate,
        actual,
        seed,
        deployment.capacity,
        policy.spec.buffer.threshold,
    );
    let total = base.saturating_add(buffer);

    if total > deployment.max_replicas {
        return ReplicaPlan {
            total: deployment.max_replicas,
            buffer: initial,
        };
    }
    ReplicaPlan { total, buffer }
}
