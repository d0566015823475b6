// SPDX-License-Identifier: Apache-2.0

//! Typed error taxonomy for the router and worker-side cache simulator.
//!
//! These variants mirror the error table in the design: each kind is raised
//! at a specific boundary and carries enough context for the caller (an HTTP
//! handler, a control loop) to decide on a policy without inspecting strings.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no workers available")]
    NoWorkersAvailable,

    #[error("capacity exceeded: no evictable block for worker cache (max_blocks={max_blocks})")]
    CapacityExceeded { max_blocks: usize },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}
