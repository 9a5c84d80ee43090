//! Simulation error kinds and their process exit codes.
//!
//! Every fatal condition carries enough payload (particle id, buffer sizes)
//! for the driver to emit a structured diagnostic record before aborting.
//! Recoverable conditions (neighbour-buffer overflow, gather-range underflow)
//! are handled locally and never surface here.

use thiserror::Error;

/// All error conditions the simulation core can surface.
#[derive(Debug, Error)]
pub enum SimError {
    /// Invalid or inconsistent configuration (unknown key, bad algorithm
    /// token, boundary/ndim mismatch).
    #[error("configuration error: {0}")]
    Config(String),

    /// A per-thread neighbour buffer overflowed and doubling has reached the
    /// hard cap. Indicates a pathological particle distribution.
    #[error("neighbour buffer exhausted: doubling reached the cap of {cap} entries")]
    NeighborBufferExhausted {
        /// Capacity at which doubling was abandoned.
        cap: usize,
    },

    /// The ghost tail of the particle array is full. Fatal for this step,
    /// but reported with sizing advice.
    #[error(
        "ghost buffer overflow: {nghost} ghosts exceed the {nghostmax} reserved slots; \
         increase Nhydromax"
    )]
    GhostOverflow {
        /// Number of ghosts the refresh tried to create.
        nghost: usize,
        /// Slots available in the tail.
        nghostmax: usize,
    },

    /// The smoothing-length fixed-point/bisection iteration failed to
    /// converge within 5 * K1 iterations for one particle.
    #[error(
        "smoothing-length iteration diverged for particle {id}: \
         h = {h:.6e}, rho = {rho:.6e}, hmax = {hmax:.6e}"
    )]
    HIterationDiverged {
        /// Offending particle id.
        id: usize,
        /// Last h value of the iteration.
        h: f64,
        /// Last density estimate.
        rho: f64,
        /// Gather radius the neighbour list was built for.
        hmax: f64,
    },

    /// A slope-limited reconstruction produced rho <= 0 or P <= 0 and no
    /// positivity floor is configured. Never silently clamped.
    #[error(
        "non-positive reconstructed state for particle {id}: \
         rho = {rho:.6e}, press = {press:.6e}"
    )]
    NonPositiveState {
        /// Particle on whose face the reconstruction failed.
        id: usize,
        /// Reconstructed density.
        rho: f64,
        /// Reconstructed pressure.
        press: f64,
    },

    /// Snapshot read/write failure (after the single retry).
    #[error("snapshot I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Cooperative user interrupt observed between sub-steps.
    #[error("interrupted by user")]
    Interrupt,
}

impl SimError {
    /// Process exit code for this error kind.
    ///
    /// 0 success / 1 configuration / 2 I/O / 3 numerical divergence /
    /// 4 resource exhaustion. `Interrupt` is a clean exit.
    pub fn exit_code(&self) -> i32 {
        match self {
            SimError::Config(_) => 1,
            SimError::Io(_) => 2,
            SimError::HIterationDiverged { .. } | SimError::NonPositiveState { .. } => 3,
            SimError::NeighborBufferExhausted { .. } | SimError::GhostOverflow { .. } => 4,
            SimError::Interrupt => 0,
        }
    }
}

/// Structured record emitted by the driver when a fatal error aborts the run.
#[derive(Debug)]
pub struct DiagnosticRecord {
    /// Step index at which the failure occurred.
    pub step: u64,
    /// Simulation time at the failure.
    pub t: f64,
    /// Offending particle, when the error is per-particle.
    pub particle: Option<usize>,
    /// Exit code the process will terminate with.
    pub exit_code: i32,
}

impl std::fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "step={} t={:.8e} particle={} exit_code={}",
            self.step,
            self.t,
            self.particle.map_or("-".to_string(), |i| i.to_string()),
            self.exit_code
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_contract() {
        assert_eq!(SimError::Config("x".into()).exit_code(), 1);
        assert_eq!(
            SimError::Io(std::io::Error::new(std::io::ErrorKind::Other, "x")).exit_code(),
            2
        );
        assert_eq!(
            SimError::HIterationDiverged { id: 0, h: 1.0, rho: 1.0, hmax: 1.0 }.exit_code(),
            3
        );
        assert_eq!(
            SimError::NonPositiveState { id: 0, rho: -1.0, press: 1.0 }.exit_code(),
            3
        );
        assert_eq!(SimError::NeighborBufferExhausted { cap: 1 }.exit_code(), 4);
        assert_eq!(SimError::GhostOverflow { nghost: 2, nghostmax: 1 }.exit_code(), 4);
        assert_eq!(SimError::Interrupt.exit_code(), 0);
    }

    #[test]
    fn diagnostic_record_formats() {
        let rec = DiagnosticRecord { step: 42, t: 0.125, particle: Some(7), exit_code: 3 };
        let s = rec.to_string();
        assert!(s.contains("step=42"));
        assert!(s.contains("particle=7"));
    }
}
