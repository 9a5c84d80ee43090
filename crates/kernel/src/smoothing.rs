//! Smoothing-length solver: the h <-> density fixed point.
//!
//! Per active particle the target relation is
//!
//! ```text
//! h = h_fac * (m / rho)^(1/d)
//! ```
//!
//! iterated as a fixed point for the first [`MAX_FIXED_POINT`] rounds, then
//! by bracketed bisection up to five times that, after which the run aborts
//! with [`SimError::HIterationDiverged`]. When the trial h outgrows the
//! gather radius the neighbour list was built for, the solver bails out with
//! [`HStatus::ListTooSmall`] and the phase loop re-queries the tree with a
//! 1.05x larger radius.

use crate::error::SimError;
use crate::particle::SphParticle;
use crate::smoothing_kernel::SmoothingKernel;

/// Fixed-point iterations before switching to bisection (K1).
pub const MAX_FIXED_POINT: usize = 30;

/// Neighbour data gathered for the h iteration.
#[derive(Debug, Clone, Copy)]
pub struct GatherNeib {
    /// Squared distance to the candidate.
    pub drsqd: f64,
    /// Candidate mass.
    pub m: f64,
    /// Candidate gravitational potential (potmin bookkeeping).
    pub gpot: f64,
}

/// Static parameters of the solver.
#[derive(Debug, Clone, Copy)]
pub struct SmoothingParams {
    /// Spatial dimensionality.
    pub ndim: usize,
    /// Proportionality between h and the mean particle spacing.
    pub h_fac: f64,
    /// Relative convergence tolerance on h.
    pub h_converge: f64,
    /// Lower h bound for particles bound to a sink.
    pub hmin_sink: f64,
    /// Density from mass-weighted kernel sums (grad-h SPH) rather than the
    /// number density (meshless FV).
    pub mass_weighted: bool,
    /// Scan neighbour potentials for the sink-candidate flag.
    pub track_potmin: bool,
}

/// Outcome of one particle's iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HStatus {
    /// h and all derived gather quantities are final.
    Converged,
    /// The kernel sphere outgrew the provided neighbour set; caller must
    /// expand the gather radius and retry.
    ListTooSmall,
}

/// Solve the smoothing length of one particle against its gather list and
/// fill in every derived gather quantity (n, rho, Omega^-1, zeta, potmin).
pub fn compute_h(
    part: &mut SphParticle,
    neibs: &[GatherNeib],
    hmax: f64,
    kern: &dyn SmoothingKernel,
    params: &SmoothingParams,
) -> Result<HStatus, SimError> {
    let ndim = params.ndim as f64;
    let invndim = 1.0 / ndim;
    let kernrangesqd = kern.kernrangesqd();

    let mut h_lo = 0.0f64;
    let mut h_hi = hmax;
    if part.sink_id != -1 {
        h_lo = params.hmin_sink;
        if hmax < params.hmin_sink {
            return Ok(HStatus::ListTooSmall);
        }
    }

    debug_assert!(part.h > 0.0);
    debug_assert!(part.m > 0.0);
    debug_assert!(hmax > 0.0);

    let mut iteration = 0usize;
    let mut invhsqd;
    let (mut ndens, mut rho, mut omegasum, mut zetasum);
    loop {
        iteration += 1;
        part.invh = 1.0 / part.h;
        part.hfactor = part.invh.powi(params.ndim as i32);
        invhsqd = part.invh * part.invh;

        ndens = 0.0;
        let mut rhosum = 0.0;
        omegasum = 0.0;
        zetasum = 0.0;
        for nb in neibs {
            let ssqd = nb.drsqd * invhsqd;
            let w = kern.w0_s2(ssqd);
            ndens += w;
            rhosum += nb.m * w;
            omegasum += if params.mass_weighted {
                nb.m * kern.womega_s2(ssqd)
            } else {
                kern.womega_s2(ssqd)
            };
            zetasum += nb.m * kern.wzeta_s2(ssqd);
        }
        ndens *= part.hfactor;
        rho = if params.mass_weighted { rhosum * part.hfactor } else { part.m * ndens };

        part.ndens = ndens;
        part.rho = rho;
        if rho > 0.0 {
            part.invrho = 1.0 / rho;
            part.volume = if ndens > 0.0 { 1.0 / ndens } else { 0.0 };
        }

        let h_target = if rho > 0.0 {
            params.h_fac * (part.m / rho).powf(invndim)
        } else {
            f64::INFINITY
        };

        if rho > 0.0
            && part.h > h_lo
            && (part.h - h_target).abs() < params.h_converge * part.h
        {
            break;
        }

        if iteration < MAX_FIXED_POINT {
            part.h = h_target;
        } else if iteration == MAX_FIXED_POINT {
            part.h = 0.5 * (h_lo + h_hi);
        } else if iteration < 5 * MAX_FIXED_POINT {
            // Bracket tightening: over-dense means h must shrink.
            if rho * part.h.powf(ndim) > params.h_fac.powf(ndim) * part.m {
                h_hi = part.h;
            } else {
                h_lo = part.h;
            }
            part.h = 0.5 * (h_lo + h_hi);
        } else {
            return Err(SimError::HIterationDiverged { id: part.id, h: part.h, rho, hmax });
        }

        // The kernel sphere outgrew the gather list; the caller must expand
        // hmax and re-query the tree before we can continue.
        if part.h > hmax {
            return Ok(HStatus::ListTooSmall);
        }
    }

    // Converged: normalise h and all gather sums.
    let h_final = (params.h_fac * (part.m / rho).powf(invndim)).max(h_lo);
    if h_final > hmax {
        return Ok(HStatus::ListTooSmall);
    }
    part.set_h(h_final, params.ndim, kernrangesqd);
    invhsqd = part.invh * part.invh;

    // Grad-h correction: Omega = 1 + (h / (d rho)) * sum_j m_j dW/dh.
    let norm = if params.mass_weighted { part.rho } else { part.ndens };
    let omega =
        1.0 + invndim * part.h * omegasum * part.hfactor_grad(params.ndim) / norm;
    part.invomega = 1.0 / omega;

    // Gravitational grad-h term from the softened-potential h derivative.
    part.zeta = -invndim * part.h * zetasum * invhsqd * part.invrho * part.invomega;

    part.div_v = 0.0;

    if params.track_potmin {
        part.potmin = true;
        for nb in neibs {
            if nb.gpot > 1.000000001 * part.gpot && nb.drsqd * invhsqd < kernrangesqd {
                part.potmin = false;
                break;
            }
        }
    }

    Ok(HStatus::Converged)
}
