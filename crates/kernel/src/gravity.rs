//! Self-gravity contributions: softened pair gravity, direct summation,
//! cell multipole expansions, fast cell-centre Taylor variants, the Ewald
//! periodic hook and star gravity.
//!
//! All routines accumulate into `part.agrav` and `part.gpot` (positive
//! potential convention, `gpot = -Phi`); the SPH phases fold `agrav` into
//! the total acceleration afterwards. G = 1 in code units.

use crate::ewald::PeriodicCorrection;
use crate::nbody::StarParticle;
use crate::particle::SphParticle;
use crate::smoothing_kernel::SmoothingKernel;
use crate::tree::MultipoleMoment;
use crate::vec::{dot, sub};

const SMALL_NUMBER: f64 = 1.0e-20;

/// Kernel-softened pair gravity over near neighbours, symmetrized over both
/// smoothing lengths and carrying the grad-h zeta correction:
///
/// ```text
/// f_ij = m_j/2 [ wgrav(s_i)/h_i^2 + zeta_i w1(s_i)/h_i^(d+1)
///              + wgrav(s_j)/h_j^2 + zeta_j w1(s_j)/h_j^(d+1) ] rhat
/// ```
pub fn compute_smoothed_grav_forces(
    part: &mut SphParticle,
    list: &[usize],
    neibpart: &[SphParticle],
    kern: &dyn SmoothingKernel,
    ndim: usize,
) {
    for &k in list {
        let neib = &neibpart[k];
        // Ghost images carry no mass of their own; periodic gravity runs on
        // nearest images of the real particles instead.
        if neib.is_ghost() {
            continue;
        }
        let dr = sub(&neib.r, &part.r);
        let drmag = (dot(&dr, &dr, ndim) + SMALL_NUMBER).sqrt();
        let invdrmag = 1.0 / drmag;

        let paux = 0.5
            * (part.invh * part.invh * kern.wgrav(drmag * part.invh)
                + part.zeta * part.hfactor_grad(ndim) * kern.w1(drmag * part.invh)
                + neib.invh * neib.invh * kern.wgrav(drmag * neib.invh)
                + neib.zeta * neib.hfactor_grad(ndim) * kern.w1(drmag * neib.invh));
        let gaux = 0.5
            * (part.invh * kern.wpot(drmag * part.invh)
                + neib.invh * kern.wpot(drmag * neib.invh));

        for d in 0..ndim {
            part.agrav[d] += neib.m * dr[d] * invdrmag * paux;
        }
        part.gpot += neib.m * gaux;
    }
}

/// Newtonian direct summation over the distant-particle list.
pub fn compute_direct_grav_forces(
    part: &mut SphParticle,
    list: &[usize],
    neibpart: &[SphParticle],
    ndim: usize,
) {
    for &k in list {
        let neib = &neibpart[k];
        let dr = sub(&neib.r, &part.r);
        let drsqd = dot(&dr, &dr, ndim) + SMALL_NUMBER;
        let invdrmag = 1.0 / drsqd.sqrt();
        let invdr3 = invdrmag * invdrmag * invdrmag;

        for d in 0..ndim {
            part.agrav[d] += neib.m * dr[d] * invdr3;
        }
        part.gpot += neib.m * invdrmag;
    }
}

/// Monopole contribution of every accepted cell.
pub fn compute_cell_monopole_forces(
    part: &mut SphParticle,
    gravcells: &[MultipoleMoment],
    ndim: usize,
) {
    for cell in gravcells {
        let dr = sub(&cell.r, &part.r);
        let drsqd = dot(&dr, &dr, ndim) + SMALL_NUMBER;
        let invdrmag = 1.0 / drsqd.sqrt();
        let invdr3 = invdrmag / drsqd;

        for d in 0..ndim {
            part.agrav[d] += cell.m * dr[d] * invdr3;
        }
        part.gpot += cell.m * invdrmag;
    }
}

/// Contract the packed traceless quadrupole with a displacement.
#[inline]
fn quad_dot(q: &[f64; 5], dr: &[f64; 3]) -> [f64; 3] {
    [
        q[0] * dr[0] + q[1] * dr[1] + q[3] * dr[2],
        q[1] * dr[0] + q[2] * dr[1] + q[4] * dr[2],
        q[3] * dr[0] + q[4] * dr[1] - (q[0] + q[2]) * dr[2],
    ]
}

/// Monopole + traceless-quadrupole contribution of every accepted cell:
///
/// ```text
/// gpot += m/r + (Q.dr.dr) / (2 r^5)
/// a    += m dr/r^3 - (Q.dr)/r^5 + 5 (Q.dr.dr) dr / (2 r^7)
/// ```
pub fn compute_cell_quadrupole_forces(
    part: &mut SphParticle,
    gravcells: &[MultipoleMoment],
    ndim: usize,
) {
    for cell in gravcells {
        let dr = sub(&cell.r, &part.r);
        let drsqd = dot(&dr, &dr, ndim) + SMALL_NUMBER;
        let invdrsqd = 1.0 / drsqd;
        let invdrmag = invdrsqd.sqrt();
        let invdr3 = invdrmag * invdrsqd;
        let invdr5 = invdr3 * invdrsqd;

        let qdr = quad_dot(&cell.q, &dr);
        let qscalar = dot(&qdr, &dr, 3);
        let qfactor = 2.5 * qscalar * invdr5 * invdrsqd;

        for d in 0..ndim {
            part.agrav[d] += cell.m * dr[d] * invdr3 - qdr[d] * invdr5 + qfactor * dr[d];
        }
        part.gpot += cell.m * invdrmag + 0.5 * qscalar * invdr5;
    }
}

/// Fast monopole: evaluate the summed cell field and its Jacobian once at
/// the active cell's centre of mass, then apply the linearized field to
/// every active particle.
pub fn compute_fast_monopole_forces(
    activeparts: &mut [SphParticle],
    gravcells: &[MultipoleMoment],
    cell_com: &[f64; 3],
    ndim: usize,
) {
    let mut ac = [0.0f64; 3];
    let mut potc = 0.0f64;
    let mut jac = [[0.0f64; 3]; 3];

    for cell in gravcells {
        let dr = sub(&cell.r, cell_com);
        let drsqd = dot(&dr, &dr, ndim) + SMALL_NUMBER;
        let invdrsqd = 1.0 / drsqd;
        let invdrmag = invdrsqd.sqrt();
        let invdr3 = invdrmag * invdrsqd;
        let invdr5 = invdr3 * invdrsqd;

        potc += cell.m * invdrmag;
        for k in 0..ndim {
            ac[k] += cell.m * dr[k] * invdr3;
            for l in 0..ndim {
                jac[k][l] += cell.m * (3.0 * dr[k] * dr[l] * invdr5
                    - if k == l { invdr3 } else { 0.0 });
            }
        }
    }

    for part in activeparts.iter_mut() {
        let dx = sub(&part.r, cell_com);
        for k in 0..ndim {
            part.agrav[k] += ac[k];
            for l in 0..ndim {
                part.agrav[k] += jac[k][l] * dx[l];
            }
        }
        part.gpot += potc + dot(&ac, &dx, ndim);
    }
}

/// Fast quadrupole: the fast-monopole expansion plus the quadrupole field
/// evaluated at the expansion point.
pub fn compute_fast_quadrupole_forces(
    activeparts: &mut [SphParticle],
    gravcells: &[MultipoleMoment],
    cell_com: &[f64; 3],
    ndim: usize,
) {
    compute_fast_monopole_forces(activeparts, gravcells, cell_com, ndim);

    let mut aq = [0.0f64; 3];
    let mut potq = 0.0f64;
    for cell in gravcells {
        let dr = sub(&cell.r, cell_com);
        let drsqd = dot(&dr, &dr, ndim) + SMALL_NUMBER;
        let invdrsqd = 1.0 / drsqd;
        let invdr5 = invdrsqd * invdrsqd * invdrsqd.sqrt();

        let qdr = quad_dot(&cell.q, &dr);
        let qscalar = dot(&qdr, &dr, 3);
        let qfactor = 2.5 * qscalar * invdr5 * invdrsqd;
        for d in 0..ndim {
            aq[d] += qfactor * dr[d] - qdr[d] * invdr5;
        }
        potq += 0.5 * qscalar * invdr5;
    }
    for part in activeparts.iter_mut() {
        for d in 0..ndim {
            part.agrav[d] += aq[d];
        }
        part.gpot += potq;
    }
}

/// Ewald periodic correction over the pair lists and the accepted cells.
#[allow(clippy::too_many_arguments)]
pub fn add_ewald_corrections(
    part: &mut SphParticle,
    lists: &[&[usize]],
    neibpart: &[SphParticle],
    gravcells: &[MultipoleMoment],
    ewald: &dyn PeriodicCorrection,
    ndim: usize,
) {
    for list in lists {
        for &k in *list {
            let neib = &neibpart[k];
            if !neib.ptype.gravitates() {
                continue;
            }
            let dr = sub(&neib.r, &part.r);
            let (aper, potper) = ewald.correction(neib.m, &dr);
            for d in 0..ndim {
                part.agrav[d] += aper[d];
            }
            part.gpot += potper;
        }
    }
    for cell in gravcells {
        let dr = sub(&cell.r, &part.r);
        let (aper, potper) = ewald.correction(cell.m, &dr);
        for d in 0..ndim {
            part.agrav[d] += aper[d];
        }
        part.gpot += potper;
    }
}

/// Softened star gravity with the pair-mean softening
/// `h_mean = 2 h_i h_* / (h_i + h_*)` entering as `2 / (h_i + h_*)`.
pub fn compute_star_grav_forces(
    part: &mut SphParticle,
    stars: &[StarParticle],
    kern: &dyn SmoothingKernel,
    ndim: usize,
) {
    for star in stars {
        let dr = sub(&star.r, &part.r);
        let drmag = (dot(&dr, &dr, ndim) + SMALL_NUMBER).sqrt();
        let invdrmag = 1.0 / drmag;
        let invhmean = 2.0 / (part.h + star.h);
        let paux = star.m * invhmean * invhmean * kern.wgrav(drmag * invhmean) * invdrmag;

        for d in 0..ndim {
            part.agrav[d] += paux * dr[d];
        }
        part.gpot += star.m * invhmean * kern.wpot(drmag * invhmean);
    }
}
