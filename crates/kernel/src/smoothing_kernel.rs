//! Smoothing kernels, their derivatives, and softened-gravity companions.
//!
//! Every kernel is dimensionless in the scaled separation `s = r/h`:
//!
//! ```text
//! W(r, h)       = w0(s) / h^d
//! dW/dr         = w1(s) / h^(d+1)
//! dW/dh         = womega(s) / h^(d+1)
//! phi(r, h)     = -(m/h) * wpot(s)         (softened potential)
//! F(r, h)       = (m/h^2) * wgrav(s)       (softened radial force)
//! d phi / d h   = (m/h^2) * wzeta(s)
//! ```
//!
//! The identities `womega(s) = -d*w0(s) - s*w1(s)` and
//! `wzeta(s) = wpot(s) - s*wgrav(s)` follow from the chain rule and are used
//! as default implementations so the three kernels cannot drift out of
//! mutual consistency.
//!
//! Gravitational softening uses the 3-D normalized kernel shape for every
//! `ndim` (the self-gravity scenarios are three-dimensional; 1-D/2-D runs
//! are hydro-only in practice).

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Closed set of kernel families selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelKind {
    /// Cubic spline (M4), support radius 2h.
    M4,
    /// Quintic spline (M6), support radius 3h.
    Quintic,
    /// Gaussian truncated at 3h.
    Gaussian,
}

/// Dimensionless smoothing-kernel interface shared by all backends.
pub trait SmoothingKernel: Send + Sync {
    /// Spatial dimensionality this kernel was normalized for.
    fn ndim(&self) -> usize;

    /// Support radius in units of h.
    fn kernrange(&self) -> f64;

    /// Squared support radius.
    fn kernrangesqd(&self) -> f64 {
        self.kernrange() * self.kernrange()
    }

    /// Kernel value w0(s).
    fn w0(&self, s: f64) -> f64;

    /// Radial derivative w1(s) = d w0 / d s.
    fn w1(&self, s: f64) -> f64;

    /// h-derivative factor: dW/dh = womega(s) / h^(d+1).
    fn womega(&self, s: f64) -> f64 {
        -(self.ndim() as f64) * self.w0(s) - s * self.w1(s)
    }

    /// Softened gravitational force kernel (3-D form).
    fn wgrav(&self, s: f64) -> f64;

    /// Softened gravitational potential kernel (3-D form, positive).
    fn wpot(&self, s: f64) -> f64;

    /// h-derivative of the softened potential: wzeta = wpot - s * wgrav.
    fn wzeta(&self, s: f64) -> f64 {
        self.wpot(s) - s * self.wgrav(s)
    }

    /// w0 from the squared argument; hot-loop entry point that tabulated
    /// backends override with an s^2-indexed table (no sqrt).
    fn w0_s2(&self, ssqd: f64) -> f64 {
        self.w0(ssqd.sqrt())
    }

    /// womega from the squared argument.
    fn womega_s2(&self, ssqd: f64) -> f64 {
        self.womega(ssqd.sqrt())
    }

    /// wzeta from the squared argument.
    fn wzeta_s2(&self, ssqd: f64) -> f64 {
        self.wzeta(ssqd.sqrt())
    }
}

/// Construct the configured kernel, optionally wrapped in lookup tables.
pub fn make_kernel(kind: KernelKind, ndim: usize, tabulated: bool) -> Box<dyn SmoothingKernel> {
    let base: Box<dyn SmoothingKernel> = match kind {
        KernelKind::M4 => Box::new(M4Kernel::new(ndim)),
        KernelKind::Quintic => Box::new(QuinticKernel::new(ndim)),
        KernelKind::Gaussian => Box::new(GaussianKernel::new(ndim)),
    };
    if tabulated {
        Box::new(TabulatedKernel::new(base, TABLE_SIZE))
    } else {
        base
    }
}

const TABLE_SIZE: usize = 1000;

// ---------------------------------------------------------------------------
// M4 cubic spline
// ---------------------------------------------------------------------------

/// Cubic-spline (M4) kernel with support radius 2h.
///
/// The gravitational companions are the classic closed-form cubic-spline
/// softening polynomials; `wpot' = -wgrav` holds piecewise.
pub struct M4Kernel {
    ndim: usize,
    norm: f64,
}

impl M4Kernel {
    /// Normalization constant for dimension `d` in {1, 2, 3}.
    fn norm_for(ndim: usize) -> f64 {
        match ndim {
            1 => 2.0 / 3.0,
            2 => 10.0 / (7.0 * PI),
            _ => 1.0 / PI,
        }
    }

    /// Create an M4 kernel normalized for `ndim` dimensions.
    pub fn new(ndim: usize) -> Self {
        Self { ndim, norm: Self::norm_for(ndim) }
    }
}

impl SmoothingKernel for M4Kernel {
    fn ndim(&self) -> usize {
        self.ndim
    }

    fn kernrange(&self) -> f64 {
        2.0
    }

    fn w0(&self, s: f64) -> f64 {
        if s < 1.0 {
            self.norm * (1.0 - 1.5 * s * s + 0.75 * s * s * s)
        } else if s < 2.0 {
            let t = 2.0 - s;
            self.norm * 0.25 * t * t * t
        } else {
            0.0
        }
    }

    fn w1(&self, s: f64) -> f64 {
        if s < 1.0 {
            self.norm * (-3.0 * s + 2.25 * s * s)
        } else if s < 2.0 {
            let t = 2.0 - s;
            -self.norm * 0.75 * t * t
        } else {
            0.0
        }
    }

    fn wgrav(&self, s: f64) -> f64 {
        if s < 1.0 {
            s * (4.0 / 3.0 - 1.2 * s * s + 0.5 * s * s * s)
        } else if s < 2.0 {
            8.0 / 3.0 * s - 3.0 * s * s + 1.2 * s * s * s - s * s * s * s / 6.0
                - 1.0 / (15.0 * s * s)
        } else {
            1.0 / (s * s)
        }
    }

    fn wpot(&self, s: f64) -> f64 {
        if s < 1.0 {
            let s2 = s * s;
            1.4 - 2.0 / 3.0 * s2 + 0.3 * s2 * s2 - 0.1 * s2 * s2 * s
        } else if s < 2.0 {
            let s2 = s * s;
            -1.0 / (15.0 * s) + 1.6 - 4.0 / 3.0 * s2 + s2 * s - 0.3 * s2 * s2
                + s2 * s2 * s / 30.0
        } else {
            1.0 / s
        }
    }
}

// ---------------------------------------------------------------------------
// Quintic (M6) spline
// ---------------------------------------------------------------------------

/// Quintic-spline (M6) kernel with support radius 3h.
///
/// No closed-form softening polynomials are kept for this family; the
/// gravitational companions come from a quadrature table built once at
/// construction (see [`GravTable`]).
pub struct QuinticKernel {
    ndim: usize,
    norm: f64,
    grav: GravTable,
}

impl QuinticKernel {
    fn norm_for(ndim: usize) -> f64 {
        match ndim {
            1 => 1.0 / 120.0,
            2 => 7.0 / (478.0 * PI),
            _ => 1.0 / (120.0 * PI),
        }
    }

    fn shape(s: f64) -> f64 {
        let mut w = 0.0;
        if s < 3.0 {
            let t = 3.0 - s;
            w += t * t * t * t * t;
        }
        if s < 2.0 {
            let t = 2.0 - s;
            w -= 6.0 * t * t * t * t * t;
        }
        if s < 1.0 {
            let t = 1.0 - s;
            w += 15.0 * t * t * t * t * t;
        }
        w
    }

    fn shape_deriv(s: f64) -> f64 {
        let mut w = 0.0;
        if s < 3.0 {
            let t = 3.0 - s;
            w -= 5.0 * t * t * t * t;
        }
        if s < 2.0 {
            let t = 2.0 - s;
            w += 30.0 * t * t * t * t;
        }
        if s < 1.0 {
            let t = 1.0 - s;
            w -= 75.0 * t * t * t * t;
        }
        w
    }

    /// Create an M6 quintic kernel normalized for `ndim` dimensions.
    pub fn new(ndim: usize) -> Self {
        let norm3d = Self::norm_for(3);
        let grav = GravTable::build(|s| norm3d * Self::shape(s), 3.0);
        Self { ndim, norm: Self::norm_for(ndim), grav }
    }
}

impl SmoothingKernel for QuinticKernel {
    fn ndim(&self) -> usize {
        self.ndim
    }

    fn kernrange(&self) -> f64 {
        3.0
    }

    fn w0(&self, s: f64) -> f64 {
        if s < 3.0 {
            self.norm * Self::shape(s)
        } else {
            0.0
        }
    }

    fn w1(&self, s: f64) -> f64 {
        if s < 3.0 {
            self.norm * Self::shape_deriv(s)
        } else {
            0.0
        }
    }

    fn wgrav(&self, s: f64) -> f64 {
        self.grav.wgrav(s)
    }

    fn wpot(&self, s: f64) -> f64 {
        self.grav.wpot(s)
    }
}

// ---------------------------------------------------------------------------
// Truncated Gaussian
// ---------------------------------------------------------------------------

/// Gaussian kernel truncated at 3h.
///
/// The mass beyond the truncation radius is below 1e-4 of the total and is
/// ignored rather than re-normalized.
pub struct GaussianKernel {
    ndim: usize,
    norm: f64,
    grav: GravTable,
}

impl GaussianKernel {
    fn norm_for(ndim: usize) -> f64 {
        PI.powf(-(ndim as f64) / 2.0)
    }

    /// Create a truncated-Gaussian kernel normalized for `ndim` dimensions.
    pub fn new(ndim: usize) -> Self {
        let norm3d = Self::norm_for(3);
        let grav = GravTable::build(move |s| norm3d * (-s * s).exp(), 3.0);
        Self { ndim, norm: Self::norm_for(ndim), grav }
    }
}

impl SmoothingKernel for GaussianKernel {
    fn ndim(&self) -> usize {
        self.ndim
    }

    fn kernrange(&self) -> f64 {
        3.0
    }

    fn w0(&self, s: f64) -> f64 {
        if s < 3.0 {
            self.norm * (-s * s).exp()
        } else {
            0.0
        }
    }

    fn w1(&self, s: f64) -> f64 {
        if s < 3.0 {
            -2.0 * s * self.norm * (-s * s).exp()
        } else {
            0.0
        }
    }

    fn wgrav(&self, s: f64) -> f64 {
        self.grav.wgrav(s)
    }

    fn wpot(&self, s: f64) -> f64 {
        self.grav.wpot(s)
    }
}

// ---------------------------------------------------------------------------
// Quadrature-built softening table
// ---------------------------------------------------------------------------

/// Softened-gravity force/potential table built by integrating a 3-D
/// normalized kernel shape:
///
/// ```text
/// M(s)     = 4 pi  int_0^s  u^2 w0(u) du        (enclosed mass, -> 1)
/// wgrav(s) = M(s) / s^2
/// wpot(s)  = M(s) / s  +  4 pi int_s^R u w0(u) du
/// ```
///
/// Beyond the support radius both reduce to the Newtonian 1/s^2 and 1/s.
struct GravTable {
    range: f64,
    ds: f64,
    wgrav: Vec<f64>,
    wpot: Vec<f64>,
}

impl GravTable {
    fn build(w0_3d: impl Fn(f64) -> f64, range: f64) -> Self {
        let n = 2048usize;
        let ds = range / (n - 1) as f64;

        // Cumulative enclosed mass by the trapezoid rule.
        let mut mass = vec![0.0f64; n];
        for i in 1..n {
            let s0 = (i - 1) as f64 * ds;
            let s1 = i as f64 * ds;
            let f0 = 4.0 * PI * s0 * s0 * w0_3d(s0);
            let f1 = 4.0 * PI * s1 * s1 * w0_3d(s1);
            mass[i] = mass[i - 1] + 0.5 * (f0 + f1) * ds;
        }

        // Outer potential tail, integrated inward.
        let mut tail = vec![0.0f64; n];
        for i in (0..n - 1).rev() {
            let s0 = i as f64 * ds;
            let s1 = (i + 1) as f64 * ds;
            let f0 = 4.0 * PI * s0 * w0_3d(s0);
            let f1 = 4.0 * PI * s1 * w0_3d(s1);
            tail[i] = tail[i + 1] + 0.5 * (f0 + f1) * ds;
        }

        let mut wgrav = vec![0.0f64; n];
        let mut wpot = vec![0.0f64; n];
        wpot[0] = tail[0];
        for i in 1..n {
            let s = i as f64 * ds;
            wgrav[i] = mass[i] / (s * s);
            wpot[i] = mass[i] / s + tail[i];
        }

        Self { range, ds, wgrav, wpot }
    }

    fn wgrav(&self, s: f64) -> f64 {
        if s >= self.range {
            return 1.0 / (s * s);
        }
        interp(&self.wgrav, s, self.ds)
    }

    fn wpot(&self, s: f64) -> f64 {
        if s >= self.range {
            return 1.0 / s;
        }
        interp(&self.wpot, s, self.ds)
    }
}

#[inline]
fn interp(table: &[f64], x: f64, dx: f64) -> f64 {
    let fidx = (x / dx).max(0.0);
    let i = (fidx as usize).min(table.len() - 2);
    let frac = fidx - i as f64;
    table[i] * (1.0 - frac) + table[i + 1] * frac
}

// ---------------------------------------------------------------------------
// Tabulated wrapper
// ---------------------------------------------------------------------------

/// Lookup-table wrapper around any kernel backend.
///
/// Builds linearly interpolated tables in `s` for every kernel function and
/// an s^2-indexed table for the hot `_s2` entry points so the inner loops
/// avoid the square root entirely.
pub struct TabulatedKernel {
    ndim: usize,
    range: f64,
    ds: f64,
    dssqd: f64,
    w0: Vec<f64>,
    w1: Vec<f64>,
    womega: Vec<f64>,
    wgrav: Vec<f64>,
    wpot: Vec<f64>,
    wzeta: Vec<f64>,
    w0_s2: Vec<f64>,
    womega_s2: Vec<f64>,
    wzeta_s2: Vec<f64>,
}

impl TabulatedKernel {
    /// Tabulate `inner` with `n` samples per table.
    pub fn new(inner: Box<dyn SmoothingKernel>, n: usize) -> Self {
        let range = inner.kernrange();
        let ds = range / (n - 1) as f64;
        let dssqd = range * range / (n - 1) as f64;
        let sample = |f: &dyn Fn(f64) -> f64, dx: f64| -> Vec<f64> {
            (0..n).map(|i| f(i as f64 * dx)).collect()
        };
        Self {
            ndim: inner.ndim(),
            range,
            ds,
            dssqd,
            w0: sample(&|s| inner.w0(s), ds),
            w1: sample(&|s| inner.w1(s), ds),
            womega: sample(&|s| inner.womega(s), ds),
            wgrav: sample(&|s| inner.wgrav(s), ds),
            wpot: sample(&|s| inner.wpot(s), ds),
            wzeta: sample(&|s| inner.wzeta(s), ds),
            w0_s2: sample(&|s2| inner.w0(s2.sqrt()), dssqd),
            womega_s2: sample(&|s2| inner.womega(s2.sqrt()), dssqd),
            wzeta_s2: sample(&|s2| inner.wzeta(s2.sqrt()), dssqd),
        }
    }
}

impl SmoothingKernel for TabulatedKernel {
    fn ndim(&self) -> usize {
        self.ndim
    }

    fn kernrange(&self) -> f64 {
        self.range
    }

    fn w0(&self, s: f64) -> f64 {
        if s >= self.range {
            return 0.0;
        }
        interp(&self.w0, s, self.ds)
    }

    fn w1(&self, s: f64) -> f64 {
        if s >= self.range {
            return 0.0;
        }
        interp(&self.w1, s, self.ds)
    }

    fn womega(&self, s: f64) -> f64 {
        if s >= self.range {
            return 0.0;
        }
        interp(&self.womega, s, self.ds)
    }

    fn wgrav(&self, s: f64) -> f64 {
        if s >= self.range {
            return 1.0 / (s * s);
        }
        interp(&self.wgrav, s, self.ds)
    }

    fn wpot(&self, s: f64) -> f64 {
        if s >= self.range {
            return 1.0 / s;
        }
        interp(&self.wpot, s, self.ds)
    }

    fn wzeta(&self, s: f64) -> f64 {
        // wpot - s*wgrav cancels exactly beyond the support radius.
        if s >= self.range {
            return 0.0;
        }
        interp(&self.wzeta, s, self.ds)
    }

    fn w0_s2(&self, ssqd: f64) -> f64 {
        if ssqd >= self.range * self.range {
            return 0.0;
        }
        interp(&self.w0_s2, ssqd, self.dssqd)
    }

    fn womega_s2(&self, ssqd: f64) -> f64 {
        if ssqd >= self.range * self.range {
            return 0.0;
        }
        interp(&self.womega_s2, ssqd, self.dssqd)
    }

    fn wzeta_s2(&self, ssqd: f64) -> f64 {
        if ssqd >= self.range * self.range {
            return 0.0;
        }
        interp(&self.wzeta_s2, ssqd, self.dssqd)
    }
}
