//! Simulation bounding box and per-face boundary policy.

use serde::{Deserialize, Serialize};

/// Boundary condition on a single box face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryKind {
    /// Particles leave freely; no ghosts.
    Open,
    /// Particles wrap to the opposite face; periodic ghosts.
    Periodic,
    /// Particles reflect; mirror ghosts with flipped normal velocity.
    Mirror,
}

impl BoundaryKind {
    /// A face is closed when it is periodic or mirror.
    pub fn is_closed(self) -> bool {
        self != BoundaryKind::Open
    }
}

/// Left-hand side of a dimension (the `boxmin` face).
pub const LHS: usize = 0;
/// Right-hand side of a dimension (the `boxmax` face).
pub const RHS: usize = 1;

/// Axis-aligned simulation domain with per-face boundary kinds.
#[derive(Debug, Clone)]
pub struct DomainBox {
    /// Spatial dimensionality (1, 2 or 3).
    pub ndim: usize,
    /// Lower box corner.
    pub boxmin: [f64; 3],
    /// Upper box corner.
    pub boxmax: [f64; 3],
    /// Extent per dimension.
    pub boxsize: [f64; 3],
    /// Half extent per dimension.
    pub boxhalf: [f64; 3],
    /// Boundary kind per `[dimension][side]`, side 0 = lhs face.
    pub bounds: [[BoundaryKind; 2]; 3],
    /// Apply the long-range periodic gravity correction.
    pub periodic_gravity: bool,
}

impl DomainBox {
    /// Build a domain box; boundary settings of non-spatial dimensions are
    /// ignored (forced open).
    pub fn new(
        ndim: usize,
        boxmin: [f64; 3],
        boxmax: [f64; 3],
        mut bounds: [[BoundaryKind; 2]; 3],
        periodic_gravity: bool,
    ) -> Self {
        let mut boxsize = [0.0; 3];
        let mut boxhalf = [0.0; 3];
        for d in 0..3 {
            boxsize[d] = boxmax[d] - boxmin[d];
            boxhalf[d] = 0.5 * boxsize[d];
            if d >= ndim {
                bounds[d] = [BoundaryKind::Open; 2];
            }
        }
        Self { ndim, boxmin, boxmax, boxsize, boxhalf, bounds, periodic_gravity }
    }

    /// True when either face of dimension `d` is periodic or mirror.
    pub fn closed(&self, d: usize) -> bool {
        self.bounds[d][LHS].is_closed() || self.bounds[d][RHS].is_closed()
    }

    /// True when any spatial dimension has a closed face.
    pub fn any_closed(&self) -> bool {
        (0..self.ndim).any(|d| self.closed(d))
    }

    /// True when all boundaries of dimension `d` are periodic.
    pub fn periodic(&self, d: usize) -> bool {
        self.bounds[d][LHS] == BoundaryKind::Periodic
            && self.bounds[d][RHS] == BoundaryKind::Periodic
    }

    /// Move a position/velocity pair back inside the box.
    ///
    /// One sweep over dimensions and sides: open faces do nothing, periodic
    /// faces translate by the box size, mirror faces reflect the position
    /// about the face and flip the normal velocity component.
    pub fn wrap_or_reflect(&self, r: &mut [f64; 3], v: &mut [f64; 3]) {
        for d in 0..self.ndim {
            if r[d] < self.boxmin[d] {
                match self.bounds[d][LHS] {
                    BoundaryKind::Open => {}
                    BoundaryKind::Periodic => r[d] += self.boxsize[d],
                    BoundaryKind::Mirror => {
                        r[d] = 2.0 * self.boxmin[d] - r[d];
                        v[d] = -v[d];
                    }
                }
            }
            if r[d] > self.boxmax[d] {
                match self.bounds[d][RHS] {
                    BoundaryKind::Open => {}
                    BoundaryKind::Periodic => r[d] -= self.boxsize[d],
                    BoundaryKind::Mirror => {
                        r[d] = 2.0 * self.boxmax[d] - r[d];
                        v[d] = -v[d];
                    }
                }
            }
        }
    }

    /// Nearest-image displacement `rj - ri` for fully periodic dimensions.
    pub fn nearest_image(&self, dr: &mut [f64; 3]) {
        for d in 0..self.ndim {
            if self.periodic(d) {
                if dr[d] > self.boxhalf[d] {
                    dr[d] -= self.boxsize[d];
                } else if dr[d] < -self.boxhalf[d] {
                    dr[d] += self.boxsize[d];
                }
            }
        }
    }
}
