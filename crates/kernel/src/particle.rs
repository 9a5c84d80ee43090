//! Particle data structures and the store that owns them.
//!
//! Particles are stored as an array of structs: neighbour snapshots, ghost
//! cloning and tree permutation all copy whole particles, so the AoS layout
//! is the natural one here. Real particles occupy the prefix
//! `[0, nhydro)`; ghosts occupy the contiguous tail `[nhydro, nhydro +
//! nghost)` and are regenerated every rebuild cycle.

use crate::error::SimError;

/// Maximum length of the meshless-FV state vectors (rho, up to 3 velocity
/// components, pressure/energy).
pub const NVAR_MAX: usize = 5;

/// Index of density in the primitive/conservative vectors.
pub const IRHO: usize = 0;

/// Index of velocity component `k` in the primitive vector.
#[inline]
pub const fn ivel(k: usize) -> usize {
    1 + k
}

/// Index of pressure (primitive) / total energy (conservative).
#[inline]
pub const fn ipress(ndim: usize) -> usize {
    ndim + 1
}

/// Number of state variables for dimensionality `ndim`.
#[inline]
pub const fn nvar(ndim: usize) -> usize {
    ndim + 2
}

/// Particle species. Determines which interactions a particle takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticleType {
    /// Ordinary gas particle: hydro + gravity.
    Gas,
    /// Pressureless dust: gravity only.
    Dust,
    /// Collisionless dark matter: gravity only.
    Cdm,
    /// Removed from the simulation; skipped everywhere.
    Dead,
}

impl ParticleType {
    /// Does this species exert/feel hydrodynamic forces?
    pub fn hydro(self) -> bool {
        self == ParticleType::Gas
    }

    /// Does this species contribute to gravity?
    pub fn gravitates(self) -> bool {
        self != ParticleType::Dead
    }

    /// May `self` count `other` as a hydro neighbour?
    pub fn hydro_mask(self, other: ParticleType) -> bool {
        self.hydro() && other.hydro()
    }
}

/// What created a ghost particle. `Real` marks an original particle; every
/// other variant fixes the position/velocity transform exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GhostType {
    /// Not a ghost.
    Real,
    /// Periodic image across a face of dimension `dim`; `lhs` names the face
    /// the parent is near (the ghost sits beyond the opposite face).
    Periodic {
        /// Boundary dimension.
        dim: u8,
        /// Parent is near the lower face.
        lhs: bool,
    },
    /// Mirror image across a face of dimension `dim`.
    Mirror {
        /// Boundary dimension.
        dim: u8,
        /// Reflected about the lower face.
        lhs: bool,
    },
}

/// One fluid particle. Fields beyond the common block are only meaningful
/// for the dialect that owns them (grad-h SPH vs meshless FV).
#[derive(Debug, Clone)]
pub struct SphParticle {
    /// Stable particle id (index at creation time).
    pub id: usize,
    /// For ghosts: id of the real original. Equals `id` for real particles.
    pub iorig: usize,
    /// Species tag.
    pub ptype: ParticleType,
    /// Ghost transform tag.
    pub ghost: GhostType,
    /// Scheduled for update on the current sub-step.
    pub active: bool,

    /// Position.
    pub r: [f64; 3],
    /// Velocity.
    pub v: [f64; 3],
    /// Total acceleration (hydro + gravity for SPH).
    pub a: [f64; 3],
    /// Gravitational acceleration (kept separate for the FV dialect).
    pub agrav: [f64; 3],

    /// Mass.
    pub m: f64,
    /// Smoothing length.
    pub h: f64,
    /// 1 / h.
    pub invh: f64,
    /// 1 / h^d (kernel density normalization).
    pub hfactor: f64,
    /// Squared kernel interaction radius (kernrange * h)^2.
    pub hrangesqd: f64,

    /// Mass density.
    pub rho: f64,
    /// 1 / rho.
    pub invrho: f64,
    /// Number density n = sum_j W(r_ij, h_i).
    pub ndens: f64,
    /// Effective volume 1 / n.
    pub volume: f64,
    /// Grad-h correction factor Omega^-1.
    pub invomega: f64,
    /// Gravitational grad-h correction.
    pub zeta: f64,

    /// Specific internal energy.
    pub u: f64,
    /// du/dt from the energy equation.
    pub dudt: f64,
    /// Pressure from the EOS.
    pub press: f64,
    /// Sound speed from the EOS.
    pub sound: f64,

    /// Artificial-viscosity coefficient.
    pub alpha: f64,
    /// Rate of change of alpha (time-dependent viscosity schemes).
    pub dalphadt: f64,
    /// Velocity divergence.
    pub div_v: f64,
    /// Maximum signal velocity over neighbours.
    pub vsig_max: f64,

    /// Gravitational potential (positive convention: gpot = -Phi).
    pub gpot: f64,
    /// No neighbour within kernel range has a deeper potential.
    pub potmin: bool,
    /// Sink the particle is bound to, -1 if none.
    pub sink_id: i32,

    /// Block-timestep level (0 = coarsest).
    pub level: u32,
    /// Maximum level among interacting neighbours.
    pub levelneib: u32,
    /// Sub-step counter at the last synchronization point.
    pub nlast: u64,

    // ---- Meshless-FV state ----
    /// Primitive vector W = (rho, v, P).
    pub wprim: [f64; NVAR_MAX],
    /// Conservative vector Q = (m, p, E) over the particle volume.
    pub qcons: [f64; NVAR_MAX],
    /// Accumulated dQ/dt from Godunov fluxes.
    pub dqdt: [f64; NVAR_MAX],
    /// Gradient of each primitive variable.
    pub grad: [[f64; 3]; NVAR_MAX],
    /// Per-variable minimum over neighbours.
    pub wmin: [f64; NVAR_MAX],
    /// Per-variable maximum over neighbours.
    pub wmax: [f64; NVAR_MAX],
    /// Minimum midpoint-reconstructed value over neighbours.
    pub wmidmin: [f64; NVAR_MAX],
    /// Maximum midpoint-reconstructed value over neighbours.
    pub wmidmax: [f64; NVAR_MAX],
    /// Psi-factor B matrix (inverse of the kernel second-moment matrix E).
    pub b_matrix: [[f64; 3]; 3],

    // ---- Integrator saved state (beginning of the particle's step) ----
    /// Position at last sync.
    pub r0: [f64; 3],
    /// Velocity at last sync.
    pub v0: [f64; 3],
    /// Acceleration at last sync.
    pub a0: [f64; 3],
    /// Internal energy at last sync.
    pub u0: f64,
    /// du/dt at last sync.
    pub dudt0: f64,
    /// Conservative vector at last sync (FV dialect).
    pub q0: [f64; NVAR_MAX],
}

impl SphParticle {
    /// New gas particle at rest with unit smoothing state.
    pub fn new(id: usize) -> Self {
        Self {
            id,
            iorig: id,
            ptype: ParticleType::Gas,
            ghost: GhostType::Real,
            active: false,
            r: [0.0; 3],
            v: [0.0; 3],
            a: [0.0; 3],
            agrav: [0.0; 3],
            m: 0.0,
            h: 1.0,
            invh: 1.0,
            hfactor: 1.0,
            hrangesqd: 0.0,
            rho: 0.0,
            invrho: 0.0,
            ndens: 0.0,
            volume: 0.0,
            invomega: 1.0,
            zeta: 0.0,
            u: 0.0,
            dudt: 0.0,
            press: 0.0,
            sound: 0.0,
            alpha: 0.0,
            dalphadt: 0.0,
            div_v: 0.0,
            vsig_max: 0.0,
            gpot: 0.0,
            potmin: false,
            sink_id: -1,
            level: 0,
            levelneib: 0,
            nlast: 0,
            wprim: [0.0; NVAR_MAX],
            qcons: [0.0; NVAR_MAX],
            dqdt: [0.0; NVAR_MAX],
            grad: [[0.0; 3]; NVAR_MAX],
            wmin: [0.0; NVAR_MAX],
            wmax: [0.0; NVAR_MAX],
            wmidmin: [0.0; NVAR_MAX],
            wmidmax: [0.0; NVAR_MAX],
            b_matrix: [[0.0; 3]; 3],
            r0: [0.0; 3],
            v0: [0.0; 3],
            a0: [0.0; 3],
            u0: 0.0,
            dudt0: 0.0,
            q0: [0.0; NVAR_MAX],
        }
    }

    /// Is this particle a ghost?
    pub fn is_ghost(&self) -> bool {
        self.ghost != GhostType::Real
    }

    /// Refresh the derived smoothing-length fields from `h`.
    pub fn set_h(&mut self, h: f64, ndim: usize, kernrangesqd: f64) {
        self.h = h;
        self.invh = 1.0 / h;
        self.hfactor = self.invh.powi(ndim as i32);
        self.hrangesqd = kernrangesqd * h * h;
    }

    /// Kernel-gradient normalization 1 / h^(d+1).
    #[inline]
    pub fn hfactor_grad(&self, ndim: usize) -> f64 {
        self.invh.powi(ndim as i32 + 1)
    }
}

/// Owner of the particle array: real prefix plus reusable ghost tail.
#[derive(Debug, Clone)]
pub struct ParticleStore {
    parts: Vec<SphParticle>,
    /// Number of real (hydro) particles.
    pub nhydro: usize,
    /// Number of live ghosts in the tail.
    pub nghost: usize,
    /// Total slot capacity (real + ghost tail).
    pub nmax: usize,
}

impl ParticleStore {
    /// Create an empty store with room for `nmax` particles in total.
    pub fn new(nmax: usize) -> Self {
        Self { parts: Vec::with_capacity(nmax), nhydro: 0, nghost: 0, nmax }
    }

    /// Number of live particles (real + ghosts).
    pub fn ntot(&self) -> usize {
        self.nhydro + self.nghost
    }

    /// Slots left in the ghost tail.
    pub fn nghostmax(&self) -> usize {
        self.nmax - self.nhydro
    }

    /// Append a real particle. Only valid before any ghosts exist.
    pub fn push(&mut self, mut part: SphParticle) {
        assert_eq!(self.nghost, 0, "cannot add real particles once ghosts exist");
        part.id = self.parts.len();
        part.iorig = part.id;
        self.parts.push(part);
        self.nhydro += 1;
    }

    /// Discard all ghosts (start of a rebuild cycle).
    pub fn clear_ghosts(&mut self) {
        self.parts.truncate(self.nhydro);
        self.nghost = 0;
    }

    /// Append a ghost into the tail, failing when the tail is full.
    pub fn push_ghost(&mut self, ghost: SphParticle) -> Result<(), SimError> {
        if self.nghost + 1 > self.nghostmax() {
            return Err(SimError::GhostOverflow {
                nghost: self.nghost + 1,
                nghostmax: self.nghostmax(),
            });
        }
        self.parts.push(ghost);
        self.nghost += 1;
        Ok(())
    }

    /// All live particles.
    pub fn all(&self) -> &[SphParticle] {
        &self.parts
    }

    /// All live particles, mutable.
    pub fn all_mut(&mut self) -> &mut [SphParticle] {
        &mut self.parts
    }

    /// Real particles only.
    pub fn real(&self) -> &[SphParticle] {
        &self.parts[..self.nhydro]
    }

    /// Real particles only, mutable.
    pub fn real_mut(&mut self) -> &mut [SphParticle] {
        &mut self.parts[..self.nhydro]
    }

    /// Ghost tail.
    pub fn ghosts(&self) -> &[SphParticle] {
        &self.parts[self.nhydro..]
    }

    /// Number of active real particles.
    pub fn nactive(&self) -> usize {
        self.real().iter().filter(|p| p.active).count()
    }
}

impl std::ops::Index<usize> for ParticleStore {
    type Output = SphParticle;

    fn index(&self, i: usize) -> &SphParticle {
        &self.parts[i]
    }
}

impl std::ops::IndexMut<usize> for ParticleStore {
    fn index_mut(&mut self, i: usize) -> &mut SphParticle {
        &mut self.parts[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_vector_indices() {
        assert_eq!(IRHO, 0);
        assert_eq!(ivel(0), 1);
        assert_eq!(ivel(2), 3);
        assert_eq!(ipress(1), 2);
        assert_eq!(ipress(3), 4);
        assert_eq!(nvar(3), 5);
        assert!(nvar(3) <= NVAR_MAX);
    }

    #[test]
    fn store_real_and_ghost_partition() {
        let mut store = ParticleStore::new(4);
        store.push(SphParticle::new(0));
        store.push(SphParticle::new(0));
        assert_eq!(store.nhydro, 2);
        assert_eq!(store[1].id, 1);

        let mut ghost = store[0].clone();
        ghost.ghost = GhostType::Periodic { dim: 0, lhs: true };
        store.push_ghost(ghost).unwrap();
        assert_eq!(store.ntot(), 3);
        assert_eq!(store.ghosts().len(), 1);

        store.clear_ghosts();
        assert_eq!(store.ntot(), 2);
        assert!(store.ghosts().is_empty());
    }

    #[test]
    fn ghost_tail_overflow_reported() {
        let mut store = ParticleStore::new(2);
        store.push(SphParticle::new(0));
        store.push(SphParticle::new(0));
        let ghost = store[0].clone();
        let err = store.push_ghost(ghost).unwrap_err();
        assert!(matches!(err, SimError::GhostOverflow { .. }));
    }

    #[test]
    fn set_h_updates_derived_fields() {
        let mut p = SphParticle::new(0);
        p.set_h(0.5, 3, 4.0);
        assert_eq!(p.invh, 2.0);
        assert_eq!(p.hfactor, 8.0);
        assert_eq!(p.hrangesqd, 1.0);
        assert_eq!(p.hfactor_grad(3), 16.0);
    }

    #[test]
    fn type_masks() {
        assert!(ParticleType::Gas.hydro_mask(ParticleType::Gas));
        assert!(!ParticleType::Gas.hydro_mask(ParticleType::Cdm));
        assert!(ParticleType::Cdm.gravitates());
        assert!(!ParticleType::Dead.gravitates());
    }
}
