//! SIREN simulation kernel
//!
//! Compute core of a Lagrangian astrophysical fluid + self-gravity engine:
//! smoothed-particle and meshless-finite-volume hydrodynamics over a
//! balanced KD tree, with block-timestep symplectic integration and
//! tree-accelerated self-gravity.
//!
//! # Modules
//! - [`particle`] -- Particle state and the store with its ghost tail.
//! - [`domain`] -- Box geometry and per-face boundary policy.
//! - [`smoothing_kernel`] -- Kernels, derivatives and softened gravity.
//! - [`ghost`] -- Ghost replication for periodic/mirror boundaries.
//! - [`tree`] -- KD tree: build, stock, gather/scatter/gravity walks.
//! - [`neighbor`] -- Per-worker neighbour buffers with overflow-doubling.
//! - [`smoothing`] -- The h <-> density fixed-point solver.
//! - [`sph`] -- Grad-h SPH force kernels.
//! - [`mfv`] -- Meshless-FV reconstruction and Godunov fluxes.
//! - [`riemann`] -- HLLC solver for the ideal-gas Euler equations.
//! - [`gravity`] -- Pair/direct/cell gravity and the Ewald hook.
//! - [`eos`] -- Equations of state.
//! - [`integrator`] -- Block timesteps, leapfrog and RK2 schemes.
//! - [`phases`] -- Parallel sweeps over active cells.
//! - [`nbody`] -- Star particles and the N-body collaborator.
//! - [`diagnostics`] -- Conserved-quantity bookkeeping.
//! - [`error`] -- Error kinds and exit codes.

#![warn(missing_docs)]

pub mod diagnostics;
pub mod domain;
pub mod eos;
pub mod error;
pub mod ewald;
pub mod ghost;
pub mod gravity;
pub mod integrator;
pub mod mfv;
pub mod nbody;
pub mod neighbor;
pub mod particle;
pub mod phases;
pub mod riemann;
pub mod smoothing;
pub mod smoothing_kernel;
pub mod sph;
pub mod tree;
pub mod vec;

pub use diagnostics::Diagnostics;
pub use domain::{BoundaryKind, DomainBox};
pub use error::{DiagnosticRecord, SimError};
pub use integrator::{BlockTimesteps, IntegrationScheme, TimestepParams};
pub use nbody::{DirectNbody, NbodyIntegrator, StarParticle};
pub use particle::{GhostType, ParticleStore, ParticleType, SphParticle};
pub use phases::{Dialect, Engine, MacKind, MultipoleKind};
pub use smoothing_kernel::{make_kernel, KernelKind, SmoothingKernel};
pub use tree::KdTree;
