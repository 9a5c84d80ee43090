//! Configuration parsing and validation.
//!
//! The parameter file is a flat JSON object of simulation keys. Unknown keys
//! are rejected at parse time; closed-set algorithm tokens are enums, so an
//! unknown token is rejected there too. `validate()` cross-checks the
//! remaining constraints (boundary/ndim consistency, dialect/integration
//! pairing, positivity of physical parameters).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use kernel::domain::BoundaryKind;
use kernel::eos::Eos;
use kernel::integrator::IntegrationScheme;
use kernel::phases::{Dialect, MacKind, MultipoleKind};
use kernel::smoothing_kernel::KernelKind;
use kernel::sph::{AcondKind, AviscKind};
use kernel::{DomainBox, SimError};

/// Simulation family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimKind {
    /// Particle hydrodynamics (SPH or meshless FV per the `sph` key).
    Sph,
    /// Meshless finite volume (alias accepted for clarity).
    Mfv,
}

/// Initial-condition generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IcKind {
    /// Uniform random positions in the box.
    RandomBox,
    /// Regular lattice filling the box.
    LatticeBox,
    /// Two-state Riemann problem along x.
    Shocktube,
    /// Kelvin-Helmholtz two-stream setup (2-D).
    Khi,
    /// Plummer sphere of gas and stars (3-D).
    Plummer,
}

/// Gas equation of state token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EosKind {
    /// Ideal gamma-law gas with an evolved energy equation.
    EnergyEqn,
    /// Fixed sound speed.
    Isothermal,
    /// Density-stiffened barotrope.
    Barotropic,
}

/// Hydrodynamics dialect token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SphKind {
    /// Grad-h SPH.
    Gradh,
    /// Saitoh & Makino (2012) SPH; shares the grad-h pipeline here.
    Sm2012,
    /// Meshless finite mass (zero face mass flux).
    MfvMm,
    /// Meshless finite volume with the Runge-Kutta predictor.
    MfvRk,
}

/// Artificial-viscosity token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AviscToken {
    /// Disabled.
    None,
    /// Monaghan (1997).
    Mon97,
}

/// Artificial-conductivity token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcondToken {
    /// Disabled.
    None,
    /// Wadsley et al. (2008).
    Wadsley,
}

/// Time-integration token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationToken {
    /// Leapfrog kick-drift-kick.
    Lfkdk,
    /// Leapfrog drift-kick-drift.
    Lfdkd,
    /// Two-stage Runge-Kutta.
    Rk,
}

/// Neighbour-search backend token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NeibSearchKind {
    /// Balanced KD tree.
    Kdtree,
    /// Octree (not built into this binary).
    Octtree,
    /// Brute force: a single-leaf tree over all particles.
    Brute,
}

/// Gravity MAC token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GravityMacKind {
    /// Geometric opening angle.
    Geometric,
    /// Potential-scaled ("eigen") opening angle.
    Eigenmac,
}

/// Cell-multipole token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultipoleToken {
    /// Per-particle monopole.
    Monopole,
    /// Per-particle monopole + quadrupole.
    Quadrupole,
    /// Linearized monopole field per cell.
    FastMonopole,
    /// Fast monopole + quadrupole at the cell centre.
    FastQuadrupole,
}

/// The full simulation parameter set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimConfig {
    /// Run identifier, used for snapshot file names.
    pub run_id: String,
    /// Simulation family.
    pub sim: SimKind,
    /// Initial-condition generator.
    pub ic: IcKind,
    /// Spatial dimensionality, 1..=3.
    pub ndim: usize,

    /// Number of fluid particles.
    #[serde(rename = "Nhydro")]
    pub nhydro: usize,
    /// Number of star particles.
    #[serde(rename = "Nstar", default)]
    pub nstar: usize,
    /// Total particle slots including the ghost tail; 0 selects an automatic
    /// multiple of Nhydro.
    #[serde(rename = "Nhydromax", default)]
    pub nhydromax: usize,

    /// End time.
    pub tend: f64,
    /// Time of the first snapshot.
    #[serde(default)]
    pub tsnapfirst: f64,
    /// Snapshot interval; 0 disables time-based snapshots.
    #[serde(default)]
    pub dt_snap: f64,
    /// Step-based snapshot cadence; 0 disables it.
    #[serde(default)]
    pub noutputstep: u64,
    /// Diagnostic log cadence in sub-steps.
    #[serde(default = "default_ndiagstep")]
    pub ndiagstep: u64,
    /// Hard cap on the number of sub-steps.
    #[serde(rename = "Nstepsmax", default = "default_nstepsmax")]
    pub nstepsmax: u64,

    /// Hydrodynamic forces on/off.
    #[serde(default = "default_one")]
    pub hydro_forces: i32,
    /// Self-gravity on/off.
    #[serde(default)]
    pub self_gravity: i32,

    /// Gas equation of state.
    #[serde(default = "default_eos")]
    pub gas_eos: EosKind,
    /// Ratio of specific heats.
    #[serde(default = "default_gamma")]
    pub gamma_eos: f64,
    /// Isothermal/barotropic sound speed.
    #[serde(default = "default_one_f")]
    pub sound0: f64,
    /// Barotropic stiffening density.
    #[serde(default = "default_one_f")]
    pub rho_bary: f64,

    /// Hydrodynamics dialect.
    pub sph: SphKind,
    /// Smoothing-length proportionality factor.
    #[serde(default = "default_h_fac")]
    pub h_fac: f64,
    /// Relative h convergence tolerance.
    #[serde(default = "default_h_converge")]
    pub h_converge: f64,
    /// Lower h bound inside sinks.
    #[serde(default)]
    pub hmin_sink: f64,

    /// Smoothing-kernel family.
    pub kernel: KernelKind,
    /// Use table lookups for the kernel.
    #[serde(default)]
    pub tabulated_kernel: i32,

    /// Artificial-viscosity scheme.
    #[serde(default = "default_avisc")]
    pub avisc: AviscToken,
    /// Artificial-conductivity scheme.
    #[serde(default = "default_acond")]
    pub acond: AcondToken,
    /// Linear viscosity coefficient.
    #[serde(default = "default_one_f")]
    pub alpha_visc: f64,
    /// Quadratic viscosity coefficient.
    #[serde(default = "default_beta")]
    pub beta_visc: f64,

    /// Time-integration scheme.
    #[serde(default = "default_integration")]
    pub sph_integration: IntegrationToken,
    /// Courant timestep multiplier.
    #[serde(default = "default_courant")]
    pub courant_mult: f64,
    /// Acceleration timestep multiplier.
    #[serde(default = "default_accel")]
    pub accel_mult: f64,
    /// Energy timestep multiplier.
    #[serde(default = "default_energy")]
    pub energy_mult: f64,
    /// Force all fluid particles onto the minimum timestep level.
    #[serde(default)]
    pub sph_single_timestep: i32,
    /// Number of block-timestep levels.
    #[serde(rename = "Nlevels", default = "default_one_u32")]
    pub nlevels: u32,

    /// Neighbour-search backend.
    #[serde(default = "default_neib_search")]
    pub neib_search: NeibSearchKind,
    /// Maximum particles per tree leaf.
    #[serde(rename = "Nleafmax", default = "default_nleafmax")]
    pub nleafmax: usize,
    /// Sub-steps between full tree rebuilds (re-stock otherwise).
    #[serde(default = "default_ntreebuildstep")]
    pub ntreebuildstep: u64,
    /// Squared opening angle for the gravity MAC.
    #[serde(default = "default_thetamaxsqd")]
    pub thetamaxsqd: f64,
    /// Gravity MAC flavour.
    #[serde(default = "default_mac")]
    pub gravity_mac: GravityMacKind,
    /// Cell-multipole expansion order.
    #[serde(default = "default_multipole")]
    pub multipole: MultipoleToken,

    /// Positivity floor on reconstructed density (FV dialect); absent means
    /// violations are fatal.
    #[serde(default)]
    pub rho_floor: Option<f64>,
    /// Positivity floor on reconstructed pressure.
    #[serde(default)]
    pub press_floor: Option<f64>,

    /// Lower box corner.
    #[serde(default)]
    pub x_boxmin: f64,
    /// Upper box corner.
    #[serde(default = "default_one_f")]
    pub x_boxmax: f64,
    /// Lower box corner.
    #[serde(default)]
    pub y_boxmin: f64,
    /// Upper box corner.
    #[serde(default = "default_one_f")]
    pub y_boxmax: f64,
    /// Lower box corner.
    #[serde(default)]
    pub z_boxmin: f64,
    /// Upper box corner.
    #[serde(default = "default_one_f")]
    pub z_boxmax: f64,

    /// Boundary kind on the lower x face.
    #[serde(default = "default_open")]
    pub x_boundary_lhs: BoundaryKind,
    /// Boundary kind on the upper x face.
    #[serde(default = "default_open")]
    pub x_boundary_rhs: BoundaryKind,
    /// Boundary kind on the lower y face.
    #[serde(default = "default_open")]
    pub y_boundary_lhs: BoundaryKind,
    /// Boundary kind on the upper y face.
    #[serde(default = "default_open")]
    pub y_boundary_rhs: BoundaryKind,
    /// Boundary kind on the lower z face.
    #[serde(default = "default_open")]
    pub z_boundary_lhs: BoundaryKind,
    /// Boundary kind on the upper z face.
    #[serde(default = "default_open")]
    pub z_boundary_rhs: BoundaryKind,

    // ---- Initial-condition parameters ----
    /// RNG seed for the stochastic generators.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Left-state density (shock tube) or ambient density.
    #[serde(default = "default_one_f")]
    pub rhofluid1: f64,
    /// Right-state / stream density.
    #[serde(default = "default_one_f")]
    pub rhofluid2: f64,
    /// Left-state pressure.
    #[serde(default = "default_one_f")]
    pub press1: f64,
    /// Right-state pressure.
    #[serde(default = "default_one_f")]
    pub press2: f64,
    /// Left-state x velocity.
    #[serde(default)]
    pub vfluid1: f64,
    /// Right-state x velocity.
    #[serde(default)]
    pub vfluid2: f64,
    /// Perturbation amplitude (KHI).
    #[serde(default = "default_amp")]
    pub amp: f64,
    /// Perturbation wavelength (KHI).
    #[serde(default = "default_half")]
    pub lambda: f64,
    /// Total Plummer mass.
    #[serde(default = "default_one_f")]
    pub mplummer: f64,
    /// Plummer scale radius.
    #[serde(default = "default_one_f")]
    pub rplummer: f64,
    /// Gas mass fraction of the Plummer sphere.
    #[serde(default = "default_half")]
    pub gasfrac: f64,
}

fn default_one() -> i32 {
    1
}
fn default_one_f() -> f64 {
    1.0
}
fn default_one_u32() -> u32 {
    1
}
fn default_half() -> f64 {
    0.5
}
fn default_ndiagstep() -> u64 {
    16
}
fn default_nstepsmax() -> u64 {
    u64::MAX
}
fn default_eos() -> EosKind {
    EosKind::EnergyEqn
}
fn default_gamma() -> f64 {
    5.0 / 3.0
}
fn default_h_fac() -> f64 {
    1.2
}
fn default_h_converge() -> f64 {
    1.0e-3
}
fn default_avisc() -> AviscToken {
    AviscToken::Mon97
}
fn default_acond() -> AcondToken {
    AcondToken::None
}
fn default_beta() -> f64 {
    2.0
}
fn default_integration() -> IntegrationToken {
    IntegrationToken::Lfkdk
}
fn default_courant() -> f64 {
    0.2
}
fn default_accel() -> f64 {
    0.3
}
fn default_energy() -> f64 {
    0.4
}
fn default_neib_search() -> NeibSearchKind {
    NeibSearchKind::Kdtree
}
fn default_nleafmax() -> usize {
    8
}
fn default_ntreebuildstep() -> u64 {
    8
}
fn default_thetamaxsqd() -> f64 {
    0.15
}
fn default_mac() -> GravityMacKind {
    GravityMacKind::Geometric
}
fn default_multipole() -> MultipoleToken {
    MultipoleToken::Quadrupole
}
fn default_open() -> BoundaryKind {
    BoundaryKind::Open
}
fn default_seed() -> u64 {
    1
}
fn default_amp() -> f64 {
    0.025
}

impl SimConfig {
    /// Load and validate a parameter file.
    pub fn load(path: &Path) -> Result<Self, SimError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| SimError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: SimConfig = serde_json::from_str(&contents)
            .map_err(|e| SimError::Config(format!("parameter file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from an in-memory JSON string (tests, embedding).
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        let config: SimConfig = serde_json::from_str(json)
            .map_err(|e| SimError::Config(format!("parameter file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field consistency checks.
    pub fn validate(&self) -> Result<(), SimError> {
        let err = |msg: String| Err(SimError::Config(msg));

        if !(1..=3).contains(&self.ndim) {
            return err(format!("ndim must be 1, 2 or 3, got {}", self.ndim));
        }
        if self.nhydro == 0 {
            return err("Nhydro must be positive".into());
        }
        if self.tend <= 0.0 {
            return err("tend must be positive".into());
        }
        if self.gamma_eos <= 1.0 {
            return err(format!("gamma_eos must exceed 1, got {}", self.gamma_eos));
        }
        if self.h_fac <= 0.0 || self.h_converge <= 0.0 {
            return err("h_fac and h_converge must be positive".into());
        }
        if self.courant_mult <= 0.0 || self.courant_mult > 1.0 {
            return err(format!("courant_mult must be in (0, 1], got {}", self.courant_mult));
        }
        if self.accel_mult <= 0.0 || self.energy_mult <= 0.0 {
            return err("accel_mult and energy_mult must be positive".into());
        }
        if self.nlevels == 0 || self.nlevels > 20 {
            return err(format!("Nlevels must be in 1..=20, got {}", self.nlevels));
        }
        if self.nleafmax == 0 {
            return err("Nleafmax must be positive".into());
        }
        if self.thetamaxsqd < 0.0 {
            return err("thetamaxsqd must be non-negative".into());
        }

        for (d, (lo, hi)) in [
            (self.x_boxmin, self.x_boxmax),
            (self.y_boxmin, self.y_boxmax),
            (self.z_boxmin, self.z_boxmax),
        ]
        .into_iter()
        .enumerate()
        {
            if d < self.ndim && lo >= hi {
                return err(format!("box extent inverted in dimension {d}"));
            }
        }

        // Periodic faces must pair up; mirror and open faces may mix.
        for (name, lhs, rhs) in [
            ("x", self.x_boundary_lhs, self.x_boundary_rhs),
            ("y", self.y_boundary_lhs, self.y_boundary_rhs),
            ("z", self.z_boundary_lhs, self.z_boundary_rhs),
        ] {
            if (lhs == BoundaryKind::Periodic) != (rhs == BoundaryKind::Periodic) {
                return err(format!("periodic boundaries must be paired in {name}"));
            }
        }

        match self.neib_search {
            NeibSearchKind::Kdtree | NeibSearchKind::Brute => {}
            NeibSearchKind::Octtree => {
                return err("octtree neighbour search is not built into this binary".into())
            }
        }

        // Dialect / integration pairing.
        match self.sph {
            SphKind::Gradh | SphKind::Sm2012 => {
                if self.sph_integration == IntegrationToken::Rk {
                    return err("rk integration is reserved for the mfv dialects".into());
                }
                if self.sph_integration == IntegrationToken::Lfdkd
                    && self.nlevels > 1
                    && self.sph_single_timestep == 0
                {
                    return err("lfdkd requires a global timestep (Nlevels=1 or \
                                sph_single_timestep=1)"
                        .into());
                }
            }
            SphKind::MfvMm | SphKind::MfvRk => {
                if self.sph_integration != IntegrationToken::Rk {
                    return err("mfv dialects require sph_integration=rk".into());
                }
            }
        }

        if self.ic == IcKind::Khi && self.ndim != 2 {
            return err("khi initial conditions are two-dimensional".into());
        }
        if self.ic == IcKind::Plummer && self.ndim != 3 {
            return err("plummer initial conditions are three-dimensional".into());
        }
        if self.ic == IcKind::Shocktube && self.ndim != 1 {
            return err("shocktube initial conditions are one-dimensional".into());
        }
        if self.nstar > 0 && self.ic != IcKind::Plummer {
            return err("star particles are only generated by the plummer IC".into());
        }

        Ok(())
    }

    /// Total particle capacity including the ghost tail.
    pub fn capacity(&self) -> usize {
        if self.nhydromax > self.nhydro {
            self.nhydromax
        } else {
            // Room for images of every face, edge and corner region.
            4 * self.nhydro
        }
    }

    /// Domain box with the per-face boundary kinds; the periodic-gravity
    /// flag is set for self-gravitating fully periodic runs.
    pub fn simbox(&self) -> DomainBox {
        let bounds = [
            [self.x_boundary_lhs, self.x_boundary_rhs],
            [self.y_boundary_lhs, self.y_boundary_rhs],
            [self.z_boundary_lhs, self.z_boundary_rhs],
        ];
        let all_periodic = (0..self.ndim).all(|d| {
            bounds[d][0] == BoundaryKind::Periodic && bounds[d][1] == BoundaryKind::Periodic
        });
        DomainBox::new(
            self.ndim,
            [self.x_boxmin, self.y_boxmin, self.z_boxmin],
            [self.x_boxmax, self.y_boxmax, self.z_boxmax],
            bounds,
            self.self_gravity != 0 && all_periodic,
        )
    }

    /// Concrete EOS object.
    pub fn eos(&self) -> Eos {
        match self.gas_eos {
            EosKind::EnergyEqn => Eos::EnergyEqn { gamma: self.gamma_eos },
            EosKind::Isothermal => Eos::Isothermal { sound0: self.sound0 },
            EosKind::Barotropic => Eos::Barotropic {
                sound0: self.sound0,
                gamma: self.gamma_eos,
                rho_bary: self.rho_bary,
            },
        }
    }

    /// Hydro dialect of the compute engine.
    pub fn dialect(&self) -> Dialect {
        match self.sph {
            SphKind::Gradh | SphKind::Sm2012 => Dialect::Gradh,
            SphKind::MfvMm | SphKind::MfvRk => Dialect::Mfv,
        }
    }

    /// Integration scheme of the compute engine.
    pub fn scheme(&self) -> IntegrationScheme {
        match self.sph_integration {
            IntegrationToken::Lfkdk => IntegrationScheme::LeapfrogKdk,
            IntegrationToken::Lfdkd => IntegrationScheme::LeapfrogDkd,
            IntegrationToken::Rk => IntegrationScheme::RungeKutta2,
        }
    }

    /// Artificial-viscosity switch.
    pub fn avisc(&self) -> AviscKind {
        match self.avisc {
            AviscToken::None => AviscKind::None,
            AviscToken::Mon97 => AviscKind::Mon97,
        }
    }

    /// Artificial-conductivity switch.
    pub fn acond(&self) -> AcondKind {
        match self.acond {
            AcondToken::None => AcondKind::None,
            AcondToken::Wadsley => AcondKind::Wadsley,
        }
    }

    /// MAC flavour.
    pub fn mac(&self) -> MacKind {
        match self.gravity_mac {
            GravityMacKind::Geometric => MacKind::Geometric,
            GravityMacKind::Eigenmac => MacKind::Eigen,
        }
    }

    /// Multipole order.
    pub fn multipole(&self) -> MultipoleKind {
        match self.multipole {
            MultipoleToken::Monopole => MultipoleKind::Monopole,
            MultipoleToken::Quadrupole => MultipoleKind::Quadrupole,
            MultipoleToken::FastMonopole => MultipoleKind::FastMonopole,
            MultipoleToken::FastQuadrupole => MultipoleKind::FastQuadrupole,
        }
    }

    /// Leaf size seen by the tree; brute force collapses to a single leaf.
    pub fn effective_nleafmax(&self) -> usize {
        match self.neib_search {
            NeibSearchKind::Brute => usize::MAX / 2,
            _ => self.nleafmax,
        }
    }
}
