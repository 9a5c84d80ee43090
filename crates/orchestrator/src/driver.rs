//! Driver: owns every simulation object and runs the main loop.
//!
//! One sub-step is: boundary sweep -> ghost refresh -> tree (re)build or
//! re-stock -> property update for the synchronized active set -> force
//! update -> kick/correct -> diagnostics and snapshot scheduling.
//! Recoverable conditions (buffer overflow, gather-range underflow) are
//! handled inside the phases; anything surfacing here is fatal and is
//! logged as a structured diagnostic record before the driver aborts.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kernel::diagnostics::Diagnostics;
use kernel::ewald::NoCorrection;
use kernel::ghost;
use kernel::integrator::{BlockTimesteps, TimestepParams};
use kernel::mfv::{self, MfvParams};
use kernel::nbody::{DirectNbody, NbodyIntegrator, StarParticle};
use kernel::particle::{ipress, ivel, nvar, ParticleStore, IRHO};
use kernel::phases::{Dialect, Engine};
use kernel::riemann::HllcSolver;
use kernel::smoothing::SmoothingParams;
use kernel::smoothing_kernel::make_kernel;
use kernel::sph::SphForceParams;
use kernel::tree::KdTree;
use kernel::vec::dot;
use kernel::{DiagnosticRecord, DomainBox, SimError};

use crate::config::{SimConfig, SphKind};
use crate::ic;
use crate::snapshot::{self, Snapshot};

/// A fully assembled simulation.
pub struct Simulation {
    /// Validated configuration.
    pub config: SimConfig,
    /// Domain geometry and boundary policy.
    pub simbox: DomainBox,
    /// Fluid particles (real + ghost tail).
    pub store: ParticleStore,
    /// Star particles.
    pub stars: Vec<StarParticle>,
    /// Configured compute engine.
    pub engine: Engine,
    /// Block-timestep state.
    pub integ: BlockTimesteps,
    /// Tree over the real particles.
    pub tree: KdTree,
    /// Tree over the ghost tail.
    pub ghosttree: KdTree,
    /// Initial diagnostic record.
    pub diag0: Diagnostics,
    /// Latest diagnostic record.
    pub diag: Diagnostics,
    /// Sub-steps taken.
    pub nsteps: u64,
    /// Snapshots written.
    pub noutsnap: u32,
    /// Next snapshot time.
    pub tsnapnext: f64,
    /// Cooperative interrupt flag, checked between sub-steps.
    pub interrupt: Arc<AtomicBool>,
    /// Directory for snapshot output; `None` disables output entirely.
    pub snap_dir: Option<PathBuf>,
    nbody: DirectNbody,
}

impl Simulation {
    /// Build a simulation from a validated configuration: generate the
    /// initial conditions and assemble the engine.
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        let simbox = config.simbox();
        let (store, stars) = ic::generate(&config, &simbox)?;
        tracing::info!(
            nhydro = store.nhydro,
            nstar = stars.len(),
            ndim = config.ndim,
            "initial conditions generated"
        );

        let kernrange = make_kernel(config.kernel, config.ndim, false).kernrange();
        let dialect = config.dialect();
        let engine = Engine {
            ndim: config.ndim,
            dialect,
            kern: make_kernel(config.kernel, config.ndim, config.tabulated_kernel != 0),
            eos: config.eos(),
            riemann: Box::new(HllcSolver::new(config.gamma_eos)),
            ewald: Box::new(NoCorrection),
            smoothing: SmoothingParams {
                ndim: config.ndim,
                h_fac: config.h_fac,
                h_converge: config.h_converge,
                hmin_sink: config.hmin_sink,
                mass_weighted: dialect == Dialect::Gradh,
                track_potmin: config.self_gravity != 0,
            },
            sph_force: SphForceParams {
                ndim: config.ndim,
                avisc: config.avisc(),
                acond: config.acond(),
                beta_visc: config.beta_visc,
            },
            mfv: MfvParams {
                ndim: config.ndim,
                gamma: config.gamma_eos,
                zero_mass_flux: config.sph == SphKind::MfvMm,
                rho_floor: config.rho_floor,
                press_floor: config.press_floor,
            },
            multipole: config.multipole(),
            mac: config.mac(),
            hydro_forces: config.hydro_forces != 0,
            self_gravity: config.self_gravity != 0,
        };

        let dt_cap = if config.dt_snap > 0.0 {
            config.dt_snap.min(config.tend)
        } else {
            config.tend
        };
        let integ = BlockTimesteps::new(
            config.scheme(),
            TimestepParams {
                courant_mult: config.courant_mult,
                accel_mult: config.accel_mult,
                energy_mult: config.energy_mult,
                nlevels: config.nlevels,
                single_timestep: config.sph_single_timestep != 0,
                energy_condition: engine.eos.evolves_energy(),
                dt_cap,
            },
        );

        let quadrupole = config.self_gravity != 0;
        let tree = KdTree::new(
            config.ndim,
            config.effective_nleafmax(),
            config.thetamaxsqd,
            kernrange,
            quadrupole,
        );
        let ghosttree = KdTree::new(
            config.ndim,
            config.effective_nleafmax(),
            config.thetamaxsqd,
            kernrange,
            false,
        );

        let tsnapnext = if config.dt_snap > 0.0 { config.tsnapfirst } else { f64::INFINITY };
        Ok(Self {
            config,
            simbox,
            store,
            stars,
            engine,
            integ,
            tree,
            ghosttree,
            diag0: Diagnostics::default(),
            diag: Diagnostics::default(),
            nsteps: 0,
            noutsnap: 0,
            tsnapnext,
            interrupt: Arc::new(AtomicBool::new(false)),
            snap_dir: None,
            nbody: DirectNbody,
        })
    }

    /// Initial ghost/tree construction, first property and force sweep,
    /// level assignment and the reference diagnostics.
    pub fn setup(&mut self) -> Result<(), SimError> {
        for part in self.store.real_mut() {
            part.active = true;
        }
        self.rebuild_trees(true)?;
        self.engine.update_all_properties(&mut self.store, &self.tree, &self.ghosttree)?;

        if self.engine.dialect == Dialect::Mfv {
            for i in 0..self.store.nhydro {
                mfv::conserved_from_primitive(&mut self.store[i], self.config.ndim);
            }
        }
        ghost::copy_state_to_ghosts(&mut self.store);
        self.tree.stock(self.store.all());
        self.ghosttree.stock(self.store.all());

        self.compute_forces()?;
        if !self.stars.is_empty() {
            DirectNbody::compute_accel(
                &mut self.stars,
                self.store.real(),
                self.engine.kern.as_ref(),
                self.config.ndim,
            );
        }
        self.integ.assign_levels(&mut self.store, self.config.ndim);

        self.diag0 = Diagnostics::compute(&self.store, &self.stars, self.config.ndim);
        self.diag = self.diag0;
        tracing::info!(
            etot = self.diag0.etot,
            mtot = self.diag0.mtot,
            dt = self.integ.dt_min,
            nresync = self.integ.nresync,
            "setup complete"
        );
        Ok(())
    }

    /// Advance until `tend`, `Nstepsmax` or an interrupt. Fatal errors are
    /// logged with a diagnostic record and returned.
    pub fn run(&mut self) -> Result<(), SimError> {
        while self.integ.t < self.config.tend && self.nsteps < self.config.nstepsmax {
            if self.interrupt.load(Ordering::Relaxed) {
                tracing::info!(t = self.integ.t, "interrupt observed, stopping cleanly");
                return Err(SimError::Interrupt);
            }
            if let Err(err) = self.substep() {
                let record = DiagnosticRecord {
                    step: self.nsteps,
                    t: self.integ.t,
                    particle: match &err {
                        SimError::HIterationDiverged { id, .. }
                        | SimError::NonPositiveState { id, .. } => Some(*id),
                        _ => None,
                    },
                    exit_code: err.exit_code(),
                };
                tracing::error!(%record, error = %err, "fatal error, aborting run");
                return Err(err);
            }
            self.nsteps += 1;

            if self.nsteps % self.config.ndiagstep == 0 {
                self.update_diagnostics();
            }
            self.maybe_snapshot()?;
        }
        self.update_diagnostics();
        tracing::info!(
            steps = self.nsteps,
            t = self.integ.t,
            eerror = self.diag.eerror,
            "run finished"
        );
        Ok(())
    }

    /// One sub-step of the main loop.
    fn substep(&mut self) -> Result<(), SimError> {
        self.integ.begin_substep(&mut self.store);
        self.integ.advance(&mut self.store, self.config.ndim);

        ghost::check_boundaries(&mut self.store, &self.simbox);
        let full_rebuild = self.nsteps % self.config.ntreebuildstep == 0;
        self.rebuild_trees(full_rebuild)?;

        self.engine.update_all_properties(&mut self.store, &self.tree, &self.ghosttree)?;
        if self.engine.dialect == Dialect::Mfv {
            self.mfv_recover_primitives(true)?;
        }
        ghost::copy_state_to_ghosts(&mut self.store);
        self.tree.stock(self.store.all());
        self.ghosttree.stock(self.store.all());

        self.compute_forces()?;

        if self.engine.dialect == Dialect::Mfv {
            self.mfv_correct()?;
        }
        self.integ.correct(&mut self.store, self.config.ndim);

        if !self.stars.is_empty() {
            self.nbody.advance(
                &mut self.stars,
                self.store.real(),
                self.engine.kern.as_ref(),
                self.config.ndim,
                self.integ.dt_min,
            );
        }

        if self.integ.needs_resync() {
            self.integ.assign_levels(&mut self.store, self.config.ndim);
        }
        Ok(())
    }

    /// Dispatch the force phases for the configured dialect and physics.
    fn compute_forces(&mut self) -> Result<(), SimError> {
        let hydro = self.engine.hydro_forces;
        let grav = self.engine.self_gravity;
        match self.engine.dialect {
            Dialect::Gradh => {
                if hydro && grav {
                    self.engine.update_all_forces(
                        &mut self.store,
                        &self.tree,
                        &self.ghosttree,
                        &self.stars,
                        &self.simbox,
                    )
                } else if grav {
                    self.engine.update_all_grav_forces(
                        &mut self.store,
                        &self.tree,
                        &self.ghosttree,
                        &self.stars,
                        &self.simbox,
                    )
                } else {
                    self.engine.update_all_hydro_forces(
                        &mut self.store,
                        &self.tree,
                        &self.ghosttree,
                        &self.stars,
                    )
                }
            }
            Dialect::Mfv => {
                if hydro {
                    self.engine.update_all_gradients(&mut self.store, &self.tree, &self.ghosttree)?;
                    ghost::copy_state_to_ghosts(&mut self.store);
                    self.engine.update_all_mfv_fluxes(&mut self.store, &self.tree, &self.ghosttree)?;
                }
                if grav {
                    self.engine.update_all_grav_forces(
                        &mut self.store,
                        &self.tree,
                        &self.ghosttree,
                        &self.stars,
                        &self.simbox,
                    )?;
                }
                Ok(())
            }
        }
    }

    /// Recover primitive state from Q for the active FV particles. With
    /// `predict`, the half-step predictor state (the Runge-Kutta variant)
    /// feeds the upcoming gradient and flux evaluation.
    fn mfv_recover_primitives(&mut self, predict: bool) -> Result<(), SimError> {
        let ndim = self.config.ndim;
        let eos = self.engine.eos;
        let use_predictor = predict && self.config.sph == SphKind::MfvRk;
        let dt_min = self.integ.dt_min;
        let n = self.integ.n;
        for i in 0..self.store.nhydro {
            if !self.store[i].active {
                continue;
            }
            if use_predictor {
                let dt_half = 0.5 * (n - self.store[i].nlast) as f64 * dt_min;
                let part = &mut self.store[i];
                for var in 0..nvar(ndim) {
                    part.qcons[var] = part.q0[var] + part.dqdt[var] * dt_half;
                }
            }
            mfv::primitive_from_conserved(&mut self.store[i], &eos, ndim)?;
        }
        Ok(())
    }

    /// End-of-step conservative update for the FV dialect: integrate dQ/dt
    /// over the particle step and add the gravity source terms, then
    /// recover primitives.
    fn mfv_correct(&mut self) -> Result<(), SimError> {
        let ndim = self.config.ndim;
        let eos = self.engine.eos;
        let dt_min = self.integ.dt_min;
        let n = self.integ.n;
        let grav = self.engine.self_gravity;
        for i in 0..self.store.nhydro {
            if !self.store[i].active {
                continue;
            }
            let part = &mut self.store[i];
            let dt = (n - part.nlast) as f64 * dt_min;
            for var in 0..nvar(ndim) {
                part.qcons[var] = part.q0[var] + part.dqdt[var] * dt;
            }
            if grav {
                let work = dot(&part.v, &part.agrav, ndim);
                for d in 0..ndim {
                    part.qcons[ivel(d)] += part.qcons[IRHO] * part.agrav[d] * dt;
                }
                part.qcons[ipress(ndim)] += part.qcons[IRHO] * work * dt;
            }
            mfv::primitive_from_conserved(part, &eos, ndim)?;
        }
        Ok(())
    }

    /// Refresh ghosts and rebuild (or merely re-stock) the trees.
    fn rebuild_trees(&mut self, full: bool) -> Result<(), SimError> {
        ghost::refresh_ghosts(&mut self.store, &self.simbox, self.engine.kern.kernrange())?;
        if full || self.tree.cells.is_empty() {
            self.tree.build(self.store.all(), 0..self.store.nhydro);
        } else {
            self.tree.stock(self.store.all());
        }
        // The ghost tail is regenerated every step, so its tree always
        // rebuilds.
        self.ghosttree.build(self.store.all(), self.store.nhydro..self.store.ntot());
        Ok(())
    }

    fn update_diagnostics(&mut self) {
        self.diag = Diagnostics::compute(&self.store, &self.stars, self.config.ndim);
        self.diag.update_error(&self.diag0);
        tracing::debug!(
            t = self.integ.t,
            etot = self.diag.etot,
            eerror = self.diag.eerror,
            momx = self.diag.mom[0],
            "diagnostics"
        );
    }

    /// Emit a snapshot when the schedule says so.
    fn maybe_snapshot(&mut self) -> Result<(), SimError> {
        let step_due =
            self.config.noutputstep > 0 && self.nsteps % self.config.noutputstep == 0;
        let time_due = self.integ.t >= self.tsnapnext;
        if !(step_due || time_due) {
            return Ok(());
        }
        if time_due {
            self.tsnapnext += self.config.dt_snap;
        }
        let Some(dir) = self.snap_dir.clone() else {
            return Ok(());
        };

        let snap = Snapshot::from_store(&self.store, self.integ.t, self.config.ndim);
        let path = dir.join(format!("{}.{:05}.srn", self.config.run_id, self.noutsnap));
        snapshot::write_binary(&snap, &path)?;
        self.noutsnap += 1;
        tracing::info!(path = %path.display(), t = self.integ.t, "snapshot written");
        Ok(())
    }
}
