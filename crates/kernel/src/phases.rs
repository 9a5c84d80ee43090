//! Parallel phase sweeps over active tree cells.
//!
//! Each phase maps a worker pool over the active-cell list (rayon, guided by
//! the work-stealing scheduler) with one [`NeighborManager`] per worker.
//! Workers read the shared particle array, compute into private clones of
//! the cell's active particles, and return per-cell update records; the
//! records are merged behind the phase barrier, so the particle array is
//! never written concurrently. `levelneib` contributions reduce with `max`.

use rayon::prelude::*;

use crate::domain::DomainBox;
use crate::eos::Eos;
use crate::error::SimError;
use crate::ewald::PeriodicCorrection;
use crate::gravity;
use crate::mfv::{self, MfvParams};
use crate::nbody::StarParticle;
use crate::neighbor::{with_overflow_retry, NeighborManager};
use crate::particle::{ParticleStore, SphParticle, NVAR_MAX};
use crate::riemann::RiemannSolver;
use crate::smoothing::{compute_h, GatherNeib, HStatus, SmoothingParams};
use crate::smoothing_kernel::SmoothingKernel;
use crate::sph::{self, SphForceParams};
use crate::tree::KdTree;
use crate::vec::{norm_sqd, sub};

/// Hydrodynamics dialect selected at configuration time. Dispatch happens
/// once at phase entry; the inner loops stay monomorphic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Grad-h SPH.
    Gradh,
    /// Meshless finite volume.
    Mfv,
}

/// Cell-gravity expansion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipoleKind {
    /// Per-particle monopole.
    Monopole,
    /// Per-particle monopole + quadrupole.
    Quadrupole,
    /// One linearized monopole field per cell.
    FastMonopole,
    /// Fast monopole plus the quadrupole field at the cell centre.
    FastQuadrupole,
}

/// Multipole acceptance criterion flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacKind {
    /// Purely geometric opening angle.
    Geometric,
    /// Opening angle scaled by `max_j (1/phi_j)^(2/3)` over the cell.
    Eigen,
}

/// Initial per-worker neighbour-buffer capacity.
const INITIAL_CAP: usize = 512;

/// Growth factor of the gather radius when a cell's h iteration outgrows
/// its neighbour list.
const HMAX_GROW: f64 = 1.05;

/// Per-cell result of a force phase.
struct CellForces {
    /// Updated clones of the cell's active particles.
    actives: Vec<SphParticle>,
    /// (real particle id, active level) pairs for the levelneib reduction.
    neib_levels: Vec<(usize, u32)>,
    /// Pair-once dQ/dt contributions to neighbours, keyed by real id.
    dqdt: Vec<(usize, [f64; NVAR_MAX])>,
}

/// Configured simulation engine: the kernels, collaborators and parameters
/// every phase needs.
pub struct Engine {
    /// Spatial dimensionality.
    pub ndim: usize,
    /// Hydrodynamics dialect.
    pub dialect: Dialect,
    /// Smoothing kernel.
    pub kern: Box<dyn SmoothingKernel>,
    /// Equation of state.
    pub eos: Eos,
    /// Riemann solver (FV dialect).
    pub riemann: Box<dyn RiemannSolver>,
    /// Periodic gravity correction collaborator.
    pub ewald: Box<dyn PeriodicCorrection>,
    /// h-solver parameters.
    pub smoothing: SmoothingParams,
    /// SPH force parameters.
    pub sph_force: SphForceParams,
    /// FV parameters.
    pub mfv: MfvParams,
    /// Cell-gravity expansion.
    pub multipole: MultipoleKind,
    /// MAC flavour.
    pub mac: MacKind,
    /// Hydrodynamic forces enabled.
    pub hydro_forces: bool,
    /// Self-gravity enabled.
    pub self_gravity: bool,
}

impl Engine {
    /// Update smoothing lengths, densities and thermal state of every
    /// active particle. The outer loop grows the gather radius by 5% and
    /// re-queries the tree whenever any particle's kernel outgrows the
    /// provided list, so a single pass over the cell always finishes with
    /// every h converged against a sufficient neighbour set.
    pub fn update_all_properties(
        &self,
        store: &mut ParticleStore,
        tree: &KdTree,
        ghosttree: &KdTree,
    ) -> Result<(), SimError> {
        let celllist = tree.compute_active_cell_list(store.all());
        if celllist.is_empty() {
            return Ok(());
        }
        let parts = store.all();

        let results: Result<Vec<Vec<SphParticle>>, SimError> = celllist
            .par_iter()
            .map_init(
                || NeighborManager::new(INITIAL_CAP),
                |mgr, &c| self.properties_cell(c, parts, tree, ghosttree, mgr),
            )
            .collect();

        for updated in results? {
            for p in updated {
                let idx = p.id;
                store[idx] = p;
            }
        }
        Ok(())
    }

    fn properties_cell(
        &self,
        c: usize,
        parts: &[SphParticle],
        tree: &KdTree,
        ghosttree: &KdTree,
        mgr: &mut NeighborManager,
    ) -> Result<Vec<SphParticle>, SimError> {
        let cell = &tree.cells[c];
        let mut activelist = Vec::new();
        tree.compute_active_particle_list(c, parts, &mut activelist);
        if activelist.is_empty() {
            return Ok(Vec::new());
        }

        let mut hmax = cell.hmax;
        loop {
            hmax *= HMAX_GROW;
            with_overflow_retry(mgr, |m| {
                tree.compute_gather_neighbour_list(cell, parts, hmax, m)?;
                ghosttree.compute_gather_neighbour_list(cell, parts, hmax, m)
            })?;

            // Local copies of the gather data (mass, position, potential).
            let ndata: Vec<([f64; 3], f64, f64)> = mgr
                .raw_ids()
                .iter()
                .map(|&j| (parts[j].r, parts[j].m, parts[j].gpot))
                .collect();

            let hrangesqd = self.kern.kernrangesqd() * hmax * hmax;
            let mut actives: Vec<SphParticle> =
                activelist.iter().map(|&i| parts[i].clone()).collect();

            let mut celldone = true;
            for ap in actives.iter_mut() {
                let neibs: Vec<GatherNeib> = ndata
                    .iter()
                    .filter_map(|(r, m, gpot)| {
                        let drsqd = norm_sqd(&sub(r, &ap.r), self.ndim);
                        (drsqd <= hrangesqd)
                            .then_some(GatherNeib { drsqd, m: *m, gpot: *gpot })
                    })
                    .collect();

                match compute_h(ap, &neibs, hmax, self.kern.as_ref(), &self.smoothing)? {
                    HStatus::Converged => {}
                    HStatus::ListTooSmall => {
                        celldone = false;
                        break;
                    }
                }
            }

            if celldone {
                for ap in actives.iter_mut() {
                    ap.press = self.eos.pressure(ap.rho, ap.u);
                    ap.sound = self.eos.sound_speed(ap.rho, ap.u);
                    if self.dialect == Dialect::Mfv {
                        mfv::update_primitive_vector(ap, self.ndim);
                    }
                }
                return Ok(actives);
            }
        }
    }

    /// Hydrodynamic forces only (no self-gravity).
    pub fn update_all_hydro_forces(
        &self,
        store: &mut ParticleStore,
        tree: &KdTree,
        ghosttree: &KdTree,
        stars: &[StarParticle],
    ) -> Result<(), SimError> {
        self.run_force_phase(store, tree, |mgr, c, parts| {
            self.hydro_cell(c, parts, tree, ghosttree, stars, mgr)
        })
    }

    fn hydro_cell(
        &self,
        c: usize,
        parts: &[SphParticle],
        tree: &KdTree,
        ghosttree: &KdTree,
        stars: &[StarParticle],
        mgr: &mut NeighborManager,
    ) -> Result<CellForces, SimError> {
        let cell = &tree.cells[c];
        let mut actives = self.collect_actives(c, parts, tree, false, true);
        if actives.is_empty() {
            return Ok(CellForces { actives, neib_levels: Vec::new(), dqdt: Vec::new() });
        }

        with_overflow_retry(mgr, |m| {
            tree.compute_neighbour_and_ghost_list(cell, m)?;
            ghosttree.compute_neighbour_and_ghost_list(cell, m)
        })?;
        mgr.end_search(cell, parts, self.kern.kernrange(), self.ndim);

        let mut neib_levels = Vec::new();
        for ap in actives.iter_mut() {
            if !ap.ptype.hydro() {
                continue;
            }
            let (list, neibpart) = mgr.get_particle_neib(ap, self.ndim, false);
            sph::compute_sph_hydro_forces(ap, list, neibpart, self.kern.as_ref(), &self.sph_force);
            for &k in list {
                neib_levels.push((neibpart[k].iorig, ap.level));
            }
        }

        if !stars.is_empty() {
            for ap in actives.iter_mut() {
                gravity::compute_star_grav_forces(ap, stars, self.kern.as_ref(), self.ndim);
            }
        }
        for ap in actives.iter_mut() {
            for d in 0..self.ndim {
                ap.a[d] += ap.agrav[d];
            }
        }
        Ok(CellForces { actives, neib_levels, dqdt: Vec::new() })
    }

    /// Combined hydrodynamic and gravitational forces.
    pub fn update_all_forces(
        &self,
        store: &mut ParticleStore,
        tree: &KdTree,
        ghosttree: &KdTree,
        stars: &[StarParticle],
        simbox: &DomainBox,
    ) -> Result<(), SimError> {
        self.run_force_phase(store, tree, |mgr, c, parts| {
            self.grav_cell(c, parts, tree, ghosttree, stars, simbox, true, mgr)
        })
    }

    /// Gravitational forces only (hydro disabled or FV dialect).
    pub fn update_all_grav_forces(
        &self,
        store: &mut ParticleStore,
        tree: &KdTree,
        ghosttree: &KdTree,
        stars: &[StarParticle],
        simbox: &DomainBox,
    ) -> Result<(), SimError> {
        self.run_force_phase(store, tree, |mgr, c, parts| {
            self.grav_cell(c, parts, tree, ghosttree, stars, simbox, false, mgr)
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn grav_cell(
        &self,
        c: usize,
        parts: &[SphParticle],
        tree: &KdTree,
        ghosttree: &KdTree,
        stars: &[StarParticle],
        simbox: &DomainBox,
        with_hydro: bool,
        mgr: &mut NeighborManager,
    ) -> Result<CellForces, SimError> {
        let cell = &tree.cells[c];
        let mut actives = self.collect_actives(c, parts, tree, true, with_hydro);
        if actives.is_empty() {
            return Ok(CellForces { actives, neib_levels: Vec::new(), dqdt: Vec::new() });
        }

        // Eigen-MAC factor from the previous step's potentials.
        let mut macfactor = 1.0;
        if self.mac == MacKind::Eigen {
            let mut f: f64 = 0.0;
            for ap in &actives {
                if ap.gpot > 0.0 {
                    f = f.max((1.0 / ap.gpot).powf(2.0 / 3.0));
                }
            }
            if f > 0.0 {
                macfactor = f;
            }
        }

        let periodic = simbox.periodic_gravity;
        let sb = periodic.then_some(simbox);
        with_overflow_retry(mgr, |m| {
            tree.compute_gravity_interaction_list(cell, parts, macfactor, sb, m)?;
            if !periodic {
                // Boundary images only matter for the hydro part here; with
                // periodic gravity the nearest-image mapping replaces them.
                ghosttree.compute_neighbour_and_ghost_list(cell, m)?;
            }
            Ok(())
        })?;
        mgr.end_search_gravity(cell, parts, self.ndim, sb);
        let gravcells = mgr.gravcells().to_vec();

        let mut neib_levels = Vec::new();
        for ap in actives.iter_mut() {
            let do_grav = ap.ptype.gravitates();
            let (_len, hydrolist, gravlist, directlist, neibpart) =
                mgr.get_particle_neib_gravity(ap, self.ndim, do_grav);

            if with_hydro && ap.ptype.hydro() {
                sph::compute_sph_hydro_grav_forces(
                    ap,
                    hydrolist,
                    gravlist,
                    neibpart,
                    self.kern.as_ref(),
                    &self.sph_force,
                );
            } else if do_grav {
                gravity::compute_smoothed_grav_forces(
                    ap,
                    hydrolist,
                    neibpart,
                    self.kern.as_ref(),
                    self.ndim,
                );
                gravity::compute_smoothed_grav_forces(
                    ap,
                    gravlist,
                    neibpart,
                    self.kern.as_ref(),
                    self.ndim,
                );
            }

            if do_grav {
                gravity::compute_direct_grav_forces(ap, directlist, neibpart, self.ndim);
                match self.multipole {
                    MultipoleKind::Monopole => {
                        gravity::compute_cell_monopole_forces(ap, &gravcells, self.ndim)
                    }
                    MultipoleKind::Quadrupole => {
                        gravity::compute_cell_quadrupole_forces(ap, &gravcells, self.ndim)
                    }
                    // Evaluated once per cell after the particle loop.
                    MultipoleKind::FastMonopole | MultipoleKind::FastQuadrupole => {}
                }
                if periodic {
                    gravity::add_ewald_corrections(
                        ap,
                        &[hydrolist, gravlist, directlist],
                        neibpart,
                        &gravcells,
                        self.ewald.as_ref(),
                        self.ndim,
                    );
                }
            }

            for &k in hydrolist {
                neib_levels.push((neibpart[k].iorig, ap.level));
            }
        }

        match self.multipole {
            MultipoleKind::FastMonopole => {
                gravity::compute_fast_monopole_forces(&mut actives, &gravcells, &cell.r, self.ndim)
            }
            MultipoleKind::FastQuadrupole => gravity::compute_fast_quadrupole_forces(
                &mut actives,
                &gravcells,
                &cell.r,
                self.ndim,
            ),
            _ => {}
        }

        if !stars.is_empty() {
            for ap in actives.iter_mut() {
                gravity::compute_star_grav_forces(ap, stars, self.kern.as_ref(), self.ndim);
            }
        }
        for ap in actives.iter_mut() {
            for d in 0..self.ndim {
                ap.a[d] += ap.agrav[d];
            }
        }
        Ok(CellForces { actives, neib_levels, dqdt: Vec::new() })
    }

    /// FV gradient phase: Psi factors, primitive gradients and limiter
    /// extrema for every active particle.
    pub fn update_all_gradients(
        &self,
        store: &mut ParticleStore,
        tree: &KdTree,
        ghosttree: &KdTree,
    ) -> Result<(), SimError> {
        let celllist = tree.compute_active_cell_list(store.all());
        if celllist.is_empty() {
            return Ok(());
        }
        let parts = store.all();
        let results: Result<Vec<Vec<SphParticle>>, SimError> = celllist
            .par_iter()
            .map_init(
                || NeighborManager::new(INITIAL_CAP),
                |mgr, &c| {
                    let cell = &tree.cells[c];
                    // Plain clones: this phase only adds gradient state on
                    // top of whatever the particle already carries.
                    let mut activelist = Vec::new();
                    tree.compute_active_particle_list(c, parts, &mut activelist);
                    let mut actives: Vec<SphParticle> =
                        activelist.iter().map(|&i| parts[i].clone()).collect();
                    if actives.is_empty() {
                        return Ok(actives);
                    }
                    with_overflow_retry(mgr, |m| {
                        tree.compute_neighbour_and_ghost_list(cell, m)?;
                        ghosttree.compute_neighbour_and_ghost_list(cell, m)
                    })?;
                    mgr.end_search(cell, parts, self.kern.kernrange(), self.ndim);
                    for ap in actives.iter_mut() {
                        let (list, neibpart) = mgr.get_particle_neib(ap, self.ndim, false);
                        mfv::compute_psi_factors(ap, list, neibpart, self.kern.as_ref(), self.ndim);
                        mfv::compute_gradients(ap, list, neibpart, self.kern.as_ref(), self.ndim);
                    }
                    Ok(actives)
                },
            )
            .collect();

        for updated in results? {
            for p in updated {
                let idx = p.id;
                store[idx] = p;
            }
        }
        Ok(())
    }

    /// FV flux phase: pair-once Godunov fluxes with exactly antisymmetric
    /// dQ/dt accumulation (ghost contributions route to their originals).
    pub fn update_all_mfv_fluxes(
        &self,
        store: &mut ParticleStore,
        tree: &KdTree,
        ghosttree: &KdTree,
    ) -> Result<(), SimError> {
        for part in store.real_mut() {
            part.dqdt = [0.0; NVAR_MAX];
        }
        let celllist = tree.compute_active_cell_list(store.all());
        if celllist.is_empty() {
            return Ok(());
        }
        let parts = store.all();

        let results: Result<Vec<CellForces>, SimError> = celllist
            .par_iter()
            .map_init(
                || NeighborManager::new(INITIAL_CAP),
                |mgr, &c| {
                    let cell = &tree.cells[c];
                    // Plain clones; dQ/dt was reset globally above.
                    let mut activelist = Vec::new();
                    tree.compute_active_particle_list(c, parts, &mut activelist);
                    let mut actives: Vec<SphParticle> =
                        activelist.iter().map(|&i| parts[i].clone()).collect();
                    let mut dqdt = Vec::new();
                    if actives.is_empty() {
                        return Ok(CellForces { actives, neib_levels: Vec::new(), dqdt });
                    }
                    with_overflow_retry(mgr, |m| {
                        tree.compute_neighbour_and_ghost_list(cell, m)?;
                        ghosttree.compute_neighbour_and_ghost_list(cell, m)
                    })?;
                    mgr.end_search(cell, parts, self.kern.kernrange(), self.ndim);

                    let mut neib_levels = Vec::new();
                    for ap in actives.iter_mut() {
                        let (list, neibpart) = mgr.get_particle_neib(ap, self.ndim, true);
                        mfv::compute_godunov_flux(
                            ap,
                            list,
                            neibpart,
                            |k| neibpart[k].iorig,
                            self.riemann.as_ref(),
                            self.kern.as_ref(),
                            &self.mfv,
                            &mut dqdt,
                        )?;
                        for &k in list {
                            neib_levels.push((neibpart[k].iorig, ap.level));
                        }
                    }
                    Ok(CellForces { actives, neib_levels, dqdt })
                },
            )
            .collect();

        let results = results?;
        // Assign the actives' own sums first, then fold in the pair-once
        // contributions from the other side of each pair.
        for cf in &results {
            for p in &cf.actives {
                store[p.id].dqdt = p.dqdt;
            }
        }
        for cf in &results {
            for &(idx, delta) in &cf.dqdt {
                for var in 0..NVAR_MAX {
                    store[idx].dqdt[var] += delta[var];
                }
            }
            for &(idx, level) in &cf.neib_levels {
                store[idx].levelneib = store[idx].levelneib.max(level);
            }
        }
        Ok(())
    }

    /// Clone the active particles of a cell with the force accumulators
    /// reset. With `with_self_pot` the potential starts from the particle's
    /// own softened self-contribution; `reset_vsig` floors the signal
    /// velocity at the sound speed (the FV gravity sweep keeps the value the
    /// gradient phase computed instead).
    fn collect_actives(
        &self,
        c: usize,
        parts: &[SphParticle],
        tree: &KdTree,
        with_self_pot: bool,
        reset_vsig: bool,
    ) -> Vec<SphParticle> {
        let mut activelist = Vec::new();
        tree.compute_active_particle_list(c, parts, &mut activelist);
        activelist
            .iter()
            .map(|&i| {
                let mut ap = parts[i].clone();
                ap.a = [0.0; 3];
                ap.agrav = [0.0; 3];
                ap.dudt = 0.0;
                ap.div_v = 0.0;
                ap.dalphadt = 0.0;
                ap.levelneib = ap.level;
                if reset_vsig {
                    ap.vsig_max = ap.sound;
                }
                ap.gpot = if with_self_pot {
                    ap.m * ap.invh * self.kern.wpot(0.0)
                } else {
                    0.0
                };
                ap
            })
            .collect()
    }

    /// Shared force-phase skeleton: reset the levelneib baseline, fan the
    /// cell closure out over the worker pool, merge the per-cell records.
    fn run_force_phase<F>(
        &self,
        store: &mut ParticleStore,
        tree: &KdTree,
        cell_fn: F,
    ) -> Result<(), SimError>
    where
        F: Fn(&mut NeighborManager, usize, &[SphParticle]) -> Result<CellForces, SimError>
            + Sync,
    {
        for part in store.real_mut() {
            part.levelneib = part.level;
        }
        let celllist = tree.compute_active_cell_list(store.all());
        if celllist.is_empty() {
            return Ok(());
        }
        let parts = store.all();

        let results: Result<Vec<CellForces>, SimError> = celllist
            .par_iter()
            .map_init(
                || NeighborManager::new(INITIAL_CAP),
                |mgr, &c| cell_fn(mgr, c, parts),
            )
            .collect();
        let results = results?;

        for cf in &results {
            for p in &cf.actives {
                store[p.id] = p.clone();
            }
        }
        for cf in &results {
            for &(idx, level) in &cf.neib_levels {
                store[idx].levelneib = store[idx].levelneib.max(level);
            }
        }
        Ok(())
    }
}
