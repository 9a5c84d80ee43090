//! Block-timestep integration on power-of-two levels.
//!
//! Particles live on integer levels 0..Nlevels-1 with
//! `dt_level(l) = dt_max / 2^l`; a particle on level l is advanced every
//! `2^(level_max - l)` base sub-steps. Candidate timesteps combine the
//! Courant, acceleration and energy conditions; level changes apply
//! hysteresis (rise by at most one per sub-step) and the levelneib
//! discipline (never sit more than one level coarser than any interacting
//! neighbour).
//!
//! Schemes: leapfrog KDK (default), leapfrog DKD, and the two-stage
//! Runge-Kutta used by the meshless-FV dialect (both DKD and RK2 run on a
//! single global level).

use crate::particle::{ParticleStore, SphParticle};
use crate::vec::norm_sqd;

/// Time-integration scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationScheme {
    /// Kick-drift-kick leapfrog.
    LeapfrogKdk,
    /// Drift-kick-drift leapfrog (global timestep only).
    LeapfrogDkd,
    /// Two-stage Runge-Kutta for the FV dialect (global timestep only).
    RungeKutta2,
}

/// Static timestep parameters.
#[derive(Debug, Clone, Copy)]
pub struct TimestepParams {
    /// Courant multiplier on h / v_sig.
    pub courant_mult: f64,
    /// Acceleration multiplier on sqrt(h / |a|).
    pub accel_mult: f64,
    /// Energy multiplier on |u| / |du/dt|.
    pub energy_mult: f64,
    /// Number of block levels.
    pub nlevels: u32,
    /// Force every fluid particle onto the minimum-dt level.
    pub single_timestep: bool,
    /// The EOS integrates du/dt (energy condition active).
    pub energy_condition: bool,
    /// Upper bound on any particle timestep.
    pub dt_cap: f64,
}

/// Block-timestep state machine.
pub struct BlockTimesteps {
    /// Integration scheme.
    pub scheme: IntegrationScheme,
    /// Static parameters.
    pub params: TimestepParams,
    /// Coarsest (level-0) timestep.
    pub dt_max: f64,
    /// Base sub-step, `dt_max / 2^level_max`.
    pub dt_min: f64,
    /// Finest occupied level.
    pub level_max: u32,
    /// Sub-step counter inside the current block.
    pub n: u64,
    /// Sub-steps per block, `2^level_max`.
    pub nresync: u64,
    /// Current simulation time.
    pub t: f64,
}

impl BlockTimesteps {
    /// Fresh state at t = 0.
    pub fn new(scheme: IntegrationScheme, params: TimestepParams) -> Self {
        Self {
            scheme,
            params,
            dt_max: 0.0,
            dt_min: 0.0,
            level_max: 0,
            n: 0,
            nresync: 1,
            t: 0.0,
        }
    }

    fn global_level(&self) -> bool {
        self.params.single_timestep
            || self.params.nlevels <= 1
            || self.scheme != IntegrationScheme::LeapfrogKdk
    }

    /// Candidate timestep of one particle:
    /// `min(C h/vsig, Ca sqrt(h/|a|), Ce |u|/|dudt|)`, capped.
    pub fn compute_timestep(&self, part: &SphParticle, ndim: usize) -> f64 {
        let p = &self.params;
        let mut dt = p.dt_cap;
        if part.vsig_max > 0.0 {
            dt = dt.min(p.courant_mult * part.h / part.vsig_max);
        }
        // `a` is the total acceleration; the force phases fold gravity in
        // before the kick.
        let amag = norm_sqd(&part.a, ndim).sqrt();
        if amag > 0.0 {
            dt = dt.min(p.accel_mult * (part.h / amag).sqrt());
        }
        if p.energy_condition && part.dudt.abs() > 0.0 && part.u > 0.0 {
            dt = dt.min(p.energy_mult * part.u / part.dudt.abs());
        }
        dt
    }

    /// Level whose step fits under `dt`.
    fn level_for(&self, dt: f64) -> u32 {
        if dt >= self.dt_max {
            return 0;
        }
        let l = (self.dt_max / dt).log2().ceil() as u32;
        l.min(self.params.nlevels - 1)
    }

    /// Full resynchronization: recompute every particle's candidate dt,
    /// choose the level ladder, and reset all saved step state.
    pub fn assign_levels(&mut self, store: &mut ParticleStore, ndim: usize) {
        let mut dtmin = self.params.dt_cap;
        for i in 0..store.nhydro {
            dtmin = dtmin.min(self.compute_timestep(&store[i], ndim));
        }
        assert!(dtmin.is_finite() && dtmin > 0.0, "no finite timestep candidate");

        if self.global_level() {
            self.dt_max = dtmin;
            self.level_max = 0;
            for part in store.real_mut() {
                part.level = 0;
            }
        } else {
            self.level_max = self.params.nlevels - 1;
            self.dt_max = dtmin * (1u64 << self.level_max) as f64;
            for i in 0..store.nhydro {
                let dt = self.compute_timestep(&store[i], ndim);
                store[i].level = self.level_for(dt);
            }
        }
        self.nresync = 1u64 << self.level_max;
        self.dt_min = self.dt_max / self.nresync as f64;
        self.n = 0;

        for part in store.real_mut() {
            part.nlast = 0;
            part.r0 = part.r;
            part.v0 = part.v;
            part.a0 = part.a;
            part.u0 = part.u;
            part.dudt0 = part.dudt;
            part.q0 = part.qcons;
        }
    }

    /// True when the whole block completed and levels must be reassigned.
    pub fn needs_resync(&self) -> bool {
        self.n >= self.nresync
    }

    /// Begin the next sub-step: advance the counters and mark the particles
    /// whose step boundary falls on it as active.
    pub fn begin_substep(&mut self, store: &mut ParticleStore) {
        self.n += 1;
        self.t += self.dt_min;
        for part in store.real_mut() {
            let nstep = 1u64 << (self.level_max - part.level);
            part.active = self.n % nstep == 0;
        }
    }

    /// Drift every particle to the current time (prediction for inactive
    /// particles, first stage for active ones).
    pub fn advance(&self, store: &mut ParticleStore, ndim: usize) {
        let n = self.n;
        let dt_min = self.dt_min;
        for part in store.real_mut() {
            let dt = (n - part.nlast) as f64 * dt_min;
            match self.scheme {
                IntegrationScheme::LeapfrogKdk => {
                    for d in 0..ndim {
                        part.r[d] = part.r0[d] + part.v0[d] * dt + 0.5 * part.a0[d] * dt * dt;
                        part.v[d] = part.v0[d] + part.a0[d] * dt;
                    }
                    part.u = (part.u0 + part.dudt0 * dt).max(1.0e-30);
                }
                IntegrationScheme::LeapfrogDkd => {
                    // Drift to the midpoint; forces are evaluated there.
                    for d in 0..ndim {
                        part.r[d] = part.r0[d] + 0.5 * part.v0[d] * dt;
                    }
                    part.u = (part.u0 + 0.5 * part.dudt0 * dt).max(1.0e-30);
                }
                IntegrationScheme::RungeKutta2 => {
                    for d in 0..ndim {
                        part.r[d] = part.r0[d] + part.v0[d] * dt;
                    }
                }
            }
        }
    }

    /// End-of-step correction for the active particles, plus the level
    /// update with hysteresis and the levelneib discipline. The FV
    /// conservative update happens in the driver (it needs the EOS); here
    /// only the saved state and levels roll forward.
    pub fn correct(&mut self, store: &mut ParticleStore, ndim: usize) {
        let n = self.n;
        let dt_min = self.dt_min;
        let mut new_levels: Vec<(usize, u32)> = Vec::new();

        for i in 0..store.nhydro {
            if !store[i].active {
                continue;
            }
            let dt = (n - store[i].nlast) as f64 * dt_min;
            let part = &mut store[i];
            match self.scheme {
                IntegrationScheme::LeapfrogKdk => {
                    for d in 0..ndim {
                        part.v[d] = part.v0[d] + 0.5 * (part.a0[d] + part.a[d]) * dt;
                    }
                    part.u = (part.u0 + 0.5 * (part.dudt0 + part.dudt) * dt).max(1.0e-30);
                }
                IntegrationScheme::LeapfrogDkd => {
                    for d in 0..ndim {
                        part.v[d] = part.v0[d] + part.a[d] * dt;
                        part.r[d] = part.r0[d] + 0.5 * (part.v0[d] + part.v[d]) * dt;
                    }
                    part.u = (part.u0 + part.dudt * dt).max(1.0e-30);
                }
                IntegrationScheme::RungeKutta2 => {
                    // Q rolled forward in the driver (it needs the EOS for
                    // the primitive recovery); complete the position drift
                    // with the trapezoidal velocity.
                    for d in 0..ndim {
                        part.r[d] = part.r0[d] + 0.5 * (part.v0[d] + part.v[d]) * dt;
                    }
                }
            }

            part.r0 = part.r;
            part.v0 = part.v;
            part.a0 = part.a;
            part.u0 = part.u;
            part.dudt0 = part.dudt;
            part.q0 = part.qcons;
            part.nlast = n;
            new_levels.push((i, part.level));
        }

        // Level update after the kick so the fresh accelerations are used.
        for (i, _) in &new_levels {
            let dt_cand = self.compute_timestep(&store[*i], ndim);
            let target = self.level_for(dt_cand);
            let part = &mut store[*i];
            if target > part.level {
                // Hysteresis: climb one level per step at most (capped at
                // the current ladder; the resync rebuilds it).
                part.level = (part.level + 1).min(target).min(self.level_max);
            } else if target < part.level && part.level > 0 {
                let coarser = part.level - 1;
                // Fall only when no interacting neighbour sits more than
                // one level finer and the coarser step boundary aligns.
                let aligned = self.n % (1u64 << (self.level_max - coarser)) == 0;
                if coarser + 1 >= part.levelneib && aligned {
                    part.level = coarser;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::SphParticle;

    fn params(nlevels: u32) -> TimestepParams {
        TimestepParams {
            courant_mult: 0.2,
            accel_mult: 0.3,
            energy_mult: 0.4,
            nlevels,
            single_timestep: false,
            energy_condition: true,
            dt_cap: 1.0,
        }
    }

    fn store_of(parts: Vec<SphParticle>) -> ParticleStore {
        let mut store = ParticleStore::new(parts.len());
        for p in parts {
            store.push(p);
        }
        store
    }

    fn moving_particle(h: f64, vsig: f64) -> SphParticle {
        let mut p = SphParticle::new(0);
        p.m = 1.0;
        p.set_h(h, 3, 4.0 * h * h);
        p.vsig_max = vsig;
        p.u = 1.0;
        p
    }

    #[test]
    fn candidate_timestep_takes_the_minimum() {
        let integ = BlockTimesteps::new(IntegrationScheme::LeapfrogKdk, params(1));
        let mut p = moving_particle(0.1, 1.0);
        // Courant: 0.2*0.1/1 = 0.02.
        assert!((integ.compute_timestep(&p, 3) - 0.02).abs() < 1e-14);
        // A strong acceleration takes over: 0.3*sqrt(0.1/1000) = 0.003.
        p.a = [1000.0, 0.0, 0.0];
        assert!((integ.compute_timestep(&p, 3) - 0.3 * (0.1f64 / 1000.0).sqrt()).abs() < 1e-12);
        // A fierce heating rate takes over from both.
        p.dudt = 1.0e4;
        assert!((integ.compute_timestep(&p, 3) - 0.4 * 1.0 / 1.0e4).abs() < 1e-14);
    }

    #[test]
    fn levels_follow_timestep_ratio() {
        let mut integ = BlockTimesteps::new(IntegrationScheme::LeapfrogKdk, params(5));
        // vsig ratio 4 -> dt ratio 4 -> two levels apart.
        let fast = moving_particle(0.1, 4.0);
        let slow = moving_particle(0.1, 1.0);
        let mut store = store_of(vec![slow, fast]);
        integ.assign_levels(&mut store, 3);

        assert_eq!(store[1].level, 4, "min-dt particle on the finest level");
        assert_eq!(store[0].level, 2, "4x timestep sits two levels coarser");
        assert_eq!(integ.nresync, 16);
        assert!((integ.dt_min * 16.0 - integ.dt_max).abs() < 1e-18);
    }

    #[test]
    fn active_cadence_matches_levels() {
        let mut integ = BlockTimesteps::new(IntegrationScheme::LeapfrogKdk, params(3));
        let fast = moving_particle(0.1, 4.0);
        let slow = moving_particle(0.1, 1.0);
        let mut store = store_of(vec![slow, fast]);
        integ.assign_levels(&mut store, 3);
        assert_eq!(integ.nresync, 4);

        let mut active_counts = [0usize; 2];
        while !integ.needs_resync() {
            integ.begin_substep(&mut store);
            for i in 0..2 {
                if store[i].active {
                    active_counts[i] += 1;
                }
            }
            integ.advance(&mut store, 3);
            integ.correct(&mut store, 3);
        }
        assert_eq!(active_counts[1], 4, "finest level active every sub-step");
        assert_eq!(active_counts[0], 1, "coarsest level active once per block");
    }

    #[test]
    fn kdk_is_exact_for_constant_acceleration() {
        let mut integ = BlockTimesteps::new(IntegrationScheme::LeapfrogKdk, params(1));
        let mut p = moving_particle(0.1, 1.0);
        p.v = [1.0, 0.0, 0.0];
        p.a = [2.0, 0.0, 0.0];
        let mut store = store_of(vec![p]);
        integ.assign_levels(&mut store, 3);
        let dt = integ.dt_min;

        integ.begin_substep(&mut store);
        integ.advance(&mut store, 3);
        // Forces recompute to the same constant a.
        store[0].a = [2.0, 0.0, 0.0];
        integ.correct(&mut store, 3);

        assert!((store[0].r[0] - (1.0 * dt + 0.5 * 2.0 * dt * dt)).abs() < 1e-15);
        assert!((store[0].v[0] - (1.0 + 2.0 * dt)).abs() < 1e-15);
    }

    #[test]
    fn dkd_recovers_constant_acceleration_too() {
        let prm = TimestepParams { nlevels: 1, ..params(1) };
        let mut integ = BlockTimesteps::new(IntegrationScheme::LeapfrogDkd, prm);
        let mut p = moving_particle(0.1, 1.0);
        p.v = [1.0, 0.0, 0.0];
        p.a = [2.0, 0.0, 0.0];
        let mut store = store_of(vec![p]);
        integ.assign_levels(&mut store, 3);
        let dt = integ.dt_min;

        integ.begin_substep(&mut store);
        integ.advance(&mut store, 3);
        assert!((store[0].r[0] - 0.5 * dt).abs() < 1e-15, "midpoint drift");
        store[0].a = [2.0, 0.0, 0.0];
        integ.correct(&mut store, 3);
        assert!((store[0].v[0] - (1.0 + 2.0 * dt)).abs() < 1e-15);
        assert!((store[0].r[0] - (dt + 2.0 * dt * dt / 2.0)).abs() < 1e-15);
    }

    #[test]
    fn level_rise_is_capped_at_one_per_step() {
        let mut integ = BlockTimesteps::new(IntegrationScheme::LeapfrogKdk, params(6));
        let fast = moving_particle(0.1, 2.0);
        let slow = moving_particle(0.1, 1.0);
        let mut store = store_of(vec![slow, fast]);
        integ.assign_levels(&mut store, 3);
        let level0 = store[0].level;

        // Suddenly the slow particle needs a much smaller step; at its next
        // step boundary it may climb one level only.
        store[0].vsig_max = 64.0;
        let mut seen_active = false;
        while !integ.needs_resync() {
            integ.begin_substep(&mut store);
            integ.advance(&mut store, 3);
            let was_active = store[0].active;
            integ.correct(&mut store, 3);
            if was_active {
                seen_active = true;
                assert_eq!(store[0].level, (level0 + 1).min(integ.level_max));
                break;
            }
        }
        assert!(seen_active, "particle never reached a step boundary");
    }

    #[test]
    fn level_fall_blocked_by_levelneib() {
        let mut integ = BlockTimesteps::new(IntegrationScheme::LeapfrogKdk, params(4));
        let fast = moving_particle(0.1, 8.0);
        let slow = moving_particle(0.1, 1.0);
        let mut store = store_of(vec![slow, fast]);
        integ.assign_levels(&mut store, 3);
        let fast_level = store[1].level;
        assert_eq!(fast_level, 3);

        // Fast particle no longer needs the fine level, but a neighbour on
        // the finest level pins it within one.
        store[1].vsig_max = 1.0;
        store[1].levelneib = 3;
        // Run a full block so every alignment condition is met at least
        // once.
        while !integ.needs_resync() {
            integ.begin_substep(&mut store);
            integ.advance(&mut store, 3);
            integ.correct(&mut store, 3);
        }
        assert!(store[1].level >= 2, "levelneib must keep the particle within one level");
    }

    #[test]
    fn single_timestep_collapses_levels() {
        let mut prm = params(5);
        prm.single_timestep = true;
        let mut integ = BlockTimesteps::new(IntegrationScheme::LeapfrogKdk, prm);
        let fast = moving_particle(0.1, 4.0);
        let slow = moving_particle(0.1, 1.0);
        let mut store = store_of(vec![slow, fast]);
        integ.assign_levels(&mut store, 3);
        assert_eq!(integ.nresync, 1);
        assert_eq!(store[0].level, 0);
        assert_eq!(store[1].level, 0);
    }
}
