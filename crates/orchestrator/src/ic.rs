//! Initial-condition generators.
//!
//! Each generator fills a fresh [`ParticleStore`] (and optionally a star
//! array) from the configuration, then hands control to the driver. All
//! stochastic generators draw from a seeded RNG, so runs are reproducible.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use kernel::eos::Eos;
use kernel::nbody::StarParticle;
use kernel::particle::{ParticleStore, SphParticle};
use kernel::{DomainBox, SimError};

use crate::config::{IcKind, SimConfig};

/// Build the initial particle set selected by `config.ic`.
pub fn generate(
    config: &SimConfig,
    simbox: &DomainBox,
) -> Result<(ParticleStore, Vec<StarParticle>), SimError> {
    let eos = config.eos();
    match config.ic {
        IcKind::RandomBox => Ok((random_box(config, simbox, &eos), Vec::new())),
        IcKind::LatticeBox => Ok((lattice_box(config, simbox, &eos), Vec::new())),
        IcKind::Shocktube => Ok((shocktube(config, simbox, &eos), Vec::new())),
        IcKind::Khi => Ok((khi(config, simbox, &eos), Vec::new())),
        IcKind::Plummer => plummer(config),
    }
}

/// Mean inter-particle spacing for a target density and particle count.
fn initial_h(config: &SimConfig, simbox: &DomainBox, n: usize) -> f64 {
    let mut volume = 1.0;
    for d in 0..config.ndim {
        volume *= simbox.boxsize[d];
    }
    config.h_fac * (volume / n as f64).powf(1.0 / config.ndim as f64)
}

fn push_gas(
    store: &mut ParticleStore,
    config: &SimConfig,
    r: [f64; 3],
    v: [f64; 3],
    m: f64,
    u: f64,
    h: f64,
) {
    let mut p = SphParticle::new(0);
    p.r = r;
    p.v = v;
    p.m = m;
    p.u = u;
    p.alpha = config.alpha_visc;
    p.active = true;
    p.set_h(h, config.ndim, 0.0);
    store.push(p);
}

/// Uniform random positions with equal masses.
fn random_box(config: &SimConfig, simbox: &DomainBox, eos: &Eos) -> ParticleStore {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut store = ParticleStore::new(config.capacity());
    let n = config.nhydro;

    let mut volume = 1.0;
    for d in 0..config.ndim {
        volume *= simbox.boxsize[d];
    }
    let m = config.rhofluid1 * volume / n as f64;
    let u = eos.u_from_press(config.rhofluid1, config.press1);
    let h = initial_h(config, simbox, n);

    for _ in 0..n {
        let mut r = [0.0; 3];
        for d in 0..config.ndim {
            r[d] = simbox.boxmin[d] + rng.gen::<f64>() * simbox.boxsize[d];
        }
        push_gas(&mut store, config, r, [0.0; 3], m, u, h);
    }
    store
}

/// Side lengths of a lattice with roughly `n` sites in `ndim` dimensions.
fn lattice_dims(n: usize, ndim: usize) -> [usize; 3] {
    match ndim {
        1 => [n, 1, 1],
        2 => {
            let side = (n as f64).sqrt().round() as usize;
            [side.max(1), side.max(1), 1]
        }
        _ => {
            let side = (n as f64).cbrt().round() as usize;
            [side.max(1), side.max(1), side.max(1)]
        }
    }
}

/// Regular lattice filling the whole box.
fn lattice_box(config: &SimConfig, simbox: &DomainBox, eos: &Eos) -> ParticleStore {
    let dims = lattice_dims(config.nhydro, config.ndim);
    let n = dims[0] * dims[1] * dims[2];
    let mut store = ParticleStore::new(4 * n);

    let mut volume = 1.0;
    for d in 0..config.ndim {
        volume *= simbox.boxsize[d];
    }
    let m = config.rhofluid1 * volume / n as f64;
    let u = eos.u_from_press(config.rhofluid1, config.press1);
    let h = initial_h(config, simbox, n);

    for i in 0..dims[0] {
        for j in 0..dims[1] {
            for k in 0..dims[2] {
                let frac = [
                    (i as f64 + 0.5) / dims[0] as f64,
                    (j as f64 + 0.5) / dims[1] as f64,
                    (k as f64 + 0.5) / dims[2] as f64,
                ];
                let mut r = [0.0; 3];
                for d in 0..config.ndim {
                    r[d] = simbox.boxmin[d] + frac[d] * simbox.boxsize[d];
                }
                push_gas(&mut store, config, r, [0.0; 3], m, u, h);
            }
        }
    }
    store
}

/// 1-D two-state Riemann problem with equal-mass particles: lattice spacing
/// follows the density on each side of the interface at the box midpoint.
fn shocktube(config: &SimConfig, simbox: &DomainBox, eos: &Eos) -> ParticleStore {
    let xmid = 0.5 * (simbox.boxmin[0] + simbox.boxmax[0]);
    let lbox1 = xmid - simbox.boxmin[0];
    let lbox2 = simbox.boxmax[0] - xmid;
    let mass1 = config.rhofluid1 * lbox1;
    let mass2 = config.rhofluid2 * lbox2;
    let m = (mass1 + mass2) / config.nhydro as f64;
    let n1 = ((mass1 / (mass1 + mass2)) * config.nhydro as f64).round() as usize;
    let n2 = config.nhydro - n1;

    let mut store = ParticleStore::new(4 * config.nhydro);
    let dx1 = lbox1 / n1 as f64;
    for i in 0..n1 {
        let x = simbox.boxmin[0] + (i as f64 + 0.5) * dx1;
        let u = eos.u_from_press(config.rhofluid1, config.press1);
        push_gas(
            &mut store,
            config,
            [x, 0.0, 0.0],
            [config.vfluid1, 0.0, 0.0],
            m,
            u,
            config.h_fac * dx1,
        );
    }
    let dx2 = lbox2 / n2 as f64;
    for i in 0..n2 {
        let x = xmid + (i as f64 + 0.5) * dx2;
        let u = eos.u_from_press(config.rhofluid2, config.press2);
        push_gas(
            &mut store,
            config,
            [x, 0.0, 0.0],
            [config.vfluid2, 0.0, 0.0],
            m,
            u,
            config.h_fac * dx2,
        );
    }
    tracing::info!(n1, n2, m, "shock tube initialised");
    store
}

/// 2-D Kelvin-Helmholtz two-stream setup: a denser central band
/// counter-streams against the ambient gas, seeded with a sinusoidal
/// transverse velocity perturbation of wavelength `lambda`.
fn khi(config: &SimConfig, simbox: &DomainBox, eos: &Eos) -> ParticleStore {
    let mut store = ParticleStore::new(4 * config.nhydro);

    // Split the particle budget by stripe mass so particles are equal-mass.
    let area = simbox.boxsize[0] * simbox.boxsize[1];
    let mass1 = config.rhofluid1 * 0.5 * area;
    let mass2 = config.rhofluid2 * 0.5 * area;
    let m = (mass1 + mass2) / config.nhydro as f64;
    let n2 = ((mass2 / (mass1 + mass2)) * config.nhydro as f64).round() as usize;
    let n1 = config.nhydro - n2;

    let yq1 = simbox.boxmin[1] + 0.25 * simbox.boxsize[1];
    let yq3 = simbox.boxmin[1] + 0.75 * simbox.boxsize[1];

    // Outer stripe: two quarter-height bands below yq1 and above yq3,
    // covered by one lattice whose row fraction folds across them.
    let cols1 = ((n1 as f64 * simbox.boxsize[0] / (0.5 * simbox.boxsize[1])).sqrt()).round()
        as usize;
    let cols1 = cols1.max(1);
    let rows1 = (n1 + cols1 - 1) / cols1;
    let u1 = eos.u_from_press(config.rhofluid1, config.press1);
    let h1 = config.h_fac * (0.5 * area / n1 as f64).sqrt();
    let mut placed = 0;
    'outer1: for j in 0..rows1 {
        for i in 0..cols1 {
            if placed >= n1 {
                break 'outer1;
            }
            let x = simbox.boxmin[0] + (i as f64 + 0.5) / cols1 as f64 * simbox.boxsize[0];
            let yfrac = (j as f64 + 0.5) / rows1 as f64;
            let y = if yfrac < 0.5 {
                simbox.boxmin[1] + yfrac * 0.5 * simbox.boxsize[1]
            } else {
                yq3 + (yfrac - 0.5) * 0.5 * simbox.boxsize[1]
            };
            let vy = perturbation(config, x, y, yq1, yq3);
            push_gas(
                &mut store,
                config,
                [x, y, 0.0],
                [-config.vfluid1.abs(), vy, 0.0],
                m,
                u1,
                h1,
            );
            placed += 1;
        }
    }

    // Inner stripe, lattice at rhofluid2, counter-streaming.
    let cols2 =
        ((n2 as f64 * simbox.boxsize[0] / (0.5 * simbox.boxsize[1])).sqrt()).round() as usize;
    let cols2 = cols2.max(1);
    let rows2 = (n2 + cols2 - 1) / cols2;
    let u2 = eos.u_from_press(config.rhofluid2, config.press2);
    let h2 = config.h_fac * (0.5 * area / n2 as f64).sqrt();
    let mut placed = 0;
    'outer2: for j in 0..rows2 {
        for i in 0..cols2 {
            if placed >= n2 {
                break 'outer2;
            }
            let x = simbox.boxmin[0] + (i as f64 + 0.5) / cols2 as f64 * simbox.boxsize[0];
            let y = yq1 + (j as f64 + 0.5) / rows2 as f64 * 0.5 * simbox.boxsize[1];
            let vy = perturbation(config, x, y, yq1, yq3);
            push_gas(
                &mut store,
                config,
                [x, y, 0.0],
                [config.vfluid2.abs(), vy, 0.0],
                m,
                u2,
                h2,
            );
            placed += 1;
        }
    }
    store
}

/// Sinusoidal seed perturbation, strongest at the two shear interfaces.
fn perturbation(config: &SimConfig, x: f64, y: f64, yq1: f64, yq3: f64) -> f64 {
    let sigma = 0.05;
    let envelope = (-(y - yq1).powi(2) / (2.0 * sigma * sigma)).exp()
        + (-(y - yq3).powi(2) / (2.0 * sigma * sigma)).exp();
    config.amp * (2.0 * std::f64::consts::PI * x / config.lambda).sin() * envelope
}

/// Plummer sphere in virial equilibrium: stars carry a velocity dispersion
/// drawn by von Neumann rejection; gas carries the equivalent thermal
/// energy, `u = sigma^2(r) / (gamma - 1)`.
fn plummer(config: &SimConfig) -> Result<(ParticleStore, Vec<StarParticle>), SimError> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mtot = config.mplummer;
    let a = config.rplummer;
    let mgas = mtot * config.gasfrac;
    let mstar = mtot - mgas;
    if config.gasfrac > 0.0 && config.nhydro == 0 {
        return Err(SimError::Config("plummer with gasfrac > 0 needs Nhydro > 0".into()));
    }

    let mut sample_position = |rng: &mut StdRng| -> ([f64; 3], f64) {
        // Inverse-transform radius, capped to keep outliers in the box.
        let mut radius;
        loop {
            let u: f64 = rng.gen_range(1.0e-8..1.0f64);
            radius = a / (u.powf(-2.0 / 3.0) - 1.0).sqrt();
            if radius < 10.0 * a {
                break;
            }
        }
        let costheta = rng.gen_range(-1.0..1.0f64);
        let sintheta = (1.0 - costheta * costheta).sqrt();
        let phi = rng.gen_range(0.0..2.0 * std::f64::consts::PI);
        (
            [
                radius * sintheta * phi.cos(),
                radius * sintheta * phi.sin(),
                radius * costheta,
            ],
            radius,
        )
    };

    // Gas half: at rest, with the thermal energy of a hydrostatic Plummer
    // gas sphere, P = rho sigma^2(r), sigma^2 = M / (6 sqrt(r^2 + a^2)).
    let mut store = ParticleStore::new(4 * config.nhydro.max(1));
    let h0 = config.h_fac * a / (config.nhydro.max(1) as f64).powf(1.0 / 3.0);
    for _ in 0..config.nhydro {
        let (r, radius) = sample_position(&mut rng);
        let sigma_sqd = mtot / (6.0 * (radius * radius + a * a).sqrt());
        let u = sigma_sqd / (config.gamma_eos - 1.0);
        push_gas(
            &mut store,
            config,
            r,
            [0.0; 3],
            mgas / config.nhydro.max(1) as f64,
            u,
            h0,
        );
    }

    // Star half with the classic q^2 (1 - q^2)^(7/2) rejection.
    let mut stars = Vec::with_capacity(config.nstar);
    for _ in 0..config.nstar {
        let (r, radius) = sample_position(&mut rng);
        let vesc = (2.0 * mtot / (radius * radius + a * a).sqrt()).sqrt();
        let q = loop {
            let q: f64 = rng.gen_range(0.0..1.0);
            let g: f64 = rng.gen_range(0.0..0.1);
            if g < q * q * (1.0 - q * q).powf(3.5) {
                break q;
            }
        };
        let speed = q * vesc;
        let costheta = rng.gen_range(-1.0..1.0f64);
        let sintheta = (1.0 - costheta * costheta).sqrt();
        let phi = rng.gen_range(0.0..2.0 * std::f64::consts::PI);

        let mut star = StarParticle::new(mstar / config.nstar.max(1) as f64, 0.05 * a);
        star.r = r;
        star.v = [
            speed * sintheta * phi.cos(),
            speed * sintheta * phi.sin(),
            speed * costheta,
        ];
        stars.push(star);
    }

    Ok((store, stars))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    fn config(ic: &str, ndim: usize, nhydro: usize) -> SimConfig {
        let json = format!(
            r#"{{
                "run_id": "ic-test",
                "sim": "sph",
                "ic": "{ic}",
                "ndim": {ndim},
                "Nhydro": {nhydro},
                "Nstar": {nstar},
                "tend": 1.0,
                "sph": "gradh",
                "kernel": "m4",
                "rhofluid1": 1.0,
                "rhofluid2": 0.125,
                "press1": 1.0,
                "press2": 0.1,
                "gamma_eos": 1.4
            }}"#,
            nstar = if ic == "plummer" { 16 } else { 0 },
        );
        SimConfig::from_json(&json).unwrap()
    }

    #[test]
    fn lattice_box_fills_domain_with_target_density() {
        let cfg = config("lattice_box", 3, 64);
        let simbox = cfg.simbox();
        let (store, stars) = generate(&cfg, &simbox).unwrap();
        assert!(stars.is_empty());
        assert_eq!(store.nhydro, 64);
        let mtot: f64 = store.real().iter().map(|p| p.m).sum();
        assert!((mtot - 1.0).abs() < 1e-12, "total mass {mtot}");
        for p in store.real() {
            for d in 0..3 {
                assert!(p.r[d] > 0.0 && p.r[d] < 1.0);
            }
        }
    }

    #[test]
    fn random_box_is_seeded() {
        let cfg = config("random_box", 3, 32);
        let simbox = cfg.simbox();
        let (a, _) = generate(&cfg, &simbox).unwrap();
        let (b, _) = generate(&cfg, &simbox).unwrap();
        for (pa, pb) in a.real().iter().zip(b.real()) {
            assert_eq!(pa.r, pb.r, "same seed must reproduce positions");
        }
    }

    #[test]
    fn shocktube_has_denser_left_lattice() {
        let cfg = config("shocktube", 1, 400);
        let simbox = cfg.simbox();
        let (store, _) = generate(&cfg, &simbox).unwrap();
        assert_eq!(store.nhydro, 400);

        let left = store.real().iter().filter(|p| p.r[0] < 0.5).count();
        let right = store.nhydro - left;
        // Mass split 1 : 0.125 puts ~8/9 of the particles on the left.
        assert!(left > 6 * right, "left {left}, right {right}");

        // Equal masses everywhere.
        let m0 = store.real()[0].m;
        for p in store.real() {
            assert!((p.m - m0).abs() < 1e-14);
        }
        // Pressure jump via the internal energy.
        let u_left = store.real().iter().find(|p| p.r[0] < 0.4).unwrap().u;
        let u_right = store.real().iter().find(|p| p.r[0] > 0.6).unwrap().u;
        assert!((u_left - 2.5).abs() < 1e-12, "u_left = {u_left}");
        assert!((u_right - 2.0).abs() < 1e-12, "u_right = {u_right}");
    }

    #[test]
    fn khi_streams_counterflow() {
        let mut cfg = config("khi", 2, 1024);
        cfg.vfluid1 = 0.5;
        cfg.vfluid2 = 0.5;
        cfg.rhofluid2 = 2.0;
        let simbox = cfg.simbox();
        let (store, _) = generate(&cfg, &simbox).unwrap();

        let inner: Vec<_> =
            store.real().iter().filter(|p| p.r[1] > 0.25 && p.r[1] < 0.75).collect();
        let outer: Vec<_> =
            store.real().iter().filter(|p| p.r[1] <= 0.25 || p.r[1] >= 0.75).collect();
        assert!(!inner.is_empty() && !outer.is_empty());
        assert!(inner.iter().all(|p| p.v[0] > 0.0));
        assert!(outer.iter().all(|p| p.v[0] < 0.0));
        // The denser stream holds more of the equal-mass particles.
        assert!(inner.len() > outer.len());
    }

    #[test]
    fn plummer_masses_and_virial_scale() {
        let cfg = config("plummer", 3, 256);
        let simbox = cfg.simbox();
        let (store, stars) = generate(&cfg, &simbox).unwrap();
        assert_eq!(stars.len(), 16);

        let mgas: f64 = store.real().iter().map(|p| p.m).sum();
        let mstar: f64 = stars.iter().map(|s| s.m).sum();
        assert!((mgas - 0.5).abs() < 1e-12);
        assert!((mstar - 0.5).abs() < 1e-12);

        // Median radius of a Plummer sphere is ~1.3 a.
        let mut radii: Vec<f64> =
            store.real().iter().map(|p| (p.r[0].powi(2) + p.r[1].powi(2) + p.r[2].powi(2)).sqrt())
                .collect();
        radii.sort_by(f64::total_cmp);
        let median = radii[radii.len() / 2];
        assert!(median > 0.8 && median < 2.0, "median radius {median}");

        // No star exceeds the local escape speed.
        for s in &stars {
            let r = (s.r[0].powi(2) + s.r[1].powi(2) + s.r[2].powi(2)).sqrt();
            let vesc = (2.0f64 / (r * r + 1.0).sqrt()).sqrt();
            let v = (s.v[0].powi(2) + s.v[1].powi(2) + s.v[2].powi(2)).sqrt();
            assert!(v <= vesc + 1e-12);
        }
    }
}
