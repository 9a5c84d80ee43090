//! 2-D Kelvin-Helmholtz growth of the seeded mode. Minutes of runtime, so
//! ignored by default; run with `cargo test -- --ignored`.

use orchestrator::{SimConfig, Simulation};

fn khi_config() -> SimConfig {
    let json = r#"{
        "run_id": "khi",
        "sim": "sph",
        "ic": "khi",
        "ndim": 2,
        "Nhydro": 4096,
        "tend": 2.0,
        "sph": "gradh",
        "kernel": "m4",
        "gamma_eos": 1.6666666666666667,
        "avisc": "mon97",
        "alpha_visc": 1.0,
        "acond": "wadsley",
        "x_boundary_lhs": "periodic", "x_boundary_rhs": "periodic",
        "y_boundary_lhs": "periodic", "y_boundary_rhs": "periodic",
        "rhofluid1": 1.0,
        "rhofluid2": 2.0,
        "press1": 2.5,
        "press2": 2.5,
        "vfluid1": 0.5,
        "vfluid2": 0.5,
        "amp": 0.025,
        "lambda": 0.5,
        "Nlevels": 1,
        "seed": 3
    }"#;
    SimConfig::from_json(json).unwrap()
}

/// Amplitude of transverse-velocity mode `k` near the lower shear layer.
fn mode_amplitude(sim: &Simulation, k: usize) -> f64 {
    let mut re = 0.0;
    let mut im = 0.0;
    let mut n = 0usize;
    for p in sim.store.real() {
        if (p.r[1] - 0.25).abs() > 0.1 {
            continue;
        }
        let phase = 2.0 * std::f64::consts::PI * k as f64 * p.r[0];
        re += p.v[1] * phase.cos();
        im += p.v[1] * phase.sin();
        n += 1;
    }
    (re * re + im * im).sqrt() / n.max(1) as f64
}

#[test]
#[ignore = "minutes of runtime; scenario check for the full KH instability"]
fn seeded_mode_dominates() {
    let mut sim = Simulation::new(khi_config()).unwrap();
    sim.setup().unwrap();
    sim.run().unwrap();

    // lambda = 0.5 in a unit box seeds mode k = 2; it must out-grow every
    // other low-order mode, i.e. the dominant wavelength is within 10% of
    // the seed (the k grid is discrete, so dominance is the statement).
    let seeded = mode_amplitude(&sim, 2);
    for k in [1usize, 3, 4, 5, 6] {
        let other = mode_amplitude(&sim, k);
        assert!(
            seeded > other,
            "mode k={k} (amp {other}) outgrew the seeded k=2 (amp {seeded})"
        );
    }
}
