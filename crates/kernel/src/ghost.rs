//! Ghost-particle replication for periodic and mirror boundaries.
//!
//! Ghosts are regenerated from scratch every rebuild cycle and live in the
//! contiguous tail of the particle array. Creation is serial (it appends to
//! the shared tail); the per-substep state refresh is embarrassingly
//! parallel over disjoint tail slots.

use rayon::prelude::*;

use crate::domain::{BoundaryKind, DomainBox, LHS, RHS};
use crate::error::SimError;
use crate::particle::{GhostType, ParticleStore, SphParticle};

/// Safety margin on the kernel reach used when searching for particles that
/// need ghosts: a particle within `ghost_range * kernrange * h` of a closed
/// face is replicated.
pub const GHOST_RANGE: f64 = 1.1;

/// Wrap or reflect every real particle that left the box.
pub fn check_boundaries(store: &mut ParticleStore, simbox: &DomainBox) {
    for part in store.real_mut() {
        let (r, v) = (&mut part.r, &mut part.v);
        simbox.wrap_or_reflect(r, v);
    }
}

/// Rebuild the ghost tail for the current particle positions.
///
/// Dimensions are processed in order and the scan range is extended after
/// each one, so ghosts created for dimension d are themselves cloned across
/// the closed faces of later dimensions (corner and edge copies).
pub fn refresh_ghosts(
    store: &mut ParticleStore,
    simbox: &DomainBox,
    kernrange: f64,
) -> Result<(), SimError> {
    store.clear_ghosts();

    if !simbox.any_closed() {
        return Ok(());
    }

    for d in 0..simbox.ndim {
        if !simbox.closed(d) {
            continue;
        }
        let ntot = store.ntot();
        for i in 0..ntot {
            let reach = GHOST_RANGE * kernrange * store[i].h;

            if store[i].r[d] < simbox.boxmin[d] + reach {
                match simbox.bounds[d][LHS] {
                    BoundaryKind::Periodic => {
                        let rk = store[i].r[d] + simbox.boxsize[d];
                        let vk = store[i].v[d];
                        create_ghost(store, i, d, rk, vk, GhostType::Periodic {
                            dim: d as u8,
                            lhs: true,
                        })?;
                    }
                    BoundaryKind::Mirror => {
                        let rk = 2.0 * simbox.boxmin[d] - store[i].r[d];
                        let vk = -store[i].v[d];
                        create_ghost(store, i, d, rk, vk, GhostType::Mirror {
                            dim: d as u8,
                            lhs: true,
                        })?;
                    }
                    BoundaryKind::Open => {}
                }
            }

            if store[i].r[d] > simbox.boxmax[d] - reach {
                match simbox.bounds[d][RHS] {
                    BoundaryKind::Periodic => {
                        let rk = store[i].r[d] - simbox.boxsize[d];
                        let vk = store[i].v[d];
                        create_ghost(store, i, d, rk, vk, GhostType::Periodic {
                            dim: d as u8,
                            lhs: false,
                        })?;
                    }
                    BoundaryKind::Mirror => {
                        let rk = 2.0 * simbox.boxmax[d] - store[i].r[d];
                        let vk = -store[i].v[d];
                        create_ghost(store, i, d, rk, vk, GhostType::Mirror {
                            dim: d as u8,
                            lhs: false,
                        })?;
                    }
                    BoundaryKind::Open => {}
                }
            }
        }
    }

    tracing::debug!(nghost = store.nghost, "ghost refresh complete");
    Ok(())
}

/// Clone particle `i` into the ghost tail with component `d` of position and
/// velocity overwritten. `iorig` chases through `i` to the true original so
/// state refreshes always read a real particle.
fn create_ghost(
    store: &mut ParticleStore,
    i: usize,
    d: usize,
    rk: f64,
    vk: f64,
    itype: GhostType,
) -> Result<(), SimError> {
    let mut ghost = store[i].clone();
    ghost.r[d] = rk;
    ghost.v[d] = vk;
    ghost.active = false;
    ghost.ghost = itype;
    ghost.iorig = store[i].iorig;
    ghost.id = store.ntot();
    store.push_ghost(ghost)
}

/// Refresh every ghost's state from its original particle.
///
/// The position and velocity fixed at creation (already transformed, with
/// mirror axes sign-flipped) are preserved; everything else is reloaded from
/// the original. Called whenever originals changed and before any neighbour
/// query that reads ghost state.
pub fn copy_state_to_ghosts(store: &mut ParticleStore) {
    let nhydro = store.nhydro;
    let (reals, ghosts) = store.all_mut().split_at_mut(nhydro);

    ghosts.par_iter_mut().for_each(|ghost| {
        let saved_r = ghost.r;
        let saved_v = ghost.v;
        let saved_id = ghost.id;
        let saved_iorig = ghost.iorig;
        let saved_type = ghost.ghost;

        *ghost = reals[saved_iorig].clone();
        ghost.r = saved_r;
        ghost.v = saved_v;
        ghost.id = saved_id;
        ghost.iorig = saved_iorig;
        ghost.ghost = saved_type;
        ghost.active = false;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BoundaryKind;

    fn periodic_box(ndim: usize) -> DomainBox {
        DomainBox::new(ndim, [0.0; 3], [1.0; 3], [[BoundaryKind::Periodic; 2]; 3], true)
    }

    fn store_with(positions: &[[f64; 3]], h: f64) -> ParticleStore {
        let mut store = ParticleStore::new(positions.len() * 30);
        for &r in positions {
            let mut p = SphParticle::new(0);
            p.r = r;
            p.m = 1.0;
            p.u = 1.5;
            p.set_h(h, 3, 4.0 * h * h);
            store.push(p);
        }
        store
    }

    #[test]
    fn ghost_created_near_periodic_face() {
        let simbox = periodic_box(1);
        let mut store = store_with(&[[0.02, 0.5, 0.5]], 0.05);
        refresh_ghosts(&mut store, &simbox, 2.0).unwrap();
        assert_eq!(store.nghost, 1);
        let g = &store.ghosts()[0];
        assert!((g.r[0] - 1.02).abs() < 1e-14);
        assert_eq!(g.iorig, 0);
        assert!(!g.active);
        assert!(matches!(g.ghost, GhostType::Periodic { dim: 0, lhs: true }));
    }

    #[test]
    fn mirror_ghost_flips_velocity() {
        let simbox = DomainBox::new(
            1,
            [0.0; 3],
            [1.0; 3],
            [[BoundaryKind::Mirror; 2]; 3],
            false,
        );
        let mut store = store_with(&[[0.03, 0.5, 0.5]], 0.05);
        store.real_mut()[0].v = [0.7, 0.0, 0.0];
        refresh_ghosts(&mut store, &simbox, 2.0).unwrap();
        assert_eq!(store.nghost, 1);
        let g = &store.ghosts()[0];
        assert!((g.r[0] + 0.03).abs() < 1e-14);
        assert_eq!(g.v[0], -0.7);
    }

    #[test]
    fn corner_ghost_from_ghost() {
        // A particle in the corner of a 2-D periodic box must spawn three
        // images: x-shifted, y-shifted, and the diagonal corner copy cloned
        // from the x ghost.
        let simbox = periodic_box(2);
        let mut store = store_with(&[[0.02, 0.03, 0.0]], 0.05);
        refresh_ghosts(&mut store, &simbox, 2.0).unwrap();
        assert_eq!(store.nghost, 3);
        let corner = store
            .ghosts()
            .iter()
            .find(|g| g.r[0] > 1.0 && g.r[1] > 1.0)
            .expect("corner ghost missing");
        assert_eq!(corner.iorig, 0, "iorig must chase to the real original");
    }

    #[test]
    fn interior_particle_spawns_no_ghosts() {
        let simbox = periodic_box(3);
        let mut store = store_with(&[[0.5, 0.5, 0.5]], 0.05);
        refresh_ghosts(&mut store, &simbox, 2.0).unwrap();
        assert_eq!(store.nghost, 0);
    }

    #[test]
    fn refresh_is_idempotent() {
        // Two refreshes without advancing time give bit-identical tails.
        let simbox = periodic_box(3);
        let mut store = store_with(
            &[[0.02, 0.5, 0.5], [0.97, 0.04, 0.5], [0.5, 0.5, 0.98]],
            0.05,
        );
        refresh_ghosts(&mut store, &simbox, 2.0).unwrap();
        let first: Vec<(usize, [f64; 3])> =
            store.ghosts().iter().map(|g| (g.iorig, g.r)).collect();
        refresh_ghosts(&mut store, &simbox, 2.0).unwrap();
        let second: Vec<(usize, [f64; 3])> =
            store.ghosts().iter().map(|g| (g.iorig, g.r)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn copy_state_preserves_transform() {
        let simbox = periodic_box(1);
        let mut store = store_with(&[[0.02, 0.5, 0.5]], 0.05);
        refresh_ghosts(&mut store, &simbox, 2.0).unwrap();

        // Mutate the original's thermal state; the ghost must pick it up
        // while keeping its shifted position.
        store.real_mut()[0].u = 9.0;
        store.real_mut()[0].rho = 3.5;
        copy_state_to_ghosts(&mut store);
        let g = &store.ghosts()[0];
        assert_eq!(g.u, 9.0);
        assert_eq!(g.rho, 3.5);
        assert!((g.r[0] - 1.02).abs() < 1e-14);
        assert!(!g.active);
    }

    #[test]
    fn ghost_overflow_detected() {
        let simbox = periodic_box(3);
        // Room for the particle but not for its images.
        let mut store = ParticleStore::new(2);
        let mut p = SphParticle::new(0);
        p.r = [0.02, 0.03, 0.04];
        p.set_h(0.05, 3, 4.0 * 0.05 * 0.05);
        store.push(p);
        let err = refresh_ghosts(&mut store, &simbox, 2.0).unwrap_err();
        assert!(matches!(err, SimError::GhostOverflow { .. }));
    }
}
