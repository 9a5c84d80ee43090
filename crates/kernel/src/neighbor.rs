//! Per-worker neighbour buffers with typed sublists and overflow-doubling.
//!
//! One `NeighborManager` lives on each worker thread for the duration of a
//! phase. A tree walk fills the raw candidate lists (reporting
//! [`BufferFull`] when the fixed capacity is hit), `end_search*` snapshots
//! the surviving candidates into a contiguous particle array for cache
//! locality, and the `get_particle_neib*` calls hand out per-particle typed
//! sublists trimmed by the exact pair ranges.
//!
//! Buffers grow by doubling and never shrink within a step. Doubling caps at
//! [`CAP_LIMIT`]; beyond that the query surfaces
//! [`SimError::NeighborBufferExhausted`].

use crate::domain::DomainBox;
use crate::error::SimError;
use crate::particle::{ParticleType, SphParticle};
use crate::tree::{MultipoleMoment, TreeCell};
use crate::vec::{norm_sqd, sub};

/// Signal that a caller-owned buffer was too small for a tree walk; the
/// caller doubles and retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferFull;

/// Hard cap on buffer doubling.
pub const CAP_LIMIT: usize = 1 << 24;

/// Lengths of the three gravity sublists.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListLength {
    /// Neighbours inside the kernel range (hydro interactions).
    pub nhydro: usize,
    /// Gravitating neighbours inside the near region but outside the kernel
    /// range of the requesting particle (smoothed pair gravity).
    pub ngrav: usize,
    /// Distant particles for direct Newtonian summation.
    pub ndirect: usize,
}

/// Per-thread neighbour scratch buffers.
pub struct NeighborManager {
    cap: usize,
    raw: Vec<usize>,
    rawdirect: Vec<usize>,
    gravcells: Vec<MultipoleMoment>,
    /// Contiguous particle snapshots (near block, then direct block).
    neibpart: Vec<SphParticle>,
    /// Whether the snapshot's original (parent for ghosts) was active at
    /// snapshot time; drives the pair-once rule.
    parent_active: Vec<bool>,
    /// Snapshots `[0, nnear)` are near contacts; the rest are direct.
    nnear: usize,
    hydrolist: Vec<usize>,
    gravlist: Vec<usize>,
    directlist: Vec<usize>,
}

impl NeighborManager {
    /// Create a manager with the given initial capacity.
    pub fn new(initial_cap: usize) -> Self {
        Self {
            cap: initial_cap.max(16),
            raw: Vec::new(),
            rawdirect: Vec::new(),
            gravcells: Vec::new(),
            neibpart: Vec::new(),
            parent_active: Vec::new(),
            nnear: 0,
            hydrolist: Vec::new(),
            gravlist: Vec::new(),
            directlist: Vec::new(),
        }
    }

    /// Reset all lists for the next cell. Capacity is kept.
    pub fn clear(&mut self) {
        self.raw.clear();
        self.rawdirect.clear();
        self.gravcells.clear();
        self.neibpart.clear();
        self.parent_active.clear();
        self.nnear = 0;
        self.hydrolist.clear();
        self.gravlist.clear();
        self.directlist.clear();
    }

    /// Double every buffer's capacity after an overflow.
    pub fn grow(&mut self) -> Result<(), SimError> {
        self.cap *= 2;
        if self.cap > CAP_LIMIT {
            return Err(SimError::NeighborBufferExhausted { cap: self.cap });
        }
        Ok(())
    }

    pub(crate) fn push_raw(&mut self, i: usize) -> Result<(), BufferFull> {
        if self.raw.len() >= self.cap {
            return Err(BufferFull);
        }
        self.raw.push(i);
        Ok(())
    }

    pub(crate) fn push_direct(&mut self, i: usize) -> Result<(), BufferFull> {
        if self.rawdirect.len() >= self.cap {
            return Err(BufferFull);
        }
        self.rawdirect.push(i);
        Ok(())
    }

    pub(crate) fn push_gravcell(&mut self, moment: MultipoleMoment) -> Result<(), BufferFull> {
        if self.gravcells.len() >= self.cap {
            return Err(BufferFull);
        }
        self.gravcells.push(moment);
        Ok(())
    }

    /// Number of raw candidates (tests and diagnostics).
    pub fn raw_len(&self) -> usize {
        self.raw.len()
    }

    /// Raw candidate ids (tests and diagnostics).
    pub fn raw_ids(&self) -> &[usize] {
        &self.raw
    }

    /// Number of direct candidates.
    pub fn direct_len(&self) -> usize {
        self.rawdirect.len()
    }

    /// Accepted cell moments.
    pub fn gravcells(&self) -> &[MultipoleMoment] {
        &self.gravcells
    }

    /// Finalize a hydro search: trim raw candidates that cannot reach the
    /// cell (using both the cell's gather radius and the candidate's own
    /// kernel reach) and snapshot the survivors.
    pub fn end_search(
        &mut self,
        cell: &TreeCell,
        parts: &[SphParticle],
        kernrange: f64,
        ndim: usize,
    ) {
        let cell_reach = kernrange * cell.hmax;
        for idx in 0..self.raw.len() {
            let j = self.raw[idx];
            let p = &parts[j];
            let reach = cell_reach.max(kernrange * p.h);
            if box_distance_sqd(cell, &p.r, ndim) <= reach * reach {
                self.snapshot(j, parts);
            }
        }
        self.nnear = self.neibpart.len();
    }

    /// Finalize a gravity search: snapshot the whole near block, then the
    /// direct block behind it. No candidate is trimmed here -- a near
    /// contact beyond the pair kernel range still gravitates, and the
    /// smoothed pair force reduces to Newtonian outside the kernel; the
    /// per-particle split rule sorts every snapshot into its sublist.
    ///
    /// With `simbox` set (periodic gravity), every snapshot position and
    /// cell moment is re-mapped to the nearest periodic image about the
    /// active cell's centre of mass, matching the periodic-aware tree walk.
    pub fn end_search_gravity(
        &mut self,
        cell: &TreeCell,
        parts: &[SphParticle],
        ndim: usize,
        simbox: Option<&DomainBox>,
    ) {
        for idx in 0..self.raw.len() {
            let j = self.raw[idx];
            self.snapshot(j, parts);
        }
        self.nnear = self.neibpart.len();
        for idx in 0..self.rawdirect.len() {
            let j = self.rawdirect[idx];
            self.snapshot(j, parts);
        }

        if let Some(sb) = simbox {
            for p in self.neibpart.iter_mut() {
                let mut dr = sub(&p.r, &cell.r);
                sb.nearest_image(&mut dr);
                for d in 0..ndim {
                    p.r[d] = cell.r[d] + dr[d];
                }
            }
            for moment in self.gravcells.iter_mut() {
                let mut dr = sub(&moment.r, &cell.r);
                sb.nearest_image(&mut dr);
                for d in 0..ndim {
                    moment.r[d] = cell.r[d] + dr[d];
                }
            }
        }
    }

    fn snapshot(&mut self, j: usize, parts: &[SphParticle]) {
        let p = &parts[j];
        self.parent_active.push(parts[p.iorig].active);
        self.neibpart.push(p.clone());
    }

    /// Hydro neighbour list of one active particle.
    ///
    /// Keeps snapshot `k` when the pair distance is inside
    /// `max(kernrange*h_i, kernrange*h_j)` and the species mask allows the
    /// interaction. With `do_pair_once` a both-active pair is kept only on
    /// the lower-id side, and inactive (or ghost-of-inactive) neighbours are
    /// always kept, so each interacting pair is visited exactly once.
    pub fn get_particle_neib(
        &mut self,
        part: &SphParticle,
        ndim: usize,
        do_pair_once: bool,
    ) -> (&[usize], &[SphParticle]) {
        self.hydrolist.clear();
        for k in 0..self.nnear {
            let neib = &self.neibpart[k];
            if neib.iorig == part.id && !neib.is_ghost() {
                continue;
            }
            if !part.ptype.hydro_mask(neib.ptype) {
                continue;
            }
            if do_pair_once && self.parent_active[k] && neib.iorig <= part.id {
                continue;
            }
            let drsqd = norm_sqd(&sub(&neib.r, &part.r), ndim);
            if drsqd <= part.hrangesqd.max(neib.hrangesqd) {
                self.hydrolist.push(k);
            }
        }
        (&self.hydrolist, &self.neibpart)
    }

    /// Gravity split for one active particle: hydro / smoothed-gravity /
    /// direct sublists over the shared snapshot block.
    pub fn get_particle_neib_gravity(
        &mut self,
        part: &SphParticle,
        ndim: usize,
        do_grav: bool,
    ) -> (ListLength, &[usize], &[usize], &[usize], &[SphParticle]) {
        self.hydrolist.clear();
        self.gravlist.clear();
        self.directlist.clear();

        for k in 0..self.nnear {
            let neib = &self.neibpart[k];
            if neib.iorig == part.id && !neib.is_ghost() {
                continue;
            }
            let drsqd = norm_sqd(&sub(&neib.r, &part.r), ndim);
            if drsqd <= f64::MIN_POSITIVE {
                continue;
            }
            // Ghost images never carry mass of their own into the gravity
            // sums (periodic gravity runs on nearest images instead).
            let grav_ok = do_grav && neib.ptype.gravitates() && !neib.is_ghost();
            if drsqd <= part.hrangesqd || drsqd <= neib.hrangesqd {
                if part.ptype.hydro_mask(neib.ptype) {
                    self.hydrolist.push(k);
                } else if grav_ok {
                    self.gravlist.push(k);
                }
            } else if grav_ok {
                // Near-region particle beyond this particle's kernel:
                // smoothed pair gravity.
                self.gravlist.push(k);
            }
        }
        if do_grav {
            for k in self.nnear..self.neibpart.len() {
                self.directlist.push(k);
            }
        }

        let lengths = ListLength {
            nhydro: self.hydrolist.len(),
            ngrav: self.gravlist.len(),
            ndirect: self.directlist.len(),
        };
        (lengths, &self.hydrolist, &self.gravlist, &self.directlist, &self.neibpart)
    }
}

/// Squared distance from a point to a cell's bounding box.
fn box_distance_sqd(cell: &TreeCell, r: &[f64; 3], ndim: usize) -> f64 {
    let mut dsqd = 0.0;
    for d in 0..ndim {
        let lo = cell.bbmin[d] - r[d];
        let hi = r[d] - cell.bbmax[d];
        let gap = lo.max(hi).max(0.0);
        dsqd += gap * gap;
    }
    dsqd
}

/// The grow-and-retry wrapper used around every tree walk.
///
/// Runs `walk` against the manager; on [`BufferFull`] doubles the buffers
/// and retries, failing only once the doubling cap is reached.
pub fn with_overflow_retry<F>(mgr: &mut NeighborManager, mut walk: F) -> Result<(), SimError>
where
    F: FnMut(&mut NeighborManager) -> Result<(), BufferFull>,
{
    loop {
        mgr.clear();
        match walk(mgr) {
            Ok(()) => return Ok(()),
            Err(BufferFull) => mgr.grow()?,
        }
    }
}
