//! Balanced KD tree over particles: build, stock, and the three walk
//! families (gather, symmetric scatter, gravity with multipole acceptance).
//!
//! The tree holds non-owning indices into the particle store. Cells are laid
//! out in creation order, so children always follow their parent and a
//! single reverse sweep stocks the tree bottom-up. Queries push candidates
//! into caller-owned [`NeighborManager`] buffers and report
//! [`BufferFull`](crate::neighbor::BufferFull) instead of growing them; the
//! caller owns the grow-and-retry policy.

use crate::domain::DomainBox;
use crate::neighbor::{BufferFull, NeighborManager};
use crate::particle::{ParticleType, SphParticle};
use crate::vec::{dot, sub};

/// Multipole data of an accepted tree cell, as consumed by the gravity
/// kernels.
#[derive(Debug, Clone, Copy)]
pub struct MultipoleMoment {
    /// Cell centre of mass.
    pub r: [f64; 3],
    /// Total cell mass.
    pub m: f64,
    /// Traceless quadrupole moment (xx, xy, yy, xz, yz); zz is implied.
    pub q: [f64; 5],
    /// Originating cell id.
    pub cell: usize,
}

/// One tree node. Leaves own a contiguous range of the `ids` permutation.
#[derive(Debug, Clone)]
pub struct TreeCell {
    /// Child cell ids; `None` for leaves.
    pub children: Option<(usize, usize)>,
    /// First index into `ids` (inclusive).
    pub ifirst: usize,
    /// Last index into `ids` (exclusive).
    pub ilast: usize,
    /// Depth in the tree.
    pub level: u32,
    /// Number of contained particles.
    pub n: usize,
    /// Bounding box of member positions.
    pub bbmin: [f64; 3],
    /// Bounding box of member positions.
    pub bbmax: [f64; 3],
    /// Bounding box inflated by each member's kernel reach.
    pub hboxmin: [f64; 3],
    /// Bounding box inflated by each member's kernel reach.
    pub hboxmax: [f64; 3],
    /// Centre of mass.
    pub r: [f64; 3],
    /// Total mass.
    pub m: f64,
    /// Maximum smoothing length of members.
    pub hmax: f64,
    /// Distance from the COM to the farthest bounding-box corner.
    pub rmax: f64,
    /// Squared distance beyond which the COM approximation is acceptable
    /// for the geometric MAC (`rmax^2 / thetamaxsqd`; infinite when
    /// `thetamaxsqd = 0` so every cell is opened).
    pub cdistsqd: f64,
    /// Traceless quadrupole moment about the COM (xx, xy, yy, xz, yz).
    pub q: [f64; 5],
}

impl TreeCell {
    fn empty(level: u32) -> Self {
        Self {
            children: None,
            ifirst: 0,
            ilast: 0,
            level,
            n: 0,
            bbmin: [f64::MAX; 3],
            bbmax: [f64::MIN; 3],
            hboxmin: [f64::MAX; 3],
            hboxmax: [f64::MIN; 3],
            r: [0.0; 3],
            m: 0.0,
            hmax: 0.0,
            rmax: 0.0,
            cdistsqd: f64::INFINITY,
            q: [0.0; 5],
        }
    }
}

/// Do two axis-aligned boxes overlap in the first `ndim` dimensions?
#[inline]
fn boxes_overlap(
    amin: &[f64; 3],
    amax: &[f64; 3],
    bmin: &[f64; 3],
    bmax: &[f64; 3],
    ndim: usize,
) -> bool {
    for d in 0..ndim {
        if amin[d] > bmax[d] || amax[d] < bmin[d] {
            return false;
        }
    }
    true
}

/// Box overlap in the periodic metric: two intervals overlap when the
/// nearest-image distance of their centres is within the half-width sum.
#[inline]
fn boxes_overlap_periodic(
    amin: &[f64; 3],
    amax: &[f64; 3],
    bmin: &[f64; 3],
    bmax: &[f64; 3],
    simbox: &DomainBox,
) -> bool {
    for d in 0..simbox.ndim {
        let half = 0.5 * ((amax[d] - amin[d]) + (bmax[d] - bmin[d]));
        let mut dc = 0.5 * ((amin[d] + amax[d]) - (bmin[d] + bmax[d]));
        if simbox.periodic(d) {
            if dc > simbox.boxhalf[d] {
                dc -= simbox.boxsize[d];
            } else if dc < -simbox.boxhalf[d] {
                dc += simbox.boxsize[d];
            }
        }
        if dc.abs() > half {
            return false;
        }
    }
    true
}

/// Balanced KD tree with cell multipole moments.
pub struct KdTree {
    /// Spatial dimensionality.
    pub ndim: usize,
    /// Maximum particles per leaf.
    pub nleafmax: usize,
    /// Squared geometric opening angle; 0 disables cell acceptance.
    pub thetamaxsqd: f64,
    invthetamaxsqd: f64,
    /// Kernel support radius in units of h.
    pub kernrange: f64,
    /// Stock the traceless quadrupole moments.
    pub quadrupole: bool,
    /// Cells in creation order (children after parents).
    pub cells: Vec<TreeCell>,
    /// Particle-id permutation grouped by leaf.
    pub ids: Vec<usize>,
}

impl KdTree {
    /// Create an empty tree.
    pub fn new(
        ndim: usize,
        nleafmax: usize,
        thetamaxsqd: f64,
        kernrange: f64,
        quadrupole: bool,
    ) -> Self {
        let invthetamaxsqd =
            if thetamaxsqd > 0.0 { 1.0 / thetamaxsqd } else { f64::INFINITY };
        Self {
            ndim,
            nleafmax,
            thetamaxsqd,
            invthetamaxsqd,
            kernrange,
            quadrupole,
            cells: Vec::new(),
            ids: Vec::new(),
        }
    }

    /// Rebuild the topology over the given particle ids (dead particles are
    /// dropped) and stock every cell.
    pub fn build(&mut self, parts: &[SphParticle], idrange: std::ops::Range<usize>) {
        self.ids = idrange.filter(|&i| parts[i].ptype != ParticleType::Dead).collect();
        self.cells.clear();
        if self.ids.is_empty() {
            self.cells.push(TreeCell::empty(0));
            return;
        }
        let n = self.ids.len();
        self.divide(parts, 0, n, 0);
        self.stock(parts);
    }

    /// Recursively partition `ids[ifirst..ilast]`, appending cells.
    fn divide(&mut self, parts: &[SphParticle], ifirst: usize, ilast: usize, level: u32) -> usize {
        let cell_id = self.cells.len();
        let mut cell = TreeCell::empty(level);
        cell.ifirst = ifirst;
        cell.ilast = ilast;
        cell.n = ilast - ifirst;
        self.cells.push(cell);

        if ilast - ifirst > self.nleafmax {
            // Median split along the widest axis keeps the leaf populations
            // balanced within a factor of two.
            let mut lo = [f64::MAX; 3];
            let mut hi = [f64::MIN; 3];
            for &i in &self.ids[ifirst..ilast] {
                for d in 0..self.ndim {
                    lo[d] = lo[d].min(parts[i].r[d]);
                    hi[d] = hi[d].max(parts[i].r[d]);
                }
            }
            let mut axis = 0;
            for d in 1..self.ndim {
                if hi[d] - lo[d] > hi[axis] - lo[axis] {
                    axis = d;
                }
            }
            let mid = (ifirst + ilast) / 2;
            self.ids[ifirst..ilast].select_nth_unstable_by(mid - ifirst, |&a, &b| {
                parts[a].r[axis].total_cmp(&parts[b].r[axis])
            });

            let c1 = self.divide(parts, ifirst, mid, level + 1);
            let c2 = self.divide(parts, mid, ilast, level + 1);
            self.cells[cell_id].children = Some((c1, c2));
        }
        cell_id
    }

    /// Recompute every cell's bounding boxes, mass, COM, hmax and (when
    /// enabled) quadrupole moment, bottom-up. Call after particles moved or
    /// smoothing lengths changed without a topology rebuild.
    pub fn stock(&mut self, parts: &[SphParticle]) {
        for c in (0..self.cells.len()).rev() {
            match self.cells[c].children {
                None => self.stock_leaf(c, parts),
                Some((c1, c2)) => self.stock_internal(c, c1, c2),
            }
        }
    }

    fn stock_leaf(&mut self, c: usize, parts: &[SphParticle]) {
        let reach = self.kernrange;
        let ndim = self.ndim;
        let (ifirst, ilast) = (self.cells[c].ifirst, self.cells[c].ilast);
        let mut cell = TreeCell::empty(self.cells[c].level);
        cell.ifirst = ifirst;
        cell.ilast = ilast;
        cell.n = ilast - ifirst;

        for k in ifirst..ilast {
            let p = &parts[self.ids[k]];
            for d in 0..ndim {
                cell.bbmin[d] = cell.bbmin[d].min(p.r[d]);
                cell.bbmax[d] = cell.bbmax[d].max(p.r[d]);
                cell.hboxmin[d] = cell.hboxmin[d].min(p.r[d] - reach * p.h);
                cell.hboxmax[d] = cell.hboxmax[d].max(p.r[d] + reach * p.h);
            }
            cell.m += p.m;
            for d in 0..ndim {
                cell.r[d] += p.m * p.r[d];
            }
            cell.hmax = cell.hmax.max(p.h);
        }
        if cell.m > 0.0 {
            for d in 0..ndim {
                cell.r[d] /= cell.m;
            }
        } else {
            // Massless cell: fall back to the geometric centre.
            for d in 0..ndim {
                cell.r[d] = 0.5 * (cell.bbmin[d] + cell.bbmax[d]);
            }
        }
        self.cells[c] = cell;
        self.finish_cell(c);
        if self.quadrupole {
            let com = self.cells[c].r;
            let mut q = [0.0; 5];
            for k in ifirst..ilast {
                let p = &parts[self.ids[k]];
                accumulate_quadrupole(&mut q, p.m, &sub(&p.r, &com), ndim);
            }
            self.cells[c].q = q;
        }
    }

    fn stock_internal(&mut self, c: usize, c1: usize, c2: usize) {
        let ndim = self.ndim;
        let (left, right) = (self.cells[c1].clone(), self.cells[c2].clone());
        let cell = &mut self.cells[c];

        for d in 0..ndim {
            cell.bbmin[d] = left.bbmin[d].min(right.bbmin[d]);
            cell.bbmax[d] = left.bbmax[d].max(right.bbmax[d]);
            cell.hboxmin[d] = left.hboxmin[d].min(right.hboxmin[d]);
            cell.hboxmax[d] = left.hboxmax[d].max(right.hboxmax[d]);
        }
        cell.m = left.m + right.m;
        cell.hmax = left.hmax.max(right.hmax);
        if cell.m > 0.0 {
            for d in 0..ndim {
                cell.r[d] = (left.m * left.r[d] + right.m * right.r[d]) / cell.m;
            }
        } else {
            for d in 0..ndim {
                cell.r[d] = 0.5 * (cell.bbmin[d] + cell.bbmax[d]);
            }
        }
        self.finish_cell(c);
        if self.quadrupole {
            // Parallel-axis shift of the child moments onto the new COM.
            let com = self.cells[c].r;
            let mut q = [0.0; 5];
            for child in [&left, &right] {
                if child.m == 0.0 {
                    continue;
                }
                for (i, v) in child.q.iter().enumerate() {
                    q[i] += v;
                }
                accumulate_quadrupole(&mut q, child.m, &sub(&child.r, &com), ndim);
            }
            self.cells[c].q = q;
        }
    }

    /// rmax and the MAC distance from the freshly stocked geometry.
    fn finish_cell(&mut self, c: usize) {
        let ndim = self.ndim;
        let cell = &mut self.cells[c];
        if cell.n == 0 {
            return;
        }
        let mut rmaxsqd = 0.0f64;
        for corner in 0..(1 << ndim) {
            let mut dr = [0.0; 3];
            for d in 0..ndim {
                let edge =
                    if corner & (1 << d) != 0 { cell.bbmax[d] } else { cell.bbmin[d] };
                dr[d] = edge - cell.r[d];
            }
            rmaxsqd = rmaxsqd.max(dot(&dr, &dr, ndim));
        }
        cell.rmax = rmaxsqd.sqrt();
        cell.cdistsqd = rmaxsqd * self.invthetamaxsqd;
    }

    /// Leaf cells containing at least one active particle.
    pub fn compute_active_cell_list(&self, parts: &[SphParticle]) -> Vec<usize> {
        let mut out = Vec::new();
        for (c, cell) in self.cells.iter().enumerate() {
            if cell.children.is_none()
                && self.ids[cell.ifirst..cell.ilast].iter().any(|&i| parts[i].active)
            {
                out.push(c);
            }
        }
        out
    }

    /// Active particle ids of one cell.
    pub fn compute_active_particle_list(
        &self,
        c: usize,
        parts: &[SphParticle],
        out: &mut Vec<usize>,
    ) {
        out.clear();
        let cell = &self.cells[c];
        out.extend(
            self.ids[cell.ifirst..cell.ilast].iter().copied().filter(|&i| parts[i].active),
        );
    }

    /// Gather walk: every particle within `kernrange * hmax` of the cell's
    /// bounding box. Candidates land in the manager's raw list.
    pub fn compute_gather_neighbour_list(
        &self,
        cell: &TreeCell,
        parts: &[SphParticle],
        hmax: f64,
        mgr: &mut NeighborManager,
    ) -> Result<(), BufferFull> {
        if self.cells[0].n == 0 {
            return Ok(());
        }
        let reach = self.kernrange * hmax;
        let mut gmin = [0.0; 3];
        let mut gmax = [0.0; 3];
        for d in 0..self.ndim {
            gmin[d] = cell.bbmin[d] - reach;
            gmax[d] = cell.bbmax[d] + reach;
        }

        let mut stack = vec![0usize];
        while let Some(c) = stack.pop() {
            let node = &self.cells[c];
            if !boxes_overlap(&gmin, &gmax, &node.bbmin, &node.bbmax, self.ndim) {
                continue;
            }
            match node.children {
                Some((c1, c2)) => {
                    stack.push(c1);
                    stack.push(c2);
                }
                None => {
                    'member: for &i in &self.ids[node.ifirst..node.ilast] {
                        for d in 0..self.ndim {
                            if parts[i].r[d] < gmin[d] || parts[i].r[d] > gmax[d] {
                                continue 'member;
                            }
                        }
                        mgr.push_raw(i)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Symmetric scatter walk: particles within the cell's reach or whose
    /// own kernel reaches the cell. Used for hydro neighbour lists over both
    /// the real and the ghost tree.
    pub fn compute_neighbour_and_ghost_list(
        &self,
        cell: &TreeCell,
        mgr: &mut NeighborManager,
    ) -> Result<(), BufferFull> {
        if self.cells[0].n == 0 {
            return Ok(());
        }
        let reach = self.kernrange * cell.hmax;
        let mut gmin = [0.0; 3];
        let mut gmax = [0.0; 3];
        for d in 0..self.ndim {
            gmin[d] = cell.bbmin[d] - reach;
            gmax[d] = cell.bbmax[d] + reach;
        }

        let mut stack = vec![0usize];
        while let Some(c) = stack.pop() {
            let node = &self.cells[c];
            let gather = boxes_overlap(&gmin, &gmax, &node.bbmin, &node.bbmax, self.ndim);
            let scatter =
                boxes_overlap(&cell.bbmin, &cell.bbmax, &node.hboxmin, &node.hboxmax, self.ndim);
            if !gather && !scatter {
                continue;
            }
            match node.children {
                Some((c1, c2)) => {
                    stack.push(c1);
                    stack.push(c2);
                }
                None => {
                    for &i in &self.ids[node.ifirst..node.ilast] {
                        mgr.push_raw(i)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Gravity walk with the multipole acceptance criterion.
    ///
    /// Contacts split three ways: nodes overlapping the cell's kernel reach
    /// feed the near (hydro candidate) list, distant nodes passing the MAC
    /// are summarized as cell moments, and leaves failing the MAC dump their
    /// members on the direct-sum list. `macfactor` is 1 for the geometric
    /// MAC and `max_j (1/phi_j)^(2/3)` for the eigen MAC.
    ///
    /// With `simbox` set (periodic gravity), overlap tests and distances use
    /// the nearest periodic image, so near-boundary pairs classify as near
    /// contacts; the caller re-maps the collected positions accordingly.
    pub fn compute_gravity_interaction_list(
        &self,
        cell: &TreeCell,
        parts: &[SphParticle],
        macfactor: f64,
        simbox: Option<&DomainBox>,
        mgr: &mut NeighborManager,
    ) -> Result<(), BufferFull> {
        if self.cells[0].n == 0 {
            return Ok(());
        }
        let reach = self.kernrange * cell.hmax;
        let mut gmin = [0.0; 3];
        let mut gmax = [0.0; 3];
        for d in 0..self.ndim {
            gmin[d] = cell.bbmin[d] - reach;
            gmax[d] = cell.bbmax[d] + reach;
        }

        let overlap = |amin: &[f64; 3], amax: &[f64; 3], bmin: &[f64; 3], bmax: &[f64; 3]| {
            match simbox {
                Some(sb) => boxes_overlap_periodic(amin, amax, bmin, bmax, sb),
                None => boxes_overlap(amin, amax, bmin, bmax, self.ndim),
            }
        };

        let mut stack = vec![0usize];
        while let Some(c) = stack.pop() {
            let node = &self.cells[c];
            if node.n == 0 {
                continue;
            }
            let gather = overlap(&gmin, &gmax, &node.bbmin, &node.bbmax);
            let scatter = overlap(&cell.bbmin, &cell.bbmax, &node.hboxmin, &node.hboxmax);

            // A node overlapping the active cell always recurses down to its
            // leaves; its members are near contacts.
            if gather || scatter {
                match node.children {
                    Some((c1, c2)) => {
                        stack.push(c1);
                        stack.push(c2);
                    }
                    None => {
                        for &i in &self.ids[node.ifirst..node.ilast] {
                            mgr.push_raw(i)?;
                        }
                    }
                }
                continue;
            }

            let mut dr = sub(&node.r, &cell.r);
            if let Some(sb) = simbox {
                sb.nearest_image(&mut dr);
            }
            let drsqd = dot(&dr, &dr, self.ndim);
            if drsqd > node.cdistsqd * macfactor {
                if node.m > 0.0 {
                    mgr.push_gravcell(MultipoleMoment {
                        r: node.r,
                        m: node.m,
                        q: node.q,
                        cell: c,
                    })?;
                }
            } else {
                match node.children {
                    Some((c1, c2)) => {
                        stack.push(c1);
                        stack.push(c2);
                    }
                    None => {
                        for &i in &self.ids[node.ifirst..node.ilast] {
                            if parts[i].ptype.gravitates() {
                                mgr.push_direct(i)?;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Add `m * (3 d d^T - |d|^2 I)` into the packed traceless moment.
fn accumulate_quadrupole(q: &mut [f64; 5], m: f64, d: &[f64; 3], ndim: usize) {
    let drsqd = dot(d, d, ndim);
    q[0] += m * (3.0 * d[0] * d[0] - drsqd);
    if ndim > 1 {
        q[1] += m * 3.0 * d[0] * d[1];
        q[2] += m * (3.0 * d[1] * d[1] - drsqd);
    }
    if ndim > 2 {
        q[3] += m * 3.0 * d[0] * d[2];
        q[4] += m * 3.0 * d[1] * d[2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::SphParticle;

    fn lattice(n_per_dim: usize, h: f64) -> Vec<SphParticle> {
        let mut parts = Vec::new();
        let dx = 1.0 / n_per_dim as f64;
        for i in 0..n_per_dim {
            for j in 0..n_per_dim {
                for k in 0..n_per_dim {
                    let mut p = SphParticle::new(parts.len());
                    p.r = [
                        (i as f64 + 0.5) * dx,
                        (j as f64 + 0.5) * dx,
                        (k as f64 + 0.5) * dx,
                    ];
                    p.m = 1.0 / (n_per_dim * n_per_dim * n_per_dim) as f64;
                    p.set_h(h, 3, 4.0 * h * h);
                    p.active = true;
                    parts.push(p);
                }
            }
        }
        parts
    }

    fn build_tree(parts: &[SphParticle], nleafmax: usize, thetasqd: f64) -> KdTree {
        let mut tree = KdTree::new(3, nleafmax, thetasqd, 2.0, true);
        tree.build(parts, 0..parts.len());
        tree
    }

    #[test]
    fn every_particle_in_exactly_one_leaf() {
        let parts = lattice(4, 0.1);
        let tree = build_tree(&parts, 6, 0.15);
        let mut seen = vec![0usize; parts.len()];
        for cell in &tree.cells {
            if cell.children.is_none() {
                assert!(cell.n <= 6, "leaf larger than nleafmax");
                for &i in &tree.ids[cell.ifirst..cell.ilast] {
                    seen[i] += 1;
                }
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
    }

    #[test]
    fn tree_soundness_invariants() {
        let parts = lattice(4, 0.1);
        let tree = build_tree(&parts, 4, 0.15);
        let root = &tree.cells[0];
        let total_mass: f64 = parts.iter().map(|p| p.m).sum();
        assert!((root.m - total_mass).abs() < 1e-12);
        assert!((root.hmax - 0.1).abs() < 1e-12);

        for cell in &tree.cells {
            if let Some((c1, c2)) = cell.children {
                for child in [&tree.cells[c1], &tree.cells[c2]] {
                    for d in 0..3 {
                        assert!(cell.bbmin[d] <= child.bbmin[d] + 1e-14);
                        assert!(cell.bbmax[d] >= child.bbmax[d] - 1e-14);
                    }
                    assert!(cell.hmax >= child.hmax);
                }
                assert!(
                    (cell.m - tree.cells[c1].m - tree.cells[c2].m).abs() < 1e-12,
                    "node mass equals the sum of its children"
                );
            }
        }
    }

    #[test]
    fn com_matches_direct_sum() {
        let parts = lattice(3, 0.1);
        let tree = build_tree(&parts, 4, 0.15);
        let mut com = [0.0f64; 3];
        let mut m = 0.0;
        for p in &parts {
            m += p.m;
            for d in 0..3 {
                com[d] += p.m * p.r[d];
            }
        }
        for d in 0..3 {
            assert!((tree.cells[0].r[d] - com[d] / m).abs() < 1e-12);
        }
    }

    #[test]
    fn quadrupole_is_traceless_by_construction() {
        // The packed layout stores xx, xy, yy, xz, yz with zz = -(xx + yy);
        // a direct evaluation over root members must reproduce it.
        let mut parts = lattice(3, 0.1);
        // Break the lattice symmetry so Q is non-trivial.
        parts[0].m *= 7.0;
        parts[5].r[1] += 0.07;
        let tree = build_tree(&parts, 4, 0.15);
        let com = tree.cells[0].r;
        let mut q = [0.0; 5];
        for p in &parts {
            accumulate_quadrupole(&mut q, p.m, &sub(&p.r, &com), 3);
        }
        for i in 0..5 {
            assert!(
                (q[i] - tree.cells[0].q[i]).abs() < 1e-10,
                "component {i}: {} vs {}",
                q[i],
                tree.cells[0].q[i]
            );
        }
    }

    #[test]
    fn gather_walk_finds_all_in_range() {
        let parts = lattice(5, 0.08);
        let tree = build_tree(&parts, 4, 0.15);
        let celllist = tree.compute_active_cell_list(&parts);
        assert!(!celllist.is_empty());

        let cell = tree.cells[celllist[0]].clone();
        let mut mgr = NeighborManager::new(16);
        loop {
            mgr.clear();
            match tree.compute_gather_neighbour_list(&cell, &parts, cell.hmax, &mut mgr) {
                Ok(()) => break,
                Err(BufferFull) => mgr.grow().unwrap(),
            }
        }

        // Brute-force reference: every particle within kernrange*hmax of the
        // cell bounding box must be in the candidate list.
        let reach = 2.0 * cell.hmax;
        for (i, p) in parts.iter().enumerate() {
            let mut inside = true;
            for d in 0..3 {
                if p.r[d] < cell.bbmin[d] - reach || p.r[d] > cell.bbmax[d] + reach {
                    inside = false;
                }
            }
            if inside {
                assert!(mgr.raw_ids().contains(&i), "particle {i} missing from gather list");
            }
        }
    }

    #[test]
    fn zero_opening_angle_opens_everything() {
        let parts = lattice(4, 0.02);
        let tree = build_tree(&parts, 4, 0.0);
        let celllist = tree.compute_active_cell_list(&parts);
        let cell = tree.cells[celllist[0]].clone();
        let mut mgr = NeighborManager::new(1 << 12);
        mgr.clear();
        tree.compute_gravity_interaction_list(&cell, &parts, 1.0, None, &mut mgr).unwrap();
        assert_eq!(mgr.gravcells().len(), 0, "theta = 0 must accept no cells");
        assert_eq!(
            mgr.raw_len() + mgr.direct_len(),
            parts.len(),
            "every particle must appear as a near or direct contact"
        );
    }

    #[test]
    fn wide_opening_angle_accepts_cells() {
        let parts = lattice(6, 0.01);
        let tree = build_tree(&parts, 4, 0.5);
        let celllist = tree.compute_active_cell_list(&parts);
        let cell = tree.cells[celllist[0]].clone();
        let mut mgr = NeighborManager::new(1 << 14);
        mgr.clear();
        tree.compute_gravity_interaction_list(&cell, &parts, 1.0, None, &mut mgr).unwrap();
        assert!(!mgr.gravcells().is_empty(), "distant mass should collapse to cells");
    }

    #[test]
    fn empty_tree_queries_are_noops() {
        let parts: Vec<SphParticle> = Vec::new();
        let mut tree = KdTree::new(3, 4, 0.15, 2.0, false);
        tree.build(&parts, 0..0);
        let probe = {
            let sample = lattice(2, 0.1);
            let mut t = KdTree::new(3, 4, 0.15, 2.0, false);
            t.build(&sample, 0..sample.len());
            t.cells[0].clone()
        };
        let mut mgr = NeighborManager::new(8);
        mgr.clear();
        tree.compute_neighbour_and_ghost_list(&probe, &mut mgr).unwrap();
        assert_eq!(mgr.raw_len(), 0);
    }
}
