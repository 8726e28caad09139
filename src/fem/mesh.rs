use super::shape::{n_shape, shape_values};
use crate::base::{BOUNDARY_BOTTOM, BOUNDARY_TOP};
use crate::StrError;
use nalgebra::DVector;
use std::collections::{BTreeSet, HashMap};

/// Defines the maximum refinement level
///
/// Node positions are stored on an integer lattice with 2^MAX_LEVEL intervals per axis.
pub const MAX_LEVEL: u32 = 20;

/// Identifies a cell of the quadtree (binary tree in 1D) by its level and integer position
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CellKey {
    pub level: u32,
    pub ix: u32,
    pub iy: u32,
}

/// Identifies a node by its position on the finest lattice
pub type NodeKey = (u32, u32);

impl CellKey {
    /// Returns the key of the root cell
    pub fn root() -> Self {
        CellKey { level: 0, ix: 0, iy: 0 }
    }

    /// Returns the side length in lattice units
    pub fn span(&self) -> u32 {
        1 << (MAX_LEVEL - self.level)
    }

    /// Returns the parent key (None for the root)
    pub fn parent(&self) -> Option<CellKey> {
        if self.level == 0 {
            None
        } else {
            Some(CellKey {
                level: self.level - 1,
                ix: self.ix / 2,
                iy: self.iy / 2,
            })
        }
    }

    /// Returns the children keys in the local vertex order (a + 2 b)
    pub fn children(&self, dim: usize) -> Vec<CellKey> {
        let level = self.level + 1;
        if dim == 1 {
            (0..2).map(|a| CellKey { level, ix: 2 * self.ix + a, iy: 0 }).collect()
        } else {
            (0..4)
                .map(|v| CellKey {
                    level,
                    ix: 2 * self.ix + v % 2,
                    iy: 2 * self.iy + v / 2,
                })
                .collect()
        }
    }

    /// Returns the lattice coordinates of the lower-left vertex
    pub fn origin(&self) -> NodeKey {
        (self.ix * self.span(), self.iy * self.span())
    }

    /// Returns the lattice coordinates of the vertices (a + 2 b ordering)
    pub fn vertices(&self, dim: usize) -> Vec<NodeKey> {
        let (x0, y0) = self.origin();
        let s = self.span();
        (0..n_shape(dim))
            .map(|v| (x0 + (v as u32 % 2) * s, y0 + (v as u32 / 2) * s))
            .collect()
    }

    /// Returns the same-level position across a face, if inside the domain
    ///
    /// Faces are numbered as `2 axis + side`.
    pub fn neighbor(&self, dim: usize, face: usize) -> Option<(u32, u32)> {
        let n = 1u32 << self.level;
        let (axis, side) = (face / 2, face % 2);
        if axis >= dim {
            return None;
        }
        let (mut ix, mut iy) = (self.ix, self.iy);
        let k = if axis == 0 { &mut ix } else { &mut iy };
        if side == 0 {
            if *k == 0 {
                return None;
            }
            *k -= 1;
        } else {
            if *k + 1 >= n {
                return None;
            }
            *k += 1;
        }
        Some((ix, iy))
    }
}

/// Holds a (possibly adaptively refined) mesh of the domain [-L, 0]^dim
///
/// The mesh is a collection of active (leaf) cells of a quadtree in 2D or a binary tree in 1D.
/// The last coordinate is the vertical one, pointing upwards, with the top boundary at zero.
///
/// Boundary identifiers: `BOUNDARY_TOP` (1), `BOUNDARY_BOTTOM` (2), and 0 for the sides.
#[derive(Clone, Debug)]
pub struct Mesh {
    dim: usize,
    size: f64,
    cells: Vec<CellKey>,
    cell_index: HashMap<CellKey, usize>,
    nodes: Vec<NodeKey>,
    node_index: HashMap<NodeKey, usize>,
    cell_nodes: Vec<Vec<usize>>,
}

impl Mesh {
    /// Allocates a uniformly refined mesh of the domain [-L, 0]^dim
    pub fn new_hyper_cube(dim: usize, size: f64, refinement_level: usize) -> Result<Self, StrError> {
        if dim < 1 || dim > 2 {
            return Err("the space dimension must be 1 or 2");
        }
        if size <= 0.0 {
            return Err("the domain size must be positive");
        }
        if refinement_level as u32 >= MAX_LEVEL {
            return Err("the refinement level is too high");
        }
        let mut cells = vec![CellKey::root()];
        for _ in 0..refinement_level {
            cells = cells.iter().flat_map(|c| c.children(dim)).collect();
        }
        Ok(Mesh::from_cells(dim, size, cells))
    }

    /// Allocates a mesh from a list of active cells
    fn from_cells(dim: usize, size: f64, mut cells: Vec<CellKey>) -> Self {
        cells.sort();
        let cell_index: HashMap<_, _> = cells.iter().enumerate().map(|(i, k)| (*k, i)).collect();
        let mut node_set = BTreeSet::new();
        for key in &cells {
            node_set.extend(key.vertices(dim));
        }
        let nodes: Vec<_> = node_set.into_iter().collect();
        let node_index: HashMap<_, _> = nodes.iter().enumerate().map(|(i, k)| (*k, i)).collect();
        let cell_nodes: Vec<Vec<usize>> = cells
            .iter()
            .map(|key| key.vertices(dim).iter().map(|v| node_index[v]).collect())
            .collect();
        Mesh {
            dim,
            size,
            cells,
            cell_index,
            nodes,
            node_index,
            cell_nodes,
        }
    }

    /// Returns the space dimension
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Returns the domain size L
    pub fn size(&self) -> f64 {
        self.size
    }

    /// Returns the number of active cells
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    /// Returns the number of nodes (degrees of freedom per field)
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the active cells
    pub fn cells(&self) -> &[CellKey] {
        &self.cells
    }

    /// Returns the node indices of a cell (a + 2 b ordering)
    pub fn cell_nodes(&self, cell: usize) -> &[usize] {
        &self.cell_nodes[cell]
    }

    /// Returns the lattice key of a node
    pub fn node_key(&self, node: usize) -> NodeKey {
        self.nodes[node]
    }

    /// Finds a node by its lattice key
    pub fn find_node(&self, key: &NodeKey) -> Option<usize> {
        self.node_index.get(key).copied()
    }

    /// Finds an active cell by its key
    pub fn find_cell(&self, key: &CellKey) -> Option<usize> {
        self.cell_index.get(key).copied()
    }

    /// Converts a lattice coordinate into a real coordinate
    pub fn lattice_to_coord(&self, i: u32) -> f64 {
        -self.size + self.size * (i as f64) / ((1u64 << MAX_LEVEL) as f64)
    }

    /// Returns the coordinates of a node (the second entry is zero in 1D)
    pub fn node_coords(&self, node: usize) -> [f64; 2] {
        let (i, j) = self.nodes[node];
        if self.dim == 1 {
            [self.lattice_to_coord(i), 0.0]
        } else {
            [self.lattice_to_coord(i), self.lattice_to_coord(j)]
        }
    }

    /// Returns the vertical coordinate of a node
    pub fn node_elevation(&self, node: usize) -> f64 {
        self.node_coords(node)[self.dim - 1]
    }

    /// Returns the coordinates of the lower-left vertex of a cell
    pub fn cell_origin(&self, cell: usize) -> [f64; 2] {
        let (i, j) = self.cells[cell].origin();
        [self.lattice_to_coord(i), if self.dim == 1 { 0.0 } else { self.lattice_to_coord(j) }]
    }

    /// Returns the side length of a cell
    pub fn cell_side(&self, cell: usize) -> f64 {
        self.size / ((1u64 << self.cells[cell].level) as f64)
    }

    /// Returns the diameter of a cell
    pub fn cell_diameter(&self, cell: usize) -> f64 {
        self.cell_side(cell) * f64::sqrt(self.dim as f64)
    }

    /// Returns the boundary identifier of a cell face or None if the face is interior
    pub fn boundary_id(&self, cell: usize, face: usize) -> Option<usize> {
        let key = &self.cells[cell];
        if key.neighbor(self.dim, face).is_some() {
            return None;
        }
        let axis = face / 2;
        if axis == self.dim - 1 {
            if face % 2 == 1 {
                Some(BOUNDARY_TOP)
            } else {
                Some(BOUNDARY_BOTTOM)
            }
        } else {
            Some(0)
        }
    }

    /// Returns the nodes on the top or bottom boundary
    pub fn boundary_nodes(&self, boundary_id: usize) -> Vec<usize> {
        let target = if boundary_id == BOUNDARY_TOP {
            1u32 << MAX_LEVEL
        } else if boundary_id == BOUNDARY_BOTTOM {
            0
        } else {
            return Vec::new();
        };
        let vertical = |k: &NodeKey| if self.dim == 1 { k.0 } else { k.1 };
        (0..self.nodes.len()).filter(|n| vertical(&self.nodes[*n]) == target).collect()
    }

    /// Returns the active cell covering a region given at some level, if any
    ///
    /// Returns None if the region is subdivided into smaller active cells.
    pub fn active_ancestor(&self, level: u32, ix: u32, iy: u32) -> Option<CellKey> {
        for lev in (0..=level).rev() {
            let shift = level - lev;
            let key = CellKey {
                level: lev,
                ix: ix >> shift,
                iy: iy >> shift,
            };
            if self.cell_index.contains_key(&key) {
                return Some(key);
            }
        }
        None
    }

    /// Finds the active cell containing a point
    pub fn locate(&self, x: &[f64]) -> Option<usize> {
        let nmax = 1u64 << MAX_LEVEL;
        let tol = 1e-10 * self.size;
        let mut lat = [0u32; 2];
        for d in 0..self.dim {
            if x[d] < -self.size - tol || x[d] > tol {
                return None;
            }
            let s = (x[d] + self.size) / self.size * (nmax as f64);
            let i = f64::floor(s).max(0.0) as u64;
            lat[d] = u64::min(i, nmax - 1) as u32;
        }
        let key = self.active_ancestor(MAX_LEVEL, lat[0], lat[1])?;
        self.find_cell(&key)
    }

    /// Returns the reference coordinates of a point within a cell
    pub fn reference_coords(&self, cell: usize, x: &[f64]) -> [f64; 2] {
        let origin = self.cell_origin(cell);
        let h = self.cell_side(cell);
        let mut xi = [0.0; 2];
        for d in 0..self.dim {
            xi[d] = f64::min(f64::max((x[d] - origin[d]) / h, 0.0), 1.0);
        }
        xi
    }

    /// Evaluates a nodal field at a point using the Q1 interpolation of the containing cell
    pub fn point_value(&self, field: &DVector<f64>, x: &[f64]) -> Result<f64, StrError> {
        if field.len() != self.nodes.len() {
            return Err("the field size does not match the number of nodes");
        }
        let cell = self.locate(x).ok_or("the point is outside the domain")?;
        let xi = self.reference_coords(cell, x);
        let mut nn = vec![0.0; n_shape(self.dim)];
        shape_values(self.dim, &xi, &mut nn);
        Ok(self.cell_nodes[cell].iter().zip(&nn).map(|(n, v)| v * field[*n]).sum())
    }

    /// Returns the point at the top of the vertical axis through the origin's corner
    pub fn top_point(&self) -> [f64; 2] {
        [0.0, 0.0]
    }

    /// Returns a new mesh after refining and coarsening the flagged cells
    ///
    /// The refinement set is closed such that face-neighbors differ by at most one level.
    /// A group of siblings is coarsened only if all of them are flagged, none is refined,
    /// and the resulting parent keeps the level balance with its neighbors.
    pub fn refine_and_coarsen(&self, refine: &[bool], coarsen: &[bool]) -> Mesh {
        let dim = self.dim;

        // refinement closure
        let mut to_refine: BTreeSet<CellKey> = BTreeSet::new();
        for (c, key) in self.cells.iter().enumerate() {
            if refine[c] && key.level + 1 < MAX_LEVEL {
                to_refine.insert(*key);
            }
        }
        let mut stack: Vec<CellKey> = to_refine.iter().copied().collect();
        while let Some(key) = stack.pop() {
            for face in 0..2 * dim {
                if let Some((nx, ny)) = key.neighbor(dim, face) {
                    if let Some(anc) = self.active_ancestor(key.level, nx, ny) {
                        if anc.level < key.level && !to_refine.contains(&anc) {
                            to_refine.insert(anc);
                            stack.push(anc);
                        }
                    }
                }
            }
        }

        // coarsening
        let mut parents: BTreeSet<CellKey> = BTreeSet::new();
        for (c, key) in self.cells.iter().enumerate() {
            let parent = match key.parent() {
                Some(p) => p,
                None => continue,
            };
            if !coarsen[c] || parents.contains(&parent) {
                continue;
            }
            let siblings_ok = parent.children(dim).iter().all(|s| match self.find_cell(s) {
                Some(i) => coarsen[i] && !to_refine.contains(s),
                None => false,
            });
            if siblings_ok && self.parent_keeps_balance(&parent, &to_refine) {
                parents.insert(parent);
            }
        }

        // new list of active cells
        let mut cells = Vec::new();
        for key in &self.cells {
            if to_refine.contains(key) {
                cells.extend(key.children(dim));
            } else if key.parent().map_or(false, |p| parents.contains(&p)) {
                continue;
            } else {
                cells.push(*key);
            }
        }
        cells.extend(parents);
        Mesh::from_cells(dim, self.size, cells)
    }

    /// Checks whether replacing the children of `parent` by itself keeps the level balance
    fn parent_keeps_balance(&self, parent: &CellKey, to_refine: &BTreeSet<CellKey>) -> bool {
        let dim = self.dim;
        for face in 0..2 * dim {
            let (nx, ny) = match parent.neighbor(dim, face) {
                Some(n) => n,
                None => continue,
            };
            if self.active_ancestor(parent.level, nx, ny).is_some() {
                // the neighbor is as coarse as the parent (or coarser)
                continue;
            }
            // the neighbor region is subdivided; inspect the children touching the shared face
            let region = CellKey {
                level: parent.level,
                ix: nx,
                iy: ny,
            };
            let (axis, side) = (face / 2, face % 2);
            for (v, child) in region.children(dim).iter().enumerate() {
                let child_side = if axis == 0 { v % 2 } else { v / 2 };
                if child_side == side {
                    // this child is on the far side
                    continue;
                }
                match self.find_cell(child) {
                    Some(_) => {
                        if to_refine.contains(child) {
                            return false;
                        }
                    }
                    None => return false,
                }
            }
        }
        true
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{CellKey, Mesh, MAX_LEVEL};
    use crate::base::{BOUNDARY_BOTTOM, BOUNDARY_TOP};
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    #[test]
    fn new_hyper_cube_captures_errors() {
        assert_eq!(Mesh::new_hyper_cube(3, 1.0, 1).err(), Some("the space dimension must be 1 or 2"));
        assert_eq!(Mesh::new_hyper_cube(1, 0.0, 1).err(), Some("the domain size must be positive"));
        assert_eq!(
            Mesh::new_hyper_cube(1, 1.0, MAX_LEVEL as usize).err(),
            Some("the refinement level is too high")
        );
    }

    #[test]
    fn new_hyper_cube_works_1d() {
        let mesh = Mesh::new_hyper_cube(1, 20.0, 2).unwrap();
        assert_eq!(mesh.n_cells(), 4);
        assert_eq!(mesh.n_nodes(), 5);
        let z: Vec<_> = (0..5).map(|n| mesh.node_elevation(n)).collect();
        assert_eq!(z, &[-20.0, -15.0, -10.0, -5.0, 0.0]);
        assert_eq!(mesh.cell_side(0), 5.0);
        assert_eq!(mesh.boundary_nodes(BOUNDARY_TOP), &[4]);
        assert_eq!(mesh.boundary_nodes(BOUNDARY_BOTTOM), &[0]);
        assert_eq!(mesh.cell_nodes(0), &[0, 1]);
        assert_eq!(mesh.cell_nodes(3), &[3, 4]);
    }

    #[test]
    fn new_hyper_cube_works_2d() {
        let mesh = Mesh::new_hyper_cube(2, 4.0, 1).unwrap();
        assert_eq!(mesh.n_cells(), 4);
        assert_eq!(mesh.n_nodes(), 9);
        assert_eq!(mesh.boundary_nodes(BOUNDARY_TOP).len(), 3);
        assert_eq!(mesh.boundary_nodes(BOUNDARY_BOTTOM).len(), 3);
        let center = mesh.find_node(&(1 << (MAX_LEVEL - 1), 1 << (MAX_LEVEL - 1))).unwrap();
        let sharing = (0..mesh.n_cells()).filter(|c| mesh.cell_nodes(*c).contains(&center)).count();
        assert_eq!(sharing, 4);
        assert_relative_eq!(mesh.cell_diameter(0), 2.0 * f64::sqrt(2.0), epsilon = 1e-15);
    }

    #[test]
    fn boundary_id_works() {
        let mesh = Mesh::new_hyper_cube(2, 1.0, 1).unwrap();
        // cells sorted by (level, ix, iy): (0,0) (0,1) (1,0) (1,1)
        let c = mesh.find_cell(&CellKey { level: 1, ix: 0, iy: 1 }).unwrap();
        assert_eq!(mesh.boundary_id(c, 0), Some(0));
        assert_eq!(mesh.boundary_id(c, 1), None);
        assert_eq!(mesh.boundary_id(c, 2), None);
        assert_eq!(mesh.boundary_id(c, 3), Some(BOUNDARY_TOP));
        let c = mesh.find_cell(&CellKey { level: 1, ix: 1, iy: 0 }).unwrap();
        assert_eq!(mesh.boundary_id(c, 2), Some(BOUNDARY_BOTTOM));
        assert_eq!(mesh.boundary_id(c, 1), Some(0));
    }

    #[test]
    fn locate_and_point_value_work() {
        let mesh = Mesh::new_hyper_cube(1, 10.0, 1).unwrap();
        let z = DVector::from_iterator(mesh.n_nodes(), (0..mesh.n_nodes()).map(|n| mesh.node_elevation(n)));
        assert_eq!(mesh.locate(&[1.0]), None);
        assert_eq!(mesh.locate(&[-11.0]), None);
        assert!(mesh.locate(&[0.0]).is_some());
        assert!(mesh.locate(&[-10.0]).is_some());
        assert_relative_eq!(mesh.point_value(&z, &[-2.5]).unwrap(), -2.5, epsilon = 1e-14);
        assert_relative_eq!(mesh.point_value(&z, &[0.0]).unwrap(), 0.0, epsilon = 1e-14);

        let mesh = Mesh::new_hyper_cube(2, 2.0, 2).unwrap();
        let f = DVector::from_iterator(
            mesh.n_nodes(),
            (0..mesh.n_nodes()).map(|n| {
                let x = mesh.node_coords(n);
                1.0 + 2.0 * x[0] - x[1]
            }),
        );
        let v = mesh.point_value(&f, &[-0.3, -1.7]).unwrap();
        assert_relative_eq!(v, 1.0 - 0.6 + 1.7, epsilon = 1e-14);
    }

    #[test]
    fn refine_keeps_level_balance() {
        // refine the bottom cell of a 1D mesh twice; the neighbors must follow
        let mesh = Mesh::new_hyper_cube(1, 8.0, 2).unwrap();
        let mut refine = vec![false; mesh.n_cells()];
        refine[0] = true;
        let mesh = mesh.refine_and_coarsen(&refine, &vec![false; 4]);
        assert_eq!(mesh.n_cells(), 5);
        let mut refine = vec![false; mesh.n_cells()];
        let c = mesh.find_cell(&CellKey { level: 3, ix: 1, iy: 0 }).unwrap();
        refine[c] = true;
        let mesh = mesh.refine_and_coarsen(&refine, &vec![false; 5]);
        for (c, key) in mesh.cells().iter().enumerate() {
            for face in 0..2 {
                if let Some((nx, ny)) = key.neighbor(1, face) {
                    if let Some(anc) = mesh.active_ancestor(key.level, nx, ny) {
                        assert!(key.level - anc.level <= 1, "cell {} is unbalanced", c);
                    }
                }
            }
        }
        // level-2 cell (ix = 1) was refined by the closure
        assert!(mesh.find_cell(&CellKey { level: 2, ix: 1, iy: 0 }).is_none());
    }

    #[test]
    fn coarsen_restores_uniform_mesh() {
        let coarse = Mesh::new_hyper_cube(2, 1.0, 1).unwrap();
        let fine = coarse.refine_and_coarsen(&vec![true; 4], &vec![false; 4]);
        assert_eq!(fine.n_cells(), 16);
        let back = fine.refine_and_coarsen(&vec![false; 16], &vec![true; 16]);
        assert_eq!(back.n_cells(), 4);
        assert_eq!(back.n_nodes(), 9);

        // incomplete sibling groups are not coarsened
        let mut coarsen = vec![true; 16];
        coarsen[0] = false;
        let partial = fine.refine_and_coarsen(&vec![false; 16], &coarsen);
        assert_eq!(partial.n_cells(), 4 + 3);
    }

    #[test]
    fn coarsen_respects_fine_neighbors() {
        let mesh = Mesh::new_hyper_cube(1, 1.0, 2).unwrap();
        let mesh = mesh.refine_and_coarsen(&[false, true, false, false], &[false; 4]);
        assert_eq!(mesh.n_cells(), 5);
        // coarsening (2,2) and (2,3) into (1,1) would put a level-1 cell next to level-3 cells
        let coarsen: Vec<_> = mesh.cells().iter().map(|k| k.level == 2).collect();
        let after = mesh.refine_and_coarsen(&vec![false; mesh.n_cells()], &coarsen);
        assert_eq!(after.n_cells(), 5);
        assert!(after.find_cell(&CellKey { level: 2, ix: 2, iy: 0 }).is_some());
        assert!(after.find_cell(&CellKey { level: 1, ix: 1, iy: 0 }).is_none());

        // the finest pair may be coarsened
        let coarsen: Vec<_> = mesh.cells().iter().map(|k| k.level == 3).collect();
        let after = mesh.refine_and_coarsen(&vec![false; mesh.n_cells()], &coarsen);
        assert_eq!(after.n_cells(), 4);
    }
}
