use super::{Mesh, SparseMatrix};
use nalgebra::DVector;
use std::collections::BTreeMap;

/// Holds the hanging-node constraints of a locally refined mesh
///
/// A hanging node lies at the midpoint of an edge of a coarser neighbor; its value is
/// constrained to the average of the two endpoints of that edge. Chains of constraints
/// are resolved so that masters are always unconstrained nodes.
///
/// 1D meshes have no hanging nodes.
#[derive(Clone, Debug)]
pub struct HangingNodes {
    /// Maps constrained node → list of (master node, weight)
    masters: BTreeMap<usize, Vec<(usize, f64)>>,

    /// Flags the constrained nodes
    flags: Vec<bool>,
}

impl HangingNodes {
    /// Finds the hanging nodes of a mesh
    pub fn new(mesh: &Mesh) -> Self {
        let mut raw: BTreeMap<usize, (usize, usize)> = BTreeMap::new();
        if mesh.dim() == 2 {
            for key in mesh.cells() {
                let s = key.span();
                if s < 2 {
                    continue;
                }
                let (x0, y0) = key.origin();
                let h = s / 2;
                let edges = [
                    ((x0, y0), (x0 + s, y0), (x0 + h, y0)),
                    ((x0, y0 + s), (x0 + s, y0 + s), (x0 + h, y0 + s)),
                    ((x0, y0), (x0, y0 + s), (x0, y0 + h)),
                    ((x0 + s, y0), (x0 + s, y0 + s), (x0 + s, y0 + h)),
                ];
                for (a, b, mid) in &edges {
                    if let Some(m) = mesh.find_node(mid) {
                        // both endpoints are vertices of this cell
                        if let (Some(na), Some(nb)) = (mesh.find_node(a), mesh.find_node(b)) {
                            raw.insert(m, (na, nb));
                        }
                    }
                }
            }
        }
        let mut masters = BTreeMap::new();
        for node in raw.keys() {
            let mut list: BTreeMap<usize, f64> = BTreeMap::new();
            resolve(*node, 1.0, &raw, &mut list);
            masters.insert(*node, list.into_iter().collect());
        }
        let mut flags = vec![false; mesh.n_nodes()];
        for node in masters.keys() {
            flags[*node] = true;
        }
        HangingNodes { masters, flags }
    }

    /// Returns the number of constrained nodes
    pub fn n_constrained(&self) -> usize {
        self.masters.len()
    }

    /// Returns whether a node is constrained
    pub fn is_constrained(&self, node: usize) -> bool {
        self.flags[node]
    }

    /// Returns the flags of constrained nodes
    pub fn flags(&self) -> &[bool] {
        &self.flags
    }

    /// Returns the masters of a constrained node
    pub fn masters(&self, node: usize) -> Option<&Vec<(usize, f64)>> {
        self.masters.get(&node)
    }

    /// Condenses the matrix and right-hand side
    ///
    /// Rows and columns of constrained nodes are distributed onto their masters. Afterwards,
    /// each constrained row holds only its (non-zero) diagonal and the right-hand side is zero.
    pub fn condense(&self, aa: &mut SparseMatrix, bb: &mut DVector<f64>) {
        if self.masters.is_empty() {
            return;
        }
        let pattern = aa.pattern().clone();
        let old = aa.values().to_vec();
        let mut new = vec![0.0; old.len()];
        let expand = |i: usize| -> Vec<(usize, f64)> {
            match self.masters.get(&i) {
                Some(list) => list.clone(),
                None => vec![(i, 1.0)],
            }
        };
        for i in 0..pattern.n_rows() {
            let ei = expand(i);
            for p in pattern.row_range(i) {
                let j = pattern.col(p);
                let v = old[p];
                if v == 0.0 {
                    continue;
                }
                let ej = expand(j);
                for (r, wr) in &ei {
                    for (c, wc) in &ej {
                        if let Some(q) = pattern.find(*r, *c) {
                            new[q] += wr * wc * v;
                        }
                    }
                }
            }
        }

        // constrained rows keep a non-zero diagonal
        for (node, _) in &self.masters {
            if let Some(q) = pattern.find(*node, *node) {
                let d = old[q];
                new[q] = if d != 0.0 { d } else { 1.0 };
            }
        }
        aa.values_mut().copy_from_slice(&new);
        self.condense_vector(bb);
    }

    /// Condenses the right-hand side vector
    pub fn condense_vector(&self, bb: &mut DVector<f64>) {
        for (node, list) in &self.masters {
            let v = bb[*node];
            for (m, w) in list {
                bb[*m] += w * v;
            }
            bb[*node] = 0.0;
        }
    }

    /// Sets the constrained values from their masters
    pub fn distribute(&self, x: &mut DVector<f64>) {
        for (node, list) in &self.masters {
            x[*node] = list.iter().map(|(m, w)| w * x[*m]).sum();
        }
    }
}

/// Expands a constrained node into weighted unconstrained masters
fn resolve(node: usize, weight: f64, raw: &BTreeMap<usize, (usize, usize)>, list: &mut BTreeMap<usize, f64>) {
    match raw.get(&node) {
        Some((a, b)) => {
            resolve(*a, 0.5 * weight, raw, list);
            resolve(*b, 0.5 * weight, raw, list);
        }
        None => *list.entry(node).or_insert(0.0) += weight,
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
