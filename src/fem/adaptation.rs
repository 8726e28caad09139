use super::shape::{dot, n_shape, shape_gradients_ref, FaceValues, Quadrature};
use super::{HangingNodes, Mesh, NodalFields};
use crate::base::{Config, SimError, NEGLIGIBLE_INDICATOR};
use nalgebra::DVector;

/// Computes the gradient of a Q1 field at a point of a cell
fn gradient_at(mesh: &Mesh, cell: usize, field: &DVector<f64>, x: &[f64; 2]) -> [f64; 2] {
    let dim = mesh.dim();
    let xi = mesh.reference_coords(cell, x);
    let h = mesh.cell_side(cell);
    let mut gg = vec![[0.0; 2]; n_shape(dim)];
    shape_gradients_ref(dim, &xi, &mut gg);
    let mut grad = [0.0; 2];
    for (k, node) in mesh.cell_nodes(cell).iter().enumerate() {
        grad[0] += field[*node] * gg[k][0] / h;
        grad[1] += field[*node] * gg[k][1] / h;
    }
    grad
}

/// Computes the Kelly error indicator of each cell
///
/// The indicator integrates the squared jump of the normal derivative over the interior faces:
///
/// ```text
/// η_K² = (h_K / 24) ∫_∂K [∂u/∂n]² dS
/// ```
pub fn kelly_indicator(mesh: &Mesh, field: &DVector<f64>) -> Vec<f64> {
    let dim = mesh.dim();
    let mut fv = FaceValues::new(dim, Quadrature::Gauss2);
    let mut errors = vec![0.0; mesh.n_cells()];
    for c in 0..mesh.n_cells() {
        let side = mesh.cell_side(c);
        let nodes = mesh.cell_nodes(c);
        let mut sum = 0.0;
        for face in 0..2 * dim {
            if mesh.boundary_id(c, face).is_some() {
                continue;
            }
            fv.reinit(face, side);
            for q in 0..fv.n_points() {
                // own gradient and the point on the face
                let mut grad = [0.0; 2];
                let mut x = [0.0; 2];
                for (k, node) in nodes.iter().enumerate() {
                    grad[0] += field[*node] * fv.gradients[q][k][0];
                    grad[1] += field[*node] * fv.gradients[q][k][1];
                    let xn = mesh.node_coords(*node);
                    x[0] += xn[0] * fv.values[q][k];
                    x[1] += xn[1] * fv.values[q][k];
                }
                // the neighbor across the face
                let eps = 1e-6 * side;
                let outside = [x[0] + eps * fv.normal[0], x[1] + eps * fv.normal[1]];
                let neighbor = match mesh.locate(&outside[..dim]) {
                    Some(n) => n,
                    None => continue,
                };
                let grad_nb = gradient_at(mesh, neighbor, field, &x);
                let jump = dot(dim, &fv.normal, &grad) - dot(dim, &fv.normal, &grad_nb);
                sum += jump * jump * fv.jxw[q];
            }
        }
        errors[c] = f64::sqrt(side / 24.0 * sum);
    }
    errors
}

/// Flags cells for refinement and coarsening by the fixed-fraction strategy
///
/// Cells with the largest indicators making up `refine_fraction` of the total error are
/// refined; cells with the smallest indicators making up `coarsen_fraction` are coarsened.
/// The number of refined cells is reduced if the mesh would exceed `max_n_cells`.
pub fn mark_fixed_fraction(
    dim: usize,
    errors: &[f64],
    refine_fraction: f64,
    coarsen_fraction: f64,
    max_n_cells: usize,
) -> (Vec<bool>, Vec<bool>) {
    let n = errors.len();
    let mut refine = vec![false; n];
    let mut coarsen = vec![false; n];
    let total: f64 = errors.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return (refine, coarsen);
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|a, b| errors[*b].total_cmp(&errors[*a]));

    // largest first
    let mut n_refine = 0;
    let mut sum = 0.0;
    for &c in &order {
        if sum >= refine_fraction * total {
            break;
        }
        sum += errors[c];
        n_refine += 1;
    }

    // smallest first
    let mut n_coarsen = 0;
    let mut sum = 0.0;
    for &c in order.iter().rev() {
        if sum + errors[c] > coarsen_fraction * total {
            break;
        }
        sum += errors[c];
        n_coarsen += 1;
    }
    n_coarsen = usize::min(n_coarsen, n - n_refine);

    // cap the size of the new mesh
    let n_children = n_shape(dim);
    let predicted = |nr: usize| n + nr * (n_children - 1);
    while n_refine > 0 && predicted(n_refine) > max_n_cells {
        n_refine -= 1;
    }

    for &c in order.iter().take(n_refine) {
        refine[c] = true;
    }
    for &c in order.iter().rev().take(n_coarsen) {
        coarsen[c] = true;
    }
    (refine, coarsen)
}

/// Transfers all nodal fields onto a new mesh
///
/// Nodes present in both meshes keep their values; new nodes receive the Q1 interpolation
/// of the old mesh. Pressure and substrate are made consistent with the new constraints.
pub fn transfer_fields(
    old_mesh: &Mesh,
    new_mesh: &Mesh,
    new_constraints: &HangingNodes,
    fields: &NodalFields,
) -> Result<NodalFields, SimError> {
    let mut result = NodalFields::new(new_mesh.n_nodes());
    for n in 0..new_mesh.n_nodes() {
        let key = new_mesh.node_key(n);
        let source = old_mesh.find_node(&key);
        let x = new_mesh.node_coords(n);
        let x = &x[..new_mesh.dim()];
        for (src, dst) in [(&fields.old, &mut result.old), (&fields.new, &mut result.new)] {
            let targets = dst.vectors_mut();
            for (v, target) in src.vectors().iter().zip(targets) {
                target[n] = match source {
                    Some(m) => v[m],
                    None => old_mesh.point_value(v, x)?,
                };
            }
        }
    }
    for set in [&mut result.old, &mut result.new] {
        new_constraints.distribute(&mut set.pressure);
        new_constraints.distribute(&mut set.substrate);
    }
    Ok(result)
}

/// Refines and coarsens the mesh according to an indicator field and transfers the fields
///
/// Returns None if the indicator is negligible, no cell is flagged, or the mesh does not change.
pub fn adapt_mesh(
    mesh: &Mesh,
    fields: &NodalFields,
    indicator: &DVector<f64>,
    config: &Config,
) -> Result<Option<(Mesh, HangingNodes, NodalFields)>, SimError> {
    let errors = kelly_indicator(mesh, indicator);
    let largest = errors.iter().fold(0.0, |acc: f64, e| acc.max(*e));
    if largest <= NEGLIGIBLE_INDICATOR * f64::max(indicator.amax(), 1.0) {
        return Ok(None);
    }
    let (refine, coarsen) = mark_fixed_fraction(
        mesh.dim(),
        &errors,
        config.refine_fraction,
        config.coarsen_fraction,
        config.max_n_cells,
    );
    if !refine.iter().any(|f| *f) && !coarsen.iter().any(|f| *f) {
        return Ok(None);
    }
    let new_mesh = mesh.refine_and_coarsen(&refine, &coarsen);
    if new_mesh.cells() == mesh.cells() {
        return Ok(None);
    }
    let constraints = HangingNodes::new(&new_mesh);
    let new_fields = transfer_fields(mesh, &new_mesh, &constraints, fields)?;
    Ok(Some((new_mesh, constraints, new_fields)))
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
