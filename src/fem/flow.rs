use super::krylov::{solve_cg, PreconditionSsor, SolverControl};
use super::shape::{dot, CellValues, FaceValues, Quadrature};
use super::{FieldSet, HangingNodes, Mesh, NodalFields, SparseMatrix, SparsityPattern};
use crate::base::{Config, FlowEquation, Parameters, Phase, SimError, BOUNDARY_BOTTOM, BOUNDARY_TOP};
use nalgebra::{DMatrix, DVector};
use std::rc::Rc;

/// Holds the flow (Richards) settings extracted from the parameters
#[derive(Clone, Copy, Debug)]
pub struct FlowSettings {
    /// Formulation (head or mixed)
    pub equation: FlowEquation,

    /// Use the trapezoidal rule for the cell integrals (lumped mass)
    pub lumped: bool,

    /// θ-method weight
    pub theta: f64,

    /// Prescribe the pressure at the bottom
    pub fixed_at_bottom: bool,

    /// Prescribed bottom pressure
    pub bottom_value: f64,

    /// Prescribe the pressure at the top (not while drying)
    pub fixed_at_top: bool,

    /// Prescribed top pressure
    pub top_value: f64,

    /// Outward Darcy flux at the top when not prescribed (negative values infiltrate)
    pub top_flux: f64,
}

impl FlowSettings {
    /// Extracts the settings from the parameters
    pub fn from_parameters(params: &Parameters) -> Self {
        FlowSettings {
            equation: params.moisture_transport_equation,
            lumped: params.lumped_matrix,
            theta: params.theta_richards,
            fixed_at_bottom: params.richards_fixed_at_bottom,
            bottom_value: params.richards_bottom_fixed_value,
            fixed_at_top: params.richards_fixed_at_top,
            top_value: params.richards_top_fixed_value,
            top_flux: params.richards_top_flow_value,
        }
    }
}

/// Assembles and solves the flow equation
///
/// ```text
/// (M + θ Δt L_new) h = M h* - (1-θ) Δt L_old h_old - Δt ∫ K ∂N/∂z dΩ + boundary terms
/// ```
///
/// where `h* = h_old` for the head formulation and `h* = h_iterate` (plus the moisture-content
/// change) for the mixed formulation.
pub struct FlowSystem {
    settings: FlowSettings,
    mass: SparseMatrix,
    laplace_new: SparseMatrix,
    laplace_old: SparseMatrix,

    /// System matrix
    pub system: SparseMatrix,

    /// Right-hand side
    pub rhs: DVector<f64>,

    /// Outward water flow through the top boundary (from the last assembly)
    pub flow_at_top: f64,

    /// Outward water flow through the bottom boundary (from the last assembly)
    pub flow_at_bottom: f64,
}

impl FlowSystem {
    /// Allocates a new instance
    pub fn new(settings: FlowSettings, pattern: Rc<SparsityPattern>) -> Self {
        let n = pattern.n_rows();
        FlowSystem {
            settings,
            mass: SparseMatrix::new(pattern.clone()),
            laplace_new: SparseMatrix::new(pattern.clone()),
            laplace_old: SparseMatrix::new(pattern.clone()),
            system: SparseMatrix::new(pattern),
            rhs: DVector::zeros(n),
            flow_at_top: 0.0,
            flow_at_bottom: 0.0,
        }
    }

    /// Assembles the system matrix and right-hand side
    pub fn assemble(&mut self, mesh: &Mesh, fields: &NodalFields, phase: Phase, dt: f64) {
        let s = self.settings;
        let theta = s.theta;
        let dim = mesh.dim();
        let vertical = dim - 1;
        let nnode = 1 << dim;
        let quadrature = if s.lumped {
            Quadrature::Trapezoidal
        } else {
            Quadrature::Gauss2
        };
        let mut cv = CellValues::new(dim, quadrature);
        let mut fv = FaceValues::new(dim, Quadrature::Gauss1);
        let (old, new) = (&fields.old, &fields.new);

        self.mass.set_zero();
        self.laplace_new.set_zero();
        self.laplace_old.set_zero();
        self.rhs.fill(0.0);
        self.flow_at_top = 0.0;
        self.flow_at_bottom = 0.0;

        let mut mm = DMatrix::<f64>::zeros(nnode, nnode);
        let mut ln = DMatrix::<f64>::zeros(nnode, nnode);
        let mut lo = DMatrix::<f64>::zeros(nnode, nnode);
        let mut rr = DVector::<f64>::zeros(nnode);

        for c in 0..mesh.n_cells() {
            let nodes = mesh.cell_nodes(c);
            let side = mesh.cell_side(c);
            cv.reinit(side);
            mm.fill(0.0);
            ln.fill(0.0);
            lo.fill(0.0);
            rr.fill(0.0);

            for q in 0..cv.n_points() {
                let nn = &cv.values[q];
                let gg = &cv.gradients[q];
                let w = cv.jxw[q];
                let at = |v: &DVector<f64>| -> f64 { (0..nnode).map(|k| v[nodes[k]] * nn[k]).sum() };
                let k_new = at(&new.conductivity);
                let k_old = at(&old.conductivity);
                let cap = match s.equation {
                    FlowEquation::Head => theta * at(&new.capacity) + (1.0 - theta) * at(&old.capacity),
                    FlowEquation::Mixed => at(&new.capacity),
                };
                let dtheta = match s.equation {
                    FlowEquation::Head => 0.0,
                    FlowEquation::Mixed => at(&new.moisture_total) - at(&old.moisture_total),
                };
                let k_mix = theta * k_new + (1.0 - theta) * k_old;
                for i in 0..nnode {
                    rr[i] -= dt * k_mix * gg[i][vertical] * w;
                    rr[i] -= dtheta * nn[i] * w;
                    for j in 0..nnode {
                        let gij = dot(dim, &gg[i], &gg[j]);
                        mm[(i, j)] += cap * nn[i] * nn[j] * w;
                        ln[(i, j)] += k_new * gij * w;
                        lo[(i, j)] += k_old * gij * w;
                    }
                }
            }

            // boundary faces
            for face in 0..2 * dim {
                let id = match mesh.boundary_id(c, face) {
                    Some(id) => id,
                    None => continue,
                };
                if id != BOUNDARY_TOP && id != BOUNDARY_BOTTOM {
                    continue;
                }
                fv.reinit(face, side);
                let top_neumann = id == BOUNDARY_TOP && !s.fixed_at_top;
                let flux = if phase == Phase::Drying { 0.0 } else { s.top_flux };
                let mut flow = 0.0;
                for q in 0..fv.n_points() {
                    let nn = &fv.values[q];
                    let gg = &fv.gradients[q];
                    let w = fv.jxw[q];
                    if top_neumann {
                        for i in 0..nnode {
                            rr[i] -= dt * flux * nn[i] * w;
                        }
                    }
                    let at = |v: &DVector<f64>| -> f64 { (0..nnode).map(|k| v[nodes[k]] * nn[k]).sum() };
                    let grad_n = |set: &FieldSet| -> f64 {
                        (0..nnode)
                            .map(|k| {
                                let total_head = set.pressure[nodes[k]] + mesh.node_elevation(nodes[k]);
                                dot(dim, &fv.normal, &gg[k]) * total_head
                            })
                            .sum()
                    };
                    flow -= (theta * at(&new.conductivity) * grad_n(new)
                        + (1.0 - theta) * at(&old.conductivity) * grad_n(old))
                        * w;
                }
                if id == BOUNDARY_TOP {
                    self.flow_at_top += flow;
                } else {
                    self.flow_at_bottom += flow;
                }
            }

            // add to global
            for i in 0..nnode {
                self.rhs[nodes[i]] += rr[i];
                for j in 0..nnode {
                    self.mass.add(nodes[i], nodes[j], mm[(i, j)]);
                    self.laplace_new.add(nodes[i], nodes[j], ln[(i, j)]);
                    self.laplace_old.add(nodes[i], nodes[j], lo[(i, j)]);
                }
            }
        }

        // time discretization
        let h_star = match s.equation {
            FlowEquation::Head => &old.pressure,
            FlowEquation::Mixed => &new.pressure,
        };
        self.mass.vmult_add(&mut self.rhs, h_star);
        let mut tmp = DVector::zeros(self.rhs.len());
        self.laplace_old.vmult(&mut tmp, &old.pressure);
        self.rhs.axpy(-(1.0 - theta) * dt, &tmp, 1.0);
        self.system.copy_from(&self.mass);
        self.system.add_scaled(theta * dt, &self.laplace_new);
    }

    /// Returns the prescribed values at the current phase
    pub fn prescribed_values(&self, mesh: &Mesh, constraints: &HangingNodes, phase: Phase) -> Vec<(usize, f64)> {
        let s = &self.settings;
        let mut prescribed = Vec::new();
        if s.fixed_at_bottom {
            for n in mesh.boundary_nodes(BOUNDARY_BOTTOM) {
                prescribed.push((n, s.bottom_value));
            }
        }
        if s.fixed_at_top && phase != Phase::Drying {
            for n in mesh.boundary_nodes(BOUNDARY_TOP) {
                prescribed.push((n, s.top_value));
            }
        }
        prescribed.retain(|(n, _)| !constraints.is_constrained(*n));
        prescribed
    }

    /// Solves the assembled system, overwriting the new pressure
    ///
    /// The current iterate is the initial guess.
    pub fn solve(
        &mut self,
        mesh: &Mesh,
        constraints: &HangingNodes,
        fields: &mut NodalFields,
        phase: Phase,
        config: &Config,
    ) -> Result<usize, SimError> {
        constraints.condense(&mut self.system, &mut self.rhs);
        let prescribed = self.prescribed_values(mesh, constraints, phase);
        let x = &mut fields.new.pressure;
        self.system.apply_boundary_values(&prescribed, x, &mut self.rhs);
        let control = SolverControl::new(config.linsol_tol, config.linsol_max_iter_factor, x.len());
        let precond = PreconditionSsor::new(&self.system, config.ssor_omega);
        let n_iterations = solve_cg(&self.system, x, &self.rhs, &precond, &control)?;
        constraints.distribute(x);
        Ok(n_iterations)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{FlowSettings, FlowSystem};
    use crate::base::{Config, FlowEquation, Parameters, Phase};
    use crate::fem::{HangingNodes, Mesh, NodalFields, SparsityPattern};
    use crate::material::{BiomassKinetics, HydraulicProperties};
    use approx::assert_relative_eq;
    use std::rc::Rc;

    fn hydrostatic(level: usize, equation: FlowEquation) -> (Mesh, HangingNodes, FlowSystem, NodalFields, Parameters) {
        let mut params = Parameters::sample();
        params.refinement_level = level;
        params.moisture_transport_equation = equation;
        params.theta_richards = 1.0;
        let mesh = Mesh::new_hyper_cube(1, params.domain_size, level).unwrap();
        let hn = HangingNodes::new(&mesh);
        let pattern = Rc::new(SparsityPattern::new(&mesh, &hn));
        let flow = FlowSystem::new(FlowSettings::from_parameters(&params), pattern);
        let mut fields = NodalFields::new(mesh.n_nodes());
        let (h_bot, size) = (params.richards_bottom_fixed_value, params.domain_size);
        for n in 0..mesh.n_nodes() {
            fields.new.pressure[n] = h_bot - size - mesh.node_elevation(n);
        }
        let hp = HydraulicProperties::from_parameters(&params).unwrap();
        let kin = BiomassKinetics::from_parameters(&params);
        fields
            .update_constitutive(&hp, &kin, params.relative_permeability_model, Phase::Drying, 0.0)
            .unwrap();
        fields.commit();
        (mesh, hn, flow, fields, params)
    }

    #[test]
    fn hydrostatic_state_has_no_flow() {
        for equation in [FlowEquation::Head, FlowEquation::Mixed] {
            let (mesh, hn, mut flow, mut fields, _) = hydrostatic(3, equation);
            let before = fields.new.pressure.clone();
            flow.assemble(&mesh, &fields, Phase::Drying, 1.0);
            assert_relative_eq!(flow.flow_at_top, 0.0, epsilon = 1e-12);
            assert_relative_eq!(flow.flow_at_bottom, 0.0, epsilon = 1e-12);
            let mut config = Config::new();
            config.linsol_tol = 1e-12;
            flow.solve(&mesh, &hn, &mut fields, Phase::Drying, &config).unwrap();
            for n in 0..mesh.n_nodes() {
                assert_relative_eq!(fields.new.pressure[n], before[n], max_relative = 1e-8);
            }
        }
    }

    #[test]
    fn prescribed_values_follow_the_phase() {
        let (mesh, hn, flow, _, params) = hydrostatic(2, FlowEquation::Head);
        let drying = flow.prescribed_values(&mesh, &hn, Phase::Drying);
        assert_eq!(drying, &[(0, params.richards_bottom_fixed_value)]);
        let saturation = flow.prescribed_values(&mesh, &hn, Phase::Saturation);
        assert_eq!(saturation.len(), 2);
        assert_eq!(saturation[1], (4, params.richards_top_fixed_value));
    }

    #[test]
    fn uniform_downward_flow_is_balanced() {
        // saturated column with unit gradient: h = 0 everywhere (K = Ks); top and bottom flows cancel
        let (mesh, _, mut flow, mut fields, params) = hydrostatic(2, FlowEquation::Head);
        let ks = params.saturated_hydraulic_conductivity;
        fields.old.conductivity.fill(ks);
        fields.new.conductivity.fill(ks);
        fields.old.pressure.fill(0.0);
        fields.new.pressure.fill(0.0);
        flow.assemble(&mesh, &fields, Phase::Saturation, 1.0);
        // q = -K ∇(h + z) = -K e_z (downwards); outward at the top: -K; at the bottom: +K
        assert_relative_eq!(flow.flow_at_top, -ks, epsilon = 1e-14);
        assert_relative_eq!(flow.flow_at_bottom, ks, epsilon = 1e-14);
    }

    #[test]
    fn lumped_mass_is_diagonal() {
        // without conductivity the system matrix is the (capacity-weighted) mass matrix
        let (mesh, hn, _, mut fields, params) = hydrostatic(2, FlowEquation::Head);
        let (cap, h) = (0.02, params.domain_size / 4.0);
        for set in [&mut fields.old, &mut fields.new] {
            set.conductivity.fill(0.0);
            set.capacity.fill(cap);
        }
        for (lumped, diag, off) in [(false, 2.0 * cap * h / 3.0, cap * h / 6.0), (true, cap * h, 0.0)] {
            let settings = FlowSettings {
                lumped,
                ..FlowSettings::from_parameters(&params)
            };
            let mut flow = FlowSystem::new(settings, Rc::new(SparsityPattern::new(&mesh, &hn)));
            flow.assemble(&mesh, &fields, Phase::Saturation, 1.0);
            assert_relative_eq!(flow.system.get(2, 2), diag, epsilon = 1e-15);
            assert_relative_eq!(flow.system.get(2, 3), off, epsilon = 1e-15);
            assert_relative_eq!(flow.system.get(2, 1), off, epsilon = 1e-15);
            assert_relative_eq!(flow.system.get(0, 0), diag / 2.0, epsilon = 1e-15);
        }
    }

    #[test]
    fn top_flux_is_applied_after_drying() {
        let (mesh, hn, _, mut fields, mut params) = hydrostatic(2, FlowEquation::Head);
        params.richards_fixed_at_top = false;
        params.richards_top_flow_value = -1e-3;
        for set in [&mut fields.old, &mut fields.new] {
            set.conductivity.fill(0.0);
            set.pressure.fill(0.0);
        }
        let pattern = Rc::new(SparsityPattern::new(&mesh, &hn));
        let mut flow = FlowSystem::new(FlowSettings::from_parameters(&params), pattern);
        let dt = 2.0;

        // infiltration adds -Δt q at the top node only
        flow.assemble(&mesh, &fields, Phase::Saturation, dt);
        assert_relative_eq!(flow.rhs[4], 2e-3, epsilon = 1e-15);
        for n in 0..4 {
            assert_eq!(flow.rhs[n], 0.0);
        }
        assert_eq!(flow.prescribed_values(&mesh, &hn, Phase::Saturation).len(), 1);

        // no flux while drying
        flow.assemble(&mesh, &fields, Phase::Drying, dt);
        assert_eq!(flow.rhs[4], 0.0);
    }
}
