use super::krylov::{solve_bicgstab, PreconditionJacobi, SolverControl};
use super::shape::{dot, CellValues, FaceValues, Quadrature};
use super::{FieldSet, HangingNodes, Mesh, NodalFields, SparseMatrix, SparsityPattern};
use crate::base::{Config, EntryPoint, Parameters, SimError, BOUNDARY_BOTTOM, BOUNDARY_TOP};
use crate::base::{MG_PER_LITER_TO_MG_PER_CM3, NEGLIGIBLE_DISPERSION, NEGLIGIBLE_VELOCITY, SMALL_PECLET};
use crate::material::BiomassKinetics;
use nalgebra::{DMatrix, DVector};
use std::rc::Rc;

/// Holds the transport settings extracted from the parameters
#[derive(Clone, Copy, Debug)]
pub struct TransportSettings {
    /// θ-method weight
    pub theta: f64,

    /// Boundary where the substrate enters the domain
    pub entry: EntryPoint,

    /// Prescribe the concentration at the top instead of the inflow condition
    pub fixed_at_top: bool,

    /// Inflow (or prescribed) concentration in mg/cm³
    pub inflow_concentration: f64,

    /// Longitudinal dispersivity αL
    pub dispersivity: f64,

    /// Effective diffusion coefficient
    pub diffusion: f64,
}

impl TransportSettings {
    /// Extracts the settings from the parameters
    ///
    /// **Note:** The inflow concentration is given in mg/L and converted to mg/cm³ here.
    pub fn from_parameters(params: &Parameters) -> Self {
        TransportSettings {
            theta: params.theta_transport,
            entry: params.transport_mass_entry_point,
            fixed_at_top: params.transport_fixed_at_top,
            inflow_concentration: params.transport_top_fixed_value * MG_PER_LITER_TO_MG_PER_CM3,
            dispersivity: params.dispersivity_longitudinal,
            diffusion: params.effective_diffusion_coefficient,
        }
    }

    /// Returns the hydrodynamic dispersion coefficient D = αL |v| + D_eff
    pub fn dispersion(&self, speed: f64) -> f64 {
        self.dispersivity * speed + self.diffusion
    }
}

/// Holds the stabilization data of a cell
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stabilization {
    /// Darcy velocity at the new time
    pub velocity_new: [f64; 2],

    /// Darcy velocity at the old time
    pub velocity_old: [f64; 2],

    /// Local Peclet number
    pub peclet: f64,

    /// SUPG parameter
    pub tau: f64,
}

/// Computes the cell-averaged Darcy velocity v = -K ∇(h + z)
pub fn cell_velocity(mesh: &Mesh, cell: usize, cv: &CellValues, set: &FieldSet) -> [f64; 2] {
    let nodes = mesh.cell_nodes(cell);
    let mut v = [0.0; 2];
    let mut volume = 0.0;
    for q in 0..cv.n_points() {
        let w = cv.jxw[q];
        for (k, node) in nodes.iter().enumerate() {
            let total_head = set.pressure[*node] + mesh.node_elevation(*node);
            let a = set.conductivity[*node] * total_head * w;
            v[0] -= a * cv.gradients[q][k][0];
            v[1] -= a * cv.gradients[q][k][1];
            volume += cv.values[q][k] * w;
        }
    }
    [v[0] / volume, v[1] / volume]
}

/// Computes the velocities, Peclet number, and SUPG parameter of a cell
///
/// Negligible new velocities are zeroed (together with the old ones); a negligible old velocity
/// is replaced by the new one.
pub fn stabilization(
    settings: &TransportSettings,
    cell: usize,
    diameter: f64,
    mut v_new: [f64; 2],
    mut v_old: [f64; 2],
) -> Result<Stabilization, SimError> {
    let norm = |v: &[f64; 2]| f64::sqrt(v[0] * v[0] + v[1] * v[1]);
    if !norm(&v_new).is_finite() || !norm(&v_old).is_finite() {
        return Err(SimError::NumericalDegeneracy {
            cell,
            what: "the Darcy velocity is not finite".to_string(),
        });
    }
    if norm(&v_new) < NEGLIGIBLE_VELOCITY {
        v_new = [0.0; 2];
        v_old = [0.0; 2];
    } else if norm(&v_old) < NEGLIGIBLE_VELOCITY {
        v_old = v_new;
    }
    let (speed_new, speed_old) = (norm(&v_new), norm(&v_old));
    let (d_new, d_old) = (settings.dispersion(speed_new), settings.dispersion(speed_old));
    let mut peclet = 0.0;
    let mut tau = 0.0;
    if speed_new >= NEGLIGIBLE_VELOCITY && d_new > NEGLIGIBLE_DISPERSION && d_old > NEGLIGIBLE_DISPERSION {
        let speed = 0.5 * (speed_new + speed_old);
        let d = 0.5 * (d_new + d_old);
        peclet = 0.5 * diameter * speed / d;
        let beta = if peclet < SMALL_PECLET {
            peclet / 3.0
        } else {
            1.0 / f64::tanh(peclet) - 1.0 / peclet
        };
        tau = 0.5 * beta * diameter / speed;
    }
    if !peclet.is_finite() || peclet < 0.0 {
        return Err(SimError::NumericalDegeneracy {
            cell,
            what: format!("Peclet number = {:?}", peclet),
        });
    }
    if !tau.is_finite() || tau < 0.0 {
        return Err(SimError::NumericalDegeneracy {
            cell,
            what: format!("SUPG parameter τ = {:?}", tau),
        });
    }
    Ok(Stabilization {
        velocity_new: v_new,
        velocity_old: v_old,
        peclet,
        tau,
    })
}

/// Assembles and solves the SUPG-stabilized advection-dispersion-reaction equation
///
/// ```text
/// (M_new + θ Δt L_new) c = M_old c_old - (1-θ) Δt L_old c_old + inflow terms
/// ```
pub struct TransportSystem {
    settings: TransportSettings,
    mass_new: SparseMatrix,
    mass_old: SparseMatrix,
    laplace_new: SparseMatrix,
    laplace_old: SparseMatrix,

    /// System matrix
    pub system: SparseMatrix,

    /// Right-hand side
    pub rhs: DVector<f64>,

    /// Outward nutrient flow through the top boundary (from the last assembly)
    pub nutrient_flow_at_top: f64,

    /// Outward nutrient flow through the bottom boundary (from the last assembly)
    pub nutrient_flow_at_bottom: f64,

    /// Nutrient mass in the domain ∫ θf c dΩ (from the last assembly)
    pub nutrients_in_domain: f64,
}

impl TransportSystem {
    /// Allocates a new instance
    pub fn new(settings: TransportSettings, pattern: Rc<SparsityPattern>) -> Self {
        let n = pattern.n_rows();
        TransportSystem {
            settings,
            mass_new: SparseMatrix::new(pattern.clone()),
            mass_old: SparseMatrix::new(pattern.clone()),
            laplace_new: SparseMatrix::new(pattern.clone()),
            laplace_old: SparseMatrix::new(pattern.clone()),
            system: SparseMatrix::new(pattern),
            rhs: DVector::zeros(n),
            nutrient_flow_at_top: 0.0,
            nutrient_flow_at_bottom: 0.0,
            nutrients_in_domain: 0.0,
        }
    }

    /// Returns the settings
    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Assembles the system matrix and right-hand side
    pub fn assemble(
        &mut self,
        mesh: &Mesh,
        fields: &NodalFields,
        kinetics: &BiomassKinetics,
        dt: f64,
    ) -> Result<(), SimError> {
        let s = self.settings;
        let theta = s.theta;
        let dim = mesh.dim();
        let nnode = 1 << dim;
        let mut cv = CellValues::new(dim, Quadrature::Gauss2);
        let mut fv = FaceValues::new(dim, Quadrature::Gauss2);
        let (old, new) = (&fields.old, &fields.new);

        self.mass_new.set_zero();
        self.mass_old.set_zero();
        self.laplace_new.set_zero();
        self.laplace_old.set_zero();
        self.rhs.fill(0.0);
        self.nutrient_flow_at_top = 0.0;
        self.nutrient_flow_at_bottom = 0.0;
        self.nutrients_in_domain = 0.0;

        let mut mn = DMatrix::<f64>::zeros(nnode, nnode);
        let mut mo = DMatrix::<f64>::zeros(nnode, nnode);
        let mut ln = DMatrix::<f64>::zeros(nnode, nnode);
        let mut lo = DMatrix::<f64>::zeros(nnode, nnode);
        let mut rr = DVector::<f64>::zeros(nnode);
        let mut w_new = vec![0.0; nnode];
        let mut w_old = vec![0.0; nnode];

        for c in 0..mesh.n_cells() {
            let nodes = mesh.cell_nodes(c);
            let side = mesh.cell_side(c);
            cv.reinit(side);
            mn.fill(0.0);
            mo.fill(0.0);
            ln.fill(0.0);
            lo.fill(0.0);
            rr.fill(0.0);

            let v_new = cell_velocity(mesh, c, &cv, new);
            let v_old = cell_velocity(mesh, c, &cv, old);
            let stab = stabilization(&s, c, mesh.cell_diameter(c), v_new, v_old)?;
            let (v_new, v_old, tau) = (stab.velocity_new, stab.velocity_old, stab.tau);
            let norm = |v: &[f64; 2]| f64::sqrt(v[0] * v[0] + v[1] * v[1]);
            let d_new = s.dispersion(norm(&v_new));
            let d_old = s.dispersion(norm(&v_old));
            let sink_new: Vec<f64> = nodes
                .iter()
                .map(|n| kinetics.sink_coefficient(new.biomass[*n], old.substrate[*n]))
                .collect();
            let sink_old: Vec<f64> = nodes
                .iter()
                .map(|n| kinetics.sink_coefficient(old.biomass[*n], old.substrate[*n]))
                .collect();

            for q in 0..cv.n_points() {
                let nn = &cv.values[q];
                let gg = &cv.gradients[q];
                let w = cv.jxw[q];
                let at = |v: &DVector<f64>| -> f64 { (0..nnode).map(|k| v[nodes[k]] * nn[k]).sum() };
                let thf_new = at(&new.moisture_free);
                let thf_old = at(&old.moisture_free);
                let r_new: f64 = (0..nnode).map(|k| sink_new[k] * nn[k]).sum();
                let r_old: f64 = (0..nnode).map(|k| sink_old[k] * nn[k]).sum();
                self.nutrients_in_domain += (0..nnode)
                    .map(|k| new.moisture_free[nodes[k]] * new.substrate[nodes[k]] * nn[k])
                    .sum::<f64>()
                    * w;
                for i in 0..nnode {
                    w_new[i] = nn[i] + tau * dot(dim, &v_new, &gg[i]);
                    w_old[i] = nn[i] + tau * dot(dim, &v_old, &gg[i]);
                }
                for i in 0..nnode {
                    for j in 0..nnode {
                        let gij = dot(dim, &gg[i], &gg[j]);
                        mn[(i, j)] += w_new[i] * nn[j] * thf_new * w;
                        mo[(i, j)] += w_old[i] * nn[j] * thf_old * w;
                        ln[(i, j)] += (gij * d_new * thf_new + w_new[i] * dot(dim, &gg[j], &v_new)
                            - w_new[i] * nn[j] * r_new)
                            * w;
                        lo[(i, j)] += (gij * d_old * thf_old + w_old[i] * dot(dim, &gg[j], &v_old)
                            - w_old[i] * nn[j] * r_old)
                            * w;
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
                let inlet = !s.fixed_at_top
                    && ((id == BOUNDARY_TOP && s.entry == EntryPoint::Top)
                        || (id == BOUNDARY_BOTTOM && s.entry == EntryPoint::Bottom));
                let vn_new = dot(dim, &v_new, &fv.normal);
                let vn_old = dot(dim, &v_old, &fv.normal);
                let cb = s.inflow_concentration;
                let mut flow = 0.0;
                for q in 0..fv.n_points() {
                    let nn = &fv.values[q];
                    let gg = &fv.gradients[q];
                    let w = fv.jxw[q];
                    for i in 0..nnode {
                        w_new[i] = nn[i] + tau * dot(dim, &v_new, &gg[i]);
                        w_old[i] = nn[i] + tau * dot(dim, &v_old, &gg[i]);
                    }
                    if inlet {
                        for i in 0..nnode {
                            for j in 0..nnode {
                                ln[(i, j)] -= w_new[i] * nn[j] * vn_new * w;
                                lo[(i, j)] -= w_old[i] * nn[j] * vn_old * w;
                            }
                            rr[i] -= w_new[i] * dt * (theta * cb * vn_new + (1.0 - theta) * cb * vn_old) * w;
                        }
                    }
                    let flux = |set: &FieldSet, d: f64, vn: f64| -> f64 {
                        let mut dispersive = 0.0;
                        let mut concentration = 0.0;
                        for k in 0..nnode {
                            let n = nodes[k];
                            dispersive += set.moisture_free[n] * set.substrate[n] * dot(dim, &gg[k], &fv.normal);
                            concentration += set.substrate[n] * nn[k];
                        }
                        -d * dispersive + concentration * vn
                    };
                    flow += (theta * flux(new, d_new, vn_new) + (1.0 - theta) * flux(old, d_old, vn_old)) * w;
                }
                if id == BOUNDARY_TOP {
                    self.nutrient_flow_at_top += flow;
                } else {
                    self.nutrient_flow_at_bottom += flow;
                }
            }

            // add to global
            for i in 0..nnode {
                self.rhs[nodes[i]] += rr[i];
                for j in 0..nnode {
                    self.mass_new.add(nodes[i], nodes[j], mn[(i, j)]);
                    self.mass_old.add(nodes[i], nodes[j], mo[(i, j)]);
                    self.laplace_new.add(nodes[i], nodes[j], ln[(i, j)]);
                    self.laplace_old.add(nodes[i], nodes[j], lo[(i, j)]);
                }
            }
        }

        // time discretization
        let mut tmp = DVector::zeros(self.rhs.len());
        self.mass_old.vmult_add(&mut self.rhs, &old.substrate);
        self.laplace_old.vmult(&mut tmp, &old.substrate);
        self.rhs.axpy(-(1.0 - theta) * dt, &tmp, 1.0);
        self.system.copy_from(&self.mass_new);
        self.system.add_scaled(theta * dt, &self.laplace_new);
        Ok(())
    }

    /// Returns the prescribed values
    pub fn prescribed_values(&self, mesh: &Mesh, constraints: &HangingNodes) -> Vec<(usize, f64)> {
        if !self.settings.fixed_at_top {
            return Vec::new();
        }
        mesh.boundary_nodes(BOUNDARY_TOP)
            .into_iter()
            .filter(|n| !constraints.is_constrained(*n))
            .map(|n| (n, self.settings.inflow_concentration))
            .collect()
    }

    /// Solves the assembled system, overwriting the new substrate concentration
    ///
    /// The current iterate is the initial guess.
    pub fn solve(
        &mut self,
        mesh: &Mesh,
        constraints: &HangingNodes,
        fields: &mut NodalFields,
        config: &Config,
    ) -> Result<usize, SimError> {
        constraints.condense(&mut self.system, &mut self.rhs);
        let prescribed = self.prescribed_values(mesh, constraints);
        let x = &mut fields.new.substrate;
        self.system.apply_boundary_values(&prescribed, x, &mut self.rhs);
        let control = SolverControl::new(config.linsol_tol, config.linsol_max_iter_factor, x.len());
        let precond = PreconditionJacobi::new(&self.system, config.jacobi_omega);
        let n_iterations = solve_bicgstab(&self.system, x, &self.rhs, &precond, &control)?;
        constraints.distribute(x);
        Ok(n_iterations)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{cell_velocity, stabilization, TransportSettings, TransportSystem};
    use crate::base::{Config, Parameters, SimError};
    use crate::fem::shape::{CellValues, Quadrature};
    use crate::fem::{HangingNodes, Mesh, NodalFields, SparsityPattern};
    use crate::material::BiomassKinetics;
    use approx::assert_relative_eq;
    use std::rc::Rc;

    fn settings() -> TransportSettings {
        TransportSettings::from_parameters(&Parameters::sample())
    }

    #[test]
    fn settings_convert_units() {
        let params = Parameters::sample();
        let s = settings();
        assert_relative_eq!(s.inflow_concentration, params.transport_top_fixed_value / 1000.0, epsilon = 1e-15);
        assert_relative_eq!(
            s.dispersion(2.0),
            2.0 * params.dispersivity_longitudinal + params.effective_diffusion_coefficient,
            epsilon = 1e-15
        );
    }

    #[test]
    fn cell_velocity_works() {
        // unit gradient of total head downwards: h = 0, z varies → v = -K e_z
        let mesh = Mesh::new_hyper_cube(2, 1.0, 1).unwrap();
        let mut fields = NodalFields::new(mesh.n_nodes());
        fields.new.conductivity.fill(0.5);
        let mut cv = CellValues::new(2, Quadrature::Gauss2);
        cv.reinit(mesh.cell_side(0));
        let v = cell_velocity(&mesh, 0, &cv, &fields.new);
        assert_relative_eq!(v[0], 0.0, epsilon = 1e-14);
        assert_relative_eq!(v[1], -0.5, epsilon = 1e-14);
    }

    #[test]
    fn stabilization_handles_negligible_velocities() {
        let s = settings();
        let st = stabilization(&s, 0, 1.0, [0.0, 1e-8], [0.0, -1.0]).unwrap();
        assert_eq!(st.velocity_new, [0.0; 2]);
        assert_eq!(st.velocity_old, [0.0; 2]);
        assert_eq!(st.tau, 0.0);

        let st = stabilization(&s, 0, 1.0, [-1e-3, 0.0], [0.0, 0.0]).unwrap();
        assert_eq!(st.velocity_old, [-1e-3, 0.0]);
        assert!(st.tau > 0.0);
    }

    #[test]
    fn stabilization_matches_closed_form() {
        let mut s = settings();
        s.dispersivity = 0.0;
        s.diffusion = 1e-3;
        let (h, v) = (2.0, 1e-2);
        let st = stabilization(&s, 0, h, [v, 0.0], [v, 0.0]).unwrap();
        let pe: f64 = 0.5 * h * v / 1e-3;
        assert_relative_eq!(st.peclet, pe, epsilon = 1e-14);
        let beta = 1.0 / f64::tanh(pe) - 1.0 / pe;
        assert_relative_eq!(st.tau, 0.5 * beta * h / v, epsilon = 1e-12);
    }

    #[test]
    fn stabilization_captures_degeneracy() {
        let s = settings();
        assert_eq!(
            stabilization(&s, 3, 1.0, [f64::NAN, 0.0], [0.0, 0.0]).err(),
            Some(SimError::NumericalDegeneracy {
                cell: 3,
                what: "the Darcy velocity is not finite".to_string()
            })
        );
        // an unbounded cell yields an infinite Peclet number
        let res = stabilization(&s, 1, f64::INFINITY, [1.0, 0.0], [1.0, 0.0]);
        assert!(matches!(res, Err(SimError::NumericalDegeneracy { cell: 1, .. })));
    }

    #[test]
    fn pure_diffusion_keeps_uniform_concentration() {
        // no flow, no inflow: a uniform substrate field is a steady solution
        let mut params = Parameters::sample();
        params.transport_mass_entry_point = crate::base::EntryPoint::Bottom;
        params.refinement_level = 3;
        let mesh = Mesh::new_hyper_cube(1, params.domain_size, 3).unwrap();
        let hn = HangingNodes::new(&mesh);
        let pattern = Rc::new(SparsityPattern::new(&mesh, &hn));
        let mut transport = TransportSystem::new(TransportSettings::from_parameters(&params), pattern);
        let kinetics = BiomassKinetics::from_parameters(&params);
        let mut fields = NodalFields::new(mesh.n_nodes());
        // hydrostatic: h + z constant → zero velocity
        for n in 0..mesh.n_nodes() {
            fields.new.pressure[n] = -10.0 - mesh.node_elevation(n);
        }
        fields.new.conductivity.fill(1e-3);
        fields.new.moisture_free.fill(0.3);
        fields.new.substrate.fill(0.05);
        fields.commit();
        transport.assemble(&mesh, &fields, &kinetics, 10.0).unwrap();
        assert_relative_eq!(transport.nutrients_in_domain, 0.3 * 0.05 * params.domain_size, epsilon = 1e-12);
        assert_relative_eq!(transport.nutrient_flow_at_top, 0.0, epsilon = 1e-14);
        let mut config = Config::new();
        config.linsol_tol = 1e-12;
        transport.solve(&mesh, &hn, &mut fields, &config).unwrap();
        for n in 0..mesh.n_nodes() {
            assert_relative_eq!(fields.new.substrate[n], 0.05, max_relative = 1e-8);
        }
    }

    #[test]
    fn fixed_top_concentration_diffuses_downwards() {
        let mut params = Parameters::sample();
        params.transport_fixed_at_top = true;
        params.transport_top_fixed_value = 50.0; // mg/L
        params.theta_transport = 1.0;
        params.effective_diffusion_coefficient = 1.0;
        let mesh = Mesh::new_hyper_cube(1, params.domain_size, 3).unwrap();
        let hn = HangingNodes::new(&mesh);
        let pattern = Rc::new(SparsityPattern::new(&mesh, &hn));
        let mut transport = TransportSystem::new(TransportSettings::from_parameters(&params), pattern);
        let prescribed = transport.prescribed_values(&mesh, &hn);
        assert_eq!(prescribed.len(), 1);
        assert_eq!(prescribed[0].0, 8);
        assert_relative_eq!(prescribed[0].1, 0.05, epsilon = 1e-15);

        let kinetics = BiomassKinetics::from_parameters(&params);
        let mut fields = NodalFields::new(mesh.n_nodes());
        for n in 0..mesh.n_nodes() {
            fields.new.pressure[n] = -10.0 - mesh.node_elevation(n);
        }
        fields.new.conductivity.fill(1e-3);
        fields.new.moisture_free.fill(0.3);
        fields.commit();
        transport.assemble(&mesh, &fields, &kinetics, 10.0).unwrap();
        let mut config = Config::new();
        config.linsol_tol = 1e-12;
        transport.solve(&mesh, &hn, &mut fields, &config).unwrap();
        let c = &fields.new.substrate;
        assert_relative_eq!(c[8], 0.05, epsilon = 1e-12);
        for n in 0..8 {
            assert!(c[n] > 0.0 && c[n] < 0.05);
        }
        assert!(c[7] > c[0]);

        // without the fixed value nothing is prescribed
        params.transport_fixed_at_top = false;
        let pattern = Rc::new(SparsityPattern::new(&mesh, &hn));
        let transport = TransportSystem::new(TransportSettings::from_parameters(&params), pattern);
        assert!(transport.prescribed_values(&mesh, &hn).is_empty());
    }
}
