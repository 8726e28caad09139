use super::{Phase, SimError};

/// Holds the numerical policy of the simulation (tolerances, step-size bounds, adaptivity, solvers)
///
/// The default values reproduce the published bioclogging runs.
#[derive(Clone, Debug)]
pub struct Config {
    /// Tolerance on |1 - ‖h‖²/‖h_prev‖²| of the flow iterate
    pub tol_flow: f64,

    /// Tolerance (in percent) on the relative change of ‖c‖² of the transport iterate
    pub tol_transport: f64,

    /// Number of Picard iterations in the transport regime that triggers halving Δt
    pub n_stall_iterations: usize,

    /// Maximum number of Δt halvings within one time step
    pub n_max_stall_recoveries: usize,

    /// Maximum number of Picard iterations outside the transport regime
    pub n_max_iterations: usize,

    /// Δt is doubled if the Picard loop takes fewer iterations than this
    pub n_fast_convergence: usize,

    /// Tolerance on |1 - h_top/(h_bottom - L)| ending the drying regime
    pub tol_drying: f64,

    /// Tolerance on |1 - |q_top/q_bottom|| ending the saturation regime
    pub tol_saturation_relative: f64,

    /// Tolerance on |q_top + q_bottom| ending the saturation regime
    pub tol_saturation_absolute: f64,

    /// Minimum Δt
    pub dt_min: f64,

    /// Maximum Δt while drying
    pub dt_max_drying: f64,

    /// Maximum Δt while saturating
    pub dt_max_saturation: f64,

    /// Maximum Δt while transporting
    pub dt_max_transport: f64,

    /// Output period while drying
    pub output_period_drying: f64,

    /// Output period while saturating
    pub output_period_saturation: f64,

    /// Enables the adaptive refinement and coarsening of the mesh
    pub adaptive_mesh: bool,

    /// Fraction of the total estimated error carried by the cells to be refined
    pub refine_fraction: f64,

    /// Fraction of the total estimated error carried by the cells to be coarsened
    pub coarsen_fraction: f64,

    /// Maximum number of active cells
    pub max_n_cells: usize,

    /// Relative tolerance of the Krylov solvers (times ‖b‖)
    pub linsol_tol: f64,

    /// The Krylov iteration cap equals this factor times the system size
    pub linsol_max_iter_factor: usize,

    /// Relaxation of the SSOR preconditioner (flow)
    pub ssor_omega: f64,

    /// Relaxation of the Jacobi preconditioner (transport)
    pub jacobi_omega: f64,

    /// Verbose mode during timesteps
    pub verbose_timesteps: bool,

    /// Verbose mode during iterations
    pub verbose_iterations: bool,
}

impl Config {
    /// Allocates a new instance with default values
    pub fn new() -> Self {
        Config {
            tol_flow: 1e-8,
            tol_transport: 1e-3,
            n_stall_iterations: 40,
            n_max_stall_recoveries: 30,
            n_max_iterations: 500,
            n_fast_convergence: 15,
            tol_drying: 3.1e-4,
            tol_saturation_relative: 2e-2,
            tol_saturation_absolute: 3e-6,
            dt_min: 1.0,
            dt_max_drying: 1.0,
            dt_max_saturation: 1.0,
            dt_max_transport: 60.0,
            output_period_drying: 1.0,
            output_period_saturation: 1.0,
            adaptive_mesh: true,
            refine_fraction: 0.49,
            coarsen_fraction: 0.50,
            max_n_cells: 20_000,
            linsol_tol: 1e-8,
            linsol_max_iter_factor: 1000,
            ssor_omega: 1.2,
            jacobi_omega: 1.0,
            verbose_timesteps: false,
            verbose_iterations: false,
        }
    }

    /// Sets the flow and transport tolerances of the Picard loop
    pub fn set_tolerances(&mut self, tol_flow: f64, tol_transport: f64) -> &mut Self {
        self.tol_flow = tol_flow;
        self.tol_transport = tol_transport;
        self
    }

    /// Enables or disables mesh adaptivity
    pub fn set_adaptive_mesh(&mut self, flag: bool) -> &mut Self {
        self.adaptive_mesh = flag;
        self
    }

    /// Sets the verbose flags
    pub fn set_verbose(&mut self, timesteps: bool, iterations: bool) -> &mut Self {
        self.verbose_timesteps = timesteps;
        self.verbose_iterations = iterations;
        self
    }

    /// Sets the step-size bounds
    pub fn set_dt_bounds(
        &mut self,
        dt_min: f64,
        dt_max_drying: f64,
        dt_max_saturation: f64,
        dt_max_transport: f64,
    ) -> &mut Self {
        self.dt_min = dt_min;
        self.dt_max_drying = dt_max_drying;
        self.dt_max_saturation = dt_max_saturation;
        self.dt_max_transport = dt_max_transport;
        self
    }

    /// Returns the largest allowed Δt in a regime
    pub fn dt_max(&self, phase: Phase) -> f64 {
        match phase {
            Phase::Drying => self.dt_max_drying,
            Phase::Saturation => self.dt_max_saturation,
            Phase::Transport => self.dt_max_transport,
        }
    }

    /// Validates all data
    ///
    /// Returns a message with the inconsistent data, or returns None if everything is all right.
    pub fn validate(&self) -> Option<String> {
        if self.tol_flow <= 0.0 {
            return Some(format!("tol_flow = {:?} is incorrect; it must be > 0.0", self.tol_flow));
        }
        if self.tol_transport < 0.0 {
            return Some(format!(
                "tol_transport = {:?} is incorrect; it must be ≥ 0.0",
                self.tol_transport
            ));
        }
        if self.n_stall_iterations < 1 {
            return Some(format!(
                "n_stall_iterations = {:?} is incorrect; it must be ≥ 1",
                self.n_stall_iterations
            ));
        }
        if self.n_max_iterations < 2 {
            return Some(format!(
                "n_max_iterations = {:?} is incorrect; it must be ≥ 2",
                self.n_max_iterations
            ));
        }
        if self.dt_min <= 0.0 {
            return Some(format!("dt_min = {:?} is incorrect; it must be > 0.0", self.dt_min));
        }
        for (name, value) in [
            ("dt_max_drying", self.dt_max_drying),
            ("dt_max_saturation", self.dt_max_saturation),
            ("dt_max_transport", self.dt_max_transport),
        ] {
            if value < self.dt_min {
                return Some(format!("{} = {:?} is incorrect; it must be ≥ dt_min", name, value));
            }
        }
        if self.refine_fraction < 0.0
            || self.coarsen_fraction < 0.0
            || self.refine_fraction + self.coarsen_fraction > 1.0
        {
            return Some(format!(
                "refine_fraction = {:?} and coarsen_fraction = {:?} are incorrect; \
                 they must be ≥ 0.0 with sum ≤ 1.0",
                self.refine_fraction, self.coarsen_fraction
            ));
        }
        if self.max_n_cells < 1 {
            return Some("max_n_cells must be ≥ 1".to_string());
        }
        if self.linsol_tol <= 0.0 || self.linsol_max_iter_factor < 1 {
            return Some("linear solver tolerance and iteration factor must be positive".to_string());
        }
        if self.ssor_omega <= 0.0 || self.ssor_omega >= 2.0 {
            return Some(format!(
                "ssor_omega = {:?} is incorrect; it must be 0.0 < ω < 2.0",
                self.ssor_omega
            ));
        }
        if self.jacobi_omega <= 0.0 {
            return Some(format!(
                "jacobi_omega = {:?} is incorrect; it must be > 0.0",
                self.jacobi_omega
            ));
        }
        None // all good
    }

    /// Returns the validation message as an error
    pub fn check(&self) -> Result<(), SimError> {
        match self.validate() {
            Some(msg) => Err(SimError::Configuration(msg)),
            None => Ok(()),
        }
    }

    /// Prints the header of the table with timestep and iteration data
    #[inline]
    pub fn print_header(&self) {
        if self.verbose_timesteps || self.verbose_iterations {
            println!(
                "{:>8} {:>13} {:>10} {:>12} {:>5} {:>10} {:>10} {:>7}",
                "timestep", "t", "Δt", "phase", "iter", "err_flow", "err_trans", "ncell"
            );
        }
    }

    /// Prints timestep data
    #[inline]
    #[rustfmt::skip]
    pub fn print_timestep(&self, timestep: usize, t: f64, dt: f64, phase: Phase, ncell: usize) {
        if !self.verbose_timesteps {
            return;
        }
        println!(
            "{:>8} {:>13.6e} {:>10.3e} {:>12} {:>5} {:>10} {:>10} {:>7}",
            timestep, t, dt, phase.period(), ".", ".", ".", ncell
        );
    }

    /// Prints iteration data
    #[inline]
    pub fn print_iteration(&self, it: usize, err_flow: f64, err_transport: Option<f64>) {
        if !self.verbose_iterations {
            return;
        }
        let mark = if !err_flow.is_finite() {
            "😱"
        } else if err_flow < self.tol_flow && err_transport.map_or(true, |e| e <= self.tol_transport) {
            "✅"
        } else {
            "  "
        };
        let trans = match err_transport {
            Some(e) => format!("{:>10.2e}", e),
            None => format!("{:>10}", "."),
        };
        println!(
            "{:>8} {:>13} {:>10} {:>12} {:>5} {:>10.2e} {}{} {:>7}",
            ".", ".", ".", ".", it + 1, err_flow, trans, mark, "."
        );
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::Config;
    use crate::base::Phase;

    #[test]
    fn new_works() {
        let config = Config::new();
        assert_eq!(config.tol_flow, 1e-8);
        assert_eq!(config.tol_transport, 1e-3);
        assert_eq!(config.n_stall_iterations, 40);
        assert_eq!(config.n_fast_convergence, 15);
        assert_eq!(config.tol_drying, 3.1e-4);
        assert_eq!(config.tol_saturation_relative, 2e-2);
        assert_eq!(config.tol_saturation_absolute, 3e-6);
        assert_eq!(config.refine_fraction, 0.49);
        assert_eq!(config.coarsen_fraction, 0.50);
        assert_eq!(config.max_n_cells, 20_000);
        assert_eq!(config.ssor_omega, 1.2);
        assert_eq!(config.dt_max(Phase::Drying), 1.0);
        assert_eq!(config.dt_max(Phase::Saturation), 1.0);
        assert_eq!(config.dt_max(Phase::Transport), 60.0);
        assert_eq!(config.validate(), None);
    }

    #[test]
    fn setters_work() {
        let mut config = Config::new();
        config
            .set_tolerances(1e-6, 1e-2)
            .set_adaptive_mesh(false)
            .set_verbose(true, false)
            .set_dt_bounds(0.5, 1.0, 2.0, 30.0);
        assert_eq!(config.tol_flow, 1e-6);
        assert_eq!(config.tol_transport, 1e-2);
        assert_eq!(config.adaptive_mesh, false);
        assert_eq!(config.verbose_timesteps, true);
        assert_eq!(config.dt_max(Phase::Saturation), 2.0);
        assert_eq!(config.validate(), None);
    }

    #[test]
    fn validate_captures_errors() {
        let mut config = Config::new();
        config.tol_flow = 0.0;
        assert_eq!(
            config.validate(),
            Some("tol_flow = 0.0 is incorrect; it must be > 0.0".to_string())
        );
        config.tol_flow = 1e-8;

        config.dt_max_transport = 0.5;
        assert_eq!(
            config.validate(),
            Some("dt_max_transport = 0.5 is incorrect; it must be ≥ dt_min".to_string())
        );
        config.dt_max_transport = 60.0;

        config.ssor_omega = 2.0;
        assert_eq!(
            config.validate(),
            Some("ssor_omega = 2.0 is incorrect; it must be 0.0 < ω < 2.0".to_string())
        );
        config.ssor_omega = 1.2;

        config.refine_fraction = 0.7;
        assert!(config.validate().is_some());
    }
}
