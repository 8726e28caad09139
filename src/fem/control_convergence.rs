use crate::base::Config;
use nalgebra::DVector;

/// Controls the convergence of the Picard iterations coupling flow and transport
///
/// The flow error is the relative change of the squared pressure norm and the transport
/// error is the percentage change of the squared substrate norm, both measured between
/// consecutive iterates:
///
/// ```text
/// err_flow      = |1 - ‖h‖² / ‖h_prev‖²|
/// err_transport = 100 |1 - ‖c‖² / ‖c_prev‖²|
/// ```
///
/// The previous transport norm starts at zero on each time step, so the first transport
/// error is 100 %.
///
/// A stall recovery restarts the iteration index but not the number of passes of the step.
pub struct ControlConvergence<'a> {
    config: &'a Config,
    iteration: usize,
    n_iterations: usize,
    norm_flow_prev: f64,
    norm_transport_prev: f64,
    err_flow: f64,
    err_transport: Option<f64>,
    n_stall_recoveries: usize,
}

impl<'a> ControlConvergence<'a> {
    /// Allocates a new instance
    pub fn new(config: &'a Config) -> Self {
        ControlConvergence {
            config,
            iteration: 0,
            n_iterations: 0,
            norm_flow_prev: 0.0,
            norm_transport_prev: 0.0,
            err_flow: f64::MAX,
            err_transport: None,
            n_stall_recoveries: 0,
        }
    }

    /// Prepares for a new time step
    ///
    /// The previous flow norm is taken from the pressure at the start of the step.
    pub fn initialize(&mut self, pressure: &DVector<f64>) {
        self.iteration = 0;
        self.n_iterations = 0;
        self.norm_flow_prev = pressure.norm_squared();
        self.norm_transport_prev = 0.0;
        self.err_flow = f64::MAX;
        self.err_transport = None;
        self.n_stall_recoveries = 0;
    }

    /// Restarts the iteration count after a time step reduction
    pub fn restart(&mut self) {
        self.iteration = 0;
        self.err_flow = f64::MAX;
        self.err_transport = None;
        self.n_stall_recoveries += 1;
    }

    /// Returns the iteration index since the last (re)start
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Returns the number of passes in this step, including those before any restart
    pub fn n_iterations(&self) -> usize {
        self.n_iterations
    }

    /// Returns the number of time step reductions in this step
    pub fn n_stall_recoveries(&self) -> usize {
        self.n_stall_recoveries
    }

    /// Returns the last flow error
    pub fn err_flow(&self) -> f64 {
        self.err_flow
    }

    /// Returns the last transport error (None if transport is inactive)
    pub fn err_transport(&self) -> Option<f64> {
        self.err_transport
    }

    /// Records the flow iterate
    pub fn analyze_flow(&mut self, pressure: &DVector<f64>) {
        let norm = pressure.norm_squared();
        self.err_flow = relative_change(self.norm_flow_prev, norm);
        self.norm_flow_prev = norm;
    }

    /// Records the transport iterate
    pub fn analyze_transport(&mut self, substrate: &DVector<f64>) {
        let norm = substrate.norm_squared();
        self.err_transport = Some(100.0 * relative_change(self.norm_transport_prev, norm));
        self.norm_transport_prev = norm;
    }

    /// Checks whether the iterations have converged and advances the iteration counter
    ///
    /// At least one iteration must have been performed.
    pub fn converged(&mut self) -> bool {
        let ok_flow = self.err_flow < self.config.tol_flow;
        let ok_transport = self.err_transport.map_or(true, |e| e <= self.config.tol_transport);
        let done = ok_flow && ok_transport && self.iteration != 0;
        self.config.print_iteration(self.iteration, self.err_flow, self.err_transport);
        self.iteration += 1;
        self.n_iterations += 1;
        done
    }

    /// Checks whether the transport iterations have stalled
    pub fn stalled(&self) -> bool {
        self.iteration >= self.config.n_stall_iterations
    }

    /// Checks whether the recovery budget is exhausted
    pub fn too_many_recoveries(&self) -> bool {
        self.n_stall_recoveries >= self.config.n_max_stall_recoveries
    }
}

/// Returns |1 - new/prev|, with a zero previous value yielding 1 (or 0 if both are zero)
fn relative_change(prev: f64, new: f64) -> f64 {
    if prev == 0.0 {
        if new == 0.0 {
            0.0
        } else {
            1.0
        }
    } else {
        f64::abs(1.0 - new / prev)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{relative_change, ControlConvergence};
    use crate::base::Config;
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    #[test]
    fn relative_change_works() {
        assert_eq!(relative_change(0.0, 0.0), 0.0);
        assert_eq!(relative_change(0.0, 2.0), 1.0);
        assert_eq!(relative_change(4.0, 2.0), 0.5);
        assert_eq!(relative_change(2.0, 4.0), 1.0);
    }

    #[test]
    fn first_transport_error_is_one_hundred_percent() {
        let config = Config::new();
        let mut control = ControlConvergence::new(&config);
        let h = DVector::from_vec(vec![-10.0, -5.0]);
        let c = DVector::from_vec(vec![0.05, 0.01]);
        control.initialize(&h);
        control.analyze_flow(&h);
        control.analyze_transport(&c);
        assert_eq!(control.err_flow(), 0.0);
        assert_eq!(control.err_transport(), Some(100.0));
        // never converged at the first iteration
        assert!(!control.converged());
        control.analyze_flow(&h);
        control.analyze_transport(&c);
        assert_eq!(control.err_transport(), Some(0.0));
        assert!(control.converged());
        assert_eq!(control.iteration(), 2);
    }

    #[test]
    fn flow_only_iterations_converge() {
        let config = Config::new();
        let mut control = ControlConvergence::new(&config);
        let h0 = DVector::from_vec(vec![2.0, 0.0]);
        control.initialize(&h0);
        control.analyze_flow(&DVector::from_vec(vec![1.0, 1.0]));
        assert_relative_eq!(control.err_flow(), 0.5, epsilon = 1e-15);
        assert!(!control.converged());
        control.analyze_flow(&DVector::from_vec(vec![1.0, 1.0]));
        assert!(control.err_transport().is_none());
        assert!(control.converged());
    }

    #[test]
    fn stall_bookkeeping_works() {
        let mut config = Config::new();
        config.n_stall_iterations = 2;
        config.n_max_stall_recoveries = 1;
        let mut control = ControlConvergence::new(&config);
        control.initialize(&DVector::from_vec(vec![1.0]));
        let c = DVector::from_vec(vec![1.0]);
        for k in 1..4 {
            control.analyze_flow(&DVector::from_vec(vec![k as f64]));
            control.analyze_transport(&DVector::from_vec(vec![k as f64]));
            assert!(!control.converged());
        }
        assert!(control.stalled());
        assert!(!control.too_many_recoveries());
        control.restart();
        assert_eq!(control.iteration(), 0);
        assert!(!control.stalled());
        assert!(control.too_many_recoveries());
        control.analyze_transport(&c);
        assert_eq!(control.n_stall_recoveries(), 1);
    }

    #[test]
    fn restart_keeps_the_number_of_passes() {
        let mut config = Config::new();
        config.n_stall_iterations = 2;
        let mut control = ControlConvergence::new(&config);
        let h = DVector::from_vec(vec![1.0]);
        control.initialize(&h);
        for k in 1..3 {
            control.analyze_flow(&h);
            control.analyze_transport(&DVector::from_vec(vec![k as f64]));
            assert!(!control.converged());
        }
        assert!(control.stalled());
        control.restart();
        control.analyze_flow(&h);
        control.analyze_transport(&DVector::from_vec(vec![2.0]));
        assert!(!control.converged()); // first pass after a restart
        control.analyze_flow(&h);
        control.analyze_transport(&DVector::from_vec(vec![2.0]));
        assert!(control.converged());
        assert_eq!(control.iteration(), 2);
        assert_eq!(control.n_iterations(), 4);

        // a new step starts counting again
        control.initialize(&h);
        assert_eq!(control.n_iterations(), 0);
    }
}
