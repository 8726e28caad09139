use crate::base::{Config, Phase};

/// Assists in the time loop control
///
/// The step size is adapted once per committed step:
///
/// 1. if a phase transition just occurred, Δt is reset to its minimum;
/// 2. otherwise, if the Picard loop needed fewer than `n_fast_convergence` iterations, Δt is doubled;
/// 3. finally, Δt is clamped to `[dt_min, dt_max(phase)]`.
pub struct ControlTime<'a> {
    config: &'a Config,

    /// Current time
    pub t: f64,

    /// Current time step size
    pub dt: f64,
}

impl<'a> ControlTime<'a> {
    /// Allocates a new instance
    pub fn new(config: &'a Config, dt: f64) -> Self {
        ControlTime { config, t: 0.0, dt }
    }

    /// Halves the time step (stall recovery within a step)
    pub fn halve(&mut self) {
        self.dt /= 2.0;
    }

    /// Advances the time by the current step size
    pub fn advance(&mut self) {
        self.t += self.dt;
    }

    /// Updates the step size after a committed step
    ///
    /// # Input
    ///
    /// * `phase` -- the phase after any transition
    /// * `n_iterations` -- the number of Picard iterations of the last step
    /// * `transitioned` -- whether a phase transition just occurred
    pub fn adapt(&mut self, phase: Phase, n_iterations: usize, transitioned: bool) {
        if transitioned {
            self.dt = self.config.dt_min;
        } else if n_iterations < self.config.n_fast_convergence {
            self.dt *= 2.0;
        }
        self.dt = f64::min(f64::max(self.dt, self.config.dt_min), self.config.dt_max(phase));
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
