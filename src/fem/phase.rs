use crate::base::{Config, Phase};
use std::fmt;

/// Holds the quantities observed by the phase machine after each committed step
#[derive(Clone, Copy, Debug, Default)]
pub struct Indicators {
    /// Pressure head sampled at the top of the column
    pub top_pressure: f64,

    /// Outward water flow through the top boundary
    pub flow_at_top: f64,

    /// Outward water flow through the bottom boundary
    pub flow_at_bottom: f64,
}

/// Describes a phase transition
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,

    /// Time at which the transition happened
    pub time: f64,

    /// Time spent in the phase that has just ended
    pub duration: f64,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} → {} at t = {:.3} ({:.3} h in {})",
            self.from,
            self.to,
            self.time,
            self.duration / 3600.0,
            self.from
        )
    }
}

/// Implements the one-directional state machine drying → saturation → transport
///
/// * drying → saturation when the top pressure reaches the hydrostatic equilibrium
///   `h_bottom - L` within `tol_drying` (relative)
/// * saturation → transport (coupled runs only) when the top and bottom water flows balance
///   within `tol_saturation_relative` or their sum is below `tol_saturation_absolute`
///
/// Each transition resets the milestone time and the output counter.
pub struct PhaseMachine<'a> {
    config: &'a Config,
    phase: Phase,
    coupled: bool,
    equilibrium_top_pressure: f64,

    /// Time at which the current phase began
    pub milestone_time: f64,

    /// Number of outputs written in the current phase
    pub figure_count: usize,

    /// Time spent drying (set at the transition)
    pub time_for_dry: f64,

    /// Time spent saturating (set at the transition)
    pub time_for_saturated: f64,
}

impl<'a> PhaseMachine<'a> {
    /// Allocates a new instance
    ///
    /// # Input
    ///
    /// * `start` -- the initial phase
    /// * `coupled` -- whether transport (and biomass growth) follows the saturation
    /// * `equilibrium_top_pressure` -- the hydrostatic top pressure `h_bottom - L`
    pub fn new(config: &'a Config, start: Phase, coupled: bool, equilibrium_top_pressure: f64) -> Self {
        PhaseMachine {
            config,
            phase: start,
            coupled,
            equilibrium_top_pressure,
            milestone_time: 0.0,
            figure_count: 0,
            time_for_dry: 0.0,
            time_for_saturated: 0.0,
        }
    }

    /// Returns the current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the relative deviation of the top pressure from the equilibrium value
    pub fn drying_error(&self, top_pressure: f64) -> f64 {
        if self.equilibrium_top_pressure == 0.0 {
            f64::abs(top_pressure)
        } else {
            f64::abs(1.0 - top_pressure / self.equilibrium_top_pressure)
        }
    }

    /// Returns the relative and absolute imbalance of the top and bottom water flows
    pub fn saturation_error(flow_at_top: f64, flow_at_bottom: f64) -> (f64, f64) {
        let relative = if flow_at_bottom == 0.0 {
            if flow_at_top == 0.0 {
                0.0
            } else {
                f64::INFINITY
            }
        } else {
            f64::abs(1.0 - f64::abs(flow_at_top / flow_at_bottom))
        };
        (relative, f64::abs(flow_at_top + flow_at_bottom))
    }

    /// Checks the transition criteria after a committed step
    ///
    /// At most one transition happens per step.
    pub fn update(&mut self, time: f64, indicators: &Indicators) -> Option<Transition> {
        let next = match self.phase {
            Phase::Drying => {
                if self.drying_error(indicators.top_pressure) < self.config.tol_drying {
                    Some(Phase::Saturation)
                } else {
                    None
                }
            }
            Phase::Saturation => {
                let (relative, absolute) = Self::saturation_error(indicators.flow_at_top, indicators.flow_at_bottom);
                if self.coupled
                    && (relative < self.config.tol_saturation_relative
                        || absolute < self.config.tol_saturation_absolute)
                {
                    Some(Phase::Transport)
                } else {
                    None
                }
            }
            Phase::Transport => None,
        };
        let to = next?;
        let duration = time - self.milestone_time;
        match self.phase {
            Phase::Drying => self.time_for_dry = duration,
            Phase::Saturation => self.time_for_saturated = duration,
            Phase::Transport => (),
        }
        let transition = Transition {
            from: self.phase,
            to,
            time,
            duration,
        };
        self.phase = to;
        self.milestone_time = time;
        self.figure_count = 0;
        Some(transition)
    }

    /// Returns the output period of the current phase (zero disables periodic output)
    pub fn output_period(&self, output_frequency_transport: f64) -> f64 {
        match self.phase {
            Phase::Drying => self.config.output_period_drying,
            Phase::Saturation => self.config.output_period_saturation,
            Phase::Transport => output_frequency_transport,
        }
    }

    /// Checks whether a periodic output is due
    pub fn output_due(&self, time: f64, period: f64) -> bool {
        period > 0.0 && time - self.milestone_time >= (self.figure_count as f64) * period
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
