use crate::base::{Parameters, SinkTerm, MG_PER_LITER_TO_MG_PER_CM3};

/// Implements the growth kinetics of the biomass and the substrate consumption
///
/// The biomass grows with Monod kinetics limited by the free-water saturation and decays
/// with a first-order rate:
///
/// ```text
///              Y μ Sef S
/// r = ───────────────────── - kd
///        Sef S + Ks
///
/// B(t+Δt) = B(t) exp(r Δt)
/// ```
#[derive(Clone, Debug)]
pub struct BiomassKinetics {
    /// Yield coefficient Y
    pub yield_coefficient: f64,

    /// Maximum substrate use rate μ
    pub max_substrate_use_rate: f64,

    /// Half-velocity constant Ks (mg/cm³)
    pub half_velocity_constant: f64,

    /// Decay rate kd
    pub decay_rate: f64,

    /// Dry density ρ of the biomass
    pub dry_density: f64,

    /// Reaction term of the transport equation
    pub sink_term: SinkTerm,

    /// First-order decay factor of the substrate
    pub first_order_decay_factor: f64,

    /// Porosity
    pub porosity: f64,
}

impl BiomassKinetics {
    /// Allocates a new instance from the simulation parameters
    ///
    /// **Note:** The half-velocity constant is given in mg/L and converted to mg/cm³ here.
    pub fn from_parameters(params: &Parameters) -> Self {
        BiomassKinetics {
            yield_coefficient: params.yield_coefficient,
            max_substrate_use_rate: params.maximum_substrate_use_rate,
            half_velocity_constant: params.half_velocity_constant * MG_PER_LITER_TO_MG_PER_CM3,
            decay_rate: params.decay_rate,
            dry_density: params.biomass_dry_density,
            sink_term: params.sink_term,
            first_order_decay_factor: params.first_order_decay_factor,
            porosity: params.porosity,
        }
    }

    /// Returns the net specific growth rate
    ///
    /// # Input
    ///
    /// * `free_saturation` -- the effective free-water saturation Sef
    /// * `substrate` -- the substrate concentration (negative values are taken as zero)
    pub fn growth_rate(&self, free_saturation: f64, substrate: f64) -> f64 {
        let s = f64::max(substrate, 0.0);
        let available = free_saturation * s;
        let monod = if available > 0.0 {
            available / (available + self.half_velocity_constant)
        } else {
            0.0
        };
        self.yield_coefficient * self.max_substrate_use_rate * monod - self.decay_rate
    }

    /// Advances the biomass concentration explicitly over a time step
    pub fn advance(&self, biomass_old: f64, free_saturation: f64, substrate_old: f64, dt: f64) -> f64 {
        biomass_old * f64::exp(self.growth_rate(free_saturation, substrate_old) * dt)
    }

    /// Returns the biomass volume fraction B/ρ
    pub fn volume_fraction(&self, biomass: f64) -> f64 {
        biomass / self.dry_density
    }

    /// Returns the reaction coefficient r of the transport equation (the term -r c enters the operator)
    ///
    /// A negative coefficient removes substrate.
    pub fn sink_coefficient(&self, biomass: f64, substrate_old: f64) -> f64 {
        match self.sink_term {
            SinkTerm::Off => 0.0,
            SinkTerm::FirstOrder => -self.first_order_decay_factor,
            SinkTerm::Monod => {
                let s = f64::max(substrate_old, 0.0);
                -self.porosity * biomass * self.max_substrate_use_rate / (s + self.half_velocity_constant)
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
