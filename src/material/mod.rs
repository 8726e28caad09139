//! Implements the constitutive models: hydraulic properties and biomass kinetics

mod biomass;
mod hydraulic_properties;
pub use crate::material::biomass::*;
pub use crate::material::hydraulic_properties::*;
