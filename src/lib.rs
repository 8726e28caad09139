//! Bioclog simulates the clogging of porous media by biomass growth
//!
//! The unsaturated water flow (Richards equation) is coupled with the transport of a
//! substrate (advection-dispersion-reaction equation) and with the Monod growth of the
//! biomass that reduces the hydraulic conductivity. A run goes through three phases:
//! drying, saturation, and transport.

/// Defines a type alias for the error type as a static string
pub type StrError = &'static str;

pub mod base;
pub mod fem;
pub mod material;
pub mod prelude;
