//! Makes available common structures needed to run a simulation
//!
//! You may write `use bioclog::prelude::*` in your code and obtain
//! access to commonly used functionality.

pub use crate::base::{Config, InitialState, Parameters, Phase, SimError, DEFAULT_OUT_DIR, DEFAULT_TEST_DIR};
pub use crate::fem::{Mesh, NodalFields, PhaseMachine, Simulation};
pub use crate::material::{BiomassKinetics, HydraulicProperties};
