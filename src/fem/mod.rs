//! Implements the finite element method for the coupled flow and transport problem

mod accounting;
mod adaptation;
mod constraints;
mod control_convergence;
mod control_time;
mod file_io;
mod flow;
pub mod krylov;
mod mesh;
mod nodal_fields;
mod phase;
pub mod shape;
mod simulation;
mod sparse;
mod transport;
pub use crate::fem::accounting::*;
pub use crate::fem::adaptation::*;
pub use crate::fem::constraints::*;
pub use crate::fem::control_convergence::*;
pub use crate::fem::control_time::*;
pub use crate::fem::file_io::*;
pub use crate::fem::flow::*;
pub use crate::fem::mesh::*;
pub use crate::fem::nodal_fields::*;
pub use crate::fem::phase::*;
pub use crate::fem::simulation::*;
pub use crate::fem::sparse::*;
pub use crate::fem::transport::*;
