//! Implements the base structures: constants, errors, enums, parameters, and numerical configuration

mod config;
mod constants;
mod enums;
mod error;
mod parameters;
pub use crate::base::config::*;
pub use crate::base::constants::*;
pub use crate::base::enums::*;
pub use crate::base::error::*;
pub use crate::base::parameters::*;
