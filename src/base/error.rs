use crate::StrError;
use thiserror::Error;

/// Defines the kinds of failure that terminate (or locally disturb) a simulation
#[derive(Error, Clone, Debug, PartialEq)]
pub enum SimError {
    /// The configured hydraulic family does not support the requested function
    #[error("hydraulic properties model \"{0}\" is not implemented for this function")]
    UnsupportedModel(String),

    /// The relative permeability model name is unknown
    #[error("relative permeability model \"{0}\" is not implemented")]
    UnsupportedPermeabilityModel(String),

    /// Inconsistent or out-of-range input
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Non-finite or negative velocity, Peclet number, or stabilization parameter
    #[error("numerical degeneracy at cell {cell}: {what}")]
    NumericalDegeneracy { cell: usize, what: String },

    /// The Picard loop did not converge even after reducing the time step
    #[error("Picard iterations stalled after {n_recovery} time step reductions (Δt = {dt})")]
    ConvergenceStall { n_recovery: usize, dt: f64 },

    /// A checkpoint file is absent or does not match the mesh
    #[error("checkpoint \"{0}\" is missing or not fully consumed")]
    MissingCheckpoint(String),

    /// The Krylov solver reached its iteration cap
    #[error("linear solver failed: {0}")]
    LinearSolver(String),

    /// A lower-level service reported an error
    #[error("{0}")]
    Service(StrError),

    /// Reading or writing a file failed
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<StrError> for SimError {
    fn from(err: StrError) -> Self {
        SimError::Service(err)
    }
}

impl From<std::io::Error> for SimError {
    fn from(err: std::io::Error) -> Self {
        SimError::Io(err.to_string())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::SimError;
    use crate::StrError;

    fn failing_service() -> Result<(), StrError> {
        Err("cannot locate point")
    }

    fn caller() -> Result<(), SimError> {
        failing_service()?;
        Ok(())
    }

    #[test]
    fn conversion_from_str_error_works() {
        assert_eq!(caller().err(), Some(SimError::Service("cannot locate point")));
    }

    #[test]
    fn display_works() {
        let err = SimError::NumericalDegeneracy {
            cell: 3,
            what: "Peclet number is NaN".to_string(),
        };
        assert_eq!(format!("{}", err), "numerical degeneracy at cell 3: Peclet number is NaN");
        let err = SimError::ConvergenceStall { n_recovery: 2, dt: 0.25 };
        assert_eq!(
            format!("{}", err),
            "Picard iterations stalled after 2 time step reductions (Δt = 0.25)"
        );
    }
}
