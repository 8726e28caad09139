/// Defines the directory where the simulation result files are saved
pub const DEFAULT_OUT_DIR: &str = "/tmp/bioclog/results";

/// Defines an auxiliary directory where the test result files are saved
pub const DEFAULT_TEST_DIR: &str = "/tmp/bioclog/test";

/// Converts concentrations given in mg/L into mg/cm³
pub const MG_PER_LITER_TO_MG_PER_CM3: f64 = 1.0 / 1000.0;

/// Boundary id of the top face (vertical coordinate equal to zero)
pub const BOUNDARY_TOP: usize = 1;

/// Boundary id of the bottom face (vertical coordinate equal to minus the domain size)
pub const BOUNDARY_BOTTOM: usize = 2;

/// Darcy velocity norm below which the velocity is taken as zero
pub const NEGLIGIBLE_VELOCITY: f64 = 1e-6;

/// Dispersion coefficient below which the SUPG stabilization is switched off
pub const NEGLIGIBLE_DISPERSION: f64 = 1e-10;

/// Peclet number below which coth(Pe) - 1/Pe is replaced by its series expansion
pub const SMALL_PECLET: f64 = 1e-4;

/// Pressure head used in place of non-negative heads by the van Genuchten capacity
pub const VAN_GENUCHTEN_SATURATED_HEAD: f64 = -0.01;

/// Haverkamp retention coefficient α
pub const HAVERKAMP_ALPHA: f64 = 1.611e6;

/// Haverkamp retention exponent β
pub const HAVERKAMP_BETA: f64 = 3.96;

/// Haverkamp conductivity coefficient A
pub const HAVERKAMP_A: f64 = 1.175e6;

/// Haverkamp conductivity exponent γ
pub const HAVERKAMP_GAMMA: f64 = 4.74;

/// Relative permeability of a biofilm plug (Vandevivere model)
pub const VANDEVIVERE_PLUG_PERMEABILITY: f64 = 0.00025;

/// Critical biomass volume fraction of the Vandevivere blend
pub const VANDEVIVERE_CRITICAL_FRACTION: f64 = 0.1;

/// Exponent of the Clement et al. porosity-reduction law
///
/// The published exponent is 19/6, but the reference results were produced with 3.
pub const CLEMENT_EXPONENT: f64 = 3.0;

/// Largest cell indicator (relative to the field magnitude) below which the mesh is left unchanged
pub const NEGLIGIBLE_INDICATOR: f64 = 1e-10;
