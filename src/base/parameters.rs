use super::{EntryPoint, FlowEquation, HydraulicFamily, InitialState, RelativePermeability, SinkTerm};
use super::{SimError, DEFAULT_OUT_DIR};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;

/// Holds the physical and run parameters of a simulation
///
/// Units are centimeter, second, and milligram unless noted otherwise.
/// Concentrations marked "mg/L" are converted to mg/cm³ where they are consumed.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Parameters {
    // geometry ------------------------------------------------------------------
    /// Space dimension (1 or 2)
    pub dim: usize,

    /// Side length L of the domain [-L, 0]^dim (cm)
    pub domain_size: f64,

    /// Number of uniform refinements of the initial mesh
    pub refinement_level: usize,

    // hydraulic properties --------------------------------------------------------
    /// Family of retention and conductivity functions
    pub hydraulic_properties: HydraulicFamily,

    /// Saturated (volumetric) moisture content θs
    pub moisture_content_saturation: f64,

    /// Residual (volumetric) moisture content θr
    pub moisture_content_residual: f64,

    /// Saturated hydraulic conductivity Ks (cm/s)
    pub saturated_hydraulic_conductivity: f64,

    /// van Genuchten α (1/cm)
    pub van_genuchten_alpha: f64,

    /// van Genuchten n (> 1)
    pub van_genuchten_n: f64,

    /// Relative permeability (biofouling) model
    pub relative_permeability_model: RelativePermeability,

    /// Sand fraction of the soil (only used to label the summary file)
    pub sand_fraction: f64,

    // biomass ---------------------------------------------------------------------
    /// Dry density ρ of the biomass (mg/cm³)
    pub biomass_dry_density: f64,

    /// Yield coefficient Y (mg biomass / mg substrate)
    pub yield_coefficient: f64,

    /// Maximum substrate use rate μ (1/s)
    pub maximum_substrate_use_rate: f64,

    /// Half-velocity constant Ks (mg/L)
    pub half_velocity_constant: f64,

    /// First-order decay rate of the biomass (1/s)
    pub decay_rate: f64,

    /// Initial biomass concentration seeded when transport begins (mg/L)
    pub initial_condition_homogeneous_bacteria: f64,

    // transport -------------------------------------------------------------------
    /// Porosity (used by the Monod sink term)
    pub porosity: f64,

    /// Longitudinal dispersivity α_L (cm)
    pub dispersivity_longitudinal: f64,

    /// Effective molecular diffusion coefficient (cm²/s)
    pub effective_diffusion_coefficient: f64,

    /// Reaction term of the transport equation
    pub sink_term: SinkTerm,

    /// First-order decay factor of the substrate (1/s), used with `SinkTerm::FirstOrder`
    pub first_order_decay_factor: f64,

    /// Enables the transport equation (and the saturation → transport transition)
    pub coupled_transport: bool,

    /// Boundary through which the nutrients enter
    pub transport_mass_entry_point: EntryPoint,

    /// Fixes the substrate concentration at the top instead of prescribing an inflow
    pub transport_fixed_at_top: bool,

    /// Substrate concentration of the inflowing water (mg/L)
    pub transport_top_fixed_value: f64,

    /// Initial homogeneous substrate concentration (mg/L)
    pub initial_condition_homogeneous_transport: f64,

    // flow ------------------------------------------------------------------------
    /// Form of the Richards equation
    pub moisture_transport_equation: FlowEquation,

    /// Uses a lumped (trapezoidal) mass matrix in the flow equation
    pub lumped_matrix: bool,

    /// θ-method coefficient of the flow equation
    pub theta_richards: f64,

    /// θ-method coefficient of the transport equation
    pub theta_transport: f64,

    /// Fixes the pressure head at the bottom
    pub richards_fixed_at_bottom: bool,

    /// Pressure head at the bottom (cm)
    pub richards_bottom_fixed_value: f64,

    /// Fixes the pressure head at the top after the drying period
    pub richards_fixed_at_top: bool,

    /// Pressure head at the top (cm)
    pub richards_top_fixed_value: f64,

    /// Water flux through the top when the top head is not fixed (cm/s)
    pub richards_top_flow_value: f64,

    /// Initial homogeneous pressure head (cm)
    pub initial_condition_homogeneous_flow: f64,

    // time loop and output --------------------------------------------------------
    /// State from which the simulation starts
    pub initial_state: InitialState,

    /// Initial time step (s)
    pub time_step: f64,

    /// Maximum number of time steps
    pub timestep_number_max: usize,

    /// Output period (s) during the transport regime; zero disables it
    pub output_frequency_transport: f64,

    /// Prints a report of each time step to the terminal
    pub output_data_in_terminal: bool,

    /// Directory of results and checkpoints (empty disables the output files)
    pub output_directory: String,
}

impl Parameters {
    /// Returns a small one-dimensional column of sand
    pub fn sample() -> Self {
        Parameters {
            dim: 1,
            domain_size: 20.0,
            refinement_level: 4,
            hydraulic_properties: HydraulicFamily::VanGenuchten,
            moisture_content_saturation: 0.368,
            moisture_content_residual: 0.102,
            saturated_hydraulic_conductivity: 9.22e-3,
            van_genuchten_alpha: 0.0335,
            van_genuchten_n: 2.0,
            relative_permeability_model: RelativePermeability::Soleimani,
            sand_fraction: 1.0,
            biomass_dry_density: 100.0,
            yield_coefficient: 0.5,
            maximum_substrate_use_rate: 1.0e-4,
            half_velocity_constant: 20.0,
            decay_rate: 3.0e-6,
            initial_condition_homogeneous_bacteria: 10.0,
            porosity: 0.368,
            dispersivity_longitudinal: 0.5,
            effective_diffusion_coefficient: 1.0e-5,
            sink_term: SinkTerm::Off,
            first_order_decay_factor: 0.0,
            coupled_transport: true,
            transport_mass_entry_point: EntryPoint::Top,
            transport_fixed_at_top: false,
            transport_top_fixed_value: 50.0,
            initial_condition_homogeneous_transport: 0.0,
            moisture_transport_equation: FlowEquation::Head,
            lumped_matrix: false,
            theta_richards: 0.5,
            theta_transport: 0.5,
            richards_fixed_at_bottom: true,
            richards_bottom_fixed_value: 0.0,
            richards_fixed_at_top: true,
            richards_top_fixed_value: 2.0,
            richards_top_flow_value: 0.0,
            initial_condition_homogeneous_flow: -10.0,
            initial_state: InitialState::Default,
            time_step: 1.0,
            timestep_number_max: 200,
            output_frequency_transport: 60.0,
            output_data_in_terminal: false,
            output_directory: DEFAULT_OUT_DIR.to_string(),
        }
    }

    /// Validates all data
    ///
    /// Returns a message with the inconsistent data, or returns None if everything is all right.
    pub fn validate(&self) -> Option<String> {
        if self.dim != 1 && self.dim != 2 {
            return Some(format!("dim = {:?} is incorrect; it must be 1 or 2", self.dim));
        }
        if self.domain_size <= 0.0 {
            return Some(format!(
                "domain_size = {:?} is incorrect; it must be > 0.0",
                self.domain_size
            ));
        }
        if self.moisture_content_residual < 0.0 {
            return Some(format!(
                "moisture_content_residual = {:?} is incorrect; it must be ≥ 0.0",
                self.moisture_content_residual
            ));
        }
        if self.moisture_content_saturation <= self.moisture_content_residual
            || self.moisture_content_saturation > 1.0
        {
            return Some(format!(
                "moisture_content_saturation = {:?} is incorrect; it must be > θr and ≤ 1.0",
                self.moisture_content_saturation
            ));
        }
        if self.saturated_hydraulic_conductivity <= 0.0 {
            return Some(format!(
                "saturated_hydraulic_conductivity = {:?} is incorrect; it must be > 0.0",
                self.saturated_hydraulic_conductivity
            ));
        }
        if self.van_genuchten_alpha <= 0.0 {
            return Some(format!(
                "van_genuchten_alpha = {:?} is incorrect; it must be > 0.0",
                self.van_genuchten_alpha
            ));
        }
        if self.van_genuchten_n <= 1.0 {
            return Some(format!(
                "van_genuchten_n = {:?} is incorrect; it must be > 1.0",
                self.van_genuchten_n
            ));
        }
        if self.biomass_dry_density <= 0.0 {
            return Some(format!(
                "biomass_dry_density = {:?} is incorrect; it must be > 0.0",
                self.biomass_dry_density
            ));
        }
        if self.half_velocity_constant <= 0.0 {
            return Some(format!(
                "half_velocity_constant = {:?} is incorrect; it must be > 0.0",
                self.half_velocity_constant
            ));
        }
        if self.porosity <= 0.0 || self.porosity > 1.0 {
            return Some(format!(
                "porosity = {:?} is incorrect; it must be 0.0 < φ ≤ 1.0",
                self.porosity
            ));
        }
        if self.dispersivity_longitudinal < 0.0 || self.effective_diffusion_coefficient < 0.0 {
            return Some("dispersivity and diffusion coefficient must be ≥ 0.0".to_string());
        }
        if self.theta_richards <= 0.0 || self.theta_richards > 1.0 {
            return Some(format!(
                "theta_richards = {:?} is incorrect; it must be 0.0 < θ ≤ 1.0",
                self.theta_richards
            ));
        }
        if self.theta_transport <= 0.0 || self.theta_transport > 1.0 {
            return Some(format!(
                "theta_transport = {:?} is incorrect; it must be 0.0 < θ ≤ 1.0",
                self.theta_transport
            ));
        }
        if self.time_step <= 0.0 {
            return Some(format!("time_step = {:?} is incorrect; it must be > 0.0", self.time_step));
        }
        if self.output_frequency_transport < 0.0 {
            return Some(format!(
                "output_frequency_transport = {:?} is incorrect; it must be ≥ 0.0",
                self.output_frequency_transport
            ));
        }
        None // all good
    }

    /// Returns the validation message as an error
    pub fn check(&self) -> Result<(), SimError> {
        match self.validate() {
            Some(msg) => Err(SimError::Configuration(msg)),
            None => Ok(()),
        }
    }

    /// Reads a JSON file containing the parameters
    ///
    /// # Input
    ///
    /// * `full_path` -- may be a String, &str, or Path
    pub fn read_json<P>(full_path: &P) -> Result<Self, SimError>
    where
        P: AsRef<OsStr> + ?Sized,
    {
        let path = Path::new(full_path).to_path_buf();
        let input = File::open(path).map_err(|e| SimError::Io(format!("cannot open parameters file: {}", e)))?;
        let buffered = BufReader::new(input);
        let value: Value = serde_json::from_reader(buffered).map_err(|e| SimError::Configuration(e.to_string()))?;
        check_name::<HydraulicFamily>(&value, "hydraulic_properties")?;
        check_name::<RelativePermeability>(&value, "relative_permeability_model")?;
        check_name::<SinkTerm>(&value, "sink_term")?;
        check_name::<EntryPoint>(&value, "transport_mass_entry_point")?;
        check_name::<FlowEquation>(&value, "moisture_transport_equation")?;
        check_name::<InitialState>(&value, "initial_state")?;
        let data: Parameters = serde_json::from_value(value).map_err(|e| SimError::Configuration(e.to_string()))?;
        data.check()?;
        Ok(data)
    }

    /// Writes a JSON file with the parameters
    ///
    /// # Input
    ///
    /// * `full_path` -- may be a String, &str, or Path
    pub fn write_json<P>(&self, full_path: &P) -> Result<(), SimError>
    where
        P: AsRef<OsStr> + ?Sized,
    {
        let path = Path::new(full_path).to_path_buf();
        if let Some(p) = path.parent() {
            fs::create_dir_all(p)?;
        }
        let mut file = File::create(&path)?;
        serde_json::to_writer_pretty(&mut file, &self).map_err(|e| SimError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Parses a model name of the input so that unknown names report their own error kind
fn check_name<T>(value: &Value, key: &str) -> Result<(), SimError>
where
    T: FromStr<Err = SimError>,
{
    match value.get(key).and_then(Value::as_str) {
        Some(name) => name.parse::<T>().map(|_| ()),
        None => Ok(()),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
