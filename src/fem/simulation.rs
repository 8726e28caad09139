use super::{adapt_mesh, Accounting, ControlConvergence, ControlTime, FileIo, FlowSettings, FlowSystem};
use super::{HangingNodes, Indicators, Mesh, NodalFields, PhaseMachine, SparsityPattern, Transition};
use super::{TransportSettings, TransportSystem};
use crate::base::{Config, FlowEquation, HydraulicFamily, InitialState, Parameters, Phase, SimError};
use crate::base::MG_PER_LITER_TO_MG_PER_CM3;
use crate::material::{BiomassKinetics, HydraulicProperties};
use log::{debug, info, warn};
use std::rc::Rc;

/// Performs a bioclogging simulation
///
/// Each time step runs:
///
/// 1. mesh adaptation (unless drying)
/// 2. the Picard loop coupling flow and transport
/// 3. the cumulative accounting and the phase transition check
/// 4. output and time step adaptation
/// 5. the commit of the nodal fields
pub struct Simulation<'a> {
    /// Holds the physical parameters
    params: &'a Parameters,

    /// Holds the numerical configuration
    config: &'a Config,

    /// Holds the hydraulic properties model
    hydraulics: HydraulicProperties,

    /// Holds the biomass growth kinetics
    kinetics: BiomassKinetics,

    /// Holds the current mesh
    pub mesh: Mesh,

    /// Holds the hanging-node constraints of the current mesh
    pub constraints: HangingNodes,

    /// Holds the nodal fields (old and new slots)
    pub fields: NodalFields,

    /// Holds the flow system
    flow: FlowSystem,

    /// Holds the transport system
    transport: TransportSystem,

    /// Holds the cumulative nutrient accounting
    pub accounting: Accounting,

    /// Holds the time and time step
    pub control_time: ControlTime<'a>,

    /// Holds the phase state machine
    pub phases: PhaseMachine<'a>,

    /// Assists in writing output files
    pub file_io: FileIo,

    /// Holds the index of the last completed time step
    pub timestep: usize,

    /// Holds the number of Picard passes of the last time step (stall restarts included)
    pub n_iterations: usize,

    /// Holds the phase transitions in the order they happened
    pub transitions: Vec<Transition>,
}

impl<'a> Simulation<'a> {
    /// Allocates a new instance and sets the initial conditions
    ///
    /// Homogeneous initial states use the initial values of the parameters; the other states
    /// read the checkpoint triple from the output directory.
    pub fn new(params: &'a Parameters, config: &'a Config) -> Result<Self, SimError> {
        params.check()?;
        config.check()?;
        if params.hydraulic_properties == HydraulicFamily::Haverkamp
            && (params.moisture_transport_equation == FlowEquation::Mixed || params.coupled_transport)
        {
            return Err(SimError::Configuration(
                "the haverkamp_et_al_1977 model supports only the head formulation without transport".to_string(),
            ));
        }
        let hydraulics = HydraulicProperties::from_parameters(params)?;
        let kinetics = BiomassKinetics::from_parameters(params);
        let mesh = Mesh::new_hyper_cube(params.dim, params.domain_size, params.refinement_level)?;
        let constraints = HangingNodes::new(&mesh);
        let pattern = Rc::new(SparsityPattern::new(&mesh, &constraints));
        let flow = FlowSystem::new(FlowSettings::from_parameters(params), pattern.clone());
        let transport = TransportSystem::new(TransportSettings::from_parameters(params), pattern);
        let file_io = if params.output_directory.is_empty() {
            FileIo::new()
        } else {
            FileIo::new_enabled(&params.output_directory)?
        };

        // initial conditions
        let start = params.initial_state.starting_phase();
        let mut fields = NodalFields::new(mesh.n_nodes());
        if params.initial_state.is_homogeneous() {
            fields.new.pressure.fill(params.initial_condition_homogeneous_flow);
            fields
                .new
                .substrate
                .fill(params.initial_condition_homogeneous_transport * MG_PER_LITER_TO_MG_PER_CM3);
        } else {
            let [pressure, substrate, biomass] =
                FileIo::read_checkpoint(&params.output_directory, params.initial_state, &mesh, params)?;
            fields.new.pressure = pressure;
            fields.new.substrate = substrate;
            fields.new.biomass = biomass;
            info!("read checkpoint \"{}\"", params.initial_state);
        }
        fields.commit();
        fields.update_constitutive(&hydraulics, &kinetics, params.relative_permeability_model, start, 0.0)?;
        fields.commit();

        let equilibrium = params.richards_bottom_fixed_value - params.domain_size;
        Ok(Simulation {
            params,
            config,
            hydraulics,
            kinetics,
            mesh,
            constraints,
            fields,
            flow,
            transport,
            accounting: Accounting::new(),
            control_time: ControlTime::new(config, params.time_step),
            phases: PhaseMachine::new(config, start, params.coupled_transport, equilibrium),
            file_io,
            timestep: 0,
            n_iterations: 0,
            transitions: Vec::new(),
        })
    }

    /// Returns the current phase
    pub fn phase(&self) -> Phase {
        self.phases.phase()
    }

    /// Returns the observed quantities of the last time step
    pub fn indicators(&self) -> Result<Indicators, SimError> {
        let top = self.mesh.top_point();
        Ok(Indicators {
            top_pressure: self.mesh.point_value(&self.fields.new.pressure, &top[..self.mesh.dim()])?,
            flow_at_top: self.flow.flow_at_top,
            flow_at_bottom: self.flow.flow_at_bottom,
        })
    }

    /// Runs all time steps and writes the final checkpoint and the summary
    pub fn run(&mut self) -> Result<(), SimError> {
        self.config.print_header();
        for timestep in 1..self.params.timestep_number_max {
            self.timestep = timestep;
            self.step()?;
        }
        self.file_io
            .write_checkpoint(InitialState::Final, &self.mesh, &self.fields, self.params)?;
        self.file_io.write_summary(self.params)?;
        info!(
            "finished after {} steps at t = {:.3} in the {} phase",
            self.timestep,
            self.control_time.t,
            self.phase()
        );
        Ok(())
    }

    /// Performs one time step
    ///
    /// Returns the phase transition that happened at the end of the step, if any.
    pub fn step(&mut self) -> Result<Option<Transition>, SimError> {
        let phase = self.phase();
        if self.config.adaptive_mesh && phase != Phase::Drying {
            self.adapt(phase)?;
        }
        self.config.print_timestep(
            self.timestep,
            self.control_time.t,
            self.control_time.dt,
            phase,
            self.mesh.n_cells(),
        );

        // nonlinear iterations
        self.n_iterations = self.picard(phase)?;

        // accounting
        let dt = self.control_time.dt;
        self.control_time.advance();
        if phase == Phase::Transport {
            self.accounting.commit(
                self.transport.nutrient_flow_at_top,
                self.transport.nutrient_flow_at_bottom,
                self.transport.nutrients_in_domain,
                dt,
            );
        }

        // phase transition
        let indicators = self.indicators()?;
        let transition = self.phases.update(self.control_time.t, &indicators);
        if let Some(tr) = transition {
            info!("{}", tr);
            if tr.to == Phase::Transport {
                self.seed_biomass();
            }
            if let Some(state) = tr.from.checkpoint_on_exit() {
                self.file_io
                    .write_checkpoint(state, &self.mesh, &self.fields, self.params)?;
            }
            self.transitions.push(tr);
        }

        // output
        let t = self.control_time.t;
        let effective_conductivity = self.fields.effective_conductivity();
        self.file_io.summary.push((
            self.timestep,
            (t - self.phases.milestone_time) / 3600.0,
            effective_conductivity,
        ));
        if self.params.output_data_in_terminal {
            self.print_report(&indicators, effective_conductivity);
        }
        let last = self.timestep + 1 == self.params.timestep_number_max;
        let period = self.phases.output_period(self.params.output_frequency_transport);
        if self.phases.output_due(t, period) || last {
            let stamp = FileIo::stamp(self.phase(), t, self.phases.milestone_time, self.timestep);
            self.file_io
                .write_snapshot(&self.mesh, &self.fields, self.params, self.phase(), &stamp)?;
            self.phases.figure_count += 1;
        }

        // next step
        self.control_time
            .adapt(self.phase(), self.n_iterations, transition.is_some());
        self.fields.commit();
        Ok(transition)
    }

    /// Runs the Picard loop of the current time step
    ///
    /// Returns the number of passes of the step, counting those before any stall recovery.
    fn picard(&mut self, phase: Phase) -> Result<usize, SimError> {
        let transport_active = phase == Phase::Transport;
        let model = self.params.relative_permeability_model;
        let mut control = ControlConvergence::new(self.config);
        control.initialize(&self.fields.old.pressure);
        loop {
            let dt = self.control_time.dt;
            self.fields
                .update_constitutive(&self.hydraulics, &self.kinetics, model, phase, dt)?;

            // flow
            self.flow.assemble(&self.mesh, &self.fields, phase, dt);
            self.flow
                .solve(&self.mesh, &self.constraints, &mut self.fields, phase, self.config)?;
            control.analyze_flow(&self.fields.new.pressure);

            // transport
            if transport_active {
                self.transport.assemble(&self.mesh, &self.fields, &self.kinetics, dt)?;
                self.transport
                    .solve(&self.mesh, &self.constraints, &mut self.fields, self.config)?;
                control.analyze_transport(&self.fields.new.substrate);
            }
            debug!(
                "iteration {}: ‖h‖² = {:e}, ‖c‖² = {:e}",
                control.iteration(),
                self.fields.new.pressure.norm_squared(),
                self.fields.new.substrate.norm_squared()
            );

            if control.converged() {
                return Ok(control.n_iterations());
            }

            // stall recovery
            if transport_active {
                if control.stalled() {
                    if control.too_many_recoveries() {
                        return Err(SimError::ConvergenceStall {
                            n_recovery: control.n_stall_recoveries(),
                            dt,
                        });
                    }
                    control.restart();
                    self.control_time.halve();
                    warn!(
                        "transport stalled at step {}; reducing Δt to {}",
                        self.timestep, self.control_time.dt
                    );
                }
            } else if control.iteration() > self.config.n_max_iterations {
                return Err(SimError::ConvergenceStall { n_recovery: 0, dt });
            }
        }
    }

    /// Refines and coarsens the mesh and rebuilds the linear systems
    fn adapt(&mut self, phase: Phase) -> Result<(), SimError> {
        let indicator = match phase {
            Phase::Transport => &self.fields.new.substrate,
            Phase::Drying | Phase::Saturation => &self.fields.new.pressure,
        };
        if let Some((mesh, constraints, fields)) = adapt_mesh(&self.mesh, &self.fields, indicator, self.config)? {
            debug!(
                "mesh adapted: {} → {} cells ({} hanging nodes)",
                self.mesh.n_cells(),
                mesh.n_cells(),
                constraints.n_constrained()
            );
            self.mesh = mesh;
            self.constraints = constraints;
            self.fields = fields;
            let pattern = Rc::new(SparsityPattern::new(&self.mesh, &self.constraints));
            self.flow = FlowSystem::new(FlowSettings::from_parameters(self.params), pattern.clone());
            self.transport = TransportSystem::new(TransportSettings::from_parameters(self.params), pattern);
        }
        Ok(())
    }

    /// Seeds the biomass uniformly in both slots
    fn seed_biomass(&mut self) {
        let biomass = self.params.initial_condition_homogeneous_bacteria * MG_PER_LITER_TO_MG_PER_CM3;
        let fraction = self.kinetics.volume_fraction(biomass);
        for set in [&mut self.fields.old, &mut self.fields.new] {
            set.biomass.fill(biomass);
            set.biomass_fraction.fill(fraction);
        }
        info!("seeded biomass: {:e} mg/cm³", biomass);
    }

    /// Prints the per-step report of flows and nutrient totals
    #[rustfmt::skip]
    fn print_report(&self, indicators: &Indicators, effective_conductivity: f64) {
        let hours = (self.control_time.t - self.phases.milestone_time) / 3600.0;
        let errors = match self.phase() {
            Phase::Drying => format!("RError: {:.2e}", self.phases.drying_error(indicators.top_pressure)),
            Phase::Saturation => {
                let (rel, abs) = PhaseMachine::saturation_error(indicators.flow_at_top, indicators.flow_at_bottom);
                format!("RError: {:.2e}\tAError: {:.2e}", rel, abs)
            }
            Phase::Transport => String::new(),
        };
        println!(
            "tsn: {:>6}  time: {:>9.5} h\t{}\t{}  ts: {:>5.2}  k_eff: {:.2e}\tcell #s: {}",
            self.timestep,
            hours,
            self.phase(),
            errors,
            self.control_time.dt,
            effective_conductivity,
            self.mesh.n_cells()
        );
        println!(
            "\tflow of water at bottom    : {:>7.4} cm3/s\tflow of water at top    : {:>7.4} cm3/s",
            indicators.flow_at_bottom, indicators.flow_at_top
        );
        println!(
            "\tflow of nutrients at bottom: {:>7.4}  mg/s\tflow of nutrients at top: {:>7.4}  mg/s",
            self.transport.nutrient_flow_at_bottom, self.transport.nutrient_flow_at_top
        );
        println!("\tcumulative flow of nutrients at bottom: {:.3} mg", self.accounting.cumulative_flow_at_bottom);
        println!("\tcumulative flow of nutrients at top: {:.3} mg", self.accounting.cumulative_flow_at_top);
        println!("\tcumulative nutrients in domain: {:.3} mg", self.accounting.nutrients_in_domain);
        println!("\tchange of nutrients in domain: {:.3e} mg", self.accounting.storage_change());
        println!("\tmass error: {:.3e} mg\n", self.accounting.balance_error());
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
