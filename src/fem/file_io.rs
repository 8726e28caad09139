use super::{Mesh, NodalFields};
use crate::base::{InitialState, Parameters, Phase, SimError};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Holds a single nodal field interpolated onto the initial uniform mesh
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Space dimension
    pub dim: usize,

    /// Domain size L
    pub domain_size: f64,

    /// Refinement level of the uniform mesh
    pub refinement_level: usize,

    /// Nodal values on the uniform mesh
    pub values: Vec<f64>,
}

impl Checkpoint {
    /// Reads a JSON file containing a checkpoint
    ///
    /// # Input
    ///
    /// * `full_path` -- may be a String, &str, or Path
    pub fn read_json<P>(full_path: &P) -> Result<Self, SimError>
    where
        P: AsRef<OsStr> + ?Sized,
    {
        let path = Path::new(full_path).to_path_buf();
        let name = path.display().to_string();
        let input = File::open(&path).map_err(|_| SimError::MissingCheckpoint(name.clone()))?;
        let buffered = BufReader::new(input);
        serde_json::from_reader(buffered).map_err(|_| SimError::MissingCheckpoint(name))
    }

    /// Writes a JSON file with the checkpoint
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
        serde_json::to_writer(&mut file, &self).map_err(|e| SimError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Assists in generating output files
///
/// Writes the nodal snapshots (`.gp` tables), the summary of the average hydraulic
/// conductivity, and the pressure/substrate/biomass checkpoints.
pub struct FileIo {
    /// Holds a flag to enable/disable the file generation
    enabled: bool,

    /// Defines the output directory
    output_dir: String,

    /// Holds the rows (timestep, hours since milestone, effective conductivity) of the summary
    pub summary: Vec<(usize, f64, f64)>,

    /// Holds the paths of the snapshots written so far
    pub snapshots: Vec<String>,
}

impl FileIo {
    /// Allocates a new instance with deactivated generation of files
    pub fn new() -> Self {
        FileIo {
            enabled: false,
            output_dir: String::new(),
            summary: Vec::new(),
            snapshots: Vec::new(),
        }
    }

    /// Allocates a new instance writing into the given directory
    pub fn new_enabled(output_directory: &str) -> Result<Self, SimError> {
        fs::create_dir_all(output_directory)
            .map_err(|e| SimError::Io(format!("cannot create output directory: {}", e)))?;
        Ok(FileIo {
            enabled: true,
            output_dir: output_directory.to_string(),
            summary: Vec::new(),
            snapshots: Vec::new(),
        })
    }

    /// Returns the output directory
    pub fn output_dir(&self) -> &str {
        &self.output_dir
    }

    /// Generates the time stamp of a snapshot
    ///
    /// Drying and saturation use tenths of time units since the milestone;
    /// transport uses the zero-padded timestep number.
    pub fn stamp(phase: Phase, time: f64, milestone_time: f64, timestep: usize) -> String {
        match phase {
            Phase::Drying | Phase::Saturation => format!("{}", (10.0 * (time - milestone_time)) as i64),
            Phase::Transport => format!("{:0>10}", timestep),
        }
    }

    /// Generates the filename path for a snapshot
    pub fn path_snapshot(&self, params: &Parameters, phase: Phase, stamp: &str) -> String {
        let lumped = if params.lumped_matrix { "lumped_" } else { "" };
        format!(
            "{}/solution_{}_{}{}d_{}_t_{}.gp",
            self.output_dir,
            params.moisture_transport_equation.name(),
            lumped,
            params.dim,
            phase.period(),
            stamp
        )
    }

    /// Generates the filename path for the summary file
    pub fn path_summary(&self, params: &Parameters) -> String {
        format!(
            "{}/average_hydraulic_conductivity_sf_{}_{}_{}_{}_{}.txt",
            self.output_dir,
            params.relative_permeability_model.name(),
            params.sand_fraction,
            params.yield_coefficient,
            params.maximum_substrate_use_rate,
            params.half_velocity_constant
        )
    }

    /// Generates the filename path for a checkpoint
    ///
    /// `field` is one of "pressure", "substrate", or "bacteria".
    pub fn path_checkpoint(output_dir: &str, state: InitialState, field: &str) -> String {
        format!("{}/state_{}_{}.json", output_dir, state.name(), field)
    }

    /// Writes the current nodal fields as a gnuplot table
    ///
    /// **Note:** No output is generated if the instance is disabled.
    pub fn write_snapshot(
        &mut self,
        mesh: &Mesh,
        fields: &NodalFields,
        params: &Parameters,
        phase: Phase,
        stamp: &str,
    ) -> Result<(), SimError> {
        if !self.enabled {
            return Ok(());
        }
        let path = self.path_snapshot(params, phase, stamp);
        let mut buffer = BufWriter::new(File::create(&path)?);
        let coords = if mesh.dim() == 1 { "x" } else { "x y" };
        writeln!(
            &mut buffer,
            "# {} pressure substrate biomass_fraction free_water total_water \
             hydraulic_conductivity specific_moisture_capacity",
            coords
        )?;
        let set = &fields.new;
        for n in 0..mesh.n_nodes() {
            let x = mesh.node_coords(n);
            if mesh.dim() == 1 {
                write!(&mut buffer, "{:e}", x[0])?;
            } else {
                write!(&mut buffer, "{:e} {:e}", x[0], x[1])?;
            }
            writeln!(
                &mut buffer,
                " {:e} {:e} {:e} {:e} {:e} {:e} {:e}",
                set.pressure[n],
                set.substrate[n],
                set.biomass_fraction[n],
                set.moisture_free[n],
                set.moisture_total[n],
                set.conductivity[n],
                set.capacity[n]
            )?;
        }
        buffer.flush()?;
        log::info!("wrote {}", path);
        self.snapshots.push(path);
        Ok(())
    }

    /// Writes the summary of the average hydraulic conductivity
    pub fn write_summary(&self, params: &Parameters) -> Result<(), SimError> {
        if !self.enabled {
            return Ok(());
        }
        let path = self.path_summary(params);
        let mut buffer = BufWriter::new(File::create(&path)?);
        for (timestep, hours, conductivity) in &self.summary {
            writeln!(&mut buffer, "{} {:e} {:e}", timestep, hours, conductivity)?;
        }
        buffer.flush()?;
        log::info!("wrote {}", path);
        Ok(())
    }

    /// Writes the pressure, substrate, and biomass checkpoints
    ///
    /// The fields are interpolated onto the uniform mesh given by the parameters.
    pub fn write_checkpoint(
        &self,
        state: InitialState,
        mesh: &Mesh,
        fields: &NodalFields,
        params: &Parameters,
    ) -> Result<(), SimError> {
        if !self.enabled {
            return Ok(());
        }
        let base = Mesh::new_hyper_cube(params.dim, params.domain_size, params.refinement_level)?;
        let set = &fields.new;
        for (name, field) in [
            ("pressure", &set.pressure),
            ("substrate", &set.substrate),
            ("bacteria", &set.biomass),
        ] {
            let mut values = Vec::with_capacity(base.n_nodes());
            for n in 0..base.n_nodes() {
                let x = base.node_coords(n);
                values.push(mesh.point_value(field, &x[..base.dim()])?);
            }
            let checkpoint = Checkpoint {
                dim: params.dim,
                domain_size: params.domain_size,
                refinement_level: params.refinement_level,
                values,
            };
            checkpoint.write_json(&FileIo::path_checkpoint(&self.output_dir, state, name))?;
        }
        log::info!("wrote checkpoint \"{}\"", state.name());
        Ok(())
    }

    /// Reads the pressure, substrate, and biomass checkpoints for the uniform mesh
    ///
    /// Fails with `MissingCheckpoint` if a file is absent, cannot be parsed, or does not match the mesh.
    pub fn read_checkpoint(
        output_dir: &str,
        state: InitialState,
        mesh: &Mesh,
        params: &Parameters,
    ) -> Result<[DVector<f64>; 3], SimError> {
        let read = |name: &str| -> Result<DVector<f64>, SimError> {
            let path = FileIo::path_checkpoint(output_dir, state, name);
            let checkpoint = Checkpoint::read_json(&path)?;
            if checkpoint.dim != params.dim
                || checkpoint.refinement_level != params.refinement_level
                || checkpoint.domain_size != params.domain_size
                || checkpoint.values.len() != mesh.n_nodes()
            {
                return Err(SimError::MissingCheckpoint(path));
            }
            Ok(DVector::from_vec(checkpoint.values))
        };
        Ok([read("pressure")?, read("substrate")?, read("bacteria")?])
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::FileIo;
    use crate::base::{InitialState, Parameters, Phase, SimError, DEFAULT_TEST_DIR};
    use crate::fem::{Mesh, NodalFields};
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    #[test]
    fn paths_work() {
        let mut params = Parameters::sample();
        let io = FileIo::new();
        assert_eq!(
            io.path_snapshot(&params, Phase::Drying, "12"),
            "/solution_head_1d_drying_t_12.gp"
        );
        params.lumped_matrix = true;
        params.dim = 2;
        assert_eq!(
            io.path_snapshot(&params, Phase::Transport, "0000000003"),
            "/solution_head_lumped_2d_transporting_t_0000000003.gp"
        );
        assert_eq!(
            io.path_summary(&params),
            "/average_hydraulic_conductivity_sf_soleimani_1_0.5_0.0001_20.txt"
        );
        assert_eq!(
            FileIo::path_checkpoint("/tmp", InitialState::Dry, "pressure"),
            "/tmp/state_dry_pressure.json"
        );
    }

    #[test]
    fn stamp_works() {
        assert_eq!(FileIo::stamp(Phase::Drying, 12.5, 10.0, 7), "25");
        assert_eq!(FileIo::stamp(Phase::Transport, 12.5, 10.0, 7), "0000000007");
    }

    #[test]
    fn checkpoint_round_trip_on_refined_mesh() {
        let mut params = Parameters::sample();
        params.dim = 2;
        params.domain_size = 1.0;
        params.refinement_level = 1;
        let dir = format!("{}/file_io_checkpoint", DEFAULT_TEST_DIR);
        let io = FileIo::new_enabled(&dir).unwrap();

        // fields on a locally refined mesh
        let base = Mesh::new_hyper_cube(2, 1.0, 1).unwrap();
        let mesh = base.refine_and_coarsen(&[true, false, false, false], &[false; 4]);
        let mut fields = NodalFields::new(mesh.n_nodes());
        for n in 0..mesh.n_nodes() {
            let x = mesh.node_coords(n);
            fields.new.pressure[n] = -10.0 + x[1];
            fields.new.substrate[n] = 0.05;
            fields.new.biomass[n] = x[0];
        }
        io.write_checkpoint(InitialState::Saturated, &mesh, &fields, &params).unwrap();

        let [p, s, b] = FileIo::read_checkpoint(&dir, InitialState::Saturated, &base, &params).unwrap();
        assert_eq!(p.len(), base.n_nodes());
        for n in 0..base.n_nodes() {
            let x = base.node_coords(n);
            assert_relative_eq!(p[n], -10.0 + x[1], epsilon = 1e-14);
            assert_relative_eq!(s[n], 0.05, epsilon = 1e-14);
            assert_relative_eq!(b[n], x[0], epsilon = 1e-14);
        }

        // mismatched mesh
        let finer = Mesh::new_hyper_cube(2, 1.0, 2).unwrap();
        let res = FileIo::read_checkpoint(&dir, InitialState::Saturated, &finer, &params);
        assert!(matches!(res, Err(SimError::MissingCheckpoint(_))));

        // absent file
        let res = FileIo::read_checkpoint(&dir, InitialState::Final, &base, &params);
        assert!(matches!(res, Err(SimError::MissingCheckpoint(_))));
    }

    #[test]
    fn snapshot_and_summary_are_written() {
        let params = Parameters::sample();
        let dir = format!("{}/file_io_snapshot", DEFAULT_TEST_DIR);
        let mut io = FileIo::new_enabled(&dir).unwrap();
        let mesh = Mesh::new_hyper_cube(1, 1.0, 1).unwrap();
        let mut fields = NodalFields::new(mesh.n_nodes());
        fields.new.pressure = DVector::from_vec(vec![-1.0, -0.5, 0.0]);
        io.write_snapshot(&mesh, &fields, &params, Phase::Saturation, "0").unwrap();
        assert_eq!(io.snapshots.len(), 1);
        let contents = std::fs::read_to_string(&io.snapshots[0]).unwrap();
        assert_eq!(contents.lines().count(), 4);
        io.summary.push((1, 0.0, 9.22e-3));
        io.write_summary(&params).unwrap();
        let contents = std::fs::read_to_string(io.path_summary(&params)).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }
}
