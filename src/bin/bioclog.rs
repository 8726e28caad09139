use bioclog::prelude::*;
use structopt::StructOpt;

/// Command line options
#[derive(StructOpt, Debug)]
#[structopt(
    name = "bioclog",
    about = "Simulates the bioclogging of a soil column: drying, saturation, and substrate transport"
)]
struct Options {
    /// JSON file with the simulation parameters
    #[structopt(default_value = "")]
    parameters: String,

    /// Writes a sample parameters file to the given path and exits
    #[structopt(long)]
    write_sample: Option<String>,

    /// Overrides the output directory of the parameters file
    #[structopt(short, long)]
    output_dir: Option<String>,

    /// Disables the mesh adaptation
    #[structopt(long)]
    uniform_mesh: bool,

    /// Prints the timestep table
    #[structopt(short, long)]
    verbose: bool,

    /// Prints the Picard iterations too
    #[structopt(long)]
    verbose_iterations: bool,
}

fn main() -> Result<(), SimError> {
    env_logger::init();

    // parse options
    let options = Options::from_args();
    if let Some(path) = &options.write_sample {
        Parameters::sample().write_json(path)?;
        println!("sample parameters written to {}", path);
        return Ok(());
    }
    if options.parameters.is_empty() {
        return Err(SimError::Configuration(
            "a parameters file is required (see --write-sample)".to_string(),
        ));
    }

    // load data
    let mut params = Parameters::read_json(&options.parameters)?;
    if let Some(dir) = options.output_dir {
        params.output_directory = dir;
    }
    let mut config = Config::new();
    config
        .set_adaptive_mesh(!options.uniform_mesh)
        .set_verbose(options.verbose, options.verbose_iterations);

    // run
    let mut sim = Simulation::new(&params, &config)?;
    sim.run()?;

    // message
    let thin_line = format!("{:─^1$}", "", params.output_directory.len());
    println!("\n\n{}", thin_line);
    println!("Simulation finished in the {} phase; the results are in:", sim.phase());
    println!("{}", params.output_directory);
    println!("{}\n\n", thin_line);
    Ok(())
}
