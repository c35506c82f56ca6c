use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    path::Path,
    time::{Duration, Instant},
};

use anyhow::{bail, Context, Result};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use tracing::{error, info, Level};

use pbf_softbody::{
    floating_type_mod::FT, init_simulation_params, init_world, write_statistics, SceneConfig, SimulationParams,
};

const CARGO_PKG_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
const CARGO_PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

const DEFAULT_MAX_SECONDS: FT = 10.;

pub fn start() {
    let matches = App::new("PBF Soft Body Simulation")
        .version(CARGO_PKG_VERSION)
        .author(CARGO_PKG_AUTHORS)
        .about(CARGO_PKG_DESCRIPTION)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .global(true)
                .help("Sets the level of verbosity"),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("Run simulation with given config")
                .arg(
                    Arg::with_name("SIMULATION_CONFIG")
                        .help("Sets the simulation paramaters")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::with_name("SCENE_CONFIG")
                        .help("Scene setup")
                        .required(true)
                        .index(2),
                )
                .arg(
                    Arg::with_name("MAX_SECONDS")
                        .long("max-seconds")
                        .short("s")
                        .required(false)
                        .takes_value(true)
                        .help("Stop simulation after the given amount of simulated seconds"),
                )
                .arg(
                    Arg::with_name("OVERWRITE_CONFIG_FILE")
                        .long("overwrite-config-file")
                        .short("c")
                        .required(false)
                        .takes_value(true)
                        .help("Overwrite config"),
                )
                .arg(
                    Arg::with_name("STATISTICS_ENABLED")
                        .help("Track performance of individual steps")
                        .short("p")
                        .long("statistics-enabled")
                        .takes_value(false),
                )
                .arg(
                    Arg::with_name("STATISTICS_PATH")
                        .long("statistics-path")
                        .short("w")
                        .required(false)
                        .takes_value(true)
                        .help("Where to write statistics to"),
                ),
        )
        .subcommand(
            SubCommand::with_name("print-default-config")
                .about("Write the default simulation parameters as YAML")
                .arg(
                    Arg::with_name("OUTPUT_YAML")
                        .help("YAML file to write to, stdout if omitted")
                        .takes_value(true)
                        .required(false),
                ),
        )
        .get_matches();

    let level = match matches.occurrences_of("v") {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let result = if let Some(run_matches) = matches.subcommand_matches("run") {
        run(run_matches)
    } else if let Some(subcmd_matches) = matches.subcommand_matches("print-default-config") {
        print_default_config(subcmd_matches.value_of("OUTPUT_YAML"))
    } else {
        unreachable!()
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Reads the parameter file and replaces top level keys with the ones of the overwrite file.
fn load_simulation_params(parameter_file: &str, overwrite_file: Option<&str>) -> Result<SimulationParams> {
    let params_yaml = std::fs::read_to_string(parameter_file)
        .with_context(|| format!("failed reading parameter file {}", parameter_file))?;
    let mut simulation_params_serde: serde_yaml::Value = serde_yaml::from_str(&params_yaml)
        .with_context(|| format!("failed parsing simulation config file {}", parameter_file))?;

    if let Some(overwrite_file) = overwrite_file {
        let overwrite_config_str = std::fs::read_to_string(overwrite_file)
            .with_context(|| format!("failed reading overwrite file {}", overwrite_file))?;
        let overwrite_config: HashMap<String, serde_yaml::Value> = serde_yaml::from_str(&overwrite_config_str)
            .with_context(|| format!("failed parsing overwrite file {}", overwrite_file))?;

        let mapping = match simulation_params_serde.as_mapping_mut() {
            Some(m) => m,
            None => bail!("simulation config {} is not a mapping", parameter_file),
        };
        for (k, v) in overwrite_config.into_iter() {
            mapping.insert(serde_yaml::Value::String(k), v);
        }
    }

    serde_yaml::from_value(simulation_params_serde).context("failed to unpack SimulationParams")
}

fn run(run_matches: &ArgMatches) -> Result<()> {
    let parameter_file = run_matches
        .value_of("SIMULATION_CONFIG")
        .context("missing simulation config")?;
    let mut simulation_params =
        load_simulation_params(parameter_file, run_matches.value_of("OVERWRITE_CONFIG_FILE"))?;

    let scene_file_path = run_matches.value_of("SCENE_CONFIG").context("missing scene config")?;
    let scene_config = SceneConfig::load(Path::new(scene_file_path))?;

    let counters_enabled = run_matches.is_present("STATISTICS_ENABLED");
    simulation_params.counters_enabled |= counters_enabled;

    let max_seconds = match run_matches.value_of("MAX_SECONDS") {
        Some(x) => x
            .parse::<FT>()
            .with_context(|| format!("invalid value for --max-seconds: {}", x))?,
        None => DEFAULT_MAX_SECONDS,
    };
    let statistics_path_opt = run_matches.value_of("STATISTICS_PATH");

    init_simulation_params(&mut simulation_params, &scene_config);
    info!("{:?}", simulation_params);
    let mut world = init_world(simulation_params, &scene_config)?;

    let dt = simulation_params.time_step;
    let mut total_duration = Duration::from_nanos(0);
    let mut frame_number: u64 = 0;

    while world.telemetry().time < max_seconds {
        let a = Instant::now();
        let step = catch_unwind(AssertUnwindSafe(|| world.step(dt)));
        let b = Instant::now();

        let statistics = match step {
            Ok(statistics) => statistics,
            Err(_) => {
                error!("simulation failed in tick {}", frame_number);
                break;
            }
        };

        total_duration += b - a;
        frame_number += 1;

        let density_error = statistics.iterations.last().map_or(0., |it| it.avg_density_error);
        let telemetry = world.telemetry();
        info!(
            "{:05}: {} fluid particles, {} soft body particles, density error {:.5}, {} contacts, {:.3}msec ({:.3}msec AVG)",
            frame_number,
            telemetry.fluid_particles,
            telemetry.soft_body_particles,
            density_error,
            statistics.contacts(),
            (b - a).as_secs_f64() * 1000.,
            total_duration.as_secs_f64() * 1000. / frame_number as f64,
        );
    }

    if counters_enabled {
        let s = write_statistics(&world);
        print!("{}", s);
        if let Some(statistics_path) = statistics_path_opt {
            std::fs::write(statistics_path, s)
                .with_context(|| format!("failed writing statistics to {}", statistics_path))?;
        }
    }

    Ok(())
}

fn print_default_config(output: Option<&str>) -> Result<()> {
    let yaml = serde_yaml::to_string(&SimulationParams::default()).context("failed serializing parameters")?;
    match output {
        Some(path) => {
            std::fs::write(path, yaml).with_context(|| format!("failed writing {}", path))?;
            info!("wrote default parameters to {}", path);
        }
        None => print!("{}", yaml),
    }
    Ok(())
}
