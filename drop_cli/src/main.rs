use clap::{value_parser, Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;

use libdrop::config::Config;
use libdrop::error::ConfigError;
use libdrop::process::{load_run_setup, process, IdRange};

fn make_template_config(path: &Path) -> Result<(), ConfigError> {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config)?;
    let mut file = File::create(path)?;
    file.write_all(yaml_str.as_bytes())?;
    Ok(())
}

fn main() {
    // Create a cli
    let matches = Command::new("drop_cli")
        .about("Reconstruct events from CAEN V1730 binary data")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Path to the configuration yaml"),
        )
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_parser(value_parser!(PathBuf))
                .help("Path to the binary data file"),
        )
        .arg(
            Arg::new("start-id")
                .long("start-id")
                .value_parser(value_parser!(u32))
                .default_value("0")
                .help("First event id to process"),
        )
        .arg(
            Arg::new("end-id")
                .long("end-id")
                .value_parser(value_parser!(u32))
                .help("Stop before this event id"),
        )
        .arg(
            Arg::new("output-dir")
                .long("output-dir")
                .value_parser(value_parser!(PathBuf))
                .help("Directory for the output (defaults to the input's directory)"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    if let Err(e) = LogWrapper::new(pb_manager.clone(), logger).try_init() {
        eprintln!("Could not create logging/progress: {e}");
        return;
    }

    // Parse the cli
    let Some(config_path) = matches.get_one::<PathBuf>("config").cloned() else {
        log::error!("A config path is required");
        return;
    };

    if let Some(("new", _)) = matches.subcommand() {
        log::info!("Making a template config at {}...", config_path.display());
        match make_template_config(&config_path) {
            Ok(()) => log::info!("Done."),
            Err(e) => log::error!("Could not write the template config: {e}"),
        }
        return;
    }

    let Some(input_path) = matches.get_one::<PathBuf>("input").cloned() else {
        log::error!("An input file is required to process data (use -i/--input)");
        return;
    };
    let output_dir = match matches.get_one::<PathBuf>("output-dir") {
        Some(dir) => dir.clone(),
        None => input_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
    };
    let range = IdRange::new(
        matches.get_one::<u32>("start-id").copied().unwrap_or(0),
        matches.get_one::<u32>("end-id").copied(),
    );

    // Load our config
    log::info!("Loading config from {}...", config_path.display());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Boards: {:?}", config.board_id_order);
    log::info!("Calibration: {}", config.calibration_path.display());
    log::info!("Input: {}", input_path.display());
    log::info!("Output directory: {}", output_dir.display());
    log::info!("Event ids: {} to {:?}", range.start, range.end);

    // Fail early, before spawning anything
    if let Err(e) = load_run_setup(&config) {
        log::error!("{e}");
        return;
    }

    // Setup the progress bar
    let pb = pb_manager.add(ProgressBar::new(100));
    if let Ok(style) =
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% [{elapsed_precise}] {msg}")
    {
        pb.set_style(style);
    }
    let (tx, rx) = channel();
    // Spawn the task!
    let handle =
        std::thread::spawn(move || process(&config, &input_path, &output_dir, range, tx));

    // The channel closes when the worker drops its sender
    for status in rx.iter() {
        pb.set_position((status.progress * 100.0) as u64);
        pb.set_message(format!("{} events", status.events_processed));
    }

    match handle.join() {
        Ok(Ok(summary)) => log::info!(
            "Successfully processed {} events ({} triggers).",
            summary.n_events,
            summary.n_triggers
        ),
        Ok(Err(e)) => log::error!("Processing failed with error: {e}"),
        Err(_) => log::error!("Failed to join processing task!"),
    }

    pb.finish();

    log::info!("Done.");
}
