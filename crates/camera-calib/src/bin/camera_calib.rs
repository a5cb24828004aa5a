use std::io;
use std::path::{Path, PathBuf};

use camera_calib::core::{ImageSourceKind, SettingsIoError};
use camera_calib::keys::TerminalKeys;
use camera_calib::{
    confirm_start, create_settings_file, store, CalibrationSettings, Pipeline, RunError,
    RunOutcome, SettingsFile, SourceError,
};
use clap::{ArgAction, CommandFactory, Parser};

/// Camera calibration from chessboard and circle grid images.
#[derive(Debug, Parser)]
#[command(name = "camera-calib", version, about = "Camera calibration v1.0.0")]
struct Cli {
    /// Interactively create a settings file at this path, then optionally
    /// run a calibration session with it.
    #[arg(short = 'c', long, value_name = "SETTINGS")]
    create: Option<PathBuf>,

    /// Run a calibration session with an existing settings file.
    #[arg(short = 'r', long, value_name = "SETTINGS", conflicts_with = "create")]
    read: Option<PathBuf>,

    /// Minimum number of calibration images (overrides the settings file).
    #[arg(short = 'n', long, allow_negative_numbers = true)]
    number: Option<i64>,

    /// Print the contents of a camera parameters file.
    #[arg(long, value_name = "PARAMS", conflicts_with_all = ["create", "read"])]
    show: Option<PathBuf>,

    /// More log output on stderr (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Emit tracing spans and events as JSON.
    #[cfg(feature = "tracing")]
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(cli: &Cli) {
    #[cfg(feature = "tracing")]
    {
        let _ = tracing_log::LogTracer::init();
        camera_calib::core::init_tracing(cli.json_logs, cli.verbose);
    }
    #[cfg(not(feature = "tracing"))]
    {
        let _ = camera_calib::core::init_with_verbosity(cli.verbose);
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            // --help and --version end up here too
            std::process::exit(if err.use_stderr() { -1 } else { 0 });
        }
    };
    init_logging(&cli);

    if cli.create.is_none() && cli.read.is_none() && cli.show.is_none() {
        let _ = Cli::command().print_help();
        std::process::exit(-1);
    }

    if let Err(err) = try_main(&cli) {
        report(&err);
        println!(" - Session ended.");
        std::process::exit(-1);
    }
}

fn report(err: &RunError) {
    match err {
        RunError::InsufficientImages { required, .. } => {
            println!(" - Insufficient number of calibration images. Required number: {required}.");
        }
        RunError::SettingsIo(e) => {
            println!(" - Unable to get calibration settings from specified file.");
            if let SettingsIoError::Json { source, .. } = e {
                println!(" - {source}");
            }
        }
        RunError::Source(SourceError::Open { reason, .. }) => {
            println!(" - Unable to open specified image source: {reason}.");
        }
        RunError::Source(e) => {
            println!(" - Unable to open specified image source.");
            println!(" - {e}");
        }
        other => println!(" - {other}."),
    }
}

fn load_settings(path: &Path, number: Option<i64>) -> Result<CalibrationSettings, RunError> {
    let raw = SettingsFile::load_json(path)?;
    let mut settings = CalibrationSettings::validate(&raw)?;
    if let Some(n) = number {
        settings = settings.with_required_observation_count(n)?;
    }
    println!(" - Calibration settings have been initialized.");
    Ok(settings)
}

fn try_main(cli: &Cli) -> Result<(), RunError> {
    if let Some(path) = &cli.show {
        let params = store::load(path)?;
        println!("{params}");
        return Ok(());
    }

    let settings_path = match (&cli.create, &cli.read) {
        (Some(path), _) => {
            let stdin = io::stdin();
            let mut input = stdin.lock();
            let mut out = io::stdout();
            create_settings_file(path, &mut input, &mut out)?;
            println!(" - Calibration settings file has been created.");
            if !confirm_start(&mut input, &mut out)? {
                println!(" - Session ended.");
                return Ok(());
            }
            path
        }
        (None, Some(path)) => path,
        (None, None) => return Ok(()),
    };

    let settings = load_settings(settings_path, cli.number)?;
    let pipeline = Pipeline::for_settings(&settings)?;
    let mut out = io::stdout();

    match settings.image_source_kind() {
        ImageSourceKind::Directory => {
            pipeline.run_directory(&settings, &mut out)?;
        }
        ImageSourceKind::Stream => {
            let mut keys = TerminalKeys::new()?;
            let outcome = pipeline.run_stream(&settings, &mut keys, &mut out);
            drop(keys);
            if outcome? == RunOutcome::Aborted {
                log::info!("no calibration performed");
            }
        }
    }

    println!(" - Session ended.");
    Ok(())
}
