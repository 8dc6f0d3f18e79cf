use chrono::Local;
use clap::Parser;
use env_logger::Env;
use log::{error, info, LevelFilter};
use rusty_octal::{
    build_sweep, load_config_or_default, log_setup_info, run_sweep, AppConfig, OctalError,
    ResourceManager, Sweep, SweepContext, TestType,
};
use std::{
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Automated sweep testing for optical chips
#[derive(Parser, Debug)]
#[command(name = "octal-sweep")]
#[command(about = "Run characterization sweeps on an optical chip", long_about = None)]
struct Args {
    /// Test type: passive, dc, iv or amp
    #[arg(short, long, value_name = "TEST")]
    test: TestType,

    /// Path to configuration file (defaults to octal.toml or config/sweep_config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Sweep function to run, e.g. run_simple (overrides general.func)
    #[arg(short, long, value_name = "NAME")]
    func: Option<String>,

    /// Base name of the result files (overrides general.fname)
    #[arg(long, value_name = "NAME")]
    fname: Option<String>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Run against simulated instruments instead of the bench
    #[arg(long)]
    simulate: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut config = load_config_or_default(args.config.as_deref())?;

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.general.log_level.clone());
    initialize_logging(&log_level)?;

    apply_overrides(&mut config, &args);
    log_startup_info(&config, args.config.as_deref(), args.simulate);

    let shutdown_flag = setup_shutdown_handler()?;
    let rm = ResourceManager::new()
        .with_config(config.connection.clone())
        .simulated(args.simulate);
    let ctx = SweepContext::from_config(&config, rm)
        .with_shutdown(shutdown_flag.clone())
        .with_interactive(!args.simulate);

    let mut sweep = build_sweep(args.test, &config, ctx);
    let func = match config.general.func.trim() {
        "" => sweep.default_function().to_string(),
        name => name.to_string(),
    };
    log_setup_info(args.test, &config, &func)?;

    if !args.simulate {
        wait_for_user_confirmation()?;
    }

    run_and_report(sweep.as_mut(), &func, shutdown_flag)
}

// Helper Functions

/// Command line values win over the configuration file; a missing file
/// name becomes a timestamp.
fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(func) = &args.func {
        config.general.func = func.clone();
    }
    if let Some(fname) = &args.fname {
        config.general.fname = fname.clone();
    }
    if config.general.fname.trim().is_empty() {
        config.general.fname = Local::now().format("%Y%m%d_%H%M%S").to_string();
    }
}

/// Log startup information
fn log_startup_info(config: &AppConfig, config_path: Option<&Path>, simulate: bool) {
    info!("=== Rusty Octal Sweep Tool ===");
    match config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: default search path"),
    }
    info!("Output: {}/{}", config.general.folder, config.general.fname);
    if simulate {
        info!("Instruments: simulated");
    }
}

/// Setup Ctrl+C handler for graceful shutdown
fn setup_shutdown_handler() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_clone = shutdown_flag.clone();

    ctrlc::set_handler(move || {
        info!("Ctrl+C received - stopping after the current step...");
        shutdown_flag_clone.store(true, Ordering::SeqCst);
    })?;

    Ok(shutdown_flag)
}

/// Run the sweep and report results
fn run_and_report(
    sweep: &mut dyn Sweep,
    func: &str,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting {}::{}...", sweep.name(), func);

    match run_sweep(sweep, func) {
        Ok(()) => {
            info!("✓ Sweep completed successfully!");
            Ok(())
        }
        Err(OctalError::Aborted) if shutdown_flag.load(Ordering::SeqCst) => {
            info!("✓ Sweep stopped by user, instruments left safe");
            Ok(())
        }
        Err(e) => {
            error!("✗ Sweep failed: {}", e);
            Err(e.into())
        }
    }
}

/// Wait for user confirmation before proceeding
fn wait_for_user_confirmation() -> Result<(), Box<dyn std::error::Error>> {
    println!();
    println!("Press Enter to start the sweep (or Ctrl+C to cancel)...");
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(())
}

/// Initialize logging with configurable level
fn initialize_logging(log_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            eprintln!("Warning: Invalid log level '{}', using 'info'", log_level);
            LevelFilter::Info
        }
    };

    env_logger::Builder::from_env(Env::default())
        .filter_level(level)
        .format_timestamp_millis()
        .try_init()?;

    Ok(())
}
