use clap::Parser;
use env_logger::Env;
use log::info;
use rusty_octal::{plot_table, read_csv};
use std::path::PathBuf;

/// Terminal plots of sweep result files
#[derive(Parser, Debug)]
#[command(name = "octal-plot")]
#[command(about = "Plot columns of a result CSV against its first column", long_about = None)]
struct Args {
    /// Result CSV to read
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Columns to plot (all but the first when omitted)
    #[arg(short, long, value_name = "NAME", num_args = 1..)]
    columns: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", default_value = "warn")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(&args.log_level))
        .format_timestamp_millis()
        .init();

    let table = read_csv(&args.file)?;
    info!(
        "Read {} columns, {} rows from {}",
        table.width(),
        table.len(),
        args.file.display()
    );
    plot_table(&table, &args.columns)?;
    Ok(())
}
