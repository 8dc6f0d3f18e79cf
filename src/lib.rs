pub mod analysis;
pub mod config;
pub mod error;
pub mod export;
pub mod info;
pub mod instrument;
pub mod instruments;
pub mod plotting;
pub mod recorder;
pub mod stability;
pub mod sweeps;
pub mod table;
pub mod transport;
pub mod utils;

pub use analysis::{iloss_coeffs, linear_fit, power_to_loss_db, LinearModel};
pub use config::{load_config, load_config_or_default, AppConfig, InstrAddr, InstrumentAddresses};
pub use error::OctalError;
pub use export::{export_info_csv, export_to_csv, export_to_excel, read_csv, Sheet};
pub use info::{log_setup_info, SweepTestInfo};
pub use instrument::ScpiInstrument;
pub use plotting::{plot_table, plot_values, plot_xy};
pub use recorder::SweepRecorder;
pub use stability::{wait_for_stable, Settled, StabilityCriterion};
pub use sweeps::{
    build_sweep, run_sweep, AmpSweeps, DcSweeps, ILossSweep, IvSweeps, LaserSweepConfig,
    Sweep, SweepContext, SweepRange, TestType,
};
pub use table::MeasurementTable;
pub use transport::{
    ConnectionConfig, ResourceAddress, ResourceManager, SimBench, SimTransport, Transport,
};
