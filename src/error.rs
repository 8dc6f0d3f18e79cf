use thiserror::Error;

#[derive(Error, Debug)]
pub enum OctalError {
    #[error("IO error: {context}: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
    #[error("Instrument timeout")]
    Timeout,
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid resource address: {0}")]
    InvalidAddress(String),
    #[error("{name} out of range: {value} not in [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("Invalid {name}: '{value}', expected one of {choices:?}")]
    InvalidChoice {
        name: String,
        value: String,
        choices: Vec<String>,
    },
    #[error("Missing instrument address: {0}")]
    MissingInstrument(String),
    #[error("Unknown sweep function '{func}' for {sweep}")]
    UnknownFunction { sweep: String, func: String },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Excel error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Analysis error: {0}")]
    Analysis(String),
    #[error("Export error: {0}")]
    Export(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Sweep aborted by user")]
    Aborted,
}

impl From<std::io::Error> for OctalError {
    fn from(source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => OctalError::Timeout,
            _ => OctalError::Io {
                source,
                context: "I/O operation".to_string(),
            },
        }
    }
}

impl OctalError {
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        OctalError::Io {
            source,
            context: context.into(),
        }
    }
}
