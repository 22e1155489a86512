use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (bad tolerance, threshold, layer set, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// A layer number outside 1..=8.
    #[error("unknown layer: {0} (layers are numbered 1-8)")]
    UnknownLayer(u8),
    /// Two records in one source share an identifier.
    #[error("{source_name} source: duplicate record id '{record_id}'")]
    DuplicateRecordId { source_name: String, record_id: String },
    /// Missing required column in input data.
    #[error("{source_name} source: missing column '{column}'")]
    MissingColumn { source_name: String, column: String },
    /// A source table is required but absent from the config.
    #[error("config has no [{0}] source")]
    MissingSource(String),
    /// CSV read error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// IO error (file read, etc.).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Run was cancelled between layers. Only layers that actually ran are counted.
    #[error("reconciliation cancelled after {completed_layers} layer(s)")]
    Cancelled { completed_layers: usize },
}
