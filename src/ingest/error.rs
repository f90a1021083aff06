use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unsupported file type: {0} (expected .xlsx, .xlsm, .xls, .ods, .csv or .zip)")]
    UnsupportedFileType(String),

    #[error("Malformed input in {file}: {msg}")]
    MalformedInput { file: String, msg: String },

    #[error("Schema violation in {file}: {msg}")]
    SchemaViolation { file: String, msg: String },

    #[error("Staging I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Ingest task failed: {0}")]
    Task(String),
}

impl IngestError {
    pub fn malformed(file: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::MalformedInput {
            file: file.into(),
            msg: msg.into(),
        }
    }

    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
