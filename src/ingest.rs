// ! Upload ingestion: decoding, unpacking, normalizing and staging meter exports

pub mod batch;
pub mod error;
pub mod normalizer;
pub mod staging;
pub mod unpacker;
pub mod upload;

// Re-export commonly used items
pub use batch::{prepare_batch, PreparedBatch};
pub use error::IngestError;
pub use normalizer::NormalizedSheet;
pub use staging::{combine_staged, StagedReadings, StagingArea};
pub use unpacker::{unpack, SpreadsheetEntry, SpreadsheetFormat, UploadKind};
pub use upload::{RawUpload, UploadFile};
