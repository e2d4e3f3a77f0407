//! Utility modules

pub mod paths;
pub mod signature;

pub use paths::{
    artifacts_dir, config_path, data_dir, database_path, init_data_dir, log_file_path, logs_dir,
};
pub use signature::{InvalidSignature, MapSignature, SignatureGenerator};
