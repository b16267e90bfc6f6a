use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmberError {
    #[error("GPU device error: {0}")]
    GpuDevice(String),

    #[error("GPU readback error: {0}")]
    Readback(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type Result<T> = std::result::Result<T, EmberError>;
