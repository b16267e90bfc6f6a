use thiserror::Error;

#[derive(Error, Debug)]
pub enum BakeError {
    /// Rejected at registration: unsupported material shape, non-indexed
    /// geometry, mixed material arrays. Nothing has been baked yet.
    #[error("invalid bake configuration: {0}")]
    Configuration(String),

    /// Face count exceeds the reserved atlas capacity.
    #[error("atlas capacity exceeded: {faces} faces, capacity {capacity}")]
    AtlasOverflow { faces: usize, capacity: usize },

    /// A geometry invariant held at registration no longer holds at sample
    /// time. Programmer error, not a transient data issue.
    #[error("geometry invariant broken: {0}")]
    Geometry(String),

    #[error(transparent)]
    Core(#[from] ember_core::EmberError),
}

pub type Result<T> = std::result::Result<T, BakeError>;
