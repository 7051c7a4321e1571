use thiserror::Error;

mod ids;
pub use ids::*;

mod track;
pub use track::*;

mod clip;
pub use clip::*;

mod state;
pub use state::*;

mod image;
pub use image::*;

mod provenance;
pub use provenance::*;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("unsupported image version: {0}")]
    UnsupportedImageVersion(u16),
    #[error("invalid bpm: {0}")]
    InvalidBpm(f64),
    #[error("invalid loop region {start}..{end}")]
    InvalidLoop { start: f64, end: f64 },
    #[error("duplicate track: {0}")]
    DuplicateTrack(TrackId),
    #[error("duplicate clip: {0}")]
    DuplicateClip(ClipId),
    #[error("clip {clip} references missing track {track}")]
    MissingTrack { clip: ClipId, track: TrackId },
    #[error("invalid clip range: {0}")]
    InvalidClipRange(ClipId),
}

pub type Result<T> = std::result::Result<T, ProjectError>;
