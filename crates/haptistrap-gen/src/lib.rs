//! Strap mesh generation: parameter checks, per-client admission, and the
//! external compiler run that turns parameters into an STL artifact.

pub mod archive;
pub mod generator;
pub mod params;
pub mod rate_limit;

pub use archive::{ArchiveError, ArchiveOutcome, archive_artifact};
pub use generator::{
    ARTIFACT_EXTENSION, ARTIFACT_PREFIX, Artifact, ArtifactGenerator, CompilerCommand,
    GenerationError, GenerationOutcome, GeneratorConfig, STL_MEDIA_TYPE, artifact_filename,
};
pub use params::{
    DEFAULT_SPRING_THICKNESS, DEFAULT_STRAP_WIDTH, GenerationParams, ValidationError,
};
pub use rate_limit::{Clock, DEFAULT_WINDOW, RateLimitExceeded, RateLimiter, SystemClock};
