//! Archive intake for uploaded diagnostic archives
//!
//! Turns an untrusted upload stream into a [`StagedArchive`]:
//!
//! ```text
//! body ─► size checks ─► staged file ─► tar/gzip reader ─► ArchiveContents
//!                            │                                  │
//!                            └──── removed on drop ◄────────────┴─► ClusterId
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use iop_archive::{ArchiveIntake, IntakeConfig, Upload};
//!
//! let intake = ArchiveIntake::new(IntakeConfig::default());
//! let staged = intake.accept(Upload::new("req-1", body).with_file_name("a.tar.gz"))?;
//! println!("cluster {}", staged.cluster_id());
//! // staged file is deleted here
//! ```

pub mod cluster;
pub mod contents;
pub mod error;
pub mod intake;
pub mod staged;

pub use cluster::{ArchiveMetadata, ClusterId};
pub use contents::{ArchiveContents, UnpackLimits, GATHER_DIRS};
pub use error::IntakeError;
pub use intake::{
    ArchiveIntake, IntakeConfig, Upload, ACCEPTED_EXTENSIONS, DEFAULT_MAX_UPLOAD_SIZE, DEFAULT_STAGING_DIR,
    UNPACKED_SIZE_RATIO,
};
pub use staged::StagedArchive;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    pub use crate::cluster::ClusterId;
    pub use crate::contents::ArchiveContents;
    pub use crate::error::IntakeError;
    pub use crate::intake::{ArchiveIntake, IntakeConfig, Upload};
    pub use crate::staged::StagedArchive;
}
