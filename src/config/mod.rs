pub mod applicator;
pub mod loader;
pub mod schema;
pub mod version;

pub use applicator::{apply_patches, check_patches, ApplicationError, PatchResult};
pub use loader::{load_from_path, load_from_str, ConfigError};
pub use schema::{
    Metadata, Operation, PatchAction, PatchConfig, PatchDefinition, ValidationError,
    ValidationIssue,
};
pub use version::{matches_version, VersionError};
