pub mod applicator;
pub mod loader;
pub mod schema;

pub use applicator::{
    apply_patch, check_patch, commit_plan, load_replacement, locate_target, plan_patch,
    ApplicationError, LocatedBlock, PatchPlan, PatchResult, Workspace,
};
pub use loader::{load_from_path, load_from_str, ConfigError};
pub use schema::{
    Metadata, PatchConfig, PatchDefinition, Replacement, ReplacementSource, ValidationError,
    ValidationIssue,
};
