//! Block Patcher: anchor-disambiguated block replacement for source files
//!
//! Replaces one marker-delimited block of a text file with new literal
//! text. Markers usually repeat throughout a file, so the target block is
//! pinned by an anchor substring: the start marker is the nearest one before
//! the anchor, the end marker the nearest one after it.
//!
//! # Architecture
//!
//! - [`locate`]: the pure locator. Buffer in, byte span (or new buffer) out.
//! - [`edit`]: verified byte-span replacement with atomic file writes.
//! - [`config`]: patch definitions (TOML or CLI) and the applicator that
//!   plans, checks and commits a patch.
//! - [`safety`]: optional workspace boundary for patch targets.
//!
//! # Safety
//!
//! - Nothing is written unless the anchor, start marker and end marker all
//!   resolve
//! - The located block is re-verified immediately before writing
//! - Atomic file writes (tempfile + fsync + rename)
//! - Idempotent: a block that already equals the replacement is left alone
//!
//! # Example
//!
//! ```
//! use block_patcher::locate_and_replace;
//!
//! let buffer = "<box>A</box> <box> anchor </box>";
//! let patched = locate_and_replace(buffer, "anchor", "<box>", "</box>", "<box>B</box>")?;
//! assert_eq!(patched, "<box>A</box> <box>B</box>");
//! # Ok::<(), block_patcher::LocateError>(())
//! ```

pub mod config;
pub mod edit;
pub mod locate;
pub mod safety;

// Re-exports
pub use config::{
    apply_patch, check_patch, load_from_path, load_from_str, plan_patch, ApplicationError,
    ConfigError, PatchConfig, PatchPlan, PatchResult, Replacement, Workspace,
};
pub use edit::{Edit, EditError, EditResult, EditVerification};
pub use locate::{
    extract_block, locate_and_replace, locate_block, locate_unique_block, replace_span,
    suggest_anchor, AnchorHint, BlockMarkers, BlockSpan, LocateError,
};
pub use safety::{SafetyError, WorkspaceGuard};
