//! Patch applicator: locates, checks and commits one block patch.
//!
//! Every operation runs the same pipeline:
//! - resolve the target path (and enforce the workspace guard, if any)
//! - read the file and the replacement text
//! - locate the block pinned by the anchor
//! - compare the block against the replacement for idempotency
//!
//! Only [`apply_patch`] writes, and it writes through [`Edit`] so the file
//! is replaced atomically or not at all.

use crate::config::schema::{PatchConfig, ReplacementSource, ValidationError};
use crate::edit::{Edit, EditError, EditResult};
use crate::locate::{locate_block, locate_unique_block, replace_span, BlockSpan, LocateError};
use crate::safety::{SafetyError, WorkspaceGuard};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Result of applying or checking a patch
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchResult should be checked for success/failure"]
pub enum PatchResult {
    /// Block was replaced and the file written
    Applied { file: PathBuf, bytes_changed: usize },
    /// Block already equals the replacement
    AlreadyApplied { file: PathBuf },
    /// Block was located and differs from the replacement (check only)
    WouldApply { file: PathBuf },
}

impl PatchResult {
    pub fn file(&self) -> &Path {
        match self {
            PatchResult::Applied { file, .. }
            | PatchResult::AlreadyApplied { file }
            | PatchResult::WouldApply { file } => file,
        }
    }
}

impl fmt::Display for PatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchResult::Applied {
                file,
                bytes_changed,
            } => {
                write!(f, "Applied patch to {} ({bytes_changed} bytes)", file.display())
            }
            PatchResult::AlreadyApplied { file } => {
                write!(f, "Already applied to {}", file.display())
            }
            PatchResult::WouldApply { file } => {
                write!(f, "Would apply to {}", file.display())
            }
        }
    }
}

/// Errors during patch application
#[derive(Debug)]
pub enum ApplicationError {
    /// Definition failed validation
    Invalid(ValidationError),
    /// Target file could not be read
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Replacement file could not be read
    Replacement {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Target path rejected by the workspace guard
    Safety(SafetyError),
    /// Block could not be located
    Locate { file: PathBuf, source: LocateError },
    /// Edit application error
    Edit(EditError),
}

impl ApplicationError {
    /// True for read/write failures at the filesystem boundary.
    pub fn is_filesystem(&self) -> bool {
        matches!(
            self,
            ApplicationError::Io { .. }
                | ApplicationError::Replacement { .. }
                | ApplicationError::Edit(EditError::Io(_))
        )
    }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationError::Invalid(e) => write!(f, "invalid patch: {}", e),
            ApplicationError::Io { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            ApplicationError::Replacement { path, source } => {
                write!(
                    f,
                    "failed to read replacement from {}: {}",
                    path.display(),
                    source
                )
            }
            ApplicationError::Safety(e) => write!(f, "unsafe target: {}", e),
            ApplicationError::Locate { file, source } => {
                write!(f, "{} in {}", source, file.display())
            }
            ApplicationError::Edit(e) => write!(f, "edit error: {}", e),
        }
    }
}

impl std::error::Error for ApplicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApplicationError::Invalid(e) => Some(e),
            ApplicationError::Io { source, .. } => Some(source),
            ApplicationError::Replacement { source, .. } => Some(source),
            ApplicationError::Safety(e) => Some(e),
            ApplicationError::Locate { source, .. } => Some(source),
            ApplicationError::Edit(e) => Some(e),
        }
    }
}

impl From<EditError> for ApplicationError {
    fn from(e: EditError) -> Self {
        ApplicationError::Edit(e)
    }
}

impl From<SafetyError> for ApplicationError {
    fn from(e: SafetyError) -> Self {
        ApplicationError::Safety(e)
    }
}

/// Where patch targets live and whether they are fenced in.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    guard: Option<WorkspaceGuard>,
}

impl Workspace {
    /// Targets may be anywhere; `root` only anchors workspace-relative paths.
    pub fn unrestricted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            guard: None,
        }
    }

    /// Targets must resolve inside `root`.
    pub fn guarded(root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        let guard = WorkspaceGuard::new(root)?;
        Ok(Self {
            root: guard.workspace_root().to_path_buf(),
            guard: Some(guard),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Workspace-relative targets join the root; other relative targets join
    /// the current directory before the guard sees them.
    fn resolve(&self, config: &PatchConfig) -> Result<PathBuf, ApplicationError> {
        let file = Path::new(&config.patch.file);
        let path = if config.meta.workspace_relative {
            self.root.join(file)
        } else if file.is_relative() && self.guard.is_some() {
            let cwd = env::current_dir().map_err(|source| ApplicationError::Io {
                path: file.to_path_buf(),
                source,
            })?;
            cwd.join(file)
        } else {
            file.to_path_buf()
        };

        match &self.guard {
            Some(guard) => Ok(guard.validate_path(&path)?),
            None => Ok(path),
        }
    }
}

/// A block located in a freshly read file.
#[derive(Debug, Clone)]
pub struct LocatedBlock {
    pub file: PathBuf,
    pub buffer: String,
    pub span: BlockSpan,
}

impl LocatedBlock {
    pub fn text(&self) -> &str {
        self.span.text(&self.buffer)
    }
}

/// Everything needed to show or commit a patch.
#[derive(Debug, Clone)]
pub struct PatchPlan {
    pub file: PathBuf,
    pub span: BlockSpan,
    pub original: String,
    pub patched: String,
    pub replacement: String,
    pub already_applied: bool,
}

impl PatchPlan {
    /// Block text the plan will replace.
    pub fn block(&self) -> &str {
        self.span.text(&self.original)
    }

    fn to_edit(&self) -> Edit {
        Edit::new(
            &self.file,
            self.span.start,
            self.span.end,
            self.replacement.as_str(),
            self.block(),
        )
    }
}

fn read_target(path: &Path) -> Result<String, ApplicationError> {
    fs::read_to_string(path).map_err(|source| ApplicationError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn find_block(config: &PatchConfig, buffer: &str) -> Result<BlockSpan, LocateError> {
    let markers = config.patch.markers();
    if config.patch.unique_anchor {
        locate_unique_block(buffer, &markers)
    } else {
        locate_block(buffer, &markers)
    }
}

/// Read the target and locate its block without touching the replacement.
pub fn locate_target(
    config: &PatchConfig,
    workspace: &Workspace,
) -> Result<LocatedBlock, ApplicationError> {
    config.validate_target().map_err(ApplicationError::Invalid)?;

    let file = workspace.resolve(config)?;
    let buffer = read_target(&file)?;
    let span = find_block(config, &buffer).map_err(|source| ApplicationError::Locate {
        file: file.clone(),
        source,
    })?;
    debug!(
        file = %file.display(),
        start = span.start,
        end = span.end,
        "block located"
    );

    Ok(LocatedBlock { file, buffer, span })
}

/// Load the replacement text named by the definition.
pub fn load_replacement(config: &PatchConfig) -> Result<String, ApplicationError> {
    config.validate().map_err(ApplicationError::Invalid)?;

    match config.patch.replacement.source() {
        Some(ReplacementSource::Text(text)) => Ok(text.to_string()),
        Some(ReplacementSource::File(file)) => {
            let file = Path::new(file);
            let path = match &config.origin {
                Some(origin) if file.is_relative() => origin.join(file),
                _ => file.to_path_buf(),
            };
            fs::read_to_string(&path)
                .map_err(|source| ApplicationError::Replacement { path, source })
        }
        // unreachable after validate()
        None => Ok(String::new()),
    }
}

/// Locate the block and compute the patched buffer. Never writes.
///
/// A missing anchor is always a locate error, even when the replacement text
/// already appears somewhere in the file.
pub fn plan_patch(
    config: &PatchConfig,
    workspace: &Workspace,
) -> Result<PatchPlan, ApplicationError> {
    let replacement = load_replacement(config)?;
    let file = workspace.resolve(config)?;
    let original = read_target(&file)?;

    let span = find_block(config, &original).map_err(|source| ApplicationError::Locate {
        file: file.clone(),
        source,
    })?;

    let already_applied = span.text(&original) == replacement;
    let patched = if already_applied {
        original.clone()
    } else {
        replace_span(&original, &span, &replacement)
    };

    debug!(
        file = %file.display(),
        start = span.start,
        end = span.end,
        already_applied,
        "patch planned"
    );

    Ok(PatchPlan {
        file,
        span,
        original,
        patched,
        replacement,
        already_applied,
    })
}

/// Report whether the patch would change the file.
pub fn check_patch(
    config: &PatchConfig,
    workspace: &Workspace,
) -> Result<PatchResult, ApplicationError> {
    let plan = plan_patch(config, workspace)?;
    Ok(if plan.already_applied {
        PatchResult::AlreadyApplied { file: plan.file }
    } else {
        PatchResult::WouldApply { file: plan.file }
    })
}

/// Apply a planned patch.
pub fn commit_plan(plan: &PatchPlan) -> Result<PatchResult, ApplicationError> {
    if plan.already_applied {
        return Ok(PatchResult::AlreadyApplied {
            file: plan.file.clone(),
        });
    }

    let result = match plan.to_edit().apply()? {
        EditResult::Applied {
            file,
            bytes_changed,
        } => PatchResult::Applied {
            file,
            bytes_changed,
        },
        EditResult::AlreadyApplied { file } => PatchResult::AlreadyApplied { file },
    };
    info!("{result}");
    Ok(result)
}

/// Locate, replace and write the block.
pub fn apply_patch(
    config: &PatchConfig,
    workspace: &Workspace,
) -> Result<PatchResult, ApplicationError> {
    let plan = plan_patch(config, workspace)?;
    commit_plan(&plan)
}
