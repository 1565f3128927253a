use crate::locate::BlockMarkers;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

/// A block patch definition, loaded from TOML or built from CLI arguments.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchConfig {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub patch: PatchDefinition,
    /// Directory holding the definition file, if it came from one.
    #[serde(skip)]
    pub origin: Option<PathBuf>,
}

impl PatchConfig {
    /// Build a config from command-line parameters.
    pub fn inline(
        file: impl Into<String>,
        anchor: impl Into<String>,
        start_marker: impl Into<String>,
        end_marker: impl Into<String>,
        replacement: Replacement,
    ) -> Self {
        Self {
            meta: Metadata::default(),
            patch: PatchDefinition {
                id: "inline".to_string(),
                file: file.into(),
                anchor: anchor.into(),
                start_marker: start_marker.into(),
                end_marker: end_marker.into(),
                unique_anchor: false,
                replacement,
            },
            origin: None,
        }
    }

    pub fn with_unique_anchor(mut self, unique: bool) -> Self {
        self.patch.unique_anchor = unique;
        self
    }

    /// Validate everything needed to locate the block.
    pub fn validate_target(&self) -> Result<(), ValidationError> {
        finish(self.target_issues())
    }

    /// Validate the full definition, replacement included.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = self.target_issues();
        if let Err(message) = self.patch.replacement.validate() {
            issues.push(ValidationIssue::InvalidCombo {
                patch_id: self.patch.patch_id(),
                message,
            });
        }
        finish(issues)
    }

    fn target_issues(&self) -> Vec<ValidationIssue> {
        let patch = &self.patch;
        let mut issues = Vec::new();

        if patch.id.trim().is_empty() {
            issues.push(ValidationIssue::MissingField {
                patch_id: None,
                field: "id",
            });
        }

        let required = [
            ("file", patch.file.trim()),
            ("anchor", patch.anchor.as_str()),
            ("start_marker", patch.start_marker.as_str()),
            ("end_marker", patch.end_marker.as_str()),
        ];
        for (field, value) in required {
            if value.is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: patch.patch_id(),
                    field,
                });
            }
        }

        issues
    }
}

fn finish(issues: Vec<ValidationIssue>) -> Result<(), ValidationError> {
    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { issues })
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Resolve `patch.file` against the workspace root instead of the cwd
    #[serde(default)]
    pub workspace_relative: bool,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub anchor: String,
    #[serde(default)]
    pub start_marker: String,
    #[serde(default)]
    pub end_marker: String,
    /// Refuse to patch when the anchor occurs more than once
    #[serde(default)]
    pub unique_anchor: bool,
    #[serde(default)]
    pub replacement: Replacement,
}

impl PatchDefinition {
    pub fn markers(&self) -> BlockMarkers<'_> {
        BlockMarkers::new(&self.anchor, &self.start_marker, &self.end_marker)
    }

    fn patch_id(&self) -> Option<String> {
        let id = self.id.trim();
        (!id.is_empty()).then(|| id.to_string())
    }
}

/// Where the replacement block comes from. Exactly one field must be set.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Replacement {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementSource<'a> {
    Text(&'a str),
    File(&'a str),
}

impl Replacement {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            file: None,
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self {
            text: None,
            file: Some(path.into()),
        }
    }

    pub fn source(&self) -> Option<ReplacementSource<'_>> {
        match (&self.text, &self.file) {
            (Some(text), None) => Some(ReplacementSource::Text(text)),
            (None, Some(file)) => Some(ReplacementSource::File(file)),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match (&self.text, &self.file) {
            (Some(_), Some(_)) => {
                Err("replacement must set only one of 'text' or 'file'".to_string())
            }
            (None, None) => Err("replacement must set one of 'text' or 'file'".to_string()),
            (None, Some(file)) if file.trim().is_empty() => {
                Err("replacement 'file' must not be empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    MissingField {
        patch_id: Option<String>,
        field: &'static str,
    },
    InvalidCombo {
        patch_id: Option<String>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingField { patch_id, field } => match patch_id {
                Some(id) => write!(f, "patch '{id}' missing required field '{field}'"),
                None => write!(f, "patch missing required field '{field}'"),
            },
            ValidationIssue::InvalidCombo { patch_id, message } => match patch_id {
                Some(id) => write!(f, "patch '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid patch configuration: {message}"),
            },
        }
    }
}
