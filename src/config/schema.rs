use crate::codec::Version;
use crate::patcher::{BytePatch, ReplacePlan};
use crate::pattern::{ReplacePattern, SearchPattern};
use serde::Deserialize;
use std::fmt;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchConfig {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub patches: Vec<PatchDefinition>,
}

impl PatchConfig {
    /// Check every patch without touching the filesystem, collecting all issues.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.patches.is_empty() {
            issues.push(ValidationIssue::EmptyPatchList);
        }

        for version in &self.meta.versions {
            if let Err(err) = version.parse::<Version>() {
                issues.push(ValidationIssue::InvalidVersion {
                    value: version.clone(),
                    message: err.to_string(),
                });
            }
        }

        for patch in &self.patches {
            let patch_id = (!patch.id.trim().is_empty()).then(|| patch.id.clone());
            if patch_id.is_none() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: None,
                    field: "id",
                });
            }
            if patch.file.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: patch_id.clone(),
                    field: "file",
                });
            }

            match &patch.operation {
                Operation::Byte {
                    address,
                    expected,
                    new,
                } => {
                    for (field, value) in [
                        ("operation.address", address),
                        ("operation.expected", expected),
                        ("operation.new", new),
                    ] {
                        if value.trim().is_empty() {
                            issues.push(ValidationIssue::MissingField {
                                patch_id: patch_id.clone(),
                                field,
                            });
                        }
                    }
                    if all_present(address, expected, new) {
                        if let Err(err) = patch.operation.compile() {
                            issues.push(ValidationIssue::InvalidValue {
                                patch_id: patch_id.clone(),
                                message: err,
                            });
                        }
                    }
                }
                Operation::Pattern {
                    search,
                    replace,
                    max_replace_count,
                    ..
                } => {
                    if search.trim().is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: patch_id.clone(),
                            field: "operation.search",
                        });
                    }
                    if replace.trim().is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            patch_id: patch_id.clone(),
                            field: "operation.replace",
                        });
                    }
                    if *max_replace_count == 0 {
                        issues.push(ValidationIssue::InvalidCombo {
                            patch_id: patch_id.clone(),
                            message: "max_replace_count must be at least 1".to_string(),
                        });
                    }
                    if !search.trim().is_empty() && !replace.trim().is_empty() {
                        if let Err(err) = patch.operation.compile() {
                            issues.push(ValidationIssue::InvalidValue {
                                patch_id: patch_id.clone(),
                                message: err,
                            });
                        }
                    }
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

fn all_present(address: &str, expected: &str, new: &str) -> bool {
    [address, expected, new].iter().all(|v| !v.trim().is_empty())
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Target versions this file applies to. Empty means every version.
    #[serde(default)]
    pub versions: Vec<String>,
    /// Resolve each patch `file` against the root directory given at apply time.
    #[serde(default)]
    pub root_relative: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PatchDefinition {
    pub id: String,
    pub file: String,
    pub operation: Operation,
}

fn default_allow_wildcard() -> bool {
    true
}

fn default_max_replace_count() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Operation {
    /// Conditional single-byte write.
    Byte {
        address: String,
        expected: String,
        new: String,
    },
    /// Search-and-replace with wildcard patterns.
    Pattern {
        search: String,
        replace: String,
        #[serde(default = "default_allow_wildcard")]
        allow_wildcard: bool,
        #[serde(default = "default_max_replace_count")]
        max_replace_count: usize,
    },
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Byte { .. } => "byte",
            Operation::Pattern { .. } => "pattern",
        }
    }

    /// Parse the textual operation into its typed form.
    pub fn compile(&self) -> Result<PatchAction, String> {
        match self {
            Operation::Byte {
                address,
                expected,
                new,
            } => BytePatch::parse(address, expected, new)
                .map(PatchAction::Byte)
                .map_err(|e| e.to_string()),
            Operation::Pattern {
                search,
                replace,
                allow_wildcard,
                max_replace_count,
            } => {
                let search = SearchPattern::parse(search, *allow_wildcard)
                    .map_err(|e| format!("search pattern: {e}"))?;
                let replace =
                    ReplacePattern::parse(replace).map_err(|e| format!("replace pattern: {e}"))?;
                let plan = ReplacePlan::new(search, replace).map_err(|e| e.to_string())?;
                Ok(PatchAction::Pattern {
                    plan,
                    max_replace_count: *max_replace_count,
                })
            }
        }
    }
}

/// A validated operation, ready to run against a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchAction {
    Byte(BytePatch),
    Pattern {
        plan: ReplacePlan,
        max_replace_count: usize,
    },
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
    EmptyPatchList,
    MissingField {
        patch_id: Option<String>,
        field: &'static str,
    },
    InvalidCombo {
        patch_id: Option<String>,
        message: String,
    },
    InvalidValue {
        patch_id: Option<String>,
        message: String,
    },
    InvalidVersion {
        value: String,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyPatchList => write!(f, "patch config contains no patches"),
            ValidationIssue::MissingField { patch_id, field } => match patch_id {
                Some(id) => write!(f, "patch '{id}' missing required field '{field}'"),
                None => write!(f, "patch missing required field '{field}'"),
            },
            ValidationIssue::InvalidCombo { patch_id, message } => match patch_id {
                Some(id) => write!(f, "patch '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid patch configuration: {message}"),
            },
            ValidationIssue::InvalidValue { patch_id, message } => match patch_id {
                Some(id) => write!(f, "patch '{id}' has an invalid value: {message}"),
                None => write!(f, "invalid patch value: {message}"),
            },
            ValidationIssue::InvalidVersion { value, message } => {
                write!(f, "meta.versions entry '{value}' is invalid: {message}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> PatchConfig {
        toml_edit::de::from_str(input).unwrap()
    }

    #[test]
    fn test_pattern_defaults() {
        let config = parse(
            r#"
[[patches]]
id = "p"
file = "a.dll"
[patches.operation]
type = "pattern"
search = "4D ?? 4B"
replace = "?? 00 ??"
"#,
        );
        assert_eq!(
            config.patches[0].operation,
            Operation::Pattern {
                search: "4D ?? 4B".to_string(),
                replace: "?? 00 ??".to_string(),
                allow_wildcard: true,
                max_replace_count: 1,
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_collects_every_issue() {
        let config = parse(
            r#"
[meta]
versions = ["4.0.2"]

[[patches]]
id = ""
file = ""
[patches.operation]
type = "byte"
address = "0x10"
expected = "zz"
new = "31"

[[patches]]
id = "short"
file = "a.dll"
[patches.operation]
type = "pattern"
search = "4D ?? 4B"
replace = "00"
max_replace_count = 0
"#,
        );
        let err = config.validate().unwrap_err();
        let kinds: Vec<_> = err
            .issues
            .iter()
            .map(|issue| match issue {
                ValidationIssue::EmptyPatchList => "empty",
                ValidationIssue::MissingField { .. } => "missing",
                ValidationIssue::InvalidCombo { .. } => "combo",
                ValidationIssue::InvalidValue { .. } => "value",
                ValidationIssue::InvalidVersion { .. } => "version",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["version", "missing", "missing", "value", "combo", "value"]
        );
    }

    #[test]
    fn test_wildcards_disabled_is_invalid() {
        let config = parse(
            r#"
[[patches]]
id = "strict"
file = "a.dll"
[patches.operation]
type = "pattern"
search = "4D ?? 4B"
replace = "00 00 00"
allow_wildcard = false
"#,
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("wildcards are disabled"));
    }

    #[test]
    fn test_compile_byte() {
        let op = Operation::Byte {
            address: "0x1A2B3C".to_string(),
            expected: "85".to_string(),
            new: "31".to_string(),
        };
        assert_eq!(
            op.compile().unwrap(),
            PatchAction::Byte(BytePatch::new(0x1A2B3C, 0x85, 0x31))
        );
        assert_eq!(op.kind(), "byte");
    }
}
