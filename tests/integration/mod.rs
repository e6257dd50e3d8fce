//! Cross-module integration tests: property checks and multi-file patch sets.

mod patch_sets;
mod properties;
