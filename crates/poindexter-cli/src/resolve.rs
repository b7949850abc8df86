//! Project/task ID parsing shared by several commands.

use anyhow::{Context, Result};
use uuid::Uuid;

/// Parse `input` as a UUID, producing a command-appropriate error message
/// on failure.
pub fn resolve_project_id(input: &str) -> Result<Uuid> {
    Uuid::parse_str(input).with_context(|| format!("invalid project ID: {input:?}"))
}
