//! OpsFlow operator error abstractions.

use anyhow::Result;
use thiserror::Error;

pub use opsflow_core::AppError;

/// The errors collected from the independent items of a batch operation.
///
/// Batch operations run every item to completion and surface all failures at once.
#[derive(Debug, Error)]
#[error("{} batch item(s) failed: {}", .0.len(), render_all(.0))]
pub struct JoinedError(pub Vec<anyhow::Error>);

impl JoinedError {
    /// Fold the given item results into a single result.
    pub fn from_results(results: impl IntoIterator<Item = Result<()>>) -> Result<()> {
        let errors: Vec<_> = results.into_iter().filter_map(Result::err).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self(errors).into())
        }
    }
}

fn render_all(errors: &[anyhow::Error]) -> String {
    errors.iter().map(|err| format!("{:#}", err)).collect::<Vec<_>>().join("; ")
}
