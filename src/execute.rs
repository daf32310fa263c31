//! Bounded execution of validated statements.
use std::sync::Arc;
use std::time::Duration;

use crate::error::PipelineError;
use crate::safety::ValidatedQuery;
use crate::store::{DataStore, ResultSet};

/// Row threshold above which a result is not summarized.
pub const DEFAULT_MAX_ROWS: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Success(ResultSet),
    Empty,
    /// More rows than the threshold; carries the total count.
    Oversized(usize),
}

pub struct QueryExecutor {
    store: Arc<dyn DataStore>,
    max_rows: usize,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn DataStore>, max_rows: usize) -> Self {
        Self { store, max_rows }
    }

    /// Run the statement and classify the result size. Only one row past the
    /// threshold is kept in memory; the store still reports the full count.
    pub fn execute(
        &self,
        query: &ValidatedQuery,
        timeout: Duration,
    ) -> Result<QueryOutcome, PipelineError> {
        let result = self
            .store
            .query(query.as_str(), self.max_rows + 1, timeout)
            .map_err(|source| PipelineError::ExecutionFailure {
                statement: query.as_str().to_string(),
                source,
            })?;
        tracing::debug!(row_count = result.total_rows, "statement executed");

        Ok(match result.total_rows {
            0 => QueryOutcome::Empty,
            n if n > self.max_rows => QueryOutcome::Oversized(n),
            _ => QueryOutcome::Success(result),
        })
    }
}
