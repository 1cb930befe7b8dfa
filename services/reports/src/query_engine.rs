use crate::record_store::{GroupKey, ImageRecord, RecordFilter, RecordStore, StoreError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{instrument, warn};

/// Classification tags the aggregations break out into named counts.
/// Records carrying any other tag still flow through `fetch_all` but are
/// dropped from the two-category shapes.
pub const GARBAGE_TYPE: &str = "garbage";
pub const MOSQUITO_TYPE: &str = "mosquito";

/// Garbage/mosquito totals for one ward and date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WardDateCounts {
    pub garbage_count: i64,
    pub mosquito_count: i64,
}

/// One time-series entry: per-type totals for a single observed date
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesPoint {
    pub date: String,
    pub garbage_count: i64,
    pub mosquito_count: i64,
}

/// Query failure taxonomy
///
/// Validation failures are raised before any store round-trip; backend
/// failures carry the store error through unchanged. Empty result sets
/// are never errors.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Backend(#[from] StoreError),
}

/// Read-only aggregation engine over the record store
///
/// Every operation is a stateless single-pass read; the engine holds no
/// state across calls, never retries, and never caches.
pub struct QueryEngine {
    store: Arc<dyn RecordStore>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Every record, unfiltered, in whatever order the store yields
    #[instrument(skip(self))]
    pub async fn fetch_all(&self) -> Result<Vec<ImageRecord>, QueryError> {
        metrics::counter!("reports.queries.fetch_all").increment(1);

        let records = self.store.retrieve_all().await?;
        Ok(records)
    }

    /// Garbage and mosquito report counts for one ward on one date
    ///
    /// Issues two independent exact-match counts. They are not a single
    /// atomic snapshot; under concurrent writes the two counts may
    /// reflect slightly different points in time.
    #[instrument(skip(self))]
    pub async fn count_by_ward_and_date(
        &self,
        ward: &str,
        date: &str,
    ) -> Result<WardDateCounts, QueryError> {
        if ward.is_empty() || date.is_empty() {
            return Err(QueryError::Validation(
                "ward and date are required".to_string(),
            ));
        }

        metrics::counter!("reports.queries.image_count").increment(1);

        let garbage_count = self
            .store
            .count_matching(&RecordFilter {
                ward: Some(ward.to_string()),
                date: Some(date.to_string()),
                record_type: Some(GARBAGE_TYPE.to_string()),
            })
            .await?;

        let mosquito_count = self
            .store
            .count_matching(&RecordFilter {
                ward: Some(ward.to_string()),
                date: Some(date.to_string()),
                record_type: Some(MOSQUITO_TYPE.to_string()),
            })
            .await?;

        Ok(WardDateCounts {
            garbage_count,
            mosquito_count,
        })
    }

    /// Date-ordered per-type counts for one ward
    ///
    /// Two-stage group-then-pivot: the store first groups the ward's
    /// records by `(date, type)` into pair counts, then the engine
    /// re-groups those pair counts by date and fills in a zero for
    /// whichever of the two tracked types a date is missing. Dates with
    /// no records at all are absent, not zero-filled.
    ///
    /// Ordering is ascending lexicographic on the date string. That is
    /// chronological only for zero-padded `YYYY-MM-DD`-style labels, a
    /// constraint on the producer that this engine deliberately does not
    /// paper over by parsing dates.
    #[instrument(skip(self))]
    pub async fn time_series_by_ward(
        &self,
        ward: &str,
    ) -> Result<Vec<TimeSeriesPoint>, QueryError> {
        if ward.is_empty() {
            return Err(QueryError::Validation("ward is required".to_string()));
        }

        metrics::counter!("reports.queries.ward_time_series").increment(1);

        // Stage one: per-(date, type) pair counts, ward-restricted.
        let groups = self
            .store
            .group_and_count(&[GroupKey::Date, GroupKey::Type], &RecordFilter::ward(ward))
            .await?;

        // Stage two: pivot the pair counts into per-date cell lists. The
        // BTreeMap keys iterate in ascending lexicographic order, which
        // is the required date order.
        let mut by_date: BTreeMap<String, Vec<(String, i64)>> = BTreeMap::new();
        for group in groups {
            let [date, record_type]: [String; 2] = match group.keys.try_into() {
                Ok(pair) => pair,
                // Cannot happen for the keys passed above; a store that
                // violates its grouping contract gets logged, not trusted.
                Err(keys) => {
                    warn!(
                        key_count = keys.len(),
                        "Dropping group with unexpected key arity"
                    );
                    continue;
                }
            };
            by_date
                .entry(date)
                .or_default()
                .push((record_type, group.count));
        }

        let series = by_date
            .into_iter()
            .map(|(date, cells)| TimeSeriesPoint {
                date,
                garbage_count: cell_count(&cells, GARBAGE_TYPE),
                mosquito_count: cell_count(&cells, MOSQUITO_TYPE),
            })
            .collect();

        Ok(series)
    }
}

/// Count recorded for `record_type` in a pivoted date bucket, zero when
/// the type did not appear on that date
fn cell_count(cells: &[(String, i64)], record_type: &str) -> i64 {
    cells
        .iter()
        .find(|(cell_type, _)| cell_type == record_type)
        .map(|(_, count)| *count)
        .unwrap_or(0)
}
