//! Ward Report Service
//!
//! Aggregation service for geotagged image-classification reports (garbage
//! and mosquito-breeding sightings) submitted per city ward. The query
//! engine turns the flat report collection into the three views the civic
//! dashboard renders: a full listing, per-ward-and-date category counts,
//! and a ward-scoped date-ordered time series.
//!
//! ## Architecture
//!
//! ```text
//! Dashboard                  Query Engine              PostgreSQL
//! ┌──────────────┐          ┌──────────────┐          ┌───────────────┐
//! │ GET /data    │          │ fetch_all    │          │ image_reports │
//! │ GET /image-  │─────────▶│ count_by_    │─────────▶│               │
//! │     count    │          │  ward_and_   │          └───────────────┘
//! │ GET /ward-   │          │  date        │
//! │  image-count │          │ time_series_ │
//! └──────────────┘          │  by_ward     │
//!                           └──────────────┘
//! ```
//!
//! The engine only ever reaches the database through the [`RecordStore`]
//! trait, so it tests against a mock and stays ignorant of SQL. All three
//! operations are stateless reads; validation failures short-circuit
//! before the store is touched.

pub mod api;
pub mod config;
pub mod query_engine;
pub mod record_store;

pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use query_engine::{QueryEngine, QueryError, TimeSeriesPoint, WardDateCounts};
pub use record_store::{
    GroupKey, GroupedCount, ImageRecord, PgRecordStore, RecordFilter, RecordStore, StoreError,
};
