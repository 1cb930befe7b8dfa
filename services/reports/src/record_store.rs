use crate::config::DatabaseConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Row};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};

#[cfg(test)]
use mockall::automock;

/// A single geotagged classification report
///
/// Serialized camelCase on the wire, matching what the dashboard expects.
/// `date` is an opaque string label; it is stored, compared and sorted as
/// text. Chronological ordering only holds when the producer writes a
/// fixed-width zero-padded format such as `YYYY-MM-DD`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    /// Reference to externally stored image content; not interpreted here
    pub image_url: String,
    /// Observation date label (see type-level note on ordering)
    pub date: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Administrative ward identifier; any string is accepted
    pub ward: String,
    /// Classification tag; `garbage` and `mosquito` are the values the
    /// aggregations know about, anything else passes through `retrieve_all`
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub record_type: String,
    /// Carried on the record but never read by the aggregations, which
    /// always count matching rows instead of summing this field
    pub count: i64,
}

/// Exact-match predicate over record fields; unset fields match anything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub ward: Option<String>,
    pub date: Option<String>,
    pub record_type: Option<String>,
}

impl RecordFilter {
    pub fn ward(ward: &str) -> Self {
        Self {
            ward: Some(ward.to_string()),
            ..Default::default()
        }
    }
}

/// Fields the store can group by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKey {
    Ward,
    Date,
    Type,
}

impl GroupKey {
    fn column(self) -> &'static str {
        match self {
            GroupKey::Ward => "ward",
            GroupKey::Date => "date",
            GroupKey::Type => "type",
        }
    }
}

/// One distinct combination of group-key values and its record count.
/// `keys` holds the values in the same order as the `group_by` argument.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedCount {
    pub keys: Vec<String>,
    pub count: i64,
}

/// Store-level failure; wraps the driver error without interpretation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database query failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Query contract the engine consumes; the concrete store is injected at
/// construction, never reached through process-global state
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Full scan in store order, no pagination
    async fn retrieve_all(&self) -> Result<Vec<ImageRecord>, StoreError>;

    /// Count of records whose fields equal every set filter field
    async fn count_matching(&self, filter: &RecordFilter) -> Result<i64, StoreError>;

    /// Count of filtered records per distinct combination of the group
    /// keys. No ordering guarantee on the returned groups.
    async fn group_and_count(
        &self,
        group_by: &[GroupKey],
        filter: &RecordFilter,
    ) -> Result<Vec<GroupedCount>, StoreError>;
}

/// PostgreSQL-backed record store over the `image_reports` table
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Connect a pooled store using the database configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool (for health checks)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn retrieve_all(&self) -> Result<Vec<ImageRecord>, StoreError> {
        let records = sqlx::query_as::<_, ImageRecord>(
            r#"
            SELECT image_url, date, latitude, longitude, ward, type, count
            FROM image_reports
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    #[instrument(skip(self))]
    async fn count_matching(&self, filter: &RecordFilter) -> Result<i64, StoreError> {
        let sql = build_count_sql(filter);

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        if let Some(ref ward) = filter.ward {
            query = query.bind(ward);
        }
        if let Some(ref date) = filter.date {
            query = query.bind(date);
        }
        if let Some(ref record_type) = filter.record_type {
            query = query.bind(record_type);
        }

        let count = query.fetch_one(&self.pool).await?;

        Ok(count)
    }

    #[instrument(skip(self))]
    async fn group_and_count(
        &self,
        group_by: &[GroupKey],
        filter: &RecordFilter,
    ) -> Result<Vec<GroupedCount>, StoreError> {
        let sql = build_group_sql(group_by, filter);

        let mut query = sqlx::query(&sql);
        if let Some(ref ward) = filter.ward {
            query = query.bind(ward);
        }
        if let Some(ref date) = filter.date {
            query = query.bind(date);
        }
        if let Some(ref record_type) = filter.record_type {
            query = query.bind(record_type);
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            let keys = (0..group_by.len())
                .map(|i| row.try_get::<String, _>(i))
                .collect::<Result<Vec<_>, _>>()?;
            let count = row.try_get::<i64, _>(group_by.len())?;
            groups.push(GroupedCount { keys, count });
        }

        Ok(groups)
    }
}

/// Append the exact-match predicate as numbered placeholders, one per set
/// filter field, in the fixed ward/date/type bind order
fn push_filter_predicate(sql: &mut String, filter: &RecordFilter) {
    let mut param_count = 0;

    if filter.ward.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND ward = ${}", param_count));
    }
    if filter.date.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND date = ${}", param_count));
    }
    if filter.record_type.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND type = ${}", param_count));
    }
}

fn build_count_sql(filter: &RecordFilter) -> String {
    let mut sql = String::from("SELECT COUNT(*) FROM image_reports WHERE 1=1");
    push_filter_predicate(&mut sql, filter);
    sql
}

fn build_group_sql(group_by: &[GroupKey], filter: &RecordFilter) -> String {
    let columns: Vec<&str> = group_by.iter().map(|k| k.column()).collect();
    let column_list = columns.join(", ");

    let mut sql = format!(
        "SELECT {}, COUNT(*) FROM image_reports WHERE 1=1",
        column_list
    );
    push_filter_predicate(&mut sql, filter);
    sql.push_str(&format!(" GROUP BY {}", column_list));
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_sql_binds_only_set_fields() {
        let filter = RecordFilter {
            ward: Some("A".to_string()),
            date: None,
            record_type: Some("garbage".to_string()),
        };

        assert_eq!(
            build_count_sql(&filter),
            "SELECT COUNT(*) FROM image_reports WHERE 1=1 AND ward = $1 AND type = $2"
        );
    }

    #[test]
    fn count_sql_with_empty_filter_counts_everything() {
        assert_eq!(
            build_count_sql(&RecordFilter::default()),
            "SELECT COUNT(*) FROM image_reports WHERE 1=1"
        );
    }

    #[test]
    fn group_sql_preserves_key_order() {
        let filter = RecordFilter::ward("A");

        assert_eq!(
            build_group_sql(&[GroupKey::Date, GroupKey::Type], &filter),
            "SELECT date, type, COUNT(*) FROM image_reports WHERE 1=1 AND ward = $1 GROUP BY date, type"
        );
    }

    #[test]
    fn ward_filter_shorthand_sets_only_ward() {
        let filter = RecordFilter::ward("Shivajinagar");

        assert_eq!(filter.ward.as_deref(), Some("Shivajinagar"));
        assert_eq!(filter.date, None);
        assert_eq!(filter.record_type, None);
    }

    #[test]
    fn image_record_serializes_camel_case() {
        let record = ImageRecord {
            image_url: "https://img.example/1.jpg".to_string(),
            date: "2024-01-01".to_string(),
            latitude: 18.52,
            longitude: 73.85,
            ward: "A".to_string(),
            record_type: "garbage".to_string(),
            count: 1,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["imageUrl"], "https://img.example/1.jpg");
        assert_eq!(json["type"], "garbage");
        assert_eq!(json["count"], 1);
    }
}
