use std::time::Duration;

use axum::{extract::State, Json};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{error, instrument};

use crate::{
    auth::{ids::EntityKind, repo::UserDirectory},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct TableCounts {
    pub users: i64,
    pub carriers: i64,
    pub products: i64,
    pub rules: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStatus {
    pub database_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<TableCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_checked: OffsetDateTime,
}

impl DatabaseStatus {
    /// The cause is logged, never returned.
    fn unavailable(last_checked: OffsetDateTime) -> Self {
        Self {
            database_connected: false,
            tables: None,
            error: Some("database unavailable"),
            last_checked,
        }
    }
}

async fn count_tables(directory: &dyn UserDirectory) -> anyhow::Result<TableCounts> {
    Ok(TableCounts {
        users: directory.count_by_kind(EntityKind::User).await?,
        carriers: directory.count_by_kind(EntityKind::Carrier).await?,
        products: directory.count_by_kind(EntityKind::Product).await?,
        rules: directory.count_by_kind(EntityKind::Rule).await?,
    })
}

/// Row counts per table. Store failures are reported in the body, not as an error status.
#[instrument(skip(state))]
pub async fn status(State(state): State<AppState>) -> Json<DatabaseStatus> {
    let limit = Duration::from_secs(state.config.db_timeout_secs);
    let counted = tokio::time::timeout(limit, count_tables(state.directory.as_ref())).await;
    let last_checked = OffsetDateTime::now_utc();

    match counted {
        Ok(Ok(tables)) => Json(DatabaseStatus {
            database_connected: true,
            tables: Some(tables),
            error: None,
            last_checked,
        }),
        Ok(Err(e)) => {
            error!(error = ?e, "database status check failed");
            Json(DatabaseStatus::unavailable(last_checked))
        }
        Err(_) => {
            error!(?limit, "database status check timed out");
            Json(DatabaseStatus::unavailable(last_checked))
        }
    }
}
