//! MySQL source backend. Relations are shaped server-side with `JSON_OBJECT`.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use ergo_core::{RawRecord, RecordFamily, ReportType, Window};
use serde_json::{Map, Value as JsonValue};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row, TypeInfo};
use tracing::debug;

use crate::{redact_credentials, tag_client, ExtractError, SourceAdapter};

const RELATIONS: &str = "
    JSON_OBJECT('id', f.id, 'original_name', f.original_name) AS file,
    JSON_OBJECT('id', c.id, 'name', c.name) AS company,
    JSON_OBJECT('id', o.id, 'name', o.name) AS organization,
    CASE
        WHEN w.id IS NULL THEN NULL
        ELSE JSON_OBJECT('id', w.id, 'name', w.name)
    END AS workstation";

const FILE_JOINS: &str = "
    JOIN companies c ON f.company_id = c.id
    JOIN organizations o ON f.organization_id = o.id
    LEFT JOIN workstations w ON f.workstation_id = w.id";

const FILES_SELECT: &str = "
    SELECT
        ? AS client,
        f.id AS file_id,
        f.original_name,
        f.generated_name,
        f.duration,
        f.status,
        f.created_at,
        JSON_OBJECT('id', o.id, 'name', o.name) AS organization,
        JSON_OBJECT('id', c.id, 'name', c.name) AS company,
        JSON_OBJECT('id', w.id, 'name', w.name) AS workstation,
        JSON_OBJECT('id', u.id, 'name', u.name) AS user
    FROM files f
    LEFT JOIN workstations w ON f.workstation_id = w.id
    INNER JOIN organizations o ON f.organization_id = o.id
    INNER JOIN companies c ON f.company_id = c.id
    LEFT JOIN users u ON f.user_id = u.id";

const FILES_REALTIME: &str = "
    SELECT
        f.organization_id,
        f.company_id,
        f.workstation_id,
        ? AS client,
        JSON_OBJECT('id', ANY_VALUE(o.id), 'name', ANY_VALUE(o.name)) AS organization,
        JSON_OBJECT('id', ANY_VALUE(c.id), 'name', ANY_VALUE(c.name)) AS company,
        CASE
            WHEN ANY_VALUE(w.id) IS NULL THEN NULL
            ELSE JSON_OBJECT('id', ANY_VALUE(w.id), 'name', ANY_VALUE(w.name))
        END AS workstation,
        COUNT(DISTINCT f.id) AS total_files,
        CASE
            WHEN SUM((atr.id IS NOT NULL)
                     OR (crr.id IS NOT NULL)
                     OR (kmr.id IS NOT NULL)
                     OR (kppr.id IS NOT NULL)) > 0 THEN 1
            ELSE 0
        END AS has_report
    FROM files f
    INNER JOIN organizations o ON f.organization_id = o.id
    INNER JOIN companies c ON c.organization_id = o.id
    LEFT JOIN workstations w ON f.workstation_id = w.id
    LEFT JOIN angle_time_reports atr ON atr.file_id = f.id
    LEFT JOIN custom_report_results crr ON crr.file_id = f.id
    LEFT JOIN kim_mho_reports kmr ON kmr.file_id = f.id
    LEFT JOIN kim_push_pull_reports kppr ON kppr.file_id = f.id
    WHERE f.is_active = 1
    GROUP BY f.organization_id, f.company_id, f.workstation_id";

const ACTION_PLANS_SELECT: &str = "
    SELECT
        ? AS client,
        ap.id AS action_plan_id,
        ap.title,
        ap.description,
        ap.status,
        ap.priority,
        ap.created_at,
        ap.updated_at,
        ap.completed_at,
        JSON_OBJECT('id', f.id, 'original_name', f.original_name) AS file,
        JSON_OBJECT('id', c.id, 'name', c.name) AS company,
        JSON_OBJECT('id', o.id, 'name', o.name) AS organization,
        CASE
            WHEN w.id IS NULL THEN NULL
            ELSE JSON_OBJECT('id', w.id, 'name', w.name)
        END AS workstation
    FROM action_plans ap
    JOIN files f ON ap.file_id = f.id
    JOIN companies c ON f.company_id = c.id
    JOIN organizations o ON f.organization_id = o.id
    LEFT JOIN workstations w ON f.workstation_id = w.id";

const ACTION_PLAN_TASKS_REALTIME: &str = "
    SELECT
        ? AS client,
        t.name,
        t.description,
        JSON_OBJECT('id', ap.id, 'title', ap.title, 'status', ap.status) AS action_plan,
        JSON_OBJECT('id', c.id, 'name', c.name) AS company,
        JSON_OBJECT('id', o.id, 'name', o.name) AS organization,
        CASE
            WHEN w.id IS NULL THEN NULL
            ELSE JSON_OBJECT('id', w.id, 'name', w.name)
        END AS workstation
    FROM action_plan_tasks t
    JOIN action_plans ap ON t.action_plan_id = ap.id
    JOIN files f ON ap.file_id = f.id
    JOIN companies c ON f.company_id = c.id
    JOIN organizations o ON f.organization_id = o.id
    LEFT JOIN workstations w ON f.workstation_id = w.id
    WHERE ap.updated_at >= NOW() - INTERVAL 1 YEAR";

fn report_table(report_type: ReportType) -> (&'static str, &'static str) {
    match report_type {
        ReportType::Reba => ("reba_reports", "r"),
        ReportType::KimMho => ("kim_mho_reports", "kmho"),
        ReportType::KimPp => ("kim_push_pull_reports", "kpp"),
        ReportType::Niosh => ("niosh_reports", "n"),
        ReportType::StrainIndex => ("strain_index_reports", "si"),
    }
}

/// Realtime lookback as a MySQL interval literal.
pub fn recent_lookback(family: RecordFamily) -> &'static str {
    match family {
        RecordFamily::Report(ReportType::Niosh) => "1 DAY",
        _ => "1 YEAR",
    }
}

fn report_select(report_type: ReportType) -> String {
    let (table, alias) = report_table(report_type);
    format!(
        "SELECT {alias}.*, '{tag}' AS type, ? AS client,{RELATIONS}
    FROM {table} {alias}
    JOIN files f ON {alias}.file_id = f.id{FILE_JOINS}",
        tag = report_type.as_str(),
    )
}

/// SQL for a windowed fetch. Binds: client, window start, window end.
pub fn window_query(family: RecordFamily) -> String {
    let cursor = family.cursor_column();
    match family {
        RecordFamily::Report(report_type) => {
            let (_, alias) = report_table(report_type);
            format!(
                "{}\n    WHERE {alias}.{cursor} >= ? AND {alias}.{cursor} <= ?",
                report_select(report_type)
            )
        }
        RecordFamily::File => {
            format!("{FILES_SELECT}\n    WHERE f.{cursor} >= ? AND f.{cursor} <= ?")
        }
        RecordFamily::ActionPlan => {
            format!("{ACTION_PLANS_SELECT}\n    WHERE ap.{cursor} >= ? AND ap.{cursor} <= ?")
        }
    }
}

/// SQL for a realtime snapshot. Binds: client.
pub fn recent_query(family: RecordFamily) -> String {
    match family {
        RecordFamily::Report(report_type) => {
            let (_, alias) = report_table(report_type);
            format!(
                "{}\n    WHERE {alias}.{} >= NOW() - INTERVAL {}",
                report_select(report_type),
                family.cursor_column(),
                recent_lookback(family)
            )
        }
        RecordFamily::File => FILES_REALTIME.to_string(),
        RecordFamily::ActionPlan => ACTION_PLAN_TASKS_REALTIME.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct MySqlSourceAdapter {
    tenant: String,
    pool: MySqlPool,
}

impl MySqlSourceAdapter {
    pub fn new(tenant: impl Into<String>, pool: MySqlPool) -> Self {
        Self {
            tenant: tenant.into(),
            pool,
        }
    }

    /// Lazily connecting pool; the first query surfaces connection errors.
    pub fn connect_lazy(
        tenant: impl Into<String>,
        url: &str,
        max_connections: u32,
    ) -> Result<Self, ExtractError> {
        let tenant = tenant.into();
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_lazy(url)
            .map_err(|source| ExtractError::Connect {
                tenant: tenant.clone(),
                source,
            })?;
        debug!(tenant = %tenant, url = %redact_credentials(url), "mysql source pool configured");
        Ok(Self::new(tenant, pool))
    }

    async fn fetch(
        &self,
        family: RecordFamily,
        sql: &str,
        window: Option<&Window>,
    ) -> Result<Vec<RawRecord>, ExtractError> {
        let mut query = sqlx::query(sql).bind(self.tenant.as_str());
        if let Some(window) = window {
            query = query
                .bind(window.start_date.naive_utc())
                .bind(window.end_date.naive_utc());
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|source| ExtractError::Query { family, source })?;

        rows.iter()
            .map(|row| {
                row_to_record(row)
                    .map(|record| tag_client(record, &self.tenant))
                    .map_err(|source| ExtractError::Query { family, source })
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for MySqlSourceAdapter {
    fn tenant(&self) -> &str {
        &self.tenant
    }

    async fn fetch_window(
        &self,
        family: RecordFamily,
        window: &Window,
    ) -> Result<Vec<RawRecord>, ExtractError> {
        self.fetch(family, &window_query(family), Some(window)).await
    }

    async fn fetch_recent(&self, family: RecordFamily) -> Result<Vec<RawRecord>, ExtractError> {
        self.fetch(family, &recent_query(family), None).await
    }
}

fn row_to_record(row: &MySqlRow) -> Result<RawRecord, sqlx::Error> {
    let mut map = Map::with_capacity(row.columns().len());
    for column in row.columns() {
        let value = column_value(row, column.ordinal(), column.type_info().name())?;
        map.insert(column.name().to_string(), value);
    }
    Ok(RawRecord::from(map))
}

/// Decodes one cell by its declared MySQL type. Timestamps become naive UTC strings.
fn column_value(row: &MySqlRow, idx: usize, type_name: &str) -> Result<JsonValue, sqlx::Error> {
    let value = match type_name {
        "NULL" => None,
        "BOOLEAN" => row.try_get::<Option<bool>, _>(idx)?.map(JsonValue::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<Option<i64>, _>(idx)?.map(JsonValue::from)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row.try_get::<Option<u64>, _>(idx)?.map(JsonValue::from),
        "FLOAT" | "DOUBLE" => row.try_get::<Option<f64>, _>(idx)?.map(JsonValue::from),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(|ts| JsonValue::String(ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string())),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(idx)?
            .map(|d| JsonValue::String(d.format("%Y-%m-%d").to_string())),
        "JSON" => row.try_get::<Option<JsonValue>, _>(idx)?,
        // DECIMAL and textual columns keep their string form.
        _ => row
            .try_get_unchecked::<Option<String>, _>(idx)?
            .map(JsonValue::String),
    };
    Ok(value.unwrap_or(JsonValue::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windowed_report_queries_filter_updated_at_inclusively() {
        let sql = window_query(RecordFamily::Report(ReportType::KimPp));
        assert!(sql.contains("FROM kim_push_pull_reports kpp"));
        assert!(sql.contains("'KIM_PP' AS type"));
        assert!(sql.contains("WHERE kpp.updated_at >= ? AND kpp.updated_at <= ?"));
        assert_eq!(sql.matches('?').count(), 3);
    }

    #[test]
    fn windowed_files_filter_created_at() {
        let sql = window_query(RecordFamily::File);
        assert!(sql.contains("WHERE f.created_at >= ? AND f.created_at <= ?"));
        assert_eq!(sql.matches('?').count(), 3);
    }

    #[test]
    fn niosh_realtime_lookback_is_one_day() {
        assert!(recent_query(RecordFamily::Report(ReportType::Niosh))
            .ends_with("n.updated_at >= NOW() - INTERVAL 1 DAY"));
        assert!(recent_query(RecordFamily::Report(ReportType::Reba))
            .ends_with("r.updated_at >= NOW() - INTERVAL 1 YEAR"));
        assert_eq!(recent_lookback(RecordFamily::ActionPlan), "1 YEAR");
    }

    #[test]
    fn realtime_files_are_workstation_aggregates() {
        let sql = recent_query(RecordFamily::File);
        assert!(sql.contains("COUNT(DISTINCT f.id) AS total_files"));
        assert!(sql.contains("AS has_report"));
        assert_eq!(sql.matches('?').count(), 1);
    }

    #[test]
    fn every_recent_query_binds_only_the_client() {
        for family in ergo_core::Domain::ALL
            .into_iter()
            .flat_map(|domain| domain.families())
        {
            assert_eq!(recent_query(family).matches('?').count(), 1, "{family}");
        }
    }
}
