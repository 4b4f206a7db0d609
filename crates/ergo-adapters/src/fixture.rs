//! File-backed source used for local runs and tests.
//!
//! Layout: `<root>/<tenant lowercase>/<family slug>.json`, each a JSON array of
//! rows. Realtime snapshots prefer `<family slug>.recent.json` when present.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ergo_core::{RawRecord, RecordFamily, Window};
use tokio::fs;
use tracing::debug;

use crate::{tag_client, ExtractError, SourceAdapter};

#[derive(Debug, Clone)]
pub struct FixtureSourceAdapter {
    tenant: String,
    root: PathBuf,
}

impl FixtureSourceAdapter {
    pub fn new(tenant: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            tenant: tenant.into(),
            root: root.into(),
        }
    }

    pub fn tenant_dir(&self) -> PathBuf {
        self.root.join(self.tenant.to_lowercase())
    }

    pub fn family_path(&self, family: RecordFamily) -> PathBuf {
        self.tenant_dir().join(format!("{}.json", family.slug()))
    }

    fn recent_path(&self, family: RecordFamily) -> PathBuf {
        self.tenant_dir()
            .join(format!("{}.recent.json", family.slug()))
    }

    async fn load(&self, path: &Path) -> Result<Option<Vec<RawRecord>>, ExtractError> {
        let text = match fs::read_to_string(path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ExtractError::FixtureRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let rows: Vec<RawRecord> =
            serde_json::from_str(&text).map_err(|source| ExtractError::FixtureParse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Some(
            rows.into_iter()
                .map(|row| tag_client(row, &self.tenant))
                .collect(),
        ))
    }
}

#[async_trait]
impl SourceAdapter for FixtureSourceAdapter {
    fn tenant(&self) -> &str {
        &self.tenant
    }

    async fn fetch_window(
        &self,
        family: RecordFamily,
        window: &Window,
    ) -> Result<Vec<RawRecord>, ExtractError> {
        let path = self.family_path(family);
        let rows = self.load(&path).await?.unwrap_or_default();
        let cursor = family.cursor_column();
        let total = rows.len();
        let selected: Vec<_> = rows
            .into_iter()
            .filter(|row| row.timestamp(cursor).is_some_and(|ts| window.contains(ts)))
            .collect();
        debug!(
            tenant = %self.tenant,
            %family,
            total,
            selected = selected.len(),
            "fixture window filtered"
        );
        Ok(selected)
    }

    async fn fetch_recent(&self, family: RecordFamily) -> Result<Vec<RawRecord>, ExtractError> {
        if let Some(rows) = self.load(&self.recent_path(family)).await? {
            return Ok(rows);
        }
        Ok(self
            .load(&self.family_path(family))
            .await?
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ergo_core::ReportType;
    use serde_json::json;
    use tempfile::tempdir;

    fn window(from_day: u32, to_day: u32) -> Window {
        Window::new(
            Utc.with_ymd_and_hms(2024, 1, from_day, 0, 0, 0).single().expect("ts"),
            Utc.with_ymd_and_hms(2024, 1, to_day, 23, 59, 59).single().expect("ts"),
        )
    }

    fn write_rows(root: &Path, tenant: &str, file: &str, rows: serde_json::Value) {
        let dir = root.join(tenant);
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(dir.join(file), rows.to_string()).expect("write fixture");
    }

    #[tokio::test]
    async fn window_filter_uses_family_cursor_column() {
        let dir = tempdir().expect("tempdir");
        write_rows(
            dir.path(),
            "standard",
            "reba.json",
            json!([
                {"id": 1, "created_at": "2023-12-01 00:00:00", "updated_at": "2024-01-02 10:00:00"},
                {"id": 2, "created_at": "2024-01-02 00:00:00", "updated_at": "2024-02-01 10:00:00"},
                {"id": 3, "created_at": "2024-01-02 00:00:00"}
            ]),
        );
        write_rows(
            dir.path(),
            "standard",
            "files.json",
            json!([
                {"file_id": "f-1", "created_at": "2024-01-03T08:00:00Z"},
                {"file_id": "f-2", "created_at": "2024-01-09T08:00:00Z"}
            ]),
        );

        let adapter = FixtureSourceAdapter::new("STANDARD", dir.path());
        let reports = adapter
            .fetch_window(RecordFamily::Report(ReportType::Reba), &window(1, 5))
            .await
            .expect("reba");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].scalar_string("id").as_deref(), Some("1"));
        assert_eq!(reports[0].client(), Some("STANDARD"));

        let files = adapter
            .fetch_window(RecordFamily::File, &window(1, 5))
            .await
            .expect("files");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].text("file_id"), Some("f-1"));
    }

    #[tokio::test]
    async fn missing_fixture_means_no_rows() {
        let dir = tempdir().expect("tempdir");
        let adapter = FixtureSourceAdapter::new("JOHN_DEERE", dir.path());
        let rows = adapter
            .fetch_window(RecordFamily::ActionPlan, &window(1, 31))
            .await
            .expect("empty");
        assert!(rows.is_empty());
        assert!(adapter
            .fetch_recent(RecordFamily::File)
            .await
            .expect("empty")
            .is_empty());
    }

    #[tokio::test]
    async fn malformed_fixture_is_a_parse_error() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("standard")).expect("mkdir");
        std::fs::write(dir.path().join("standard/niosh.json"), "{not json").expect("write");

        let adapter = FixtureSourceAdapter::new("STANDARD", dir.path());
        let err = adapter
            .fetch_recent(RecordFamily::Report(ReportType::Niosh))
            .await
            .expect_err("parse error");
        assert!(matches!(err, ExtractError::FixtureParse { .. }));
    }

    #[tokio::test]
    async fn recent_snapshot_prefers_dedicated_file() {
        let dir = tempdir().expect("tempdir");
        write_rows(dir.path(), "standard", "files.json", json!([{"file_id": "f-1"}]));
        write_rows(
            dir.path(),
            "standard",
            "files.recent.json",
            json!([{"total_files": 4, "has_report": 1}]),
        );

        let adapter = FixtureSourceAdapter::new("STANDARD", dir.path());
        let rows = adapter.fetch_recent(RecordFamily::File).await.expect("recent");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].number("total_files"), Some(4.0));
    }
}
