//! Core domain model for the ergonomic-risk sync: domains, windows, checkpoints,
//! raw source rows and the canonical documents written to the reporting store.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

pub mod risk;

pub use risk::{classify, rule_for, RiskLevel, RiskRule};

pub const CRATE_NAME: &str = "ergo-core";

/// One of the three data families synchronized by its own orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Reports,
    Files,
    ActionPlans,
}

impl Domain {
    /// Processing order used by the driver loops.
    pub const ALL: [Domain; 3] = [Domain::Reports, Domain::Files, Domain::ActionPlans];

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Reports => "reports",
            Domain::Files => "files",
            Domain::ActionPlans => "action_plans",
        }
    }

    pub fn durable_collection(self) -> &'static str {
        match self {
            Domain::Reports => "reports",
            Domain::Files => "files",
            Domain::ActionPlans => "action_plans",
        }
    }

    pub fn realtime_collection(self) -> &'static str {
        match self {
            Domain::Reports => "realtime_reports",
            Domain::Files => "realtime_files",
            Domain::ActionPlans => "realtime_action_plans_actions",
        }
    }

    pub fn checkpoint_collection(self) -> &'static str {
        match self {
            Domain::Reports => "report_control",
            Domain::Files => "file_control",
            Domain::ActionPlans => "action_plans_control",
        }
    }

    /// Record families extracted per tenant for this domain, in enumeration order.
    pub fn families(self) -> Vec<RecordFamily> {
        match self {
            Domain::Reports => ReportType::ALL.into_iter().map(RecordFamily::Report).collect(),
            Domain::Files => vec![RecordFamily::File],
            Domain::ActionPlans => vec![RecordFamily::ActionPlan],
        }
    }

    /// Window used when the domain has never completed a cycle.
    pub fn bootstrap_window(self) -> Window {
        let start = static_utc(2023, 1, 1, 0, 0, 0, 0);
        let end = match self {
            Domain::Reports => static_utc(2023, 2, 28, 23, 59, 59, 999_999),
            Domain::Files | Domain::ActionPlans => static_utc(2023, 1, 1, 23, 59, 59, 999_999),
        };
        Window::new(start, end)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn static_utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, micro: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(y, mo, d)
        .and_then(|date| date.and_hms_micro_opt(h, mi, s, micro))
        .map(|naive| naive.and_utc())
        .expect("static bootstrap timestamp is valid")
}

/// Ergonomic assessment report families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportType {
    Reba,
    KimMho,
    KimPp,
    Niosh,
    StrainIndex,
}

impl ReportType {
    pub const ALL: [ReportType; 5] = [
        ReportType::Reba,
        ReportType::KimMho,
        ReportType::KimPp,
        ReportType::Niosh,
        ReportType::StrainIndex,
    ];

    /// Tag stored in the `type` field of report documents.
    pub fn as_str(self) -> &'static str {
        match self {
            ReportType::Reba => "REBA",
            ReportType::KimMho => "KIM_MHO",
            ReportType::KimPp => "KIM_PP",
            ReportType::Niosh => "NIOSH",
            ReportType::StrainIndex => "STRAIN_INDEX",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            ReportType::Reba => "reba",
            ReportType::KimMho => "kim_mho",
            ReportType::KimPp => "kim_pp",
            ReportType::Niosh => "niosh",
            ReportType::StrainIndex => "strain_index",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single extraction unit handled by a source adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordFamily {
    Report(ReportType),
    File,
    ActionPlan,
}

impl RecordFamily {
    pub fn slug(self) -> &'static str {
        match self {
            RecordFamily::Report(report_type) => report_type.slug(),
            RecordFamily::File => "files",
            RecordFamily::ActionPlan => "action_plans",
        }
    }

    pub fn domain(self) -> Domain {
        match self {
            RecordFamily::Report(_) => Domain::Reports,
            RecordFamily::File => Domain::Files,
            RecordFamily::ActionPlan => Domain::ActionPlans,
        }
    }

    /// Column that incremental windows are applied to.
    pub fn cursor_column(self) -> &'static str {
        match self {
            RecordFamily::File => "created_at",
            RecordFamily::Report(_) | RecordFamily::ActionPlan => "updated_at",
        }
    }
}

impl fmt::Display for RecordFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Closed extraction interval `[start_date, end_date]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl Window {
    pub fn new(start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> Self {
        Self {
            start_date,
            end_date,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start_date && ts <= self.end_date
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} .. {}",
            self.start_date.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.end_date.to_rfc3339_opts(SecondsFormat::Micros, true)
        )
    }
}

/// Watermark of the last successfully processed window of a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub extracted_at: DateTime<Utc>,
    pub rows: u64,
}

impl Checkpoint {
    pub fn for_window(window: Window, extracted_at: DateTime<Utc>, rows: u64) -> Self {
        Self {
            start_date: window.start_date,
            end_date: window.end_date,
            extracted_at,
            rows,
        }
    }

    pub fn window(&self) -> Window {
        Window::new(self.start_date, self.end_date)
    }
}

/// Untyped source row as returned by a tenant's adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, JsonValue>);

impl RawRecord {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    /// Like [`RawRecord::get`] but treats an explicit JSON null as missing.
    pub fn present(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: JsonValue) -> Option<JsonValue> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        self.0.remove(key)
    }

    pub fn with(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.present(key).and_then(JsonValue::as_str)
    }

    /// Finite numeric value; numeric strings (e.g. DECIMAL columns) are accepted.
    pub fn number(&self, key: &str) -> Option<f64> {
        let n = match self.present(key)? {
            JsonValue::Number(n) => n.as_f64(),
            JsonValue::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }?;
        n.is_finite().then_some(n)
    }

    /// Scalar coerced to a string, used for identifiers that may be numeric.
    pub fn scalar_string(&self, key: &str) -> Option<String> {
        self.present(key).and_then(scalar_to_string)
    }

    pub fn flag(&self, key: &str) -> bool {
        match self.present(key) {
            Some(JsonValue::Bool(b)) => *b,
            Some(JsonValue::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(JsonValue::String(s)) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "y" | "t"
            ),
            _ => false,
        }
    }

    pub fn timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        self.text(key).and_then(parse_timestamp)
    }

    pub fn client(&self) -> Option<&str> {
        self.text("client")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_map(self) -> Map<String, JsonValue> {
        self.0
    }
}

impl From<Map<String, JsonValue>> for RawRecord {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }
}

fn scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parses RFC 3339 or naive `YYYY-MM-DD[ T]HH:MM:SS[.f]` timestamps; naive values are UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Embedded relation (`file`, `company`, `organization`, `workstation`, ...).
///
/// Decoding never fails for a JSON object: scalar `id`/`name` values are kept
/// as strings, anything else stays in `extra` under its own key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, JsonValue>")]
pub struct EmbeddedRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl EmbeddedRef {
    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            extra: Map::new(),
        }
    }
}

impl From<Map<String, JsonValue>> for EmbeddedRef {
    fn from(mut extra: Map<String, JsonValue>) -> Self {
        let mut take_scalar = |key: &str| {
            let value = extra.get(key)?;
            let scalar = if value.is_null() {
                None
            } else {
                Some(scalar_to_string(value)?)
            };
            extra.remove(key);
            scalar
        };
        let id = take_scalar("id");
        let name = take_scalar("name");
        Self { id, name, extra }
    }
}

/// Composite identity of a durable document; serialized as a JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NaturalKey(pub Vec<JsonValue>);

fn key_timestamp(ts: Option<DateTime<Utc>>) -> JsonValue {
    ts.map(|t| JsonValue::String(t.to_rfc3339_opts(SecondsFormat::Micros, true)))
        .unwrap_or(JsonValue::Null)
}

fn key_text(text: Option<&str>) -> JsonValue {
    text.map(|t| JsonValue::String(t.to_string()))
        .unwrap_or(JsonValue::Null)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub report_id: String,
    #[serde(rename = "type")]
    pub report_type: ReportType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
    pub risk: RiskLevel,
    pub name: String,
    pub client: String,
    pub file: Option<EmbeddedRef>,
    pub company: Option<EmbeddedRef>,
    pub organization: Option<EmbeddedRef>,
    pub workstation: Option<EmbeddedRef>,
}

impl ReportDocument {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey(vec![
            JsonValue::String(self.report_id.clone()),
            JsonValue::String(self.report_type.as_str().to_string()),
            key_timestamp(Some(self.created_at)),
            JsonValue::String(self.client.clone()),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub client: String,
    pub organization: Option<EmbeddedRef>,
    pub company: Option<EmbeddedRef>,
    pub workstation: Option<EmbeddedRef>,
    pub user: Option<EmbeddedRef>,
    /// Remaining source columns, carried through as-is.
    #[serde(flatten)]
    pub attributes: Map<String, JsonValue>,
}

impl FileDocument {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey(vec![
            key_text(self.file_id.as_deref()),
            key_timestamp(self.created_at),
            JsonValue::String(self.client.clone()),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlanDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub client: String,
    pub action_plan: Option<EmbeddedRef>,
    pub file: Option<EmbeddedRef>,
    pub company: Option<EmbeddedRef>,
    pub organization: Option<EmbeddedRef>,
    pub workstation: Option<EmbeddedRef>,
    #[serde(flatten)]
    pub attributes: Map<String, JsonValue>,
}

impl ActionPlanDocument {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey(vec![
            key_text(self.action_plan_id.as_deref()),
            key_timestamp(self.created_at),
            JsonValue::String(self.client.clone()),
        ])
    }
}

/// Canonical document handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Document {
    Report(ReportDocument),
    File(FileDocument),
    ActionPlan(ActionPlanDocument),
}

impl Document {
    pub fn natural_key(&self) -> NaturalKey {
        match self {
            Document::Report(doc) => doc.natural_key(),
            Document::File(doc) => doc.natural_key(),
            Document::ActionPlan(doc) => doc.natural_key(),
        }
    }

    pub fn domain(&self) -> Domain {
        match self {
            Document::Report(_) => Domain::Reports,
            Document::File(_) => Domain::Files,
            Document::ActionPlan(_) => Domain::ActionPlans,
        }
    }

    pub fn client(&self) -> &str {
        match self {
            Document::Report(doc) => &doc.client,
            Document::File(doc) => &doc.client,
            Document::ActionPlan(doc) => &doc.client,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<JsonValue> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn report_families_follow_enumeration_order() {
        let slugs: Vec<_> = Domain::Reports.families().iter().map(|f| f.slug()).collect();
        assert_eq!(slugs, vec!["reba", "kim_mho", "kim_pp", "niosh", "strain_index"]);
        assert_eq!(Domain::Files.families(), vec![RecordFamily::File]);
    }

    #[test]
    fn bootstrap_windows_match_domain_defaults() {
        let reports = Domain::Reports.bootstrap_window();
        assert_eq!(
            reports.start_date,
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).single().unwrap()
        );
        assert_eq!(
            reports.end_date.to_rfc3339_opts(SecondsFormat::Micros, true),
            "2023-02-28T23:59:59.999999Z"
        );
        let files = Domain::Files.bootstrap_window();
        assert_eq!(
            files.end_date.to_rfc3339_opts(SecondsFormat::Micros, true),
            "2023-01-01T23:59:59.999999Z"
        );
        assert_eq!(files, Domain::ActionPlans.bootstrap_window());
    }

    #[test]
    fn timestamps_accept_naive_and_rfc3339_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 10, 15, 0).single().unwrap();
        assert_eq!(parse_timestamp("2024-03-05 10:15:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05T10:15:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05T10:15:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05T07:15:00-03:00"), Some(expected));
        assert!(parse_timestamp("2024-03-05 10:15:00.250").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn raw_record_coercions() {
        let raw: RawRecord = serde_json::from_value(json!({
            "id": 42,
            "score": "12.5",
            "nan": "NaN",
            "is_active": 1,
            "disabled": "0",
            "label": null
        }))
        .unwrap();

        assert_eq!(raw.scalar_string("id").as_deref(), Some("42"));
        assert_eq!(raw.number("score"), Some(12.5));
        assert_eq!(raw.number("nan"), None);
        assert!(raw.flag("is_active"));
        assert!(!raw.flag("disabled"));
        assert!(!raw.flag("missing"));
        assert!(raw.present("label").is_none());
        assert!(raw.get("label").is_some());
    }

    #[test]
    fn embedded_ref_coerces_numeric_ids_and_keeps_extra_fields() {
        let parsed: EmbeddedRef =
            serde_json::from_value(json!({"id": 7, "original_name": "clip.mp4"})).unwrap();
        assert_eq!(parsed.id.as_deref(), Some("7"));
        assert_eq!(parsed.name, None);
        assert_eq!(parsed.extra.get("original_name"), Some(&json!("clip.mp4")));
        assert_eq!(serde_json::to_value(EmbeddedRef::default()).unwrap(), json!({}));
    }

    #[test]
    fn embedded_ref_keeps_non_string_names() {
        let numeric: EmbeddedRef = serde_json::from_value(json!({"id": 1, "name": 123})).unwrap();
        assert_eq!(numeric, EmbeddedRef::named("1", "123"));

        let localized: EmbeddedRef =
            serde_json::from_value(json!({"id": 2, "name": {"pt": "Linha"}, "id_extra": null}))
                .unwrap();
        assert_eq!(localized.id.as_deref(), Some("2"));
        assert_eq!(localized.name, None);
        assert_eq!(
            serde_json::to_value(&localized).unwrap(),
            json!({"id": "2", "name": {"pt": "Linha"}, "id_extra": null})
        );

        let null_name: EmbeddedRef = serde_json::from_value(json!({"name": null})).unwrap();
        assert_eq!(null_name, EmbeddedRef::default());
    }

    #[test]
    fn report_document_serializes_type_tag_and_key() {
        let created = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).single().unwrap();
        let doc = ReportDocument {
            report_id: "r-1".into(),
            report_type: ReportType::KimPp,
            created_at: created,
            updated_at: created,
            is_active: true,
            risk: RiskLevel::Moderate,
            name: "Push cart".into(),
            client: "STANDARD".into(),
            file: None,
            company: Some(EmbeddedRef::named("c-1", "Acme")),
            organization: None,
            workstation: None,
        };

        let value = Document::Report(doc.clone()).to_json().unwrap();
        assert_eq!(value["type"], json!("KIM_PP"));
        assert_eq!(value["risk"], json!("MODERATE"));
        assert_eq!(value["file"], JsonValue::Null);
        assert_eq!(
            doc.natural_key(),
            NaturalKey(vec![
                json!("r-1"),
                json!("KIM_PP"),
                json!("2024-01-02T03:04:05.000000Z"),
                json!("STANDARD"),
            ])
        );
    }

    #[test]
    fn file_document_flattens_attributes() {
        let mut attributes = Map::new();
        attributes.insert("total_files".into(), json!(3));
        let doc = FileDocument {
            file_id: None,
            created_at: None,
            client: "JOHN_DEERE".into(),
            organization: Some(EmbeddedRef::default()),
            company: None,
            workstation: None,
            user: Some(EmbeddedRef::default()),
            attributes,
        };
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["total_files"], json!(3));
        assert!(value.get("file_id").is_none());
        assert_eq!(doc.natural_key().0[0], JsonValue::Null);
    }
}
