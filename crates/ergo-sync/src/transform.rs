//! Raw rows to canonical documents.
//!
//! Nested relations are resolved once here; downstream code only sees
//! `Option<EmbeddedRef>`.

use ergo_core::{
    classify, ActionPlanDocument, Document, Domain, EmbeddedRef, FileDocument, RawRecord,
    RecordFamily, ReportDocument, ReportType,
};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::warn;

use crate::fanout::ExtractedBatch;

const FILE_RELATIONS: [&str; 4] = ["organization", "company", "workstation", "user"];
const ACTION_PLAN_RELATIONS: [&str; 5] =
    ["action_plan", "file", "company", "organization", "workstation"];

/// A relation column as it came off the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRelation {
    Structured(JsonValue),
    Encoded(String),
    Absent,
}

impl RawRelation {
    pub fn from_value(value: Option<JsonValue>) -> Self {
        match value {
            None | Some(JsonValue::Null) => RawRelation::Absent,
            Some(JsonValue::String(text)) => RawRelation::Encoded(text),
            Some(other) => RawRelation::Structured(other),
        }
    }
}

/// What an absent relation becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsentPolicy {
    Empty,
    Null,
}

/// Never fails: undecodable or non-object relations become `None`.
pub fn resolve_relation(relation: RawRelation, policy: AbsentPolicy) -> Option<EmbeddedRef> {
    match relation {
        RawRelation::Encoded(text) => serde_json::from_str::<JsonValue>(&text)
            .ok()
            .and_then(object_ref),
        RawRelation::Structured(value) => object_ref(value),
        RawRelation::Absent => match policy {
            AbsentPolicy::Empty => Some(EmbeddedRef::default()),
            AbsentPolicy::Null => None,
        },
    }
}

fn object_ref(value: JsonValue) -> Option<EmbeddedRef> {
    match value {
        JsonValue::Object(map) => Some(EmbeddedRef::from(map)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowRejected {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unparseable timestamp in `{field}`: {value}")]
    BadTimestamp { field: &'static str, value: String },
}

fn required_timestamp(
    raw: &RawRecord,
    field: &'static str,
) -> Result<chrono::DateTime<chrono::Utc>, RowRejected> {
    let value = raw.present(field).ok_or(RowRejected::MissingField(field))?;
    raw.timestamp(field).ok_or_else(|| RowRejected::BadTimestamp {
        field,
        value: value.to_string(),
    })
}

pub fn report_document(
    report_type: ReportType,
    raw: &RawRecord,
) -> Result<ReportDocument, RowRejected> {
    let report_id = raw
        .scalar_string("id")
        .ok_or(RowRejected::MissingField("id"))?;
    let created_at = required_timestamp(raw, "created_at")?;
    let updated_at = required_timestamp(raw, "updated_at")?;

    let name = ["report_name", "name"]
        .into_iter()
        .filter_map(|key| raw.text(key))
        .find(|name| !name.is_empty())
        .unwrap_or_default()
        .to_string();
    let relation = |key: &str| {
        resolve_relation(
            RawRelation::from_value(raw.get(key).cloned()),
            AbsentPolicy::Null,
        )
    };

    Ok(ReportDocument {
        report_id,
        report_type,
        created_at,
        updated_at,
        is_active: raw.flag("is_active"),
        risk: classify(report_type, raw),
        name,
        client: raw.client().unwrap_or_default().to_string(),
        file: relation("file"),
        company: relation("company"),
        organization: relation("organization"),
        workstation: relation("workstation"),
    })
}

/// Pulls the named relations out of `map`, leaving every other column in place.
fn take_relations<const N: usize>(
    map: &mut Map<String, JsonValue>,
    keys: [&str; N],
) -> [Option<EmbeddedRef>; N] {
    keys.map(|key| resolve_relation(RawRelation::from_value(map.remove(key)), AbsentPolicy::Empty))
}

/// Removes `created_at` when it parses; otherwise it stays as a plain attribute.
fn take_created_at(map: &mut Map<String, JsonValue>) -> Option<chrono::DateTime<chrono::Utc>> {
    let parsed = map
        .get("created_at")
        .and_then(JsonValue::as_str)
        .and_then(ergo_core::parse_timestamp)?;
    map.remove("created_at");
    Some(parsed)
}

fn take_client(map: &mut Map<String, JsonValue>) -> String {
    match map.remove("client") {
        Some(JsonValue::String(client)) => client,
        _ => String::new(),
    }
}

fn take_id(map: &mut Map<String, JsonValue>, key: &str) -> Option<String> {
    match map.remove(key)? {
        JsonValue::String(id) => Some(id),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Null => None,
        other => {
            map.insert(key.to_string(), other);
            None
        }
    }
}

pub fn file_document(raw: RawRecord) -> FileDocument {
    let mut map = raw.into_map();
    let [organization, company, workstation, user] = take_relations(&mut map, FILE_RELATIONS);
    FileDocument {
        file_id: take_id(&mut map, "file_id"),
        created_at: take_created_at(&mut map),
        client: take_client(&mut map),
        organization,
        company,
        workstation,
        user,
        attributes: map,
    }
}

pub fn action_plan_document(raw: RawRecord) -> ActionPlanDocument {
    let mut map = raw.into_map();
    let [action_plan, file, company, organization, workstation] =
        take_relations(&mut map, ACTION_PLAN_RELATIONS);
    ActionPlanDocument {
        action_plan_id: take_id(&mut map, "action_plan_id"),
        created_at: take_created_at(&mut map),
        client: take_client(&mut map),
        action_plan,
        file,
        company,
        organization,
        workstation,
        attributes: map,
    }
}

#[derive(Debug, Default)]
pub struct TransformOutput {
    pub documents: Vec<Document>,
    pub rejected: usize,
}

/// Converts every batch of `domain`, counting rows that cannot be keyed.
pub fn transform_batches(domain: Domain, batches: Vec<ExtractedBatch>) -> TransformOutput {
    let mut output = TransformOutput::default();

    for batch in batches {
        if batch.family.domain() != domain {
            warn!(%domain, family = %batch.family, "batch does not belong to domain; dropped");
            continue;
        }
        for raw in batch.rows {
            match batch.family {
                RecordFamily::Report(report_type) => match report_document(report_type, &raw) {
                    Ok(doc) => output.documents.push(Document::Report(doc)),
                    Err(reason) => {
                        output.rejected += 1;
                        let id = raw.scalar_string("id");
                        warn!(
                            tenant = %batch.tenant,
                            family = %batch.family,
                            id = id.as_deref().unwrap_or("?"),
                            %reason,
                            "row rejected"
                        );
                    }
                },
                RecordFamily::File => output.documents.push(Document::File(file_document(raw))),
                RecordFamily::ActionPlan => output
                    .documents
                    .push(Document::ActionPlan(action_plan_document(raw))),
            }
        }
    }

    output
}
