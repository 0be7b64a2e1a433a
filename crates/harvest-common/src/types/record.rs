use crate::identity::IdentityKey;
use crate::{HarvestError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// News article as emitted by a harvester.
///
/// Required fields default to empty so that a record with gaps still
/// decodes and is rejected by [`Record::validate`] instead of by the
/// JSON decoder.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewsRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, alias = "header")]
    pub title: String,
    /// Unix seconds
    #[serde(default)]
    pub published_at: Option<i64>,
    /// Unix seconds
    #[serde(default)]
    pub parsed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

/// Draft law or regulation with its legislative stage
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LegalRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub published_at: Option<i64>,
    #[serde(default)]
    pub parsed_at: Option<i64>,
    #[serde(default)]
    pub original_id: Option<String>,
    #[serde(default)]
    pub doc_kind: Option<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub discussion_period: Option<serde_json::Value>,
    #[serde(default)]
    pub explanatory_note: Option<serde_json::Value>,
    #[serde(default)]
    pub summary_reports: Option<serde_json::Value>,
    #[serde(default)]
    pub comment_stats: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    News,
    Legal,
}

impl RecordKind {
    pub fn as_str(&self) -> &str {
        match self {
            RecordKind::News => "news",
            RecordKind::Legal => "legal",
        }
    }
}

/// One harvested document, tagged by `kind` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    News(NewsRecord),
    Legal(LegalRecord),
}

/// A record that passed validation, with its identity key and decoded
/// timestamps. Stores only ever see this form.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRecord {
    pub id: Uuid,
    pub key: IdentityKey,
    pub published_at: DateTime<Utc>,
    pub parsed_at: DateTime<Utc>,
    pub record: Record,
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::News(_) => RecordKind::News,
            Record::Legal(_) => RecordKind::Legal,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Record::News(r) => &r.source,
            Record::Legal(r) => &r.source,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Record::News(r) => &r.url,
            Record::Legal(r) => &r.url,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Record::News(r) => &r.title,
            Record::Legal(r) => &r.title,
        }
    }

    fn text(&self) -> &str {
        match self {
            Record::News(r) => &r.text,
            Record::Legal(r) => &r.text,
        }
    }

    fn id(&self) -> Option<Uuid> {
        match self {
            Record::News(r) => r.id,
            Record::Legal(r) => r.id,
        }
    }

    fn timestamps(&self) -> (Option<i64>, Option<i64>) {
        match self {
            Record::News(r) => (r.published_at, r.parsed_at),
            Record::Legal(r) => (r.published_at, r.parsed_at),
        }
    }

    /// Check required fields and compute the identity key.
    pub fn validate(self) -> Result<ValidRecord> {
        let mut missing = Vec::new();
        if self.source().trim().is_empty() {
            missing.push("source");
        }
        if self.url().trim().is_empty() {
            missing.push("url");
        }
        if self.text().trim().is_empty() {
            missing.push("text");
        }
        if self.title().trim().is_empty() {
            missing.push("title");
        }
        let (published, parsed) = self.timestamps();
        if published.is_none() {
            missing.push("published_at");
        }
        if parsed.is_none() {
            missing.push("parsed_at");
        }
        if !missing.is_empty() {
            return Err(HarvestError::validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let key = IdentityKey::new(self.source(), self.url())?;
        let published_at = unix_seconds(published, "published_at")?;
        let parsed_at = unix_seconds(parsed, "parsed_at")?;

        Ok(ValidRecord {
            id: self.id().unwrap_or_else(Uuid::new_v4),
            key,
            published_at,
            parsed_at,
            record: self,
        })
    }
}

fn unix_seconds(value: Option<i64>, field: &str) -> Result<DateTime<Utc>> {
    value
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| HarvestError::validation(format!("{field} is not a valid unix timestamp")))
}
