use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::visits::QrStatistics;

pub const MIN_CODE_LENGTH: usize = 8;
pub const MAX_CODE_LENGTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Profile,
    Media,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Profile => "profile",
            TargetKind::Media => "media",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "profile" => Ok(TargetKind::Profile),
            "media" => Ok(TargetKind::Media),
            other => Err(format!("Unknown target kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCode {
    pub code: String,
    pub target_id: Uuid,
    pub target_kind: TargetKind,
    pub is_active: bool,
    pub statistics: QrStatistics,
    pub created_at: DateTime<Utc>,
}

impl QrCode {
    pub fn new(code: String, target_id: Uuid, target_kind: TargetKind) -> Self {
        Self {
            code,
            target_id,
            target_kind,
            is_active: true,
            statistics: QrStatistics::default(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: Uuid,
    pub url: String,
    pub kind: MediaKind,
    pub caption: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: Uuid,
    pub full_name: String,
    pub birth_date: Option<NaiveDate>,
    pub death_date: Option<NaiveDate>,
    pub biography: Option<String>,
    pub media: Vec<MediaItem>,
    pub qr_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn from_specification(specification: ProfileSpecification) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            full_name: specification.full_name.trim().to_string(),
            birth_date: specification.birth_date,
            death_date: specification.death_date,
            biography: specification.biography,
            media: Vec::new(),
            qr_code: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSpecification {
    pub full_name: String,
    pub birth_date: Option<NaiveDate>,
    pub death_date: Option<NaiveDate>,
    pub biography: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSpecification {
    pub url: String,
    pub kind: MediaKind,
    pub caption: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeSpecification {
    pub target_id: Uuid,
    pub target_kind: TargetKind,
    pub code: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeUpdate {
    pub is_active: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedQrCode {
    #[serde(flatten)]
    pub qr_code: QrCode,
    pub url: String,
}

/// What a code points at once resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResolvedTarget {
    Profile(Profile),
    #[serde(rename_all = "camelCase")]
    Media { profile_id: Uuid, media: MediaItem },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Memorial {
    pub code: String,
    pub target: ResolvedTarget,
}
