//! Persistence seam for profiles and QR codes.
//!
//! `record_visit` is a single atomic step per backend: the statistics are
//! read, updated by [`crate::visits::QrStatistics::record_visit`] and written back while the
//! code is locked, so concurrent scans of one code never overwrite each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::model::{MediaItem, Profile, QrCode};
use crate::visits::{VisitOutcome, Visitor};

#[async_trait]
pub trait MemorialStore: Send + Sync {
    async fn insert_profile(&self, profile: &Profile) -> Result<Profile, PersistenceError>;

    async fn find_profile(&self, id: Uuid) -> Result<Option<Profile>, PersistenceError>;

    /// Finds the profile owning the media item with `media_id`.
    async fn find_profile_by_media(
        &self,
        media_id: Uuid,
    ) -> Result<Option<Profile>, PersistenceError>;

    async fn add_media(
        &self,
        profile_id: Uuid,
        media: &MediaItem,
    ) -> Result<Option<Profile>, PersistenceError>;

    async fn link_qr_code(
        &self,
        profile_id: Uuid,
        code: &str,
    ) -> Result<Option<Profile>, PersistenceError>;

    /// Fails with [`PersistenceError::DuplicateCode`] when the code is taken.
    async fn insert_qr_code(&self, qr_code: &QrCode) -> Result<QrCode, PersistenceError>;

    async fn find_qr_code(&self, code: &str) -> Result<Option<QrCode>, PersistenceError>;

    async fn set_qr_code_active(
        &self,
        code: &str,
        is_active: bool,
    ) -> Result<Option<QrCode>, PersistenceError>;

    /// Applies one visit to the stored statistics of `code`. Returns `None`
    /// when the code does not exist.
    async fn record_visit(
        &self,
        code: &str,
        visitor: &Visitor,
        now: DateTime<Utc>,
    ) -> Result<Option<VisitOutcome>, PersistenceError>;
}

/// Process-local store, used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryStore {
    profiles: DashMap<Uuid, Profile>,
    qr_codes: DashMap<String, QrCode>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemorialStore for MemoryStore {
    async fn insert_profile(&self, profile: &Profile) -> Result<Profile, PersistenceError> {
        self.profiles.insert(profile.id, profile.clone());
        Ok(profile.clone())
    }

    async fn find_profile(&self, id: Uuid) -> Result<Option<Profile>, PersistenceError> {
        Ok(self.profiles.get(&id).map(|profile| profile.clone()))
    }

    async fn find_profile_by_media(
        &self,
        media_id: Uuid,
    ) -> Result<Option<Profile>, PersistenceError> {
        Ok(self
            .profiles
            .iter()
            .find(|profile| profile.media.iter().any(|media| media.id == media_id))
            .map(|profile| profile.clone()))
    }

    async fn add_media(
        &self,
        profile_id: Uuid,
        media: &MediaItem,
    ) -> Result<Option<Profile>, PersistenceError> {
        Ok(self.profiles.get_mut(&profile_id).map(|mut profile| {
            profile.media.push(media.clone());
            profile.updated_at = Utc::now();
            profile.clone()
        }))
    }

    async fn link_qr_code(
        &self,
        profile_id: Uuid,
        code: &str,
    ) -> Result<Option<Profile>, PersistenceError> {
        Ok(self.profiles.get_mut(&profile_id).map(|mut profile| {
            profile.qr_code = Some(code.to_string());
            profile.updated_at = Utc::now();
            profile.clone()
        }))
    }

    async fn insert_qr_code(&self, qr_code: &QrCode) -> Result<QrCode, PersistenceError> {
        match self.qr_codes.entry(qr_code.code.clone()) {
            Entry::Occupied(_) => Err(PersistenceError::DuplicateCode(qr_code.code.clone())),
            Entry::Vacant(entry) => {
                entry.insert(qr_code.clone());
                Ok(qr_code.clone())
            }
        }
    }

    async fn find_qr_code(&self, code: &str) -> Result<Option<QrCode>, PersistenceError> {
        Ok(self.qr_codes.get(code).map(|qr_code| qr_code.clone()))
    }

    async fn set_qr_code_active(
        &self,
        code: &str,
        is_active: bool,
    ) -> Result<Option<QrCode>, PersistenceError> {
        Ok(self.qr_codes.get_mut(code).map(|mut qr_code| {
            qr_code.is_active = is_active;
            qr_code.clone()
        }))
    }

    async fn record_visit(
        &self,
        code: &str,
        visitor: &Visitor,
        now: DateTime<Utc>,
    ) -> Result<Option<VisitOutcome>, PersistenceError> {
        // The shard write lock is held until the guard drops.
        Ok(self
            .qr_codes
            .get_mut(code)
            .map(|mut qr_code| qr_code.statistics.record_visit(visitor, now)))
    }
}
