//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::model::{MediaItem, Profile, QrCode};
use crate::store::{MemorialStore, MemoryStore};
use crate::visits::{VisitOutcome, Visitor};

#[derive(Clone, Copy)]
pub enum VisitFault {
    /// Every visit write errors out, as if the database were unreachable.
    Unavailable,
    /// Lookups and visit writes first sleep, so concurrent requests
    /// interleave at every await point.
    Slow(Duration),
}

/// [`MemoryStore`] with misbehaving visit tracking.
pub struct FaultyStore {
    pub inner: MemoryStore,
    pub fault: VisitFault,
}

impl FaultyStore {
    pub fn new(fault: VisitFault) -> Self {
        Self {
            inner: MemoryStore::new(),
            fault,
        }
    }

    async fn delay(&self) {
        if let VisitFault::Slow(delay) = self.fault {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl MemorialStore for FaultyStore {
    async fn insert_profile(&self, profile: &Profile) -> Result<Profile, PersistenceError> {
        self.inner.insert_profile(profile).await
    }

    async fn find_profile(&self, id: Uuid) -> Result<Option<Profile>, PersistenceError> {
        self.inner.find_profile(id).await
    }

    async fn find_profile_by_media(
        &self,
        media_id: Uuid,
    ) -> Result<Option<Profile>, PersistenceError> {
        self.inner.find_profile_by_media(media_id).await
    }

    async fn add_media(
        &self,
        profile_id: Uuid,
        media: &MediaItem,
    ) -> Result<Option<Profile>, PersistenceError> {
        self.inner.add_media(profile_id, media).await
    }

    async fn link_qr_code(
        &self,
        profile_id: Uuid,
        code: &str,
    ) -> Result<Option<Profile>, PersistenceError> {
        self.inner.link_qr_code(profile_id, code).await
    }

    async fn insert_qr_code(&self, qr_code: &QrCode) -> Result<QrCode, PersistenceError> {
        self.inner.insert_qr_code(qr_code).await
    }

    async fn find_qr_code(&self, code: &str) -> Result<Option<QrCode>, PersistenceError> {
        self.delay().await;
        self.inner.find_qr_code(code).await
    }

    async fn set_qr_code_active(
        &self,
        code: &str,
        is_active: bool,
    ) -> Result<Option<QrCode>, PersistenceError> {
        self.inner.set_qr_code_active(code, is_active).await
    }

    async fn record_visit(
        &self,
        code: &str,
        visitor: &Visitor,
        now: DateTime<Utc>,
    ) -> Result<Option<VisitOutcome>, PersistenceError> {
        match self.fault {
            VisitFault::Unavailable => Err(PersistenceError::Database(sqlx::Error::PoolTimedOut)),
            VisitFault::Slow(delay) => {
                tokio::time::sleep(delay).await;
                self.inner.record_visit(code, visitor, now).await
            }
        }
    }
}
