use crate::error::PersistenceError;
use crate::model::{MediaItem, Profile, QrCode, TargetKind};
use crate::store::MemorialStore;
use crate::visits::{QrStatistics, VisitLog, VisitOutcome, Visitor};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::error::ErrorKind;
use sqlx::types::Json;
use sqlx::{Error, FromRow, PgPool};
use uuid::Uuid;

const PROFILE_COLUMNS: &str =
    "id, full_name, birth_date, death_date, biography, media, qr_code, created_at, updated_at";
const QR_CODE_COLUMNS: &str = "code, target_id, target_kind, is_active, views, scans, \
    last_visited_at, recent_visits, created_at";

#[derive(FromRow)]
struct ProfileRow {
    id: Uuid,
    full_name: String,
    birth_date: Option<NaiveDate>,
    death_date: Option<NaiveDate>,
    biography: Option<String>,
    media: Json<Vec<MediaItem>>,
    qr_code: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Self {
            id: row.id,
            full_name: row.full_name,
            birth_date: row.birth_date,
            death_date: row.death_date,
            biography: row.biography,
            media: row.media.0,
            qr_code: row.qr_code,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct QrCodeRow {
    code: String,
    target_id: Uuid,
    target_kind: String,
    is_active: bool,
    views: i64,
    scans: i64,
    last_visited_at: Option<DateTime<Utc>>,
    recent_visits: Json<VisitLog>,
    created_at: DateTime<Utc>,
}

impl TryFrom<QrCodeRow> for QrCode {
    type Error = PersistenceError;

    fn try_from(row: QrCodeRow) -> Result<Self, Self::Error> {
        let target_kind: TargetKind = row
            .target_kind
            .parse()
            .map_err(PersistenceError::Corrupted)?;
        Ok(Self {
            code: row.code,
            target_id: row.target_id,
            target_kind,
            is_active: row.is_active,
            statistics: QrStatistics {
                views: row.views,
                scans: row.scans,
                last_visited_at: row.last_visited_at,
                recent_visits: row.recent_visits.0,
            },
            created_at: row.created_at,
        })
    }
}

fn into_qr_code(row: Option<QrCodeRow>) -> Result<Option<QrCode>, PersistenceError> {
    row.map(QrCode::try_from).transpose()
}

pub async fn save_profile(db_connection_pool: &PgPool, profile: &Profile) -> Result<Profile, Error> {
    let query = format!(
        r#"
              insert into profiles(id, full_name, birth_date, death_date, biography, media, qr_code, created_at, updated_at)
              values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
              returning {PROFILE_COLUMNS}
            "#
    );
    sqlx::query_as::<_, ProfileRow>(&query)
        .bind(profile.id)
        .bind(&profile.full_name)
        .bind(profile.birth_date)
        .bind(profile.death_date)
        .bind(&profile.biography)
        .bind(Json(&profile.media))
        .bind(&profile.qr_code)
        .bind(profile.created_at)
        .bind(profile.updated_at)
        .fetch_one(db_connection_pool)
        .await
        .map(Profile::from)
}

pub async fn get_profile_by_id(
    db_connection_pool: &PgPool,
    id: Uuid,
) -> Result<Option<Profile>, Error> {
    let query = format!("select {PROFILE_COLUMNS} from profiles where id = $1");
    sqlx::query_as::<_, ProfileRow>(&query)
        .bind(id)
        .fetch_optional(db_connection_pool)
        .await
        .map(|row| row.map(Profile::from))
}

pub async fn get_profile_by_media_id(
    db_connection_pool: &PgPool,
    media_id: Uuid,
) -> Result<Option<Profile>, Error> {
    let query = format!(
        "select {PROFILE_COLUMNS} from profiles where media @> jsonb_build_array(jsonb_build_object('id', $1::text))"
    );
    sqlx::query_as::<_, ProfileRow>(&query)
        .bind(media_id.to_string())
        .fetch_optional(db_connection_pool)
        .await
        .map(|row| row.map(Profile::from))
}

pub async fn append_media(
    db_connection_pool: &PgPool,
    profile_id: Uuid,
    media: &MediaItem,
) -> Result<Option<Profile>, Error> {
    let query = format!(
        r#"
              update profiles set media = media || jsonb_build_array($1::jsonb), updated_at = now()
              where id = $2
              returning {PROFILE_COLUMNS}
            "#
    );
    sqlx::query_as::<_, ProfileRow>(&query)
        .bind(Json(media))
        .bind(profile_id)
        .fetch_optional(db_connection_pool)
        .await
        .map(|row| row.map(Profile::from))
}

pub async fn update_profile_qr_code(
    db_connection_pool: &PgPool,
    profile_id: Uuid,
    code: &str,
) -> Result<Option<Profile>, Error> {
    let query = format!(
        "update profiles set qr_code = $1, updated_at = now() where id = $2 returning {PROFILE_COLUMNS}"
    );
    sqlx::query_as::<_, ProfileRow>(&query)
        .bind(code)
        .bind(profile_id)
        .fetch_optional(db_connection_pool)
        .await
        .map(|row| row.map(Profile::from))
}

pub async fn save_qr_code(
    db_connection_pool: &PgPool,
    qr_code: &QrCode,
) -> Result<Option<QrCode>, PersistenceError> {
    let query = format!(
        r#"
              insert into qr_codes(code, target_id, target_kind, is_active, views, scans, last_visited_at, recent_visits, created_at)
              values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
              returning {QR_CODE_COLUMNS}
            "#
    );
    let statistics = &qr_code.statistics;
    let saved = sqlx::query_as::<_, QrCodeRow>(&query)
        .bind(&qr_code.code)
        .bind(qr_code.target_id)
        .bind(qr_code.target_kind.as_str())
        .bind(qr_code.is_active)
        .bind(statistics.views)
        .bind(statistics.scans)
        .bind(statistics.last_visited_at)
        .bind(Json(&statistics.recent_visits))
        .bind(qr_code.created_at)
        .fetch_one(db_connection_pool)
        .await;
    match saved {
        Ok(row) => QrCode::try_from(row).map(Some),
        Err(Error::Database(db_err)) if db_err.kind() == ErrorKind::UniqueViolation => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub async fn get_qr_code(
    db_connection_pool: &PgPool,
    code: &str,
) -> Result<Option<QrCode>, PersistenceError> {
    let query = format!("select {QR_CODE_COLUMNS} from qr_codes where code = $1");
    let row = sqlx::query_as::<_, QrCodeRow>(&query)
        .bind(code)
        .fetch_optional(db_connection_pool)
        .await?;
    into_qr_code(row)
}

pub async fn update_qr_code_active(
    db_connection_pool: &PgPool,
    code: &str,
    is_active: bool,
) -> Result<Option<QrCode>, PersistenceError> {
    let query =
        format!("update qr_codes set is_active = $1 where code = $2 returning {QR_CODE_COLUMNS}");
    let row = sqlx::query_as::<_, QrCodeRow>(&query)
        .bind(is_active)
        .bind(code)
        .fetch_optional(db_connection_pool)
        .await?;
    into_qr_code(row)
}

/// Applies one visit inside a transaction that holds the row lock from the
/// read until commit. Concurrent visits to the same code queue on the lock.
pub async fn record_visit(
    db_connection_pool: &PgPool,
    code: &str,
    visitor: &Visitor,
    now: DateTime<Utc>,
) -> Result<Option<VisitOutcome>, PersistenceError> {
    let mut transaction = db_connection_pool.begin().await?;
    let query = format!("select {QR_CODE_COLUMNS} from qr_codes where code = $1 for update");
    let row = sqlx::query_as::<_, QrCodeRow>(&query)
        .bind(code)
        .fetch_optional(&mut *transaction)
        .await?;
    let Some(mut qr_code) = into_qr_code(row)? else {
        return Ok(None);
    };
    let outcome = qr_code.statistics.record_visit(visitor, now);
    let statistics = &qr_code.statistics;
    sqlx::query(
        r#"
              update qr_codes
              set views = $1, scans = $2, last_visited_at = $3, recent_visits = $4
              where code = $5
            "#,
    )
    .bind(statistics.views)
    .bind(statistics.scans)
    .bind(statistics.last_visited_at)
    .bind(Json(&statistics.recent_visits))
    .bind(code)
    .execute(&mut *transaction)
    .await?;
    transaction.commit().await?;
    Ok(Some(outcome))
}

/// [`MemorialStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    db_connection_pool: PgPool,
}

impl PgStore {
    pub fn new(db_connection_pool: PgPool) -> Self {
        Self { db_connection_pool }
    }
}

#[async_trait]
impl MemorialStore for PgStore {
    async fn insert_profile(&self, profile: &Profile) -> Result<Profile, PersistenceError> {
        Ok(save_profile(&self.db_connection_pool, profile).await?)
    }

    async fn find_profile(&self, id: Uuid) -> Result<Option<Profile>, PersistenceError> {
        Ok(get_profile_by_id(&self.db_connection_pool, id).await?)
    }

    async fn find_profile_by_media(
        &self,
        media_id: Uuid,
    ) -> Result<Option<Profile>, PersistenceError> {
        Ok(get_profile_by_media_id(&self.db_connection_pool, media_id).await?)
    }

    async fn add_media(
        &self,
        profile_id: Uuid,
        media: &MediaItem,
    ) -> Result<Option<Profile>, PersistenceError> {
        Ok(append_media(&self.db_connection_pool, profile_id, media).await?)
    }

    async fn link_qr_code(
        &self,
        profile_id: Uuid,
        code: &str,
    ) -> Result<Option<Profile>, PersistenceError> {
        Ok(update_profile_qr_code(&self.db_connection_pool, profile_id, code).await?)
    }

    async fn insert_qr_code(&self, qr_code: &QrCode) -> Result<QrCode, PersistenceError> {
        save_qr_code(&self.db_connection_pool, qr_code)
            .await?
            .ok_or_else(|| PersistenceError::DuplicateCode(qr_code.code.clone()))
    }

    async fn find_qr_code(&self, code: &str) -> Result<Option<QrCode>, PersistenceError> {
        get_qr_code(&self.db_connection_pool, code).await
    }

    async fn set_qr_code_active(
        &self,
        code: &str,
        is_active: bool,
    ) -> Result<Option<QrCode>, PersistenceError> {
        update_qr_code_active(&self.db_connection_pool, code, is_active).await
    }

    async fn record_visit(
        &self,
        code: &str,
        visitor: &Visitor,
        now: DateTime<Utc>,
    ) -> Result<Option<VisitOutcome>, PersistenceError> {
        record_visit(&self.db_connection_pool, code, visitor, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MediaKind, ProfileSpecification};
    use crate::visits::VISIT_LOG_CAPACITY;
    use chrono::Duration;

    const CODE: &str = "memorial01";

    fn profile() -> Profile {
        Profile::from_specification(ProfileSpecification {
            full_name: "Ada Lovelace".into(),
            birth_date: None,
            death_date: None,
            biography: None,
        })
    }

    fn media(url: &str) -> MediaItem {
        MediaItem {
            id: Uuid::new_v4(),
            url: url.into(),
            kind: MediaKind::Image,
            caption: None,
            created_at: Utc::now(),
        }
    }

    async fn store_with_code(pool: PgPool) -> PgStore {
        let store = PgStore::new(pool);
        store
            .insert_qr_code(&QrCode::new(CODE.into(), Uuid::new_v4(), TargetKind::Profile))
            .await
            .unwrap();
        store
    }

    // -- qr codes -------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn duplicate_code_is_rejected(pool: PgPool) {
        let store = store_with_code(pool).await;

        let result = store
            .insert_qr_code(&QrCode::new(CODE.into(), Uuid::new_v4(), TargetKind::Media))
            .await;

        assert!(matches!(result, Err(PersistenceError::DuplicateCode(code)) if code == CODE));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn deactivation_is_persisted(pool: PgPool) {
        let store = store_with_code(pool).await;

        store.set_qr_code_active(CODE, false).await.unwrap();

        let stored = store.find_qr_code(CODE).await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert!(store.set_qr_code_active("missing1", false).await.unwrap().is_none());
    }

    // -- profiles and media ---------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn media_lookup_finds_owning_profile(pool: PgPool) {
        let store = PgStore::new(pool);
        let owner = store.insert_profile(&profile()).await.unwrap();
        let other = store.insert_profile(&profile()).await.unwrap();
        let portrait = media("https://cdn.example.com/portrait.jpg");
        let grave = media("https://cdn.example.com/grave.jpg");
        store.add_media(owner.id, &portrait).await.unwrap();
        store.add_media(owner.id, &grave).await.unwrap();
        store
            .add_media(other.id, &media("https://cdn.example.com/other.jpg"))
            .await
            .unwrap();

        let found = store.find_profile_by_media(grave.id).await.unwrap().unwrap();

        assert_eq!(found.id, owner.id);
        let urls: Vec<_> = found.media.iter().map(|media| media.url.as_str()).collect();
        assert_eq!(urls, [portrait.url.as_str(), grave.url.as_str()]);
        assert!(store.find_profile_by_media(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn media_for_unknown_profile_is_none(pool: PgPool) {
        let store = PgStore::new(pool);
        let added = store
            .add_media(Uuid::new_v4(), &media("https://cdn.example.com/a.jpg"))
            .await
            .unwrap();
        assert!(added.is_none());
    }

    // -- visits ---------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn repeat_visitor_counts_view_but_not_scan(pool: PgPool) {
        let store = store_with_code(pool).await;
        let visitor = Visitor::new("198.51.100.4", None);
        let now = Utc::now();

        let first = store.record_visit(CODE, &visitor, now).await.unwrap();
        let second = store
            .record_visit(CODE, &visitor, now + Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(first, Some(VisitOutcome::Scan));
        assert_eq!(second, Some(VisitOutcome::View));
        let stored = store.find_qr_code(CODE).await.unwrap().unwrap();
        assert_eq!(stored.statistics.views, 2);
        assert_eq!(stored.statistics.scans, 1);
        assert_eq!(stored.statistics.recent_visits.len(), 1);
        assert!(stored.statistics.last_visited_at.is_some());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn visiting_unknown_code_records_nothing(pool: PgPool) {
        let store = PgStore::new(pool);
        let outcome = store
            .record_visit("missing1", &Visitor::new("198.51.100.4", None), Utc::now())
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn stored_log_is_capped(pool: PgPool) {
        let store = store_with_code(pool).await;
        let now = Utc::now();
        for i in 0..120 {
            let visitor = Visitor::new(format!("10.2.0.{i}"), None);
            store
                .record_visit(CODE, &visitor, now + Duration::seconds(i))
                .await
                .unwrap();
        }

        let stored = store.find_qr_code(CODE).await.unwrap().unwrap();
        assert_eq!(stored.statistics.views, 120);
        assert_eq!(stored.statistics.scans, 120);
        assert_eq!(stored.statistics.recent_visits.len(), VISIT_LOG_CAPACITY);
        assert_eq!(stored.statistics.recent_visits.iter().next().unwrap().visitor_ip, "10.2.0.20");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn concurrent_visits_lose_no_updates(pool: PgPool) {
        const VISITS: usize = 32;
        let store = store_with_code(pool).await;
        let now = Utc::now();

        let handles: Vec<_> = (0..VISITS)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let visitor = Visitor::new(format!("10.1.0.{i}"), None);
                    store.record_visit(CODE, &visitor, now).await
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), Some(VisitOutcome::Scan));
        }

        let stored = store.find_qr_code(CODE).await.unwrap().unwrap();
        assert_eq!(stored.statistics.views, VISITS as i64);
        assert_eq!(stored.statistics.scans, VISITS as i64);
        assert_eq!(stored.statistics.recent_visits.len(), VISITS);
    }
}
