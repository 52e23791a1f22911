use crate::error::{AppError, AppResult};
use crate::model::{QrCode, ResolvedTarget, TargetKind};
use crate::store::MemorialStore;

/// Looks up an active code and whatever it points at. Missing, inactive and
/// dangling codes are all [`AppError::NotFound`].
pub async fn resolve_code(
    store: &dyn MemorialStore,
    code: &str,
) -> AppResult<(QrCode, ResolvedTarget)> {
    let qr_code = store
        .find_qr_code(code)
        .await?
        .filter(|qr_code| qr_code.is_active)
        .ok_or(AppError::NotFound)?;
    let target = resolve_target(store, &qr_code).await?;
    Ok((qr_code, target))
}

async fn resolve_target(store: &dyn MemorialStore, qr_code: &QrCode) -> AppResult<ResolvedTarget> {
    match qr_code.target_kind {
        TargetKind::Profile => store
            .find_profile(qr_code.target_id)
            .await?
            .map(ResolvedTarget::Profile)
            .ok_or(AppError::NotFound),
        TargetKind::Media => {
            let profile = store
                .find_profile_by_media(qr_code.target_id)
                .await?
                .ok_or(AppError::NotFound)?;
            let media = profile
                .media
                .into_iter()
                .find(|media| media.id == qr_code.target_id)
                .ok_or(AppError::NotFound)?;
            Ok(ResolvedTarget::Media {
                profile_id: profile.id,
                media,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MediaItem, MediaKind, Profile, ProfileSpecification};
    use crate::store::MemoryStore;
    use chrono::Utc;
    use uuid::Uuid;

    async fn store_with_profile() -> (MemoryStore, Profile) {
        let store = MemoryStore::new();
        let profile = Profile::from_specification(ProfileSpecification {
            full_name: "Ada Lovelace".into(),
            birth_date: None,
            death_date: None,
            biography: None,
        });
        store.insert_profile(&profile).await.unwrap();
        (store, profile)
    }

    #[tokio::test]
    async fn active_profile_code_resolves() {
        let (store, profile) = store_with_profile().await;
        store
            .insert_qr_code(&QrCode::new("adalovelace".into(), profile.id, TargetKind::Profile))
            .await
            .unwrap();

        let (qr_code, target) = resolve_code(&store, "adalovelace").await.unwrap();

        assert_eq!(qr_code.code, "adalovelace");
        assert_eq!(target, ResolvedTarget::Profile(profile));
    }

    #[tokio::test]
    async fn inactive_code_is_not_found() {
        let (store, profile) = store_with_profile().await;
        store
            .insert_qr_code(&QrCode::new("adalovelace".into(), profile.id, TargetKind::Profile))
            .await
            .unwrap();
        store.set_qr_code_active("adalovelace", false).await.unwrap();

        let result = resolve_code(&store, "adalovelace").await;

        assert!(matches!(result, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn unknown_and_dangling_codes_are_not_found() {
        let store = MemoryStore::new();
        store
            .insert_qr_code(&QrCode::new("dangling".into(), Uuid::new_v4(), TargetKind::Profile))
            .await
            .unwrap();

        assert!(matches!(resolve_code(&store, "nosuchcode").await, Err(AppError::NotFound)));
        assert!(matches!(resolve_code(&store, "dangling").await, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn media_code_resolves_to_owning_profile() {
        let (store, profile) = store_with_profile().await;
        let media = MediaItem {
            id: Uuid::new_v4(),
            url: "https://cdn.example.com/portrait.jpg".into(),
            kind: MediaKind::Image,
            caption: Some("Portrait".into()),
            created_at: Utc::now(),
        };
        store.add_media(profile.id, &media).await.unwrap();
        store
            .insert_qr_code(&QrCode::new("portrait1".into(), media.id, TargetKind::Media))
            .await
            .unwrap();

        let (_, target) = resolve_code(&store, "portrait1").await.unwrap();

        assert_eq!(
            target,
            ResolvedTarget::Media {
                profile_id: profile.id,
                media
            }
        );
    }
}
