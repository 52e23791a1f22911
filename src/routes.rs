use crate::auth::auth;
use crate::config::Config;
use crate::error::{AppError, AppResult, PersistenceError};
use crate::model::{
    CreatedQrCode, MediaItem, MediaSpecification, Memorial, Profile, ProfileSpecification, QrCode,
    QrCodeSpecification, QrCodeUpdate, TargetKind,
};
use crate::resolver::resolve_code;
use crate::store::MemorialStore;
use crate::utils::{
    client_ip, generate_code, get_header, memorial_url, parse_url, validate_code, with_timeout,
};
use crate::visits::{QrStatistics, Visitor};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

const CODE_GENERATION_ATTEMPTS: u32 = 5;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MemorialStore>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn MemorialStore>, config: Config) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    fn timeout(&self) -> u64 {
        self.config.store_timeout_millis
    }
}

pub fn create_router(state: AppState) -> Router {
    let management = Router::new()
        .route("/profiles", post(create_profile))
        .route("/profiles/:id", get(get_profile))
        .route("/profiles/:id/media", post(add_media))
        .route("/qr-codes", post(create_qr_code))
        .route("/qr-codes/:code", patch(update_qr_code))
        .route("/qr-codes/:code/statistics", get(get_qr_code_statistics))
        .route_layer(from_fn_with_state(state.clone(), auth));
    let public = Router::new()
        .route("/memorials/:code", get(get_memorial))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET]),
        );
    Router::new()
        .merge(management)
        .merge(public)
        .route("/health", get(health))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn create_profile(
    State(state): State<AppState>,
    Json(specification): Json<ProfileSpecification>,
) -> AppResult<(StatusCode, Json<Profile>)> {
    validate_profile(&specification)?;
    let profile = Profile::from_specification(specification);
    let profile = with_timeout(state.timeout(), state.store.insert_profile(&profile)).await??;
    tracing::info!("Created profile {}", profile.id);
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(profile_id): Path<Uuid>,
) -> AppResult<Json<Profile>> {
    with_timeout(state.timeout(), state.store.find_profile(profile_id))
        .await??
        .map(Json)
        .ok_or(AppError::NotFound)
}

pub async fn add_media(
    State(state): State<AppState>,
    Path(profile_id): Path<Uuid>,
    Json(specification): Json<MediaSpecification>,
) -> AppResult<(StatusCode, Json<Profile>)> {
    let media = MediaItem {
        id: Uuid::new_v4(),
        url: parse_url(&specification.url)?,
        kind: specification.kind,
        caption: specification.caption,
        created_at: Utc::now(),
    };
    let profile = with_timeout(state.timeout(), state.store.add_media(profile_id, &media))
        .await??
        .ok_or(AppError::NotFound)?;
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn create_qr_code(
    State(state): State<AppState>,
    Json(specification): Json<QrCodeSpecification>,
) -> AppResult<(StatusCode, Json<CreatedQrCode>)> {
    ensure_target_exists(&state, specification.target_id, specification.target_kind).await?;

    let qr_code = match &specification.code {
        Some(code) => {
            validate_code(code)?;
            let qr_code = QrCode::new(
                code.clone(),
                specification.target_id,
                specification.target_kind,
            );
            with_timeout(state.timeout(), state.store.insert_qr_code(&qr_code)).await??
        }
        None => insert_generated_code(&state, &specification).await?,
    };

    if qr_code.target_kind == TargetKind::Profile {
        with_timeout(
            state.timeout(),
            state.store.link_qr_code(qr_code.target_id, &qr_code.code),
        )
        .await??;
    }
    tracing::info!(
        "Created QR code {} for {} {}",
        qr_code.code,
        qr_code.target_kind,
        qr_code.target_id
    );
    let url = memorial_url(&state.config.public_base_url, &qr_code.code)?;
    Ok((StatusCode::CREATED, Json(CreatedQrCode { qr_code, url })))
}

pub async fn update_qr_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(update): Json<QrCodeUpdate>,
) -> AppResult<Json<QrCode>> {
    let qr_code = with_timeout(
        state.timeout(),
        state.store.set_qr_code_active(&code, update.is_active),
    )
    .await??
    .ok_or(AppError::NotFound)?;
    tracing::info!("QR code {} active: {}", code, qr_code.is_active);
    Ok(Json(qr_code))
}

pub async fn get_qr_code_statistics(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<Json<QrStatistics>> {
    with_timeout(state.timeout(), state.store.find_qr_code(&code))
        .await??
        .map(|qr_code| Json(qr_code.statistics))
        .ok_or(AppError::NotFound)
}

/// Public entry point behind the printed QR code. Visit tracking is best
/// effort and never fails the request.
pub async fn get_memorial(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> AppResult<Json<Memorial>> {
    let (_, target) = with_timeout(state.timeout(), resolve_code(state.store.as_ref(), &code)).await??;

    let visitor = Visitor::new(
        client_ip(&headers, connect_info, state.config.trust_proxy_headers),
        get_header("User-Agent", &headers),
    );
    let recorded = with_timeout(
        state.timeout(),
        state.store.record_visit(&code, &visitor, Utc::now()),
    )
    .await;

    match recorded {
        Err(err) => tracing::error!("Recording visit to {} failed: {}", code, err),
        Ok(Err(err)) => tracing::error!("Recording visit to {} failed: {}", code, err),
        Ok(Ok(Some(outcome))) => tracing::debug!("Visit to {} recorded as {:?}", code, outcome),
        Ok(Ok(None)) => tracing::warn!("QR code {} disappeared before its visit was recorded", code),
    }

    Ok(Json(Memorial { code, target }))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

fn validate_profile(specification: &ProfileSpecification) -> AppResult<()> {
    if specification.full_name.trim().is_empty() {
        return Err(AppError::Validation("Full name is required".into()));
    }
    if let (Some(birth), Some(death)) = (specification.birth_date, specification.death_date) {
        if death < birth {
            return Err(AppError::Validation(
                "Death date precedes birth date".into(),
            ));
        }
    }
    Ok(())
}

async fn ensure_target_exists(state: &AppState, target_id: Uuid, kind: TargetKind) -> AppResult<()> {
    let found = match kind {
        TargetKind::Profile => {
            with_timeout(state.timeout(), state.store.find_profile(target_id))
                .await??
                .is_some()
        }
        TargetKind::Media => {
            with_timeout(state.timeout(), state.store.find_profile_by_media(target_id))
                .await??
                .is_some()
        }
    };
    if found {
        Ok(())
    } else {
        Err(AppError::NotFound)
    }
}

async fn insert_generated_code(
    state: &AppState,
    specification: &QrCodeSpecification,
) -> AppResult<QrCode> {
    for _ in 1..=CODE_GENERATION_ATTEMPTS {
        let qr_code = QrCode::new(
            generate_code(),
            specification.target_id,
            specification.target_kind,
        );
        match with_timeout(state.timeout(), state.store.insert_qr_code(&qr_code)).await? {
            Ok(qr_code) => return Ok(qr_code),
            Err(PersistenceError::DuplicateCode(_)) => {}
            Err(err) => return Err(err.into()),
        }
    }
    tracing::error!("Could not persist new QR code. Exhausted all retries of generating a unique code");
    Err(AppError::Internal("Exhausted unique code generation".into()))
}
