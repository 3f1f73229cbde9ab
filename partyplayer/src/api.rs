//! API REST et SSE de la salle d'écoute
//!
//! Routes servies sous `/api/party` :
//!
//! - `GET /state`, `/queue`, `/history`, `/platforms`, `/search`
//! - `GET /events` : flux SSE de l'état, de la file et des messages système
//! - `POST /enqueue`, `/enqueue/playlist`, `/queue/{id}/top`,
//!   `/queue/{id}/remove`, `/queue/clear-mine`
//! - `POST /control/skip`, `/control/pause`, `/control/shuffle`, `/like`
//! - `POST /admin/command`

use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
};
use partyqueue::{PromoteOutcome, QueueEntryView, QueueError};
use partyserver::Server;
use partysource::{SourceError, Track};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use utoipa::OpenApi;

use crate::openapi::{
    AdminCommandRequest, AdminResponse, ApiDoc, EnqueueRequest, ErrorResponse, EventsQuery,
    ImportResponse, LikeResponse, PauseResponse, PlaylistImportRequest, RemovedResponse,
    SearchQuery, ShuffleResponse, SuccessResponse, UserRef,
};
use crate::{AdminConsole, AdminError, PartyController, PartyEvent, PlayerError, PlayerState};

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// État partagé des handlers
#[derive(Clone)]
pub struct PartyApiState {
    controller: Arc<PartyController>,
    admin: Arc<AdminConsole>,
}

fn error(status: StatusCode, message: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

fn player_error(e: PlayerError) -> ApiError {
    let status = match &e {
        PlayerError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        PlayerError::Locked(_) => StatusCode::LOCKED,
        PlayerError::NothingPlaying => StatusCode::CONFLICT,
        PlayerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        PlayerError::Resolution { .. } => StatusCode::BAD_GATEWAY,
        PlayerError::Queue(QueueError::NotFound(_)) => StatusCode::NOT_FOUND,
        PlayerError::Queue(QueueError::InvalidPolicy(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        PlayerError::Queue(_) => StatusCode::CONFLICT,
        PlayerError::Source(
            SourceError::UnknownPlatform(_)
            | SourceError::TrackNotFound(_)
            | SourceError::PlaylistNotFound(_),
        ) => StatusCode::NOT_FOUND,
        PlayerError::Source(SourceError::NotSupported(_)) => StatusCode::BAD_REQUEST,
        PlayerError::Source(_) => StatusCode::BAD_GATEWAY,
    };
    if status.is_server_error() {
        warn!("Party API error: {}", e);
    } else {
        debug!("Party API refusal: {}", e);
    }
    error(status, e)
}

fn admin_error(e: AdminError) -> ApiError {
    match e {
        AdminError::Forbidden => error(StatusCode::FORBIDDEN, e),
        AdminError::Usage(_) => error(StatusCode::BAD_REQUEST, e),
        AdminError::Player(e) => player_error(e),
        AdminError::Broadcast(_) => error(StatusCode::SERVICE_UNAVAILABLE, e),
    }
}

fn sse_event(event: &PartyEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event.name()).data(json)),
        Err(e) => {
            warn!("Cannot serialize party event: {}", e);
            None
        }
    }
}

/// Retire l'utilisateur de la présence quand son flux se ferme
struct PresenceGuard {
    controller: Arc<PartyController>,
    user_id: String,
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        self.controller.user_left(&self.user_id);
    }
}

// ============================================================================
// LECTURE
// ============================================================================

/// GET /party/state - Instantané complet du lecteur
#[utoipa::path(
    get,
    path = "/state",
    responses((status = 200, description = "État du lecteur", body = serde_json::Value)),
    tag = "party"
)]
pub(crate) async fn get_state(State(state): State<PartyApiState>) -> Json<PlayerState> {
    Json(state.controller.state())
}

/// GET /party/queue - Vue ordonnée de la file
#[utoipa::path(
    get,
    path = "/queue",
    responses((status = 200, description = "File d'attente", body = serde_json::Value)),
    tag = "party"
)]
pub(crate) async fn get_queue(State(state): State<PartyApiState>) -> Json<Vec<QueueEntryView>> {
    Json(state.controller.queue_snapshot())
}

/// GET /party/history - Derniers titres joués, le plus récent en tête
#[utoipa::path(
    get,
    path = "/history",
    responses((status = 200, description = "Historique", body = serde_json::Value)),
    tag = "party"
)]
pub(crate) async fn get_history(State(state): State<PartyApiState>) -> Json<Vec<Track>> {
    Json(state.controller.history())
}

#[utoipa::path(
    get,
    path = "/platforms",
    responses((status = 200, description = "Plateformes disponibles", body = Vec<String>)),
    tag = "party"
)]
pub(crate) async fn list_platforms(State(state): State<PartyApiState>) -> Json<Vec<String>> {
    Json(state.controller.platforms())
}

#[utoipa::path(
    get,
    path = "/search",
    params(SearchQuery),
    responses(
        (status = 200, description = "Titres trouvés", body = serde_json::Value),
        (status = 404, description = "Plateforme inconnue", body = ErrorResponse),
        (status = 504, description = "Source trop lente", body = ErrorResponse)
    ),
    tag = "party"
)]
pub(crate) async fn search(
    State(state): State<PartyApiState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Vec<Track>> {
    state
        .controller
        .search(&query.platform, &query.q)
        .await
        .map(Json)
        .map_err(player_error)
}

/// GET /party/events - Flux SSE
///
/// Le premier événement est toujours un état complet.
#[utoipa::path(
    get,
    path = "/events",
    params(EventsQuery),
    responses((status = 200, description = "Flux SSE (state, queue, system)", content_type = "text/event-stream")),
    tag = "party"
)]
pub(crate) async fn events(
    State(state): State<PartyApiState>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let controller = state.controller.clone();
    let mut rx = controller.subscribe();

    let guard = query.user_id.filter(|id| !id.is_empty()).map(|user_id| {
        let name = query.name.clone().unwrap_or_else(|| user_id.clone());
        controller.user_joined(&user_id, &name);
        PresenceGuard {
            controller: controller.clone(),
            user_id,
        }
    });

    let initial = PartyEvent::State(Box::new(controller.state()));

    let stream = stream! {
        let _guard = guard;

        if let Some(event) = sse_event(&initial) {
            yield Ok::<_, axum::Error>(event);
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(event) = sse_event(&event) {
                        yield Ok(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("SSE client lagged, {} events skipped", skipped);
                    let snapshot = PartyEvent::State(Box::new(controller.state()));
                    if let Some(event) = sse_event(&snapshot) {
                        yield Ok(event);
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ============================================================================
// FILE D'ATTENTE
// ============================================================================

#[utoipa::path(
    post,
    path = "/enqueue",
    request_body = EnqueueRequest,
    responses(
        (status = 200, description = "Entrée ajoutée", body = serde_json::Value),
        (status = 404, description = "Plateforme ou titre inconnu", body = ErrorResponse),
        (status = 409, description = "Doublon ou file pleine", body = ErrorResponse)
    ),
    tag = "party"
)]
pub(crate) async fn enqueue(
    State(state): State<PartyApiState>,
    Json(req): Json<EnqueueRequest>,
) -> ApiResult<QueueEntryView> {
    let actor = req.user.into();
    state
        .controller
        .enqueue(&actor, &req.platform, &req.track_id)
        .await
        .map(Json)
        .map_err(player_error)
}

#[utoipa::path(
    post,
    path = "/enqueue/playlist",
    request_body = PlaylistImportRequest,
    responses(
        (status = 200, description = "Nombre de titres ajoutés", body = ImportResponse),
        (status = 404, description = "Liste inconnue", body = ErrorResponse)
    ),
    tag = "party"
)]
pub(crate) async fn import_playlist(
    State(state): State<PartyApiState>,
    Json(req): Json<PlaylistImportRequest>,
) -> ApiResult<ImportResponse> {
    let actor = req.user.into();
    let added = state
        .controller
        .enqueue_playlist(&actor, &req.platform, &req.playlist_id)
        .await
        .map_err(player_error)?;
    Ok(Json(ImportResponse { added }))
}

#[utoipa::path(
    post,
    path = "/queue/{entry_id}/top",
    params(("entry_id" = String, Path, description = "Identifiant d'entrée, préfixé ou non")),
    request_body = UserRef,
    responses(
        (status = 200, description = "Résultat de la promotion", body = serde_json::Value),
        (status = 404, description = "Entrée inconnue", body = ErrorResponse)
    ),
    tag = "party"
)]
pub(crate) async fn promote(
    State(state): State<PartyApiState>,
    Path(entry_id): Path<String>,
    Json(user): Json<UserRef>,
) -> ApiResult<PromoteOutcome> {
    let actor = user.into();
    state
        .controller
        .promote(&actor, &entry_id)
        .await
        .map(Json)
        .map_err(player_error)
}

#[utoipa::path(
    post,
    path = "/queue/{entry_id}/remove",
    params(("entry_id" = String, Path, description = "Identifiant d'entrée, préfixé ou non")),
    request_body = UserRef,
    responses(
        (status = 200, description = "Entrée retirée", body = SuccessResponse),
        (status = 404, description = "Entrée inconnue", body = ErrorResponse)
    ),
    tag = "party"
)]
pub(crate) async fn remove(
    State(state): State<PartyApiState>,
    Path(entry_id): Path<String>,
    Json(user): Json<UserRef>,
) -> ApiResult<SuccessResponse> {
    let actor = user.into();
    let removed = state
        .controller
        .remove(&actor, &entry_id)
        .map_err(player_error)?;
    Ok(Json(SuccessResponse {
        message: format!("{} removed", removed.track.title),
    }))
}

#[utoipa::path(
    post,
    path = "/queue/clear-mine",
    request_body = UserRef,
    responses((status = 200, description = "Soumissions retirées", body = RemovedResponse)),
    tag = "party"
)]
pub(crate) async fn clear_mine(
    State(state): State<PartyApiState>,
    Json(user): Json<UserRef>,
) -> Json<RemovedResponse> {
    let actor = user.into();
    Json(RemovedResponse {
        removed: state.controller.remove_own(&actor),
    })
}

// ============================================================================
// CONTRÔLES PARTAGÉS
// ============================================================================

#[utoipa::path(
    post,
    path = "/control/skip",
    request_body = UserRef,
    responses(
        (status = 200, description = "Titre passé", body = SuccessResponse),
        (status = 423, description = "Contrôle verrouillé", body = ErrorResponse),
        (status = 429, description = "Délai entre contrôles non écoulé", body = ErrorResponse)
    ),
    tag = "party"
)]
pub(crate) async fn skip(
    State(state): State<PartyApiState>,
    Json(user): Json<UserRef>,
) -> ApiResult<SuccessResponse> {
    let actor = user.into();
    state.controller.skip(&actor).await.map_err(player_error)?;
    Ok(Json(SuccessResponse {
        message: "Skipped".to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/control/pause",
    request_body = UserRef,
    responses(
        (status = 200, description = "Nouvel état de pause", body = PauseResponse),
        (status = 423, description = "Contrôle verrouillé", body = ErrorResponse),
        (status = 429, description = "Délai entre contrôles non écoulé", body = ErrorResponse)
    ),
    tag = "party"
)]
pub(crate) async fn toggle_pause(
    State(state): State<PartyApiState>,
    Json(user): Json<UserRef>,
) -> ApiResult<PauseResponse> {
    let actor = user.into();
    let paused = state
        .controller
        .toggle_pause(&actor)
        .await
        .map_err(player_error)?;
    Ok(Json(PauseResponse { paused }))
}

#[utoipa::path(
    post,
    path = "/control/shuffle",
    request_body = UserRef,
    responses(
        (status = 200, description = "Nouvel état du shuffle", body = ShuffleResponse),
        (status = 423, description = "Contrôle verrouillé", body = ErrorResponse),
        (status = 429, description = "Délai entre contrôles non écoulé", body = ErrorResponse)
    ),
    tag = "party"
)]
pub(crate) async fn toggle_shuffle(
    State(state): State<PartyApiState>,
    Json(user): Json<UserRef>,
) -> ApiResult<ShuffleResponse> {
    let actor = user.into();
    let shuffle = state
        .controller
        .toggle_shuffle(&actor)
        .await
        .map_err(player_error)?;
    Ok(Json(ShuffleResponse { shuffle }))
}

#[utoipa::path(
    post,
    path = "/like",
    request_body = UserRef,
    responses(
        (status = 200, description = "Like enregistré ou déjà présent", body = LikeResponse),
        (status = 409, description = "Rien ne joue", body = ErrorResponse)
    ),
    tag = "party"
)]
pub(crate) async fn like(
    State(state): State<PartyApiState>,
    Json(user): Json<UserRef>,
) -> ApiResult<LikeResponse> {
    let actor = user.into();
    let liked = state.controller.like(&actor).map_err(player_error)?;
    Ok(Json(LikeResponse { liked }))
}

#[utoipa::path(
    post,
    path = "/admin/command",
    request_body = AdminCommandRequest,
    responses(
        (status = 200, description = "Compte rendu de la commande", body = AdminResponse),
        (status = 400, description = "Commande invalide", body = ErrorResponse),
        (status = 403, description = "Mot de passe incorrect", body = ErrorResponse)
    ),
    tag = "party"
)]
pub(crate) async fn admin_command(
    State(state): State<PartyApiState>,
    Json(req): Json<AdminCommandRequest>,
) -> ApiResult<AdminResponse> {
    let message = state
        .admin
        .execute(&req.password, &req.command)
        .await
        .map_err(admin_error)?;
    Ok(Json(AdminResponse { message }))
}

// ============================================================================
// ROUTER & TRAIT
// ============================================================================

/// Crée le router de l'API de la salle
pub fn create_party_router(controller: Arc<PartyController>, admin: Arc<AdminConsole>) -> Router {
    let state = PartyApiState { controller, admin };
    Router::new()
        .route("/state", get(get_state))
        .route("/queue", get(get_queue))
        .route("/history", get(get_history))
        .route("/platforms", get(list_platforms))
        .route("/search", get(search))
        .route("/events", get(events))
        .route("/enqueue", post(enqueue))
        .route("/enqueue/playlist", post(import_playlist))
        .route("/queue/clear-mine", post(clear_mine))
        .route("/queue/{entry_id}/top", post(promote))
        .route("/queue/{entry_id}/remove", post(remove))
        .route("/control/skip", post(skip))
        .route("/control/pause", post(toggle_pause))
        .route("/control/shuffle", post(toggle_shuffle))
        .route("/like", post(like))
        .route("/admin/command", post(admin_command))
        .with_state(state)
}

/// Trait d'extension pour partyserver::Server
#[async_trait]
pub trait PartyPlayerExt {
    /// Enregistre l'API sous `/api/party` et sa documentation sous
    /// `/swagger-ui/party`
    async fn init_party_player(
        &mut self,
        controller: Arc<PartyController>,
        admin: Arc<AdminConsole>,
    );
}

#[async_trait]
impl PartyPlayerExt for Server {
    async fn init_party_player(
        &mut self,
        controller: Arc<PartyController>,
        admin: Arc<AdminConsole>,
    ) {
        let router = create_party_router(controller, admin);
        self.add_openapi(router, ApiDoc::openapi(), "party").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PlayerSettings;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use partyqueue::{QueueScheduler, QueueSettings};
    use partysource::{CatalogSource, SourceRegistry};
    use tower::ServiceExt;

    const CATALOG: &str = r#"
platform: catalog
tracks:
  - id: intro
    title: Intro
    artists: [Alice]
    duration_ms: 60000
    url: http://example.invalid/intro.mp3
"#;

    fn router() -> Router {
        let mut sources = SourceRegistry::new();
        sources.register(Arc::new(CatalogSource::from_yaml_str(CATALOG).unwrap()));
        let queue = Arc::new(QueueScheduler::new(QueueSettings::default()));
        let controller = PartyController::new(PlayerSettings::default(), sources, queue, None);
        let admin = Arc::new(AdminConsole::new(controller.clone(), "secret"));
        create_party_router(controller, admin)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn enqueue_then_queue_lists_entry() {
        let app = router();
        let resp = app
            .clone()
            .oneshot(post_json(
                "/enqueue",
                r#"{"user_id":"u1","name":"Alice","platform":"catalog","track_id":"intro"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(Request::get("/queue").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let queue: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(queue.as_array().map(Vec::len), Some(1));
        assert_eq!(queue[0]["track"]["title"], "Intro");
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_conflict_and_unknown_platform_is_404() {
        let app = router();
        let body = r#"{"user_id":"u1","name":"Alice","platform":"catalog","track_id":"intro"}"#;
        app.clone().oneshot(post_json("/enqueue", body)).await.unwrap();
        let resp = app.clone().oneshot(post_json("/enqueue", body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = app
            .oneshot(post_json(
                "/enqueue",
                r#"{"user_id":"u1","name":"Alice","platform":"nowhere","track_id":"x"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn like_without_playback_is_conflict() {
        let resp = router()
            .oneshot(post_json("/like", r#"{"user_id":"u1","name":"Alice"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn admin_command_checks_password() {
        let app = router();
        let resp = app
            .clone()
            .oneshot(post_json(
                "/admin/command",
                r#"{"password":"nope","command":"//RESET"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app
            .clone()
            .oneshot(post_json(
                "/admin/command",
                r#"{"password":"secret","command":"//LOCK SKIP ON"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(post_json(
                "/admin/command",
                r#"{"password":"secret","command":"//DANCE"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
