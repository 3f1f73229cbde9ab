//! Types échangés par l'API REST de la salle et documentation OpenAPI

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::Actor;

/// Identité de l'auteur d'une requête
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UserRef {
    pub user_id: String,
    pub name: String,
}

impl From<UserRef> for Actor {
    fn from(u: UserRef) -> Self {
        Actor::user(u.user_id, u.name)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EnqueueRequest {
    #[serde(flatten)]
    pub user: UserRef,
    /// Plateforme source (ex. `catalog`)
    pub platform: String,
    pub track_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PlaylistImportRequest {
    #[serde(flatten)]
    pub user: UserRef,
    pub platform: String,
    pub playlist_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdminCommandRequest {
    pub password: String,
    /// Commande préfixée par `//`
    pub command: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SearchQuery {
    pub platform: String,
    pub q: String,
}

/// Paramètres du flux d'événements ; sans `user_id` la connexion est anonyme
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct EventsQuery {
    pub user_id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ImportResponse {
    pub added: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RemovedResponse {
    pub removed: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PauseResponse {
    /// `null` quand rien ne jouait
    pub paused: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ShuffleResponse {
    pub shuffle: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LikeResponse {
    /// `false` si l'utilisateur avait déjà liké ce titre
    pub liked: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminResponse {
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SuccessResponse {
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Message d'erreur
    pub error: String,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "MusicParty Party API",
        version = "1.0.0",
        description = r#"
# API de la salle d'écoute

Lecture partagée, file d'attente équitable et contrôles collectifs.

- `GET /state` : instantané complet du lecteur
- `GET /events` : flux SSE (`state`, `queue`, `system`) ; ouvrir le flux
  avec `user_id` et `name` compte l'utilisateur comme présent
- `POST /control/*` : contrôles partagés, soumis au délai global et aux
  verrous posés par l'administrateur
"#
    ),
    paths(
        crate::api::get_state,
        crate::api::get_queue,
        crate::api::get_history,
        crate::api::list_platforms,
        crate::api::search,
        crate::api::events,
        crate::api::enqueue,
        crate::api::import_playlist,
        crate::api::promote,
        crate::api::remove,
        crate::api::clear_mine,
        crate::api::skip,
        crate::api::toggle_pause,
        crate::api::toggle_shuffle,
        crate::api::like,
        crate::api::admin_command,
    ),
    components(schemas(
        UserRef,
        EnqueueRequest,
        PlaylistImportRequest,
        AdminCommandRequest,
        ImportResponse,
        RemovedResponse,
        PauseResponse,
        ShuffleResponse,
        LikeResponse,
        AdminResponse,
        SuccessResponse,
        ErrorResponse,
    )),
    tags(
        (name = "party", description = "Salle d'écoute partagée")
    )
)]
pub struct ApiDoc;
