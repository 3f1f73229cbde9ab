//! # partyserver - Serveur web haut niveau basé sur Axum
//!
//! Cette crate fournit une abstraction simple pour héberger les API de la salle
//! d'écoute MusicParty.
//!
//! ## Fonctionnalités
//!
//! - **API de haut niveau** : routes JSON, handlers avec état, sous-routers
//! - **Server-Sent Events (SSE)** : logs en temps réel via `/log-sse`
//! - **Documentation OpenAPI** : Swagger UI par API (`/swagger-ui/{name}`)
//! - **Arrêt gracieux** : arrêt propre sur Ctrl+C, propagé par un `CancellationToken`
//!
//! Les crates métier (cache, lecteur, diffusion) s'enregistrent via des traits
//! d'extension implémentés sur [`Server`].
//!
//! ## Exemple d'utilisation
//!
//! ```rust,no_run
//! use partyserver::ServerBuilder;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = ServerBuilder::new_configured().build();
//!     server.init_logging().await;
//!
//!     server.add_route("/api/status", || async {
//!         serde_json::json!({"status": "ok"})
//!     }).await;
//!
//!     server.start().await?;
//!     server.wait().await;
//!     Ok(())
//! }
//! ```

pub mod logs;
pub mod range;
pub mod server;

pub use logs::LogState;
pub use range::{ByteRange, RangeError, parse_range};
pub use server::{Server, ServerBuilder, ServerInfo};
