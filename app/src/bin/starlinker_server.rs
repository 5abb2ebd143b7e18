//! Admin HTTP surface for the Starlinker news backend (§6, news-backend
//! table). Scheduler lifecycle is wired to Rocket's liftoff/shutdown events
//! the way the teacher's `IngestFairing` wires the ingest task to them.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use log::{error, info};
use miette::Diagnostic;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Status;
use rocket::response::Responder;
use rocket::serde::json::{json, Json, Value as JsonValue};
use rocket::{get, patch, post, put, routes, Orbit, Request, Response, Rocket, State};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use starlinker_core::{AlertsService, DigestService, DigestType, EmailPlaceholder, Scheduler};
use starlinker_db::{SettingsRepository, SignalStore, StarlinkerConfig, StoreError};
use starlinker_ingest::{build_client, IngestManager, RsiPatchNotesIngest};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerConfig {
    database_path: String,
    max_pool_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_path: "starlinker.db".to_string(),
            max_pool_size: 8,
        }
    }
}

impl ServerConfig {
    fn load() -> figment::Result<Self> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("Starlinker.toml"))
            .merge(Env::prefixed("STARLINKER_SERVER_"))
            .extract()
    }
}

#[derive(Debug, Error, Diagnostic)]
enum InitError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to build shared HTTP client")]
    Client(#[source] reqwest::Error),
}

#[derive(Debug, Error, Diagnostic)]
enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scheduler(#[from] starlinker_core::SchedulerError),
    #[error(transparent)]
    Digest(#[from] starlinker_core::DigestError),
    #[error("invalid settings payload: {0}")]
    InvalidSettings(String),
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = match &self {
            ApiError::InvalidSettings(_) => Status::UnprocessableEntity,
            ApiError::Store(StoreError::Validation(_)) => Status::UnprocessableEntity,
            ApiError::Digest(starlinker_core::DigestError::UnsupportedType(_)) => {
                Status::UnprocessableEntity
            }
            _ => Status::InternalServerError,
        };
        let body = match &self {
            ApiError::Store(StoreError::Validation(errors)) => json!({"errors": errors}),
            _ => json!({"errors": [{"path": "body", "message": self.to_string()}]}),
        }
        .to_string();
        Response::build()
            .status(status)
            .header(rocket::http::ContentType::JSON)
            .sized_body(body.len(), std::io::Cursor::new(body))
            .ok()
    }
}

/// Everything one running instance needs, mirroring `StarlinkerBackend`.
struct Backend {
    settings: Arc<SettingsRepository>,
    store: Arc<SignalStore>,
    scheduler: Arc<Scheduler>,
}

impl Backend {
    fn new(config: &ServerConfig) -> Result<Self, InitError> {
        let store = Arc::new(SignalStore::new(&config.database_path, config.max_pool_size)?);
        let pool = starlinker_db::get_pool(&config.database_path, config.max_pool_size)?;
        let settings = Arc::new(SettingsRepository::new(pool));
        let clock = starlinker_core::system_clock();

        let client = build_client().map_err(InitError::Client)?;
        let mut ingest_manager = IngestManager::new(store.clone());
        ingest_manager.register_module(Box::new(RsiPatchNotesIngest));
        let ingest = Arc::new(ingest_manager);

        let alerts = Arc::new(AlertsService::new(
            store.clone(),
            client.clone(),
            Arc::new(EmailPlaceholder::new()),
            clock.clone(),
        ));
        let digest = Arc::new(DigestService::new(store.clone(), client, clock.clone()));
        let health = Arc::new(starlinker_core::HealthStatus::new());

        let scheduler = Arc::new(Scheduler::new(
            settings.clone(),
            ingest,
            alerts,
            digest,
            health,
            clock,
        ));

        Ok(Self {
            settings,
            store,
            scheduler,
        })
    }
}

struct SchedulerFairing;

#[rocket::async_trait]
impl Fairing for SchedulerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Scheduler",
            kind: Kind::Liftoff | Kind::Shutdown,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let Some(backend) = rocket.state::<Backend>() else {
            error!("cannot start scheduler: Rocket is not managing a Backend");
            return;
        };
        if let Err(e) = backend.scheduler.start() {
            error!("failed to start scheduler: {e}");
        } else {
            info!("scheduler started");
        }
    }

    async fn on_shutdown(&self, rocket: &Rocket<Orbit>) {
        if let Some(backend) = rocket.state::<Backend>() {
            backend.scheduler.stop();
            info!("scheduler stopped");
        }
    }
}

#[get("/health")]
fn health(backend: &State<Backend>) -> Result<Json<JsonValue>, ApiError> {
    let config = backend.settings.load()?;
    let storage = backend.store.health_snapshot()?;
    let missing = backend.settings.missing_prerequisites(Some(&config))?;
    Ok(Json(json!({
        "status": "ok",
        "scheduler": backend.scheduler.describe(),
        "storage": storage,
        "missing": missing,
        "config": config,
    })))
}

#[get("/settings")]
fn get_settings(backend: &State<Backend>) -> Result<Json<StarlinkerConfig>, ApiError> {
    Ok(Json(backend.settings.load()?))
}

#[put("/settings", data = "<body>")]
fn put_settings(
    backend: &State<Backend>,
    body: Json<StarlinkerConfig>,
) -> Result<Json<StarlinkerConfig>, ApiError> {
    let config = body.into_inner();
    backend.settings.save(&config)?;
    backend
        .scheduler
        .refresh_config()
        .map_err(|e| ApiError::InvalidSettings(e.to_string()))?;
    Ok(Json(config))
}

#[patch("/settings", data = "<body>")]
fn patch_settings(
    backend: &State<Backend>,
    body: Json<Map<String, JsonValue>>,
) -> Result<Json<StarlinkerConfig>, ApiError> {
    let patch = body.into_inner();
    let config = backend.settings.apply_patch(&patch)?;
    backend
        .scheduler
        .refresh_config()
        .map_err(|e| ApiError::InvalidSettings(e.to_string()))?;
    Ok(Json(config))
}

#[get("/settings/defaults")]
fn settings_defaults(backend: &State<Backend>) -> Json<StarlinkerConfig> {
    Json(backend.settings.default_config())
}

#[get("/settings/schema")]
fn settings_schema(backend: &State<Backend>) -> Json<JsonValue> {
    Json(backend.settings.config_schema())
}

#[derive(Deserialize)]
struct PollRequest {
    #[serde(default = "default_reason")]
    reason: String,
}

fn default_reason() -> String {
    "manual".to_string()
}

#[post("/run/poll", data = "<body>")]
fn run_poll(
    backend: &State<Backend>,
    body: Json<PollRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let outcome = backend.scheduler.trigger_poll(&body.reason);
    Ok(Json(json!({
        "triggered_at": outcome.triggered_at,
        "skipped": outcome.skipped,
        "reason": body.reason,
    })))
}

#[derive(Deserialize)]
struct DigestRequest {
    #[serde(rename = "type", default = "default_digest_type")]
    digest_type: String,
}

fn default_digest_type() -> String {
    "daily".to_string()
}

#[post("/run/digest", data = "<body>")]
fn run_digest(
    backend: &State<Backend>,
    body: Json<DigestRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let outcome = backend.scheduler.trigger_digest(&body.digest_type)?;
    Ok(Json(json!({
        "triggered_at": outcome.triggered_at,
        "skipped": outcome.skipped,
        "type": body.digest_type,
    })))
}

#[derive(Deserialize)]
struct SnoozeRequest {
    minutes: i64,
}

#[post("/alerts/snooze", data = "<body>")]
fn snooze_alerts(
    backend: &State<Backend>,
    body: Json<SnoozeRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let minutes = body.minutes.clamp(5, 720);
    backend.scheduler.snooze_alerts(minutes);
    Ok(Json(json!({"status": "ok", "minutes": minutes})))
}

#[get("/digest/preview?<digest_type>")]
fn digest_preview(
    backend: &State<Backend>,
    digest_type: Option<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let digest_type = digest_type.unwrap_or_else(default_digest_type);
    let preview = backend.scheduler.preview_digest(&digest_type)?;
    Ok(Json(json!(preview)))
}

#[get("/appearance/themes")]
fn appearance_themes() -> Json<JsonValue> {
    Json(json!({"themes": starlinker_db::THEME_SLUGS}))
}

#[rocket::launch]
fn rocket() -> _ {
    env_logger::init();

    let config = ServerConfig::load().unwrap_or_else(|e| {
        error!("invalid Starlinker server configuration: {e}");
        std::process::exit(1);
    });

    let backend = Backend::new(&config).unwrap_or_else(|e| {
        error!("failed to initialize Starlinker backend: {e}");
        std::process::exit(1);
    });

    rocket::build()
        .manage(backend)
        .attach(SchedulerFairing)
        .mount(
            "/",
            routes![
                health,
                get_settings,
                put_settings,
                patch_settings,
                settings_defaults,
                settings_schema,
                run_poll,
                run_digest,
                snooze_alerts,
                digest_preview,
                appearance_themes,
            ],
        )
}
