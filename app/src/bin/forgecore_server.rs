//! Admin HTTP surface for the ForgeCore module runtime (§6, module-runtime
//! table). Routes are thin wrappers over `ForgeRuntime`/`ModuleLoader`, in
//! the teacher's `mmoldb-app::api` style: `Json<T>` bodies, a JSON-rendering
//! `ApiError` `Responder`, routes gathered by `rocket::routes!`.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use forge_core::{order_from_graph, ForgeRuntime, KvError, LoaderError, ModuleRegistry};
use log::error;
use miette::Diagnostic;
use rocket::http::Status;
use rocket::response::Responder;
use rocket::serde::json::{json, Json, Value as JsonValue};
use rocket::{delete, get, put, routes, Request, Response, State};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerConfig {
    module_dir: PathBuf,
    storage_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            module_dir: PathBuf::from("modules"),
            storage_dir: None,
        }
    }
}

impl ServerConfig {
    fn load() -> figment::Result<Self> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("ForgeCore.toml"))
            .merge(Env::prefixed("FORGECORE_"))
            .extract()
    }
}

#[derive(Debug, Error, Diagnostic)]
enum ApiError {
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Kv(#[from] KvError),
    #[error("not found: {0}")]
    NotFound(String),
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = match self {
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::Loader(LoaderError::CircularDependency(_)) => Status::UnprocessableEntity,
            _ => Status::InternalServerError,
        };
        let body = json!({"error": self.to_string()}).to_string();
        Response::build()
            .status(status)
            .header(rocket::http::ContentType::JSON)
            .sized_body(body.len(), std::io::Cursor::new(body))
            .ok()
    }
}

struct Runtime(Mutex<ForgeRuntime>);

#[derive(Serialize)]
struct ModuleSummary {
    name: String,
    version: Option<String>,
    enabled: bool,
    provides: Vec<String>,
    requires: Vec<String>,
}

#[get("/api/modules")]
fn list_modules(rt: &State<Runtime>) -> Json<Vec<ModuleSummary>> {
    let rt = rt.0.lock().unwrap();
    let mut out: Vec<ModuleSummary> = rt
        .loader
        .modules()
        .iter()
        .map(|(name, state)| ModuleSummary {
            name: name.clone(),
            version: state.manifest.version.clone(),
            enabled: state.enabled,
            provides: state.manifest.provides.clone(),
            requires: state.manifest.requires.clone(),
        })
        .collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Json(out)
}

#[get("/api/modules/<name>")]
fn get_module(rt: &State<Runtime>, name: &str) -> Result<Json<ModuleSummary>, ApiError> {
    let rt = rt.0.lock().unwrap();
    let state = rt
        .loader
        .modules()
        .get(name)
        .ok_or_else(|| ApiError::NotFound(name.to_string()))?;
    Ok(Json(ModuleSummary {
        name: name.to_string(),
        version: state.manifest.version.clone(),
        enabled: state.enabled,
        provides: state.manifest.provides.clone(),
        requires: state.manifest.requires.clone(),
    }))
}

#[get("/api/storage/<module>")]
fn list_storage_keys(rt: &State<Runtime>, module: &str) -> Result<Json<JsonValue>, ApiError> {
    let rt = rt.0.lock().unwrap();
    let keys = rt.storage.list_keys(module)?;
    Ok(Json(json!({"keys": keys})))
}

#[get("/api/storage/<module>/<key>")]
fn get_storage_value(
    rt: &State<Runtime>,
    module: &str,
    key: &str,
) -> Result<Json<JsonValue>, ApiError> {
    let rt = rt.0.lock().unwrap();
    let value: Option<JsonValue> = rt.storage.load(module, key)?;
    value
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("{module}/{key}")))
}

#[derive(Deserialize)]
struct StoreValue {
    value: JsonValue,
}

#[put("/api/storage/<module>/<key>", data = "<body>")]
fn put_storage_value(
    rt: &State<Runtime>,
    module: &str,
    key: &str,
    body: Json<StoreValue>,
) -> Result<Json<JsonValue>, ApiError> {
    let rt = rt.0.lock().unwrap();
    rt.storage.store(module, key, &body.value)?;
    Ok(Json(json!({"status": "ok"})))
}

#[delete("/api/storage/<module>/<key>")]
fn delete_storage_value(
    rt: &State<Runtime>,
    module: &str,
    key: &str,
) -> Result<Json<JsonValue>, ApiError> {
    let rt = rt.0.lock().unwrap();
    rt.storage.delete(module, key)?;
    Ok(Json(json!({"status": "ok"})))
}

#[derive(Deserialize)]
struct ValidateRequest {
    graph: HashMap<String, Vec<String>>,
}

#[derive(Serialize)]
struct ValidateResponse {
    order: Vec<String>,
}

#[rocket::post("/api/validate", data = "<body>")]
fn validate_graph(body: Json<ValidateRequest>) -> Result<Json<ValidateResponse>, ApiError> {
    let order = order_from_graph(&body.graph)?;
    Ok(Json(ValidateResponse { order }))
}

#[rocket::launch]
fn rocket() -> _ {
    env_logger::init();

    let config = ServerConfig::load().unwrap_or_else(|e| {
        error!("invalid ForgeCore server configuration: {e}");
        std::process::exit(1);
    });

    let mut runtime = ForgeRuntime::new(
        config.module_dir.clone(),
        config.storage_dir.as_deref(),
        ModuleRegistry::new(),
    )
    .unwrap_or_else(|e| {
        error!("failed to construct ForgeCore runtime: {e}");
        std::process::exit(1);
    });
    if let Err(e) = runtime.start() {
        error!("failed to start ForgeCore runtime: {e}");
        std::process::exit(1);
    }

    rocket::build().manage(Runtime(Mutex::new(runtime))).mount(
        "/",
        routes![
            list_modules,
            get_module,
            list_storage_keys,
            get_storage_value,
            put_storage_value,
            delete_storage_value,
            validate_graph,
        ],
    )
}
