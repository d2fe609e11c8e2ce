mod api;
mod auth;
mod config;
mod storage;

use api::{handle_api_request, parse_route, ApiInput, ApiReply};
use config::{StorageBackendKind, StorageConfig};
use serde_json::{json, Value};
use std::cell::RefCell;
use storage::{open_backend, SqlStorageBackend, Storage, StorageResult};
use worker::durable::{DurableObject, State};
use worker::*;

fn now_ms() -> i64 {
    Date::now().as_millis() as i64
}

fn json_response(payload: Value, status: u16) -> Result<Response> {
    Response::from_json(&payload).map(|response| response.with_status(status))
}

fn query_pairs(url: &Url) -> Vec<(String, String)> {
    url.query_pairs()
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect()
}

#[event(fetch)]
pub async fn fetch(req: Request, env: Env, _ctx: Context) -> Result<Response> {
    let url = req.url()?;
    let method = req.method();
    let fetch_mode = req
        .headers()
        .get("Sec-Fetch-Mode")?
        .unwrap_or_default()
        .to_ascii_lowercase();
    let accept_header = req
        .headers()
        .get("Accept")?
        .unwrap_or_default()
        .to_ascii_lowercase();

    if url.path() == "/api/health" {
        return Response::from_json(&json!({
            "ok": true,
            "timestamp": now_ms(),
        }));
    }

    if url.path().starts_with("/api/") {
        let config = StorageConfig::from_env(&env);
        let namespace = env.durable_object("STORE")?;
        let object_id = namespace.id_from_name(&config.database_name)?;
        let stub = object_id.get_stub()?;
        return stub.fetch_with_request(req).await;
    }

    if let Ok(assets) = env.assets("ASSETS") {
        let asset_response = assets.fetch_request(req).await?;
        if asset_response.status_code() != 404 {
            return Ok(asset_response);
        }

        let is_get_or_head = matches!(method, Method::Get | Method::Head);
        let is_html_navigation = fetch_mode == "navigate" || accept_header.contains("text/html");
        let path = url.path();
        let last_segment = path.rsplit('/').next().unwrap_or_default();
        let looks_like_static_file = last_segment.contains('.');
        if is_get_or_head && is_html_navigation && !looks_like_static_file {
            let mut index_url = url.clone();
            index_url.set_path("/index.html");
            index_url.set_query(None);
            index_url.set_fragment(None);

            let mut init = RequestInit::new();
            init.with_method(method);
            let index_request = Request::new_with_init(index_url.as_str(), &init)?;
            return assets.fetch_request(index_request).await;
        }

        return Ok(asset_response);
    }

    Response::error("Not Found", 404)
}

#[durable_object]
pub struct GalaxigaStore {
    config: StorageConfig,
    storage: RefCell<StorageResult<Box<dyn Storage>>>,
}

impl GalaxigaStore {
    fn open_storage(state: &State, config: &StorageConfig) -> StorageResult<Box<dyn Storage>> {
        let opened = open_backend(&config.backend, || {
            let backend = SqlStorageBackend::new(state.storage().sql())?;
            Ok(Box::new(backend) as Box<dyn Storage>)
        });
        match (&opened, &config.backend) {
            (Ok(_), StorageBackendKind::Sql) => {
                console_log!("storage backend: sql ({})", config.database_name)
            }
            (Ok(_), StorageBackendKind::Memory) => console_log!("storage backend: memory"),
            (Err(error), _) => console_error!("failed to initialize sql storage: {error}"),
        }
        opened
    }

    fn reply(reply: ApiReply) -> Result<Response> {
        json_response(reply.body, reply.status)
    }
}

impl DurableObject for GalaxigaStore {
    fn new(state: State, env: Env) -> Self {
        let config = StorageConfig::from_env(&env);
        let storage = Self::open_storage(&state, &config);

        Self {
            config,
            storage: RefCell::new(storage),
        }
    }

    async fn fetch(&self, mut req: Request) -> Result<Response> {
        let url = req.url()?;
        let method = req.method();

        let route = match parse_route(&method, url.path(), &query_pairs(&url)) {
            Some(Ok(route)) => route,
            Some(Err(reply)) => return Self::reply(reply),
            None => return json_response(json!({ "error": "not found" }), 404),
        };

        let authorization = req.headers().get("Authorization")?;
        let body = match method {
            Method::Post | Method::Put => Some(req.text().await?),
            _ => None,
        };

        let input = ApiInput {
            body,
            authorization,
            now: now_ms(),
            auth_leeway_seconds: self.config.auth_leeway_seconds,
        };

        // No awaits past this point: each request runs against storage in one turn.
        let mut opened = self.storage.borrow_mut();
        let storage = match opened.as_mut() {
            Ok(storage) => storage,
            Err(error) => {
                console_error!("storage unavailable for {method:?} {}: {error}", url.path());
                return json_response(json!({ "error": "internal storage error" }), 500);
            }
        };
        match handle_api_request(route, &input, &mut **storage) {
            Ok(reply) => {
                if reply.status == 401 {
                    console_log!("rejected {method:?} {}: unauthorized", url.path());
                }
                Self::reply(reply)
            }
            Err(error) => {
                console_error!("storage error on {method:?} {}: {error}", url.path());
                json_response(json!({ "error": "internal storage error" }), 500)
            }
        }
    }
}
