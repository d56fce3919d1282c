mod error;
mod session;

use crate::cache::{Fanout, PurgeWebhook, ResponseCache};
use crate::credentials::{consumer_pair, Credentials, TokenPair};
use crate::pipeline::{Pipeline, PipelineOutcome, FRIENDS_TAG};
use crate::twitter::v1::{self, TwitterClientV1};
use crate::twitter::GraphClient;
use crate::ServeArgs;
use actix_cors::Cors;
use actix_files::Files;
use actix_web::http::header::{self, LOCATION};
use actix_web::middleware::{DefaultHeaders, Logger};
use actix_web::web::{Data, Json, Query, ServiceConfig};
use actix_web::{get, post, App, HttpRequest, HttpResponse, HttpServer};
use anyhow::Context;
use chrono::Duration;
use error::{HttpError, IntoHttpError};
use serde::Deserialize;
use serde_json::json;
use session::{Authenticated, SessionData, SessionStore};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use url::Url;

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; \
    script-src 'self' 'unsafe-inline' *.googleapis.com *.gstatic.com; \
    style-src 'self' 'unsafe-inline' *.googleapis.com *.gstatic.com; \
    img-src 'self' data: *.twimg.com *.gstatic.com; \
    worker-src 'self'; \
    block-all-mixed-content";

/// How long sessions and cached responses are kept
#[derive(Debug, Clone, Copy)]
pub struct Expiry {
    pub session: Duration,
    pub cache: Duration,
}

pub struct AppState {
    consumer: TokenPair,
    /// Where the app is reached from outside, always ending in `/`
    public: Url,
    callback: Url,
    client: Arc<dyn GraphClient>,
    cache: Arc<ResponseCache>,
    pipeline: Pipeline,
    sessions: SessionStore,
}

impl AppState {
    pub fn new(
        consumer: TokenPair,
        public_url: &Url,
        client: Arc<dyn GraphClient>,
        purge: Option<PurgeWebhook>,
        concurrency: usize,
        expiry: Expiry,
    ) -> anyhow::Result<Self> {
        let public = with_trailing_slash(public_url);
        let callback = public
            .join("api/auth/callback")
            .context("Invalid public URL")?;
        let cache = Arc::new(ResponseCache::new(expiry.cache));
        let mut invalidator = Fanout::default().with(cache.clone());
        if let Some(purge) = purge {
            invalidator = invalidator.with(Arc::new(purge));
        }
        let pipeline = Pipeline::new(client.clone(), Arc::new(invalidator), concurrency)?;
        let sessions = SessionStore::new(expiry.session, public.scheme() == "https");
        Ok(Self {
            consumer,
            public,
            callback,
            client,
            cache,
            pipeline,
            sessions,
        })
    }

    /// Redirect to `path` below the public URL, so a path prefix survives
    fn redirect(&self, path: &str) -> HttpResponse {
        let location = self
            .public
            .join(path)
            .map_or_else(|_| format!("/{}", path), String::from);
        HttpResponse::Found()
            .insert_header((LOCATION, location))
            .finish()
    }
}

/// `https://host/app` and `https://host/app/` both name the directory `app/`
fn with_trailing_slash(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Headers sent with every response: a content security policy that lets the
/// front end load Google fonts and Twitter avatars, plus the usual hardening.
fn security_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add((header::CONTENT_SECURITY_POLICY, CONTENT_SECURITY_POLICY))
        .add((header::X_CONTENT_TYPE_OPTIONS, "nosniff"))
        .add((header::X_FRAME_OPTIONS, "SAMEORIGIN"))
        .add((header::REFERRER_POLICY, "no-referrer"))
        .add((header::STRICT_TRANSPORT_SECURITY, "max-age=15552000; includeSubDomains"))
        .add((header::X_DNS_PREFETCH_CONTROL, "off"))
        .add(("X-Download-Options", "noopen"))
        .add(("X-Permitted-Cross-Domain-Policies", "none"))
}

/// Credentialed CORS for the app's own origin and an optional separately hosted front end
fn cors(public: &Url, front_end: Option<&Url>) -> Cors {
    let mut cors = Cors::default()
        .allowed_origin(&public.origin().ascii_serialization())
        .allowed_methods(vec!["GET", "POST"])
        .allowed_headers(vec![header::CONTENT_TYPE, header::ACCEPT])
        .supports_credentials()
        .max_age(3600);
    if let Some(front_end) = front_end {
        cors = cors.allowed_origin(&front_end.origin().ascii_serialization());
    }
    cors
}

#[get("/api/auth")]
async fn auth_start(state: Data<AppState>, req: HttpRequest) -> Result<HttpResponse, HttpError> {
    let request = v1::request_token(&state.consumer, &state.callback)
        .await
        .map_500()?;
    let url = v1::authorize_url(&request);
    let (id, mut data) = match state.sessions.load(&req) {
        Some((id, data)) => (Some(id), data),
        None => (None, SessionData::default()),
    };
    data.request_token = Some(request);
    let id = state.sessions.save(id, data);
    Ok(HttpResponse::Found()
        .insert_header((LOCATION, url))
        .cookie(state.sessions.cookie(id))
        .finish())
}

#[derive(Deserialize)]
struct CallbackQuery {
    oauth_token: Option<String>,
    oauth_verifier: Option<String>,
}

#[get("/api/auth/callback")]
async fn auth_callback(
    state: Data<AppState>,
    req: HttpRequest,
    query: Query<CallbackQuery>,
) -> HttpResponse {
    let (id, mut data) = match state.sessions.load(&req) {
        Some(session) => session,
        None => return state.redirect("401"),
    };
    // Request tokens are single use, whether or not the exchange works out
    let pending = data.request_token.take();
    state.sessions.save(Some(id.clone()), data.clone());
    let (request, verifier) = match (pending, &query.oauth_token, &query.oauth_verifier) {
        (Some(request), Some(token), Some(verifier)) if request.key == *token => {
            (request, verifier.clone())
        }
        _ => {
            log::warn!("OAuth callback without a matching request token");
            return state.redirect("401");
        }
    };
    match v1::access_token(&state.consumer, &request, &verifier).await {
        Ok((access, profile)) => {
            data.access = Some(access);
            data.profile = Some(profile);
            state.sessions.save(Some(id), data);
            state.redirect("")
        }
        Err(e) => {
            log::warn!("Unable to complete sign in: {}", e);
            state.redirect("401")
        }
    }
}

#[get("/401")]
async fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().finish()
}

#[get("/api/profile")]
async fn get_profile(user: Authenticated) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "profile": user.profile }))
}

#[post("/api/signout")]
async fn signout(state: Data<AppState>, req: HttpRequest) -> Result<HttpResponse, HttpError> {
    if let Some((id, _)) = state.sessions.load(&req) {
        state.sessions.remove(&id);
    }
    let mut response = HttpResponse::Ok().finish();
    response
        .add_removal_cookie(&state.sessions.cookie(String::new()))
        .map_500()?;
    Ok(response)
}

#[get("/api/friends")]
async fn list_friends(
    state: Data<AppState>,
    user: Authenticated,
) -> Result<HttpResponse, HttpError> {
    let key = user.profile.id.to_string();
    if let Some(cached) = state.cache.get(FRIENDS_TAG, &key) {
        return Ok(HttpResponse::Ok().json(cached));
    }
    let credentials = Credentials::for_session(&state.consumer, Some(&user.access)).map_401()?;
    let excluded = state
        .client
        .list_excluded_ids(&credentials)
        .await
        .map_500()?;
    let body = json!({ "noRetweets": excluded });
    state.cache.insert(FRIENDS_TAG, &key, body.clone());
    Ok(HttpResponse::Ok().json(body))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FriendsUpdate {
    want_retweets: bool,
}

#[post("/api/friends")]
async fn update_friends(
    state: Data<AppState>,
    user: Authenticated,
    body: Json<FriendsUpdate>,
) -> Result<HttpResponse, HttpError> {
    let credentials = Credentials::for_session(&state.consumer, Some(&user.access));
    log::info!(
        "@{} wants retweets {}",
        user.profile.username,
        if body.want_retweets { "shown" } else { "hidden" }
    );
    match state.pipeline.run(credentials, body.want_retweets).await {
        PipelineOutcome::Succeeded { .. } => Ok(HttpResponse::NoContent().finish()),
        PipelineOutcome::Failed(failure) => {
            log::warn!("Toggling retweets for @{} failed: {}", user.profile.username, failure);
            Err(failure.into())
        }
    }
}

fn configure_api(cfg: &mut ServiceConfig) {
    cfg.service(auth_start)
        .service(auth_callback)
        .service(unauthorized)
        .service(get_profile)
        .service(signout)
        .service(list_friends)
        .service(update_friends);
}

fn configure(cfg: &mut ServiceConfig, static_dir: &Path) {
    configure_api(cfg);
    cfg.service(Files::new("/", static_dir).index_file("index.html"));
}

pub async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let consumer =
        consumer_pair(&args.app_key, &args.app_secret).context("APP_KEY and APP_SECRET must be set")?;
    let public_url = match &args.public_url {
        Some(url) => url.clone(),
        None => Url::parse(&format!("http://localhost:{}/", args.port))?,
    };
    let expiry = Expiry {
        session: Duration::seconds(i64::from(args.session_max_age)),
        cache: Duration::seconds(i64::from(args.cache_ttl)),
    };
    let purge = args.cache_purge_url.clone().map(PurgeWebhook::new);
    let state = Data::new(AppState::new(
        consumer,
        &public_url,
        Arc::new(TwitterClientV1),
        purge,
        args.concurrency,
        expiry,
    )?);
    log::info!("OAuth callback is {}", state.callback);
    let static_dir = args.static_dir.clone();
    let front_end = args.cors_origin.clone();
    let socket = SocketAddr::new(args.host, args.port);
    let server = HttpServer::new(move || {
        App::new()
            .wrap(cors(&state.public, front_end.as_ref()))
            .wrap(security_headers())
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(|cfg| configure(cfg, &static_dir))
    })
    .bind(socket)?
    .run();
    log::info!("Listening on http://{} ({})", socket, public_url);
    if args.launch {
        open::that(public_url.as_str()).ok();
    }
    server.await.context("Unable to run HTTP server")?;
    Ok(())
}
