use crate::composer::{CatalogueComposer, CatalogueRequest};
use crate::control::{ensure_api_key, Response};
use actix_web::web::{Data, Json, Path};
use actix_web::{get, post, HttpRequest, HttpResponse};
use catalogue_types::tenant::SessionHints;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn header(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn session_hints(req: &HttpRequest) -> SessionHints {
    SessionHints {
        city: header(req, "x-city"),
        company: header(req, "x-company"),
        currency: header(req, "x-currency"),
        locale: header(req, "x-locale"),
    }
}

#[get("/catalogue/{path:.*}")]
pub async fn catalogue(
    req: HttpRequest,
    path: Path<String>,
    composer: Data<Arc<CatalogueComposer>>,
    shutdown: Data<CancellationToken>,
) -> Response {
    let request = CatalogueRequest {
        path: path.into_inner(),
        session: session_hints(&req),
    };
    // cancelled on shutdown only, a client disconnect drops this future instead
    let token = shutdown.child_token();
    let page = composer.compose(&request, token).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[derive(Deserialize, Default)]
pub struct InvalidateRequest {
    pub rubric: Option<String>,
}

#[post("/api/catalogue/invalidate")]
pub async fn invalidate(
    req: HttpRequest,
    composer: Data<Arc<CatalogueComposer>>,
    body: Option<Json<InvalidateRequest>>,
) -> Response {
    ensure_api_key(&req)?;
    let body = body.map(Json::into_inner).unwrap_or_default();
    composer.metadata().invalidate(body.rubric.as_deref()).await;
    Ok(HttpResponse::NoContent().finish())
}
