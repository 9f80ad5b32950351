use crate::composer::CatalogueError;
use actix_web::{HttpRequest, HttpResponse};
use derive_more::{Display, Error};

pub mod catalogue;

pub type Response = Result<HttpResponse, ControllerError>;

#[derive(Debug, Display, Error)]
pub enum ControllerError {
    NotFound,
    Forbidden,
    #[display("Service unavailable: {reason}")]
    Unavailable {
        #[error(ignore)]
        reason: String,
    },
    #[error(ignore)]
    InternalServerError(anyhow::Error),
}

impl From<anyhow::Error> for ControllerError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalServerError(err)
    }
}

impl From<CatalogueError> for ControllerError {
    fn from(err: CatalogueError) -> Self {
        match err {
            // hidden rubrics look exactly like missing ones
            CatalogueError::NotFound | CatalogueError::Forbidden => Self::NotFound,
            CatalogueError::Cancelled | CatalogueError::Timeout => Self::Unavailable {
                reason: err.to_string(),
            },
            CatalogueError::Aggregation(err) => Self::Unavailable {
                reason: format!("{err:#}"),
            },
        }
    }
}

impl actix_web::error::ResponseError for ControllerError {
    fn error_response(&self) -> HttpResponse {
        log::warn!("{self:?}");
        use ControllerError::*;
        match self {
            NotFound => HttpResponse::NotFound().json(serde_json::json!({ "error": "not_found" })),
            Forbidden => {
                HttpResponse::Forbidden().json(serde_json::json!({ "error": "forbidden" }))
            }
            Unavailable { .. } => HttpResponse::ServiceUnavailable()
                .insert_header(("Retry-After", "1"))
                .json(serde_json::json!({ "error": "unavailable" })),
            InternalServerError(err) => HttpResponse::InternalServerError().body(err.to_string()),
        }
    }
}

pub fn ensure_api_key(req: &HttpRequest) -> Result<(), ControllerError> {
    let expected = std::env::var("SITE_API_KEY").map_err(|_| ControllerError::Forbidden)?;
    if expected.trim().is_empty() {
        return Err(ControllerError::Forbidden);
    }
    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if Some(expected) != provided {
        return Err(ControllerError::Forbidden);
    }
    Ok(())
}
