use axum::{
	Json, Router,
	extract::{State, rejection::JsonRejection},
	http::{StatusCode, header},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::Serialize;

use crate::{state::AppState, stream};
use sage_service::{Error as ServiceError, MISSING_PROMPT_MESSAGE, SearchRequest};

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/stream_search", post(stream_search))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

/// Rejections are answered with a plain failure body instead of a stream, so clients see the same
/// `success`/`message` shape whether or not a session started.
async fn stream_search(
	State(state): State<AppState>,
	payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
	let Json(request) = payload.map_err(|rejection| {
		tracing::debug!(error = %rejection, "Rejected malformed search request.");

		ApiError::new(format!("{MISSING_PROMPT_MESSAGE} {}", rejection.body_text()))
	})?;
	let events = state.service.stream_search(request)?;

	Ok(([(header::CONTENT_TYPE, "application/json")], stream::event_body(events)).into_response())
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	success: bool,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	message: String,
}
impl ApiError {
	fn new(message: impl Into<String>) -> Self {
		Self { message: message.into() }
	}
}

impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		match err {
			ServiceError::InvalidRequest { message } => Self::new(message),
			other => {
				tracing::error!(error = %other, "Search request failed before streaming.");

				Self::new("Search could not be started.")
			},
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { success: false, message: self.message };

		(StatusCode::OK, Json(body)).into_response()
	}
}
