//! Envelope API over plain HTTP.
//!
//! Every URL not claimed by another route lands here:
//!
//! | Verb | Command |
//! |------|---------|
//! | `GET` | get |
//! | `PUT` | set |
//! | `POST` | create |
//! | `DELETE` | delete |
//!
//! A success returns `200` with the raw result; a failure returns `400`
//! with `{"error": ...}`.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, Uri};
use serde_json::{Map, Value};

use meshbridge_domain::envelope::{Command, Request};
use meshbridge_domain::error::ValidationError;
use meshbridge_domain::path::Path;

use crate::error::ApiError;
use crate::state::AppState;

/// Command for an HTTP verb.
///
/// # Errors
///
/// Returns [`ValidationError::UnknownCommand`] for verbs outside the mapping.
pub fn command_for(method: &Method) -> Result<Command, ValidationError> {
    match *method {
        Method::GET => Ok(Command::Get),
        Method::PUT => Ok(Command::Set),
        Method::POST => Ok(Command::Create),
        Method::DELETE => Ok(Command::Delete),
        _ => Err(ValidationError::UnknownCommand(
            method.as_str().to_ascii_lowercase(),
        )),
    }
}

/// Parse the request body; an empty body is an empty object.
fn body_data(body: &[u8]) -> Result<Map<String, Value>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(data)) => Ok(data),
        Ok(_) => Err(ValidationError::DataNotObject.into()),
        Err(_) => Err(ApiError::new(format!(
            "failed to parse HTTP body json: {}",
            String::from_utf8_lossy(body)
        ))),
    }
}

/// Fallback handler: `<VERB> /<path...>` with an optional JSON body.
pub async fn envelope(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request = command_for(&method)
        .map_err(ApiError::from)
        .and_then(|command| Ok(Request::new(command, Path::parse(uri.path()), body_data(&body)?)));
    let request = match request {
        Ok(request) => request,
        Err(error) => {
            tracing::error!(%method, %uri, error = error.message(), "command failed");
            return Err(error);
        }
    };
    let response = state.api.call(request).await;
    match response.error {
        Some(error) => Err(ApiError::new(error)),
        None => Ok(Json(response.data.unwrap_or_else(|| Value::Object(Map::new())))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_map_verbs_to_commands() {
        assert_eq!(command_for(&Method::GET), Ok(Command::Get));
        assert_eq!(command_for(&Method::PUT), Ok(Command::Set));
        assert_eq!(command_for(&Method::POST), Ok(Command::Create));
        assert_eq!(command_for(&Method::DELETE), Ok(Command::Delete));
    }

    #[test]
    fn should_reject_unmapped_verb() {
        assert_eq!(
            command_for(&Method::PATCH),
            Err(ValidationError::UnknownCommand("patch".to_string()))
        );
    }

    #[test]
    fn should_treat_blank_body_as_empty_object() {
        assert!(body_data(b"").unwrap().is_empty());
        assert!(body_data(b"  \n").unwrap().is_empty());
    }

    #[test]
    fn should_reject_non_object_body() {
        assert_eq!(body_data(b"[1]").unwrap_err().message(), "data is not an object");
        assert!(body_data(b"{oops").unwrap_err().message().starts_with("failed to parse"));
    }
}
