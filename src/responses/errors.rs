use crate::errors::ServerError;
use astra::{Body, Response, ResponseBuilder};
use serde_json::json;
use tracing::error;

/// Convert a ServerError into a JSON error response
pub fn error_to_response(err: ServerError) -> Response {
    if let ServerError::Internal(msg) = &err {
        error!(error = %msg, "internal error");
    }

    let status = err.status();
    let body = json!({
        "success": false,
        "error": err.to_string(),
    });

    let text = body.to_string();

    ResponseBuilder::new()
        .status(status)
        .header("Content-Type", "application/json; charset=utf-8")
        .body(Body::from(text.clone()))
        .unwrap_or_else(|_| Response::new(Body::from(text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn errors_render_as_json_with_status() {
        let resp = error_to_response(ServerError::BadRequest("neighborhoods is empty".into()));
        assert_eq!(resp.status(), 400);

        let mut body = String::new();
        resp.into_body().reader().read_to_string(&mut body).unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "Bad Request: neighborhoods is empty");
    }
}
