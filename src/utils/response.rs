//! Response writing shared by the site front end and the status endpoints.

use http::{header, Response, StatusCode};
use pingora_error::Result;
use pingora_http::ResponseHeader;
use pingora_proxy::Session;
use serde::Serialize;

use crate::core::context::SiteResponse;

/// Standard content types
pub mod content_type {
    pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
    pub const APPLICATION_JSON: &str = "application/json";
}

/// Build a JSON `Response` for the status endpoints
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Vec<u8>> {
    match serde_json::to_vec(body) {
        Ok(json_body) => Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, content_type::APPLICATION_JSON)
            .body(json_body)
            .unwrap_or_else(|e| {
                log::error!("Failed to build JSON response: {e}");
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }),
        Err(e) => {
            log::error!("Failed to serialize JSON response: {e}");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "JSON serialization failed")
        }
    }
}

/// Build a plain-text `Response`
pub fn text_response(status: StatusCode, message: &str) -> Response<Vec<u8>> {
    let mut response = Response::new(message.as_bytes().to_vec());
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(content_type::TEXT_PLAIN),
    );
    response
}

/// Convert a finished site response into a pingora response head
pub fn build_response_header(response: &SiteResponse) -> Result<ResponseHeader> {
    let mut resp = ResponseHeader::build(response.status, Some(response.headers.len() + 1))?;
    for (name, value) in response.headers.iter() {
        resp.append_header(name.clone(), value.clone())?;
    }
    resp.insert_header(header::CONTENT_LENGTH, response.body.len().to_string())?;
    Ok(resp)
}

/// Write a site response downstream; the body is skipped for HEAD requests
pub async fn send_site_response(
    session: &mut Session,
    response: &SiteResponse,
    head_only: bool,
) -> Result<()> {
    let resp = build_response_header(response)?;
    let end_of_stream = head_only || response.body.is_empty();
    session
        .write_response_header(Box::new(resp), end_of_stream)
        .await?;

    if !end_of_stream {
        session
            .write_response_body(Some(response.body.clone()), true)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_json_response() {
        let response = json_response(StatusCode::OK, &json!({"status": "ok", "pending": []}));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            content_type::APPLICATION_JSON
        );
        assert_eq!(response.body(), br#"{"pending":[],"status":"ok"}"#);
    }

    #[test]
    fn test_text_response() {
        let response = text_response(StatusCode::NOT_FOUND, "Not Found");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body(), b"Not Found");
    }

    #[test]
    fn test_build_response_header() {
        let mut response = SiteResponse::default();
        response.html(StatusCode::CREATED, "<p>saved</p>");
        response
            .headers
            .append(header::SET_COOKIE, "a=1".parse().unwrap());
        response
            .headers
            .append(header::SET_COOKIE, "b=2".parse().unwrap());

        let resp = build_response_header(&response).unwrap();
        assert_eq!(resp.status, StatusCode::CREATED);
        assert_eq!(resp.headers.get_all(header::SET_COOKIE).iter().count(), 2);
        assert_eq!(resp.headers.get(header::CONTENT_LENGTH).unwrap(), "12");
    }
}
