use bytes::{Bytes, BytesMut};
use pingora_http::RequestHeader;
use pingora_proxy::Session;

use crate::{
    core::{ErrorContext, RequestContext, SiteResult},
    validation_error,
};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build a request context from the downstream request head.
///
/// An incoming `x-request-id` is kept so traces line up with upstream callers.
pub fn request_context(req: &RequestHeader) -> RequestContext {
    let uri = req
        .uri
        .path_and_query()
        .map_or_else(|| req.uri.path().to_string(), |pq| pq.to_string());

    let mut ctx = RequestContext::new(req.method.clone(), &uri);
    ctx.headers = req.headers.clone();
    if let Some(id) = get_req_header_value(req, REQUEST_ID_HEADER) {
        if !id.is_empty() {
            ctx.request_id = id.to_string();
        }
    }
    ctx
}

/// Read the whole request body, refusing anything larger than `limit` bytes
pub async fn read_request_body(session: &mut Session, limit: usize) -> SiteResult<Bytes> {
    let mut body = BytesMut::new();
    while let Some(chunk) = session
        .read_request_body()
        .await
        .with_context("reading request body")?
    {
        if body.len() + chunk.len() > limit {
            return Err(validation_error!("request body exceeds {} bytes", limit));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

/// Retrieves the value of a request header by key
pub fn get_req_header_value<'a>(req_header: &'a RequestHeader, key: &str) -> Option<&'a str> {
    req_header
        .headers
        .get(key)
        .and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;

    #[test]
    fn test_request_context_from_header() {
        let mut req = RequestHeader::build("POST", b"/content/about?draft=1", None).unwrap();
        req.insert_header("x-request-id", "req-42").unwrap();
        req.insert_header("cookie", "folio_session=abc").unwrap();

        let ctx = request_context(&req);
        assert_eq!(ctx.method, Method::POST);
        assert_eq!(ctx.path, "/content/about");
        assert_eq!(ctx.query.as_deref(), Some("draft=1"));
        assert_eq!(ctx.request_id, "req-42");
        assert_eq!(ctx.cookie("folio_session"), Some("abc"));
    }

    #[test]
    fn test_request_id_generated_when_missing() {
        let req = RequestHeader::build("GET", b"/", None).unwrap();
        let ctx = request_context(&req);
        assert!(!ctx.request_id.is_empty());
        assert_eq!(get_req_header_value(&req, "x-request-id"), None);
    }
}
