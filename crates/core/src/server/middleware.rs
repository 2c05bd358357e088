use hyper::HeaderMap;
use hyper::header::{
  ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
  ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue, ORIGIN,
};
use uuid::Uuid;

pub const REQUEST_ID: &str = "request-id";

/// The caller's `Request-ID`, or a fresh one.
pub fn request_id(headers: &HeaderMap) -> String {
  headers
    .get(REQUEST_ID)
    .and_then(|v| v.to_str().ok())
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .map(str::to_string)
    .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// CORS and request id headers set on every response.
pub fn apply_default_headers(
  response: &mut HeaderMap,
  request: &HeaderMap,
  request_id: &str,
) {
  if let Some(origin) = request.get(ORIGIN)
    && !origin.is_empty()
  {
    response.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
  }
  if let Ok(id) = HeaderValue::from_str(request_id) {
    response.insert(REQUEST_ID, id);
  }
  response.insert(
    ACCESS_CONTROL_ALLOW_METHODS,
    HeaderValue::from_static("POST, GET, OPTIONS, PUT, DELETE"),
  );
  response.insert(
    ACCESS_CONTROL_ALLOW_HEADERS,
    HeaderValue::from_static("Content-Type, Content-Length, Accept-Encoding, X-CSRF-Token"),
  );
  response.insert(
    ACCESS_CONTROL_EXPOSE_HEADERS,
    HeaderValue::from_static("Cache-Control, Content-Type, Expires, Last-Modified"),
  );
  response.insert(
    ACCESS_CONTROL_ALLOW_CREDENTIALS,
    HeaderValue::from_static("true"),
  );
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn request_id_is_echoed_or_generated() {
    let mut h = HeaderMap::new();
    let generated = request_id(&h);
    assert!(Uuid::parse_str(&generated).is_ok());
    h.insert(REQUEST_ID, HeaderValue::from_static("abc-123"));
    assert_eq!(request_id(&h), "abc-123");
  }

  #[test]
  fn origin_is_echoed() {
    let mut req = HeaderMap::new();
    req.insert(ORIGIN, HeaderValue::from_static("https://dash.example"));
    let mut resp = HeaderMap::new();
    apply_default_headers(&mut resp, &req, "id-1");
    assert_eq!(resp[ACCESS_CONTROL_ALLOW_ORIGIN], "https://dash.example");
    assert_eq!(resp[REQUEST_ID], "id-1");
    assert_eq!(resp[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");

    let mut resp = HeaderMap::new();
    apply_default_headers(&mut resp, &HeaderMap::new(), "id-2");
    assert!(resp.get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
  }
}
