use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use tracing::{debug, warn};

use crate::auth::{Identity, USER_ID_HEADER, USER_ROLE_HEADER};
use crate::error::{AppError, UpstreamError};
use crate::gateway::routes::RouteClass;
use crate::gateway::GatewayState;

/// Connection-scoped headers that must not cross a proxy hop.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Request headers the gateway always sets itself.
const GATEWAY_OWNED: &[&str] = &[
    "host",
    "content-length",
    "x-forwarded-for",
    USER_ID_HEADER,
    USER_ROLE_HEADER,
];

fn forwardable_request_header(name: &str, class: RouteClass) -> bool {
    if HOP_BY_HOP.contains(&name) || GATEWAY_OWNED.contains(&name) {
        return false;
    }
    !(class == RouteClass::Public && name == "authorization")
}

fn forwardable_response_header(name: &str) -> bool {
    !HOP_BY_HOP.contains(&name) && name != "content-length"
}

/// Classifies the request, authenticates it if needed and relays it to the
/// upstream that owns the path.
pub async fn forward(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<GatewayState>,
) -> Result<HttpResponse, AppError> {
    let path = req.uri().path();
    let route = state
        .routes
        .resolve(path)
        .ok_or_else(|| AppError::NotFoundError(format!("no route for {}", path)))?;

    let identity = match route.class {
        RouteClass::Public => None,
        RouteClass::Protected => match state.verifier.authenticate(req.headers()) {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!(path = %path, "rejected unauthenticated request: {}", e);
                return Err(e.into());
            }
        },
    };

    let url = route.target_url(path, req.uri().query());
    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    let mut upstream = state.client.request(method, &url);
    upstream = copy_request_headers(upstream, req.headers(), route.class);
    if let Some(identity) = &identity {
        upstream = inject_identity(upstream, identity);
    }
    if let Some(peer) = req.peer_addr() {
        let prior = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok());
        let forwarded_for = match prior {
            Some(prior) => format!("{}, {}", prior, peer.ip()),
            None => peer.ip().to_string(),
        };
        upstream = upstream.header("x-forwarded-for", forwarded_for);
    }

    debug!(method = %req.method(), url = %url, "forwarding");
    let response = upstream.body(body).send().await.map_err(|e| {
        warn!(url = %url, "upstream request failed: {}", e);
        AppError::UpstreamError(e.into())
    })?;

    let status = StatusCode::from_u16(response.status().as_u16())
        .map_err(|e| AppError::UpstreamError(UpstreamError::ResponseError(e.to_string())))?;
    let mut builder = HttpResponse::build(status);
    for (name, value) in response.headers() {
        if !forwardable_response_header(name.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            builder.append_header((name, value));
        }
    }

    let bytes = response.bytes().await.map_err(|e| {
        warn!(url = %url, "failed to read upstream body: {}", e);
        AppError::UpstreamError(e.into())
    })?;

    Ok(builder.body(bytes))
}

fn copy_request_headers(
    mut upstream: reqwest::RequestBuilder,
    headers: &HeaderMap,
    class: RouteClass,
) -> reqwest::RequestBuilder {
    // Header names in actix's map are already lower-case.
    for (name, value) in headers.iter() {
        if forwardable_request_header(name.as_str(), class) {
            upstream = upstream.header(name.as_str(), value.as_bytes());
        }
    }
    upstream
}

fn inject_identity(
    mut upstream: reqwest::RequestBuilder,
    identity: &Identity,
) -> reqwest::RequestBuilder {
    for (name, value) in identity.headers() {
        upstream = upstream.header(name, value);
    }
    upstream
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_routes_drop_authorization() {
        assert!(!forwardable_request_header("authorization", RouteClass::Public));
        assert!(forwardable_request_header("authorization", RouteClass::Protected));
        assert!(forwardable_request_header("content-type", RouteClass::Public));
    }

    #[test]
    fn spoofed_identity_and_hop_headers_never_pass() {
        for class in [RouteClass::Public, RouteClass::Protected] {
            assert!(!forwardable_request_header(USER_ID_HEADER, class));
            assert!(!forwardable_request_header(USER_ROLE_HEADER, class));
            assert!(!forwardable_request_header("connection", class));
            assert!(!forwardable_request_header("host", class));
        }
    }

    #[test]
    fn response_headers_skip_framing() {
        assert!(!forwardable_response_header("transfer-encoding"));
        assert!(!forwardable_response_header("content-length"));
        assert!(forwardable_response_header("set-cookie"));
        assert!(forwardable_response_header("content-type"));
    }
}
