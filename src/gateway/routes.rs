use url::Url;

use crate::config::GatewayConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// Forwarded without authentication. Any `Authorization` header is dropped.
    Public,
    /// Requires a valid access token; the caller's identity is injected.
    Protected,
}

#[derive(Debug, Clone)]
pub struct Route {
    pub prefix: String,
    pub upstream: Url,
    pub class: RouteClass,
}

impl Route {
    fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Upstream URL for a request; path and query are passed through as-is.
    pub fn target_url(&self, path: &str, query: Option<&str>) -> String {
        let base = self.upstream.as_str().trim_end_matches('/');
        match query {
            Some(q) if !q.is_empty() => format!("{}{}?{}", base, path, q),
            _ => format!("{}{}", base, path),
        }
    }
}

/// Prefix routing table. The longest matching prefix wins, and prefixes only
/// match on whole path segments (`/api/auth` does not match `/api/authz`).
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, prefix: &str, upstream: Url, class: RouteClass) -> Self {
        self.routes.push(Route {
            prefix: prefix.trim_end_matches('/').to_string(),
            upstream,
            class,
        });
        self.routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        self
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self, AppError> {
        let parse = |name: &str, raw: &str| {
            Url::parse(raw)
                .map_err(|e| AppError::ConfigError(format!("gateway.{}: {}", name, e)))
        };

        Ok(Self::new()
            .with_route("/api/auth", parse("auth_url", &config.auth_url)?, RouteClass::Public)
            // Role administration lives on the auth service but needs an identity.
            .with_route(
                "/api/auth/admin",
                parse("auth_url", &config.auth_url)?,
                RouteClass::Protected,
            )
            .with_route("/api/user", parse("user_url", &config.user_url)?, RouteClass::Protected)
            .with_route(
                "/api/progress",
                parse("progress_url", &config.progress_url)?,
                RouteClass::Protected,
            )
            .with_route("/api/ai", parse("ai_url", &config.ai_url)?, RouteClass::Protected))
    }

    pub fn resolve(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.matches(path))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
