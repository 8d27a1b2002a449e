//! HTTP Basic authentication in front of every broker route.

use crate::{errors::AppError, services::broker_service::BrokerService};
use axum::{
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use headers::{Authorization, HeaderMapExt, authorization::Basic};
use subtle::ConstantTimeEq;
use tracing::info;

/// The username and password the platform must present.
#[derive(Clone)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl BasicCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Compare without short-circuiting on the first differing byte.
    pub fn matches(&self, presented: &Basic) -> bool {
        let username = self.username.as_bytes().ct_eq(presented.username().as_bytes());
        let password = self.password.as_bytes().ct_eq(presented.password().as_bytes());
        (username & password).into()
    }
}

/// Reject the request with 401 unless it carries the broker credentials.
pub async fn require_basic_auth(
    State(service): State<BrokerService>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request.headers().typed_get::<Authorization<Basic>>();
    match presented {
        Some(Authorization(basic)) if service.credentials().matches(&basic) => {
            next.run(request).await
        }
        Some(Authorization(basic)) => {
            info!("Authorization failed for user {}", basic.username());
            unauthorized()
        }
        None => {
            info!("Authorization failed: missing or malformed basic credentials");
            unauthorized()
        }
    }
}

fn unauthorized() -> Response {
    let mut response = AppError::unauthorized("Authorization failed").into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"stardog-service-broker\""),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    fn decode(raw: &str) -> Option<Basic> {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(raw).unwrap());
        headers.typed_get::<Authorization<Basic>>().map(|auth| auth.0)
    }

    #[test]
    fn matches_exact_credentials_only() {
        let creds = BasicCredentials::new("broker", "p:w");
        assert!(creds.matches(&Authorization::basic("broker", "p:w").0));
        assert!(!creds.matches(&Authorization::basic("broker", "p:").0));
        assert!(!creds.matches(&Authorization::basic("Broker", "p:w").0));
        assert!(!creds.matches(&Authorization::basic("broker", "p:w ").0));
    }

    #[test]
    fn lowercase_scheme_is_accepted() {
        let basic = decode("basic YnJva2VyOnB3").unwrap();
        assert_eq!(basic.username(), "broker");
        assert_eq!(basic.password(), "pw");
        assert!(BasicCredentials::new("broker", "pw").matches(&basic));
    }

    #[test]
    fn rejects_malformed_headers() {
        for raw in ["Bearer abc", "Basic", "Basic !!!", "Basic YnJva2Vy"] {
            assert!(decode(raw).is_none(), "{}", raw);
        }
    }
}
