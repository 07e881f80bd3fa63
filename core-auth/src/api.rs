//! Auth Service client.
//!
//! [`AuthService`] is the seam between the controller and the server. The
//! production implementation, [`HttpAuthService`], speaks camelCase JSON over
//! the host [`HttpClient`] and maps HTTP outcomes onto [`AuthError`]:
//!
//! | Outcome | Error |
//! |---|---|
//! | transport failure, 408, 429, 5xx | `NetworkUnavailable` |
//! | 401 | `InvalidCredentials` on login, `SessionExpired` elsewhere |
//! | 401 on password change with a wrong-password code | `InvalidCredentials` |
//! | 403 with a CSRF code | `CsrfMismatch` |
//! | other 403 | `Forbidden` |
//! | 400, 422 | `Validation` |
//! | anything else | `Unexpected` |
//! | 2xx with an undecodable body | `InvalidResponse` |
//!
//! The refresh call carries no token of its own: the renewal credential is
//! an ambient cookie held by the host HTTP client.

use crate::csrf::CSRF_HEADER;
use crate::error::{AuthError, Result};
use crate::types::{DeviceTrust, LoginRequest, RegisterRequest, Session, User};
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use core_runtime::config::CoreConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Error codes the server uses for a rejected anti-forgery token.
const CSRF_ERROR_CODES: [&str; 2] = ["CSRF_MISMATCH", "EBADCSRFTOKEN"];

/// Error codes that blame the submitted password rather than the token.
const WRONG_PASSWORD_CODES: [&str; 3] = ["INVALID_PASSWORD", "INVALID_CREDENTIALS", "WRONG_PASSWORD"];

fn code_in(code: Option<&str>, known: &[&str]) -> bool {
    code.map(|code| known.iter().any(|c| c.eq_ignore_ascii_case(code)))
        .unwrap_or(false)
}

/// Successful login.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub session_id: String,
    pub csrf_token: String,
    pub user: User,
    #[serde(default)]
    pub device_trust: Option<DeviceTrust>,
}

/// Successful renewal.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Remote authentication operations.
///
/// Every method performs exactly one request; retry policy lives in the
/// controller.
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse>;

    /// Exchange the ambient refresh cookie for a new access token.
    async fn refresh(&self) -> Result<RefreshResponse>;

    async fn logout(
        &self,
        access_token: &str,
        csrf: Option<String>,
        session_id: Option<String>,
    ) -> Result<()>;

    async fn get_profile(&self, access_token: &str) -> Result<User>;

    async fn list_sessions(&self, access_token: &str) -> Result<Vec<Session>>;

    async fn terminate_session(&self, access_token: &str, csrf: &str, session_id: &str)
        -> Result<()>;

    async fn terminate_all_other_sessions(&self, access_token: &str, csrf: &str) -> Result<()>;

    async fn trust_device(
        &self,
        access_token: &str,
        csrf: &str,
        device_name: &str,
    ) -> Result<DeviceTrust>;

    async fn fetch_csrf_token(&self) -> Result<String>;

    async fn register(&self, request: &RegisterRequest) -> Result<()>;

    async fn forgot_password(&self, email: &str) -> Result<()>;

    async fn reset_password(&self, token: &str, password: &str) -> Result<()>;

    async fn verify_email(&self, token: &str) -> Result<()>;

    async fn resend_verification(&self, email: &str) -> Result<()>;

    async fn change_password(
        &self,
        access_token: &str,
        csrf: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<()>;
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
    remember_me: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogoutBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TrustDeviceBody<'a> {
    device_name: &'a str,
}

#[derive(Serialize)]
struct RegisterBody<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct EmailBody<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct TokenBody<'a> {
    token: &'a str,
}

#[derive(Serialize)]
struct ResetPasswordBody<'a> {
    token: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordBody<'a> {
    current_password: &'a str,
    new_password: &'a str,
}

#[derive(Deserialize)]
struct ProfileEnvelope {
    user: User,
}

#[derive(Deserialize)]
struct SessionsEnvelope {
    sessions: Vec<Session>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CsrfEnvelope {
    csrf_token: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct TrustDeviceEnvelope {
    #[serde(default)]
    device_trust: Option<DeviceTrust>,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// How a 401 should be read for a given route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unauthorized {
    BadCredentials,
    Expired,
    /// Expired unless the body blames the password
    PasswordOrExpired,
}

/// Map a non-success response onto the error taxonomy.
fn classify_failure(response: &HttpResponse, unauthorized: Unauthorized) -> AuthError {
    let body: ErrorBody = response.json().unwrap_or_default();
    let message = body
        .message
        .or(body.error)
        .unwrap_or_else(|| format!("HTTP {}", response.status));

    match response.status {
        401 => match unauthorized {
            Unauthorized::BadCredentials => AuthError::InvalidCredentials,
            Unauthorized::Expired => AuthError::SessionExpired,
            Unauthorized::PasswordOrExpired
                if code_in(body.code.as_deref(), &WRONG_PASSWORD_CODES) =>
            {
                AuthError::InvalidCredentials
            }
            Unauthorized::PasswordOrExpired => AuthError::SessionExpired,
        },
        403 => {
            if code_in(body.code.as_deref(), &CSRF_ERROR_CODES) {
                AuthError::CsrfMismatch
            } else {
                AuthError::Forbidden(message)
            }
        }
        400 | 422 => AuthError::Validation(message),
        408 | 429 | 500..=599 => AuthError::NetworkUnavailable(format!(
            "auth service answered {}: {}",
            response.status, message
        )),
        status => AuthError::Unexpected { status, message },
    }
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// [`AuthService`] over the host HTTP client.
pub struct HttpAuthService {
    config: CoreConfig,
    http_client: Arc<dyn HttpClient>,
}

impl HttpAuthService {
    pub fn new(config: CoreConfig) -> Self {
        let http_client = Arc::clone(&config.http_client);
        Self {
            config,
            http_client,
        }
    }

    fn request(&self, method: HttpMethod, path: &str) -> Result<HttpRequest> {
        let url = self
            .config
            .endpoint(path)
            .map_err(|e| AuthError::Other(e.to_string()))?;
        Ok(HttpRequest::new(method, url.as_str())
            .header("Accept", "application/json")
            .header("X-Request-Id", Uuid::new_v4().to_string())
            .timeout(self.config.request_timeout))
    }

    fn with_json<T: Serialize>(request: HttpRequest, body: &T) -> Result<HttpRequest> {
        request
            .json(body)
            .map_err(|e| AuthError::Other(format!("Failed to encode request: {}", e)))
    }

    async fn send(&self, request: HttpRequest, unauthorized: Unauthorized) -> Result<HttpResponse> {
        let method = request.method;
        let url = request.url.clone();
        let request_id = request.headers.get("X-Request-Id").cloned().unwrap_or_default();

        let response = self.http_client.execute(request).await.map_err(|e| {
            warn!(
                method = method.as_str(),
                url = %url,
                request_id = %request_id,
                error = %e,
                "Auth service unreachable"
            );
            AuthError::NetworkUnavailable(e.to_string())
        })?;

        debug!(
            method = method.as_str(),
            url = %url,
            request_id = %request_id,
            status = response.status,
            "Auth service responded"
        );

        if response.is_success() {
            Ok(response)
        } else {
            let error = classify_failure(&response, unauthorized);
            warn!(
                status = response.status,
                request_id = %request_id,
                error = %error,
                "Auth service rejected request"
            );
            Err(error)
        }
    }

    fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
        response
            .json()
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl AuthService for HttpAuthService {
    #[instrument(skip(self, request), fields(remember_me = request.remember_me))]
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
        let body = LoginBody {
            email: &request.email,
            password: &request.password,
            remember_me: request.remember_me,
        };
        let http = Self::with_json(self.request(HttpMethod::Post, "/auth/login")?, &body)?;
        let response = self.send(http, Unauthorized::BadCredentials).await?;
        Self::decode(&response)
    }

    #[instrument(skip(self))]
    async fn refresh(&self) -> Result<RefreshResponse> {
        let http = self.request(HttpMethod::Post, "/auth/refresh")?;
        let response = self.send(http, Unauthorized::Expired).await?;
        Self::decode(&response)
    }

    #[instrument(skip(self, access_token, csrf))]
    async fn logout(
        &self,
        access_token: &str,
        csrf: Option<String>,
        session_id: Option<String>,
    ) -> Result<()> {
        let mut http = Self::with_json(
            self.request(HttpMethod::Post, "/auth/logout")?
                .bearer_token(access_token),
            &LogoutBody { session_id },
        )?;
        if let Some(csrf) = csrf {
            http = http.header(CSRF_HEADER, csrf);
        }
        self.send(http, Unauthorized::Expired).await?;
        Ok(())
    }

    #[instrument(skip(self, access_token))]
    async fn get_profile(&self, access_token: &str) -> Result<User> {
        let http = self
            .request(HttpMethod::Get, "/auth/me")?
            .bearer_token(access_token);
        let response = self.send(http, Unauthorized::Expired).await?;
        Ok(Self::decode::<ProfileEnvelope>(&response)?.user)
    }

    #[instrument(skip(self, access_token))]
    async fn list_sessions(&self, access_token: &str) -> Result<Vec<Session>> {
        let http = self
            .request(HttpMethod::Get, "/auth/sessions")?
            .bearer_token(access_token);
        let response = self.send(http, Unauthorized::Expired).await?;
        Ok(Self::decode::<SessionsEnvelope>(&response)?.sessions)
    }

    #[instrument(skip(self, access_token, csrf))]
    async fn terminate_session(
        &self,
        access_token: &str,
        csrf: &str,
        session_id: &str,
    ) -> Result<()> {
        let http = self
            .request(HttpMethod::Delete, &format!("/auth/sessions/{session_id}"))?
            .bearer_token(access_token)
            .header(CSRF_HEADER, csrf);
        self.send(http, Unauthorized::Expired).await?;
        Ok(())
    }

    #[instrument(skip(self, access_token, csrf))]
    async fn terminate_all_other_sessions(&self, access_token: &str, csrf: &str) -> Result<()> {
        let http = self
            .request(HttpMethod::Delete, "/auth/sessions")?
            .bearer_token(access_token)
            .header(CSRF_HEADER, csrf);
        self.send(http, Unauthorized::Expired).await?;
        Ok(())
    }

    #[instrument(skip(self, access_token, csrf))]
    async fn trust_device(
        &self,
        access_token: &str,
        csrf: &str,
        device_name: &str,
    ) -> Result<DeviceTrust> {
        let http = Self::with_json(
            self.request(HttpMethod::Post, "/auth/trust-device")?
                .bearer_token(access_token)
                .header(CSRF_HEADER, csrf),
            &TrustDeviceBody { device_name },
        )?;
        let response = self.send(http, Unauthorized::Expired).await?;

        // Plain acks are allowed
        let envelope: TrustDeviceEnvelope = if response.body.is_empty() {
            TrustDeviceEnvelope::default()
        } else {
            Self::decode(&response)?
        };
        Ok(envelope.device_trust.unwrap_or_else(|| DeviceTrust {
            trusted: true,
            device_name: Some(device_name.to_string()),
        }))
    }

    #[instrument(skip(self))]
    async fn fetch_csrf_token(&self) -> Result<String> {
        let http = self.request(HttpMethod::Get, "/auth/csrf-token")?;
        let response = self.send(http, Unauthorized::Expired).await?;
        let envelope: CsrfEnvelope = Self::decode(&response)?;
        if envelope.csrf_token.is_empty() {
            return Err(AuthError::InvalidResponse("empty CSRF token".to_string()));
        }
        Ok(envelope.csrf_token)
    }

    #[instrument(skip(self, request))]
    async fn register(&self, request: &RegisterRequest) -> Result<()> {
        let body = RegisterBody {
            name: &request.name,
            email: &request.email,
            password: &request.password,
        };
        let http = Self::with_json(self.request(HttpMethod::Post, "/auth/register")?, &body)?;
        self.send(http, Unauthorized::Expired).await?;
        Ok(())
    }

    #[instrument(skip(self, email))]
    async fn forgot_password(&self, email: &str) -> Result<()> {
        let http = Self::with_json(
            self.request(HttpMethod::Post, "/auth/forgot-password")?,
            &EmailBody { email },
        )?;
        self.send(http, Unauthorized::Expired).await?;
        Ok(())
    }

    #[instrument(skip(self, token, password))]
    async fn reset_password(&self, token: &str, password: &str) -> Result<()> {
        let http = Self::with_json(
            self.request(HttpMethod::Post, "/auth/reset-password")?,
            &ResetPasswordBody { token, password },
        )?;
        self.send(http, Unauthorized::Expired).await?;
        Ok(())
    }

    #[instrument(skip(self, token))]
    async fn verify_email(&self, token: &str) -> Result<()> {
        let http = Self::with_json(
            self.request(HttpMethod::Post, "/auth/verify-email")?,
            &TokenBody { token },
        )?;
        self.send(http, Unauthorized::Expired).await?;
        Ok(())
    }

    #[instrument(skip(self, email))]
    async fn resend_verification(&self, email: &str) -> Result<()> {
        let http = Self::with_json(
            self.request(HttpMethod::Post, "/auth/resend-verification")?,
            &EmailBody { email },
        )?;
        self.send(http, Unauthorized::Expired).await?;
        Ok(())
    }

    #[instrument(skip(self, access_token, csrf, current_password, new_password))]
    async fn change_password(
        &self,
        access_token: &str,
        csrf: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let http = Self::with_json(
            self.request(HttpMethod::Post, "/auth/change-password")?
                .bearer_token(access_token)
                .header(CSRF_HEADER, csrf),
            &ChangePasswordBody {
                current_password,
                new_password,
            },
        )?;
        self.send(http, Unauthorized::PasswordOrExpired).await?;
        Ok(())
    }
}
