//! Access token resolution for the storage client.
//!
//! Credentials are always passed in explicitly; nothing here reads or writes
//! process-wide state apart from looking up the user's config directory.

use crate::error::SyncError;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const METADATA_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const STORAGE_READ_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_only";
/// Google rejects assertions valid for longer than an hour.
const ASSERTION_LIFETIME: Duration = Duration::from_secs(3600);
/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Where credentials come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CredentialSource {
    /// An explicit credential file.
    File(PathBuf),
    /// Application-default credentials, then the metadata server, then anonymous.
    #[default]
    Ambient,
    /// No credentials; only public buckets are readable.
    Anonymous,
}

impl CredentialSource {
    pub fn from_path(path: Option<PathBuf>) -> Self {
        path.map(CredentialSource::File)
            .unwrap_or(CredentialSource::Ambient)
    }
}

#[derive(Deserialize, Debug)]
struct CredentialFile {
    #[serde(rename = "type")]
    kind: Option<String>,
    access_token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    token_uri: Option<String>,
    client_email: Option<String>,
    private_key: Option<String>,
    private_key_id: Option<String>,
}

/// Claims of the signed assertion exchanged for a service account token.
#[derive(Serialize, Debug)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
enum TokenSource {
    Anonymous,
    Static(String),
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        token_uri: String,
    },
    ServiceAccount {
        client_email: String,
        private_key_id: Option<String>,
        private_key: String,
        token_uri: String,
    },
    MetadataServer,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() + REFRESH_MARGIN < at,
            None => true,
        }
    }
}

/// Hands out bearer tokens, refreshing them as they approach expiry.
///
/// Concurrent callers share one refresh.
#[derive(Debug)]
pub struct TokenProvider {
    http: reqwest::Client,
    source: TokenSource,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    /// A provider that never attaches credentials.
    pub fn anonymous(http: reqwest::Client) -> Self {
        Self::with_source(http, TokenSource::Anonymous)
    }

    /// Resolves a credential source into a token provider.
    pub async fn from_source(
        http: reqwest::Client,
        source: &CredentialSource,
    ) -> Result<Self, SyncError> {
        match source {
            CredentialSource::File(path) => {
                let token_source = load_credential_file(path).await?;
                info!("Using credentials from {}", path.display());
                Ok(Self::with_source(http, token_source))
            }
            CredentialSource::Anonymous => Ok(Self::anonymous(http)),
            CredentialSource::Ambient => {
                if let Some(path) = application_default_path().filter(|p| p.is_file()) {
                    let token_source = load_credential_file(&path).await?;
                    info!("Using application default credentials from {}", path.display());
                    return Ok(Self::with_source(http, token_source));
                }

                let provider = Self::with_source(http, TokenSource::MetadataServer);
                let probe = provider.refresh().await;
                match probe {
                    Ok(token) => {
                        info!("Using metadata server credentials");
                        *provider.cache.lock().await = Some(token);
                        Ok(provider)
                    }
                    Err(e) => {
                        debug!("Metadata server unavailable: {}", e);
                        info!("No credentials found, using anonymous access");
                        Ok(Self::anonymous(provider.http))
                    }
                }
            }
        }
    }

    fn with_source(http: reqwest::Client, source: TokenSource) -> Self {
        Self {
            http,
            source,
            cache: Mutex::new(None),
        }
    }

    /// Returns the bearer token to send, or `None` for anonymous access.
    pub async fn bearer(&self) -> Result<Option<String>, SyncError> {
        if let TokenSource::Anonymous = self.source {
            return Ok(None);
        }

        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.as_ref().filter(|t| t.is_fresh()) {
            return Ok(Some(token.value.clone()));
        }

        let token = self.refresh().await?;
        let value = token.value.clone();
        *cache = Some(token);
        Ok(Some(value))
    }

    async fn refresh(&self) -> Result<CachedToken, SyncError> {
        let request = match &self.source {
            TokenSource::Anonymous => {
                return Err(SyncError::Credentials("anonymous access has no token".into()))
            }
            TokenSource::Static(token) => {
                return Ok(CachedToken {
                    value: token.clone(),
                    expires_at: None,
                })
            }
            TokenSource::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
                token_uri,
            } => self.http.post(token_uri).form(&[
                ("grant_type", "refresh_token"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ]),
            TokenSource::ServiceAccount {
                client_email,
                private_key_id,
                private_key,
                token_uri,
            } => {
                let assertion = sign_assertion(
                    client_email,
                    private_key_id.as_deref(),
                    private_key,
                    token_uri,
                )?;
                debug!("Exchanging service account assertion for {}", client_email);
                self.http
                    .post(token_uri)
                    .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            }
            TokenSource::MetadataServer => self
                .http
                .get(METADATA_TOKEN_URL)
                .header("Metadata-Flavor", "Google")
                .timeout(METADATA_PROBE_TIMEOUT),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Credentials(format!(
                "token endpoint returned HTTP {}",
                status
            )));
        }

        let token: TokenResponse = response.json().await?;
        Ok(CachedToken {
            value: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| Instant::now() + Duration::from_secs(secs)),
        })
    }
}

fn application_default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gcloud").join("application_default_credentials.json"))
}

async fn load_credential_file(path: &Path) -> Result<TokenSource, SyncError> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        SyncError::Credentials(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_credential_file(&content)
}

/// Signs the RS256 JWT-bearer assertion for a service account key.
fn sign_assertion(
    client_email: &str,
    private_key_id: Option<&str>,
    private_key: &str,
    token_uri: &str,
) -> Result<String, SyncError> {
    let key = encoding_key(private_key)?;
    let iat = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| SyncError::Credentials(format!("system clock is before the epoch: {}", e)))?
        .as_secs();

    let mut header = Header::new(Algorithm::RS256);
    header.kid = private_key_id.map(str::to_string);
    let claims = AssertionClaims {
        iss: client_email,
        scope: STORAGE_READ_SCOPE,
        aud: token_uri,
        iat,
        exp: iat + ASSERTION_LIFETIME.as_secs(),
    };

    jsonwebtoken::encode(&header, &claims, &key).map_err(|e| {
        SyncError::Credentials(format!("cannot sign service account assertion: {}", e))
    })
}

fn encoding_key(private_key: &str) -> Result<EncodingKey, SyncError> {
    EncodingKey::from_rsa_pem(private_key.as_bytes()).map_err(|e| {
        SyncError::Credentials(format!("invalid service_account private_key: {}", e))
    })
}

fn parse_credential_file(content: &str) -> Result<TokenSource, SyncError> {
    let file: CredentialFile = serde_json::from_str(content)?;

    if let Some(token) = file.access_token {
        return Ok(TokenSource::Static(token));
    }

    let kind = file.kind.clone();
    let field = |value: Option<String>, name: &str| {
        value.ok_or_else(|| {
            SyncError::Credentials(format!(
                "{} credentials missing '{}'",
                kind.as_deref().unwrap_or("unknown"),
                name
            ))
        })
    };

    match file.kind.as_deref() {
        Some("service_account") => {
            let private_key = field(file.private_key, "private_key")?;
            // Malformed keys fail here, at startup.
            encoding_key(&private_key)?;
            Ok(TokenSource::ServiceAccount {
                client_email: field(file.client_email, "client_email")?,
                private_key_id: file.private_key_id,
                private_key,
                token_uri: file
                    .token_uri
                    .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            })
        }
        Some("authorized_user") => Ok(TokenSource::AuthorizedUser {
            client_id: field(file.client_id, "client_id")?,
            client_secret: field(file.client_secret, "client_secret")?,
            refresh_token: field(file.refresh_token, "refresh_token")?,
            token_uri: file
                .token_uri
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
        }),
        Some(other) => Err(SyncError::Credentials(format!(
            "unsupported credential type '{}'",
            other
        ))),
        None => Err(SyncError::Credentials(
            "credential file has neither 'type' nor 'access_token'".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_PRIVATE_KEY: &str = include_str!("../tests/fixtures/service_account_key.pem");
    const TEST_PUBLIC_KEY: &str = include_str!("../tests/fixtures/service_account_pub.pem");
    const TEST_CLIENT_EMAIL: &str = "sync@demo-project.iam.gserviceaccount.com";

    fn service_account_json(token_uri: &str) -> String {
        serde_json::json!({
            "type": "service_account",
            "project_id": "demo-project",
            "private_key_id": "key-1",
            "private_key": TEST_PRIVATE_KEY,
            "client_email": TEST_CLIENT_EMAIL,
            "client_id": "1234567890",
            "auth_uri": "https://accounts.google.com/o/oauth2/auth",
            "token_uri": token_uri,
        })
        .to_string()
    }

    #[test]
    fn test_parse_static_token() {
        let source = parse_credential_file(r#"{"access_token": "abc"}"#).unwrap();
        assert!(matches!(source, TokenSource::Static(t) if t == "abc"));
    }

    #[test]
    fn test_parse_authorized_user_defaults_token_uri() {
        let source = parse_credential_file(
            r#"{"type": "authorized_user", "client_id": "id", "client_secret": "s", "refresh_token": "r"}"#,
        )
        .unwrap();
        match source {
            TokenSource::AuthorizedUser { token_uri, .. } => assert_eq!(token_uri, DEFAULT_TOKEN_URI),
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_type_rejected() {
        let err = parse_credential_file(r#"{"type": "external_account"}"#).unwrap_err();
        assert!(err.to_string().contains("external_account"));

        let err = parse_credential_file(r#"{"type": "authorized_user", "client_id": "id"}"#).unwrap_err();
        assert!(err.to_string().contains("client_secret"));
    }

    #[test]
    fn test_parse_service_account() {
        let source = parse_credential_file(&service_account_json("https://example.test/token")).unwrap();
        match source {
            TokenSource::ServiceAccount {
                client_email,
                private_key_id,
                token_uri,
                ..
            } => {
                assert_eq!(client_email, TEST_CLIENT_EMAIL);
                assert_eq!(private_key_id.as_deref(), Some("key-1"));
                assert_eq!(token_uri, "https://example.test/token");
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_service_account_bad_key_rejected() {
        let err = parse_credential_file(
            r#"{"type": "service_account", "client_email": "a@b", "private_key": "not a pem"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("private_key"));

        let err = parse_credential_file(r#"{"type": "service_account", "client_email": "a@b"}"#).unwrap_err();
        assert!(err.to_string().contains("private_key"));
    }

    #[tokio::test]
    async fn test_service_account_assertion_exchanged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains(
                "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer",
            ))
            .and(body_string_contains("assertion="))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "sa-token", "expires_in": 3600})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let token_uri = format!("{}/token", server.uri());
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sa.json");
        std::fs::write(&file, service_account_json(&token_uri)).unwrap();

        let provider = TokenProvider::from_source(reqwest::Client::new(), &CredentialSource::File(file))
            .await
            .unwrap();
        assert_eq!(provider.bearer().await.unwrap().as_deref(), Some("sa-token"));
        assert_eq!(provider.bearer().await.unwrap().as_deref(), Some("sa-token"));

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        let assertion = body
            .split('&')
            .find_map(|pair| pair.strip_prefix("assertion="))
            .unwrap();

        let header = jsonwebtoken::decode_header(assertion).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("key-1"));

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[token_uri.as_str()]);
        let decoded = jsonwebtoken::decode::<serde_json::Value>(
            assertion,
            &DecodingKey::from_rsa_pem(TEST_PUBLIC_KEY.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap();
        assert_eq!(decoded.claims["iss"], TEST_CLIENT_EMAIL);
        assert_eq!(decoded.claims["scope"], STORAGE_READ_SCOPE);
        let iat = decoded.claims["iat"].as_u64().unwrap();
        assert_eq!(decoded.claims["exp"].as_u64().unwrap(), iat + 3600);
    }

    #[tokio::test]
    async fn test_explicit_file_with_static_token() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("token.json");
        std::fs::write(&file, r#"{"access_token": "static-token"}"#).unwrap();

        let provider = TokenProvider::from_source(reqwest::Client::new(), &CredentialSource::File(file))
            .await
            .unwrap();
        assert_eq!(provider.bearer().await.unwrap().as_deref(), Some("static-token"));
    }

    #[tokio::test]
    async fn test_missing_file_is_credentials_error() {
        let err = TokenProvider::from_source(
            reqwest::Client::new(),
            &CredentialSource::File(PathBuf::from("/nonexistent/creds.json")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::Credentials(_)));
    }

    #[tokio::test]
    async fn test_refresh_token_exchanged_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "fresh", "expires_in": 3600})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let provider = TokenProvider::with_source(
            reqwest::Client::new(),
            TokenSource::AuthorizedUser {
                client_id: "id".into(),
                client_secret: "secret".into(),
                refresh_token: "refresh".into(),
                token_uri: format!("{}/token", server.uri()),
            },
        );

        assert_eq!(provider.bearer().await.unwrap().as_deref(), Some("fresh"));
        assert_eq!(provider.bearer().await.unwrap().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_anonymous_has_no_token() {
        let provider = TokenProvider::anonymous(reqwest::Client::new());
        assert_eq!(provider.bearer().await.unwrap(), None);
    }
}
