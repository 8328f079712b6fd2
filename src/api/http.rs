use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Security requirements for outbound HTTP
#[derive(Debug, Clone)]
pub struct HttpSecurityConfig {
    /// Require HTTPS for all external communications
    pub require_https: bool,
    /// Verify TLS certificates
    pub verify_certificates: bool,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum response size in bytes
    pub max_response_size: usize,
    /// Allowed hosts (empty = any host)
    pub allowed_domains: Vec<String>,
}

impl Default for HttpSecurityConfig {
    fn default() -> Self {
        Self {
            require_https: false,
            verify_certificates: true,
            timeout_secs: 30,
            max_response_size: 10 * 1024 * 1024, // 10MB max
            allowed_domains: Vec::new(),
        }
    }
}

/// HTTP client for telemetry, publishing and peer validators
#[derive(Clone)]
pub struct SecureHttpClient {
    client: Client,
    config: HttpSecurityConfig,
}

impl SecureHttpClient {
    /// Create a new secure HTTP client with validation
    pub fn new(config: HttpSecurityConfig) -> Result<Self> {
        let mut client_builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("silica-validator/", env!("CARGO_PKG_VERSION")));

        if config.require_https {
            // Only allow HTTPS connections
            client_builder = client_builder.https_only(true);
            info!("HTTPS enforcement enabled for outbound requests");
        }

        if !config.verify_certificates {
            warn!("TLS certificate verification disabled - this is insecure!");
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }

        let client = client_builder
            .build()
            .context("Failed to create secure HTTP client")?;

        Ok(Self { client, config })
    }

    /// Validate URL for security requirements
    pub fn validate_url(&self, url: &str) -> Result<Url> {
        let parsed_url = Url::parse(url).context("Invalid URL format")?;

        if !matches!(parsed_url.scheme(), "http" | "https") {
            return Err(anyhow::anyhow!("Unsupported URL scheme: {}", parsed_url.scheme()));
        }

        // Enforce HTTPS if required
        if self.config.require_https && parsed_url.scheme() != "https" {
            return Err(anyhow::anyhow!(
                "HTTPS is required but URL uses {}: {}",
                parsed_url.scheme(),
                url
            ));
        }

        let Some(host) = parsed_url.host_str() else {
            return Err(anyhow::anyhow!("URL must have a valid host: {}", url));
        };

        if !self.config.allowed_domains.is_empty()
            && !self
                .config
                .allowed_domains
                .iter()
                .any(|domain| host == domain || host.ends_with(&format!(".{}", domain)))
        {
            return Err(anyhow::anyhow!(
                "Domain '{}' is not in the allowed list: {:?}",
                host,
                self.config.allowed_domains
            ));
        }

        Ok(parsed_url)
    }

    /// GET a URL with query parameters and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let validated_url = self.validate_url(url)?;
        debug!(url = %validated_url, "Fetching JSON");

        let response = self
            .client
            .get(validated_url.as_str())
            .query(query)
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send HTTP request")?;

        let body = self.read_body(response).await?;
        serde_json::from_str(&body).context("Failed to decode JSON response")
    }

    /// POST a JSON body, optionally with a bearer token, and return the response text
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        bearer: Option<&str>,
    ) -> Result<String> {
        let validated_url = self.validate_url(url)?;

        let mut request = self.client.post(validated_url.as_str()).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .context("Failed to send HTTP request")?;

        self.read_body(response).await
    }

    /// POST a JSON body and return the status with the body, whatever the status
    pub async fn post_json_with_status<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<(u16, String)> {
        let validated_url = self.validate_url(url)?;

        let response = self
            .client
            .post(validated_url.as_str())
            .json(body)
            .send()
            .await
            .context("Failed to send HTTP request")?;

        let status = response.status().as_u16();
        Ok((status, self.read_limited(response).await?))
    }

    /// GET a URL and return the status with the body, whatever the status
    pub async fn get_with_status(&self, url: &str) -> Result<(u16, String)> {
        let validated_url = self.validate_url(url)?;

        let response = self
            .client
            .get(validated_url.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send HTTP request")?;

        let status = response.status().as_u16();
        Ok((status, self.read_limited(response).await?))
    }

    async fn read_body(&self, response: reqwest::Response) -> Result<String> {
        // Validate response status
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "HTTP request failed with status {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            ));
        }

        self.read_limited(response).await
    }

    async fn read_limited(&self, response: reqwest::Response) -> Result<String> {
        // Validate response size
        let content_length = response.content_length().unwrap_or(0);
        if content_length > self.config.max_response_size as u64 {
            return Err(anyhow::anyhow!(
                "Response too large: {} bytes (max: {})",
                content_length,
                self.config.max_response_size
            ));
        }

        let response_text = response
            .text()
            .await
            .context("Failed to read response body")?;

        if response_text.len() > self.config.max_response_size {
            return Err(anyhow::anyhow!(
                "Response body too large: {} bytes (max: {})",
                response_text.len(),
                self.config.max_response_size
            ));
        }

        Ok(response_text)
    }

    /// Get the security configuration
    pub fn config(&self) -> &HttpSecurityConfig {
        &self.config
    }
}
