//! SSRF-hardened outbound HTTP.
//!
//! Every outbound federation request goes through this client. The
//! destination host is resolved exactly once, the resolved address is
//! checked against the private/internal ranges, and the connection is
//! pinned to that address while TLS SNI and the Host header keep the
//! original hostname. Rebinding the DNS name between validation and
//! connect therefore changes nothing.

#![allow(missing_docs)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use driftwood_common::{config::FederationConfig, http_signature::RequestSigner};
use futures::StreamExt;
use tracing::{debug, warn};
use url::Url;

/// Maximum redirect hops followed on GET.
const MAX_REDIRECTS: usize = 5;

/// Outbound transport error.
#[derive(Debug, thiserror::Error)]
pub enum SafeHttpError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("scheme not allowed: {0}")]
    SchemeNotAllowed(String),
    #[error("URL has no host")]
    EmptyHost,
    #[error("private_ip: host resolves to a private or internal address")]
    PrivateIp,
    #[error("DNS resolution failed: {0}")]
    DnsFailure(String),
    #[error("too many redirects")]
    TooManyRedirects,
    #[error("redirect without a usable Location header")]
    MissingRedirectLocation,
    #[error("response_too_large: body exceeds the configured cap")]
    ResponseTooLarge,
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request signing failed: {0}")]
    Signing(String),
}

/// A fully prepared outbound request, with the connection target pinned.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: &'static str,
    pub url: Url,
    /// The pre-validated address the connection must go to.
    pub pinned_addr: SocketAddr,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

/// Response surfaced to the federation core.
#[derive(Debug, Clone)]
pub struct SafeResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl SafeResponse {
    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// First header with the given name, case-insensitive.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Executes pinned requests. Injected so tests can stub the wire.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: TransportRequest) -> Result<SafeResponse, SafeHttpError>;
}

/// Production transport over reqwest.
///
/// A client is built per request because the DNS pin
/// (`ClientBuilder::resolve`) is per-hostname state.
pub struct ReqwestTransport {
    connect_timeout: Duration,
    receive_timeout: Duration,
    max_response_size: usize,
}

impl ReqwestTransport {
    /// Create a transport with the configured timeouts and body cap.
    #[must_use]
    pub const fn new(
        connect_timeout: Duration,
        receive_timeout: Duration,
        max_response_size: usize,
    ) -> Self {
        Self {
            connect_timeout,
            receive_timeout,
            max_response_size,
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: TransportRequest) -> Result<SafeResponse, SafeHttpError> {
        let host = request.url.host_str().ok_or(SafeHttpError::EmptyHost)?;

        let client = reqwest::Client::builder()
            .resolve(host, request.pinned_addr)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(self.connect_timeout)
            .timeout(self.receive_timeout)
            .build()
            .map_err(|e| SafeHttpError::Transport(e.to_string()))?;

        let mut builder = match request.method {
            "POST" => client.post(request.url.clone()),
            _ => client.get(request.url.clone()),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                SafeHttpError::Timeout
            } else {
                SafeHttpError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        // Stream the body so an oversized response is cut off instead of
        // buffered.
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                if e.is_timeout() {
                    SafeHttpError::Timeout
                } else {
                    SafeHttpError::Transport(e.to_string())
                }
            })?;
            if body.len() + chunk.len() > self.max_response_size {
                return Err(SafeHttpError::ResponseTooLarge);
            }
            body.extend_from_slice(&chunk);
        }

        Ok(SafeResponse {
            status,
            headers,
            body: Bytes::from(body),
        })
    }
}

/// The SSRF-hardened client used for all outbound federation traffic.
#[derive(Clone)]
pub struct SafeHttpClient {
    transport: Arc<dyn HttpTransport>,
    user_agent: String,
    max_response_size: usize,
    allow_insecure_loopback: bool,
}

impl SafeHttpClient {
    /// Create a client with the production reqwest transport.
    #[must_use]
    pub fn new(config: &FederationConfig, user_agent: String) -> Self {
        let transport = ReqwestTransport::new(
            config.connect_timeout(),
            config.receive_timeout(),
            config.max_response_size,
        );
        Self::with_transport(config, user_agent, Arc::new(transport))
    }

    /// Create a client over an injected transport (tests stub the wire).
    #[must_use]
    pub fn with_transport(
        config: &FederationConfig,
        user_agent: String,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            transport,
            user_agent,
            max_response_size: config.max_response_size,
            allow_insecure_loopback: config.allow_insecure_loopback,
        }
    }

    /// Unsigned GET with `Accept: application/activity+json`.
    pub async fn get(&self, url: &Url) -> Result<SafeResponse, SafeHttpError> {
        self.get_inner(url, None).await
    }

    /// GET carrying HTTP-signature headers (the authorized-fetch protocol).
    pub async fn signed_get(
        &self,
        url: &Url,
        signer: &RequestSigner,
    ) -> Result<SafeResponse, SafeHttpError> {
        self.get_inner(url, Some(signer)).await
    }

    async fn get_inner(
        &self,
        url: &Url,
        signer: Option<&RequestSigner>,
    ) -> Result<SafeResponse, SafeHttpError> {
        let mut current = url.clone();

        for _ in 0..=MAX_REDIRECTS {
            let pinned = self.validate_and_resolve(&current).await?;

            let mut headers = vec![
                ("accept".to_string(), "application/activity+json".to_string()),
                ("user-agent".to_string(), self.user_agent.clone()),
            ];
            if let Some(signer) = signer {
                let signed = signer
                    .sign("GET", &current, None)
                    .map_err(|e| SafeHttpError::Signing(e.to_string()))?;
                headers.push(("date".to_string(), signed.date));
                headers.push(("signature".to_string(), signed.signature));
            }

            let response = self
                .transport
                .execute(TransportRequest {
                    method: "GET",
                    url: current.clone(),
                    pinned_addr: pinned,
                    headers,
                    body: None,
                })
                .await?;

            if !is_redirect(response.status) {
                self.check_size(&response)?;
                return Ok(response);
            }

            let location = response
                .header("location")
                .ok_or(SafeHttpError::MissingRedirectLocation)?;
            // Relative Location resolves against the URL that redirected;
            // the new target re-runs the whole validate-and-resolve
            // pipeline on the next iteration.
            let next = current
                .join(location)
                .map_err(|e| SafeHttpError::InvalidUrl(e.to_string()))?;
            debug!(from = %current, to = %next, "Following redirect");
            current = next;
        }

        Err(SafeHttpError::TooManyRedirects)
    }

    /// Signed POST of an activity body. Redirects are never followed; a
    /// 3xx comes back to the caller like any other non-2xx status.
    pub async fn post_signed(
        &self,
        url: &Url,
        body: Vec<u8>,
        signer: &RequestSigner,
    ) -> Result<SafeResponse, SafeHttpError> {
        let pinned = self.validate_and_resolve(url).await?;

        let signed = signer
            .sign("POST", url, Some(&body))
            .map_err(|e| SafeHttpError::Signing(e.to_string()))?;

        let mut headers = vec![
            (
                "content-type".to_string(),
                "application/activity+json".to_string(),
            ),
            ("user-agent".to_string(), self.user_agent.clone()),
            ("date".to_string(), signed.date),
            ("signature".to_string(), signed.signature),
        ];
        if let Some(digest) = signed.digest {
            headers.push(("digest".to_string(), digest));
        }

        let response = self
            .transport
            .execute(TransportRequest {
                method: "POST",
                url: url.clone(),
                pinned_addr: pinned,
                headers,
                body: Some(body),
            })
            .await?;
        self.check_size(&response)?;
        Ok(response)
    }

    fn check_size(&self, response: &SafeResponse) -> Result<(), SafeHttpError> {
        if response.body.len() > self.max_response_size {
            return Err(SafeHttpError::ResponseTooLarge);
        }
        Ok(())
    }

    /// Validate a URL and resolve its host to the single address the
    /// connection will be pinned to.
    pub async fn validate_and_resolve(&self, url: &Url) -> Result<SocketAddr, SafeHttpError> {
        match url.scheme() {
            "https" => {}
            "http" if self.allow_insecure_loopback => {}
            other => return Err(SafeHttpError::SchemeNotAllowed(other.to_string())),
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or(SafeHttpError::EmptyHost)?;
        let port = url.port_or_known_default().unwrap_or(443);

        let ip = match host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => tokio::net::lookup_host((host, port))
                .await
                .map_err(|e| SafeHttpError::DnsFailure(e.to_string()))?
                .next()
                .map(|addr| addr.ip())
                .ok_or_else(|| SafeHttpError::DnsFailure(format!("no address for {host}")))?,
        };

        if self.allow_insecure_loopback && ip.is_loopback() {
            return Ok(SocketAddr::new(ip, port));
        }
        if url.scheme() == "http" {
            // http is only ever allowed to loopback
            return Err(SafeHttpError::SchemeNotAllowed("http".to_string()));
        }
        if ip_is_forbidden(ip) {
            warn!(%url, %ip, "Rejected outbound request to private address");
            return Err(SafeHttpError::PrivateIp);
        }

        Ok(SocketAddr::new(ip, port))
    }
}

const fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Whether an address falls in the private/internal set that outbound
/// federation traffic must never reach.
#[must_use]
pub fn ip_is_forbidden(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4_forbidden(v4),
        IpAddr::V6(v6) => {
            if v6.is_loopback() || v6.is_unspecified() {
                return true;
            }
            // IPv4 embedded in IPv6 (both ::ffff:a.b.c.d and ::a.b.c.d)
            // inherits the IPv4 judgement.
            if let Some(v4) = v6.to_ipv4() {
                return v4_forbidden(v4);
            }
            let head = v6.segments()[0];
            (head & 0xfe00) == 0xfc00 // fc00::/7 unique local
                || (head & 0xffc0) == 0xfe80 // fe80::/10 link local
                || (head & 0xff00) == 0xff00 // ff00::/8 multicast
        }
    }
}

const fn v4_forbidden(ip: Ipv4Addr) -> bool {
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        || ip.octets()[0] == 0 // 0.0.0.0/8
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use driftwood_common::generate_rsa_keypair;
    use std::sync::Mutex;

    /// Transport stub: records requests, replays canned responses.
    pub(crate) struct StubTransport {
        pub requests: Mutex<Vec<TransportRequest>>,
        pub responses: Mutex<Vec<SafeResponse>>,
    }

    impl StubTransport {
        pub(crate) fn new(responses: Vec<SafeResponse>) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                responses: Mutex::new(responses),
            }
        }

        pub(crate) fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpTransport for StubTransport {
        async fn execute(&self, request: TransportRequest) -> Result<SafeResponse, SafeHttpError> {
            self.requests.lock().unwrap().push(request);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(SafeHttpError::Transport("no stubbed response".to_string()));
            }
            Ok(responses.remove(0))
        }
    }

    pub(crate) fn response(status: u16, body: &str) -> SafeResponse {
        SafeResponse {
            status,
            headers: Vec::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn redirect_to(location: &str) -> SafeResponse {
        SafeResponse {
            status: 301,
            headers: vec![("location".to_string(), location.to_string())],
            body: Bytes::new(),
        }
    }

    fn client(responses: Vec<SafeResponse>) -> (SafeHttpClient, Arc<StubTransport>) {
        let transport = Arc::new(StubTransport::new(responses));
        let client = SafeHttpClient::with_transport(
            &FederationConfig::default(),
            "driftwood-test".to_string(),
            transport.clone(),
        );
        (client, transport)
    }

    #[tokio::test]
    async fn test_private_ip_rejected_without_connecting() {
        let (client, transport) = client(vec![]);

        for target in [
            "https://10.0.0.5/inbox",
            "https://192.168.1.1/inbox",
            "https://172.16.0.1/inbox",
            "https://127.0.0.1/inbox",
            "https://169.254.0.1/inbox",
            "https://0.0.0.0/inbox",
            "https://[::1]/inbox",
            "https://[fc00::1]/inbox",
            "https://[fe80::1]/inbox",
            "https://[ff02::1]/inbox",
            "https://[::ffff:10.0.0.5]/inbox",
        ] {
            let url = Url::parse(target).unwrap();
            let err = client.get(&url).await.unwrap_err();
            assert!(matches!(err, SafeHttpError::PrivateIp), "allowed {target}");
        }

        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_http_scheme_rejected() {
        let (client, _) = client(vec![]);
        let url = Url::parse("http://203.0.113.10/inbox").unwrap();
        assert!(matches!(
            client.get(&url).await.unwrap_err(),
            SafeHttpError::SchemeNotAllowed(_)
        ));
    }

    #[tokio::test]
    async fn test_loopback_allowed_in_dev_mode() {
        let config = FederationConfig {
            allow_insecure_loopback: true,
            ..FederationConfig::default()
        };
        let transport = Arc::new(StubTransport::new(vec![response(200, "ok")]));
        let client =
            SafeHttpClient::with_transport(&config, "driftwood-test".to_string(), transport);

        let url = Url::parse("http://127.0.0.1:8080/inbox").unwrap();
        let resp = client.get(&url).await.unwrap();
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn test_get_follows_redirects_up_to_limit() {
        let (client, transport) = client(vec![
            redirect_to("https://203.0.113.11/hop1"),
            redirect_to("/hop2"),
            response(200, "found"),
        ]);

        let url = Url::parse("https://203.0.113.10/start").unwrap();
        let resp = client.get(&url).await.unwrap();

        assert_eq!(resp.status, 200);
        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        // Relative Location resolved against the redirecting URL
        assert_eq!(requests[2].url.as_str(), "https://203.0.113.11/hop2");
    }

    #[tokio::test]
    async fn test_too_many_redirects() {
        let hops = (0..7)
            .map(|i| redirect_to(&format!("https://203.0.113.10/hop{i}")))
            .collect();
        let (client, _) = client(hops);

        let url = Url::parse("https://203.0.113.10/start").unwrap();
        assert!(matches!(
            client.get(&url).await.unwrap_err(),
            SafeHttpError::TooManyRedirects
        ));
    }

    #[tokio::test]
    async fn test_post_never_follows_redirects() {
        let keypair = generate_rsa_keypair().unwrap();
        let signer =
            RequestSigner::new(&keypair.private_key_pem, "https://l.ex/ap/site#main-key").unwrap();

        let (client, transport) = client(vec![redirect_to("https://203.0.113.11/elsewhere")]);
        let url = Url::parse("https://203.0.113.10/inbox").unwrap();

        let resp = client.post_signed(&url, b"{}".to_vec(), &signer).await.unwrap();
        assert_eq!(resp.status, 301);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_post_carries_signature_headers() {
        let keypair = generate_rsa_keypair().unwrap();
        let signer =
            RequestSigner::new(&keypair.private_key_pem, "https://l.ex/ap/site#main-key").unwrap();

        let (client, transport) = client(vec![response(202, "")]);
        let url = Url::parse("https://203.0.113.10/inbox").unwrap();
        client
            .post_signed(&url, br#"{"type":"Create"}"#.to_vec(), &signer)
            .await
            .unwrap();

        let requests = transport.requests.lock().unwrap();
        let names: Vec<&str> = requests[0].headers.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"date"));
        assert!(names.contains(&"digest"));
        assert!(names.contains(&"signature"));
        assert!(names.contains(&"content-type"));
    }

    #[tokio::test]
    async fn test_oversized_response_rejected() {
        let big = "x".repeat(300_000);
        let (client, _) = client(vec![response(200, &big)]);

        let url = Url::parse("https://203.0.113.10/actor").unwrap();
        assert!(matches!(
            client.get(&url).await.unwrap_err(),
            SafeHttpError::ResponseTooLarge
        ));
    }

    #[test]
    fn test_ip_classification() {
        let forbidden = [
            "10.1.2.3",
            "172.31.255.255",
            "192.168.0.1",
            "127.0.0.1",
            "169.254.10.10",
            "0.0.0.0",
            "0.1.2.3",
            "255.255.255.255",
            "224.0.0.1",
            "::1",
            "::",
            "fc00::1",
            "fdab::1",
            "fe80::1234",
            "ff02::1",
            "::ffff:192.168.0.1",
        ];
        for addr in forbidden {
            assert!(
                ip_is_forbidden(addr.parse().unwrap()),
                "{addr} should be forbidden"
            );
        }

        let allowed = ["93.184.216.34", "203.0.113.10", "2606:2800:220:1::1"];
        for addr in allowed {
            assert!(
                !ip_is_forbidden(addr.parse().unwrap()),
                "{addr} should be allowed"
            );
        }
    }
}
