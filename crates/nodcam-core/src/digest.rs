//! **DigestAuthClient** — HTTP Digest handshake plus bounded-duration audio
//! streaming in either direction.
//!
//! The device answers the first unauthenticated request with a 401 carrying a
//! `WWW-Authenticate: Digest` challenge; the request is reissued exactly once
//! with the computed response. A second 401 is a terminal failure for that
//! call — stale credentials surface to the caller instead of looping on
//! fresh nonces. Challenge state (nonce, cnonce) is scoped to one request and
//! never cached.

use crate::error::{CoreError, CoreResult};
use md5::{Digest, Md5};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Username/password pair for the device account.
#[derive(Debug, Clone)]
pub struct DigestCredentials {
    pub username: String,
    pub password: String,
}

/// One parsed `WWW-Authenticate: Digest` challenge. Consumed to compute a
/// single response; never reused across nonces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub qop: Option<String>,
}

impl DigestChallenge {
    /// Parse the header value (`Digest realm="...", nonce="...", ...`).
    /// Quoted values may contain commas (`qop="auth,auth-int"`).
    pub fn parse(header: &str) -> CoreResult<Self> {
        let rest = header
            .trim()
            .strip_prefix("Digest")
            .ok_or_else(|| CoreError::AuthChallengeFailed("not a Digest challenge".to_string()))?;

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut qop = None;

        for (key, value) in split_challenge_params(rest) {
            match key.as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "opaque" => opaque = Some(value),
                "qop" => qop = Some(value),
                _ => {}
            }
        }

        Ok(Self {
            realm: realm
                .ok_or_else(|| CoreError::AuthChallengeFailed("challenge missing realm".to_string()))?,
            nonce: nonce
                .ok_or_else(|| CoreError::AuthChallengeFailed("challenge missing nonce".to_string()))?,
            opaque,
            qop,
        })
    }
}

/// Split `key=value, key="quoted, value"` pairs, honoring quotes.
fn split_challenge_params(s: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in s.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                push_param(&mut params, &current);
                current.clear();
            }
            _ => current.push(c),
        }
    }
    push_param(&mut params, &current);
    params
}

fn push_param(params: &mut Vec<(String, String)>, raw: &str) {
    if let Some((k, v)) = raw.split_once('=') {
        let key = k.trim().to_ascii_lowercase();
        let value = v.trim().trim_matches('"').to_string();
        if !key.is_empty() {
            params.push((key, value));
        }
    }
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compute the `Authorization: Digest ...` header value for one request.
/// Pure: all inputs including the client nonce are parameters, so the RFC
/// 2617 reference vectors are checkable.
pub fn digest_authorization(
    creds: &DigestCredentials,
    method: &str,
    uri: &str,
    challenge: &DigestChallenge,
    cnonce: &str,
) -> String {
    let ha1 = md5_hex(&format!(
        "{}:{}:{}",
        creds.username, challenge.realm, creds.password
    ));
    let ha2 = md5_hex(&format!("{method}:{uri}"));

    let uses_auth_qop = challenge
        .qop
        .as_deref()
        .map(|q| q.split(',').any(|v| v.trim() == "auth"))
        .unwrap_or(false);

    let (response, qop_fields) = if uses_auth_qop {
        let nc = "00000001";
        let response = md5_hex(&format!(
            "{ha1}:{}:{nc}:{cnonce}:auth:{ha2}",
            challenge.nonce
        ));
        (
            response,
            format!(", qop=auth, nc={nc}, cnonce=\"{cnonce}\""),
        )
    } else {
        (md5_hex(&format!("{ha1}:{}:{ha2}", challenge.nonce)), String::new())
    };

    let opaque_field = challenge
        .opaque
        .as_deref()
        .map(|o| format!(", opaque=\"{o}\""))
        .unwrap_or_default();

    format!(
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"{}{}",
        creds.username, challenge.realm, challenge.nonce, uri, response, qop_fields, opaque_field
    )
}

/// Outcome of a best-effort playback push. Never an error: the original
/// controller treated every playback transport failure as "the device does
/// not support playback" and carried on, and that behavior is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Accepted,
    Unsupported,
}

/// Digest-authenticated HTTP client for the device's audio endpoints.
pub struct DigestAuthClient {
    client: reqwest::Client,
    base_url: String,
    creds: DigestCredentials,
    cnonce_override: Option<String>,
}

impl DigestAuthClient {
    pub fn new(base_url: impl Into<String>, creds: DigestCredentials) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            creds,
            cnonce_override: None,
        })
    }

    /// Fix the client nonce instead of generating one. Deterministic
    /// handshakes for canned-response tests.
    pub fn with_cnonce(mut self, cnonce: impl Into<String>) -> Self {
        self.cnonce_override = Some(cnonce.into());
        self
    }

    fn cnonce(&self) -> String {
        self.cnonce_override
            .clone()
            .unwrap_or_else(|| format!("{:016x}", rand::random::<u64>()))
    }

    fn build_request(
        &self,
        method: &str,
        path: &str,
        payload: Option<&[u8]>,
    ) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = match method {
            "POST" => self
                .client
                .post(&url)
                .header("Content-Type", "Audio/AAC")
                .body(payload.unwrap_or_default().to_vec()),
            _ => self.client.get(&url),
        };
        builder
    }

    /// Issue `method path`, answering one digest challenge if the device
    /// sends one. A second 401, or any challenge that cannot be parsed, is
    /// `AuthChallengeFailed`.
    async fn send_authenticated(
        &self,
        method: &str,
        path: &str,
        payload: Option<&[u8]>,
    ) -> CoreResult<reqwest::Response> {
        let first = self.build_request(method, path, payload).send().await?;
        if first.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(first);
        }

        let header = first
            .headers()
            .get("WWW-Authenticate")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                CoreError::AuthChallengeFailed("401 without WWW-Authenticate header".to_string())
            })?
            .to_string();
        let challenge = DigestChallenge::parse(&header)?;
        debug!(realm = %challenge.realm, qop = ?challenge.qop, "answering digest challenge");

        let authorization =
            digest_authorization(&self.creds, method, path, &challenge, &self.cnonce());
        let second = self
            .build_request(method, path, payload)
            .header("Authorization", authorization)
            .send()
            .await?;

        if second.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(CoreError::AuthChallengeFailed(
                "device rejected computed digest response".to_string(),
            ));
        }
        Ok(second)
    }

    /// Pull raw audio from the device (GET), reading until the stream ends or
    /// `max` elapses. Partial data collected before the cutoff is a success;
    /// an empty body is `NoData`.
    pub async fn fetch_audio(&self, path: &str, max: Duration) -> CoreResult<Vec<u8>> {
        let response = self.send_authenticated("GET", path, None).await?;
        if !response.status().is_success() {
            return Err(CoreError::TransientIo(format!(
                "audio fetch returned {}",
                response.status()
            )));
        }

        let deadline = Instant::now() + max;
        let mut body = Vec::new();
        let mut response = response;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(bytes = body.len(), "audio fetch cutoff reached");
                break;
            }
            match tokio::time::timeout(remaining, response.chunk()).await {
                Ok(Ok(Some(chunk))) => body.extend_from_slice(&chunk),
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    if body.is_empty() {
                        return Err(e.into());
                    }
                    warn!(error = %e, bytes = body.len(), "stream error after partial read");
                    break;
                }
                Err(_) => {
                    debug!(bytes = body.len(), "audio fetch cutoff reached mid-chunk");
                    break;
                }
            }
        }

        if body.is_empty() {
            Err(CoreError::NoData)
        } else {
            Ok(body)
        }
    }

    /// Push an AAC payload to the device speaker (POST). Best-effort: every
    /// transport or protocol failure resolves to `Unsupported`.
    pub async fn push_audio(&self, path: &str, payload: &[u8]) -> PlaybackOutcome {
        let response = match self.send_authenticated("POST", path, Some(payload)).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "playback push failed; treating as unsupported");
                return PlaybackOutcome::Unsupported;
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "playback rejected; treating as unsupported");
            return PlaybackOutcome::Unsupported;
        }
        let body = response.text().await.unwrap_or_default();
        if body.contains("OK") {
            info!(bytes = payload.len(), "playback accepted by device");
            PlaybackOutcome::Accepted
        } else {
            warn!("playback response missing acceptance marker; treating as unsupported");
            PlaybackOutcome::Unsupported
        }
    }
}
