//! REST authority client
//!
//! Talks to the chat platform's HTTP API with bot-token auth. One request
//! in flight at a time; callers own pacing between grant calls. Snapshot
//! fetches retry once when throttled, since they happen before any pacing
//! policy is active.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use rollcall_common::config::AuthorityConfig;
use rollcall_common::error::{Error, Result};
use rollcall_common::ids::parse_exact_id;
use rollcall_common::model::{GroupId, PersonId, ScopeId};

use crate::snapshot::{AuthoritySnapshot, Member};

use super::{Authority, GrantOutcome};

/// Timeout for individual API requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// User-Agent header (required by the platform API)
const USER_AGENT: &str = "rollcall-mg/0.1 (membership migration tool)";

/// Page size for member listing (platform maximum)
const MEMBER_PAGE_SIZE: usize = 1000;

/// Fallback wait when a 429 carries no usable retry hint
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

/// Audit-log annotation attached to every grant
const AUDIT_REASON: &str = "participation history migration";

// API error codes distinguishing the two 404 flavors
const ERR_UNKNOWN_MEMBER: i64 = 10007;
const ERR_UNKNOWN_USER: i64 = 10013;
const ERR_UNKNOWN_ROLE: i64 = 10011;

pub struct RestAuthority {
    http_client: Client,
    api_url: String,
}

impl RestAuthority {
    /// Create a client from resolved configuration.
    ///
    /// Fails if no bot token is configured.
    pub fn new(config: &AuthorityConfig) -> Result<Self> {
        let token = config.require_token()?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static(USER_AGENT),
        );
        let mut auth = header::HeaderValue::from_str(&format!("Bot {token}"))
            .map_err(|_| Error::Config("bot token contains invalid header bytes".to_string()))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);

        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    /// GET a JSON document, retrying once if throttled
    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        for attempt in 0..2 {
            let response = self
                .http_client
                .get(url)
                .send()
                .await
                .map_err(|e| Error::AuthorityTransient(format!("request failed: {e}")))?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS && attempt == 0 {
                let header_hint = retry_after_from_headers(response.headers());
                let body = response.text().await.unwrap_or_default();
                let wait = retry_after_from_body(&body)
                    .or(header_hint)
                    .unwrap_or(DEFAULT_RETRY_AFTER);
                warn!(url = %url, wait_ms = wait.as_millis(), "Throttled during fetch; waiting");
                sleep(wait).await;
                continue;
            }

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(match status {
                    StatusCode::FORBIDDEN => {
                        Error::AuthorityDenied(format!("GET {url} denied: {body}"))
                    }
                    _ => Error::AuthorityTransient(format!("GET {url} returned {status}: {body}")),
                });
            }

            return response
                .json()
                .await
                .map_err(|e| Error::Parse(format!("malformed API response from {url}: {e}")));
        }
        unreachable!("loop returns on second attempt")
    }

    async fn fetch_roles(&self, scope: ScopeId) -> Result<BTreeMap<GroupId, String>> {
        let url = format!("{}/guilds/{}/roles", self.api_url, scope);
        let roles: Vec<RoleDto> = self.get_json(&url).await?;
        roles
            .into_iter()
            .map(|r| Ok((GroupId(parse_exact_id(&r.id)?), r.name)))
            .collect()
    }

    async fn fetch_members(&self, scope: ScopeId) -> Result<BTreeMap<PersonId, Member>> {
        let mut members = BTreeMap::new();
        let mut after = String::from("0");

        loop {
            let url = format!(
                "{}/guilds/{}/members?limit={}&after={}",
                self.api_url, scope, MEMBER_PAGE_SIZE, after
            );
            let page: Vec<MemberDto> = self.get_json(&url).await?;
            let page_len = page.len();

            for dto in page {
                let id = PersonId(parse_exact_id(&dto.user.id)?);
                let roles: BTreeSet<GroupId> = dto
                    .roles
                    .iter()
                    .map(|r| Ok(GroupId(parse_exact_id(r)?)))
                    .collect::<Result<_>>()?;
                members.insert(
                    id,
                    Member {
                        username: dto.user.username,
                        display_name: dto.nick,
                        roles,
                    },
                );
            }

            if page_len < MEMBER_PAGE_SIZE {
                break;
            }
            // Cursor is the highest id seen so far
            if let Some((last, _)) = members.iter().next_back() {
                after = last.to_string();
            } else {
                break;
            }
            debug!(fetched = members.len(), "Fetching next member page");
        }

        Ok(members)
    }
}

#[async_trait]
impl Authority for RestAuthority {
    async fn fetch_snapshot(&self, scope: ScopeId) -> Result<AuthoritySnapshot> {
        let url = format!("{}/guilds/{}", self.api_url, scope);
        let guild: GuildDto = self.get_json(&url).await?;
        let roles = self.fetch_roles(scope).await?;
        let members = self.fetch_members(scope).await?;

        info!(
            scope = %scope,
            name = %guild.name,
            roles = roles.len(),
            members = members.len(),
            "Fetched authority snapshot"
        );

        Ok(AuthoritySnapshot {
            scope_id: scope,
            scope_name: guild.name,
            roles,
            members,
            fetched_at: Utc::now(),
        })
    }

    async fn grant(&self, scope: ScopeId, person: PersonId, group: GroupId) -> GrantOutcome {
        let url = format!(
            "{}/guilds/{}/members/{}/roles/{}",
            self.api_url, scope, person, group
        );

        let response = match self
            .http_client
            .put(&url)
            .header("X-Audit-Log-Reason", AUDIT_REASON)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return GrantOutcome::Transient(format!("request failed: {e}")),
        };

        let status = response.status();
        if status.is_success() {
            return GrantOutcome::Granted;
        }

        let header_hint = retry_after_from_headers(response.headers());
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::FORBIDDEN => GrantOutcome::Denied(api_message(&body)),
            StatusCode::NOT_FOUND => match api_code(&body) {
                Some(ERR_UNKNOWN_MEMBER) | Some(ERR_UNKNOWN_USER) => GrantOutcome::PersonNotFound,
                Some(ERR_UNKNOWN_ROLE) => GrantOutcome::GroupNotFound,
                _ => GrantOutcome::Transient(format!("unexpected 404: {body}")),
            },
            StatusCode::TOO_MANY_REQUESTS => GrantOutcome::RateLimited {
                retry_after: retry_after_from_body(&body)
                    .or(header_hint)
                    .unwrap_or(DEFAULT_RETRY_AFTER),
            },
            _ => GrantOutcome::Transient(format!("HTTP {status}: {}", api_message(&body))),
        }
    }
}

fn retry_after_from_headers(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

fn retry_after_from_body(body: &str) -> Option<Duration> {
    #[derive(Deserialize)]
    struct Throttle {
        retry_after: f64,
    }
    serde_json::from_str::<Throttle>(body)
        .ok()
        .filter(|t| t.retry_after.is_finite() && t.retry_after >= 0.0)
        .map(|t| Duration::from_secs_f64(t.retry_after))
}

fn api_code(body: &str) -> Option<i64> {
    #[derive(Deserialize)]
    struct ApiError {
        code: i64,
    }
    serde_json::from_str::<ApiError>(body).ok().map(|e| e.code)
}

fn api_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ApiError {
        message: String,
    }
    serde_json::from_str::<ApiError>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.to_string())
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct GuildDto {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RoleDto {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct MemberDto {
    user: UserDto,
    nick: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UserDto {
    id: String,
    username: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_from_body() {
        assert_eq!(
            retry_after_from_body(r#"{"message": "slow down", "retry_after": 2.5}"#),
            Some(Duration::from_secs_f64(2.5))
        );
        assert_eq!(retry_after_from_body("not json"), None);
        assert_eq!(retry_after_from_body(r#"{"retry_after": -1.0}"#), None);
    }

    #[test]
    fn test_api_error_parsing() {
        let body = r#"{"message": "Unknown Role", "code": 10011}"#;
        assert_eq!(api_code(body), Some(ERR_UNKNOWN_ROLE));
        assert_eq!(api_message(body), "Unknown Role");
        assert_eq!(api_message("plain text"), "plain text");
    }

    #[test]
    fn test_ids_in_wire_types_stay_strings() {
        let dto: MemberDto = serde_json::from_str(
            r#"{"user": {"id": "1392210566407524382", "username": "ada"},
                "nick": null, "roles": ["7"]}"#,
        )
        .unwrap();
        assert_eq!(
            parse_exact_id(&dto.user.id).unwrap(),
            1392210566407524382u64
        );
    }
}
