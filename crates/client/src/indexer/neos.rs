//! NeosVR public sessions.
//!
//! The sessions API has long outages; an unavailable or garbled response
//! yields no items instead of a failed run.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use metacrawl_core::IndexedContent;

use super::{IndexContext, IndexError, Indexer, Platform};
use crate::fetch::{FetchError, RequestOptions};

pub const DEFAULT_ENDPOINT: &str = "https://api.neos.com";

/// Session summary from `/api/sessions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NeosSession {
    pub session_id: Option<String>,
    /// Older responses carry the id here instead.
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub host_username: Option<String>,
    pub host_user_id: Option<String>,
    pub max_users: Option<u64>,
    pub active_users: Option<u64>,
    pub access_level: Option<String>,
    pub has_ended: Option<bool>,
    pub is_valid: Option<bool>,
    pub universe_id: Option<String>,
    pub app_version: Option<String>,
    pub headless_host: Option<Value>,
    pub compatible_version: Option<Value>,
    pub thumbnail: Option<String>,
    pub tags: Vec<String>,
    pub session_users: Vec<Value>,
}

impl NeosSession {
    pub fn session_id(&self) -> Option<&str> {
        self.session_id
            .as_deref()
            .or(self.id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }

    pub fn session_url(&self) -> Option<String> {
        self.session_id().map(|id| format!("neos:///sessions/{id}"))
    }

    /// Stored description, or one built from the user counts and host.
    pub fn describe(&self) -> String {
        if let Some(description) = self.description.as_deref().map(str::trim) {
            if !description.is_empty() {
                return description.to_string();
            }
        }

        let mut text = String::from("NeosVR session");
        if let (Some(active), Some(max)) = (self.active_users, self.max_users) {
            text.push_str(&format!(" ({active}/{max} users)"));
        }
        if let Some(host) = &self.host_username {
            text.push_str(&format!(" hosted by {host}"));
        }
        text
    }
}

/// Whether `err` is one of the API's known outage responses.
fn is_outage(err: &FetchError) -> bool {
    match err {
        FetchError::Http { status, .. } => *status == 404 || *status >= 500,
        FetchError::Parse(_) => true,
        _ => false,
    }
}

/// Sessions in a response body. Anything but a JSON array yields `None`;
/// array elements that are not sessions are skipped.
pub fn parse_sessions(body: &Value) -> Option<Vec<NeosSession>> {
    let entries = body.as_array()?;
    Some(
        entries
            .iter()
            .filter_map(|entry| match serde_json::from_value::<NeosSession>(entry.clone()) {
                Ok(session) => Some(session),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping malformed session entry");
                    None
                }
            })
            .collect(),
    )
}

pub struct NeosIndexer;

#[async_trait::async_trait]
impl Indexer for NeosIndexer {
    type Item = NeosSession;

    fn platform(&self) -> Platform {
        Platform::Neos
    }

    /// The API host serves no robots.txt.
    fn requires_robots_check(&self) -> bool {
        false
    }

    async fn fetch_items(&self, ctx: &IndexContext) -> Result<Vec<NeosSession>, IndexError> {
        let endpoint = ctx.endpoint(DEFAULT_ENDPOINT);
        let url = format!("{endpoint}/api/sessions?accessLevel=Anyone");
        let options = ctx.request_options(RequestOptions::json(), self.requires_robots_check());

        let body: Value = match ctx.fetch().get_json(&url, options).await {
            Ok(body) => body,
            Err(e) if is_outage(&e) => {
                tracing::warn!(url = %url, error = %e, "sessions API unavailable, skipping");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        match parse_sessions(&body) {
            Some(sessions) => {
                tracing::info!(sessions = sessions.len(), "fetched public sessions");
                Ok(sessions)
            }
            None => {
                tracing::warn!(url = %url, "sessions API returned something other than an array");
                Ok(Vec::new())
            }
        }
    }

    fn normalize(&self, session: &NeosSession) -> Result<IndexedContent, IndexError> {
        let external_id = session
            .session_id()
            .or_else(|| session.name())
            .map(str::to_string)
            .ok_or_else(|| IndexError::Normalize("session has neither an id nor a name".into()))?;

        let fields = json!({
            "session_id": session.session_id(),
            "access_level": session.access_level,
            "max_users": session.max_users,
            "active_users": session.active_users,
            "host_user_id": session.host_user_id,
            "universe_id": session.universe_id,
            "app_version": session.app_version,
            "headless_host": session.headless_host,
            "compatible_version": session.compatible_version,
            "has_ended": session.has_ended,
            "is_valid": session.is_valid,
            "session_url": session.session_url(),
            "thumbnail": session.thumbnail,
            "tags": session.tags,
            "session_users_count": session.session_users.len(),
        });
        let metadata: Map<String, Value> = match fields {
            Value::Object(map) => map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
            _ => Map::new(),
        };

        Ok(IndexedContent {
            source_platform: self.platform().as_str().to_string(),
            external_id,
            content_type: "session".to_string(),
            title: session.name().unwrap_or("Unnamed NeosVR Session").to_string(),
            description: Some(session.describe()),
            author: session.host_username.clone(),
            metadata: Value::Object(metadata),
            coordinates: None,
        })
    }
}
