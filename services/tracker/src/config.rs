//! services/tracker/src/config.rs
//!
//! Defines the tracking configuration structure and loading logic.
//!
//! All configuration is supplied by the host runtime as a JSON object using
//! the underscore-prefixed option names the course build emits. Anything the
//! original runtime read from the page location arrives through
//! [`LaunchEnvironment`].

use serde::Deserialize;
use url::Url;
use xapi_core::domain::ContentKind;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Tracking configuration is malformed: {0}")]
    Malformed(String),
    #[error("Missing required launch property: {0}")]
    MissingProperty(&'static str),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

/// The component blacklist may be configured as a comma-separated string or
/// as an array of component names.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ComponentBlacklist {
    List(Vec<String>),
    Csv(String),
}

impl ComponentBlacklist {
    /// The blacklist as lowercased component names.
    pub fn normalized(&self) -> Vec<String> {
        match self {
            ComponentBlacklist::List(items) => {
                items.iter().map(|item| item.to_lowercase()).collect()
            }
            ComponentBlacklist::Csv(csv) => csv
                .split(',')
                .map(|item| item.trim().to_lowercase())
                .filter(|item| !item.is_empty())
                .collect(),
        }
    }
}

impl Default for ComponentBlacklist {
    fn default() -> Self {
        ComponentBlacklist::Csv("blank,graphic".to_string())
    }
}

/// The per-event-kind enable map, built once at startup. Variants of the
/// content event enum whose flag is off are dropped without a statement.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreEvents {
    #[serde(rename = "_pageVisited")]
    pub page_visited: bool,
    #[serde(rename = "_menuVisited")]
    pub menu_visited: bool,
    #[serde(rename = "_interactions")]
    pub interactions: bool,
    #[serde(rename = "_assessmentsComplete")]
    pub assessments_complete: bool,
    #[serde(rename = "_contentObjectsComplete")]
    pub content_objects_complete: bool,
    #[serde(rename = "_articlesComplete")]
    pub articles_complete: bool,
    #[serde(rename = "_blocksComplete")]
    pub blocks_complete: bool,
    #[serde(rename = "_componentsComplete")]
    pub components_complete: bool,
}

impl Default for CoreEvents {
    fn default() -> Self {
        Self {
            page_visited: false,
            menu_visited: false,
            interactions: true,
            assessments_complete: true,
            content_objects_complete: false,
            articles_complete: false,
            blocks_complete: false,
            components_complete: true,
        }
    }
}

impl CoreEvents {
    /// Whether completion statements are enabled for the given entity kind.
    pub fn completion_enabled(&self, kind: ContentKind) -> bool {
        match kind {
            ContentKind::Menu | ContentKind::Page => self.content_objects_complete,
            ContentKind::Article => self.articles_complete,
            ContentKind::Block => self.blocks_complete,
            ContentKind::Component => self.components_complete,
        }
    }
}

/// The external specification profile altering bootstrap and completion
/// behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecificationProfile {
    Cmi5,
}

/// Holds all tracking options recognized from the course configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TrackingConfig {
    #[serde(rename = "_isEnabled")]
    pub is_enabled: bool,
    #[serde(rename = "_endpoint")]
    pub endpoint: Option<String>,
    #[serde(rename = "_user")]
    pub user: Option<String>,
    #[serde(rename = "_password")]
    pub password: Option<String>,
    #[serde(rename = "_activityID")]
    pub activity_id: Option<String>,
    #[serde(rename = "_lang")]
    pub lang: Option<String>,
    #[serde(rename = "_generateIds")]
    pub generate_ids: bool,
    #[serde(rename = "_shouldTrackState")]
    pub should_track_state: Option<bool>,
    #[serde(rename = "_shouldUseRegistration")]
    pub should_use_registration: bool,
    #[serde(rename = "_componentBlacklist")]
    pub component_blacklist: ComponentBlacklist,
    #[serde(rename = "_coreEvents")]
    pub core_events: CoreEvents,
    #[serde(rename = "_lrsFailureBehaviour")]
    pub lrs_failure_behaviour: Option<String>,
    #[serde(rename = "_profile")]
    pub profile: Option<SpecificationProfile>,
}

impl TrackingConfig {
    /// Parses the `_xapi` section of the host's course configuration.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(|e| ConfigError::Malformed(e.to_string()))
    }

    pub fn should_track_state(&self) -> bool {
        self.should_track_state.unwrap_or(true)
    }

    /// Failure notifications are shown unless the behaviour is `"ignore"`.
    pub fn should_notify_failures(&self) -> bool {
        self.lrs_failure_behaviour.as_deref() != Some("ignore")
    }

    /// The statically configured endpoint, normalized with a trailing slash
    /// and a protocol. A missing protocol defaults to `http://` with a
    /// warning, matching how permissive course configs are in the wild.
    pub fn normalized_endpoint(&self) -> Option<String> {
        let raw = self.endpoint.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }

        let mut endpoint = raw.to_string();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }

        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            tracing::warn!("\"_endpoint\" value is missing protocol (defaulting to http://)");
            endpoint = format!("http://{endpoint}");
        }

        Some(endpoint)
    }
}

/// What the embedding page supplies about itself: its own URL (carrying any
/// launch query parameters) and the course's default display language.
#[derive(Debug, Clone)]
pub struct LaunchEnvironment {
    pub page_url: Url,
    pub default_language: String,
}

impl LaunchEnvironment {
    pub fn new(page_url: Url, default_language: impl Into<String>) -> Self {
        Self {
            page_url,
            default_language: default_language.into(),
        }
    }

    /// The URL the course is running on, without query or fragment. Used as
    /// the activity id of last resort.
    pub fn base_activity_id(&self) -> String {
        let mut url = self.page_url.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.to_string()
    }

    /// Reads a single launch parameter from the page URL's query string.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.page_url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}
