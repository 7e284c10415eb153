//! Wire contract shared by the Visitor server and client.
//!
//! A [`Visit`] is what the server answers a protocol request with. The same shape is
//! embedded into the root document on first load (wrapped in a [`Bootstrap`]) and is
//! what the render gateway receives.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request header marking a protocol (visit data) request. Echoed on visit responses.
pub const VISITOR_HEADER: &str = "x-visitor";
/// Response header marking a visit response as a partial (merge) update.
pub const PARTIAL_HEADER: &str = "x-partial";
/// Cookie carrying the anti-CSRF token.
pub const XSRF_COOKIE: &str = "XSRF-TOKEN";
/// Header the anti-CSRF token is echoed in on state-mutating requests.
pub const XSRF_HEADER: &str = "x-xsrf-token";
/// Id of the script element holding the bootstrap payload.
pub const BOOTSTRAP_ELEMENT_ID: &str = "__VISITOR__";
/// Attribute tagging head elements owned by the navigation engine.
pub const HEAD_MARKER_ATTRIBUTE: &str = "visitor";
/// Prop key holding the head metadata directives.
pub const META_PROP: &str = "meta";

/// Free-form JSON object used for props, shared state, query and flash data.
pub type Props = serde_json::Map<String, Value>;

/// Head metadata directive carried in `props.meta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Meta {
    Title { content: String },
    Meta { name: String, content: String },
    Snippet { content: String },
}

/// Session state as seen by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub is_authenticated: bool,
    #[serde(default)]
    pub user: Value,
    pub via_remember: bool,
    #[serde(default)]
    pub flash: Props,
}

impl Session {
    /// Session with every identity field zeroed. Safe to cache and share across users.
    pub fn anonymous() -> Self {
        Self {
            is_authenticated: false,
            user: Value::Null,
            via_remember: false,
            flash: Props::new(),
        }
    }

    pub fn authenticated(user: Value, via_remember: bool) -> Self {
        Self {
            is_authenticated: true,
            user,
            via_remember,
            flash: Props::new(),
        }
    }

    pub fn with_flash(mut self, flash: Props) -> Self {
        self.flash = flash;
        self
    }

    pub fn is_anonymous(&self) -> bool {
        !self.is_authenticated && self.user.is_null() && !self.via_remember
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// Redirect the client must follow instead of materializing the visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub target: String,
    #[serde(default)]
    pub reload: bool,
}

/// The unit of navigable state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Visit {
    #[serde(default)]
    pub redirect: Option<Redirect>,
    #[serde(default)]
    pub query: Props,
    #[serde(default)]
    pub session: Session,
    #[serde(default)]
    pub location: String,
    /// Absent only on partial visits, which never change the mounted view.
    #[serde(default)]
    pub view: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub shared: Props,
    #[serde(default)]
    pub props: Props,
    #[serde(default)]
    pub version: String,
}

impl Visit {
    /// Head directives carried in `props.meta`, if the payload has any.
    pub fn meta(&self) -> Option<Vec<Meta>> {
        meta_from_props(&self.props)
    }
}

/// Initial payload embedded into the root document: the visit plus process globals.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Bootstrap {
    #[serde(flatten)]
    pub visit: Visit,
    #[serde(default)]
    pub globals: Props,
}

/// Body posted to the render gateway.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RenderRequest {
    pub visit: Visit,
    #[serde(default)]
    pub globals: Props,
}

/// Format version of [`NavigationSnapshot`]. Entries written with another version are
/// ignored on restore.
pub const SNAPSHOT_VERSION: u32 = 1;

/// The mounted view and its props.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CurrentView {
    pub view: String,
    #[serde(default)]
    pub props: Props,
}

/// Client-side navigation state. One per tab.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NavigationState {
    pub location: String,
    #[serde(default)]
    pub session: Session,
    #[serde(default)]
    pub shared: Props,
    pub current: CurrentView,
    #[serde(default)]
    pub query: Props,
    #[serde(default)]
    pub version: String,
}

impl NavigationState {
    pub fn meta(&self) -> Option<Vec<Meta>> {
        meta_from_props(&self.current.props)
    }
}

/// Navigation state as stored in a history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationSnapshot {
    pub snapshot_version: u32,
    pub state: NavigationState,
}

impl NavigationSnapshot {
    pub fn new(state: NavigationState) -> Self {
        Self {
            snapshot_version: SNAPSHOT_VERSION,
            state,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Decode a stored history entry. `None` when it is missing, foreign or from another
    /// snapshot version.
    pub fn restore(value: &Value) -> Option<NavigationState> {
        let snapshot = Self::deserialize(value).ok()?;
        (snapshot.snapshot_version == SNAPSHOT_VERSION).then_some(snapshot.state)
    }
}

/// Parse head directives out of a props map.
///
/// Returns `None` when there is no `meta` key or it does not hold a directive list, so
/// callers can leave existing metadata alone.
pub fn meta_from_props(props: &Props) -> Option<Vec<Meta>> {
    let raw = props.get(META_PROP)?;
    serde_json::from_value(raw.clone()).ok()
}

/// Shallow merge: keys from `overlay` replace keys in `base`, other keys persist.
pub fn merge_shallow(base: &mut Props, overlay: &Props) {
    for (key, value) in overlay {
        base.insert(key.clone(), value.clone());
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Props, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Props>::deserialize(deserializer)?.unwrap_or_default())
}
