use serde_json::Value;
use visitor_types::NavigationState;

use super::head::HeadElement;

/// The document the navigation engine drives: history, head, scroll, view layer.
///
/// In a browser this is a thin binding over `window`; tests use a recording double.
pub trait Host: Send + Sync {
    /// Add a history entry holding `snapshot` at `url`.
    fn push_state(&self, snapshot: Value, url: &str);

    /// Overwrite the current history entry.
    fn replace_state(&self, snapshot: Value, url: &str);

    fn scroll_to(&self, x: i64, y: i64);

    /// Remove every head element carrying the `marker` attribute.
    fn remove_head_elements(&self, marker: &str);

    fn append_head_element(&self, element: HeadElement);

    /// Hand the committed state to the view layer.
    fn mount(&self, state: &NavigationState);

    /// Full document navigation.
    fn assign_location(&self, url: &str);

    /// Raw (still URL-encoded) value of a cookie.
    fn cookie(&self, name: &str) -> Option<String>;
}
