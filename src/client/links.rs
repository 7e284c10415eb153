//! Link behaviour shared by view-layer bindings.

use url::Url;

/// The parts of a click that decide whether the engine takes over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClickEvent {
    pub default_prevented: bool,
    /// 0 primary, 1 middle, 2 secondary.
    pub button: i16,
    pub alt_key: bool,
    pub ctrl_key: bool,
    pub meta_key: bool,
    pub shift_key: bool,
}

/// Intercept only unmodified primary or middle clicks nobody else handled.
pub fn should_intercept(event: &ClickEvent) -> bool {
    !(event.default_prevented
        || event.button > 1
        || event.alt_key
        || event.ctrl_key
        || event.meta_key
        || event.shift_key)
}

/// Whether a link to `href` is active at `location`.
///
/// Exact match always counts; with `end` unset, `href` being a prefix of the location
/// counts too. Root-relative hrefs are compared against the location's path and query.
pub fn is_active(location: &str, href: &str, end: bool) -> bool {
    let location = comparable_location(location, href);
    location == href || (!end && location.starts_with(href))
}

fn comparable_location(location: &str, href: &str) -> String {
    if href.starts_with('/')
        && let Ok(url) = Url::parse(location)
    {
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        return path;
    }
    location.to_string()
}
