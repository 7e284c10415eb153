use askama::{Error as AskamaError, Template};
use axum::response::Html;
use thiserror::Error;
use tracing::warn;
use visitor_types::{BOOTSTRAP_ELEMENT_ID, Bootstrap, Meta, Props, Visit};

use crate::{application::globals::is_script_identifier, config::AppSettings};

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

pub fn render_template<T: Template>(
    template: T,
    source: &'static str,
) -> Result<Html<String>, TemplateRenderError> {
    template
        .render()
        .map(Html)
        .map_err(|err| TemplateRenderError::new(source, "Template rendering failed", err))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadTagKind {
    Title,
    Meta,
    Snippet,
}

/// One engine-owned head element.
#[derive(Debug, Clone)]
pub struct HeadTagView {
    pub kind: HeadTagKind,
    pub name: String,
    pub content: String,
}

impl From<Meta> for HeadTagView {
    fn from(meta: Meta) -> Self {
        match meta {
            Meta::Title { content } => Self {
                kind: HeadTagKind::Title,
                name: String::new(),
                content,
            },
            Meta::Meta { name, content } => Self {
                kind: HeadTagKind::Meta,
                name,
                content,
            },
            Meta::Snippet { content } => Self {
                kind: HeadTagKind::Snippet,
                name: String::new(),
                content: escape_script_text(&content),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct GlobalView {
    pub name: String,
    pub json: String,
}

#[derive(Template)]
#[template(path = "root.html")]
pub struct RootTemplate {
    pub lang: String,
    pub head: Vec<HeadTagView>,
    pub globals: Vec<GlobalView>,
    pub entry_scripts: Vec<String>,
    pub root_id: String,
    pub bootstrap_id: &'static str,
    pub html: String,
    pub bootstrap: String,
}

/// Markup emitted by the built-in shell renderer.
#[derive(Template)]
#[template(path = "shell.html")]
pub struct ShellTemplate {
    pub view: String,
    pub location: String,
}

/// Inputs of the root document of a full page load.
pub struct DocumentContext<'a> {
    pub app: &'a AppSettings,
    /// Visit carrying the real session.
    pub visit: &'a Visit,
    pub globals: &'a Props,
    pub html: &'a str,
}

pub fn render_root_document(ctx: &DocumentContext<'_>) -> Result<Html<String>, TemplateRenderError> {
    let bootstrap = Bootstrap {
        visit: ctx.visit.clone(),
        globals: ctx.globals.clone(),
    };

    let template = RootTemplate {
        lang: ctx.app.lang.clone(),
        head: ctx
            .visit
            .meta()
            .unwrap_or_default()
            .into_iter()
            .map(HeadTagView::from)
            .collect(),
        globals: global_views(ctx.globals),
        entry_scripts: ctx.app.entry_scripts.clone(),
        root_id: ctx.app.root_id.clone(),
        bootstrap_id: BOOTSTRAP_ELEMENT_ID,
        html: ctx.html.to_string(),
        bootstrap: script_json(&bootstrap),
    };

    render_template(template, "presentation::views::render_root_document")
}

pub fn render_shell(view: &str, location: &str) -> Result<Html<String>, TemplateRenderError> {
    render_template(
        ShellTemplate {
            view: view.to_string(),
            location: location.to_string(),
        },
        "presentation::views::render_shell",
    )
}

fn global_views(globals: &Props) -> Vec<GlobalView> {
    globals
        .iter()
        .filter_map(|(name, value)| {
            if !is_script_identifier(name) {
                warn!(
                    target = "visitor::presentation",
                    name = %name,
                    "skipping global that is not a valid script identifier"
                );
                return None;
            }
            Some(GlobalView {
                name: name.clone(),
                json: script_json(value),
            })
        })
        .collect()
}

/// Serialize `value` as JSON safe to place inside a `<script>` element.
///
/// Markup-significant characters only occur inside JSON strings, where their unicode
/// escapes decode to the same text.
pub fn script_json<T: serde::Serialize>(value: &T) -> String {
    let raw = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '<' => escaped.push_str("\\u003c"),
            '>' => escaped.push_str("\\u003e"),
            '&' => escaped.push_str("\\u0026"),
            '\u{2028}' => escaped.push_str("\\u2028"),
            '\u{2029}' => escaped.push_str("\\u2029"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Snippets are JSON, where `<` only occurs inside strings.
fn escape_script_text(content: &str) -> String {
    content.replace('<', "\\u003c")
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use visitor_types::Session;

    use super::*;

    fn app() -> AppSettings {
        AppSettings {
            environment: "production".to_string(),
            manifest: "public/build/manifest.json".into(),
            root_id: "app".to_string(),
            lang: "en".to_string(),
            entry_scripts: vec!["/build/app.js".to_string()],
        }
    }

    fn visit() -> Visit {
        Visit {
            location: "http://localhost/posts/5".to_string(),
            view: Some("Post".to_string()),
            props: serde_json::from_value(json!({
                "id": 5,
                "body": "</script><script>alert(1)</script>",
                "meta": [
                    { "type": "title", "content": "Post 5" },
                    { "type": "meta", "name": "description", "content": "A \"quoted\" post" },
                    { "type": "snippet", "content": "{\"name\":\"</script>\"}" }
                ]
            }))
            .expect("props"),
            session: Session::authenticated(json!({ "name": "Ada" }), false),
            ..Visit::default()
        }
    }

    #[test]
    fn root_document_embeds_mount_point_and_bootstrap() {
        let globals: Props =
            serde_json::from_value(json!({ "routes": { "home": "/" }, "bad-name": 1 }))
                .expect("globals");
        let html = render_root_document(&DocumentContext {
            app: &app(),
            visit: &visit(),
            globals: &globals,
            html: "<article>Post 5</article>",
        })
        .expect("render")
        .0;

        assert!(html.contains(r#"<div id="app"><article>Post 5</article></div>"#));
        assert!(html.contains(r#"<script id="__VISITOR__" type="application/json">"#));
        assert!(html.contains(r#"var routes = {"home":"/"};"#));
        assert!(!html.contains("var bad-name"));
        assert!(html.contains(r#"<script type="module" src="/build/app.js"></script>"#));
        assert!(html.contains("<title visitor>Post 5</title>"));
        assert!(html.contains(r#"<meta visitor name="description""#));
        assert!(html.contains(r#"<script visitor type="application/ld+json">{"name":"\u003c/script>"}</script>"#));
        assert!(!html.contains("</script><script>alert(1)"));
    }

    #[test]
    fn snippets_cannot_open_markup_inside_the_script() {
        let tag = HeadTagView::from(Meta::Snippet {
            content: r#"{"note":"<!-- <script>","end":"</script>"}"#.to_string(),
        });
        assert!(!tag.content.contains('<'));
        let decoded: Value = serde_json::from_str(&tag.content).expect("still json");
        assert_eq!(decoded["note"], "<!-- <script>");
        assert_eq!(decoded["end"], "</script>");
    }

    #[test]
    fn bootstrap_payload_round_trips() {
        let visit = visit();
        let html = render_root_document(&DocumentContext {
            app: &app(),
            visit: &visit,
            globals: &Props::new(),
            html: "",
        })
        .expect("render")
        .0;

        let start_marker = r#"<script id="__VISITOR__" type="application/json">"#;
        let start = html.find(start_marker).expect("bootstrap script") + start_marker.len();
        let end = start + html[start..].find("</script>").expect("script end");
        let bootstrap: Bootstrap = serde_json::from_str(&html[start..end]).expect("json");

        assert_eq!(bootstrap.visit, visit);
        assert!(bootstrap.globals.is_empty());
    }

    #[test]
    fn shell_escapes_attributes() {
        let html = render_shell("Post\"><x", "http://localhost/?a=1&b=2")
            .expect("render")
            .0;
        assert!(html.contains("data-visitor-view=\"Post&"));
        assert!(!html.contains("\"><x"));
        assert!(!html.contains("a=1&b=2"));
    }
}
