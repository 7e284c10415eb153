use visitor_types::{HEAD_MARKER_ATTRIBUTE, Meta};

use super::host::Host;

/// Head element the engine injects for one metadata directive.
///
/// Every element carries the [`HEAD_MARKER_ATTRIBUTE`] so the next update can remove it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadElement {
    Title { text: String },
    Meta { name: String, content: String },
    Script { script_type: &'static str, text: String },
}

impl HeadElement {
    pub fn tag_name(&self) -> &'static str {
        match self {
            HeadElement::Title { .. } => "title",
            HeadElement::Meta { .. } => "meta",
            HeadElement::Script { .. } => "script",
        }
    }
}

impl From<&Meta> for HeadElement {
    fn from(meta: &Meta) -> Self {
        match meta {
            Meta::Title { content } => HeadElement::Title {
                text: content.clone(),
            },
            Meta::Meta { name, content } => HeadElement::Meta {
                name: name.clone(),
                content: content.clone(),
            },
            Meta::Snippet { content } => HeadElement::Script {
                script_type: "application/ld+json",
                text: content.clone(),
            },
        }
    }
}

/// Replace every engine-owned head element with one element per directive, in order.
pub(crate) fn apply_head<H: Host + ?Sized>(host: &H, meta: &[Meta]) {
    host.remove_head_elements(HEAD_MARKER_ATTRIBUTE);
    for directive in meta {
        host.append_head_element(HeadElement::from(directive));
    }
}
