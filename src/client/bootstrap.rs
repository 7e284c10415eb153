use visitor_types::{BOOTSTRAP_ELEMENT_ID, Bootstrap};

use super::navigator::NavigationError;

pub fn parse_bootstrap(json: &str) -> Result<Bootstrap, NavigationError> {
    serde_json::from_str(json).map_err(|err| NavigationError::Bootstrap(err.to_string()))
}

/// Find the bootstrap script in a root document and decode it.
pub fn extract_bootstrap(document: &str) -> Result<Bootstrap, NavigationError> {
    let marker = format!("id=\"{BOOTSTRAP_ELEMENT_ID}\"");
    let element = document
        .find(&marker)
        .ok_or_else(|| NavigationError::Bootstrap("bootstrap element not found".to_string()))?;
    let content_start = document[element..]
        .find('>')
        .map(|offset| element + offset + 1)
        .ok_or_else(|| NavigationError::Bootstrap("bootstrap element is unterminated".to_string()))?;
    let content_end = document[content_start..]
        .find("</script>")
        .map(|offset| content_start + offset)
        .ok_or_else(|| NavigationError::Bootstrap("bootstrap element is unterminated".to_string()))?;

    parse_bootstrap(&document[content_start..content_end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_payload_from_document() {
        let document = r#"<html><body><div id="app"></div>
<script id="__VISITOR__" type="application/json">{"view":"Home","location":"http://localhost/","globals":{"routes":{"home":"/"}},"props":{"html":"\u003c/script\u003e"}}</script>
</body></html>"#;

        let bootstrap = extract_bootstrap(document).expect("bootstrap");
        assert_eq!(bootstrap.visit.view.as_deref(), Some("Home"));
        assert_eq!(bootstrap.globals["routes"]["home"], "/");
        assert_eq!(bootstrap.visit.props["html"], "</script>");
    }

    #[test]
    fn missing_element_is_an_error() {
        let err = extract_bootstrap("<html></html>").expect_err("missing");
        assert!(matches!(err, NavigationError::Bootstrap(_)));
    }
}
