use async_trait::async_trait;
use visitor_types::RenderRequest;

use super::server::{Renderer, RendererError};
use crate::presentation::views::render_shell;

/// Renderer hosted by `visitor serve`.
///
/// Emits only the mount element for the view, annotated with the view name and location.
/// Applications with a real server-side renderer plug their own [`Renderer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRenderer;

#[async_trait]
impl Renderer for ShellRenderer {
    async fn render(&self, request: RenderRequest) -> Result<String, RendererError> {
        let view = request
            .visit
            .view
            .ok_or_else(|| RendererError::new("render request carries no view"))?;

        render_shell(&view, &request.visit.location)
            .map(|html| html.0)
            .map_err(|err| RendererError::new(err.to_string()))
    }
}
