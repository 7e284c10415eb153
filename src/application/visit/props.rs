use std::{fmt, future::Future};

use futures::future::BoxFuture;
use serde_json::Value;
use visitor_types::Props;

use crate::application::error::AppError;

/// Prop that, when it holds a string, names the view instead of the builder argument.
pub const COMPONENT_PROP: &str = "component";

type PropsFactory = Box<dyn FnOnce() -> BoxFuture<'static, Result<Props, AppError>> + Send>;

/// Props as handed to the builder: ready now, or produced only when the visit is built.
pub(crate) enum PropsSource {
    Ready(Props),
    Lazy(PropsFactory),
}

impl PropsSource {
    pub(crate) fn lazy<F, Fut>(factory: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Props, AppError>> + Send + 'static,
    {
        Self::Lazy(Box::new(move || Box::pin(factory())))
    }

    pub(crate) async fn resolve(self) -> Result<Props, AppError> {
        match self {
            PropsSource::Ready(props) => Ok(props),
            PropsSource::Lazy(factory) => factory().await,
        }
    }
}

impl Default for PropsSource {
    fn default() -> Self {
        Self::Ready(Props::new())
    }
}

impl fmt::Debug for PropsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropsSource::Ready(props) => f.debug_tuple("Ready").field(props).finish(),
            PropsSource::Lazy(_) => f.write_str("Lazy"),
        }
    }
}

/// Recursive merge: nested objects merge key by key, anything else is replaced.
pub fn deep_merge(base: &mut Props, overlay: Props) {
    for (key, value) in overlay {
        let Value::Object(incoming) = value else {
            base.insert(key, value);
            continue;
        };
        if let Some(Value::Object(existing)) = base.get_mut(&key) {
            deep_merge(existing, incoming);
            continue;
        }
        base.insert(key, Value::Object(incoming));
    }
}

/// Set `value` at a dotted `path`, creating intermediate objects.
pub fn set_path(target: &mut Props, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = target;

    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }

        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Props::new()));
        if !entry.is_object() {
            *entry = Value::Object(Props::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn props(value: Value) -> Props {
        serde_json::from_value(value).expect("object")
    }

    #[test]
    fn deep_merge_recurses_into_objects() {
        let mut base = props(json!({
            "post": { "id": 5, "title": "Hello" },
            "comments": [1, 2]
        }));
        deep_merge(
            &mut base,
            props(json!({ "post": { "liked": true }, "comments": [3] })),
        );

        assert_eq!(
            json!(base),
            json!({
                "post": { "id": 5, "title": "Hello", "liked": true },
                "comments": [3]
            })
        );
    }

    #[test]
    fn set_path_creates_nested_objects() {
        let mut shared = props(json!({ "app": "blog" }));
        set_path(&mut shared, "user.locale", json!("pl"));
        set_path(&mut shared, "app.name", json!("Blog"));
        set_path(&mut shared, "theme", json!("dark"));

        assert_eq!(
            json!(shared),
            json!({
                "app": { "name": "Blog" },
                "user": { "locale": "pl" },
                "theme": "dark"
            })
        );
    }

    #[tokio::test]
    async fn lazy_props_resolve_on_demand() {
        let source = PropsSource::lazy(|| async { Ok(props(json!({ "lazy": true }))) });
        let resolved = source.resolve().await.expect("props");
        assert_eq!(resolved.get("lazy"), Some(&json!(true)));
    }
}
