//! Client side of the visit protocol: transport, navigation engine and the seams it
//! drives (history, head, view layer).

pub mod bootstrap;
pub mod events;
pub mod head;
pub mod host;
pub mod links;
pub mod navigator;
pub mod transport;

pub use bootstrap::{extract_bootstrap, parse_bootstrap};
pub use events::LifecycleEvent;
pub use head::HeadElement;
pub use host::Host;
pub use links::{ClickEvent, is_active, should_intercept};
pub use navigator::{DispatchOptions, MAX_REDIRECTS, NavigationError, Navigator, Outcome};
pub use transport::{
    HttpTransport, Method, Transport, TransportError, VisitEnvelope, VisitRequest,
};
