//! The API layer, containing web handlers and routing.

pub mod handlers;
pub mod router;
pub mod signature;

pub use handlers::{ApiDoc, WebhookAck};
pub use router::create_router;
pub use signature::WebhookVerifier;
