//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Request (context attached, body ingested, input sanitized)
//!     → dispatcher.rs (webhook rule first)
//!     → table.rs (bindings matching the path, registration order)
//!     → collaborator.rs (router answers or passes)
//!     → not-found fallback when every binding passed
//!
//! Route Table Assembly (at startup):
//!     Collaborators
//!     → mount views at `/`, resources under `/api/v1`
//!     → reject unreachable bindings
//!     → freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes assembled at startup, immutable at runtime
//! - Prefix matching only, no regex
//! - First router that answers wins

pub mod collaborator;
pub mod defaults;
pub mod dispatcher;
pub mod matcher;
pub mod table;

use std::sync::Arc;

pub use collaborator::{AxumRouter, ResourceRouter, Routed, WebhookHandler};
pub use dispatcher::Dispatcher;
pub use table::{RouteTable, RoutingError};

use defaults::{AcknowledgeWebhook, EchoRouter, LandingPage};

pub const API_V1: &str = "/api/v1";

/// The routers and webhook handler the gateway fronts.
#[derive(Clone)]
pub struct Collaborators {
    pub views: Arc<dyn ResourceRouter>,
    pub tours: Arc<dyn ResourceRouter>,
    pub users: Arc<dyn ResourceRouter>,
    pub reviews: Arc<dyn ResourceRouter>,
    pub bookings: Arc<dyn ResourceRouter>,
    pub webhook: Arc<dyn WebhookHandler>,
}

impl Collaborators {
    /// Stand-ins that echo requests back.
    pub fn placeholder() -> Self {
        Self {
            views: Arc::new(LandingPage),
            tours: Arc::new(EchoRouter::new("tours")),
            users: Arc::new(EchoRouter::new("users")),
            reviews: Arc::new(EchoRouter::new("reviews")),
            bookings: Arc::new(EchoRouter::new("bookings")),
            webhook: Arc::new(AcknowledgeWebhook),
        }
    }

    /// Views at the root, then one binding per API resource.
    pub fn route_table(&self) -> Result<RouteTable, RoutingError> {
        RouteTable::builder()
            .mount("/", self.views.clone())
            .mount(format!("{}/tours", API_V1), self.tours.clone())
            .mount(format!("{}/users", API_V1), self.users.clone())
            .mount(format!("{}/reviews", API_V1), self.reviews.clone())
            .mount(format!("{}/bookings", API_V1), self.bookings.clone())
            .build()
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("views", &self.views.name())
            .field("tours", &self.tours.name())
            .field("users", &self.users.name())
            .field("reviews", &self.reviews.name())
            .field("bookings", &self.bookings.name())
            .finish_non_exhaustive()
    }
}
