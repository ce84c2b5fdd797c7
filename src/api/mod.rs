//! HTTP listener for on-demand collection

pub mod collect;
pub mod health;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::collector::Collector;
use crate::dispatch::InFlightSet;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub collector: Arc<Collector>,

    /// In-flight tracker of the periodic dispatcher, when one is running
    pub in_flight: Option<Arc<InFlightSet>>,
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    collector: Arc<Collector>,
    port: u16,
    in_flight: Option<Arc<InFlightSet>>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub const fn new(collector: Arc<Collector>, port: u16) -> Self {
        Self {
            collector,
            port,
            in_flight: None,
        }
    }

    /// Expose the dispatcher's in-flight calls
    #[must_use]
    pub fn in_flight(mut self, in_flight: Arc<InFlightSet>) -> Self {
        self.in_flight = Some(in_flight);
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        ApiServer {
            state: Arc::new(ApiState {
                collector: self.collector,
                in_flight: self.in_flight,
            }),
            port: self.port,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .merge(collect::router(Arc::clone(&self.state)))
            .merge(health::router())
            .merge(health::diagnostics_router(Arc::clone(&self.state)))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
