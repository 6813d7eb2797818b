//! Tower middleware that runs an admission check before each request.
//!
//! ```
//! use std::sync::Arc;
//! use tower::{service_fn, Layer, Service, ServiceExt};
//! use turnstile::{AdmissionEngine, AdmissionLayer};
//! use turnstile::policy;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let engine = Arc::new(AdmissionEngine::new());
//! let layer = AdmissionLayer::new(engine, policy::ADMIN, |user: &String| user.clone());
//! let mut svc = layer.layer(service_fn(|user: String| async move {
//!     Ok::<_, std::io::Error>(format!("hello {user}"))
//! }));
//! let reply = svc.ready().await.unwrap().call("root".to_string()).await.unwrap();
//! assert_eq!(reply, "hello root");
//! # }
//! ```
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower_layer::Layer;
use tower_service::Service;

use crate::decision::Cost;
use crate::engine::AdmissionEngine;
use crate::error::AdmissionError;

type Identify<Req> = Arc<dyn Fn(&Req) -> String + Send + Sync>;
type Estimate<Req> = Arc<dyn Fn(&Req) -> Cost + Send + Sync>;

/// Layer that guards a service with one admission category.
pub struct AdmissionLayer<Req> {
    engine: Arc<AdmissionEngine>,
    category: Arc<str>,
    identify: Identify<Req>,
    estimate: Option<Estimate<Req>>,
}

impl<Req> AdmissionLayer<Req> {
    /// `identify` extracts the caller key (user id, client address, ...) from a request.
    pub fn new<F>(engine: Arc<AdmissionEngine>, category: impl Into<Arc<str>>, identify: F) -> Self
    where
        F: Fn(&Req) -> String + Send + Sync + 'static,
    {
        Self { engine, category: category.into(), identify: Arc::new(identify), estimate: None }
    }

    /// Derive a per-request [`Cost`]; requests are unit weight otherwise.
    pub fn with_cost<F>(mut self, estimate: F) -> Self
    where
        F: Fn(&Req) -> Cost + Send + Sync + 'static,
    {
        self.estimate = Some(Arc::new(estimate));
        self
    }
}

impl<Req> Clone for AdmissionLayer<Req> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            category: self.category.clone(),
            identify: self.identify.clone(),
            estimate: self.estimate.clone(),
        }
    }
}

impl<Req> fmt::Debug for AdmissionLayer<Req> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionLayer")
            .field("category", &self.category)
            .field("weighted", &self.estimate.is_some())
            .finish()
    }
}

impl<S, Req> Layer<S> for AdmissionLayer<Req> {
    type Service = AdmissionService<S, Req>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService { inner: service, guard: self.clone() }
    }
}

/// Service produced by [`AdmissionLayer`].
pub struct AdmissionService<S, Req> {
    inner: S,
    guard: AdmissionLayer<Req>,
}

impl<S: Clone, Req> Clone for AdmissionService<S, Req> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), guard: self.guard.clone() }
    }
}

impl<S: fmt::Debug, Req> fmt::Debug for AdmissionService<S, Req> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionService")
            .field("inner", &self.inner)
            .field("guard", &self.guard)
            .finish()
    }
}

impl<S, Req> Service<Req> for AdmissionService<S, Req>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = AdmissionError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let identifier = (self.guard.identify)(&req);
        let cost = self.guard.estimate.as_ref().map_or(Cost::UNIT, |estimate| estimate(&req));
        // The check is synchronous so the quota is charged in call order.
        let decision = self.guard.engine.check_with(&identifier, &self.guard.category, cost);
        if !decision.allowed {
            return Box::pin(async move { Err(AdmissionError::Denied(Box::new(decision))) });
        }
        // Take the instance that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(req).await.map_err(AdmissionError::Inner) })
    }
}
