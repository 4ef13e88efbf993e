//! Chain-of-responsibility plumbing. A [`Middleware`] either answers a request
//! or hands it to [`Next`], which runs the following middleware and finally
//! an [`Endpoint`].

use std::{convert::Infallible, future::Future, pin::Pin, sync::Arc};

use async_trait::async_trait;
use hyper::{Body, Request, Response, StatusCode};

pub type HandlerResult = Result<Response<Body>, Infallible>;

pub type BoxFuture<'a> = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>>;

// ---------------------- Traits ----------------------

#[async_trait]
pub trait Middleware: Send + Sync {
    /// Used in log lines only.
    fn middleware_name(&self) -> &str;

    /// Answer the request, or call `next.run(req)` to pass it on.
    async fn handle(&self, req: Request<Body>, next: Next<'_>) -> HandlerResult;
}

/// Whatever runs once every middleware has passed.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, req: Request<Body>) -> HandlerResult;
}

// ---------------------- Next ----------------------

enum Continuation<'a> {
    Endpoint(&'a dyn Endpoint),
    Outer(Box<Next<'a>>),
}

/// The rest of the chain, as seen from one middleware.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Middleware>],
    then: Continuation<'a>,
}

impl<'a> Next<'a> {
    pub fn new(middleware: &'a [Arc<dyn Middleware>], endpoint: &'a dyn Endpoint) -> Self {
        Self {
            remaining: middleware,
            then: Continuation::Endpoint(endpoint),
        }
    }

    /// Runs `middleware` first, then whatever `self` would have run.
    pub fn prepend(self, middleware: &'a [Arc<dyn Middleware>]) -> Next<'a> {
        Next {
            remaining: middleware,
            then: Continuation::Outer(Box::new(self)),
        }
    }

    pub fn run(self, req: Request<Body>) -> BoxFuture<'a> {
        Box::pin(async move {
            let remaining = self.remaining;
            match remaining.split_first() {
                Some((current, rest)) => {
                    let next = Next {
                        remaining: rest,
                        then: self.then,
                    };
                    current.handle(req, next).await
                }
                None => match self.then {
                    Continuation::Endpoint(endpoint) => endpoint.call(req).await,
                    Continuation::Outer(outer) => outer.run(req).await,
                },
            }
        })
    }
}

// ---------------------- Building blocks ----------------------

/// Middleware that never looks at the request.
pub struct PassThrough;

#[async_trait]
impl Middleware for PassThrough {
    fn middleware_name(&self) -> &str {
        "PassThrough"
    }

    async fn handle(&self, req: Request<Body>, next: Next<'_>) -> HandlerResult {
        next.run(req).await
    }
}

/// Runs its members in order as one middleware.
pub struct Chain {
    name: String,
    members: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    pub fn new(name: impl Into<String>, members: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }
}

#[async_trait]
impl Middleware for Chain {
    fn middleware_name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, req: Request<Body>, next: Next<'_>) -> HandlerResult {
        next.prepend(&self.members).run(req).await
    }
}

/// Plain 404.
pub struct NotFound;

#[async_trait]
impl Endpoint for NotFound {
    async fn call(&self, _req: Request<Body>) -> HandlerResult {
        let mut r = Response::new(Body::from("404 Not Found"));
        *r.status_mut() = StatusCode::NOT_FOUND;
        Ok(r)
    }
}

/// Ordered middleware in front of one endpoint.
pub struct Pipeline {
    middleware: Vec<Arc<dyn Middleware>>,
    endpoint: Arc<dyn Endpoint>,
}

impl Pipeline {
    pub fn new<E: Endpoint + 'static>(endpoint: E) -> Self {
        Self {
            middleware: Vec::new(),
            endpoint: Arc::new(endpoint),
        }
    }

    pub fn with(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub async fn dispatch(&self, req: Request<Body>) -> HandlerResult {
        Next::new(&self.middleware, self.endpoint.as_ref())
            .run(req)
            .await
    }
}
