use std::{convert::Infallible, net::SocketAddr, process::ExitCode, sync::Arc};

use hyper::{
    Server,
    service::{make_service_fn, service_fn},
};
use smn_static_multi::{NotFound, Pipeline, ResolverConfig, RuntimeMode, StaticResolver, load_config};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Optional JSON config as the first argument; otherwise serve ./static.
    let config = match std::env::args().nth(1) {
        Some(path) => match load_config(&path) {
            Ok(config) => config,
            Err(e) => {
                error!("failed to load {path}: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => ResolverConfig::new(["static"]),
    };
    let resolver = StaticResolver::new(config.with_runtime_mode(RuntimeMode::from_env()));

    let pipeline = Arc::new(Pipeline::new(NotFound).with(resolver.handler()));

    // Run the server on port 8000.
    match run_server(8000, pipeline).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(port: u16, pipeline: Arc<Pipeline>) -> hyper::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let make_svc = make_service_fn(move |_conn| {
        let pipeline = pipeline.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let pipeline = pipeline.clone();
                async move { pipeline.dispatch(req).await }
            }))
        }
    });

    info!("listening on http://{addr}");
    Server::bind(&addr).serve(make_svc).await
}
