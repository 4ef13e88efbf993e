use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hyper::body::to_bytes;
use hyper::{Body, Method, Request, Response, StatusCode};
use rstest::rstest;
use smn_static_multi::sys_chain::HandlerResult;
use smn_static_multi::{
    Endpoint, Pipeline, ResolverConfig, RuntimeMode, StaticCacheOptions, StaticResolver,
};
use tempfile::TempDir;

/// Records what reached the end of the pipeline and answers 418.
#[derive(Clone, Default)]
struct Downstream {
    hits: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<(Method, String, Vec<u8>)>>>,
}

#[async_trait]
impl Endpoint for Downstream {
    async fn call(&self, req: Request<Body>) -> HandlerResult {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let method = req.method().clone();
        let uri = req.uri().to_string();
        let body = to_bytes(req.into_body()).await.unwrap_or_default().to_vec();
        self.seen.lock().unwrap().push((method, uri, body));

        let mut resp = Response::new(Body::from("downstream"));
        *resp.status_mut() = StatusCode::IM_A_TEAPOT;
        Ok(resp)
    }
}

fn write(dir: &Path, name: &str, contents: &[u8]) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

async fn text(resp: Response<Body>) -> String {
    String::from_utf8(to_bytes(resp.into_body()).await.unwrap().to_vec()).unwrap()
}

fn serve(dirs: &[&TempDir], mode: RuntimeMode) -> (StaticResolver, Pipeline, Downstream) {
    let config =
        ResolverConfig::new(dirs.iter().map(|d| d.path())).with_runtime_mode(mode);
    let resolver = StaticResolver::new(config);
    let downstream = Downstream::default();
    let pipeline = Pipeline::new(downstream.clone()).with(resolver.handler());
    (resolver, pipeline, downstream)
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(2)]
#[tokio::test]
async fn test_unique_file_is_found_in_any_position(#[case] position: usize) {
    let dirs: Vec<TempDir> = (0..3).map(|_| TempDir::new().unwrap()).collect();
    write(dirs[position].path(), "only/here.txt", b"found me");

    for mode in [RuntimeMode::Development, RuntimeMode::Production] {
        let refs: Vec<&TempDir> = dirs.iter().collect();
        let (_resolver, pipeline, downstream) = serve(&refs, mode);

        let resp = pipeline.dispatch(get("/only/here.txt")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(text(resp).await, "found me");
        assert_eq!(downstream.hits.load(Ordering::SeqCst), 0);
    }
}

#[rstest]
#[case(RuntimeMode::Development)]
#[case(RuntimeMode::Production)]
#[tokio::test]
async fn test_last_registered_directory_wins(#[case] mode: RuntimeMode) {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    write(a.path(), "style.css", b"from a");
    write(b.path(), "style.css", b"from b");

    let (_resolver, pipeline, _) = serve(&[&a, &b], mode);
    let resp = pipeline.dispatch(get("/style.css")).await.unwrap();
    assert_eq!(text(resp).await, "from b");

    let (_resolver, pipeline, _) = serve(&[&b, &a], mode);
    let resp = pipeline.dispatch(get("/style.css")).await.unwrap();
    assert_eq!(text(resp).await, "from a");
}

#[tokio::test]
async fn test_default_mode_serves_second_directory() {
    // Mode left at its default, two directories, same file name.
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    write(a.path(), "style.css", b"a { color: red }");
    write(b.path(), "style.css", b"b { color: blue }");

    let resolver = StaticResolver::new(ResolverConfig::new([a.path(), b.path()]));
    assert!(resolver.options().revalidate_on_every_request);

    let pipeline = Pipeline::new(Downstream::default()).with(resolver.handler());
    let resp = pipeline.dispatch(get("/style.css")).await.unwrap();
    assert_eq!(text(resp).await, "b { color: blue }");
}

#[tokio::test]
async fn test_lazy_catalog_still_honours_precedence() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    write(a.path(), "app.js", b"a");

    let config = ResolverConfig::new([a.path(), b.path()])
        .with_runtime_mode(RuntimeMode::Production)
        .with_options(StaticCacheOptions {
            preload: Some(false),
            ..Default::default()
        });
    let resolver = StaticResolver::new(config);
    assert!(resolver.catalog().read().unwrap().is_empty());
    let pipeline = Pipeline::new(Downstream::default()).with(resolver.handler());

    // First request fills the catalog from the lower directory.
    let resp = pipeline.dispatch(get("/app.js")).await.unwrap();
    assert_eq!(text(resp).await, "a");
    assert_eq!(resolver.catalog().read().unwrap()["app.js"].layer, 0);

    // The higher directory still gets its turn once it has the file.
    write(b.path(), "app.js", b"b");
    let resp = pipeline.dispatch(get("/app.js")).await.unwrap();
    assert_eq!(text(resp).await, "b");
    assert_eq!(resolver.catalog().read().unwrap()["app.js"].layer, 1);
}

#[tokio::test]
async fn test_missing_everywhere_reaches_downstream() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    let (_resolver, pipeline, downstream) = serve(&[&a, &b], RuntimeMode::Development);

    let resp = pipeline.dispatch(get("/nowhere.png")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(downstream.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_directory_is_tolerated() {
    let a = TempDir::new().unwrap();
    write(a.path(), "ok.txt", b"ok");
    let missing = a.path().join("does-not-exist");

    let resolver = StaticResolver::new(ResolverConfig::new([missing.as_path(), a.path()]));
    let pipeline = Pipeline::new(Downstream::default()).with(resolver.handler());

    let resp = pipeline.dispatch(get("/ok.txt")).await.unwrap();
    assert_eq!(text(resp).await, "ok");
    assert_eq!(resolver.cache_busted_path("nope.txt"), "nope.txt");
}

#[rstest]
#[case(Method::GET, "/style.css")]
#[case(Method::GET, "/")]
#[case(Method::POST, "/api/upload?x=1")]
#[case(Method::DELETE, "/../../etc/passwd")]
#[tokio::test]
async fn test_empty_directory_list_passes_everything_on(
    #[case] method: Method,
    #[case] uri: &str,
) {
    let (resolver, pipeline, downstream) = serve(&[], RuntimeMode::Development);
    assert!(resolver.dirs().is_empty());

    let req = Request::builder()
        .method(method.clone())
        .uri(uri)
        .body(Body::from("payload"))
        .unwrap();
    let resp = pipeline.dispatch(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);

    let seen = downstream.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], (method, uri.to_string(), b"payload".to_vec()));
}

#[test]
fn test_empty_directory_list_logs_a_warning() {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    /// A tracing layer that captures log lines as "[LEVEL] message".
    struct LogCapture {
        logs: Arc<Mutex<Vec<String>>>,
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for LogCapture {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            struct MessageVisitor {
                message: String,
            }

            impl tracing::field::Visit for MessageVisitor {
                fn record_debug(
                    &mut self,
                    field: &tracing::field::Field,
                    value: &dyn std::fmt::Debug,
                ) {
                    if field.name() == "message" {
                        self.message = format!("{:?}", value);
                    }
                }
            }

            let mut visitor = MessageVisitor {
                message: String::new(),
            };
            event.record(&mut visitor);
            self.logs.lock().unwrap().push(format!(
                "[{}] {}",
                event.metadata().level(),
                visitor.message
            ));
        }
    }

    let logs = Arc::new(Mutex::new(Vec::new()));
    let _guard = tracing_subscriber::registry()
        .with(LogCapture { logs: logs.clone() })
        .set_default();

    let _resolver = StaticResolver::new(ResolverConfig::default());

    let a = TempDir::new().unwrap();
    let _resolver = StaticResolver::new(ResolverConfig::new([a.path()]));

    let captured = logs.lock().unwrap();
    let warnings: Vec<_> = captured.iter().filter(|l| l.starts_with("[WARN]")).collect();
    assert_eq!(warnings.len(), 1, "got: {:?}", *captured);
    assert!(warnings[0].contains("no directories"));
}
