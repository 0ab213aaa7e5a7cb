//! End-to-end manager integration tests.
//!
//! These tests drive a [`Manager`] the way a server would: a terminal
//! handler, units added and removed at runtime, the built-in stages built
//! from the registry, and concurrent requests racing mutations.

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use strata_core::{ContextError, Handler, Request, RequestContext, Response, ResponseExt};
use strata_middleware::{
    combinator, context_handler, BuildError, BuilderConfig, BuilderRegistry, Manager, Middleware,
};
use strata_telemetry::{init_logging, LogConfig, LogFormat};

type Trace = Arc<Mutex<Vec<String>>>;

/// Creates a test request.
fn make_request(path: &str) -> Request {
    http::Request::builder()
        .uri(path)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Creates a unit that records its pre and post steps in `trace`.
fn tracking(name: &'static str, priority: i32, trace: &Trace) -> Middleware {
    let trace = Arc::clone(trace);
    Middleware::from_fn(name, priority, move |req, next| {
        let trace = Arc::clone(&trace);
        async move {
            trace.lock().unwrap().push(format!("{name}.pre"));
            let response = next.call(req).await;
            trace.lock().unwrap().push(format!("{name}.post"));
            response
        }
    })
}

/// Creates a terminal handler that records itself in `trace`.
fn tracking_terminal(trace: &Trace) -> Handler {
    let trace = Arc::clone(trace);
    Handler::new(move |_req| {
        let trace = Arc::clone(&trace);
        async move {
            trace.lock().unwrap().push("T".to_owned());
            Response::empty(StatusCode::OK)
        }
    })
}

fn config(value: serde_json::Value) -> BuilderConfig {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

async fn body_json(response: Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_add_then_remove_changes_execution() {
    let trace = Trace::default();
    let manager = Manager::with_terminal(tracking_terminal(&trace));

    // Added out of order; priority decides.
    manager.add([tracking("B", 20, &trace), tracking("A", 10, &trace)]);

    let response = manager.serve(make_request("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        *trace.lock().unwrap(),
        ["A.pre", "B.pre", "T", "B.post", "A.post"]
    );

    trace.lock().unwrap().clear();
    manager.remove(["B"]);

    manager.serve(make_request("/")).await;
    assert_eq!(*trace.lock().unwrap(), ["A.pre", "T", "A.post"]);
}

#[tokio::test]
async fn test_equal_priorities_keep_insertion_order() {
    let trace = Trace::default();
    let manager = Manager::with_terminal(tracking_terminal(&trace));
    manager.add([tracking("first", 5, &trace)]);
    manager.add([tracking("second", 5, &trace)]);

    manager.serve(make_request("/")).await;
    assert_eq!(
        *trace.lock().unwrap(),
        ["first.pre", "second.pre", "T", "second.post", "first.post"]
    );
}

/// Per-request record of the units a request passed through.
#[derive(Clone, Default)]
struct RequestTrace(Arc<Mutex<Vec<String>>>);

/// Creates a unit that appends its name to the request's [`RequestTrace`].
fn recording(name: String, priority: i32) -> Middleware {
    Middleware::from_fn(name.clone(), priority, move |req: Request, next| {
        let name = name.clone();
        async move {
            if let Some(trace) = req.extensions().get::<RequestTrace>() {
                trace.0.lock().unwrap().push(name);
            }
            next.call(req).await
        }
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_during_mutation() {
    let manager = Arc::new(Manager::with_terminal(Handler::noop()));
    let handler = manager.handler();

    // Mutations happen only on this task, so `names()` right after each one
    // is exactly the chain it published.
    let mut published = vec![manager.names()];
    let mut tasks = Vec::new();

    for round in 0..32 {
        for i in 0..4 {
            let handler = handler.clone();
            tasks.push(tokio::spawn(async move {
                let trace = RequestTrace::default();
                let mut req = make_request(&format!("/r/{round}/{i}"));
                req.extensions_mut().insert(trace.clone());
                let status = handler.call(req).await.status();
                let names = trace.0.lock().unwrap().clone();
                (status, names)
            }));
        }

        let name = format!("unit-{}", round % 4);
        if round % 2 == 0 {
            manager.add([recording(name, round)]);
        } else {
            manager.remove([name]);
        }
        published.push(manager.names());
        tokio::task::yield_now().await;
    }

    for task in tasks {
        let (status, names) = task.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(
            published.contains(&names),
            "request ran through {names:?}, which was never published"
        );
    }

    // Every listed unit is sorted and unique.
    let listed = manager.list();
    assert!(listed.windows(2).all(|w| w[0].priority() <= w[1].priority()));
    let names: HashSet<String> = manager.names().into_iter().collect();
    assert_eq!(names.len(), listed.len());
}

#[tokio::test]
async fn test_default_stack_from_registry() {
    // Another test binary may already own the global subscriber.
    let _ = init_logging(&LogConfig::development().with_format(LogFormat::Compact));

    let registry = BuilderRegistry::with_defaults();
    let manager = Manager::new();
    manager.set_terminal_fn(|req: Request| async move {
        match req.uri().path() {
            "/panic" => panic!("handler bug"),
            _ => Response::empty(StatusCode::OK),
        }
    });

    let units = [
        ("context", "context", BuilderConfig::new()),
        ("recoverer", "recoverer", BuilderConfig::new()),
        ("request_id", "request_id", config(json!({ "trust_incoming": true }))),
        ("logger", "access-log", config(json!({ "level": "debug" }))),
        (
            "cors",
            "cors",
            config(json!({ "allowed_origins": ["https://app.example.com"] })),
        ),
    ]
    .into_iter()
    .map(|(kind, name, config)| registry.build(kind, name, &config))
    .collect::<Result<Vec<_>, _>>()
    .unwrap();
    manager.add(units);

    assert_eq!(
        manager.names(),
        ["context", "recoverer", "request_id", "access-log", "cors"]
    );

    let request = http::Request::builder()
        .uri("/orders")
        .header("origin", "https://app.example.com")
        .header("x-request-id", "upstream-7")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = manager.serve(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-request-id").unwrap(), "upstream-7");
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "https://app.example.com"
    );

    let response = manager.serve(make_request("/panic")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "INTERNAL_ERROR");
}

#[tokio::test]
async fn test_combinator_guards_terminal() {
    let registry = BuilderRegistry::with_defaults();
    let manager = Manager::with_terminal(Handler::new(|_req: Request| async {
        Response::error(StatusCode::OK, "secret")
    }));

    let has_token = context_handler(|ctx: &mut RequestContext| match ctx.header("authorization") {
        Some(_) => Ok(()),
        None => Err(ContextError::unauthorized("missing token")),
    });
    let is_public = context_handler(|ctx: &mut RequestContext| {
        if ctx.path().starts_with("/public") {
            Ok(())
        } else {
            Err(ContextError::forbidden("route is not public"))
        }
    });

    manager.add([
        registry
            .build("context", "context", &BuilderConfig::new())
            .unwrap(),
        combinator::or("auth", 50, [has_token, is_public]),
    ]);

    let response = manager.serve(make_request("/public/health")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let request = http::Request::builder()
        .uri("/admin")
        .header("authorization", "Bearer t")
        .body(Full::new(Bytes::new()))
        .unwrap();
    assert_eq!(manager.serve(request).await.status(), StatusCode::OK);

    // Both fail: the last error decides the response.
    let response = manager.serve(make_request("/admin")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "AUTHORIZATION_DENIED");
    assert_eq!(json["error"]["message"], "route is not public");

    // Without the context unit the guard refuses to run.
    manager.remove(["context"]);
    let response = manager.serve(make_request("/public/health")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, strata_middleware::MISSING_CONTEXT_BODY);
}

#[test]
fn test_registry_type_uniqueness() {
    let registry = BuilderRegistry::with_defaults();

    let err = registry
        .add_builder("cors", |name, _config| Ok(Middleware::new(name, 0, |next| next)))
        .unwrap_err();
    assert_eq!(err, BuildError::already_registered("cors"));

    let err = registry
        .build("gzip", "gzip", &BuilderConfig::new())
        .unwrap_err();
    assert_eq!(err, BuildError::unknown_type("gzip"));

    assert!(registry.remove_builder("cors").is_some());
    registry
        .add_builder("cors", |name, _config| Ok(Middleware::new(name, 1, |next| next)))
        .unwrap();
    let unit = registry
        .build("cors", "custom-cors", &BuilderConfig::new())
        .unwrap();
    assert_eq!(unit.priority(), 1);
}
