use crate::allow_list::AllowList;
use crate::api::receive::ReceiveHandler;
use crate::api::utils::HandlerBody;
use crate::config::{Config, ValidationError};
use crate::errors::DataReceiverError;
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use crate::upsert::UpsertEngine;
use hyper::body::{Body, Incoming};
use hyper::header::{ALLOW, HeaderValue};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use shared::http::make_error_response;
use shared::{gauge, histogram};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// Routes requests on the main listener.
///
/// Only `POST` on the receive path is served; everything else is answered
/// without touching the engine.
#[derive(Clone)]
pub struct DataReceiverService {
    inner: Arc<Inner>,
}

struct Inner {
    receive_path: String,
    handler: ReceiveHandler,
}

impl DataReceiverService {
    pub fn new(config: &Config, engine: UpsertEngine) -> Result<Self, ValidationError> {
        let allow_list = AllowList::from_config(&config.allow_list)?;
        let handler = ReceiveHandler::new(
            engine,
            allow_list,
            config.response_mode,
            config.max_body_bytes,
        );

        Ok(DataReceiverService {
            inner: Arc::new(Inner {
                receive_path: config.receive_path.clone(),
                handler,
            }),
        })
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Result<Response<HandlerBody>, DataReceiverError>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let started = Instant::now();
        let inflight = InflightGuard::new();

        let method = req.method().clone();
        let path = req.uri().path().to_owned();

        let result = if path != self.inner.receive_path {
            Ok(make_error_response(StatusCode::NOT_FOUND))
        } else if method != Method::POST {
            let mut response = make_error_response(StatusCode::METHOD_NOT_ALLOWED);
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("POST"));
            Ok(response)
        } else {
            self.inner.handler.handle(req).await
        };

        drop(inflight);
        let status = match &result {
            Ok(response) => response.status().as_str().to_string(),
            Err(_) => "error".to_string(),
        };
        tracing::debug!(%method, path = %path, status = %status, "Handled request");
        histogram!(REQUEST_DURATION, "status" => status).record(started.elapsed().as_secs_f64());

        result
    }
}

/// Counts a request as in flight until dropped, including when the request
/// future is abandoned before it completes.
struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        gauge!(REQUESTS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}

impl Service<Request<Incoming>> for DataReceiverService {
    type Response = Response<HandlerBody>;
    type Error = DataReceiverError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { service.handle(req).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::receive::ReceiveResponse;
    use crate::config::ResponseMode;
    use crate::testutils::{test_config, test_engine};
    use http_body_util::{BodyExt, Full};
    use hyper::body::{Bytes, Frame};
    use metrics::{Key, KeyName, Metadata, SharedString, Unit};
    use row_store::RowStore;
    use serde_json::json;
    use shared::http::ClientAddr;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::task::{Context, Poll};
    use std::time::Duration;

    fn post(path: &str, body: impl Into<Bytes>) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .body(Full::new(body.into()))
            .unwrap()
    }

    fn batch(table_name: &str, data: serde_json::Value) -> Bytes {
        Bytes::from(
            serde_json::to_vec(&json!({"table_name": table_name, "data": data})).unwrap(),
        )
    }

    async fn message(response: Response<HandlerBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice::<ReceiveResponse>(&bytes)
            .unwrap()
            .message
    }

    /// A request body that never produces a frame.
    struct StalledBody;

    impl Body for StalledBody {
        type Data = Bytes;
        type Error = Infallible;

        fn poll_frame(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
            Poll::Pending
        }
    }

    /// Records the in-flight gauge and ignores everything else.
    #[derive(Default)]
    struct InflightRecorder {
        inflight: Arc<AtomicU64>,
    }

    impl InflightRecorder {
        fn inflight(&self) -> f64 {
            f64::from_bits(self.inflight.load(Ordering::Acquire))
        }
    }

    impl metrics::Recorder for InflightRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, _: &Key, _: &Metadata<'_>) -> metrics::Counter {
            metrics::Counter::noop()
        }

        fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> metrics::Gauge {
            if key.name() == REQUESTS_INFLIGHT.name {
                metrics::Gauge::from_arc(self.inflight.clone())
            } else {
                metrics::Gauge::noop()
            }
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> metrics::Histogram {
            metrics::Histogram::noop()
        }
    }

    fn service(config: &Config) -> (DataReceiverService, Arc<row_store::MemoryStore>) {
        let (engine, store) = test_engine();
        (DataReceiverService::new(config, engine).unwrap(), store)
    }

    #[tokio::test]
    async fn test_receive_inserts_then_updates() {
        let (service, store) = service(&test_config());
        let data = json!([
            {"hcode": "001", "cid": "1234567890123", "datesev": "2024-01-01", "vn": "A1"}
        ]);

        let response = service
            .handle(post("/receive", batch("service", data.clone())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(message(response).await, "Success: 1 added, 0 updated");

        let response = service
            .handle(post("/receive", batch("service", data)))
            .await
            .unwrap();
        assert_eq!(message(response).await, "Success: 0 added, 1 updated");
        assert_eq!(store.count("service").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_status_codes() {
        let (service, _) = service(&test_config());

        let cases = [
            (
                batch("patients", json!([])),
                StatusCode::BAD_REQUEST,
                "Error: Unknown table name",
            ),
            (
                batch("person", json!([{"hcode": "001", "cid": "1", "birth": "soon"}])),
                StatusCode::UNPROCESSABLE_ENTITY,
                "Error: Invalid value in record 0: field birth expects date, got \"soon\"",
            ),
            (
                batch("person", json!([{"hcode": "0123456789", "cid": "1"}])),
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error: Something went wrong",
            ),
        ];

        for (body, status, expected) in cases {
            let response = service.handle(post("/receive", body)).await.unwrap();
            assert_eq!(response.status(), status);
            assert_eq!(message(response).await, expected);
        }

        let response = service.handle(post("/receive", "{")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(
            message(response)
                .await
                .starts_with("Error: Invalid request body: ")
        );

        // data must be a list of objects
        let response = service
            .handle(post("/receive", batch("person", json!([1, 2]))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_legacy_mode_always_ok() {
        let mut config = test_config();
        config.response_mode = ResponseMode::Legacy;
        let (service, _) = service(&config);

        let response = service
            .handle(post("/receive", batch("patients", json!([]))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(message(response).await, "Error: Unknown table name");
    }

    #[tokio::test]
    async fn test_body_too_large() {
        let mut config = test_config();
        config.max_body_bytes = 16;
        let (service, _) = service(&config);

        let response = service
            .handle(post("/receive", batch("person", json!([]))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(message(response).await, "Error: Request body too large");
    }

    #[tokio::test]
    async fn test_routing() {
        let mut config = test_config();
        config.receive_path = "/api/receive".into();
        let (service, _) = service(&config);

        let response = service
            .handle(post("/receive", batch("person", json!([]))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = service
            .handle(
                Request::builder()
                    .method(Method::GET)
                    .uri("/")
                    .body(Full::new(Bytes::new()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = service
            .handle(
                Request::builder()
                    .method(Method::GET)
                    .uri("/api/receive")
                    .body(Full::new(Bytes::new()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], "POST");

        let response = service
            .handle(post("/api/receive", batch("person", json!([]))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_allow_list_enforced() {
        let mut config = test_config();
        config.allow_list.ips = vec!["10.0.0.1".into()];
        config.allow_list.enforce = true;
        let (service, store) = service(&config);
        let data = json!([{"hcode": "001", "cid": "1"}]);

        let mut request = post("/receive", batch("person", data.clone()));
        request
            .extensions_mut()
            .insert(ClientAddr("10.0.0.2:4000".parse().unwrap()));
        let response = service.handle(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(message(response).await, "Error: Forbidden");
        assert_eq!(store.count("person").await.unwrap(), 0);

        let mut request = post("/receive", batch("person", data));
        request
            .extensions_mut()
            .insert(ClientAddr("10.0.0.1:4000".parse().unwrap()));
        let response = service.handle(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.count("person").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_request_releases_inflight() {
        let recorder = InflightRecorder::default();
        let _local = metrics::set_default_local_recorder(&recorder);
        let (service, _) = service(&test_config());

        let req = Request::builder()
            .method(Method::POST)
            .uri("/receive")
            .body(StalledBody)
            .unwrap();
        let mut pending = Box::pin(service.handle(req));
        assert!(
            tokio::time::timeout(Duration::from_millis(20), pending.as_mut())
                .await
                .is_err()
        );
        assert_eq!(recorder.inflight(), 1.0);

        drop(pending);
        assert_eq!(recorder.inflight(), 0.0);

        let response = service.handle(post("/receive", batch("person", json!([])))).await;
        assert_eq!(response.unwrap().status(), StatusCode::OK);
        assert_eq!(recorder.inflight(), 0.0);
    }
}
