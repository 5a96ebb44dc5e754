//! Local targets for integration tests.
//!
//! `http_target` speaks HTTP/1.1 with a `/health` readiness route and a
//! slow `/delay` route. `grpc_target` speaks h2c and answers just enough
//! gRPC: the health service reports SERVING, every
//! `grpc.testing.TestService` method returns an empty OK, and anything
//! else is UNIMPLEMENTED.

#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderMap, HeaderValue};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tokio::sync::watch;

/// A running fixture. Stops accepting connections when dropped.
pub struct Fixture {
    pub addr: SocketAddr,
    hits: Arc<AtomicU64>,
    shutdown: watch::Sender<bool>,
}

impl Fixture {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Warmup requests served so far (readiness calls excluded).
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// A port nothing is listening on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub async fn http_target() -> Fixture {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicU64::new(0));
    let (shutdown, mut rx) = watch::channel(false);

    let counter = hits.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let Ok((stream, _)) = accepted else { break };
                    let counter = counter.clone();
                    tokio::spawn(async move {
                        let svc = service_fn(move |req| http_route(req, counter.clone()));
                        let _ = hyper::server::conn::http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), svc)
                            .await;
                    });
                }
                _ = rx.changed() => break,
            }
        }
    });

    Fixture { addr, hits, shutdown }
}

async fn http_route(
    req: Request<Incoming>,
    hits: Arc<AtomicU64>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (status, body) = match req.uri().path() {
        "/health" => (200, "ok"),
        "/delay" => {
            hits.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            (200, "warm")
        }
        _ => {
            hits.fetch_add(1, Ordering::SeqCst);
            (404, "not found")
        }
    };
    Ok(Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap())
}

pub async fn grpc_target() -> Fixture {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicU64::new(0));
    let (shutdown, mut rx) = watch::channel(false);

    let counter = hits.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let Ok((stream, _)) = accepted else { break };
                    let counter = counter.clone();
                    tokio::spawn(async move {
                        let svc = service_fn(move |req| grpc_route(req, counter.clone()));
                        let _ = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                            .serve_connection(TokioIo::new(stream), svc)
                            .await;
                    });
                }
                _ = rx.changed() => break,
            }
        }
    });

    Fixture { addr, hits, shutdown }
}

type GrpcBody = BoxBody<Bytes, Infallible>;

async fn grpc_route(
    req: Request<Incoming>,
    hits: Arc<AtomicU64>,
) -> Result<Response<GrpcBody>, Infallible> {
    let path = req.uri().path().to_string();
    let _ = req.into_body().collect().await;

    let response = if path == "/grpc.health.v1.Health/Check" {
        // HealthCheckResponse { status: SERVING }
        unary_ok(Bytes::from_static(&[0x08, 0x01]))
    } else if path.starts_with("/grpc.testing.TestService/") {
        hits.fetch_add(1, Ordering::SeqCst);
        unary_ok(Bytes::new())
    } else {
        trailers_only(12, "unknown service")
    };
    Ok(response)
}

fn unary_ok(message: Bytes) -> Response<GrpcBody> {
    let mut frame = BytesMut::with_capacity(5 + message.len());
    frame.put_u8(0);
    frame.put_u32(message.len() as u32);
    frame.put_slice(&message);

    let mut trailers = HeaderMap::new();
    trailers.insert("grpc-status", HeaderValue::from_static("0"));

    let frames = vec![
        Ok::<_, Infallible>(Frame::data(frame.freeze())),
        Ok(Frame::trailers(trailers)),
    ];
    Response::builder()
        .status(200)
        .header("content-type", "application/grpc")
        .body(StreamBody::new(futures_util::stream::iter(frames)).boxed())
        .unwrap()
}

fn trailers_only(code: u8, message: &'static str) -> Response<GrpcBody> {
    Response::builder()
        .status(200)
        .header("content-type", "application/grpc")
        .header("grpc-status", code.to_string())
        .header("grpc-message", message)
        .body(Empty::<Bytes>::new().boxed())
        .unwrap()
}
