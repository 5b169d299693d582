//! HTTP surface: health endpoint for the registry, status table and metrics

use discovery_resolver::DiscoveryClient;
use http_body_util::Full;
use hyper::{
    body::Bytes, header, server::conn::http1, service::service_fn, Method, Request, Response,
    StatusCode,
};
use hyper_util::rt::tokio::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Accept connections until `shutdown` flips
pub async fn serve(
    listener: TcpListener,
    client: Arc<DiscoveryClient>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("Health endpoint listening on {}", addr);
    }

    loop {
        let (stream, peer_addr) = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Error accepting connection: {}", e);
                    continue;
                }
            },
        };

        let io = TokioIo::new(stream);
        let client = client.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let client = client.clone();
                let method = req.method().clone();
                let path = req.uri().path().to_string();
                debug!("{} {}", method, path);
                async move { Ok::<_, Infallible>(route(&method, &path, &client).await) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving connection from {}: {}", peer_addr, e);
            }
        });
    }

    info!("Health endpoint stopped");
}

async fn route(method: &Method, path: &str, client: &DiscoveryClient) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/health") => {
            json_response(StatusCode::OK, &serde_json::json!({ "status": "healthy" }))
        }
        (&Method::GET, "/services") => {
            let results = client.all_results().await;
            json_response(StatusCode::OK, &results)
        }
        (&Method::GET, "/metrics") => match client.resolver().metrics().gather() {
            Ok(text) => text_response(StatusCode::OK, "text/plain; version=0.0.4", text),
            Err(e) => {
                warn!("Failed to gather metrics: {}", e);
                text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    "Failed to gather metrics\n".to_string(),
                )
            }
        },
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found\n".to_string()),
    }
}

fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(bytes) => with_body(status, "application/json", Bytes::from(bytes)),
        Err(e) => {
            warn!("Failed to encode response: {}", e);
            with_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                Bytes::from_static(b"Internal Server Error\n"),
            )
        }
    }
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: String,
) -> Response<Full<Bytes>> {
    with_body(status, content_type, Bytes::from(body))
}

fn with_body(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, header::HeaderValue::from_static(content_type));
    response
}
