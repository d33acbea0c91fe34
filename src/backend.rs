//! Demo backend servers.
//!
//! Minimal HTTP servers that identify themselves by port, for trying the
//! proxy end to end without real services behind it.

use std::convert::Infallible;
use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

/// Builds the response a demo backend on `port` gives for a request target.
///
/// `target` is the path with its query. Only an exact `/` or `/special`
/// answers 200 naming the port, so `/special?x=1` is a 404.
pub fn demo_response(port: u16, target: &str) -> Response<Full<Bytes>> {
    let (status, body) = match target {
        "/" => (
            StatusCode::OK,
            format!("Welcome to the server on port {}\n", port),
        ),
        "/special" => (
            StatusCode::OK,
            format!("Special route handled by server on port {}\n", port),
        ),
        _ => (StatusCode::NOT_FOUND, "Route not found\n".to_string()),
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static("text/plain"));
    response
}

/// Handles one request for the demo backend on `port`.
pub async fn demo_handler(
    port: u16,
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    Ok(demo_response(port, target))
}

/// Starts a demo backend on the given address.
///
/// Runs indefinitely, accepting connections and handling requests.
pub async fn start_demo_backend(addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let port = listener.local_addr()?.port();
    tracing::info!(port, "demo backend running");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(move |req| demo_handler(port, req)))
                .await
            {
                tracing::debug!(port, error = %e, "demo backend connection error");
            }
        });
    }
}

/// Runs one demo backend per port on all interfaces until one fails.
pub async fn run_demo_backends(ports: &[u16]) -> std::io::Result<()> {
    let mut servers = tokio::task::JoinSet::new();
    for &port in ports {
        servers.spawn(start_demo_backend(SocketAddr::from(([0, 0, 0, 0], port))));
    }

    while let Some(result) = servers.join_next().await {
        match result {
            Ok(Err(e)) => return Err(e),
            Ok(Ok(())) => {}
            Err(join_err) => return Err(std::io::Error::other(join_err)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::net::TcpListener as StdTcpListener;

    async fn body_text(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_root_names_port() {
        let response = demo_response(8080, "/");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(body_text(response).await, "Welcome to the server on port 8080\n");
    }

    #[tokio::test]
    async fn test_special_route() {
        let response = demo_response(5000, "/special");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_text(response).await,
            "Special route handled by server on port 5000\n"
        );
    }

    #[tokio::test]
    async fn test_query_is_part_of_the_route() {
        let response = demo_response(8080, "/special?x=1");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = demo_response(5000, "/other");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "Route not found\n");
    }

    /// Exercises a running backend over a real socket, since
    /// hyper::body::Incoming cannot be constructed directly.
    #[tokio::test]
    async fn test_running_backend_serves_requests() {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let handle = tokio::spawn(async move {
            let _ = start_demo_backend(addr).await;
        });

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        let (status, body) = raw_get(addr, "/special").await;
        assert_eq!(status, 200);
        assert_eq!(
            body,
            format!("Special route handled by server on port {}\n", addr.port())
        );

        let (status, _) = raw_get(addr, "/missing").await;
        assert_eq!(status, 404);

        let (status, _) = raw_get(addr, "/special?x=1").await;
        assert_eq!(status, 404);

        handle.abort();
    }

    /// Plain HTTP/1.1 GET over a TcpStream.
    async fn raw_get(addr: SocketAddr, path: &str) -> (u16, String) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpStream;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            path, addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        let status_code: u16 = response
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .unwrap()
            .parse()
            .unwrap();
        let body = response
            .split("\r\n\r\n")
            .nth(1)
            .unwrap_or("")
            .to_string();

        (status_code, body)
    }
}
