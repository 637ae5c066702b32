//! Request handlers.

use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use tracing::{error, warn};

use crate::connection::ServerRequest;
use crate::protocol::{BoxError, Response};

/// Turns a request into a response.
///
/// The handler may read the request body through
/// [`ServerRequest::body`]; the response is written by the caller.
#[async_trait]
pub trait Handler: Send + Sync {
    type Error: Into<BoxError>;

    async fn call(&self, req: &mut ServerRequest) -> Result<Response, Self::Error>;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    type Error = H::Error;

    async fn call(&self, req: &mut ServerRequest) -> Result<Response, Self::Error> {
        (**self).call(req).await
    }
}

/// Runs `handler` for `request` and writes its response. A failing
/// handler is answered with `500 Internal Server Error`.
pub(crate) async fn dispatch<H: Handler + ?Sized>(handler: &H, mut request: ServerRequest) {
    let response = match handler.call(&mut request).await {
        Ok(response) => response,
        Err(e) => {
            let e: BoxError = e.into();
            error!(conn_id = request.conn_id(), uri = %request.uri(), cause = %e, "handler failed");
            Response::new(StatusCode::INTERNAL_SERVER_ERROR)
        }
    };

    if let Err(e) = request.respond(response).await {
        warn!(cause = %e, "failed to send response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::ServerConfig;
    use crate::connection::HttpConnection;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        type Error = BoxError;

        async fn call(&self, req: &mut ServerRequest) -> Result<Response, Self::Error> {
            if req.uri().path() == "/fail" {
                return Err("no such thing".into());
            }
            let body = req.body().bytes().await?;
            Ok(Response::ok().body(body))
        }
    }

    #[tokio::test]
    async fn errors_become_500() {
        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(b"POST /echo HTTP/1.1\r\nContent-Length: 2\r\n\r\nhiGET /fail HTTP/1.1\r\n\r\n").await.unwrap();
        client.shutdown().await.unwrap();

        let connection = HttpConnection::new(server, &ServerConfig::default());
        let handler = Arc::new(Echo);
        connection.process(&handler).await;

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        assert_eq!(
            out,
            "HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nhiHTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn requests_in_order() {
        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(b"GET /1 HTTP/1.1\r\n\r\nGET /2 HTTP/1.1\r\n\r\n").await.unwrap();
        client.shutdown().await.unwrap();

        let mut requests = std::pin::pin!(HttpConnection::new(server, &ServerConfig::default()).requests());
        let mut paths = Vec::new();
        while let Some(request) = requests.next().await {
            paths.push(request.uri().path().to_owned());
            dispatch(&Echo, request).await;
        }
        assert_eq!(paths, ["/1", "/2"]);
    }
}
