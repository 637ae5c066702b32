//! Serves a greeting on GET and summarizes multipart uploads on POST.
//!
//! curl -v http://127.0.0.1:8080/
//! curl -v -F title=notes -F file=@Cargo.toml http://127.0.0.1:8080/upload

use std::fmt::Write;

use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, StatusCode};
use micro_httpd::handler::Handler;
use micro_httpd::protocol::{BoxError, Response};
use micro_httpd::{Server, ServerRequest};
use micro_multipart::{FormOptions, MultipartReader};
use tokio::net::TcpListener;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

struct DemoHandler;

#[async_trait]
impl Handler for DemoHandler {
    type Error = BoxError;

    async fn call(&self, req: &mut ServerRequest) -> Result<Response, BoxError> {
        info!(method = %req.method(), path = req.uri().path(), "receiving request");

        match (req.method(), req.uri().path()) {
            (&Method::GET, "/") => Ok(Response::ok().body("Hello World!\r\n")),
            (&Method::POST, "/upload") => upload(req).await,
            _ => Ok(Response::new(StatusCode::NOT_FOUND).body("404 not found\r\n")),
        }
    }
}

async fn upload(req: &mut ServerRequest) -> Result<Response, BoxError> {
    let Some(content_type) = req.headers().get(CONTENT_TYPE).and_then(|value| value.to_str().ok()).map(str::to_owned) else {
        return Ok(Response::new(StatusCode::BAD_REQUEST).body("missing content-type\r\n"));
    };

    let body = req.body().into_async_read();
    let mut reader = MultipartReader::from_content_type(body, &content_type)?;
    let form = reader.read_form(&FormOptions::default().max_memory(1024 * 1024)).await?;

    let mut summary = String::new();
    for (name, values) in form.values() {
        writeln!(summary, "field {name}: {values:?}")?;
    }
    for (name, files) in form.files() {
        for file in files {
            writeln!(summary, "file {name}: {} ({}, {} bytes)", file.file_name, file.content_type, file.size)?;
        }
    }
    form.remove_all().await?;

    Ok(Response::ok().header(CONTENT_TYPE, HeaderValue::from_static("text/plain")).body(summary))
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!(port = 8080, "start listening");
    let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
        Ok(tcp_listener) => tcp_listener,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return;
        }
    };

    let server = Server::new(tcp_listener);
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            shutdown.cancel();
        }
    });

    server.serve(DemoHandler).await;
    info!("server stopped");
}
