use async_trait::async_trait;
use bytes::Bytes;
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use http::{HeaderMap, StatusCode};
use micro_httpd::codec::{HeaderDecoder, ResponseEncoder};
use micro_httpd::handler::Handler;
use micro_httpd::protocol::{BoxError, Message, PayloadSize, Response};
use micro_httpd::{HttpConnection, ServerConfig, ServerRequest};
use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::codec::Encoder;

// Replays a fixed input and swallows the output
struct MockIO {
    read_data: Vec<u8>,
    read_pos: usize,
}

impl MockIO {
    fn new(read_data: Vec<u8>) -> Self {
        Self { read_data, read_pos: 0 }
    }
}

impl AsyncRead for MockIO {
    fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let remaining = &self.read_data[self.read_pos..];
        let amt = std::cmp::min(remaining.len(), buf.remaining());
        buf.put_slice(&remaining[..amt]);
        self.read_pos += amt;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockIO {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize, io::Error>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }
}

struct HelloWorld;

#[async_trait]
impl Handler for HelloWorld {
    type Error = BoxError;

    async fn call(&self, _req: &mut ServerRequest) -> Result<Response, BoxError> {
        Ok(Response::ok().body("Hello World!"))
    }
}

fn bench_header_decoder(c: &mut Criterion) {
    let request = b"GET / HTTP/1.1\r\nHost: localhost\r\nAccept: */*\r\n\r\n";
    let decoder = HeaderDecoder::new(64, 8 * 1024);

    c.bench_function("decode_simple_request", |b| {
        b.iter(|| black_box(decoder.decode(black_box(&request[..])).unwrap()));
    });
}

fn bench_response_encoder(c: &mut Criterion) {
    let body = Bytes::from_static(b"Hello World!");

    c.bench_function("encode_simple_response", |b| {
        b.iter(|| {
            let mut encoder = ResponseEncoder::new();
            let mut bytes = bytes::BytesMut::new();
            let head = (StatusCode::OK, HeaderMap::new(), PayloadSize::Length(body.len() as u64));
            encoder.encode(Message::<_, Bytes>::Header(head), &mut bytes).unwrap();
            encoder.encode(Message::Payload(micro_httpd::protocol::PayloadItem::Chunk(body.clone())), &mut bytes).unwrap();
            black_box(bytes);
        });
    });
}

fn bench_http_connection(c: &mut Criterion) {
    let request = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let config = ServerConfig::default();

    c.bench_function("process_simple_request", |b| {
        b.to_async(&runtime).iter(|| async {
            let connection = HttpConnection::new(MockIO::new(request.to_vec()), &config);
            connection.process(&HelloWorld).await;
        });
    });
}

criterion_group!(benches, bench_header_decoder, bench_response_encoder, bench_http_connection);
criterion_main!(benches);
