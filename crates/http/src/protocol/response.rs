//! Responses handed to [`ServerRequest::respond`](crate::connection::ServerRequest::respond).

use std::error::Error;
use std::fmt;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{CONTENT_LENGTH, TRAILER, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body::Body;
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;

use crate::protocol::{PayloadSize, SendError};

pub type BoxError = Box<dyn Error + Send + Sync>;

/// Produces trailer fields once the body has been written.
pub type TrailerFn = Box<dyn FnOnce() -> BoxFuture<'static, HeaderMap> + Send>;

/// Body of a [`Response`].
pub enum ResponseBody {
    Empty,
    Bytes(Bytes),
    /// A streamed body. Sent with a Content-Length when its size hint is
    /// exact, chunked otherwise.
    Stream(BoxBody<Bytes, BoxError>),
}

impl ResponseBody {
    /// Wraps any `http_body::Body` producing `Bytes`.
    pub fn stream<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        Self::Stream(body.map_err(Into::into).boxed())
    }

    pub(crate) fn payload_size(&self) -> PayloadSize {
        match self {
            Self::Empty => PayloadSize::Empty,
            Self::Bytes(bytes) => PayloadSize::new_length(bytes.len() as u64),
            Self::Stream(body) => match body.size_hint().exact() {
                Some(n) => PayloadSize::new_length(n),
                None => PayloadSize::Chunked,
            },
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() { Self::Empty } else { Self::Bytes(bytes) }
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<String> for ResponseBody {
    fn from(s: String) -> Self {
        Bytes::from(s).into()
    }
}

impl From<&'static str> for ResponseBody {
    fn from(s: &'static str) -> Self {
        Bytes::from_static(s.as_bytes()).into()
    }
}

impl From<()> for ResponseBody {
    fn from((): ()) -> Self {
        Self::Empty
    }
}

/// Status, headers, body and optional trailers of one response.
///
/// ```
/// use http::StatusCode;
/// use micro_httpd::protocol::Response;
///
/// let response = Response::new(StatusCode::OK)
///     .header(http::header::CONTENT_TYPE, http::HeaderValue::from_static("text/plain"))
///     .body("hello");
/// assert_eq!(response.status(), StatusCode::OK);
/// ```
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
    trailers: Option<TrailerFn>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self { status, headers: HeaderMap::new(), body: ResponseBody::Empty, trailers: None }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    #[must_use]
    pub fn body<B: Into<ResponseBody>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    /// Sends `f()`'s fields after the body. The response then goes out
    /// chunked and must declare every field in a `Trailer` header.
    #[must_use]
    pub fn trailers<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'static, HeaderMap> + Send + 'static,
    {
        self.trailers = Some(Box::new(f));
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body_ref(&self) -> &ResponseBody {
        &self.body
    }

    pub fn has_trailers(&self) -> bool {
        self.trailers.is_some()
    }

    pub(crate) fn into_parts(self) -> (StatusCode, HeaderMap, ResponseBody, Option<TrailerFn>) {
        (self.status, self.headers, self.body, self.trailers)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("trailers", &self.trailers.is_some())
            .finish()
    }
}

impl<B: Into<ResponseBody>> From<http::Response<B>> for Response {
    fn from(response: http::Response<B>) -> Self {
        let (parts, body) = response.into_parts();
        Self { status: parts.status, headers: parts.headers, body: body.into(), trailers: None }
    }
}

/// Checks trailer fields against the response head they follow.
///
/// The head must declare every field in its `Trailer` header, and fields
/// that frame the message may not appear as trailers at all.
pub(crate) fn validate_trailers(headers: &HeaderMap, trailers: &HeaderMap) -> Result<(), SendError> {
    let declared: Vec<String> = headers
        .get_all(TRAILER)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    if declared.is_empty() {
        return Err(SendError::invalid_trailer("response has trailers but no trailer header"));
    }

    for name in trailers.keys() {
        if name == TRANSFER_ENCODING || name == CONTENT_LENGTH || name == TRAILER {
            return Err(SendError::invalid_trailer(format!("prohibited trailer field: {name}")));
        }
        // header names are stored lowercase
        if !declared.iter().any(|declared| declared == name.as_str()) {
            return Err(SendError::invalid_trailer(format!("trailer field not declared: {name}")));
        }
    }

    Ok(())
}
