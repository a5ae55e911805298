//! Message context handed to filters by the chain executor.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Cursor};
use std::mem;
use tokio::io::{AsyncRead, AsyncReadExt};

/// An owned, one-shot body stream.
pub struct Body {
    inner: Box<dyn AsyncRead + Send + Unpin>,
}

impl Body {
    /// Wrap an arbitrary async reader.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            inner: Box::new(reader),
        }
    }

    /// Body over an in-memory buffer.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::from_reader(Cursor::new(bytes.into()))
    }

    /// A body that yields nothing.
    pub fn empty() -> Self {
        Self::from_reader(tokio::io::empty())
    }

    /// Drain the stream into memory, consuming it.
    ///
    /// On error the stream is dropped along with whatever was already read.
    pub async fn read_to_end(mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.inner.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body").finish_non_exhaustive()
    }
}

/// One direction of an HTTP exchange as seen by a filter.
#[derive(Debug, Default)]
pub struct Message {
    /// Headers (lowercase names)
    pub headers: HashMap<String, Vec<String>>,
    /// Body stream
    pub body: Body,
    /// Declared body length in bytes, `None` when unknown
    pub content_length: Option<u64>,
}

impl Message {
    /// Create a message with a known in-memory body.
    pub fn with_body(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        Self {
            headers: HashMap::new(),
            content_length: Some(bytes.len() as u64),
            body: Body::from_bytes(bytes),
        }
    }

    /// Add a header value, lowercasing the name.
    pub fn add_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.to_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    /// Get a single header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_lowercase())
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }

    /// Take ownership of the body stream, leaving an empty one in its place.
    pub fn take_body(&mut self) -> Body {
        mem::take(&mut self.body)
    }

    /// Replace the body wholesale and declare its exact byte length.
    pub fn replace_body(&mut self, bytes: Vec<u8>) {
        self.content_length = Some(bytes.len() as u64);
        self.body = Body::from_bytes(bytes);
    }
}

/// Access to the request and response of one in-flight exchange.
pub trait FilterContext: Send {
    /// The request as it will be sent upstream.
    fn request_mut(&mut self) -> &mut Message;

    /// The response as it will be returned downstream.
    fn response_mut(&mut self) -> &mut Message;
}

/// Plain owned context, used by the route table and the CLI.
#[derive(Debug, Default)]
pub struct MessageContext {
    pub request: Message,
    pub response: Message,
}

impl MessageContext {
    pub fn new(request: Message, response: Message) -> Self {
        Self { request, response }
    }

    /// Context with an empty request and the given response.
    pub fn for_response(response: Message) -> Self {
        Self {
            request: Message::default(),
            response,
        }
    }
}

impl FilterContext for MessageContext {
    fn request_mut(&mut self) -> &mut Message {
        &mut self.request
    }

    fn response_mut(&mut self) -> &mut Message {
        &mut self.response
    }
}
