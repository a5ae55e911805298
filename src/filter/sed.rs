//! Regex substitution over response bodies, in the spirit of `s/regexp/replacement/g`.

use super::{Filter, FilterAction, FilterError, Spec};
use crate::config::{ReadErrorPolicy, SedConfig};
use crate::context::{FilterContext, Message};
use crate::diagnostics::{Diagnostics, TracingDiagnostics};
use async_trait::async_trait;
use regex::bytes::Regex;
use serde_json::Value as JsonValue;
use std::io;
use std::sync::Arc;
use tracing::debug;

/// Name under which the filter is selected in route configuration.
pub const SED_NAME: &str = "sed";

/// Factory for [`Sed`] instances.
#[derive(Clone)]
pub struct SedSpec {
    policy: ReadErrorPolicy,
    reject_status: u16,
    diagnostics: Arc<dyn Diagnostics>,
}

impl SedSpec {
    pub fn new() -> Self {
        Self {
            policy: ReadErrorPolicy::Forward,
            reject_status: 502,
            diagnostics: Arc::new(TracingDiagnostics),
        }
    }

    /// Read-failure policy handed to every instance this spec creates.
    pub fn with_read_error_policy(mut self, policy: ReadErrorPolicy, reject_status: u16) -> Self {
        self.policy = policy;
        self.reject_status = reject_status;
        self
    }

    /// Diagnostics sink handed to every instance this spec creates.
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Build a typed instance from untyped route arguments.
    pub fn create(&self, args: &[JsonValue]) -> Result<Sed, FilterError> {
        let config = SedConfig::try_from(args)?;
        Ok(Sed::new(&config)?
            .with_read_error_policy(self.policy, self.reject_status)
            .with_diagnostics(self.diagnostics.clone()))
    }
}

impl Default for SedSpec {
    fn default() -> Self {
        Self::new()
    }
}

impl Spec for SedSpec {
    fn name(&self) -> &'static str {
        SED_NAME
    }

    fn create_filter(&self, args: &[JsonValue]) -> Result<Arc<dyn Filter>, FilterError> {
        Ok(Arc::new(self.create(args)?))
    }
}

/// Compiled substitution, immutable once built.
///
/// `regex::bytes::Regex` is `Send + Sync` and keeps its match caches in an
/// internal pool, so one instance serves concurrent responses without locking.
pub struct Sed {
    /// Compiled pattern
    regex: Regex,
    /// Replacement template
    replacement: String,
    /// Behavior after a failed body read
    policy: ReadErrorPolicy,
    /// Status used when rejecting
    reject_status: u16,
    diagnostics: Arc<dyn Diagnostics>,
}

impl Sed {
    /// Compile a sed filter. Regex syntax errors are returned as-is.
    pub fn new(config: &SedConfig) -> Result<Self, FilterError> {
        let regex = Regex::new(&config.pattern)?;

        Ok(Self {
            regex,
            replacement: config.replacement.clone(),
            policy: ReadErrorPolicy::Forward,
            reject_status: 502,
            diagnostics: Arc::new(TracingDiagnostics),
        })
    }

    pub fn with_read_error_policy(mut self, policy: ReadErrorPolicy, reject_status: u16) -> Self {
        self.policy = policy;
        self.reject_status = reject_status;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// The source pattern.
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// The replacement template.
    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    /// Replace every non-overlapping leftmost match, expanding `$1` / `${name}`.
    ///
    /// Works on raw bytes: input without a match comes back unchanged even when
    /// it is not valid UTF-8.
    pub fn substitute(&self, body: &[u8]) -> Vec<u8> {
        self.regex
            .replace_all(body, self.replacement.as_bytes())
            .into_owned()
    }

    fn on_read_error(&self, response: &mut Message, error: &io::Error) -> FilterAction {
        self.diagnostics.body_read_failed(SED_NAME, error);

        match self.policy {
            // The original stream is gone; the declared length is left as it was.
            ReadErrorPolicy::Forward => FilterAction::Continue,
            ReadErrorPolicy::Reject => {
                response.replace_body(Vec::new());
                FilterAction::Reject {
                    status: self.reject_status,
                    reason: format!("failed to read response body: {}", error),
                }
            }
        }
    }
}

#[async_trait]
impl Filter for Sed {
    // Response-only filter.
    async fn request(&self, _ctx: &mut dyn FilterContext) -> FilterAction {
        FilterAction::Continue
    }

    async fn response(&self, ctx: &mut dyn FilterContext) -> FilterAction {
        let response = ctx.response_mut();

        let body = match response.take_body().read_to_end().await {
            Ok(b) => b,
            Err(e) => return self.on_read_error(response, &e),
        };

        let transformed = self.substitute(&body);

        debug!(
            filter = SED_NAME,
            pattern = %self.regex,
            original_size = body.len(),
            transformed_size = transformed.len(),
            "Applied body substitution"
        );

        response.replace_body(transformed);
        FilterAction::Continue
    }

    fn name(&self) -> &'static str {
        SED_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Body, MessageContext};
    use serde_json::json;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context as TaskContext, Poll};
    use tokio::io::{AsyncRead, ReadBuf};

    /// Yields `prefix` once, then fails.
    struct FailingReader {
        prefix: Option<Vec<u8>>,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut TaskContext<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if let Some(prefix) = self.prefix.take() {
                buf.put_slice(&prefix);
                return Poll::Ready(Ok(()));
            }
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "upstream reset",
            )))
        }
    }

    #[derive(Default)]
    struct RecordingDiagnostics {
        errors: Mutex<Vec<String>>,
    }

    impl Diagnostics for RecordingDiagnostics {
        fn body_read_failed(&self, filter: &str, error: &io::Error) {
            self.errors
                .lock()
                .unwrap()
                .push(format!("{}: {}", filter, error));
        }
    }

    fn sed(pattern: &str, replacement: &str) -> Sed {
        Sed::new(&SedConfig::new(pattern, replacement)).unwrap()
    }

    async fn run_response(filter: &Sed, body: &str) -> (Vec<u8>, Option<u64>) {
        let mut ctx = MessageContext::for_response(Message::with_body(body));
        assert_eq!(filter.response(&mut ctx).await, FilterAction::Continue);
        let len = ctx.response.content_length;
        (ctx.response.take_body().read_to_end().await.unwrap(), len)
    }

    fn failing_context(prefix: &str, declared: u64) -> MessageContext {
        let mut response = Message::default();
        response.body = Body::from_reader(FailingReader {
            prefix: Some(prefix.as_bytes().to_vec()),
        });
        response.content_length = Some(declared);
        MessageContext::for_response(response)
    }

    #[tokio::test]
    async fn test_literal_replacement() {
        let filter = sed("foo", "bar");
        let (body, len) = run_response(&filter, "foo foo baz").await;
        assert_eq!(body, b"bar bar baz");
        assert_eq!(len, Some(11));
    }

    #[tokio::test]
    async fn test_numbered_backreference() {
        let filter = sed(r"(\d+)", "[$1]");
        let (body, len) = run_response(&filter, "id 42 and 7").await;
        assert_eq!(body, b"id [42] and [7]");
        assert_eq!(len, Some(15));
    }

    #[tokio::test]
    async fn test_named_backreference() {
        let filter = sed(r"(?P<user>\w+)@(?P<host>\w+)", "${host}:${user}");
        let (body, _) = run_response(&filter, "mail alice@corp now").await;
        assert_eq!(body, b"mail corp:alice now");
    }

    #[tokio::test]
    async fn test_matches_do_not_overlap() {
        let filter = sed("aa", "b");
        let (body, len) = run_response(&filter, "aaaaa").await;
        assert_eq!(body, b"bba");
        assert_eq!(len, Some(3));
    }

    #[tokio::test]
    async fn test_length_counts_bytes_not_chars() {
        let filter = sed("e", "é");
        let (body, len) = run_response(&filter, "hello").await;
        assert_eq!(body, "héllo".as_bytes());
        assert_eq!(len, Some(6));
    }

    #[tokio::test]
    async fn test_no_match_is_bit_for_bit() {
        let filter = sed("absent", "x");
        let raw = vec![0xff, b'a', 0xfe, b'b', 0x00];

        let mut ctx = MessageContext::for_response(Message::with_body(raw.clone()));
        filter.response(&mut ctx).await;

        assert_eq!(ctx.response.content_length, Some(5));
        assert_eq!(ctx.response.take_body().read_to_end().await.unwrap(), raw);
    }

    #[tokio::test]
    async fn test_empty_body() {
        let filter = sed("foo", "bar");
        let (body, len) = run_response(&filter, "").await;
        assert!(body.is_empty());
        assert_eq!(len, Some(0));
    }

    #[tokio::test]
    async fn test_same_input_same_output() {
        let filter = sed(r"(\w+)=(\w+)", "$2=$1");
        let first = run_response(&filter, "a=1 b=2").await;
        let second = run_response(&filter, "a=1 b=2").await;
        assert_eq!(first, second);
        assert_eq!(first.0, b"1=a 2=b");
    }

    #[tokio::test]
    async fn test_request_hook_leaves_request_alone() {
        let filter = sed("foo", "bar");
        let request = Message::with_body("foo").add_header("X-Foo", "foo");
        let mut ctx = MessageContext::new(request, Message::with_body("foo"));

        assert_eq!(filter.request(&mut ctx).await, FilterAction::Continue);

        assert_eq!(ctx.request.header("x-foo"), Some("foo"));
        assert_eq!(ctx.request.headers.len(), 1);
        assert_eq!(ctx.request.content_length, Some(3));
        assert_eq!(ctx.request.take_body().read_to_end().await.unwrap(), b"foo");
        // The response is not touched by the request hook either
        assert_eq!(ctx.response.take_body().read_to_end().await.unwrap(), b"foo");
    }

    #[tokio::test]
    async fn test_read_failure_forwards_by_default() {
        let diagnostics = Arc::new(RecordingDiagnostics::default());
        let filter = sed("foo", "bar").with_diagnostics(diagnostics.clone());
        let mut ctx = failing_context("foo", 42);

        assert_eq!(filter.response(&mut ctx).await, FilterAction::Continue);

        let errors = diagnostics.errors.lock().unwrap().clone();
        assert_eq!(errors, vec!["sed: upstream reset".to_string()]);
        assert_eq!(ctx.response.content_length, Some(42));
        assert!(ctx.response.take_body().read_to_end().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_failure_rejects_when_configured() {
        let diagnostics = Arc::new(RecordingDiagnostics::default());
        let filter = sed("foo", "bar")
            .with_read_error_policy(ReadErrorPolicy::Reject, 503)
            .with_diagnostics(diagnostics.clone());
        let mut ctx = failing_context("partial", 42);

        let action = filter.response(&mut ctx).await;

        match action {
            FilterAction::Reject { status, reason } => {
                assert_eq!(status, 503);
                assert!(reason.contains("upstream reset"));
            }
            other => panic!("expected reject, got {:?}", other),
        }
        assert_eq!(diagnostics.errors.lock().unwrap().len(), 1);
        assert_eq!(ctx.response.content_length, Some(0));
        assert!(ctx.response.take_body().read_to_end().await.unwrap().is_empty());
    }

    #[test]
    fn test_spec_rejects_bad_arity() {
        let spec = SedSpec::new();
        assert!(matches!(
            spec.create(&[json!("abc")]),
            Err(FilterError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_spec_rejects_non_string() {
        let spec = SedSpec::new();
        assert!(matches!(
            spec.create(&[json!("abc"), json!(5)]),
            Err(FilterError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_spec_surfaces_regex_error_verbatim() {
        let spec = SedSpec::new();
        let err = spec.create(&[json!("("), json!("x")]).err().unwrap();
        let expected = Regex::new("(").unwrap_err().to_string();

        assert!(matches!(err, FilterError::Regex(_)));
        assert_eq!(err.to_string(), expected);
    }

    #[test]
    fn test_spec_builds_instance() {
        let filter = SedSpec::new().create(&[json!(r"\s+"), json!(" ")]).unwrap();
        assert_eq!(filter.pattern(), r"\s+");
        assert_eq!(filter.replacement(), " ");
        assert_eq!(filter.substitute(b"a  \t b"), b"a b");
    }

    #[test]
    fn test_sed_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Sed>();
        assert_send_sync::<SedSpec>();
    }

    #[tokio::test]
    async fn test_concurrent_responses_share_one_instance() {
        let filter = Arc::new(sed(r"(\d+)", "<$1>"));

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let filter = filter.clone();
                tokio::spawn(async move {
                    let body = format!("req {} of {}", i, 32);
                    let mut ctx = MessageContext::for_response(Message::with_body(body));
                    filter.response(&mut ctx).await;
                    let out = ctx.response.take_body().read_to_end().await.unwrap();
                    (i, String::from_utf8(out).unwrap())
                })
            })
            .collect();

        for handle in handles {
            let (i, out) = handle.await.unwrap();
            assert_eq!(out, format!("req <{}> of <32>", i));
        }
    }
}
