//! services/tracker/src/tracking/dispatch.rs
//!
//! Queues statements towards the record store: pre-send interception,
//! attachment resolution, sequential batches, and the best-effort
//! synchronous transport for terminal statements.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use url::Url;
use xapi_core::domain::Statement;
use xapi_core::events::TrackerEvent;
use xapi_core::ports::{RecordStore, StatementInterceptor, TrackerEventSink};

use crate::error::{TrackerError, TrackerResult};
use crate::tracking::notify::{FailureClass, FailureNotifier};

/// Compares two URLs on scheme, host and port, inferring the standard
/// default ports (80 for `http`, 443 for `https`).
pub fn same_origin(endpoint: &Url, page: &Url) -> bool {
    endpoint.scheme() == page.scheme()
        && endpoint.host_str() == page.host_str()
        && endpoint.port_or_known_default() == page.port_or_known_default()
}

struct DispatcherInner {
    store: Arc<dyn RecordStore>,
    sink: Arc<dyn TrackerEventSink>,
    failures: Arc<FailureNotifier>,
    interceptor: Option<Arc<dyn StatementInterceptor>>,
    http: reqwest::Client,
    /// The record store endpoint, when known. Terminal statements may only
    /// use the synchronous transport against a same-origin endpoint.
    endpoint: Option<Url>,
    page_url: Url,
    unload: CancellationToken,
}

/// The statement dispatch layer. Cheap to clone; all clones share one queue
/// state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn RecordStore>,
        sink: Arc<dyn TrackerEventSink>,
        failures: Arc<FailureNotifier>,
        interceptor: Option<Arc<dyn StatementInterceptor>>,
        http: reqwest::Client,
        endpoint: Option<Url>,
        page_url: Url,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                store,
                sink,
                failures,
                interceptor,
                http,
                endpoint,
                page_url,
                unload: CancellationToken::new(),
            }),
        }
    }

    /// Cancels in-flight ordinary sends. Called when the page unloads so the
    /// terminal statements are not queued behind doomed requests.
    pub fn abort_inflight(&self) {
        self.inner.unload.cancel();
    }

    /// Sends a single statement through the ordinary async transport.
    ///
    /// The outcome is also reported through the event sink; callers other
    /// than batch dispatch may ignore the returned result.
    pub async fn send(&self, mut statement: Statement) -> TrackerResult<()> {
        if let Some(interceptor) = &self.inner.interceptor {
            interceptor.before_send(&mut statement);
        }

        if !statement.is_well_formed() {
            let message = "statement rejected: actor, verb and object are required".to_string();
            warn!("{message}");
            self.inner
                .sink
                .emit(TrackerEvent::SendStatementError { message: message.clone() });
            return Err(TrackerError::Internal(message));
        }

        self.resolve_attachments(&mut statement).await;

        let post = self.inner.store.post_statement(&statement);
        let result = tokio::select! {
            _ = self.inner.unload.cancelled() => {
                return Err(TrackerError::Internal("send aborted by unload".to_string()));
            }
            result = post => result,
        };

        match result {
            Ok(()) => {
                self.inner.sink.emit(TrackerEvent::SendStatementSuccess {
                    verb: statement.verb_id().to_string(),
                });
                Ok(())
            }
            Err(error) => {
                error!("statement send failed: {error}");
                self.inner.sink.emit(TrackerEvent::SendStatementError {
                    message: error.to_string(),
                });
                self.inner.failures.failure(FailureClass::Statement);
                Err(TrackerError::Port(error))
            }
        }
    }

    /// Sends a batch sequentially, preserving statement order. A failure
    /// aborts the remaining sends in the batch.
    pub async fn send_many(&self, statements: Vec<Statement>) -> TrackerResult<()> {
        for statement in statements {
            self.send(statement).await?;
        }

        Ok(())
    }

    /// Sends terminal statements over the best-effort synchronous transport.
    ///
    /// Only a same-origin endpoint may take the synchronous path; the
    /// transport cannot reliably carry custom headers cross-origin, so
    /// cross-origin terminal sends fall back to the ordinary transport.
    pub fn send_terminal(&self, statements: Vec<Statement>) {
        if statements.is_empty() {
            return;
        }

        if !self.is_same_origin() {
            self.spawn_ordinary(statements);
            return;
        }

        // The blocking transport runs on its own thread so this stays safe
        // to call from inside the async runtime.
        let result = std::thread::scope(|scope| {
            scope
                .spawn(|| self.inner.store.post_statements_blocking(&statements))
                .join()
        });

        match result {
            Ok(Ok(())) => {
                for statement in &statements {
                    self.inner.sink.emit(TrackerEvent::SendStatementSuccess {
                        verb: statement.verb_id().to_string(),
                    });
                }
            }
            Ok(Err(error)) => {
                error!("terminal statement send failed: {error}");
                self.inner.sink.emit(TrackerEvent::SendStatementError {
                    message: error.to_string(),
                });
            }
            Err(_) => {
                error!("terminal transport panicked");
            }
        }
    }

    /// Whether the endpoint shares the page location's origin.
    pub fn is_same_origin(&self) -> bool {
        match &self.inner.endpoint {
            Some(endpoint) => same_origin(endpoint, &self.inner.page_url),
            None => false,
        }
    }

    fn spawn_ordinary(&self, statements: Vec<Statement>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let dispatcher = self.clone();
                handle.spawn(async move {
                    let _ = dispatcher.send_many(statements).await;
                });
            }
            Err(_) => {
                warn!("no async runtime available for cross-origin terminal statements");
            }
        }
    }

    /// Resolves statement attachments in place: inline values are kept,
    /// remote urls are fetched and inlined, and an attachment with neither
    /// is dropped with a warning.
    async fn resolve_attachments(&self, statement: &mut Statement) {
        if statement.attachments.is_empty() {
            return;
        }

        let mut resolved = Vec::with_capacity(statement.attachments.len());

        for mut attachment in std::mem::take(&mut statement.attachments) {
            if attachment.value.is_some() {
                resolved.push(attachment);
                continue;
            }

            let Some(url) = attachment.url.clone() else {
                warn!("Attachment object contained neither a value or url property.");
                continue;
            };

            match self.fetch_attachment(&url).await {
                Ok(bytes) => {
                    attachment.value = Some(bytes);
                    attachment.url = None;
                    resolved.push(attachment);
                }
                Err(error) => {
                    warn!("failed to resolve attachment {url}: {error}");
                }
            }
        }

        statement.attachments = resolved;
    }

    async fn fetch_attachment(&self, url: &str) -> TrackerResult<bytes::Bytes> {
        let response = self
            .inner
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin_check(endpoint: &str, page: &str) -> bool {
        same_origin(&Url::parse(endpoint).unwrap(), &Url::parse(page).unwrap())
    }

    #[test]
    fn default_ports_are_inferred() {
        assert!(origin_check("http://lms.example:80/data/xapi/", "http://lms.example/course/"));
        assert!(origin_check("https://lms.example/data/", "https://lms.example:443/course/"));
    }

    #[test]
    fn scheme_host_and_port_must_match() {
        assert!(!origin_check("https://lms.example/data/", "http://lms.example/course/"));
        assert!(!origin_check("http://lrs.example/data/", "http://lms.example/course/"));
        assert!(!origin_check("http://lms.example:8080/data/", "http://lms.example/course/"));
    }
}
