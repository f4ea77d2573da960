//! Audit records for access decisions.
//!
//! Every ALLOW and DENY produces one [`AuditRecord`]. Records carry who asked,
//! for what, which roles they resolved to, which roles the operation
//! accepts, the verdict and the reason.
//!
//! # Architecture
//!
//! The [`AuditSink`] trait enables different audit backends:
//!
//! - [`TracingAuditSink`]: emits structured `tracing` events on the `audit` target, suitable for
//!   log aggregation and SIEM forwarding.
//! - [`JsonLinesAuditSink`]: writes one JSON document per line to any writer, typically an
//!   append-only file used as a secondary sink.
//! - [`MemoryAuditSink`] and [`NoopAuditSink`] for tests and opt-out.
//!
//! [`AuditEmitter`] delivers each record to a primary sink and, if that
//! fails, to a fallback sink. Delivery never fails the request.
//!
//! # Usage
//!
//! ```no_run
//! use gatekeeper_authz::audit::{AuditEmitter, AuditRecord, TracingAuditSink};
//! use gatekeeper_authz::decision::Verdict;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let emitter = AuditEmitter::new(TracingAuditSink);
//! let record = AuditRecord::builder()
//!     .subject("alice")
//!     .operation("advanced_search")
//!     .verdict(Verdict::Allow)
//!     .reason("granted by [analyst]")
//!     .build();
//! emitter.emit(&record).await;
//! # });
//! ```

use std::{
    collections::BTreeSet,
    fmt,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    decision::{AccessDecision, Verdict},
    error::AuditError,
    role::{Role, display_roles},
};

/// Whether a decision was made with token enforcement on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementMode {
    /// Tokens are verified and roles enforced.
    #[default]
    Enforced,
    /// The explicit development state: everything registered is allowed.
    Disabled,
}

impl fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enforced => f.write_str("enforced"),
            Self::Disabled => f.write_str("disabled"),
        }
    }
}

/// One audited access decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, bon::Builder)]
pub struct AuditRecord {
    /// When the decision was made (defaults to now).
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Principal subject, or `anonymous`.
    #[builder(into)]
    pub subject: String,
    /// Requested operation.
    #[builder(into)]
    pub operation: String,
    /// The verdict.
    pub verdict: Verdict,
    /// Roles granted to the principal.
    #[builder(default)]
    pub resolved_roles: BTreeSet<Role>,
    /// Roles the operation accepts.
    #[builder(default)]
    pub required_roles: BTreeSet<Role>,
    /// Operator-facing explanation.
    #[builder(into)]
    pub reason: String,
    /// Enforcement state at decision time.
    #[builder(default)]
    pub enforcement: EnforcementMode,
}

impl AuditRecord {
    /// Builds the record for a decision.
    #[must_use]
    pub fn from_decision(decision: &AccessDecision, enforcement: EnforcementMode) -> Self {
        Self {
            timestamp: Utc::now(),
            subject: decision.subject().to_owned(),
            operation: decision.operation().to_owned(),
            verdict: decision.verdict(),
            resolved_roles: decision.resolved_roles().clone(),
            required_roles: decision.required_roles().clone(),
            reason: decision.reason().to_owned(),
            enforcement,
        }
    }
}

/// Trait for audit backends.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Records one audit record.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] if the record could not be persisted.
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError>;

    /// Short name for diagnostics.
    fn name(&self) -> &'static str;
}

#[async_trait]
impl<S: AuditSink + ?Sized> AuditSink for Arc<S> {
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        (**self).record(record).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Audit sink that emits structured `tracing` events.
///
/// ALLOW records are emitted at `INFO`, DENY records at `WARN`, both on the
/// `audit` target with message `audit_event`.
///
/// Field mapping:
/// - `audit.timestamp`: RFC 3339 timestamp
/// - `audit.subject`, `audit.operation`, `audit.verdict`, `audit.reason`
/// - `audit.resolved_roles`, `audit.required_roles`: `[a, b]` lists
/// - `audit.enforcement`: `enforced` or `disabled`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let resolved = display_roles(&record.resolved_roles);
        let required = display_roles(&record.required_roles);
        match record.verdict {
            Verdict::Allow => tracing::info!(
                target: "audit",
                { audit.timestamp = %record.timestamp.to_rfc3339(),
                audit.subject = %record.subject,
                audit.operation = %record.operation,
                audit.verdict = %record.verdict,
                audit.resolved_roles = %resolved,
                audit.required_roles = %required,
                audit.reason = %record.reason,
                audit.enforcement = %record.enforcement },
                "audit_event"
            ),
            Verdict::Deny => tracing::warn!(
                target: "audit",
                { audit.timestamp = %record.timestamp.to_rfc3339(),
                audit.subject = %record.subject,
                audit.operation = %record.operation,
                audit.verdict = %record.verdict,
                audit.resolved_roles = %resolved,
                audit.required_roles = %required,
                audit.reason = %record.reason,
                audit.enforcement = %record.enforcement },
                "audit_event"
            ),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

/// Audit sink that writes JSON lines.
///
/// Each record is one `write_all` of a complete line, performed on the
/// blocking thread pool. If a write fails part way, the next record starts
/// with a newline so the torn fragment stays on a line of its own.
pub struct JsonLinesAuditSink<W> {
    inner: Arc<Mutex<LineWriter<W>>>,
}

struct LineWriter<W> {
    writer: W,
    /// The last write may have left an unterminated line.
    torn: bool,
}

impl<W: Write> LineWriter<W> {
    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        if self.torn {
            self.writer.write_all(b"\n")?;
            self.torn = false;
        }
        let result = self.writer.write_all(line).and_then(|()| self.writer.flush());
        self.torn = result.is_err();
        result
    }
}

impl JsonLinesAuditSink<File> {
    /// Opens `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file))
    }
}

impl<W: Write + Send + 'static> JsonLinesAuditSink<W> {
    /// Wraps a writer.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self { inner: Arc::new(Mutex::new(LineWriter { writer, torn: false })) }
    }

    /// Returns the writer, or `None` while a write is still in flight.
    pub fn into_inner(self) -> Option<W> {
        Arc::try_unwrap(self.inner).ok().map(|inner| inner.into_inner().writer)
    }
}

impl<W> fmt::Debug for JsonLinesAuditSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLinesAuditSink").finish_non_exhaustive()
    }
}

#[async_trait]
impl<W: Write + Send + 'static> AuditSink for JsonLinesAuditSink<W> {
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line =
            serde_json::to_vec(record).map_err(|e| AuditError::Serialize(e.to_string()))?;
        line.push(b'\n');

        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.lock().write_line(&line))
            .await
            .map_err(|e| AuditError::Sink { sink: "json_lines", message: e.to_string() })?
            .map_err(|e| AuditError::Sink { sink: "json_lines", message: e.to_string() })
    }

    fn name(&self) -> &'static str {
        "json_lines"
    }
}

/// Audit sink that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything recorded so far.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Discards all records.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Audit sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _record: &AuditRecord) -> Result<(), AuditError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Delivers audit records without ever failing the caller.
pub struct AuditEmitter {
    primary: Arc<dyn AuditSink>,
    fallback: Option<Arc<dyn AuditSink>>,
    fallback_deliveries: AtomicU64,
    dropped: AtomicU64,
}

impl AuditEmitter {
    /// Creates an emitter with a single sink.
    #[must_use]
    pub fn new(primary: impl AuditSink + 'static) -> Self {
        Self::from_arc(Arc::new(primary))
    }

    /// Creates an emitter over a shared sink.
    #[must_use]
    pub fn from_arc(primary: Arc<dyn AuditSink>) -> Self {
        Self {
            primary,
            fallback: None,
            fallback_deliveries: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Sets the sink used when the primary fails.
    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn AuditSink>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Records delivered by the fallback sink.
    #[must_use]
    pub fn fallback_deliveries(&self) -> u64 {
        self.fallback_deliveries.load(Ordering::Relaxed)
    }

    /// Records no sink accepted.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Audits a decision.
    pub async fn record_decision(&self, decision: &AccessDecision, enforcement: EnforcementMode) {
        self.emit(&AuditRecord::from_decision(decision, enforcement)).await;
    }

    /// Delivers `record`, falling back to the secondary sink on failure.
    pub async fn emit(&self, record: &AuditRecord) {
        let Err(primary_err) = self.primary.record(record).await else {
            return;
        };
        tracing::warn!(
            sink = self.primary.name(),
            error = %primary_err,
            "primary audit sink failed"
        );

        if let Some(fallback) = &self.fallback {
            match fallback.record(record).await {
                Ok(()) => {
                    self.fallback_deliveries.fetch_add(1, Ordering::Relaxed);
                    return;
                },
                Err(err) => tracing::warn!(
                    sink = fallback.name(),
                    error = %err,
                    "fallback audit sink failed"
                ),
            }
        }

        self.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            audit.subject = %record.subject,
            audit.operation = %record.operation,
            audit.verdict = %record.verdict,
            "audit record dropped: no sink accepted it"
        );
    }
}

impl Default for AuditEmitter {
    fn default() -> Self {
        Self::new(TracingAuditSink)
    }
}

impl fmt::Debug for AuditEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditEmitter")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.as_ref().map(|s| s.name()))
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tracing::{
        Event, Subscriber,
        field::{Field, Visit},
    };
    use tracing_subscriber::{
        Layer,
        layer::{Context, SubscriberExt},
    };

    use super::*;

    struct FailingSink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _record: &AuditRecord) -> Result<(), AuditError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AuditError::Sink { sink: "failing", message: "disk full".into() })
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn failing() -> Arc<FailingSink> {
        Arc::new(FailingSink { calls: AtomicUsize::new(0) })
    }

    fn deny_record() -> AuditRecord {
        AuditRecord::builder()
            .subject("alice")
            .operation("advanced_search")
            .verdict(Verdict::Deny)
            .resolved_roles(BTreeSet::from([Role::Viewer]))
            .required_roles(BTreeSet::from([Role::Analyst, Role::Admin]))
            .reason("resolved roles [viewer] do not intersect required roles [analyst, admin]")
            .build()
    }

    /// Captures `audit.*` fields of events on the `audit` target.
    #[derive(Clone, Default)]
    struct CaptureLayer {
        events: Arc<Mutex<Vec<Vec<(String, String)>>>>,
    }

    struct FieldVisitor(Vec<(String, String)>);

    impl Visit for FieldVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0.push((field.name().to_owned(), format!("{value:?}")));
        }

        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.push((field.name().to_owned(), value.to_owned()));
        }
    }

    impl<S: Subscriber> Layer<S> for CaptureLayer {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if event.metadata().target() == "audit" {
                let mut visitor = FieldVisitor(Vec::new());
                event.record(&mut visitor);
                self.events.lock().push(visitor.0);
            }
        }
    }

    #[test]
    fn test_builder_defaults() {
        let record = AuditRecord::builder()
            .subject("alice")
            .operation("echo")
            .verdict(Verdict::Allow)
            .reason("operation is public")
            .build();
        assert!(record.resolved_roles.is_empty());
        assert_eq!(record.enforcement, EnforcementMode::Enforced);
        assert!((Utc::now() - record.timestamp).num_seconds() < 2);
    }

    #[tokio::test]
    async fn test_tracing_sink_emits_structured_fields() {
        let layer = CaptureLayer::default();
        let subscriber = tracing_subscriber::registry().with(layer.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        TracingAuditSink.record(&deny_record()).await.unwrap();

        let events = layer.events.lock();
        assert_eq!(events.len(), 1);
        let fields: std::collections::HashMap<_, _> = events[0].iter().cloned().collect();
        assert_eq!(fields["audit.subject"], "alice");
        assert_eq!(fields["audit.verdict"], "DENY");
        assert_eq!(fields["audit.resolved_roles"], "[viewer]");
        assert_eq!(fields["audit.required_roles"], "[analyst, admin]");
        assert_eq!(fields["audit.enforcement"], "enforced");
        assert_eq!(fields["message"], "audit_event");
    }

    #[tokio::test]
    async fn test_json_lines_sink_writes_one_document_per_line() {
        let sink = JsonLinesAuditSink::new(Vec::new());
        sink.record(&deny_record()).await.unwrap();
        sink.record(&deny_record()).await.unwrap();

        let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let doc: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(doc["verdict"], "DENY");
        assert_eq!(doc["resolved_roles"], serde_json::json!(["viewer"]));
        assert_eq!(doc["required_roles"], serde_json::json!(["analyst", "admin"]));
        assert_eq!(doc["enforcement"], "enforced");
    }

    /// Writer that accepts `fail_after` bytes of the next write, then errors.
    struct TearingWriter {
        out: Vec<u8>,
        fail_after: Option<usize>,
    }

    impl Write for TearingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(limit) = self.fail_after.take() {
                self.out.extend_from_slice(&buf[..limit.min(buf.len())]);
                return Err(io::Error::other("disk full"));
            }
            self.out.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_json_lines_sink_isolates_torn_line() {
        let sink = JsonLinesAuditSink::new(TearingWriter { out: Vec::new(), fail_after: Some(10) });

        let err = sink.record(&deny_record()).await.unwrap_err();
        assert!(matches!(err, AuditError::Sink { sink: "json_lines", .. }), "{err:?}");
        sink.record(&deny_record()).await.unwrap();

        let out = String::from_utf8(sink.into_inner().unwrap().out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2, "{out:?}");
        assert_eq!(lines[0].len(), 10);
        assert!(serde_json::from_str::<serde_json::Value>(lines[0]).is_err());
        let doc: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(doc["subject"], "alice");
    }

    #[tokio::test]
    async fn test_emitter_uses_fallback_when_primary_fails() {
        let primary = failing();
        let fallback = Arc::new(MemoryAuditSink::new());
        let emitter = AuditEmitter::from_arc(primary.clone()).with_fallback(fallback.clone());

        emitter.emit(&deny_record()).await;

        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.len(), 1);
        assert_eq!(emitter.fallback_deliveries(), 1);
        assert_eq!(emitter.dropped(), 0);
    }

    #[tokio::test]
    async fn test_emitter_swallows_total_failure() {
        let emitter = AuditEmitter::from_arc(failing()).with_fallback(failing());
        emitter.emit(&deny_record()).await;
        emitter.emit(&deny_record()).await;
        assert_eq!(emitter.dropped(), 2);
    }

    #[tokio::test]
    async fn test_emitter_skips_fallback_on_success() {
        let primary = Arc::new(MemoryAuditSink::new());
        let fallback = failing();
        let emitter = AuditEmitter::from_arc(primary.clone()).with_fallback(fallback.clone());

        emitter.emit(&deny_record()).await;

        assert_eq!(primary.len(), 1);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_file_sink_appends() {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let path = std::env::temp_dir()
            .join(format!("gatekeeper-audit-{}-{nanos}.jsonl", std::process::id()));
        {
            let sink = JsonLinesAuditSink::open(&path).unwrap();
            sink.record(&deny_record()).await.unwrap();
        }
        {
            let sink = JsonLinesAuditSink::open(&path).unwrap();
            sink.record(&deny_record()).await.unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_noop_and_memory_clear() {
        NoopAuditSink.record(&deny_record()).await.unwrap();
        let memory = MemoryAuditSink::new();
        memory.record(&deny_record()).await.unwrap();
        assert!(!memory.is_empty());
        memory.clear();
        assert!(memory.is_empty());
    }
}
