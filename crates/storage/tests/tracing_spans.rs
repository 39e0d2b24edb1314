//! Integration test verifying that `#[instrument]` annotations produce
//! the expected spans on `MemoryBackend` operations.

#![allow(clippy::expect_used)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use certplane_storage::{MemoryBackend, StorageBackend};
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer, records span names as they are created
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

fn collecting_subscriber() -> (impl Subscriber + Send + Sync, Arc<Mutex<Vec<String>>>) {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);
    (tracing_subscriber::registry().with(collector), spans)
}

fn assert_span(spans: &Arc<Mutex<Vec<String>>>, name: &str) {
    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn memory_backend_set_and_get_create_spans() {
    let (subscriber, spans) = collecting_subscriber();
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = MemoryBackend::new();
    backend.set(b"key-1".to_vec(), b"value-1".to_vec()).await.expect("set should succeed");
    let _ = backend.get(b"key-1").await;

    assert_span(&spans, "set");
    assert_span(&spans, "get");
}

#[tokio::test]
async fn memory_backend_ttl_write_creates_span() {
    let (subscriber, spans) = collecting_subscriber();
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = MemoryBackend::new();
    backend
        .set_with_ttl(b"hb".to_vec(), b"v".to_vec(), Duration::from_secs(5))
        .await
        .expect("set_with_ttl should succeed");

    assert_span(&spans, "set_with_ttl");
}

#[tokio::test]
async fn memory_backend_conditional_writes_create_spans() {
    let (subscriber, spans) = collecting_subscriber();
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = MemoryBackend::new();
    backend.compare_and_set(b"k", None, b"v".to_vec()).await.expect("cas should succeed");
    backend.compare_and_delete(b"k", b"v").await.expect("cad should succeed");

    assert_span(&spans, "compare_and_set");
    assert_span(&spans, "compare_and_delete");
}

#[tokio::test]
async fn memory_backend_delete_and_list_create_spans() {
    let (subscriber, spans) = collecting_subscriber();
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = MemoryBackend::new();
    backend.delete(b"key").await.expect("delete should succeed");
    let _ = backend.list_prefix(b"users/").await;

    assert_span(&spans, "delete");
    assert_span(&spans, "list_prefix");
}

#[tokio::test]
async fn memory_backend_health_check_creates_span() {
    let (subscriber, spans) = collecting_subscriber();
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = MemoryBackend::new();
    let _ = backend.health_check().await;

    assert_span(&spans, "health_check");
}
