//! Owns the single active [`Backend`] instance (spec §4.F), grounded in
//! the teacher's provider-registry-plus-active-selection split, but
//! reduced to "one slot, lazily constructed, resettable" since PocketPaw
//! only ever runs one backend at a time.

use std::sync::Arc;

use parking_lot::RwLock;
use pocketpaw_backends::event::{AgentEvent, AgentEventStream};
use pocketpaw_backends::Backend;
use pocketpaw_domain::{Result, SessionKey, Turn};

/// Constructs the active backend from whatever `agent_backend` setting is
/// configured. Boxed so `AgentRouter` doesn't need to know about the
/// concrete backend kinds or their construction dependencies (API keys,
/// subprocess paths, ...).
pub type BackendFactory = Box<dyn Fn() -> Result<Arc<dyn Backend>> + Send + Sync>;

pub struct AgentRouter {
    factory: BackendFactory,
    active: RwLock<Option<Arc<dyn Backend>>>,
}

impl AgentRouter {
    pub fn new(factory: BackendFactory) -> Self {
        Self { factory, active: RwLock::new(None) }
    }

    /// Clears the active backend slot. The next `run()` lazily
    /// reconstructs it from the factory, picking up any configuration
    /// change made since the last run.
    pub fn reset_router(&self) {
        *self.active.write() = None;
    }

    fn ensure_backend(&self) -> Result<Arc<dyn Backend>> {
        if let Some(backend) = self.active.read().clone() {
            return Ok(backend);
        }
        let backend = (self.factory)()?;
        *self.active.write() = Some(backend.clone());
        Ok(backend)
    }

    /// Delegates to the active backend. If construction itself fails, the
    /// caller gets a single `Error` event followed by `Done` rather than a
    /// propagated `Result::Err` — the Agent Loop then handles "backend
    /// failed before the first event" identically to "backend emitted an
    /// error event".
    pub async fn run(
        &self,
        message: &str,
        system_prompt: Option<&str>,
        history: &[Turn],
        session_key: Option<&SessionKey>,
    ) -> AgentEventStream {
        let backend = match self.ensure_backend() {
            Ok(b) => b,
            Err(e) => {
                let stream = async_stream::stream! {
                    yield AgentEvent::error(e.to_string());
                    yield AgentEvent::done();
                };
                return Box::pin(stream);
            }
        };

        match backend.run(message, system_prompt, history, session_key).await {
            Ok(stream) => stream,
            Err(e) => {
                let stream = async_stream::stream! {
                    yield AgentEvent::error(e.to_string());
                    yield AgentEvent::done();
                };
                Box::pin(stream)
            }
        }
    }

    pub fn stop(&self) {
        if let Some(backend) = self.active.read().clone() {
            backend.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pocketpaw_domain::BackendInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        info: BackendInfo,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Backend for CountingBackend {
        async fn run(
            &self,
            _message: &str,
            _system_prompt: Option<&str>,
            _history: &[Turn],
            _session_key: Option<&SessionKey>,
        ) -> Result<AgentEventStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let stream = async_stream::stream! {
                yield AgentEvent::message("ok");
                yield AgentEvent::done();
            };
            Ok(Box::pin(stream))
        }

        fn stop(&self) {}

        fn info(&self) -> &BackendInfo {
            &self.info
        }
    }

    #[tokio::test]
    async fn lazily_constructs_backend_once() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));

        let constructions_for_factory = constructions.clone();
        let calls_for_factory = calls.clone();
        let router = AgentRouter::new(Box::new(move || {
            constructions_for_factory.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingBackend {
                info: BackendInfo::new("test"),
                calls: calls_for_factory.clone(),
            }) as Arc<dyn Backend>)
        }));

        let _ = router.run("hi", None, &[], None).await;
        let _ = router.run("hi again", None, &[], None).await;

        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reset_router_forces_reconstruction() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let constructions_for_factory = constructions.clone();
        let router = AgentRouter::new(Box::new(move || {
            constructions_for_factory.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountingBackend {
                info: BackendInfo::new("test"),
                calls: Arc::new(AtomicUsize::new(0)),
            }) as Arc<dyn Backend>)
        }));

        let _ = router.run("hi", None, &[], None).await;
        router.reset_router();
        let _ = router.run("hi", None, &[], None).await;

        assert_eq!(constructions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn factory_failure_emits_error_then_done() {
        use futures_util::StreamExt;
        let router: AgentRouter = AgentRouter::new(Box::new(|| {
            Err(pocketpaw_domain::Error::Config("no backend configured".into()))
        }));

        let mut stream = router.run("hi", None, &[], None).await;
        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert!(matches!(first, AgentEvent::Error { .. }));
        assert!(second.is_terminal());
    }
}
