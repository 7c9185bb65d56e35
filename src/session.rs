//! A2 — Session Manager. One session owns exactly one `Driver`; an
//! in-flight flag rejects overlapping detect/extract calls the way the
//! spec's `_autoDetecting` guard does, and teardown releases the driver
//! and treats any in-flight call's resulting error as benign (spec §5
//! concurrency model).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::driver::Driver;
use crate::error::{RainbowError, Result};

pub struct Session {
    pub id: Uuid,
    driver: Arc<dyn Driver>,
    busy: AtomicBool,
    torn_down: AtomicBool,
}

impl Session {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self { id: Uuid::new_v4(), driver, busy: AtomicBool::new(false), torn_down: AtomicBool::new(false) }
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    /// Run `op` exclusively: a second concurrent call while one is already
    /// in flight is rejected rather than queued (mirrors the spec's
    /// `_autoDetecting`-style boolean guard, which is deliberately not a
    /// queue).
    pub async fn run_exclusive<'a, F, T>(&'a self, op: F) -> Result<T>
    where
        F: FnOnce(&'a dyn Driver) -> futures::future::BoxFuture<'a, Result<T>>,
    {
        if self.torn_down.load(Ordering::SeqCst) {
            return Err(RainbowError::Session("session already torn down".to_string()));
        }
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(RainbowError::Session("operation already in progress".to_string()));
        }

        let result = op(self.driver.as_ref()).await;
        self.busy.store(false, Ordering::SeqCst);
        result
    }

    /// Release the driver and any listeners/routes it holds. Errors from
    /// operations still in flight at teardown time are expected and
    /// swallowed rather than surfaced.
    pub async fn teardown(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
        let _ = self.driver.set_route_guard("*", false).await;
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: std::sync::RwLock<std::collections::HashMap<Uuid, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, driver: Arc<dyn Driver>) -> Arc<Session> {
        let session = Arc::new(Session::new(driver));
        self.sessions.write().unwrap().insert(session.id, session.clone());
        session
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().get(&id).cloned()
    }

    pub async fn destroy(&self, id: Uuid) -> Result<()> {
        let session = self.sessions.write().unwrap().remove(&id);
        match session {
            Some(session) => {
                session.teardown().await;
                Ok(())
            }
            None => Err(RainbowError::Session(format!("no session {id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::FixtureDriver;

    #[tokio::test]
    async fn rejects_overlapping_operations() {
        let driver: Arc<dyn Driver> = Arc::new(FixtureDriver::new("<div></div>", "https://example.com"));
        let session = Session::new(driver);

        session.busy.store(true, Ordering::SeqCst);
        let result = session.run_exclusive(|_d| Box::pin(async { Ok(()) })).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn teardown_rejects_further_operations() {
        let driver: Arc<dyn Driver> = Arc::new(FixtureDriver::new("<div></div>", "https://example.com"));
        let session = Session::new(driver);
        session.teardown().await;
        let result = session.run_exclusive(|_d| Box::pin(async { Ok(()) })).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn registry_create_get_destroy_roundtrip() {
        let registry = SessionRegistry::new();
        let driver: Arc<dyn Driver> = Arc::new(FixtureDriver::new("<div></div>", "https://example.com"));
        let session = registry.create(driver);
        assert!(registry.get(session.id).is_some());
        registry.destroy(session.id).await.unwrap();
        assert!(registry.get(session.id).is_none());
    }
}
