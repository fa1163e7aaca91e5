use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use hyperdrive_common::{
    ErrorKind, HdResult, HyperDriveError, Provider, ProviderId, ProviderKey,
};
use hyperdrive_replication::{Holon, HolonProvider};

#[derive(Default)]
struct Script {
    fail_with: Option<ErrorKind>,
    fail_times: u32,
    delay: Option<Duration>,
    lagging: bool,
}

/// Storage provider whose failures, latency and staleness are set by the test.
pub struct ScriptedHolonProvider {
    id: ProviderId,
    script: Mutex<Script>,
    /// Every version written per key, oldest first.
    records: Mutex<HashMap<ProviderKey, Vec<Holon>>>,
    saves: AtomicU32,
    loads: AtomicU32,
    locates: AtomicU32,
    deletes: AtomicU32,
}

impl ScriptedHolonProvider {
    pub fn new(id: &str) -> Self {
        Self {
            id: ProviderId::new(id),
            script: Mutex::new(Script::default()),
            records: Mutex::new(HashMap::new()),
            saves: AtomicU32::new(0),
            loads: AtomicU32::new(0),
            locates: AtomicU32::new(0),
            deletes: AtomicU32::new(0),
        }
    }

    /// Every call fails with `kind`.
    pub fn failing(self, kind: ErrorKind) -> Self {
        self.set_failure(Some(kind));
        self
    }

    /// The next `times` calls fail with `kind`, later calls succeed.
    pub fn failing_times(self, times: u32, kind: ErrorKind) -> Self {
        {
            let mut script = self.script();
            script.fail_times = times;
            script.fail_with = Some(kind);
        }
        self
    }

    /// Each call sleeps for `delay` before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.script().delay = Some(delay);
        self
    }

    /// Loads return the first version ever written for a key.
    pub fn lagging(self) -> Self {
        self.script().lagging = true;
        self
    }

    pub fn set_failure(&self, kind: Option<ErrorKind>) {
        let mut script = self.script();
        script.fail_with = kind;
        script.fail_times = 0;
    }

    pub fn save_calls(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn load_calls(&self) -> u32 {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn locate_calls(&self) -> u32 {
        self.locates.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u32 {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn stored_versions(&self, key: &ProviderKey) -> Vec<u64> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|history| history.iter().map(Holon::version).collect())
            .unwrap_or_default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn play(&self, operation: &str) -> HdResult<()> {
        let (delay, failure) = {
            let mut script = self.script();
            let failure = match script.fail_with {
                Some(kind) if script.fail_times > 0 => {
                    script.fail_times -= 1;
                    if script.fail_times == 0 {
                        script.fail_with = None;
                    }
                    Some(kind)
                }
                other => other,
            };
            (script.delay, failure)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(kind) => Err(HyperDriveError::new(
                kind,
                format!("{} scripted {operation} failure", self.id),
            )),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Provider for ScriptedHolonProvider {
    fn provider_id(&self) -> &ProviderId {
        &self.id
    }

    async fn health_check(&self) -> HdResult<()> {
        self.play("health_check").await
    }
}

#[async_trait]
impl HolonProvider for ScriptedHolonProvider {
    async fn save_holon(&self, holon: &Holon) -> HdResult<ProviderKey> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.play("save_holon").await?;
        let key = holon
            .provider_key(&self.id)
            .cloned()
            .unwrap_or_else(|| ProviderKey::new(format!("{}/{}", self.id, holon.id)));
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.clone())
            .or_default()
            .push(holon.clone());
        Ok(key)
    }

    async fn load_holon(&self, key: &ProviderKey) -> HdResult<Holon> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.play("load_holon").await?;
        let lagging = self.script().lagging;
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let history = records
            .get(key)
            .ok_or_else(|| HyperDriveError::not_found(format!("{} has no {key}", self.id)))?;
        let holon = if lagging { history.first() } else { history.last() };
        holon
            .cloned()
            .ok_or_else(|| HyperDriveError::not_found(format!("{} has no {key}", self.id)))
    }

    async fn locate_holon(&self, id: Uuid) -> HdResult<ProviderKey> {
        self.locates.fetch_add(1, Ordering::SeqCst);
        self.play("locate_holon").await?;
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .iter()
            .find(|(_, history)| history.iter().any(|holon| holon.id == id))
            .map(|(key, _)| key.clone())
            .ok_or_else(|| HyperDriveError::not_found(format!("{} holds no holon {id}", self.id)))
    }

    async fn delete_holon(&self, key: &ProviderKey) -> HdResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.play("delete_holon").await?;
        match self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
        {
            Some(_) => Ok(()),
            None => Err(HyperDriveError::not_found(format!("{} has no {key}", self.id))),
        }
    }
}
