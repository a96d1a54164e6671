// nvrbackup/src/cloud/memory.rs
// In-process remote used by tests; failures are injected per operation.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::{ProviderError, ProviderErrorKind, ProviderResult, RemoteObject, RemoteStore};
use crate::config::Credential;

pub const VALID_CREDENTIAL: &str = r#"{"token":"valid"}"#;

#[derive(Default)]
pub struct MemoryRemote {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    upload_failure: Mutex<Option<ProviderErrorKind>>,
    exists_failure: Mutex<Option<ProviderErrorKind>>,
    list_failure: Mutex<Option<ProviderErrorKind>>,
    stalled: AtomicBool,
    uploads: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, filename: &str, content: Vec<u8>) {
        self.objects.lock().unwrap().insert(filename.to_string(), content);
    }

    pub fn remove(&self, filename: &str) {
        self.objects.lock().unwrap().remove(filename);
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.objects.lock().unwrap().contains_key(filename)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn fail_upload(&self, kind: Option<ProviderErrorKind>) {
        *self.upload_failure.lock().unwrap() = kind;
    }

    pub fn fail_exists(&self, kind: Option<ProviderErrorKind>) {
        *self.exists_failure.lock().unwrap() = kind;
    }

    pub fn fail_list(&self, kind: Option<ProviderErrorKind>) {
        *self.list_failure.lock().unwrap() = kind;
    }

    /// Every call hangs until the connector's timeout fires.
    pub fn stall(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    async fn maybe_stall(&self) {
        if self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn parse_credential(&self, credential: &Credential) -> Result<(), String> {
        match serde_json::from_str::<serde_json::Value>(credential.expose()) {
            Ok(value) if value.get("token").is_some_and(|t| t.is_string()) => Ok(()),
            _ => Err("expected a JSON object with a token".to_string()),
        }
    }

    async fn verify(&self, credential: &Credential) -> ProviderResult<()> {
        self.maybe_stall().await;
        if credential.expose() == VALID_CREDENTIAL {
            Ok(())
        } else {
            Err(ProviderError::new(ProviderErrorKind::Unauthorized, "token rejected"))
        }
    }

    async fn upload(&self, _credential: &Credential, filename: &str, content: Vec<u8>) -> ProviderResult<()> {
        self.maybe_stall().await;
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = *self.upload_failure.lock().unwrap() {
            return Err(ProviderError::new(kind, "injected upload failure"));
        }
        self.insert(filename, content);
        Ok(())
    }

    async fn exists(&self, _credential: &Credential, filename: &str) -> ProviderResult<bool> {
        self.maybe_stall().await;
        if let Some(kind) = *self.exists_failure.lock().unwrap() {
            return Err(ProviderError::new(kind, "injected exists failure"));
        }
        Ok(self.contains(filename))
    }

    async fn download(&self, _credential: &Credential, filename: &str) -> ProviderResult<Vec<u8>> {
        self.maybe_stall().await;
        self.objects
            .lock()
            .unwrap()
            .get(filename)
            .cloned()
            .ok_or_else(|| ProviderError::new(ProviderErrorKind::NotFound, "no such object"))
    }

    async fn delete(&self, _credential: &Credential, filename: &str) -> ProviderResult<()> {
        self.maybe_stall().await;
        self.remove(filename);
        Ok(())
    }

    async fn list(&self, _credential: &Credential) -> ProviderResult<Vec<RemoteObject>> {
        self.maybe_stall().await;
        if let Some(kind) = *self.list_failure.lock().unwrap() {
            return Err(ProviderError::new(kind, "injected list failure"));
        }
        let mut objects: Vec<RemoteObject> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .map(|(filename, content)| RemoteObject {
                filename: filename.clone(),
                size_bytes: Some(content.len() as u64),
                modified: None,
            })
            .collect();
        objects.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(objects)
    }
}
