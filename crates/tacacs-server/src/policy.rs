// SPDX-License-Identifier: AGPL-3.0-only
//! Shared policy handle. Readers clone an `Arc` snapshot; reloads swap the whole store.

use crate::metrics::metrics;
use anyhow::anyhow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::RwLock;
use tracing::{info, warn};
use tacd_policy::{ConfigLoadError, PolicyStore, validate_policy_file};

#[derive(Debug)]
struct PolicySource {
    policy: PathBuf,
    schema: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PolicyHandle {
    inner: Arc<RwLock<Arc<PolicyStore>>>,
    source: Option<Arc<PolicySource>>,
    generation: Arc<AtomicU64>,
}

impl PolicyHandle {
    pub fn new(store: PolicyStore) -> Self {
        publish_gauges(&store, 1);
        PolicyHandle {
            inner: Arc::new(RwLock::new(Arc::new(store))),
            source: None,
            generation: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Remembers where the store came from so `reload` can read it again.
    pub fn with_source(mut self, policy: impl Into<PathBuf>, schema: Option<PathBuf>) -> Self {
        self.source = Some(Arc::new(PolicySource {
            policy: policy.into(),
            schema,
        }));
        self
    }

    /// The store as of now. Holders keep it even if a reload happens afterwards.
    pub async fn snapshot(&self) -> Arc<PolicyStore> {
        self.inner.read().await.clone()
    }

    /// Installs a new store and returns its generation.
    pub async fn replace(&self, store: PolicyStore) -> u64 {
        let store = Arc::new(store);
        let mut guard = self.inner.write().await;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        publish_gauges(&store, generation);
        *guard = store;
        generation
    }

    /// Re-reads the policy file. On failure the current store stays active.
    pub async fn reload(&self) -> Result<u64, ConfigLoadError> {
        let result = match self.source.as_deref() {
            Some(source) => PolicyStore::from_path(&source.policy, source.schema.as_ref()),
            None => Err(anyhow!("no policy file configured").into()),
        };
        match result {
            Ok(store) => {
                let users = store.user_count();
                let rules = store.rule_count();
                let generation = self.replace(store).await;
                metrics()
                    .policy_reload_total
                    .with_label_values(&["success"])
                    .inc();
                info!(generation, users, rules, "policy reloaded");
                Ok(generation)
            }
            Err(err) => {
                metrics()
                    .policy_reload_total
                    .with_label_values(&["failure"])
                    .inc();
                warn!(
                    error = %err,
                    generation = self.generation(),
                    "policy reload failed; keeping current policy"
                );
                Err(err)
            }
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

fn publish_gauges(store: &PolicyStore, generation: u64) {
    metrics().policy_rules_count.set(store.rule_count() as f64);
    metrics().policy_generation.set(generation as f64);
}

pub async fn watch_sighup(handle: PolicyHandle) {
    match signal(SignalKind::hangup()) {
        Ok(mut stream) => {
            while stream.recv().await.is_some() {
                info!("SIGHUP received; reloading policy");
                let _ = handle.reload().await;
            }
        }
        Err(err) => warn!(error = %err, "failed to install SIGHUP handler"),
    }
}

/// Loads and compiles a policy without installing it.
pub fn validate_policy(path: &Path, schema: Option<&Path>) -> Result<PolicyStore, ConfigLoadError> {
    match schema {
        Some(schema) => {
            let document = validate_policy_file(path, schema)?;
            PolicyStore::from_document(document)
        }
        None => PolicyStore::from_path(path, None::<&Path>),
    }
}
