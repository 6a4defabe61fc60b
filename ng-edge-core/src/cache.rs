use crate::{lock::ShardedLockProvider, tree::ServiceIdentityTree};
use futures::future::join_all;
use ng_edge_common::EdgeEventBus;
use ng_edge_error::EdgeResult;
use ng_edge_models::{
    event::{ServiceIdentityRemoved, ServiceIdentityUpdated},
    identity::{IdentityKind, ServiceIdentity},
    settings::Settings,
    IdentityStore, ServiceIdentitySource,
};
use std::{collections::HashSet, sync::Arc};
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Eventually-consistent cache of device-scope identities.
///
/// Owns the identity tree, mirrors it to a persistent store, and keeps both
/// in sync with the remote identity source through scheduled full refresh
/// cycles and targeted per-id refreshes. Change events are published on the
/// bus exactly once per observed change.
///
/// Consistency model: full cycles are mutually exclusive; targeted
/// refreshes may overlap a running cycle, with per-id mutations serialized
/// by a sharded lock (last writer wins). A cycle's removal pass can briefly
/// evict an identity that a concurrent targeted refresh just added; the
/// next refresh restores it. The store mirror is written after the tree
/// mutation, outside the per-id lock, and self-heals on the next full
/// cycle.
pub struct NGIdentityCache {
    tree: RwLock<ServiceIdentityTree>,
    store: Arc<dyn IdentityStore>,
    source: Arc<dyn ServiceIdentitySource>,
    events: Arc<EdgeEventBus>,
    locks: ShardedLockProvider,
    /// Serializes full refresh cycles (scheduled and on-demand).
    cycle_gate: Mutex<()>,
    /// Capacity-1 trigger; a saturated send means a refresh is already
    /// pending and the request coalesces.
    refresh_tx: mpsc::Sender<()>,
    token: CancellationToken,
}

impl NGIdentityCache {
    /// Build the cache, warm-load the persisted identities into the tree
    /// and start the background refresh loop.
    ///
    /// The first scheduled cycle runs one full refresh interval after
    /// startup; until then the warm-loaded data is served. Callers that
    /// want fresh data immediately can call [`initiate_cache_refresh`].
    ///
    /// [`initiate_cache_refresh`]: NGIdentityCache::initiate_cache_refresh
    pub async fn init(
        source: Arc<dyn ServiceIdentitySource>,
        store: Arc<dyn IdentityStore>,
        events: Arc<EdgeEventBus>,
        settings: &Settings,
        token: CancellationToken,
    ) -> EdgeResult<Arc<Self>> {
        let mut tree = ServiceIdentityTree::new(settings.general.edge_device_id.clone());

        let persisted = store.entries().await?;
        let mut loaded = 0usize;
        for (key, value) in persisted {
            match serde_json::from_str::<ServiceIdentity>(&value) {
                Ok(identity) => {
                    tree.insert_or_update(identity);
                    loaded += 1;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping malformed persisted identity");
                }
            }
        }
        if loaded > 0 {
            info!(count = loaded, "Warm-loaded identities from store");
        }

        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let cache = Arc::new(Self {
            tree: RwLock::new(tree),
            store,
            source,
            events,
            locks: ShardedLockProvider::new(settings.cache.lock_shards),
            cycle_gate: Mutex::new(()),
            refresh_tx,
            token,
        });

        cache
            .clone()
            .spawn_refresh_loop(settings.cache.refresh_interval(), refresh_rx);
        Ok(cache)
    }

    fn spawn_refresh_loop(
        self: Arc<Self>,
        period: std::time::Duration,
        mut refresh_rx: mpsc::Receiver<()>,
    ) {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = self.token.cancelled() => {
                        info!("Identity cache refresh loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {}
                    request = refresh_rx.recv() => {
                        if request.is_none() {
                            break;
                        }
                    }
                }
                if let Err(e) = self.refresh_now().await {
                    warn!(error = %e, "Refresh cycle aborted, serving stale identities until next cycle");
                }
            }
        });
    }

    /// Request an out-of-band full refresh.
    ///
    /// Requests issued while a cycle is pending or running coalesce into at
    /// most one extra cycle.
    pub fn initiate_cache_refresh(&self) {
        if self.refresh_tx.try_send(()).is_err() {
            debug!("Refresh already pending, request coalesced");
        }
    }

    /// Run one full refresh cycle inline.
    ///
    /// Pages through a fresh source iterator, upserting every returned
    /// identity, then evicts every cached id the enumeration did not
    /// mention. A source failure aborts the cycle: upserts applied so far
    /// stay, the removal pass is skipped, and the cache keeps serving what
    /// it has.
    pub async fn refresh_now(&self) -> EdgeResult<()> {
        let _cycle = self.cycle_gate.lock().await;
        debug!("Starting identity cache refresh cycle");

        let mut iterator = self.source.iterator().await?;
        let mut seen: HashSet<String> = HashSet::new();
        while iterator.has_next() {
            for identity in iterator.get_next().await? {
                seen.insert(identity.id());
                self.apply_update(identity).await?;
            }
        }

        let stale: Vec<String> = {
            let tree = self.tree.read().await;
            tree.ids().into_iter().filter(|id| !seen.contains(id)).collect()
        };
        for id in &stale {
            self.apply_removal(id).await?;
        }

        info!(
            identities = seen.len(),
            removed = stale.len(),
            "Identity cache refresh cycle complete"
        );
        Ok(())
    }

    /// Cached lookup; with `force_refresh` the remote source is queried for
    /// this id first. A failed forced refresh degrades to the cached value.
    pub async fn get_service_identity(
        &self,
        id: &str,
        force_refresh: bool,
    ) -> Option<ServiceIdentity> {
        if force_refresh {
            if let Err(e) = self.refresh_service_identity(id).await {
                warn!(id = %id, error = %e, "Forced identity refresh failed, serving cached value");
            }
        }
        self.tree.read().await.get(id).cloned()
    }

    /// Targeted refresh of a single identity. Not-found is a removal, a
    /// changed value is an update, an unchanged value fires nothing.
    pub async fn refresh_service_identity(&self, id: &str) -> EdgeResult<()> {
        let kind = IdentityKind::from_key(id)?;
        let fetched = self
            .source
            .get_identity(kind.device_id(), kind.module_id())
            .await?;
        match fetched {
            Some(identity) => {
                self.apply_update(identity).await?;
            }
            None => {
                self.apply_removal(id).await?;
            }
        }
        Ok(())
    }

    /// Targeted refresh of a batch of ids, fetched concurrently. Per-id
    /// failures are logged and do not affect the other ids.
    pub async fn refresh_service_identities<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tasks = ids.into_iter().map(|id| async move {
            let id = id.as_ref();
            if let Err(e) = self.refresh_service_identity(id).await {
                warn!(id = %id, error = %e, "Targeted identity refresh failed");
            }
        });
        join_all(tasks).await;
    }

    /// Resolve the auth chain for `id` against the current tree.
    pub async fn get_auth_chain(&self, id: &str) -> Option<String> {
        self.tree.read().await.get_auth_chain(id)
    }

    /// Ids currently present in the cache.
    pub async fn cached_ids(&self) -> Vec<String> {
        self.tree.read().await.ids()
    }

    async fn apply_update(&self, identity: ServiceIdentity) -> EdgeResult<bool> {
        let id = identity.id();
        let changed = {
            let _guard = self.locks.lock(&id).await;
            let mut tree = self.tree.write().await;
            match tree.get(&id) {
                Some(existing) if *existing == identity => false,
                _ => {
                    tree.insert_or_update(identity.clone());
                    true
                }
            }
        };

        if changed {
            let json = serde_json::to_string(&identity)?;
            self.store.put(&id, &json).await?;
            debug!(id = %id, "Service identity updated");
            self.events.publish(ServiceIdentityUpdated { identity });
        }
        Ok(changed)
    }

    async fn apply_removal(&self, id: &str) -> EdgeResult<bool> {
        let removed = {
            let _guard = self.locks.lock(id).await;
            let mut tree = self.tree.write().await;
            tree.remove(id).is_some()
        };

        if removed {
            self.store.remove(id).await?;
            debug!(id = %id, "Service identity removed");
            self.events.publish(ServiceIdentityRemoved { id: id.to_string() });
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ng_edge_models::{event::EdgeEvent, ServiceIdentitiesIterator};
    use ng_edge_storage::MemoryIdentityStore;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::broadcast::Receiver;

    struct ScriptedIterator {
        pages: VecDeque<Vec<ServiceIdentity>>,
        fail_at_end: bool,
    }

    #[async_trait]
    impl ServiceIdentitiesIterator for ScriptedIterator {
        fn has_next(&self) -> bool {
            !self.pages.is_empty() || self.fail_at_end
        }

        async fn get_next(&mut self) -> EdgeResult<Vec<ServiceIdentity>> {
            match self.pages.pop_front() {
                Some(page) => Ok(page),
                None => {
                    self.fail_at_end = false;
                    Err("remote source failed".into())
                }
            }
        }
    }

    struct Cycle {
        pages: Vec<Vec<ServiceIdentity>>,
        fail_at_end: bool,
    }

    #[derive(Default)]
    struct ScriptedSource {
        cycles: StdMutex<VecDeque<Cycle>>,
        targeted: StdMutex<HashMap<String, Option<ServiceIdentity>>>,
    }

    impl ScriptedSource {
        fn push_cycle(&self, pages: Vec<Vec<ServiceIdentity>>) {
            self.cycles.lock().unwrap().push_back(Cycle {
                pages,
                fail_at_end: false,
            });
        }

        fn push_failing_cycle(&self, pages: Vec<Vec<ServiceIdentity>>) {
            self.cycles.lock().unwrap().push_back(Cycle {
                pages,
                fail_at_end: true,
            });
        }

        fn script_lookup(&self, id: &str, result: Option<ServiceIdentity>) {
            self.targeted.lock().unwrap().insert(id.to_string(), result);
        }
    }

    #[async_trait]
    impl ServiceIdentitySource for ScriptedSource {
        async fn iterator(&self) -> EdgeResult<Box<dyn ServiceIdentitiesIterator>> {
            let cycle = self
                .cycles
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ng_edge_error::EdgeError::from("no scripted cycle"))?;
            Ok(Box::new(ScriptedIterator {
                pages: cycle.pages.into(),
                fail_at_end: cycle.fail_at_end,
            }))
        }

        async fn get_identity(
            &self,
            device_id: &str,
            module_id: Option<&str>,
        ) -> EdgeResult<Option<ServiceIdentity>> {
            let key = match module_id {
                Some(module) => format!("{device_id}/{module}"),
                None => device_id.to_string(),
            };
            Ok(self
                .targeted
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .unwrap_or(None))
        }
    }

    fn root() -> ServiceIdentity {
        ServiceIdentity::new_device("root")
            .with_scope("s-root")
            .with_capability("iotEdge")
    }

    fn device(id: &str) -> ServiceIdentity {
        ServiceIdentity::new_device(id).with_parent_scope("s-root")
    }

    fn drain<E: EdgeEvent + Clone>(rx: &mut Receiver<Arc<dyn EdgeEvent>>) -> Vec<E> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Ok(event) = event.downcast_arc::<E>() {
                out.push((*event).clone());
            }
        }
        out
    }

    async fn build_cache(
        source: Arc<ScriptedSource>,
        store: Arc<MemoryIdentityStore>,
        events: Arc<EdgeEventBus>,
    ) -> Arc<NGIdentityCache> {
        let settings = Settings::for_edge_device("root");
        NGIdentityCache::init(source, store, events, &settings, CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn full_refresh_diffs_against_previous_state() {
        let source = Arc::new(ScriptedSource::default());
        let events = Arc::new(EdgeEventBus::default());
        let store = Arc::new(MemoryIdentityStore::new());

        source.push_cycle(vec![vec![root(), device("d1")], vec![device("d2")]]);
        let cache = build_cache(source.clone(), store.clone(), events.clone()).await;

        let mut updated_rx = events.subscribe::<ServiceIdentityUpdated>();
        let mut removed_rx = events.subscribe::<ServiceIdentityRemoved>();

        cache.refresh_now().await.unwrap();
        let updated = drain::<ServiceIdentityUpdated>(&mut updated_rx);
        assert_eq!(updated.len(), 3);
        assert_eq!(store.len(), 3);

        // Next enumeration: d1 unchanged, d2 gone, d3/m4 new.
        source.push_cycle(vec![vec![
            root(),
            device("d1"),
            ServiceIdentity::new_module("d3", "m4").with_parent_scope("s-root"),
        ]]);
        cache.refresh_now().await.unwrap();

        let updated = drain::<ServiceIdentityUpdated>(&mut updated_rx);
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].identity.id(), "d3/m4");

        let removed = drain::<ServiceIdentityRemoved>(&mut removed_rx);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "d2");

        assert!(cache.get_service_identity("d2", false).await.is_none());
        assert!(cache.get_service_identity("d3/m4", false).await.is_some());
        assert_eq!(
            cache.get_auth_chain("d1").await.as_deref(),
            Some("d1;root")
        );
    }

    #[tokio::test]
    async fn failed_cycle_keeps_serving_stale_data() {
        let source = Arc::new(ScriptedSource::default());
        let events = Arc::new(EdgeEventBus::default());
        let store = Arc::new(MemoryIdentityStore::new());

        source.push_cycle(vec![vec![root(), device("d1"), device("d2")]]);
        let cache = build_cache(source.clone(), store.clone(), events.clone()).await;
        cache.refresh_now().await.unwrap();

        let mut removed_rx = events.subscribe::<ServiceIdentityRemoved>();

        // The failing cycle enumerates only d1 before the source throws;
        // d2 must NOT be evicted.
        source.push_failing_cycle(vec![vec![root(), device("d1")]]);
        assert!(cache.refresh_now().await.is_err());

        assert!(cache.get_service_identity("d2", false).await.is_some());
        assert!(drain::<ServiceIdentityRemoved>(&mut removed_rx).is_empty());
    }

    #[tokio::test]
    async fn targeted_refresh_updates_removes_and_skips_noops() {
        let source = Arc::new(ScriptedSource::default());
        let events = Arc::new(EdgeEventBus::default());
        let store = Arc::new(MemoryIdentityStore::new());

        source.push_cycle(vec![vec![root(), device("d1"), device("d2")]]);
        let cache = build_cache(source.clone(), store.clone(), events.clone()).await;
        cache.refresh_now().await.unwrap();

        let mut updated_rx = events.subscribe::<ServiceIdentityUpdated>();
        let mut removed_rx = events.subscribe::<ServiceIdentityRemoved>();

        // d1 changed generation, d2 disappeared, root unchanged.
        source.script_lookup("d1", Some(device("d1").with_generation("7")));
        source.script_lookup("d2", None);
        source.script_lookup("root", Some(root()));

        cache
            .refresh_service_identities(["d1", "d2", "root"])
            .await;

        let updated = drain::<ServiceIdentityUpdated>(&mut updated_rx);
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].identity.generation_id, "7");

        let removed = drain::<ServiceIdentityRemoved>(&mut removed_rx);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "d2");

        assert!(store.get("d2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn warm_start_loads_persisted_identities() {
        let source = Arc::new(ScriptedSource::default());
        let events = Arc::new(EdgeEventBus::default());
        let store = Arc::new(MemoryIdentityStore::new());

        let persisted = root();
        store
            .put("root", &serde_json::to_string(&persisted).unwrap())
            .await
            .unwrap();
        store.put("broken", "{not json").await.unwrap();

        let cache = build_cache(source, store, events).await;

        // Served without any source interaction.
        assert_eq!(
            cache.get_service_identity("root", false).await,
            Some(persisted)
        );
        assert!(cache.get_service_identity("broken", false).await.is_none());
    }

    #[tokio::test]
    async fn force_refresh_queries_the_source_first() {
        let source = Arc::new(ScriptedSource::default());
        let events = Arc::new(EdgeEventBus::default());
        let store = Arc::new(MemoryIdentityStore::new());

        source.push_cycle(vec![vec![root(), device("d1")]]);
        let cache = build_cache(source.clone(), store, events).await;
        cache.refresh_now().await.unwrap();

        source.script_lookup("d1", Some(device("d1").with_generation("9")));

        let stale = cache.get_service_identity("d1", false).await.unwrap();
        assert_eq!(stale.generation_id, "0");

        let fresh = cache.get_service_identity("d1", true).await.unwrap();
        assert_eq!(fresh.generation_id, "9");
    }

    #[tokio::test]
    async fn initiate_refresh_triggers_a_background_cycle() {
        let source = Arc::new(ScriptedSource::default());
        let events = Arc::new(EdgeEventBus::default());
        let store = Arc::new(MemoryIdentityStore::new());

        let cache = build_cache(source.clone(), store, events).await;
        assert!(cache.get_service_identity("d1", false).await.is_none());

        source.push_cycle(vec![vec![root(), device("d1")]]);
        cache.initiate_cache_refresh();
        // Coalesces while the first request is still pending.
        cache.initiate_cache_refresh();

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            loop {
                if cache.get_service_identity("d1", false).await.is_some() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("background refresh did not run");
    }
}
