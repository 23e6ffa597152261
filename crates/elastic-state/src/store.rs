//! StateStore — redb-backed persistence for policies and scale records.
//!
//! Provides typed CRUD operations over policies and the scale
//! subresource of managed deployments. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::events::PolicyEvent;
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Capacity of the change-notification channel. Slow subscribers that fall
/// further behind observe `RecvError::Lagged` and must resync.
const EVENT_CHANNEL_CAPACITY: usize = 256;

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    events: broadcast::Sender<PolicyEvent>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            db: Arc::new(db),
            events,
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(POLICIES).map_err(map_err!(Table))?;
        txn.open_table(SCALES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Subscribe to policy change notifications.
    ///
    /// Only events published after this call are delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<PolicyEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: PolicyEvent) {
        // No subscribers is fine: nothing is watching yet.
        let _ = self.events.send(event);
    }

    // ── Generic table access ───────────────────────────────────────

    fn put_json<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Read-modify-write a single record inside one write transaction.
    ///
    /// `f` receives the current value (if any) and returns the value to
    /// store, or `None` to leave the table untouched.
    fn update_json<T, F>(&self, table: Table, key: &str, f: F) -> StateResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> StateResult<Option<T>>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            let current: Option<T> = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            updated = f(current)?;
            if let Some(value) = &updated {
                let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
                table
                    .insert(key, bytes.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    // ── Policies ───────────────────────────────────────────────────

    /// Insert or replace a whole policy record (spec and status).
    pub fn put_policy(&self, policy: &Policy) -> StateResult<()> {
        let key = policy.table_key();
        self.put_json(POLICIES, &key, policy)?;
        debug!(%key, "policy stored");
        self.publish(PolicyEvent::Applied(key));
        Ok(())
    }

    /// Create a policy or update the spec of an existing one.
    ///
    /// An existing status and creation time are preserved; a new policy
    /// starts with an empty status.
    pub fn apply_policy(
        &self,
        namespace: &str,
        name: &str,
        spec: PolicySpec,
    ) -> StateResult<Policy> {
        let key = format!("{namespace}/{name}");
        let now = epoch_secs();
        let applied = self
            .update_json(POLICIES, &key, |current: Option<Policy>| {
                Ok(Some(match current {
                    Some(existing) => Policy {
                        spec,
                        updated_at: now,
                        ..existing
                    },
                    None => Policy::new(namespace, name, spec, now),
                }))
            })?
            .ok_or_else(|| StateError::Write(format!("policy {key} was not stored")))?;
        debug!(%key, "policy applied");
        self.publish(PolicyEvent::Applied(key));
        Ok(applied)
    }

    /// Get a policy by `{namespace}/{name}` key.
    pub fn get_policy(&self, key: &str) -> StateResult<Option<Policy>> {
        self.get_json(POLICIES, key)
    }

    /// List all policies.
    pub fn list_policies(&self) -> StateResult<Vec<Policy>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let policy: Policy =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(policy);
        }
        Ok(results)
    }

    /// List the keys of all stored policies without decoding them.
    ///
    /// Fails only when the table itself cannot be read, so one malformed
    /// record does not hide the others.
    pub fn list_policy_keys(&self) -> StateResult<Vec<PolicyKey>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
        let mut keys = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }

    /// Delete a policy (and with it, its status). Returns true if it existed.
    pub fn delete_policy(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "policy deleted");
        if existed {
            self.publish(PolicyEvent::Deleted(key.to_string()));
        }
        Ok(existed)
    }

    /// Overwrite the status of an existing policy.
    ///
    /// The spec is left untouched and no change notification is published.
    pub fn update_policy_status(&self, key: &str, status: &PolicyStatus) -> StateResult<()> {
        self.update_json(POLICIES, key, |current: Option<Policy>| match current {
            Some(policy) => Ok(Some(Policy {
                status: status.clone(),
                ..policy
            })),
            None => Err(StateError::NotFound(format!("policy {key}"))),
        })?;
        debug!(%key, desired = status.desired_replicas, "policy status updated");
        Ok(())
    }

    // ── Scales ─────────────────────────────────────────────────────

    /// Insert or replace a scale record.
    pub fn put_scale(&self, scale: &ScaleRecord) -> StateResult<()> {
        let key = scale.table_key();
        self.put_json(SCALES, &key, scale)?;
        debug!(%key, declared = scale.declared, actual = scale.actual, "scale stored");
        Ok(())
    }

    /// Get the scale record of a deployment by `{namespace}/{deployment}` key.
    pub fn get_scale(&self, key: &str) -> StateResult<Option<ScaleRecord>> {
        self.get_json(SCALES, key)
    }

    /// Set the declared replica count of an existing deployment.
    pub fn set_declared_replicas(&self, key: &str, replicas: u32) -> StateResult<ScaleRecord> {
        let now = epoch_secs();
        let updated = self
            .update_json(SCALES, key, |current: Option<ScaleRecord>| match current {
                Some(scale) => Ok(Some(ScaleRecord {
                    declared: replicas,
                    updated_at: now,
                    ..scale
                })),
                None => Err(StateError::NotFound(format!("scale {key}"))),
            })?
            .ok_or_else(|| StateError::NotFound(format!("scale {key}")))?;
        debug!(%key, replicas, "declared replicas updated");
        Ok(updated)
    }

    /// Record declared and/or observed replica counts reported by the
    /// platform. Missing fields keep their stored value (0 for a new record).
    pub fn report_scale(
        &self,
        namespace: &str,
        deployment: &str,
        declared: Option<u32>,
        actual: Option<u32>,
    ) -> StateResult<ScaleRecord> {
        let key = format!("{namespace}/{deployment}");
        let now = epoch_secs();
        self.update_json(SCALES, &key, |current: Option<ScaleRecord>| {
            let mut scale = current.unwrap_or_else(|| ScaleRecord {
                namespace: namespace.to_string(),
                deployment: deployment.to_string(),
                declared: 0,
                actual: 0,
                updated_at: now,
            });
            if let Some(declared) = declared {
                scale.declared = declared;
            }
            if let Some(actual) = actual {
                scale.actual = actual;
            }
            scale.updated_at = now;
            Ok(Some(scale))
        })?
        .ok_or_else(|| StateError::Write(format!("scale {key} was not stored")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_spec(deployment: &str) -> PolicySpec {
        PolicySpec {
            deployment: DeploymentRef {
                name: deployment.to_string(),
                capacity: 8,
                min_replicas: 1,
                max_replicas: 20,
            },
            buffer: BufferSpec {
                initial: 1,
                threshold: 50,
            },
            workload: WorkloadRef {
                queue: "payroll.runs".to_string(),
            },
        }
    }

    fn test_policy(namespace: &str, name: &str) -> Policy {
        Policy::new(namespace, name, test_spec("choreography"), 1000)
    }

    fn test_scale(namespace: &str, deployment: &str) -> ScaleRecord {
        ScaleRecord {
            namespace: namespace.to_string(),
            deployment: deployment.to_string(),
            declared: 3,
            actual: 3,
            updated_at: 1000,
        }
    }

    // ── Policy CRUD ────────────────────────────────────────────────

    #[test]
    fn policy_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let policy = test_policy("payroll", "choreographer");

        store.put_policy(&policy).unwrap();
        let retrieved = store.get_policy("payroll/choreographer").unwrap();

        assert_eq!(retrieved, Some(policy));
    }

    #[test]
    fn policy_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_policy("nope/nothing").unwrap().is_none());
    }

    #[test]
    fn policy_list_all() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_policy(&test_policy("ns1", "a")).unwrap();
        store.put_policy(&test_policy("ns1", "b")).unwrap();
        store.put_policy(&test_policy("ns2", "c")).unwrap();

        assert_eq!(store.list_policies().unwrap().len(), 3);
    }

    #[test]
    fn policy_keys_skip_decoding() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_policy(&test_policy("ns1", "a")).unwrap();
        {
            let txn = store.db.begin_write().unwrap();
            {
                let mut table = txn.open_table(POLICIES).unwrap();
                table.insert("ns1/broken", b"{not json".as_slice()).unwrap();
            }
            txn.commit().unwrap();
        }

        assert!(matches!(
            store.list_policies(),
            Err(StateError::Deserialize(_))
        ));
        assert_eq!(
            store.list_policy_keys().unwrap(),
            vec!["ns1/a".to_string(), "ns1/broken".to_string()]
        );
    }

    #[test]
    fn apply_creates_with_empty_status() {
        let store = StateStore::open_in_memory().unwrap();
        let policy = store
            .apply_policy("payroll", "choreographer", test_spec("choreography"))
            .unwrap();

        assert_eq!(policy.status.message, CREATED_MESSAGE);
        assert_eq!(policy.status.buffered_replicas, 0);
        assert!(policy.status.last_scale_time.is_none());
        assert!(policy.created_at > 0);
    }

    #[test]
    fn apply_preserves_status_on_spec_update() {
        let store = StateStore::open_in_memory().unwrap();
        let mut policy = test_policy("payroll", "choreographer");
        policy.status.buffered_replicas = 3;
        policy.status.last_scale_time = Some(1234);
        store.put_policy(&policy).unwrap();

        let mut spec = test_spec("choreography");
        spec.deployment.max_replicas = 40;
        let updated = store.apply_policy("payroll", "choreographer", spec).unwrap();

        assert_eq!(updated.spec.deployment.max_replicas, 40);
        assert_eq!(updated.status.buffered_replicas, 3);
        assert_eq!(updated.status.last_scale_time, Some(1234));
        assert_eq!(updated.created_at, 1000);
    }

    #[test]
    fn policy_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_policy(&test_policy("payroll", "a")).unwrap();

        assert!(store.delete_policy("payroll/a").unwrap());
        assert!(!store.delete_policy("payroll/a").unwrap());
        assert!(store.get_policy("payroll/a").unwrap().is_none());
    }

    #[test]
    fn status_update_leaves_spec_alone() {
        let store = StateStore::open_in_memory().unwrap();
        let policy = test_policy("payroll", "choreographer");
        store.put_policy(&policy).unwrap();

        let status = PolicyStatus {
            message: "scaled".to_string(),
            current_replicas: 3,
            buffered_replicas: 2,
            desired_replicas: 5,
            last_scale_time: Some(2000),
        };
        store
            .update_policy_status("payroll/choreographer", &status)
            .unwrap();

        let stored = store.get_policy("payroll/choreographer").unwrap().unwrap();
        assert_eq!(stored.status, status);
        assert_eq!(stored.spec, policy.spec);
    }

    #[test]
    fn status_update_on_missing_policy_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store
            .update_policy_status("payroll/gone", &PolicyStatus::default())
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
        // The failed update must not have created a record.
        assert!(store.get_policy("payroll/gone").unwrap().is_none());
    }

    // ── Change notifications ──────────────────────────────────────

    #[tokio::test]
    async fn spec_writes_and_deletes_are_published() {
        let store = StateStore::open_in_memory().unwrap();
        let mut events = store.subscribe();

        store
            .apply_policy("payroll", "a", test_spec("choreography"))
            .unwrap();
        store.delete_policy("payroll/a").unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            PolicyEvent::Applied("payroll/a".to_string())
        );
        assert_eq!(
            events.recv().await.unwrap(),
            PolicyEvent::Deleted("payroll/a".to_string())
        );
    }

    #[tokio::test]
    async fn status_writes_are_not_published() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_policy(&test_policy("payroll", "a")).unwrap();
        let mut events = store.subscribe();

        store
            .update_policy_status("payroll/a", &PolicyStatus::default())
            .unwrap();
        // Deleting a missing key publishes nothing either.
        store.delete_policy("payroll/missing").unwrap();

        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    // ── Scale CRUD ────────────────────────────────────────────────

    #[test]
    fn scale_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let scale = test_scale("payroll", "choreography");

        store.put_scale(&scale).unwrap();
        assert_eq!(store.get_scale("payroll/choreography").unwrap(), Some(scale));
    }

    #[test]
    fn set_declared_replicas_updates_only_declared() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_scale(&test_scale("payroll", "choreography")).unwrap();

        let updated = store
            .set_declared_replicas("payroll/choreography", 7)
            .unwrap();
        assert_eq!(updated.declared, 7);
        assert_eq!(updated.actual, 3);
    }

    #[test]
    fn set_declared_replicas_on_missing_scale_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.set_declared_replicas("payroll/none", 2).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn report_scale_upserts_partial_fields() {
        let store = StateStore::open_in_memory().unwrap();

        let created = store
            .report_scale("payroll", "choreography", None, Some(4))
            .unwrap();
        assert_eq!((created.declared, created.actual), (0, 4));

        let updated = store
            .report_scale("payroll", "choreography", Some(5), None)
            .unwrap();
        assert_eq!((updated.declared, updated.actual), (5, 4));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_policy(&test_policy("prod", "api")).unwrap();
            store.put_scale(&test_scale("prod", "choreography")).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let policy = store.get_policy("prod/api").unwrap();
        assert_eq!(policy.unwrap().name, "api");
        assert!(store.get_scale("prod/choreography").unwrap().is_some());
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_policies().unwrap().is_empty());
        assert!(store.get_scale("any/thing").unwrap().is_none());
        assert!(!store.delete_policy("nope").unwrap());
    }
}
