//! Call ledger: one admission row per paid call, one completion update.
//!
//! A call backed by a transaction is admitted with a short awaited claim:
//! the admission row doubles as the record that the transaction is spent,
//! so the same payment cannot be forwarded twice. Everything else goes
//! through a bounded queue drained by a single detached worker, in order,
//! so a call's admission always lands before its completion. Store
//! failures are logged and counted and never change the response.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tollgate_protocol::PaymentProof;

use crate::metrics::{LEDGER_DROPPED, LEDGER_FAILURES};
use crate::registry::RegistryError;

/// Admission-time ledger entry. Status and latency are filled in by the
/// completion update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub endpoint_id: i64,
    pub caller_address: String,
    pub transaction: Option<String>,
    pub amount_micro_units: u64,
}

impl CallRecord {
    pub fn admitted(endpoint_id: i64, proof: &PaymentProof) -> Self {
        Self {
            endpoint_id,
            caller_address: format!("{:#x}", proof.payer),
            transaction: proof.transaction.clone(),
            amount_micro_units: proof.amount_micro_units,
        }
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_call(&self, record: &CallRecord) -> Result<(), RegistryError>;

    /// Insert the admission row for a call carrying a transaction. Returns
    /// `false` when a row for that transaction already exists.
    async fn claim_transaction(&self, record: &CallRecord) -> Result<bool, RegistryError>;

    /// Fill status and latency on the call with this transaction, if it has
    /// not been completed yet. Returns whether a row changed.
    async fn complete_call(
        &self,
        transaction: &str,
        status_code: u16,
        latency_ms: u64,
    ) -> Result<bool, RegistryError>;
}

#[derive(Debug)]
enum LedgerEvent {
    Admitted(CallRecord),
    Completed {
        transaction: String,
        status_code: u16,
        latency_ms: u64,
    },
    Flush(oneshot::Sender<()>),
}

/// How a verified call got into the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Admission row written; the transaction is now spent.
    Claimed,
    /// The transaction already backs an earlier call.
    AlreadyUsed,
    /// No claim was possible (no transaction, or the store failed or was
    /// slow); the admission row was queued for the worker instead.
    Queued,
}

/// Handle for ledger writes. Cheap to clone.
#[derive(Clone)]
pub struct Ledger {
    tx: mpsc::Sender<LedgerEvent>,
    store: Arc<dyn LedgerStore>,
}

impl Ledger {
    /// Start the worker on the current runtime.
    pub fn spawn(store: Arc<dyn LedgerStore>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_worker(store.clone(), rx));
        (Self { tx, store }, handle)
    }

    /// Admit a verified call before it is forwarded. Only
    /// [`Admission::AlreadyUsed`] should stop the call.
    pub async fn admit(&self, record: CallRecord, timeout: Duration) -> Admission {
        if record.transaction.is_none() {
            self.record_admission(record);
            return Admission::Queued;
        }

        match tokio::time::timeout(timeout, self.store.claim_transaction(&record)).await {
            Ok(Ok(true)) => Admission::Claimed,
            Ok(Ok(false)) => {
                tracing::info!(
                    endpoint_id = record.endpoint_id,
                    transaction = ?record.transaction,
                    "transaction already used"
                );
                Admission::AlreadyUsed
            }
            Ok(Err(e)) => {
                LEDGER_FAILURES.with_label_values(&["claim"]).inc();
                tracing::warn!(
                    endpoint_id = record.endpoint_id,
                    error = %e,
                    "transaction claim failed; queueing admission"
                );
                self.record_admission(record);
                Admission::Queued
            }
            Err(_) => {
                LEDGER_FAILURES.with_label_values(&["claim"]).inc();
                tracing::warn!(
                    endpoint_id = record.endpoint_id,
                    "transaction claim timed out; queueing admission"
                );
                self.record_admission(record);
                Admission::Queued
            }
        }
    }

    /// Queue the admission row. Never blocks.
    pub fn record_admission(&self, record: CallRecord) {
        self.enqueue(LedgerEvent::Admitted(record));
    }

    /// Queue the completion update. Skipped when there is no transaction to
    /// match on.
    pub fn record_completion(&self, transaction: Option<&str>, status_code: u16, latency: Duration) {
        let Some(transaction) = transaction else {
            tracing::debug!(status_code, "no transaction reference; skipping ledger completion");
            return;
        };
        self.enqueue(LedgerEvent::Completed {
            transaction: transaction.to_string(),
            status_code,
            latency_ms: latency.as_millis().min(u64::MAX as u128) as u64,
        });
    }

    /// Wait until every event queued before this call has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(LedgerEvent::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    fn enqueue(&self, event: LedgerEvent) {
        if let Err(e) = self.tx.try_send(event) {
            LEDGER_DROPPED.inc();
            tracing::warn!(error = %e, "ledger queue unavailable; dropping write");
        }
    }
}

async fn run_worker(store: Arc<dyn LedgerStore>, mut rx: mpsc::Receiver<LedgerEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            LedgerEvent::Admitted(record) => {
                if let Err(e) = store.insert_call(&record).await {
                    LEDGER_FAILURES.with_label_values(&["admission"]).inc();
                    tracing::warn!(
                        endpoint_id = record.endpoint_id,
                        transaction = ?record.transaction,
                        error = %e,
                        "failed to record call admission"
                    );
                }
            }
            LedgerEvent::Completed {
                transaction,
                status_code,
                latency_ms,
            } => match store.complete_call(&transaction, status_code, latency_ms).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!(
                    transaction = %transaction,
                    "no open ledger entry for completed call"
                ),
                Err(e) => {
                    LEDGER_FAILURES.with_label_values(&["completion"]).inc();
                    tracing::warn!(
                        transaction = %transaction,
                        error = %e,
                        "failed to record call completion"
                    );
                }
            },
            LedgerEvent::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("ledger worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        inserted: Mutex<Vec<CallRecord>>,
        completed: Mutex<Vec<(String, u16, u64)>>,
        fail: bool,
    }

    #[async_trait]
    impl LedgerStore for MemoryStore {
        async fn insert_call(&self, record: &CallRecord) -> Result<(), RegistryError> {
            if self.fail {
                return Err(RegistryError::Http("simulated outage".to_string()));
            }
            self.inserted.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn claim_transaction(&self, record: &CallRecord) -> Result<bool, RegistryError> {
            if self.fail {
                return Err(RegistryError::Http("simulated outage".to_string()));
            }
            let mut inserted = self.inserted.lock().unwrap();
            if inserted.iter().any(|r| r.transaction == record.transaction) {
                return Ok(false);
            }
            inserted.push(record.clone());
            Ok(true)
        }

        async fn complete_call(
            &self,
            transaction: &str,
            status_code: u16,
            latency_ms: u64,
        ) -> Result<bool, RegistryError> {
            if self.fail {
                return Err(RegistryError::Http("simulated outage".to_string()));
            }
            let known = self
                .inserted
                .lock()
                .unwrap()
                .iter()
                .any(|r| r.transaction.as_deref() == Some(transaction));
            if known {
                self.completed
                    .lock()
                    .unwrap()
                    .push((transaction.to_string(), status_code, latency_ms));
            }
            Ok(known)
        }
    }

    fn record(tx: Option<&str>) -> CallRecord {
        CallRecord {
            endpoint_id: 1,
            caller_address: "0xpayer".to_string(),
            transaction: tx.map(String::from),
            amount_micro_units: 10_000,
        }
    }

    #[tokio::test]
    async fn test_admission_lands_before_completion() {
        let store = Arc::new(MemoryStore::default());
        let (ledger, _worker) = Ledger::spawn(store.clone(), 16);

        ledger.record_admission(record(Some("0xtx")));
        ledger.record_completion(Some("0xtx"), 200, Duration::from_millis(15));
        ledger.flush().await;

        assert_eq!(store.inserted.lock().unwrap().len(), 1);
        assert_eq!(
            store.completed.lock().unwrap().as_slice(),
            &[("0xtx".to_string(), 200, 15)]
        );
    }

    #[tokio::test]
    async fn test_completion_without_transaction_is_skipped() {
        let store = Arc::new(MemoryStore::default());
        let (ledger, _worker) = Ledger::spawn(store.clone(), 16);

        ledger.record_admission(record(None));
        ledger.record_completion(None, 200, Duration::from_millis(5));
        ledger.flush().await;

        assert_eq!(store.inserted.lock().unwrap().len(), 1);
        assert!(store.completed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failures_stay_inside_worker() {
        let store = Arc::new(MemoryStore {
            fail: true,
            ..Default::default()
        });
        let (ledger, worker) = Ledger::spawn(store, 16);

        ledger.record_admission(record(Some("0xtx")));
        ledger.record_completion(Some("0xtx"), 200, Duration::from_millis(1));
        ledger.flush().await;

        assert!(!worker.is_finished());
    }

    #[tokio::test]
    async fn test_transaction_is_claimed_once() {
        let store = Arc::new(MemoryStore::default());
        let (ledger, _worker) = Ledger::spawn(store.clone(), 16);
        let timeout = Duration::from_secs(1);

        assert_eq!(ledger.admit(record(Some("0xtx")), timeout).await, Admission::Claimed);
        assert_eq!(
            ledger.admit(record(Some("0xtx")), timeout).await,
            Admission::AlreadyUsed
        );
        assert_eq!(ledger.admit(record(Some("0xother")), timeout).await, Admission::Claimed);
        assert_eq!(store.inserted.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_untracked_and_failed_claims_are_queued() {
        let store = Arc::new(MemoryStore::default());
        let (ledger, _worker) = Ledger::spawn(store.clone(), 16);
        assert_eq!(
            ledger.admit(record(None), Duration::from_secs(1)).await,
            Admission::Queued
        );
        ledger.flush().await;
        assert_eq!(store.inserted.lock().unwrap().len(), 1);

        let failing = Arc::new(MemoryStore {
            fail: true,
            ..Default::default()
        });
        let (ledger, _worker) = Ledger::spawn(failing, 16);
        assert_eq!(
            ledger.admit(record(Some("0xtx")), Duration::from_secs(1)).await,
            Admission::Queued
        );
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        // No worker draining: the receiver is held but never polled.
        let (tx, mut rx) = mpsc::channel(1);
        let ledger = Ledger {
            tx,
            store: Arc::new(MemoryStore::default()),
        };

        ledger.record_admission(record(Some("0xa")));
        ledger.record_admission(record(Some("0xb")));
        ledger.record_completion(Some("0xa"), 200, Duration::ZERO);

        assert!(matches!(rx.try_recv(), Ok(LedgerEvent::Admitted(r)) if r.transaction.as_deref() == Some("0xa")));
        assert!(rx.try_recv().is_err());
    }
}
