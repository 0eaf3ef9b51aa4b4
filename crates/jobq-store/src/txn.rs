//! Nested transaction handles.
//!
//! A [`TxHandle`] is either the root of a unit of work, owning the physical
//! transaction, or a child sharing the root's transaction. Children never
//! commit physically; a child that rolls back before committing poisons the
//! root, whose commit then fails with [`TxError::ChildFailed`].
//!
//! ```text
//! root = begin(pool, None, "mark-failed")
//!   child = begin(pool, Some(&root), continue_existing) ──► same physical txn
//!   child.rollback()        (no commit recorded) ──► root poisoned
//! root.commit()  ──► Err(ChildFailed { root, child })
//! root.rollback() ──► physical rollback
//! ```

use async_trait::async_trait;
use sqlx::{MySql, MySqlPool, Transaction};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

/// Transaction handle over an sqlx MySQL transaction.
pub type MySqlTxHandle = TxHandle<Transaction<'static, MySql>>;

/// Physical commit and rollback of a transaction.
#[async_trait]
pub trait TxnControl: Send + 'static {
    async fn commit(self) -> Result<(), sqlx::Error>;
    async fn rollback(self) -> Result<(), sqlx::Error>;
}

#[async_trait]
impl TxnControl for Transaction<'static, MySql> {
    async fn commit(self) -> Result<(), sqlx::Error> {
        Transaction::commit(self).await
    }

    async fn rollback(self) -> Result<(), sqlx::Error> {
        Transaction::rollback(self).await
    }
}

/// Opens physical transactions.
#[async_trait]
pub trait TxnBeginner: Send + Sync {
    type Txn: TxnControl;

    async fn begin_txn(&self) -> Result<Self::Txn, sqlx::Error>;
}

#[async_trait]
impl TxnBeginner for MySqlPool {
    type Txn = Transaction<'static, MySql>;

    async fn begin_txn(&self) -> Result<Self::Txn, sqlx::Error> {
        self.begin().await
    }
}

/// Identity of a handle, used in errors and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnLabel {
    pub id: Uuid,
    pub name: String,
}

impl TxnLabel {
    fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TxnLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.id)
    }
}

/// Transaction errors.
#[derive(Debug, Error)]
pub enum TxError {
    /// A child rolled back without committing, so the root refuses to commit.
    #[error("Commit of transaction {root} refused: child transaction {child} rolled back without committing")]
    ChildFailed { root: TxnLabel, child: TxnLabel },

    /// The physical transaction was already committed or rolled back.
    #[error("Transaction {0} is already finished")]
    Finished(TxnLabel),

    /// The physical begin, commit or rollback failed.
    #[error("Transaction error: {0}")]
    Database(#[from] sqlx::Error),
}

/// How [`begin`] treats an existing handle.
#[derive(Debug, Clone)]
pub struct BeginOptions {
    pub name: String,
    /// Join the caller's transaction as a child instead of opening a new one.
    pub continue_existing: bool,
}

impl BeginOptions {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            continue_existing: false,
        }
    }

    #[must_use]
    pub fn continue_existing(mut self) -> Self {
        self.continue_existing = true;
        self
    }
}

struct Shared<T> {
    root: TxnLabel,
    txn: Mutex<Option<T>>,
    failed_child: parking_lot::Mutex<Option<TxnLabel>>,
}

/// Root or child handle on a shared transaction.
pub struct TxHandle<T> {
    shared: Arc<Shared<T>>,
    role: Role,
}

enum Role {
    Root,
    Child {
        label: TxnLabel,
        committed: AtomicBool,
    },
}

/// Opens a new root transaction, or joins `existing` as a child when the
/// options ask for it.
pub async fn begin<B: TxnBeginner>(
    beginner: &B,
    existing: Option<&TxHandle<B::Txn>>,
    options: BeginOptions,
) -> Result<TxHandle<B::Txn>, TxError> {
    match existing {
        Some(parent) if options.continue_existing => Ok(parent.child(options.name)),
        _ => {
            let txn = beginner.begin_txn().await?;
            Ok(TxHandle::root(options.name, txn))
        }
    }
}

impl<T: TxnControl> TxHandle<T> {
    /// Wraps a physical transaction as a root handle.
    pub fn root(name: impl Into<String>, txn: T) -> Self {
        let root = TxnLabel::new(name);
        debug!(txn = %root, "Began root transaction");
        Self {
            shared: Arc::new(Shared {
                root,
                txn: Mutex::new(Some(txn)),
                failed_child: parking_lot::Mutex::new(None),
            }),
            role: Role::Root,
        }
    }

    /// Creates a child sharing this handle's physical transaction.
    #[must_use]
    pub fn child(&self, name: impl Into<String>) -> Self {
        let label = TxnLabel::new(name);
        debug!(txn = %label, root = %self.shared.root, "Joined existing transaction");
        Self {
            shared: Arc::clone(&self.shared),
            role: Role::Child {
                label,
                committed: AtomicBool::new(false),
            },
        }
    }

    /// Label of this handle.
    #[must_use]
    pub fn label(&self) -> &TxnLabel {
        match &self.role {
            Role::Root => &self.shared.root,
            Role::Child { label, .. } => label,
        }
    }

    #[must_use]
    pub fn is_child(&self) -> bool {
        matches!(self.role, Role::Child { .. })
    }

    /// Exclusive access to the physical transaction for running statements.
    pub async fn connection(&self) -> Result<MappedMutexGuard<'_, T>, TxError> {
        let guard = self.shared.txn.lock().await;
        MutexGuard::try_map(guard, Option::as_mut)
            .map_err(|_| TxError::Finished(self.label().clone()))
    }

    /// Commits the unit of work.
    ///
    /// For a child this only records the commit. For the root it commits
    /// physically unless a child failed.
    pub async fn commit(&self) -> Result<(), TxError> {
        let shared = &self.shared;
        match &self.role {
            Role::Child { committed, .. } => {
                committed.store(true, Ordering::Release);
                Ok(())
            }
            Role::Root => {
                let failed_child = shared.failed_child.lock().clone();
                if let Some(child) = failed_child {
                    warn!(txn = %shared.root, child = %child, "Refusing commit after child rollback");
                    return Err(TxError::ChildFailed {
                        root: shared.root.clone(),
                        child,
                    });
                }
                let txn = shared
                    .txn
                    .lock()
                    .await
                    .take()
                    .ok_or_else(|| TxError::Finished(shared.root.clone()))?;
                txn.commit().await?;
                debug!(txn = %shared.root, "Committed transaction");
                Ok(())
            }
        }
    }

    /// Rolls back the unit of work.
    ///
    /// A child that has not committed poisons its root. The root rolls back
    /// physically; after a commit or an earlier rollback this is a no-op.
    pub async fn rollback(&self) -> Result<(), TxError> {
        let shared = &self.shared;
        match &self.role {
            Role::Child { label, committed } => {
                if !committed.load(Ordering::Acquire) {
                    let mut failed = shared.failed_child.lock();
                    if failed.is_none() {
                        debug!(txn = %label, root = %shared.root, "Child rolled back, poisoning root");
                        *failed = Some(label.clone());
                    }
                }
                Ok(())
            }
            Role::Root => {
                let txn = shared.txn.lock().await.take();
                if let Some(txn) = txn {
                    txn.rollback().await?;
                    debug!(txn = %shared.root, "Rolled back transaction");
                }
                Ok(())
            }
        }
    }
}

impl<T> fmt::Debug for TxHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.role {
            Role::Root => f
                .debug_struct("TxHandle::Root")
                .field("label", &self.shared.root)
                .finish(),
            Role::Child { label, committed } => f
                .debug_struct("TxHandle::Child")
                .field("label", label)
                .field("root", &self.shared.root)
                .field("committed", &committed.load(Ordering::Relaxed))
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Calls {
        begins: AtomicUsize,
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
    }

    impl Calls {
        fn counts(&self) -> (usize, usize, usize) {
            (
                self.begins.load(Ordering::SeqCst),
                self.commits.load(Ordering::SeqCst),
                self.rollbacks.load(Ordering::SeqCst),
            )
        }
    }

    struct FakeTxn {
        calls: Arc<Calls>,
        fail_commit: bool,
    }

    #[async_trait]
    impl TxnControl for FakeTxn {
        async fn commit(self) -> Result<(), sqlx::Error> {
            self.calls.commits.fetch_add(1, Ordering::SeqCst);
            if self.fail_commit {
                return Err(sqlx::Error::PoolClosed);
            }
            Ok(())
        }

        async fn rollback(self) -> Result<(), sqlx::Error> {
            self.calls.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeBeginner {
        calls: Arc<Calls>,
        fail_commit: bool,
    }

    impl FakeBeginner {
        fn new() -> Self {
            Self {
                calls: Arc::new(Calls::default()),
                fail_commit: false,
            }
        }
    }

    #[async_trait]
    impl TxnBeginner for FakeBeginner {
        type Txn = FakeTxn;

        async fn begin_txn(&self) -> Result<FakeTxn, sqlx::Error> {
            self.calls.begins.fetch_add(1, Ordering::SeqCst);
            Ok(FakeTxn {
                calls: Arc::clone(&self.calls),
                fail_commit: self.fail_commit,
            })
        }
    }

    #[tokio::test]
    async fn test_root_commit() {
        let beginner = FakeBeginner::new();
        let tx = begin(&beginner, None, BeginOptions::new("root")).await.unwrap();

        tx.commit().await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(beginner.calls.counts(), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_root_commit_error_propagates() {
        let beginner = FakeBeginner {
            fail_commit: true,
            ..FakeBeginner::new()
        };
        let tx = begin(&beginner, None, BeginOptions::new("root")).await.unwrap();

        assert!(matches!(tx.commit().await, Err(TxError::Database(_))));
    }

    #[tokio::test]
    async fn test_committed_child_lets_root_commit() {
        let beginner = FakeBeginner::new();
        let root = begin(&beginner, None, BeginOptions::new("parent")).await.unwrap();

        let child = begin(
            &beginner,
            Some(&root),
            BeginOptions::new("child").continue_existing(),
        )
        .await
        .unwrap();
        assert!(child.is_child());
        child.commit().await.unwrap();
        child.rollback().await.unwrap();

        root.commit().await.unwrap();
        root.rollback().await.unwrap();

        assert_eq!(beginner.calls.counts(), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_child_rollback_without_commit_poisons_root() {
        let beginner = FakeBeginner::new();
        let root = begin(&beginner, None, BeginOptions::new("parent")).await.unwrap();

        let child = root.child("child");
        let _sibling_never_ran = root.child("sibling");
        child.rollback().await.unwrap();

        match root.commit().await {
            Err(TxError::ChildFailed { root: r, child: c }) => {
                assert_eq!(&r, root.label());
                assert_eq!(&c, child.label());
            }
            other => panic!("expected ChildFailed, got {other:?}"),
        }
        root.rollback().await.unwrap();

        assert_eq!(beginner.calls.counts(), (1, 0, 1));
    }

    #[tokio::test]
    async fn test_grandchild_failure_poisons_root() {
        let beginner = FakeBeginner::new();
        let root = begin(&beginner, None, BeginOptions::new("root")).await.unwrap();
        let child = root.child("child");
        let grandchild = child.child("grandchild");

        grandchild.rollback().await.unwrap();
        child.commit().await.unwrap();

        assert!(matches!(
            root.commit().await,
            Err(TxError::ChildFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_child_opting_for_new_transaction_is_independent() {
        let beginner = FakeBeginner::new();
        let parent = begin(&beginner, None, BeginOptions::new("parent")).await.unwrap();

        let child = begin(&beginner, Some(&parent), BeginOptions::new("child"))
            .await
            .unwrap();
        assert!(!child.is_child());
        child.rollback().await.unwrap();

        parent.commit().await.unwrap();
        parent.rollback().await.unwrap();

        assert_eq!(beginner.calls.counts(), (2, 1, 1));
    }

    #[tokio::test]
    async fn test_connection_after_finish_fails() {
        let beginner = FakeBeginner::new();
        let root = begin(&beginner, None, BeginOptions::new("root")).await.unwrap();
        let child = root.child("child");

        {
            let conn = child.connection().await.unwrap();
            assert!(!conn.fail_commit);
        }
        root.commit().await.unwrap();

        assert!(matches!(child.connection().await, Err(TxError::Finished(_))));
        assert!(matches!(root.commit().await, Err(TxError::Finished(_))));
    }
}
