//! Transaction protocol (spec §4.7 / C7).

use docbase_error::DocbaseError;
use docbase_key::Key;
use docbase_transport::CancellationToken;
use docbase_value::Entity;

use crate::Client;
use crate::mutation::Mutation;

/// Options governing [`Client::run_in_transaction`].
#[derive(Debug, Clone)]
pub struct TransactionOptions {
    /// Attempts allowed before surfacing a conflict-exhaustion error.
    pub max_attempts: u32,
    /// When set, opens a read-only snapshot transaction at this time
    /// instead of a read-write one.
    pub read_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        TransactionOptions {
            max_attempts: 3,
            read_time: None,
        }
    }
}

/// The outcome of a commit: one key per mutation, in mutation order —
/// server-assigned where the mutation carried an incomplete key, the
/// original key otherwise (spec §4.6).
#[derive(Debug, Clone, Default)]
pub struct CommitResult {
    /// Keys assigned to each mutation, in mutation order.
    pub keys: Vec<Key>,
}

/// A handle to an in-flight transaction, passed to the closure given to
/// [`Client::run_in_transaction`].
///
/// `Get` calls the server directly (so reads observe the transaction's
/// snapshot); `Put`/`Delete`/`Mutate` only append to a local mutation
/// buffer flushed by the single `:commit` call at the end.
pub struct Transaction {
    pub(crate) client: Client,
    pub(crate) token: String,
    pub(crate) mutations: Vec<Mutation>,
}

impl Transaction {
    /// Look up one entity within this transaction's snapshot.
    pub async fn get<T: Entity + Default>(
        &self,
        cancel: &CancellationToken,
        key: &Key,
    ) -> docbase_error::Result<T> {
        self.client.lookup_one(cancel, key, Some(&self.token)).await
    }

    /// Look up multiple entities within this transaction's snapshot.
    ///
    /// Fails with [`docbase_error::ErrorKind::NotFound`] if any key is
    /// missing, fanning out over [`Transaction::get`]'s validation.
    pub async fn get_multi<T: Entity + Default>(
        &self,
        cancel: &CancellationToken,
        keys: &[Key],
    ) -> docbase_error::Result<Vec<T>> {
        self.client.lookup_multi(cancel, keys, Some(&self.token)).await
    }

    /// Buffer an upsert; no network call is made until commit.
    pub fn put<T: Entity>(&mut self, key: Key, src: &T) -> docbase_error::Result<()> {
        self.mutations.push(Mutation::upsert(key, src)?);
        Ok(())
    }

    /// Buffer upserts for multiple entities.
    pub fn put_multi<T: Entity>(&mut self, keys: &[Key], srcs: &[T]) -> docbase_error::Result<()> {
        if keys.len() != srcs.len() {
            return Err(DocbaseError::validation("keys and sources must have equal length"));
        }
        for (key, src) in keys.iter().zip(srcs) {
            self.put(key.clone(), src)?;
        }
        Ok(())
    }

    /// Buffer a delete; no network call is made until commit.
    pub fn delete(&mut self, key: Key) {
        self.mutations.push(Mutation::delete(key));
    }

    /// Buffer deletes for multiple keys.
    pub fn delete_multi(&mut self, keys: &[Key]) {
        for key in keys {
            self.delete(key.clone());
        }
    }

    /// Buffer arbitrary insert/update/upsert/delete mutations.
    pub fn mutate(&mut self, mutations: impl IntoIterator<Item = Mutation>) {
        self.mutations.extend(mutations);
    }

    /// Discard everything buffered so far. A fresh transaction's buffer
    /// is already empty, so calling this before any `put`/`delete` is a
    /// no-op; the server is never contacted (spec §4.7, §9).
    pub fn rollback(&mut self) {
        self.mutations.clear();
    }
}
