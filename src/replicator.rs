use crate::error::Result;
use crate::ReplicationKind;
use async_trait::async_trait;

/// Borrowed view of one entry in a sorted summary buffer.
#[derive(Debug, Clone, Copy)]
pub struct EntityMeta<'a> {
    pub id: &'a str,
    pub modify_index: u64,
    pub hash: &'a [u8],
}

/// Uniform per-kind operations driven by the replication loop. The loop is
/// agnostic to which kind it is running; everything kind-specific lives
/// behind this trait.
///
/// Buffer discipline: `fetch_remote` and `fetch_local` clear and refill the
/// remote/local summary buffers and return the buffer length alongside the
/// observed index. After `sort_state` both buffers are strictly increasing
/// by id. `fetch_updated` clears and refills the pending-body buffer;
/// implementations keep it sorted by id so batches apply in ascending
/// order.
///
/// `local_meta`, `remote_meta` and `pending_update_estimated_size` panic on
/// out-of-range indexes; the loop only indexes within the lengths it was
/// handed back.
#[async_trait]
pub trait Replicator: Send {
    fn kind(&self) -> ReplicationKind;

    fn singular_noun(&self) -> &'static str {
        self.kind().singular_noun()
    }

    fn plural_noun(&self) -> &'static str {
        self.kind().plural_noun()
    }

    /// Pull the remote summary catalogue observed at `last_remote_index`.
    /// Returns (summary count, primary's index for this kind).
    async fn fetch_remote(&mut self, last_remote_index: u64) -> Result<(usize, u64)>;

    /// Read the local summary catalogue through the FSM snapshot.
    /// Returns (summary count, current local index).
    async fn fetch_local(&mut self) -> Result<(usize, u64)>;

    /// Sort both buffers by id ascending; returns (local len, remote len).
    fn sort_state(&mut self) -> (usize, usize);

    fn local_meta(&self, i: usize) -> EntityMeta<'_>;
    fn remote_meta(&self, i: usize) -> EntityMeta<'_>;

    /// Fetch full bodies for the given ids into the pending buffer.
    /// Returns the number of bodies retrieved.
    async fn fetch_updated(&mut self, ids: &[String]) -> Result<usize>;

    fn len_pending_updates(&self) -> usize;
    fn pending_update_estimated_size(&self, i: usize) -> usize;

    /// Delete the given ids through consensus as one batch.
    async fn delete_local_batch(&self, ids: &[String]) -> Result<()>;

    /// Apply pending bodies `[start, end)` through consensus as one atomic
    /// batch.
    async fn update_local_batch(&self, start: usize, end: usize) -> Result<()>;
}
