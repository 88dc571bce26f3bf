use crate::entity::{AclToken, EntityStub};
use crate::error::{Error, Result};
use crate::fsm::{apply_checked, ApplyRequest, RaftApply, StateReader};
use crate::replicator::{EntityMeta, Replicator};
use crate::rpc::PrimaryClient;
use crate::ReplicationKind;
use async_trait::async_trait;
use std::sync::Arc;

/// Replicates ACL tokens, keyed by accessor id throughout.
pub struct TokenReplicator {
    client: Arc<dyn PrimaryClient>,
    state: Arc<dyn StateReader>,
    raft: Arc<dyn RaftApply>,
    local: Vec<EntityStub>,
    remote: Vec<EntityStub>,
    updated: Vec<AclToken>,
}

impl TokenReplicator {
    #[must_use]
    pub fn new(
        client: Arc<dyn PrimaryClient>,
        state: Arc<dyn StateReader>,
        raft: Arc<dyn RaftApply>,
    ) -> Self {
        Self {
            client,
            state,
            raft,
            local: Vec::new(),
            remote: Vec::new(),
            updated: Vec::new(),
        }
    }
}

#[async_trait]
impl Replicator for TokenReplicator {
    fn kind(&self) -> ReplicationKind {
        ReplicationKind::Tokens
    }

    async fn fetch_remote(&mut self, last_remote_index: u64) -> Result<(usize, u64)> {
        self.remote.clear();

        let page = self
            .client
            .list_tokens(last_remote_index)
            .await
            .map_err(|source| Error::Unavailable {
                noun: "token",
                source,
            })?;

        self.remote = page.stubs;
        Ok((self.remote.len(), page.index))
    }

    async fn fetch_local(&mut self) -> Result<(usize, u64)> {
        self.local.clear();

        let (idx, stubs) =
            self.state
                .token_stubs()
                .await
                .map_err(|source| Error::StateRead {
                    noun: "token",
                    source,
                })?;

        // Do not filter by expiration. Expired tokens stay until the
        // primary explicitly deletes them.
        self.local = stubs;
        Ok((self.local.len(), idx))
    }

    fn sort_state(&mut self) -> (usize, usize) {
        self.local.sort_by(|a, b| a.id.cmp(&b.id));
        self.remote.sort_by(|a, b| a.id.cmp(&b.id));

        (self.local.len(), self.remote.len())
    }

    fn local_meta(&self, i: usize) -> EntityMeta<'_> {
        let v = &self.local[i];
        EntityMeta {
            id: &v.id,
            modify_index: v.modify_index,
            hash: &v.hash,
        }
    }

    fn remote_meta(&self, i: usize) -> EntityMeta<'_> {
        let v = &self.remote[i];
        EntityMeta {
            id: &v.id,
            modify_index: v.modify_index,
            hash: &v.hash,
        }
    }

    async fn fetch_updated(&mut self, ids: &[String]) -> Result<usize> {
        self.updated.clear();

        if !ids.is_empty() {
            let mut tokens =
                self.client
                    .token_batch(ids)
                    .await
                    .map_err(|source| Error::Unavailable {
                        noun: "token",
                        source,
                    })?;

            // Again no expiration filtering: bodies are mirrored verbatim.
            tokens.sort_by(|a, b| a.accessor_id.cmp(&b.accessor_id));
            self.updated = tokens;
        }

        Ok(self.updated.len())
    }

    fn len_pending_updates(&self) -> usize {
        self.updated.len()
    }

    fn pending_update_estimated_size(&self, i: usize) -> usize {
        self.updated[i].estimated_size()
    }

    async fn delete_local_batch(&self, ids: &[String]) -> Result<()> {
        let req = ApplyRequest::TokenBatchDelete { ids: ids.to_vec() };
        apply_checked(self.raft.as_ref(), "token", req).await
    }

    async fn update_local_batch(&self, start: usize, end: usize) -> Result<()> {
        // CAS must stay off: the modify indexes in these bodies belong to
        // the primary's log, not ours.
        let req = ApplyRequest::TokenBatchSet {
            tokens: self.updated[start..end].to_vec(),
            cas: false,
        };
        apply_checked(self.raft.as_ref(), "token", req).await
    }
}
