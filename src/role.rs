use crate::entity::{AclRole, EntityStub};
use crate::error::{Error, Result};
use crate::fsm::{apply_checked, ApplyRequest, RaftApply, StateReader};
use crate::replicator::{EntityMeta, Replicator};
use crate::rpc::PrimaryClient;
use crate::ReplicationKind;
use async_trait::async_trait;
use std::sync::Arc;

/// Replicates ACL roles. A role may reference policies that have not
/// landed locally yet; that is tolerated, kinds converge independently.
pub struct RoleReplicator {
    client: Arc<dyn PrimaryClient>,
    state: Arc<dyn StateReader>,
    raft: Arc<dyn RaftApply>,
    local: Vec<EntityStub>,
    remote: Vec<EntityStub>,
    updated: Vec<AclRole>,
}

impl RoleReplicator {
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
impl Replicator for RoleReplicator {
    fn kind(&self) -> ReplicationKind {
        ReplicationKind::Roles
    }

    async fn fetch_remote(&mut self, last_remote_index: u64) -> Result<(usize, u64)> {
        self.remote.clear();

        let page = self
            .client
            .list_roles(last_remote_index)
            .await
            .map_err(|source| Error::Unavailable {
                noun: "role",
                source,
            })?;

        self.remote = page.stubs;
        Ok((self.remote.len(), page.index))
    }

    async fn fetch_local(&mut self) -> Result<(usize, u64)> {
        self.local.clear();

        let (idx, stubs) = self
            .state
            .role_stubs()
            .await
            .map_err(|source| Error::StateRead {
                noun: "role",
                source,
            })?;

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
            let mut roles =
                self.client
                    .role_batch(ids)
                    .await
                    .map_err(|source| Error::Unavailable {
                        noun: "role",
                        source,
                    })?;

            roles.sort_by(|a, b| a.id.cmp(&b.id));
            self.updated = roles;
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
        let req = ApplyRequest::RoleBatchDelete { ids: ids.to_vec() };
        apply_checked(self.raft.as_ref(), "role", req).await
    }

    async fn update_local_batch(&self, start: usize, end: usize) -> Result<()> {
        let req = ApplyRequest::RoleBatchSet {
            roles: self.updated[start..end].to_vec(),
        };
        apply_checked(self.raft.as_ref(), "role", req).await
    }
}
