use crate::entity::{AclPolicy, AclRole, AclToken, EntityStub};
use async_trait::async_trait;

/// One listing page from the primary: the stubs plus the primary's global
/// modification index for that kind at the time of the read.
#[derive(Debug, Clone)]
pub struct ListedStubs {
    pub stubs: Vec<EntityStub>,
    pub index: u64,
}

/// RPC surface of the primary datacenter. The `list_*` calls are
/// blocking-watch style on the real transport: they return once the
/// primary's modification index exceeds `last_index` or an internal timeout
/// fires. The `*_batch` calls are plain bulk fetches by id.
///
/// Transport failures surface as `anyhow::Error`; the replicators translate
/// them into [`crate::Error::Unavailable`].
#[async_trait]
pub trait PrimaryClient: Send + Sync {
    async fn list_tokens(&self, last_index: u64) -> anyhow::Result<ListedStubs>;
    async fn list_policies(&self, last_index: u64) -> anyhow::Result<ListedStubs>;
    async fn list_roles(&self, last_index: u64) -> anyhow::Result<ListedStubs>;

    async fn token_batch(&self, ids: &[String]) -> anyhow::Result<Vec<AclToken>>;
    async fn policy_batch(&self, ids: &[String]) -> anyhow::Result<Vec<AclPolicy>>;
    async fn role_batch(&self, ids: &[String]) -> anyhow::Result<Vec<AclRole>>;
}
