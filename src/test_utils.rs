use crate::entity::{AclPolicy, AclRole, AclToken, EntityStub};
use crate::fsm::MemoryState;
use crate::policy::PolicyReplicator;
use crate::role::RoleReplicator;
use crate::rpc::{ListedStubs, PrimaryClient};
use crate::token::TokenReplicator;
use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Default)]
struct PrimaryInner {
    index: u64,
    tokens: BTreeMap<String, AclToken>,
    policies: BTreeMap<String, AclPolicy>,
    roles: BTreeMap<String, AclRole>,
}

/// In-memory stand-in for the primary datacenter. Mutations bump a single
/// modification index the way a log-backed store would; lists return
/// immediately instead of blocking-watching.
#[derive(Debug, Default)]
pub struct MemoryPrimary {
    inner: RwLock<PrimaryInner>,
    /// Remaining injected failures, keyed by RPC name ("list_tokens",
    /// "token_batch", ...).
    outages: DashMap<&'static str, u32>,
}

impl MemoryPrimary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of the named RPC fail with a transport
    /// error.
    pub fn fail_next(&self, rpc: &'static str, times: u32) {
        self.outages.insert(rpc, times);
    }

    fn check_outage(&self, rpc: &'static str) -> anyhow::Result<()> {
        if let Some(mut remaining) = self.outages.get_mut(rpc) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(anyhow!("injected {rpc} outage"));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn index(&self) -> u64 {
        self.inner.read().index
    }

    /// Jump the modification index forward, so tests can pin entities at
    /// specific indexes.
    pub fn set_index(&self, index: u64) {
        let mut inner = self.inner.write();
        assert!(index >= inner.index, "index only moves forward");
        inner.index = index;
    }

    pub fn put_token(&self, mut token: AclToken) -> AclToken {
        let mut inner = self.inner.write();
        inner.index += 1;
        if token.create_index == 0 {
            token.create_index = inner.index;
        }
        token.modify_index = inner.index;
        token.hash = token.compute_hash();
        inner
            .tokens
            .insert(token.accessor_id.clone(), token.clone());
        token
    }

    pub fn delete_token(&self, accessor_id: &str) {
        let mut inner = self.inner.write();
        inner.index += 1;
        inner.tokens.remove(accessor_id);
    }

    pub fn put_policy(&self, mut policy: AclPolicy) -> AclPolicy {
        let mut inner = self.inner.write();
        inner.index += 1;
        if policy.create_index == 0 {
            policy.create_index = inner.index;
        }
        policy.modify_index = inner.index;
        policy.hash = policy.compute_hash();
        inner.policies.insert(policy.id.clone(), policy.clone());
        policy
    }

    pub fn delete_policy(&self, id: &str) {
        let mut inner = self.inner.write();
        inner.index += 1;
        inner.policies.remove(id);
    }

    pub fn put_role(&self, mut role: AclRole) -> AclRole {
        let mut inner = self.inner.write();
        inner.index += 1;
        if role.create_index == 0 {
            role.create_index = inner.index;
        }
        role.modify_index = inner.index;
        role.hash = role.compute_hash();
        inner.roles.insert(role.id.clone(), role.clone());
        role
    }

    pub fn delete_role(&self, id: &str) {
        let mut inner = self.inner.write();
        inner.index += 1;
        inner.roles.remove(id);
    }
}

#[async_trait]
impl PrimaryClient for MemoryPrimary {
    async fn list_tokens(&self, _last_index: u64) -> anyhow::Result<ListedStubs> {
        self.check_outage("list_tokens")?;
        let inner = self.inner.read();
        Ok(ListedStubs {
            stubs: inner.tokens.values().map(AclToken::stub).collect(),
            index: inner.index,
        })
    }

    async fn list_policies(&self, _last_index: u64) -> anyhow::Result<ListedStubs> {
        self.check_outage("list_policies")?;
        let inner = self.inner.read();
        Ok(ListedStubs {
            stubs: inner.policies.values().map(AclPolicy::stub).collect(),
            index: inner.index,
        })
    }

    async fn list_roles(&self, _last_index: u64) -> anyhow::Result<ListedStubs> {
        self.check_outage("list_roles")?;
        let inner = self.inner.read();
        Ok(ListedStubs {
            stubs: inner.roles.values().map(AclRole::stub).collect(),
            index: inner.index,
        })
    }

    async fn token_batch(&self, ids: &[String]) -> anyhow::Result<Vec<AclToken>> {
        self.check_outage("token_batch")?;
        let inner = self.inner.read();
        Ok(ids
            .iter()
            .filter_map(|id| inner.tokens.get(id).cloned())
            .collect())
    }

    async fn policy_batch(&self, ids: &[String]) -> anyhow::Result<Vec<AclPolicy>> {
        self.check_outage("policy_batch")?;
        let inner = self.inner.read();
        Ok(ids
            .iter()
            .filter_map(|id| inner.policies.get(id).cloned())
            .collect())
    }

    async fn role_batch(&self, ids: &[String]) -> anyhow::Result<Vec<AclRole>> {
        self.check_outage("role_batch")?;
        let inner = self.inner.read();
        Ok(ids
            .iter()
            .filter_map(|id| inner.roles.get(id).cloned())
            .collect())
    }
}

#[must_use]
pub fn test_token(description: &str) -> AclToken {
    AclToken {
        accessor_id: Uuid::new_v4().to_string(),
        secret_id: Uuid::new_v4().to_string(),
        description: description.to_string(),
        policies: Vec::new(),
        roles: Vec::new(),
        local: false,
        expiration_time: None,
        create_index: 0,
        modify_index: 0,
        hash: Bytes::new(),
    }
}

#[must_use]
pub fn test_policy(name: &str) -> AclPolicy {
    AclPolicy {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        description: String::new(),
        rules: format!("service \"{name}\" {{ policy = \"read\" }}"),
        datacenters: Vec::new(),
        create_index: 0,
        modify_index: 0,
        hash: Bytes::new(),
    }
}

#[must_use]
pub fn test_role(name: &str) -> AclRole {
    AclRole {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        description: String::new(),
        policy_ids: Vec::new(),
        create_index: 0,
        modify_index: 0,
        hash: Bytes::new(),
    }
}

#[must_use]
pub fn token_replicator(
    primary: &Arc<MemoryPrimary>,
    fsm: &Arc<MemoryState>,
) -> TokenReplicator {
    TokenReplicator::new(primary.clone(), fsm.clone(), fsm.clone())
}

#[must_use]
pub fn policy_replicator(
    primary: &Arc<MemoryPrimary>,
    fsm: &Arc<MemoryState>,
) -> PolicyReplicator {
    PolicyReplicator::new(primary.clone(), fsm.clone(), fsm.clone())
}

#[must_use]
pub fn role_replicator(primary: &Arc<MemoryPrimary>, fsm: &Arc<MemoryState>) -> RoleReplicator {
    RoleReplicator::new(primary.clone(), fsm.clone(), fsm.clone())
}

/// Stub with an arbitrary hash, for driving the diff engine directly.
#[must_use]
pub fn stub(id: &str, modify_index: u64, hash: &str) -> EntityStub {
    EntityStub {
        id: id.to_string(),
        modify_index,
        hash: Bytes::copy_from_slice(hash.as_bytes()),
    }
}
