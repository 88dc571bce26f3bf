use crate::entity::{AclPolicy, AclRole, AclToken, EntityStub};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Logical mutation kinds accepted by the replicated log. Sets are
/// insert-or-replace by id; deletes treat missing ids as already done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApplyRequest {
    /// `cas` is always false on the replication path: remote modify indexes
    /// have no meaning in the local log.
    TokenBatchSet { tokens: Vec<AclToken>, cas: bool },
    TokenBatchDelete { ids: Vec<String> },
    PolicyBatchSet { policies: Vec<AclPolicy> },
    PolicyBatchDelete { ids: Vec<String> },
    RoleBatchSet { roles: Vec<AclRole> },
    RoleBatchDelete { ids: Vec<String> },
}

impl ApplyRequest {
    #[must_use]
    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            Self::TokenBatchDelete { .. }
                | Self::PolicyBatchDelete { .. }
                | Self::RoleBatchDelete { .. }
        )
    }
}

/// Result of a consensus apply. The log can deliver a refusal in-band, as
/// the committed value itself; callers must inspect the outcome and never
/// assume transport success means the mutation landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Committed,
    Rejected(String),
}

/// Write path into local ACL state: a single consensus round-trip per call.
#[async_trait]
pub trait RaftApply: Send + Sync {
    async fn apply(&self, req: ApplyRequest) -> anyhow::Result<ApplyOutcome>;
}

/// Apply a request and fold both failure channels (transport error and
/// in-band rejection) into [`crate::Error::ApplyRejected`].
pub async fn apply_checked(
    raft: &dyn RaftApply,
    noun: &'static str,
    req: ApplyRequest,
) -> crate::Result<()> {
    match raft.apply(req).await {
        Ok(ApplyOutcome::Committed) => Ok(()),
        Ok(ApplyOutcome::Rejected(reason)) => Err(crate::Error::ApplyRejected { noun, reason }),
        Err(err) => Err(crate::Error::ApplyRejected {
            noun,
            reason: err.to_string(),
        }),
    }
}

/// Snapshot-consistent read path over the FSM. Token stubs carry only the
/// accessor id, never the secret, and are not filtered by expiration.
#[async_trait]
pub trait StateReader: Send + Sync {
    async fn token_stubs(&self) -> anyhow::Result<(u64, Vec<EntityStub>)>;
    async fn policy_stubs(&self) -> anyhow::Result<(u64, Vec<EntityStub>)>;
    async fn role_stubs(&self) -> anyhow::Result<(u64, Vec<EntityStub>)>;
}

#[derive(Debug, Default)]
struct StateInner {
    log_index: u64,
    tokens: BTreeMap<String, AclToken>,
    policies: BTreeMap<String, AclPolicy>,
    roles: BTreeMap<String, AclRole>,
}

#[derive(Debug, Default)]
struct RejectPlan {
    remaining: u32,
    reason: String,
}

/// In-memory FSM implementing both the apply and read surfaces. Backs the
/// integration tests; `reject_applies` injects in-band refusals the way a
/// log would refuse during leadership loss.
#[derive(Debug, Default)]
pub struct MemoryState {
    inner: RwLock<StateInner>,
    applied: Mutex<Vec<ApplyRequest>>,
    reject: Mutex<RejectPlan>,
}

impl MemoryState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` applies come back `Rejected(reason)`.
    pub fn reject_applies(&self, n: u32, reason: &str) {
        let mut plan = self.reject.lock();
        plan.remaining = n;
        plan.reason = reason.to_string();
    }

    /// Every committed request, in commit order. Rejected applies never
    /// reach the log.
    #[must_use]
    pub fn apply_log(&self) -> Vec<ApplyRequest> {
        self.applied.lock().clone()
    }

    #[must_use]
    pub fn committed_applies(&self) -> usize {
        self.applied.lock().len()
    }

    #[must_use]
    pub fn token(&self, accessor_id: &str) -> Option<AclToken> {
        self.inner.read().tokens.get(accessor_id).cloned()
    }

    #[must_use]
    pub fn policy(&self, id: &str) -> Option<AclPolicy> {
        self.inner.read().policies.get(id).cloned()
    }

    #[must_use]
    pub fn role(&self, id: &str) -> Option<AclRole> {
        self.inner.read().roles.get(id).cloned()
    }

    #[must_use]
    pub fn token_ids(&self) -> Vec<String> {
        self.inner.read().tokens.keys().cloned().collect()
    }

    #[must_use]
    pub fn policy_ids(&self) -> Vec<String> {
        self.inner.read().policies.keys().cloned().collect()
    }

    #[must_use]
    pub fn role_ids(&self) -> Vec<String> {
        self.inner.read().roles.keys().cloned().collect()
    }

    fn commit(&self, req: &ApplyRequest) {
        let mut inner = self.inner.write();
        inner.log_index += 1;
        match req {
            ApplyRequest::TokenBatchSet { tokens, .. } => {
                for token in tokens {
                    inner.tokens.insert(token.accessor_id.clone(), token.clone());
                }
            }
            ApplyRequest::TokenBatchDelete { ids } => {
                for id in ids {
                    inner.tokens.remove(id);
                }
            }
            ApplyRequest::PolicyBatchSet { policies } => {
                for policy in policies {
                    inner.policies.insert(policy.id.clone(), policy.clone());
                }
            }
            ApplyRequest::PolicyBatchDelete { ids } => {
                for id in ids {
                    inner.policies.remove(id);
                }
            }
            ApplyRequest::RoleBatchSet { roles } => {
                for role in roles {
                    inner.roles.insert(role.id.clone(), role.clone());
                }
            }
            ApplyRequest::RoleBatchDelete { ids } => {
                for id in ids {
                    inner.roles.remove(id);
                }
            }
        }
    }
}

#[async_trait]
impl RaftApply for MemoryState {
    async fn apply(&self, req: ApplyRequest) -> anyhow::Result<ApplyOutcome> {
        {
            let mut plan = self.reject.lock();
            if plan.remaining > 0 {
                plan.remaining -= 1;
                return Ok(ApplyOutcome::Rejected(plan.reason.clone()));
            }
        }
        self.commit(&req);
        self.applied.lock().push(req);
        Ok(ApplyOutcome::Committed)
    }
}

#[async_trait]
impl StateReader for MemoryState {
    async fn token_stubs(&self) -> anyhow::Result<(u64, Vec<EntityStub>)> {
        let inner = self.inner.read();
        let stubs = inner.tokens.values().map(AclToken::stub).collect();
        Ok((inner.log_index, stubs))
    }

    async fn policy_stubs(&self) -> anyhow::Result<(u64, Vec<EntityStub>)> {
        let inner = self.inner.read();
        let stubs = inner.policies.values().map(AclPolicy::stub).collect();
        Ok((inner.log_index, stubs))
    }

    async fn role_stubs(&self) -> anyhow::Result<(u64, Vec<EntityStub>)> {
        let inner = self.inner.read();
        let stubs = inner.roles.values().map(AclRole::stub).collect();
        Ok((inner.log_index, stubs))
    }
}
