use crate::fsm::{RaftApply, StateReader};
use crate::policy::PolicyReplicator;
use crate::replication::{self, KindState, KindStatus, ReplicationConfig};
use crate::role::RoleReplicator;
use crate::rpc::PrimaryClient;
use crate::token::TokenReplicator;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Owns the three per-kind loops on the secondary leader. Start on
/// leadership acquisition, stop on loss; the loops observe the shared
/// cancellation channel at every sleep and between any two applies.
pub struct Supervisor {
    client: Arc<dyn PrimaryClient>,
    state: Arc<dyn StateReader>,
    raft: Arc<dyn RaftApply>,
    cfg: ReplicationConfig,
    tokens: Arc<KindState>,
    policies: Arc<KindState>,
    roles: Arc<KindState>,
    running: Option<Running>,
}

struct Running {
    cancel: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplicationStatus {
    pub running: bool,
    pub tokens: KindStatus,
    pub policies: KindStatus,
    pub roles: KindStatus,
}

impl Supervisor {
    #[must_use]
    pub fn new(
        client: Arc<dyn PrimaryClient>,
        state: Arc<dyn StateReader>,
        raft: Arc<dyn RaftApply>,
        cfg: ReplicationConfig,
    ) -> Self {
        Self {
            client,
            state,
            raft,
            cfg,
            tokens: Arc::new(KindState::new()),
            policies: Arc::new(KindState::new()),
            roles: Arc::new(KindState::new()),
            running: None,
        }
    }

    /// Spawn one loop per kind. Idempotent while already running.
    pub fn start(&mut self) {
        if self.running.is_some() {
            return;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);

        let token_replicator = TokenReplicator::new(
            self.client.clone(),
            self.state.clone(),
            self.raft.clone(),
        );
        let policy_replicator = PolicyReplicator::new(
            self.client.clone(),
            self.state.clone(),
            self.raft.clone(),
        );
        let role_replicator = RoleReplicator::new(
            self.client.clone(),
            self.state.clone(),
            self.raft.clone(),
        );

        let handles = vec![
            tokio::spawn(replication::run(
                Box::new(token_replicator),
                self.cfg.clone(),
                self.tokens.clone(),
                cancel_rx.clone(),
            )),
            tokio::spawn(replication::run(
                Box::new(policy_replicator),
                self.cfg.clone(),
                self.policies.clone(),
                cancel_rx.clone(),
            )),
            tokio::spawn(replication::run(
                Box::new(role_replicator),
                self.cfg.clone(),
                self.roles.clone(),
                cancel_rx,
            )),
        ];

        self.running = Some(Running {
            cancel: cancel_tx,
            handles,
        });
        info!("ACL replication enabled");
    }

    /// Cancel all loops and wait for them to release. An apply already in
    /// flight at the consensus layer still completes; nothing further is
    /// issued.
    pub async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.cancel.send(true);
            for handle in running.handles {
                let _ = handle.await;
            }
            info!("ACL replication disabled");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    #[must_use]
    pub fn status(&self) -> ReplicationStatus {
        ReplicationStatus {
            running: self.running.is_some(),
            tokens: self.tokens.status(),
            policies: self.policies.status(),
            roles: self.roles.status(),
        }
    }
}
