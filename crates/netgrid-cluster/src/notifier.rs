//! Notifier — concurrent fan-out of an operation to peer members.
//!
//! The caller supplies a closure invoked once per in-scope peer with a
//! client already scoped to that member. All invocations run
//! concurrently; the first error (if any) is returned once every peer
//! has been attempted.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::debug;

use netgrid_catalog::MemberRecord;

use crate::client::{MemberClient, MemberClientFactory};
use crate::{ClusterError, ClusterResult};

/// Which peers a notification reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyScope {
    /// Every peer; any unreachable peer fails the operation.
    All,
    /// Only peers currently considered alive.
    Alive,
}

type NotifyFuture = Pin<Box<dyn Future<Output = ClusterResult<()>> + Send>>;

/// Fan-out handle over a fixed membership snapshot.
pub struct Notifier {
    members: Vec<MemberRecord>,
    factory: Arc<dyn MemberClientFactory>,
}

impl Notifier {
    pub(crate) fn new(members: Vec<MemberRecord>, factory: Arc<dyn MemberClientFactory>) -> Self {
        Self { members, factory }
    }

    /// Peers in scope for this notifier.
    pub fn members(&self) -> &[MemberRecord] {
        &self.members
    }

    /// Invoke `f` against every peer concurrently and return the first
    /// error, or `Ok` when every peer succeeded.
    pub async fn notify<F>(&self, f: F) -> ClusterResult<()>
    where
        F: Fn(MemberRecord, Arc<dyn MemberClient>) -> NotifyFuture,
    {
        let mut tasks = JoinSet::new();
        for member in &self.members {
            let client = self.factory.client(member);
            tasks.spawn(f(member.clone(), client));
        }

        let mut first_error: Option<ClusterError> = None;
        while let Some(result) = tasks.join_next().await {
            let outcome = result
                .map_err(|e| ClusterError::Transport(format!("notify task failed: {e}")))?;
            if let Err(e) = outcome {
                debug!(error = %e, "peer notification failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
