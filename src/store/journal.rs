//! Persistence seam
//!
//! The stores keep the working set in memory and write every change through a
//! `Journal` before committing it. A failed journal write leaves memory as it
//! was, so the caller can retry.

use async_trait::async_trait;
use tracing::{error, warn};

use crate::model::{Entity, EntityId, Group, GroupId, ResetToken, Ticket, User, UserId};
use crate::types::Result;

/// One persisted mutation
#[derive(Debug, Clone)]
pub enum Change {
    PutUser(User),
    RemoveUser(UserId),
    PutGroup(Group),
    RemoveGroup(GroupId),
    PutEntity(Entity),
    PutTicket(Ticket),
    Bookmark {
        user_id: UserId,
        entity_id: EntityId,
        on: bool,
    },
    PutResetToken(ResetToken),
    RemoveResetToken(String),
}

impl Change {
    pub fn label(&self) -> &'static str {
        match self {
            Change::PutUser(_) => "put_user",
            Change::RemoveUser(_) => "remove_user",
            Change::PutGroup(_) => "put_group",
            Change::RemoveGroup(_) => "remove_group",
            Change::PutEntity(_) => "put_entity",
            Change::PutTicket(_) => "put_ticket",
            Change::Bookmark { .. } => "bookmark",
            Change::PutResetToken(_) => "put_reset_token",
            Change::RemoveResetToken(_) => "remove_reset_token",
        }
    }
}

/// A change paired with the change that undoes it
#[derive(Debug, Clone)]
pub struct Step {
    pub apply: Change,
    pub revert: Change,
}

impl Step {
    pub fn new(apply: Change, revert: Change) -> Self {
        Self { apply, revert }
    }
}

/// Everything needed to rebuild the stores at start-up
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub users: Vec<User>,
    pub groups: Vec<Group>,
    pub entities: Vec<Entity>,
    pub tickets: Vec<Ticket>,
    pub bookmarks: Vec<(UserId, EntityId)>,
    pub reset_tokens: Vec<ResetToken>,
}

#[async_trait]
pub trait Journal: Send + Sync {
    /// Persist a single change
    async fn record(&self, change: &Change) -> Result<()>;

    /// Load the persisted state
    async fn load(&self) -> Result<Snapshot>;

    /// Persist several changes in order. If one fails, the steps already
    /// written are reverted (best effort, newest first) and the error returned.
    async fn commit(&self, steps: &[Step]) -> Result<()> {
        for (index, step) in steps.iter().enumerate() {
            if let Err(e) = self.record(&step.apply).await {
                warn!(change = step.apply.label(), "Journal write failed, reverting: {}", e);
                for done in steps[..index].iter().rev() {
                    if let Err(undo) = self.record(&done.revert).await {
                        error!(change = done.revert.label(), "Journal revert failed: {}", undo);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str;
}

/// Journal that keeps nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullJournal;

#[async_trait]
impl Journal for NullJournal {
    async fn record(&self, _change: &Change) -> Result<()> {
        Ok(())
    }

    async fn load(&self) -> Result<Snapshot> {
        Ok(Snapshot::default())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UserStatus;
    use crate::types::GatekeeperError;
    use std::sync::Mutex;

    /// Records labels and fails on the n-th write
    struct Flaky {
        fail_at: usize,
        seen: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl Journal for Flaky {
        async fn record(&self, change: &Change) -> Result<()> {
            let mut seen = self.seen.lock().unwrap();
            let index = seen.len();
            seen.push(change.label());
            if index == self.fail_at {
                return Err(GatekeeperError::Database("boom".into()));
            }
            Ok(())
        }

        async fn load(&self) -> Result<Snapshot> {
            Ok(Snapshot::default())
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_commit_reverts_written_steps() {
        let journal = Flaky {
            fail_at: 1,
            seen: Mutex::new(Vec::new()),
        };
        let user = User::new("alice", "Alice", String::new(), UserStatus::Pending);
        let steps = vec![
            Step::new(Change::PutUser(user.clone()), Change::RemoveUser(user.id)),
            Step::new(
                Change::RemoveResetToken("t".into()),
                Change::RemoveResetToken("t".into()),
            ),
        ];

        let result = journal.commit(&steps).await;
        assert!(matches!(result, Err(GatekeeperError::Database(_))));
        assert_eq!(
            *journal.seen.lock().unwrap(),
            vec!["put_user", "remove_reset_token", "remove_user"]
        );
    }

    #[tokio::test]
    async fn test_null_journal_accepts_everything() {
        let journal = NullJournal;
        assert!(journal.record(&Change::RemoveGroup(uuid::Uuid::nil())).await.is_ok());
        assert!(journal.load().await.unwrap().users.is_empty());
    }
}
