use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use parley_types::models::{Channel, ChannelKind, MemberRole, ResolvedChannel};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::store::{ChannelInsert, NewChannel, RecordStore};

/// Steps of a single resolution.
enum Step {
    Lookup,
    Bootstrap,
    MembershipCheck(Channel),
    AutoJoin(Channel),
    Authorized(Channel),
    Denied,
}

/// Turns a route identifier (a channel id or a slug) into a channel the
/// user may read.
///
/// The default channel is created on first access. Public channels are
/// joined automatically. A private channel the user is not a member of is
/// reported as not found, so non-members cannot tell it exists.
pub struct ChannelResolver<S: RecordStore> {
    store: Arc<S>,
    default_slug: String,
}

impl<S: RecordStore> ChannelResolver<S> {
    pub fn new(store: Arc<S>, config: &SyncConfig) -> Self {
        Self {
            store,
            default_slug: config.default_channel_slug.clone(),
        }
    }

    pub async fn resolve(&self, identifier: &str, user_id: Uuid) -> Result<ResolvedChannel, SyncError> {
        let identifier = identifier.trim();
        let mut step = Step::Lookup;
        loop {
            debug!("Resolving '{}' for {}: {:?}", identifier, user_id, StepName(&step));
            step = match step {
                Step::Lookup => match self.lookup(identifier).await? {
                    Some(channel) => Step::MembershipCheck(channel),
                    None if identifier == self.default_slug => Step::Bootstrap,
                    None => Step::Denied,
                },
                Step::Bootstrap => {
                    let insert = self
                        .store
                        .create_channel(NewChannel {
                            slug: self.default_slug.clone(),
                            name: self.default_slug.clone(),
                            kind: ChannelKind::Text,
                            is_private: false,
                            is_direct: false,
                            created_by: user_id,
                        })
                        .await?;
                    match insert {
                        // Created together with the OWNER membership.
                        ChannelInsert::Created(channel) => Step::Authorized(channel),
                        ChannelInsert::Existing(channel) => Step::MembershipCheck(channel),
                    }
                }
                Step::MembershipCheck(channel) => {
                    match self.store.membership(channel.id, user_id).await? {
                        Some(_) => Step::Authorized(channel),
                        None if channel.is_private => Step::Denied,
                        None => Step::AutoJoin(channel),
                    }
                }
                Step::AutoJoin(channel) => {
                    self.store.add_membership(channel.id, user_id, MemberRole::Member).await?;
                    Step::Authorized(channel)
                }
                Step::Authorized(channel) => {
                    let member_count = self.store.member_count(channel.id).await?;
                    return Ok(ResolvedChannel { channel, member_count });
                }
                Step::Denied => {
                    return Err(SyncError::NotFound(format!("channel '{}'", identifier)));
                }
            };
        }
    }

    /// By id when the identifier parses as one, then by slug.
    async fn lookup(&self, identifier: &str) -> Result<Option<Channel>, SyncError> {
        if identifier.is_empty() {
            return Ok(None);
        }
        if let Ok(id) = Uuid::parse_str(identifier) {
            if let Some(channel) = self.store.channel_by_id(id).await? {
                return Ok(Some(channel));
            }
        }
        Ok(self.store.channel_by_slug(identifier).await?)
    }
}

/// Logs a step without dumping the whole channel record.
struct StepName<'a>(&'a Step);

impl std::fmt::Debug for StepName<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Step::Lookup => f.write_str("Lookup"),
            Step::Bootstrap => f.write_str("Bootstrap"),
            Step::MembershipCheck(c) => write!(f, "MembershipCheck({})", c.id),
            Step::AutoJoin(c) => write!(f, "AutoJoin({})", c.id),
            Step::Authorized(c) => write!(f, "Authorized({})", c.id),
            Step::Denied => f.write_str("Denied"),
        }
    }
}
