use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, error, info};
use uuid::Uuid;

use parley_db::models::{ChannelRow, MessageRow, NewChannelRow, NewMessageRow, ReactionRow};
use parley_db::{Database, format_timestamp, parse_timestamp};
use parley_gateway::dispatcher::{ChannelSubscription, Dispatcher};
use parley_types::events::GatewayEvent;
use parley_types::models::{
    Channel, ChannelKind, ChannelMembership, MemberRole, Message, MessageMetadata, PageCursor, User,
};

use super::{ChannelInsert, MAX_PAGE_SIZE, MessagePatch, NewChannel, NewMessage, RecordStore, StoreError};
use crate::reactions::{self, ReactionOp};

/// [`RecordStore`] on the SQLite database, announcing every accepted message
/// write on a [`Dispatcher`].
#[derive(Clone)]
pub struct EmbeddedStore {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    /// Last stamp handed out. Message writes hold this lock from stamp to
    /// broadcast, so the feed carries them in commit order.
    clock: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl EmbeddedStore {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self {
            db,
            dispatcher,
            clock: Arc::new(Mutex::new(None)),
        }
    }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let db = Database::open(path)?;
        Ok(Self::new(Arc::new(db), Dispatcher::new()))
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn register_user(
        &self,
        username: &str,
        password_hash: &str,
        display_name: Option<&str>,
    ) -> Result<User, StoreError> {
        let id = Uuid::new_v4();
        let username = username.to_string();
        let password_hash = password_hash.to_string();
        let display_name = display_name.map(str::to_string);
        self.blocking(move |db| {
            if db.get_user_by_username(&username)?.is_some() {
                return Err(StoreError::Conflict(format!("username '{}' is taken", username)));
            }
            db.create_user(&id.to_string(), &username, &password_hash, display_name.as_deref())?;
            let row = db
                .get_user_by_id(&id.to_string())?
                .ok_or_else(|| StoreError::NotFound(format!("user {}", id)))?;
            info!("Registered user {} ({})", row.username, id);
            Ok(User {
                id,
                username: row.username,
                display_name: row.display_name,
                created_at: parse_timestamp(&row.created_at)?,
            })
        })
        .await
    }

    /// Runs `f` on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                StoreError::Task(e)
            })?
    }

    /// Runs a message write on the blocking pool under the clock, handing it
    /// a stamp strictly later than every earlier one.
    async fn write<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database, &Dispatcher, DateTime<Utc>) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let dispatcher = self.dispatcher.clone();
        let clock = self.clock.clone();
        tokio::task::spawn_blocking(move || {
            let mut last = clock.lock().unwrap_or_else(|e| e.into_inner());
            let now = Utc::now().trunc_subsecs(6);
            let stamp = match *last {
                Some(prev) if now <= prev => prev + chrono::Duration::microseconds(1),
                _ => now,
            };
            *last = Some(stamp);
            f(&db, &dispatcher, stamp)
        })
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StoreError::Task(e)
        })?
    }
}

impl RecordStore for EmbeddedStore {
    async fn channel_by_id(&self, id: Uuid) -> Result<Option<Channel>, StoreError> {
        self.blocking(move |db| {
            db.get_channel_by_id(&id.to_string())?
                .map(channel_from_row)
                .transpose()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn channel_by_slug(&self, slug: &str) -> Result<Option<Channel>, StoreError> {
        let slug = slug.to_string();
        self.blocking(move |db| {
            db.get_channel_by_slug(&slug)?
                .map(channel_from_row)
                .transpose()
                .map_err(StoreError::from)
        })
        .await
    }

    async fn create_channel(&self, channel: NewChannel) -> Result<ChannelInsert, StoreError> {
        self.write(move |db, _, stamp| {
            let id = Uuid::new_v4().to_string();
            let created_by = channel.created_by.to_string();
            let created_at = format_timestamp(stamp);
            let created = db.create_channel_with_owner(&NewChannelRow {
                id: &id,
                slug: &channel.slug,
                name: &channel.name,
                kind: channel.kind.as_str(),
                is_private: channel.is_private,
                is_direct: channel.is_direct,
                created_by: &created_by,
                created_at: &created_at,
            })?;
            let row = db
                .get_channel_by_slug(&channel.slug)?
                .ok_or_else(|| StoreError::NotFound(format!("channel '{}'", channel.slug)))?;
            let stored = channel_from_row(row)?;
            if created {
                info!("Created channel {} ({})", stored.slug, stored.id);
                Ok(ChannelInsert::Created(stored))
            } else {
                debug!("Channel slug '{}' already taken by {}", stored.slug, stored.id);
                Ok(ChannelInsert::Existing(stored))
            }
        })
        .await
    }

    async fn membership(&self, channel_id: Uuid, user_id: Uuid) -> Result<Option<ChannelMembership>, StoreError> {
        self.blocking(move |db| {
            let Some(row) = db.get_membership(&channel_id.to_string(), &user_id.to_string())? else {
                return Ok(None);
            };
            let role: MemberRole = row
                .role
                .parse()
                .map_err(|e| anyhow!("membership {}/{}: {}", row.channel_id, row.user_id, e))?;
            Ok(Some(ChannelMembership {
                channel_id,
                user_id,
                role,
            }))
        })
        .await
    }

    async fn add_membership(&self, channel_id: Uuid, user_id: Uuid, role: MemberRole) -> Result<bool, StoreError> {
        self.blocking(move |db| {
            let inserted = db.insert_membership(&channel_id.to_string(), &user_id.to_string(), role.as_str())?;
            if inserted {
                debug!("User {} joined channel {} as {}", user_id, channel_id, role.as_str());
            }
            Ok(inserted)
        })
        .await
    }

    async fn member_count(&self, channel_id: Uuid) -> Result<u64, StoreError> {
        self.blocking(move |db| Ok(db.count_members(&channel_id.to_string())?))
            .await
    }

    async fn messages_page(
        &self,
        channel_id: Uuid,
        before: Option<PageCursor>,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        self.blocking(move |db| {
            let cursor = before.map(|c| (format_timestamp(c.created_at), c.id.to_string()));
            let rows = db.get_messages(
                &channel_id.to_string(),
                limit,
                cursor.as_ref().map(|(at, id)| (at.as_str(), id.as_str())),
            )?;
            Ok(hydrate(db, rows)?)
        })
        .await
    }

    async fn message(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        self.blocking(move |db| Ok(load_message(db, id)?)).await
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        self.write(move |db, dispatcher, stamp| {
            let id = Uuid::new_v4();
            let id_str = id.to_string();
            let channel_id = message.channel_id.to_string();
            let author_id = message.author_id.to_string();
            let nonce = message.nonce.to_string();
            let created_at = format_timestamp(stamp);
            let row = db.insert_message(&NewMessageRow {
                id: &id_str,
                channel_id: &channel_id,
                author_id: &author_id,
                body: &message.body,
                nonce: Some(&nonce),
                created_at: &created_at,
            })?
            .ok_or_else(|| StoreError::Conflict(format!("nonce {} is already in use", nonce)))?;
            let created = row.id == id_str;
            let stored = hydrate(db, vec![row])?
                .pop()
                .ok_or_else(|| StoreError::NotFound(format!("message {}", id)))?;
            if created {
                debug!("Message {} created in {}", stored.id, stored.channel_id);
                dispatcher.broadcast(GatewayEvent::MessageCreate {
                    message: stored.clone(),
                });
            } else {
                debug!("Send with nonce {} already stored as {}", nonce, stored.id);
            }
            Ok(stored)
        })
        .await
    }

    async fn update_message(&self, id: Uuid, patch: MessagePatch) -> Result<Message, StoreError> {
        self.write(move |db, dispatcher, stamp| {
            let current = load_message(db, id)?.ok_or_else(|| StoreError::NotFound(format!("message {}", id)))?;
            let id_str = id.to_string();
            let at = format_timestamp(stamp);

            let (changed, deleting) = match &patch {
                MessagePatch::SoftDelete { .. } if current.is_deleted() => return Ok(current),
                _ if current.is_deleted() => {
                    return Err(StoreError::Conflict(format!("message {} is deleted", id)));
                }
                MessagePatch::Edit { body } => (db.edit_message(&id_str, body, &at)?, false),
                MessagePatch::SoftDelete { by } => (db.soft_delete_message(&id_str, &by.to_string(), &at)?, true),
                MessagePatch::Pin { by } => (db.set_pin(&id_str, Some((by.to_string().as_str(), at.as_str())), &at)?, false),
                MessagePatch::Unpin => (db.set_pin(&id_str, None, &at)?, false),
            };
            if !changed {
                return Err(StoreError::Conflict(format!("message {} was not updated", id)));
            }

            let message = load_message(db, id)?.ok_or_else(|| StoreError::NotFound(format!("message {}", id)))?;
            let event = if deleting {
                GatewayEvent::MessageDelete {
                    message: message.clone(),
                }
            } else {
                GatewayEvent::MessageUpdate {
                    message: message.clone(),
                }
            };
            dispatcher.broadcast(event);
            Ok(message)
        })
        .await
    }

    async fn react(&self, message_id: Uuid, op: ReactionOp, emoji: &str, user_id: Uuid) -> Result<Message, StoreError> {
        let emoji = emoji.to_string();
        self.write(move |db, dispatcher, stamp| {
            let current = load_message(db, message_id)?
                .ok_or_else(|| StoreError::NotFound(format!("message {}", message_id)))?;
            if current.is_deleted() {
                return Err(StoreError::Conflict(format!("message {} is deleted", message_id)));
            }

            let mid = message_id.to_string();
            let uid = user_id.to_string();
            let at = format_timestamp(stamp);
            let changed = match op {
                ReactionOp::Add => db.add_reaction(&mid, &uid, &emoji, &at)?,
                ReactionOp::Remove => db.remove_reaction(&mid, &uid, &emoji)?,
            };
            if !changed {
                return Ok(current);
            }
            db.touch_message(&mid, &at)?;

            let message = load_message(db, message_id)?
                .ok_or_else(|| StoreError::NotFound(format!("message {}", message_id)))?;
            dispatcher.broadcast(GatewayEvent::MessageUpdate {
                message: message.clone(),
            });
            Ok(message)
        })
        .await
    }

    fn subscribe(&self, channel_id: Uuid) -> ChannelSubscription {
        self.dispatcher.subscribe_channel(channel_id)
    }
}

fn parse_id(raw: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| anyhow!("Corrupt id '{}': {}", raw, e))
}

fn parse_optional_timestamp(raw: Option<&str>) -> anyhow::Result<Option<DateTime<Utc>>> {
    raw.map(parse_timestamp).transpose()
}

fn channel_from_row(row: ChannelRow) -> anyhow::Result<Channel> {
    Ok(Channel {
        id: parse_id(&row.id)?,
        kind: row.kind.parse::<ChannelKind>().map_err(|e| anyhow!("channel {}: {}", row.id, e))?,
        slug: row.slug,
        name: row.name,
        is_private: row.is_private,
        is_direct: row.is_direct,
        created_by: parse_id(&row.created_by)?,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
        archived_at: parse_optional_timestamp(row.archived_at.as_deref())?,
    })
}

fn message_from_row(row: MessageRow, reactions: &[ReactionRow]) -> anyhow::Result<Message> {
    let facts = reactions
        .iter()
        .map(|r| parse_id(&r.user_id).map(|user_id| (r.emoji.as_str(), user_id)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let edited_at = parse_optional_timestamp(row.edited_at.as_deref())?;
    let pinned_at = parse_optional_timestamp(row.pinned_at.as_deref())?;
    let deleted_at = parse_optional_timestamp(row.deleted_at.as_deref())?;
    let metadata = MessageMetadata {
        edited: edited_at.is_some(),
        edited_at,
        pinned: pinned_at.is_some(),
        pinned_at,
        pinned_by: row.pinned_by.as_deref().map(parse_id).transpose()?,
        deleted: deleted_at.is_some(),
        deleted_by: row.deleted_by.as_deref().map(parse_id).transpose()?,
        deleted_at,
        reactions: reactions::aggregate(facts),
    };

    Ok(Message {
        id: parse_id(&row.id)?,
        channel_id: parse_id(&row.channel_id)?,
        author_id: parse_id(&row.author_id)?,
        author_username: row.author_username,
        author_display_name: row.author_display_name,
        body: row.body,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
        deleted_at,
        nonce: row.nonce.as_deref().map(parse_id).transpose()?,
        metadata,
    })
}

/// Attaches reactions to rows, batching the reaction query.
fn hydrate(db: &Database, rows: Vec<MessageRow>) -> anyhow::Result<Vec<Message>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut by_message: HashMap<String, Vec<ReactionRow>> = HashMap::new();
    for reaction in db.get_reactions_for_messages(&ids)? {
        by_message.entry(reaction.message_id.clone()).or_default().push(reaction);
    }

    rows.into_iter()
        .map(|row| {
            let reactions = by_message.remove(&row.id).unwrap_or_default();
            message_from_row(row, &reactions)
        })
        .collect()
}

fn load_message(db: &Database, id: Uuid) -> anyhow::Result<Option<Message>> {
    match db.get_message(&id.to_string())? {
        Some(row) => Ok(hydrate(db, vec![row])?.pop()),
        None => Ok(None),
    }
}
