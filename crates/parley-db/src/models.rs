//! Database row types. These map directly to SQLite rows.
//! Distinct from parley-types models to keep the DB layer independent.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ChannelRow {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub kind: String,
    pub is_private: bool,
    pub is_direct: bool,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
    pub archived_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MembershipRow {
    pub channel_id: String,
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub author_id: String,
    pub author_username: String,
    pub author_display_name: Option<String>,
    pub body: String,
    pub nonce: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub edited_at: Option<String>,
    pub pinned_at: Option<String>,
    pub pinned_by: Option<String>,
    pub deleted_at: Option<String>,
    pub deleted_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
}

/// Insert parameters for a new message.
pub struct NewMessageRow<'a> {
    pub id: &'a str,
    pub channel_id: &'a str,
    pub author_id: &'a str,
    pub body: &'a str,
    pub nonce: Option<&'a str>,
    pub created_at: &'a str,
}

/// Insert parameters for a new channel.
pub struct NewChannelRow<'a> {
    pub id: &'a str,
    pub slug: &'a str,
    pub name: &'a str,
    pub kind: &'a str,
    pub is_private: bool,
    pub is_direct: bool,
    pub created_by: &'a str,
    pub created_at: &'a str,
}
