use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel author id used for messages the platform injects into a thread.
pub const SYSTEM_AUTHOR: &str = "system";

/// Public view of a user. The password hash never leaves the db layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    /// Only present when the user is looking at their own account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub avatar: Option<String>,
    pub location: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

/// A user plus the aggregate of the reviews they received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    pub rating: f64,
    pub review_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Reserved,
    Sold,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Reserved => "reserved",
            Self::Sold => "sold",
        }
    }
}

impl FromStr for ListingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "reserved" => Ok(Self::Reserved),
            "sold" => Ok(Self::Sold),
            other => Err(format!("unknown listing status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Condition {
    New,
    LikeNew,
    Used,
    Damaged,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::LikeNew => "like-new",
            Self::Used => "used",
            Self::Damaged => "damaged",
        }
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "like-new" => Ok(Self::LikeNew),
            "used" => Ok(Self::Used),
            "damaged" => Ok(Self::Damaged),
            other => Err(format!("unknown condition '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub seller_name: String,
    pub seller_verified: bool,
    pub title: String,
    pub description: String,
    pub price_cents: i64,
    pub currency: String,
    pub category: String,
    pub condition: Condition,
    pub neighborhood: String,
    pub images: Vec<String>,
    pub status: ListingStatus,
    pub likes: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    pub reviewer_id: Uuid,
    pub reviewer_name: String,
    pub reviewer_avatar: Option<String>,
    pub target_id: Uuid,
    pub listing_id: Option<Uuid>,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

/// Who wrote a message: a participant, or the platform itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Author {
    User(Uuid),
    System,
}

impl Author {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::User(id) => Some(*id),
            Self::System => None,
        }
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "{}", id),
            Self::System => f.write_str(SYSTEM_AUTHOR),
        }
    }
}

impl FromStr for Author {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == SYSTEM_AUTHOR {
            return Ok(Self::System);
        }
        s.parse().map(Self::User)
    }
}

impl From<Author> for String {
    fn from(author: Author) -> Self {
        author.to_string()
    }
}

impl TryFrom<String> for Author {
    type Error = uuid::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Text,
    SystemWarning,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::SystemWarning => "system-warning",
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "system-warning" => Ok(Self::SystemWarning),
            other => Err(format!("unknown message kind '{}'", other)),
        }
    }
}

/// One entry of a thread. `risk_flag` is the only persisted trace of a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub sender: Author,
    pub content: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    pub risk_flag: bool,
}

impl Message {
    pub fn text(thread_id: Uuid, sender: Uuid, content: impl Into<String>, risk_flag: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id,
            sender: Author::User(sender),
            content: content.into(),
            kind: MessageKind::Text,
            created_at: Utc::now(),
            risk_flag,
        }
    }

    pub fn system_warning(thread_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id,
            sender: Author::System,
            content: content.into(),
            kind: MessageKind::SystemWarning,
            created_at: Utc::now(),
            risk_flag: false,
        }
    }

    pub fn is_system_warning(&self) -> bool {
        self.kind == MessageKind::SystemWarning
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub last_message_preview: Option<String>,
    pub last_message_at: DateTime<Utc>,
    pub has_safety_warning: bool,
}

impl Thread {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }

    /// The other participant, from `user_id`'s point of view.
    pub fn counterpart_of(&self, user_id: Uuid) -> Uuid {
        if self.buyer_id == user_id {
            self.seller_id
        } else {
            self.buyer_id
        }
    }
}

/// A thread as rendered in a user's conversation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    #[serde(flatten)]
    pub thread: Thread,
    pub counterpart_id: Uuid,
    pub counterpart_name: String,
    pub counterpart_avatar: Option<String>,
    pub listing_title: String,
    pub listing_image: Option<String>,
}

/// Result of classifying one string at one point in time. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RiskSignal {
    pub live: bool,
    #[serde(rename = "final")]
    pub final_: bool,
}
