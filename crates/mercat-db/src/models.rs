//! Database row types. These map directly to SQLite rows and are kept apart
//! from the mercat-types models so the schema can change independently.
//! `TryFrom` impls do the parsing; a failure there means a corrupt row.

use anyhow::{Context, Error, Result, anyhow};

use mercat_types::models::{
    Author, Listing, Message, Review, Thread, ThreadSummary, User,
};

use crate::parse_ts;

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub avatar: Option<String>,
    pub location: String,
    pub verified: bool,
    pub created_at: String,
}

pub struct ListingRow {
    pub id: String,
    pub seller_id: String,
    pub seller_name: String,
    pub seller_verified: bool,
    pub title: String,
    pub description: String,
    pub price_cents: i64,
    pub currency: String,
    pub category: String,
    pub condition: String,
    pub neighborhood: String,
    /// JSON array of image URLs.
    pub images: String,
    pub status: String,
    pub likes: u32,
    pub created_at: String,
}

pub struct ThreadRow {
    pub id: String,
    pub listing_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub last_message: Option<String>,
    pub last_message_at: String,
    pub has_safety_warning: bool,
}

/// A thread joined with its listing and the counterpart's user row.
pub struct ThreadSummaryRow {
    pub thread: ThreadRow,
    pub counterpart_name: Option<String>,
    pub counterpart_avatar: Option<String>,
    pub listing_title: String,
    pub listing_images: String,
}

pub struct MessageRow {
    pub id: String,
    pub thread_id: String,
    pub sender_id: String,
    pub content: String,
    pub kind: String,
    pub risk_flag: bool,
    pub created_at: String,
}

pub struct ReviewRow {
    pub id: String,
    pub reviewer_id: String,
    pub reviewer_name: String,
    pub reviewer_avatar: Option<String>,
    pub target_id: String,
    pub listing_id: Option<String>,
    pub rating: u8,
    pub comment: String,
    pub created_at: String,
}

impl TryFrom<UserRow> for User {
    type Error = Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: row.id.parse().with_context(|| format!("corrupt user id '{}'", row.id))?,
            name: row.name,
            email: Some(row.email),
            avatar: row.avatar,
            location: row.location,
            verified: row.verified,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

impl TryFrom<ListingRow> for Listing {
    type Error = Error;

    fn try_from(row: ListingRow) -> Result<Self> {
        Ok(Listing {
            id: row.id.parse().with_context(|| format!("corrupt listing id '{}'", row.id))?,
            seller_id: row
                .seller_id
                .parse()
                .with_context(|| format!("corrupt seller_id on listing '{}'", row.id))?,
            seller_name: row.seller_name,
            seller_verified: row.seller_verified,
            title: row.title,
            description: row.description,
            price_cents: row.price_cents,
            currency: row.currency,
            category: row.category,
            condition: row.condition.parse().map_err(|e: String| anyhow!(e))?,
            neighborhood: row.neighborhood,
            images: serde_json::from_str(&row.images)
                .with_context(|| format!("corrupt images on listing '{}'", row.id))?,
            status: row.status.parse().map_err(|e: String| anyhow!(e))?,
            likes: row.likes,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

impl TryFrom<ThreadRow> for Thread {
    type Error = Error;

    fn try_from(row: ThreadRow) -> Result<Self> {
        Ok(Thread {
            id: row.id.parse().with_context(|| format!("corrupt thread id '{}'", row.id))?,
            listing_id: row.listing_id.parse()?,
            buyer_id: row.buyer_id.parse()?,
            seller_id: row.seller_id.parse()?,
            last_message_preview: row.last_message,
            last_message_at: parse_ts(&row.last_message_at)?,
            has_safety_warning: row.has_safety_warning,
        })
    }
}

impl ThreadSummaryRow {
    /// Builds the summary as seen by `viewer_id`.
    pub fn into_summary(self, viewer_id: uuid::Uuid) -> Result<ThreadSummary> {
        let thread = Thread::try_from(self.thread)?;
        let images: Vec<String> = serde_json::from_str(&self.listing_images).unwrap_or_default();
        Ok(ThreadSummary {
            counterpart_id: thread.counterpart_of(viewer_id),
            counterpart_name: self.counterpart_name.unwrap_or_else(|| "Unknown".to_string()),
            counterpart_avatar: self.counterpart_avatar,
            listing_title: self.listing_title,
            listing_image: images.into_iter().next(),
            thread,
        })
    }
}

impl From<&Message> for MessageRow {
    fn from(message: &Message) -> Self {
        MessageRow {
            id: message.id.to_string(),
            thread_id: message.thread_id.to_string(),
            sender_id: message.sender.to_string(),
            content: message.content.clone(),
            kind: message.kind.as_str().to_string(),
            risk_flag: message.risk_flag,
            created_at: crate::format_ts(message.created_at),
        }
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: row.id.parse().with_context(|| format!("corrupt message id '{}'", row.id))?,
            thread_id: row.thread_id.parse()?,
            sender: row
                .sender_id
                .parse::<Author>()
                .with_context(|| format!("corrupt sender '{}' on message '{}'", row.sender_id, row.id))?,
            content: row.content,
            kind: row.kind.parse().map_err(|e: String| anyhow!(e))?,
            created_at: parse_ts(&row.created_at)?,
            risk_flag: row.risk_flag,
        })
    }
}

impl TryFrom<ReviewRow> for Review {
    type Error = Error;

    fn try_from(row: ReviewRow) -> Result<Self> {
        Ok(Review {
            id: row.id.parse().with_context(|| format!("corrupt review id '{}'", row.id))?,
            reviewer_id: row.reviewer_id.parse()?,
            reviewer_name: row.reviewer_name,
            reviewer_avatar: row.reviewer_avatar,
            target_id: row.target_id.parse()?,
            listing_id: row.listing_id.map(|id| id.parse()).transpose()?,
            rating: row.rating,
            comment: row.comment,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}
