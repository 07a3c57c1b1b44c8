use crate::models::{ListingRow, MessageRow, ReviewRow, ThreadRow, ThreadSummaryRow, UserRow};
use crate::Database;
use anyhow::{Result, bail};
use rusqlite::{Connection, Row};
use std::sync::atomic::{AtomicBool, Ordering};

/// Filter value the clients send to mean "no filter".
pub const ANY_FILTER: &str = "Todos";

pub const DEFAULT_LISTING_LIMIT: u32 = 50;
pub const MAX_LISTING_LIMIT: u32 = 200;

/// Browse filter for listings. Sold listings are never returned.
#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    /// Case-insensitive substring of the title or description.
    pub search: Option<String>,
    pub category: Option<String>,
    pub neighborhood: Option<String>,
    pub limit: Option<u32>,
}

fn active_filter(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != ANY_FILTER)
}

const LISTING_COLUMNS: &str = "l.id, l.seller_id, u.name, u.verified, l.title, l.description, l.price_cents,
     l.currency, l.category, l.condition, l.neighborhood, l.images, l.status, l.likes, l.created_at";

const THREAD_COLUMNS: &str =
    "t.id, t.listing_id, t.buyer_id, t.seller_id, t.last_message, t.last_message_at, t.has_safety_warning";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        name: &str,
        email: &str,
        password_hash: &str,
        location: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, password, location, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, name, email, password_hash, location, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Average rating and number of reviews received by a user.
    pub fn get_rating_summary(&self, user_id: &str) -> Result<(Option<f64>, u32)> {
        self.with_conn(|conn| {
            let summary = conn.query_row(
                "SELECT AVG(rating), COUNT(*) FROM reviews WHERE target_id = ?1",
                [user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(summary)
        })
    }

    // -- Listings --

    pub fn insert_listing(&self, listing: &ListingRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO listings (id, seller_id, title, description, price_cents, currency, category,
                                       condition, neighborhood, images, status, likes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                rusqlite::params![
                    listing.id,
                    listing.seller_id,
                    listing.title,
                    listing.description,
                    listing.price_cents,
                    listing.currency,
                    listing.category,
                    listing.condition,
                    listing.neighborhood,
                    listing.images,
                    listing.status,
                    listing.likes,
                    listing.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_listing(&self, id: &str) -> Result<Option<ListingRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM listings l JOIN users u ON u.id = l.seller_id WHERE l.id = ?1",
                LISTING_COLUMNS
            );
            let row = conn.query_row(&sql, [id], listing_from_row).optional()?;
            Ok(row)
        })
    }

    pub fn list_listings(&self, filter: &ListingFilter) -> Result<Vec<ListingRow>> {
        let mut clauses = vec!["l.status != 'sold'".to_string()];
        let mut params: Vec<String> = Vec::new();

        if let Some(search) = active_filter(&filter.search) {
            // LIKE only folds ASCII; casefold() lowercases the full Unicode range.
            params.push(search.to_lowercase());
            let idx = params.len();
            clauses.push(format!(
                "(instr(casefold(l.title), ?{idx}) > 0 OR instr(casefold(l.description), ?{idx}) > 0)"
            ));
        }
        if let Some(category) = active_filter(&filter.category) {
            params.push(category.to_string());
            clauses.push(format!("l.category = ?{}", params.len()));
        }
        if let Some(neighborhood) = active_filter(&filter.neighborhood) {
            params.push(neighborhood.to_string());
            clauses.push(format!("l.neighborhood = ?{}", params.len()));
        }

        let limit = filter
            .limit
            .unwrap_or(DEFAULT_LISTING_LIMIT)
            .clamp(1, MAX_LISTING_LIMIT);
        let sql = format!(
            "SELECT {} FROM listings l JOIN users u ON u.id = l.seller_id
             WHERE {}
             ORDER BY l.created_at DESC
             LIMIT {}",
            LISTING_COLUMNS,
            clauses.join(" AND "),
            limit
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), listing_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false when no listing has this id.
    pub fn update_listing_status(&self, id: &str, status: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE listings SET status = ?2 WHERE id = ?1",
                rusqlite::params![id, status],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Threads --

    /// Returns the thread for (listing, buyer, seller), creating it with
    /// `id` if none exists yet.
    pub fn get_or_create_thread(
        &self,
        id: &str,
        listing_id: &str,
        buyer_id: &str,
        seller_id: &str,
        now: &str,
    ) -> Result<ThreadRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO threads (id, listing_id, buyer_id, seller_id, last_message_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, listing_id, buyer_id, seller_id, now],
            )?;
            let sql = format!(
                "SELECT {} FROM threads t WHERE t.listing_id = ?1 AND t.buyer_id = ?2 AND t.seller_id = ?3",
                THREAD_COLUMNS
            );
            let row = conn.query_row(&sql, rusqlite::params![listing_id, buyer_id, seller_id], thread_from_row)?;
            Ok(row)
        })
    }

    pub fn get_thread(&self, id: &str) -> Result<Option<ThreadRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM threads t WHERE t.id = ?1", THREAD_COLUMNS);
            let row = conn.query_row(&sql, [id], thread_from_row).optional()?;
            Ok(row)
        })
    }

    /// Threads where the user is buyer or seller, most recent activity first.
    pub fn get_thread_summaries(&self, user_id: &str) -> Result<Vec<ThreadSummaryRow>> {
        self.with_conn(|conn| {
            // JOIN the counterpart and the listing in one query (no N+1)
            let sql = format!(
                "SELECT {}, u.name, u.avatar, l.title, l.images
                 FROM threads t
                 JOIN listings l ON l.id = t.listing_id
                 LEFT JOIN users u
                   ON u.id = CASE WHEN t.buyer_id = ?1 THEN t.seller_id ELSE t.buyer_id END
                 WHERE t.buyer_id = ?1 OR t.seller_id = ?1
                 ORDER BY t.last_message_at DESC",
                THREAD_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ThreadSummaryRow {
                        thread: thread_from_row(row)?,
                        counterpart_name: row.get(7)?,
                        counterpart_avatar: row.get(8)?,
                        listing_title: row.get(9)?,
                        listing_images: row.get(10)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Appends messages to a thread in one transaction, keeping the thread's
    /// preview and safety flag current. Returns false if the thread does not
    /// exist, in which case nothing is written.
    ///
    /// Rows whose id is already stored are skipped. If `cancelled` is set by
    /// the time the rows are written, the transaction is rolled back and an
    /// error returned instead of committing.
    pub fn insert_messages(&self, thread_id: &str, messages: &[MessageRow], cancelled: &AtomicBool) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM threads WHERE id = ?1)",
                [thread_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Ok(false);
            }

            for m in messages {
                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO messages (id, thread_id, sender_id, content, kind, risk_flag, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![m.id, thread_id, m.sender_id, m.content, m.kind, m.risk_flag, m.created_at],
                )?;
                if inserted == 0 {
                    continue;
                }

                if m.kind == "text" {
                    tx.execute(
                        "UPDATE threads SET last_message = ?2, last_message_at = ?3 WHERE id = ?1",
                        rusqlite::params![thread_id, m.content, m.created_at],
                    )?;
                }
                if m.risk_flag || m.kind == "system-warning" {
                    tx.execute("UPDATE threads SET has_safety_warning = 1 WHERE id = ?1", [thread_id])?;
                }
            }

            if cancelled.load(Ordering::Acquire) {
                // Dropping the transaction rolls it back.
                bail!("append to thread {} abandoned by its caller", thread_id);
            }
            tx.commit()?;
            Ok(true)
        })
    }

    pub fn get_messages(&self, thread_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, thread_id))
    }

    // -- Reviews --

    pub fn insert_review(
        &self,
        id: &str,
        reviewer_id: &str,
        target_id: &str,
        listing_id: Option<&str>,
        rating: u8,
        comment: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO reviews (id, reviewer_id, target_id, listing_id, rating, comment, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![id, reviewer_id, target_id, listing_id, rating, comment, created_at],
            )?;
            Ok(())
        })
    }

    /// Reviews received by a user, newest first, with reviewer details.
    pub fn get_reviews_for_user(&self, target_id: &str) -> Result<Vec<ReviewRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.reviewer_id, u.name, u.avatar, r.target_id, r.listing_id, r.rating, r.comment, r.created_at
                 FROM reviews r
                 LEFT JOIN users u ON u.id = r.reviewer_id
                 WHERE r.target_id = ?1
                 ORDER BY r.created_at DESC",
            )?;
            let rows = stmt
                .query_map([target_id], |row| {
                    Ok(ReviewRow {
                        id: row.get(0)?,
                        reviewer_id: row.get(1)?,
                        reviewer_name: row
                            .get::<_, Option<String>>(2)?
                            .unwrap_or_else(|| "Unknown".to_string()),
                        reviewer_avatar: row.get(3)?,
                        target_id: row.get(4)?,
                        listing_id: row.get(5)?,
                        rating: row.get(6)?,
                        comment: row.get(7)?,
                        created_at: row.get(8)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, name, email, password, avatar, location, verified, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                password: row.get(3)?,
                avatar: row.get(4)?,
                location: row.get(5)?,
                verified: row.get(6)?,
                created_at: row.get(7)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_messages(conn: &Connection, thread_id: &str) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, thread_id, sender_id, content, kind, risk_flag, created_at
         FROM messages
         WHERE thread_id = ?1
         ORDER BY seq ASC",
    )?;

    let rows = stmt
        .query_map([thread_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                thread_id: row.get(1)?,
                sender_id: row.get(2)?,
                content: row.get(3)?,
                kind: row.get(4)?,
                risk_flag: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<ListingRow> {
    Ok(ListingRow {
        id: row.get(0)?,
        seller_id: row.get(1)?,
        seller_name: row.get(2)?,
        seller_verified: row.get(3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        price_cents: row.get(6)?,
        currency: row.get(7)?,
        category: row.get(8)?,
        condition: row.get(9)?,
        neighborhood: row.get(10)?,
        images: row.get(11)?,
        status: row.get(12)?,
        likes: row.get(13)?,
        created_at: row.get(14)?,
    })
}

fn thread_from_row(row: &Row<'_>) -> rusqlite::Result<ThreadRow> {
    Ok(ThreadRow {
        id: row.get(0)?,
        listing_id: row.get(1)?,
        buyer_id: row.get(2)?,
        seller_id: row.get(3)?,
        last_message: row.get(4)?,
        last_message_at: row.get(5)?,
        has_safety_warning: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
