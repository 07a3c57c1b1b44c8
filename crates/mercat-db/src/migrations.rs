use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                email       TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password    TEXT NOT NULL,
                avatar      TEXT,
                location    TEXT NOT NULL,
                verified    INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE listings (
                id              TEXT PRIMARY KEY,
                seller_id       TEXT NOT NULL REFERENCES users(id),
                title           TEXT NOT NULL,
                description     TEXT NOT NULL,
                price_cents     INTEGER NOT NULL,
                currency        TEXT NOT NULL DEFAULT 'EUR',
                category        TEXT NOT NULL,
                condition       TEXT NOT NULL,
                neighborhood    TEXT NOT NULL,
                images          TEXT NOT NULL DEFAULT '[]',
                status          TEXT NOT NULL DEFAULT 'active',
                likes           INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_listings_category ON listings(category, created_at);
            CREATE INDEX idx_listings_seller ON listings(seller_id);

            CREATE TABLE threads (
                id                  TEXT PRIMARY KEY,
                listing_id          TEXT NOT NULL REFERENCES listings(id),
                buyer_id            TEXT NOT NULL REFERENCES users(id),
                seller_id           TEXT NOT NULL REFERENCES users(id),
                last_message        TEXT,
                last_message_at     TEXT NOT NULL,
                has_safety_warning  INTEGER NOT NULL DEFAULT 0,
                UNIQUE(listing_id, buyer_id, seller_id)
            );

            CREATE INDEX idx_threads_buyer ON threads(buyer_id);
            CREATE INDEX idx_threads_seller ON threads(seller_id);

            -- seq is the display order; created_at may tie within a batch.
            -- sender_id is a user id or the literal 'system'.
            CREATE TABLE messages (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                id          TEXT NOT NULL UNIQUE,
                thread_id   TEXT NOT NULL REFERENCES threads(id),
                sender_id   TEXT NOT NULL,
                content     TEXT NOT NULL,
                kind        TEXT NOT NULL DEFAULT 'text',
                risk_flag   INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_messages_thread ON messages(thread_id, seq);

            CREATE TABLE reviews (
                id          TEXT PRIMARY KEY,
                reviewer_id TEXT NOT NULL REFERENCES users(id),
                target_id   TEXT NOT NULL REFERENCES users(id),
                listing_id  TEXT REFERENCES listings(id),
                rating      INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                comment     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_reviews_target ON reviews(target_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }
}
