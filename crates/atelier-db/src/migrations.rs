use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            role        TEXT NOT NULL DEFAULT 'user',
            avatar      TEXT,
            is_online   INTEGER NOT NULL DEFAULT 0,
            last_seen   TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS products (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            description TEXT NOT NULL,
            price       REAL NOT NULL,
            stock       INTEGER NOT NULL DEFAULT 0,
            created_by  TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- One review per (product, user); the constraint closes the race
        -- two simultaneous first submissions would otherwise win.
        CREATE TABLE IF NOT EXISTS reviews (
            id          TEXT PRIMARY KEY,
            product_id  TEXT NOT NULL REFERENCES products(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            title       TEXT NOT NULL,
            comment     TEXT NOT NULL,
            rating      INTEGER NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(product_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_reviews_product
            ON reviews(product_id);

        -- conversation_id is the sorted pair of participant ids joined
        -- with '_', so one index serves lookups from either side.
        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL,
            sender_id        TEXT NOT NULL REFERENCES users(id),
            receiver_id      TEXT NOT NULL REFERENCES users(id),
            content          TEXT NOT NULL,
            read             INTEGER NOT NULL DEFAULT 0,
            read_at          TEXT,
            created_at       TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_participants
            ON messages(sender_id, receiver_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
