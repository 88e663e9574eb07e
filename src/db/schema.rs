pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- users table
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    credential TEXT NOT NULL,
    email TEXT,
    created_at TEXT NOT NULL
);

-- articles table (url is the canonical, normalized URL)
CREATE TABLE IF NOT EXISTS articles (
    url TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    content TEXT,
    source TEXT NOT NULL,
    category TEXT,
    published_at TEXT NOT NULL,
    ingested_at TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    embedding BLOB,
    embedded_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_articles_published_at ON articles(published_at DESC);
CREATE INDEX IF NOT EXISTS idx_articles_pending ON articles(ingested_at) WHERE embedding IS NULL;

-- preferences table
CREATE TABLE IF NOT EXISTS preferences (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    description TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0 CHECK (weight > 0),
    embedding BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_preferences_user_id ON preferences(user_id);

-- interactions table (append-only)
CREATE TABLE IF NOT EXISTS interactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    article_url TEXT NOT NULL,
    action TEXT NOT NULL CHECK (action IN ('viewed', 'clicked', 'dismissed')),
    occurred_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_interactions_user_time ON interactions(user_id, occurred_at DESC);
"#;
