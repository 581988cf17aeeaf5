//! SQL schema for the Atelier SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS clients (
    client_id      TEXT PRIMARY KEY,
    name           TEXT NOT NULL,
    description    TEXT,
    theme_settings TEXT,             -- JSON object or NULL
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS identities (
    identity_id     TEXT PRIMARY KEY,
    client_id       TEXT NOT NULL REFERENCES clients(client_id) ON DELETE CASCADE,
    name            TEXT NOT NULL,
    base_embedding  TEXT NOT NULL,
    reference_image TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS layers (
    layer_id        TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    kind            TEXT NOT NULL,   -- 'hair' | 'outfit' | 'scene'
    prompt          TEXT NOT NULL,
    negative_prompt TEXT,
    strength        REAL NOT NULL DEFAULT 1.0,
    reference_image TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

-- Histories are append-only; rows leave only through the identity cascade.
CREATE TABLE IF NOT EXISTS histories (
    history_id      TEXT PRIMARY KEY,
    identity_id     TEXT NOT NULL REFERENCES identities(identity_id) ON DELETE CASCADE,
    image_path      TEXT NOT NULL,
    prompt          TEXT NOT NULL,
    negative_prompt TEXT NOT NULL,
    settings        TEXT NOT NULL DEFAULT '{}',
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS lookbooks (
    lookbook_id TEXT PRIMARY KEY,
    client_id   TEXT NOT NULL REFERENCES clients(client_id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    description TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS lookbook_entries (
    entry_id    TEXT PRIMARY KEY,
    lookbook_id TEXT NOT NULL REFERENCES lookbooks(lookbook_id) ON DELETE CASCADE,
    history_id  TEXT NOT NULL REFERENCES histories(history_id) ON DELETE CASCADE,
    position    INTEGER NOT NULL DEFAULT 0,
    notes       TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    user_id       TEXT PRIMARY KEY,
    username      TEXT NOT NULL UNIQUE,
    email         TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role          TEXT NOT NULL DEFAULT 'user',
    active        INTEGER NOT NULL DEFAULT 1,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    token_digest TEXT PRIMARY KEY,   -- hex SHA-256 of the bearer token
    user_id      TEXT NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
    issued_at    TEXT NOT NULL,
    expires_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS identities_client_idx  ON identities(client_id);
CREATE INDEX IF NOT EXISTS layers_kind_idx        ON layers(kind);
CREATE INDEX IF NOT EXISTS histories_identity_idx ON histories(identity_id);
CREATE INDEX IF NOT EXISTS histories_created_idx  ON histories(created_at);
CREATE INDEX IF NOT EXISTS lookbooks_client_idx   ON lookbooks(client_id);
CREATE INDEX IF NOT EXISTS entries_lookbook_idx   ON lookbook_entries(lookbook_id, position);

PRAGMA user_version = 1;
";
