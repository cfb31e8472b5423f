use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
    )?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                user_id      INTEGER PRIMARY KEY,
                display_name TEXT NOT NULL DEFAULT '',
                gamer_tag    TEXT NOT NULL DEFAULT '',
                platforms    TEXT NOT NULL DEFAULT '',
                modes        TEXT NOT NULL DEFAULT '',
                goals        TEXT NOT NULL DEFAULT '',
                difficulties TEXT NOT NULL DEFAULT '',
                avatar_url   TEXT,
                updated_at   INTEGER NOT NULL
            );

            CREATE TABLE mastery (
                user_id  INTEGER PRIMARY KEY REFERENCES users(user_id) ON DELETE CASCADE,
                solo     INTEGER NOT NULL DEFAULT 0,
                hellmode INTEGER NOT NULL DEFAULT 0,
                raid     INTEGER NOT NULL DEFAULT 0,
                speedrun INTEGER NOT NULL DEFAULT 0
            );

            -- One pending application per (user, category), enforced here.
            CREATE TABLE mastery_applications (
                user_id         INTEGER NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
                category        TEXT NOT NULL,
                requested_level INTEGER NOT NULL,
                evidence        TEXT NOT NULL DEFAULT '',
                created_at      INTEGER NOT NULL,
                PRIMARY KEY (user_id, category)
            );

            CREATE TABLE builds (
                build_id    INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL REFERENCES users(user_id),
                author      TEXT NOT NULL,
                name        TEXT NOT NULL,
                class       TEXT NOT NULL,
                tags        TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                photo_1     TEXT NOT NULL DEFAULT '',
                photo_2     TEXT NOT NULL DEFAULT '',
                created_at  INTEGER NOT NULL,
                is_public   INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_builds_user_id ON builds(user_id);
            CREATE INDEX idx_builds_is_public ON builds(is_public);

            CREATE TABLE comments (
                comment_id INTEGER PRIMARY KEY AUTOINCREMENT,
                build_id   INTEGER NOT NULL REFERENCES builds(build_id) ON DELETE CASCADE,
                user_id    INTEGER NOT NULL,
                body       TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX idx_comments_build_id ON comments(build_id);

            CREATE TABLE reactions (
                build_id   INTEGER NOT NULL REFERENCES builds(build_id) ON DELETE CASCADE,
                user_id    INTEGER NOT NULL,
                kind       TEXT NOT NULL CHECK (kind IN ('like', 'dislike')),
                created_at INTEGER NOT NULL,
                PRIMARY KEY (build_id, user_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    Ok(())
}
