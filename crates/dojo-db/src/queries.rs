use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

use dojo_types::api::ReactionSummary;
use dojo_types::models::ReactionKind;

use crate::Database;
use crate::models::{
    BuildRow, CommentRow, NewBuild, ProfileUpdate, RecentCommentRow, UserDirectoryRow, UserRow,
    join_list,
};
use crate::whitelist::UpdateSet;

impl Database {
    // -- Users --

    pub fn upsert_profile(&self, user_id: i64, profile: &ProfileUpdate, now: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users
                     (user_id, display_name, gamer_tag, platforms, modes, goals, difficulties, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(user_id) DO UPDATE SET
                     display_name = excluded.display_name,
                     gamer_tag    = excluded.gamer_tag,
                     platforms    = excluded.platforms,
                     modes        = excluded.modes,
                     goals        = excluded.goals,
                     difficulties = excluded.difficulties,
                     updated_at   = excluded.updated_at",
                params![
                    user_id,
                    profile.display_name,
                    profile.gamer_tag,
                    join_list(&profile.platforms),
                    join_list(&profile.modes),
                    join_list(&profile.goals),
                    join_list(&profile.difficulties),
                    now,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, user_id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, user_id))
    }

    pub fn set_avatar_url(&self, user_id: i64, avatar_url: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET avatar_url = ?1 WHERE user_id = ?2",
                params![avatar_url, user_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Community roster: everyone with a gamer tag, with public-build
    /// counts and a progress flag aggregated in one query.
    pub fn list_users(&self) -> Result<Vec<UserDirectoryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.user_id, u.gamer_tag, u.avatar_url,
                        (SELECT COUNT(*) FROM builds b
                          WHERE b.user_id = u.user_id AND b.is_public = 1),
                        EXISTS(SELECT 1 FROM mastery m
                                WHERE m.user_id = u.user_id
                                  AND (m.solo > 0 OR m.hellmode > 0 OR m.raid > 0 OR m.speedrun > 0))
                 FROM users u
                 WHERE u.gamer_tag != ''
                 ORDER BY u.gamer_tag COLLATE NOCASE",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(UserDirectoryRow {
                        user_id: row.get(0)?,
                        gamer_tag: row.get(1)?,
                        avatar_url: row.get(2)?,
                        builds_count: row.get(3)?,
                        has_mastery_progress: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Purge everything a departed user left behind. Returns whether any
    /// row was deleted plus the ids of their builds so the caller can
    /// remove media directories after the transaction commits.
    pub fn delete_user_data(&self, user_id: i64) -> Result<(bool, Vec<i64>)> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare("SELECT build_id FROM builds WHERE user_id = ?1")?;
            let build_ids = stmt
                .query_map([user_id], |row| row.get::<_, i64>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            drop(stmt);

            let mut removed = 0;
            removed += tx.execute("DELETE FROM comments WHERE user_id = ?1", [user_id])?;
            removed += tx.execute("DELETE FROM reactions WHERE user_id = ?1", [user_id])?;
            // Cascades each build's comments and reactions.
            removed += tx.execute("DELETE FROM builds WHERE user_id = ?1", [user_id])?;
            // Cascades the mastery row and any pending application.
            removed += tx.execute("DELETE FROM users WHERE user_id = ?1", [user_id])?;

            Ok((removed > 0, build_ids))
        })
    }

    // -- Builds --

    pub fn create_build(&self, build: &NewBuild) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO builds
                     (user_id, author, name, class, tags, description, photo_1, photo_2, created_at, is_public)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, '', '', ?7, 0)",
                params![
                    build.user_id,
                    build.author,
                    build.name,
                    build.class_name,
                    join_list(&build.tags),
                    build.description,
                    build.created_at,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn set_build_photos(&self, build_id: i64, photo_1: &str, photo_2: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE builds SET photo_1 = ?1, photo_2 = ?2 WHERE build_id = ?3",
                params![photo_1, photo_2, build_id],
            )?;
            Ok(())
        })
    }

    pub fn get_build(&self, build_id: i64) -> Result<Option<BuildRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{BUILD_SELECT} WHERE build_id = ?1"),
                [build_id],
                map_build_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn list_builds_by_user(&self, user_id: i64, public_only: bool) -> Result<Vec<BuildRow>> {
        self.with_conn(|conn| {
            let sql = if public_only {
                format!("{BUILD_SELECT} WHERE user_id = ?1 AND is_public = 1 ORDER BY created_at DESC")
            } else {
                format!("{BUILD_SELECT} WHERE user_id = ?1 ORDER BY created_at DESC")
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], map_build_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_public_builds(&self) -> Result<Vec<BuildRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("{BUILD_SELECT} WHERE is_public = 1 ORDER BY created_at DESC"))?;
            let rows = stmt
                .query_map([], map_build_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Substring search over public builds.
    ///
    /// Matching happens here rather than in SQL: SQLite's LIKE/NOCASE only
    /// case-folds ASCII, and most build names in this community are
    /// Cyrillic. `str::to_lowercase` folds the full range.
    pub fn search_public_builds(&self, query: &str, limit: usize) -> Result<Vec<BuildRow>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let id_match: Option<i64> = needle.parse().ok();

        let mut rows = self.list_public_builds()?;
        rows.retain(|b| {
            id_match == Some(b.build_id)
                || b.name.to_lowercase().contains(&needle)
                || b.class_name.to_lowercase().contains(&needle)
                || b.tags.to_lowercase().contains(&needle)
                || b.description.to_lowercase().contains(&needle)
                || b.author.to_lowercase().contains(&needle)
        });
        rows.truncate(limit);
        Ok(rows)
    }

    /// Owner-checked visibility flip; false means no such build or not
    /// the caller's.
    pub fn set_build_visibility(&self, build_id: i64, user_id: i64, is_public: bool) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE builds SET is_public = ?1 WHERE build_id = ?2 AND user_id = ?3",
                params![is_public, build_id, user_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Owner-checked update of whitelisted fields only.
    pub fn update_build(
        &self,
        build_id: i64,
        user_id: i64,
        fields: Vec<(String, String)>,
    ) -> Result<bool> {
        let set = UpdateSet::for_build(fields);
        if set.is_empty() {
            // Everything the caller sent was dropped by the whitelist.
            return Ok(true);
        }
        self.with_conn_mut(|conn| {
            let sql = format!(
                "UPDATE builds SET {} WHERE build_id = ? AND user_id = ?",
                set.set_clause()
            );
            let mut values: Vec<&dyn rusqlite::types::ToSql> = set
                .values()
                .iter()
                .map(|v| v as &dyn rusqlite::types::ToSql)
                .collect();
            values.push(&build_id);
            values.push(&user_id);
            let changed = conn.execute(&sql, values.as_slice())?;
            Ok(changed > 0)
        })
    }

    /// Owner-checked delete; comments and reactions cascade.
    pub fn delete_build(&self, build_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "DELETE FROM builds WHERE build_id = ?1 AND user_id = ?2",
                params![build_id, user_id],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Comments --

    pub fn insert_comment(&self, build_id: i64, user_id: i64, body: &str, now: i64) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO comments (build_id, user_id, body, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![build_id, user_id, body, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn list_comments(&self, build_id: i64) -> Result<Vec<CommentRow>> {
        self.with_conn(|conn| {
            // JOIN users for author display data in a single query.
            let mut stmt = conn.prepare(
                "SELECT c.comment_id, c.build_id, c.user_id, u.gamer_tag, u.avatar_url,
                        c.body, c.created_at
                 FROM comments c
                 LEFT JOIN users u ON u.user_id = c.user_id
                 WHERE c.build_id = ?1
                 ORDER BY c.created_at ASC",
            )?;
            let rows = stmt
                .query_map([build_id], |row| {
                    Ok(CommentRow {
                        comment_id: row.get(0)?,
                        build_id: row.get(1)?,
                        user_id: row.get(2)?,
                        author: row
                            .get::<_, Option<String>>(3)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        avatar_url: row.get(4)?,
                        body: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn recent_comments(&self, limit: u32) -> Result<Vec<RecentCommentRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.comment_id, c.build_id, b.name, c.user_id, u.gamer_tag, u.avatar_url,
                        c.body, c.created_at
                 FROM comments c
                 JOIN builds b ON b.build_id = c.build_id
                 LEFT JOIN users u ON u.user_id = c.user_id
                 WHERE b.is_public = 1
                 ORDER BY c.created_at DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], |row| {
                    Ok(RecentCommentRow {
                        comment_id: row.get(0)?,
                        build_id: row.get(1)?,
                        build_name: row.get(2)?,
                        user_id: row.get(3)?,
                        author: row
                            .get::<_, Option<String>>(4)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        avatar_url: row.get(5)?,
                        body: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Reactions --

    /// Upsert-by-replacement keyed on (build, user): a different kind
    /// replaces the stored reaction, repeating the same kind removes it.
    /// Returns the post-change summary.
    pub fn set_reaction(
        &self,
        build_id: i64,
        user_id: i64,
        kind: ReactionKind,
        now: i64,
    ) -> Result<ReactionSummary> {
        self.with_tx(|tx| {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT kind FROM reactions WHERE build_id = ?1 AND user_id = ?2",
                    params![build_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;

            let mine = if existing.as_deref() == Some(kind.as_str()) {
                tx.execute(
                    "DELETE FROM reactions WHERE build_id = ?1 AND user_id = ?2",
                    params![build_id, user_id],
                )?;
                None
            } else {
                tx.execute(
                    "INSERT INTO reactions (build_id, user_id, kind, created_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(build_id, user_id) DO UPDATE SET
                         kind = excluded.kind,
                         created_at = excluded.created_at",
                    params![build_id, user_id, kind.as_str(), now],
                )?;
                Some(kind)
            };

            let (likes, dislikes) = query_reaction_counts(tx, build_id)?;
            Ok(ReactionSummary { likes, dislikes, mine })
        })
    }

    pub fn reaction_summary(&self, build_id: i64, user_id: i64) -> Result<ReactionSummary> {
        self.with_conn(|conn| {
            let (likes, dislikes) = query_reaction_counts(conn, build_id)?;
            let mine: Option<String> = conn
                .query_row(
                    "SELECT kind FROM reactions WHERE build_id = ?1 AND user_id = ?2",
                    params![build_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(ReactionSummary {
                likes,
                dislikes,
                mine: mine.as_deref().and_then(ReactionKind::parse),
            })
        })
    }
}

const BUILD_SELECT: &str = "SELECT build_id, user_id, author, name, class, tags, description,
        photo_1, photo_2, created_at, is_public
 FROM builds";

fn map_build_row(row: &rusqlite::Row<'_>) -> std::result::Result<BuildRow, rusqlite::Error> {
    Ok(BuildRow {
        build_id: row.get(0)?,
        user_id: row.get(1)?,
        author: row.get(2)?,
        name: row.get(3)?,
        class_name: row.get(4)?,
        tags: row.get(5)?,
        description: row.get(6)?,
        photo_1: row.get(7)?,
        photo_2: row.get(8)?,
        created_at: row.get(9)?,
        is_public: row.get(10)?,
    })
}

fn query_user(conn: &Connection, user_id: i64) -> Result<Option<UserRow>> {
    conn.query_row(
        "SELECT user_id, display_name, gamer_tag, platforms, modes, goals, difficulties,
                avatar_url, updated_at
         FROM users WHERE user_id = ?1",
        [user_id],
        |row| {
            Ok(UserRow {
                user_id: row.get(0)?,
                display_name: row.get(1)?,
                gamer_tag: row.get(2)?,
                platforms: row.get(3)?,
                modes: row.get(4)?,
                goals: row.get(5)?,
                difficulties: row.get(6)?,
                avatar_url: row.get(7)?,
                updated_at: row.get(8)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

fn query_reaction_counts(conn: &Connection, build_id: i64) -> Result<(i64, i64)> {
    conn.query_row(
        "SELECT COUNT(*) FILTER (WHERE kind = 'like'),
                COUNT(*) FILTER (WHERE kind = 'dislike')
         FROM reactions WHERE build_id = ?1",
        [build_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProfileUpdate;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn profile(tag: &str) -> ProfileUpdate {
        ProfileUpdate {
            display_name: "Rin".to_string(),
            gamer_tag: tag.to_string(),
            platforms: vec!["ps5".to_string()],
            modes: vec![],
            goals: vec![],
            difficulties: vec![],
        }
    }

    fn seed_build(db: &Database, user_id: i64, name: &str) -> i64 {
        db.create_build(&NewBuild {
            user_id,
            author: "ghost".to_string(),
            name: name.to_string(),
            class_name: "samurai".to_string(),
            tags: vec!["melee".to_string()],
            description: "close range".to_string(),
            created_at: 1_700_000_000,
        })
        .unwrap()
    }

    #[test]
    fn profile_upsert_then_update() {
        let (_dir, db) = test_db();
        db.upsert_profile(1, &profile("ghost_of_ramen"), 100).unwrap();
        db.upsert_profile(1, &profile("ghost_of_ramen2"), 200).unwrap();

        let row = db.get_user(1).unwrap().unwrap();
        assert_eq!(row.gamer_tag, "ghost_of_ramen2");
        assert_eq!(row.updated_at, 200);
        assert_eq!(row.platforms, "ps5");
    }

    #[test]
    fn deleting_a_build_cascades_comments_and_reactions() {
        let (_dir, db) = test_db();
        db.upsert_profile(1, &profile("owner"), 100).unwrap();
        db.upsert_profile(2, &profile("fan"), 100).unwrap();
        let build_id = seed_build(&db, 1, "Ronin");
        db.set_build_visibility(build_id, 1, true).unwrap();

        db.insert_comment(build_id, 2, "nice", 101).unwrap();
        db.set_reaction(build_id, 2, ReactionKind::Like, 102).unwrap();

        // Wrong owner cannot delete.
        assert!(!db.delete_build(build_id, 2).unwrap());
        assert!(db.delete_build(build_id, 1).unwrap());

        let orphans: i64 = db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT (SELECT COUNT(*) FROM comments) + (SELECT COUNT(*) FROM reactions)",
                    [],
                    |r| r.get(0),
                )
                .map_err(Into::into)
            })
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn reaction_replacement_keeps_one_row() {
        let (_dir, db) = test_db();
        db.upsert_profile(1, &profile("owner"), 100).unwrap();
        let build_id = seed_build(&db, 1, "Ronin");

        let after_like = db.set_reaction(build_id, 7, ReactionKind::Like, 101).unwrap();
        assert_eq!((after_like.likes, after_like.dislikes), (1, 0));

        let after_switch = db
            .set_reaction(build_id, 7, ReactionKind::Dislike, 102)
            .unwrap();
        assert_eq!((after_switch.likes, after_switch.dislikes), (0, 1));
        assert_eq!(after_switch.mine, Some(ReactionKind::Dislike));

        let rows: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM reactions", [], |r| r.get(0))
                    .map_err(Into::into)
            })
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn repeating_a_reaction_removes_it() {
        let (_dir, db) = test_db();
        db.upsert_profile(1, &profile("owner"), 100).unwrap();
        let build_id = seed_build(&db, 1, "Ronin");

        db.set_reaction(build_id, 7, ReactionKind::Like, 101).unwrap();
        let cleared = db.set_reaction(build_id, 7, ReactionKind::Like, 102).unwrap();
        assert_eq!(cleared.likes, 0);
        assert_eq!(cleared.mine, None);
    }

    #[test]
    fn search_folds_cyrillic_case() {
        let (_dir, db) = test_db();
        db.upsert_profile(1, &profile("owner"), 100).unwrap();
        let visible = seed_build(&db, 1, "Мастер Клинка");
        let hidden = seed_build(&db, 1, "Секретный Клинок");
        db.set_build_visibility(visible, 1, true).unwrap();

        let hits = db.search_public_builds("КЛИНК", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].build_id, visible);

        // Private builds are never searchable.
        let none = db.search_public_builds("Секрет", 10).unwrap();
        assert!(none.is_empty());
        let _ = hidden;
    }

    #[test]
    fn update_build_ignores_non_whitelisted_fields() {
        let (_dir, db) = test_db();
        db.upsert_profile(1, &profile("owner"), 100).unwrap();
        let build_id = seed_build(&db, 1, "Ronin");

        let ok = db
            .update_build(
                build_id,
                1,
                vec![
                    ("name".to_string(), "Ronin II".to_string()),
                    ("is_public".to_string(), "1".to_string()),
                ],
            )
            .unwrap();
        assert!(ok);

        let row = db.get_build(build_id).unwrap().unwrap();
        assert_eq!(row.name, "Ronin II");
        // The smuggled is_public key was dropped, not applied.
        assert!(!row.is_public);
    }

    #[test]
    fn purge_removes_every_trace_of_a_user() {
        let (_dir, db) = test_db();
        db.upsert_profile(1, &profile("leaver"), 100).unwrap();
        db.upsert_profile(2, &profile("other"), 100).unwrap();
        let own = seed_build(&db, 1, "Mine");
        let theirs = seed_build(&db, 2, "Theirs");
        db.set_build_visibility(theirs, 2, true).unwrap();
        db.insert_comment(theirs, 1, "bye", 101).unwrap();
        db.set_reaction(theirs, 1, ReactionKind::Like, 102).unwrap();

        let (deleted, build_ids) = db.delete_user_data(1).unwrap();
        assert!(deleted);
        assert_eq!(build_ids, vec![own]);

        assert!(db.get_user(1).unwrap().is_none());
        assert!(db.get_build(own).unwrap().is_none());
        let summary = db.reaction_summary(theirs, 1).unwrap();
        assert_eq!((summary.likes, summary.dislikes, summary.mine), (0, 0, None));
        assert!(db.list_comments(theirs).unwrap().is_empty());
        // The other user is untouched.
        assert!(db.get_user(2).unwrap().is_some());
        assert!(db.get_build(theirs).unwrap().is_some());
    }
}
