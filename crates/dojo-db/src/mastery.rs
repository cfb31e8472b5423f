//! Mastery tiers and the application/approval workflow.
//!
//! Per (user, category) the state machine is: Idle -> PendingApproval ->
//! Idle. Submit creates the pending row; a moderator resolution either
//! commits the requested tier (approve) or discards it (reject). The
//! pending-row primary key plus the single-writer immediate transaction
//! make every transition race resolve to exactly one winner: the loser
//! observes "nothing pending".

use anyhow::Result;
use rusqlite::{OptionalExtension, params};

use dojo_types::models::{MasteryCategory, MasteryLevels, PendingApplication};

use crate::Database;
use crate::whitelist::mastery_column;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// An application for this (user, category) is already pending;
    /// the stored pending state is unchanged.
    AlreadyPending,
    /// The requested tier is not strictly above the current one.
    NotAnUpgrade { current: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The pending tier became current.
    Approved { level: i64 },
    /// Pending state cleared, current tier untouched.
    Rejected,
    /// No application to resolve — also what the loser of a concurrent
    /// resolution race sees.
    NothingPending,
}

impl Database {
    /// Current tiers for a user; all zeros if no mastery row exists yet.
    pub fn mastery_levels(&self, user_id: i64) -> Result<MasteryLevels> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT solo, hellmode, raid, speedrun FROM mastery WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok(MasteryLevels {
                        solo: row.get(0)?,
                        hellmode: row.get(1)?,
                        raid: row.get(2)?,
                        speedrun: row.get(3)?,
                    })
                },
            )
            .optional()
            .map(Option::unwrap_or_default)
            .map_err(Into::into)
        })
    }

    pub fn pending_application(
        &self,
        user_id: i64,
        category: MasteryCategory,
    ) -> Result<Option<PendingApplication>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT requested_level, evidence, created_at
                 FROM mastery_applications WHERE user_id = ?1 AND category = ?2",
                params![user_id, category.as_str()],
                |row| {
                    Ok(PendingApplication {
                        user_id,
                        category,
                        requested_level: row.get(0)?,
                        evidence: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Submit a tier-upgrade application.
    pub fn submit_application(
        &self,
        user_id: i64,
        category: MasteryCategory,
        requested_level: i64,
        evidence: &str,
        now: i64,
    ) -> Result<SubmitOutcome> {
        let column = mastery_column(category);
        self.with_tx(|tx| {
            let current: i64 = tx
                .query_row(
                    &format!("SELECT {column} FROM mastery WHERE user_id = ?1"),
                    [user_id],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(0);

            if requested_level <= current {
                return Ok(SubmitOutcome::NotAnUpgrade { current });
            }

            // The primary key guards the one-pending-per-category
            // invariant; zero changed rows means somebody got here first.
            let changed = tx.execute(
                "INSERT INTO mastery_applications
                     (user_id, category, requested_level, evidence, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id, category) DO NOTHING",
                params![user_id, category.as_str(), requested_level, evidence, now],
            )?;

            Ok(if changed == 0 {
                SubmitOutcome::AlreadyPending
            } else {
                SubmitOutcome::Accepted
            })
        })
    }

    /// Resolve a pending application. Claiming the pending row (DELETE ..
    /// RETURNING inside the write transaction) is the compare-and-set:
    /// whichever caller deletes it acts on it, everyone else gets
    /// `NothingPending`.
    pub fn resolve_application(
        &self,
        user_id: i64,
        category: MasteryCategory,
        decision: Decision,
    ) -> Result<ResolveOutcome> {
        let column = mastery_column(category);
        self.with_tx(|tx| {
            let requested: Option<i64> = tx
                .query_row(
                    "DELETE FROM mastery_applications
                     WHERE user_id = ?1 AND category = ?2
                     RETURNING requested_level",
                    params![user_id, category.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(level) = requested else {
                return Ok(ResolveOutcome::NothingPending);
            };

            match decision {
                Decision::Approve => {
                    // Mastery rows are created lazily on first write.
                    tx.execute("INSERT OR IGNORE INTO mastery (user_id) VALUES (?1)", [user_id])?;
                    tx.execute(
                        &format!("UPDATE mastery SET {column} = ?1 WHERE user_id = ?2"),
                        params![level, user_id],
                    )?;
                    Ok(ResolveOutcome::Approved { level })
                }
                Decision::Reject => Ok(ResolveOutcome::Rejected),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProfileUpdate;
    use std::sync::Arc;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        db.upsert_profile(
            1,
            &ProfileUpdate {
                display_name: "Rin".to_string(),
                gamer_tag: "ghost".to_string(),
                platforms: vec![],
                modes: vec![],
                goals: vec![],
                difficulties: vec![],
            },
            100,
        )
        .unwrap();
        (dir, db)
    }

    #[test]
    fn levels_default_to_zero() {
        let (_dir, db) = test_db();
        assert_eq!(db.mastery_levels(1).unwrap(), MasteryLevels::default());
    }

    #[test]
    fn duplicate_submission_conflicts_and_leaves_pending_untouched() {
        let (_dir, db) = test_db();
        let cat = MasteryCategory::Solo;

        assert_eq!(
            db.submit_application(1, cat, 2, "clear-1", 200).unwrap(),
            SubmitOutcome::Accepted
        );
        assert_eq!(
            db.submit_application(1, cat, 3, "clear-2", 201).unwrap(),
            SubmitOutcome::AlreadyPending
        );

        let pending = db.pending_application(1, cat).unwrap().unwrap();
        assert_eq!(pending.requested_level, 2);
        assert_eq!(pending.evidence, "clear-1");
        assert_eq!(pending.created_at, 200);
    }

    #[test]
    fn submission_must_be_an_upgrade() {
        let (_dir, db) = test_db();
        let cat = MasteryCategory::Raid;

        db.submit_application(1, cat, 2, "", 200).unwrap();
        db.resolve_application(1, cat, Decision::Approve).unwrap();

        assert_eq!(
            db.submit_application(1, cat, 2, "", 300).unwrap(),
            SubmitOutcome::NotAnUpgrade { current: 2 }
        );
        assert_eq!(
            db.submit_application(1, cat, 1, "", 300).unwrap(),
            SubmitOutcome::NotAnUpgrade { current: 2 }
        );
        assert!(db.pending_application(1, cat).unwrap().is_none());
    }

    #[test]
    fn approve_commits_and_clears_then_second_resolution_finds_nothing() {
        let (_dir, db) = test_db();
        let cat = MasteryCategory::Solo;

        // Tier solo=1, apply for 2 (the workflow from the happy path).
        db.submit_application(1, cat, 1, "", 150).unwrap();
        db.resolve_application(1, cat, Decision::Approve).unwrap();
        assert_eq!(
            db.submit_application(1, cat, 2, "clear-1", 200).unwrap(),
            SubmitOutcome::Accepted
        );

        assert_eq!(
            db.resolve_application(1, cat, Decision::Approve).unwrap(),
            ResolveOutcome::Approved { level: 2 }
        );
        assert_eq!(db.mastery_levels(1).unwrap().solo, 2);
        assert!(db.pending_application(1, cat).unwrap().is_none());

        // Idempotent-safe: nothing left to approve.
        assert_eq!(
            db.resolve_application(1, cat, Decision::Approve).unwrap(),
            ResolveOutcome::NothingPending
        );
        assert_eq!(db.mastery_levels(1).unwrap().solo, 2);
    }

    #[test]
    fn reject_clears_without_changing_tier() {
        let (_dir, db) = test_db();
        let cat = MasteryCategory::Hellmode;

        db.submit_application(1, cat, 3, "proof", 200).unwrap();
        assert_eq!(
            db.resolve_application(1, cat, Decision::Reject).unwrap(),
            ResolveOutcome::Rejected
        );
        assert_eq!(db.mastery_levels(1).unwrap().hellmode, 0);
        assert!(db.pending_application(1, cat).unwrap().is_none());

        assert_eq!(
            db.resolve_application(1, cat, Decision::Reject).unwrap(),
            ResolveOutcome::NothingPending
        );
    }

    #[test]
    fn categories_are_independent() {
        let (_dir, db) = test_db();
        db.submit_application(1, MasteryCategory::Solo, 1, "", 200).unwrap();
        assert_eq!(
            db.submit_application(1, MasteryCategory::Speedrun, 1, "", 200).unwrap(),
            SubmitOutcome::Accepted
        );
    }

    #[test]
    fn concurrent_approve_and_reject_have_exactly_one_winner() {
        let (_dir, db) = test_db();
        let db = Arc::new(db);
        let cat = MasteryCategory::Speedrun;
        db.submit_application(1, cat, 4, "wr-run", 200).unwrap();

        let approver = {
            let db = Arc::clone(&db);
            std::thread::spawn(move || db.resolve_application(1, cat, Decision::Approve).unwrap())
        };
        let rejecter = {
            let db = Arc::clone(&db);
            std::thread::spawn(move || db.resolve_application(1, cat, Decision::Reject).unwrap())
        };

        let a = approver.join().unwrap();
        let r = rejecter.join().unwrap();

        let outcomes = [a, r];
        let losers = outcomes
            .iter()
            .filter(|o| **o == ResolveOutcome::NothingPending)
            .count();
        assert_eq!(losers, 1, "exactly one caller must lose the race");

        // The final tier is consistent with whoever won.
        let level = db.mastery_levels(1).unwrap().speedrun;
        if outcomes.contains(&ResolveOutcome::Approved { level: 4 }) {
            assert_eq!(level, 4);
        } else {
            assert_eq!(level, 0);
        }
        assert!(db.pending_application(1, cat).unwrap().is_none());
    }
}
