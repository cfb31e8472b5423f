use serde::{Deserialize, Serialize};

/// The four mastery categories. Closed set — the store maps each variant
/// to a fixed column, so adding a category means a schema migration too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasteryCategory {
    Solo,
    Hellmode,
    Raid,
    Speedrun,
}

impl MasteryCategory {
    pub const ALL: [MasteryCategory; 4] = [
        MasteryCategory::Solo,
        MasteryCategory::Hellmode,
        MasteryCategory::Raid,
        MasteryCategory::Speedrun,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MasteryCategory::Solo => "solo",
            MasteryCategory::Hellmode => "hellmode",
            MasteryCategory::Raid => "raid",
            MasteryCategory::Speedrun => "speedrun",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "solo" => Some(MasteryCategory::Solo),
            "hellmode" => Some(MasteryCategory::Hellmode),
            "raid" => Some(MasteryCategory::Raid),
            "speedrun" => Some(MasteryCategory::Speedrun),
            _ => None,
        }
    }
}

impl std::fmt::Display for MasteryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reaction polarity. At most one reaction per (build, user).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Dislike,
}

impl ReactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReactionKind::Like => "like",
            ReactionKind::Dislike => "dislike",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(ReactionKind::Like),
            "dislike" => Some(ReactionKind::Dislike),
            _ => None,
        }
    }
}

/// Per-user tier levels, one per category. A user without a mastery row
/// reads as all zeros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasteryLevels {
    pub solo: i64,
    pub hellmode: i64,
    pub raid: i64,
    pub speedrun: i64,
}

impl MasteryLevels {
    pub fn get(&self, category: MasteryCategory) -> i64 {
        match category {
            MasteryCategory::Solo => self.solo,
            MasteryCategory::Hellmode => self.hellmode,
            MasteryCategory::Raid => self.raid,
            MasteryCategory::Speedrun => self.speedrun,
        }
    }

    pub fn set(&mut self, category: MasteryCategory, level: i64) {
        match category {
            MasteryCategory::Solo => self.solo = level,
            MasteryCategory::Hellmode => self.hellmode = level,
            MasteryCategory::Raid => self.raid = level,
            MasteryCategory::Speedrun => self.speedrun = level,
        }
    }

    pub fn any_progress(&self) -> bool {
        self.solo > 0 || self.hellmode > 0 || self.raid > 0 || self.speedrun > 0
    }
}

/// A pending tier-upgrade application awaiting moderator resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApplication {
    pub user_id: i64,
    pub category: MasteryCategory,
    pub requested_level: i64,
    pub evidence: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_roundtrip() {
        for cat in MasteryCategory::ALL {
            assert_eq!(MasteryCategory::parse(cat.as_str()), Some(cat));
        }
        assert_eq!(MasteryCategory::parse("glitch"), None);
    }

    #[test]
    fn levels_get_set() {
        let mut levels = MasteryLevels::default();
        assert!(!levels.any_progress());
        levels.set(MasteryCategory::Raid, 3);
        assert_eq!(levels.get(MasteryCategory::Raid), 3);
        assert_eq!(levels.get(MasteryCategory::Solo), 0);
        assert!(levels.any_progress());
    }
}
