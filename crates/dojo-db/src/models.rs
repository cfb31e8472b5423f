//! Database row types — these map directly to SQLite rows.
//! Distinct from dojo-types API models to keep the DB layer independent.

pub struct UserRow {
    pub user_id: i64,
    pub display_name: String,
    pub gamer_tag: String,
    pub platforms: String,
    pub modes: String,
    pub goals: String,
    pub difficulties: String,
    pub avatar_url: Option<String>,
    pub updated_at: i64,
}

/// Directory row with aggregates joined in (public build count, any
/// mastery progress) so the roster endpoint is a single query.
pub struct UserDirectoryRow {
    pub user_id: i64,
    pub gamer_tag: String,
    pub avatar_url: Option<String>,
    pub builds_count: i64,
    pub has_mastery_progress: bool,
}

pub struct BuildRow {
    pub build_id: i64,
    pub user_id: i64,
    pub author: String,
    pub name: String,
    pub class_name: String,
    pub tags: String,
    pub description: String,
    pub photo_1: String,
    pub photo_2: String,
    pub created_at: i64,
    pub is_public: bool,
}

pub struct CommentRow {
    pub comment_id: i64,
    pub build_id: i64,
    pub user_id: i64,
    pub author: String,
    pub avatar_url: Option<String>,
    pub body: String,
    pub created_at: i64,
}

pub struct RecentCommentRow {
    pub comment_id: i64,
    pub build_id: i64,
    pub build_name: String,
    pub user_id: i64,
    pub author: String,
    pub avatar_url: Option<String>,
    pub body: String,
    pub created_at: i64,
}

/// Profile fields a user may write. Avatar and timestamps are managed
/// separately.
pub struct ProfileUpdate {
    pub display_name: String,
    pub gamer_tag: String,
    pub platforms: Vec<String>,
    pub modes: Vec<String>,
    pub goals: Vec<String>,
    pub difficulties: Vec<String>,
}

pub struct NewBuild {
    pub user_id: i64,
    pub author: String,
    pub name: String,
    pub class_name: String,
    pub tags: Vec<String>,
    pub description: String,
    pub created_at: i64,
}

/// Preference lists and tags are stored comma-joined, matching what the
/// Mini App sends and keeping the schema flat.
pub fn join_list(items: &[String]) -> String {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_roundtrip_drops_blanks() {
        let joined = join_list(&[
            "ps5".to_string(),
            "  ".to_string(),
            " pc ".to_string(),
            String::new(),
        ]);
        assert_eq!(joined, "ps5,pc");
        assert_eq!(split_list(&joined), vec!["ps5", "pc"]);
        assert!(split_list("").is_empty());
    }
}
