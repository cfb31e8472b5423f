//! Field whitelist guard for dynamic UPDATE statements.
//!
//! Column names never come from the caller: every updatable field maps to
//! a pre-written `column = ?` fragment selected by lookup, and anything
//! not in the table is silently dropped (clients may send fields this
//! server version does not know yet).

use dojo_types::models::MasteryCategory;

/// Fields a build owner may change, paired with their SET fragments.
pub const BUILD_UPDATE_FIELDS: &[(&str, &str)] = &[
    ("name", "name = ?"),
    ("class", "class = ?"),
    ("tags", "tags = ?"),
    ("description", "description = ?"),
    ("photo_1", "photo_1 = ?"),
    ("photo_2", "photo_2 = ?"),
];

/// The mastery column for a category. The enum is closed, so this is the
/// complete set of identifiers that can ever reach a mastery UPDATE.
pub fn mastery_column(category: MasteryCategory) -> &'static str {
    match category {
        MasteryCategory::Solo => "solo",
        MasteryCategory::Hellmode => "hellmode",
        MasteryCategory::Raid => "raid",
        MasteryCategory::Speedrun => "speedrun",
    }
}

/// An UPDATE's SET clause assembled from whitelisted fields only.
pub struct UpdateSet {
    fragments: Vec<&'static str>,
    values: Vec<String>,
}

impl UpdateSet {
    /// Keep the subset of `input` whose keys appear in the build
    /// whitelist. Unknown keys are dropped, not rejected.
    pub fn for_build<I>(input: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut fragments = Vec::new();
        let mut values = Vec::new();
        for (key, value) in input {
            if let Some((_, fragment)) = BUILD_UPDATE_FIELDS.iter().find(|(name, _)| *name == key)
            {
                fragments.push(*fragment);
                values.push(value);
            }
        }
        Self { fragments, values }
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn set_clause(&self) -> String {
        self.fragments.join(", ")
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_never_reach_the_clause() {
        let set = UpdateSet::for_build(vec![
            ("name".to_string(), "Ronin".to_string()),
            ("is_public".to_string(), "1".to_string()),
            ("user_id; DROP TABLE builds".to_string(), "1".to_string()),
            ("description".to_string(), "melee".to_string()),
        ]);
        assert_eq!(set.set_clause(), "name = ?, description = ?");
        assert_eq!(set.values(), ["Ronin".to_string(), "melee".to_string()]);
    }

    #[test]
    fn empty_when_nothing_allowed() {
        let set = UpdateSet::for_build(vec![("owner".to_string(), "42".to_string())]);
        assert!(set.is_empty());
    }

    #[test]
    fn every_category_has_a_column() {
        for cat in MasteryCategory::ALL {
            assert_eq!(mastery_column(cat), cat.as_str());
        }
    }
}
