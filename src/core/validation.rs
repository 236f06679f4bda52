use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::ConfigurationError;

static STRING_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9._]{0,64}$").expect("valid string-id pattern")
});

/// Check that `id` is usable as a path / target identifier.
pub fn validate_string_id(id: &str) -> Result<(), ConfigurationError> {
    if STRING_ID.is_match(id) {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidStringId(id.to_string()))
    }
}

/// Detect duplicate target ids across groups.
///
/// `ids` yields `(group_index, target_id)` pairs in build order. The first
/// collision is reported with both group indices.
pub fn detect_duplicate_ids<'a, I>(ids: I) -> Result<(), ConfigurationError>
where
    I: IntoIterator<Item = (usize, &'a str)>,
{
    let mut seen: HashMap<&'a str, usize> = HashMap::new();

    for (igroup, id) in ids {
        if let Some(&first) = seen.get(id) {
            return Err(ConfigurationError::DuplicateTargetId {
                id: id.to_string(),
                first_group: first,
                second_group: igroup,
            });
        }
        seen.insert(id, igroup);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_ids() {
        assert!(validate_string_id("insar.scene_01").is_ok());
        assert!(validate_string_id("1abc").is_err());
        assert!(validate_string_id("with space").is_err());
        assert!(validate_string_id("").is_err());
    }

    #[test]
    fn duplicates_report_both_groups() {
        let ids = vec![(0, "a.x"), (0, "a.y"), (2, "a.x")];
        let err = detect_duplicate_ids(ids).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::DuplicateTargetId {
                id: "a.x".into(),
                first_group: 0,
                second_group: 2,
            }
        );
    }
}
