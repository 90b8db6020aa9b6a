//! Materialized tree paths for the menu hierarchy.
//!
//! A menu stores the ids of all of its ancestors, root first, each followed by
//! [`TREE_PATH_DELIMITER`]. Root menus have an empty path. Prefix filters on
//! the path select whole subtrees without recursive queries.
use crate::Menu;

pub const TREE_PATH_DELIMITER: &str = ".";

/// Split a materialized parent path into ancestor ids, root first.
///
/// Empty segments (leading, trailing or doubled delimiters) are skipped.
pub fn ancestor_ids(parent_path: &str) -> Vec<&str> {
    parent_path
        .split(TREE_PATH_DELIMITER)
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Build the `parent_path` a direct child of `parent` must carry.
pub fn child_parent_path(parent: &Menu) -> String {
    format!("{}{}{}", parent.parent_path, parent.id, TREE_PATH_DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MenuKind, Status};

    #[test]
    fn ancestor_ids_skips_empty_segments() {
        assert!(ancestor_ids("").is_empty());
        assert_eq!(ancestor_ids("m1."), vec!["m1"]);
        assert_eq!(ancestor_ids(".m1..m2."), vec!["m1", "m2"]);
        assert_eq!(ancestor_ids("m1.m2"), vec!["m1", "m2"]);
    }

    #[test]
    fn child_path_extends_parent_path() {
        let root = Menu {
            id: "m1".to_string(),
            code: "orders".to_string(),
            name: "Orders".to_string(),
            kind: MenuKind::Page,
            parent_id: String::new(),
            parent_path: String::new(),
            status: Status::Enabled,
        };
        let child_path = child_parent_path(&root);
        assert_eq!(child_path, "m1.");

        let child = Menu {
            id: "m2".to_string(),
            parent_id: "m1".to_string(),
            parent_path: child_path,
            ..root
        };
        assert_eq!(child_parent_path(&child), "m1.m2.");
    }
}
