//! Tests for KeyIndex (entry map and prefix index together)

use segvault::index::KeyIndex;

use super::entry;

fn populated() -> KeyIndex {
    let index = KeyIndex::new(8, 2);
    for key in [
        "docs/a.txt",
        "docs/b.txt",
        "docs/deep/er/c.txt",
        "docs2/x",
        "images/cat.jpg",
        "readme",
    ] {
        index.insert(key, entry(1));
    }
    index
}

#[test]
fn test_prefix_queries_agree_with_range_scan() {
    let index = populated();

    for prefix in ["", "docs", "docs/", "docs/d", "docs/deep/", "docs/deep/er/", "im", "nope/"] {
        let expected = index.entries().keys_with_prefix(prefix).to_vec();
        assert_eq!(index.keys_with_prefix(prefix), expected, "prefix {:?}", prefix);
    }
}

#[test]
fn test_directory_prefix_excludes_siblings() {
    let index = populated();
    assert_eq!(
        index.keys_with_prefix("docs/"),
        vec!["docs/a.txt", "docs/b.txt", "docs/deep/er/c.txt"]
    );
}

#[test]
fn test_remove_updates_both_views() {
    let index = populated();
    assert!(index.remove("docs/a.txt").is_some());
    assert!(index.remove("docs/a.txt").is_none());

    assert_eq!(index.keys_with_prefix("docs/"), vec!["docs/b.txt", "docs/deep/er/c.txt"]);
    assert_eq!(index.len(), 5);
}

#[test]
fn test_overwrite_keeps_single_listing() {
    let index = populated();
    let prev = index.insert("docs/a.txt", entry(99));
    assert_eq!(prev.unwrap().size, 1);
    assert_eq!(index.keys_with_prefix("docs/").len(), 3);
    assert_eq!(index.get("docs/a.txt").unwrap().size, 99);
}

#[test]
fn test_rebuild_prefixes_after_direct_load() {
    let index = KeyIndex::new(4, 2);
    index.entries().set("a/b", entry(1));
    index.entries().set("a/c", entry(1));
    assert!(index.prefixes().get("a/").is_none());

    index.rebuild_prefixes();
    assert_eq!(index.prefixes().get("a/").unwrap(), vec!["a/b", "a/c"]);
}
