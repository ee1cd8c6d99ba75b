//! Tests for PrefixIndex

use segvault::index::PrefixIndex;

#[test]
fn test_keys_filed_under_leading_directories() {
    let index = PrefixIndex::new(2);
    index.add("a/b.txt");
    index.add("a/c/d.txt");
    index.add("a/c/e/f.txt");
    index.add("top.txt");

    assert_eq!(
        index.get("a/").unwrap(),
        vec!["a/b.txt", "a/c/d.txt", "a/c/e/f.txt"]
    );
    assert_eq!(index.get("a/c/").unwrap(), vec!["a/c/d.txt", "a/c/e/f.txt"]);
    // Deeper than the configured depth
    assert!(index.get("a/c/e/").is_none());
    assert_eq!(index.prefix_count(), 2);
}

#[test]
fn test_get_requires_directory_prefix() {
    let index = PrefixIndex::new(2);
    index.add("a/b.txt");
    assert!(index.get("a").is_none());
}

#[test]
fn test_add_is_idempotent() {
    let index = PrefixIndex::new(1);
    index.add("a/x");
    index.add("a/x");
    assert_eq!(index.get("a/").unwrap(), vec!["a/x"]);
}

#[test]
fn test_remove_drops_empty_prefixes() {
    let index = PrefixIndex::new(2);
    index.add("a/c/d");
    index.add("a/e");

    index.remove("a/c/d");
    assert!(index.get("a/c/").is_none());
    assert_eq!(index.get("a/").unwrap(), vec!["a/e"]);

    index.remove("a/e");
    assert_eq!(index.prefix_count(), 0);
}

#[test]
fn test_candidates_walk_up() {
    let index = PrefixIndex::new(1);
    index.add("a/b/c");
    index.add("a/bz");

    let found = index.candidates("a/b/c").unwrap();
    assert_eq!(found, vec!["a/b/c", "a/bz"]);
    assert!(index.candidates("zzz").is_none());
}

#[test]
fn test_depth_zero_disabled() {
    let index = PrefixIndex::new(0);
    index.add("a/b");
    assert_eq!(index.prefix_count(), 0);
    assert!(index.get("a/").is_none());
}

#[test]
fn test_rebuild_replaces_contents() {
    let index = PrefixIndex::new(2);
    index.add("old/key");
    index.rebuild(["new/b", "new/a", "new/sub/c"]);

    assert!(index.get("old/").is_none());
    assert_eq!(index.get("new/").unwrap(), vec!["new/a", "new/b", "new/sub/c"]);
    assert_eq!(index.get("new/sub/").unwrap(), vec!["new/sub/c"]);
}
