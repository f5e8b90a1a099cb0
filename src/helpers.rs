// ============================================================================
// helpers.rs — path canonicalization, comparators, object cache (component H)
// ============================================================================

use std::collections::HashMap;
use std::hash::Hash;

/// Collapses `.`, `..`, and empty path segments without touching the
/// filesystem (unlike `Path::canonicalize`, which requires the path to
/// exist). Ported from the reference tool's segment-popping normalizer:
/// a `..` pops the last kept segment instead of being kept literally.
pub fn normalize_path(path: &str) -> String {
    let mut dest: Vec<&str> = Vec::new();
    for (i, segment) in path.split('/').enumerate() {
        if segment.is_empty() && i > 0 {
            continue;
        }
        if segment == "." {
            continue;
        }
        if segment == ".." {
            if !dest.is_empty() {
                dest.pop();
            }
            continue;
        }
        dest.push(segment);
    }
    dest.join("/")
}

/// The three classes of dependency/load reference used by the emitter:
/// same-location (`:name`), sibling-location (`//loc:name`), and
/// external (`@repo//...`). Ordering between classes is fixed; ordering
/// within a class falls back to the reference string itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RefClass {
    SameLocation,
    SourceTree,
    External,
}

fn classify_ref(reference: &str) -> RefClass {
    if reference.starts_with('@') {
        RefClass::External
    } else if reference.starts_with("//") {
        RefClass::SourceTree
    } else {
        RefClass::SameLocation
    }
}

/// Total order over dependency/load references: same-directory (`:`)
/// first, then source-tree (`//`), then external (`@`); ties broken
/// lexicographically. Used both for `deps`/`data` lists and for
/// `load(...)` directive ordering.
pub fn compare_refs(a: &str, b: &str) -> std::cmp::Ordering {
    classify_ref(a)
        .cmp(&classify_ref(b))
        .then_with(|| a.cmp(b))
}

/// Sorts a list of references in place using [`compare_refs`].
pub fn sort_refs(refs: &mut [String]) {
    refs.sort_by(|a, b| compare_refs(a, b));
}

/// The single owned per-pipeline-run intern registry keyed by an
/// arbitrary (kind, name, location)-like key, replacing a singleton
/// class-level cache with an explicit value: every call site holds this
/// cache via an explicit `&mut` borrow from the pipeline context rather
/// than reaching for global state.
#[derive(Debug, Default)]
pub struct ObjectCache<K, V> {
    entries: HashMap<K, V>,
}

impl<K: Eq + Hash + Clone, V> ObjectCache<K, V> {
    pub fn new() -> Self {
        ObjectCache {
            entries: HashMap::new(),
        }
    }

    /// Returns the cached value for `key`, inserting it via `make` if this
    /// is the first request — guaranteeing exactly one instance per key,
    /// the same guarantee the reference tool got from its singleton cache.
    pub fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> &mut V {
        self.entries.entry(key).or_insert_with(make)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }
}

/// Finds the top-level ("grouping location") directory component of a
/// short name, i.e. the first path segment, or the empty string if the
/// name has no subdirectory. Mirrors the reference tool's
/// `TopLevelGroupingStrategy.getBuildFilenamePath`.
pub fn grouping_location(short_name: &str) -> String {
    match short_name.split_once('/') {
        Some((first, _)) => first.to_string(),
        None => String::new(),
    }
}

/// Expands a single glob pattern against the filesystem, rooted at `base`
/// if the pattern is relative. Used by the CCImport manifest loader's
/// embedded `glob([...])` syntax (component J).
pub fn expand_glob(base: &std::path::Path, pattern: &str) -> Vec<String> {
    let full_pattern = if pattern.starts_with('/') {
        pattern.to_string()
    } else {
        base.join(pattern).to_string_lossy().to_string()
    };
    glob::glob(&full_pattern)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.ok())
        .map(|p| p.to_string_lossy().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dot_dot() {
        assert_eq!(normalize_path("a/b/../c"), "a/c");
        assert_eq!(normalize_path("a/./b"), "a/b");
        assert_eq!(normalize_path("a//b"), "a/b");
        assert_eq!(normalize_path("../a"), "a");
    }

    #[test]
    fn ref_ordering_is_total() {
        let mut refs = vec![
            "@ext//:openssl".to_string(),
            ":libfoo".to_string(),
            "//other:libbar".to_string(),
            ":aaa".to_string(),
        ];
        sort_refs(&mut refs);
        assert_eq!(
            refs,
            vec![
                ":aaa".to_string(),
                ":libfoo".to_string(),
                "//other:libbar".to_string(),
                "@ext//:openssl".to_string(),
            ]
        );
    }

    #[test]
    fn object_cache_returns_same_instance() {
        let mut cache: ObjectCache<String, u32> = ObjectCache::new();
        let mut calls = 0;
        {
            let v = cache.get_or_insert_with("a".to_string(), || {
                calls += 1;
                1
            });
            assert_eq!(*v, 1);
        }
        let v = cache.get_or_insert_with("a".to_string(), || {
            calls += 1;
            2
        });
        assert_eq!(*v, 1);
        assert_eq!(calls, 1);
    }

    #[test]
    fn grouping_location_picks_first_segment() {
        assert_eq!(grouping_location("foo/bar/baz.cc"), "foo");
        assert_eq!(grouping_location("baz.cc"), "");
    }
}
