use std::collections::BTreeMap;

/// Ordered map over byte-string keys with exact and longest-prefix lookup.
///
/// Backs both server-name matching and location matching: routing picks the
/// location whose path is the longest stored prefix of the request URI.
/// Rebuilt once at config load and immutable afterwards, so a sorted map is
/// all the structure this needs.
#[derive(Debug, Clone, Default)]
pub struct PrefixTree<T> {
    entries: BTreeMap<String, T>,
}

impl<T> PrefixTree<T> {
    pub fn new() -> Self {
        PrefixTree {
            entries: BTreeMap::new(),
        }
    }

    /// Key normalization: NUL bytes and `..` segments are rejected, and a
    /// trailing `/` is stripped except for the root key `/`.
    fn normalize_key(key: &str) -> Option<String> {
        if key.split('/').any(|seg| seg == "..") {
            return None;
        }
        Self::normalize_query(key)
    }

    /// Lookups only strip the trailing `/` and refuse NUL; a query with
    /// `..` segments may still match a stored key (the caller decides what
    /// escaping the root means).
    fn normalize_query(key: &str) -> Option<String> {
        if key.contains('\0') {
            return None;
        }
        if key.len() > 1 && key.ends_with('/') {
            Some(key[..key.len() - 1].to_string())
        } else {
            Some(key.to_string())
        }
    }

    /// Inserts, overwriting any previous value. Returns false when the key
    /// fails normalization.
    pub fn insert(&mut self, key: &str, value: T) -> bool {
        match Self::normalize_key(key) {
            Some(k) => {
                self.entries.insert(k, value);
                true
            }
            None => false,
        }
    }

    pub fn find_exact(&self, key: &str) -> Option<&T> {
        let k = Self::normalize_query(key)?;
        self.entries.get(&k)
    }

    /// Returns the entry whose key is the longest prefix of `key` present in
    /// the tree, together with the stored key.
    pub fn find_longest_prefix(&self, key: &str) -> Option<(&str, &T)> {
        let k = Self::normalize_query(key)?;
        for len in (1..=k.len()).rev() {
            if !k.is_char_boundary(len) {
                continue;
            }
            if let Some((stored, value)) = self.entries.get_key_value(&k[..len]) {
                return Some((stored.as_str(), value));
            }
        }
        None
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        let k = Self::normalize_key(key)?;
        self.entries.remove(&k)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.find_exact(key).is_some()
    }

    /// Lexicographic iteration over stored keys.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &T)> {
        self.entries.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_lookup() {
        let mut tree = PrefixTree::new();
        tree.insert("/images", 1);
        tree.insert("/images/icons", 2);
        assert_eq!(tree.find_exact("/images"), Some(&1));
        assert_eq!(tree.find_exact("/images/"), Some(&1));
        assert_eq!(tree.find_exact("/imag"), None);
    }

    #[test]
    fn test_longest_prefix() {
        let mut tree = PrefixTree::new();
        tree.insert("/", 0);
        tree.insert("/images", 1);
        tree.insert("/images/icons", 2);

        let (key, value) = tree.find_longest_prefix("/images/icons/a.png").unwrap();
        assert_eq!(key, "/images/icons");
        assert_eq!(*value, 2);

        let (key, value) = tree.find_longest_prefix("/images/photo.jpg").unwrap();
        assert_eq!(key, "/images");
        assert_eq!(*value, 1);

        let (key, value) = tree.find_longest_prefix("/other").unwrap();
        assert_eq!(key, "/");
        assert_eq!(*value, 0);
    }

    #[test]
    fn test_longest_prefix_no_root() {
        let mut tree = PrefixTree::new();
        tree.insert("/api", 1);
        assert!(tree.find_longest_prefix("/web/page").is_none());
    }

    #[test]
    fn test_rejects_bad_keys() {
        let mut tree: PrefixTree<i32> = PrefixTree::new();
        assert!(!tree.insert("/a/../b", 1));
        assert!(!tree.insert("/a\0b", 1));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_query_with_dotdot_still_matches() {
        // Traversal attempts must still route to a location so the path
        // resolver can answer 403 instead of 404.
        let mut tree = PrefixTree::new();
        tree.insert("/", 0);
        let (key, _) = tree.find_longest_prefix("/../etc/passwd").unwrap();
        assert_eq!(key, "/");
    }

    #[test]
    fn test_trailing_slash_stripped() {
        let mut tree = PrefixTree::new();
        tree.insert("/upload/", 7);
        assert_eq!(tree.find_exact("/upload"), Some(&7));
        let (key, _) = tree.find_longest_prefix("/upload/file.txt").unwrap();
        assert_eq!(key, "/upload");
    }

    #[test]
    fn test_overwrite_and_remove() {
        let mut tree = PrefixTree::new();
        tree.insert("/a", 1);
        tree.insert("/a", 2);
        assert_eq!(tree.find_exact("/a"), Some(&2));
        assert_eq!(tree.remove("/a"), Some(2));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_iteration_order() {
        let mut tree = PrefixTree::new();
        tree.insert("/b", 2);
        tree.insert("/a", 1);
        tree.insert("/c", 3);
        let keys: Vec<&str> = tree.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["/a", "/b", "/c"]);
    }
}
