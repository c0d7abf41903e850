use crate::key::ObjKey;
use crate::value::fold_ci;
use std::collections::BTreeMap;

///
/// FindRes
///
/// Zero-copy index lookup result: either nothing, a single key, or a
/// borrowed slice of the index's own sorted key column.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FindRes<'a> {
    NotFound,
    Single(ObjKey),
    Column(&'a [ObjKey]),
}

///
/// StringIndex
///
/// Secondary index over a string column. Keys under one value are kept in
/// ascending object-key order, which is what lets indexed equality nodes
/// report matches in key order without sorting.
///

#[derive(Clone, Debug, Default)]
pub struct StringIndex {
    entries: BTreeMap<String, Vec<ObjKey>>,
    nulls: Vec<ObjKey>,
}

impl StringIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, value: Option<&str>, key: ObjKey) {
        let bucket = match value {
            Some(value) => self.entries.entry(value.to_string()).or_default(),
            None => &mut self.nulls,
        };
        if let Err(pos) = bucket.binary_search(&key) {
            bucket.insert(pos, key);
        }
    }

    pub(crate) fn remove(&mut self, value: Option<&str>, key: ObjKey) {
        match value {
            Some(value) => {
                if let Some(bucket) = self.entries.get_mut(value) {
                    if let Ok(pos) = bucket.binary_search(&key) {
                        bucket.remove(pos);
                    }
                    if bucket.is_empty() {
                        self.entries.remove(value);
                    }
                }
            }
            None => {
                if let Ok(pos) = self.nulls.binary_search(&key) {
                    self.nulls.remove(pos);
                }
            }
        }
    }

    /// First key carrying `value`, if any.
    #[must_use]
    pub fn find_first(&self, value: Option<&str>) -> Option<ObjKey> {
        match self.find_all_no_copy(value) {
            FindRes::NotFound => None,
            FindRes::Single(key) => Some(key),
            FindRes::Column(keys) => keys.first().copied(),
        }
    }

    /// All keys carrying `value`, ascending. The case-insensitive form
    /// walks the whole index and merges buckets whose folded key matches.
    #[must_use]
    pub fn find_all(&self, value: Option<&str>, case_insensitive: bool) -> Vec<ObjKey> {
        if !case_insensitive {
            return match self.find_all_no_copy(value) {
                FindRes::NotFound => Vec::new(),
                FindRes::Single(key) => vec![key],
                FindRes::Column(keys) => keys.to_vec(),
            };
        }

        let Some(value) = value else {
            return self.nulls.clone();
        };
        let folded = fold_ci(value);
        let mut out = Vec::new();
        for (stored, keys) in &self.entries {
            if fold_ci(stored) == folded {
                out.extend_from_slice(keys);
            }
        }
        out.sort_unstable();
        out
    }

    /// Case-sensitive lookup without copying the key column.
    #[must_use]
    pub fn find_all_no_copy(&self, value: Option<&str>) -> FindRes<'_> {
        let bucket = match value {
            Some(value) => self.entries.get(value).map(Vec::as_slice),
            None => Some(self.nulls.as_slice()),
        };
        match bucket {
            None | Some([]) => FindRes::NotFound,
            Some([single]) => FindRes::Single(*single),
            Some(keys) => FindRes::Column(keys),
        }
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::{FindRes, StringIndex};
    use crate::key::ObjKey;

    #[test]
    fn keys_are_reported_in_ascending_order() {
        let mut index = StringIndex::new();
        index.insert(Some("a"), ObjKey(9));
        index.insert(Some("a"), ObjKey(2));
        index.insert(Some("a"), ObjKey(5));

        assert_eq!(
            index.find_all(Some("a"), false),
            vec![ObjKey(2), ObjKey(5), ObjKey(9)]
        );
        assert_eq!(index.find_first(Some("a")), Some(ObjKey(2)));
    }

    #[test]
    fn no_copy_result_distinguishes_single_and_column() {
        let mut index = StringIndex::new();
        assert_eq!(index.find_all_no_copy(Some("x")), FindRes::NotFound);

        index.insert(Some("x"), ObjKey(1));
        assert_eq!(index.find_all_no_copy(Some("x")), FindRes::Single(ObjKey(1)));

        index.insert(Some("x"), ObjKey(2));
        assert!(matches!(
            index.find_all_no_copy(Some("x")),
            FindRes::Column(&[ObjKey(1), ObjKey(2)])
        ));
    }

    #[test]
    fn case_insensitive_lookup_merges_folded_buckets() {
        let mut index = StringIndex::new();
        index.insert(Some("Foo"), ObjKey(3));
        index.insert(Some("foo"), ObjKey(1));
        index.insert(Some("FOO"), ObjKey(2));
        index.insert(Some("bar"), ObjKey(4));

        assert_eq!(
            index.find_all(Some("foo"), true),
            vec![ObjKey(1), ObjKey(2), ObjKey(3)]
        );
    }

    #[test]
    fn removal_drops_empty_buckets() {
        let mut index = StringIndex::new();
        index.insert(Some("gone"), ObjKey(1));
        index.remove(Some("gone"), ObjKey(1));

        assert_eq!(index.find_all_no_copy(Some("gone")), FindRes::NotFound);
    }

    #[test]
    fn null_values_index_separately() {
        let mut index = StringIndex::new();
        index.insert(None, ObjKey(7));
        index.insert(Some(""), ObjKey(8));

        assert_eq!(index.find_all(None, false), vec![ObjKey(7)]);
        assert_eq!(index.find_all(Some(""), false), vec![ObjKey(8)]);
    }
}
