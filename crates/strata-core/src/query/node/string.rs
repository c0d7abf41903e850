use crate::key::{ColKey, ObjKey};
use crate::obs::sink::{self, MetricsEvent};
use crate::query::node::NOT_FOUND;
use crate::query::ExecContext;
use crate::store::{Cluster, FindRes};
use crate::value::{str_begins_with, str_contains, str_ends_with, str_equal, str_like};
use std::collections::BTreeSet;

/// Block size of the multi-needle haystack scan.
const NEEDLE_BLOCK: usize = 20;

///
/// IndexCursor
///
/// Walk state over a sorted list of index matches. The engine scans
/// cluster-ascending, so the cursor only ever advances; a first key below
/// the last seen start means the caller restarted the range and the
/// cursor resets.
///

#[derive(Clone, Debug, Default)]
pub(crate) struct IndexCursor {
    matches: Vec<ObjKey>,
    results_start: usize,
    results_end: usize,
    results_ndx: usize,
    actual_key: ObjKey,
    last_start_key: ObjKey,
}

impl IndexCursor {
    fn load(&mut self, matches: Vec<ObjKey>) {
        self.results_start = 0;
        self.results_end = matches.len();
        self.results_ndx = 0;
        self.actual_key = matches.first().copied().unwrap_or_default();
        self.last_start_key = ObjKey::null();
        self.matches = matches;
    }

    /// Key-ascending walk translated into cluster-local rows:
    /// 1. reset on a non-monotonic start,
    /// 2. advance past keys before the window,
    /// 3. bail once the pending key leaves the cluster,
    /// 4. translate the pending key into a row.
    fn find_first_local(&mut self, cluster: &Cluster, start: usize, end: usize) -> usize {
        if start >= end {
            return NOT_FOUND;
        }
        let first_key = cluster.get_real_key(start);
        if first_key < self.last_start_key {
            self.results_ndx = self.results_start;
            self.actual_key = if self.results_start == self.results_end {
                ObjKey::null()
            } else {
                self.matches[self.results_start]
            };
        }
        self.last_start_key = first_key;

        if self.results_ndx < self.results_end {
            while first_key > self.actual_key {
                self.results_ndx += 1;
                if self.results_ndx == self.results_end {
                    return NOT_FOUND;
                }
                self.actual_key = self.matches[self.results_ndx];
            }

            let last_key = cluster.get_real_key(end - 1);
            if self.actual_key > last_key {
                return NOT_FOUND;
            }
            return cluster.lower_bound_key(self.actual_key.0 - cluster.offset());
        }
        NOT_FOUND
    }
}

///
/// StringEqualNode
///
/// Case-sensitive string equality with an index fast path and
/// multi-needle `IN` fusion. Fused nodes bypass the index and run a
/// block-local haystack scan over the owned needle set.
///

#[derive(Clone, Debug)]
pub(crate) struct StringEqualNode {
    pub col: ColKey,
    pub value: Option<String>,
    pub needles: BTreeSet<String>,
    pub has_null_needle: bool,
    has_index: bool,
    cursor: IndexCursor,
}

impl StringEqualNode {
    pub(crate) fn new(col: ColKey, value: Option<String>) -> Self {
        Self {
            col,
            value,
            needles: BTreeSet::new(),
            has_null_needle: false,
            has_index: false,
            cursor: IndexCursor::default(),
        }
    }

    pub(crate) fn is_fused(&self) -> bool {
        !self.needles.is_empty() || self.has_null_needle
    }

    /// Merge another equality on the same column into this node's needle
    /// set. Build-time only, before the first evaluation.
    pub(crate) fn consume_condition(&mut self, other: &Self) -> bool {
        if self.col != other.col || other.is_fused() {
            return false;
        }
        // Indexed equality per needle loses to a linear haystack scan
        // for small needle sets, so fused nodes drop the index.
        self.has_index = false;
        if !self.is_fused() {
            match self.value.take() {
                Some(value) => {
                    self.needles.insert(value);
                }
                None => self.has_null_needle = true,
            }
        }
        match &other.value {
            Some(value) => {
                self.needles.insert(value.clone());
            }
            None => self.has_null_needle = true,
        }
        true
    }

    /// Cost tier selection: indexed ≈ 0, string-enum ≈ 1, unindexed ≈ 10.
    pub(crate) fn init(&mut self, cx: &ExecContext<'_>, _will_query_ranges: bool) -> f64 {
        let indexed = cx.table.search_index(self.col).is_some()
            || cx.table.get_primary_key_column() == Some(self.col);
        self.has_index = indexed && !self.is_fused();

        if self.has_index {
            self.search_index_init(cx);
            0.0
        } else if self.col.is_enum_strings() {
            1.0
        } else {
            10.0
        }
    }

    fn search_index_init(&mut self, cx: &ExecContext<'_>) {
        let value = self.value.as_deref();
        let matches = if cx.table.get_primary_key_column() == Some(self.col) {
            cx.table.find_first_string(self.col, value).into_iter().collect()
        } else if let Some(index) = cx.table.search_index(self.col) {
            match index.find_all_no_copy(value) {
                FindRes::NotFound => Vec::new(),
                FindRes::Single(key) => vec![key],
                FindRes::Column(keys) => keys.to_vec(),
            }
        } else {
            Vec::new()
        };
        sink::record(MetricsEvent::IndexLookup {
            hits: matches.len() as u64,
        });
        self.cursor.load(matches);
    }

    pub(crate) fn find_first_local(
        &mut self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
        start: usize,
        end: usize,
    ) -> usize {
        if self.has_index {
            return self.cursor.find_first_local(cluster, start, end);
        }

        let leaf = cluster.leaf(self.col);
        let interner = cx.table.interner(self.col);

        if self.is_fused() {
            // Block-local multi-pattern scan.
            let mut row = start;
            while row < end {
                let block_end = end.min(row + NEEDLE_BLOCK);
                for r in row..block_end {
                    match leaf.get_str(r, interner) {
                        Some(s) => {
                            if self.needles.contains(s) {
                                return r;
                            }
                        }
                        None => {
                            if self.has_null_needle {
                                return r;
                            }
                        }
                    }
                }
                row = block_end;
            }
            return NOT_FOUND;
        }

        let needle = self.value.as_deref();
        for row in start..end {
            let actual = leaf.get_str(row, interner);
            let matched = match (actual, needle) {
                (Some(a), Some(n)) => str_equal(a, n, true),
                (None, None) => true,
                _ => false,
            };
            if matched {
                return row;
            }
        }
        NOT_FOUND
    }
}

///
/// StringEqualInsNode
///
/// Case-insensitive equality. The indexed path always walks the index
/// (matches come back sorted by key); unindexed falls back to a folded
/// comparison per row.
///

#[derive(Clone, Debug)]
pub(crate) struct StringEqualInsNode {
    pub col: ColKey,
    pub value: Option<String>,
    has_index: bool,
    cursor: IndexCursor,
}

impl StringEqualInsNode {
    pub(crate) fn new(col: ColKey, value: Option<String>) -> Self {
        Self {
            col,
            value,
            has_index: false,
            cursor: IndexCursor::default(),
        }
    }

    pub(crate) fn init(&mut self, cx: &ExecContext<'_>, _will_query_ranges: bool) -> f64 {
        self.has_index = cx.table.search_index(self.col).is_some();
        if self.has_index {
            let matches = cx
                .table
                .search_index(self.col)
                .map(|index| index.find_all(self.value.as_deref(), true))
                .unwrap_or_default();
            sink::record(MetricsEvent::IndexLookup {
                hits: matches.len() as u64,
            });
            self.cursor.load(matches);
            0.0
        } else if self.col.is_enum_strings() {
            1.0
        } else {
            10.0
        }
    }

    pub(crate) fn find_first_local(
        &mut self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
        start: usize,
        end: usize,
    ) -> usize {
        if self.has_index {
            return self.cursor.find_first_local(cluster, start, end);
        }

        let leaf = cluster.leaf(self.col);
        let interner = cx.table.interner(self.col);
        let needle = self.value.as_deref();
        for row in start..end {
            let matched = match (leaf.get_str(row, interner), needle) {
                (Some(a), Some(n)) => str_equal(a, n, false),
                (None, None) => true,
                _ => false,
            };
            if matched {
                return row;
            }
        }
        NOT_FOUND
    }
}

///
/// StrMatchOp
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum StrMatchOp {
    NotEqual,
    Contains,
    BeginsWith,
    EndsWith,
    Like,
}

impl StrMatchOp {
    pub(crate) fn token(self) -> &'static str {
        match self {
            Self::NotEqual => "!=",
            Self::Contains => "CONTAINS",
            Self::BeginsWith => "BEGINSWITH",
            Self::EndsWith => "ENDSWITH",
            Self::Like => "LIKE",
        }
    }
}

///
/// StringMatchNode
///
/// Substring/wildcard matchers, each with a case-insensitive twin via
/// the `case_sensitive` flag. A null needle never matches.
///

#[derive(Clone, Debug)]
pub(crate) struct StringMatchNode {
    pub col: ColKey,
    pub op: StrMatchOp,
    pub case_sensitive: bool,
    pub value: Option<String>,
}

impl StringMatchNode {
    pub(crate) fn find_first_local(
        &self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
        start: usize,
        end: usize,
    ) -> usize {
        let leaf = cluster.leaf(self.col);
        let interner = cx.table.interner(self.col);
        let needle = self.value.as_deref();

        // Inequality has its own null rules: a null row differs from any
        // non-null needle.
        if self.op == StrMatchOp::NotEqual {
            for row in start..end {
                let differs = match (leaf.get_str(row, interner), needle) {
                    (Some(a), Some(n)) => !str_equal(a, n, self.case_sensitive),
                    (None, None) => false,
                    _ => true,
                };
                if differs {
                    return row;
                }
            }
            return NOT_FOUND;
        }

        let Some(needle) = needle else {
            return NOT_FOUND;
        };
        for row in start..end {
            let Some(hay) = leaf.get_str(row, interner) else {
                continue;
            };
            let matched = match self.op {
                StrMatchOp::NotEqual => unreachable!("handled above"),
                StrMatchOp::Contains => str_contains(hay, needle, self.case_sensitive),
                StrMatchOp::BeginsWith => str_begins_with(hay, needle, self.case_sensitive),
                StrMatchOp::EndsWith => str_ends_with(hay, needle, self.case_sensitive),
                StrMatchOp::Like => str_like(hay, needle, self.case_sensitive),
            };
            if matched {
                return row;
            }
        }
        NOT_FOUND
    }
}
