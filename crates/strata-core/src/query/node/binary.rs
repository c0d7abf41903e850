use crate::key::ColKey;
use crate::query::node::NOT_FOUND;
use crate::query::ExecContext;
use crate::store::Cluster;
use crate::value::{bin_begins_with, bin_contains, bin_ends_with, bin_equal, bin_like};

///
/// BinMatchOp
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum BinMatchOp {
    Equal,
    NotEqual,
    Contains,
    BeginsWith,
    EndsWith,
    Like,
}

impl BinMatchOp {
    pub(crate) fn token(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Contains => "CONTAINS",
            Self::BeginsWith => "BEGINSWITH",
            Self::EndsWith => "ENDSWITH",
            Self::Like => "LIKE",
        }
    }
}

///
/// BinaryMatchNode
///
/// The string operator set over byte strings. The case-insensitive
/// variants apply ASCII case folding only.
///

#[derive(Clone, Debug)]
pub(crate) struct BinaryMatchNode {
    pub col: ColKey,
    pub op: BinMatchOp,
    pub case_sensitive: bool,
    pub value: Option<Vec<u8>>,
}

impl BinaryMatchNode {
    pub(crate) fn find_first_local(
        &self,
        _cx: &ExecContext<'_>,
        cluster: &Cluster,
        start: usize,
        end: usize,
    ) -> usize {
        let leaf = cluster.leaf(self.col);
        for row in start..end {
            let actual = leaf.get_binary(row);
            let matched = match self.op {
                BinMatchOp::Equal => match (actual, &self.value) {
                    (Some(a), Some(n)) => bin_equal(a, n, self.case_sensitive),
                    (None, None) => true,
                    _ => false,
                },
                BinMatchOp::NotEqual => match (actual, &self.value) {
                    (Some(a), Some(n)) => !bin_equal(a, n, self.case_sensitive),
                    (None, None) => false,
                    _ => true,
                },
                BinMatchOp::Contains => match (actual, &self.value) {
                    (Some(a), Some(n)) => bin_contains(a, n, self.case_sensitive),
                    _ => false,
                },
                BinMatchOp::BeginsWith => match (actual, &self.value) {
                    (Some(a), Some(n)) => bin_begins_with(a, n, self.case_sensitive),
                    _ => false,
                },
                BinMatchOp::EndsWith => match (actual, &self.value) {
                    (Some(a), Some(n)) => bin_ends_with(a, n, self.case_sensitive),
                    _ => false,
                },
                BinMatchOp::Like => match (actual, &self.value) {
                    (Some(a), Some(n)) => bin_like(a, n, self.case_sensitive),
                    _ => false,
                },
            };
            if matched {
                return row;
            }
        }
        NOT_FOUND
    }
}
