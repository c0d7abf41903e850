use crate::key::{ColKey, DataType};
use crate::query::node::rel::RelOp;
use crate::query::node::NOT_FOUND;
use crate::query::ExecContext;
use crate::store::Cluster;

///
/// CountSource
///
/// What a count node counts: a primitive list column, a link list, one
/// backlink column, or the union of every backlink column
/// (`@links.@count`).
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum CountSource {
    ValueList(ColKey),
    LinkList(ColKey),
    Backlink(ColKey),
    AllBacklinks,
}

///
/// CountNode
///
/// `.@count` / `.@size` against a scalar, evaluated without building the
/// general expression machinery.
///

#[derive(Clone, Debug)]
pub(crate) struct CountNode {
    pub source: CountSource,
    pub op: RelOp,
    pub value: i64,
}

impl CountNode {
    pub(crate) fn find_first_local(
        &self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
        start: usize,
        end: usize,
    ) -> usize {
        for row in start..end {
            let count = self.count_at(cx, cluster, row);
            let matched = match self.op {
                RelOp::Equal => count == self.value,
                RelOp::NotEqual => count != self.value,
                RelOp::Less => count < self.value,
                RelOp::LessEqual => count <= self.value,
                RelOp::Greater => count > self.value,
                RelOp::GreaterEqual => count >= self.value,
            };
            if matched {
                return row;
            }
        }
        NOT_FOUND
    }

    fn count_at(&self, cx: &ExecContext<'_>, cluster: &Cluster, row: usize) -> i64 {
        match self.source {
            CountSource::ValueList(col) => cluster.leaf(col).get_value_list(row).len() as i64,
            CountSource::LinkList(col) | CountSource::Backlink(col) => {
                cluster.leaf(col).get_key_list(row).len() as i64
            }
            CountSource::AllBacklinks => cx
                .table
                .columns
                .iter()
                .filter(|column| column.key.data_type() == DataType::Backlink)
                .map(|column| cluster.leaf(column.key).get_key_list(row).len() as i64)
                .sum(),
        }
    }
}
