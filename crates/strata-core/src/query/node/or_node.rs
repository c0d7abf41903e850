use crate::error::Error;
use crate::query::node::{chain_find_first, ConditionNode, NOT_FOUND};
use crate::query::ExecContext;
use crate::store::Cluster;

///
/// OrNode
///
/// Disjunction over alternative condition chains. Each alternative keeps
/// its last result cached so alternatives whose pending match is still
/// ahead of `start` are not rescanned.
///

#[derive(Clone, Debug)]
pub(crate) struct OrNode {
    pub alternatives: Vec<Vec<ConditionNode>>,
    last: Vec<usize>,
    was_match: Vec<bool>,
}

impl OrNode {
    pub(crate) fn new(alternatives: Vec<Vec<ConditionNode>>) -> Self {
        let count = alternatives.len();
        Self {
            alternatives,
            last: vec![0; count],
            was_match: vec![false; count],
        }
    }

    fn reset_caches(&mut self) {
        self.last.fill(0);
        self.was_match.fill(false);
    }

    pub(crate) fn table_changed(&mut self, cx: &ExecContext<'_>) -> Result<(), Error> {
        for alternative in &mut self.alternatives {
            for node in alternative {
                node.table_changed(cx)?;
            }
        }
        Ok(())
    }

    pub(crate) fn init(&mut self, cx: &ExecContext<'_>, will_query_ranges: bool) -> Result<(), Error> {
        self.reset_caches();
        for alternative in &mut self.alternatives {
            for node in alternative {
                node.init(cx, will_query_ranges)?;
            }
        }
        Ok(())
    }

    pub(crate) fn cluster_changed(
        &mut self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
    ) -> Result<(), Error> {
        self.reset_caches();
        for alternative in &mut self.alternatives {
            for node in alternative {
                node.cluster_changed(cx, cluster)?;
            }
        }
        Ok(())
    }

    pub(crate) fn find_first_local(
        &mut self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
        start: usize,
        end: usize,
    ) -> Result<usize, Error> {
        let mut minimum = NOT_FOUND;
        for (i, alternative) in self.alternatives.iter_mut().enumerate() {
            let result = if self.was_match[i] && self.last[i] >= start {
                self.last[i]
            } else {
                let r = chain_find_first(alternative, cx, cluster, start, end)?;
                self.was_match[i] = r != NOT_FOUND;
                self.last[i] = r;
                r
            };
            if result < minimum {
                minimum = result;
            }
        }
        Ok(if minimum < end { minimum } else { NOT_FOUND })
    }
}
