use crate::error::Error;
use crate::query::node::{chain_find_first, ConditionNode, NOT_FOUND};
use crate::query::ExecContext;
use crate::store::Cluster;

///
/// NotNode
///
/// Negates an inner query while caching the first known match over the
/// most recently scanned row range. `find_first_local` dispatches over
/// the five relative positions of the request against the known range so
/// already-scanned rows are not re-evaluated.
///

#[derive(Clone, Debug)]
pub(crate) struct NotNode {
    pub cond: Vec<ConditionNode>,
    known_range_start: usize,
    known_range_end: usize,
    first_in_known_range: usize,
}

impl NotNode {
    pub(crate) fn new(cond: Vec<ConditionNode>) -> Self {
        Self {
            cond,
            known_range_start: 0,
            known_range_end: 0,
            first_in_known_range: NOT_FOUND,
        }
    }

    pub(crate) fn table_changed(&mut self, cx: &ExecContext<'_>) -> Result<(), Error> {
        for node in &mut self.cond {
            node.table_changed(cx)?;
        }
        Ok(())
    }

    pub(crate) fn init(&mut self, cx: &ExecContext<'_>, will_query_ranges: bool) -> Result<(), Error> {
        self.reset_known();
        for node in &mut self.cond {
            node.init(cx, will_query_ranges)?;
        }
        Ok(())
    }

    pub(crate) fn cluster_changed(
        &mut self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
    ) -> Result<(), Error> {
        // The cache is row-local to one cluster.
        self.reset_known();
        for node in &mut self.cond {
            node.cluster_changed(cx, cluster)?;
        }
        Ok(())
    }

    fn reset_known(&mut self) {
        self.known_range_start = 0;
        self.known_range_end = 0;
        self.first_in_known_range = NOT_FOUND;
    }

    /// A row matches when the inner query's first match over the
    /// single-row range does not exist.
    fn evaluate_at(
        &mut self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
        row: usize,
    ) -> Result<bool, Error> {
        Ok(chain_find_first(&mut self.cond, cx, cluster, row, row + 1)? == NOT_FOUND)
    }

    fn update_known(&mut self, start: usize, end: usize, first: usize) {
        self.known_range_start = start;
        self.known_range_end = end;
        self.first_in_known_range = first;
    }

    fn find_first_loop(
        &mut self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
        start: usize,
        end: usize,
    ) -> Result<usize, Error> {
        for row in start..end {
            if self.evaluate_at(cx, cluster, row)? {
                return Ok(row);
            }
        }
        Ok(NOT_FOUND)
    }

    pub(crate) fn find_first_local(
        &mut self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
        start: usize,
        end: usize,
    ) -> Result<usize, Error> {
        if start <= self.known_range_start && end >= self.known_range_end {
            self.find_first_covers_known(cx, cluster, start, end)
        } else if start >= self.known_range_start && end <= self.known_range_end {
            self.find_first_covered_by_known(cx, cluster, start, end)
        } else if start < self.known_range_start && end >= self.known_range_start {
            self.find_first_overlap_lower(cx, cluster, start, end)
        } else if start <= self.known_range_end && end > self.known_range_end {
            self.find_first_overlap_upper(cx, cluster, start, end)
        } else {
            // start > known_range_end || end < known_range_start
            self.find_first_no_overlap(cx, cluster, start, end)
        }
    }

    // CASE: start-end covers the known range
    // [    ######    ]
    fn find_first_covers_known(
        &mut self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
        start: usize,
        end: usize,
    ) -> Result<usize, Error> {
        debug_assert!(start <= self.known_range_start && end >= self.known_range_end);
        let known_start = self.known_range_start;
        let known_end = self.known_range_end;

        let mut result = self.find_first_loop(cx, cluster, start, known_start)?;
        if result != NOT_FOUND {
            self.update_known(start, known_end, result);
        } else if self.first_in_known_range != NOT_FOUND {
            result = self.first_in_known_range;
            self.update_known(start, known_end, result);
        } else {
            result = self.find_first_loop(cx, cluster, known_end, end)?;
            self.update_known(start, end, result);
        }
        Ok(result)
    }

    // CASE: the known range covers start-end
    // ###[#####]###
    fn find_first_covered_by_known(
        &mut self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
        start: usize,
        end: usize,
    ) -> Result<usize, Error> {
        debug_assert!(start >= self.known_range_start && end <= self.known_range_end);
        if self.first_in_known_range != NOT_FOUND {
            if self.first_in_known_range > end {
                return Ok(NOT_FOUND);
            } else if self.first_in_known_range >= start {
                return Ok(self.first_in_known_range);
            }
        }
        // The first known match is before start, so the cache cannot
        // answer this request.
        self.find_first_loop(cx, cluster, start, end)
    }

    // CASE: partial overlap, lower end
    // [   ###]#####
    fn find_first_overlap_lower(
        &mut self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
        start: usize,
        end: usize,
    ) -> Result<usize, Error> {
        debug_assert!(
            start < self.known_range_start
                && end >= self.known_range_start
                && end <= self.known_range_end
        );
        let known_start = self.known_range_start;
        let known_end = self.known_range_end;

        let mut result = self.find_first_loop(cx, cluster, start, known_start)?;
        if result == NOT_FOUND {
            result = self.first_in_known_range;
        }
        self.update_known(start, known_end, result);
        Ok(if result < end { result } else { NOT_FOUND })
    }

    // CASE: partial overlap, upper end
    // ####[###    ]
    fn find_first_overlap_upper(
        &mut self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
        start: usize,
        end: usize,
    ) -> Result<usize, Error> {
        debug_assert!(
            start <= self.known_range_end
                && start >= self.known_range_start
                && end > self.known_range_end
        );
        let known_start = self.known_range_start;
        let known_end = self.known_range_end;

        let result;
        if self.first_in_known_range != NOT_FOUND {
            if self.first_in_known_range >= start {
                result = self.first_in_known_range;
                self.update_known(known_start, end, result);
            } else {
                result = self.find_first_loop(cx, cluster, start, end)?;
                self.update_known(known_start, end, self.first_in_known_range);
            }
        } else {
            result = self.find_first_loop(cx, cluster, known_end, end)?;
            self.update_known(known_start, end, result);
        }
        Ok(result)
    }

    // CASE: no overlap
    // ### [    ]   or    [    ] ####
    // The cache is replaced only when the new range is strictly wider.
    fn find_first_no_overlap(
        &mut self,
        cx: &ExecContext<'_>,
        cluster: &Cluster,
        start: usize,
        end: usize,
    ) -> Result<usize, Error> {
        debug_assert!(
            (start < self.known_range_start && end < self.known_range_start)
                || (start > self.known_range_end && end > self.known_range_end)
        );
        let result = self.find_first_loop(cx, cluster, start, end)?;
        if end - start > self.known_range_end - self.known_range_start {
            self.update_known(start, end, result);
        }
        Ok(result)
    }

    #[cfg(test)]
    pub(crate) fn known_range(&self) -> (usize, usize, usize) {
        (
            self.known_range_start,
            self.known_range_end,
            self.first_in_known_range,
        )
    }
}
