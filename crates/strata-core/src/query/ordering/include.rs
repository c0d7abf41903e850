use crate::error::Error;
use crate::key::{ObjKey, TableKey};
use crate::query::link_map::{LinkHop, LinkKind};
use crate::store::{Store, Table};
use std::collections::BTreeSet;

///
/// IncludePath
///
/// One validated include path: every segment is a link, the terminal
/// segment is a backlink column.
///

#[derive(Clone, Debug)]
pub(crate) struct IncludePath {
    pub hops: Vec<LinkHop>,
    pub display: String,
}

impl IncludePath {
    pub(crate) fn new(hops: Vec<LinkHop>, display: String) -> Result<Self, Error> {
        match hops.last() {
            Some(hop) if hop.kind == LinkKind::Backlink => Ok(Self { hops, display }),
            _ => Err(Error::invalid_query(format!(
                "The last property in the included path '{display}' must be a backlink column"
            ))),
        }
    }
}

///
/// IncludeDescriptor
///
/// Non-filtering descriptor recording which backlink paths the caller
/// wants to walk later. `report_included_backlinks` enumerates them per
/// result row: at every backlink hop the reporter receives the origin
/// table and the set of origin keys reached so far.
///

#[derive(Clone, Debug, Default)]
pub struct IncludeDescriptor {
    paths: Vec<IncludePath>,
}

impl IncludeDescriptor {
    pub(crate) fn from_paths(paths: Vec<IncludePath>) -> Self {
        Self { paths }
    }

    pub(crate) fn append(&mut self, other: Self) {
        self.paths.extend(other.paths);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub(crate) fn describe(&self) -> String {
        let parts: Vec<&str> = self.paths.iter().map(|p| p.display.as_str()).collect();
        format!("INCLUDE({})", parts.join(", "))
    }

    pub(crate) fn collect_dependencies(&self, tables: &mut Vec<TableKey>) {
        for path in &self.paths {
            for hop in &path.hops {
                if !tables.contains(&hop.origin_table) {
                    tables.push(hop.origin_table);
                }
            }
        }
    }

    /// Walk every include path from `key`, reporting the reached key set
    /// at each backlink hop, in hop order.
    pub fn report_included_backlinks(
        &self,
        store: &Store,
        table: &Table,
        key: ObjKey,
        reporter: &mut dyn FnMut(&Table, &BTreeSet<ObjKey>),
    ) -> Result<(), Error> {
        for path in &self.paths {
            let mut current_table = table;
            let mut current: BTreeSet<ObjKey> = BTreeSet::new();
            current.insert(key);

            for hop in &path.hops {
                let hop_table = store.table_or_stale(hop.origin_table)?;
                debug_assert_eq!(hop_table.key(), current_table.key());
                let mut next = BTreeSet::new();
                for &from in &current {
                    let Some(obj) = hop_table.object(store, from) else {
                        continue;
                    };
                    match hop.kind {
                        LinkKind::Single => {
                            let target = obj.get_link(hop.col)?;
                            if !target.is_null() {
                                next.insert(target);
                            }
                        }
                        LinkKind::List => {
                            next.extend(obj.get_link_list(hop.col)?.iter().copied());
                        }
                        LinkKind::Backlink => {
                            next.extend(obj.get_backlinks(hop.col)?.iter().copied());
                        }
                    }
                }

                let target_table = hop_table
                    .get_link_target(hop.col)
                    .and_then(|key| store.table(key))
                    .ok_or_else(|| Error::stale_accessor("include hop lost its target table"))?;
                if hop.kind == LinkKind::Backlink {
                    reporter(target_table, &next);
                }
                current = next;
                current_table = target_table;
            }
        }
        Ok(())
    }
}
