use crate::error::Error;
use crate::key::{ColKey, DataType, ObjKey, TableKey};
use crate::store::{Store, Table};
use crate::value::Value;
use std::cell::Cell;

///
/// Obj
///
/// Read accessor for one object. The resolved `(cluster, row)` position is
/// cached together with the table version it was observed under; on
/// version drift the position is transparently re-resolved, so stale
/// accessors self-heal and never fail on mere drift.
///

pub struct Obj<'a> {
    store: &'a Store,
    table: &'a Table,
    key: ObjKey,
    position: Cell<Option<(usize, usize)>>,
    observed_version: Cell<u64>,
}

impl<'a> Obj<'a> {
    pub(crate) fn new(store: &'a Store, table: &'a Table, key: ObjKey) -> Self {
        Self {
            store,
            table,
            key,
            position: Cell::new(None),
            observed_version: Cell::new(0),
        }
    }

    #[must_use]
    pub fn key(&self) -> ObjKey {
        self.key
    }

    #[must_use]
    pub fn table_key(&self) -> TableKey {
        self.table.key()
    }

    fn position(&self) -> Result<(usize, usize), Error> {
        let current = self.table.storage_version();
        if self.observed_version.get() == current {
            if let Some(position) = self.position.get() {
                return Ok(position);
            }
        }

        let position = self.table.locate(self.key).ok_or_else(|| {
            Error::stale_accessor(format!(
                "object {} no longer exists in table '{}'",
                self.key,
                self.table.name()
            ))
        })?;
        self.position.set(Some(position));
        self.observed_version.set(current);
        Ok(position)
    }

    /// Resolved value of `col`, null included.
    pub fn get(&self, col: ColKey) -> Result<Value, Error> {
        let (cluster, row) = self.position()?;
        let leaf = self.table.clusters[cluster].leaf(col);
        Ok(leaf.value_at(row, self.table.interner(col)))
    }

    /// Forward link target, or the null key.
    pub fn get_link(&self, col: ColKey) -> Result<ObjKey, Error> {
        let (cluster, row) = self.position()?;
        Ok(self.table.clusters[cluster].leaf(col).get_key(row))
    }

    /// Link-list targets in list order.
    pub fn get_link_list(&self, col: ColKey) -> Result<&'a [ObjKey], Error> {
        let (cluster, row) = self.position()?;
        Ok(self.table.clusters[cluster].leaf(col).get_key_list(row))
    }

    /// Origin keys referencing this object through a backlink column, in
    /// ascending key order.
    pub fn get_backlinks(&self, backlink_col: ColKey) -> Result<&'a [ObjKey], Error> {
        debug_assert_eq!(backlink_col.data_type(), DataType::Backlink);
        let (cluster, row) = self.position()?;
        Ok(self.table.clusters[cluster].leaf(backlink_col).get_key_list(row))
    }

    /// Table a link column points to (for backlinks: the origin table).
    #[must_use]
    pub fn get_target_table(&self, col: ColKey) -> Option<&'a Table> {
        self.table
            .get_link_target(col)
            .and_then(|key| self.store.table(key))
    }
}

impl Table {
    /// Accessor for one object of this table. Returns `None` for keys
    /// that do not resolve at the current version.
    #[must_use]
    pub fn object<'a>(&'a self, store: &'a Store, key: ObjKey) -> Option<Obj<'a>> {
        self.is_valid(key).then(|| Obj::new(store, self, key))
    }
}

///
/// TESTS
///
