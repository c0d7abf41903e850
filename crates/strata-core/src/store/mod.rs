//! In-memory clustered column store.
//!
//! Tables live in an arena keyed by `TableKey`; objects are clustered by
//! key range with one typed leaf per column and cluster. This is the
//! substrate the query engine scans; it honors the interfaces the engine
//! depends on (cluster iteration, typed leaves, string indexes, backlink
//! maintenance, per-table storage versions).

mod cluster;
mod index;
mod leaf;
mod obj;
mod table;

use crate::error::Error;
use crate::key::{ColAttrs, ColKey, DataType, ObjKey, TableKey};
use crate::value::Value;
use crate::MAX_STRING_SIZE;

// re-exports
pub use cluster::Cluster;
pub use index::{FindRes, StringIndex};
pub use obj::Obj;
pub use table::Table;
pub(crate) use leaf::Leaf;

///
/// Store
///
/// Arena of tables. All cross-table mutation (links and their inverse
/// backlinks) goes through the store so both sides stay consistent and
/// both versions are bumped.
///

#[derive(Clone, Debug, Default)]
pub struct Store {
    tables: Vec<Table>,
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    ///
    /// TABLES
    ///

    pub fn add_table(&mut self, name: impl Into<String>) -> TableKey {
        let key = TableKey(u32::try_from(self.tables.len()).unwrap_or(u32::MAX));
        self.tables.push(Table::new(key, name));
        key
    }

    #[must_use]
    pub fn table(&self, key: TableKey) -> Option<&Table> {
        self.tables.get(key.as_index())
    }

    #[must_use]
    pub fn table_by_name(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|table| table.name() == name)
    }

    pub(crate) fn table_or_stale(&self, key: TableKey) -> Result<&Table, Error> {
        self.table(key)
            .ok_or_else(|| Error::stale_accessor(format!("unknown {key}")))
    }

    fn table_mut(&mut self, key: TableKey) -> Result<&mut Table, Error> {
        self.tables
            .get_mut(key.as_index())
            .ok_or_else(|| Error::stale_accessor(format!("unknown {key}")))
    }

    ///
    /// SCHEMA
    ///

    /// Add a non-link column.
    pub fn add_column(
        &mut self,
        table: TableKey,
        name: impl Into<String>,
        data_type: DataType,
        attrs: ColAttrs,
    ) -> Result<ColKey, Error> {
        if data_type.is_link() {
            return Err(Error::invalid_query(
                "link columns are added with add_link_column",
            ));
        }
        if attrs.contains(ColAttrs::INDEXED) && data_type != DataType::String {
            return Err(Error::unsupported(format!(
                "search indexes are supported on string columns only, not '{data_type}'"
            )));
        }
        Ok(self
            .table_mut(table)?
            .add_column_inner(name, data_type, attrs, None, None))
    }

    /// Add a forward link column and its inverse backlink column on the
    /// target table.
    pub fn add_link_column(
        &mut self,
        table: TableKey,
        name: impl Into<String>,
        target: TableKey,
        list: bool,
    ) -> Result<ColKey, Error> {
        let name = name.into();
        let attrs = if list {
            ColAttrs::LIST
        } else {
            ColAttrs::NULLABLE
        };
        let origin_name = self.table_or_stale(table)?.name().to_string();
        let col = self
            .table_mut(table)?
            .add_column_inner(name.clone(), DataType::Link, attrs, Some(target), None);

        let backlink_name = format!("@backlink.{origin_name}.{name}");
        self.table_mut(target)?.add_column_inner(
            backlink_name,
            DataType::Backlink,
            ColAttrs::empty(),
            Some(table),
            Some(col),
        );
        Ok(col)
    }

    /// Declare a column as the table's primary key. The column should be
    /// indexed for the lookup fast path to engage.
    pub fn set_primary_key_column(&mut self, table: TableKey, col: ColKey) -> Result<(), Error> {
        self.table_mut(table)?.set_primary_key_column(col);
        Ok(())
    }

    ///
    /// OBJECTS
    ///

    pub fn create_object(&mut self, table: TableKey) -> Result<ObjKey, Error> {
        Ok(self.table_mut(table)?.create_row())
    }

    /// Write one column of one object. Link and link-list writes maintain
    /// the inverse backlink sets; indexed string writes maintain the
    /// search index.
    pub fn set(
        &mut self,
        table: TableKey,
        key: ObjKey,
        col: ColKey,
        value: Value,
    ) -> Result<(), Error> {
        check_value_size(&value)?;
        match col.data_type() {
            DataType::Link => self.set_link_value(table, key, col, value),
            DataType::Backlink => Err(Error::invalid_query(
                "backlink columns are maintained by the store and cannot be written",
            )),
            _ => self.set_plain_value(table, key, col, value),
        }
    }

    fn set_plain_value(
        &mut self,
        table: TableKey,
        key: ObjKey,
        col: ColKey,
        value: Value,
    ) -> Result<(), Error> {
        let table = self.table_mut(table)?;
        let (cluster, row) = table
            .locate(key)
            .ok_or_else(|| Error::stale_accessor(format!("object {key} not found")))?;

        if value.is_null() && !col.is_nullable() && !col.is_list() {
            return Err(Error::invalid_query(format!(
                "column '{}' is not nullable",
                table.column_name(col)
            )));
        }

        // Index maintenance happens against the previous value.
        if col.is_indexed() {
            let previous = table.clusters[cluster]
                .leaf(col)
                .get_str(row, table.interner(col))
                .map(ToString::to_string);
            let next = match &value {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => {
                    return Err(type_mismatch(table.column_name(col), col.data_type(), other))
                }
            };
            if let Some(index) = table.indexes.get_mut(&col) {
                index.remove(previous.as_deref(), key);
                index.insert(next.as_deref(), key);
            }
        }

        if col.is_enum_strings() {
            let id = match &value {
                Value::Null => 0,
                Value::String(s) => {
                    let interner = table.columns[col.index()]
                        .interner
                        .as_mut()
                        .expect("enum-string column carries an interner");
                    interner.intern(s)
                }
                other => {
                    return Err(type_mismatch(table.column_name(col), col.data_type(), other))
                }
            };
            table.clusters[cluster].leaf_mut(col).set_enum_id(row, id);
            table.bump_version();
            return Ok(());
        }

        if col.is_list() {
            let Value::List(items) = value else {
                return Err(type_mismatch(table.column_name(col), col.data_type(), &value));
            };
            table.clusters[cluster].leaf_mut(col).set_value_list(row, items);
            table.bump_version();
            return Ok(());
        }

        let leaf = table.clusters[cluster].leaf_mut(col);
        match (col.data_type(), &value) {
            (DataType::Int, Value::Int(v)) => leaf.set_int(row, Some(*v)),
            (DataType::Int, Value::Null) => leaf.set_int(row, None),
            (DataType::Bool, Value::Bool(v)) => leaf.set_bool(row, Some(*v)),
            (DataType::Bool, Value::Null) => leaf.set_bool(row, None),
            (DataType::Float, Value::Float(v)) => leaf.set_float(row, Some(*v)),
            (DataType::Float, Value::Null) => leaf.set_float(row, None),
            (DataType::Double, Value::Double(v)) => leaf.set_double(row, Some(*v)),
            (DataType::Double, Value::Null) => leaf.set_double(row, None),
            (DataType::String, Value::String(v)) => leaf.set_string(row, Some(v.clone())),
            (DataType::String, Value::Null) => leaf.set_string(row, None),
            (DataType::Binary, Value::Binary(v)) => leaf.set_binary(row, Some(v.clone())),
            (DataType::Binary, Value::Null) => leaf.set_binary(row, None),
            (DataType::Timestamp, Value::Timestamp(v)) => leaf.set_timestamp(row, Some(*v)),
            (DataType::Timestamp, Value::Null) => leaf.set_timestamp(row, None),
            _ => return Err(type_mismatch(table.column_name(col), col.data_type(), &value)),
        }
        table.bump_version();
        Ok(())
    }

    fn set_link_value(
        &mut self,
        table_key: TableKey,
        key: ObjKey,
        col: ColKey,
        value: Value,
    ) -> Result<(), Error> {
        let target_table = self
            .table_or_stale(table_key)?
            .get_link_target(col)
            .ok_or_else(|| Error::invalid_query("link column has no target table"))?;
        let backlink_col = self
            .table_or_stale(target_table)?
            .find_backlink_column(table_key, col)
            .ok_or_else(|| Error::invalid_query("link column has no backlink column"))?;

        if col.is_list() {
            let new_targets: Vec<ObjKey> = match value {
                Value::List(items) => items
                    .into_iter()
                    .map(|item| {
                        item.as_link()
                            .ok_or_else(|| Error::invalid_query("link list takes link values"))
                    })
                    .collect::<Result<_, _>>()?,
                other => {
                    let table = self.table_or_stale(table_key)?;
                    return Err(type_mismatch(table.column_name(col), col.data_type(), &other));
                }
            };

            let table = self.table_mut(table_key)?;
            let (cluster, row) = table
                .locate(key)
                .ok_or_else(|| Error::stale_accessor(format!("object {key} not found")))?;
            let old_targets = table.clusters[cluster].leaf(col).get_key_list(row).to_vec();
            table.clusters[cluster]
                .leaf_mut(col)
                .set_key_list(row, new_targets.clone());
            table.bump_version();

            self.update_backlinks(target_table, backlink_col, key, &old_targets, &new_targets)?;
            return Ok(());
        }

        let new_target = match value {
            Value::Null => ObjKey::null(),
            Value::Link(k) => k,
            other => {
                let table = self.table_or_stale(table_key)?;
                return Err(type_mismatch(table.column_name(col), col.data_type(), &other));
            }
        };

        let table = self.table_mut(table_key)?;
        let (cluster, row) = table
            .locate(key)
            .ok_or_else(|| Error::stale_accessor(format!("object {key} not found")))?;
        let old_target = table.clusters[cluster].leaf(col).get_key(row);
        table.clusters[cluster].leaf_mut(col).set_key(row, new_target);
        table.bump_version();

        let old: Vec<ObjKey> = (!old_target.is_null()).then_some(old_target).into_iter().collect();
        let new: Vec<ObjKey> = (!new_target.is_null()).then_some(new_target).into_iter().collect();
        self.update_backlinks(target_table, backlink_col, key, &old, &new)
    }

    fn update_backlinks(
        &mut self,
        target_table: TableKey,
        backlink_col: ColKey,
        origin: ObjKey,
        removed: &[ObjKey],
        added: &[ObjKey],
    ) -> Result<(), Error> {
        let table = self.table_mut(target_table)?;
        for &target in removed {
            if let Some((cluster, row)) = table.locate(target) {
                table.clusters[cluster]
                    .leaf_mut(backlink_col)
                    .backlink_remove(row, origin);
            }
        }
        for &target in added {
            let (cluster, row) = table
                .locate(target)
                .ok_or_else(|| Error::stale_accessor(format!("link target {target} not found")))?;
            table.clusters[cluster]
                .leaf_mut(backlink_col)
                .backlink_insert(row, origin);
        }
        table.bump_version();
        Ok(())
    }
}

fn type_mismatch(column: &str, expected: DataType, value: &Value) -> Error {
    Error::invalid_query(format!(
        "Unsupported comparison or assignment between property '{column}' of type '{expected}' and value {value:?}"
    ))
}

fn check_value_size(value: &Value) -> Result<(), Error> {
    let len = match value {
        Value::String(s) => s.len(),
        Value::Binary(b) => b.len(),
        _ => return Ok(()),
    };
    if len > MAX_STRING_SIZE {
        return Err(Error::out_of_range(format!(
            "String or binary value of {len} bytes exceeds the storage cap of {MAX_STRING_SIZE} bytes"
        )));
    }
    Ok(())
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::Store;
    use crate::key::{ColAttrs, DataType, ObjKey};
    use crate::value::Value;

    fn two_tables() -> (Store, crate::key::TableKey, crate::key::TableKey) {
        let mut store = Store::new();
        let person = store.add_table("Person");
        let item = store.add_table("Item");
        (store, person, item)
    }

    #[test]
    fn link_writes_maintain_backlinks_both_ways() {
        let (mut store, person, item) = two_tables();
        let items_col = store.add_link_column(person, "items", item, true).unwrap();

        let alice = store.create_object(person).unwrap();
        let hammer = store.create_object(item).unwrap();
        let nails = store.create_object(item).unwrap();

        store
            .set(
                person,
                alice,
                items_col,
                Value::List(vec![Value::Link(nails), Value::Link(hammer)]),
            )
            .unwrap();

        let item_table = store.table(item).unwrap();
        let backlink_col = item_table.find_backlink_column(person, items_col).unwrap();
        let obj = item_table.object(&store, hammer).unwrap();
        assert_eq!(obj.get_backlinks(backlink_col).unwrap(), &[alice]);

        // Replacing the list removes stale backlinks.
        store
            .set(person, alice, items_col, Value::List(vec![Value::Link(nails)]))
            .unwrap();
        let item_table = store.table(item).unwrap();
        let obj = item_table.object(&store, hammer).unwrap();
        assert!(obj.get_backlinks(backlink_col).unwrap().is_empty());
    }

    #[test]
    fn single_link_set_and_clear_round_trip() {
        let (mut store, person, item) = two_tables();
        let fav = store.add_link_column(person, "favourite", item, false).unwrap();
        let alice = store.create_object(person).unwrap();
        let hammer = store.create_object(item).unwrap();

        store.set(person, alice, fav, Value::Link(hammer)).unwrap();
        let backlink_col = store
            .table(item)
            .unwrap()
            .find_backlink_column(person, fav)
            .unwrap();
        assert_eq!(
            store
                .table(item)
                .unwrap()
                .object(&store, hammer)
                .unwrap()
                .get_backlinks(backlink_col)
                .unwrap(),
            &[alice]
        );

        store.set(person, alice, fav, Value::Null).unwrap();
        assert!(store
            .table(item)
            .unwrap()
            .object(&store, hammer)
            .unwrap()
            .get_backlinks(backlink_col)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn indexed_string_column_tracks_updates() {
        let mut store = Store::new();
        let table = store.add_table("T");
        let name = store
            .add_column(
                table,
                "name",
                DataType::String,
                ColAttrs::NULLABLE.with(ColAttrs::INDEXED),
            )
            .unwrap();
        let a = store.create_object(table).unwrap();
        store.set(table, a, name, Value::String("first".into())).unwrap();
        store.set(table, a, name, Value::String("second".into())).unwrap();

        let index = store.table(table).unwrap().search_index(name).unwrap();
        assert!(index.find_first(Some("first")).is_none());
        assert_eq!(index.find_first(Some("second")), Some(a));
    }

    #[test]
    fn version_bumps_on_every_write() {
        let mut store = Store::new();
        let table = store.add_table("T");
        let col = store
            .add_column(table, "v", DataType::Int, ColAttrs::NULLABLE)
            .unwrap();
        let key = store.create_object(table).unwrap();
        let before = store.table(table).unwrap().storage_version();
        store.set(table, key, col, Value::Int(1)).unwrap();

        assert!(store.table(table).unwrap().storage_version() > before);
        assert_eq!(key, ObjKey(0));
    }
}
