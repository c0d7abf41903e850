mod include;

use crate::error::Error;
use crate::key::{ColKey, DataType, ObjKey, TableKey};
use crate::store::{Store, Table};
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::BTreeSet;

// re-exports
pub use include::IncludeDescriptor;
pub(crate) use include::IncludePath;

///
/// ResolvedKeyPath
///
/// A sort/distinct key path resolved to column hops. Intermediate hops
/// are single forward links; a broken hop contributes null, which sorts
/// first.
///

#[derive(Clone, Debug)]
pub(crate) struct ResolvedKeyPath {
    pub hops: Vec<(TableKey, ColKey)>,
    pub target_col: ColKey,
    pub display: String,
}

impl ResolvedKeyPath {
    /// Resolve a dotted path against a table for a sort/distinct clause.
    pub(crate) fn resolve(
        store: &Store,
        table: &Table,
        path: &[String],
        clause: &str,
    ) -> Result<Self, Error> {
        let mut hops = Vec::new();
        let mut current = table;
        let mut target_col = None;

        for (index, name) in path.iter().enumerate() {
            let col = current.get_column_key(name).ok_or_else(|| {
                Error::invalid_query(format!(
                    "No property '{}' found on object type '{}' specified in '{}' clause",
                    name,
                    current.name(),
                    clause
                ))
            })?;
            if index + 1 == path.len() {
                target_col = Some(col);
            } else {
                if col.data_type() != DataType::Link || col.is_list() {
                    return Err(Error::invalid_query(format!(
                        "Property '{}' in '{}' clause must be a link to follow a key path",
                        name, clause
                    )));
                }
                hops.push((current.key(), col));
                let target = current.get_link_target(col).ok_or_else(|| {
                    Error::invalid_query(format!("link column '{name}' has no target"))
                })?;
                current = store.table_or_stale(target)?;
            }
        }

        Ok(Self {
            hops,
            target_col: target_col.expect("paths are non-empty"),
            display: path.join("."),
        })
    }

    /// Value of this path for one row key.
    fn value_for(&self, store: &Store, table: &Table, key: ObjKey) -> Value {
        let mut current = table;
        let mut key = key;
        for &(table_key, col) in &self.hops {
            debug_assert_eq!(table_key, current.key());
            let Some(target) = current.value_at_key(key, col).and_then(|v| v.as_link()) else {
                return Value::Null;
            };
            let Some(next) = current
                .get_link_target(col)
                .and_then(|table_key| store.table(table_key))
            else {
                return Value::Null;
            };
            current = next;
            key = target;
        }
        current.value_at_key(key, self.target_col).unwrap_or(Value::Null)
    }
}

// Total-order wrapper for distinct bookkeeping.
#[derive(Eq, PartialEq)]
struct CanonicalKey(Vec<Value>);

impl Ord for CanonicalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let cmp = Value::canonical_cmp(a, b);
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl PartialOrd for CanonicalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

///
/// SortDescriptor
///

#[derive(Clone, Debug)]
pub struct SortDescriptor {
    keypaths: Vec<ResolvedKeyPath>,
    ascending: Vec<bool>,
}

impl SortDescriptor {
    /// Build from dotted path strings and directions.
    pub fn from_paths(
        store: &Store,
        table: &Table,
        paths: &[(&str, bool)],
    ) -> Result<Self, Error> {
        let mut keypaths = Vec::with_capacity(paths.len());
        let mut ascending = Vec::with_capacity(paths.len());
        for (path, asc) in paths {
            let segments: Vec<String> = path.split('.').map(ToString::to_string).collect();
            keypaths.push(ResolvedKeyPath::resolve(store, table, &segments, "sort")?);
            ascending.push(*asc);
        }
        Ok(Self {
            keypaths,
            ascending,
        })
    }

    pub(crate) fn new(keypaths: Vec<ResolvedKeyPath>, ascending: Vec<bool>) -> Self {
        Self {
            keypaths,
            ascending,
        }
    }

    /// Stable sort; nulls before non-nulls, NaN below all non-NaN.
    fn apply(&self, store: &Store, table: &Table, keys: &mut [ObjKey]) {
        let tuples: Vec<(ObjKey, Vec<Value>)> = keys
            .iter()
            .map(|&key| {
                let tuple = self
                    .keypaths
                    .iter()
                    .map(|path| path.value_for(store, table, key))
                    .collect();
                (key, tuple)
            })
            .collect();

        let mut order: Vec<usize> = (0..tuples.len()).collect();
        order.sort_by(|&a, &b| {
            for (index, ascending) in self.ascending.iter().enumerate() {
                let cmp = Value::canonical_cmp(&tuples[a].1[index], &tuples[b].1[index]);
                let cmp = if *ascending { cmp } else { cmp.reverse() };
                if cmp != Ordering::Equal {
                    return cmp;
                }
            }
            Ordering::Equal
        });

        for (slot, &source) in order.iter().enumerate() {
            keys[slot] = tuples[source].0;
        }
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self
            .keypaths
            .iter()
            .zip(&self.ascending)
            .map(|(path, asc)| {
                format!("{} {}", path.display, if *asc { "ASC" } else { "DESC" })
            })
            .collect();
        format!("SORT({})", parts.join(", "))
    }
}

///
/// DistinctDescriptor
///

#[derive(Clone, Debug)]
pub struct DistinctDescriptor {
    keypaths: Vec<ResolvedKeyPath>,
}

impl DistinctDescriptor {
    pub fn from_paths(store: &Store, table: &Table, paths: &[&str]) -> Result<Self, Error> {
        let mut keypaths = Vec::with_capacity(paths.len());
        for path in paths {
            let segments: Vec<String> = path.split('.').map(ToString::to_string).collect();
            keypaths.push(ResolvedKeyPath::resolve(store, table, &segments, "distinct")?);
        }
        Ok(Self { keypaths })
    }

    pub(crate) fn new(keypaths: Vec<ResolvedKeyPath>) -> Self {
        Self { keypaths }
    }

    /// Keep the first occurrence per value tuple, in current order.
    fn apply(&self, store: &Store, table: &Table, keys: &mut Vec<ObjKey>) {
        let mut seen = BTreeSet::new();
        keys.retain(|&key| {
            let tuple: Vec<Value> = self
                .keypaths
                .iter()
                .map(|path| path.value_for(store, table, key))
                .collect();
            seen.insert(CanonicalKey(tuple))
        });
    }

    fn describe(&self) -> String {
        let parts: Vec<&str> = self.keypaths.iter().map(|p| p.display.as_str()).collect();
        format!("DISTINCT({})", parts.join(", "))
    }
}

///
/// Descriptor
///

#[derive(Clone, Debug)]
pub(crate) enum Descriptor {
    Sort(SortDescriptor),
    Distinct(DistinctDescriptor),
    Limit(usize),
    Include(IncludeDescriptor),
}

///
/// DescriptorOrdering
///
/// Ordered composition of Sort/Distinct/Limit/Include. Order matters and
/// is preserved verbatim: `LIMIT(2) SORT(x)` truncates first, `SORT(x)
/// LIMIT(2)` sorts first.
///

#[derive(Clone, Debug, Default)]
pub struct DescriptorOrdering {
    descriptors: Vec<Descriptor>,
}

impl DescriptorOrdering {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn append_sort(&mut self, sort: SortDescriptor) {
        self.descriptors.push(Descriptor::Sort(sort));
    }

    pub fn append_distinct(&mut self, distinct: DistinctDescriptor) {
        self.descriptors.push(Descriptor::Distinct(distinct));
    }

    pub fn append_limit(&mut self, limit: usize) {
        self.descriptors.push(Descriptor::Limit(limit));
    }

    pub fn append_include(&mut self, include: IncludeDescriptor) {
        self.descriptors.push(Descriptor::Include(include));
    }

    #[must_use]
    pub fn will_apply_sort(&self) -> bool {
        self.descriptors
            .iter()
            .any(|descriptor| matches!(descriptor, Descriptor::Sort(_)))
    }

    /// Apply descriptors left-to-right. `excluded_by_limit` accumulates
    /// the number of rows dropped by `Limit` descriptors.
    pub(crate) fn apply(
        &self,
        store: &Store,
        table: &Table,
        keys: &mut Vec<ObjKey>,
        excluded_by_limit: &mut usize,
    ) {
        for descriptor in &self.descriptors {
            match descriptor {
                Descriptor::Sort(sort) => sort.apply(store, table, keys),
                Descriptor::Distinct(distinct) => distinct.apply(store, table, keys),
                Descriptor::Limit(limit) => {
                    if keys.len() > *limit {
                        *excluded_by_limit += keys.len() - *limit;
                        keys.truncate(*limit);
                    }
                }
                Descriptor::Include(_) => {}
            }
        }
    }

    /// Merge every Include descriptor into one, for consumers that
    /// enumerate included backlinks per result row.
    #[must_use]
    pub fn compile_included_backlinks(&self) -> IncludeDescriptor {
        let mut merged = IncludeDescriptor::default();
        for descriptor in &self.descriptors {
            if let Descriptor::Include(include) = descriptor {
                merged.append(include.clone());
            }
        }
        merged
    }

    /// Textual form, joined in written order.
    #[must_use]
    pub fn get_description(&self, _table: &Table) -> String {
        let parts: Vec<String> = self
            .descriptors
            .iter()
            .map(|descriptor| match descriptor {
                Descriptor::Sort(sort) => sort.describe(),
                Descriptor::Distinct(distinct) => distinct.describe(),
                Descriptor::Limit(limit) => format!("LIMIT({limit})"),
                Descriptor::Include(include) => include.describe(),
            })
            .collect();
        parts.join(" ")
    }

    /// Tables observed by sort/distinct/include traversal.
    pub(crate) fn collect_dependencies(&self, tables: &mut Vec<TableKey>) {
        for descriptor in &self.descriptors {
            match descriptor {
                Descriptor::Sort(sort) => {
                    for path in &sort.keypaths {
                        for &(table, _) in &path.hops {
                            if !tables.contains(&table) {
                                tables.push(table);
                            }
                        }
                    }
                }
                Descriptor::Distinct(distinct) => {
                    for path in &distinct.keypaths {
                        for &(table, _) in &path.hops {
                            if !tables.contains(&table) {
                                tables.push(table);
                            }
                        }
                    }
                }
                Descriptor::Limit(_) => {}
                Descriptor::Include(include) => include.collect_dependencies(tables),
            }
        }
    }
}
