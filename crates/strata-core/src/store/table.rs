use crate::key::{ColAttrs, ColKey, DataType, ObjKey, TableKey};
use crate::store::cluster::Cluster;
use crate::store::index::StringIndex;
use crate::store::leaf::{IntLeaf, Leaf};
use crate::value::Value;
use crate::CLUSTER_CAPACITY;
use rustc_hash::FxHashMap;

///
/// StringInterner
///
/// Dictionary for string-enum compressed columns. Id 0 is reserved for
/// null; live ids are positions + 1.
///

#[derive(Clone, Debug, Default)]
pub(crate) struct StringInterner {
    strings: Vec<String>,
    ids: FxHashMap<String, u32>,
}

impl StringInterner {
    pub(crate) fn intern(&mut self, value: &str) -> u32 {
        if let Some(&id) = self.ids.get(value) {
            return id;
        }
        self.strings.push(value.to_string());
        let id = u32::try_from(self.strings.len()).unwrap_or(u32::MAX);
        self.ids.insert(value.to_string(), id);
        id
    }

    pub(crate) fn lookup(&self, value: &str) -> Option<u32> {
        self.ids.get(value).copied()
    }

    pub(crate) fn resolve(&self, id: u32) -> Option<&str> {
        if id == 0 {
            return None;
        }
        self.strings.get(id as usize - 1).map(String::as_str)
    }
}

///
/// Column
///

#[derive(Clone, Debug)]
pub(crate) struct Column {
    pub name: String,
    pub key: ColKey,
    /// Link target, or the origin table for backlink columns.
    pub target: Option<TableKey>,
    /// For backlink columns: the forward column in the origin table.
    pub origin_col: Option<ColKey>,
    /// Dictionary for enum-string columns.
    pub interner: Option<StringInterner>,
}

///
/// Table
///
/// One object table: schema, clusters and secondary indexes. A monotonic
/// `storage_version` is bumped on every mutation; accessors compare it to
/// re-resolve cached positions.
///

#[derive(Clone, Debug)]
pub struct Table {
    key: TableKey,
    name: String,
    pub(crate) columns: Vec<Column>,
    pub(crate) clusters: Vec<Cluster>,
    pub(crate) indexes: FxHashMap<ColKey, StringIndex>,
    primary_key: Option<ColKey>,
    next_key: i64,
    version: u64,
}

impl Table {
    pub(crate) fn new(key: TableKey, name: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
            columns: Vec::new(),
            clusters: Vec::new(),
            indexes: FxHashMap::default(),
            primary_key: None,
            next_key: 0,
            version: 0,
        }
    }

    ///
    /// SCHEMA
    ///

    #[must_use]
    pub fn key(&self) -> TableKey {
        self.key
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn storage_version(&self) -> u64 {
        self.version
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Column key by name. Backlink columns are not addressable by name;
    /// they resolve through `@links` paths only.
    #[must_use]
    pub fn get_column_key(&self, name: &str) -> Option<ColKey> {
        self.columns
            .iter()
            .find(|col| col.key.data_type() != DataType::Backlink && col.name == name)
            .map(|col| col.key)
    }

    #[must_use]
    pub fn column_name(&self, col: ColKey) -> &str {
        &self.columns[col.index()].name
    }

    /// Target table of a link (or origin table of a backlink) column.
    #[must_use]
    pub fn get_link_target(&self, col: ColKey) -> Option<TableKey> {
        self.columns[col.index()].target
    }

    /// For a backlink column: the forward column in the origin table.
    #[must_use]
    pub fn get_origin_column(&self, col: ColKey) -> Option<ColKey> {
        self.columns[col.index()].origin_col
    }

    /// Backlink column on this table fed by `origin_table.origin_col`.
    #[must_use]
    pub fn find_backlink_column(
        &self,
        origin_table: TableKey,
        origin_col: ColKey,
    ) -> Option<ColKey> {
        self.columns
            .iter()
            .find(|col| {
                col.key.data_type() == DataType::Backlink
                    && col.target == Some(origin_table)
                    && col.origin_col == Some(origin_col)
            })
            .map(|col| col.key)
    }

    #[must_use]
    pub fn get_primary_key_column(&self) -> Option<ColKey> {
        self.primary_key
    }

    pub(crate) fn set_primary_key_column(&mut self, col: ColKey) {
        self.primary_key = Some(col);
    }

    pub(crate) fn interner(&self, col: ColKey) -> Option<&StringInterner> {
        self.columns[col.index()].interner.as_ref()
    }

    #[must_use]
    pub fn search_index(&self, col: ColKey) -> Option<&StringIndex> {
        self.indexes.get(&col)
    }

    /// Install a column and lay down its leaf in every existing cluster.
    pub(crate) fn add_column_inner(
        &mut self,
        name: impl Into<String>,
        data_type: DataType,
        attrs: ColAttrs,
        target: Option<TableKey>,
        origin_col: Option<ColKey>,
    ) -> ColKey {
        let key = ColKey::new(self.columns.len(), data_type, attrs);
        let interner = key.is_enum_strings().then(StringInterner::default);
        self.columns.push(Column {
            name: name.into(),
            key,
            target,
            origin_col,
            interner,
        });
        for cluster in &mut self.clusters {
            cluster.push_leaf(Self::leaf_for(key));
        }
        if key.is_indexed() {
            self.indexes.insert(key, StringIndex::new());
        }
        self.bump_version();
        key
    }

    pub(crate) fn leaf_for(col: ColKey) -> Leaf {
        if col.data_type() == DataType::Backlink {
            return Leaf::KeyList(Vec::new());
        }
        if col.is_list() {
            return match col.data_type() {
                DataType::Link => Leaf::KeyList(Vec::new()),
                _ => Leaf::ValueList(Vec::new()),
            };
        }
        match col.data_type() {
            DataType::Int => Leaf::Int(IntLeaf::new()),
            DataType::Bool => Leaf::Bool(Vec::new()),
            DataType::Float => Leaf::Float(Vec::new()),
            DataType::Double => Leaf::Double(Vec::new()),
            DataType::String if col.is_enum_strings() => Leaf::EnumString(Vec::new()),
            DataType::String => Leaf::String(Vec::new()),
            DataType::Binary => Leaf::Binary(Vec::new()),
            DataType::Timestamp => Leaf::Timestamp(Vec::new()),
            DataType::Link | DataType::Backlink => Leaf::Key(Vec::new()),
        }
    }

    ///
    /// ROWS
    ///

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.clusters.iter().map(Cluster::size).sum()
    }

    /// Allocate the next object key and its row.
    pub(crate) fn create_row(&mut self) -> ObjKey {
        let key = ObjKey(self.next_key);
        self.next_key += 1;

        let cluster_index = (key.0 as usize) / CLUSTER_CAPACITY;
        while self.clusters.len() <= cluster_index {
            let offset = (self.clusters.len() * CLUSTER_CAPACITY) as i64;
            let leaves = self.columns.iter().map(|col| Self::leaf_for(col.key)).collect();
            self.clusters.push(Cluster::new(offset, leaves));
        }
        self.clusters[cluster_index].push_row(key.local_to_cluster());
        self.bump_version();
        key
    }

    /// Locate `(cluster, row)` for an object key.
    #[must_use]
    pub(crate) fn locate(&self, key: ObjKey) -> Option<(usize, usize)> {
        if key.is_null() {
            return None;
        }
        let cluster_index = (key.0 as usize) / CLUSTER_CAPACITY;
        let cluster = self.clusters.get(cluster_index)?;
        let row = cluster.find_row(key.local_to_cluster())?;
        Some((cluster_index, row))
    }

    #[must_use]
    pub fn is_valid(&self, key: ObjKey) -> bool {
        self.locate(key).is_some()
    }

    /// First object whose string column equals `value`; used by the
    /// primary-key fast path of indexed equality.
    #[must_use]
    pub fn find_first_string(&self, col: ColKey, value: Option<&str>) -> Option<ObjKey> {
        if let Some(index) = self.indexes.get(&col) {
            return index.find_first(value);
        }
        let interner = self.interner(col);
        for cluster in &self.clusters {
            let leaf = cluster.leaf(col);
            for row in 0..cluster.size() {
                if leaf.get_str(row, interner) == value {
                    return Some(cluster.get_real_key(row));
                }
            }
        }
        None
    }

    /// Resolved value of `col` at an absolute key.
    #[must_use]
    pub(crate) fn value_at_key(&self, key: ObjKey, col: ColKey) -> Option<Value> {
        let (cluster, row) = self.locate(key)?;
        Some(self.clusters[cluster].leaf(col).value_at(row, self.interner(col)))
    }

    /// Iterate every live object key, cluster-ascending.
    pub fn object_keys(&self) -> impl Iterator<Item = ObjKey> + '_ {
        self.clusters
            .iter()
            .flat_map(|cluster| (0..cluster.size()).map(move |row| cluster.get_real_key(row)))
    }
}
