use crate::error::Error;
use crate::key::{ObjKey, TableKey};
use crate::obs::sink::{self, MetricsEvent};
use crate::query::ordering::DescriptorOrdering;
use crate::query::Query;
use crate::store::Store;

///
/// ResultView
///
/// Materialised key sequence with versioned sync against storage. The
/// view keeps the query and the applied ordering so `sync_if_needed` can
/// re-materialise after any observed table moved.
///

#[derive(Clone, Debug)]
pub struct ResultView {
    table: TableKey,
    keys: Vec<ObjKey>,
    source: Query,
    ordering: DescriptorOrdering,
    excluded_by_limit: usize,
    last_seen_versions: Vec<(TableKey, u64)>,
}

impl ResultView {
    pub(crate) fn from_query(
        source: Query,
        store: &Store,
        keys: Vec<ObjKey>,
    ) -> Result<Self, Error> {
        let table = source.table_key();
        let last_seen_versions = source.dependency_versions(store)?;
        Ok(Self {
            table,
            keys,
            source,
            ordering: DescriptorOrdering::new(),
            excluded_by_limit: 0,
            last_seen_versions,
        })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> ObjKey {
        self.keys[index]
    }

    #[must_use]
    pub fn keys(&self) -> &[ObjKey] {
        &self.keys
    }

    #[must_use]
    pub fn table_key(&self) -> TableKey {
        self.table
    }

    /// Rows dropped by `Limit` descriptors during the last application.
    #[must_use]
    pub fn get_num_results_excluded_by_limit(&self) -> usize {
        self.excluded_by_limit
    }

    /// Apply (and remember) a descriptor ordering over the current keys.
    pub fn apply_descriptor_ordering(
        &mut self,
        store: &Store,
        ordering: &DescriptorOrdering,
    ) -> Result<(), Error> {
        let table = store.table_or_stale(self.table)?;
        self.excluded_by_limit = 0;
        ordering.apply(store, table, &mut self.keys, &mut self.excluded_by_limit);
        self.ordering = ordering.clone();
        self.refresh_versions(store)
    }

    /// Merged include paths recorded by the applied ordering.
    #[must_use]
    pub fn get_include_descriptors(&self) -> crate::query::IncludeDescriptor {
        self.ordering.compile_included_backlinks()
    }

    fn dependency_versions(&self, store: &Store) -> Result<Vec<(TableKey, u64)>, Error> {
        let mut versions = self.source.dependency_versions(store)?;
        let mut tables = Vec::new();
        self.ordering.collect_dependencies(&mut tables);
        for key in tables {
            if !versions.iter().any(|(existing, _)| *existing == key) {
                versions.push((key, store.table_or_stale(key)?.storage_version()));
            }
        }
        Ok(versions)
    }

    fn refresh_versions(&mut self, store: &Store) -> Result<(), Error> {
        self.last_seen_versions = self.dependency_versions(store)?;
        Ok(())
    }

    #[must_use]
    pub fn is_in_sync(&self, store: &Store) -> bool {
        match self.dependency_versions(store) {
            Ok(current) => current == self.last_seen_versions,
            Err(_) => false,
        }
    }

    /// Re-run the query and re-apply the ordering when any observed
    /// table version moved. Returns whether a refresh happened.
    pub fn sync_if_needed(&mut self, store: &Store) -> Result<bool, Error> {
        if self.is_in_sync(store) {
            return Ok(false);
        }

        let refreshed = self.source.find_all(store)?;
        self.keys = refreshed.keys;
        let table = store.table_or_stale(self.table)?;
        self.excluded_by_limit = 0;
        self.ordering
            .apply(store, table, &mut self.keys, &mut self.excluded_by_limit);
        self.refresh_versions(store)?;
        sink::record(MetricsEvent::ViewSynced);
        Ok(true)
    }
}
