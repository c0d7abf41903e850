use crate::key::{ColKey, DataType, ObjKey, TableKey};
use crate::store::Store;

///
/// LinkKind
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum LinkKind {
    Single,
    List,
    Backlink,
}

impl LinkKind {
    pub(crate) fn of(col: ColKey) -> Self {
        match col.data_type() {
            DataType::Backlink => Self::Backlink,
            _ if col.is_list() => Self::List,
            _ => Self::Single,
        }
    }
}

///
/// LinkHop
///

#[derive(Clone, Debug)]
pub(crate) struct LinkHop {
    pub origin_table: TableKey,
    pub col: ColKey,
    pub kind: LinkKind,
}

///
/// LinkMap
///
/// An ordered chain of link hops describing a multi-hop traversal.
/// Backlink hops walk the inverse relation; their targets come back in
/// ascending key order, which the substrate guarantees.
///

#[derive(Clone, Debug, Default)]
pub(crate) struct LinkMap {
    hops: Vec<LinkHop>,
}

impl LinkMap {
    pub(crate) fn new(hops: Vec<LinkHop>) -> Self {
        Self { hops }
    }

    pub(crate) fn has_links(&self) -> bool {
        !self.hops.is_empty()
    }

    pub(crate) fn hops(&self) -> &[LinkHop] {
        &self.hops
    }

    /// True when every hop yields at most one target.
    pub(crate) fn only_unary_links(&self) -> bool {
        self.hops.iter().all(|hop| hop.kind == LinkKind::Single)
    }

    /// Table the chain ends in, given the table it starts from.
    pub(crate) fn target_table(&self, store: &Store, base: TableKey) -> TableKey {
        let mut table = base;
        for hop in &self.hops {
            if let Some(next) = store
                .table(hop.origin_table)
                .and_then(|t| t.get_link_target(hop.col))
            {
                table = next;
            }
        }
        table
    }

    /// Walk the chain from `start_key`, feeding every terminal key to the
    /// visitor. The visitor returns `false` to stop the traversal.
    pub(crate) fn map_links(
        &self,
        store: &Store,
        start_key: ObjKey,
        visitor: &mut dyn FnMut(ObjKey) -> bool,
    ) {
        if self.hops.is_empty() {
            visitor(start_key);
            return;
        }
        self.map_links_at(store, 0, start_key, visitor);
    }

    /// Terminal keys of the chain, collected.
    pub(crate) fn collect_links(&self, store: &Store, start_key: ObjKey) -> Vec<ObjKey> {
        let mut keys = Vec::new();
        self.map_links(store, start_key, &mut |key| {
            keys.push(key);
            true
        });
        keys
    }

    /// Distinct table keys participating in the traversal, appended to
    /// `tables`. Used to decide which table versions a view observes.
    pub(crate) fn collect_dependencies(&self, store: &Store, tables: &mut Vec<TableKey>) {
        for hop in &self.hops {
            if !tables.contains(&hop.origin_table) {
                tables.push(hop.origin_table);
            }
            if let Some(target) = store
                .table(hop.origin_table)
                .and_then(|t| t.get_link_target(hop.col))
            {
                if !tables.contains(&target) {
                    tables.push(target);
                }
            }
        }
    }

    fn map_links_at(
        &self,
        store: &Store,
        hop_index: usize,
        key: ObjKey,
        visitor: &mut dyn FnMut(ObjKey) -> bool,
    ) -> bool {
        let hop = &self.hops[hop_index];
        let last = hop_index + 1 == self.hops.len();
        let Some(table) = store.table(hop.origin_table) else {
            return true;
        };
        let Some((cluster, row)) = table.locate(key) else {
            return true;
        };
        let cluster = &table.clusters[cluster];

        match hop.kind {
            LinkKind::Single => {
                let target = cluster.leaf(hop.col).get_key(row);
                if !target.is_null() {
                    if last {
                        return visitor(target);
                    }
                    return self.map_links_at(store, hop_index + 1, target, visitor);
                }
            }
            LinkKind::List | LinkKind::Backlink => {
                for &target in cluster.leaf(hop.col).get_key_list(row) {
                    if last {
                        if !visitor(target) {
                            return false;
                        }
                    } else if !self.map_links_at(store, hop_index + 1, target, visitor) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::{LinkHop, LinkKind, LinkMap};
    use crate::key::ObjKey;
    use crate::store::Store;
    use crate::value::Value;

    #[test]
    fn chain_traverses_lists_then_singles() {
        let mut store = Store::new();
        let person = store.add_table("Person");
        let item = store.add_table("Item");
        let discount = store.add_table("Discount");
        let items = store.add_link_column(person, "items", item, true).unwrap();
        let disc = store.add_link_column(item, "discount", discount, false).unwrap();

        let alice = store.create_object(person).unwrap();
        let hammer = store.create_object(item).unwrap();
        let nails = store.create_object(item).unwrap();
        let sale = store.create_object(discount).unwrap();

        store
            .set(
                person,
                alice,
                items,
                Value::List(vec![Value::Link(hammer), Value::Link(nails)]),
            )
            .unwrap();
        store.set(item, hammer, disc, Value::Link(sale)).unwrap();

        let map = LinkMap::new(vec![
            LinkHop {
                origin_table: person,
                col: items,
                kind: LinkKind::List,
            },
            LinkHop {
                origin_table: item,
                col: disc,
                kind: LinkKind::Single,
            },
        ]);

        assert_eq!(map.collect_links(&store, alice), vec![sale]);
        assert!(!map.only_unary_links());
    }

    #[test]
    fn visitor_short_circuits() {
        let mut store = Store::new();
        let person = store.add_table("Person");
        let item = store.add_table("Item");
        let items = store.add_link_column(person, "items", item, true).unwrap();
        let alice = store.create_object(person).unwrap();
        let targets: Vec<ObjKey> = (0..4)
            .map(|_| store.create_object(item).unwrap())
            .collect();
        store
            .set(
                person,
                alice,
                items,
                Value::List(targets.iter().map(|&k| Value::Link(k)).collect()),
            )
            .unwrap();

        let map = LinkMap::new(vec![LinkHop {
            origin_table: person,
            col: items,
            kind: LinkKind::List,
        }]);
        let mut seen = 0;
        map.map_links(&store, alice, &mut |_| {
            seen += 1;
            seen < 2
        });

        assert_eq!(seen, 2);
    }

    #[test]
    fn dependencies_cover_every_hop_table() {
        let mut store = Store::new();
        let person = store.add_table("Person");
        let item = store.add_table("Item");
        let items = store.add_link_column(person, "items", item, true).unwrap();

        let map = LinkMap::new(vec![LinkHop {
            origin_table: person,
            col: items,
            kind: LinkKind::List,
        }]);
        let mut tables = Vec::new();
        map.collect_dependencies(&store, &mut tables);

        assert_eq!(tables, vec![person, item]);
    }
}
