use crate::error::Error;
use crate::key::{ColKey, DataType, TableKey};
use crate::query::link_map::{LinkHop, LinkKind};
use crate::store::{Store, Table};
use rustc_hash::FxHashMap;

///
/// KeyPathMapping
///
/// Injectable alias table: callers can rename properties and install
/// virtual backlink shortcuts (`purchasers ≡ @links.Person.items`).
/// Backlink traversal can be disabled globally; any mapping resolving to
/// `@links.*` then errors out.
///

#[derive(Clone, Debug)]
pub struct KeyPathMapping {
    aliases: FxHashMap<(TableKey, String), String>,
    allow_backlinks: bool,
    backlink_class_prefix: Option<String>,
}

impl Default for KeyPathMapping {
    fn default() -> Self {
        Self {
            aliases: FxHashMap::default(),
            allow_backlinks: true,
            backlink_class_prefix: None,
        }
    }
}

impl KeyPathMapping {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an alias; returns false when one already exists.
    pub fn add_mapping(&mut self, table: TableKey, name: &str, alias: &str) -> bool {
        let key = (table, name.to_string());
        if self.aliases.contains_key(&key) {
            return false;
        }
        self.aliases.insert(key, alias.to_string());
        true
    }

    pub fn remove_mapping(&mut self, table: TableKey, name: &str) {
        self.aliases.remove(&(table, name.to_string()));
    }

    #[must_use]
    pub fn has_mapping(&self, table: TableKey, name: &str) -> bool {
        self.aliases.contains_key(&(table, name.to_string()))
    }

    pub fn set_allow_backlinks(&mut self, allow: bool) {
        self.allow_backlinks = allow;
    }

    #[must_use]
    pub fn backlinks_allowed(&self) -> bool {
        self.allow_backlinks
    }

    /// Prefix prepended to class names appearing after `@links`.
    pub fn set_backlink_class_prefix(&mut self, prefix: Option<String>) {
        self.backlink_class_prefix = prefix;
    }

    fn alias_for(&self, table: TableKey, name: &str) -> Option<&str> {
        self.aliases
            .get(&(table, name.to_string()))
            .map(String::as_str)
    }

    /// Consume the next path element, applying alias substitution first.
    /// Backlink elements consume three segments (`@links.Type.prop`).
    pub(crate) fn process_next_path(
        &self,
        store: &Store,
        table: &Table,
        keypath: &mut Vec<String>,
        index: &mut usize,
        allow_backlinks_here: bool,
    ) -> Result<PathElement, Error> {
        debug_assert!(*index < keypath.len());

        if let Some(alias) = self.alias_for(table.key(), &keypath[*index]) {
            let mapped: Vec<String> = alias.split('.').map(ToString::to_string).collect();
            keypath.splice(*index..=*index, mapped);
        }

        if keypath[*index].eq_ignore_ascii_case("@links") {
            // Bare @links at the end supports @links.@count / @links.@size.
            if *index + 1 >= keypath.len() || keypath[*index + 1].starts_with('@') {
                *index += 1;
                return Ok(PathElement::AllBacklinks { table: table.key() });
            }
            if *index + 2 >= keypath.len() {
                return Err(Error::invalid_query(
                    "'@links' must be proceeded by type name and a property name",
                ));
            }
            let class = keypath[*index + 1].clone();
            let prop = keypath[*index + 2].clone();
            let origin_name = match &self.backlink_class_prefix {
                Some(prefix) => format!("{prefix}{class}"),
                None => class.clone(),
            };
            let origin = store.table_by_name(&origin_name).ok_or_else(|| {
                Error::invalid_query(format!(
                    "No property '{prop}' found in type '{class}' which links to type '{}'",
                    table.name()
                ))
            })?;
            let origin_col = origin
                .get_column_key(&prop)
                .filter(|col| {
                    col.data_type() == DataType::Link
                        && origin.get_link_target(*col) == Some(table.key())
                })
                .ok_or_else(|| {
                    Error::invalid_query(format!(
                        "No property '{prop}' found in type '{class}' which links to type '{}'",
                        table.name()
                    ))
                })?;
            if !self.allow_backlinks && !allow_backlinks_here {
                return Err(Error::invalid_query(format!(
                    "Querying over backlinks is disabled but backlinks were found in the \
                     inverse relationship of property '{prop}' on type '{class}'"
                )));
            }
            let backlink_col = table
                .find_backlink_column(origin.key(), origin_col)
                .ok_or_else(|| {
                    Error::stale_accessor(format!(
                        "backlink column for '{class}.{prop}' is missing"
                    ))
                })?;

            *index += 3;
            return Ok(PathElement::Backlink {
                table: table.key(),
                col: backlink_col,
                origin_table: origin.key(),
                origin_col,
            });
        }

        let name = keypath[*index].clone();
        let col = table.get_column_key(&name).ok_or_else(|| {
            Error::invalid_query(format!(
                "No property '{name}' on object of type '{}'",
                table.name()
            ))
        })?;
        *index += 1;
        Ok(PathElement::Column {
            table: table.key(),
            col,
        })
    }
}

///
/// PathElement
///

#[derive(Clone, Debug)]
pub(crate) enum PathElement {
    Column {
        table: TableKey,
        col: ColKey,
    },
    Backlink {
        table: TableKey,
        col: ColKey,
        origin_table: TableKey,
        origin_col: ColKey,
    },
    /// Bare `@links`, valid only before `@count` / `@size`.
    AllBacklinks {
        table: TableKey,
    },
}

impl PathElement {
    pub(crate) fn as_hop(&self) -> Option<LinkHop> {
        match self {
            Self::Column { table, col } if col.data_type() == DataType::Link => Some(LinkHop {
                origin_table: *table,
                col: *col,
                kind: LinkKind::of(*col),
            }),
            Self::Backlink { table, col, .. } => Some(LinkHop {
                origin_table: *table,
                col: *col,
                kind: LinkKind::Backlink,
            }),
            _ => None,
        }
    }

    pub(crate) fn is_list_like(&self) -> bool {
        match self {
            Self::Column { col, .. } => col.is_list(),
            Self::Backlink { .. } => true,
            Self::AllBacklinks { .. } => true,
        }
    }
}
