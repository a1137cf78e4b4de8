// ── Table layout ──
//
// Static description of every table: column names, which columns form the
// primary key, and which ones name another interface by index. Storage,
// ingestion, planning, and reports all read from here.

use ndb_api::{Attrs, Kind, Value};

/// SQL column name for an attribute.
pub fn column(name: &str) -> String {
    format!("f_{name}")
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub name: &'static str,
    pub key: bool,
    /// Holds another interface's `index`.
    pub reference: bool,
    /// Stored as an integer, read back as [`Value::Bool`].
    pub boolean: bool,
}

impl ColumnDef {
    /// Restore the attribute type of a value read back from SQLite.
    pub fn decode(&self, value: Value) -> Value {
        match value {
            Value::Int(i) if self.boolean => Value::Bool(i != 0),
            other => other,
        }
    }
}

const fn key(name: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        key: true,
        reference: false,
        boolean: false,
    }
}

const fn key_ref(name: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        key: true,
        reference: true,
        boolean: false,
    }
}

const fn col(name: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        key: false,
        reference: false,
        boolean: false,
    }
}

const fn col_ref(name: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        key: false,
        reference: true,
        boolean: false,
    }
}

const fn flag(name: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        key: false,
        reference: false,
        boolean: true,
    }
}

#[derive(Debug)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
}

impl TableDef {
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().filter(|c| c.key).map(|c| c.name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Key tuple of `attrs`, or `None` when a key column is missing or null.
    pub fn key_of(&self, attrs: &Attrs) -> Option<Vec<Value>> {
        self.keys()
            .map(|k| attrs.get(k).filter(|v| !v.is_null()).cloned())
            .collect()
    }

    /// The key columns of `attrs` as an attribute map.
    pub fn key_attrs(&self, attrs: &Attrs) -> Attrs {
        attrs.project(self.keys())
    }
}

/// Kind-specific table joined onto `interfaces` by `index`, filled from
/// interface events whose `kind` attribute equals `link_kind`.
#[derive(Debug)]
pub struct Augment {
    pub link_kind: &'static str,
    pub table: &'static TableDef,
}

#[derive(Debug)]
pub struct KindLayout {
    pub kind: Kind,
    pub table: &'static TableDef,
    pub augments: &'static [Augment],
    /// Attributes a new record must carry before it can be created.
    pub required: &'static [&'static str],
}

impl KindLayout {
    /// Every attribute a record of this kind can carry.
    pub fn attributes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.table
            .names()
            .chain(self.augments.iter().flat_map(|a| a.table.names()))
    }

    pub fn is_reference(&self, name: &str) -> bool {
        self.table
            .columns
            .iter()
            .any(|c| c.name == name && c.reference)
    }

    pub fn references(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.table
            .columns
            .iter()
            .filter(|c| c.reference)
            .map(|c| c.name)
    }
}

// ── Tables ──────────────────────────────────────────────────────────

pub static INTERFACES: TableDef = TableDef {
    name: "interfaces",
    columns: &[
        key("index"),
        col("ifname"),
        col("kind"),
        col("state"),
        col("address"),
        col("mtu"),
        col_ref("master"),
        col_ref("link"),
    ],
};

pub static VLAN: TableDef = TableDef {
    name: "vlan",
    columns: &[key("index"), col("vlan_id"), col("vlan_protocol")],
};

pub static BRIDGE: TableDef = TableDef {
    name: "bridge",
    columns: &[key("index"), col("stp_state"), col("forward_delay"), flag("vlan_filtering")],
};

pub static ADDRESSES: TableDef = TableDef {
    name: "addresses",
    columns: &[
        key_ref("index"),
        key("address"),
        key("prefixlen"),
        col("family"),
        col("scope"),
        col("label"),
    ],
};

pub static ROUTES: TableDef = TableDef {
    name: "routes",
    columns: &[
        key("table"),
        key("dst"),
        key("dst_len"),
        col("gateway"),
        col_ref("oif"),
        col("priority"),
        col("proto"),
        col("scope"),
        col("family"),
    ],
};

pub static NEIGHBOURS: TableDef = TableDef {
    name: "neighbours",
    columns: &[
        key_ref("ifindex"),
        key("dst"),
        col("lladdr"),
        col("state"),
        col("family"),
    ],
};

pub static TABLES: &[&TableDef] = &[&INTERFACES, &VLAN, &BRIDGE, &ADDRESSES, &ROUTES, &NEIGHBOURS];

static INTERFACE_LAYOUT: KindLayout = KindLayout {
    kind: Kind::Interface,
    table: &INTERFACES,
    augments: &[
        Augment {
            link_kind: "vlan",
            table: &VLAN,
        },
        Augment {
            link_kind: "bridge",
            table: &BRIDGE,
        },
    ],
    required: &["ifname"],
};

static ADDRESS_LAYOUT: KindLayout = KindLayout {
    kind: Kind::Address,
    table: &ADDRESSES,
    augments: &[],
    required: &["index", "address", "prefixlen"],
};

static ROUTE_LAYOUT: KindLayout = KindLayout {
    kind: Kind::Route,
    table: &ROUTES,
    augments: &[],
    required: &[],
};

static NEIGHBOUR_LAYOUT: KindLayout = KindLayout {
    kind: Kind::Neighbour,
    table: &NEIGHBOURS,
    augments: &[],
    required: &["ifindex", "dst", "lladdr"],
};

pub fn layout(kind: Kind) -> &'static KindLayout {
    match kind {
        Kind::Interface => &INTERFACE_LAYOUT,
        Kind::Address => &ADDRESS_LAYOUT,
        Kind::Route => &ROUTE_LAYOUT,
        Kind::Neighbour => &NEIGHBOUR_LAYOUT,
    }
}

/// Tables whose `column` references an interface index, and that column.
pub fn dependents() -> [(Kind, &'static str); 3] {
    [
        (Kind::Route, "oif"),
        (Kind::Neighbour, "ifindex"),
        (Kind::Address, "index"),
    ]
}

// ── DDL ─────────────────────────────────────────────────────────────

/// `CREATE TABLE` statement for `table`. Every table carries `f_target`
/// and is keyed by `(f_target, key columns...)`.
pub fn create_sql(table: &TableDef) -> String {
    let mut cols = vec!["f_target TEXT NOT NULL".to_owned()];
    cols.extend(table.names().map(column));
    let keys: Vec<String> = std::iter::once("f_target".to_owned())
        .chain(table.keys().map(column))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
        table.name,
        cols.join(", "),
        keys.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_key_includes_interface_reference() {
        let layout = layout(Kind::Address);
        assert_eq!(layout.table.keys().collect::<Vec<_>>(), ["index", "address", "prefixlen"]);
        assert!(layout.is_reference("index"));
        assert!(!layout.is_reference("address"));
    }

    #[test]
    fn key_of_rejects_null_keys() {
        let row = Attrs::new().with("index", 3).with("ifname", "a");
        assert_eq!(INTERFACES.key_of(&row), Some(vec![Value::Int(3)]));
        assert_eq!(INTERFACES.key_of(&Attrs::new().with("index", Value::Null)), None);
    }

    #[test]
    fn interface_attributes_include_augments() {
        let attrs: Vec<_> = layout(Kind::Interface).attributes().collect();
        assert!(attrs.contains(&"vlan_id"));
        assert!(attrs.contains(&"forward_delay"));
    }

    #[test]
    fn flag_columns_decode_to_bool() {
        let filtering = BRIDGE.columns.iter().find(|c| c.name == "vlan_filtering").unwrap();
        assert_eq!(filtering.decode(Value::Int(1)), Value::Bool(true));
        assert_eq!(filtering.decode(Value::Null), Value::Null);
        assert_eq!(BRIDGE.columns[1].decode(Value::Int(1)), Value::Int(1));
    }

    #[test]
    fn ddl_has_target_in_primary_key() {
        let sql = create_sql(&ROUTES);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS routes (f_target TEXT NOT NULL, f_table"));
        assert!(sql.ends_with("PRIMARY KEY (f_target, f_table, f_dst, f_dst_len))"));
    }
}
