// ── Row reads ──
//
// Typed reads over the tables. Interface rows are joined with their
// augmentation tables; augmentation columns only appear on rows whose
// link kind owns them.

use ndb_api::{Attrs, Kind, Value};
use serde::Serialize;

use super::{Store, from_sql, to_sql};
use crate::error::NdbError;
use crate::schema::{self, ColumnDef, KindLayout, column};

/// One row together with its owning target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Row {
    pub target: String,
    pub attrs: Attrs,
}

/// Projection of a kind's main table plus its augmentation joins.
struct Select {
    sql: String,
    params: Vec<Value>,
    /// (column, augment link kind) per selected column after `f_target`.
    columns: Vec<(ColumnDef, Option<&'static str>)>,
}

fn build_select(
    layout: &KindLayout,
    target: Option<&str>,
    filter: &Attrs,
    page: Option<(usize, usize)>,
) -> Result<Select, NdbError> {
    let mut fields = vec!["t.f_target".to_owned()];
    let mut columns = Vec::new();
    for c in layout.table.columns {
        fields.push(format!("t.{}", column(c.name)));
        columns.push((*c, None));
    }

    let mut joins = String::new();
    for (i, augment) in layout.augments.iter().enumerate() {
        for c in augment.table.columns.iter().filter(|c| !c.key) {
            fields.push(format!("a{i}.{}", column(c.name)));
            columns.push((*c, Some(augment.link_kind)));
        }
        joins.push_str(&format!(
            " LEFT JOIN {table} a{i} ON a{i}.f_target = t.f_target AND a{i}.f_index = t.f_index",
            table = augment.table.name
        ));
    }

    let mut clauses = Vec::new();
    let mut params = Vec::new();
    if let Some(target) = target {
        params.push(Value::from(target));
        clauses.push(format!("t.f_target = ?{}", params.len()));
    }
    for (name, value) in filter {
        let qualified = if name == "target" {
            "t.f_target".to_owned()
        } else if layout.table.has(name) {
            format!("t.{}", column(name))
        } else if let Some(i) = layout.augments.iter().position(|a| a.table.has(name)) {
            format!("a{i}.{}", column(name))
        } else {
            return Err(NdbError::InvalidRecord {
                message: format!("{} has no attribute {name}", layout.kind),
            });
        };
        if value.is_null() {
            clauses.push(format!("{qualified} IS NULL"));
        } else {
            params.push(value.clone());
            clauses.push(format!("{qualified} = ?{}", params.len()));
        }
    }

    let order: Vec<String> = std::iter::once("t.f_target".to_owned())
        .chain(layout.table.keys().map(|k| format!("t.{}", column(k))))
        .collect();

    let mut sql = format!(
        "SELECT {} FROM {} t{joins}",
        fields.join(", "),
        layout.table.name
    );
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY ");
    sql.push_str(&order.join(", "));
    if let Some((offset, limit)) = page {
        sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
    }

    Ok(Select {
        sql,
        params,
        columns,
    })
}

impl Store {
    fn select_rows(
        &self,
        kind: Kind,
        target: Option<&str>,
        filter: &Attrs,
        page: Option<(usize, usize)>,
    ) -> Result<Vec<Row>, NdbError> {
        let select = build_select(schema::layout(kind), target, filter, page)?;
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&select.sql)?;

        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(select.params.iter().map(to_sql)),
                |row| {
                    let target = match from_sql(row.get_ref(0)?) {
                        Value::Str(s) => s,
                        other => other.to_string(),
                    };
                    let mut values = Vec::with_capacity(select.columns.len());
                    for i in 0..select.columns.len() {
                        values.push(from_sql(row.get_ref(i + 1)?));
                    }
                    Ok((target, values))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(target, values)| {
                let link_kind = values
                    .iter()
                    .zip(&select.columns)
                    .find(|(_, (def, _))| def.name == "kind")
                    .and_then(|(v, _)| v.as_str().map(str::to_owned));
                let attrs = values
                    .into_iter()
                    .zip(&select.columns)
                    .filter(|(_, (_, owner))| owner.is_none() || *owner == link_kind.as_deref())
                    .map(|(v, (def, _))| (def.name, def.decode(v)))
                    .collect();
                Row { target, attrs }
            })
            .collect())
    }

    /// Rows of `kind` matching `filter`, ordered by target then key.
    pub fn select(&self, kind: Kind, target: Option<&str>, filter: &Attrs) -> Result<Vec<Row>, NdbError> {
        self.select_rows(kind, target, filter, None)
    }

    /// One page of rows of `kind`, ordered by target then key.
    pub fn page(&self, kind: Kind, target: Option<&str>, offset: usize, limit: usize) -> Result<Vec<Row>, NdbError> {
        self.select_rows(kind, target, &Attrs::new(), Some((offset, limit)))
    }

    /// The first row of `target` matching `filter`.
    pub fn find(&self, kind: Kind, target: &str, filter: &Attrs) -> Result<Option<Attrs>, NdbError> {
        Ok(self.first(kind, Some(target), filter)?.map(|row| row.attrs))
    }

    /// The first row matching `filter`, by target then key.
    pub fn first(&self, kind: Kind, target: Option<&str>, filter: &Attrs) -> Result<Option<Row>, NdbError> {
        Ok(self
            .select_rows(kind, target, filter, Some((0, 1)))?
            .into_iter()
            .next())
    }

    pub fn count(&self, kind: Kind, target: Option<&str>) -> Result<usize, NdbError> {
        let table = schema::layout(kind).table.name;
        let conn = self.lock();
        let count: i64 = match target {
            Some(target) => conn.query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE f_target = ?1"),
                [target],
                |r| r.get(0),
            )?,
            None => conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Index of the interface called `ifname` on `target`.
    pub fn index_of(&self, target: &str, ifname: &str) -> Result<Option<i64>, NdbError> {
        Ok(self
            .find(Kind::Interface, target, &Attrs::new().with("ifname", ifname))?
            .and_then(|row| row.get_int("index")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ndb_api::Event;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::Storage;

    fn seeded() -> Store {
        let store = Store::open(&Storage::Memory).unwrap();
        for (index, name, kind) in [(1, "lo", "loopback"), (2, "d0", "dummy"), (3, "v10", "vlan")] {
            store
                .apply(
                    "t",
                    &Event::new(
                        Kind::Interface,
                        Attrs::new()
                            .with("index", index)
                            .with("ifname", name)
                            .with("kind", kind)
                            .with("link", if kind == "vlan" { Value::Int(2) } else { Value::Null })
                            .with("vlan_id", 10),
                    ),
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn filters_on_main_and_augment_columns() {
        let store = seeded();
        let by_name = store.select(Kind::Interface, Some("t"), &Attrs::new().with("ifname", "d0")).unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].attrs.get_int("index"), Some(2));

        let by_vlan = store.select(Kind::Interface, None, &Attrs::new().with("vlan_id", 10)).unwrap();
        assert_eq!(by_vlan.len(), 1);
        assert_eq!(by_vlan[0].attrs.get_str("ifname"), Some("v10"));
        assert_eq!(by_vlan[0].attrs.get_int("link"), Some(2));
    }

    #[test]
    fn null_filter_matches_missing_reference() {
        let store = seeded();
        let roots = store.select(Kind::Interface, Some("t"), &Attrs::new().with("link", Value::Null)).unwrap();
        assert_eq!(roots.len(), 2);
    }

    #[test]
    fn unknown_filter_attribute_is_an_error() {
        let store = seeded();
        let err = store.select(Kind::Interface, None, &Attrs::new().with("colour", "red"));
        assert!(matches!(err, Err(NdbError::InvalidRecord { .. })));
    }

    #[test]
    fn pages_are_ordered_by_key() {
        let store = seeded();
        let first = store.page(Kind::Interface, Some("t"), 0, 2).unwrap();
        let rest = store.page(Kind::Interface, Some("t"), 2, 2).unwrap();
        let names: Vec<_> = first
            .iter()
            .chain(&rest)
            .map(|r| r.attrs.get_str("ifname").unwrap().to_owned())
            .collect();
        assert_eq!(names, ["lo", "d0", "v10"]);
    }

    #[test]
    fn first_spans_targets_when_unscoped() {
        let store = seeded();
        store
            .apply(
                "a",
                &Event::new(Kind::Interface, Attrs::new().with("index", 7).with("ifname", "d0")),
            )
            .unwrap();
        let row = store.first(Kind::Interface, None, &Attrs::new().with("ifname", "d0")).unwrap().unwrap();
        assert_eq!(row.target, "a");
        let row = store.first(Kind::Interface, Some("t"), &Attrs::new().with("ifname", "d0")).unwrap().unwrap();
        assert_eq!(row.attrs.get_int("index"), Some(2));
    }

    #[test]
    fn flags_read_back_as_bool() {
        let store = seeded();
        let bridge = Attrs::new()
            .with("index", 4)
            .with("ifname", "br0")
            .with("kind", "bridge")
            .with("vlan_filtering", true);
        store.apply("t", &Event::new(Kind::Interface, bridge)).unwrap();
        let row = store.find(Kind::Interface, "t", &Attrs::new().with("index", 4)).unwrap().unwrap();
        assert_eq!(row.get("vlan_filtering"), Some(&Value::Bool(true)));

        let by_flag = store
            .select(Kind::Interface, Some("t"), &Attrs::new().with("vlan_filtering", true))
            .unwrap();
        assert_eq!(by_flag.len(), 1);
    }

    #[test]
    fn index_of_resolves_names() {
        let store = seeded();
        assert_eq!(store.index_of("t", "v10").unwrap(), Some(3));
        assert_eq!(store.index_of("t", "nope").unwrap(), None);
        assert_eq!(store.index_of("other", "v10").unwrap(), None);
    }
}
