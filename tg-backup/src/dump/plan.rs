//! Column exclusion rules grouped by table.

use tracing::debug;

/// Columns to leave out of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableExclusion {
    pub table: String,
    /// Excluded columns in first-seen order, without duplicates
    pub columns: Vec<String>,
}

/// Table → excluded columns, tables in first-seen order.
///
/// Rules that are not exactly `table.column` (one dot, both halves
/// non-empty) are dropped; that is policy, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionPlan {
    tables: Vec<TableExclusion>,
}

impl ExclusionPlan {
    pub fn from_rules<I, S>(rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut plan = Self::default();
        for rule in rules {
            let rule = rule.as_ref();
            match parse_rule(rule) {
                Some((table, column)) => plan.insert(table, column),
                None => debug!(rule, "Ignoring malformed exclusion rule"),
            }
        }
        plan
    }

    fn insert(&mut self, table: &str, column: &str) {
        match self.tables.iter_mut().find(|t| t.table == table) {
            Some(entry) => {
                if !entry.columns.iter().any(|c| c == column) {
                    entry.columns.push(column.to_string());
                }
            }
            None => self.tables.push(TableExclusion {
                table: table.to_string(),
                columns: vec![column.to_string()],
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableExclusion> {
        self.tables.iter()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.table.clone()).collect()
    }
}

fn parse_rule(rule: &str) -> Option<(&str, &str)> {
    let (table, column) = rule.split_once('.')?;
    if table.is_empty() || column.is_empty() || column.contains('.') {
        return None;
    }
    Some((table, column))
}

/// Drop `excluded` from `columns`, keeping catalog order.
pub fn retain_columns(columns: Vec<String>, excluded: &[String]) -> Vec<String> {
    columns
        .into_iter()
        .filter(|c| !excluded.contains(c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_groups_rules_by_table_in_first_seen_order() {
        let plan = ExclusionPlan::from_rules([
            "orders.notes",
            "users.password_hash",
            "orders.internal_ref",
            "orders.notes",
        ]);

        let tables: Vec<_> = plan.tables().cloned().collect();
        assert_eq!(
            tables,
            vec![
                TableExclusion {
                    table: "orders".to_string(),
                    columns: strings(&["notes", "internal_ref"]),
                },
                TableExclusion {
                    table: "users".to_string(),
                    columns: strings(&["password_hash"]),
                },
            ]
        );
        assert_eq!(plan.table_names(), strings(&["orders", "users"]));
    }

    #[test]
    fn test_malformed_rules_are_dropped() {
        let plan = ExclusionPlan::from_rules([
            "orders",
            "public.orders.notes",
            "",
            ".",
            "orders.",
            ".notes",
            "a.b.c.d",
        ]);
        assert!(plan.is_empty());
        assert_eq!(plan.len(), 0);
    }

    #[test]
    fn test_malformed_rules_do_not_affect_valid_ones() {
        let plan = ExclusionPlan::from_rules(["orders", "orders.notes", "x.y.z"]);
        assert_eq!(plan.len(), 1);
        let tables: Vec<_> = plan.tables().collect();
        assert_eq!(tables[0].table, "orders");
        assert_eq!(tables[0].columns, strings(&["notes"]));
    }

    #[test]
    fn test_retain_columns_preserves_order() {
        let columns = strings(&["id", "customer_id", "notes", "total", "internal_ref"]);
        let retained = retain_columns(columns, &strings(&["internal_ref", "notes"]));
        assert_eq!(retained, strings(&["id", "customer_id", "total"]));
    }

    #[test]
    fn test_retain_columns_ignores_unknown_exclusions() {
        let columns = strings(&["id", "total"]);
        let retained = retain_columns(columns, &strings(&["does_not_exist"]));
        assert_eq!(retained, strings(&["id", "total"]));
    }
}
