use super::{ClassContext, Dialect, ForeignKey, SoftUnique, ViewWrite, column_of, indent, quote};
use crate::meta::{AttributeDescriptor, ClassDescriptor, Collection, OnDelete, SemanticType};

/// SQLite: no domains, sequences or rules. Checks and foreign keys become
///  `BEFORE` triggers, views are written through `INSTEAD OF` triggers and
///  collection maintenance is a set of parameterized scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

const UUID_V4: &str = "(lower(hex(randomblob(4)) || '-' || hex(randomblob(2)) || '-4' || substr(hex(randomblob(2)), 2) || '-' || substr('89ab', 1 + (abs(random()) % 4), 1) || substr(hex(randomblob(2)), 2) || '-' || hex(randomblob(6))))";

fn raise(message: &str) -> String {
    format!("SELECT RAISE(ABORT, {})", quote(message))
}

impl Sqlite {
    fn trigger(&self, head: String, when: Option<&str>, statements: &[String]) -> String {
        let mut sql = head;
        if let Some(when) = when {
            sql.push_str("\nWHEN ");
            sql.push_str(when);
        }
        sql.push_str("\nBEGIN\n");
        let body = statements
            .iter()
            .map(|s| format!("{};", indent(s, 2)))
            .collect::<Vec<_>>()
            .join("\n\n");
        sql.push_str(&body);
        sql.push_str("\nEND;");
        sql
    }

    /// A trigger that aborts the statement when `when` holds.
    fn guard(&self, name: &str, event: &str, table: &str, when: &str, message: &str) -> String {
        self.trigger(self.create_trigger(name, event, table), Some(when), &[raise(message)])
    }

    fn lock(&self, cx: &ClassContext) -> String {
        format!("UPDATE {} SET id = id WHERE id = ?1;", cx.class.table)
    }
}

impl Dialect for Sqlite {
    fn column_type(&self, attribute: &AttributeDescriptor) -> Option<&'static str> {
        Some(match attribute.ty {
            SemanticType::String
            | SemanticType::Uuid
            | SemanticType::Version
            | SemanticType::Duration
            | SemanticType::Datetime
            | SemanticType::Operator
            | SemanticType::MediaType
            | SemanticType::AttributePath
            | SemanticType::Gtin => "TEXT",
            SemanticType::Whole | SemanticType::Posint | SemanticType::Integer | SemanticType::State => "INTEGER",
            SemanticType::Boolean => "SMALLINT",
            SemanticType::Binary => "BLOB",
            SemanticType::Unknown(_) => return None,
        })
    }

    // A DEFAULT expression has to be parenthesized
    fn uuid_generator(&self) -> String {
        UUID_V4.into()
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    fn pk_column(&self, cx: &ClassContext) -> String {
        if cx.is_root() {
            "id INTEGER PRIMARY KEY AUTOINCREMENT".into()
        } else {
            "id INTEGER NOT NULL PRIMARY KEY".into()
        }
    }

    /// Needs a `regexp()` function registered on the connection.
    fn regex_op(&self) -> &'static str {
        "REGEXP"
    }

    fn gtin_check(&self, value: &str) -> String {
        let digits = (1..=14)
            .map(|i| {
                let weight = if i % 2 == 1 { 3 } else { 1 };
                format!("SUBSTR('00000000000000' || {value}, LENGTH({value}) + {i}, 1) * {weight}")
            })
            .collect::<Vec<_>>()
            .join(" + ");
        format!("LENGTH({value}) BETWEEN 8 AND 14 AND {value} NOT GLOB '*[^0-9]*' AND ({digits}) % 10 = 0")
    }

    fn domain_trigger(&self, cx: &ClassContext, attribute: &AttributeDescriptor, predicate: &str) -> Vec<String> {
        let column = column_of(attribute);
        let when = format!("NEW.{column} IS NOT NULL AND NOT ({predicate})");
        let message = format!("value of \"{column}\" violates check constraint \"ck_{}\"", attribute.ty);
        let table = &cx.class.table;
        vec![
            self.guard(&format!("cki_{}_{column}", cx.class.key), "INSERT", table, &when, &message),
            self.guard(
                &format!("cku_{}_{column}", cx.class.key),
                &format!("UPDATE OF {column}"),
                table,
                &when,
                &message,
            ),
        ]
    }

    fn create_trigger(&self, name: &str, event: &str, table: &str) -> String {
        format!("CREATE TRIGGER {name}\nBEFORE {event} ON {table}\nFOR EACH ROW")
    }

    fn sequence(&self, _cx: &ClassContext) -> Vec<String> {
        Vec::new()
    }

    fn primary_key(&self, _cx: &ClassContext) -> Vec<String> {
        Vec::new()
    }

    fn foreign_key(&self, fk: &ForeignKey) -> Vec<String> {
        let suffix = fk.name.trim_start_matches("fk_");
        let (table, column, target) = (&fk.table, &fk.column, &fk.target_table);
        let dangling = format!(
            "NEW.{column} IS NOT NULL AND NOT EXISTS (SELECT 1 FROM {target} WHERE id = NEW.{column})"
        );
        let message = format!(
            "insert or update on table \"{table}\" violates foreign key constraint \"{}\"",
            fk.name
        );

        let on_delete = match fk.on_delete {
            OnDelete::Cascade => self.trigger(
                self.create_trigger(&format!("fkd_{suffix}"), "DELETE", target),
                None,
                &[format!("DELETE FROM {table} WHERE {column} = OLD.id")],
            ),
            OnDelete::SetNull => self.trigger(
                self.create_trigger(&format!("fkd_{suffix}"), "DELETE", target),
                None,
                &[format!("UPDATE {table} SET {column} = NULL WHERE {column} = OLD.id")],
            ),
            OnDelete::Restrict => self.guard(
                &format!("fkd_{suffix}"),
                "DELETE",
                target,
                &format!("EXISTS (SELECT 1 FROM {table} WHERE {column} = OLD.id)"),
                &format!(
                    "delete on table \"{target}\" violates foreign key constraint \"{}\"",
                    fk.name
                ),
            ),
        };

        vec![
            self.guard(&format!("fki_{suffix}"), "INSERT", table, &dangling, &message),
            self.guard(
                &format!("fku_{suffix}"),
                &format!("UPDATE OF {column}"),
                table,
                &dangling,
                &message,
            ),
            on_delete,
        ]
    }

    fn once_trigger(&self, cx: &ClassContext, attribute: &AttributeDescriptor) -> Vec<String> {
        let column = column_of(attribute);
        vec![self.guard(
            &format!("{}_{column}_once", cx.class.key),
            &format!("UPDATE OF {column}"),
            &cx.class.table,
            &format!("OLD.{column} IS NOT NULL AND NEW.{column} IS NOT OLD.{column}"),
            &format!("value of \"{column}\" cannot be changed"),
        )]
    }

    fn unique_triggers(&self, unique: &SoftUnique) -> Vec<String> {
        let suffix = unique.name.trim_start_matches("ck_");
        let column = unique.column;
        let exists = |value: &str| format!("EXISTS (\n{}\n)", indent(&unique.duplicates("NEW.id", value), 4));
        let written = format!(
            "NEW.{column} IS NOT NULL AND {} AND {}",
            unique.is_live("NEW.id"),
            exists(&format!("NEW.{column}"))
        );
        let revived = format!(
            "NEW.{state} > -1 AND OLD.{state} < 0 AND {}",
            exists(&format!("(SELECT {column} FROM {} WHERE id = NEW.id)", unique.table)),
            state = unique.state_column,
        );
        let message = unique.message();
        vec![
            self.guard(&format!("cki_{suffix}"), "INSERT", unique.table, &written, &message),
            self.guard(
                &format!("cku_{suffix}"),
                &format!("UPDATE OF {column}"),
                unique.table,
                &written,
                &message,
            ),
            self.guard(
                &format!("cks_{suffix}"),
                &format!("UPDATE OF {}", unique.state_column),
                unique.state_table,
                &revived,
                &message,
            ),
        ]
    }

    // Scripts bound with ?1 = owner id and ?2 = JSON array of member ids
    fn procedures(&self, cx: &ClassContext, attribute: &AttributeDescriptor, collection: &Collection) -> Vec<String> {
        let prefix = format!("{}_{}", cx.class.key, attribute.name);
        let (table, owner, member, order) = (
            &collection.table,
            &collection.owner_column,
            &collection.member_column,
            &collection.order_column,
        );
        let lock = self.lock(cx);
        // Repeated ids collapse to their first position
        let missing = |order_value: &str| {
            format!(
                "INSERT INTO {table} ({owner}, {member}, {order})\n\
                 SELECT ?1, ids.value, {order_value}\n\
                 FROM   json_each(?2) AS ids\n\
                 WHERE  ids.value NOT IN (SELECT {member} FROM {table} WHERE {owner} = ?1)\n\
                 GROUP BY ids.value;"
            )
        };

        vec![
            format!("-- {prefix}_clear\n{lock}\nDELETE FROM {table} WHERE {owner} = ?1;"),
            format!(
                "-- {prefix}_del\n{lock}\n\
                 DELETE FROM {table}\n\
                 WHERE  {owner} = ?1\n       \
                        AND {member} IN (SELECT value FROM json_each(?2));"
            ),
            format!(
                "-- {prefix}_add\n{lock}\n{}",
                missing(&format!(
                    "(SELECT COALESCE(MAX({order}), 0) FROM {table} WHERE {owner} = ?1) + ROW_NUMBER() OVER (ORDER BY MIN(ids.key))"
                ))
            ),
            // Negating first keeps the renumbering clear of the unique order index
            format!(
                "-- {prefix}_set\n{lock}\n\
                 DELETE FROM {table}\n\
                 WHERE  {owner} = ?1\n       \
                        AND {member} NOT IN (SELECT value FROM json_each(?2));\n\
                 UPDATE {table}\n\
                 SET    {order} = -{order}\n\
                 WHERE  {owner} = ?1;\n\
                 UPDATE {table}\n\
                 SET    {order} = (SELECT MIN(ids.key) + 1 FROM json_each(?2) AS ids WHERE ids.value = {table}.{member})\n\
                 WHERE  {owner} = ?1;\n{}",
                missing("MIN(ids.key) + 1")
            ),
        ]
    }

    fn view_write(&self, write: &ViewWrite) -> String {
        self.trigger(
            format!(
                "CREATE TRIGGER {}\nINSTEAD OF {} ON {}\nFOR EACH ROW",
                write.name, write.event, write.view
            ),
            write.condition.as_deref(),
            &write.statements,
        )
    }

    fn root_id(&self, _cx: &ClassContext) -> Option<String> {
        None
    }

    // AUTOINCREMENT ids only grow, so the newest row holds the maximum.
    //  `sqlite_sequence` and `last_insert_rowid()` both lag behind inserts
    //  made by a nested view trigger.
    fn last_id(&self, root: &ClassDescriptor) -> String {
        format!("(SELECT MAX(id) FROM {})", root.table)
    }

    fn inherited_id(&self, _cx: &ClassContext) -> String {
        "last_insert_rowid()".into()
    }
}
