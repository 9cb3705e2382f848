use super::{
    ClassContext, Dialect, ForeignKey, SoftUnique, ViewWrite, column_of, domain_check, indent, sequence_name,
};
use crate::meta::{AttributeDescriptor, ClassDescriptor, Collection, SemanticType};

/// PostgreSQL: domains carry the type checks, rules make views writable and
///  collections are maintained by PL/pgSQL functions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

/// Domains created by the setup script, with their base types.
const DOMAINS: [(SemanticType, &str); 7] = [
    (SemanticType::Whole, "INTEGER"),
    (SemanticType::Posint, "INTEGER"),
    (SemanticType::State, "INTEGER"),
    (SemanticType::Operator, "TEXT"),
    (SemanticType::MediaType, "TEXT"),
    (SemanticType::Version, "TEXT"),
    (SemanticType::Gtin, "TEXT"),
];

const ISA_GTIN: &str = "CREATE FUNCTION isa_gtin(code TEXT) RETURNS BOOLEAN AS $$
DECLARE
    padded TEXT := LPAD(code, 14, '0');
    total  INTEGER := 0;
BEGIN
    IF code !~ '^[0-9]{8,14}$' THEN
        RETURN FALSE;
    END IF;
    FOR i IN 1..14 LOOP
        total := total + SUBSTR(padded, i, 1)::INTEGER * CASE WHEN i % 2 = 1 THEN 3 ELSE 1 END;
    END LOOP;
    RETURN total % 10 = 0;
END;
$$ LANGUAGE plpgsql IMMUTABLE;";

fn function(name: &str, params: &str, returns: &str, declare: &[&str], body: &str) -> String {
    let mut sql = format!("CREATE FUNCTION {name}({params}) RETURNS {returns} AS $$\n");
    if !declare.is_empty() {
        sql.push_str("DECLARE\n");
        for declaration in declare {
            sql.push_str("    ");
            sql.push_str(declaration);
            sql.push('\n');
        }
    }
    sql.push_str("BEGIN\n");
    sql.push_str(&indent(body, 4));
    sql.push_str("\nEND;\n$$ LANGUAGE plpgsql;");
    sql
}

impl Postgres {
    fn trigger(&self, name: &str, event: &str, table: &str, body: &str) -> Vec<String> {
        vec![
            function(name, "", "trigger", &[], body),
            self.create_trigger(name, event, table),
        ]
    }

    fn lock(&self, cx: &ClassContext) -> String {
        format!("PERFORM true FROM {} WHERE id = obj_ident FOR UPDATE;", cx.class.table)
    }
}

impl Dialect for Postgres {
    fn column_type(&self, attribute: &AttributeDescriptor) -> Option<&'static str> {
        Some(match attribute.ty {
            SemanticType::String | SemanticType::AttributePath => "TEXT",
            SemanticType::Whole => "WHOLE",
            SemanticType::Posint => "POSINT",
            SemanticType::Integer => "INTEGER",
            SemanticType::Boolean => "BOOLEAN",
            SemanticType::Uuid => "UUID",
            SemanticType::State => "STATE",
            SemanticType::Version => "VERSION",
            SemanticType::Duration => "INTERVAL",
            SemanticType::Datetime => "TIMESTAMP",
            SemanticType::Operator => "OPERATOR",
            SemanticType::MediaType => "MEDIA_TYPE",
            SemanticType::Gtin => "GTIN",
            SemanticType::Binary => "BYTEA",
            SemanticType::Unknown(_) => return None,
        })
    }

    fn uuid_generator(&self) -> String {
        "gen_random_uuid()".into()
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value { "true" } else { "false" }
    }

    fn pk_column(&self, cx: &ClassContext) -> String {
        if cx.is_root() {
            format!("id INTEGER NOT NULL DEFAULT NEXTVAL('{}')", cx.sequence())
        } else {
            "id INTEGER NOT NULL".into()
        }
    }

    fn regex_op(&self) -> &'static str {
        "~"
    }

    fn gtin_check(&self, value: &str) -> String {
        format!("isa_gtin({value})")
    }

    fn domain_trigger(&self, _cx: &ClassContext, _attribute: &AttributeDescriptor, _predicate: &str) -> Vec<String> {
        Vec::new()
    }

    fn create_trigger(&self, name: &str, event: &str, table: &str) -> String {
        format!("CREATE TRIGGER {name} BEFORE {event} ON {table}\nFOR EACH ROW EXECUTE PROCEDURE {name}();")
    }

    fn sequence(&self, cx: &ClassContext) -> Vec<String> {
        if cx.is_root() {
            vec![format!("CREATE SEQUENCE {};", cx.sequence())]
        } else {
            Vec::new()
        }
    }

    fn primary_key(&self, cx: &ClassContext) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ADD CONSTRAINT pk_{} PRIMARY KEY (id);",
            cx.class.table, cx.class.key
        )]
    }

    fn foreign_key(&self, fk: &ForeignKey) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({})\nREFERENCES {}(id) ON DELETE {};",
            fk.table, fk.name, fk.column, fk.target_table, fk.on_delete
        )]
    }

    fn once_trigger(&self, cx: &ClassContext, attribute: &AttributeDescriptor) -> Vec<String> {
        let column = column_of(attribute);
        let body = format!(
            "IF OLD.{column} IS NOT NULL AND NEW.{column} IS DISTINCT FROM OLD.{column} THEN\n    RAISE EXCEPTION 'value of \"{column}\" cannot be changed';\nEND IF;\nRETURN NEW;"
        );
        self.trigger(
            &format!("{}_{column}_once", cx.class.key),
            "UPDATE",
            &cx.class.table,
            &body,
        )
    }

    fn unique_triggers(&self, unique: &SoftUnique) -> Vec<String> {
        let column = unique.column;
        let found = |duplicates: String| {
            format!(
                "{}\nFOR UPDATE;\nIF FOUND THEN\n    RAISE EXCEPTION '{}';\nEND IF;",
                duplicates.replacen("SELECT", "PERFORM", 1),
                unique.message()
            )
        };

        let insert = format!(
            "IF NEW.{column} IS NOT NULL AND {} THEN\n{}\nEND IF;\nRETURN NEW;",
            unique.is_live("NEW.id"),
            indent(&found(unique.duplicates("NEW.id", &format!("NEW.{column}"))), 4)
        );
        // Reviving a deleted row must not resurrect a duplicate
        let state = format!(
            "IF NEW.{state} > -1 AND OLD.{state} < 0 THEN\n{}\nEND IF;\nRETURN NEW;",
            indent(
                &found(unique.duplicates(
                    "NEW.id",
                    &format!("(SELECT {column} FROM {} WHERE id = NEW.id)", unique.table)
                )),
                4
            ),
            state = unique.state_column,
        );

        let mut statements = self.trigger(&unique.name, "INSERT OR UPDATE", unique.table, &insert);
        statements.extend(self.trigger(
            &format!("{}_state", unique.name),
            "UPDATE",
            unique.state_table,
            &state,
        ));
        statements
    }

    fn procedures(&self, cx: &ClassContext, attribute: &AttributeDescriptor, collection: &Collection) -> Vec<String> {
        let prefix = format!("{}_{}", cx.class.key, attribute.name);
        let (table, owner, member, order) = (
            &collection.table,
            &collection.owner_column,
            &collection.member_column,
            &collection.order_column,
        );
        let lock = self.lock(cx);
        let ids = "obj_ident INTEGER, coll_ids INTEGER[]";
        let each = "FOR iord IN 1..COALESCE(ARRAY_UPPER(coll_ids, 1), 0) LOOP";

        let clear = function(
            &format!("{prefix}_clear"),
            "obj_ident INTEGER",
            "VOID",
            &[],
            &format!("{lock}\nDELETE FROM {table} WHERE {owner} = obj_ident;"),
        );
        let del = function(
            &format!("{prefix}_del"),
            ids,
            "VOID",
            &[],
            &format!("{lock}\nDELETE FROM {table}\nWHERE  {owner} = obj_ident\n       AND {member} = ANY(coll_ids);"),
        );
        let add = function(
            &format!("{prefix}_add"),
            ids,
            "VOID",
            &["last_ord SMALLINT;", "got_id   INTEGER;"],
            &format!(
                "{lock}\n\
                 SELECT COALESCE(MAX({order}), 0) INTO last_ord\n\
                 FROM   {table}\n\
                 WHERE  {owner} = obj_ident;\n\
                 {each}\n    \
                     got_id := coll_ids[iord];\n    \
                     PERFORM true FROM {table} WHERE {owner} = obj_ident AND {member} = got_id;\n    \
                     IF NOT FOUND THEN\n        \
                         last_ord := last_ord + 1;\n        \
                         INSERT INTO {table} ({owner}, {member}, {order})\n        \
                         VALUES (obj_ident, got_id, last_ord);\n    \
                     END IF;\n\
                 END LOOP;"
            ),
        );
        // Negating first keeps the renumbering clear of the unique order index
        let set = function(
            &format!("{prefix}_set"),
            ids,
            "VOID",
            &[],
            &format!(
                "{lock}\n\
                 DELETE FROM {table}\n\
                 WHERE  {owner} = obj_ident\n       \
                        AND {member} <> ALL(coll_ids);\n\
                 UPDATE {table}\n\
                 SET    {order} = -{order}\n\
                 WHERE  {owner} = obj_ident;\n\
                 {each}\n    \
                     UPDATE {table}\n    \
                     SET    {order} = iord\n    \
                     WHERE  {owner} = obj_ident\n           \
                            AND {member} = coll_ids[iord];\n    \
                     IF NOT FOUND THEN\n        \
                         INSERT INTO {table} ({owner}, {member}, {order})\n        \
                         VALUES (obj_ident, coll_ids[iord], iord);\n    \
                     END IF;\n\
                 END LOOP;"
            ),
        );
        vec![clear, del, add, set]
    }

    fn view_write(&self, write: &ViewWrite) -> String {
        let condition = write
            .condition
            .as_ref()
            .map(|c| format!(" WHERE {c}"))
            .unwrap_or_default();
        let body = write
            .statements
            .iter()
            .map(|s| format!("{};", indent(s, 2)))
            .collect::<Vec<_>>()
            .join("\n\n");
        format!(
            "CREATE RULE {} AS\nON {} TO {}{condition} DO INSTEAD (\n{body}\n);",
            write.name, write.event, write.view
        )
    }

    fn root_id(&self, cx: &ClassContext) -> Option<String> {
        Some(format!("NEXTVAL('{}')", cx.sequence()))
    }

    fn last_id(&self, root: &ClassDescriptor) -> String {
        format!("CURRVAL('{}')", sequence_name(root))
    }

    // Conditional INSTEAD rules alone don't make a view insertable
    fn extras(&self, cx: &ClassContext) -> Vec<String> {
        if cx.class.link().is_none() {
            return Vec::new();
        }
        vec![format!(
            "CREATE RULE insert_{}_dummy AS\nON INSERT TO {} DO INSTEAD NOTHING;",
            cx.class.key, cx.class.view
        )]
    }

    fn setup(&self) -> Vec<String> {
        let mut statements = vec![ISA_GTIN.to_string()];
        for (ty, base) in &DOMAINS {
            if let Some(check) = domain_check(self, ty, "VALUE") {
                statements.push(format!(
                    "CREATE DOMAIN {ty} AS {base} CONSTRAINT ck_{ty} CHECK ({check});"
                ));
            }
        }
        statements
    }
}
