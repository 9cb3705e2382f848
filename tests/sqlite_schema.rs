//! Runs the generated SQLite schema against an in-memory database.

use classmap::Backend;
use classmap::meta::{AttributeDescriptor, Catalog, ClassDescriptor, OnDelete, SemanticType};
use classmap::schema::{Generator, SchemaConfig};
use rusqlite::Connection;

fn catalog() -> Catalog {
    Catalog::builder()
        .class(
            ClassDescriptor::standard("simple")
                .attribute(AttributeDescriptor::new("name", SemanticType::String).required().unique())
                .attribute(AttributeDescriptor::new("description", SemanticType::String)),
        )
        .class(
            ClassDescriptor::new("one").parent("simple").attribute(
                AttributeDescriptor::new("bool", SemanticType::Boolean)
                    .required()
                    .default_value("true"),
            ),
        )
        .class(
            ClassDescriptor::new("two")
                .parent("simple")
                .attribute(AttributeDescriptor::new("one", SemanticType::Whole).references("one", OnDelete::Restrict))
                .attribute(AttributeDescriptor::new("code", SemanticType::String).unique()),
        )
        .class(ClassDescriptor::standard("extend").extends("two"))
        .class(
            ClassDescriptor::standard("mediate")
                .mediates("one")
                .attribute(AttributeDescriptor::new("note", SemanticType::String)),
        )
        .class(ClassDescriptor::standard("composed").attribute(AttributeDescriptor::new("ones", SemanticType::Whole).has_many("one")))
        .build()
        .expect("a valid catalog")
}

fn generator(catalog: &Catalog) -> Generator<'_> {
    Generator::new(catalog, SchemaConfig::new(Backend::Sqlite))
}

/// A database holding every class. Collection scripts are left out, they run
///  per call with their parameters.
fn open(catalog: &Catalog) -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    for schema in generator(catalog).schema().unwrap() {
        for (group, statements) in schema.groups() {
            if group == "procedures" {
                continue;
            }
            for statement in statements {
                conn.execute_batch(statement)
                    .unwrap_or_else(|e| panic!("{e}\n{statement}"));
            }
        }
    }
    conn
}

/// Runs a collection script with `?1` and `?2` bound.
fn run(conn: &Connection, catalog: &Catalog, name: &str, owner: i64, ids: &str) -> rusqlite::Result<()> {
    let schema = generator(catalog).class_schema("composed").unwrap();
    let script = schema
        .procedures
        .iter()
        .find(|p| p.lines().next() == Some(format!("-- {name}").as_str()))
        .unwrap_or_else(|| panic!("no script {name}"));
    conn.execute_batch(&script.replace("?1", &owner.to_string()).replace("?2", &format!("'{ids}'")))
}

fn strings(conn: &Connection, sql: &str) -> Vec<String> {
    let mut stmt = conn.prepare(sql).unwrap();
    stmt.query_map([], |row| row.get(0))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap()
}

fn members(conn: &Connection) -> Vec<(i64, i64)> {
    let mut stmt = conn
        .prepare("SELECT one_id, one_order FROM composed_coll_ones WHERE composed_id = 1 ORDER BY one_order")
        .unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap()
}

#[test]
fn extended_objects_link_to_the_row_they_create() {
    let catalog = catalog();
    let conn = open(&catalog);
    conn.execute("INSERT INTO extend (two__name, two__code) VALUES ('first', 'F1')", [])
        .unwrap();
    conn.execute("INSERT INTO two (name) VALUES ('other')", []).unwrap();
    conn.execute("INSERT INTO extend (two__name) VALUES ('mine')", []).unwrap();
    assert_eq!(strings(&conn, "SELECT two__name FROM extend ORDER BY id"), ["first", "mine"]);
    assert_eq!(
        strings(&conn, "SELECT name FROM two ORDER BY id"),
        ["first", "other", "mine"]
    );
}

#[test]
fn extending_an_existing_object_updates_it() {
    let catalog = catalog();
    let conn = open(&catalog);
    conn.execute("INSERT INTO two (name) VALUES ('other')", []).unwrap();
    conn.execute("INSERT INTO extend (two__id, two__code) VALUES (1, 'O1')", [])
        .unwrap();
    assert_eq!(strings(&conn, "SELECT two__name || '/' || two__code FROM extend"), ["other/O1"]);
    assert_eq!(strings(&conn, "SELECT name FROM two"), ["other"]);
}

#[test]
fn mediators_write_through_to_the_mediated_object() {
    let catalog = catalog();
    let conn = open(&catalog);
    conn.execute("INSERT INTO one (name) VALUES ('first')", []).unwrap();
    conn.execute("INSERT INTO mediate (one__name, note) VALUES ('m', 'x')", [])
        .unwrap();
    let (name, flag, note): (String, i64, String) = conn
        .query_row("SELECT one__name, one__bool, note FROM mediate", [], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .unwrap();
    assert_eq!((name.as_str(), flag, note.as_str()), ("m", 1, "x"));

    conn.execute("UPDATE mediate SET one__name = 'renamed' WHERE note = 'x'", [])
        .unwrap();
    assert_eq!(strings(&conn, "SELECT name FROM one ORDER BY id"), ["first", "renamed"]);

    // Deleting the mediated object takes the mediator with it
    conn.execute("DELETE FROM one WHERE name = 'renamed'", []).unwrap();
    assert!(strings(&conn, "SELECT note FROM mediate").is_empty());
}

#[test]
fn adding_skips_ids_already_present() {
    let catalog = catalog();
    let conn = open(&catalog);
    conn.execute("INSERT INTO one (name) VALUES ('a'), ('b'), ('c')", []).unwrap();
    conn.execute("INSERT INTO composed (state) VALUES (1)", []).unwrap();

    run(&conn, &catalog, "composed_ones_add", 1, "[1,1,2]").unwrap();
    assert_eq!(members(&conn), [(1, 1), (2, 2)]);
    run(&conn, &catalog, "composed_ones_add", 1, "[2,3,3]").unwrap();
    assert_eq!(members(&conn), [(1, 1), (2, 2), (3, 3)]);

    run(&conn, &catalog, "composed_ones_set", 1, "[3,1,3]").unwrap();
    assert_eq!(members(&conn), [(3, 1), (1, 2)]);

    run(&conn, &catalog, "composed_ones_del", 1, "[3]").unwrap();
    assert_eq!(members(&conn), [(1, 2)]);
    run(&conn, &catalog, "composed_ones_clear", 1, "[]").unwrap();
    assert!(members(&conn).is_empty());
}
