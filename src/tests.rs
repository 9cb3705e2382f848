use crate::meta::{AttributeDescriptor, Catalog, ClassDescriptor, OnDelete, SemanticType};

/// The catalog shared by the schema tests: an inheritance chain under
///  `simple`, a reference, a cross-table unique attribute, a collection, and
///  classes extending and mediating members of the chain.
pub(crate) fn fixture() -> Catalog {
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
            ClassDescriptor::standard("composed")
                .attribute(
                    AttributeDescriptor::new("favourite", SemanticType::Whole).references("one", OnDelete::SetNull),
                )
                .attribute(AttributeDescriptor::new("ones", SemanticType::Whole).has_many("one")),
        )
        .class(
            ClassDescriptor::standard("person")
                .attribute(AttributeDescriptor::new("name", SemanticType::String))
                .attribute(AttributeDescriptor::new("age", SemanticType::Integer))
                .attribute(AttributeDescriptor::new("born", SemanticType::Datetime)),
        )
        .class(
            ClassDescriptor::standard("mediate")
                .mediates("one")
                .attribute(AttributeDescriptor::new("note", SemanticType::String)),
        )
        .build()
        .expect("a valid catalog")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Combinator, Node, Operator, Scalar, Value};
    use crate::query::{self, Compiled, Constraints};
    use crate::schema::{self, Backend, Generator, SchemaConfig};
    use crate::term::{ge, like, or, search};
    use crate::{Error, parser};

    fn pg(key: &str) -> schema::ClassSchema {
        let catalog = fixture();
        Generator::new(&catalog, SchemaConfig::default())
            .class_schema(key)
            .unwrap()
    }

    #[test]
    fn text_search_parses_into_groups() {
        let catalog = fixture();
        let node = parser::parse_text("name => LIKE 'fo%', OR(age => GE 21)", &catalog, "person").unwrap();
        assert_eq!(
            node,
            Node::group(
                Combinator::And,
                vec![
                    Node::leaf("name", Operator::Like, Value::Scalar(Scalar::Str("fo%".into()))),
                    Node::group(
                        Combinator::Or,
                        vec![Node::leaf("age", Operator::Ge, Value::Scalar(Scalar::Int(21)))]
                    ),
                ]
            )
        );
    }

    #[test]
    fn text_and_terms_compile_alike() {
        let catalog = fixture();
        let constraints = Constraints::default();
        for backend in [Backend::Postgres, Backend::Sqlite] {
            let text = crate::search(
                backend,
                &catalog,
                "person",
                "name => LIKE 'fo%', OR(age => GE 21)",
                &constraints,
            )
            .unwrap();
            let terms = crate::search_terms(
                backend,
                &catalog,
                "person",
                &[search("name", like("fo%")), or([search("age", ge(21))])],
                &constraints,
            )
            .unwrap();
            assert_eq!(text, terms);
            assert_eq!(text.where_clause, "LOWER(name) LIKE LOWER(?) AND (age >= ?)");
        }
    }

    #[test]
    fn between_binds_both_ends() {
        let catalog = fixture();
        let compiled = crate::search(
            Backend::Sqlite,
            &catalog,
            "person",
            "age => BETWEEN [2, 4], age => NOT BETWEEN [2, 4]",
            &Constraints::default(),
        )
        .unwrap();
        assert_eq!(
            compiled,
            Compiled {
                where_clause: "age BETWEEN ? AND ? AND age NOT BETWEEN ? AND ?".into(),
                binds: vec![Scalar::Int(2), Scalar::Int(4), Scalar::Int(2), Scalar::Int(4)],
                ..Compiled::default()
            }
        );
    }

    #[test]
    fn unordered_date_segments_are_rejected() {
        let catalog = fixture();
        let err = crate::search(
            Backend::Postgres,
            &catalog,
            "person",
            "born => GT 'xxxx-05-xxT10:xx:xx'",
            &Constraints::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Query(query::Error::TypeMismatch { .. })), "{err}");

        let err = crate::search(
            Backend::Postgres,
            &catalog,
            "person",
            "born => BETWEEN ['xxxx-05-xxTxx:xx:xx', 'xxxx-xx-10Txx:xx:xx']",
            &Constraints::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Parse(parser::Error::TypeMismatch { .. })), "{err}");
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let catalog = fixture();
        let input = format!("{}age => 1{}", "AND(".repeat(2000), ")".repeat(2000));
        for backend in [Backend::Postgres, Backend::Sqlite] {
            let err = crate::search(backend, &catalog, "person", &input, &Constraints::default()).unwrap_err();
            assert!(matches!(err, Error::Parse(parser::Error::Syntax { .. })), "{err}");
        }
    }

    #[test]
    fn unique_among_live_rows() {
        let catalog = Catalog::builder()
            .class(ClassDescriptor::standard("tag").attribute(AttributeDescriptor::new("label", SemanticType::String).unique()))
            .build()
            .unwrap();
        for backend in [Backend::Postgres, Backend::Sqlite] {
            let schema = Generator::new(&catalog, SchemaConfig::new(backend))
                .class_schema("tag")
                .unwrap();
            assert!(
                schema
                    .indexes
                    .contains(&"CREATE UNIQUE INDEX idx_tag_label ON _tag (LOWER(label)) WHERE state > -1;".to_string()),
                "{backend}: {:?}",
                schema.indexes
            );
        }
    }

    #[test]
    fn views_join_the_chain_and_references() {
        assert_eq!(
            pg("two").views,
            ["CREATE VIEW two AS
  SELECT _simple.id AS id,
         _simple.uuid AS uuid,
         _simple.state AS state,
         _simple.name AS name,
         _simple.description AS description,
         simple_two.one_id AS one__id,
         one.uuid AS one__uuid,
         one.state AS one__state,
         one.name AS one__name,
         one.description AS one__description,
         one.bool AS one__bool,
         simple_two.code AS code
  FROM   _simple
         INNER JOIN simple_two ON _simple.id = simple_two.id
         LEFT JOIN one AS one ON simple_two.one_id = one.id;"]
        );
    }

    #[test]
    fn collections() {
        let schema = pg("composed");
        assert_eq!(
            &schema.tables[1..],
            ["CREATE TABLE composed_coll_ones (
    composed_id INTEGER NOT NULL,
    one_id INTEGER NOT NULL,
    one_order SMALLINT NOT NULL,
    PRIMARY KEY (composed_id, one_id)
);"]
        );
        assert_eq!(
            &schema.indexes[schema.indexes.len() - 2..],
            [
                "CREATE UNIQUE INDEX idx_composed_coll_ones_order ON composed_coll_ones (composed_id, one_order);",
                "CREATE INDEX idx_composed_coll_ones_one_id ON composed_coll_ones (one_id);",
            ]
        );
        assert_eq!(
            schema.views[1],
            "CREATE VIEW composed_ones AS
  SELECT composed_coll_ones.composed_id AS composed_id,
         composed_coll_ones.one_order AS one_order,
         one.*
  FROM   composed_coll_ones
         INNER JOIN one ON composed_coll_ones.one_id = one.id
  ORDER BY composed_coll_ones.composed_id, composed_coll_ones.one_order;"
        );
        let procedures: Vec<_> = schema
            .procedures
            .iter()
            .filter_map(|p| p.split('(').next())
            .collect();
        assert_eq!(
            procedures,
            [
                "CREATE FUNCTION composed_ones_clear",
                "CREATE FUNCTION composed_ones_del",
                "CREATE FUNCTION composed_ones_add",
                "CREATE FUNCTION composed_ones_set",
            ]
        );
    }

    #[test]
    fn set_null_on_sqlite() {
        let catalog = fixture();
        let schema = Generator::new(&catalog, SchemaConfig::new(Backend::Sqlite))
            .class_schema("composed")
            .unwrap();
        assert!(schema.constraints.contains(
            &"CREATE TRIGGER fkd_composed_favourite_id
BEFORE DELETE ON simple_one
FOR EACH ROW
BEGIN
  UPDATE _composed SET favourite_id = NULL WHERE favourite_id = OLD.id;
END;"
                .to_string()
        ));
    }

    #[test]
    fn updates_write_through_to_the_extended_class() {
        assert_eq!(
            pg("extend").update,
            ["CREATE RULE update_extend AS
ON UPDATE TO extend DO INSTEAD (
  UPDATE _extend
  SET    two_id = NEW.two__id,
         uuid = NEW.uuid,
         state = NEW.state
  WHERE  id = OLD.id;

  UPDATE two
  SET    uuid = NEW.two__uuid,
         state = NEW.two__state,
         name = NEW.two__name,
         description = NEW.two__description,
         one__id = NEW.two__one__id,
         code = NEW.two__code
  WHERE  id = NEW.two__id;
);"]
        );
    }

    #[test]
    fn mediators_create_or_reuse_the_mediated_object() {
        let schema = pg("mediate");
        assert_eq!(
            schema.insert,
            [
                "CREATE RULE insert_mediate AS
ON INSERT TO mediate WHERE NEW.one__id IS NULL DO INSTEAD (
  INSERT INTO one (uuid, state, name, description, bool)
  VALUES (NEW.one__uuid, NEW.one__state, NEW.one__name, NEW.one__description, NEW.one__bool);

  INSERT INTO _mediate (id, one_id, uuid, state, note)
  VALUES (NEXTVAL('seq_mediate'), CURRVAL('seq_simple'), COALESCE(NEW.uuid, gen_random_uuid()), COALESCE(NEW.state, 1), NEW.note);
);",
                "CREATE RULE extend_mediate AS
ON INSERT TO mediate WHERE NEW.one__id IS NOT NULL DO INSTEAD (
  UPDATE one
  SET    uuid = COALESCE(NEW.one__uuid, uuid),
         state = COALESCE(NEW.one__state, state),
         name = COALESCE(NEW.one__name, name),
         description = COALESCE(NEW.one__description, description),
         bool = COALESCE(NEW.one__bool, bool)
  WHERE  id = NEW.one__id;

  INSERT INTO _mediate (id, one_id, uuid, state, note)
  VALUES (NEXTVAL('seq_mediate'), NEW.one__id, COALESCE(NEW.uuid, gen_random_uuid()), COALESCE(NEW.state, 1), NEW.note);
);",
            ]
        );
        assert_eq!(
            schema.extras,
            ["CREATE RULE insert_mediate_dummy AS\nON INSERT TO mediate DO INSTEAD NOTHING;"]
        );
    }

    #[test]
    fn updates_write_through_to_the_mediated_class() {
        assert_eq!(
            pg("mediate").update,
            ["CREATE RULE update_mediate AS
ON UPDATE TO mediate DO INSTEAD (
  UPDATE _mediate
  SET    one_id = NEW.one__id,
         uuid = NEW.uuid,
         state = NEW.state,
         note = NEW.note
  WHERE  id = OLD.id;

  UPDATE one
  SET    uuid = NEW.one__uuid,
         state = NEW.one__state,
         name = NEW.one__name,
         description = NEW.one__description,
         bool = NEW.one__bool
  WHERE  id = NEW.one__id;
);"]
        );
    }

    #[test]
    fn mediators_cascade_from_the_mediated_object() {
        let catalog = fixture();
        let schema = Generator::new(&catalog, SchemaConfig::new(Backend::Sqlite))
            .class_schema("mediate")
            .unwrap();
        assert!(schema.constraints.contains(
            &"CREATE TRIGGER fkd_mediate_one_id
BEFORE DELETE ON simple_one
FOR EACH ROW
BEGIN
  DELETE FROM _mediate WHERE one_id = OLD.id;
END;"
                .to_string()
        ));
    }

    #[test]
    fn classes_in_dependency_order() {
        let catalog = fixture();
        let keys: Vec<_> = Generator::new(&catalog, SchemaConfig::default())
            .schema()
            .unwrap()
            .into_iter()
            .map(|s| s.key)
            .collect();
        assert_eq!(keys, ["simple", "one", "two", "extend", "composed", "person", "mediate"]);
    }

    #[test]
    fn whole_scripts() {
        let catalog = fixture();
        let sql = Generator::new(&catalog, SchemaConfig::default()).to_sql().unwrap();
        assert!(sql.starts_with("CREATE FUNCTION isa_gtin(code TEXT)"));
        assert!(sql.contains("\n\nCREATE SEQUENCE seq_simple;\n\nCREATE TABLE _simple (\n"));
        assert!(sql.ends_with(";\n"));

        let sql = Generator::new(&catalog, SchemaConfig::new(Backend::Sqlite)).to_sql().unwrap();
        assert!(sql.starts_with("CREATE TABLE _simple (\n    id INTEGER PRIMARY KEY AUTOINCREMENT,"));
        assert!(!sql.contains("CREATE SEQUENCE"));
        assert!(!sql.contains("CREATE RULE"));

        // Same catalog, same bytes
        assert_eq!(sql, Generator::new(&catalog, SchemaConfig::new(Backend::Sqlite)).to_sql().unwrap());
    }

    #[test]
    fn generation_stops_at_the_first_bad_class() {
        let catalog = Catalog::builder()
            .class(ClassDescriptor::standard("a"))
            .class(ClassDescriptor::standard("b").attribute(AttributeDescriptor::new(
                "shape",
                SemanticType::Unknown("geometry".into()),
            )))
            .class(
                ClassDescriptor::standard("c")
                    .attribute(AttributeDescriptor::new("size", SemanticType::Posint).default_value("0")),
            )
            .build()
            .unwrap();
        let generator = Generator::new(&catalog, SchemaConfig::default());
        assert_eq!(
            generator.schema(),
            Err(schema::Error::UnmappedType {
                class: "b".into(),
                attribute: "shape".into(),
                ty: SemanticType::Unknown("geometry".into()),
            })
        );
        assert!(matches!(
            generator.class_schema("c"),
            Err(schema::Error::InvalidDefault { .. })
        ));
        assert!(generator.class_schema("a").is_ok());
        assert_eq!(
            generator.class_schema("ghost"),
            Err(schema::Error::UnknownClass("ghost".into()))
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn config_from_json() {
        let config: SchemaConfig = serde_json::from_str(r#"{"backend": "sqlite"}"#).unwrap();
        assert_eq!(config, SchemaConfig::new(Backend::Sqlite));

        let constraints: Constraints =
            serde_json::from_str(r#"{"order_by": ["name"], "sort_order": ["DESC"], "limit": 5}"#).unwrap();
        assert_eq!(constraints.limit, Some(5));

        let class: ClassDescriptor = serde_json::from_str(
            r#"{"key": "tag", "attributes": [{"name": "label", "type": "string", "flags": {"persistent": true}}]}"#,
        )
        .unwrap();
        assert_eq!(class.attributes[0].ty, SemanticType::String);
    }
}
