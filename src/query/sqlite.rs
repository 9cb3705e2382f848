use super::{Error, Fragment, QueryContext, lookup_column, postgres, to_bind};
use crate::ir::{Leaf, Operator, Path, Scalar};
use crate::meta::{MetadataGateway, SemanticType};
use crate::to_sql::PrinterConfig;

pub struct Compiler<'a, G: ?Sized> {
    pub gateway: &'a G,
    pub class: &'a str,
}

impl<'a, G: ?Sized> Compiler<'a, G> {
    pub fn new(gateway: &'a G, class: &'a str) -> Self {
        Self { gateway, class }
    }
}

impl<G: MetadataGateway + ?Sized> QueryContext for Compiler<'_, G> {
    fn lookup_column(&self, path: &Path) -> Result<(String, SemanticType), Error> {
        lookup_column(self.gateway, self.class, path)
    }

    fn compile_leaf(&self, leaf: &Leaf, binds: &mut Vec<Scalar>) -> Result<Fragment, Error> {
        let fragment = postgres::compile_leaf(self, leaf, binds)?;
        // REGEXP has no case-insensitive form, the pattern asks for it instead
        if leaf.operator == Operator::Match
            && let Some(Scalar::Str(pattern)) = binds.last_mut()
        {
            pattern.insert_str(0, "(?i)");
        }
        Ok(fragment)
    }

    fn printer(&self) -> PrinterConfig {
        PrinterConfig::sqlite()
    }

    // No boolean or datetime storage classes
    fn bind_value(&self, value: Scalar) -> Scalar {
        match value {
            Scalar::Bool(b) => Scalar::Int(i64::from(b)),
            Scalar::Date(date) => match date.to_naive() {
                Some(naive) => Scalar::Str(naive.format("%Y-%m-%d %H:%M:%S").to_string()),
                None => Scalar::Str(date.segment_string()),
            },
            other => other,
        }
    }

    fn limit_clause(
        &self,
        limit: Option<u64>,
        offset: Option<u64>,
        binds: &mut Vec<Scalar>,
    ) -> Result<String, Error> {
        match (limit, offset) {
            // OFFSET is only valid after a LIMIT
            (None, Some(offset)) => {
                binds.push(Scalar::Int(to_bind(offset, "offset")?));
                Ok("LIMIT -1 OFFSET ?".to_string())
            }
            _ => postgres::Compiler::new(self.gateway, self.class).limit_clause(limit, offset, binds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{AttributeDescriptor, Catalog, ClassDescriptor};
    use crate::parser::parse_text;
    use crate::query::{Compiled, Constraints, compile};

    fn catalog() -> Catalog {
        Catalog::builder()
            .class(
                ClassDescriptor::standard("person")
                    .attribute(AttributeDescriptor::new("name", SemanticType::String))
                    .attribute(AttributeDescriptor::new("active", SemanticType::Boolean))
                    .attribute(AttributeDescriptor::new("born", SemanticType::Datetime)),
            )
            .build()
            .unwrap()
    }

    fn compile_with(input: &str, constraints: &Constraints) -> Result<Compiled, Error> {
        let catalog = catalog();
        let node = parse_text(input, &catalog, "person").expect("valid search");
        compile(&node, constraints, &Compiler::new(&catalog, "person"))
    }

    #[test]
    fn binds_use_storage_classes() {
        let compiled = compile_with("active => 1, born => '2024-05-01 00:00:00'", &Constraints::default()).unwrap();
        assert_eq!(compiled.where_clause, "active = ? AND born = ?");
        assert_eq!(
            compiled.binds,
            [Scalar::Int(1), Scalar::Str("2024-05-01 00:00:00".into())]
        );
    }

    #[test]
    fn partial_dates_compare_their_segments() {
        // A date without a time is still incomplete
        let compiled = compile_with(
            "born => '2024-05-01', born => 'xxxx-05-xxTxx:xx:xx'",
            &Constraints::default(),
        )
        .unwrap();
        assert_eq!(
            compiled.where_clause,
            "STRFTIME('%Y%m%d', born) = ? AND STRFTIME('%m', born) = ?"
        );
        assert_eq!(
            compiled.binds,
            [Scalar::Str("20240501".into()), Scalar::Str("05".into())]
        );
    }

    #[test]
    fn case_insensitive_regexp() {
        let compiled = compile_with("name => MATCH '^a', name => NOT MATCH 'b'", &Constraints::default()).unwrap();
        assert_eq!(compiled.where_clause, "name REGEXP ? AND name NOT REGEXP ?");
        assert_eq!(
            compiled.binds,
            [Scalar::Str("(?i)^a".into()), Scalar::Str("(?i)b".into())]
        );
    }

    #[test]
    fn offset_without_limit() {
        let constraints = Constraints {
            offset: Some(5),
            ..Constraints::default()
        };
        let compiled = compile_with("", &constraints).unwrap();
        assert_eq!(compiled.limit_clause, "LIMIT -1 OFFSET ?");
        assert_eq!(compiled.binds, [Scalar::Int(5)]);
        assert_eq!(compiled.select_sql("person"), "SELECT * FROM person LIMIT -1 OFFSET ?");

        let constraints = Constraints {
            limit: Some(1),
            offset: Some(5),
            ..Constraints::default()
        };
        assert_eq!(compile_with("", &constraints).unwrap().limit_clause, "LIMIT ? OFFSET ?");
    }
}
