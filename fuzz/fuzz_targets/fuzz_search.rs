#![no_main]
use libfuzzer_sys::fuzz_target;

use arbitrary::Arbitrary;
use classmap::Backend;
use classmap::meta::{AttributeDescriptor, Catalog, ClassDescriptor, OnDelete, SemanticType};
use classmap::query::Constraints;

#[derive(Debug)]
pub struct SearchInput {
    pub search: String,
}

impl<'a> Arbitrary<'a> for SearchInput {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let s: String = u.arbitrary()?;
        Ok(SearchInput {
            search: s.chars().take(MAX_SEARCH_LENGTH).collect(),
        })
    }
}

const MAX_SEARCH_LENGTH: usize = 10000;

fn catalog() -> Option<Catalog> {
    Catalog::builder()
        .class(
            ClassDescriptor::standard("person")
                .attribute(AttributeDescriptor::new("name", SemanticType::String))
                .attribute(AttributeDescriptor::new("age", SemanticType::Integer))
                .attribute(AttributeDescriptor::new("alive", SemanticType::Boolean))
                .attribute(AttributeDescriptor::new("born", SemanticType::Datetime))
                .attribute(AttributeDescriptor::new("pet", SemanticType::Whole).references("pet", OnDelete::Restrict)),
        )
        .class(ClassDescriptor::standard("pet").attribute(AttributeDescriptor::new("name", SemanticType::String)))
        .build()
        .ok()
}

fuzz_target!(|data: &[u8]| {
    let Some(catalog) = catalog() else { return };
    if let Ok(input) = arbitrary::Unstructured::new(data).arbitrary::<SearchInput>() {
        for backend in [Backend::Postgres, Backend::Sqlite] {
            let _ = classmap::search(backend, &catalog, "person", &input.search, &Constraints::default());
        }
    }
});
