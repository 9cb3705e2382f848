//! Class and attribute metadata.
//!
//! Descriptors arrive from the reflection layer already shaped like this; the
//! [Catalog] is the in-memory [MetadataGateway] used by the parser, the query
//! compiler and the schema generator. Building a catalog performs the one
//! static resolution pass everything else relies on: default table/view/column
//! naming, collection naming, the `extends`/`mediates` link attribute and the
//! delegated attribute copies, flattened view column lists and the dependency
//! order.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

/// The semantic type of an attribute. Each backend maps these onto a column
///  type; anything it can't map is reported at generation time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, strum::EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SemanticType {
    #[default]
    String,
    Whole,
    Posint,
    Integer,
    Boolean,
    Uuid,
    State,
    Version,
    Duration,
    Datetime,
    Operator,
    MediaType,
    AttributePath,
    Gtin,
    Binary,
    /// A type name the metadata layer knows but this crate doesn't
    #[strum(default)]
    Unknown(String),
}

impl SemanticType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::String => "string",
            Self::Whole => "whole",
            Self::Posint => "posint",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Uuid => "uuid",
            Self::State => "state",
            Self::Version => "version",
            Self::Duration => "duration",
            Self::Datetime => "datetime",
            Self::Operator => "operator",
            Self::MediaType => "media_type",
            Self::AttributePath => "attribute_path",
            Self::Gtin => "gtin",
            Self::Binary => "binary",
            Self::Unknown(name) => name,
        }
    }

    /// String-like types are compared and indexed case-insensitively.
    pub fn is_case_folded(&self) -> bool {
        matches!(self, Self::String | Self::Version)
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, Self::Whole | Self::Posint | Self::Integer | Self::State)
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for SemanticType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for SemanticType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(name.parse().unwrap_or(SemanticType::Unknown(name)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum OnDelete {
    Cascade,
    #[default]
    Restrict,
    #[strum(serialize = "SET NULL")]
    SetNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum Relationship {
    Has,
    HasMany,
    TypeOf,
    Extends,
    Mediates,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PkStrategy {
    /// Root classes draw ids from their own sequence.
    #[default]
    RootSequence,
    /// Subclasses reuse the id generated for the root row.
    InheritedId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct Flags {
    pub required: bool,
    pub unique: bool,
    pub distinct: bool,
    pub indexed: bool,
    pub persistent: bool,
    /// Can't change once set to a non-null value
    pub once: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct Reference {
    pub class: String,
    pub on_delete: OnDelete,
}

/// Naming for the ordered junction table backing a `has_many` attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct Collection {
    pub table: String,
    pub view: String,
    pub owner_column: String,
    pub member_column: String,
    pub order_column: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct AttributeDescriptor {
    pub name: String,
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub ty: SemanticType,
    /// Storage column. `None` for delegated, collection and transient
    ///  attributes.
    pub column: Option<String>,
    /// Column name in the class view, `__` separating each hop.
    pub view_column: String,
    pub flags: Flags,
    pub default: Option<String>,
    pub references: Option<Reference>,
    pub relationship: Option<Relationship>,
    pub delegates_to: Option<String>,
    pub acts_as: Option<String>,
    pub collection: Option<Collection>,
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>, ty: SemanticType) -> Self {
        Self {
            name: name.into(),
            ty,
            flags: Flags {
                persistent: true,
                ..Flags::default()
            },
            ..Self::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.flags.required = true;
        self
    }

    /// Unique among live rows (`state > -1`).
    pub fn unique(mut self) -> Self {
        self.flags.unique = true;
        self
    }

    /// Unique across every row regardless of state.
    pub fn distinct(mut self) -> Self {
        self.flags.unique = true;
        self.flags.distinct = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.flags.indexed = true;
        self
    }

    pub fn once(mut self) -> Self {
        self.flags.once = true;
        self
    }

    pub fn transient(mut self) -> Self {
        self.flags.persistent = false;
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// A `has` reference to an object of another class.
    pub fn references(mut self, class: impl Into<String>, on_delete: OnDelete) -> Self {
        self.references = Some(Reference {
            class: class.into(),
            on_delete,
        });
        self.relationship.get_or_insert(Relationship::Has);
        self
    }

    /// An ordered collection of objects of another class.
    pub fn has_many(mut self, class: impl Into<String>) -> Self {
        self.references = Some(Reference {
            class: class.into(),
            on_delete: OnDelete::Cascade,
        });
        self.relationship = Some(Relationship::HasMany);
        self
    }

    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationship = Some(relationship);
        self
    }

    pub fn is_reference(&self) -> bool {
        self.references.is_some() && !self.is_collection()
    }

    pub fn is_collection(&self) -> bool {
        self.relationship == Some(Relationship::HasMany)
    }

    pub fn is_delegated(&self) -> bool {
        self.delegates_to.is_some()
    }

    /// Stored in its class's own table.
    pub fn is_stored(&self) -> bool {
        self.flags.persistent && self.column.is_some() && !self.is_collection()
    }

    /// The type values are coerced to when searching: references compare ids.
    pub fn search_type(&self) -> SemanticType {
        if self.is_reference() {
            SemanticType::Whole
        } else {
            self.ty.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct ClassDescriptor {
    pub key: String,
    pub table: String,
    pub view: String,
    pub parent: Option<String>,
    pub extends: Option<String>,
    pub mediates: Option<String>,
    pub attributes: Vec<AttributeDescriptor>,
    pub pk: PkStrategy,
}

impl ClassDescriptor {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// A root class carrying the conventional `uuid` and `state` attributes.
    pub fn standard(key: impl Into<String>) -> Self {
        Self::new(key)
            .attribute(
                AttributeDescriptor::new("uuid", SemanticType::Uuid)
                    .required()
                    .distinct()
                    .once(),
            )
            .attribute(
                AttributeDescriptor::new("state", SemanticType::State)
                    .required()
                    .indexed()
                    .default_value("1"),
            )
    }

    pub fn parent(mut self, key: impl Into<String>) -> Self {
        self.parent = Some(key.into());
        self
    }

    pub fn extends(mut self, key: impl Into<String>) -> Self {
        self.extends = Some(key.into());
        self
    }

    pub fn mediates(mut self, key: impl Into<String>) -> Self {
        self.mediates = Some(key.into());
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn view(mut self, view: impl Into<String>) -> Self {
        self.view = view.into();
        self
    }

    pub fn attribute(mut self, attribute: AttributeDescriptor) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// The class whose identity this one shares, with the relationship kind.
    pub fn identity_target(&self) -> Option<(&str, Relationship)> {
        match (&self.extends, &self.mediates) {
            (Some(target), _) => Some((target, Relationship::Extends)),
            (None, Some(target)) => Some((target, Relationship::Mediates)),
            (None, None) => None,
        }
    }

    pub fn own_attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// The link attribute added for `extends`/`mediates`.
    pub fn link(&self) -> Option<&AttributeDescriptor> {
        let (target, _) = self.identity_target()?;
        self.attributes
            .iter()
            .find(|a| !a.is_delegated() && a.is_reference() && a.name == target)
    }

    pub fn stored_attributes(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.attributes.iter().filter(|a| a.is_stored())
    }

    pub fn collections(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.attributes.iter().filter(|a| a.is_collection())
    }

    pub fn delegated(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.attributes.iter().filter(|a| a.is_delegated())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("class `{0}` is declared more than once")]
    DuplicateClass(String),
    #[error("class `{class}` refers to unknown class `{target}`")]
    UnknownClass { class: String, target: String },
    #[error("class `{0}` cannot both extend and mediate another class")]
    ExtendsAndMediates(String),
    #[error("attribute `{attribute}` is declared more than once in class `{class}`")]
    DuplicateAttribute { class: String, attribute: String },
    #[error("class `{0}` is part of an inheritance or reference cycle")]
    Cycle(String),
}

/// An attribute path resolved against a class.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPath<'a> {
    /// Flattened view column, e.g. `one__name` for `one.name`
    pub column: String,
    pub attribute: &'a AttributeDescriptor,
}

/// The contract with the metadata/reflection layer.
pub trait MetadataGateway {
    fn resolve(&self, class_key: &str) -> Option<&ClassDescriptor>;

    /// Looks up an attribute visible on a class: its own, inherited and
    ///  delegated attributes.
    fn attribute(&self, class_key: &str, name: &str) -> Option<&AttributeDescriptor>;

    /// Walks a dotted path through referenced classes. Returns `None` unless
    ///  the last segment names a persistent, non-collection attribute.
    fn resolve_path(&self, class_key: &str, path: &str) -> Option<ResolvedPath<'_>> {
        let mut class = self.resolve(class_key)?;
        let mut prefix = String::new();
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let attribute = self.attribute(&class.key, segment)?;
            if attribute.is_collection() || !attribute.flags.persistent {
                return None;
            }
            if segments.peek().is_none() {
                return Some(ResolvedPath {
                    column: format!("{prefix}{}", attribute.view_column),
                    attribute,
                });
            }
            let target = attribute.references.as_ref()?;
            prefix.push_str(&attribute.name);
            prefix.push_str("__");
            class = self.resolve(&target.class)?;
        }
        None
    }
}

/// The resolved set of classes.
#[derive(Debug, Clone)]
pub struct Catalog {
    classes: Vec<ClassDescriptor>,
    index: HashMap<String, usize>,
    order: Vec<usize>,
    view_columns: HashMap<String, Vec<String>>,
    id: AttributeDescriptor,
}

#[derive(Debug, Default)]
pub struct CatalogBuilder {
    classes: Vec<ClassDescriptor>,
}

impl CatalogBuilder {
    pub fn class(mut self, class: ClassDescriptor) -> Self {
        self.classes.push(class);
        self
    }

    pub fn build(self) -> Result<Catalog, Error> {
        let mut classes = self.classes;
        let mut index = HashMap::with_capacity(classes.len());
        for (i, class) in classes.iter().enumerate() {
            if index.insert(class.key.clone(), i).is_some() {
                return Err(Error::DuplicateClass(class.key.clone()));
            }
        }
        validate_targets(&classes, &index)?;
        let order = dependency_order(&classes, &index)?;

        let mut view_columns = HashMap::with_capacity(classes.len());
        for &i in &order {
            resolve_class(&mut classes, &index, i)?;
            let columns = flatten_view_columns(&classes, &index, &view_columns, i);
            view_columns.insert(classes[i].key.clone(), columns);
        }

        debug!(classes = classes.len(), "catalog built");
        Ok(Catalog {
            classes,
            index,
            order,
            view_columns,
            id: AttributeDescriptor {
                column: Some("id".into()),
                view_column: "id".into(),
                ..AttributeDescriptor::new("id", SemanticType::Whole).required()
            },
        })
    }
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// Classes in declaration order.
    pub fn classes(&self) -> impl Iterator<Item = &ClassDescriptor> {
        self.classes.iter()
    }

    /// Parents, identity targets, referenced classes and collection members
    ///  come before the classes depending on them.
    pub fn dependency_order(&self) -> impl Iterator<Item = &ClassDescriptor> {
        self.order.iter().map(|&i| &self.classes[i])
    }

    /// The inheritance chain of a class, root first, ending with the class.
    pub fn chain(&self, key: &str) -> Vec<&ClassDescriptor> {
        let mut chain = Vec::new();
        let mut next = self.resolve(key);
        while let Some(class) = next {
            chain.push(class);
            next = class.parent.as_deref().and_then(|p| self.resolve(p));
        }
        chain.reverse();
        chain
    }

    pub fn root(&self, key: &str) -> Option<&ClassDescriptor> {
        self.chain(key).into_iter().next()
    }

    /// Column names of the class view, in select order.
    pub fn view_columns(&self, key: &str) -> &[String] {
        self.view_columns.get(key).map_or(&[], Vec::as_slice)
    }
}

impl MetadataGateway for Catalog {
    fn resolve(&self, class_key: &str) -> Option<&ClassDescriptor> {
        self.index.get(class_key).map(|&i| &self.classes[i])
    }

    fn attribute(&self, class_key: &str, name: &str) -> Option<&AttributeDescriptor> {
        if name == "id" {
            return self.resolve(class_key).map(|_| &self.id);
        }
        self.chain(class_key)
            .into_iter()
            .rev()
            .find_map(|class| class.own_attribute(name))
    }
}

fn validate_targets(classes: &[ClassDescriptor], index: &HashMap<String, usize>) -> Result<(), Error> {
    for class in classes {
        if class.extends.is_some() && class.mediates.is_some() {
            return Err(Error::ExtendsAndMediates(class.key.clone()));
        }
        let targets = [&class.parent, &class.extends, &class.mediates]
            .into_iter()
            .flatten()
            .chain(class.attributes.iter().filter_map(|a| a.references.as_ref().map(|r| &r.class)));
        for target in targets {
            if !index.contains_key(target) {
                return Err(Error::UnknownClass {
                    class: class.key.clone(),
                    target: target.clone(),
                });
            }
        }
    }
    Ok(())
}

fn dependencies(class: &ClassDescriptor) -> impl Iterator<Item = &str> {
    [&class.parent, &class.extends, &class.mediates]
        .into_iter()
        .flatten()
        .map(String::as_str)
        .chain(
            class
                .attributes
                .iter()
                .filter_map(|a| a.references.as_ref().map(|r| r.class.as_str())),
        )
}

// Depth-first, visiting classes and their dependencies in declaration order
//  so the result is stable for a given input.
fn dependency_order(classes: &[ClassDescriptor], index: &HashMap<String, usize>) -> Result<Vec<usize>, Error> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Visiting,
        Done,
    }

    fn visit(
        i: usize,
        classes: &[ClassDescriptor],
        index: &HashMap<String, usize>,
        marks: &mut [Mark],
        order: &mut Vec<usize>,
    ) -> Result<(), Error> {
        match marks[i] {
            Mark::Done => return Ok(()),
            Mark::Visiting => return Err(Error::Cycle(classes[i].key.clone())),
            Mark::New => {}
        }
        marks[i] = Mark::Visiting;
        for dep in dependencies(&classes[i]) {
            let j = index[dep];
            // A collection of its own class is legal: the junction table
            //  refers to the same table twice.
            if j == i
                && classes[i]
                    .attributes
                    .iter()
                    .any(|a| a.is_collection() && a.references.as_ref().is_some_and(|r| r.class == dep))
            {
                continue;
            }
            visit(j, classes, index, marks, order)?;
        }
        marks[i] = Mark::Done;
        order.push(i);
        Ok(())
    }

    let mut marks = vec![Mark::New; classes.len()];
    let mut order = Vec::with_capacity(classes.len());
    for i in 0..classes.len() {
        visit(i, classes, index, &mut marks, &mut order)?;
    }
    Ok(order)
}

fn chain_of<'a>(
    classes: &'a [ClassDescriptor],
    index: &HashMap<String, usize>,
    i: usize,
) -> Vec<&'a ClassDescriptor> {
    let mut chain = vec![&classes[i]];
    while let Some(parent) = chain.last().and_then(|c| c.parent.as_ref()) {
        chain.push(&classes[index[parent]]);
    }
    chain.reverse();
    chain
}

// Fills in naming defaults, the identity link and delegated copies. Every
//  class this one depends on has already been resolved.
fn resolve_class(classes: &mut [ClassDescriptor], index: &HashMap<String, usize>, i: usize) -> Result<(), Error> {
    let table = match &classes[i].parent {
        None => format!("_{}", classes[i].key),
        Some(parent) => {
            let parent = &classes[index[parent]];
            format!("{}_{}", parent.table.trim_start_matches('_'), classes[i].key)
        }
    };
    let delegated = delegated_copies(classes, index, i);

    let class = &mut classes[i];
    class.pk = if class.parent.is_none() {
        PkStrategy::RootSequence
    } else {
        PkStrategy::InheritedId
    };
    if class.table.is_empty() {
        class.table = table;
    }
    if class.view.is_empty() {
        class.view = class.key.clone();
    }

    if let Some((target, relationship)) = class.identity_target() {
        let target = target.to_string();
        if class.own_attribute(&target).is_some() {
            return Err(Error::DuplicateAttribute {
                class: class.key.clone(),
                attribute: target,
            });
        }
        let link = AttributeDescriptor::new(target.clone(), SemanticType::Whole)
            .references(target, OnDelete::Cascade)
            .relationship(relationship)
            .required()
            .once();
        class.attributes.insert(0, link);
    }

    let owner = class.key.clone();
    for attribute in class.attributes.iter_mut().filter(|a| !a.is_delegated()) {
        if attribute.ty == SemanticType::Uuid {
            attribute.flags.once = true;
        }
        let Some(reference) = &attribute.references else {
            if attribute.flags.persistent && attribute.column.is_none() {
                attribute.column = Some(attribute.name.clone());
            }
            if attribute.view_column.is_empty() {
                attribute.view_column = attribute.name.clone();
            }
            continue;
        };
        if attribute.is_collection() {
            let member = reference.class.clone();
            let owner_column = if member == owner {
                "obj_id".to_string()
            } else {
                format!("{owner}_id")
            };
            attribute.column = None;
            attribute.view_column = attribute.name.clone();
            attribute.collection.get_or_insert_with(|| Collection {
                table: format!("{owner}_coll_{}", attribute.name),
                view: format!("{owner}_{}", attribute.name),
                owner_column,
                member_column: format!("{member}_id"),
                order_column: format!("{member}_order"),
            });
        } else {
            if attribute.flags.persistent && attribute.column.is_none() {
                attribute.column = Some(format!("{}_id", attribute.name));
            }
            attribute.view_column = format!("{}__id", attribute.name);
        }
    }

    let mut seen: Vec<String> = Vec::new();
    for name in classes[i].attributes.iter().map(|a| a.name.clone()) {
        if seen.contains(&name) {
            return Err(Error::DuplicateAttribute {
                class: classes[i].key.clone(),
                attribute: name,
            });
        }
        seen.push(name);
    }
    for ancestor in chain_of(classes, index, i).iter().rev().skip(1) {
        if let Some(clash) = ancestor.attributes.iter().find(|a| seen.contains(&a.name)) {
            return Err(Error::DuplicateAttribute {
                class: classes[i].key.clone(),
                attribute: clash.name.clone(),
            });
        }
        seen.extend(ancestor.attributes.iter().map(|a| a.name.clone()));
    }

    let class = &mut classes[i];
    for copy in delegated {
        if seen.contains(&copy.name) {
            warn!(class = %class.key, attribute = %copy.name, "skipping delegated attribute that collides with an own attribute");
            continue;
        }
        seen.push(copy.name.clone());
        class.attributes.push(copy);
    }
    Ok(())
}

// Copies every scalar attribute visible on the extended/mediated class so it
//  can be read and searched through this class's view.
fn delegated_copies(classes: &[ClassDescriptor], index: &HashMap<String, usize>, i: usize) -> Vec<AttributeDescriptor> {
    let Some((target, relationship)) = classes[i].identity_target() else {
        return Vec::new();
    };
    let target_index = index[target];
    chain_of(classes, index, target_index)
        .into_iter()
        .flat_map(|class| class.attributes.iter())
        .filter(|a| a.flags.persistent && !a.is_collection() && !a.is_reference())
        .map(|a| AttributeDescriptor {
            name: a.name.clone(),
            ty: a.ty.clone(),
            column: None,
            view_column: format!("{target}__{}", a.view_column),
            flags: Flags {
                persistent: true,
                ..Flags::default()
            },
            default: None,
            references: None,
            relationship: Some(relationship),
            delegates_to: Some(target.to_string()),
            acts_as: Some(a.name.clone()),
            collection: None,
        })
        .collect()
}

fn flatten_view_columns(
    classes: &[ClassDescriptor],
    index: &HashMap<String, usize>,
    resolved: &HashMap<String, Vec<String>>,
    i: usize,
) -> Vec<String> {
    let mut columns = vec!["id".to_string()];
    for class in chain_of(classes, index, i) {
        for attribute in class.stored_attributes() {
            columns.push(attribute.view_column.clone());
            let Some(reference) = attribute.references.as_ref() else {
                continue;
            };
            let nested = resolved.get(&reference.class).map_or(&[][..], Vec::as_slice);
            columns.extend(
                nested
                    .iter()
                    .filter(|c| *c != "id")
                    .map(|c| format!("{}__{c}", attribute.name)),
            );
        }
    }
    columns
}
