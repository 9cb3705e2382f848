//! DDL synthesis for a [Catalog].
//!
//! For each class, in dependency order, the generator emits the sequence,
//!  table, indexes, constraints, collection procedures, the unifying view and
//!  the rules (or triggers) that make the view writable. Statements that read
//!  the same on every backend are assembled here; everything else is asked of
//!  the backend's [Dialect]. Output is deterministic: the same catalog always
//!  produces byte-identical SQL.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use strum::VariantNames;
use tracing::debug;

use crate::ir::Operator;
use crate::meta::{self, AttributeDescriptor, Catalog, ClassDescriptor, Collection, MetadataGateway, OnDelete, SemanticType};

pub mod postgres;
pub mod sqlite;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Backend {
    #[default]
    Postgres,
    Sqlite,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct SchemaConfig {
    pub backend: Backend,
    /// SQL expression used for generated UUID defaults instead of the
    ///  backend's own
    pub uuid_generator: Option<String>,
}

impl SchemaConfig {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("attribute `{attribute}` of class `{class}` has type `{ty}`, which has no column mapping")]
    UnmappedType {
        class: String,
        attribute: String,
        ty: SemanticType,
    },
    #[error("default `{value}` for `{class}.{attribute}` is invalid: {message}")]
    InvalidDefault {
        class: String,
        attribute: String,
        value: String,
        message: String,
    },
    #[error("unknown class `{0}`")]
    UnknownClass(String),
    #[error(transparent)]
    Catalog(#[from] meta::Error),
}

pub const VERSION_PATTERN: &str = r"^v?\d+(\.\d+)*$";
pub const MEDIA_TYPE_PATTERN: &str = r"^[a-z]+/[a-z0-9.+-]+$";

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(VERSION_PATTERN).expect("valid version pattern"));
static MEDIA_TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(MEDIA_TYPE_PATTERN).expect("valid media type pattern"));

/// The statements for one class, grouped the way they must be run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassSchema {
    pub key: String,
    pub sequence: Vec<String>,
    pub tables: Vec<String>,
    pub indexes: Vec<String>,
    pub constraints: Vec<String>,
    pub procedures: Vec<String>,
    pub views: Vec<String>,
    pub insert: Vec<String>,
    pub update: Vec<String>,
    pub delete: Vec<String>,
    pub extras: Vec<String>,
}

impl ClassSchema {
    pub fn groups(&self) -> [(&'static str, &[String]); 10] {
        [
            ("sequence", self.sequence.as_slice()),
            ("tables", self.tables.as_slice()),
            ("indexes", self.indexes.as_slice()),
            ("constraints", self.constraints.as_slice()),
            ("procedures", self.procedures.as_slice()),
            ("views", self.views.as_slice()),
            ("insert", self.insert.as_slice()),
            ("update", self.update.as_slice()),
            ("delete", self.delete.as_slice()),
            ("extras", self.extras.as_slice()),
        ]
    }

    pub fn statements(&self) -> impl Iterator<Item = &str> {
        self.groups()
            .into_iter()
            .flat_map(|(_, statements)| statements.iter().map(String::as_str))
    }
}

impl fmt::Display for ClassSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, statement) in self.statements().enumerate() {
            if i > 0 {
                f.write_str("\n\n")?;
            }
            f.write_str(statement)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Event {
    Insert,
    Update,
    Delete,
}

/// A foreign key, declared or emulated depending on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub name: String,
    pub table: String,
    pub column: String,
    pub target_table: String,
    pub on_delete: OnDelete,
}

/// A `unique` attribute whose class table doesn't hold the `state` column, so
///  uniqueness among live rows can't be a partial index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftUnique<'a> {
    pub name: String,
    pub table: &'a str,
    pub column: &'a str,
    pub fold: bool,
    pub state_table: &'a str,
    pub state_column: &'a str,
}

impl SoftUnique<'_> {
    fn fold(&self, expr: &str) -> String {
        if self.fold {
            format!("LOWER({expr})")
        } else {
            expr.to_string()
        }
    }

    /// Live rows, other than row `id`, holding `value`.
    pub fn duplicates(&self, id: &str, value: &str) -> String {
        let (t, s) = (self.table, self.state_table);
        format!(
            "SELECT 1\nFROM   {t}, {s}\nWHERE  {t}.id = {s}.id\n       AND {t}.id <> {id}\n       AND {} = {}\n       AND {s}.{} > -1",
            self.fold(&format!("{t}.{}", self.column)),
            self.fold(value),
            self.state_column,
        )
    }

    /// Whether row `id` is live.
    pub fn is_live(&self, id: &str) -> String {
        format!(
            "(SELECT {} FROM {} WHERE id = {id}) > -1",
            self.state_column, self.state_table
        )
    }

    pub fn message(&self) -> String {
        format!("duplicate key violates unique constraint \"{}\"", self.name)
    }
}

/// One write rule on a class view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewWrite<'a> {
    pub name: String,
    pub event: Event,
    pub view: &'a str,
    pub condition: Option<String>,
    /// Without terminating semicolons
    pub statements: Vec<String>,
}

/// Everything the generator knows about the class being generated.
pub struct ClassContext<'a> {
    pub catalog: &'a Catalog,
    pub class: &'a ClassDescriptor,
    /// Root first, ending with `class`
    pub chain: Vec<&'a ClassDescriptor>,
    pub config: &'a SchemaConfig,
}

impl<'a> ClassContext<'a> {
    pub fn new(catalog: &'a Catalog, key: &str, config: &'a SchemaConfig) -> Result<Self, Error> {
        let class = catalog
            .resolve(key)
            .ok_or_else(|| Error::UnknownClass(key.to_string()))?;
        Ok(Self {
            catalog,
            class,
            chain: catalog.chain(key),
            config,
        })
    }

    pub fn root(&self) -> &'a ClassDescriptor {
        self.chain.first().copied().unwrap_or(self.class)
    }

    pub fn is_root(&self) -> bool {
        self.class.parent.is_none()
    }

    pub fn resolve(&self, key: &str) -> Result<&'a ClassDescriptor, Error> {
        self.catalog
            .resolve(key)
            .ok_or_else(|| Error::UnknownClass(key.to_string()))
    }

    /// The chain class whose table stores `state`, with the attribute.
    pub fn state(&self) -> Option<(&'a ClassDescriptor, &'a AttributeDescriptor)> {
        self.chain.iter().find_map(|class| {
            class
                .own_attribute("state")
                .filter(|a| a.is_stored())
                .map(|a| (*class, a))
        })
    }

    /// The extended or mediated class and the link attribute pointing at it.
    pub fn identity(&self) -> Result<Option<(&'a ClassDescriptor, &'a AttributeDescriptor)>, Error> {
        let Some(link) = self.class.link() else {
            return Ok(None);
        };
        let Some(reference) = &link.references else {
            return Ok(None);
        };
        Ok(Some((self.resolve(&reference.class)?, link)))
    }

    /// The root table's sequence.
    pub fn sequence(&self) -> String {
        sequence_name(self.root())
    }
}

pub fn sequence_name(root: &ClassDescriptor) -> String {
    format!("seq_{}", root.key)
}

/// The storage column of a stored attribute.
pub fn column_of(attribute: &AttributeDescriptor) -> &str {
    attribute.column.as_deref().unwrap_or(&attribute.name)
}

/// Quotes a string literal.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn indent(text: &str, by: usize) -> String {
    let pad = " ".repeat(by);
    text.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{pad}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

/// Mod-10 check digit validation for GTIN-8/12/13/14.
pub fn is_gtin(code: &str) -> bool {
    if !(8..=14).contains(&code.len()) || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let total: u32 = format!("{code:0>14}")
        .bytes()
        .enumerate()
        .map(|(i, b)| u32::from(b - b'0') * if i % 2 == 0 { 3 } else { 1 })
        .sum();
    total % 10 == 0
}

fn operator_list() -> String {
    Operator::VARIANTS
        .iter()
        .map(|op| quote(op))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The check predicate for a semantically typed value, or `None` when the
///  type carries no constraint.
pub fn domain_check<D: Dialect + ?Sized>(dialect: &D, ty: &SemanticType, value: &str) -> Option<String> {
    Some(match ty {
        SemanticType::Whole => format!("{value} >= 0"),
        SemanticType::Posint => format!("{value} > 0"),
        SemanticType::State => format!("{value} BETWEEN -1 AND 2"),
        SemanticType::Boolean => format!("{value} IN (0, 1)"),
        SemanticType::Operator => format!("{value} IN ({})", operator_list()),
        SemanticType::MediaType => format!("{value} {} {}", dialect.regex_op(), quote(MEDIA_TYPE_PATTERN)),
        SemanticType::Version => format!("{value} {} {}", dialect.regex_op(), quote(VERSION_PATTERN)),
        SemanticType::Gtin => dialect.gtin_check(value),
        _ => return None,
    })
}

/// Checks a default against the same predicates the database enforces.
pub fn validate_default(class: &ClassDescriptor, attribute: &AttributeDescriptor, value: &str) -> Result<(), Error> {
    let invalid = |message: String| Error::InvalidDefault {
        class: class.key.clone(),
        attribute: attribute.name.clone(),
        value: value.to_string(),
        message,
    };
    let ty = &attribute.ty;
    if ty.is_integral() {
        let n: i64 = value.parse().map_err(|_| invalid("not an integer".into()))?;
        let in_range = match ty {
            SemanticType::Whole => n >= 0,
            SemanticType::Posint => n > 0,
            SemanticType::State => (-1..=2).contains(&n),
            _ => true,
        };
        return if in_range {
            Ok(())
        } else {
            Err(invalid(format!("out of range for {ty}")))
        };
    }
    let valid = match ty {
        SemanticType::Boolean => parse_bool(value).is_some(),
        SemanticType::Operator => Operator::VARIANTS.contains(&value),
        SemanticType::MediaType => MEDIA_TYPE_RE.is_match(value),
        SemanticType::Version => VERSION_RE.is_match(value),
        SemanticType::Gtin => is_gtin(value),
        _ => true,
    };
    if valid {
        Ok(())
    } else {
        Err(invalid(format!("not a valid {ty}")))
    }
}

/// The backend strategy.
pub trait Dialect {
    /// Column type of a stored, non-reference attribute. `None` when the
    ///  backend has no mapping for its type.
    fn column_type(&self, attribute: &AttributeDescriptor) -> Option<&'static str>;

    fn uuid_generator(&self) -> String;

    fn bool_literal(&self, value: bool) -> &'static str;

    /// SQL for an attribute's default, if it has one. Defaults are validated
    ///  before this is called.
    fn column_default(&self, cx: &ClassContext, attribute: &AttributeDescriptor) -> Option<String> {
        if attribute.ty == SemanticType::Uuid && attribute.default.is_none() {
            return Some(
                cx.config
                    .uuid_generator
                    .clone()
                    .unwrap_or_else(|| self.uuid_generator()),
            );
        }
        let value = attribute.default.as_deref()?;
        Some(match &attribute.ty {
            SemanticType::Boolean => self.bool_literal(parse_bool(value) == Some(true)).to_string(),
            ty if ty.is_integral() => value.to_string(),
            _ => quote(value),
        })
    }

    /// Definition of the `id` column.
    fn pk_column(&self, cx: &ClassContext) -> String;

    /// The expression an index on the attribute covers.
    fn index_on(&self, attribute: &AttributeDescriptor) -> String {
        let column = column_of(attribute);
        if attribute.ty.is_case_folded() && !attribute.is_reference() {
            format!("LOWER({column})")
        } else {
            column.to_string()
        }
    }

    fn regex_op(&self) -> &'static str;

    fn gtin_check(&self, value: &str) -> String;

    /// Enforces a domain predicate on a column. Empty when the column type
    ///  already does.
    fn domain_trigger(&self, cx: &ClassContext, attribute: &AttributeDescriptor, predicate: &str) -> Vec<String>;

    /// The head of a row-level trigger definition.
    fn create_trigger(&self, name: &str, event: &str, table: &str) -> String;

    fn sequence(&self, cx: &ClassContext) -> Vec<String>;

    fn primary_key(&self, cx: &ClassContext) -> Vec<String>;

    fn foreign_key(&self, fk: &ForeignKey) -> Vec<String>;

    /// Rejects changes to an attribute once it's set.
    fn once_trigger(&self, cx: &ClassContext, attribute: &AttributeDescriptor) -> Vec<String>;

    fn unique_triggers(&self, unique: &SoftUnique) -> Vec<String>;

    /// `clear`, `del`, `add` and `set` for one collection.
    fn procedures(&self, cx: &ClassContext, attribute: &AttributeDescriptor, collection: &Collection) -> Vec<String>;

    fn view_write(&self, write: &ViewWrite) -> String;

    /// Id of a new root row. `None` leaves it to the table.
    fn root_id(&self, cx: &ClassContext) -> Option<String>;

    /// The id most recently generated for a root class's table.
    fn last_id(&self, root: &ClassDescriptor) -> String;

    /// Id of the rows a view insert adds below the root.
    fn inherited_id(&self, cx: &ClassContext) -> String {
        self.last_id(cx.root())
    }

    fn extras(&self, _cx: &ClassContext) -> Vec<String> {
        Vec::new()
    }

    /// Statements to run once, before any class.
    fn setup(&self) -> Vec<String> {
        Vec::new()
    }
}

pub struct Generator<'a> {
    catalog: &'a Catalog,
    config: SchemaConfig,
}

impl<'a> Generator<'a> {
    pub fn new(catalog: &'a Catalog, config: SchemaConfig) -> Self {
        Self { catalog, config }
    }

    pub fn config(&self) -> &SchemaConfig {
        &self.config
    }

    fn dialect(&self) -> &'static dyn Dialect {
        match self.config.backend {
            Backend::Postgres => &postgres::Postgres,
            Backend::Sqlite => &sqlite::Sqlite,
        }
    }

    pub fn class_schema(&self, key: &str) -> Result<ClassSchema, Error> {
        let cx = ClassContext::new(self.catalog, key, &self.config)?;
        let schema = build(self.dialect(), &cx)?;
        debug!(
            class = key,
            backend = %self.config.backend,
            statements = schema.statements().count(),
            "generated class schema"
        );
        Ok(schema)
    }

    /// Every class in dependency order. Stops at the first class that fails.
    pub fn schema(&self) -> Result<Vec<ClassSchema>, Error> {
        self.catalog
            .dependency_order()
            .map(|class| self.class_schema(&class.key))
            .collect()
    }

    pub fn setup_sql(&self) -> String {
        self.dialect().setup().join("\n\n")
    }

    /// Setup followed by every class, ready to run as one script.
    pub fn to_sql(&self) -> Result<String, Error> {
        let mut parts = Vec::new();
        let setup = self.setup_sql();
        if !setup.is_empty() {
            parts.push(setup);
        }
        for schema in self.schema()? {
            parts.push(schema.to_string());
        }
        let mut sql = parts.join("\n\n");
        sql.push('\n');
        Ok(sql)
    }
}

fn build<D: Dialect + ?Sized>(dialect: &D, cx: &ClassContext) -> Result<ClassSchema, Error> {
    let class = cx.class;
    for attribute in class.stored_attributes().filter(|a| !a.is_reference()) {
        if let Some(value) = &attribute.default {
            validate_default(class, attribute, value)?;
        }
    }

    let mut schema = ClassSchema {
        key: class.key.clone(),
        sequence: dialect.sequence(cx),
        tables: vec![table(dialect, cx)?],
        indexes: indexes(dialect, cx),
        constraints: dialect.primary_key(cx),
        ..ClassSchema::default()
    };

    for fk in foreign_keys(cx)? {
        schema.constraints.extend(dialect.foreign_key(&fk));
    }
    for attribute in class.stored_attributes().filter(|a| a.flags.once) {
        schema.constraints.extend(dialect.once_trigger(cx, attribute));
    }
    for attribute in class.stored_attributes().filter(|a| !a.is_reference()) {
        if let Some(predicate) = domain_check(dialect, &attribute.ty, &format!("NEW.{}", column_of(attribute))) {
            schema.constraints.extend(dialect.domain_trigger(cx, attribute, &predicate));
        }
    }
    for unique in soft_uniques(cx) {
        schema.constraints.extend(dialect.unique_triggers(&unique));
    }

    schema.views.push(class_view(cx)?);
    for attribute in class.collections() {
        let Some(collection) = &attribute.collection else {
            continue;
        };
        let member = collection_member(cx, attribute)?;
        schema.tables.push(collection_table(collection));
        schema.indexes.extend(collection_indexes(collection));
        schema.procedures.extend(dialect.procedures(cx, attribute, collection));
        schema.views.push(collection_view(collection, member));
    }

    schema.insert = insert(dialect, cx)?;
    schema.update = vec![dialect.view_write(&update(cx)?)];
    schema.delete = vec![dialect.view_write(&delete(cx))];
    schema.extras = dialect.extras(cx);
    Ok(schema)
}

fn collection_member<'a>(cx: &ClassContext<'a>, attribute: &AttributeDescriptor) -> Result<&'a ClassDescriptor, Error> {
    let reference = attribute
        .references
        .as_ref()
        .ok_or_else(|| Error::UnknownClass(attribute.name.clone()))?;
    cx.resolve(&reference.class)
}

fn table<D: Dialect + ?Sized>(dialect: &D, cx: &ClassContext) -> Result<String, Error> {
    let mut columns = vec![dialect.pk_column(cx)];
    for attribute in cx.class.stored_attributes() {
        let ty = if attribute.is_reference() {
            "INTEGER"
        } else {
            dialect.column_type(attribute).ok_or_else(|| Error::UnmappedType {
                class: cx.class.key.clone(),
                attribute: attribute.name.clone(),
                ty: attribute.ty.clone(),
            })?
        };
        let mut column = format!("{} {ty}", column_of(attribute));
        if attribute.flags.required {
            column.push_str(" NOT NULL");
        }
        if let Some(default) = dialect.column_default(cx, attribute) {
            column.push_str(" DEFAULT ");
            column.push_str(&default);
        }
        columns.push(column);
    }
    Ok(format!(
        "CREATE TABLE {} (\n    {}\n);",
        cx.class.table,
        columns.join(",\n    ")
    ))
}

fn indexes<D: Dialect + ?Sized>(dialect: &D, cx: &ClassContext) -> Vec<String> {
    let class = cx.class;
    let state = cx.state();
    let mut indexes = Vec::new();
    for attribute in class.stored_attributes() {
        let name = format!("idx_{}_{}", class.key, column_of(attribute));
        let on = dialect.index_on(attribute);
        if attribute.flags.unique {
            match state {
                Some((holder, state)) if !attribute.flags.distinct => {
                    // Soft-delete-aware uniqueness; in another table it takes triggers
                    if holder.key == class.key {
                        indexes.push(format!(
                            "CREATE UNIQUE INDEX {name} ON {} ({on}) WHERE {} > -1;",
                            class.table,
                            column_of(state)
                        ));
                    }
                }
                _ => indexes.push(format!("CREATE UNIQUE INDEX {name} ON {} ({on});", class.table)),
            }
        } else if attribute.flags.indexed || attribute.is_reference() {
            indexes.push(format!("CREATE INDEX {name} ON {} ({on});", class.table));
        }
    }
    indexes
}

fn soft_uniques<'a>(cx: &ClassContext<'a>) -> Vec<SoftUnique<'a>> {
    let class = cx.class;
    let Some((holder, state)) = cx.state() else {
        return Vec::new();
    };
    if holder.key == class.key {
        return Vec::new();
    }
    class
        .stored_attributes()
        .filter(|a| a.flags.unique && !a.flags.distinct)
        .map(|attribute| SoftUnique {
            name: format!("ck_{}_{}_unique", class.key, column_of(attribute)),
            table: &class.table,
            column: column_of(attribute),
            fold: attribute.ty.is_case_folded() && !attribute.is_reference(),
            state_table: &holder.table,
            state_column: column_of(state),
        })
        .collect()
}

fn foreign_keys(cx: &ClassContext) -> Result<Vec<ForeignKey>, Error> {
    let class = cx.class;
    let mut keys = Vec::new();
    if let Some(parent) = &class.parent {
        keys.push(ForeignKey {
            name: format!("fk_{}_id", class.key),
            table: class.table.clone(),
            column: "id".into(),
            target_table: cx.resolve(parent)?.table.clone(),
            on_delete: OnDelete::Cascade,
        });
    }
    for attribute in class.stored_attributes() {
        let Some(reference) = attribute.references.as_ref() else {
            continue;
        };
        keys.push(ForeignKey {
            name: format!("fk_{}_{}", class.key, column_of(attribute)),
            table: class.table.clone(),
            column: column_of(attribute).to_string(),
            target_table: cx.resolve(&reference.class)?.table.clone(),
            on_delete: reference.on_delete,
        });
    }
    for attribute in class.collections() {
        let Some(collection) = &attribute.collection else {
            continue;
        };
        let member = collection_member(cx, attribute)?;
        for (column, target) in [
            (&collection.owner_column, &class.table),
            (&collection.member_column, &member.table),
        ] {
            keys.push(ForeignKey {
                name: format!("fk_{}_{column}", collection.table),
                table: collection.table.clone(),
                column: column.clone(),
                target_table: target.clone(),
                on_delete: OnDelete::Cascade,
            });
        }
    }
    Ok(keys)
}

fn class_view(cx: &ClassContext) -> Result<String, Error> {
    let root = cx.root();
    let mut select = vec![format!("{}.id AS id", root.table)];
    let mut from = vec![root.table.clone()];
    for class in &cx.chain {
        if class.key != root.key {
            from.push(format!(
                "INNER JOIN {} ON {}.id = {}.id",
                class.table, root.table, class.table
            ));
        }
        for attribute in class.stored_attributes() {
            let column = column_of(attribute);
            select.push(format!("{}.{column} AS {}", class.table, attribute.view_column));
            let Some(reference) = &attribute.references else {
                continue;
            };
            let target = cx.resolve(&reference.class)?;
            let alias = &attribute.name;
            let join = if attribute.flags.required { "INNER" } else { "LEFT" };
            from.push(format!(
                "{join} JOIN {} AS {alias} ON {}.{column} = {alias}.id",
                target.view, class.table
            ));
            select.extend(
                cx.catalog
                    .view_columns(&target.key)
                    .iter()
                    .filter(|c| *c != "id")
                    .map(|c| format!("{alias}.{c} AS {alias}__{c}")),
            );
        }
    }
    Ok(format!(
        "CREATE VIEW {} AS\n  SELECT {}\n  FROM   {};",
        cx.class.view,
        select.join(",\n         "),
        from.join("\n         ")
    ))
}

fn collection_table(collection: &Collection) -> String {
    format!(
        "CREATE TABLE {} (\n    {owner} INTEGER NOT NULL,\n    {member} INTEGER NOT NULL,\n    {order} SMALLINT NOT NULL,\n    PRIMARY KEY ({owner}, {member})\n);",
        collection.table,
        owner = collection.owner_column,
        member = collection.member_column,
        order = collection.order_column,
    )
}

// The unique order index is why `set` renumbers through negative values.
fn collection_indexes(collection: &Collection) -> Vec<String> {
    let table = &collection.table;
    vec![
        format!(
            "CREATE UNIQUE INDEX idx_{table}_order ON {table} ({}, {});",
            collection.owner_column, collection.order_column
        ),
        format!(
            "CREATE INDEX idx_{table}_{member} ON {table} ({member});",
            member = collection.member_column
        ),
    ]
}

fn collection_view(collection: &Collection, member: &ClassDescriptor) -> String {
    let table = &collection.table;
    format!(
        "CREATE VIEW {view} AS\n  SELECT {table}.{owner} AS {owner},\n         {table}.{order} AS {order},\n         {member}.*\n  FROM   {table}\n         INNER JOIN {member} ON {table}.{member_column} = {member}.id\n  ORDER BY {table}.{owner}, {table}.{order};",
        view = collection.view,
        owner = collection.owner_column,
        order = collection.order_column,
        member = member.view,
        member_column = collection.member_column,
    )
}

/// The stored attributes of a class and its ancestors: what its view accepts
///  on insert.
fn writable<'a>(catalog: &'a Catalog, key: &str) -> Vec<&'a AttributeDescriptor> {
    catalog
        .chain(key)
        .into_iter()
        .flat_map(|class| class.stored_attributes())
        .collect()
}

fn new_value<D: Dialect + ?Sized>(dialect: &D, cx: &ClassContext, attribute: &AttributeDescriptor) -> String {
    let value = format!("NEW.{}", attribute.view_column);
    match dialect.column_default(cx, attribute) {
        Some(default) => format!("COALESCE({value}, {default})"),
        None => value,
    }
}

// One INSERT per table in the chain. `link_id` overrides the value of the
//  identity link.
fn chain_inserts<D: Dialect + ?Sized>(dialect: &D, cx: &ClassContext, link_id: Option<&str>) -> Vec<String> {
    let link = cx.class.link();
    let mut statements = Vec::with_capacity(cx.chain.len());
    for (i, class) in cx.chain.iter().enumerate() {
        let mut columns = Vec::new();
        let mut values = Vec::new();
        let id = if i == 0 {
            dialect.root_id(cx)
        } else {
            Some(dialect.inherited_id(cx))
        };
        if let Some(id) = id {
            columns.push("id".to_string());
            values.push(id);
        }
        for attribute in class.stored_attributes() {
            columns.push(column_of(attribute).to_string());
            values.push(match link_id {
                Some(id) if link.is_some_and(|l| std::ptr::eq(l, attribute)) => id.to_string(),
                _ => new_value(dialect, cx, attribute),
            });
        }
        statements.push(format!(
            "INSERT INTO {} ({})\nVALUES ({})",
            class.table,
            columns.join(", "),
            values.join(", ")
        ));
    }
    statements
}

fn insert<D: Dialect + ?Sized>(dialect: &D, cx: &ClassContext) -> Result<Vec<String>, Error> {
    let view = cx.class.view.as_str();
    let Some((target, link)) = cx.identity()? else {
        return Ok(vec![dialect.view_write(&ViewWrite {
            name: format!("insert_{}", cx.class.key),
            event: Event::Insert,
            view,
            condition: None,
            statements: chain_inserts(dialect, cx, None),
        })]);
    };

    // Without the target's id a new target object is created; with it, the
    //  existing one is updated with whatever was supplied and linked to.
    let prefix = &link.name;
    let target_columns = writable(cx.catalog, &target.key);
    let link_value = format!("NEW.{}", link.view_column);

    let mut create = vec![format!(
        "INSERT INTO {} ({})\nVALUES ({})",
        target.view,
        target_columns
            .iter()
            .map(|a| a.view_column.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        target_columns
            .iter()
            .map(|a| format!("NEW.{prefix}__{}", a.view_column))
            .collect::<Vec<_>>()
            .join(", ")
    )];
    let target_root = cx.catalog.root(&target.key).unwrap_or(target);
    create.extend(chain_inserts(dialect, cx, Some(&dialect.last_id(target_root))));

    let mut extend = vec![format!(
        "UPDATE {}\nSET    {}\nWHERE  id = {link_value}",
        target.view,
        target_columns
            .iter()
            .map(|a| format!("{c} = COALESCE(NEW.{prefix}__{c}, {c})", c = a.view_column))
            .collect::<Vec<_>>()
            .join(",\n       ")
    )];
    extend.extend(chain_inserts(dialect, cx, None));

    Ok(vec![
        dialect.view_write(&ViewWrite {
            name: format!("insert_{}", cx.class.key),
            event: Event::Insert,
            view,
            condition: Some(format!("{link_value} IS NULL")),
            statements: create,
        }),
        dialect.view_write(&ViewWrite {
            name: format!("extend_{}", cx.class.key),
            event: Event::Insert,
            view,
            condition: Some(format!("{link_value} IS NOT NULL")),
            statements: extend,
        }),
    ])
}

fn assignments<'a>(attributes: impl Iterator<Item = &'a AttributeDescriptor>, column: impl Fn(&'a AttributeDescriptor) -> &'a str, value: impl Fn(&'a AttributeDescriptor) -> String) -> String {
    attributes
        .map(|a| format!("{} = {}", column(a), value(a)))
        .collect::<Vec<_>>()
        .join(",\n       ")
}

fn update<'a>(cx: &'a ClassContext) -> Result<ViewWrite<'a>, Error> {
    let mut statements = Vec::new();
    for class in &cx.chain {
        if class.stored_attributes().next().is_none() {
            continue;
        }
        statements.push(format!(
            "UPDATE {}\nSET    {}\nWHERE  id = OLD.id",
            class.table,
            assignments(class.stored_attributes(), column_of, |a| format!("NEW.{}", a.view_column))
        ));
    }
    // Delegated attributes are written through to the target
    if let Some((target, link)) = cx.identity()? {
        let prefix = &link.name;
        statements.push(format!(
            "UPDATE {}\nSET    {}\nWHERE  id = NEW.{}",
            target.view,
            assignments(
                writable(cx.catalog, &target.key).into_iter(),
                |a| a.view_column.as_str(),
                |a| format!("NEW.{prefix}__{}", a.view_column)
            ),
            link.view_column
        ));
    }
    Ok(ViewWrite {
        name: format!("update_{}", cx.class.key),
        event: Event::Update,
        view: &cx.class.view,
        condition: None,
        statements,
    })
}

// Child tables first. Extended and mediated objects are left alone.
fn delete<'a>(cx: &'a ClassContext) -> ViewWrite<'a> {
    ViewWrite {
        name: format!("delete_{}", cx.class.key),
        event: Event::Delete,
        view: &cx.class.view,
        condition: None,
        statements: cx
            .chain
            .iter()
            .rev()
            .map(|class| format!("DELETE FROM {}\nWHERE  id = OLD.id", class.table))
            .collect(),
    }
}
