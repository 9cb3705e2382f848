use std::fmt::{Display, Formatter, Result};

use crate::date::Segments;
use crate::ir::Combinator;
use crate::query::{CompareOp, Fragment};

/// What differs between dialects when printing a compiled search.
pub trait PrinterContext: std::fmt::Debug {
    /// Formats the defined segments of a datetime column as a zero-padded
    ///  string, comparable with [crate::date::IncompleteDate::segment_string].
    fn write_date_part(&self, out: &mut Formatter<'_>, column: &str, segments: Segments) -> Result;
    /// Case-insensitive regular expression operator
    fn match_operator(&self, negated: bool) -> &'static str;
    fn box_clone(&self) -> Box<dyn PrinterContext>;
}

impl Clone for Box<dyn PrinterContext> {
    fn clone(&self) -> Box<dyn PrinterContext> {
        self.box_clone()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PostgresPrinterContext;

impl PrinterContext for PostgresPrinterContext {
    fn write_date_part(&self, out: &mut Formatter<'_>, column: &str, segments: Segments) -> Result {
        write!(out, "TO_CHAR({column}, '{}')", segments.pg_format())
    }
    fn match_operator(&self, negated: bool) -> &'static str {
        if negated { "!~*" } else { "~*" }
    }
    fn box_clone(&self) -> Box<dyn PrinterContext> {
        Box::new(*self)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SqlitePrinterContext;

impl PrinterContext for SqlitePrinterContext {
    fn write_date_part(&self, out: &mut Formatter<'_>, column: &str, segments: Segments) -> Result {
        write!(out, "STRFTIME('{}', {column})", segments.sqlite_format())
    }
    // REGEXP is supplied by the connection; the compiler makes the pattern
    //  case-insensitive
    fn match_operator(&self, negated: bool) -> &'static str {
        if negated { "NOT REGEXP" } else { "REGEXP" }
    }
    fn box_clone(&self) -> Box<dyn PrinterContext> {
        Box::new(*self)
    }
}

#[derive(Debug, Clone)]
pub struct PrinterConfig {
    pub context: Box<dyn PrinterContext>,
}

impl PrinterConfig {
    pub fn sqlite() -> Self {
        Self {
            context: Box::new(SqlitePrinterContext),
        }
    }
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            context: Box::new(PostgresPrinterContext),
        }
    }
}

pub struct Printer<T> {
    tree: T,
    config: PrinterConfig,
}

impl<T> Printer<T> {
    pub fn new(tree: T, config: PrinterConfig) -> Self {
        Self { tree, config }
    }
}

pub trait ToSQL {
    fn to_sql(&self, out: &mut Formatter, conf: &PrinterConfig) -> Result;
}

impl<T> ToSQL for Box<T>
where
    T: ToSQL,
{
    fn to_sql(&self, out: &mut Formatter, conf: &PrinterConfig) -> Result {
        self.as_ref().to_sql(out, conf)
    }
}

impl<T> Display for Printer<T>
where
    T: ToSQL,
{
    fn fmt(&self, f: &mut Formatter) -> Result {
        self.tree.to_sql(f, &self.config)
    }
}

impl ToSQL for CompareOp {
    fn to_sql(&self, out: &mut Formatter, conf: &PrinterConfig) -> Result {
        match self {
            CompareOp::Eq => write!(out, "="),
            CompareOp::Ne => write!(out, "!="),
            CompareOp::Lt => write!(out, "<"),
            CompareOp::Le => write!(out, "<="),
            CompareOp::Gt => write!(out, ">"),
            CompareOp::Ge => write!(out, ">="),
            CompareOp::Like => write!(out, "LIKE"),
            CompareOp::NotLike => write!(out, "NOT LIKE"),
            CompareOp::Match => write!(out, "{}", conf.context.match_operator(false)),
            CompareOp::NotMatch => write!(out, "{}", conf.context.match_operator(true)),
        }
    }
}

fn write_list(out: &mut Formatter, items: &[Fragment], separator: &str, conf: &PrinterConfig) -> Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.write_str(separator)?;
        }
        item.to_sql(out, conf)?;
    }
    Ok(())
}

fn not(negated: bool) -> &'static str {
    if negated { "NOT " } else { "" }
}

impl ToSQL for Fragment {
    fn to_sql(&self, out: &mut Formatter, conf: &PrinterConfig) -> Result {
        match self {
            Fragment::Column { name, fold: true } => write!(out, "LOWER({name})"),
            Fragment::Column { name, fold: false } => out.write_str(name),
            Fragment::Placeholder { fold: true } => out.write_str("LOWER(?)"),
            Fragment::Placeholder { fold: false } => out.write_str("?"),
            Fragment::DatePart { column, segments } => {
                conf.context.write_date_part(out, column, *segments)
            }
            Fragment::Compare(l, op, r) => {
                l.to_sql(out, conf)?;
                out.write_str(" ")?;
                op.to_sql(out, conf)?;
                out.write_str(" ")?;
                r.to_sql(out, conf)
            }
            Fragment::Between {
                subject,
                low,
                high,
                negated,
            } => {
                subject.to_sql(out, conf)?;
                write!(out, " {}BETWEEN ", not(*negated))?;
                low.to_sql(out, conf)?;
                out.write_str(" AND ")?;
                high.to_sql(out, conf)
            }
            Fragment::In {
                subject,
                items,
                negated,
            } => {
                subject.to_sql(out, conf)?;
                write!(out, " {}IN (", not(*negated))?;
                write_list(out, items, ", ", conf)?;
                out.write_str(")")
            }
            Fragment::IsNull { subject, negated } => {
                subject.to_sql(out, conf)?;
                write!(out, " IS {}NULL", not(*negated))
            }
            Fragment::Group {
                combinator,
                members,
                parenthesize,
            } => {
                let separator = match combinator {
                    Combinator::And => " AND ",
                    Combinator::Or => " OR ",
                };
                parenthesize.open(out)?;
                write_list(out, members, separator, conf)?;
                parenthesize.close(out)
            }
        }
    }
}
