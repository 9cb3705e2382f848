use super::{CompareOp, Error, Fragment, Parenthesize, QueryContext, lookup_column};
use crate::date::{IncompleteDate, Segments};
use crate::ir::{Combinator, Leaf, Operator, Path, Scalar, Value};
use crate::meta::{MetadataGateway, SemanticType};
use crate::to_sql::PrinterConfig;

/// Default search compilation, targeting PostgreSQL. Other backends
///  "inherit" by implementing [QueryContext] and dispatching to
///  [compile_leaf] for anything they don't handle differently.
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
        compile_leaf(self, leaf, binds)
    }

    fn printer(&self) -> PrinterConfig {
        PrinterConfig::default()
    }
}

fn mismatch(leaf: &Leaf, message: String) -> Error {
    Error::TypeMismatch {
        path: leaf.path.to_string(),
        message,
    }
}

fn column(name: &str, fold: bool) -> Box<Fragment> {
    Box::new(Fragment::Column {
        name: name.to_string(),
        fold,
    })
}

fn placeholder(fold: bool) -> Box<Fragment> {
    Box::new(Fragment::Placeholder { fold })
}

fn date_part(column: &str, segments: Segments) -> Box<Fragment> {
    Box::new(Fragment::DatePart {
        column: column.to_string(),
        segments,
    })
}

/// Maps a search operator and its negation onto SQL. BETWEEN and ANY have
///  their own fragments.
pub fn compare_op(operator: Operator, negated: bool) -> Option<CompareOp> {
    Some(match (operator, negated) {
        (Operator::Like, false) => CompareOp::Like,
        (Operator::Like, true) => CompareOp::NotLike,
        (Operator::Match, false) => CompareOp::Match,
        (Operator::Match, true) => CompareOp::NotMatch,
        (Operator::Between | Operator::Any, _) => return None,
        (op, true) => return compare_op(op.inverse()?, false),
        (Operator::Eq, false) => CompareOp::Eq,
        (Operator::Ne, false) => CompareOp::Ne,
        (Operator::Gt, false) => CompareOp::Gt,
        (Operator::Lt, false) => CompareOp::Lt,
        (Operator::Ge, false) => CompareOp::Ge,
        (Operator::Le, false) => CompareOp::Le,
    })
}

pub fn compile_leaf<C>(cx: &C, leaf: &Leaf, binds: &mut Vec<Scalar>) -> Result<Fragment, Error>
where
    C: QueryContext + ?Sized,
{
    let (column_name, ty) = cx.lookup_column(&leaf.path)?;
    match (&leaf.data, leaf.operator) {
        (Value::Null, Operator::Eq | Operator::Ne) => Ok(Fragment::IsNull {
            subject: column(&column_name, false),
            negated: leaf.negated ^ (leaf.operator == Operator::Ne),
        }),
        (Value::Null, op) => Err(mismatch(leaf, format!("{op} can't compare with NULL"))),
        (Value::Scalar(value), op) => compare(cx, leaf, &column_name, &ty, op, value, binds),
        (Value::Pair(low, high), Operator::Between) => between(cx, leaf, &column_name, &ty, low, high, binds),
        (Value::List(values), Operator::Any) => any(cx, leaf, &column_name, &ty, values, binds),
        (_, op) => Err(mismatch(leaf, format!("{op} doesn't take this kind of value"))),
    }
}

fn compare<C: QueryContext + ?Sized>(
    cx: &C,
    leaf: &Leaf,
    column_name: &str,
    ty: &SemanticType,
    operator: Operator,
    value: &Scalar,
    binds: &mut Vec<Scalar>,
) -> Result<Fragment, Error> {
    let op = compare_op(operator, leaf.negated)
        .ok_or_else(|| mismatch(leaf, format!("{operator} needs more than one value")))?;
    let Scalar::Date(date) = value else {
        let fold = ty.is_case_folded()
            && matches!(value, Scalar::Str(_))
            && !matches!(op, CompareOp::Match | CompareOp::NotMatch);
        binds.push(cx.bind_value(value.clone()));
        return Ok(Fragment::Compare(column(column_name, fold), op, placeholder(fold)));
    };

    if matches!(
        op,
        CompareOp::Like | CompareOp::NotLike | CompareOp::Match | CompareOp::NotMatch
    ) {
        return Err(mismatch(leaf, format!("{operator} can't compare dates")));
    }
    if date.is_complete() {
        binds.push(cx.bind_value(value.clone()));
        return Ok(Fragment::Compare(column(column_name, false), op, placeholder(false)));
    }
    // Only the defined segments take part. Ordering them only makes sense when
    //  they form one run: "after May 10th" but not "after May, at 10 o'clock".
    let segments = date.segments();
    if operator.is_ordering() && !segments.is_contiguous() {
        return Err(mismatch(
            leaf,
            format!("{operator} needs contiguous date segments, got {segments}"),
        ));
    }
    binds.push(cx.bind_value(Scalar::Str(date.segment_string())));
    Ok(Fragment::Compare(date_part(column_name, segments), op, placeholder(false)))
}

fn between<C: QueryContext + ?Sized>(
    cx: &C,
    leaf: &Leaf,
    column_name: &str,
    ty: &SemanticType,
    low: &Scalar,
    high: &Scalar,
    binds: &mut Vec<Scalar>,
) -> Result<Fragment, Error> {
    if low.kind() != high.kind() {
        return Err(mismatch(
            leaf,
            format!("BETWEEN operands differ: {} and {}", low.kind(), high.kind()),
        ));
    }
    if let (Scalar::Date(l), Scalar::Date(h)) = (low, high)
        && !l.is_complete()
    {
        let segments = l.segments();
        if !segments.is_contiguous() {
            return Err(mismatch(
                leaf,
                format!("BETWEEN needs contiguous date segments, got {segments}"),
            ));
        }
        binds.push(cx.bind_value(Scalar::Str(l.segment_string())));
        binds.push(cx.bind_value(Scalar::Str(h.segment_string())));
        return Ok(Fragment::Between {
            subject: date_part(column_name, segments),
            low: placeholder(false),
            high: placeholder(false),
            negated: leaf.negated,
        });
    }
    let fold = ty.is_case_folded() && matches!(low, Scalar::Str(_));
    binds.push(cx.bind_value(low.clone()));
    binds.push(cx.bind_value(high.clone()));
    Ok(Fragment::Between {
        subject: column(column_name, fold),
        low: placeholder(fold),
        high: placeholder(fold),
        negated: leaf.negated,
    })
}

fn any<C: QueryContext + ?Sized>(
    cx: &C,
    leaf: &Leaf,
    column_name: &str,
    ty: &SemanticType,
    values: &[Scalar],
    binds: &mut Vec<Scalar>,
) -> Result<Fragment, Error> {
    let Some(first) = values.first() else {
        return Err(mismatch(leaf, "ANY needs at least one value".into()));
    };
    let dates: Option<Vec<&IncompleteDate>> = values.iter().map(Scalar::as_date).collect();
    if let Some(dates) = dates {
        return Ok(any_date(cx, leaf, column_name, &dates, binds));
    }
    if let Some(odd) = values
        .iter()
        .find(|v| std::mem::discriminant(*v) != std::mem::discriminant(first))
    {
        return Err(mismatch(
            leaf,
            format!("ANY mixes {} and {}", first.kind(), odd.kind()),
        ));
    }
    let fold = ty.is_case_folded() && matches!(first, Scalar::Str(_));
    binds.extend(values.iter().map(|v| cx.bind_value(v.clone())));
    Ok(Fragment::In {
        subject: column(column_name, fold),
        items: vec![Fragment::Placeholder { fold }; values.len()],
        negated: leaf.negated,
    })
}

// Dates are grouped by their defined segments, each group matched on just
//  those segments. More than one group becomes an OR (AND when negated).
fn any_date<C: QueryContext + ?Sized>(
    cx: &C,
    leaf: &Leaf,
    column_name: &str,
    dates: &[&IncompleteDate],
    binds: &mut Vec<Scalar>,
) -> Fragment {
    let mut sets: Vec<(Segments, Vec<&IncompleteDate>)> = Vec::new();
    for &date in dates {
        let segments = date.segments();
        match sets.iter_mut().find(|(s, _)| *s == segments) {
            Some((_, members)) => members.push(date),
            None => sets.push((segments, vec![date])),
        }
    }

    let mut members: Vec<Fragment> = sets
        .into_iter()
        .map(|(segments, dates)| {
            let subject = if segments == Segments::ALL {
                binds.extend(dates.iter().map(|d| cx.bind_value(Scalar::Date(**d))));
                column(column_name, false)
            } else {
                binds.extend(dates.iter().map(|d| cx.bind_value(Scalar::Str(d.segment_string()))));
                date_part(column_name, segments)
            };
            Fragment::In {
                subject,
                items: vec![Fragment::Placeholder { fold: false }; dates.len()],
                negated: leaf.negated,
            }
        })
        .collect();

    if members.len() == 1
        && let Some(only) = members.pop()
    {
        return only;
    }
    Fragment::Group {
        combinator: if leaf.negated { Combinator::And } else { Combinator::Or },
        members,
        parenthesize: Parenthesize::Yes,
    }
}
