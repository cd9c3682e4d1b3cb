//! Concrete relational plans.
//!
//! Plans are produced by instantiating a pair of fragment templates and are
//! consumed by the translator. Column references are qualified by the alias
//! of the node that produces them: an `Input`'s alias or a `Proj`'s alias.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetOpKind {
    Union,
    Intersect,
    Except,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarExpr {
    Column { qualifier: String, column: String },
    Literal(String),
    Call { name: String, args: Vec<ScalarExpr> },
}

impl ScalarExpr {
    pub fn column(qualifier: impl Into<String>, column: impl Into<String>) -> Self {
        ScalarExpr::Column {
            qualifier: qualifier.into(),
            column: column.into(),
        }
    }

    pub fn literal(text: impl Into<String>) -> Self {
        ScalarExpr::Literal(text.into())
    }

    pub fn is_column(&self) -> bool {
        matches!(self, ScalarExpr::Column { .. })
    }

    /// Column references in left-to-right order.
    pub fn columns(&self, out: &mut Vec<(String, String)>) {
        match self {
            ScalarExpr::Column { qualifier, column } => {
                out.push((qualifier.clone(), column.clone()))
            }
            ScalarExpr::Literal(_) => {}
            ScalarExpr::Call { args, .. } => args.iter().for_each(|a| a.columns(out)),
        }
    }

    fn write_template(&self, f: &mut String) {
        match self {
            ScalarExpr::Column { .. } => f.push('?'),
            ScalarExpr::Literal(text) => f.push_str(text),
            ScalarExpr::Call { name, args } => {
                f.push_str(name);
                f.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.push_str(", ");
                    }
                    arg.write_template(f);
                }
                f.push(')');
            }
        }
    }
}

impl fmt::Display for ScalarExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarExpr::Column { qualifier, column } => write!(f, "{qualifier}.{column}"),
            ScalarExpr::Literal(text) => write!(f, "{text}"),
            ScalarExpr::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Predicate {
    Eq(ScalarExpr, ScalarExpr),
    Call { name: String, args: Vec<ScalarExpr> },
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(left: ScalarExpr, right: ScalarExpr) -> Self {
        Predicate::Eq(left, right)
    }

    pub fn call(name: impl Into<String>, args: Vec<ScalarExpr>) -> Self {
        Predicate::Call {
            name: name.into(),
            args,
        }
    }

    /// The conjuncts of a (possibly nested) `And`.
    pub fn conjuncts(&self) -> Vec<&Predicate> {
        match self {
            Predicate::And(parts) => parts.iter().flat_map(|p| p.conjuncts()).collect(),
            other => vec![other],
        }
    }

    pub fn columns(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut Vec<(String, String)>) {
        match self {
            Predicate::Eq(l, r) => {
                l.columns(out);
                r.columns(out);
            }
            Predicate::Call { args, .. } => args.iter().for_each(|a| a.columns(out)),
            Predicate::And(parts) => parts.iter().for_each(|p| p.collect_columns(out)),
        }
    }

    /// The predicate text with every column reference replaced by `?`.
    pub fn template(&self) -> String {
        let mut out = String::new();
        self.write_template(&mut out);
        out
    }

    fn write_template(&self, out: &mut String) {
        match self {
            Predicate::Eq(l, r) => {
                l.write_template(out);
                out.push_str(" = ");
                r.write_template(out);
            }
            Predicate::Call { name, args } => {
                ScalarExpr::Call {
                    name: name.clone(),
                    args: args.clone(),
                }
                .write_template(out);
            }
            Predicate::And(parts) => {
                for (i, p) in parts.iter().enumerate() {
                    if i > 0 {
                        out.push_str(" AND ");
                    }
                    p.write_template(out);
                }
            }
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Eq(l, r) => write!(f, "{l} = {r}"),
            Predicate::Call { name, args } => write!(
                f,
                "{}",
                ScalarExpr::Call {
                    name: name.clone(),
                    args: args.clone()
                }
            ),
            Predicate::And(parts) => {
                for (i, p) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " AND ")?;
                    }
                    write!(f, "{p}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjItem {
    pub expr: ScalarExpr,
    pub name: String,
}

impl ProjItem {
    pub fn new(expr: ScalarExpr, name: impl Into<String>) -> Self {
        ProjItem {
            expr,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Plan {
    Input {
        table: String,
        alias: String,
        columns: Vec<String>,
    },
    Proj {
        input: Box<Plan>,
        items: Vec<ProjItem>,
        distinct: bool,
        alias: String,
    },
    Filter {
        input: Box<Plan>,
        predicate: Predicate,
    },
    InSubFilter {
        input: Box<Plan>,
        lhs: Vec<ScalarExpr>,
        subquery: Box<Plan>,
    },
    ExistsFilter {
        input: Box<Plan>,
        subquery: Box<Plan>,
    },
    Join {
        kind: JoinKind,
        left: Box<Plan>,
        right: Box<Plan>,
        condition: Option<Predicate>,
    },
    SetOp {
        kind: SetOpKind,
        distinct: bool,
        left: Box<Plan>,
        right: Box<Plan>,
    },
    Sort {
        input: Box<Plan>,
    },
    Limit {
        input: Box<Plan>,
        count: u64,
    },
    Agg {
        input: Box<Plan>,
        group_by: Vec<ScalarExpr>,
        items: Vec<ProjItem>,
        alias: String,
    },
}

impl Plan {
    pub fn input(table: impl Into<String>, alias: impl Into<String>, columns: Vec<String>) -> Self {
        Plan::Input {
            table: table.into(),
            alias: alias.into(),
            columns,
        }
    }

    pub fn proj(input: Plan, items: Vec<ProjItem>, distinct: bool, alias: impl Into<String>) -> Self {
        Plan::Proj {
            input: Box::new(input),
            items,
            distinct,
            alias: alias.into(),
        }
    }

    pub fn filter(input: Plan, predicate: Predicate) -> Self {
        Plan::Filter {
            input: Box::new(input),
            predicate,
        }
    }

    pub fn in_sub_filter(input: Plan, lhs: Vec<ScalarExpr>, subquery: Plan) -> Self {
        Plan::InSubFilter {
            input: Box::new(input),
            lhs,
            subquery: Box::new(subquery),
        }
    }

    pub fn join(kind: JoinKind, left: Plan, right: Plan, condition: Option<Predicate>) -> Self {
        Plan::Join {
            kind,
            left: Box::new(left),
            right: Box::new(right),
            condition,
        }
    }

    pub fn set_op(kind: SetOpKind, distinct: bool, left: Plan, right: Plan) -> Self {
        Plan::SetOp {
            kind,
            distinct,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Operator name used in logs and errors.
    pub fn operator(&self) -> String {
        match self {
            Plan::Input { .. } => "Input".into(),
            Plan::Proj { distinct, .. } => (if *distinct { "Proj*" } else { "Proj" }).into(),
            Plan::Filter { .. } => "Filter".into(),
            Plan::InSubFilter { .. } => "InSubFilter".into(),
            Plan::ExistsFilter { .. } => "ExistsFilter".into(),
            Plan::Join { kind, .. } => format!("{kind:?}Join"),
            Plan::SetOp { kind, distinct, .. } => {
                format!("{kind:?}{}", if *distinct { "*" } else { "" })
            }
            Plan::Sort { .. } => "Sort".into(),
            Plan::Limit { .. } => "Limit".into(),
            Plan::Agg { .. } => "Agg".into(),
        }
    }

    /// Names of the output columns, in order.
    pub fn output_columns(&self) -> Vec<String> {
        match self {
            Plan::Input { columns, .. } => columns.clone(),
            Plan::Proj { items, .. } | Plan::Agg { items, .. } => {
                items.iter().map(|i| i.name.clone()).collect()
            }
            Plan::Filter { input, .. }
            | Plan::InSubFilter { input, .. }
            | Plan::ExistsFilter { input, .. }
            | Plan::Sort { input }
            | Plan::Limit { input, .. } => input.output_columns(),
            Plan::Join { left, right, .. } => {
                let mut cols = left.output_columns();
                cols.extend(right.output_columns());
                cols
            }
            Plan::SetOp { left, .. } => left.output_columns(),
        }
    }

    /// Alias of the node that owns the first output column.
    pub fn output_owner(&self) -> Option<&str> {
        match self {
            Plan::Input { alias, .. } | Plan::Proj { alias, .. } | Plan::Agg { alias, .. } => {
                Some(alias)
            }
            Plan::Filter { input, .. }
            | Plan::InSubFilter { input, .. }
            | Plan::ExistsFilter { input, .. }
            | Plan::Sort { input }
            | Plan::Limit { input, .. } => input.output_owner(),
            Plan::Join { left, .. } | Plan::SetOp { left, .. } => left.output_owner(),
        }
    }

    /// Whether the plan's result is deduplicated at its root.
    pub fn is_dedup(&self) -> bool {
        match self {
            Plan::Proj { distinct, .. } | Plan::SetOp { distinct, .. } => *distinct,
            Plan::Sort { input } | Plan::Limit { input, .. } => input.is_dedup(),
            _ => false,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plan::Input { table, alias, .. } => write!(f, "Input[{table} AS {alias}]"),
            Plan::Proj {
                input, items, alias, ..
            } => {
                write!(f, "{}[", self.operator())?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} AS {}", item.expr, item.name)?;
                }
                write!(f, "; {alias}]({input})")
            }
            Plan::Filter { input, predicate } => write!(f, "Filter[{predicate}]({input})"),
            Plan::InSubFilter {
                input,
                lhs,
                subquery,
            } => {
                write!(f, "InSubFilter[")?;
                for (i, e) in lhs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "]({input}, {subquery})")
            }
            Plan::ExistsFilter { input, subquery } => write!(f, "ExistsFilter({input}, {subquery})"),
            Plan::Join {
                left,
                right,
                condition,
                ..
            } => match condition {
                Some(cond) => write!(f, "{}[{cond}]({left}, {right})", self.operator()),
                None => write!(f, "{}({left}, {right})", self.operator()),
            },
            Plan::SetOp { left, right, .. } => write!(f, "{}({left}, {right})", self.operator()),
            Plan::Sort { input } => write!(f, "Sort({input})"),
            Plan::Limit { input, count } => write!(f, "Limit[{count}]({input})"),
            Plan::Agg { input, alias, .. } => write!(f, "Agg[{alias}]({input})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_columns_follow_the_left_branch_of_set_ops() {
        let l = Plan::proj(
            Plan::input("r0", "t0", vec!["c0".into()]),
            vec![ProjItem::new(ScalarExpr::column("t0", "c0"), "c0")],
            false,
            "q0",
        );
        let r = Plan::proj(
            Plan::input("r1", "t1", vec!["c1".into()]),
            vec![ProjItem::new(ScalarExpr::column("t1", "c1"), "c1")],
            false,
            "q1",
        );
        let u = Plan::set_op(SetOpKind::Union, true, l, r);
        assert_eq!(u.output_columns(), vec!["c0".to_string()]);
        assert_eq!(u.output_owner(), Some("q0"));
        assert!(u.is_dedup());
        assert_eq!(u.operator(), "Union*");
    }

    #[test]
    fn predicate_template_hides_columns() {
        let p = Predicate::And(vec![
            Predicate::call("p0", vec![ScalarExpr::column("t0", "c0")]),
            Predicate::eq(ScalarExpr::column("t0", "c1"), ScalarExpr::literal("1")),
        ]);
        assert_eq!(p.template(), "p0(?) AND ? = 1");
        assert_eq!(p.to_string(), "p0(t0.c0) AND t0.c1 = 1");
        assert_eq!(p.conjuncts().len(), 2);
        assert_eq!(p.columns().len(), 2);
    }
}
