//! Plan → U-expression translation.
//!
//! Translation walks the plan bottom-up with a stack of query scopes that
//! mirrors SQL scoping. Every relation (an `Input`, or a `Proj` used as a
//! derived table) owns one row variable; column references resolve through
//! the alias → variable map. A `Proj` ties its output to the enclosing scope
//! via *joint* tuples: either joints handed down by the consumer (the root
//! query, a union branch, an IN/EXISTS subquery) or the projections of a
//! fresh pivot variable of the outer scope.

use crate::plan::{JoinKind, Plan, Predicate, ScalarExpr, SetOpKind};
use equirule_uexpr::{ConstantTuples, UExpr, Var};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Name of the variable standing for the output row of the whole query.
pub const ROOT_VAR_NAME: &str = "t";
const VAR_PREFIX: &str = "t";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    #[error("unsupported operator `{operator}` in {node}")]
    UnsupportedOperator { operator: String, node: Box<Plan> },

    #[error("column `{qualifier}.{column}` is not produced by any relation in scope")]
    UnresolvedColumn { qualifier: String, column: String },

    #[error("IN-subquery filter has no left-hand columns")]
    EmptyJoints,

    #[error("projection `{alias}` yields {columns} column(s) but is compared with {joints}")]
    JointArity {
        alias: String,
        joints: usize,
        columns: usize,
    },
}

impl TranslateError {
    fn unsupported(node: &Plan) -> Self {
        TranslateError::UnsupportedOperator {
            operator: node.operator(),
            node: Box::new(node.clone()),
        }
    }
}

/// A translated query: its U-expression and the variables left unbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    pub expr: UExpr,
    pub free_vars: Vec<Var>,
}

impl Translation {
    /// Free variables are fixed by the caller, so they count as constants.
    pub fn constant_tuples(&self) -> ConstantTuples {
        ConstantTuples::new(self.free_vars.iter().cloned())
    }
}

pub fn translate(plan: &Plan) -> Result<Translation, TranslateError> {
    let mut translator = Translator::new();
    let expr = translator.on_node(plan, false)?;
    let free_vars = expr.free_vars().into_iter().collect();
    tracing::trace!(%plan, %expr, "translated plan");
    Ok(Translation { expr, free_vars })
}

#[derive(Debug)]
struct QueryScope {
    root: bool,
    local_vars: Vec<Var>,
    joints: Option<Vec<Var>>,
}

impl QueryScope {
    fn new(root: bool) -> Self {
        QueryScope {
            root,
            local_vars: Vec::new(),
            joints: None,
        }
    }
}

struct Translator {
    scopes: Vec<QueryScope>,
    owners: HashMap<String, Var>,
    next_var: usize,
}

impl Translator {
    fn new() -> Self {
        Translator {
            scopes: vec![QueryScope::new(true)],
            owners: HashMap::new(),
            next_var: 0,
        }
    }

    // ========================================================================
    // Scopes and variables
    // ========================================================================

    fn fresh_var(&mut self) -> Var {
        let var = Var::base(format!("{VAR_PREFIX}{}", self.next_var));
        self.next_var += 1;
        var
    }

    /// Allocate the row variable of `owner` in the scope `depth` levels from the top.
    fn make_var(&mut self, owner: &str, depth: usize) -> Var {
        let index = self.scopes.len().saturating_sub(1 + depth);
        let root_var = Var::base(ROOT_VAR_NAME);
        let scope = &self.scopes[index];
        let var = if scope.root && !scope.local_vars.contains(&root_var) {
            root_var
        } else {
            self.fresh_var()
        };
        self.scopes[index].local_vars.push(var.clone());
        self.owners.insert(owner.to_string(), var.clone());
        var
    }

    fn local(&mut self) -> &mut QueryScope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn outer_joints(&self) -> Option<Vec<Var>> {
        let n = self.scopes.len();
        if n < 2 {
            return None;
        }
        self.scopes[n - 2].joints.clone()
    }

    fn tuple(&self, expr: &ScalarExpr) -> Result<Var, TranslateError> {
        match expr {
            ScalarExpr::Column { qualifier, column } => self
                .owners
                .get(qualifier)
                .map(|var| var.proj(column.clone()))
                .ok_or_else(|| TranslateError::UnresolvedColumn {
                    qualifier: qualifier.clone(),
                    column: column.clone(),
                }),
            ScalarExpr::Literal(text) => Ok(Var::constant(text.clone())),
            ScalarExpr::Call { name, args } => Ok(Var::func(
                name.clone(),
                args.iter().map(|a| self.tuple(a)).collect::<Result<_, _>>()?,
            )),
        }
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn on_node(&mut self, node: &Plan, union_child: bool) -> Result<UExpr, TranslateError> {
        match node {
            Plan::Input { table, alias, .. } => {
                let var = self.make_var(alias, 0);
                Ok(UExpr::table(table.clone(), var))
            }
            Plan::Proj {
                input,
                items,
                distinct,
                alias,
            } => {
                self.scopes.push(QueryScope::new(false));
                let result = self.on_proj(input, items, alias);
                let scope = self.scopes.pop();
                let terms = result?;
                let local_vars = scope.map(|s| s.local_vars).unwrap_or_default();
                let body = UExpr::product(terms).unwrap_or_else(UExpr::unit);
                let expr = UExpr::sum(local_vars, body);
                Ok(if *distinct { UExpr::squash(expr) } else { expr })
            }
            Plan::Filter { input, predicate } => {
                let remaining = self.on_node(input, false)?;
                let cond = self.on_predicate(predicate)?;
                Ok(UExpr::mul(cond, remaining))
            }
            Plan::InSubFilter {
                input,
                lhs,
                subquery,
            } => {
                if lhs.is_empty() {
                    return Err(TranslateError::EmptyJoints);
                }
                let outer = self.on_node(input, false)?;
                let joints = lhs
                    .iter()
                    .map(|e| self.tuple(e))
                    .collect::<Result<Vec<_>, _>>()?;
                let inner = self.with_joints(Some(joints), |t| t.on_node(subquery, false))?;
                Ok(UExpr::mul(outer, UExpr::squash(inner)))
            }
            Plan::ExistsFilter { input, subquery } => {
                let outer = self.on_node(input, false)?;
                let inner = self.with_joints(Some(Vec::new()), |t| t.on_node(subquery, false))?;
                Ok(UExpr::mul(outer, UExpr::squash(inner)))
            }
            Plan::Join {
                kind,
                left,
                right,
                condition,
            } => self.on_join(node, *kind, left, right, condition.as_ref()),
            Plan::SetOp {
                kind,
                distinct,
                left,
                right,
            } => {
                if *kind != SetOpKind::Union {
                    return Err(TranslateError::unsupported(node));
                }
                // the leftmost union of a union tree creates the shared output tuple
                let joints = if union_child {
                    None
                } else {
                    let owner = node.output_owner().unwrap_or(ROOT_VAR_NAME).to_string();
                    let joint = self.make_var(&owner, 0);
                    Some(
                        node.output_columns()
                            .into_iter()
                            .map(|c| joint.proj(c))
                            .collect(),
                    )
                };
                let (l, r) = match joints {
                    Some(joints) => self.with_joints(Some(joints), |t| {
                        Ok((t.on_node(left, true)?, t.on_node(right, true)?))
                    })?,
                    None => (self.on_node(left, true)?, self.on_node(right, true)?),
                };
                let expr = UExpr::add(l, r);
                Ok(if *distinct { UExpr::squash(expr) } else { expr })
            }
            Plan::Sort { input } | Plan::Limit { input, .. } => self.on_node(input, union_child),
            Plan::Agg { .. } => Err(TranslateError::unsupported(node)),
        }
    }

    /// Runs `f` with the local scope's joints replaced, restoring them afterwards.
    fn with_joints<T>(
        &mut self,
        joints: Option<Vec<Var>>,
        f: impl FnOnce(&mut Self) -> Result<T, TranslateError>,
    ) -> Result<T, TranslateError> {
        let saved = std::mem::replace(&mut self.local().joints, joints);
        let result = f(self);
        self.local().joints = saved;
        result
    }

    /// Factors of a projection body: the input term and one `[joint = expr]` per item.
    fn on_proj(
        &mut self,
        input: &Plan,
        items: &[crate::plan::ProjItem],
        alias: &str,
    ) -> Result<Vec<UExpr>, TranslateError> {
        let joints = match self.outer_joints() {
            Some(joints) => joints,
            None => {
                let pivot = self.make_var(alias, 1);
                items.iter().map(|i| pivot.proj(i.name.clone())).collect()
            }
        };
        // EXISTS hands down no joints
        if !joints.is_empty() && joints.len() != items.len() {
            return Err(TranslateError::JointArity {
                alias: alias.to_string(),
                joints: joints.len(),
                columns: items.len(),
            });
        }
        let mut terms = vec![self.on_node(input, false)?];
        for (joint, item) in joints.into_iter().zip(items) {
            terms.push(UExpr::eq_pred(joint, self.tuple(&item.expr)?));
        }
        Ok(terms)
    }

    fn on_join(
        &mut self,
        node: &Plan,
        kind: JoinKind,
        left: &Plan,
        right: &Plan,
        condition: Option<&Predicate>,
    ) -> Result<UExpr, TranslateError> {
        if matches!(kind, JoinKind::Right | JoinKind::Full) {
            return Err(TranslateError::unsupported(node));
        }
        let lhs = self.on_node(left, false)?;
        let mark = self.local().local_vars.len();
        let rhs = self.on_node(right, false)?;
        let rhs_vars = self.local().local_vars[mark..].to_vec();

        let Some(condition) = condition else {
            return Ok(UExpr::mul(lhs, rhs));
        };
        let cond = self.on_join_condition(condition)?;
        // L(x) * R(y) * p(x, y)
        let symm = UExpr::mul(UExpr::mul(cond.clone(), lhs.clone()), rhs.clone());
        if kind != JoinKind::Left {
            return Ok(symm);
        }

        // L(x) * [y = null] * not(Sum{y'}(p(x, y') * R(y')))
        let mut cond = cond;
        let mut rhs = rhs;
        let mut fresh = Vec::with_capacity(rhs_vars.len());
        let mut is_null = Vec::with_capacity(rhs_vars.len());
        for old in &rhs_vars {
            let new = self.fresh_var();
            is_null.push(UExpr::eq_pred(old.clone(), Var::null()));
            cond = cond.subst_var(old, &new);
            rhs = rhs.subst_var(old, &new);
            fresh.push(new);
        }
        let unmatched = UExpr::not(UExpr::sum(fresh, UExpr::mul(cond, rhs)));
        let asymm = match UExpr::product(is_null) {
            Some(is_null) => UExpr::mul(lhs, UExpr::mul(is_null, unmatched)),
            None => UExpr::mul(lhs, unmatched),
        };
        Ok(UExpr::add(symm, asymm))
    }

    fn on_join_condition(&self, condition: &Predicate) -> Result<UExpr, TranslateError> {
        let conjuncts = condition.conjuncts();
        let equi = conjuncts
            .iter()
            .all(|c| matches!(c, Predicate::Eq(l, r) if l.is_column() && r.is_column()));
        if !equi {
            return self.uninterpreted(condition);
        }
        let mut eqs = Vec::with_capacity(conjuncts.len());
        for c in conjuncts {
            if let Predicate::Eq(l, r) = c {
                eqs.push(null_safe_eq(self.tuple(l)?, self.tuple(r)?));
            }
        }
        Ok(UExpr::product(eqs).unwrap_or_else(UExpr::unit))
    }

    fn on_predicate(&self, predicate: &Predicate) -> Result<UExpr, TranslateError> {
        let mut factors = Vec::new();
        for conjunct in predicate.conjuncts() {
            let factor = match conjunct {
                Predicate::Eq(l, r) if l.is_column() && r.is_column() => {
                    null_safe_eq(self.tuple(l)?, self.tuple(r)?)
                }
                Predicate::Eq(col, lit @ ScalarExpr::Literal(_))
                | Predicate::Eq(lit @ ScalarExpr::Literal(_), col)
                    if col.is_column() =>
                {
                    UExpr::eq_pred(self.tuple(col)?, self.tuple(lit)?)
                }
                Predicate::Call { name, args } if args.iter().all(ScalarExpr::is_column) => {
                    let args = args.iter().map(|a| self.tuple(a)).collect::<Result<_, _>>()?;
                    UExpr::pred(name.clone(), args)
                }
                other => self.uninterpreted(other)?,
            };
            factors.push(factor);
        }
        Ok(UExpr::product(factors).unwrap_or_else(UExpr::unit))
    }

    /// `[template(cols)]` over the columns the predicate mentions.
    fn uninterpreted(&self, predicate: &Predicate) -> Result<UExpr, TranslateError> {
        let args = predicate
            .columns()
            .into_iter()
            .map(|(qualifier, column)| self.tuple(&ScalarExpr::Column { qualifier, column }))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(UExpr::pred(predicate.template(), args))
    }
}

/// `[x = y] * NotNull(y)`: SQL equality never holds on NULL.
fn null_safe_eq(x: Var, y: Var) -> UExpr {
    UExpr::mul(UExpr::eq_pred(x, y.clone()), UExpr::not_null(y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ProjItem;

    fn input(table: &str, alias: &str) -> Plan {
        Plan::input(table, alias, vec!["a".into(), "b".into()])
    }

    fn col(q: &str, c: &str) -> ScalarExpr {
        ScalarExpr::column(q, c)
    }

    #[test]
    fn root_input_binds_the_root_var() {
        let plan = Plan::filter(input("R", "r"), Predicate::call("p", vec![col("r", "a")]));
        let t = translate(&plan).unwrap();
        assert_eq!(t.expr.to_string(), "[p(t.a)] * R(t)");
        assert_eq!(t.free_vars, vec![Var::base("t")]);
    }

    #[test]
    fn projection_sums_over_its_local_vars() {
        let plan = Plan::proj(
            Plan::filter(
                input("R", "r"),
                Predicate::eq(col("r", "b"), ScalarExpr::literal("1")),
            ),
            vec![ProjItem::new(col("r", "a"), "a")],
            true,
            "q",
        );
        let t = translate(&plan).unwrap();
        assert_eq!(t.expr.to_string(), "||Sum{t0}([t0.b = 1] * R(t0) * [t.a = t0.a])||");
        assert_eq!(t.free_vars, vec![Var::base("t")]);
    }

    #[test]
    fn column_equality_is_null_safe() {
        let plan = Plan::filter(
            Plan::join(JoinKind::Cross, input("R", "r"), input("S", "s"), None),
            Predicate::eq(col("r", "a"), col("s", "b")),
        );
        let t = translate(&plan).unwrap();
        assert_eq!(
            t.expr.to_string(),
            "[t.a = t0.b] * [NotNull(t0.b)] * R(t) * S(t0)"
        );
    }

    #[test]
    fn left_join_adds_the_unmatched_part() {
        let plan = Plan::proj(
            Plan::join(
                JoinKind::Left,
                input("R", "r"),
                input("S", "s"),
                Some(Predicate::eq(col("r", "a"), col("s", "a"))),
            ),
            vec![ProjItem::new(col("r", "a"), "a")],
            false,
            "q",
        );
        let t = translate(&plan).unwrap();
        let text = t.expr.to_string();
        assert!(text.contains("[t1 = null]"), "{text}");
        assert!(text.contains("not(Sum{t2}("), "{text}");
        assert!(text.contains("S(t2)"), "{text}");
    }

    #[test]
    fn in_subquery_squashes_the_subquery() {
        let sub = Plan::proj(input("S", "s"), vec![ProjItem::new(col("s", "a"), "a")], false, "q1");
        let plan = Plan::in_sub_filter(input("R", "r"), vec![col("r", "a")], sub);
        let t = translate(&plan).unwrap();
        assert_eq!(t.expr.to_string(), "R(t) * ||Sum{t0}(S(t0) * [t.a = t0.a])||");
    }

    #[test]
    fn in_subquery_arity_must_match() {
        let sub = Plan::proj(input("S", "s"), vec![ProjItem::new(col("s", "a"), "a")], false, "q1");
        let plan = Plan::in_sub_filter(input("R", "r"), vec![col("r", "a"), col("r", "b")], sub);
        let err = translate(&plan).unwrap_err();
        assert_eq!(
            err,
            TranslateError::JointArity {
                alias: "q1".into(),
                joints: 2,
                columns: 1,
            }
        );
    }

    #[test]
    fn union_branches_share_the_joint() {
        let l = Plan::proj(input("R", "r"), vec![ProjItem::new(col("r", "a"), "a")], false, "q0");
        let r = Plan::proj(input("S", "s"), vec![ProjItem::new(col("s", "b"), "a")], false, "q1");
        let plan = Plan::set_op(SetOpKind::Union, false, l, r);
        let t = translate(&plan).unwrap();
        assert_eq!(
            t.expr.to_string(),
            "Sum{t0}(R(t0) * [t.a = t0.a]) + Sum{t1}(S(t1) * [t.a = t1.b])"
        );
    }

    #[test]
    fn unsupported_operators_carry_the_node() {
        let agg = Plan::Agg {
            input: Box::new(input("R", "r")),
            group_by: vec![],
            items: vec![],
            alias: "g".into(),
        };
        let err = translate(&agg).unwrap_err();
        assert!(matches!(err, TranslateError::UnsupportedOperator { ref operator, .. } if operator == "Agg"));

        let right = Plan::join(
            JoinKind::Right,
            input("R", "r"),
            input("S", "s"),
            Some(Predicate::eq(col("r", "a"), col("s", "a"))),
        );
        assert!(matches!(
            translate(&right),
            Err(TranslateError::UnsupportedOperator { .. })
        ));

        let intersect = Plan::set_op(SetOpKind::Intersect, true, input("R", "r"), input("S", "s"));
        assert!(matches!(
            translate(&intersect),
            Err(TranslateError::UnsupportedOperator { .. })
        ));
    }

    #[test]
    fn unknown_qualifier_is_reported() {
        let plan = Plan::filter(input("R", "r"), Predicate::call("p", vec![col("x", "a")]));
        assert_eq!(
            translate(&plan).unwrap_err(),
            TranslateError::UnresolvedColumn {
                qualifier: "x".into(),
                column: "a".into()
            }
        );
    }
}
