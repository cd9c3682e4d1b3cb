//! Structural equality of disjunctions up to reordering and bound renaming.

use crate::expr::UExpr;
use crate::normal_form::{Conjunction, Disjunction};
use crate::var::Var;

/// Bound variables matched so far: both sides are mapped onto shared tags.
#[derive(Debug, Clone, Default)]
struct Binding {
    left: Vec<(Var, Var)>,
    right: Vec<(Var, Var)>,
}

impl Binding {
    fn bind(&mut self, l: &Var, r: &Var) {
        let tag = Var::Base(format!("#{}", self.left.len()));
        self.left.push((l.clone(), tag.clone()));
        self.right.push((r.clone(), tag));
    }

    fn unbind(&mut self) {
        self.left.pop();
        self.right.pop();
    }
}

fn lookup<'a>(scope: &'a [(Var, Var)], var: &Var) -> Option<&'a Var> {
    scope.iter().rev().find(|(from, _)| from == var).map(|(_, to)| to)
}

fn map_var(scope: &[(Var, Var)], var: &Var) -> Var {
    match var {
        Var::Base(_) => lookup(scope, var).cloned().unwrap_or_else(|| var.clone()),
        Var::Const(_) => var.clone(),
        Var::Proj { base, attr } => map_var(scope, base).proj(attr.clone()),
        Var::Func { name, args } => {
            Var::func(name.clone(), args.iter().map(|a| map_var(scope, a)).collect())
        }
    }
}

fn map_atom(scope: &[(Var, Var)], atom: &UExpr) -> UExpr {
    match atom {
        UExpr::Table { name, var } => UExpr::table(name.clone(), map_var(scope, var)),
        UExpr::Pred { name, args } => {
            UExpr::pred(name.clone(), args.iter().map(|a| map_var(scope, a)).collect())
        }
        UExpr::EqPred { left, right } => {
            let (l, r) = (map_var(scope, left), map_var(scope, right));
            if l <= r {
                UExpr::eq_pred(l, r)
            } else {
                UExpr::eq_pred(r, l)
            }
        }
        other => other.clone(),
    }
}

fn mapped_atoms(scope: &[(Var, Var)], atoms: &[UExpr]) -> Vec<UExpr> {
    let mut out: Vec<UExpr> = atoms.iter().map(|a| map_atom(scope, a)).collect();
    out.sort();
    out
}

/// Sorted names of the table atoms over `var`.
fn signature(c: &Conjunction, var: &Var) -> Vec<String> {
    let mut names: Vec<String> = c
        .tables()
        .iter()
        .filter_map(|t| match t {
            UExpr::Table { name, var: v } if v == var => Some(name.clone()),
            _ => None,
        })
        .collect();
    names.sort();
    names
}

pub fn is_isomorphic(a: &Disjunction, b: &Disjunction) -> bool {
    disjunctions_match(a, b, &mut Binding::default())
}

fn disjunctions_match(a: &Disjunction, b: &Disjunction, binding: &mut Binding) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    assign(a.conjunctions(), b.conjunctions(), &mut used, binding)
}

fn assign(rest: &[Conjunction], b: &[Conjunction], used: &mut [bool], binding: &mut Binding) -> bool {
    let Some((head, tail)) = rest.split_first() else {
        return true;
    };
    for j in 0..b.len() {
        if used[j] || !conjunctions_match(head, &b[j], binding) {
            continue;
        }
        used[j] = true;
        if assign(tail, b, used, binding) {
            return true;
        }
        used[j] = false;
    }
    false
}

fn conjunctions_match(a: &Conjunction, b: &Conjunction, binding: &mut Binding) -> bool {
    if a.vars().len() != b.vars().len()
        || a.tables().len() != b.tables().len()
        || a.predicates().len() != b.predicates().len()
        || a.squash().is_some() != b.squash().is_some()
        || a.negation().is_some() != b.negation().is_some()
    {
        return false;
    }
    let signatures_b: Vec<Vec<String>> = b.vars().iter().map(|v| signature(b, v)).collect();
    let mut used = vec![false; b.vars().len()];
    bind_vars(a, b, 0, &signatures_b, &mut used, binding)
}

fn bind_vars(
    a: &Conjunction,
    b: &Conjunction,
    i: usize,
    signatures_b: &[Vec<String>],
    used: &mut [bool],
    binding: &mut Binding,
) -> bool {
    if i == a.vars().len() {
        return bodies_match(a, b, binding);
    }
    let var = &a.vars()[i];
    let sig = signature(a, var);
    for j in 0..b.vars().len() {
        if used[j] || signatures_b[j] != sig {
            continue;
        }
        used[j] = true;
        binding.bind(var, &b.vars()[j]);
        let matched = bind_vars(a, b, i + 1, signatures_b, used, binding);
        binding.unbind();
        used[j] = false;
        if matched {
            return true;
        }
    }
    false
}

fn bodies_match(a: &Conjunction, b: &Conjunction, binding: &mut Binding) -> bool {
    if mapped_atoms(&binding.left, a.tables()) != mapped_atoms(&binding.right, b.tables()) {
        return false;
    }
    if mapped_atoms(&binding.left, a.predicates()) != mapped_atoms(&binding.right, b.predicates())
    {
        return false;
    }
    let nested = |x: Option<&Disjunction>, y: Option<&Disjunction>, binding: &mut Binding| match (x, y) {
        (Some(x), Some(y)) => disjunctions_match(x, y, binding),
        (None, None) => true,
        _ => false,
    };
    nested(a.squash(), b.squash(), binding) && nested(a.negation(), b.negation(), binding)
}
