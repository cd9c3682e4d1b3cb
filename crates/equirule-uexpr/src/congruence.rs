//! Union-find congruence over hashable values.
//!
//! [`tuple_congruence`] builds the equality closure induced by the `[x = y]`
//! atoms of a conjunction, closed under attribute projection: once `x = y`,
//! every projection `x.a` that occurs is merged with `y.a`.

use crate::expr::UExpr;
use crate::var::Var;
use ahash::AHashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct Congruence<T: Clone + Eq + Hash> {
    index: AHashMap<T, usize>,
    keys: Vec<T>,
    parent: Vec<usize>,
}

impl<T: Clone + Eq + Hash> Default for Congruence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Eq + Hash> Congruence<T> {
    pub fn new() -> Self {
        Self {
            index: AHashMap::new(),
            keys: Vec::new(),
            parent: Vec::new(),
        }
    }

    fn slot(&mut self, value: &T) -> usize {
        if let Some(&i) = self.index.get(value) {
            return i;
        }
        let i = self.keys.len();
        self.index.insert(value.clone(), i);
        self.keys.push(value.clone());
        self.parent.push(i);
        i
    }

    fn root(&self, mut i: usize) -> usize {
        while self.parent[i] != i {
            i = self.parent[i];
        }
        i
    }

    /// Register `value` as a singleton class if it is not known yet.
    pub fn add(&mut self, value: &T) {
        self.slot(value);
    }

    /// Merge the classes of `a` and `b`; returns whether anything changed.
    pub fn union(&mut self, a: &T, b: &T) -> bool {
        let ia = self.slot(a);
        let ib = self.slot(b);
        let (ra, rb) = (self.root(ia), self.root(ib));
        if ra == rb {
            return false;
        }
        // smaller index stays representative so class order is insertion order
        let (keep, merge) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[merge] = keep;
        true
    }

    pub fn contains(&self, value: &T) -> bool {
        self.index.contains_key(value)
    }

    /// Representative of `value`'s class, or `None` for unknown values.
    pub fn find(&self, value: &T) -> Option<&T> {
        let i = *self.index.get(value)?;
        Some(&self.keys[self.root(i)])
    }

    pub fn is_eq(&self, a: &T, b: &T) -> bool {
        if a == b {
            return true;
        }
        match (self.index.get(a), self.index.get(b)) {
            (Some(&ia), Some(&ib)) => self.root(ia) == self.root(ib),
            _ => false,
        }
    }

    /// Members of `value`'s class in insertion order (just `value` when unknown).
    pub fn class_of(&self, value: &T) -> Vec<T> {
        let Some(&i) = self.index.get(value) else {
            return vec![value.clone()];
        };
        let root = self.root(i);
        (0..self.keys.len())
            .filter(|&j| self.root(j) == root)
            .map(|j| self.keys[j].clone())
            .collect()
    }

    pub fn keys(&self) -> &[T] {
        &self.keys
    }
}

const MAX_CLOSURE_ROUNDS: usize = 64;

/// Equality congruence over tuples induced by the `EqPred`s among `predicates`.
pub fn tuple_congruence<'a, I>(predicates: I) -> Congruence<Var>
where
    I: IntoIterator<Item = &'a UExpr>,
{
    let mut cong = Congruence::new();
    for pred in predicates {
        if let UExpr::EqPred { left, right } = pred {
            cong.union(left, right);
        }
    }

    for _ in 0..MAX_CLOSURE_ROUNDS {
        let mut changed = false;
        let projections: Vec<(Var, Var, String)> = cong
            .keys()
            .iter()
            .filter_map(|k| match k {
                Var::Proj { base, attr } => Some((k.clone(), base.as_ref().clone(), attr.clone())),
                _ => None,
            })
            .collect();
        for (proj, base, attr) in projections {
            for peer in cong.class_of(&base) {
                if peer != base {
                    changed |= cong.union(&proj, &peer.proj(attr.clone()));
                }
            }
        }
        if !changed {
            break;
        }
    }
    cong
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_find_classes() {
        let mut c: Congruence<u32> = Congruence::new();
        c.union(&1, &2);
        c.union(&3, &4);
        assert!(c.is_eq(&1, &2));
        assert!(!c.is_eq(&1, &3));
        c.union(&2, &3);
        assert!(c.is_eq(&1, &4));
        assert_eq!(c.class_of(&4), vec![1, 2, 3, 4]);
        assert_eq!(c.find(&4), Some(&1));
        assert!(c.is_eq(&9, &9));
        assert_eq!(c.class_of(&9), vec![9]);
    }

    #[test]
    fn tuple_equality_propagates_to_projections() {
        let x = Var::base("x");
        let y = Var::base("y");
        let preds = vec![
            UExpr::eq_pred(x.clone(), y.clone()),
            UExpr::eq_pred(x.proj("k"), Var::constant("1")),
        ];
        let cong = tuple_congruence(&preds);
        assert!(cong.is_eq(&y.proj("k"), &Var::constant("1")));
        assert!(!cong.is_eq(&y.proj("j"), &x.proj("j")));
    }
}
