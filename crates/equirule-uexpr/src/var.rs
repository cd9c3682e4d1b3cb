//! Row variables (tuples) of the U-expression calculus.
//!
//! A `Var` names a row: a base variable bound by a summation (or free at the
//! query root), a constant, an attribute projection, or an opaque function of
//! other variables. Values are immutable; substitution builds new values.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const NULL_LITERAL: &str = "null";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Var {
    Base(String),
    Const(String),
    Proj { base: Box<Var>, attr: String },
    Func { name: String, args: Vec<Var> },
}

impl Var {
    pub fn base(name: impl Into<String>) -> Self {
        Var::Base(name.into())
    }

    pub fn constant(text: impl Into<String>) -> Self {
        Var::Const(text.into())
    }

    pub fn null() -> Self {
        Var::Const(NULL_LITERAL.to_string())
    }

    pub fn func(name: impl Into<String>, args: Vec<Var>) -> Self {
        Var::Func {
            name: name.into(),
            args,
        }
    }

    /// `self.attr`; every attribute of the NULL tuple is NULL.
    pub fn proj(&self, attr: impl Into<String>) -> Self {
        if self.is_null() {
            return self.clone();
        }
        Var::Proj {
            base: Box::new(self.clone()),
            attr: attr.into(),
        }
    }

    pub fn is_base(&self) -> bool {
        matches!(self, Var::Base(_))
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Var::Const(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Var::Const(text) if text == NULL_LITERAL)
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Var::Base(name) => Some(name),
            _ => None,
        }
    }

    /// The innermost variable of a projection chain (`x.a.b` → `x`).
    pub fn root(&self) -> &Var {
        match self {
            Var::Proj { base, .. } => base.root(),
            other => other,
        }
    }

    /// Whether `var` occurs anywhere inside `self` (including `self` itself).
    pub fn uses(&self, var: &Var) -> bool {
        if self == var {
            return true;
        }
        match self {
            Var::Proj { base, .. } => base.uses(var),
            Var::Func { args, .. } => args.iter().any(|arg| arg.uses(var)),
            Var::Base(_) | Var::Const(_) => false,
        }
    }

    pub fn subst(&self, from: &Var, to: &Var) -> Var {
        if self == from {
            return to.clone();
        }
        match self {
            Var::Proj { base, attr } => base.subst(from, to).proj(attr.clone()),
            Var::Func { name, args } => Var::Func {
                name: name.clone(),
                args: args.iter().map(|arg| arg.subst(from, to)).collect(),
            },
            Var::Base(_) | Var::Const(_) => self.clone(),
        }
    }

    /// Every base variable occurring in `self`, in left-to-right order.
    pub fn base_vars(&self, out: &mut Vec<Var>) {
        match self {
            Var::Base(_) => {
                if !out.contains(self) {
                    out.push(self.clone());
                }
            }
            Var::Const(_) => {}
            Var::Proj { base, .. } => base.base_vars(out),
            Var::Func { args, .. } => {
                for arg in args {
                    arg.base_vars(out);
                }
            }
        }
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Var::Base(name) => write!(f, "{name}"),
            Var::Const(text) => write!(f, "{text}"),
            Var::Proj { base, attr } => write!(f, "{base}.{attr}"),
            Var::Func { name, args } => {
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
