//! Fragment templates: relational operator trees whose tables, attribute
//! lists and predicates are symbolic holes.
//!
//! Text form, e.g. `Proj<a1>(Filter<p0 a0>(Input<t0>))`:
//! - `Input<t>`, `Proj<a>` / `Proj*<a>`, `Filter<p a>`, `InSubFilter<a>`
//! - `InnerJoin<a b>` / `LeftJoin<a b>`, `Union` / `Union*`
//!
//! Symbol names may be omitted (fresh ones are assigned) and a missing
//! operand list is filled with `Input`s.

use crate::symbol::{NamingError, OpId, Side, Symbol, SymbolKind, SymbolNaming, Symbols};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{all_consuming, opt, recognize},
    multi::separated_list0,
    sequence::{delimited, pair},
    IResult,
};
use std::fmt::Write as _;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FragmentError {
    #[error("malformed fragment `{text}`: {detail}")]
    Syntax { text: String, detail: String },

    #[error("unknown template operator `{0}`")]
    UnknownOperator(String),

    #[error("`{op}` takes {expected} operands, found {found}")]
    Arity {
        op: String,
        expected: usize,
        found: usize,
    },

    #[error("`{op}` binds {expected} symbols, found {found} names")]
    SymbolCount {
        op: String,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Naming(#[from] NamingError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
}

/// One template operator. Operands are arena indices into the owning fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Input {
        table: Symbol,
    },
    Proj {
        attrs: Symbol,
        dedup: bool,
        input: OpId,
    },
    Filter {
        pred: Symbol,
        attrs: Symbol,
        input: OpId,
    },
    InSubFilter {
        attrs: Symbol,
        input: OpId,
        subquery: OpId,
    },
    Join {
        kind: JoinType,
        lhs_attrs: Symbol,
        rhs_attrs: Symbol,
        left: OpId,
        right: OpId,
    },
    Union {
        dedup: bool,
        left: OpId,
        right: OpId,
    },
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::Input { .. } => "Input",
            Op::Proj { dedup: false, .. } => "Proj",
            Op::Proj { dedup: true, .. } => "Proj*",
            Op::Filter { .. } => "Filter",
            Op::InSubFilter { .. } => "InSubFilter",
            Op::Join {
                kind: JoinType::Inner,
                ..
            } => "InnerJoin",
            Op::Join {
                kind: JoinType::Left,
                ..
            } => "LeftJoin",
            Op::Union { dedup: false, .. } => "Union",
            Op::Union { dedup: true, .. } => "Union*",
        }
    }

    pub fn inputs(&self) -> Vec<OpId> {
        match self {
            Op::Input { .. } => vec![],
            Op::Proj { input, .. } | Op::Filter { input, .. } => vec![*input],
            Op::InSubFilter {
                input, subquery, ..
            } => vec![*input, *subquery],
            Op::Join { left, right, .. } | Op::Union { left, right, .. } => vec![*left, *right],
        }
    }

    /// Symbols in the order they appear in the text form.
    pub fn symbols(&self) -> Vec<Symbol> {
        match self {
            Op::Input { table } => vec![*table],
            Op::Proj { attrs, .. } | Op::InSubFilter { attrs, .. } => vec![*attrs],
            Op::Filter { pred, attrs, .. } => vec![*pred, *attrs],
            Op::Join {
                lhs_attrs,
                rhs_attrs,
                ..
            } => vec![*lhs_attrs, *rhs_attrs],
            Op::Union { .. } => vec![],
        }
    }
}

/// Operand count and symbol kinds of each operator name.
fn signature(name: &str) -> Option<(usize, &'static [SymbolKind])> {
    use SymbolKind::*;
    Some(match name {
        "Input" => (0, &[Table]),
        "Proj" | "Proj*" => (1, &[Attrs]),
        "Filter" => (1, &[Pred, Attrs]),
        "InSubFilter" => (2, &[Attrs]),
        "InnerJoin" | "LeftJoin" => (2, &[Attrs, Attrs]),
        "Union" | "Union*" => (2, &[]),
        _ => return None,
    })
}

#[derive(Debug, Clone)]
pub struct Fragment {
    side: Side,
    ops: Vec<Op>,
    root: OpId,
    symbols: Symbols,
}

impl Fragment {
    /// Parse `text`, binding symbols of `side` and recording their names in `naming`.
    pub fn parse(text: &str, side: Side, naming: &mut SymbolNaming) -> Result<Self, FragmentError> {
        let (_, parsed) = all_consuming(delimited(multispace0, parse_op, multispace0))(text)
            .map_err(|e| FragmentError::Syntax {
                text: text.to_string(),
                detail: e.to_string(),
            })?;

        let mut builder = Builder {
            ops: Vec::new(),
            symbols: Symbols::new(side),
            naming,
        };
        let root = builder.lower(&parsed)?;
        let mut fragment = Fragment {
            side,
            ops: builder.ops,
            root,
            symbols: builder.symbols,
        };
        fragment.bind_viable_sources();
        Ok(fragment)
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn root(&self) -> OpId {
        self.root
    }

    pub fn op(&self, id: OpId) -> &Op {
        &self.ops[id.0 as usize]
    }

    /// Operators in post-order; the root is last.
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    pub fn to_text(&self, naming: &SymbolNaming) -> String {
        let mut out = String::new();
        self.write_op(self.root, naming, &mut out);
        out
    }

    fn write_op(&self, id: OpId, naming: &SymbolNaming, out: &mut String) {
        let op = self.op(id);
        out.push_str(op.name());
        let syms = op.symbols();
        if !syms.is_empty() {
            out.push('<');
            for (i, sym) in syms.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                match naming.name_of(*sym) {
                    Some(name) => out.push_str(name),
                    None => {
                        let _ = write!(out, "{sym}");
                    }
                }
            }
            out.push('>');
        }
        let inputs = op.inputs();
        if !inputs.is_empty() {
            out.push('(');
            for (i, input) in inputs.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.write_op(input, naming, out);
            }
            out.push(')');
        }
    }

    /// Symbols exposed to an operator consuming `id`'s output.
    ///
    /// A projection hides its input behind its own attrs; a union exposes
    /// only its left operand.
    fn visible_sources(&self, id: OpId, out: &mut Vec<Symbol>) {
        match self.op(id) {
            Op::Input { table } => out.push(*table),
            Op::Proj { attrs, .. } => out.push(*attrs),
            Op::Union { left, .. } => self.visible_sources(*left, out),
            Op::Filter { input, .. } | Op::InSubFilter { input, .. } => {
                self.visible_sources(*input, out)
            }
            Op::Join { left, right, .. } => {
                self.visible_sources(*left, out);
                self.visible_sources(*right, out);
            }
        }
    }

    fn bind_viable_sources(&mut self) {
        let mut viable = Vec::new();
        for op in &self.ops {
            let uses: Vec<(Symbol, OpId)> = match op {
                Op::Proj { attrs, input, .. }
                | Op::Filter { attrs, input, .. }
                | Op::InSubFilter { attrs, input, .. } => vec![(*attrs, *input)],
                Op::Join {
                    lhs_attrs,
                    rhs_attrs,
                    left,
                    right,
                    ..
                } => vec![(*lhs_attrs, *left), (*rhs_attrs, *right)],
                Op::Input { .. } | Op::Union { .. } => vec![],
            };
            for (attrs, from) in uses {
                let mut sources = Vec::new();
                self.visible_sources(from, &mut sources);
                viable.push((attrs, sources));
            }
        }
        for (attrs, sources) in viable {
            self.symbols.set_viable_sources(attrs, sources);
        }
    }
}

// ============================================================================
// Parser
// ============================================================================

#[derive(Debug)]
struct ParsedOp<'a> {
    name: &'a str,
    names: Vec<&'a str>,
    operands: Vec<ParsedOp<'a>>,
}

fn parse_op_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic()),
        opt(char('*')),
    ))(input)
}

fn parse_symbol_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

fn parse_names(input: &str) -> IResult<&str, Vec<&str>> {
    delimited(
        pair(char('<'), multispace0),
        separated_list0(alt((multispace1, tag(","))), parse_symbol_name),
        pair(multispace0, char('>')),
    )(input)
}

fn parse_operands(input: &str) -> IResult<&str, Vec<ParsedOp<'_>>> {
    delimited(
        pair(char('('), multispace0),
        separated_list0(delimited(multispace0, char(','), multispace0), parse_op),
        pair(multispace0, char(')')),
    )(input)
}

fn parse_op(input: &str) -> IResult<&str, ParsedOp<'_>> {
    let (input, name) = parse_op_name(input)?;
    let (input, names) = opt(parse_names)(input)?;
    let (input, operands) = opt(parse_operands)(input)?;
    Ok((
        input,
        ParsedOp {
            name,
            names: names.unwrap_or_default(),
            operands: operands.unwrap_or_default(),
        },
    ))
}

struct Builder<'n> {
    ops: Vec<Op>,
    symbols: Symbols,
    naming: &'n mut SymbolNaming,
}

impl Builder<'_> {
    /// Lower operands first so symbols are bound in post-order.
    fn lower(&mut self, parsed: &ParsedOp<'_>) -> Result<OpId, FragmentError> {
        let (arity, kinds) = signature(parsed.name)
            .ok_or_else(|| FragmentError::UnknownOperator(parsed.name.to_string()))?;

        let mut inputs = Vec::with_capacity(arity);
        if parsed.operands.is_empty() {
            for _ in 0..arity {
                inputs.push(self.hole()?);
            }
        } else if parsed.operands.len() == arity {
            for operand in &parsed.operands {
                inputs.push(self.lower(operand)?);
            }
        } else {
            return Err(FragmentError::Arity {
                op: parsed.name.to_string(),
                expected: arity,
                found: parsed.operands.len(),
            });
        }

        if !parsed.names.is_empty() && parsed.names.len() != kinds.len() {
            return Err(FragmentError::SymbolCount {
                op: parsed.name.to_string(),
                expected: kinds.len(),
                found: parsed.names.len(),
            });
        }

        let id = OpId(self.ops.len() as u32);
        let mut syms = Vec::with_capacity(kinds.len());
        for (i, kind) in kinds.iter().enumerate() {
            let sym = self.symbols.bind(*kind, id);
            match parsed.names.get(i) {
                Some(name) => self.naming.set_name(sym, name)?,
                None => {
                    self.naming.name_or_assign(sym);
                }
            }
            syms.push(sym);
        }

        let op = match (parsed.name, syms.as_slice(), inputs.as_slice()) {
            ("Input", [table], []) => Op::Input { table: *table },
            (name @ ("Proj" | "Proj*"), [attrs], [input]) => Op::Proj {
                attrs: *attrs,
                dedup: name.ends_with('*'),
                input: *input,
            },
            ("Filter", [pred, attrs], [input]) => Op::Filter {
                pred: *pred,
                attrs: *attrs,
                input: *input,
            },
            ("InSubFilter", [attrs], [input, subquery]) => Op::InSubFilter {
                attrs: *attrs,
                input: *input,
                subquery: *subquery,
            },
            (name @ ("InnerJoin" | "LeftJoin"), [lhs, rhs], [left, right]) => Op::Join {
                kind: if name == "LeftJoin" {
                    JoinType::Left
                } else {
                    JoinType::Inner
                },
                lhs_attrs: *lhs,
                rhs_attrs: *rhs,
                left: *left,
                right: *right,
            },
            (name @ ("Union" | "Union*"), [], [left, right]) => Op::Union {
                dedup: name.ends_with('*'),
                left: *left,
                right: *right,
            },
            (name, _, _) => return Err(FragmentError::UnknownOperator(name.to_string())),
        };
        self.ops.push(op);
        Ok(id)
    }

    fn hole(&mut self) -> Result<OpId, FragmentError> {
        self.lower(&ParsedOp {
            name: "Input",
            names: vec![],
            operands: vec![],
        })
    }
}
