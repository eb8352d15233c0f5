//! Boolean expressions over terminal symbols
//!
//! Used by the query compiler to reason about which terminals a document
//! must contain. Simplification works on negation normal form and applies
//! constant folding, flattening, idempotence, complementation and
//! absorption until nothing changes.

use std::collections::BTreeSet;

/// Index of a terminal in the compiler's symbol table
pub type SymbolId = usize;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Expr {
    Const(bool),
    Symbol(SymbolId),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

/// Upper bound on simplification passes; each pass only shrinks the tree
const MAX_PASSES: usize = 64;

/// One conjunction of literals in a DNF
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Term {
    positive: BTreeSet<SymbolId>,
    negative: BTreeSet<SymbolId>,
}

impl Term {
    fn join(&self, other: &Term) -> Term {
        Term {
            positive: self.positive.union(&other.positive).copied().collect(),
            negative: self.negative.union(&other.negative).copied().collect(),
        }
    }

    fn is_satisfiable(&self) -> bool {
        self.positive.is_disjoint(&self.negative)
    }
}

impl Expr {
    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: Expr) -> Expr {
        Expr::Not(Box::new(expr))
    }

    pub fn is_const(&self) -> Option<bool> {
        match self {
            Expr::Const(b) => Some(*b),
            _ => None,
        }
    }

    pub fn eval<F: Fn(SymbolId) -> bool>(&self, assignment: &F) -> bool {
        match self {
            Expr::Const(b) => *b,
            Expr::Symbol(s) => assignment(*s),
            Expr::Not(inner) => !inner.eval(assignment),
            Expr::And(children) => children.iter().all(|c| c.eval(assignment)),
            Expr::Or(children) => children.iter().any(|c| c.eval(assignment)),
        }
    }

    /// All symbols, in order
    pub fn symbols(&self) -> BTreeSet<SymbolId> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out, None, true);
        out
    }

    /// Symbols occurring outside any negation
    pub fn positive_symbols(&self) -> BTreeSet<SymbolId> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out, Some(true), true);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<SymbolId>, want: Option<bool>, polarity: bool) {
        match self {
            Expr::Const(_) => {}
            Expr::Symbol(s) => {
                if want.is_none_or(|w| w == polarity) {
                    out.insert(*s);
                }
            }
            Expr::Not(inner) => inner.collect_symbols(out, want, !polarity),
            Expr::And(children) | Expr::Or(children) => {
                for child in children {
                    child.collect_symbols(out, want, polarity);
                }
            }
        }
    }

    /// Push negations down to the symbols (De Morgan, double negation)
    pub fn to_nnf(self) -> Expr {
        match self {
            Expr::Not(inner) => match *inner {
                Expr::Const(b) => Expr::Const(!b),
                Expr::Symbol(s) => Expr::not(Expr::Symbol(s)),
                Expr::Not(x) => x.to_nnf(),
                Expr::And(children) => Expr::Or(
                    children
                        .into_iter()
                        .map(|c| Expr::not(c).to_nnf())
                        .collect(),
                ),
                Expr::Or(children) => Expr::And(
                    children
                        .into_iter()
                        .map(|c| Expr::not(c).to_nnf())
                        .collect(),
                ),
            },
            Expr::And(children) => Expr::And(children.into_iter().map(Expr::to_nnf).collect()),
            Expr::Or(children) => Expr::Or(children.into_iter().map(Expr::to_nnf).collect()),
            other => other,
        }
    }

    /// Equivalent, simplified expression in negation normal form
    pub fn simplify(self) -> Expr {
        let mut current = self.to_nnf();
        for _ in 0..MAX_PASSES {
            let next = current.clone().simplify_once();
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn simplify_once(self) -> Expr {
        match self {
            Expr::Not(inner) => match inner.simplify_once() {
                Expr::Const(b) => Expr::Const(!b),
                Expr::Not(x) => *x,
                other => Expr::not(other),
            },
            Expr::And(children) => simplify_junction(children, true),
            Expr::Or(children) => simplify_junction(children, false),
            other => other,
        }
    }

    /// Smallest number of distinct positive symbols in any satisfying
    /// term of the DNF. `None` when the DNF exceeds `limit` terms or no
    /// term is satisfiable.
    pub fn min_positive_support(&self, limit: usize) -> Option<usize> {
        self.clone()
            .to_nnf()
            .dnf(limit)?
            .iter()
            .filter(|t| t.is_satisfiable())
            .map(|t| t.positive.len())
            .min()
    }

    /// Cheap lower bound on `min_positive_support` (expects NNF)
    pub fn positive_lower_bound(&self) -> usize {
        match self {
            Expr::Const(_) | Expr::Not(_) => 0,
            Expr::Symbol(_) => 1,
            Expr::And(children) => children
                .iter()
                .map(Expr::positive_lower_bound)
                .max()
                .unwrap_or(0),
            Expr::Or(children) => children
                .iter()
                .map(Expr::positive_lower_bound)
                .min()
                .unwrap_or(0),
        }
    }

    /// DNF terms of an NNF expression
    fn dnf(&self, limit: usize) -> Option<Vec<Term>> {
        match self {
            Expr::Const(true) => Some(vec![Term::default()]),
            Expr::Const(false) => Some(Vec::new()),
            Expr::Symbol(s) => Some(vec![Term {
                positive: BTreeSet::from([*s]),
                negative: BTreeSet::new(),
            }]),
            Expr::Not(inner) => match inner.as_ref() {
                Expr::Symbol(s) => Some(vec![Term {
                    positive: BTreeSet::new(),
                    negative: BTreeSet::from([*s]),
                }]),
                other => Expr::not(other.clone()).to_nnf().dnf(limit),
            },
            Expr::Or(children) => {
                let mut terms = Vec::new();
                for child in children {
                    terms.extend(child.dnf(limit)?);
                    if terms.len() > limit {
                        return None;
                    }
                }
                Some(terms)
            }
            Expr::And(children) => {
                let mut acc = vec![Term::default()];
                for child in children {
                    let child_terms = child.dnf(limit)?;
                    if acc.len().saturating_mul(child_terms.len()) > limit {
                        return None;
                    }
                    acc = acc
                        .iter()
                        .flat_map(|a| child_terms.iter().map(move |b| a.join(b)))
                        .filter(Term::is_satisfiable)
                        .collect();
                }
                Some(acc)
            }
        }
    }
}

fn simplify_junction(children: Vec<Expr>, is_and: bool) -> Expr {
    let mut flat = Vec::with_capacity(children.len());
    for child in children {
        match child.simplify_once() {
            // identity element
            Expr::Const(b) if b == is_and => {}
            // annihilator
            Expr::Const(b) => return Expr::Const(b),
            Expr::And(grandchildren) if is_and => flat.extend(grandchildren),
            Expr::Or(grandchildren) if !is_and => flat.extend(grandchildren),
            other => flat.push(other),
        }
    }
    flat.sort();
    flat.dedup();

    // x and not x
    for expr in &flat {
        if let Expr::Not(inner) = expr {
            if flat.binary_search(inner).is_ok() {
                return Expr::Const(!is_and);
            }
        }
    }

    let kept: Vec<Expr> = flat
        .iter()
        .filter(|e| !is_absorbed(e, &flat, is_and))
        .cloned()
        .collect();

    match kept.len() {
        0 => Expr::Const(is_and),
        1 => kept.into_iter().next().unwrap_or(Expr::Const(is_and)),
        _ if is_and => Expr::And(kept),
        _ => Expr::Or(kept),
    }
}

/// Absorption: `a & (a | b) = a`, `(a | b) & (a | b | c) = (a | b)` and duals
fn is_absorbed(expr: &Expr, siblings: &[Expr], is_and: bool) -> bool {
    let inner = match (expr, is_and) {
        (Expr::Or(inner), true) | (Expr::And(inner), false) => inner,
        _ => return false,
    };
    siblings.iter().any(|sibling| {
        if inner.contains(sibling) {
            return true;
        }
        match (sibling, is_and) {
            (Expr::Or(other), true) | (Expr::And(other), false) => {
                sibling != expr
                    && other.len() < inner.len()
                    && other.iter().all(|x| inner.contains(x))
            }
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(id: SymbolId) -> Expr {
        Expr::Symbol(id)
    }

    fn and(children: Vec<Expr>) -> Expr {
        Expr::And(children)
    }

    fn or(children: Vec<Expr>) -> Expr {
        Expr::Or(children)
    }

    #[test]
    fn test_nnf() {
        let expr = Expr::not(and(vec![s(0), Expr::not(or(vec![s(1), s(2)]))]));
        assert_eq!(
            expr.to_nnf(),
            or(vec![Expr::not(s(0)), or(vec![s(1), s(2)])])
        );
    }

    #[test]
    fn test_simplify_idempotence_and_flattening() {
        let expr = and(vec![s(1), and(vec![s(0), s(1)]), s(0)]);
        assert_eq!(expr.simplify(), and(vec![s(0), s(1)]));
        assert_eq!(or(vec![s(3), s(3)]).simplify(), s(3));
    }

    #[test]
    fn test_simplify_absorption() {
        assert_eq!(and(vec![s(0), or(vec![s(0), s(1)])]).simplify(), s(0));
        assert_eq!(or(vec![s(0), and(vec![s(0), s(1)])]).simplify(), s(0));
        assert_eq!(
            and(vec![or(vec![s(0), s(1)]), or(vec![s(0), s(1), s(2)])]).simplify(),
            or(vec![s(0), s(1)])
        );
    }

    #[test]
    fn test_simplify_complement_and_constants() {
        assert_eq!(and(vec![s(0), Expr::not(s(0))]).simplify(), Expr::Const(false));
        assert_eq!(or(vec![s(0), Expr::not(s(0))]).simplify(), Expr::Const(true));
        assert_eq!(and(vec![s(0), Expr::Const(true)]).simplify(), s(0));
        assert_eq!(or(vec![s(0), Expr::Const(true)]).simplify(), Expr::Const(true));
        assert_eq!(Expr::not(Expr::not(s(4))).simplify(), s(4));
        assert_eq!(and(vec![]).simplify(), Expr::Const(true));
        assert_eq!(or(vec![]).simplify(), Expr::Const(false));
    }

    #[test]
    fn test_symbols() {
        let expr = and(vec![s(2), Expr::not(or(vec![s(0), s(2)])), s(1)]);
        assert_eq!(expr.symbols(), BTreeSet::from([0, 1, 2]));
        assert_eq!(expr.positive_symbols(), BTreeSet::from([1, 2]));
    }

    #[test]
    fn test_min_positive_support() {
        let union = or(vec![s(0), s(1)]);
        assert_eq!(union.min_positive_support(16), Some(1));

        let conj = and(vec![s(0), s(1), s(2)]);
        assert_eq!(conj.min_positive_support(16), Some(3));

        // a alone satisfies both disjunctions
        let shared = and(vec![or(vec![s(0), s(1)]), or(vec![s(0), s(2)])]);
        assert_eq!(shared.min_positive_support(16), Some(1));

        let negated = and(vec![s(0), Expr::not(s(1))]);
        assert_eq!(negated.min_positive_support(16), Some(1));

        assert_eq!(Expr::Const(true).min_positive_support(16), Some(0));

        // unsatisfiable, though no literal meets its complement directly
        let unsat = and(vec![Expr::not(s(0)), Expr::not(s(1)), or(vec![s(0), s(1)])]);
        assert_eq!(unsat.clone().simplify(), unsat);
        assert_eq!(unsat.min_positive_support(16), None);
    }

    #[test]
    fn test_min_positive_support_limit() {
        let wide = and((0..6).map(|i| or(vec![s(2 * i), s(2 * i + 1)])).collect());
        assert_eq!(wide.min_positive_support(16), None);
        assert_eq!(wide.min_positive_support(64), Some(6));
        assert_eq!(wide.positive_lower_bound(), 1);
    }

    #[test]
    fn test_positive_lower_bound() {
        let expr = and(vec![or(vec![s(0), and(vec![s(1), s(2)])]), Expr::not(s(3))]);
        assert_eq!(expr.positive_lower_bound(), 1);
        assert_eq!(Expr::not(s(0)).positive_lower_bound(), 0);
    }

    #[test]
    fn test_eval() {
        let expr = and(vec![s(0), or(vec![s(1), Expr::not(s(2))])]);
        assert!(expr.eval(&|id| id == 0));
        assert!(!expr.eval(&|id| id == 0 || id == 2));
        assert!(!expr.eval(&|id| id == 1));
    }
}
