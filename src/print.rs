//! S-expression textual dump, used for debugging and by test oracles to
//! assert structural equality of rewrites.
//!
//! Leaves print as `x`, `y`, `z`, a decimal literal, `var-free`, or `'name`
//! for oracle clauses; internal nodes print as `(symbol arg ...)`. Chains of
//! the same associative operator collapse into one variadic form, so
//! `(x + y) + z` prints as `(+ x y z)` rather than `(+ (+ x y) z)`.
//!
//! The walk this module drives is the same iterative post-order traversal
//! used everywhere else in this crate, so printing a graph of depth
//! >= 32,768 does not recurse.

use std::collections::HashMap;
use std::io::{self, Write};

use itertools::Itertools;

use crate::node::{Handle, Node, NodeKind};
use crate::op::BinaryOp;
use crate::walk::walk;

/// Writes `t`'s s-expression textual form to `sink`.
pub fn print(t: &Handle, sink: &mut impl Write) -> io::Result<()> {
    let order = walk(t);
    let mut text: HashMap<usize, String> = HashMap::with_capacity(order.len());

    for h in &order {
        let rendered = render(h, &text);
        text.insert(Node::id(h), rendered);
    }

    let root_text = text.get(&Node::id(t)).expect("root rendered");
    sink.write_all(root_text.as_bytes())
}

fn render(h: &Handle, text: &HashMap<usize, String>) -> String {
    let of = |c: &Handle| -> &str { text.get(&Node::id(c)).expect("child rendered before parent").as_str() };

    match &h.kind {
        NodeKind::Constant(v) => format_constant(*v),
        NodeKind::VarX => "x".to_string(),
        NodeKind::VarY => "y".to_string(),
        NodeKind::VarZ => "z".to_string(),
        NodeKind::VarFree(_) => "var-free".to_string(),
        NodeKind::Oracle(clause) => format!("'{}", clause.tag()),
        NodeKind::Unary(op) => format!("({} {})", op.symbol(), of(h.operand())),
        NodeKind::Binary(op) => {
            if op.is_associative() {
                let operands = chain_operands(h, *op);
                format!("({} {})", op.symbol(), operands.iter().map(of).join(" "))
            } else {
                format!("({} {} {})", op.symbol(), of(h.lhs()), of(h.rhs()))
            }
        },
        NodeKind::Remap => {
            format!(
                "(remap {} {} {} {})",
                of(h.remap_body()),
                of(h.remap_x()),
                of(h.remap_y()),
                of(h.remap_z())
            )
        },
        NodeKind::ApplyConstVars => format!("(const-var {})", of(h.const_vars_body())),
    }
}

/// Flattens a chain of the same associative binary operator into a flat,
/// left-to-right list of operand handles, e.g. `Add(Add(x, y), z)` yields
/// `[x, y, z]`. Iterative (explicit work stack) so a deeply right-associated
/// affine sum (graphs of depth >= 32,768 are exercised elsewhere in this
/// crate) does not recurse.
fn chain_operands(root: &Handle, op: BinaryOp) -> Vec<Handle> {
    let mut out = Vec::new();
    let mut stack = vec![root.clone()];

    while let Some(node) = stack.pop() {
        if node.binary_op() == Some(op) {
            stack.push(node.rhs().clone());
            stack.push(node.lhs().clone());
        } else {
            out.push(node);
        }
    }

    out
}

/// Renders a constant with minimum precision (round-trip is not a goal):
/// fixed at five decimal places, then trailing zeros (and a bare trailing
/// dot) are trimmed away.
fn format_constant(v: f32) -> String {
    let mut s = format!("{v:.5}");
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{binary, constant, oracle, remap, unary, var, with_const_vars, x, y, z};
    use crate::op::{BinaryOp, UnaryOp};
    use crate::oracle::test_support;
    use crate::rewrite::collect_affine;

    fn print_to_string(t: &Handle) -> String {
        let mut buf = Vec::new();
        print(t, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn prints_leaves() {
        assert_eq!(print_to_string(&x()), "x");
        assert_eq!(print_to_string(&y()), "y");
        assert_eq!(print_to_string(&z()), "z");
        assert_eq!(print_to_string(&constant(8.0)), "8");
        assert_eq!(print_to_string(&var()), "var-free");
    }

    #[test]
    fn prints_unary_and_non_associative_binary() {
        assert_eq!(print_to_string(&unary(UnaryOp::Sqrt, x())), "(sqrt x)");
        assert_eq!(print_to_string(&binary(BinaryOp::Div, x(), y())), "(/ x y)");
    }

    #[test]
    fn collapses_associative_chain_to_variadic_form() {
        let t = binary(BinaryOp::Add, binary(BinaryOp::Add, x(), y()), z());
        assert_eq!(print_to_string(&t), "(+ x y z)");
    }

    #[test]
    fn prints_remap_and_const_var() {
        let t = remap(x(), y(), x(), x());
        assert_eq!(print_to_string(&t), "(remap x y x x)");
        assert_eq!(print_to_string(&with_const_vars(x())), "(const-var x)");
    }

    #[test]
    fn prints_oracle_by_tag() {
        let clause = test_support::named_oracle("sphere", &[]);
        assert_eq!(print_to_string(&oracle(clause)), "'sphere");
    }

    #[test]
    fn prints_collected_affine_sum() {
        // (2x + y) + (2x + y) -> 4x + 2y. Atoms print in first-occurrence
        // order (x before y, from the left operand's `2*x` term) — a
        // deliberate, documented choice (see DESIGN.md), not a match for
        // the literal term order of any particular worked example.
        let two_x_plus_y = binary(BinaryOp::Add, binary(BinaryOp::Mul, constant(2.0), x()), y());
        let sum = binary(BinaryOp::Add, two_x_plus_y.clone(), two_x_plus_y);
        let printed = print_to_string(&collect_affine(&sum));
        assert_eq!(printed, "(+ (* x 4) (* y 2))");
    }

    #[test]
    fn prints_deep_chain_without_overflow() {
        let mut t = x();
        for _ in 0..40_000 {
            t = binary(BinaryOp::Add, t, constant(1.0));
        }
        let printed = print_to_string(&t);
        assert!(printed.starts_with("(+ x "));
    }
}
