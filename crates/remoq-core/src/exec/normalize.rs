use crate::{
    exec::ExecError,
    expr::{
        ast::{CallKind, Expr},
        eval::{EvalError, Evaluated, Evaluator, Item},
    },
    ops::QueryOp,
};

///
/// Single-result normalization
///
/// Chains ending in a single-result operator do not fail across the wire
/// the way a local chain fails. The terminal operator is matched
/// statically here, the chain is evaluated without it, and the outcome is
/// encoded structurally: an empty sequence when nothing matched, the two
/// witnesses when `single` found more than one, the bare element
/// otherwise. The consuming side turns the sentinel back into its typed
/// outcome because it knows which operator it issued.
///
/// Every other chain evaluates as-is, with the interpreter's own
/// diagnostics.
///

/// Evaluate an expression, normalizing a trailing single-result operator
/// into its sentinel encoding.
pub fn eval_normalized(evaluator: &mut Evaluator<'_>, expr: &Expr) -> Result<Evaluated, ExecError> {
    // mid-chain terminals keep the interpreter's own diagnostics
    if let Some((_, chain)) = expr.query_spine() {
        let mid_chain = chain.iter().rev().skip(1).any(|(op, _)| op.is_terminal());
        if mid_chain {
            return Ok(evaluator.eval(expr)?);
        }
    }

    match expr {
        Expr::Call {
            call: CallKind::Query(op),
            this: Some(prefix),
            args,
        } if op.is_single_result() => {
            let prefix = with_predicate(prefix.as_ref(), args.as_deref(), *op)?;
            let value = evaluator.eval(&prefix)?;
            let items = evaluator.materialize(value, op.name())?;
            Ok(sentinel(*op, items))
        }
        other => Ok(evaluator.eval(other)?),
    }
}

/// Reapply an optional predicate argument as a trailing `where`.
fn with_predicate(prefix: &Expr, args: Option<&[Expr]>, op: QueryOp) -> Result<Expr, ExecError> {
    match args {
        None | Some([]) => Ok(prefix.clone()),
        Some([predicate]) => Ok(Expr::call_query(
            QueryOp::Where,
            prefix.clone(),
            Some(vec![predicate.clone()]),
        )),
        Some(more) => Err(EvalError::Arity {
            method: op.name(),
            expected: 1,
            actual: more.len(),
        }
        .into()),
    }
}

fn sentinel(op: QueryOp, mut items: Vec<Item>) -> Evaluated {
    match op {
        QueryOp::First | QueryOp::FirstOrDefault => {
            if items.is_empty() {
                Evaluated::Seq(Vec::new())
            } else {
                items.swap_remove(0).into_evaluated()
            }
        }
        QueryOp::Last | QueryOp::LastOrDefault => match items.pop() {
            Some(item) => item.into_evaluated(),
            None => Evaluated::Seq(Vec::new()),
        },
        QueryOp::Single | QueryOp::SingleOrDefault => match items.len() {
            0 => Evaluated::Seq(Vec::new()),
            1 => items.swap_remove(0).into_evaluated(),
            // ambiguity ships the first two witnesses
            _ => {
                items.truncate(2);
                Evaluated::Seq(items)
            }
        },
        // is_single_result covers exactly the six operators above
        _ => Evaluated::Seq(items),
    }
}

// ============================================================================
// Tests
// ============================================================================
