use crate::{ops::BinaryOp, value::Value};
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};
use thiserror::Error as ThisError;

///
/// Arithmetic
///
/// Checked numeric evaluation for the interpreter. Same-variant integer
/// operations stay in their variant and fail on overflow; mixed integral
/// operands widen to `BigInt`; any float operand drops both sides to `f64`.
///

///
/// ArithError
///

#[derive(Debug, ThisError)]
pub enum ArithError {
    #[error("operator {op} not defined for {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("operator {op} not defined for {operand}")]
    UnaryTypeMismatch {
        op: &'static str,
        operand: &'static str,
    },

    #[error("division by zero")]
    DivideByZero,

    #[error("integer overflow in {op}")]
    Overflow { op: &'static str },

    #[error("shift amount out of range")]
    ShiftRange,
}

enum Num {
    Int(i64),
    Uint(u64),
    Big(BigInt),
    Float(f64),
}

fn lift(value: &Value) -> Option<Num> {
    match value {
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Uint(u) => Some(Num::Uint(*u)),
        Value::BigInt(b) => Some(Num::Big(b.clone())),
        Value::Float(x) => Some(Num::Float(*x)),
        _ => None,
    }
}

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> ArithError {
    ArithError::TypeMismatch {
        op: op.symbol(),
        left: left.type_label(),
        right: right.type_label(),
    }
}

/// Evaluate an arithmetic operator over two values.
///
/// `Add` doubles as text and list concatenation, matching what the builder
/// DSL produces for those operand types.
pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ArithError> {
    // concatenation forms first
    if op == BinaryOp::Add {
        if let (Value::Text(a), Value::Text(b)) = (left, right) {
            return Ok(Value::Text(format!("{a}{b}")));
        }
        if let (Value::List(a), Value::List(b)) = (left, right) {
            let mut out = a.clone();
            out.extend(b.iter().cloned());
            return Ok(Value::List(out));
        }
    }

    if op.is_bitwise() {
        return bitwise(op, left, right);
    }

    let (l, r) = match (lift(left), lift(right)) {
        (Some(l), Some(r)) => (l, r),
        _ => return Err(mismatch(op, left, right)),
    };

    match (l, r) {
        (Num::Int(a), Num::Int(b)) => int_binary(op, a, b),
        (Num::Uint(a), Num::Uint(b)) => uint_binary(op, a, b),
        (Num::Float(a), Num::Float(b)) => float_binary(op, a, b),
        (Num::Float(a), b) => float_binary(op, a, to_f64(&b)),
        (a, Num::Float(b)) => float_binary(op, to_f64(&a), b),
        // remaining mixes are integral; widen to BigInt
        (a, b) => big_binary(op, to_big(a), to_big(b)),
    }
}

fn to_f64(n: &Num) -> f64 {
    match n {
        Num::Int(i) => *i as f64,
        Num::Uint(u) => *u as f64,
        Num::Big(b) => b.to_f64().unwrap_or(if b.is_negative() {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        }),
        Num::Float(x) => *x,
    }
}

fn to_big(n: Num) -> BigInt {
    match n {
        Num::Int(i) => BigInt::from(i),
        Num::Uint(u) => BigInt::from(u),
        Num::Big(b) => b,
        // callers split floats off before widening
        Num::Float(x) => BigInt::from(x as i64),
    }
}

fn int_binary(op: BinaryOp, a: i64, b: i64) -> Result<Value, ArithError> {
    let out = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return Err(ArithError::DivideByZero);
            }
            a.checked_div(b)
        }
        BinaryOp::Rem => {
            if b == 0 {
                return Err(ArithError::DivideByZero);
            }
            a.checked_rem(b)
        }
        BinaryOp::Pow => {
            let exp = u32::try_from(b).map_err(|_| ArithError::Overflow { op: "**" })?;
            a.checked_pow(exp)
        }
        _ => None,
    };

    out.map(Value::Int).ok_or(ArithError::Overflow { op: op.symbol() })
}

fn uint_binary(op: BinaryOp, a: u64, b: u64) -> Result<Value, ArithError> {
    let out = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return Err(ArithError::DivideByZero);
            }
            a.checked_div(b)
        }
        BinaryOp::Rem => {
            if b == 0 {
                return Err(ArithError::DivideByZero);
            }
            a.checked_rem(b)
        }
        BinaryOp::Pow => {
            let exp = u32::try_from(b).map_err(|_| ArithError::Overflow { op: "**" })?;
            a.checked_pow(exp)
        }
        _ => None,
    };

    out.map(Value::Uint).ok_or(ArithError::Overflow { op: op.symbol() })
}

fn float_binary(op: BinaryOp, a: f64, b: f64) -> Result<Value, ArithError> {
    let out = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(ArithError::DivideByZero);
            }
            a / b
        }
        BinaryOp::Rem => {
            if b == 0.0 {
                return Err(ArithError::DivideByZero);
            }
            a % b
        }
        BinaryOp::Pow => a.powf(b),
        _ => {
            return Err(ArithError::TypeMismatch {
                op: op.symbol(),
                left: "float",
                right: "float",
            });
        }
    };

    Ok(Value::Float(out))
}

fn big_binary(op: BinaryOp, a: BigInt, b: BigInt) -> Result<Value, ArithError> {
    use num_bigint::Sign;

    let out = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b.sign() == Sign::NoSign {
                return Err(ArithError::DivideByZero);
            }
            a / b
        }
        BinaryOp::Rem => {
            if b.sign() == Sign::NoSign {
                return Err(ArithError::DivideByZero);
            }
            a % b
        }
        BinaryOp::Pow => {
            let exp = b.to_u32().ok_or(ArithError::Overflow { op: "**" })?;
            a.pow(exp)
        }
        _ => {
            return Err(ArithError::TypeMismatch {
                op: op.symbol(),
                left: "bigint",
                right: "bigint",
            });
        }
    };

    Ok(Value::BigInt(out))
}

fn bitwise(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ArithError> {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => {
            let out = match op {
                BinaryOp::BitAnd => a & b,
                BinaryOp::BitOr => a | b,
                BinaryOp::BitXor => a ^ b,
                _ => return Err(mismatch(op, left, right)),
            };
            Ok(Value::Bool(out))
        }
        (Value::Int(a), Value::Int(b)) => {
            let out = match op {
                BinaryOp::BitAnd => *a & *b,
                BinaryOp::BitOr => *a | *b,
                BinaryOp::BitXor => *a ^ *b,
                BinaryOp::Shl => shift(*b)?.and_then(|s| a.checked_shl(s)).ok_or(
                    ArithError::ShiftRange,
                )?,
                BinaryOp::Shr => shift(*b)?.and_then(|s| a.checked_shr(s)).ok_or(
                    ArithError::ShiftRange,
                )?,
                _ => return Err(mismatch(op, left, right)),
            };
            Ok(Value::Int(out))
        }
        (Value::Uint(a), Value::Uint(b)) => {
            let out = match op {
                BinaryOp::BitAnd => *a & *b,
                BinaryOp::BitOr => *a | *b,
                BinaryOp::BitXor => *a ^ *b,
                BinaryOp::Shl => u32::try_from(*b)
                    .ok()
                    .and_then(|s| a.checked_shl(s))
                    .ok_or(ArithError::ShiftRange)?,
                BinaryOp::Shr => u32::try_from(*b)
                    .ok()
                    .and_then(|s| a.checked_shr(s))
                    .ok_or(ArithError::ShiftRange)?,
                _ => return Err(mismatch(op, left, right)),
            };
            Ok(Value::Uint(out))
        }
        _ => Err(mismatch(op, left, right)),
    }
}

fn shift(amount: i64) -> Result<Option<u32>, ArithError> {
    if amount < 0 {
        return Err(ArithError::ShiftRange);
    }

    Ok(u32::try_from(amount).ok())
}

/// Arithmetic negation.
pub fn neg(value: &Value) -> Result<Value, ArithError> {
    match value {
        Value::Int(i) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or(ArithError::Overflow { op: "-" }),
        Value::Uint(u) => i64::try_from(*u)
            .ok()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or(ArithError::Overflow { op: "-" }),
        Value::Float(x) => Ok(Value::Float(-x)),
        Value::BigInt(b) => Ok(Value::BigInt(-b.clone())),
        other => Err(ArithError::UnaryTypeMismatch {
            op: "-",
            operand: other.type_label(),
        }),
    }
}

/// Bitwise complement.
pub fn bit_not(value: &Value) -> Result<Value, ArithError> {
    match value {
        Value::Int(i) => Ok(Value::Int(!i)),
        Value::Uint(u) => Ok(Value::Uint(!u)),
        Value::Bool(b) => Ok(Value::Bool(!b)),
        other => Err(ArithError::UnaryTypeMismatch {
            op: "~",
            operand: other.type_label(),
        }),
    }
}

/// Absolute value, used by the `abs` known method.
pub fn abs(value: &Value) -> Result<Value, ArithError> {
    match value {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or(ArithError::Overflow { op: "abs" }),
        Value::Uint(u) => Ok(Value::Uint(*u)),
        Value::Float(x) => Ok(Value::Float(x.abs())),
        Value::BigInt(b) => Ok(Value::BigInt(b.abs())),
        other => Err(ArithError::UnaryTypeMismatch {
            op: "abs",
            operand: other.type_label(),
        }),
    }
}
