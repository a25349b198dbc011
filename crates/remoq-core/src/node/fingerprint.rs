#![expect(clippy::cast_possible_truncation)]

use crate::{
    node::{
        arg::{ArgValue, Record},
        ast::{Expr, MethodRef},
        types::TypeName,
    },
    value::Value,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

///
/// Expression fingerprinting
///
/// Deterministic Sha256 digest over a tagged, length-prefixed encoding of
/// the wire tree. Stable across processes, so trace sinks and caches can
/// correlate the same logical expression from both sides of the boundary.
///

///
/// ExprFingerprint
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ExprFingerprint([u8; 32]);

impl ExprFingerprint {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        let mut out = String::with_capacity(12);
        for byte in &self.0[..6] {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

impl fmt::Display for ExprFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Fingerprint a wire expression tree.
#[must_use]
pub fn fingerprint(expr: &Expr) -> ExprFingerprint {
    let mut hasher = Sha256::new();
    hasher.update(b"exprfp:v1");
    write_expr(&mut hasher, expr);

    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    ExprFingerprint::from_bytes(out)
}

fn write_expr(hasher: &mut Sha256, expr: &Expr) {
    match expr {
        Expr::Binary { op, left, right } => {
            write_tag(hasher, 0x10);
            write_tag(hasher, op.tag());
            write_expr(hasher, left);
            write_expr(hasher, right);
        }
        Expr::Unary { op, operand, ty } => {
            write_tag(hasher, 0x11);
            write_tag(hasher, op.tag());
            write_opt(hasher, ty.as_ref(), write_type);
            write_expr(hasher, operand);
        }
        Expr::Constant { ty, value } => {
            write_tag(hasher, 0x12);
            write_opt(hasher, ty.as_ref(), write_type);
            write_arg(hasher, value);
        }
        Expr::Parameter(p) => {
            write_tag(hasher, 0x13);
            write_u32(hasher, p.id.get());
            write_str(hasher, &p.name);
        }
        Expr::Member { expr, member } => {
            write_tag(hasher, 0x14);
            write_opt(hasher, expr.as_deref(), write_expr);
            write_str(hasher, &member.name);
        }
        Expr::MethodCall { method, this, args } => {
            write_tag(hasher, 0x15);
            match method {
                MethodRef::Query(op) => {
                    write_tag(hasher, 0x01);
                    write_tag(hasher, op.tag());
                }
                MethodRef::Known(m) => {
                    write_tag(hasher, 0x02);
                    write_tag(hasher, m.tag());
                }
                MethodRef::ByName(desc) => {
                    write_tag(hasher, 0x03);
                    write_str(hasher, &desc.name);
                }
            }
            write_opt(hasher, this.as_deref(), write_expr);
            write_opt_list(hasher, args.as_deref(), write_expr);
        }
        Expr::Lambda { params, body } => {
            write_tag(hasher, 0x16);
            write_opt_list(hasher, params.as_deref(), |h, p| {
                write_u32(h, p.id.get());
                write_str(h, &p.name);
            });
            write_expr(hasher, body);
        }
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => {
            write_tag(hasher, 0x17);
            write_expr(hasher, test);
            write_expr(hasher, if_true);
            write_expr(hasher, if_false);
        }
        Expr::New { ctor, args } => {
            write_tag(hasher, 0x18);
            write_type(hasher, &ctor.declaring);
            write_opt_list(hasher, args.as_deref(), write_expr);
        }
        Expr::NewArray { element, items } => {
            write_tag(hasher, 0x19);
            write_type(hasher, element);
            write_opt_list(hasher, items.as_deref(), write_expr);
        }
        Expr::MemberInit {
            ctor,
            args,
            bindings,
        } => {
            write_tag(hasher, 0x1a);
            write_type(hasher, &ctor.declaring);
            write_opt_list(hasher, args.as_deref(), write_expr);
            write_u32(hasher, bindings.len() as u32);
            for b in bindings {
                write_str(hasher, &b.member.name);
                write_expr(hasher, &b.expr);
            }
        }
        Expr::ListInit { ctor, inits } => {
            write_tag(hasher, 0x1b);
            write_type(hasher, &ctor.declaring);
            write_u32(hasher, inits.len() as u32);
            for init in inits {
                write_u32(hasher, init.args.len() as u32);
                for arg in &init.args {
                    write_expr(hasher, arg);
                }
            }
        }
        Expr::Block { vars, exprs } => {
            write_tag(hasher, 0x1c);
            write_opt_list(hasher, vars.as_deref(), |h, p| write_u32(h, p.id.get()));
            write_u32(hasher, exprs.len() as u32);
            for e in exprs {
                write_expr(hasher, e);
            }
        }
        Expr::Loop {
            body,
            break_label,
            continue_label,
        } => {
            write_tag(hasher, 0x1d);
            write_expr(hasher, body);
            write_opt(hasher, break_label.as_ref(), |h, l| write_u32(h, l.id.get()));
            write_opt(hasher, continue_label.as_ref(), |h, l| {
                write_u32(h, l.id.get());
            });
        }
        Expr::Goto {
            kind,
            target,
            value,
        } => {
            write_tag(hasher, 0x1e);
            write_tag(hasher, kind.tag());
            write_u32(hasher, target.id.get());
            write_opt(hasher, value.as_deref(), write_expr);
        }
        Expr::Label { label, default } => {
            write_tag(hasher, 0x1f);
            write_u32(hasher, label.id.get());
            write_opt(hasher, default.as_deref(), write_expr);
        }
        Expr::Try {
            body,
            handlers,
            finally,
        } => {
            write_tag(hasher, 0x20);
            write_expr(hasher, body);
            write_u32(hasher, handlers.len() as u32);
            for handler in handlers {
                write_opt(hasher, handler.ty.as_ref(), write_type);
                write_expr(hasher, &handler.body);
                write_opt(hasher, handler.filter.as_ref(), write_expr);
            }
            write_opt(hasher, finally.as_deref(), write_expr);
        }
        Expr::Switch {
            subject,
            cases,
            default,
        } => {
            write_tag(hasher, 0x21);
            write_expr(hasher, subject);
            write_u32(hasher, cases.len() as u32);
            for case in cases {
                write_u32(hasher, case.values.len() as u32);
                for v in &case.values {
                    write_expr(hasher, v);
                }
                write_expr(hasher, &case.body);
            }
            write_opt(hasher, default.as_deref(), write_expr);
        }
        Expr::Default { ty } => {
            write_tag(hasher, 0x22);
            write_type(hasher, ty);
        }
        Expr::TypeIs { expr, ty } => {
            write_tag(hasher, 0x23);
            write_expr(hasher, expr);
            write_type(hasher, ty);
        }
    }
}

fn write_arg(hasher: &mut Sha256, arg: &ArgValue) {
    match arg {
        ArgValue::Scalar(v) => {
            write_tag(hasher, 0x30);
            write_value(hasher, v);
        }
        ArgValue::Record(r) => {
            write_tag(hasher, 0x31);
            write_record(hasher, r);
        }
        ArgValue::List(xs) => {
            write_tag(hasher, 0x32);
            write_u32(hasher, xs.len() as u32);
            for x in xs {
                write_arg(hasher, x);
            }
        }
        ArgValue::Expr(e) => {
            write_tag(hasher, 0x33);
            write_expr(hasher, e);
        }
        ArgValue::Resource(r) => {
            write_tag(hasher, 0x34);
            write_type(hasher, &r.element);
        }
    }
}

fn write_record(hasher: &mut Sha256, record: &Record) {
    write_type(hasher, &record.type_name);
    write_u32(hasher, record.fields.len() as u32);
    for (name, value) in &record.fields {
        write_str(hasher, name);
        write_arg(hasher, value);
    }
}

fn write_value(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Bool(b) => {
            write_tag(hasher, 0x01);
            hasher.update([u8::from(*b)]);
        }
        Value::Int(i) => {
            write_tag(hasher, 0x02);
            hasher.update(i.to_be_bytes());
        }
        Value::Uint(u) => {
            write_tag(hasher, 0x03);
            hasher.update(u.to_be_bytes());
        }
        Value::Float(x) => {
            write_tag(hasher, 0x04);
            hasher.update(x.to_bits().to_be_bytes());
        }
        Value::BigInt(b) => {
            write_tag(hasher, 0x05);
            let (sign, bytes) = b.to_bytes_be();
            hasher.update([sign_tag(sign)]);
            write_u32(hasher, bytes.len() as u32);
            hasher.update(&bytes);
        }
        Value::Text(s) => {
            write_tag(hasher, 0x06);
            write_str(hasher, s);
        }
        Value::Char(c) => {
            write_tag(hasher, 0x07);
            write_u32(hasher, *c as u32);
        }
        Value::Bytes(b) => {
            write_tag(hasher, 0x08);
            write_u32(hasher, b.len() as u32);
            hasher.update(b);
        }
        Value::Date(d) => {
            write_tag(hasher, 0x09);
            hasher.update(d.julian_day().to_be_bytes());
        }
        Value::Timestamp(t) => {
            write_tag(hasher, 0x0a);
            hasher.update(t.unix_nanos().to_be_bytes());
        }
        Value::Ulid(u) => {
            write_tag(hasher, 0x0b);
            hasher.update(u.to_u128().to_be_bytes());
        }
        Value::Null => write_tag(hasher, 0x0c),
        Value::List(xs) => {
            write_tag(hasher, 0x0d);
            write_u32(hasher, xs.len() as u32);
            for x in xs {
                write_value(hasher, x);
            }
        }
    }
}

const fn sign_tag(sign: num_bigint::Sign) -> u8 {
    match sign {
        num_bigint::Sign::Minus => 0x00,
        num_bigint::Sign::NoSign => 0x01,
        num_bigint::Sign::Plus => 0x02,
    }
}

fn write_type(hasher: &mut Sha256, ty: &TypeName) {
    write_str(hasher, &ty.path);
    write_u32(hasher, ty.args.len() as u32);
    for arg in &ty.args {
        write_type(hasher, arg);
    }
}

fn write_opt<T>(hasher: &mut Sha256, value: Option<&T>, write: impl Fn(&mut Sha256, &T)) {
    match value {
        Some(value) => {
            hasher.update([1u8]);
            write(hasher, value);
        }
        None => hasher.update([0u8]),
    }
}

fn write_opt_list<T>(hasher: &mut Sha256, values: Option<&[T]>, write: impl Fn(&mut Sha256, &T)) {
    match values {
        Some(values) => {
            hasher.update([1u8]);
            write_u32(hasher, values.len() as u32);
            for value in values {
                write(hasher, value);
            }
        }
        None => hasher.update([0u8]),
    }
}

fn write_str(hasher: &mut Sha256, value: &str) {
    let len = u32::try_from(value.len()).unwrap_or(u32::MAX);
    hasher.update(len.to_be_bytes());
    hasher.update(value.as_bytes());
}

fn write_u32(hasher: &mut Sha256, value: u32) {
    hasher.update(value.to_be_bytes());
}

fn write_tag(hasher: &mut Sha256, tag: u8) {
    hasher.update([tag]);
}

// ============================================================================
// Tests
// ============================================================================
