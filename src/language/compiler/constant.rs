use crate::language::ast::{BinaryOp, UnaryOp};
use crate::language::types::{Kind, Type, Universe};
use crate::runtime::value::{Complex, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Exact compile-time value. Integers are held in 128 bits so every
/// 64-bit kind can be range checked before conversion.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
    Bool(bool),
    Int(i128),
    Float(f64),
    Complex(f64, f64),
    String(Arc<str>),
    Nil,
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Bool(v) => write!(f, "{v}"),
            ConstValue::Int(v) => write!(f, "{v}"),
            ConstValue::Float(v) => write!(f, "{v}"),
            ConstValue::Complex(re, im) => write!(f, "({re} + {im}i)"),
            ConstValue::String(v) => write!(f, "{v:?}"),
            ConstValue::Nil => write!(f, "nil"),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConstError {
    #[error("constant {value} overflows {ty}")]
    Overflow { value: String, ty: String },
    #[error("constant {value} truncated to integer")]
    Truncated { value: String },
    #[error("cannot use {value} ({from} constant) as type {to}")]
    Mismatch {
        value: String,
        from: String,
        to: String,
    },
    #[error("division by zero")]
    DivideByZero,
    #[error("{0}")]
    Invalid(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Class {
    Bool,
    String,
    Nil,
    Int,
    Float,
    Complex,
}

fn class_of(kind: Kind) -> Option<Class> {
    Some(match kind {
        Kind::Bool | Kind::UntypedBool => Class::Bool,
        Kind::String | Kind::UntypedString => Class::String,
        Kind::UntypedNil => Class::Nil,
        Kind::UntypedInt | Kind::UntypedRune => Class::Int,
        Kind::UntypedFloat => Class::Float,
        Kind::UntypedComplex => Class::Complex,
        k if k.is_integer() => Class::Int,
        k if k.is_float() => Class::Float,
        k if k.is_complex() => Class::Complex,
        _ => return None,
    })
}

fn untyped_rank(kind: Kind) -> u8 {
    match kind {
        Kind::UntypedInt => 1,
        Kind::UntypedRune => 2,
        Kind::UntypedFloat => 3,
        Kind::UntypedComplex => 4,
        _ => 0,
    }
}

fn int_range(kind: Kind) -> (i128, i128) {
    match kind {
        Kind::Int8 => (i8::MIN.into(), i8::MAX.into()),
        Kind::Int16 => (i16::MIN.into(), i16::MAX.into()),
        Kind::Int32 => (i32::MIN.into(), i32::MAX.into()),
        Kind::Int | Kind::Int64 => (i64::MIN.into(), i64::MAX.into()),
        Kind::Uint8 => (0, u8::MAX.into()),
        Kind::Uint16 => (0, u16::MAX.into()),
        Kind::Uint32 => (0, u32::MAX.into()),
        Kind::Uint | Kind::Uint64 | Kind::Uintptr => (0, u64::MAX.into()),
        _ => (i128::MIN, i128::MAX),
    }
}

/// Brings `value` into `class`, or `None` when the value is not exactly
/// representable there.
fn coerce(value: &ConstValue, class: Class) -> Option<ConstValue> {
    match (value, class) {
        (ConstValue::Int(v), Class::Int) => Some(ConstValue::Int(*v)),
        (ConstValue::Int(v), Class::Float) => Some(ConstValue::Float(*v as f64)),
        (ConstValue::Int(v), Class::Complex) => Some(ConstValue::Complex(*v as f64, 0.0)),
        (ConstValue::Float(v), Class::Int) => float_to_int(*v).map(ConstValue::Int),
        (ConstValue::Float(v), Class::Float) => Some(ConstValue::Float(*v)),
        (ConstValue::Float(v), Class::Complex) => Some(ConstValue::Complex(*v, 0.0)),
        (ConstValue::Complex(re, im), Class::Int) if *im == 0.0 => {
            float_to_int(*re).map(ConstValue::Int)
        }
        (ConstValue::Complex(re, im), Class::Float) if *im == 0.0 => Some(ConstValue::Float(*re)),
        (ConstValue::Complex(re, im), Class::Complex) => Some(ConstValue::Complex(*re, *im)),
        (ConstValue::Bool(v), Class::Bool) => Some(ConstValue::Bool(*v)),
        (ConstValue::String(v), Class::String) => Some(ConstValue::String(Arc::clone(v))),
        (ConstValue::Nil, Class::Nil) => Some(ConstValue::Nil),
        _ => None,
    }
}

fn float_to_int(value: f64) -> Option<i128> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1.7e38 {
        Some(value as i128)
    } else {
        None
    }
}

#[derive(Clone, Debug)]
pub struct Constant {
    pub ty: Type,
    pub value: ConstValue,
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl Constant {
    pub fn new(ty: Type, value: ConstValue) -> Self {
        Self { ty, value }
    }

    /// An untyped constant whose type follows from the value.
    pub fn untyped(universe: &Universe, value: ConstValue) -> Self {
        let kind = match &value {
            ConstValue::Bool(_) => Kind::UntypedBool,
            ConstValue::Int(_) => Kind::UntypedInt,
            ConstValue::Float(_) => Kind::UntypedFloat,
            ConstValue::Complex(..) => Kind::UntypedComplex,
            ConstValue::String(_) => Kind::UntypedString,
            ConstValue::Nil => Kind::UntypedNil,
        };
        let ty = universe
            .untyped(kind)
            .unwrap_or_else(|| universe.int_type());
        Self { ty, value }
    }

    pub fn rune(universe: &Universe, ch: char) -> Self {
        let ty = universe
            .untyped(Kind::UntypedRune)
            .unwrap_or_else(|| universe.int_type());
        Self {
            ty,
            value: ConstValue::Int(i128::from(u32::from(ch))),
        }
    }

    pub fn is_untyped(&self) -> bool {
        self.ty.kind().is_untyped()
    }

    pub fn as_int(&self) -> Option<i128> {
        match coerce(&self.value, Class::Int)? {
            ConstValue::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            ConstValue::Bool(v) => Some(v),
            _ => None,
        }
    }

    fn mismatch(&self, target: &Type) -> ConstError {
        ConstError::Mismatch {
            value: self.value.to_string(),
            from: self.ty.to_string(),
            to: target.to_string(),
        }
    }

    /// Implicit conversion of the constant to `target`, as performed for
    /// assignment, send and operands of binary operations.
    pub fn const_to(&self, target: &Type, universe: &Universe) -> Result<Constant, ConstError> {
        let kind = target.kind();
        if kind == Kind::Interface {
            if self.value == ConstValue::Nil {
                return Ok(Constant::new(target.clone(), ConstValue::Nil));
            }
            if !target.methods().is_empty() {
                return Err(self.mismatch(target));
            }
            let default = universe.default_type(&self.ty);
            return self.const_to(&default, universe);
        }
        if !self.is_untyped() && !self.ty.identical(target) {
            if self.ty.underlying().identical(&target.underlying())
                && !(self.ty.is_named() && target.is_named())
            {
                return Ok(Constant::new(target.clone(), self.value.clone()));
            }
            return Err(self.mismatch(target));
        }
        if self.value == ConstValue::Nil {
            return if kind.is_nillable() || kind == Kind::UntypedNil {
                Ok(Constant::new(target.clone(), ConstValue::Nil))
            } else {
                Err(self.mismatch(target))
            };
        }
        let class = class_of(kind).ok_or_else(|| self.mismatch(target))?;
        let source_class = class_of(self.ty.kind()).ok_or_else(|| self.mismatch(target))?;
        let numeric = |c: Class| matches!(c, Class::Int | Class::Float | Class::Complex);
        if class != source_class && !(numeric(class) && numeric(source_class)) {
            return Err(self.mismatch(target));
        }
        let value = coerce(&self.value, class).ok_or_else(|| match class {
            Class::Int => ConstError::Truncated {
                value: self.value.to_string(),
            },
            _ => self.mismatch(target),
        })?;
        Ok(Constant::new(target.clone(), represent(value, target)?))
    }

    /// Explicit conversion `T(c)`. Adds integer to string conversion on top
    /// of the implicit rules.
    pub fn convert(&self, target: &Type, universe: &Universe) -> Result<Constant, ConstError> {
        if target.kind() == Kind::String {
            if let (ConstValue::Int(code), Some(Class::Int)) =
                (&self.value, class_of(self.ty.kind()))
            {
                let ch = u32::try_from(*code)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or('\u{FFFD}');
                return Ok(Constant::new(
                    target.clone(),
                    ConstValue::String(Arc::from(ch.to_string())),
                ));
            }
        }
        if !self.is_untyped() && self.ty.convertible_to(target) {
            if let Some(value) = class_of(target.kind()).and_then(|class| coerce(&self.value, class))
            {
                return Ok(Constant::new(target.clone(), represent(value, target)?));
            }
            return Constant::untyped(universe, self.value.clone()).const_to(target, universe);
        }
        self.const_to(target, universe)
    }

    /// Runtime value of the constant; untyped constants take their default type.
    pub fn to_value(&self, universe: &Universe) -> Value {
        let ty = if self.is_untyped() {
            universe.default_type(&self.ty)
        } else {
            self.ty.clone()
        };
        const_value(&self.value, ty.kind())
    }
}

/// Range checks `value` against the kind of `target`, rounding float32.
fn represent(value: ConstValue, target: &Type) -> Result<ConstValue, ConstError> {
    let kind = target.kind();
    match value {
        ConstValue::Int(v) if kind.is_integer() => {
            let (min, max) = int_range(kind);
            if v < min || v > max {
                return Err(ConstError::Overflow {
                    value: v.to_string(),
                    ty: target.to_string(),
                });
            }
            Ok(ConstValue::Int(v))
        }
        ConstValue::Float(v) if kind == Kind::Float32 || kind == Kind::Complex64 => {
            if v.is_finite() && v.abs() > f64::from(f32::MAX) {
                return Err(ConstError::Overflow {
                    value: v.to_string(),
                    ty: target.to_string(),
                });
            }
            Ok(ConstValue::Float(v as f32 as f64))
        }
        ConstValue::Complex(re, im) if kind == Kind::Complex64 => {
            Ok(ConstValue::Complex(re as f32 as f64, im as f32 as f64))
        }
        other => Ok(other),
    }
}

fn const_value(value: &ConstValue, kind: Kind) -> Value {
    match (value, kind) {
        (ConstValue::Bool(v), _) => Value::Bool(*v),
        (ConstValue::String(v), _) => Value::String(Arc::clone(v)),
        (ConstValue::Nil, _) => Value::Nil,
        (ConstValue::Int(v), kind) => int_value(*v, kind),
        (ConstValue::Float(v), Kind::Float32) => Value::Float32(*v as f32),
        (ConstValue::Float(v), Kind::Complex64) => Value::Complex64(Complex::new(*v as f32, 0.0)),
        (ConstValue::Float(v), Kind::Complex128) => Value::Complex128(Complex::new(*v, 0.0)),
        (ConstValue::Float(v), _) => Value::Float64(*v),
        (ConstValue::Complex(re, im), Kind::Complex64) => {
            Value::Complex64(Complex::new(*re as f32, *im as f32))
        }
        (ConstValue::Complex(re, im), _) => Value::Complex128(Complex::new(*re, *im)),
    }
}

pub(super) fn int_value(v: i128, kind: Kind) -> Value {
    match kind {
        Kind::Int8 => Value::Int8(v as i8),
        Kind::Int16 => Value::Int16(v as i16),
        Kind::Int32 => Value::Int32(v as i32),
        Kind::Int64 => Value::Int64(v as i64),
        Kind::Uint => Value::Uint(v as u64),
        Kind::Uint8 => Value::Uint8(v as u8),
        Kind::Uint16 => Value::Uint16(v as u16),
        Kind::Uint32 => Value::Uint32(v as u32),
        Kind::Uint64 => Value::Uint64(v as u64),
        Kind::Uintptr => Value::Uintptr(v as u64),
        Kind::Float32 => Value::Float32(v as f32),
        Kind::Float64 => Value::Float64(v as f64),
        Kind::Complex64 => Value::Complex64(Complex::new(v as f32, 0.0)),
        Kind::Complex128 => Value::Complex128(Complex::new(v as f64, 0.0)),
        _ => Value::Int(v as i64),
    }
}

/// Type of a binary operation on two constants, or `None` when the operand
/// types do not match.
fn operand_type(a: &Constant, b: &Constant) -> Option<Type> {
    match (a.is_untyped(), b.is_untyped()) {
        (false, false) => a.ty.identical(&b.ty).then(|| a.ty.clone()),
        (false, true) => Some(a.ty.clone()),
        (true, false) => Some(b.ty.clone()),
        (true, true) => {
            let (ka, kb) = (a.ty.kind(), b.ty.kind());
            Some(if untyped_rank(kb) > untyped_rank(ka) {
                b.ty.clone()
            } else {
                a.ty.clone()
            })
        }
    }
}

pub fn fold_binary(
    op: BinaryOp,
    a: &Constant,
    b: &Constant,
    universe: &Universe,
) -> Result<Constant, ConstError> {
    if op.is_shift() {
        return fold_shift(op, a, b, universe);
    }
    let ty = operand_type(a, b).ok_or_else(|| {
        ConstError::Invalid(format!(
            "invalid operation: mismatched types {} and {}",
            a.ty, b.ty
        ))
    })?;
    let a = a.const_to(&ty, universe)?;
    let b = b.const_to(&ty, universe)?;
    let class = class_of(ty.kind())
        .ok_or_else(|| ConstError::Invalid(format!("invalid constant type {ty}")))?;
    let (x, y) = (&a.value, &b.value);

    if op.is_comparison() {
        let result = compare(op, x, y).ok_or_else(|| {
            ConstError::Invalid(format!(
                "invalid operation: operator {} not defined on {ty}",
                op.symbol()
            ))
        })?;
        return Ok(Constant::untyped(universe, ConstValue::Bool(result)));
    }

    let undefined = || {
        ConstError::Invalid(format!(
            "invalid operation: operator {} not defined on {x} ({ty} constant)",
            op.symbol()
        ))
    };
    if !matches!(class, Class::Int | Class::Float | Class::Complex | Class::Bool | Class::String) {
        return Err(undefined());
    }
    let value = match (x, y) {
        (ConstValue::Bool(p), ConstValue::Bool(q)) => match op {
            BinaryOp::And => ConstValue::Bool(*p && *q),
            BinaryOp::Or => ConstValue::Bool(*p || *q),
            _ => return Err(undefined()),
        },
        (ConstValue::String(p), ConstValue::String(q)) => match op {
            BinaryOp::Add => ConstValue::String(Arc::from(format!("{p}{q}"))),
            _ => return Err(undefined()),
        },
        (ConstValue::Int(p), ConstValue::Int(q)) => {
            let overflow = || ConstError::Overflow {
                value: format!("{p} {} {q}", op.symbol()),
                ty: ty.to_string(),
            };
            ConstValue::Int(match op {
                BinaryOp::Add => p.checked_add(*q).ok_or_else(overflow)?,
                BinaryOp::Sub => p.checked_sub(*q).ok_or_else(overflow)?,
                BinaryOp::Mul => p.checked_mul(*q).ok_or_else(overflow)?,
                BinaryOp::Div if *q == 0 => return Err(ConstError::DivideByZero),
                BinaryOp::Div => p / q,
                BinaryOp::Rem if *q == 0 => return Err(ConstError::DivideByZero),
                BinaryOp::Rem => p % q,
                BinaryOp::BitAnd => p & q,
                BinaryOp::BitOr => p | q,
                BinaryOp::BitXor => p ^ q,
                BinaryOp::AndNot => p & !q,
                _ => return Err(undefined()),
            })
        }
        (ConstValue::Float(p), ConstValue::Float(q)) => ConstValue::Float(match op {
            BinaryOp::Add => p + q,
            BinaryOp::Sub => p - q,
            BinaryOp::Mul => p * q,
            BinaryOp::Div if *q == 0.0 => return Err(ConstError::DivideByZero),
            BinaryOp::Div => p / q,
            _ => return Err(undefined()),
        }),
        (ConstValue::Complex(pr, pi), ConstValue::Complex(qr, qi)) => {
            let (p, q) = (Complex::new(*pr, *pi), Complex::new(*qr, *qi));
            let r = match op {
                BinaryOp::Add => p + q,
                BinaryOp::Sub => p - q,
                BinaryOp::Mul => p * q,
                BinaryOp::Div if *qr == 0.0 && *qi == 0.0 => {
                    return Err(ConstError::DivideByZero)
                }
                BinaryOp::Div => p / q,
                _ => return Err(undefined()),
            };
            ConstValue::Complex(r.re, r.im)
        }
        _ => return Err(undefined()),
    };
    Ok(Constant::new(ty.clone(), represent(value, &ty)?))
}

fn compare(op: BinaryOp, x: &ConstValue, y: &ConstValue) -> Option<bool> {
    use std::cmp::Ordering;
    let ordering = match (x, y) {
        (ConstValue::Int(p), ConstValue::Int(q)) => p.partial_cmp(q),
        (ConstValue::Float(p), ConstValue::Float(q)) => p.partial_cmp(q),
        (ConstValue::String(p), ConstValue::String(q)) => p.partial_cmp(q),
        (ConstValue::Bool(p), ConstValue::Bool(q)) => {
            return match op {
                BinaryOp::Eq => Some(p == q),
                BinaryOp::NotEq => Some(p != q),
                _ => None,
            }
        }
        (ConstValue::Complex(..), ConstValue::Complex(..)) | (ConstValue::Nil, ConstValue::Nil) => {
            return match op {
                BinaryOp::Eq => Some(x == y),
                BinaryOp::NotEq => Some(x != y),
                _ => None,
            }
        }
        _ => None,
    }?;
    Some(match op {
        BinaryOp::Eq => ordering == Ordering::Equal,
        BinaryOp::NotEq => ordering != Ordering::Equal,
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::LtEq => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::GtEq => ordering != Ordering::Less,
        _ => return None,
    })
}

fn fold_shift(
    op: BinaryOp,
    a: &Constant,
    count: &Constant,
    universe: &Universe,
) -> Result<Constant, ConstError> {
    let count = count
        .as_int()
        .filter(|c| *c >= 0)
        .ok_or_else(|| ConstError::Invalid(format!("invalid shift count {count}")))?;
    let value = a.as_int().ok_or_else(|| {
        ConstError::Invalid(format!("invalid operation: shifted operand {a} must be integer"))
    })?;
    let ty = if a.is_untyped() {
        universe
            .untyped(Kind::UntypedInt)
            .unwrap_or_else(|| a.ty.clone())
    } else {
        a.ty.clone()
    };
    let result = match op {
        BinaryOp::Shl => {
            if count >= 127 || value.unsigned_abs().leading_zeros() as i128 <= count {
                if value == 0 {
                    0
                } else {
                    return Err(ConstError::Overflow {
                        value: format!("{value} << {count}"),
                        ty: ty.to_string(),
                    });
                }
            } else {
                value << count
            }
        }
        _ => {
            if count >= 127 {
                if value < 0 {
                    -1
                } else {
                    0
                }
            } else {
                value >> count
            }
        }
    };
    Ok(Constant::new(ty.clone(), represent(ConstValue::Int(result), &ty)?))
}

pub fn fold_unary(op: UnaryOp, c: &Constant) -> Result<Constant, ConstError> {
    let invalid = || {
        ConstError::Invalid(format!(
            "invalid operation: operator {} not defined on {c} ({} constant)",
            op.symbol(),
            c.ty
        ))
    };
    let value = match (op, &c.value) {
        (UnaryOp::Plus, ConstValue::Int(_) | ConstValue::Float(_) | ConstValue::Complex(..)) => {
            c.value.clone()
        }
        (UnaryOp::Neg, ConstValue::Int(v)) => ConstValue::Int(-v),
        (UnaryOp::Neg, ConstValue::Float(v)) => ConstValue::Float(-v),
        (UnaryOp::Neg, ConstValue::Complex(re, im)) => ConstValue::Complex(-re, -im),
        (UnaryOp::Not, ConstValue::Bool(v)) => ConstValue::Bool(!v),
        (UnaryOp::BitNot, ConstValue::Int(v)) => {
            let kind = c.ty.kind();
            if kind.is_unsigned() {
                let (_, max) = int_range(kind);
                ConstValue::Int(max ^ v)
            } else {
                ConstValue::Int(!v)
            }
        }
        _ => return Err(invalid()),
    };
    Ok(Constant::new(c.ty.clone(), represent(value, &c.ty)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn untyped_int(universe: &Universe, v: i128) -> Constant {
        Constant::untyped(universe, ConstValue::Int(v))
    }

    #[test]
    fn untyped_int_converts_within_range() {
        let universe = Universe::new();
        let uint8 = universe.basic(Kind::Uint8).unwrap();
        let c = untyped_int(&universe, 255).const_to(&uint8, &universe).unwrap();
        assert_eq!(c.ty, uint8);
        assert!(matches!(c.to_value(&universe), Value::Uint8(255)));
    }

    #[test]
    fn overflow_is_reported() {
        let universe = Universe::new();
        let uint8 = universe.basic(Kind::Uint8).unwrap();
        let err = untyped_int(&universe, 300)
            .const_to(&uint8, &universe)
            .unwrap_err();
        assert_eq!(err.to_string(), "constant 300 overflows uint8");
    }

    #[test]
    fn float_constant_must_be_integral_for_int() {
        let universe = Universe::new();
        let int = universe.int_type();
        let exact = Constant::untyped(&universe, ConstValue::Float(4.0));
        assert_eq!(exact.const_to(&int, &universe).unwrap().as_int(), Some(4));
        let fraction = Constant::untyped(&universe, ConstValue::Float(1.5));
        assert!(matches!(
            fraction.const_to(&int, &universe),
            Err(ConstError::Truncated { .. })
        ));
    }

    #[test]
    fn string_constant_does_not_convert_to_int() {
        let universe = Universe::new();
        let s = Constant::untyped(&universe, ConstValue::String(Arc::from("x")));
        let err = s.const_to(&universe.int_type(), &universe).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot use \"x\" (untyped string constant) as type int"
        );
    }

    #[test]
    fn untyped_arithmetic_promotes_rank() {
        let universe = Universe::new();
        let sum = fold_binary(
            BinaryOp::Add,
            &untyped_int(&universe, 1),
            &Constant::untyped(&universe, ConstValue::Float(0.5)),
            &universe,
        )
        .unwrap();
        assert_eq!(sum.ty.kind(), Kind::UntypedFloat);
        assert_eq!(sum.value, ConstValue::Float(1.5));

        let quotient = fold_binary(
            BinaryOp::Div,
            &untyped_int(&universe, 7),
            &untyped_int(&universe, 2),
            &universe,
        )
        .unwrap();
        assert_eq!(quotient.value, ConstValue::Int(3));
    }

    #[test]
    fn typed_arithmetic_checks_range() {
        let universe = Universe::new();
        let int8 = universe.basic(Kind::Int8).unwrap();
        let a = Constant::new(int8.clone(), ConstValue::Int(100));
        let err = fold_binary(BinaryOp::Add, &a, &untyped_int(&universe, 100), &universe)
            .unwrap_err();
        assert!(matches!(err, ConstError::Overflow { .. }));
    }

    #[test]
    fn comparison_yields_untyped_bool() {
        let universe = Universe::new();
        let c = fold_binary(
            BinaryOp::Lt,
            &untyped_int(&universe, 1),
            &untyped_int(&universe, 2),
            &universe,
        )
        .unwrap();
        assert_eq!(c.ty.kind(), Kind::UntypedBool);
        assert_eq!(c.as_bool(), Some(true));
    }

    #[test]
    fn shifts_and_complement() {
        let universe = Universe::new();
        let shifted = fold_binary(
            BinaryOp::Shl,
            &untyped_int(&universe, 1),
            &untyped_int(&universe, 10),
            &universe,
        )
        .unwrap();
        assert_eq!(shifted.as_int(), Some(1024));

        let uint8 = universe.basic(Kind::Uint8).unwrap();
        let c = Constant::new(uint8, ConstValue::Int(0x0f));
        let flipped = fold_unary(UnaryOp::BitNot, &c).unwrap();
        assert_eq!(flipped.as_int(), Some(0xf0));
    }

    #[test]
    fn integer_converts_to_string() {
        let universe = Universe::new();
        let c = untyped_int(&universe, 65)
            .convert(&universe.string_type(), &universe)
            .unwrap();
        assert_eq!(c.value, ConstValue::String(Arc::from("A")));
    }

    #[test]
    fn division_by_zero_is_rejected() {
        let universe = Universe::new();
        let err = fold_binary(
            BinaryOp::Div,
            &untyped_int(&universe, 1),
            &untyped_int(&universe, 0),
            &universe,
        )
        .unwrap_err();
        assert_eq!(err, ConstError::DivideByZero);
    }
}
