//! Per-kind specialization table.
//!
//! Every predeclared scalar kind gets a zero-sized marker implementing
//! [`ScalarKind`]. The `dispatch_*` macros turn a runtime [`Kind`] into a
//! marker type so a single generic body serves all kinds.

use crate::language::types::Kind;
use crate::runtime::channel::{Chan, ChanValue};
use crate::runtime::environment::Env;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::value::{Complex, Value};
use std::sync::Arc;

/// A compiled closure producing a `T` from an environment.
pub type Fun<T> = Arc<dyn Fn(&Env) -> RuntimeResult<T> + Send + Sync>;

pub trait ScalarKind: 'static {
    type Native: Clone + PartialEq + Send + Sync + 'static;
    const KIND: Kind;

    fn zero() -> Self::Native;
    fn wrap(native: Self::Native) -> Value;
    fn unwrap(value: Value) -> RuntimeResult<Self::Native>;
    fn lift(fun: Fun<Self::Native>) -> ExprFun;
    /// The typed closure when `fun` already has this kind's native form.
    fn lower(fun: &ExprFun) -> Option<Fun<Self::Native>>;
    fn native_chan(chan: &ChanValue) -> Option<&Arc<Chan<Self::Native>>>;
    fn new_chan(cap: usize) -> ChanValue;
}

macro_rules! scalar_markers {
    ($($marker:ident => $variant:ident($native:ty) = $zero:expr),* $(,)?) => {
        $(
            pub struct $marker;

            impl ScalarKind for $marker {
                type Native = $native;
                const KIND: Kind = Kind::$variant;

                fn zero() -> $native {
                    $zero
                }

                fn wrap(native: $native) -> Value {
                    Value::$variant(native)
                }

                fn unwrap(value: Value) -> RuntimeResult<$native> {
                    match value {
                        Value::$variant(native) => Ok(native),
                        other => Err(RuntimeError::mismatch(format!(
                            "expected {} value, found {}",
                            Kind::$variant.name(),
                            other.describe()
                        ))),
                    }
                }

                fn lift(fun: Fun<$native>) -> ExprFun {
                    ExprFun::$variant(fun)
                }

                fn lower(fun: &ExprFun) -> Option<Fun<$native>> {
                    match fun {
                        ExprFun::$variant(fun) => Some(Arc::clone(fun)),
                        _ => None,
                    }
                }

                fn native_chan(chan: &ChanValue) -> Option<&Arc<Chan<$native>>> {
                    match chan {
                        ChanValue::$variant(chan) => Some(chan),
                        _ => None,
                    }
                }

                fn new_chan(cap: usize) -> ChanValue {
                    ChanValue::$variant(Arc::new(Chan::new(cap)))
                }
            }
        )*

        /// Primary closure of a compiled expression, narrowed to the native
        /// representation of its kind whenever the kind is scalar.
        #[derive(Clone)]
        pub enum ExprFun {
            $($variant(Fun<$native>),)*
            Value(Fun<Value>),
            Void(Fun<()>),
        }

        impl ExprFun {
            /// Boxes the result into a [`Value`].
            pub fn to_value(&self) -> Fun<Value> {
                match self {
                    $(ExprFun::$variant(fun) => {
                        let fun = Arc::clone(fun);
                        Arc::new(move |env| fun(env).map(Value::$variant))
                    })*
                    ExprFun::Value(fun) => Arc::clone(fun),
                    ExprFun::Void(fun) => {
                        let fun = Arc::clone(fun);
                        Arc::new(move |env| {
                            fun(env)?;
                            Ok(Value::Tuple(Vec::new()))
                        })
                    }
                }
            }

            /// Evaluates for side effects only.
            pub fn to_void(&self) -> Fun<()> {
                match self {
                    $(ExprFun::$variant(fun) => {
                        let fun = Arc::clone(fun);
                        Arc::new(move |env| fun(env).map(|_| ()))
                    })*
                    ExprFun::Value(fun) => {
                        let fun = Arc::clone(fun);
                        Arc::new(move |env| fun(env).map(|_| ()))
                    }
                    ExprFun::Void(fun) => Arc::clone(fun),
                }
            }

            /// Kind of the native form, `None` for the generic variants.
            pub fn native_kind(&self) -> Option<Kind> {
                match self {
                    $(ExprFun::$variant(_) => Some(Kind::$variant),)*
                    ExprFun::Value(_) | ExprFun::Void(_) => None,
                }
            }
        }
    };
}

scalar_markers! {
    KBool => Bool(bool) = false,
    KInt => Int(i64) = 0,
    KInt8 => Int8(i8) = 0,
    KInt16 => Int16(i16) = 0,
    KInt32 => Int32(i32) = 0,
    KInt64 => Int64(i64) = 0,
    KUint => Uint(u64) = 0,
    KUint8 => Uint8(u8) = 0,
    KUint16 => Uint16(u16) = 0,
    KUint32 => Uint32(u32) = 0,
    KUint64 => Uint64(u64) = 0,
    KUintptr => Uintptr(u64) = 0,
    KFloat32 => Float32(f32) = 0.0,
    KFloat64 => Float64(f64) = 0.0,
    KComplex64 => Complex64(Complex<f32>) = Complex::new(0.0, 0.0),
    KComplex128 => Complex128(Complex<f64>) = Complex::new(0.0, 0.0),
    KString => String(Arc<str>) = Arc::from(""),
}

pub fn lift_value<K: ScalarKind>(fun: Fun<Value>) -> ExprFun {
    K::lift(Arc::new(move |env| K::unwrap(fun(env)?)))
}

pub fn constant_fun<K: ScalarKind>(native: K::Native) -> ExprFun {
    K::lift(Arc::new(move |_| Ok(native.clone())))
}

/// The native closure of `fun`, unboxing through [`Value`] when the
/// expression was compiled in generic form.
pub fn native_fun<K: ScalarKind>(fun: &ExprFun) -> Fun<K::Native> {
    match K::lower(fun) {
        Some(native) => native,
        None => {
            let generic = fun.to_value();
            Arc::new(move |env| K::unwrap(generic(env)?))
        }
    }
}

/// Arithmetic shared by every numeric native type. Integers wrap.
pub trait Arith: Copy + Send + Sync + 'static {
    fn add(self, rhs: Self) -> Self;
    fn sub(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
    fn div(self, rhs: Self) -> RuntimeResult<Self>;
    fn neg(self) -> Self;
}

pub trait Integer: Arith + Ord {
    const BITS: u32;

    fn rem(self, rhs: Self) -> RuntimeResult<Self>;
    fn and(self, rhs: Self) -> Self;
    fn or(self, rhs: Self) -> Self;
    fn xor(self, rhs: Self) -> Self;
    fn and_not(self, rhs: Self) -> Self;
    fn not(self) -> Self;
    fn shl(self, count: u64) -> Self;
    fn shr(self, count: u64) -> Self;
    /// Interprets the value as a shift count.
    fn shift_count(self) -> RuntimeResult<u64>;
    fn as_i64(self) -> i64;
    fn as_i128(self) -> i128;
}

macro_rules! integer_ops {
    ($($native:ty),*) => {
        $(
            impl Arith for $native {
                fn add(self, rhs: Self) -> Self {
                    self.wrapping_add(rhs)
                }

                fn sub(self, rhs: Self) -> Self {
                    self.wrapping_sub(rhs)
                }

                fn mul(self, rhs: Self) -> Self {
                    self.wrapping_mul(rhs)
                }

                fn div(self, rhs: Self) -> RuntimeResult<Self> {
                    if rhs == 0 {
                        return Err(RuntimeError::DivideByZero);
                    }
                    Ok(self.wrapping_div(rhs))
                }

                fn neg(self) -> Self {
                    self.wrapping_neg()
                }
            }

            impl Integer for $native {
                const BITS: u32 = <$native>::BITS;

                fn rem(self, rhs: Self) -> RuntimeResult<Self> {
                    if rhs == 0 {
                        return Err(RuntimeError::DivideByZero);
                    }
                    Ok(self.wrapping_rem(rhs))
                }

                fn and(self, rhs: Self) -> Self {
                    self & rhs
                }

                fn or(self, rhs: Self) -> Self {
                    self | rhs
                }

                fn xor(self, rhs: Self) -> Self {
                    self ^ rhs
                }

                fn and_not(self, rhs: Self) -> Self {
                    self & !rhs
                }

                fn not(self) -> Self {
                    !self
                }

                fn shl(self, count: u64) -> Self {
                    if count >= u64::from(Self::BITS) {
                        0
                    } else {
                        self << count
                    }
                }

                #[allow(unused_comparisons)]
                fn shr(self, count: u64) -> Self {
                    if count >= u64::from(Self::BITS) {
                        if self < 0 { !0 } else { 0 }
                    } else {
                        self >> count
                    }
                }

                #[allow(unused_comparisons)]
                fn shift_count(self) -> RuntimeResult<u64> {
                    if self < 0 {
                        return Err(RuntimeError::panic("runtime error: negative shift amount"));
                    }
                    Ok(self as u64)
                }

                fn as_i64(self) -> i64 {
                    self as i64
                }

                fn as_i128(self) -> i128 {
                    self as i128
                }
            }
        )*
    };
}

integer_ops!(i8, i16, i32, i64, u8, u16, u32, u64);

macro_rules! float_ops {
    ($($native:ty),*) => {
        $(
            impl Arith for $native {
                fn add(self, rhs: Self) -> Self {
                    self + rhs
                }

                fn sub(self, rhs: Self) -> Self {
                    self - rhs
                }

                fn mul(self, rhs: Self) -> Self {
                    self * rhs
                }

                fn div(self, rhs: Self) -> RuntimeResult<Self> {
                    Ok(self / rhs)
                }

                fn neg(self) -> Self {
                    -self
                }
            }

            impl Arith for Complex<$native> {
                fn add(self, rhs: Self) -> Self {
                    self + rhs
                }

                fn sub(self, rhs: Self) -> Self {
                    self - rhs
                }

                fn mul(self, rhs: Self) -> Self {
                    self * rhs
                }

                fn div(self, rhs: Self) -> RuntimeResult<Self> {
                    Ok(self / rhs)
                }

                fn neg(self) -> Self {
                    -self
                }
            }
        )*
    };
}

float_ops!(f32, f64);

#[doc(hidden)]
#[macro_export]
macro_rules! __dispatch_kinds {
    ($kind:expr, $K:ident => $body:expr, [$($variant:ident => $marker:ident),* $(,)?], $rest:pat => $fallback:expr) => {
        match $kind {
            $($crate::language::types::Kind::$variant => {
                #[allow(dead_code)]
                type $K = $crate::language::compiler::scalar::$marker;
                $body
            })*
            $rest => $fallback,
        }
    };
}

/// Every scalar kind; the fallback covers the remaining kinds exhaustively.
macro_rules! dispatch_scalar {
    ($kind:expr, $K:ident => $body:expr, _ => $fallback:expr) => {
        $crate::__dispatch_kinds!($kind, $K => $body, [
            Bool => KBool,
            Int => KInt,
            Int8 => KInt8,
            Int16 => KInt16,
            Int32 => KInt32,
            Int64 => KInt64,
            Uint => KUint,
            Uint8 => KUint8,
            Uint16 => KUint16,
            Uint32 => KUint32,
            Uint64 => KUint64,
            Uintptr => KUintptr,
            Float32 => KFloat32,
            Float64 => KFloat64,
            Complex64 => KComplex64,
            Complex128 => KComplex128,
            String => KString,
        ],
        $crate::language::types::Kind::Invalid
            | $crate::language::types::Kind::Chan
            | $crate::language::types::Kind::Func
            | $crate::language::types::Kind::Interface
            | $crate::language::types::Kind::Map
            | $crate::language::types::Kind::Slice
            | $crate::language::types::Kind::Struct
            | $crate::language::types::Kind::UntypedBool
            | $crate::language::types::Kind::UntypedInt
            | $crate::language::types::Kind::UntypedRune
            | $crate::language::types::Kind::UntypedFloat
            | $crate::language::types::Kind::UntypedComplex
            | $crate::language::types::Kind::UntypedString
            | $crate::language::types::Kind::UntypedNil => $fallback)
    };
}

/// Kinds supporting `+ - * /`.
macro_rules! dispatch_arith {
    ($kind:expr, $K:ident => $body:expr, _ => $fallback:expr) => {
        $crate::__dispatch_kinds!($kind, $K => $body, [
            Int => KInt,
            Int8 => KInt8,
            Int16 => KInt16,
            Int32 => KInt32,
            Int64 => KInt64,
            Uint => KUint,
            Uint8 => KUint8,
            Uint16 => KUint16,
            Uint32 => KUint32,
            Uint64 => KUint64,
            Uintptr => KUintptr,
            Float32 => KFloat32,
            Float64 => KFloat64,
            Complex64 => KComplex64,
            Complex128 => KComplex128,
        ], _ => $fallback)
    };
}

macro_rules! dispatch_integer {
    ($kind:expr, $K:ident => $body:expr, _ => $fallback:expr) => {
        $crate::__dispatch_kinds!($kind, $K => $body, [
            Int => KInt,
            Int8 => KInt8,
            Int16 => KInt16,
            Int32 => KInt32,
            Int64 => KInt64,
            Uint => KUint,
            Uint8 => KUint8,
            Uint16 => KUint16,
            Uint32 => KUint32,
            Uint64 => KUint64,
            Uintptr => KUintptr,
        ], _ => $fallback)
    };
}

/// Kinds supporting `< <= > >=`.
macro_rules! dispatch_ordered {
    ($kind:expr, $K:ident => $body:expr, _ => $fallback:expr) => {
        $crate::__dispatch_kinds!($kind, $K => $body, [
            Int => KInt,
            Int8 => KInt8,
            Int16 => KInt16,
            Int32 => KInt32,
            Int64 => KInt64,
            Uint => KUint,
            Uint8 => KUint8,
            Uint16 => KUint16,
            Uint32 => KUint32,
            Uint64 => KUint64,
            Uintptr => KUintptr,
            Float32 => KFloat32,
            Float64 => KFloat64,
            String => KString,
        ], _ => $fallback)
    };
}

pub(crate) use dispatch_arith;
pub(crate) use dispatch_integer;
pub(crate) use dispatch_ordered;
pub(crate) use dispatch_scalar;

impl ExprFun {
    /// Narrows a generic closure to the native form of `kind`.
    pub fn from_value(kind: Kind, fun: Fun<Value>) -> ExprFun {
        dispatch_scalar!(kind, K => lift_value::<K>(fun), _ => ExprFun::Value(fun))
    }
}
