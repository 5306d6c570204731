use crate::language::compiler::code::Function;
use crate::language::types::Type;
use crate::runtime::channel::ChanValue;
use crate::runtime::environment::Env;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use indexmap::IndexMap;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Complex<F> {
    pub re: F,
    pub im: F,
}

impl<F> Complex<F> {
    pub fn new(re: F, im: F) -> Self {
        Self { re, im }
    }
}

impl<F: Add<Output = F>> Add for Complex<F> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Complex::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl<F: Sub<Output = F>> Sub for Complex<F> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Complex::new(self.re - rhs.re, self.im - rhs.im)
    }
}

impl<F> Mul for Complex<F>
where
    F: Copy + Add<Output = F> + Sub<Output = F> + Mul<Output = F>,
{
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Complex::new(
            self.re * rhs.re - self.im * rhs.im,
            self.re * rhs.im + self.im * rhs.re,
        )
    }
}

impl<F> Div for Complex<F>
where
    F: Copy + Add<Output = F> + Sub<Output = F> + Mul<Output = F> + Div<Output = F>,
{
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        let denom = rhs.re * rhs.re + rhs.im * rhs.im;
        Complex::new(
            (self.re * rhs.re + self.im * rhs.im) / denom,
            (self.im * rhs.re - self.re * rhs.im) / denom,
        )
    }
}

impl<F: Neg<Output = F>> Neg for Complex<F> {
    type Output = Self;

    fn neg(self) -> Self {
        Complex::new(-self.re, -self.im)
    }
}

impl<F: fmt::Display + PartialOrd + Default> fmt::Display for Complex<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.im < F::default() { "" } else { "+" };
        write!(f, "({}{}{}i)", self.re, sign, self.im)
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Uint(u64),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Uintptr(u64),
    Float32(f32),
    Float64(f64),
    Complex64(Complex<f32>),
    Complex128(Complex<f64>),
    String(Arc<str>),
    Slice(SliceValue),
    Map(MapValue),
    /// Field values in declaration order. Structs copy on assignment.
    Struct(Vec<Value>),
    Chan(ChanValue),
    Func(FuncValue),
    /// Non-nil interface value: the dynamic type travels with the value.
    Boxed(Arc<Boxed>),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn string(text: impl AsRef<str>) -> Value {
        Value::String(Arc::from(text.as_ref()))
    }

    /// Packs the results of a call: nothing becomes an empty tuple, a single
    /// result is returned as is.
    pub fn from_results(mut values: Vec<Value>) -> Value {
        if values.len() == 1 {
            values.remove(0)
        } else {
            Value::Tuple(values)
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Int8(_) => "int8",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Uint(_) => "uint",
            Value::Uint8(_) => "uint8",
            Value::Uint16(_) => "uint16",
            Value::Uint32(_) => "uint32",
            Value::Uint64(_) => "uint64",
            Value::Uintptr(_) => "uintptr",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Complex64(_) => "complex64",
            Value::Complex128(_) => "complex128",
            Value::String(_) => "string",
            Value::Slice(_) => "slice",
            Value::Map(_) => "map",
            Value::Struct(_) => "struct",
            Value::Chan(_) => "chan",
            Value::Func(_) => "func",
            Value::Boxed(_) => "interface",
            Value::Tuple(_) => "tuple",
        }
    }

    pub fn describe(&self) -> String {
        format!("{self} <{}>", self.kind_name())
    }

    /// `==` for values of one static type.
    pub fn equals(&self, other: &Value) -> RuntimeResult<bool> {
        let equal = match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Nil, _) | (_, Value::Nil) => false,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int8(a), Value::Int8(b)) => a == b,
            (Value::Int16(a), Value::Int16(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Uint(a), Value::Uint(b)) => a == b,
            (Value::Uint8(a), Value::Uint8(b)) => a == b,
            (Value::Uint16(a), Value::Uint16(b)) => a == b,
            (Value::Uint32(a), Value::Uint32(b)) => a == b,
            (Value::Uint64(a), Value::Uint64(b)) => a == b,
            (Value::Uintptr(a), Value::Uintptr(b)) => a == b,
            (Value::Float32(a), Value::Float32(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a == b,
            (Value::Complex64(a), Value::Complex64(b)) => a == b,
            (Value::Complex128(a), Value::Complex128(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Chan(a), Value::Chan(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => {
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (x, y) in a.iter().zip(b) {
                    if !x.equals(y)? {
                        return Ok(false);
                    }
                }
                true
            }
            (Value::Boxed(a), Value::Boxed(b)) => {
                a.ty.identical(&b.ty) && a.value.equals(&b.value)?
            }
            (Value::Boxed(_), _) | (_, Value::Boxed(_)) => false,
            (a, b) => {
                return Err(RuntimeError::mismatch(format!(
                    "comparing uncomparable values {} and {}",
                    a.kind_name(),
                    b.kind_name()
                )))
            }
        };
        Ok(equal)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "<nil>"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) | Value::Int64(v) => write!(f, "{v}"),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Uint(v) | Value::Uint64(v) | Value::Uintptr(v) => write!(f, "{v}"),
            Value::Uint8(v) => write!(f, "{v}"),
            Value::Uint16(v) => write!(f, "{v}"),
            Value::Uint32(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Complex64(v) => write!(f, "{v}"),
            Value::Complex128(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Slice(slice) => {
                write!(f, "[")?;
                for (idx, value) in slice.to_vec().iter().enumerate() {
                    if idx > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "map[")?;
                for (idx, (key, value)) in map.entries().iter().enumerate() {
                    if idx > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{key}:{value}")?;
                }
                write!(f, "]")
            }
            Value::Struct(fields) => {
                write!(f, "{{")?;
                for (idx, value) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "}}")
            }
            Value::Chan(chan) => write!(f, "chan@{:#x}", chan.id()),
            Value::Func(func) => write!(f, "func {}", func.name()),
            Value::Boxed(boxed) => write!(f, "{}", boxed.value),
            Value::Tuple(values) => {
                write!(f, "(")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct Boxed {
    pub ty: Type,
    pub value: Value,
}

impl Boxed {
    pub fn new(ty: Type, value: Value) -> Value {
        Value::Boxed(Arc::new(Boxed { ty, value }))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A window onto a shared backing array.
#[derive(Clone)]
pub struct SliceValue {
    backing: Arc<Mutex<Vec<Value>>>,
    offset: usize,
    len: usize,
    cap: usize,
}

impl SliceValue {
    pub fn from_vec(items: Vec<Value>) -> Self {
        let len = items.len();
        Self {
            backing: Arc::new(Mutex::new(items)),
            offset: 0,
            len,
            cap: len,
        }
    }

    pub fn with_len(zero: &Value, len: usize, cap: usize) -> RuntimeResult<Self> {
        let cap = cap.max(len);
        let mut items = Vec::new();
        items
            .try_reserve_exact(cap)
            .map_err(|_| RuntimeError::panic("runtime error: makeslice: cap out of range"))?;
        items.resize(cap, zero.clone());
        Ok(Self {
            backing: Arc::new(Mutex::new(items)),
            offset: 0,
            len,
            cap,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    fn check(&self, index: i64) -> RuntimeResult<usize> {
        if index < 0 || index as usize >= self.len {
            return Err(RuntimeError::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        Ok(self.offset + index as usize)
    }

    pub fn get(&self, index: i64) -> RuntimeResult<Value> {
        let at = self.check(index)?;
        Ok(lock(&self.backing)[at].clone())
    }

    pub fn set(&self, index: i64, value: Value) -> RuntimeResult<()> {
        let at = self.check(index)?;
        lock(&self.backing)[at] = value;
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<Value> {
        lock(&self.backing)[self.offset..self.offset + self.len].to_vec()
    }

    /// `s[low:high]`, sharing the backing array.
    pub fn slice(&self, low: i64, high: i64) -> RuntimeResult<SliceValue> {
        if low < 0 || high < low || high as usize > self.cap {
            return Err(RuntimeError::SliceOutOfRange {
                low,
                high,
                cap: self.cap,
            });
        }
        Ok(Self {
            backing: Arc::clone(&self.backing),
            offset: self.offset + low as usize,
            len: (high - low) as usize,
            cap: self.cap - low as usize,
        })
    }

    /// Appends in place while capacity allows, otherwise copies into a
    /// larger backing array padded with `zero`.
    pub fn append(&self, values: Vec<Value>, zero: &Value) -> SliceValue {
        let needed = self.len + values.len();
        if needed <= self.cap {
            let mut backing = lock(&self.backing);
            let start = self.offset + self.len;
            for (idx, value) in values.into_iter().enumerate() {
                backing[start + idx] = value;
            }
            return Self {
                backing: Arc::clone(&self.backing),
                offset: self.offset,
                len: needed,
                cap: self.cap,
            };
        }
        let cap = needed.max(self.cap * 2);
        let mut items = self.to_vec();
        items.extend(values);
        items.resize(cap, zero.clone());
        Self {
            backing: Arc::new(Mutex::new(items)),
            offset: 0,
            len: needed,
            cap,
        }
    }
}

impl fmt::Debug for SliceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_vec()).finish()
    }
}

/// Hashable projection of a comparable [`Value`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MapKey {
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(u64),
    Complex(u64, u64),
    String(Arc<str>),
    Chan(usize),
    Struct(Vec<MapKey>),
    Boxed(u32, Box<MapKey>),
}

fn float_bits(value: f64) -> u64 {
    if value == 0.0 {
        0.0f64.to_bits()
    } else {
        value.to_bits()
    }
}

impl MapKey {
    pub fn from_value(value: &Value) -> RuntimeResult<MapKey> {
        Ok(match value {
            Value::Nil => MapKey::Nil,
            Value::Bool(v) => MapKey::Bool(*v),
            Value::Int(v) | Value::Int64(v) => MapKey::Int(*v),
            Value::Int8(v) => MapKey::Int(i64::from(*v)),
            Value::Int16(v) => MapKey::Int(i64::from(*v)),
            Value::Int32(v) => MapKey::Int(i64::from(*v)),
            Value::Uint(v) | Value::Uint64(v) | Value::Uintptr(v) => MapKey::Uint(*v),
            Value::Uint8(v) => MapKey::Uint(u64::from(*v)),
            Value::Uint16(v) => MapKey::Uint(u64::from(*v)),
            Value::Uint32(v) => MapKey::Uint(u64::from(*v)),
            Value::Float32(v) => MapKey::Float(float_bits(f64::from(*v))),
            Value::Float64(v) => MapKey::Float(float_bits(*v)),
            Value::Complex64(v) => {
                MapKey::Complex(float_bits(f64::from(v.re)), float_bits(f64::from(v.im)))
            }
            Value::Complex128(v) => MapKey::Complex(float_bits(v.re), float_bits(v.im)),
            Value::String(v) => MapKey::String(Arc::clone(v)),
            Value::Chan(chan) => MapKey::Chan(chan.id()),
            Value::Struct(fields) => MapKey::Struct(
                fields
                    .iter()
                    .map(MapKey::from_value)
                    .collect::<RuntimeResult<_>>()?,
            ),
            Value::Boxed(boxed) => {
                MapKey::Boxed(boxed.ty.id(), Box::new(MapKey::from_value(&boxed.value)?))
            }
            other => {
                return Err(RuntimeError::panic(format!(
                    "runtime error: hash of unhashable type {}",
                    other.kind_name()
                )))
            }
        })
    }
}

/// Reference-semantics map that iterates in insertion order.
#[derive(Clone, Default)]
pub struct MapValue {
    entries: Arc<Mutex<IndexMap<MapKey, (Value, Value)>>>,
}

impl MapValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &Value) -> RuntimeResult<Option<Value>> {
        let key = MapKey::from_value(key)?;
        Ok(lock(&self.entries).get(&key).map(|(_, value)| value.clone()))
    }

    pub fn insert(&self, key: Value, value: Value) -> RuntimeResult<()> {
        let hashed = MapKey::from_value(&key)?;
        lock(&self.entries).insert(hashed, (key, value));
        Ok(())
    }

    pub fn remove(&self, key: &Value) -> RuntimeResult<()> {
        let key = MapKey::from_value(key)?;
        lock(&self.entries).shift_remove(&key);
        Ok(())
    }

    pub fn keys(&self) -> Vec<Value> {
        lock(&self.entries)
            .values()
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn entries(&self) -> Vec<(Value, Value)> {
        lock(&self.entries).values().cloned().collect()
    }
}

impl fmt::Debug for MapValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries()).finish()
    }
}

pub type NativeFn = dyn Fn(Vec<Value>) -> RuntimeResult<Vec<Value>> + Send + Sync;

/// Host function exposed through an imported package.
pub struct NativeFunc {
    pub package: String,
    pub name: String,
    pub ty: Type,
    pub call: Arc<NativeFn>,
}

#[derive(Clone)]
pub struct Closure {
    pub func: Arc<Function>,
    pub env: Env,
}

#[derive(Clone)]
pub enum FuncValue {
    Closure(Closure),
    Native(Arc<NativeFunc>),
}

impl FuncValue {
    pub fn name(&self) -> &str {
        match self {
            FuncValue::Closure(closure) => &closure.func.name,
            FuncValue::Native(native) => &native.name,
        }
    }

    /// Calls the function on behalf of code running in `caller`.
    pub fn call(&self, caller: &Env, args: Vec<Value>) -> RuntimeResult<Vec<Value>> {
        match self {
            FuncValue::Closure(closure) => closure.func.invoke(&closure.env, args, caller.budget()),
            FuncValue::Native(native) => (native.call)(args).map_err(|err| match err {
                RuntimeError::Native { .. } => err,
                other => RuntimeError::Native {
                    package: native.package.clone(),
                    name: native.name.clone(),
                    message: other.to_string(),
                },
            }),
        }
    }
}

impl fmt::Debug for FuncValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func {}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_within_capacity_shares_backing_array() {
        let base = SliceValue::with_len(&Value::Int(0), 1, 4).unwrap();
        let grown = base.append(vec![Value::Int(7)], &Value::Int(0));
        let window = base.slice(0, 2).unwrap();
        assert!(matches!(window.get(1).unwrap(), Value::Int(7)));
        assert_eq!(grown.len(), 2);
        assert_eq!(grown.cap(), 4);
    }

    #[test]
    fn append_beyond_capacity_copies() {
        let base = SliceValue::from_vec(vec![Value::Int(1)]);
        let grown = base.append(vec![Value::Int(2), Value::Int(3)], &Value::Int(0));
        grown.set(0, Value::Int(9)).unwrap();
        assert!(matches!(base.get(0).unwrap(), Value::Int(1)));
        assert_eq!(grown.to_vec().len(), 3);
    }

    #[test]
    fn slice_index_is_bounds_checked() {
        let slice = SliceValue::from_vec(vec![Value::Bool(true)]);
        assert_eq!(
            slice.get(3).unwrap_err(),
            RuntimeError::IndexOutOfRange { index: 3, len: 1 }
        );
        assert!(slice.slice(0, 2).is_err());
    }

    #[test]
    fn map_keeps_insertion_order_and_overwrites() {
        let map = MapValue::new();
        map.insert(Value::string("b"), Value::Int(1)).unwrap();
        map.insert(Value::string("a"), Value::Int(2)).unwrap();
        map.insert(Value::string("b"), Value::Int(3)).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(Value::Map(map.clone()).to_string(), "map[b:3 a:2]");
        map.remove(&Value::string("b")).unwrap();
        assert!(map.get(&Value::string("b")).unwrap().is_none());
    }

    #[test]
    fn slices_are_not_hashable() {
        let map = MapValue::new();
        let key = Value::Slice(SliceValue::from_vec(Vec::new()));
        assert!(map.insert(key, Value::Nil).is_err());
    }

    #[test]
    fn complex_arithmetic_and_display() {
        let a = Complex::new(1.0f64, 2.0);
        let b = Complex::new(3.0f64, -1.0);
        assert_eq!(a * b, Complex::new(5.0, 5.0));
        assert_eq!((a * b) / b, a);
        assert_eq!(Complex::new(1.5f64, -2.0).to_string(), "(1.5-2i)");
    }
}
