use crate::runtime::value::{Complex, Value};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Invalid,
    Bool,
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Uintptr,
    Float32,
    Float64,
    Complex64,
    Complex128,
    String,
    Chan,
    Func,
    Interface,
    Map,
    Slice,
    Struct,
    UntypedBool,
    UntypedInt,
    UntypedRune,
    UntypedFloat,
    UntypedComplex,
    UntypedString,
    UntypedNil,
}

impl Kind {
    pub const SCALARS: [Kind; 17] = [
        Kind::Bool,
        Kind::Int,
        Kind::Int8,
        Kind::Int16,
        Kind::Int32,
        Kind::Int64,
        Kind::Uint,
        Kind::Uint8,
        Kind::Uint16,
        Kind::Uint32,
        Kind::Uint64,
        Kind::Uintptr,
        Kind::Float32,
        Kind::Float64,
        Kind::Complex64,
        Kind::Complex128,
        Kind::String,
    ];

    pub fn is_scalar(self) -> bool {
        Self::SCALARS.contains(&self)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Kind::Int | Kind::Int8 | Kind::Int16 | Kind::Int32 | Kind::Int64
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            Kind::Uint | Kind::Uint8 | Kind::Uint16 | Kind::Uint32 | Kind::Uint64 | Kind::Uintptr
        )
    }

    pub fn is_integer(self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub fn is_float(self) -> bool {
        matches!(self, Kind::Float32 | Kind::Float64)
    }

    pub fn is_complex(self) -> bool {
        matches!(self, Kind::Complex64 | Kind::Complex128)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float() || self.is_complex()
    }

    pub fn is_ordered(self) -> bool {
        self.is_integer() || self.is_float() || self == Kind::String
    }

    pub fn is_untyped(self) -> bool {
        matches!(
            self,
            Kind::UntypedBool
                | Kind::UntypedInt
                | Kind::UntypedRune
                | Kind::UntypedFloat
                | Kind::UntypedComplex
                | Kind::UntypedString
                | Kind::UntypedNil
        )
    }

    pub fn is_nillable(self) -> bool {
        matches!(
            self,
            Kind::Chan | Kind::Func | Kind::Interface | Kind::Map | Kind::Slice
        )
    }

    /// Bit width of integer kinds; `int`, `uint` and `uintptr` are 64 bits wide.
    pub fn bits(self) -> u32 {
        match self {
            Kind::Int8 | Kind::Uint8 => 8,
            Kind::Int16 | Kind::Uint16 => 16,
            Kind::Int32 | Kind::Uint32 | Kind::Float32 => 32,
            Kind::Complex64 => 64,
            Kind::Complex128 => 128,
            _ => 64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::Invalid => "invalid type",
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Int8 => "int8",
            Kind::Int16 => "int16",
            Kind::Int32 => "int32",
            Kind::Int64 => "int64",
            Kind::Uint => "uint",
            Kind::Uint8 => "uint8",
            Kind::Uint16 => "uint16",
            Kind::Uint32 => "uint32",
            Kind::Uint64 => "uint64",
            Kind::Uintptr => "uintptr",
            Kind::Float32 => "float32",
            Kind::Float64 => "float64",
            Kind::Complex64 => "complex64",
            Kind::Complex128 => "complex128",
            Kind::String => "string",
            Kind::Chan => "chan",
            Kind::Func => "func",
            Kind::Interface => "interface",
            Kind::Map => "map",
            Kind::Slice => "slice",
            Kind::Struct => "struct",
            Kind::UntypedBool => "untyped bool",
            Kind::UntypedInt => "untyped int",
            Kind::UntypedRune => "untyped rune",
            Kind::UntypedFloat => "untyped float",
            Kind::UntypedComplex => "untyped complex",
            Kind::UntypedString => "untyped string",
            Kind::UntypedNil => "untyped nil",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChanDir {
    Recv,
    Send,
    Both,
}

impl ChanDir {
    pub fn can_send(self) -> bool {
        matches!(self, ChanDir::Send | ChanDir::Both)
    }

    pub fn can_recv(self) -> bool {
        matches!(self, ChanDir::Recv | ChanDir::Both)
    }
}

#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub ty: Type,
}

#[derive(Clone, Debug)]
pub struct Method {
    pub name: String,
    pub ty: Type,
}

#[derive(Clone, Debug)]
enum Shape {
    Basic,
    Chan { dir: ChanDir, elem: Type },
    Slice { elem: Type },
    Map { key: Type, value: Type },
    Func {
        params: Vec<Type>,
        results: Vec<Type>,
        variadic: bool,
    },
    Struct { fields: Vec<Field> },
    Interface { methods: Vec<Method> },
}

struct TypeData {
    id: u32,
    kind: Kind,
    name: Option<String>,
    pkg: Option<String>,
    basic: bool,
    shape: Shape,
    underlying: Option<Type>,
}

static NEXT_TYPE_ID: AtomicU32 = AtomicU32::new(1);

/// Handle to one distinct type. Equality is type identity.
#[derive(Clone)]
pub struct Type(Arc<TypeData>);

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({self})")
    }
}

impl Type {
    fn build(
        kind: Kind,
        shape: Shape,
        name: Option<String>,
        pkg: Option<String>,
        basic: bool,
        underlying: Option<Type>,
    ) -> Type {
        Type(Arc::new(TypeData {
            id: NEXT_TYPE_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            name,
            pkg,
            basic,
            shape,
            underlying,
        }))
    }

    pub fn id(&self) -> u32 {
        self.0.id
    }

    pub fn kind(&self) -> Kind {
        self.0.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub fn pkg_path(&self) -> Option<&str> {
        self.0.pkg.as_deref()
    }

    pub fn is_named(&self) -> bool {
        self.0.name.is_some()
    }

    /// True only for the predeclared scalar types, never for a user type
    /// that merely shares their kind.
    pub fn is_basic(&self) -> bool {
        self.0.basic
    }

    pub fn identical(&self, other: &Type) -> bool {
        self == other
    }

    pub fn underlying(&self) -> Type {
        self.0.underlying.clone().unwrap_or_else(|| self.clone())
    }

    pub fn elem(&self) -> Option<&Type> {
        match &self.0.shape {
            Shape::Chan { elem, .. } | Shape::Slice { elem } => Some(elem),
            Shape::Map { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn key(&self) -> Option<&Type> {
        match &self.0.shape {
            Shape::Map { key, .. } => Some(key),
            _ => None,
        }
    }

    pub fn chan_dir(&self) -> Option<ChanDir> {
        match &self.0.shape {
            Shape::Chan { dir, .. } => Some(*dir),
            _ => None,
        }
    }

    pub fn fields(&self) -> &[Field] {
        match &self.0.shape {
            Shape::Struct { fields } => fields,
            _ => &[],
        }
    }

    pub fn field(&self, name: &str) -> Option<(usize, &Field)> {
        self.fields()
            .iter()
            .enumerate()
            .find(|(_, field)| field.name == name)
    }

    pub fn methods(&self) -> &[Method] {
        match &self.0.shape {
            Shape::Interface { methods } => methods,
            _ => &[],
        }
    }

    pub fn params(&self) -> &[Type] {
        match &self.0.shape {
            Shape::Func { params, .. } => params,
            _ => &[],
        }
    }

    pub fn results(&self) -> &[Type] {
        match &self.0.shape {
            Shape::Func { results, .. } => results,
            _ => &[],
        }
    }

    pub fn is_variadic(&self) -> bool {
        matches!(&self.0.shape, Shape::Func { variadic: true, .. })
    }

    /// Interface satisfaction. Only interface types carry methods, so a
    /// concrete type satisfies an interface only when its method set is empty.
    pub fn implements(&self, iface: &Type) -> bool {
        if iface.kind() != Kind::Interface {
            return false;
        }
        iface.methods().iter().all(|wanted| {
            self.methods()
                .iter()
                .any(|have| have.name == wanted.name && have.ty.identical(&wanted.ty))
        })
    }

    pub fn assignable_to(&self, target: &Type) -> bool {
        if self.identical(target) {
            return true;
        }
        let kind = self.kind();
        if kind.is_untyped() {
            return untyped_assignable(kind, target);
        }
        let both_named = self.is_named() && target.is_named();
        if !both_named && self.underlying().identical(&target.underlying()) {
            return true;
        }
        if target.kind() == Kind::Interface && self.implements(target) {
            return true;
        }
        if kind == Kind::Chan && target.kind() == Kind::Chan && !both_named {
            if let (Some(ChanDir::Both), Some(elem), Some(target_elem)) =
                (self.chan_dir(), self.elem(), target.elem())
            {
                return elem.identical(target_elem);
            }
        }
        false
    }

    pub fn convertible_to(&self, target: &Type) -> bool {
        if self.assignable_to(target) {
            return true;
        }
        let (from, to) = (self.underlying(), target.underlying());
        if from.identical(&to) {
            return true;
        }
        let (fk, tk) = (from.kind(), to.kind());
        let real = |k: Kind| k.is_integer() || k.is_float();
        if (real(fk) || matches!(fk, Kind::UntypedInt | Kind::UntypedRune | Kind::UntypedFloat))
            && real(tk)
        {
            return true;
        }
        if (fk.is_complex() || fk == Kind::UntypedComplex) && tk.is_complex() {
            return true;
        }
        if tk == Kind::String && (fk.is_integer() || is_byte_or_rune_slice(&from)) {
            return true;
        }
        if fk == Kind::String && is_byte_or_rune_slice(&to) {
            return true;
        }
        false
    }

    pub fn zero(&self) -> Value {
        match self.kind() {
            Kind::Bool => Value::Bool(false),
            Kind::Int => Value::Int(0),
            Kind::Int8 => Value::Int8(0),
            Kind::Int16 => Value::Int16(0),
            Kind::Int32 => Value::Int32(0),
            Kind::Int64 => Value::Int64(0),
            Kind::Uint => Value::Uint(0),
            Kind::Uint8 => Value::Uint8(0),
            Kind::Uint16 => Value::Uint16(0),
            Kind::Uint32 => Value::Uint32(0),
            Kind::Uint64 => Value::Uint64(0),
            Kind::Uintptr => Value::Uintptr(0),
            Kind::Float32 => Value::Float32(0.0),
            Kind::Float64 => Value::Float64(0.0),
            Kind::Complex64 => Value::Complex64(Complex::default()),
            Kind::Complex128 => Value::Complex128(Complex::default()),
            Kind::String => Value::String(Arc::from("")),
            Kind::Struct => Value::Struct(self.fields().iter().map(|f| f.ty.zero()).collect()),
            Kind::Chan
            | Kind::Func
            | Kind::Interface
            | Kind::Map
            | Kind::Slice
            | Kind::Invalid
            | Kind::UntypedBool
            | Kind::UntypedInt
            | Kind::UntypedRune
            | Kind::UntypedFloat
            | Kind::UntypedComplex
            | Kind::UntypedString
            | Kind::UntypedNil => Value::Nil,
        }
    }

    pub fn qualified_name(&self) -> String {
        self.to_string()
    }
}

fn untyped_assignable(kind: Kind, target: &Type) -> bool {
    let tk = target.kind();
    if tk == Kind::Interface {
        return kind == Kind::UntypedNil || target.methods().is_empty();
    }
    match kind {
        Kind::UntypedNil => tk.is_nillable(),
        Kind::UntypedBool => tk == Kind::Bool,
        Kind::UntypedInt | Kind::UntypedRune | Kind::UntypedFloat | Kind::UntypedComplex => {
            tk.is_numeric()
        }
        Kind::UntypedString => tk == Kind::String,
        _ => false,
    }
}

fn is_byte_or_rune_slice(ty: &Type) -> bool {
    ty.kind() == Kind::Slice
        && ty
            .elem()
            .map(|elem| matches!(elem.kind(), Kind::Uint8 | Kind::Int32))
            .unwrap_or(false)
}

fn write_types(f: &mut fmt::Formatter<'_>, types: &[Type]) -> fmt::Result {
    for (idx, ty) in types.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{ty}")?;
    }
    Ok(())
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.name() {
            return match self.pkg_path() {
                Some(pkg) => write!(f, "{pkg}.{name}"),
                None => write!(f, "{name}"),
            };
        }
        match &self.0.shape {
            Shape::Basic => write!(f, "{}", self.kind().name()),
            Shape::Chan { dir, elem } => match dir {
                ChanDir::Both => write!(f, "chan {elem}"),
                ChanDir::Send => write!(f, "chan<- {elem}"),
                ChanDir::Recv => write!(f, "<-chan {elem}"),
            },
            Shape::Slice { elem } => write!(f, "[]{elem}"),
            Shape::Map { key, value } => write!(f, "map[{key}]{value}"),
            Shape::Func {
                params,
                results,
                variadic,
            } => {
                write!(f, "func(")?;
                for (idx, param) in params.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    if *variadic && idx + 1 == params.len() {
                        match param.elem() {
                            Some(elem) => write!(f, "...{elem}")?,
                            None => write!(f, "{param}")?,
                        }
                    } else {
                        write!(f, "{param}")?;
                    }
                }
                write!(f, ")")?;
                match results.len() {
                    0 => Ok(()),
                    1 => write!(f, " {}", results[0]),
                    _ => {
                        write!(f, " (")?;
                        write_types(f, results)?;
                        write!(f, ")")
                    }
                }
            }
            Shape::Struct { fields } => {
                write!(f, "struct {{")?;
                for (idx, field) in fields.iter().enumerate() {
                    let sep = if idx == 0 { " " } else { "; " };
                    write!(f, "{sep}{} {}", field.name, field.ty)?;
                }
                write!(f, " }}")
            }
            Shape::Interface { methods } => {
                if methods.is_empty() {
                    return write!(f, "interface {{}}");
                }
                write!(f, "interface {{")?;
                for method in methods {
                    let rendered = method.ty.to_string();
                    let signature = rendered.strip_prefix("func").unwrap_or(&rendered);
                    write!(f, " {}{};", method.name, signature)?;
                }
                write!(f, " }}")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ShapeKey {
    Chan(ChanDir, u32),
    Slice(u32),
    Map(u32, u32),
    Func(Vec<u32>, Vec<u32>, bool),
    Struct(Vec<(String, u32)>),
    Interface(Vec<(String, u32)>),
}

/// The set of predeclared types plus an interning table so that structurally
/// identical composite types share one identity.
pub struct Universe {
    basics: HashMap<Kind, Type>,
    untyped: HashMap<Kind, Type>,
    interned: Mutex<HashMap<ShapeKey, Type>>,
}

impl Default for Universe {
    fn default() -> Self {
        Self::new()
    }
}

impl Universe {
    pub fn new() -> Self {
        let basics = Kind::SCALARS
            .iter()
            .map(|&kind| {
                let ty = Type::build(
                    kind,
                    Shape::Basic,
                    Some(kind.name().to_string()),
                    None,
                    true,
                    None,
                );
                (kind, ty)
            })
            .collect();
        let untyped = [
            Kind::UntypedBool,
            Kind::UntypedInt,
            Kind::UntypedRune,
            Kind::UntypedFloat,
            Kind::UntypedComplex,
            Kind::UntypedString,
            Kind::UntypedNil,
        ]
        .iter()
        .map(|&kind| (kind, Type::build(kind, Shape::Basic, None, None, false, None)))
        .collect();
        Self {
            basics,
            untyped,
            interned: Mutex::new(HashMap::new()),
        }
    }

    /// The predeclared type of a scalar kind.
    pub fn basic(&self, kind: Kind) -> Option<Type> {
        self.basics.get(&kind).cloned()
    }

    pub fn untyped(&self, kind: Kind) -> Option<Type> {
        self.untyped.get(&kind).cloned()
    }

    pub fn bool_type(&self) -> Type {
        self.basics[&Kind::Bool].clone()
    }

    pub fn int_type(&self) -> Type {
        self.basics[&Kind::Int].clone()
    }

    pub fn string_type(&self) -> Type {
        self.basics[&Kind::String].clone()
    }

    /// Resolves a predeclared type name, including the `byte`, `rune` and
    /// `any` aliases.
    pub fn lookup(&self, name: &str) -> Option<Type> {
        match name {
            "byte" => self.basic(Kind::Uint8),
            "rune" => self.basic(Kind::Int32),
            "any" => Some(self.empty_interface()),
            _ => Kind::SCALARS
                .iter()
                .find(|kind| kind.name() == name)
                .and_then(|kind| self.basic(*kind)),
        }
    }

    /// The type an untyped constant takes when no other type is implied.
    pub fn default_type(&self, ty: &Type) -> Type {
        let kind = match ty.kind() {
            Kind::UntypedBool => Kind::Bool,
            Kind::UntypedInt => Kind::Int,
            Kind::UntypedRune => Kind::Int32,
            Kind::UntypedFloat => Kind::Float64,
            Kind::UntypedComplex => Kind::Complex128,
            Kind::UntypedString => Kind::String,
            _ => return ty.clone(),
        };
        self.basics[&kind].clone()
    }

    fn intern(&self, key: ShapeKey, make: impl FnOnce() -> Type) -> Type {
        let mut interned = match self.interned.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        interned.entry(key).or_insert_with(make).clone()
    }

    pub fn chan_of(&self, dir: ChanDir, elem: &Type) -> Type {
        let shape = Shape::Chan {
            dir,
            elem: elem.clone(),
        };
        self.intern(ShapeKey::Chan(dir, elem.id()), || {
            Type::build(Kind::Chan, shape, None, None, false, None)
        })
    }

    pub fn slice_of(&self, elem: &Type) -> Type {
        let shape = Shape::Slice { elem: elem.clone() };
        self.intern(ShapeKey::Slice(elem.id()), || {
            Type::build(Kind::Slice, shape, None, None, false, None)
        })
    }

    pub fn map_of(&self, key: &Type, value: &Type) -> Type {
        let shape = Shape::Map {
            key: key.clone(),
            value: value.clone(),
        };
        self.intern(ShapeKey::Map(key.id(), value.id()), || {
            Type::build(Kind::Map, shape, None, None, false, None)
        })
    }

    /// A function type; when `variadic` is set the last parameter must be a slice.
    pub fn func_of(&self, params: &[Type], results: &[Type], variadic: bool) -> Type {
        let key = ShapeKey::Func(
            params.iter().map(Type::id).collect(),
            results.iter().map(Type::id).collect(),
            variadic,
        );
        let shape = Shape::Func {
            params: params.to_vec(),
            results: results.to_vec(),
            variadic,
        };
        self.intern(key, || Type::build(Kind::Func, shape, None, None, false, None))
    }

    pub fn struct_of(&self, fields: Vec<Field>) -> Type {
        let key = ShapeKey::Struct(
            fields
                .iter()
                .map(|field| (field.name.clone(), field.ty.id()))
                .collect(),
        );
        self.intern(key, || {
            Type::build(Kind::Struct, Shape::Struct { fields }, None, None, false, None)
        })
    }

    pub fn interface_of(&self, mut methods: Vec<Method>) -> Type {
        methods.sort_by(|a, b| a.name.cmp(&b.name));
        let key = ShapeKey::Interface(
            methods
                .iter()
                .map(|method| (method.name.clone(), method.ty.id()))
                .collect(),
        );
        self.intern(key, || {
            Type::build(
                Kind::Interface,
                Shape::Interface { methods },
                None,
                None,
                false,
                None,
            )
        })
    }

    pub fn empty_interface(&self) -> Type {
        self.interface_of(Vec::new())
    }

    /// Declares a new defined type. It shares the kind and structure of
    /// `underlying` but is a distinct identity, and never basic.
    pub fn named(&self, pkg: Option<&str>, name: &str, underlying: &Type) -> Type {
        let base = underlying.underlying();
        Type::build(
            base.kind(),
            base.0.shape.clone(),
            Some(name.to_string()),
            pkg.map(str::to_string),
            false,
            Some(base),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_type_shares_kind_but_not_identity() {
        let universe = Universe::new();
        let int = universe.int_type();
        let my_int = universe.named(Some("main"), "MyInt", &int);
        assert_eq!(my_int.kind(), Kind::Int);
        assert!(int.is_basic());
        assert!(!my_int.is_basic());
        assert_ne!(my_int, int);
        assert!(!my_int.assignable_to(&int));
        assert!(my_int.convertible_to(&int));
        assert_eq!(my_int.to_string(), "main.MyInt");
    }

    #[test]
    fn composite_types_are_interned() {
        let universe = Universe::new();
        let int = universe.int_type();
        let a = universe.chan_of(ChanDir::Both, &int);
        let b = universe.chan_of(ChanDir::Both, &int);
        assert_eq!(a, b);
        assert_ne!(a, universe.chan_of(ChanDir::Recv, &int));
        assert_eq!(a.to_string(), "chan int");
        assert_eq!(universe.chan_of(ChanDir::Send, &int).to_string(), "chan<- int");
    }

    #[test]
    fn bidirectional_channel_assigns_to_directed_channel() {
        let universe = Universe::new();
        let int = universe.int_type();
        let both = universe.chan_of(ChanDir::Both, &int);
        let recv = universe.chan_of(ChanDir::Recv, &int);
        assert!(both.assignable_to(&recv));
        assert!(!recv.assignable_to(&both));
    }

    #[test]
    fn untyped_constants_assign_by_kind() {
        let universe = Universe::new();
        let untyped_int = universe.untyped(Kind::UntypedInt).unwrap();
        let nil = universe.untyped(Kind::UntypedNil).unwrap();
        assert!(untyped_int.assignable_to(&universe.basic(Kind::Float32).unwrap()));
        assert!(!untyped_int.assignable_to(&universe.string_type()));
        assert!(nil.assignable_to(&universe.slice_of(&universe.int_type())));
        assert!(!nil.assignable_to(&universe.int_type()));
    }

    #[test]
    fn zero_values_follow_kind() {
        let universe = Universe::new();
        let point = universe.struct_of(vec![
            Field {
                name: "x".into(),
                ty: universe.int_type(),
            },
            Field {
                name: "label".into(),
                ty: universe.string_type(),
            },
        ]);
        match point.zero() {
            Value::Struct(fields) => {
                assert!(matches!(fields[0], Value::Int(0)));
                assert!(matches!(&fields[1], Value::String(s) if s.is_empty()));
            }
            other => panic!("unexpected zero value {other:?}"),
        }
        assert!(matches!(
            universe.chan_of(ChanDir::Both, &universe.int_type()).zero(),
            Value::Nil
        ));
    }
}
