use crate::language::types::{Kind, Type, Universe};
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::value::{FuncValue, NativeFunc, Value};
use indexmap::IndexMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ImportError {
    #[error("error loading package \"{path}\": not found in registry")]
    NotFound { path: String },
    #[error("package \"{path}\" has no exported symbol `{name}`")]
    UnknownSymbol { path: String, name: String },
}

/// A typed value exported by a host package.
#[derive(Clone, Debug)]
pub struct Bind {
    pub ty: Type,
    pub value: Value,
}

/// Host package: exported values (functions, constants, variables) and types.
#[derive(Clone, Debug)]
pub struct Package {
    pub path: String,
    pub name: String,
    pub binds: IndexMap<String, Bind>,
    pub types: IndexMap<String, Type>,
}

impl Package {
    /// The package name defaults to the last segment of its import path.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        Self {
            path,
            name,
            binds: IndexMap::new(),
            types: IndexMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn func<F>(mut self, name: &str, ty: Type, call: F) -> Self
    where
        F: Fn(Vec<Value>) -> RuntimeResult<Vec<Value>> + Send + Sync + 'static,
    {
        let native = NativeFunc {
            package: self.path.clone(),
            name: name.to_string(),
            ty: ty.clone(),
            call: Arc::new(call),
        };
        self.binds.insert(
            name.to_string(),
            Bind {
                ty,
                value: Value::Func(FuncValue::Native(Arc::new(native))),
            },
        );
        self
    }

    pub fn value(mut self, name: &str, ty: Type, value: Value) -> Self {
        self.binds.insert(name.to_string(), Bind { ty, value });
        self
    }

    pub fn with_type(mut self, name: &str, ty: Type) -> Self {
        self.types.insert(name.to_string(), ty);
        self
    }

    pub fn bind(&self, name: &str) -> Result<&Bind, ImportError> {
        self.binds
            .get(name)
            .ok_or_else(|| ImportError::UnknownSymbol {
                path: self.path.clone(),
                name: name.to_string(),
            })
    }
}

/// Registry of importable host packages keyed by import path.
#[derive(Clone, Debug, Default)]
pub struct Packages {
    packages: IndexMap<String, Arc<Package>>,
}

impl Packages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, package: Package) {
        self.packages
            .insert(package.path.clone(), Arc::new(package));
    }

    pub fn lookup(&self, path: &str) -> Result<Arc<Package>, ImportError> {
        self.packages
            .get(path)
            .cloned()
            .ok_or_else(|| ImportError::NotFound {
                path: path.to_string(),
            })
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    /// A small set of host packages useful to scripts and tests.
    pub fn standard(universe: &Universe) -> Self {
        let mut packages = Self::new();
        packages.register(strings_package(universe));
        packages.register(strconv_package(universe));
        packages.register(math_package(universe));
        packages.register(fmt_package(universe));
        packages
    }
}

fn string_arg(args: &[Value], index: usize) -> RuntimeResult<&str> {
    match args.get(index) {
        Some(Value::String(text)) => Ok(text),
        Some(other) => Err(RuntimeError::mismatch(format!(
            "expected string argument, found {}",
            other.describe()
        ))),
        None => Err(RuntimeError::mismatch("missing string argument")),
    }
}

fn int_arg(args: &[Value], index: usize) -> RuntimeResult<i64> {
    match args.get(index) {
        Some(Value::Int(n)) => Ok(*n),
        Some(other) => Err(RuntimeError::mismatch(format!(
            "expected int argument, found {}",
            other.describe()
        ))),
        None => Err(RuntimeError::mismatch("missing int argument")),
    }
}

fn float_arg(args: &[Value], index: usize) -> RuntimeResult<f64> {
    match args.get(index) {
        Some(Value::Float64(x)) => Ok(*x),
        Some(other) => Err(RuntimeError::mismatch(format!(
            "expected float64 argument, found {}",
            other.describe()
        ))),
        None => Err(RuntimeError::mismatch("missing float64 argument")),
    }
}

fn strings_package(universe: &Universe) -> Package {
    let string = universe.string_type();
    let int = universe.int_type();
    let boolean = universe.bool_type();
    let unary = universe.func_of(&[string.clone()], &[string.clone()], false);
    Package::new("strings")
        .func("ToUpper", unary.clone(), |args| {
            Ok(vec![Value::string(string_arg(&args, 0)?.to_uppercase())])
        })
        .func("ToLower", unary, |args| {
            Ok(vec![Value::string(string_arg(&args, 0)?.to_lowercase())])
        })
        .func(
            "Repeat",
            universe.func_of(&[string.clone(), int], &[string.clone()], false),
            |args| {
                let count = int_arg(&args, 1)?;
                if count < 0 {
                    return Err(RuntimeError::panic("strings: negative Repeat count"));
                }
                Ok(vec![Value::string(string_arg(&args, 0)?.repeat(count as usize))])
            },
        )
        .func(
            "Contains",
            universe.func_of(&[string.clone(), string], &[boolean], false),
            |args| {
                Ok(vec![Value::Bool(
                    string_arg(&args, 0)?.contains(string_arg(&args, 1)?),
                )])
            },
        )
}

fn strconv_package(universe: &Universe) -> Package {
    let string = universe.string_type();
    let int = universe.int_type();
    Package::new("strconv").func(
        "Itoa",
        universe.func_of(&[int], &[string], false),
        |args| Ok(vec![Value::string(int_arg(&args, 0)?.to_string())]),
    )
}

fn math_package(universe: &Universe) -> Package {
    let float = universe
        .basic(Kind::Float64)
        .unwrap_or_else(|| universe.int_type());
    let unary = universe.func_of(&[float.clone()], &[float.clone()], false);
    Package::new("math")
        .func("Sqrt", unary.clone(), |args| {
            Ok(vec![Value::Float64(float_arg(&args, 0)?.sqrt())])
        })
        .func("Abs", unary, |args| {
            Ok(vec![Value::Float64(float_arg(&args, 0)?.abs())])
        })
        .value("Pi", float, Value::Float64(std::f64::consts::PI))
        .value("MaxInt64", universe.int_type(), Value::Int(i64::MAX))
}

fn fmt_package(universe: &Universe) -> Package {
    let any = universe.empty_interface();
    let sprint = universe.func_of(
        &[universe.slice_of(&any)],
        &[universe.string_type()],
        true,
    );
    Package::new("fmt").func("Sprint", sprint, |args| {
        let items = match args.first() {
            Some(Value::Slice(items)) => items.to_vec(),
            _ => Vec::new(),
        };
        let mut out = String::new();
        let mut prev_string = true;
        for (idx, item) in items.iter().enumerate() {
            let is_string = matches!(item, Value::String(_))
                || matches!(item, Value::Boxed(b) if matches!(b.value, Value::String(_)));
            if idx > 0 && !is_string && !prev_string {
                out.push(' ');
            }
            out.push_str(&item.to_string());
            prev_string = is_string;
        }
        Ok(vec![Value::string(out)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::environment::Env;

    #[test]
    fn lookup_unknown_path_fails() {
        let packages = Packages::new();
        let err = packages.lookup("example.com/missing").unwrap_err();
        assert_eq!(
            err.to_string(),
            "error loading package \"example.com/missing\": not found in registry"
        );
    }

    #[test]
    fn package_name_defaults_to_last_segment() {
        let package = Package::new("example.com/tools/textutil");
        assert_eq!(package.name, "textutil");
        assert_eq!(package.with_name("tu").name, "tu");
    }

    #[test]
    fn standard_functions_are_callable() {
        let universe = Universe::new();
        let packages = Packages::standard(&universe);
        let strings = packages.lookup("strings").unwrap();
        let upper = strings.bind("ToUpper").unwrap();
        let Value::Func(func) = &upper.value else {
            panic!("ToUpper is not a function");
        };
        let result = func.call(&Env::root(0), vec![Value::string("go")]).unwrap();
        assert_eq!(result[0].to_string(), "GO");
        assert!(strings.bind("Nope").is_err());
    }
}
