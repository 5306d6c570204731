use crate::language::ast;
use crate::language::errors::{CompileError, CompileErrors};
use crate::language::span::Span;
use crate::language::types::{ChanDir, Field, Kind, Method, Type, Universe};
use crate::runtime::config::EngineConfig;
use crate::runtime::environment::Env;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::imports::{Package, Packages};
use crate::runtime::value::{Boxed, Closure, FuncValue, MapValue, SliceValue, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

mod builtins;
mod channel;
mod closures;
pub mod code;
pub mod constant;
mod expr;
pub mod scalar;
mod stmt;

pub use code::{Code, Function, FunctionBody, Instr, Op, Profile, StepBudget};
pub use constant::{ConstError, ConstValue, Constant};
pub use scalar::{ExprFun, Fun, ScalarKind};

use constant::*;
use scalar::*;

pub type CompileResult<T> = Result<T, CompileError>;

/// How a channel operation was specialized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    /// Works directly on the typed channel storage of a predeclared element type.
    Native { dir: ChanDir },
    /// Goes through the type-erased channel handle.
    Reflective,
}

/// A compiled expression.
#[derive(Clone)]
pub struct Expr {
    /// Static type; `None` for calls without results or with several.
    pub ty: Option<Type>,
    pub fun: ExprFun,
    /// Two-value form (`v, ok := ...`) when the expression supports it.
    pub comma_ok: Option<Fun<(Value, bool)>>,
    /// Result types and closure of a multi-value call.
    pub multi: Option<(Vec<Type>, Fun<Vec<Value>>)>,
    pub constant: Option<Constant>,
    pub tier: Option<Tier>,
    pub span: Span,
}

impl Expr {
    pub fn new(ty: Type, fun: ExprFun, span: Span) -> Self {
        Self {
            ty: Some(ty),
            fun,
            comma_ok: None,
            multi: None,
            constant: None,
            tier: None,
            span,
        }
    }

    /// Wraps a generic closure, narrowing it to the native form of the
    /// type's kind.
    pub fn value(ty: Type, fun: Fun<Value>, span: Span) -> Self {
        let fun = ExprFun::from_value(ty.kind(), fun);
        Self::new(ty, fun, span)
    }

    pub fn void(fun: Fun<()>, span: Span) -> Self {
        Self {
            ty: None,
            fun: ExprFun::Void(fun),
            comma_ok: None,
            multi: None,
            constant: None,
            tier: None,
            span,
        }
    }

    pub fn from_constant(constant: Constant, universe: &Universe, span: Span) -> Self {
        let value = constant.to_value(universe);
        let kind = if constant.is_untyped() {
            universe.default_type(&constant.ty).kind()
        } else {
            constant.ty.kind()
        };
        let generic = {
            let value = value.clone();
            move || -> ExprFun { ExprFun::Value(Arc::new(move |_| Ok(value.clone()))) }
        };
        let fun = dispatch_scalar!(kind, K => match K::unwrap(value) {
            Ok(native) => constant_fun::<K>(native),
            Err(_) => generic(),
        }, _ => generic());
        Self {
            ty: Some(constant.ty.clone()),
            fun,
            comma_ok: None,
            multi: None,
            constant: Some(constant),
            tier: None,
            span,
        }
    }

    pub fn with_comma_ok(mut self, comma_ok: Fun<(Value, bool)>) -> Self {
        self.comma_ok = Some(comma_ok);
        self
    }

    pub fn value_fun(&self) -> Fun<Value> {
        self.fun.to_value()
    }

    pub fn is_constant(&self) -> bool {
        self.constant.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Builtin {
    Append,
    Cap,
    Close,
    Copy,
    Delete,
    Len,
    Make,
    Panic,
}

impl Builtin {
    const ALL: [(&'static str, Builtin); 8] = [
        ("append", Builtin::Append),
        ("cap", Builtin::Cap),
        ("close", Builtin::Close),
        ("copy", Builtin::Copy),
        ("delete", Builtin::Delete),
        ("len", Builtin::Len),
        ("make", Builtin::Make),
        ("panic", Builtin::Panic),
    ];

    fn name(self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(_, builtin)| *builtin == self)
            .map(|(name, _)| *name)
            .unwrap_or("builtin")
    }
}

#[derive(Clone)]
pub(crate) enum Symbol {
    /// Variable stored in `slot` of the environment created for scope `owner`.
    Var { owner: usize, slot: usize, ty: Type },
    Const(Constant),
    Type(Type),
    Builtin(Builtin),
    Package(Arc<Package>),
    /// Package-level function; its closure captures the package environment.
    Func { owner: usize, func: Arc<Function> },
}

struct Scope {
    names: HashMap<String, Symbol>,
    /// Whether the scope gets its own runtime environment.
    materialized: bool,
    slots: usize,
}

impl Scope {
    fn new(materialized: bool) -> Self {
        Self {
            names: HashMap::new(),
            materialized,
            slots: 0,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TargetKind {
    Loop,
    Switch,
}

/// Pending `break`/`continue` jumps of an enclosing loop or switch.
struct Target {
    kind: TargetKind,
    /// Scopes at or above this index are left by a jump to the target.
    base: usize,
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

struct FuncState {
    name: String,
    instrs: Vec<Instr>,
    results: Vec<Type>,
    result_slots: Vec<usize>,
    /// Whether `return` without values reads named result slots.
    named_results: bool,
    /// Index of the function's own scope.
    scope: usize,
    targets: Vec<Target>,
    /// Function literals compiled so far, for naming.
    closures: usize,
}

/// Package variable initializer evaluated once the whole file is compiled.
pub struct PackageInit {
    pub slots: Vec<Option<usize>>,
    pub values: Fun<Vec<Value>>,
    pub span: Span,
}

/// Output of compiling one file.
pub struct CompiledFile {
    pub inits: Vec<PackageInit>,
    pub init_funcs: Vec<Arc<Function>>,
}

const UNIVERSE_SCOPE: usize = 0;
const PACKAGE_SCOPE: usize = 1;

pub struct Compiler {
    universe: Arc<Universe>,
    config: EngineConfig,
    packages: Packages,
    scopes: Vec<Scope>,
    funcs: Vec<FuncState>,
    errors: Vec<CompileError>,
    package: String,
}

impl Compiler {
    pub fn new(universe: Arc<Universe>, config: EngineConfig, packages: Packages) -> Self {
        let mut compiler = Self {
            universe,
            config,
            packages,
            scopes: vec![Scope::new(false), Scope::new(true)],
            funcs: Vec::new(),
            errors: Vec::new(),
            package: "main".to_string(),
        };
        compiler.populate_universe();
        compiler
    }

    fn populate_universe(&mut self) {
        let universe = Arc::clone(&self.universe);
        let names = &mut self.scopes[UNIVERSE_SCOPE].names;
        for kind in Kind::SCALARS {
            if let Some(ty) = universe.basic(kind) {
                names.insert(kind.name().to_string(), Symbol::Type(ty));
            }
        }
        for alias in ["byte", "rune", "any"] {
            if let Some(ty) = universe.lookup(alias) {
                names.insert(alias.to_string(), Symbol::Type(ty));
            }
        }
        names.insert(
            "true".to_string(),
            Symbol::Const(Constant::untyped(&universe, ConstValue::Bool(true))),
        );
        names.insert(
            "false".to_string(),
            Symbol::Const(Constant::untyped(&universe, ConstValue::Bool(false))),
        );
        names.insert(
            "nil".to_string(),
            Symbol::Const(Constant::untyped(&universe, ConstValue::Nil)),
        );
        for (name, builtin) in Builtin::ALL {
            names.insert(name.to_string(), Symbol::Builtin(builtin));
        }
    }

    pub fn universe(&self) -> &Arc<Universe> {
        &self.universe
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn packages_mut(&mut self) -> &mut Packages {
        &mut self.packages
    }

    fn error(&self, message: impl Into<String>, span: Span) -> CompileError {
        CompileError::new(message, span)
    }

    fn record(&mut self, error: CompileError) {
        debug!(message = %error.message, "compile error");
        self.errors.push(error);
    }

    fn take_errors(&mut self) -> Vec<CompileError> {
        std::mem::take(&mut self.errors)
    }

    // ----- scopes -----

    fn push_scope(&mut self, materialized: bool) {
        self.scopes.push(Scope::new(materialized));
    }

    fn pop_scope(&mut self) -> Scope {
        self.scopes.pop().unwrap_or_else(|| Scope::new(false))
    }

    fn top_scope(&self) -> usize {
        self.scopes.len() - 1
    }

    /// Number of runtime environments between the current scope and the
    /// environment of scope `owner`.
    fn depth_of(&self, owner: usize) -> usize {
        self.scopes[owner + 1..]
            .iter()
            .filter(|scope| scope.materialized)
            .count()
    }

    fn lookup(&self, name: &str) -> Option<Symbol> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.names.get(name).cloned())
    }

    fn declare(&mut self, name: &str, symbol: Symbol, span: Span) -> CompileResult<()> {
        if name == "_" {
            return Ok(());
        }
        let top = self.top_scope();
        if self.scopes[top].names.contains_key(name) {
            return Err(self.error(format!("{name} redeclared in this block"), span));
        }
        self.scopes[top].names.insert(name.to_string(), symbol);
        Ok(())
    }

    /// Reserves a slot in the nearest scope that owns an environment.
    fn alloc_slot(&mut self) -> (usize, usize) {
        let owner = self
            .scopes
            .iter()
            .rposition(|scope| scope.materialized)
            .unwrap_or(PACKAGE_SCOPE);
        let slot = self.scopes[owner].slots;
        self.scopes[owner].slots += 1;
        (owner, slot)
    }

    fn declare_var(&mut self, name: &str, ty: Type, span: Span) -> CompileResult<(usize, usize)> {
        if name != "_" && self.scopes[self.top_scope()].names.contains_key(name) {
            return Err(self.error(format!("{name} redeclared in this block"), span));
        }
        let (owner, slot) = self.alloc_slot();
        self.declare(name, Symbol::Var { owner, slot, ty }, span)?;
        Ok((owner, slot))
    }

    // ----- code emission -----

    fn func(&mut self) -> CompileResult<&mut FuncState> {
        self.funcs
            .last_mut()
            .ok_or_else(|| CompileError::new("statement outside function body", Span::default()))
    }

    fn emit(&mut self, instr: Instr) -> CompileResult<usize> {
        let func = self.func()?;
        func.instrs.push(instr);
        Ok(func.instrs.len() - 1)
    }

    fn here(&self) -> usize {
        self.funcs.last().map(|func| func.instrs.len()).unwrap_or(0)
    }

    fn patch_target(&mut self, at: usize, new_target: usize) {
        if let Some(func) = self.funcs.last_mut() {
            match func.instrs.get_mut(at) {
                Some(Instr::Jump { target, .. }) | Some(Instr::JumpIfFalse { target, .. }) => {
                    *target = new_target;
                }
                _ => {}
            }
        }
    }

    /// Opens a block scope. Blocks that declare variables get their own
    /// environment through an `EnterScope` instruction.
    fn enter_block(&mut self, materialized: bool, op: Op) -> CompileResult<Option<usize>> {
        self.push_scope(materialized);
        if materialized {
            let at = self.emit(Instr::EnterScope { op, slots: 0 })?;
            return Ok(Some(at));
        }
        Ok(None)
    }

    fn leave_block(&mut self, enter: Option<usize>, op: Op) -> CompileResult<()> {
        let scope = self.pop_scope();
        if let Some(at) = enter {
            if let Some(Instr::EnterScope { slots, .. }) =
                self.funcs.last_mut().and_then(|func| func.instrs.get_mut(at))
            {
                *slots = scope.slots;
            }
            self.emit(Instr::LeaveScope { op })?;
        }
        Ok(())
    }

    /// Materialized scopes left when jumping out to scope index `base`.
    fn unwind_to(&self, base: usize) -> usize {
        self.scopes[base.min(self.scopes.len())..]
            .iter()
            .filter(|scope| scope.materialized)
            .count()
    }

    // ----- types -----

    pub fn resolve_type(&mut self, ty: &ast::TypeExpr) -> CompileResult<Type> {
        match ty {
            ast::TypeExpr::Named(ident) => match self.lookup(&ident.name) {
                Some(Symbol::Type(ty)) => Ok(ty),
                Some(_) => Err(self.error(format!("{} is not a type", ident.name), ident.span)),
                None => Err(self.error(format!("undefined: {}", ident.name), ident.span)),
            },
            ast::TypeExpr::Qualified {
                package,
                name,
                span,
            } => match self.lookup(package) {
                Some(Symbol::Package(pkg)) => pkg.types.get(name).cloned().ok_or_else(|| {
                    self.error(format!("undefined: {package}.{name}"), *span)
                }),
                _ => Err(self.error(format!("undefined: {package}"), *span)),
            },
            ast::TypeExpr::Chan { dir, elem, .. } => {
                let elem = self.resolve_type(elem)?;
                Ok(self.universe.chan_of(*dir, &elem))
            }
            ast::TypeExpr::Slice { elem, .. } => {
                let elem = self.resolve_type(elem)?;
                Ok(self.universe.slice_of(&elem))
            }
            ast::TypeExpr::Map { key, value, span } => {
                let key = self.resolve_type(key)?;
                if matches!(key.kind(), Kind::Slice | Kind::Map | Kind::Func) {
                    return Err(self.error(format!("invalid map key type {key}"), *span));
                }
                let value = self.resolve_type(value)?;
                Ok(self.universe.map_of(&key, &value))
            }
            ast::TypeExpr::Func {
                params,
                results,
                variadic,
                ..
            } => {
                let mut param_types = params
                    .iter()
                    .map(|param| self.resolve_type(param))
                    .collect::<CompileResult<Vec<_>>>()?;
                if *variadic {
                    if let Some(last) = param_types.pop() {
                        param_types.push(self.universe.slice_of(&last));
                    }
                }
                let result_types = results
                    .iter()
                    .map(|result| self.resolve_type(result))
                    .collect::<CompileResult<Vec<_>>>()?;
                Ok(self.universe.func_of(&param_types, &result_types, *variadic))
            }
            ast::TypeExpr::Struct { fields, span } => {
                let mut resolved: Vec<Field> = Vec::with_capacity(fields.len());
                for field in fields {
                    if resolved.iter().any(|f| f.name == field.name) {
                        return Err(self.error(format!("duplicate field {}", field.name), *span));
                    }
                    let ty = self.resolve_type(&field.ty)?;
                    resolved.push(Field {
                        name: field.name.clone(),
                        ty,
                    });
                }
                Ok(self.universe.struct_of(resolved))
            }
            ast::TypeExpr::Interface { methods, .. } => {
                let mut resolved = Vec::with_capacity(methods.len());
                for method in methods {
                    let params = method
                        .params
                        .iter()
                        .map(|param| self.resolve_type(param))
                        .collect::<CompileResult<Vec<_>>>()?;
                    let results = method
                        .results
                        .iter()
                        .map(|result| self.resolve_type(result))
                        .collect::<CompileResult<Vec<_>>>()?;
                    resolved.push(Method {
                        name: method.name.clone(),
                        ty: self.universe.func_of(&params, &results, false),
                    });
                }
                Ok(self.universe.interface_of(resolved))
            }
        }
    }

    /// Signature of a function declaration or literal. A variadic final
    /// parameter `...T` becomes `[]T`.
    fn signature(
        &mut self,
        params: &[ast::Param],
        results: &[ast::Param],
        variadic: bool,
    ) -> CompileResult<Type> {
        let mut param_types = Vec::with_capacity(params.len());
        for (idx, param) in params.iter().enumerate() {
            let ty = self.resolve_type(&param.ty)?;
            if variadic && idx + 1 == params.len() {
                param_types.push(self.universe.slice_of(&ty));
            } else {
                param_types.push(ty);
            }
        }
        let result_types = results
            .iter()
            .map(|result| self.resolve_type(&result.ty))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(self.universe.func_of(&param_types, &result_types, variadic))
    }

    // ----- files -----

    /// Compiles a whole file into the package scope. Function bodies are
    /// attached to their [`Function`]s; package variable initializers are
    /// returned for the caller to evaluate in declaration order.
    #[instrument(level = "debug", skip_all, fields(package = %file.package))]
    pub fn compile_file(&mut self, file: &ast::File) -> Result<CompiledFile, CompileErrors> {
        if !file.package.is_empty() {
            self.package = file.package.clone();
        }
        for import in &file.imports {
            if let Err(err) = self.compile_import(import) {
                self.record(err);
            }
        }
        for decl in &file.decls {
            if let ast::Decl::Type(decl) = decl {
                if let Err(err) = self.compile_type_decl(decl) {
                    self.record(err);
                }
            }
        }
        for decl in &file.decls {
            if let ast::Decl::Const(decl) = decl {
                if let Err(err) = self.compile_const_decl(decl) {
                    self.record(err);
                }
            }
        }
        let mut functions = Vec::new();
        let mut init_funcs = Vec::new();
        for decl in &file.decls {
            if let ast::Decl::Func(decl) = decl {
                match self.declare_func(decl) {
                    Ok(func) => {
                        if decl.name == "init" {
                            init_funcs.push(Arc::clone(&func));
                        }
                        functions.push((decl, func));
                    }
                    Err(err) => self.record(err),
                }
            }
        }
        let mut inits = Vec::new();
        for decl in &file.decls {
            if let ast::Decl::Var(decl) = decl {
                match self.compile_package_var(decl) {
                    Ok(Some(init)) => inits.push(init),
                    Ok(None) => {}
                    Err(err) => self.record(err),
                }
            }
        }
        for (decl, func) in functions {
            if let Err(err) = self.compile_func_decl(decl, &func) {
                self.record(err);
            }
        }
        let errors = self.take_errors();
        if !errors.is_empty() {
            return Err(CompileErrors::new(errors));
        }
        Ok(CompiledFile { inits, init_funcs })
    }

    fn compile_import(&mut self, import: &ast::Import) -> CompileResult<()> {
        let package = self
            .packages
            .lookup(&import.path)
            .map_err(|err| self.error(err.to_string(), import.span))?;
        let alias = import
            .alias
            .clone()
            .unwrap_or_else(|| package.name.clone());
        debug!(path = %import.path, alias = %alias, "imported package");
        if alias == "_" {
            return Ok(());
        }
        self.scopes[PACKAGE_SCOPE]
            .names
            .insert(alias, Symbol::Package(package));
        Ok(())
    }

    fn compile_type_decl(&mut self, decl: &ast::TypeDecl) -> CompileResult<()> {
        let underlying = self.resolve_type(&decl.ty)?;
        let package = self.package.clone();
        let ty = self.universe.named(Some(&package), &decl.name, &underlying);
        self.declare(&decl.name, Symbol::Type(ty), decl.span)
    }

    fn declare_func(&mut self, decl: &ast::FuncDecl) -> CompileResult<Arc<Function>> {
        let ty = self.signature(&decl.params, &decl.results, decl.variadic)?;
        let func = Arc::new(Function::new(decl.name.clone(), ty));
        if decl.name != "init" {
            let owner = PACKAGE_SCOPE;
            let symbol = Symbol::Func {
                owner,
                func: Arc::clone(&func),
            };
            if self.scopes[owner].names.contains_key(&decl.name) {
                return Err(self.error(format!("{} redeclared in this block", decl.name), decl.span));
            }
            self.scopes[owner].names.insert(decl.name.clone(), symbol);
        }
        Ok(func)
    }

    fn compile_func_decl(&mut self, decl: &ast::FuncDecl, func: &Function) -> CompileResult<()> {
        let body = self.compile_body(
            &decl.name,
            &func.ty,
            &decl.params,
            &decl.results,
            &decl.body,
        )?;
        func.set_body(body);
        Ok(())
    }

    fn compile_package_var(&mut self, decl: &ast::VarDecl) -> CompileResult<Option<PackageInit>> {
        let (types, values) = self.var_spec(decl)?;
        let mut slots = Vec::with_capacity(decl.names.len());
        for (ident, ty) in decl.names.iter().zip(types) {
            if ident.name == "_" {
                slots.push(None);
                continue;
            }
            let (_, slot) = self.declare_var(&ident.name, ty, ident.span)?;
            slots.push(Some(slot));
        }
        Ok(Some(PackageInit {
            slots,
            values,
            span: decl.span,
        }))
    }

    /// Types of the declared names and the closure producing their initial
    /// values, shared by package-level and local `var` declarations.
    fn var_spec(&mut self, decl: &ast::VarDecl) -> CompileResult<(Vec<Type>, Fun<Vec<Value>>)> {
        let declared = match &decl.ty {
            Some(ty) => Some(self.resolve_type(ty)?),
            None => None,
        };
        if decl.values.is_empty() {
            let ty = declared.ok_or_else(|| {
                self.error("missing type or initializer in variable declaration", decl.span)
            })?;
            let zeros: Vec<Value> = decl.names.iter().map(|_| ty.zero()).collect();
            let types = decl.names.iter().map(|_| ty.clone()).collect();
            return Ok((types, Arc::new(move |_| Ok(zeros.clone()))));
        }
        let targets = vec![declared; decl.names.len()];
        self.compile_rhs(&decl.values, &targets, "variable declaration", decl.span)
    }

    fn compile_const_decl(&mut self, decl: &ast::ConstDecl) -> CompileResult<()> {
        let declared = match &decl.ty {
            Some(ty) => Some(self.resolve_type(ty)?),
            None => None,
        };
        if decl.names.len() != decl.values.len() {
            return Err(self.error(
                format!(
                    "assignment mismatch: {} names but {} values",
                    decl.names.len(),
                    decl.values.len()
                ),
                decl.span,
            ));
        }
        for (ident, value) in decl.names.iter().zip(&decl.values) {
            let expr = self.compile_expr(value)?;
            let constant = expr.constant.ok_or_else(|| {
                self.error(format!("{value} is not constant"), value.span())
            })?;
            let constant = match &declared {
                Some(ty) => constant
                    .const_to(ty, &self.universe)
                    .map_err(|err| self.error(err.to_string(), value.span()))?,
                None => constant,
            };
            self.declare(&ident.name, Symbol::Const(constant), ident.span)?;
        }
        Ok(())
    }

    /// The package function `name`, if the loaded files declare it.
    pub fn package_function(&self, name: &str) -> Option<Arc<Function>> {
        match self.scopes[PACKAGE_SCOPE].names.get(name) {
            Some(Symbol::Func { func, .. }) => Some(Arc::clone(func)),
            _ => None,
        }
    }

    /// Slot and type of the package variable `name`.
    pub fn package_var(&self, name: &str) -> Option<(usize, Type)> {
        match self.scopes[PACKAGE_SCOPE].names.get(name) {
            Some(Symbol::Var { slot, ty, .. }) => Some((*slot, ty.clone())),
            _ => None,
        }
    }

    pub fn package_slots(&self) -> usize {
        self.scopes[PACKAGE_SCOPE].slots
    }

    // ----- conversions -----

    /// Converts `expr` for use where a value of type `target` is required,
    /// such as assignment, argument passing and return.
    fn convert_to(&self, expr: Expr, target: &Type, node: &ast::Expr, context: &str) -> CompileResult<Expr> {
        let span = expr.span;
        let ty = expr
            .ty
            .clone()
            .ok_or_else(|| self.error(format!("{node} (no value) used as value"), span))?;
        if let Some(constant) = &expr.constant {
            if constant.is_untyped() {
                let converted = constant.const_to(target, &self.universe).map_err(|err| match err {
                    ConstError::Mismatch { .. } => self.error(
                        format!("cannot use {node} ({ty} constant) as type {target} in {context}"),
                        span,
                    ),
                    other => self.error(other.to_string(), span),
                })?;
                let value = Expr::from_constant(converted, &self.universe, span);
                return Ok(self.box_if_interface(value, target));
            }
        }
        if ty.kind().is_untyped() {
            let default = self.universe.default_type(&ty);
            let accepted = target.kind() == Kind::Bool
                || (target.kind() == Kind::Interface && target.methods().is_empty());
            if !accepted {
                return Err(self.error(
                    format!("cannot use {node} ({ty} value) as type {target} in {context}"),
                    span,
                ));
            }
            let retyped = Expr::new(if target.kind() == Kind::Bool { target.clone() } else { default }, expr.fun, span);
            return Ok(self.box_if_interface(retyped, target));
        }
        if !ty.assignable_to(target) {
            return Err(self.error(
                format!("cannot use {node} (type {ty}) as type {target} in {context}"),
                span,
            ));
        }
        if ty.identical(target) {
            return Ok(expr);
        }
        if target.kind() == Kind::Interface && ty.kind() != Kind::Interface {
            return Ok(self.box_if_interface(expr, target));
        }
        Ok(Expr {
            ty: Some(target.clone()),
            constant: None,
            comma_ok: None,
            multi: None,
            ..expr
        })
    }

    /// Boxes a concrete value with its dynamic type when stored in an
    /// interface. Nil stays nil.
    fn box_if_interface(&self, expr: Expr, target: &Type) -> Expr {
        let Some(ty) = expr.ty.clone() else {
            return expr;
        };
        if target.kind() != Kind::Interface || ty.kind() == Kind::Interface {
            return expr;
        }
        if ty.kind() == Kind::UntypedNil {
            return Expr::value(target.clone(), Arc::new(|_| Ok(Value::Nil)), expr.span);
        }
        let inner = expr.value_fun();
        let dynamic = ty;
        Expr::value(
            target.clone(),
            Arc::new(move |env| Ok(Boxed::new(dynamic.clone(), inner(env)?))),
            expr.span,
        )
    }

    /// Type an untyped expression takes when nothing else is implied.
    fn default_type(&self, expr: &Expr, node: &ast::Expr) -> CompileResult<Type> {
        let ty = expr
            .ty
            .clone()
            .ok_or_else(|| self.error(format!("{node} (no value) used as value"), expr.span))?;
        if ty.kind() == Kind::UntypedNil {
            return Err(self.error("use of untyped nil in assignment", expr.span));
        }
        Ok(self.universe.default_type(&ty))
    }
}

/// Loads the value stored at `(depth, slot)`.
fn load_slot(depth: usize, slot: usize) -> Fun<Value> {
    Arc::new(move |env| env.get(depth, slot))
}

#[cfg(test)]
mod tests;
