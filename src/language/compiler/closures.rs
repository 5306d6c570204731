use super::*;
use crate::runtime::value::Complex;

/// Numeric payload of a scalar value, used by conversions.
enum Number {
    Int(i128),
    Float(f64),
    Complex(f64, f64),
}

fn number_of(value: &Value) -> Option<Number> {
    Some(match value {
        Value::Int(v) | Value::Int64(v) => Number::Int(i128::from(*v)),
        Value::Int8(v) => Number::Int(i128::from(*v)),
        Value::Int16(v) => Number::Int(i128::from(*v)),
        Value::Int32(v) => Number::Int(i128::from(*v)),
        Value::Uint(v) | Value::Uint64(v) | Value::Uintptr(v) => Number::Int(i128::from(*v)),
        Value::Uint8(v) => Number::Int(i128::from(*v)),
        Value::Uint16(v) => Number::Int(i128::from(*v)),
        Value::Uint32(v) => Number::Int(i128::from(*v)),
        Value::Float32(v) => Number::Float(f64::from(*v)),
        Value::Float64(v) => Number::Float(*v),
        Value::Complex64(v) => Number::Complex(f64::from(v.re), f64::from(v.im)),
        Value::Complex128(v) => Number::Complex(v.re, v.im),
        _ => return None,
    })
}

/// Runtime conversion `T(v)` between values of different kinds.
fn cast_value(value: Value, target: Kind) -> RuntimeResult<Value> {
    if target == Kind::String {
        return match value {
            Value::String(_) => Ok(value),
            Value::Slice(slice) => {
                let mut bytes = Vec::with_capacity(slice.len());
                let mut text = String::new();
                for item in slice.to_vec() {
                    match item {
                        Value::Uint8(b) => bytes.push(b),
                        Value::Int32(r) => {
                            text.push(u32::try_from(r).ok().and_then(char::from_u32).unwrap_or('\u{FFFD}'))
                        }
                        other => {
                            return Err(RuntimeError::mismatch(format!(
                                "converting {} to string",
                                other.describe()
                            )))
                        }
                    }
                }
                if !bytes.is_empty() {
                    let decoded = String::from_utf8(bytes)
                        .map_err(|_| RuntimeError::InvalidUtf8 { op: "string conversion" })?;
                    text.push_str(&decoded);
                }
                Ok(Value::string(text))
            }
            other => match number_of(&other) {
                Some(Number::Int(code)) => {
                    let ch = u32::try_from(code)
                        .ok()
                        .and_then(char::from_u32)
                        .unwrap_or('\u{FFFD}');
                    Ok(Value::string(ch.to_string()))
                }
                _ => Err(RuntimeError::mismatch(format!(
                    "converting {} to string",
                    other.describe()
                ))),
            },
        };
    }
    let number = number_of(&value).ok_or_else(|| {
        RuntimeError::mismatch(format!("converting {} to {}", value.describe(), target.name()))
    })?;
    Ok(match (number, target) {
        (Number::Int(v), _) => int_value(v, target),
        (Number::Float(v), Kind::Float32) => Value::Float32(v as f32),
        (Number::Float(v), Kind::Float64) => Value::Float64(v),
        (Number::Float(v), kind) if kind.is_integer() => int_value(v as i128, kind),
        (Number::Complex(re, im), Kind::Complex64) => {
            Value::Complex64(Complex::new(re as f32, im as f32))
        }
        (Number::Complex(re, im), Kind::Complex128) => Value::Complex128(Complex::new(re, im)),
        (_, kind) => {
            return Err(RuntimeError::mismatch(format!(
                "converting {} to {}",
                value.describe(),
                kind.name()
            )))
        }
    })
}

/// Splits a string into bytes or runes for `[]byte(s)` and `[]rune(s)`.
fn explode_string(text: &str, elem: Kind) -> Value {
    let items = if elem == Kind::Int32 {
        text.chars().map(|ch| Value::Int32(ch as i32)).collect()
    } else {
        text.bytes().map(Value::Uint8).collect()
    };
    Value::Slice(SliceValue::from_vec(items))
}

impl Compiler {
    /// Compiles a function body into its own frame layout: parameters
    /// first, then results, then locals.
    pub(super) fn compile_body(
        &mut self,
        name: &str,
        ty: &Type,
        params: &[ast::Param],
        results: &[ast::Param],
        body: &ast::Block,
    ) -> CompileResult<FunctionBody> {
        self.push_scope(true);
        let scope = self.top_scope();
        for (param, param_ty) in params.iter().zip(ty.params()) {
            let (owner, slot) = self.alloc_slot();
            if let Some(param_name) = &param.name {
                let symbol = Symbol::Var {
                    owner,
                    slot,
                    ty: param_ty.clone(),
                };
                if let Err(err) = self.declare(param_name, symbol, param.span) {
                    self.record(err);
                }
            }
        }
        let mut result_slots = Vec::with_capacity(results.len());
        for (result, result_ty) in results.iter().zip(ty.results()) {
            let (owner, slot) = self.alloc_slot();
            result_slots.push(slot);
            if let Some(result_name) = &result.name {
                let symbol = Symbol::Var {
                    owner,
                    slot,
                    ty: result_ty.clone(),
                };
                if let Err(err) = self.declare(result_name, symbol, result.span) {
                    self.record(err);
                }
            }
        }
        self.funcs.push(FuncState {
            name: name.to_string(),
            instrs: Vec::new(),
            results: ty.results().to_vec(),
            result_slots: result_slots.clone(),
            named_results: results.iter().any(|result| result.name.is_some()),
            scope,
            targets: Vec::new(),
            closures: 0,
        });
        self.compile_stmts(&body.statements);
        let values = if result_slots.is_empty() {
            None
        } else {
            Some(read_slots(0, result_slots))
        };
        let emitted = self.emit(Instr::Return {
            op: Op::Return,
            values,
        });
        let state = self.funcs.pop();
        let frame = self.pop_scope();
        emitted?;
        let instrs = state.map(|state| state.instrs).unwrap_or_default();
        let code = Arc::new(Code {
            name: name.to_string(),
            instrs,
            trace: self.config.trace,
        });
        debug!(
            function = name,
            instructions = code.len(),
            slots = frame.slots,
            "compiled function"
        );
        Ok(FunctionBody {
            code,
            frame_size: frame.slots,
            params: params.len(),
            result_zeros: ty.results().iter().map(Type::zero).collect(),
        })
    }

    pub(super) fn compile_func_lit(&mut self, lit: &ast::FuncLit) -> CompileResult<Expr> {
        let ty = self.signature(&lit.params, &lit.results, lit.variadic)?;
        let name = match self.funcs.last_mut() {
            Some(outer) => {
                outer.closures += 1;
                format!("{}.func{}", outer.name, outer.closures)
            }
            None => format!("{}.init.func", self.package),
        };
        let body = self.compile_body(&name, &ty, &lit.params, &lit.results, &lit.body)?;
        let func = Arc::new(Function::with_body(name, ty.clone(), body));
        Ok(Expr::value(
            ty,
            Arc::new(move |env| {
                Ok(Value::Func(FuncValue::Closure(Closure {
                    func: Arc::clone(&func),
                    env: env.clone(),
                })))
            }),
            lit.span,
        ))
    }

    pub(super) fn compile_call(
        &mut self,
        callee: &ast::Expr,
        args: &[ast::Expr],
        spread: bool,
        span: Span,
    ) -> CompileResult<Expr> {
        match callee {
            ast::Expr::Identifier(ident) => match self.lookup(&ident.name) {
                Some(Symbol::Builtin(builtin)) => {
                    return self.compile_builtin(builtin, args, spread, span)
                }
                Some(Symbol::Type(ty)) => return self.compile_conversion(&ty, args, span),
                _ => {}
            },
            ast::Expr::Type(ty) => {
                let ty = self.resolve_type(ty)?;
                return self.compile_conversion(&ty, args, span);
            }
            ast::Expr::Selector { base, field, .. } => {
                if let ast::Expr::Identifier(ident) = base.as_ref() {
                    if let Some(Symbol::Package(package)) = self.lookup(&ident.name) {
                        if let Some(ty) = package.types.get(&field.name).cloned() {
                            return self.compile_conversion(&ty, args, span);
                        }
                    }
                }
            }
            _ => {}
        }

        let direct = match callee {
            ast::Expr::Identifier(ident) => match self.lookup(&ident.name) {
                Some(Symbol::Func { owner, func }) => Some((self.depth_of(owner), func)),
                _ => None,
            },
            _ => None,
        };
        let target = self.compile_expr(callee)?;
        let fty = self.value_type(&target, callee)?;
        if fty.kind() != Kind::Func {
            return Err(self.error(
                format!("invalid operation: cannot call non-function {callee} (variable of type {fty})"),
                span,
            ));
        }
        let args = self.compile_args(callee, &fty, args, spread, span)?;
        let results = fty.results().to_vec();
        let call: Fun<Vec<Value>> = match direct {
            Some((depth, func)) => Arc::new(move |env| {
                let values = args(env)?;
                func.invoke(env.ancestor(depth)?, values, env.budget())
            }),
            None => {
                let callee = target.value_fun();
                Arc::new(move |env| match callee(env)? {
                    Value::Func(func) => {
                        let values = args(env)?;
                        func.call(env, values)
                    }
                    Value::Nil => Err(RuntimeError::NilFunc),
                    other => Err(RuntimeError::mismatch(format!(
                        "calling {}",
                        other.describe()
                    ))),
                })
            }
        };
        Ok(call_result(results, call, span))
    }

    /// Argument list of a call, converted to the parameter types. Variadic
    /// arguments are packed into a slice unless spread with `...`.
    fn compile_args(
        &mut self,
        callee: &ast::Expr,
        fty: &Type,
        args: &[ast::Expr],
        spread: bool,
        span: Span,
    ) -> CompileResult<Fun<Vec<Value>>> {
        let params = fty.params().to_vec();
        let variadic = fty.is_variadic();
        if spread && !variadic {
            return Err(self.error(
                format!("have (...) arguments but {callee} is not variadic"),
                span,
            ));
        }

        let mut compiled = Vec::with_capacity(args.len());
        for arg in args {
            compiled.push(self.compile_expr(arg)?);
        }
        if let [single] = compiled.as_slice() {
            if let Some((types, values)) = single.multi.clone() {
                return self.spread_results(callee, &params, variadic, types, values, span);
            }
        }

        let fixed = if variadic && !spread {
            params.len() - 1
        } else {
            params.len()
        };
        if args.len() < fixed || ((!variadic || spread) && args.len() > fixed) {
            let problem = if args.len() < fixed { "not enough" } else { "too many" };
            return Err(self.error(format!("{problem} arguments in call to {callee}"), span));
        }
        let mut compiled = compiled.into_iter();
        let mut funs: Vec<Fun<Value>> = Vec::with_capacity(args.len());
        for (arg, param) in args.iter().zip(&params).take(fixed) {
            let Some(expr) = compiled.next() else { break };
            let expr = self.convert_to(expr, param, arg, "argument")?;
            funs.push(expr.value_fun());
        }
        if fixed == params.len() {
            return Ok(Arc::new(move |env| funs.iter().map(|f| f(env)).collect()));
        }
        let elem = params
            .last()
            .and_then(|last| last.elem().cloned())
            .unwrap_or_else(|| self.universe.empty_interface());
        let mut rest: Vec<Fun<Value>> = Vec::with_capacity(args.len() - fixed);
        for (arg, expr) in args[fixed..].iter().zip(compiled) {
            let expr = self.convert_to(expr, &elem, arg, "argument")?;
            rest.push(expr.value_fun());
        }
        Ok(Arc::new(move |env| {
            let mut values = Vec::with_capacity(funs.len() + 1);
            for f in &funs {
                values.push(f(env)?);
            }
            if rest.is_empty() {
                values.push(Value::Nil);
            } else {
                let packed = rest.iter().map(|f| f(env)).collect::<RuntimeResult<Vec<_>>>()?;
                values.push(Value::Slice(SliceValue::from_vec(packed)));
            }
            Ok(values)
        }))
    }

    /// `f(g())` where `g` returns several values.
    fn spread_results(
        &self,
        callee: &ast::Expr,
        params: &[Type],
        variadic: bool,
        types: Vec<Type>,
        values: Fun<Vec<Value>>,
        span: Span,
    ) -> CompileResult<Fun<Vec<Value>>> {
        let fixed = if variadic { params.len() - 1 } else { params.len() };
        if types.len() < fixed || (!variadic && types.len() > fixed) {
            return Err(self.error(
                format!("wrong number of arguments in call to {callee}: have {}, want {}", types.len(), params.len()),
                span,
            ));
        }
        let elem = params.last().and_then(|last| last.elem().cloned());
        let mut boxes = Vec::with_capacity(types.len());
        for (idx, ty) in types.iter().enumerate() {
            let want = if idx < fixed {
                params[idx].clone()
            } else {
                elem.clone().unwrap_or_else(|| self.universe.empty_interface())
            };
            if !ty.assignable_to(&want) {
                return Err(self.error(
                    format!("cannot use {ty} value as type {want} in argument to {callee}"),
                    span,
                ));
            }
            boxes.push(boxing(ty, &want));
        }
        Ok(Arc::new(move |env| {
            let mut results = values(env)?;
            for (value, boxed) in results.iter_mut().zip(&boxes) {
                if let Some(ty) = boxed {
                    box_value(value, ty);
                }
            }
            if variadic {
                let rest = results.split_off(fixed);
                results.push(Value::Slice(SliceValue::from_vec(rest)));
            }
            Ok(results)
        }))
    }

    /// `T(x)`.
    fn compile_conversion(&mut self, target: &Type, args: &[ast::Expr], span: Span) -> CompileResult<Expr> {
        let [arg] = args else {
            return Err(self.error(
                format!("wrong argument count in conversion to {target}"),
                span,
            ));
        };
        let expr = self.compile_expr(arg)?;
        if let Some(constant) = &expr.constant {
            if target.kind().is_scalar() {
                let converted = constant.convert(target, &self.universe).map_err(|err| {
                    self.error(
                        format!("cannot convert {arg} ({} constant) to type {target}: {err}", constant.ty),
                        span,
                    )
                })?;
                return Ok(Expr::from_constant(converted, &self.universe, span));
            }
        }
        let source = self.value_type(&expr, arg)?;
        let expr = if source.kind().is_untyped() {
            if target.kind() == Kind::Interface || source.kind() == Kind::UntypedNil {
                return self.convert_to(expr, target, arg, "conversion");
            }
            self.defaulted(expr, arg)?
        } else {
            expr
        };
        let source = self.value_type(&expr, arg)?;
        if !source.convertible_to(target) {
            return Err(self.error(
                format!("cannot convert {arg} (variable of type {source}) to type {target}"),
                span,
            ));
        }
        if target.kind() == Kind::Interface {
            return self.convert_to(expr, target, arg, "conversion");
        }
        if source.kind() == target.kind() && source.underlying().identical(&target.underlying()) {
            return Ok(Expr::new(target.clone(), expr.fun, span));
        }
        let inner = expr.value_fun();
        if source.kind() == Kind::String && target.kind() == Kind::Slice {
            let elem = target.elem().map(Type::kind).unwrap_or(Kind::Uint8);
            return Ok(Expr::value(
                target.clone(),
                Arc::new(move |env| match inner(env)? {
                    Value::String(text) => Ok(explode_string(&text, elem)),
                    other => Err(RuntimeError::mismatch(format!(
                        "converting {} to slice",
                        other.describe()
                    ))),
                }),
                span,
            ));
        }
        let kind = target.kind();
        Ok(Expr::value(
            target.clone(),
            Arc::new(move |env| cast_value(inner(env)?, kind)),
            span,
        ))
    }
}

/// Reads result slots at `depth` into a result list.
pub(super) fn read_slots(depth: usize, slots: Vec<usize>) -> Fun<Vec<Value>> {
    Arc::new(move |env| slots.iter().map(|slot| env.get(depth, *slot)).collect())
}

/// Shapes a call according to its result count.
fn call_result(results: Vec<Type>, call: Fun<Vec<Value>>, span: Span) -> Expr {
    match results.len() {
        0 => Expr::void(Arc::new(move |env| call(env).map(|_| ())), span),
        1 => {
            let ty = results[0].clone();
            Expr::value(
                ty,
                Arc::new(move |env| {
                    let mut values = call(env)?;
                    values
                        .pop()
                        .ok_or_else(|| RuntimeError::mismatch("call returned no value"))
                }),
                span,
            )
        }
        _ => {
            let tuple = Arc::clone(&call);
            Expr {
                ty: None,
                fun: ExprFun::Value(Arc::new(move |env| Ok(Value::Tuple(tuple(env)?)))),
                comma_ok: None,
                multi: Some((results, call)),
                constant: None,
                tier: None,
                span,
            }
        }
    }
}

/// Dynamic type to box with when a value of `source` is stored as `target`.
pub(super) fn boxing(source: &Type, target: &Type) -> Option<Type> {
    (target.kind() == Kind::Interface && source.kind() != Kind::Interface).then(|| source.clone())
}

pub(super) fn box_value(value: &mut Value, ty: &Type) {
    if !value.is_nil() {
        let inner = std::mem::replace(value, Value::Nil);
        *value = Boxed::new(ty.clone(), inner);
    }
}
