use super::*;
use crate::runtime::channel::{Chan, ChanValue};

/// Largest length or capacity `make` accepts.
const MAX_MAKE_LEN: i64 = 1 << 31;

impl Compiler {
    pub(super) fn compile_builtin(
        &mut self,
        builtin: Builtin,
        args: &[ast::Expr],
        spread: bool,
        span: Span,
    ) -> CompileResult<Expr> {
        if spread && builtin != Builtin::Append {
            return Err(self.error(
                format!("invalid operation: invalid use of ... with built-in {}", builtin.name()),
                span,
            ));
        }
        match builtin {
            Builtin::Len | Builtin::Cap => self.compile_len(builtin, args, span),
            Builtin::Close => self.compile_close(args, span),
            Builtin::Make => self.compile_make(args, span),
            Builtin::Append => self.compile_append(args, spread, span),
            Builtin::Delete => self.compile_delete(args, span),
            Builtin::Panic => self.compile_panic(args, span),
            Builtin::Copy => self.compile_copy(args, span),
        }
    }

    fn arity(&self, builtin: Builtin, args: &[ast::Expr], min: usize, max: usize, span: Span) -> CompileResult<()> {
        if args.len() < min {
            return Err(self.error(
                format!("not enough arguments for {}() (expected {min}, found {})", builtin.name(), args.len()),
                span,
            ));
        }
        if args.len() > max {
            return Err(self.error(
                format!("too many arguments for {}() (expected {max}, found {})", builtin.name(), args.len()),
                span,
            ));
        }
        Ok(())
    }

    fn compile_len(&mut self, builtin: Builtin, args: &[ast::Expr], span: Span) -> CompileResult<Expr> {
        self.arity(builtin, args, 1, 1, span)?;
        let arg = &args[0];
        let operand = self.compile_expr(arg)?;
        let int = self.universe.int_type();
        if builtin == Builtin::Len {
            if let Some(ConstValue::String(text)) = operand.constant.as_ref().map(|c| &c.value) {
                let constant = Constant::new(int, ConstValue::Int(text.len() as i128));
                return Ok(Expr::from_constant(constant, &self.universe, span));
            }
        }
        let ty = self.value_type(&operand, arg)?;
        let allowed = match (builtin, ty.kind()) {
            (Builtin::Len, Kind::String | Kind::Map) => true,
            (_, Kind::Slice | Kind::Chan) => true,
            _ => false,
        };
        if !allowed {
            return Err(self.error(
                format!("invalid argument: {arg} (variable of type {ty}) for built-in {}", builtin.name()),
                span,
            ));
        }
        let source = operand.value_fun();
        let capacity = builtin == Builtin::Cap;
        Ok(Expr::new(
            int,
            ExprFun::Int(Arc::new(move |env| {
                let size = match source(env)? {
                    Value::String(text) => text.len(),
                    Value::Slice(slice) if capacity => slice.cap(),
                    Value::Slice(slice) => slice.len(),
                    Value::Map(map) => map.len(),
                    Value::Chan(chan) if capacity => chan.cap(),
                    Value::Chan(chan) => chan.len(),
                    Value::Nil => 0,
                    other => {
                        return Err(RuntimeError::mismatch(format!(
                            "length of {}",
                            other.describe()
                        )))
                    }
                };
                Ok(size as i64)
            })),
            span,
        ))
    }

    fn compile_close(&mut self, args: &[ast::Expr], span: Span) -> CompileResult<Expr> {
        self.arity(Builtin::Close, args, 1, 1, span)?;
        let arg = &args[0];
        let chan = self.compile_expr(arg)?;
        let ty = self.value_type(&chan, arg)?;
        match ty.chan_dir() {
            None => {
                return Err(self.error(
                    format!("invalid operation: non-chan argument {arg} (variable of type {ty}) to close"),
                    span,
                ))
            }
            Some(ChanDir::Recv) => {
                return Err(self.error(
                    format!("invalid operation: cannot close receive-only channel {arg} (variable of type {ty})"),
                    span,
                ))
            }
            Some(_) => {}
        }
        let source = chan.value_fun();
        Ok(Expr::void(
            Arc::new(move |env| match source(env)? {
                Value::Chan(chan) => chan.close(),
                Value::Nil => Err(RuntimeError::CloseOfNil),
                other => Err(RuntimeError::mismatch(format!("closing {}", other.describe()))),
            }),
            span,
        ))
    }

    fn compile_make(&mut self, args: &[ast::Expr], span: Span) -> CompileResult<Expr> {
        let Some((first, sizes)) = args.split_first() else {
            return Err(self.error("not enough arguments for make() (expected 1, found 0)", span));
        };
        let ty = match first {
            ast::Expr::Type(ty) => self.resolve_type(ty)?,
            ast::Expr::Identifier(ident) => match self.lookup(&ident.name) {
                Some(Symbol::Type(ty)) => ty,
                _ => return Err(self.error(format!("{first} is not a type"), first.span())),
            },
            _ => return Err(self.error(format!("{first} is not a type"), first.span())),
        };
        let mut funs = Vec::with_capacity(sizes.len());
        for size in sizes {
            funs.push(self.int_operand(size, "size")?);
        }
        let size = |funs: &[Fun<i64>], at: usize| funs.get(at).cloned();
        match ty.kind() {
            Kind::Chan => {
                self.arity(Builtin::Make, args, 1, 2, span)?;
                let elem = ty.elem().cloned().unwrap_or_else(|| self.universe.empty_interface());
                let cap = size(&funs, 0);
                let elem_kind = elem.kind();
                debug!(elem = %elem, "make channel");
                Ok(Expr::value(
                    ty,
                    Arc::new(move |env| {
                        let cap = match &cap {
                            Some(cap) => cap(env)?,
                            None => 0,
                        };
                        let cap = usize::try_from(cap)
                            .ok()
                            .filter(|&cap| cap as i64 <= MAX_MAKE_LEN)
                            .ok_or_else(|| RuntimeError::panic("makechan: size out of range"))?;
                        let chan = dispatch_scalar!(elem_kind, K => K::new_chan(cap), _ => {
                            ChanValue::Generic(Arc::new(Chan::new(cap)))
                        });
                        Ok(Value::Chan(chan))
                    }),
                    span,
                ))
            }
            Kind::Slice => {
                self.arity(Builtin::Make, args, 2, 3, span)?;
                let zero = ty.elem().map(Type::zero).unwrap_or(Value::Nil);
                let (len, cap) = (size(&funs, 0), size(&funs, 1));
                Ok(Expr::value(
                    ty,
                    Arc::new(move |env| {
                        let len = match &len {
                            Some(len) => len(env)?,
                            None => 0,
                        };
                        let cap = match &cap {
                            Some(cap) => cap(env)?,
                            None => len,
                        };
                        if !(0..=MAX_MAKE_LEN).contains(&len) {
                            return Err(RuntimeError::panic("runtime error: makeslice: len out of range"));
                        }
                        if cap < len || cap > MAX_MAKE_LEN {
                            return Err(RuntimeError::panic("runtime error: makeslice: cap out of range"));
                        }
                        Ok(Value::Slice(SliceValue::with_len(&zero, len as usize, cap as usize)?))
                    }),
                    span,
                ))
            }
            Kind::Map => {
                self.arity(Builtin::Make, args, 1, 2, span)?;
                Ok(Expr::value(ty, Arc::new(|_| Ok(Value::Map(MapValue::new()))), span))
            }
            _ => Err(self.error(
                format!("invalid argument: cannot make {first}; type must be slice, map, or channel"),
                span,
            )),
        }
    }

    fn compile_append(&mut self, args: &[ast::Expr], spread: bool, span: Span) -> CompileResult<Expr> {
        let Some((first, rest)) = args.split_first() else {
            return Err(self.error("not enough arguments for append() (expected 1, found 0)", span));
        };
        let base = self.compile_expr(first)?;
        let ty = self.value_type(&base, first)?;
        if ty.kind() == Kind::UntypedNil {
            return Err(self.error("first argument to append must be a typed slice; have untyped nil", span));
        }
        if ty.kind() != Kind::Slice {
            return Err(self.error(
                format!("invalid argument: {first} (variable of type {ty}) is not a slice"),
                span,
            ));
        }
        let elem = ty.elem().cloned().unwrap_or_else(|| self.universe.empty_interface());
        let zero = elem.zero();
        let source = base.value_fun();
        if spread {
            let [tail] = rest else {
                return Err(self.error("can only use ... with final argument in list", span));
            };
            let extra = self.compile_expr(tail)?;
            let extra = self.convert_to(extra, &ty, tail, "append")?.value_fun();
            return Ok(Expr::value(
                ty,
                Arc::new(move |env| {
                    let base = slice_of(source(env)?)?;
                    let items = slice_of(extra(env)?)?.to_vec();
                    Ok(Value::Slice(base.append(items, &zero)))
                }),
                span,
            ));
        }
        let mut items = Vec::with_capacity(rest.len());
        for arg in rest {
            let compiled = self.compile_expr(arg)?;
            items.push(self.convert_to(compiled, &elem, arg, "append")?.value_fun());
        }
        Ok(Expr::value(
            ty,
            Arc::new(move |env| {
                let base = slice_of(source(env)?)?;
                let values = items.iter().map(|item| item(env)).collect::<RuntimeResult<Vec<_>>>()?;
                Ok(Value::Slice(base.append(values, &zero)))
            }),
            span,
        ))
    }

    fn compile_delete(&mut self, args: &[ast::Expr], span: Span) -> CompileResult<Expr> {
        self.arity(Builtin::Delete, args, 2, 2, span)?;
        let map = self.compile_expr(&args[0])?;
        let ty = self.value_type(&map, &args[0])?;
        let Some(key_ty) = ty.key().cloned() else {
            return Err(self.error(
                format!("invalid argument: {} (variable of type {ty}) is not a map", args[0]),
                span,
            ));
        };
        let key = self.compile_expr(&args[1])?;
        let key = self.convert_to(key, &key_ty, &args[1], "argument to delete")?.value_fun();
        let source = map.value_fun();
        Ok(Expr::void(
            Arc::new(move |env| match source(env)? {
                Value::Map(map) => map.remove(&key(env)?),
                Value::Nil => Ok(()),
                other => Err(RuntimeError::mismatch(format!("deleting from {}", other.describe()))),
            }),
            span,
        ))
    }

    fn compile_panic(&mut self, args: &[ast::Expr], span: Span) -> CompileResult<Expr> {
        self.arity(Builtin::Panic, args, 1, 1, span)?;
        let any = self.universe.empty_interface();
        let value = self.compile_expr(&args[0])?;
        let value = self.convert_to(value, &any, &args[0], "argument to panic")?.value_fun();
        Ok(Expr::void(
            Arc::new(move |env| Err(RuntimeError::panic(value(env)?.to_string()))),
            span,
        ))
    }

    fn compile_copy(&mut self, args: &[ast::Expr], span: Span) -> CompileResult<Expr> {
        self.arity(Builtin::Copy, args, 2, 2, span)?;
        let dst = self.compile_expr(&args[0])?;
        let dst_ty = self.value_type(&dst, &args[0])?;
        let src = self.compile_expr(&args[1])?;
        let src = self.defaulted(src, &args[1])?;
        let src_ty = self.value_type(&src, &args[1])?;
        let bytes_from_string = src_ty.kind() == Kind::String
            && dst_ty.elem().map(Type::kind) == Some(Kind::Uint8);
        let same_elem = match (dst_ty.elem(), src_ty.elem()) {
            (Some(a), Some(b)) => a.identical(b),
            _ => false,
        };
        if dst_ty.kind() != Kind::Slice || !(same_elem || bytes_from_string) {
            return Err(self.error(
                format!("invalid argument: copy expects slice arguments; found {} ({dst_ty}) and {} ({src_ty})", args[0], args[1]),
                span,
            ));
        }
        let (dst, src) = (dst.value_fun(), src.value_fun());
        Ok(Expr::new(
            self.universe.int_type(),
            ExprFun::Int(Arc::new(move |env| {
                let target = match dst(env)? {
                    Value::Nil => return Ok(0),
                    value => slice_of(value)?,
                };
                let items = match src(env)? {
                    Value::String(text) => text.bytes().map(Value::Uint8).collect(),
                    value => slice_of(value)?.to_vec(),
                };
                let count = target.len().min(items.len());
                for (idx, item) in items.into_iter().take(count).enumerate() {
                    target.set(idx as i64, item)?;
                }
                Ok(count as i64)
            })),
            span,
        ))
    }
}

/// The slice held by `value`; nil is the empty slice.
fn slice_of(value: Value) -> RuntimeResult<SliceValue> {
    match value {
        Value::Slice(slice) => Ok(slice),
        Value::Nil => Ok(SliceValue::from_vec(Vec::new())),
        other => Err(RuntimeError::mismatch(format!("expected slice, found {}", other.describe()))),
    }
}
