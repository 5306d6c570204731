use super::*;
use crate::language::ast::{BinaryOp, Literal, UnaryOp};
use crate::runtime::value::MapKey;
use scalar::{Arith, Integer, KBool, KString};

impl Compiler {
    pub fn compile_expr(&mut self, expr: &ast::Expr) -> CompileResult<Expr> {
        match expr {
            ast::Expr::Identifier(ident) => self.compile_ident(ident),
            ast::Expr::Literal(literal) => Ok(self.compile_literal(literal)),
            ast::Expr::Unary {
                op,
                expr: operand,
                span,
            } => self.compile_unary(*op, operand, *span),
            ast::Expr::Binary {
                op,
                left,
                right,
                span,
            } => {
                let x = self.compile_expr(left)?;
                let y = self.compile_expr(right)?;
                self.binary_exprs(*op, x, y, left, right, *span)
            }
            ast::Expr::Call {
                callee,
                args,
                spread,
                span,
            } => self.compile_call(callee, args, *spread, *span),
            ast::Expr::Index { base, index, span } => self.compile_index(base, index, *span),
            ast::Expr::Slice {
                base,
                low,
                high,
                span,
            } => self.compile_slice_expr(base, low.as_deref(), high.as_deref(), *span),
            ast::Expr::Selector { base, field, span } => self.compile_selector(base, field, *span),
            ast::Expr::TypeAssert {
                expr: operand,
                ty,
                span,
            } => self.compile_type_assert(operand, ty, *span),
            ast::Expr::FuncLit(lit) => self.compile_func_lit(lit),
            ast::Expr::Composite { ty, elements, span } => {
                self.compile_composite(ty, elements, *span)
            }
            ast::Expr::Type(ty) => {
                Err(self.error(format!("{ty} (type) is not an expression"), ty.span()))
            }
        }
    }

    fn compile_ident(&mut self, ident: &ast::Identifier) -> CompileResult<Expr> {
        let span = ident.span;
        if ident.name == "_" {
            return Err(self.error("cannot use _ as value", span));
        }
        match self.lookup(&ident.name) {
            Some(Symbol::Var { owner, slot, ty }) => {
                let depth = self.depth_of(owner);
                Ok(Expr::value(ty, load_slot(depth, slot), span))
            }
            Some(Symbol::Const(constant)) => {
                Ok(Expr::from_constant(constant, &self.universe, span))
            }
            Some(Symbol::Func { owner, func }) => {
                let depth = self.depth_of(owner);
                let ty = func.ty.clone();
                Ok(Expr::value(
                    ty,
                    Arc::new(move |env| {
                        Ok(Value::Func(FuncValue::Closure(Closure {
                            func: Arc::clone(&func),
                            env: env.ancestor(depth)?.clone(),
                        })))
                    }),
                    span,
                ))
            }
            Some(Symbol::Type(ty)) => {
                Err(self.error(format!("{} (type {ty}) is not an expression", ident.name), span))
            }
            Some(Symbol::Builtin(builtin)) => Err(self.error(
                format!("{} (built-in function) must be called", builtin.name()),
                span,
            )),
            Some(Symbol::Package(package)) => Err(self.error(
                format!("use of package {} without selector", package.name),
                span,
            )),
            None => Err(self.error(format!("undefined: {}", ident.name), span)),
        }
    }

    fn compile_literal(&self, literal: &Literal) -> Expr {
        let constant = match literal {
            Literal::Int(v, _) => Constant::untyped(&self.universe, ConstValue::Int(*v)),
            Literal::Float(v, _) => Constant::untyped(&self.universe, ConstValue::Float(*v)),
            Literal::Imaginary(v, _) => {
                Constant::untyped(&self.universe, ConstValue::Complex(0.0, *v))
            }
            Literal::Rune(ch, _) => Constant::rune(&self.universe, *ch),
            Literal::String(s, _) => {
                Constant::untyped(&self.universe, ConstValue::String(Arc::from(s.as_str())))
            }
        };
        Expr::from_constant(constant, &self.universe, literal.span())
    }

    fn compile_unary(&mut self, op: UnaryOp, operand: &ast::Expr, span: Span) -> CompileResult<Expr> {
        if op == UnaryOp::Recv {
            return self.compile_recv(operand, span);
        }
        let x = self.compile_expr(operand)?;
        if let Some(constant) = &x.constant {
            let folded = fold_unary(op, constant).map_err(|err| self.error(err.to_string(), span))?;
            return Ok(Expr::from_constant(folded, &self.universe, span));
        }
        let ty = self.value_type(&x, operand)?;
        let kind = ty.kind();
        let undefined = || {
            self.error(
                format!(
                    "invalid operation: operator {} not defined on {operand} (variable of type {ty})",
                    op.symbol()
                ),
                span,
            )
        };
        let fun = match op {
            UnaryOp::Plus if kind.is_numeric() => x.fun,
            UnaryOp::Neg => dispatch_arith!(kind, K => {
                let f = native_fun::<K>(&x.fun);
                K::lift(Arc::new(move |env| Ok(Arith::neg(f(env)?))))
            }, _ => return Err(undefined())),
            UnaryOp::Not if matches!(kind, Kind::Bool | Kind::UntypedBool) => {
                let f = native_fun::<KBool>(&x.fun);
                ExprFun::Bool(Arc::new(move |env| Ok(!f(env)?)))
            }
            UnaryOp::BitNot => dispatch_integer!(kind, K => {
                let f = native_fun::<K>(&x.fun);
                K::lift(Arc::new(move |env| Ok(Integer::not(f(env)?))))
            }, _ => return Err(undefined())),
            _ => return Err(undefined()),
        };
        Ok(Expr::new(ty, fun, span))
    }

    /// Static type of an expression used as a single value.
    pub(super) fn value_type(&self, expr: &Expr, node: &ast::Expr) -> CompileResult<Type> {
        if expr.multi.is_some() {
            return Err(self.error(
                format!("multiple-value {node} in single-value context"),
                expr.span,
            ));
        }
        expr.ty
            .clone()
            .ok_or_else(|| self.error(format!("{node} (no value) used as value"), expr.span))
    }

    /// Gives an untyped operand the type `target`: constants are converted
    /// with range checks, untyped booleans are simply retyped.
    fn retype(&self, expr: Expr, target: &Type) -> CompileResult<Expr> {
        let span = expr.span;
        if let Some(constant) = &expr.constant {
            let converted = constant
                .const_to(target, &self.universe)
                .map_err(|err| self.error(err.to_string(), span))?;
            let expr = Expr::from_constant(converted, &self.universe, span);
            return Ok(self.box_if_interface(expr, target));
        }
        Ok(Expr::new(target.clone(), expr.fun, span))
    }

    /// Gives an untyped operand its default type.
    pub(super) fn defaulted(&self, expr: Expr, node: &ast::Expr) -> CompileResult<Expr> {
        let ty = self.value_type(&expr, node)?;
        if !ty.kind().is_untyped() {
            return Ok(expr);
        }
        let target = self.default_type(&expr, node)?;
        self.retype(expr, &target)
    }

    /// Brings both operands of a binary operation to one type.
    fn unify_operands(
        &self,
        op: BinaryOp,
        x: Expr,
        y: Expr,
        left: &ast::Expr,
        right: &ast::Expr,
        span: Span,
    ) -> CompileResult<(Expr, Expr, Type)> {
        let tx = self.value_type(&x, left)?;
        let ty = self.value_type(&y, right)?;
        match (tx.kind().is_untyped(), ty.kind().is_untyped()) {
            (false, false) => {
                if !tx.identical(&ty) {
                    return Err(self.error(
                        format!(
                            "invalid operation: {left} {} {right} (mismatched types {tx} and {ty})",
                            op.symbol()
                        ),
                        span,
                    ));
                }
                Ok((x, y, tx))
            }
            (true, false) => {
                let x = self.retype(x, &ty)?;
                Ok((x, y, ty))
            }
            (false, true) => {
                let y = self.retype(y, &tx)?;
                Ok((x, y, tx))
            }
            (true, true) => {
                if tx.kind() == Kind::UntypedNil || ty.kind() == Kind::UntypedNil {
                    return Err(self.error(
                        format!("invalid operation: {left} {} {right} (operator not defined on nil)", op.symbol()),
                        span,
                    ));
                }
                let target = self.universe.default_type(if x.constant.is_some() { &ty } else { &tx });
                let x = self.retype(x, &target)?;
                let y = self.retype(y, &target)?;
                Ok((x, y, target))
            }
        }
    }

    /// Binary operation on already compiled operands.
    pub(super) fn binary_exprs(
        &mut self,
        op: BinaryOp,
        x: Expr,
        y: Expr,
        left: &ast::Expr,
        right: &ast::Expr,
        span: Span,
    ) -> CompileResult<Expr> {
        if op.is_shift() {
            return self.compile_shift(op, x, y, left, right, span);
        }
        if let (Some(a), Some(b)) = (&x.constant, &y.constant) {
            let folded = fold_binary(op, a, b, &self.universe)
                .map_err(|err| self.error(err.to_string(), span))?;
            return Ok(Expr::from_constant(folded, &self.universe, span));
        }
        let (x, y, ty) = self.unify_operands(op, x, y, left, right, span)?;
        if op.is_comparison() {
            return self.compile_comparison(op, x, y, &ty, left, right, span);
        }
        let kind = ty.kind();
        let undefined = || {
            self.error(
                format!(
                    "invalid operation: operator {} not defined on {left} (variable of type {ty})",
                    op.symbol()
                ),
                span,
            )
        };
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            if !matches!(kind, Kind::Bool | Kind::UntypedBool) {
                return Err(undefined());
            }
            let (f, g) = (native_fun::<KBool>(&x.fun), native_fun::<KBool>(&y.fun));
            let fun: Fun<bool> = if op == BinaryOp::And {
                Arc::new(move |env| Ok(f(env)? && g(env)?))
            } else {
                Arc::new(move |env| Ok(f(env)? || g(env)?))
            };
            return Ok(Expr::new(ty, ExprFun::Bool(fun), span));
        }
        if matches!(op, BinaryOp::Div | BinaryOp::Rem) && kind.is_integer() {
            if let Some(0) = y.constant.as_ref().and_then(Constant::as_int) {
                return Err(self.error("invalid operation: division by zero", span));
            }
        }
        if op == BinaryOp::Add && kind == Kind::String {
            let (f, g) = (native_fun::<KString>(&x.fun), native_fun::<KString>(&y.fun));
            let fun = ExprFun::String(Arc::new(move |env| {
                let (a, b) = (f(env)?, g(env)?);
                let mut joined = String::with_capacity(a.len() + b.len());
                joined.push_str(&a);
                joined.push_str(&b);
                Ok(Arc::from(joined))
            }));
            return Ok(Expr::new(ty, fun, span));
        }
        let fun = match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                dispatch_arith!(kind, K => {
                    let (f, g) = (native_fun::<K>(&x.fun), native_fun::<K>(&y.fun));
                    match op {
                        BinaryOp::Add => K::lift(Arc::new(move |env| Ok(Arith::add(f(env)?, g(env)?)))),
                        BinaryOp::Sub => K::lift(Arc::new(move |env| Ok(Arith::sub(f(env)?, g(env)?)))),
                        BinaryOp::Mul => K::lift(Arc::new(move |env| Ok(Arith::mul(f(env)?, g(env)?)))),
                        _ => K::lift(Arc::new(move |env| Arith::div(f(env)?, g(env)?))),
                    }
                }, _ => return Err(undefined()))
            }
            BinaryOp::Rem
            | BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor
            | BinaryOp::AndNot => dispatch_integer!(kind, K => {
                let (f, g) = (native_fun::<K>(&x.fun), native_fun::<K>(&y.fun));
                match op {
                    BinaryOp::Rem => K::lift(Arc::new(move |env| Integer::rem(f(env)?, g(env)?))),
                    BinaryOp::BitAnd => K::lift(Arc::new(move |env| Ok(Integer::and(f(env)?, g(env)?)))),
                    BinaryOp::BitOr => K::lift(Arc::new(move |env| Ok(Integer::or(f(env)?, g(env)?)))),
                    BinaryOp::BitXor => K::lift(Arc::new(move |env| Ok(Integer::xor(f(env)?, g(env)?)))),
                    _ => K::lift(Arc::new(move |env| Ok(Integer::and_not(f(env)?, g(env)?)))),
                }
            }, _ => return Err(undefined())),
            _ => return Err(undefined()),
        };
        Ok(Expr::new(ty, fun, span))
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_comparison(
        &self,
        op: BinaryOp,
        x: Expr,
        y: Expr,
        ty: &Type,
        left: &ast::Expr,
        right: &ast::Expr,
        span: Span,
    ) -> CompileResult<Expr> {
        let kind = ty.kind();
        let result = self
            .universe
            .untyped(Kind::UntypedBool)
            .unwrap_or_else(|| self.universe.bool_type());
        let against_nil = x.constant.as_ref().map(|c| c.value == ConstValue::Nil).unwrap_or(false)
            || y.constant.as_ref().map(|c| c.value == ConstValue::Nil).unwrap_or(false);
        let fun: Fun<bool> = match op {
            BinaryOp::Eq | BinaryOp::NotEq => {
                if matches!(kind, Kind::Slice | Kind::Map | Kind::Func) && !against_nil {
                    return Err(self.error(
                        format!(
                            "invalid operation: {left} {} {right} ({kind} can only be compared to nil)",
                            op.symbol(),
                            kind = kind.name()
                        ),
                        span,
                    ));
                }
                let negate = op == BinaryOp::NotEq;
                dispatch_scalar!(kind, K => {
                    let (f, g) = (native_fun::<K>(&x.fun), native_fun::<K>(&y.fun));
                    Arc::new(move |env| Ok((f(env)? == g(env)?) != negate))
                }, _ => {
                    let (f, g) = (x.value_fun(), y.value_fun());
                    Arc::new(move |env| Ok(f(env)?.equals(&g(env)?)? != negate))
                })
            }
            _ => dispatch_ordered!(kind, K => {
                let (f, g) = (native_fun::<K>(&x.fun), native_fun::<K>(&y.fun));
                match op {
                    BinaryOp::Lt => Arc::new(move |env| Ok(f(env)? < g(env)?)),
                    BinaryOp::LtEq => Arc::new(move |env| Ok(f(env)? <= g(env)?)),
                    BinaryOp::Gt => Arc::new(move |env| Ok(f(env)? > g(env)?)),
                    _ => Arc::new(move |env| Ok(f(env)? >= g(env)?)),
                }
            }, _ => return Err(self.error(
                format!(
                    "invalid operation: {left} {} {right} (operator {} not defined on {ty})",
                    op.symbol(),
                    op.symbol()
                ),
                span,
            ))),
        };
        Ok(Expr::new(result, ExprFun::Bool(fun), span))
    }

    fn compile_shift(
        &mut self,
        op: BinaryOp,
        x: Expr,
        y: Expr,
        left: &ast::Expr,
        right: &ast::Expr,
        span: Span,
    ) -> CompileResult<Expr> {
        if let (Some(a), Some(b)) = (&x.constant, &y.constant) {
            let folded = fold_binary(op, a, b, &self.universe)
                .map_err(|err| self.error(err.to_string(), span))?;
            return Ok(Expr::from_constant(folded, &self.universe, span));
        }
        let count = self.shift_count(y, right)?;
        let x = match &x.constant {
            Some(constant) if constant.is_untyped() => {
                let int = self.universe.int_type();
                self.retype(x, &int)?
            }
            _ => x,
        };
        let ty = self.value_type(&x, left)?;
        let fun = dispatch_integer!(ty.kind(), K => {
            let f = native_fun::<K>(&x.fun);
            if op == BinaryOp::Shl {
                K::lift(Arc::new(move |env| Ok(Integer::shl(f(env)?, count(env)?))))
            } else {
                K::lift(Arc::new(move |env| Ok(Integer::shr(f(env)?, count(env)?))))
            }
        }, _ => return Err(self.error(
            format!("invalid operation: shifted operand {left} (variable of type {ty}) must be integer"),
            span,
        )));
        Ok(Expr::new(ty, fun, span))
    }

    fn shift_count(&self, y: Expr, right: &ast::Expr) -> CompileResult<Fun<u64>> {
        if let Some(constant) = &y.constant {
            let count = constant
                .as_int()
                .filter(|count| *count >= 0 && *count <= i128::from(u64::MAX))
                .ok_or_else(|| self.error(format!("invalid shift count {right}"), y.span))?;
            let count = count as u64;
            return Ok(Arc::new(move |_| Ok(count)));
        }
        let ty = self.value_type(&y, right)?;
        dispatch_integer!(ty.kind(), K => {
            let g = native_fun::<K>(&y.fun);
            Ok(Arc::new(move |env| Integer::shift_count(g(env)?)))
        }, _ => Err(self.error(
            format!("invalid shift count {right} (variable of type {ty})"),
            y.span,
        )))
    }

    /// Compiles an operand used as an index, length or capacity.
    pub(super) fn int_operand(&mut self, node: &ast::Expr, what: &str) -> CompileResult<Fun<i64>> {
        let expr = self.compile_expr(node)?;
        if let Some(constant) = &expr.constant {
            let value = constant.as_int().ok_or_else(|| {
                self.error(format!("invalid argument: {what} {node} must be integer"), expr.span)
            })?;
            if value < 0 {
                return Err(self.error(
                    format!("invalid argument: {what} {node} (constant of type int) must not be negative"),
                    expr.span,
                ));
            }
            let value = i64::try_from(value).map_err(|_| {
                self.error(format!("invalid argument: {what} {node} overflows int"), expr.span)
            })?;
            return Ok(Arc::new(move |_| Ok(value)));
        }
        let ty = self.value_type(&expr, node)?;
        dispatch_integer!(ty.kind(), K => {
            let f = native_fun::<K>(&expr.fun);
            Ok(Arc::new(move |env| Ok(Integer::as_i64(f(env)?))))
        }, _ => Err(self.error(
            format!("invalid argument: {what} {node} (variable of type {ty}) must be integer"),
            expr.span,
        )))
    }

    fn compile_index(&mut self, base: &ast::Expr, index: &ast::Expr, span: Span) -> CompileResult<Expr> {
        let container = self.compile_expr(base)?;
        let container = self.defaulted(container, base)?;
        let ty = self.value_type(&container, base)?;
        let source = container.value_fun();
        match ty.kind() {
            Kind::Slice => {
                let elem = ty.elem().cloned().unwrap_or_else(|| self.universe.int_type());
                let idx = self.int_operand(index, "index")?;
                Ok(Expr::value(
                    elem,
                    Arc::new(move |env| match source(env)? {
                        Value::Slice(slice) => slice.get(idx(env)?),
                        Value::Nil => Err(RuntimeError::IndexOutOfRange {
                            index: idx(env)?,
                            len: 0,
                        }),
                        other => Err(RuntimeError::mismatch(format!(
                            "indexing {}",
                            other.describe()
                        ))),
                    }),
                    span,
                ))
            }
            Kind::String => {
                let byte = self.universe.basic(Kind::Uint8).unwrap_or_else(|| self.universe.int_type());
                let idx = self.int_operand(index, "index")?;
                let text = native_fun::<KString>(&container.fun);
                Ok(Expr::new(
                    byte,
                    ExprFun::Uint8(Arc::new(move |env| {
                        let text = text(env)?;
                        let index = idx(env)?;
                        usize::try_from(index)
                            .ok()
                            .and_then(|at| text.as_bytes().get(at).copied())
                            .ok_or(RuntimeError::IndexOutOfRange {
                                index,
                                len: text.len(),
                            })
                    })),
                    span,
                ))
            }
            Kind::Map => {
                let (Some(key_ty), Some(elem)) = (ty.key().cloned(), ty.elem().cloned()) else {
                    return Err(self.error(format!("invalid map type {ty}"), span));
                };
                let key = self.compile_expr(index)?;
                let key = self.convert_to(key, &key_ty, index, "map index")?.value_fun();
                let zero = elem.zero();
                let lookup: Fun<Option<Value>> = Arc::new(move |env| match source(env)? {
                    Value::Map(map) => map.get(&key(env)?),
                    Value::Nil => {
                        MapKey::from_value(&key(env)?)?;
                        Ok(None)
                    }
                    other => Err(RuntimeError::mismatch(format!(
                        "indexing {}",
                        other.describe()
                    ))),
                });
                let single = {
                    let lookup = Arc::clone(&lookup);
                    let zero = zero.clone();
                    Arc::new(move |env: &Env| Ok(lookup(env)?.unwrap_or_else(|| zero.clone())))
                };
                let comma_ok: Fun<(Value, bool)> = Arc::new(move |env| {
                    Ok(match lookup(env)? {
                        Some(value) => (value, true),
                        None => (zero.clone(), false),
                    })
                });
                Ok(Expr::value(elem, single, span).with_comma_ok(comma_ok))
            }
            _ => Err(self.error(
                format!("invalid operation: cannot index {base} (variable of type {ty})"),
                span,
            )),
        }
    }

    fn compile_slice_expr(
        &mut self,
        base: &ast::Expr,
        low: Option<&ast::Expr>,
        high: Option<&ast::Expr>,
        span: Span,
    ) -> CompileResult<Expr> {
        let container = self.compile_expr(base)?;
        let container = self.defaulted(container, base)?;
        let ty = self.value_type(&container, base)?;
        let low = match low {
            Some(low) => Some(self.int_operand(low, "index")?),
            None => None,
        };
        let high = match high {
            Some(high) => Some(self.int_operand(high, "index")?),
            None => None,
        };
        let bounds = move |env: &Env, len: usize| -> RuntimeResult<(i64, i64)> {
            let lo = match &low {
                Some(low) => low(env)?,
                None => 0,
            };
            let hi = match &high {
                Some(high) => high(env)?,
                None => len as i64,
            };
            Ok((lo, hi))
        };
        match ty.kind() {
            Kind::Slice => {
                let source = container.value_fun();
                Ok(Expr::value(
                    ty,
                    Arc::new(move |env| match source(env)? {
                        Value::Slice(slice) => {
                            let (lo, hi) = bounds(env, slice.len())?;
                            Ok(Value::Slice(slice.slice(lo, hi)?))
                        }
                        Value::Nil => {
                            let (lo, hi) = bounds(env, 0)?;
                            if lo == 0 && hi == 0 {
                                Ok(Value::Nil)
                            } else {
                                Err(RuntimeError::SliceOutOfRange { low: lo, high: hi, cap: 0 })
                            }
                        }
                        other => Err(RuntimeError::mismatch(format!(
                            "slicing {}",
                            other.describe()
                        ))),
                    }),
                    span,
                ))
            }
            Kind::String => {
                let text = native_fun::<KString>(&container.fun);
                Ok(Expr::new(
                    ty,
                    ExprFun::String(Arc::new(move |env| {
                        let text = text(env)?;
                        let (lo, hi) = bounds(env, text.len())?;
                        if lo < 0 || hi < lo || hi as usize > text.len() {
                            return Err(RuntimeError::SliceOutOfRange {
                                low: lo,
                                high: hi,
                                cap: text.len(),
                            });
                        }
                        text.get(lo as usize..hi as usize)
                            .map(Arc::from)
                            .ok_or(RuntimeError::InvalidUtf8 { op: "string slice" })
                    })),
                    span,
                ))
            }
            _ => Err(self.error(format!("cannot slice {base} (variable of type {ty})"), span)),
        }
    }

    fn compile_selector(
        &mut self,
        base: &ast::Expr,
        field: &ast::Identifier,
        span: Span,
    ) -> CompileResult<Expr> {
        if let ast::Expr::Identifier(ident) = base {
            if let Some(Symbol::Package(package)) = self.lookup(&ident.name) {
                let bind = package
                    .bind(&field.name)
                    .map_err(|err| self.error(err.to_string(), span))?
                    .clone();
                let value = bind.value;
                return Ok(Expr::value(bind.ty, Arc::new(move |_| Ok(value.clone())), span));
            }
        }
        let record = self.compile_expr(base)?;
        let ty = self.value_type(&record, base)?;
        let Some((index, found)) = ty.field(&field.name) else {
            return Err(self.error(
                format!(
                    "{base}.{name} undefined (type {ty} has no field or method {name})",
                    name = field.name
                ),
                span,
            ));
        };
        let field_ty = found.ty.clone();
        let source = record.value_fun();
        Ok(Expr::value(
            field_ty,
            Arc::new(move |env| match source(env)? {
                Value::Struct(fields) => fields.get(index).cloned().ok_or_else(|| {
                    RuntimeError::mismatch(format!("struct has no field {index}"))
                }),
                other => Err(RuntimeError::mismatch(format!(
                    "selecting a field of {}",
                    other.describe()
                ))),
            }),
            span,
        ))
    }

    fn compile_type_assert(
        &mut self,
        operand: &ast::Expr,
        target: &ast::TypeExpr,
        span: Span,
    ) -> CompileResult<Expr> {
        let iface = self.compile_expr(operand)?;
        let ty = self.value_type(&iface, operand)?;
        if ty.kind() != Kind::Interface {
            return Err(self.error(
                format!("invalid operation: {operand} (variable of type {ty}) is not an interface"),
                span,
            ));
        }
        let target = self.resolve_type(target)?;
        if target.kind() != Kind::Interface && !target.implements(&ty) {
            return Err(self.error(
                format!("impossible type assertion: {operand}.({target})\n\t{target} does not implement {ty}"),
                span,
            ));
        }
        let source = iface.value_fun();
        let wanted = target.clone();
        let check: Fun<Result<Value, String>> = Arc::new(move |env| {
            Ok(match source(env)? {
                Value::Boxed(boxed) => {
                    if wanted.kind() == Kind::Interface {
                        if boxed.ty.implements(&wanted) {
                            Ok(Value::Boxed(boxed))
                        } else {
                            Err(boxed.ty.to_string())
                        }
                    } else if boxed.ty.identical(&wanted) {
                        Ok(boxed.value.clone())
                    } else {
                        Err(boxed.ty.to_string())
                    }
                }
                Value::Nil => Err("nil".to_string()),
                other => Err(other.kind_name().to_string()),
            })
        });
        let expected = target.to_string();
        let single = {
            let check = Arc::clone(&check);
            Arc::new(move |env: &Env| {
                check(env)?.map_err(|found| RuntimeError::TypeAssertion {
                    found,
                    expected: expected.clone(),
                })
            })
        };
        let zero = target.zero();
        let comma_ok: Fun<(Value, bool)> = Arc::new(move |env| {
            Ok(match check(env)? {
                Ok(value) => (value, true),
                Err(_) => (zero.clone(), false),
            })
        });
        Ok(Expr::value(target, single, span).with_comma_ok(comma_ok))
    }

    fn compile_composite(
        &mut self,
        ty: &ast::TypeExpr,
        elements: &[ast::Element],
        span: Span,
    ) -> CompileResult<Expr> {
        let ty = self.resolve_type(ty)?;
        match ty.kind() {
            Kind::Slice => {
                let elem = ty.elem().cloned().unwrap_or_else(|| self.universe.int_type());
                let mut items: Vec<(usize, Fun<Value>)> = Vec::with_capacity(elements.len());
                let mut next = 0usize;
                let mut len = 0usize;
                for element in elements {
                    if let Some(key) = &element.key {
                        let index = self
                            .compile_expr(key)?
                            .constant
                            .and_then(|c| c.as_int())
                            .and_then(|v| usize::try_from(v).ok())
                            .ok_or_else(|| {
                                self.error(format!("index {key} must be non-negative integer constant"), key.span())
                            })?;
                        next = index;
                    }
                    if items.iter().any(|(at, _)| *at == next) {
                        return Err(self.error(
                            format!("duplicate index {next} in array or slice literal"),
                            element.value.span(),
                        ));
                    }
                    let value = self.compile_expr(&element.value)?;
                    let value = self.convert_to(value, &elem, &element.value, "slice literal")?;
                    items.push((next, value.value_fun()));
                    next += 1;
                    len = len.max(next);
                }
                let zero = elem.zero();
                Ok(Expr::value(
                    ty,
                    Arc::new(move |env| {
                        let mut values = vec![zero.clone(); len];
                        for (at, item) in &items {
                            values[*at] = item(env)?;
                        }
                        Ok(Value::Slice(SliceValue::from_vec(values)))
                    }),
                    span,
                ))
            }
            Kind::Map => {
                let (Some(key_ty), Some(elem)) = (ty.key().cloned(), ty.elem().cloned()) else {
                    return Err(self.error(format!("invalid map type {ty}"), span));
                };
                let mut entries = Vec::with_capacity(elements.len());
                for element in elements {
                    let Some(key) = &element.key else {
                        return Err(self.error("missing key in map literal", element.value.span()));
                    };
                    let compiled_key = self.compile_expr(key)?;
                    let compiled_key = self.convert_to(compiled_key, &key_ty, key, "map literal")?;
                    let value = self.compile_expr(&element.value)?;
                    let value = self.convert_to(value, &elem, &element.value, "map literal")?;
                    entries.push((compiled_key.value_fun(), value.value_fun()));
                }
                Ok(Expr::value(
                    ty,
                    Arc::new(move |env| {
                        let map = MapValue::new();
                        for (key, value) in &entries {
                            map.insert(key(env)?, value(env)?)?;
                        }
                        Ok(Value::Map(map))
                    }),
                    span,
                ))
            }
            Kind::Struct => {
                let fields = ty.fields().to_vec();
                let keyed = elements.first().map(|e| e.key.is_some()).unwrap_or(false);
                let mut inits: Vec<(usize, Fun<Value>)> = Vec::with_capacity(elements.len());
                if keyed {
                    for element in elements {
                        let name = match &element.key {
                            Some(ast::Expr::Identifier(ident)) => &ident.name,
                            _ => {
                                return Err(self.error(
                                    "mixture of field:value and value elements in struct literal",
                                    element.value.span(),
                                ))
                            }
                        };
                        let Some((index, field)) = ty.field(name) else {
                            return Err(self.error(
                                format!("unknown field {name} in struct literal of type {ty}"),
                                element.value.span(),
                            ));
                        };
                        if inits.iter().any(|(at, _)| *at == index) {
                            return Err(self.error(
                                format!("duplicate field name {name} in struct literal"),
                                element.value.span(),
                            ));
                        }
                        let value = self.compile_expr(&element.value)?;
                        let value = self.convert_to(value, &field.ty, &element.value, "struct literal")?;
                        inits.push((index, value.value_fun()));
                    }
                } else if !elements.is_empty() {
                    if elements.len() != fields.len() {
                        let problem = if elements.len() < fields.len() { "few" } else { "many" };
                        return Err(self.error(
                            format!("too {problem} values in struct literal of type {ty}"),
                            span,
                        ));
                    }
                    for (index, (element, field)) in elements.iter().zip(&fields).enumerate() {
                        if element.key.is_some() {
                            return Err(self.error(
                                "mixture of field:value and value elements in struct literal",
                                element.value.span(),
                            ));
                        }
                        let value = self.compile_expr(&element.value)?;
                        let value = self.convert_to(value, &field.ty, &element.value, "struct literal")?;
                        inits.push((index, value.value_fun()));
                    }
                }
                let zeros: Vec<Value> = fields.iter().map(|field| field.ty.zero()).collect();
                Ok(Expr::value(
                    ty,
                    Arc::new(move |env| {
                        let mut values = zeros.clone();
                        for (at, init) in &inits {
                            values[*at] = init(env)?;
                        }
                        Ok(Value::Struct(values))
                    }),
                    span,
                ))
            }
            _ => Err(self.error(format!("invalid composite literal type {ty}"), span)),
        }
    }
}
