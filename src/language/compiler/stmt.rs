use super::channel::chan_value;
use super::closures::{box_value, boxing, read_slots};
use super::*;
use scalar::{Integer, KBool};

/// Store into a location whose container and index operands were already
/// evaluated.
type Bound = Box<dyn FnOnce(&Env, Value) -> RuntimeResult<()>>;

/// Evaluates the operands of a location and returns its store.
type Locate = Arc<dyn Fn(&Env) -> RuntimeResult<Bound> + Send + Sync>;

fn bound(store: impl FnOnce(&Env, Value) -> RuntimeResult<()> + 'static) -> Bound {
    Box::new(store)
}

/// Assignable location: a variable, slice element, map entry or struct
/// field. The blank identifier has no type and discards stores.
struct Place {
    ty: Option<Type>,
    load: Option<Fun<Value>>,
    locate: Locate,
    /// Map entries cannot have their fields assigned.
    addressable: bool,
}

/// Hidden slot holding the evaluated switch tag.
struct SwitchTag<'a> {
    node: &'a ast::Expr,
    ty: Type,
    depth: usize,
    slot: usize,
}

const RANGE_SRC: usize = 0;
const RANGE_AUX: usize = 1;
const RANGE_IDX: usize = 2;
const RANGE_KEY: usize = 3;
const RANGE_VAL: usize = 4;
const RANGE_SLOTS: usize = 5;

#[derive(Clone, Copy, Debug)]
enum RangeKind {
    Count,
    Slice,
    String,
    Map,
    Chan,
}

impl Compiler {
    /// Compiles a statement list. A failing statement is recorded and its
    /// siblings are still compiled, so one pass reports every error.
    pub(super) fn compile_stmts(&mut self, stmts: &[ast::Stmt]) {
        for stmt in stmts {
            if let Err(err) = self.compile_stmt(stmt) {
                self.record(err);
            }
        }
    }

    pub(super) fn compile_stmt(&mut self, stmt: &ast::Stmt) -> CompileResult<()> {
        match stmt {
            ast::Stmt::Expr(expr) => self.compile_expr_stmt(expr),
            ast::Stmt::Send { chan, value, span } => {
                let send = self.compile_send(chan, value, *span)?;
                self.emit(Instr::Exec {
                    op: Op::Send,
                    run: send.fun.to_void(),
                })?;
                Ok(())
            }
            ast::Stmt::Define {
                names,
                values,
                span,
            } => self.compile_define(names, values, *span),
            ast::Stmt::Assign {
                targets,
                op,
                values,
                span,
            } => self.compile_assign(targets, *op, values, *span),
            ast::Stmt::IncDec {
                target,
                increment,
                span,
            } => self.compile_incdec(target, *increment, *span),
            ast::Stmt::Var(decl) => self.compile_local_var(decl),
            ast::Stmt::Const(decl) => self.compile_const_decl(decl),
            ast::Stmt::Block(block) => self.compile_block(&block.statements, Op::Block),
            ast::Stmt::If(stmt) => self.compile_if(stmt),
            ast::Stmt::For(stmt) => self.compile_for(stmt),
            ast::Stmt::Range(stmt) => self.compile_range(stmt),
            ast::Stmt::Switch(stmt) => self.compile_switch(stmt),
            ast::Stmt::Break(span) => self.compile_branch(true, *span),
            ast::Stmt::Continue(span) => self.compile_branch(false, *span),
            ast::Stmt::Return { values, span } => self.compile_return(values, *span),
        }
    }

    fn compile_expr_stmt(&mut self, expr: &ast::Expr) -> CompileResult<()> {
        let statement = matches!(
            expr,
            ast::Expr::Call { .. }
                | ast::Expr::Unary {
                    op: ast::UnaryOp::Recv,
                    ..
                }
        );
        if !statement {
            return Err(self.error(format!("{expr} (value) is not used"), expr.span()));
        }
        let compiled = self.compile_expr(expr)?;
        let run: Fun<()> = match &compiled.multi {
            Some((_, call)) => {
                let call = Arc::clone(call);
                Arc::new(move |env| call(env).map(|_| ()))
            }
            None => compiled.fun.to_void(),
        };
        self.emit(Instr::Exec { op: Op::Expr, run })?;
        Ok(())
    }

    fn compile_block(&mut self, stmts: &[ast::Stmt], op: Op) -> CompileResult<()> {
        let enter = self.enter_block(declares_vars(stmts), op)?;
        self.compile_stmts(stmts);
        self.leave_block(enter, op)
    }

    // ----- declarations and assignment -----

    /// Right-hand side of an assignment, declaration or return, converted
    /// to `targets`. A `None` target takes the value's default type.
    pub(super) fn compile_rhs(
        &mut self,
        values: &[ast::Expr],
        targets: &[Option<Type>],
        context: &str,
        span: Span,
    ) -> CompileResult<(Vec<Type>, Fun<Vec<Value>>)> {
        let count = targets.len();
        if values.len() == count {
            let mut types = Vec::with_capacity(count);
            let mut funs = Vec::with_capacity(count);
            for (node, target) in values.iter().zip(targets) {
                let expr = self.compile_expr(node)?;
                let expr = match target {
                    Some(ty) => self.convert_to(expr, ty, node, context)?,
                    None => self.defaulted(expr, node)?,
                };
                types.push(self.value_type(&expr, node)?);
                funs.push(expr.value_fun());
            }
            let values: Fun<Vec<Value>> = Arc::new(move |env| funs.iter().map(|f| f(env)).collect());
            return Ok((types, values));
        }
        let [single] = values else {
            return Err(self.count_mismatch(context, count, values.len(), span));
        };
        let expr = self.compile_expr(single)?;
        if let Some((types, call)) = expr.multi.clone() {
            if types.len() != count {
                return Err(self.count_mismatch(context, count, types.len(), span));
            }
            let mut resolved = Vec::with_capacity(count);
            let mut boxes = Vec::with_capacity(count);
            for (ty, target) in types.iter().zip(targets) {
                match target {
                    Some(want) => {
                        if !ty.assignable_to(want) {
                            return Err(self.error(
                                format!("cannot use {ty} value as type {want} in {context}"),
                                span,
                            ));
                        }
                        boxes.push(boxing(ty, want));
                        resolved.push(want.clone());
                    }
                    None => {
                        boxes.push(None);
                        resolved.push(ty.clone());
                    }
                }
            }
            let values: Fun<Vec<Value>> = Arc::new(move |env| {
                let mut values = call(env)?;
                for (value, boxed) in values.iter_mut().zip(&boxes) {
                    if let Some(ty) = boxed {
                        box_value(value, ty);
                    }
                }
                Ok(values)
            });
            return Ok((resolved, values));
        }
        if count == 2 {
            if let Some(pair) = expr.comma_ok.clone() {
                return self.comma_ok_rhs(&expr, pair, single, targets, context);
            }
        }
        Err(self.count_mismatch(context, count, 1, span))
    }

    /// `v, ok = <-ch`, `v, ok = m[k]` and `v, ok = x.(T)`.
    fn comma_ok_rhs(
        &self,
        expr: &Expr,
        pair: Fun<(Value, bool)>,
        node: &ast::Expr,
        targets: &[Option<Type>],
        context: &str,
    ) -> CompileResult<(Vec<Type>, Fun<Vec<Value>>)> {
        let ty = self.value_type(expr, node)?;
        let flag = self.universe.bool_type();
        let (first, first_box) = match &targets[0] {
            Some(want) if ty.assignable_to(want) => (want.clone(), boxing(&ty, want)),
            Some(want) => {
                return Err(self.error(
                    format!("cannot use {node} (value of type {ty}) as type {want} in {context}"),
                    expr.span,
                ))
            }
            None => (ty, None),
        };
        let (second, second_box) = match &targets[1] {
            Some(want) if want.kind() == Kind::Bool => (want.clone(), None),
            Some(want) if flag.assignable_to(want) => (want.clone(), boxing(&flag, want)),
            Some(want) => {
                return Err(self.error(
                    format!("cannot use {node} (untyped bool value) as type {want} in {context}"),
                    expr.span,
                ))
            }
            None => (flag, None),
        };
        let values: Fun<Vec<Value>> = Arc::new(move |env| {
            let (mut value, ok) = pair(env)?;
            let mut ok = Value::Bool(ok);
            if let Some(ty) = &first_box {
                box_value(&mut value, ty);
            }
            if let Some(ty) = &second_box {
                box_value(&mut ok, ty);
            }
            Ok(vec![value, ok])
        });
        Ok((vec![first, second], values))
    }

    fn count_mismatch(&self, context: &str, want: usize, have: usize, span: Span) -> CompileError {
        let plural = |n: usize| if n == 1 { "" } else { "s" };
        let message = match context {
            "return statement" if have > want => "too many return values".to_string(),
            "return statement" => "not enough return values".to_string(),
            _ => format!(
                "assignment mismatch: {want} variable{} but {have} value{}",
                plural(want),
                plural(have)
            ),
        };
        self.error(message, span)
    }

    fn compile_define(&mut self, names: &[ast::Identifier], values: &[ast::Expr], span: Span) -> CompileResult<()> {
        let top = self.top_scope();
        let mut targets = Vec::with_capacity(names.len());
        let mut fresh = false;
        for (idx, ident) in names.iter().enumerate() {
            if ident.name == "_" {
                targets.push(None);
                continue;
            }
            if names[..idx].iter().any(|prev| prev.name == ident.name) {
                return Err(self.error(
                    format!("{} repeated on left side of :=", ident.name),
                    ident.span,
                ));
            }
            match self.scopes[top].names.get(&ident.name) {
                Some(Symbol::Var { ty, .. }) => targets.push(Some(ty.clone())),
                Some(_) => {
                    return Err(self.error(
                        format!("cannot assign to {} (neither addressable nor a map index expression)", ident.name),
                        ident.span,
                    ))
                }
                None => {
                    fresh = true;
                    targets.push(None);
                }
            }
        }
        if !fresh {
            return Err(self.error("no new variables on left side of :=", span));
        }
        let (types, values) = self.compile_rhs(values, &targets, "assignment", span)?;
        let mut stores = Vec::with_capacity(names.len());
        for (ident, ty) in names.iter().zip(types) {
            if ident.name == "_" {
                stores.push(None);
                continue;
            }
            let (owner, slot) = match self.scopes[top].names.get(&ident.name) {
                Some(Symbol::Var { owner, slot, .. }) => (*owner, *slot),
                _ => self.declare_var(&ident.name, ty, ident.span)?,
            };
            stores.push(Some((self.depth_of(owner), slot)));
        }
        self.emit(Instr::Exec {
            op: Op::Define,
            run: Arc::new(move |env| {
                for (store, value) in stores.iter().zip(values(env)?) {
                    if let Some((depth, slot)) = store {
                        env.set(*depth, *slot, value)?;
                    }
                }
                Ok(())
            }),
        })?;
        Ok(())
    }

    fn compile_local_var(&mut self, decl: &ast::VarDecl) -> CompileResult<()> {
        let (types, values) = self.var_spec(decl)?;
        let mut stores = Vec::with_capacity(decl.names.len());
        for (ident, ty) in decl.names.iter().zip(types) {
            if ident.name == "_" {
                stores.push(None);
                continue;
            }
            let (owner, slot) = self.declare_var(&ident.name, ty, ident.span)?;
            stores.push(Some((self.depth_of(owner), slot)));
        }
        self.emit(Instr::Exec {
            op: Op::Var,
            run: Arc::new(move |env| {
                for (store, value) in stores.iter().zip(values(env)?) {
                    if let Some((depth, slot)) = store {
                        env.set(*depth, *slot, value)?;
                    }
                }
                Ok(())
            }),
        })?;
        Ok(())
    }

    fn compile_place(&mut self, node: &ast::Expr) -> CompileResult<Place> {
        let not_assignable = |this: &Self| {
            this.error(
                format!("cannot assign to {node} (neither addressable nor a map index expression)"),
                node.span(),
            )
        };
        match node {
            ast::Expr::Identifier(ident) if ident.name == "_" => Ok(Place {
                ty: None,
                load: None,
                locate: Arc::new(|_| Ok(bound(|_, _| Ok(())))),
                addressable: true,
            }),
            ast::Expr::Identifier(ident) => match self.lookup(&ident.name) {
                Some(Symbol::Var { owner, slot, ty }) => {
                    let depth = self.depth_of(owner);
                    Ok(Place {
                        ty: Some(ty),
                        load: Some(load_slot(depth, slot)),
                        locate: Arc::new(move |_| Ok(bound(move |env, value| env.set(depth, slot, value)))),
                        addressable: true,
                    })
                }
                Some(_) => Err(not_assignable(self)),
                None => Err(self.error(format!("undefined: {}", ident.name), ident.span)),
            },
            ast::Expr::Index { base, index, .. } => {
                let container = self.compile_expr(base)?;
                let ty = self.value_type(&container, base)?;
                let source = container.value_fun();
                match ty.kind() {
                    Kind::Slice => {
                        let elem = ty.elem().cloned().unwrap_or_else(|| self.universe.empty_interface());
                        let at = self.int_operand(index, "index")?;
                        let (load_source, load_at) = (Arc::clone(&source), Arc::clone(&at));
                        Ok(Place {
                            ty: Some(elem),
                            load: Some(Arc::new(move |env| {
                                let index = load_at(env)?;
                                match load_source(env)? {
                                    Value::Slice(slice) => slice.get(index),
                                    Value::Nil => Err(RuntimeError::IndexOutOfRange { index, len: 0 }),
                                    other => Err(RuntimeError::mismatch(format!("indexing {}", other.describe()))),
                                }
                            })),
                            locate: Arc::new(move |env| {
                                let container = source(env)?;
                                let index = at(env)?;
                                Ok(bound(move |_, value| match container {
                                    Value::Slice(slice) => slice.set(index, value),
                                    Value::Nil => Err(RuntimeError::IndexOutOfRange { index, len: 0 }),
                                    other => Err(RuntimeError::mismatch(format!("indexing {}", other.describe()))),
                                }))
                            }),
                            addressable: true,
                        })
                    }
                    Kind::Map => {
                        let key_ty = ty.key().cloned().unwrap_or_else(|| self.universe.empty_interface());
                        let elem = ty.elem().cloned().unwrap_or_else(|| self.universe.empty_interface());
                        let key = self.compile_expr(index)?;
                        let key = self.convert_to(key, &key_ty, index, "map index")?.value_fun();
                        let zero = elem.zero();
                        let (load_source, load_key) = (Arc::clone(&source), Arc::clone(&key));
                        Ok(Place {
                            ty: Some(elem),
                            load: Some(Arc::new(move |env| match load_source(env)? {
                                Value::Map(map) => Ok(map.get(&load_key(env)?)?.unwrap_or_else(|| zero.clone())),
                                Value::Nil => Ok(zero.clone()),
                                other => Err(RuntimeError::mismatch(format!("indexing {}", other.describe()))),
                            })),
                            locate: Arc::new(move |env| {
                                let container = source(env)?;
                                let key = key(env)?;
                                Ok(bound(move |_, value| match container {
                                    Value::Map(map) => map.insert(key, value),
                                    Value::Nil => Err(RuntimeError::NilMap),
                                    other => Err(RuntimeError::mismatch(format!("indexing {}", other.describe()))),
                                }))
                            }),
                            addressable: false,
                        })
                    }
                    Kind::String | Kind::UntypedString => Err(self.error(
                        format!("cannot assign to {node} (neither addressable nor a map index expression)"),
                        node.span(),
                    )),
                    _ => Err(self.error(
                        format!("invalid operation: cannot index {base} (variable of type {ty})"),
                        node.span(),
                    )),
                }
            }
            ast::Expr::Selector { base, field, .. } => {
                if let ast::Expr::Identifier(ident) = base.as_ref() {
                    if let Some(Symbol::Package(_)) = self.lookup(&ident.name) {
                        return Err(not_assignable(self));
                    }
                }
                let parent = self.compile_place(base)?;
                let Some(ty) = parent.ty.clone() else {
                    return Err(self.error("cannot use _ as value", node.span()));
                };
                let Some((index, field_def)) = ty.field(&field.name) else {
                    return Err(self.error(
                        format!("{base}.{} undefined (type {ty} has no field or method {})", field.name, field.name),
                        field.span,
                    ));
                };
                if !parent.addressable {
                    return Err(self.error(
                        format!("cannot assign to struct field {node} in map"),
                        node.span(),
                    ));
                }
                let field_ty = field_def.ty.clone();
                let Some(parent_load) = parent.load else {
                    return Err(not_assignable(self));
                };
                let parent_locate = parent.locate;
                let load_parent = Arc::clone(&parent_load);
                Ok(Place {
                    ty: Some(field_ty),
                    load: Some(Arc::new(move |env| match load_parent(env)? {
                        Value::Struct(fields) => fields
                            .get(index)
                            .cloned()
                            .ok_or_else(|| RuntimeError::mismatch("struct field out of range")),
                        other => Err(RuntimeError::mismatch(format!("selecting field of {}", other.describe()))),
                    })),
                    locate: Arc::new(move |env| {
                        let parent_store = parent_locate(env)?;
                        let parent_load = Arc::clone(&parent_load);
                        Ok(bound(move |env, value| {
                            let mut current = parent_load(env)?;
                            match &mut current {
                                Value::Struct(fields) if index < fields.len() => fields[index] = value,
                                other => {
                                    return Err(RuntimeError::mismatch(format!(
                                        "assigning field of {}",
                                        other.describe()
                                    )))
                                }
                            }
                            parent_store(env, current)
                        }))
                    }),
                    addressable: true,
                })
            }
            _ => Err(not_assignable(self)),
        }
    }

    fn compile_assign(
        &mut self,
        targets: &[ast::Expr],
        op: ast::AssignOp,
        values: &[ast::Expr],
        span: Span,
    ) -> CompileResult<()> {
        let op = match op {
            ast::AssignOp::Assign => None,
            ast::AssignOp::Op(op) => Some(op),
        };
        let Some(op) = op else {
            let mut places = Vec::with_capacity(targets.len());
            for target in targets {
                places.push(self.compile_place(target)?);
            }
            let types: Vec<Option<Type>> = places.iter().map(|place| place.ty.clone()).collect();
            let (_, values) = self.compile_rhs(values, &types, "assignment", span)?;
            let locates: Vec<Locate> = places.into_iter().map(|place| place.locate).collect();
            self.emit(Instr::Exec {
                op: Op::Assign,
                run: Arc::new(move |env| {
                    let stores = locates
                        .iter()
                        .map(|locate| locate(env))
                        .collect::<RuntimeResult<Vec<_>>>()?;
                    for (store, value) in stores.into_iter().zip(values(env)?) {
                        store(env, value)?;
                    }
                    Ok(())
                }),
            })?;
            return Ok(());
        };
        let ([target], [value]) = (targets, values) else {
            return Err(self.error(
                format!("assignment operation {}= requires single-valued expressions", op.symbol()),
                span,
            ));
        };
        self.compile_update(target, op, value, Op::Assign, span)
    }

    fn compile_incdec(&mut self, target: &ast::Expr, increment: bool, span: Span) -> CompileResult<()> {
        let one = ast::Expr::Literal(ast::Literal::Int(1, span));
        let op = if increment {
            ast::BinaryOp::Add
        } else {
            ast::BinaryOp::Sub
        };
        self.compile_update(target, op, &one, Op::IncDec, span)
    }

    /// `x op= y`. Index operands of `x` are evaluated for the load and
    /// again before the store.
    fn compile_update(
        &mut self,
        target: &ast::Expr,
        op: ast::BinaryOp,
        value: &ast::Expr,
        tag: Op,
        span: Span,
    ) -> CompileResult<()> {
        let place = self.compile_place(target)?;
        let (Some(ty), Some(load)) = (place.ty.clone(), place.load.clone()) else {
            return Err(self.error("cannot use _ as value", target.span()));
        };
        let current = Expr::value(ty.clone(), load, target.span());
        let operand = self.compile_expr(value)?;
        let result = self.binary_exprs(op, current, operand, target, value, span)?;
        let result = self.convert_to(result, &ty, target, "assignment")?.value_fun();
        let locate = place.locate;
        self.emit(Instr::Exec {
            op: tag,
            run: Arc::new(move |env| {
                let store = locate(env)?;
                store(env, result(env)?)
            }),
        })?;
        Ok(())
    }

    // ----- control flow -----

    fn compile_condition(&mut self, node: &ast::Expr, what: &str) -> CompileResult<Fun<bool>> {
        let expr = self.compile_expr(node)?;
        let ty = self.value_type(&expr, node)?;
        if !matches!(ty.kind(), Kind::Bool | Kind::UntypedBool) {
            return Err(self.error(
                format!("non-boolean condition in {what}"),
                node.span(),
            ));
        }
        Ok(native_fun::<KBool>(&expr.fun))
    }

    fn push_target(&mut self, kind: TargetKind) -> CompileResult<()> {
        let base = self.scopes.len();
        self.func()?.targets.push(Target {
            kind,
            base,
            breaks: Vec::new(),
            continues: Vec::new(),
        });
        Ok(())
    }

    fn pop_target(&mut self) -> Target {
        self.funcs
            .last_mut()
            .and_then(|func| func.targets.pop())
            .unwrap_or(Target {
                kind: TargetKind::Loop,
                base: 0,
                breaks: Vec::new(),
                continues: Vec::new(),
            })
    }

    /// Points the pending jumps of a finished loop or switch at their
    /// destinations.
    fn resolve_target(&mut self, target: Target, end: usize, next: usize) {
        for at in target.breaks {
            self.patch_target(at, end);
        }
        for at in target.continues {
            self.patch_target(at, next);
        }
    }

    /// `break` leaves the innermost loop or switch, `continue` jumps to the
    /// next iteration of the innermost loop.
    fn compile_branch(&mut self, is_break: bool, span: Span) -> CompileResult<()> {
        let found = self
            .func()?
            .targets
            .iter()
            .rposition(|target| is_break || target.kind == TargetKind::Loop);
        let Some(idx) = found else {
            let message = if is_break {
                "break is not in a loop, switch, or select"
            } else {
                "continue is not in a loop"
            };
            return Err(self.error(message, span));
        };
        let base = self.func()?.targets[idx].base;
        let unwind = self.unwind_to(base);
        let op = if is_break { Op::Break } else { Op::Continue };
        let at = self.emit(Instr::Jump {
            op,
            target: 0,
            unwind,
        })?;
        let target = &mut self.func()?.targets[idx];
        if is_break {
            target.breaks.push(at);
        } else {
            target.continues.push(at);
        }
        Ok(())
    }

    fn compile_return(&mut self, values: &[ast::Expr], span: Span) -> CompileResult<()> {
        let func = self.func()?;
        let results = func.results.clone();
        let slots = func.result_slots.clone();
        let (scope, named) = (func.scope, func.named_results);
        let values = if values.is_empty() {
            if !results.is_empty() && !named {
                return Err(self.error("not enough return values", span));
            }
            (!results.is_empty()).then(|| read_slots(self.depth_of(scope), slots))
        } else {
            if results.is_empty() {
                return Err(self.error("too many return values", span));
            }
            let targets: Vec<Option<Type>> = results.into_iter().map(Some).collect();
            let (_, values) = self.compile_rhs(values, &targets, "return statement", span)?;
            Some(values)
        };
        self.emit(Instr::Return {
            op: Op::Return,
            values,
        })?;
        Ok(())
    }

    fn compile_if(&mut self, stmt: &ast::IfStmt) -> CompileResult<()> {
        let enter = self.enter_block(init_declares(&stmt.init), Op::If)?;
        let result = self.compile_if_chain(stmt);
        self.leave_block(enter, Op::If)?;
        result
    }

    fn compile_if_chain(&mut self, stmt: &ast::IfStmt) -> CompileResult<()> {
        if let Some(init) = &stmt.init {
            self.compile_stmt(init)?;
        }
        let cond = self.compile_condition(&stmt.condition, "if statement")?;
        let test = self.emit(Instr::JumpIfFalse {
            op: Op::If,
            cond,
            target: 0,
        })?;
        self.compile_block(&stmt.then_branch.statements, Op::Block)?;
        let Some(otherwise) = &stmt.else_branch else {
            let end = self.here();
            self.patch_target(test, end);
            return Ok(());
        };
        let skip = self.emit(Instr::Jump {
            op: Op::If,
            target: 0,
            unwind: 0,
        })?;
        let at = self.here();
        self.patch_target(test, at);
        self.compile_stmt(otherwise)?;
        let end = self.here();
        self.patch_target(skip, end);
        Ok(())
    }

    fn compile_for(&mut self, stmt: &ast::ForStmt) -> CompileResult<()> {
        let enter = self.enter_block(init_declares(&stmt.init), Op::For)?;
        let result = self.compile_for_loop(stmt);
        self.leave_block(enter, Op::For)?;
        result
    }

    /// ```text
    /// top:  jump-if-false cond -> end
    ///       body
    /// next: post
    ///       jump top
    /// end:
    /// ```
    fn compile_for_loop(&mut self, stmt: &ast::ForStmt) -> CompileResult<()> {
        if let Some(init) = &stmt.init {
            self.compile_stmt(init)?;
        }
        let top = self.here();
        let test = match &stmt.condition {
            Some(condition) => {
                let cond = self.compile_condition(condition, "for loop")?;
                Some(self.emit(Instr::JumpIfFalse {
                    op: Op::For,
                    cond,
                    target: 0,
                })?)
            }
            None => None,
        };
        self.push_target(TargetKind::Loop)?;
        let body = self.compile_block(&stmt.body.statements, Op::Block);
        let target = self.pop_target();
        body?;
        let next = self.here();
        if let Some(post) = &stmt.post {
            self.compile_stmt(post)?;
            self.retag(next, Op::Post);
        }
        self.emit(Instr::Jump {
            op: Op::For,
            target: top,
            unwind: 0,
        })?;
        let end = self.here();
        if let Some(test) = test {
            self.patch_target(test, end);
        }
        self.resolve_target(target, end, next);
        Ok(())
    }

    /// Tags the effects emitted since `from` with `op`.
    fn retag(&mut self, from: usize, op: Op) {
        if let Some(func) = self.funcs.last_mut() {
            for instr in func.instrs.iter_mut().skip(from) {
                if let Instr::Exec { op: tag, .. } = instr {
                    *tag = op;
                }
            }
        }
    }

    fn compile_switch(&mut self, stmt: &ast::SwitchStmt) -> CompileResult<()> {
        let enter = self.enter_block(init_declares(&stmt.init), Op::Switch)?;
        let result = self.compile_switch_cases(stmt);
        self.leave_block(enter, Op::Switch)?;
        result
    }

    /// Cases are tested in source order; the default body comes after the
    /// last test and runs when none matched.
    fn compile_switch_cases(&mut self, stmt: &ast::SwitchStmt) -> CompileResult<()> {
        if let Some(init) = &stmt.init {
            self.compile_stmt(init)?;
        }
        let tag = match &stmt.tag {
            Some(node) => {
                let expr = self.compile_expr(node)?;
                let expr = self.defaulted(expr, node)?;
                let ty = self.value_type(&expr, node)?;
                let (owner, slot) = self.alloc_slot();
                let depth = self.depth_of(owner);
                let value = expr.value_fun();
                self.emit(Instr::Exec {
                    op: Op::Switch,
                    run: Arc::new(move |env| env.set(depth, slot, value(env)?)),
                })?;
                Some(SwitchTag {
                    node,
                    ty,
                    depth,
                    slot,
                })
            }
            None => None,
        };
        let mut default = None;
        for clause in &stmt.clauses {
            if clause.values.is_empty() && default.replace(clause).is_some() {
                return Err(self.error("multiple defaults in switch", clause.span));
            }
        }
        self.push_target(TargetKind::Switch)?;
        let cases = self.compile_cases(&stmt.clauses, tag.as_ref(), default);
        let target = self.pop_target();
        let exits = cases?;
        let end = self.here();
        for exit in exits {
            self.patch_target(exit, end);
        }
        self.resolve_target(target, end, end);
        Ok(())
    }

    /// Emits the test and body of every non-default clause, then the
    /// default body. Returns the jumps leaving a matched clause.
    fn compile_cases(
        &mut self,
        clauses: &[ast::CaseClause],
        tag: Option<&SwitchTag<'_>>,
        default: Option<&ast::CaseClause>,
    ) -> CompileResult<Vec<usize>> {
        let mut exits = Vec::new();
        for clause in clauses.iter().filter(|clause| !clause.values.is_empty()) {
            let mut tests = Vec::with_capacity(clause.values.len());
            for value in &clause.values {
                match self.case_test(tag, value) {
                    Ok(test) => tests.push(test),
                    Err(err) => self.record(err),
                }
            }
            let cond: Fun<bool> = Arc::new(move |env| {
                for test in &tests {
                    if test(env)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            });
            let test = self.emit(Instr::JumpIfFalse {
                op: Op::Case,
                cond,
                target: 0,
            })?;
            self.compile_block(&clause.body, Op::Case)?;
            exits.push(self.emit(Instr::Jump {
                op: Op::Case,
                target: 0,
                unwind: 0,
            })?);
            let next = self.here();
            self.patch_target(test, next);
        }
        if let Some(clause) = default {
            self.compile_block(&clause.body, Op::Case)?;
        }
        Ok(exits)
    }

    fn case_test(&mut self, tag: Option<&SwitchTag<'_>>, value: &ast::Expr) -> CompileResult<Fun<bool>> {
        let Some(tag) = tag else {
            return self.compile_condition(value, "case clause");
        };
        let current = Expr::value(tag.ty.clone(), load_slot(tag.depth, tag.slot), tag.node.span());
        let candidate = self.compile_expr(value)?;
        let equal = self.binary_exprs(ast::BinaryOp::Eq, current, candidate, tag.node, value, value.span())?;
        Ok(native_fun::<KBool>(&equal.fun))
    }

    /// `for k, v := range x`.
    ///
    /// ```text
    ///       enter (source, aux, index, key, value)
    ///       start
    /// top:  jump-if-false advance -> end
    ///       enter (k, v)
    ///       body
    ///       leave
    ///       jump top
    /// end:  leave
    /// ```
    ///
    /// The source is compiled inside the loop record, so its variable
    /// addresses count the hop out of it.
    fn compile_range(&mut self, stmt: &ast::RangeStmt) -> CompileResult<()> {
        let enter = self.enter_block(true, Op::Range)?;
        for _ in 0..RANGE_SLOTS {
            self.alloc_slot();
        }
        let result = self.compile_range_loop(stmt);
        self.leave_block(enter, Op::Range)?;
        result
    }

    fn compile_range_loop(&mut self, stmt: &ast::RangeStmt) -> CompileResult<()> {
        let source = self.compile_expr(&stmt.expr)?;
        let source = self.defaulted(source, &stmt.expr)?;
        let ty = self.value_type(&source, &stmt.expr)?;
        let int = self.universe.int_type();
        let (kind, key_ty, value_ty) = match ty.kind() {
            kind if kind.is_integer() => (RangeKind::Count, ty.clone(), None),
            Kind::Slice => (RangeKind::Slice, int, ty.elem().cloned()),
            Kind::String => (RangeKind::String, int, self.universe.basic(Kind::Int32)),
            Kind::Map => (
                RangeKind::Map,
                ty.key().cloned().unwrap_or(int),
                ty.elem().cloned(),
            ),
            Kind::Chan => {
                if !ty.chan_dir().is_some_and(ChanDir::can_recv) {
                    return Err(self.error(
                        format!("invalid operation: range {} receive from send-only channel {ty}", stmt.expr),
                        stmt.span,
                    ));
                }
                let elem = ty.elem().cloned().unwrap_or_else(|| self.universe.empty_interface());
                (RangeKind::Chan, elem, None)
            }
            _ => {
                return Err(self.error(
                    format!("cannot range over {} (variable of type {ty})", stmt.expr),
                    stmt.span,
                ))
            }
        };
        if value_ty.is_none() && stmt.value.is_some() {
            return Err(self.error(
                format!("range over {} permits only one iteration variable", stmt.expr),
                stmt.span,
            ));
        }
        let load = source.value_fun();
        let init: Fun<Value> = match kind {
            RangeKind::Count => dispatch_integer!(ty.kind(), K => {
                let count = native_fun::<K>(&source.fun);
                Arc::new(move |env| {
                    let count = Integer::as_i128(count(env)?);
                    Ok(match i64::try_from(count) {
                        Ok(count) => Value::Int(count),
                        Err(_) => Value::Uint64(count as u64),
                    })
                })
            }, _ => load),
            _ => load,
        };
        debug!(?kind, "compiled range");

        self.emit(Instr::Exec {
            op: Op::Range,
            run: Arc::new(move |env| {
                let source = init(env)?;
                let aux = match &source {
                    Value::Map(map) => Value::Slice(SliceValue::from_vec(map.keys())),
                    _ => Value::Nil,
                };
                env.set(0, RANGE_SRC, source)?;
                env.set(0, RANGE_AUX, aux)?;
                env.set(0, RANGE_IDX, Value::Int(0))
            }),
        })?;
        let top = self.here();
        let key_kind = key_ty.kind();
        let test = self.emit(Instr::JumpIfFalse {
            op: Op::Range,
            cond: Arc::new(move |env| advance_range(kind, key_kind, env)),
            target: 0,
        })?;
        self.push_target(TargetKind::Loop)?;
        let body = self.compile_range_body(stmt, key_ty, value_ty);
        let target = self.pop_target();
        body?;
        self.emit(Instr::Jump {
            op: Op::Range,
            target: top,
            unwind: 0,
        })?;
        let end = self.here();
        self.patch_target(test, end);
        self.resolve_target(target, end, top);
        Ok(())
    }

    /// Per-iteration scope holding the iteration variables.
    fn compile_range_body(
        &mut self,
        stmt: &ast::RangeStmt,
        key_ty: Type,
        value_ty: Option<Type>,
    ) -> CompileResult<()> {
        let enter = self.enter_block(true, Op::Range)?;
        let mut copies = Vec::new();
        let bindings = [
            (stmt.key.as_ref(), Some(key_ty), RANGE_KEY),
            (stmt.value.as_ref(), value_ty, RANGE_VAL),
        ];
        for (ident, ty, from) in bindings {
            let (Some(ident), Some(ty)) = (ident, ty) else {
                continue;
            };
            if ident.name == "_" {
                continue;
            }
            match self.declare_var(&ident.name, ty, ident.span) {
                Ok((_, slot)) => copies.push((from, slot)),
                Err(err) => self.record(err),
            }
        }
        let result = self
            .emit(Instr::Exec {
                op: Op::Range,
                run: Arc::new(move |env| {
                    for (from, to) in &copies {
                        env.set(0, *to, env.get(1, *from)?)?;
                    }
                    Ok(())
                }),
            })
            .and_then(|_| self.compile_block(&stmt.body.statements, Op::Block));
        self.leave_block(enter, Op::Range)?;
        result
    }
}

/// Moves a range loop to its next element, storing the key and value in
/// the loop's hidden slots. Returns `false` once the source is exhausted.
/// Nil slices and maps are empty.
fn advance_range(kind: RangeKind, key_kind: Kind, env: &Env) -> RuntimeResult<bool> {
    let idx = match env.get(0, RANGE_IDX)? {
        Value::Int(idx) => idx,
        other => return Err(range_mismatch("index", &other)),
    };
    let source = env.get(0, RANGE_SRC)?;
    let (key, value, next) = match kind {
        RangeKind::Count => {
            let count = match source {
                Value::Int(count) => i128::from(count),
                Value::Uint64(count) => i128::from(count),
                other => return Err(range_mismatch("count", &other)),
            };
            if i128::from(idx) >= count {
                return Ok(false);
            }
            (int_value(i128::from(idx), key_kind), Value::Nil, idx + 1)
        }
        RangeKind::Slice => match source {
            Value::Slice(slice) if (idx as usize) < slice.len() => {
                (Value::Int(idx), slice.get(idx)?, idx + 1)
            }
            Value::Slice(_) | Value::Nil => return Ok(false),
            other => return Err(range_mismatch("slice", &other)),
        },
        RangeKind::String => {
            let text = match source {
                Value::String(text) => text,
                other => return Err(range_mismatch("string", &other)),
            };
            let Some(ch) = text.get(idx as usize..).and_then(|rest| rest.chars().next()) else {
                return Ok(false);
            };
            (Value::Int(idx), Value::Int32(ch as i32), idx + ch.len_utf8() as i64)
        }
        RangeKind::Map => {
            let map = match source {
                Value::Map(map) => map,
                Value::Nil => return Ok(false),
                other => return Err(range_mismatch("map", &other)),
            };
            let keys = match env.get(0, RANGE_AUX)? {
                Value::Slice(keys) => keys,
                other => return Err(range_mismatch("key list", &other)),
            };
            let mut idx = idx;
            loop {
                if idx as usize >= keys.len() {
                    return Ok(false);
                }
                let key = keys.get(idx)?;
                idx += 1;
                // entries deleted during iteration are skipped
                if let Some(value) = map.get(&key)? {
                    break (key, value, idx);
                }
            }
        }
        RangeKind::Chan => {
            let chan = chan_value(source, "range")?;
            match chan.recv_value() {
                Some(value) => (value, Value::Nil, idx),
                None => return Ok(false),
            }
        }
    };
    env.set(0, RANGE_IDX, Value::Int(next))?;
    env.set(0, RANGE_KEY, key)?;
    env.set(0, RANGE_VAL, value)?;
    Ok(true)
}

fn range_mismatch(what: &str, found: &Value) -> RuntimeError {
    RuntimeError::mismatch(format!("range {what} holds {}", found.describe()))
}

fn init_declares(init: &Option<Box<ast::Stmt>>) -> bool {
    init.as_deref().is_some_and(|init| declares_vars(std::slice::from_ref(init)))
}

/// Whether the statements declare variables and so need their own
/// environment.
fn declares_vars(stmts: &[ast::Stmt]) -> bool {
    stmts
        .iter()
        .any(|stmt| matches!(stmt, ast::Stmt::Define { .. } | ast::Stmt::Var(_)))
}
