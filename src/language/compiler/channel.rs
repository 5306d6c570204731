//! Channel send and receive.
//!
//! Each operation is compiled in one of two tiers. When the element type is
//! exactly a predeclared scalar type, the closure talks to the typed
//! `Chan<T>` storage directly and never boxes the element. Every other
//! element type, including named types sharing a scalar kind, goes through
//! the type-erased [`ChanValue`] handle.

use super::*;
use crate::runtime::channel::ChanValue;

enum Operand<T> {
    Literal(T),
    Dynamic(Fun<T>),
}

impl Compiler {
    fn channel_tier(&self, elem: &Type, dir: ChanDir) -> Tier {
        if self.config.native_fast_path && elem.is_basic() && elem.kind().is_scalar() {
            Tier::Native { dir }
        } else {
            Tier::Reflective
        }
    }

    /// `<-ch`. The returned expression carries both the single-value and
    /// the comma-ok form.
    pub(super) fn compile_recv(&mut self, operand: &ast::Expr, span: Span) -> CompileResult<Expr> {
        let chan = self.compile_expr(operand)?;
        let ty = self.value_type(&chan, operand)?;
        let (Some(dir), Some(elem)) = (ty.chan_dir(), ty.elem().cloned()) else {
            return Err(self
                .error(
                    format!("invalid operation: <-{operand} (expecting channel, found {ty})"),
                    span,
                )
                .with_node(operand));
        };
        if !dir.can_recv() {
            return Err(self
                .error(
                    format!("invalid operation: <-{operand} (cannot receive from send-only channel {ty})"),
                    span,
                )
                .with_node(operand));
        }
        let tier = self.channel_tier(&elem, dir);
        let source = chan.value_fun();
        let (fun, comma_ok) = match tier {
            Tier::Native { .. } => dispatch_scalar!(elem.kind(), K => native_recv::<K>(source), _ => {
                reflective_recv(source, &elem)
            }),
            Tier::Reflective => reflective_recv(source, &elem),
        };
        debug!(elem = %elem, ?tier, "compiled receive");
        let mut expr = Expr::new(elem, fun, span).with_comma_ok(comma_ok);
        expr.tier = Some(tier);
        Ok(expr)
    }

    /// `ch <- value`, as a side-effecting expression.
    pub(super) fn compile_send(
        &mut self,
        chan_node: &ast::Expr,
        value_node: &ast::Expr,
        span: Span,
    ) -> CompileResult<Expr> {
        let chan = self.compile_expr(chan_node)?;
        let ty = self.value_type(&chan, chan_node)?;
        let (Some(dir), Some(elem)) = (ty.chan_dir(), ty.elem().cloned()) else {
            return Err(self
                .error(
                    format!("invalid operation: cannot send to non-channel type {ty}: {chan_node}"),
                    span,
                )
                .with_node(chan_node));
        };
        if !dir.can_send() {
            return Err(self
                .error(
                    format!("invalid operation: cannot send to receive-only channel type {ty}: {chan_node}"),
                    span,
                )
                .with_node(chan_node));
        }
        let value = self.compile_expr(value_node)?;
        let value = self.send_operand(value, &elem, value_node)?;
        let source = chan.value_fun();
        let native = match self.channel_tier(&elem, dir) {
            Tier::Native { dir } => dispatch_scalar!(elem.kind(), K => {
                native_send::<K>(Arc::clone(&source), &value, &self.universe)
            }, _ => None)
            .map(|run| (Tier::Native { dir }, run)),
            Tier::Reflective => None,
        };
        let (tier, run) = native
            .unwrap_or_else(|| (Tier::Reflective, reflective_send(source, value.value_fun())));
        debug!(elem = %elem, ?tier, constant = value.is_constant(), "compiled send");
        let mut expr = Expr::void(run, span);
        expr.tier = Some(tier);
        Ok(expr)
    }

    /// Brings the sent value to the element type. Untyped constants must be
    /// representable in it; anything else must be assignable.
    fn send_operand(&self, value: Expr, elem: &Type, node: &ast::Expr) -> CompileResult<Expr> {
        let span = value.span;
        if let Some(constant) = value.constant.as_ref().filter(|c| c.is_untyped()) {
            let converted = constant
                .const_to(elem, &self.universe)
                .map_err(|err| match err {
                    ConstError::Mismatch { from, .. } => self.error(
                        format!("cannot use {node} ({from} constant) as type {elem} in send"),
                        span,
                    ),
                    other => self.error(other.to_string(), span),
                })?;
            let literal = Expr::from_constant(converted, &self.universe, span);
            return Ok(self.box_if_interface(literal, elem));
        }
        let ty = self.value_type(&value, node)?;
        if !ty.kind().is_untyped() && !ty.assignable_to(elem) {
            return Err(self.error(
                format!("cannot use {node} (variable of type {ty}) as type {elem} in send"),
                span,
            ));
        }
        self.convert_to(value, elem, node, "send")
    }
}

/// The channel held by `value`. Operations on a nil channel would block
/// forever, which is reported instead.
pub(super) fn chan_value(value: Value, op: &'static str) -> RuntimeResult<ChanValue> {
    match value {
        Value::Chan(chan) => Ok(chan),
        Value::Nil => Err(RuntimeError::NilChannel { op }),
        other => Err(RuntimeError::mismatch(format!(
            "{op} on {}",
            other.describe()
        ))),
    }
}

fn native_recv<K: ScalarKind>(source: Fun<Value>) -> (ExprFun, Fun<(Value, bool)>) {
    let single = {
        let source = Arc::clone(&source);
        K::lift(Arc::new(move |env| {
            let chan = chan_value(source(env)?, "receive")?;
            match K::native_chan(&chan) {
                Some(native) => Ok(native.recv().unwrap_or_else(K::zero)),
                None => chan.recv_value().map_or_else(|| Ok(K::zero()), K::unwrap),
            }
        }))
    };
    let comma_ok: Fun<(Value, bool)> = Arc::new(move |env| {
        let chan = chan_value(source(env)?, "receive")?;
        let received = match K::native_chan(&chan) {
            Some(native) => native.recv().map(K::wrap),
            None => chan.recv_value(),
        };
        Ok(match received {
            Some(value) => (value, true),
            None => (K::wrap(K::zero()), false),
        })
    });
    (single, comma_ok)
}

fn reflective_recv(source: Fun<Value>, elem: &Type) -> (ExprFun, Fun<(Value, bool)>) {
    let zero = elem.zero();
    let single = {
        let source = Arc::clone(&source);
        let zero = zero.clone();
        ExprFun::from_value(
            elem.kind(),
            Arc::new(move |env| {
                let chan = chan_value(source(env)?, "receive")?;
                Ok(chan.recv_value().unwrap_or_else(|| zero.clone()))
            }),
        )
    };
    let comma_ok: Fun<(Value, bool)> = Arc::new(move |env| {
        let chan = chan_value(source(env)?, "receive")?;
        Ok(match chan.recv_value() {
            Some(value) => (value, true),
            None => (zero.clone(), false),
        })
    });
    (single, comma_ok)
}

/// Typed send, or `None` when the operand has no native form to lower to.
fn native_send<K: ScalarKind>(source: Fun<Value>, value: &Expr, universe: &Universe) -> Option<Fun<()>> {
    let operand = match &value.constant {
        Some(constant) => Operand::Literal(K::unwrap(constant.to_value(universe)).ok()?),
        None => Operand::Dynamic(K::lower(&value.fun)?),
    };
    let run: Fun<()> = match operand {
        Operand::Literal(literal) => Arc::new(move |env| {
            let chan = chan_value(source(env)?, "send")?;
            match K::native_chan(&chan) {
                Some(native) => native.send(literal.clone()),
                None => chan.send_value(K::wrap(literal.clone())),
            }
        }),
        Operand::Dynamic(fun) => Arc::new(move |env| {
            let chan = chan_value(source(env)?, "send")?;
            let item = fun(env)?;
            match K::native_chan(&chan) {
                Some(native) => native.send(item),
                None => chan.send_value(K::wrap(item)),
            }
        }),
    };
    Some(run)
}

fn reflective_send(source: Fun<Value>, value: Fun<Value>) -> Fun<()> {
    Arc::new(move |env| {
        let chan = chan_value(source(env)?, "send")?;
        chan.send_value(value(env)?)
    })
}
