use crate::language::compiler::code::{Code, StepBudget};
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::value::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Code and instruction pointer of a function activation.
pub struct Frame {
    pub code: Arc<Code>,
    ip: AtomicUsize,
    budget: Arc<StepBudget>,
}

impl Frame {
    pub fn budget(&self) -> &Arc<StepBudget> {
        &self.budget
    }

    pub fn ip(&self) -> usize {
        self.ip.load(Ordering::Relaxed)
    }

    pub fn set_ip(&self, ip: usize) {
        self.ip.store(ip, Ordering::Relaxed);
    }
}

struct EnvInner {
    slots: Mutex<Vec<Value>>,
    parent: Option<Env>,
    frame: Option<Frame>,
}

/// Activation record. Variables are addressed by `(depth, slot)` where depth
/// counts parent hops from the current record.
#[derive(Clone)]
pub struct Env(Arc<EnvInner>);

impl Env {
    pub fn root(size: usize) -> Env {
        Env(Arc::new(EnvInner {
            slots: Mutex::new(vec![Value::Nil; size]),
            parent: None,
            frame: None,
        }))
    }

    /// Block scope nested inside `parent`.
    pub fn child(parent: &Env, size: usize) -> Env {
        Env(Arc::new(EnvInner {
            slots: Mutex::new(vec![Value::Nil; size]),
            parent: Some(parent.clone()),
            frame: None,
        }))
    }

    /// Function activation whose parent is the closure's captured record.
    pub fn frame(parent: &Env, slots: Vec<Value>, code: Arc<Code>, budget: Arc<StepBudget>) -> Env {
        Env(Arc::new(EnvInner {
            slots: Mutex::new(slots),
            parent: Some(parent.clone()),
            frame: Some(Frame {
                code,
                ip: AtomicUsize::new(0),
                budget,
            }),
        }))
    }

    pub fn parent(&self) -> Option<&Env> {
        self.0.parent.as_ref()
    }

    pub fn frame_info(&self) -> Option<&Frame> {
        self.0.frame.as_ref()
    }

    /// Budget of the innermost function frame enclosing this record. Calls
    /// made from outside any frame run unbounded.
    pub fn budget(&self) -> Arc<StepBudget> {
        let mut env = Some(self);
        while let Some(current) = env {
            if let Some(frame) = current.frame_info() {
                return Arc::clone(&frame.budget);
            }
            env = current.parent();
        }
        Arc::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Value>> {
        self.0.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The record `depth` parent hops up.
    pub fn ancestor(&self, depth: usize) -> RuntimeResult<&Env> {
        let mut env = self;
        for hop in 0..depth {
            env = env.parent().ok_or_else(|| {
                RuntimeError::mismatch(format!(
                    "environment ends after {hop} of {depth} parent hops"
                ))
            })?;
        }
        Ok(env)
    }

    fn is_root(&self) -> bool {
        self.0.parent.is_none() && self.0.frame.is_none()
    }

    /// Reads a slot. The package record grows on demand, so its unset slots
    /// read as nil. Any other record is sized up front.
    pub fn get(&self, depth: usize, slot: usize) -> RuntimeResult<Value> {
        let env = self.ancestor(depth)?;
        let slots = env.lock();
        match slots.get(slot) {
            Some(value) => Ok(value.clone()),
            None if env.is_root() => Ok(Value::Nil),
            None => Err(RuntimeError::mismatch(format!(
                "slot {slot} outside a record of {} slots",
                slots.len()
            ))),
        }
    }

    pub fn set(&self, depth: usize, slot: usize, value: Value) -> RuntimeResult<()> {
        let mut slots = self.ancestor(depth)?.lock();
        if slot >= slots.len() {
            slots.resize(slot + 1, Value::Nil);
        }
        slots[slot] = value;
        Ok(())
    }

    /// Read-modify-write of one slot under a single lock.
    pub fn update<R>(
        &self,
        depth: usize,
        slot: usize,
        f: impl FnOnce(&mut Value) -> R,
    ) -> RuntimeResult<R> {
        let mut slots = self.ancestor(depth)?.lock();
        if slot >= slots.len() {
            slots.resize(slot + 1, Value::Nil);
        }
        Ok(f(&mut slots[slot]))
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn ptr_eq(&self, other: &Env) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_resolve_through_parents() {
        let root = Env::root(2);
        root.set(0, 1, Value::Int(5)).unwrap();
        let block = Env::child(&root, 1);
        block.set(0, 0, Value::Bool(true)).unwrap();
        assert!(matches!(block.get(1, 1), Ok(Value::Int(5))));
        assert!(matches!(block.get(0, 0), Ok(Value::Bool(true))));
        assert!(block.ancestor(1).unwrap().ptr_eq(&root));
    }

    #[test]
    fn set_grows_root_storage() {
        let root = Env::root(0);
        root.set(0, 3, Value::Int(1)).unwrap();
        assert_eq!(root.size(), 4);
        let doubled = root
            .update(0, 3, |value| {
                if let Value::Int(n) = value {
                    *n *= 2;
                }
                value.clone()
            })
            .unwrap();
        assert!(matches!(doubled, Value::Int(2)));
        assert!(matches!(root.get(0, 9), Ok(Value::Nil)));
    }

    #[test]
    fn bad_addresses_are_reported() {
        let root = Env::root(1);
        let block = Env::child(&root, 1);
        assert!(matches!(block.get(2, 0), Err(RuntimeError::TypeMismatch { .. })));
        assert!(matches!(block.get(0, 4), Err(RuntimeError::TypeMismatch { .. })));
        assert!(block.set(3, 0, Value::Int(1)).is_err());
    }
}
