use crate::language::ast::File;
use crate::language::compiler::{CompiledFile, Compiler, Function, Profile, StepBudget};
use crate::language::errors::CompileErrors;
use crate::language::types::Universe;
use crate::runtime::config::EngineConfig;
use crate::runtime::environment::Env;
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::imports::{Package, Packages};
use crate::runtime::value::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Compile(#[from] CompileErrors),
    #[error("package initialization failed: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Compiles files into one package and calls their functions. Package
/// variables live in the root environment, which every function closes over.
pub struct Interpreter {
    compiler: Compiler,
    root: Env,
}

impl Interpreter {
    pub fn new(config: EngineConfig) -> Self {
        let universe = Arc::new(Universe::new());
        let packages = Packages::standard(&universe);
        Self {
            compiler: Compiler::new(universe, config, packages),
            root: Env::root(0),
        }
    }

    pub fn universe(&self) -> &Arc<Universe> {
        self.compiler.universe()
    }

    pub fn config(&self) -> &EngineConfig {
        self.compiler.config()
    }

    /// Makes `package` importable by files loaded afterwards.
    pub fn register_package(&mut self, package: Package) {
        self.compiler.packages_mut().register(package);
    }

    /// Compiles `file`, then initializes its package variables in
    /// declaration order and runs its `init` functions.
    #[instrument(level = "debug", skip_all, fields(package = %file.package))]
    pub fn load(&mut self, file: &File) -> Result<(), LoadError> {
        let CompiledFile { inits, init_funcs } = self.compiler.compile_file(file)?;
        let budget = self.budget();
        for init in inits {
            let values = (init.values)(&self.root)?;
            for (slot, value) in init.slots.iter().zip(values) {
                if let Some(slot) = slot {
                    self.root.set(0, *slot, value)?;
                }
            }
        }
        for func in init_funcs {
            func.invoke(&self.root, Vec::new(), Arc::clone(&budget))?;
        }
        debug!(slots = self.compiler.package_slots(), "loaded file");
        Ok(())
    }

    /// Calls the package function `name` with a step budget of its own, so
    /// calls made concurrently from several threads are limited separately.
    #[instrument(level = "debug", skip(self, args))]
    pub fn call(&self, name: &str, args: Vec<Value>) -> RuntimeResult<Vec<Value>> {
        let func = self.function(name)?;
        func.invoke(&self.root, args, self.budget())
    }

    /// Like [`Interpreter::call`], also returning per-instruction hit counts
    /// of the called function's own code.
    pub fn call_profiled(&self, name: &str, args: Vec<Value>) -> RuntimeResult<(Vec<Value>, Profile)> {
        let func = self.function(name)?;
        func.invoke_profiled(&self.root, args, self.budget())
    }

    /// Current value of the package variable `name`.
    pub fn global(&self, name: &str) -> Option<Value> {
        let (slot, _) = self.compiler.package_var(name)?;
        self.root.get(0, slot).ok()
    }

    fn budget(&self) -> Arc<StepBudget> {
        Arc::new(StepBudget::new(self.config().max_steps))
    }

    fn function(&self, name: &str) -> RuntimeResult<Arc<Function>> {
        self.compiler
            .package_function(name)
            .ok_or_else(|| RuntimeError::UnknownFunction {
                name: name.to_string(),
            })
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
