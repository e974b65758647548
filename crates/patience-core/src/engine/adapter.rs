//! Trapping wrapper around the loaded rules.

use super::internals::{Host, Internals};
use crate::games::GameCatalog;
use crate::rules::{Lambda, LambdaTable, NamedCall, RuleHandle, Rules, ScriptError, Value};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

/// Seeded generator the rules draw from
#[derive(Clone, Debug)]
pub struct GameRng {
    inner: ChaCha8Rng,
    seed: u32,
}

impl GameRng {
    pub fn new(seed: u32) -> Self {
        Self {
            inner: ChaCha8Rng::seed_from_u64(seed as u64),
            seed,
        }
    }

    /// Fresh seed from OS entropy
    pub fn fresh_seed() -> u32 {
        rand::thread_rng().gen()
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Uniformly random integer in `[0, n)`, zero when `n` is zero
    pub fn below(&mut self, n: u32) -> u32 {
        if n == 0 {
            0
        } else {
            self.inner.gen_range(0..n)
        }
    }
}

/// Owns the rules of the loaded game and every call into them
pub(crate) struct RulesAdapter {
    catalog: GameCatalog,
    rules: Option<Box<dyn Rules>>,
    pub lambdas: LambdaTable,
    pub rng: GameRng,
}

impl RulesAdapter {
    pub fn new(catalog: GameCatalog) -> Self {
        Self {
            catalog,
            rules: None,
            lambdas: LambdaTable::default(),
            rng: GameRng::new(0),
        }
    }

    pub fn catalog(&self) -> &GameCatalog {
        &self.catalog
    }

    /// Instantiate and load the rules of a game file
    pub fn load(
        &mut self,
        game_file: &str,
        internals: &mut Internals,
        replaying: bool,
    ) -> Result<(), ScriptError> {
        self.rules = None;
        self.lambdas.clear();
        let mut rules = self.catalog.create(game_file)?;
        let mut host = Host::new(internals, &mut self.lambdas, &mut self.rng, replaying);
        trap("load", || rules.load(&mut host))?;
        if let Some(missing) = self.lambdas.missing_mandatory() {
            warn!("Game {} did not register {}", game_file, missing);
            return Err(ScriptError::MissingLambda(missing.name()));
        }
        self.rules = Some(rules);
        Ok(())
    }

    /// Call a registered entry point
    pub fn call(
        &mut self,
        lambda: Lambda,
        args: &[Value],
        internals: &mut Internals,
        replaying: bool,
    ) -> Result<Value, ScriptError> {
        let handle = self
            .lambdas
            .get(lambda)
            .ok_or(ScriptError::MissingLambda(lambda.name()))?;
        self.invoke(handle, args, internals, replaying)
    }

    /// Call a handle, a registered entry point or a delayed callback
    pub fn invoke(
        &mut self,
        handle: RuleHandle,
        args: &[Value],
        internals: &mut Internals,
        replaying: bool,
    ) -> Result<Value, ScriptError> {
        let rules = self.rules.as_mut().ok_or(ScriptError::NotLoaded)?;
        let mut host = Host::new(internals, &mut self.lambdas, &mut self.rng, replaying);
        trap("call", || rules.invoke(handle, args, &mut host))
    }

    pub fn call_named(
        &mut self,
        call: NamedCall,
        args: &[Value],
        internals: &mut Internals,
        replaying: bool,
    ) -> Result<Value, ScriptError> {
        let rules = self.rules.as_mut().ok_or(ScriptError::NotLoaded)?;
        let mut host = Host::new(internals, &mut self.lambdas, &mut self.rng, replaying);
        trap(call.name(), || rules.invoke_named(call, args, &mut host))
    }
}

/// Run a rules call, turning errors and panics into a logged failure
fn trap<T>(
    name: &str,
    f: impl FnOnce() -> Result<T, ScriptError>,
) -> Result<T, ScriptError> {
    let result = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            Err(ScriptError::call_failed(name, message))
        }
    };
    if let Err(e) = &result {
        warn!("Rules reported an error: {}", e);
    }
    result
}
