//! Script evaluation for mod configuration options
//!
//! Each mod ships a script that assigns its option descriptors to a well-known
//! global. Evaluation acquires an interpreter session, runs the script, reads
//! that global back and releases the session, whatever the outcome.
//!
//! Script failures never escape this module as errors of the run: the caller
//! gets a [`ScriptError`] per mod and carries on with the next one.

pub mod lua;

pub use lua::{LuaRuntime, LuaSession};

use crate::config::{ResolverConfig, SessionPolicy};
use crate::core::{
    ConfigurationOptions, ModConfigScript, ModId, ModMetadata, ResolvedMod, ScriptError,
};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, warn};

/// One isolated execution context of the embedded interpreter
pub trait ScriptSession {
    /// Execute `source` as a chunk called `chunk_name`
    fn run(&mut self, chunk_name: &str, source: &str) -> Result<(), ScriptError>;

    /// Read a global as plain data, `None` when it is unset
    fn read_global(&self, name: &str) -> Result<Option<ConfigurationOptions>, ScriptError>;

    fn set_global(&mut self, name: &str, value: &str) -> Result<(), ScriptError>;

    fn clear_global(&mut self, name: &str) -> Result<(), ScriptError>;

    /// Undo environment changes a previous script made beyond its own globals
    fn reset_environment(&mut self) -> Result<(), ScriptError> {
        Ok(())
    }

    /// Release the session; calling it more than once is a no-op
    fn close(&mut self);
}

/// Factory for interpreter sessions
pub trait ScriptRuntime: Send + Sync + 'static {
    type Session: ScriptSession;

    fn create_session(&self) -> Result<Self::Session, ScriptError>;
}

/// Session guard that closes the session when it goes out of scope
pub struct ScopedSession<S: ScriptSession> {
    session: S,
}

impl<S: ScriptSession> ScopedSession<S> {
    pub fn acquire<R>(runtime: &R) -> Result<Self, ScriptError>
    where
        R: ScriptRuntime<Session = S> + ?Sized,
    {
        Ok(Self {
            session: runtime.create_session()?,
        })
    }

    /// Close the session now instead of at end of scope
    pub fn release(mut self) {
        self.session.close();
    }
}

impl<S: ScriptSession> Deref for ScopedSession<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: ScriptSession> DerefMut for ScopedSession<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

impl<S: ScriptSession> Drop for ScopedSession<S> {
    fn drop(&mut self) {
        self.session.close();
    }
}

/// Evaluation knobs taken from [`ResolverConfig`]
#[derive(Debug, Clone)]
pub struct EvaluationSettings {
    pub options_global: String,
    pub locale: Option<String>,
    pub session_policy: SessionPolicy,
}

impl From<&ResolverConfig> for EvaluationSettings {
    fn from(config: &ResolverConfig) -> Self {
        Self {
            options_global: config.options_global.clone(),
            locale: config.locale.clone(),
            session_policy: config.session_policy,
        }
    }
}

/// Result of evaluating the scripts of one batch
#[derive(Debug, Default)]
pub struct BatchEvaluation {
    /// Resolved mods in input order
    pub mods: Vec<ResolvedMod>,
    pub script_failures: usize,
    pub missing_scripts: usize,
}

/// Runs configuration scripts against a [`ScriptRuntime`]
pub struct ScriptEvaluator<R: ScriptRuntime> {
    runtime: Arc<R>,
    settings: EvaluationSettings,
}

impl<R: ScriptRuntime> Clone for ScriptEvaluator<R> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
            settings: self.settings.clone(),
        }
    }
}

impl<R: ScriptRuntime> ScriptEvaluator<R> {
    pub fn new(runtime: Arc<R>, settings: EvaluationSettings) -> Self {
        Self { runtime, settings }
    }

    pub fn settings(&self) -> &EvaluationSettings {
        &self.settings
    }

    /// Evaluate one script in a session of its own
    pub fn evaluate(
        &self,
        id: &ModId,
        code: &str,
    ) -> Result<Option<ConfigurationOptions>, ScriptError> {
        let mut session = ScopedSession::acquire(self.runtime.as_ref())?;
        let options = evaluate_in_session(&mut *session, &self.settings, id, code);
        session.release();
        options
    }

    /// Evaluate scripts one mod at a time, in the order given
    ///
    /// Mods without a script, and mods whose script fails, come out with
    /// options absent. Under [`SessionPolicy::PerBatch`] a session is shared
    /// until a script fails, after which the next mod gets a fresh one.
    pub fn evaluate_batch(
        &self,
        pairs: Vec<(ModMetadata, Option<ModConfigScript>)>,
    ) -> BatchEvaluation {
        let mut outcome = BatchEvaluation::default();
        let mut shared: Option<ScopedSession<R::Session>> = None;

        for (metadata, script) in pairs {
            let Some(script) = script else {
                debug!("No configuration script for mod {}", metadata.id);
                outcome.missing_scripts += 1;
                outcome.mods.push(ResolvedMod::bare(metadata));
                continue;
            };

            let result = match self.settings.session_policy {
                SessionPolicy::PerMod => self.evaluate(&metadata.id, &script.code),
                SessionPolicy::PerBatch => {
                    let session = match shared.take() {
                        Some(session) => Ok(session),
                        None => ScopedSession::acquire(self.runtime.as_ref()),
                    };
                    session.and_then(|mut session| {
                        let result = evaluate_in_session(
                            &mut *session,
                            &self.settings,
                            &metadata.id,
                            &script.code,
                        );
                        if result.is_ok() {
                            shared = Some(session);
                        }
                        result
                    })
                }
            };

            let configuration_options = match result {
                Ok(options) => options,
                Err(err) => {
                    warn!(
                        "Configuration script of mod {} ({}) failed, \
                         continuing without options: {}",
                        metadata.id, metadata.title, err
                    );
                    outcome.script_failures += 1;
                    None
                }
            };

            outcome.mods.push(ResolvedMod {
                metadata,
                code: Some(script.code),
                configuration_options,
            });
        }

        if let Some(session) = shared {
            session.release();
        }
        outcome
    }
}

/// Prepare the session for one mod, run its script and read the options back
///
/// The environment is reset and the options binding cleared first, so a
/// script that never assigns it cannot inherit the value of an earlier script.
pub fn evaluate_in_session<S: ScriptSession + ?Sized>(
    session: &mut S,
    settings: &EvaluationSettings,
    id: &ModId,
    code: &str,
) -> Result<Option<ConfigurationOptions>, ScriptError> {
    let folder_name = id.folder_name();

    session.reset_environment()?;
    session.clear_global(&settings.options_global)?;
    session.set_global("folder_name", &folder_name)?;
    if let Some(locale) = &settings.locale {
        session.set_global("locale", locale)?;
    }

    session.run(&folder_name, code)?;
    let options = session.read_global(&settings.options_global)?;
    debug!(
        "Evaluated configuration script of mod {} (options {})",
        id,
        if options.is_some() { "present" } else { "absent" }
    );
    Ok(options)
}
