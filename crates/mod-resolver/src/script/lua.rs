//! Lua 5.4 sessions for mod configuration scripts
//!
//! Scripts are externally authored, so every session is sandboxed:
//! - only the `table`, `string`, `math` and `utf8` libraries are loaded
//! - `dofile`/`loadfile` are removed and `print` goes to the log
//! - memory is capped and an instruction hook enforces the time and
//!   instruction budgets of [`ScriptLimits`]
//! - the pattern functions of `string` refuse patterns whose backtracking
//!   could outrun the hook, which never fires inside a single library call

use mlua::{
    DeserializeOptions, Function, HookTriggers, Lua, LuaOptions, LuaSerdeExt, MultiValue, StdLib,
    Table, Value, Variadic, VmState,
};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;
use tracing::debug;

use crate::config::ScriptLimits;
use crate::core::{ConfigurationOptions, ScriptError};
use crate::script::{ScriptRuntime, ScriptSession};

/// Upper bound on matcher steps a single pattern call may need
const PATTERN_STEP_LIMIT: f64 = 5.0e7;

/// Which budget stopped a script
#[derive(Debug, Clone, Copy)]
enum Tripped {
    Time,
    Instructions,
}

/// Runtime handing out sandboxed Lua sessions
#[derive(Debug, Clone, Default)]
pub struct LuaRuntime {
    limits: ScriptLimits,
}

impl LuaRuntime {
    pub fn new(limits: ScriptLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ScriptLimits {
        &self.limits
    }
}

impl ScriptRuntime for LuaRuntime {
    type Session = LuaSession;

    fn create_session(&self) -> Result<LuaSession, ScriptError> {
        let libs = StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8;
        let lua = Lua::new_with(libs, LuaOptions::default()).map_err(session_error)?;
        lua.set_memory_limit(self.limits.memory_limit).map_err(session_error)?;

        let globals = lua.globals();
        for name in ["dofile", "loadfile"] {
            globals.set(name, Value::Nil).map_err(session_error)?;
        }
        let print = lua
            .create_function(|_, args: Variadic<Value>| {
                let line: Vec<String> = args.iter().map(describe).collect();
                debug!(target: "mod_script", "{}", line.join("\t"));
                Ok(())
            })
            .map_err(session_error)?;
        globals.set("print", print).map_err(session_error)?;
        guard_pattern_functions(&lua).map_err(session_error)?;

        Ok(LuaSession {
            lua: Some(lua),
            limits: self.limits.clone(),
        })
    }
}

/// One sandboxed Lua state
pub struct LuaSession {
    lua: Option<Lua>,
    limits: ScriptLimits,
}

impl LuaSession {
    fn lua(&self) -> Result<&Lua, ScriptError> {
        self.lua
            .as_ref()
            .ok_or_else(|| ScriptError::Session("session already closed".to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.lua.is_none()
    }

    fn install_budget_hook(&self, lua: &Lua) -> Rc<Cell<Option<Tripped>>> {
        let tripped = Rc::new(Cell::new(None));
        let flag = Rc::clone(&tripped);
        let deadline = Instant::now() + self.limits.timeout;
        let budget = self.limits.instruction_budget;
        let interval = self.limits.hook_interval;
        let executed = Cell::new(0u64);

        lua.set_hook(
            HookTriggers::new().every_nth_instruction(interval),
            move |_lua, _debug| {
                executed.set(executed.get() + u64::from(interval));
                if Instant::now() >= deadline {
                    flag.set(Some(Tripped::Time));
                    return Err(mlua::Error::runtime("script time budget exceeded"));
                }
                if budget.is_some_and(|limit| executed.get() > limit) {
                    flag.set(Some(Tripped::Instructions));
                    return Err(mlua::Error::runtime("script instruction budget exceeded"));
                }
                Ok(VmState::Continue)
            },
        );

        tripped
    }
}

impl ScriptSession for LuaSession {
    fn run(&mut self, chunk_name: &str, source: &str) -> Result<(), ScriptError> {
        let lua = self.lua()?;
        let tripped = self.install_budget_hook(lua);
        let result = lua.load(source).set_name(chunk_name).exec();
        lua.remove_hook();

        result.map_err(|err| match tripped.get() {
            Some(Tripped::Time) => ScriptError::BudgetExceeded {
                limit: format!("{}ms time", self.limits.timeout.as_millis()),
            },
            Some(Tripped::Instructions) => ScriptError::BudgetExceeded {
                limit: format!(
                    "{} instruction",
                    self.limits.instruction_budget.unwrap_or_default()
                ),
            },
            None => match err {
                mlua::Error::SyntaxError { message, .. } => ScriptError::Syntax(message),
                mlua::Error::MemoryError(_) => ScriptError::MemoryExceeded {
                    limit_bytes: self.limits.memory_limit,
                },
                other => ScriptError::Runtime(other.to_string()),
            },
        })
    }

    fn read_global(&self, name: &str) -> Result<Option<ConfigurationOptions>, ScriptError> {
        let lua = self.lua()?;
        let value: Value = lua
            .globals()
            .raw_get(name)
            .map_err(|e| ScriptError::Runtime(e.to_string()))?;
        if value.is_nil() {
            return Ok(None);
        }

        let options = DeserializeOptions::new()
            .deny_unsupported_types(false)
            .sort_keys(true);
        lua.from_value_with::<ConfigurationOptions>(value, options)
            .map(Some)
            .map_err(|e| ScriptError::Conversion(e.to_string()))
    }

    fn set_global(&mut self, name: &str, value: &str) -> Result<(), ScriptError> {
        self.lua()?
            .globals()
            .raw_set(name, value)
            .map_err(|e| ScriptError::Runtime(e.to_string()))
    }

    fn clear_global(&mut self, name: &str) -> Result<(), ScriptError> {
        self.lua()?
            .globals()
            .raw_set(name, Value::Nil)
            .map_err(|e| ScriptError::Runtime(e.to_string()))
    }

    /// Drop any metatable an earlier script put on the globals table
    fn reset_environment(&mut self) -> Result<(), ScriptError> {
        self.lua()?.globals().set_metatable(None);
        Ok(())
    }

    fn close(&mut self) {
        if self.lua.take().is_some() {
            debug!("Closed Lua session");
        }
    }
}

/// Wrap `string.find`, `match`, `gmatch` and `gsub` with a cost check
fn guard_pattern_functions(lua: &Lua) -> mlua::Result<()> {
    let string: Table = lua.globals().get("string")?;
    for name in ["find", "match", "gmatch", "gsub"] {
        let original: Function = string.get(name)?;
        let guarded = lua.create_function(move |_, args: MultiValue| {
            check_pattern_cost(name, &args)?;
            original.call::<MultiValue>(args)
        })?;
        string.set(name, guarded)?;
    }
    Ok(())
}

fn check_pattern_cost(name: &str, args: &MultiValue) -> mlua::Result<()> {
    let (Some(Value::String(subject)), Some(Value::String(pattern))) = (args.get(0), args.get(1))
    else {
        // Let the library report bad arguments
        return Ok(());
    };
    let plain = args
        .get(3)
        .is_some_and(|v| !matches!(v, Value::Nil | Value::Boolean(false)));
    if name == "find" && plain {
        return Ok(());
    }

    let pattern = pattern.as_bytes();
    let subject_len = subject.as_bytes().len();
    let anchored = name != "gmatch" && pattern.first() == Some(&b'^');
    let steps = estimated_match_steps(subject_len, count_quantifiers(&pattern), anchored);
    if steps > PATTERN_STEP_LIMIT {
        return Err(mlua::Error::runtime(format!(
            "string.{}: pattern too complex for a {} byte subject",
            name, subject_len
        )));
    }
    Ok(())
}

/// Count the backtracking repetitions (`*`, `+`, `-`) of a Lua pattern
fn count_quantifiers(pattern: &[u8]) -> u32 {
    let mut count = 0;
    let mut i = usize::from(pattern.first() == Some(&b'^'));
    let mut after_item = false;

    while i < pattern.len() {
        match pattern[i] {
            b'%' => {
                // %b takes two delimiters, %f a set; both are single items
                match pattern.get(i + 1) {
                    Some(b'b') => i += 4,
                    Some(b'f') => i = skip_set(pattern, i + 2),
                    _ => i += 2,
                }
                after_item = true;
                continue;
            }
            b'[' => {
                i = skip_set(pattern, i);
                after_item = true;
                continue;
            }
            b'*' | b'+' | b'-' if after_item => {
                count += 1;
                after_item = false;
            }
            b'?' if after_item => after_item = false,
            _ => after_item = true,
        }
        i += 1;
    }

    count
}

/// Index just past the set starting at `start` (which points at `[`)
fn skip_set(pattern: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    if pattern.get(i) == Some(&b'^') {
        i += 1;
    }
    // a leading `]` is a literal member
    if pattern.get(i) == Some(&b']') {
        i += 1;
    }
    while i < pattern.len() && pattern[i] != b']' {
        if pattern[i] == b'%' {
            i += 1;
        }
        i += 1;
    }
    i + 1
}

/// Worst case matcher steps: ways to split the subject over the repetitions,
/// times every start position when the pattern is not anchored
fn estimated_match_steps(subject_len: usize, quantifiers: u32, anchored: bool) -> f64 {
    let n = subject_len as f64;
    let mut splits = 1.0_f64;
    for k in 1..=quantifiers {
        splits *= (n + f64::from(k)) / f64::from(k);
        if splits > PATTERN_STEP_LIMIT {
            break;
        }
    }
    if anchored { splits } else { splits * (n + 1.0) }
}

fn session_error(err: mlua::Error) -> ScriptError {
    ScriptError::Session(err.to_string())
}

fn describe(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string_lossy().to_string(),
        other => other.type_name().to_string(),
    }
}
