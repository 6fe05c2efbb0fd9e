use crate::environment::Environment;
use crate::error::Error;
use crate::evaluator::Evaluator;
use crate::parser::parse_str_with_max_depth;
use crate::types::Node;
use log::debug;
use std::cell::RefCell;
use std::rc::Rc;

/// Nesting bound applied to both reading and evaluation unless configured
/// otherwise.
pub const DEFAULT_MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Deepest list nesting the reader accepts, and deepest evaluation
    /// recursion the evaluator allows. Bounds host stack usage.
    pub max_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Owns one global environment for its whole lifetime. Every command run
/// through the same session sees the definitions of the commands before it;
/// separate sessions share nothing.
///
/// A session is single-threaded; callers that share one across threads
/// must serialise access themselves.
pub struct Session {
    global: Rc<RefCell<Environment>>,
    config: SessionConfig,
}

impl Session {
    pub fn new() -> Self {
        Session::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Session {
            global: Environment::new_global_populated(),
            config,
        }
    }

    /// Limits this session was created with.
    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// The session's global frame. Hosts can pre-bind values with
    /// [`Environment::define`] before running commands, or inspect what the
    /// commands defined.
    pub fn global_env(&self) -> &Rc<RefCell<Environment>> {
        &self.global
    }

    /// Reads one expression from `source` and evaluates it against the
    /// global environment.
    pub fn eval_str(&mut self, source: &str) -> Result<Node, Error> {
        debug!("evaluating {:?}", source);
        let node = parse_str_with_max_depth(source, self.config.max_depth)?;
        let value = Evaluator::new(self.config.max_depth).evaluate(&node, &self.global)?;
        Ok(value)
    }

    /// Runs one command and returns its printed result. Failures are
    /// returned as `"<kind>: <message>"`, e.g.
    /// `"UnboundVariable: unbound variable 'x'"`.
    pub fn run_one(&mut self, source: &str) -> String {
        match self.eval_str(source) {
            Ok(value) => value.to_string(),
            Err(err) => {
                debug!("command failed: {}", err);
                format!("{}: {}", err.kind(), err)
            }
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

// Closures hold the frame they were created in, and frames can hold those
// closures back. Every frame's bindings are dropped explicitly so these
// cycles are released with the session.
impl Drop for Session {
    fn drop(&mut self) {
        Environment::release_all(&self.global);
    }
}
