use crate::source::Span;
use crate::types::{Node, PrimitiveFunc, Symbol};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    #[error("unbound variable '{0}'")]
    UnboundVariable(String, Span), // Symbol name, span where lookup happened
    #[error("procedure '{procedure}' expects {}, got {actual}", argument_count(.expected))]
    ArityMismatch {
        procedure: String,
        expected: usize,
        actual: usize,
        span: Span,
    },
}

/// `1 argument`, `2 arguments`.
pub(crate) fn argument_count(count: &usize) -> String {
    match count {
        1 => "1 argument".to_string(),
        n => format!("{} arguments", n),
    }
}

impl EnvError {
    pub fn span(&self) -> Span {
        match self {
            EnvError::UnboundVariable(_, span) => *span,
            EnvError::ArityMismatch { span, .. } => *span,
        }
    }
}

/// One frame of the environment chain. The outermost frame (no `outer`) is
/// the global frame of a session.
pub struct Environment {
    // Shared so that closures can keep their defining frame alive.
    outer: Option<Rc<RefCell<Environment>>>,
    bindings: HashMap<Symbol, Node>,
    // Global frame only: every frame created beneath it, so that frames
    // kept alive by their own closures can still be released.
    frames: Vec<Weak<RefCell<Environment>>>,
}

impl Environment {
    /// Creates a new, top-level (global) environment.
    pub fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Environment {
            outer: None,
            bindings: HashMap::new(),
            frames: Vec::new(),
        }))
    }

    pub fn new_global_populated() -> Rc<RefCell<Environment>> {
        let env_ptr = Environment::new();
        {
            let mut env = env_ptr.borrow_mut();
            env.add_primitive("+", crate::primitives::prim_add);
            env.add_primitive("-", crate::primitives::prim_sub);
            env.add_primitive("*", crate::primitives::prim_mul);
            env.add_primitive("/", crate::primitives::prim_div);
            env.add_primitive("=", crate::primitives::prim_equals);
            env.add_primitive("<", crate::primitives::prim_less_than);
            env.add_primitive("<=", crate::primitives::prim_less_than_or_equals);
            env.add_primitive(">", crate::primitives::prim_greater_than);
            env.add_primitive(">=", crate::primitives::prim_greater_than_or_equals);

            env.add_primitive("cons", crate::primitives::prim_cons);
            env.add_primitive("car", crate::primitives::prim_car);
            env.add_primitive("cdr", crate::primitives::prim_cdr);
            env.add_primitive("list", crate::primitives::prim_list);
            env.add_primitive("set-car!", crate::primitives::prim_set_car);
            env.add_primitive("set-cdr!", crate::primitives::prim_set_cdr);

            env.add_primitive("null?", crate::primitives::prim_is_null);
            env.add_primitive("pair?", crate::primitives::prim_is_pair);
            env.add_primitive("number?", crate::primitives::prim_is_number);
            env.add_primitive("boolean?", crate::primitives::prim_is_boolean);
            env.add_primitive("symbol?", crate::primitives::prim_is_symbol);
            env.add_primitive("procedure?", crate::primitives::prim_is_procedure);
        }
        env_ptr
    }

    /// Creates a new environment enclosed within an outer one.
    pub fn new_enclosed(outer_env: Rc<RefCell<Environment>>) -> Rc<RefCell<Self>> {
        let global = Environment::global(&outer_env);
        let frame = Rc::new(RefCell::new(Environment {
            outer: Some(outer_env),
            bindings: HashMap::new(),
            frames: Vec::new(),
        }));
        global.borrow_mut().register_frame(Rc::downgrade(&frame));
        frame
    }

    fn register_frame(&mut self, frame: Weak<RefCell<Environment>>) {
        // Prune dead frames before the vector grows
        if self.frames.len() == self.frames.capacity() {
            self.frames.retain(|frame| frame.strong_count() > 0);
        }
        self.frames.push(frame);
    }

    /// Creates the call frame for a procedure application, binding each
    /// parameter to the argument in the same position.
    pub fn extend(
        parent: Rc<RefCell<Environment>>,
        procedure: &str,
        params: &[Symbol],
        args: Vec<Node>,
        call_span: Span,
    ) -> Result<Rc<RefCell<Environment>>, EnvError> {
        if params.len() != args.len() {
            return Err(EnvError::ArityMismatch {
                procedure: procedure.to_string(),
                expected: params.len(),
                actual: args.len(),
                span: call_span,
            });
        }
        let frame = Environment::new_enclosed(parent);
        {
            let mut frame_mut = frame.borrow_mut();
            for (param, arg) in params.iter().zip(args) {
                frame_mut.define(param.clone(), arg);
            }
        }
        Ok(frame)
    }

    /// Follows the chain outwards to the global frame.
    pub fn global(env: &Rc<RefCell<Environment>>) -> Rc<RefCell<Environment>> {
        let mut current = env.clone();
        loop {
            let outer = current.borrow().outer.clone();
            match outer {
                Some(outer) => current = outer,
                None => return current,
            }
        }
    }

    /// Defines a variable in the *current* environment frame.
    /// Replaces the value if the variable already exists in this frame.
    pub fn define(&mut self, name: Symbol, value_node: Node) {
        self.bindings.insert(name, value_node);
    }

    /// Looks up a variable's value.
    /// Checks the current environment first, then walks up the outer environment chain.
    /// `lookup_span` is the location where the variable was referenced, used for error reporting.
    pub fn get(&self, name: &str, lookup_span: Span) -> Result<Node, EnvError> {
        if let Some(value_node) = self.bindings.get(name) {
            Ok(value_node.clone())
        } else {
            match &self.outer {
                Some(outer_env_ptr) => outer_env_ptr.borrow().get(name, lookup_span),
                None => Err(EnvError::UnboundVariable(name.to_string(), lookup_span)),
            }
        }
    }

    /// Sets the value of an *existing* variable in the environment chain.
    /// Searches outward from the current environment and updates the first frame
    /// where the variable is found. Errors if the variable is not defined.
    pub fn set(&mut self, name: &str, value_node: Node, set_span: Span) -> Result<(), EnvError> {
        if let Some(value_mut) = self.bindings.get_mut(name) {
            *value_mut = value_node;
            Ok(())
        } else {
            match &self.outer {
                Some(outer_env_ptr) => outer_env_ptr.borrow_mut().set(name, value_node, set_span),
                None => Err(EnvError::UnboundVariable(name.to_string(), set_span)),
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Drops every binding of this frame.
    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Drops the bindings of `global` and of every frame still alive beneath
    /// it. Reference cycles running through those frames are broken, so
    /// they are freed once the last outside handle goes away.
    pub fn release_all(global: &Rc<RefCell<Environment>>) {
        let (bindings, frames) = {
            let mut env = global.borrow_mut();
            (
                std::mem::take(&mut env.bindings),
                std::mem::take(&mut env.frames),
            )
        };
        drop(bindings);
        for frame in frames.iter().filter_map(Weak::upgrade) {
            let bindings = std::mem::take(&mut frame.borrow_mut().bindings);
            drop(bindings);
        }
    }

    fn add_primitive(&mut self, name: &'static str, func: PrimitiveFunc) {
        let node = Node::new_primitive(func, name, Span::default());
        self.define(Symbol::from(name), node);
    }
}

// Bindings can hold closures that point back at this frame, so only the
// names are shown.
impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.bindings.keys().map(|name| &**name).collect();
        names.sort_unstable();
        f.debug_struct("Environment")
            .field("bindings", &names)
            .field("has_outer", &self.outer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num_node(n: i64) -> Node {
        Node::new_number(n, Span::default())
    }

    fn sym_node(s: &str) -> Node {
        Node::new_symbol(s, Span::default())
    }

    fn name(s: &str) -> Symbol {
        Symbol::from(s)
    }

    #[test]
    fn test_define_and_get_global() {
        let env = Environment::new();
        env.borrow_mut().define(name("x"), num_node(10));

        let result = env.borrow().get("x", Span::default());
        assert_eq!(result, Ok(num_node(10)));
    }

    #[test]
    fn test_redefine_overwrites() {
        let env = Environment::new();
        env.borrow_mut().define(name("x"), num_node(10));
        env.borrow_mut().define(name("x"), num_node(11));
        assert_eq!(env.borrow().get("x", Span::default()), Ok(num_node(11)));
    }

    #[test]
    fn test_get_unbound_global() {
        let env = Environment::new();
        let result = env.borrow().get("y", Span::default());
        assert!(matches!(result, Err(EnvError::UnboundVariable(s, _)) if s == "y"));
    }

    #[test]
    fn test_define_and_get_enclosed() {
        let global_env = Environment::new();
        global_env.borrow_mut().define(name("x"), num_node(10));

        let local_env = Environment::new_enclosed(global_env);
        local_env.borrow_mut().define(name("y"), num_node(20));

        assert_eq!(local_env.borrow().get("y", Span::default()), Ok(num_node(20)));
        assert_eq!(local_env.borrow().get("x", Span::default()), Ok(num_node(10)));
    }

    #[test]
    fn test_get_unbound_enclosed() {
        let global_env = Environment::new();
        let local_env = Environment::new_enclosed(global_env);

        let span = Span::new(11, 12);
        let result = local_env.borrow().get("z", span);
        assert_eq!(
            result,
            Err(EnvError::UnboundVariable("z".to_string(), span))
        );
    }

    #[test]
    fn test_shadowing() {
        let global_env = Environment::new();
        global_env.borrow_mut().define(name("x"), num_node(10));

        let local_env = Environment::new_enclosed(global_env.clone());
        local_env.borrow_mut().define(name("x"), num_node(50));

        let inner_local_env = Environment::new_enclosed(local_env.clone());
        inner_local_env
            .borrow_mut()
            .define(name("y"), sym_node("y-value"));

        assert_eq!(
            inner_local_env.borrow().get("x", Span::default()),
            Ok(num_node(50))
        );
        assert_eq!(
            inner_local_env.borrow().get("y", Span::default()),
            Ok(sym_node("y-value"))
        );
        assert_eq!(global_env.borrow().get("x", Span::default()), Ok(num_node(10)));
    }

    #[test]
    fn test_extend_binds_positionally() {
        let global_env = Environment::new();
        let frame = Environment::extend(
            global_env.clone(),
            "test",
            &[name("a"), name("b")],
            vec![num_node(1), num_node(2)],
            Span::default(),
        )
        .expect("arity matches");
        assert_eq!(frame.borrow().get("a", Span::default()), Ok(num_node(1)));
        assert_eq!(frame.borrow().get("b", Span::default()), Ok(num_node(2)));
        // The parent frame is untouched
        assert!(!global_env.borrow().contains("a"));
    }

    #[test]
    fn test_extend_arity_mismatch() {
        let result = Environment::extend(
            Environment::new(),
            "test",
            &[name("a"), name("b")],
            vec![num_node(1)],
            Span::new(0, 10),
        );
        match result {
            Err(err) => {
                assert_eq!(
                    err,
                    EnvError::ArityMismatch {
                        procedure: "test".to_string(),
                        expected: 2,
                        actual: 1,
                        span: Span::new(0, 10),
                    }
                );
                assert_eq!(err.to_string(), "procedure 'test' expects 2 arguments, got 1");
            }
            Ok(_) => panic!("expected an arity error"),
        }
    }

    #[test]
    fn test_arity_message_singular() {
        let err = Environment::extend(Environment::new(), "id", &[name("x")], vec![], Span::default())
            .map(|_| ())
            .unwrap_err();
        assert_eq!(err.to_string(), "procedure 'id' expects 1 argument, got 0");
    }

    #[test]
    fn test_global_walks_to_root() {
        let global_env = Environment::new();
        let inner = Environment::new_enclosed(Environment::new_enclosed(global_env.clone()));
        assert!(Rc::ptr_eq(&Environment::global(&inner), &global_env));
        assert!(Rc::ptr_eq(&Environment::global(&global_env), &global_env));
    }

    #[test]
    fn test_set_outer() {
        let global_env = Environment::new();
        global_env.borrow_mut().define(name("x"), num_node(1));
        let local_env = Environment::new_enclosed(global_env.clone());

        local_env
            .borrow_mut()
            .set("x", num_node(2), Span::default())
            .expect("x is bound");
        assert_eq!(global_env.borrow().get("x", Span::default()), Ok(num_node(2)));
        assert!(!local_env.borrow().contains("x"));
    }

    #[test]
    fn test_set_unbound_error() {
        let env = Environment::new_enclosed(Environment::new());
        let result = env.borrow_mut().set("nope", num_node(1), Span::default());
        assert!(matches!(result, Err(EnvError::UnboundVariable(s, _)) if s == "nope"));
    }

    #[test]
    fn test_global_populated_has_primitives() {
        let env = Environment::new_global_populated();
        for op in ["+", "-", "*", "/", "cons", "car", "null?"] {
            assert!(env.borrow().contains(op), "missing primitive {}", op);
        }
    }

    #[test]
    fn test_dead_frames_are_pruned() {
        let global_env = Environment::new();
        for _ in 0..1_000 {
            let frame = Environment::new_enclosed(global_env.clone());
            frame.borrow_mut().define(name("x"), num_node(1));
        }
        let registered = global_env.borrow().frames.len();
        assert!(registered <= 64, "{} frames still registered", registered);
    }

    #[test]
    fn test_release_all_breaks_frame_cycles() {
        let global_env = Environment::new();
        let frame = Environment::new_enclosed(global_env.clone());
        let inner = Environment::new_enclosed(frame.clone());
        // frame -> inner -> frame
        frame.borrow_mut().define(
            name("self"),
            Node::new_lambda(
                crate::types::Lambda {
                    name: None,
                    params: vec![],
                    body: num_node(1),
                    env: inner,
                },
                Span::default(),
            ),
        );
        let weak_frame = Rc::downgrade(&frame);
        drop(frame);
        assert!(weak_frame.upgrade().is_some());

        Environment::release_all(&global_env);
        assert!(weak_frame.upgrade().is_none());
        assert!(global_env.borrow().frames.is_empty());
    }
}
