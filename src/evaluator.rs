use crate::environment::{EnvError, Environment};
use crate::session::DEFAULT_MAX_DEPTH;
use crate::source::Span;
use crate::types::{Lambda, Node, Procedure, Sexpr, Symbol};
use log::{debug, trace, warn};
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error(transparent)]
    EnvError(#[from] EnvError), // Errors from environment lookup and call frames
    #[error("expected a procedure, but got: {0}")]
    NotAProcedure(Sexpr, Span), // Tried to call something that isn't a procedure
    #[error("procedure '{procedure}' expects {expected}, got {actual}")]
    ArityMismatch {
        procedure: String,
        expected: String,
        actual: usize,
        span: Span,
    },
    #[error("{operator} expects {expected} for argument {position}, got {}", .found.type_name())]
    TypeMismatch {
        operator: String,
        expected: &'static str,
        found: Sexpr,
        position: usize,
        span: Span,
    },
    #[error("invalid special form: {0}")]
    InvalidSpecialForm(String, Span), // Malformed special form (e.g., (if cond))
    #[error("{0}")]
    Arithmetic(String, Span), // Division by zero, overflow
    #[error("recursion depth limit of {limit} exceeded")]
    DepthExceeded { limit: usize, span: Span },
}

impl EvalError {
    pub fn span(&self) -> Span {
        match self {
            EvalError::EnvError(env_err) => env_err.span(),
            EvalError::NotAProcedure(_, span)
            | EvalError::InvalidSpecialForm(_, span)
            | EvalError::Arithmetic(_, span) => *span,
            EvalError::ArityMismatch { span, .. }
            | EvalError::TypeMismatch { span, .. }
            | EvalError::DepthExceeded { span, .. } => *span,
        }
    }
}

pub type EvalResult<T = Node> = Result<T, EvalError>;

/// Evaluates `node` with a fresh evaluator using the default depth limit.
pub fn evaluate(node: &Node, env: &Rc<RefCell<Environment>>) -> EvalResult {
    Evaluator::default().evaluate(node, env)
}

/// Recursive tree-walking evaluator. The only state it keeps is the current
/// nesting depth, which is bounded by `max_depth`.
pub struct Evaluator {
    max_depth: usize,
    depth: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator::new(DEFAULT_MAX_DEPTH)
    }
}

impl Evaluator {
    pub fn new(max_depth: usize) -> Self {
        Evaluator {
            max_depth,
            depth: 0,
        }
    }

    /// Evaluates a given AST Node within the specified environment.
    pub fn evaluate(&mut self, node: &Node, env: &Rc<RefCell<Environment>>) -> EvalResult {
        if self.depth >= self.max_depth {
            warn!(
                "recursion depth limit of {} reached while evaluating {}",
                self.max_depth, node
            );
            return Err(EvalError::DepthExceeded {
                limit: self.max_depth,
                span: node.span,
            });
        }
        self.depth += 1;
        let result = self.evaluate_inner(node, env);
        self.depth -= 1;
        result
    }

    fn evaluate_inner(&mut self, node: &Node, env: &Rc<RefCell<Environment>>) -> EvalResult {
        match &node.kind {
            // Self-evaluating values
            Sexpr::Number(_)
            | Sexpr::Boolean(_)
            | Sexpr::Nil
            | Sexpr::Procedure(_)
            | Sexpr::Unspecified => Ok(node.clone()),

            Sexpr::Symbol(name) => Ok(env.borrow().get(name, node.span)?),

            // Special forms or procedure calls
            Sexpr::Pair(pair) => {
                let head = pair.car();
                let operands = pair.cdr().list_elements().ok_or_else(|| {
                    EvalError::InvalidSpecialForm(
                        "cannot evaluate an improper list".to_string(),
                        node.span,
                    )
                })?;
                match head.kind.as_symbol().map(|name| &**name) {
                    Some("quote") => evaluate_quote(&operands, node.span),
                    Some("if") => self.evaluate_if(&operands, env, node.span),
                    Some("define") => self.evaluate_define(&operands, env, node.span),
                    Some("set!") => self.evaluate_set(&operands, env, node.span),
                    Some("lambda") => evaluate_lambda(&operands, env, node.span),
                    Some("let") => self.evaluate_let(&operands, env, node.span),
                    Some("begin") => self.evaluate_begin(&operands, env, node.span),
                    Some("cond") => self.evaluate_cond(&operands, env, node.span),
                    Some("and") => self.evaluate_and(&operands, env, node.span),
                    Some("or") => self.evaluate_or(&operands, env, node.span),
                    _ => self.evaluate_procedure(&head, &operands, env, node.span),
                }
            }
        }
    }

    fn evaluate_procedure(
        &mut self,
        operator: &Node,
        operands: &[Node],
        env: &Rc<RefCell<Environment>>,
        span: Span,
    ) -> EvalResult {
        let operator_result_node = self.evaluate(operator, env)?;

        let procedure = match operator_result_node.kind {
            Sexpr::Procedure(procedure) => procedure,
            other => return Err(EvalError::NotAProcedure(other, operator.span)),
        };

        // Operands are evaluated left to right in the caller's environment
        let mut evaluated_args: Vec<Node> = Vec::with_capacity(operands.len());
        for operand_node in operands {
            evaluated_args.push(self.evaluate(operand_node, env)?);
        }

        self.apply(&procedure, evaluated_args, span)
    }

    /// Applies an already evaluated procedure to evaluated arguments.
    pub fn apply(&mut self, procedure: &Procedure, args: Vec<Node>, span: Span) -> EvalResult {
        match procedure {
            Procedure::Primitive(func, _) => func(args, span),
            Procedure::Lambda(lambda) => {
                trace!(
                    "applying {} to {} argument(s)",
                    lambda.display_name(),
                    args.len()
                );
                let frame = Environment::extend(
                    lambda.env.clone(),
                    lambda.display_name(),
                    &lambda.params,
                    args,
                    span,
                )?;
                // The call frame is dropped on return unless a closure captured it
                self.evaluate(&lambda.body, &frame)
            }
        }
    }

    fn evaluate_if(
        &mut self,
        operands: &[Node],
        env: &Rc<RefCell<Environment>>,
        span: Span,
    ) -> EvalResult {
        let (condition, consequent, alternate) = match operands {
            [condition, consequent] => (condition, consequent, None),
            [condition, consequent, alternate] => (condition, consequent, Some(alternate)),
            _ => {
                return Err(EvalError::InvalidSpecialForm(
                    "if expects condition, consequent, and optional alternate".to_string(),
                    span,
                ));
            }
        };

        let is_truthy = is_true(&self.evaluate(condition, env)?);

        match (is_truthy, alternate) {
            (true, _) => self.evaluate(consequent, env),
            (false, Some(alternate)) => self.evaluate(alternate, env),
            (false, None) => Ok(Node::new_unspecified(span)),
        }
    }

    /// `(define name expr)`: binds in the global frame whatever frame the form
    /// is evaluated in, and yields the name rather than the value.
    fn evaluate_define(
        &mut self,
        operands: &[Node],
        env: &Rc<RefCell<Environment>>,
        span: Span,
    ) -> EvalResult {
        let [target, value_expr] = operands else {
            return Err(EvalError::InvalidSpecialForm(
                "define expects a name and exactly one value expression".to_string(),
                span,
            ));
        };
        let name = expect_symbol(target, "define")?;

        // Nothing is bound unless the value evaluates successfully
        let mut value = self.evaluate(value_expr, env)?;
        name_fresh_lambda(&mut value, &name);

        debug!("define {} = {}", name, value);
        Environment::global(env)
            .borrow_mut()
            .define(name.clone(), value);

        Ok(Node::new(Sexpr::Symbol(name), target.span))
    }

    fn evaluate_set(
        &mut self,
        operands: &[Node],
        env: &Rc<RefCell<Environment>>,
        span: Span,
    ) -> EvalResult {
        let [target, value_expr] = operands else {
            return Err(EvalError::InvalidSpecialForm(
                "set! expects a name and exactly one value expression".to_string(),
                span,
            ));
        };
        let name = expect_symbol(target, "set!")?;
        let value = self.evaluate(value_expr, env)?;
        env.borrow_mut().set(&name, value, target.span)?;
        Ok(Node::new_unspecified(span))
    }

    /// Evaluates `body` in order and yields the value of the last expression.
    fn evaluate_sequence(&mut self, body: &[Node], env: &Rc<RefCell<Environment>>) -> EvalResult {
        let mut result = None;
        for expr in body {
            result = Some(self.evaluate(expr, env)?);
        }
        result.ok_or_else(|| {
            EvalError::InvalidSpecialForm("empty body".to_string(), Span::default())
        })
    }

    fn evaluate_begin(
        &mut self,
        operands: &[Node],
        env: &Rc<RefCell<Environment>>,
        span: Span,
    ) -> EvalResult {
        if operands.is_empty() {
            return Err(EvalError::InvalidSpecialForm(
                "begin expects at least one expression".to_string(),
                span,
            ));
        }
        self.evaluate_sequence(operands, env)
    }

    /// `(let ((name expr) ...) body ...)`: every `expr` is evaluated in the
    /// enclosing frame before a fresh frame binds the names.
    fn evaluate_let(
        &mut self,
        operands: &[Node],
        env: &Rc<RefCell<Environment>>,
        span: Span,
    ) -> EvalResult {
        let [bindings, body @ ..] = operands else {
            return Err(EvalError::InvalidSpecialForm(
                "let expects a binding list and a body".to_string(),
                span,
            ));
        };
        if body.is_empty() {
            return Err(EvalError::InvalidSpecialForm(
                "let expects at least one body expression".to_string(),
                span,
            ));
        }
        let binding_nodes = bindings.list_elements().ok_or_else(|| {
            EvalError::InvalidSpecialForm(
                "let bindings must be a list of (name expr) pairs".to_string(),
                bindings.span,
            )
        })?;

        let mut names: Vec<Symbol> = Vec::with_capacity(binding_nodes.len());
        let mut values: Vec<Node> = Vec::with_capacity(binding_nodes.len());
        for binding in &binding_nodes {
            let Some([target, value_expr]) = binding
                .list_elements()
                .and_then(|items| <[Node; 2]>::try_from(items).ok())
            else {
                return Err(EvalError::InvalidSpecialForm(
                    "let binding must have the form (name expr)".to_string(),
                    binding.span,
                ));
            };
            let name = expect_symbol(&target, "let")?;
            if names.contains(&name) {
                return Err(EvalError::InvalidSpecialForm(
                    format!("duplicate binding '{}'", name),
                    target.span,
                ));
            }
            values.push(self.evaluate(&value_expr, env)?);
            names.push(name);
        }

        let frame = Environment::extend(env.clone(), "let", &names, values, span)?;
        self.evaluate_sequence(body, &frame)
    }

    /// `(cond (test body ...) ... (else body ...))`: the first clause whose
    /// test is not `#f` is chosen. A clause without a body yields its test
    /// value; no match yields unspecified.
    fn evaluate_cond(
        &mut self,
        operands: &[Node],
        env: &Rc<RefCell<Environment>>,
        span: Span,
    ) -> EvalResult {
        if operands.is_empty() {
            return Err(EvalError::InvalidSpecialForm(
                "cond expects at least one clause".to_string(),
                span,
            ));
        }
        for (index, clause) in operands.iter().enumerate() {
            let parts = match clause.list_elements() {
                Some(parts) if !parts.is_empty() => parts,
                _ => {
                    return Err(EvalError::InvalidSpecialForm(
                        "cond clause must be a non-empty list".to_string(),
                        clause.span,
                    ));
                }
            };
            let (test, body) = (&parts[0], &parts[1..]);

            if test.kind.as_symbol().is_some_and(|name| &**name == "else") {
                if index + 1 != operands.len() || body.is_empty() {
                    return Err(EvalError::InvalidSpecialForm(
                        "else must be the last cond clause and have a body".to_string(),
                        clause.span,
                    ));
                }
                return self.evaluate_sequence(body, env);
            }

            let value = self.evaluate(test, env)?;
            if is_true(&value) {
                return if body.is_empty() {
                    Ok(value)
                } else {
                    self.evaluate_sequence(body, env)
                };
            }
        }
        Ok(Node::new_unspecified(span))
    }

    /// `(and expr ...)`: stops at the first `#f`, otherwise yields the last
    /// value. `(and)` is `#t`.
    fn evaluate_and(
        &mut self,
        operands: &[Node],
        env: &Rc<RefCell<Environment>>,
        span: Span,
    ) -> EvalResult {
        let mut result = Node::new_bool(true, span);
        for expr in operands {
            result = self.evaluate(expr, env)?;
            if !is_true(&result) {
                break;
            }
        }
        Ok(result)
    }

    /// `(or expr ...)`: yields the first value that is not `#f`. `(or)` is `#f`.
    fn evaluate_or(
        &mut self,
        operands: &[Node],
        env: &Rc<RefCell<Environment>>,
        span: Span,
    ) -> EvalResult {
        for expr in operands {
            let value = self.evaluate(expr, env)?;
            if is_true(&value) {
                return Ok(value);
            }
        }
        Ok(Node::new_bool(false, span))
    }
}

// Only #f is false
fn is_true(value: &Node) -> bool {
    !matches!(value.kind, Sexpr::Boolean(false))
}

fn expect_symbol(node: &Node, form: &str) -> EvalResult<Symbol> {
    match &node.kind {
        Sexpr::Symbol(name) => Ok(name.clone()),
        other => Err(EvalError::InvalidSpecialForm(
            format!("{} expects a symbol, but got {}", form, other.type_name()),
            node.span,
        )),
    }
}

// A closure nobody else holds yet takes the name it is first defined under.
fn name_fresh_lambda(value: &mut Node, name: &Symbol) {
    if let Sexpr::Procedure(Procedure::Lambda(lambda)) = &mut value.kind {
        if let Some(fresh) = Rc::get_mut(lambda) {
            if fresh.name.is_none() {
                fresh.name = Some(name.clone());
            }
        }
    }
}

fn evaluate_quote(operands: &[Node], span: Span) -> EvalResult {
    if let [node] = operands {
        Ok(node.clone())
    } else {
        Err(EvalError::InvalidSpecialForm(
            "quote expects exactly one argument".to_string(),
            span,
        ))
    }
}

/// `(lambda (param ...) body)`: captures `env` by reference; the body is not
/// evaluated until the closure is applied.
fn evaluate_lambda(operands: &[Node], env: &Rc<RefCell<Environment>>, span: Span) -> EvalResult {
    let [params, body] = operands else {
        return Err(EvalError::InvalidSpecialForm(
            "lambda expects a parameter list and a single body expression".to_string(),
            span,
        ));
    };
    let param_nodes = params.list_elements().ok_or_else(|| {
        EvalError::InvalidSpecialForm(
            "lambda parameters must be a list of symbols".to_string(),
            params.span,
        )
    })?;

    let mut names: Vec<Symbol> = Vec::with_capacity(param_nodes.len());
    for param in &param_nodes {
        let name = expect_symbol(param, "lambda")?;
        if names.contains(&name) {
            return Err(EvalError::InvalidSpecialForm(
                format!("duplicate parameter '{}'", name),
                param.span,
            ));
        }
        names.push(name);
    }

    Ok(Node::new_lambda(
        Lambda {
            name: None,
            params: names,
            body: body.clone(),
            env: env.clone(),
        },
        span,
    ))
}
