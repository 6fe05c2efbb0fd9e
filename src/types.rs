use crate::environment::Environment;
use crate::evaluator::EvalResult;
use crate::source::Span;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

/// Symbol names are shared rather than copied; cloning a symbol is a
/// reference-count bump.
pub type Symbol = Rc<str>;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: Sexpr, // The actual S-expression data
    pub span: Span,  // The source span it covers
}

impl Node {
    pub fn new(kind: Sexpr, span: Span) -> Self {
        Node { kind, span }
    }

    pub fn new_number(n: i64, span: Span) -> Self {
        Node::new(Sexpr::Number(n), span)
    }

    pub fn new_symbol(name: &str, span: Span) -> Self {
        Node::new(Sexpr::Symbol(Symbol::from(name)), span)
    }

    pub fn new_bool(b: bool, span: Span) -> Self {
        Node::new(Sexpr::Boolean(b), span)
    }

    pub fn new_nil(span: Span) -> Self {
        Node::new(Sexpr::Nil, span)
    }

    pub fn new_unspecified(span: Span) -> Self {
        Node::new(Sexpr::Unspecified, span)
    }

    pub fn new_pair(car: Node, cdr: Node, span: Span) -> Self {
        Node::new(Sexpr::Pair(Rc::new(Pair::new(car, cdr))), span)
    }

    pub fn new_primitive(func: PrimitiveFunc, name: &'static str, span: Span) -> Self {
        Node::new(Sexpr::Procedure(Procedure::Primitive(func, name)), span)
    }

    pub fn new_lambda(lambda: Lambda, span: Span) -> Self {
        Node::new(Sexpr::Procedure(Procedure::Lambda(Rc::new(lambda))), span)
    }

    /// Builds a proper list from `items`, terminated by `()`.
    pub fn new_list(items: Vec<Node>, span: Span) -> Self {
        items
            .into_iter()
            .rev()
            .fold(Node::new_nil(Span::new(span.end, span.end)), |cdr, car| {
                let pair_span = Span::new(car.span.start, span.end);
                Node::new_pair(car, cdr, pair_span)
            })
            .with_span(span)
    }

    fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Collects the elements of a proper list. Returns `None` if the chain
    /// ends in anything other than `()`.
    pub fn list_elements(&self) -> Option<Vec<Node>> {
        let mut elements = Vec::new();
        let mut current = self.clone();
        loop {
            let next = match &current.kind {
                Sexpr::Nil => return Some(elements),
                Sexpr::Pair(pair) => {
                    elements.push(pair.car());
                    pair.cdr()
                }
                _ => return None,
            };
            current = next;
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

/// Every runtime value. Parsed code is built out of the same variants, so
/// the reader's output is directly evaluable.
#[derive(Debug, Clone, PartialEq)]
pub enum Sexpr {
    Number(i64),
    Symbol(Symbol),
    Boolean(bool), // #t or #f
    Nil,           // The empty list '()
    Pair(Rc<Pair>),
    Procedure(Procedure),
    Unspecified,
}

impl Sexpr {
    pub fn type_name(&self) -> &'static str {
        match self {
            Sexpr::Number(_) => "integer",
            Sexpr::Symbol(_) => "symbol",
            Sexpr::Boolean(_) => "boolean",
            Sexpr::Nil => "nil",
            Sexpr::Pair(_) => "pair",
            Sexpr::Procedure(_) => "procedure",
            Sexpr::Unspecified => "unspecified",
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Sexpr::Symbol(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Sexpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Printer::default().write_sexpr(f, self)
    }
}

const CYCLE_MARKER: &str = "#<cycle>";

/// Writes values in their canonical form. `active` holds the pairs whose
/// printing is still in progress; reaching one of them again prints
/// [`CYCLE_MARKER`] in its place, so cyclic structure terminates.
#[derive(Default)]
struct Printer {
    active: HashSet<*const Pair>,
}

impl Printer {
    fn write_sexpr(&mut self, f: &mut fmt::Formatter<'_>, sexpr: &Sexpr) -> fmt::Result {
        match sexpr {
            Sexpr::Symbol(s) => write!(f, "{}", s),
            Sexpr::Number(n) => write!(f, "{}", n),
            Sexpr::Boolean(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Sexpr::Nil => write!(f, "()"),
            Sexpr::Pair(pair) => self.write_pair(f, pair),
            Sexpr::Procedure(procedure) => match procedure {
                Procedure::Primitive(_, name) => write!(f, "#<primitive:{}>", name),
                Procedure::Lambda(lambda) => match &lambda.name {
                    Some(name) => write!(f, "#<procedure:{}>", name),
                    None => write!(f, "#<procedure>"),
                },
            },
            Sexpr::Unspecified => write!(f, "#<unspecified>"),
        }
    }

    fn write_pair(&mut self, f: &mut fmt::Formatter<'_>, pair: &Pair) -> fmt::Result {
        let mut entered = Vec::new();
        let result = self.write_list(f, pair, &mut entered);
        for ptr in entered {
            self.active.remove(&ptr);
        }
        result
    }

    // The cdr chain is walked iteratively; only cars recurse.
    fn write_list(
        &mut self,
        f: &mut fmt::Formatter<'_>,
        first: &Pair,
        entered: &mut Vec<*const Pair>,
    ) -> fmt::Result {
        if !self.enter(first, entered) {
            return f.write_str(CYCLE_MARKER);
        }
        f.write_str("(")?;
        self.write_sexpr(f, &first.car().kind)?;
        let mut rest = first.cdr();
        loop {
            let next = match &rest.kind {
                Sexpr::Nil => break,
                Sexpr::Pair(next) => {
                    if !self.enter(next, entered) {
                        write!(f, " . {}", CYCLE_MARKER)?;
                        break;
                    }
                    f.write_str(" ")?;
                    self.write_sexpr(f, &next.car().kind)?;
                    next.cdr()
                }
                tail => {
                    f.write_str(" . ")?;
                    self.write_sexpr(f, tail)?;
                    break;
                }
            };
            rest = next;
        }
        f.write_str(")")
    }

    fn enter(&mut self, pair: &Pair, entered: &mut Vec<*const Pair>) -> bool {
        let ptr = std::ptr::from_ref(pair);
        let fresh = self.active.insert(ptr);
        if fresh {
            entered.push(ptr);
        }
        fresh
    }
}

/// A cons cell. Both slots can be replaced in place (`set-car!`/`set-cdr!`),
/// which every alias of the pair observes.
pub struct Pair {
    car: RefCell<Node>,
    cdr: RefCell<Node>,
}

impl Pair {
    pub fn new(car: Node, cdr: Node) -> Self {
        Pair {
            car: RefCell::new(car),
            cdr: RefCell::new(cdr),
        }
    }

    pub fn car(&self) -> Node {
        self.car.borrow().clone()
    }

    pub fn cdr(&self) -> Node {
        self.cdr.borrow().clone()
    }

    pub fn set_car(&self, value: Node) {
        *self.car.borrow_mut() = value;
    }

    pub fn set_cdr(&self, value: Node) {
        *self.cdr.borrow_mut() = value;
    }
}

// Long cdr chains would otherwise be freed by one nested drop per element.
impl Drop for Pair {
    fn drop(&mut self) {
        let mut next = std::mem::replace(self.cdr.get_mut(), Node::new_nil(Span::default()));
        loop {
            let Sexpr::Pair(pair) = next.kind else {
                break;
            };
            match Rc::into_inner(pair) {
                Some(mut pair) => {
                    next = std::mem::replace(pair.cdr.get_mut(), Node::new_nil(Span::default()));
                }
                None => break,
            }
        }
    }
}

impl fmt::Debug for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pair")?;
        Printer::default().write_pair(f, self)
    }
}

// Structural equality. A pair of cells already under comparison is taken as
// equal, which makes comparing cyclic structure terminate.
impl PartialEq for Pair {
    fn eq(&self, other: &Self) -> bool {
        pairs_equal(self, other, &mut HashSet::new())
    }
}

fn pairs_equal(
    left: &Pair,
    right: &Pair,
    seen: &mut HashSet<(*const Pair, *const Pair)>,
) -> bool {
    if !seen.insert((std::ptr::from_ref(left), std::ptr::from_ref(right))) {
        return true;
    }
    if !nodes_equal(&left.car(), &right.car(), seen) {
        return false;
    }
    let (mut left_rest, mut right_rest) = (left.cdr(), right.cdr());
    loop {
        if left_rest.span != right_rest.span {
            return false;
        }
        let (next_left, next_right) = match (&left_rest.kind, &right_rest.kind) {
            (Sexpr::Pair(l), Sexpr::Pair(r)) => {
                if Rc::ptr_eq(l, r) || !seen.insert((Rc::as_ptr(l), Rc::as_ptr(r))) {
                    return true;
                }
                if !nodes_equal(&l.car(), &r.car(), seen) {
                    return false;
                }
                (l.cdr(), r.cdr())
            }
            (l, r) => return l == r,
        };
        left_rest = next_left;
        right_rest = next_right;
    }
}

fn nodes_equal(
    left: &Node,
    right: &Node,
    seen: &mut HashSet<(*const Pair, *const Pair)>,
) -> bool {
    if left.span != right.span {
        return false;
    }
    match (&left.kind, &right.kind) {
        (Sexpr::Pair(l), Sexpr::Pair(r)) => Rc::ptr_eq(l, r) || pairs_equal(l, r, seen),
        (l, r) => l == r,
    }
}

pub type PrimitiveFunc = fn(Vec<Node>, Span) -> EvalResult;

#[derive(Clone)]
pub enum Procedure {
    Primitive(PrimitiveFunc, &'static str), // The function pointer and its name
    Lambda(Rc<Lambda>),
}

/// A user-defined procedure. The environment is the frame chain that was
/// active when the `lambda` form was evaluated; it is shared, never copied.
pub struct Lambda {
    pub name: Option<Symbol>,
    pub params: Vec<Symbol>,
    pub body: Node,
    pub env: Rc<RefCell<Environment>>,
}

impl Lambda {
    /// Name used in diagnostics.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("#<lambda>")
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Procedure::Primitive(_, name) => write!(f, "Primitive({})", name),
            // The captured environment may contain this very closure
            Procedure::Lambda(lambda) => write!(
                f,
                "Lambda({}, params: {:?}, body: {})",
                lambda.display_name(),
                lambda.params,
                lambda.body
            ),
        }
    }
}

// Primitives compare by name, closures by identity.
impl PartialEq for Procedure {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Procedure::Primitive(_, n1), Procedure::Primitive(_, n2)) => n1 == n2,
            (Procedure::Lambda(l1), Procedure::Lambda(l2)) => Rc::ptr_eq(l1, l2),
            _ => false,
        }
    }
}
