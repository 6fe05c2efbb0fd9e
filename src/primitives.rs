use crate::environment::argument_count;
use crate::{EvalError, EvalResult, Node, Sexpr, Span};

// Checks the number of arguments
macro_rules! check_arity {
    // Variant for minimum number of args
    ($args:expr, min $expected:expr, $span:expr, $name:expr) => {
        if $args.len() < $expected {
            return Err(EvalError::ArityMismatch {
                procedure: $name.to_string(),
                expected: format!("at least {}", argument_count(&$expected)),
                actual: $args.len(),
                span: $span,
            });
        }
    };
    ($args:expr, $expected:expr, $span:expr, $name:expr) => {
        if $args.len() != $expected {
            return Err(EvalError::ArityMismatch {
                procedure: $name.to_string(),
                expected: format!("exactly {}", argument_count(&$expected)),
                actual: $args.len(),
                span: $span,
            });
        }
    };
}

// Extracts an integer from a Node or returns a TypeMismatch error
macro_rules! expect_number {
    ($node:expr, $span:expr, $name:expr, $arg_pos:expr) => {
        match $node.kind {
            Sexpr::Number(n) => n,
            ref other => {
                return Err(EvalError::TypeMismatch {
                    operator: $name.to_string(),
                    expected: "an integer",
                    found: other.clone(),
                    position: $arg_pos,
                    span: $node.span,
                });
            }
        }
    };
}

fn overflow_error(operator: &str, span: Span) -> EvalError {
    EvalError::Arithmetic(format!("integer overflow in '{}'", operator), span)
}

/// Folds every argument into `start` from left to right.
fn fold_numbers<F: Fn(i64, i64) -> Option<i64>>(
    args: &[Node],
    span: Span,
    start: i64,
    func: F,
    operator: &str,
    first_position: usize,
) -> EvalResult {
    let mut acc = start;
    for (i, node) in args.iter().enumerate() {
        let num = expect_number!(node, span, operator, i + first_position);
        acc = func(acc, num).ok_or_else(|| overflow_error(operator, span))?;
    }
    Ok(Node::new_number(acc, span))
}

pub fn prim_add(args: Vec<Node>, span: Span) -> EvalResult {
    // (+) -> 0
    // (+ 1 2 3) -> 6
    fold_numbers(&args, span, 0, i64::checked_add, "+", 1)
}

pub fn prim_sub(args: Vec<Node>, span: Span) -> EvalResult {
    // (- x) -> -x
    // (- x y z) -> x - y - z
    check_arity!(args, min 1, span, "-");
    let first_num = expect_number!(&args[0], span, "-", 1);

    if args.len() == 1 {
        let negated = first_num
            .checked_neg()
            .ok_or_else(|| overflow_error("-", span))?;
        Ok(Node::new_number(negated, span))
    } else {
        fold_numbers(&args[1..], span, first_num, i64::checked_sub, "-", 2)
    }
}

pub fn prim_mul(args: Vec<Node>, span: Span) -> EvalResult {
    // (*) -> 1
    // (* 1 2 3) -> 6
    fold_numbers(&args, span, 1, i64::checked_mul, "*", 1)
}

pub fn prim_div(args: Vec<Node>, span: Span) -> EvalResult {
    // (/ x y z) -> x / y / z, truncating
    check_arity!(args, min 2, span, "/");
    let mut result = expect_number!(&args[0], span, "/", 1);
    for (i, node) in args.iter().enumerate().skip(1) {
        let num = expect_number!(node, span, "/", i + 1);
        if num == 0 {
            return Err(EvalError::Arithmetic(
                "division by zero".to_string(),
                node.span,
            ));
        }
        result = result
            .checked_div(num)
            .ok_or_else(|| overflow_error("/", span))?;
    }
    Ok(Node::new_number(result, span))
}

fn compare_numbers<F: Fn(i64, i64) -> bool>(
    args: Vec<Node>,
    span: Span,
    compare: F,
    operator: &str,
) -> EvalResult {
    // (= n1 n2 ...) -> boolean
    check_arity!(args, min 2, span, operator);
    let mut last_val = expect_number!(&args[0], span, operator, 1);
    let mut result = true;
    for (index, arg) in args.iter().enumerate().skip(1) {
        let val = expect_number!(arg, span, operator, index + 1);
        result = result && compare(last_val, val);
        last_val = val;
    }
    Ok(Node::new_bool(result, span))
}

pub fn prim_equals(args: Vec<Node>, span: Span) -> EvalResult {
    compare_numbers(args, span, |left, right| left == right, "=")
}

pub fn prim_less_than(args: Vec<Node>, span: Span) -> EvalResult {
    compare_numbers(args, span, |left, right| left < right, "<")
}

pub fn prim_less_than_or_equals(args: Vec<Node>, span: Span) -> EvalResult {
    compare_numbers(args, span, |left, right| left <= right, "<=")
}

pub fn prim_greater_than(args: Vec<Node>, span: Span) -> EvalResult {
    compare_numbers(args, span, |left, right| left > right, ">")
}

pub fn prim_greater_than_or_equals(args: Vec<Node>, span: Span) -> EvalResult {
    compare_numbers(args, span, |left, right| left >= right, ">=")
}

// --- List Primitives ---

fn pair_mismatch(node: &Node, operator: &str) -> EvalError {
    EvalError::TypeMismatch {
        operator: operator.to_string(),
        expected: "a pair",
        found: node.kind.clone(),
        position: 1,
        span: node.span,
    }
}

pub fn prim_cons(args: Vec<Node>, span: Span) -> EvalResult {
    // (cons a b) => (a . b)
    match <[Node; 2]>::try_from(args) {
        Ok([car, cdr]) => Ok(Node::new_pair(car, cdr, span)),
        Err(args) => Err(EvalError::ArityMismatch {
            procedure: "cons".to_string(),
            expected: format!("exactly {}", argument_count(&2)),
            actual: args.len(),
            span,
        }),
    }
}

pub fn prim_car(args: Vec<Node>, span: Span) -> EvalResult {
    check_arity!(args, 1, span, "car");
    match &args[0].kind {
        Sexpr::Pair(pair) => Ok(pair.car()),
        _ => Err(pair_mismatch(&args[0], "car")),
    }
}

pub fn prim_cdr(args: Vec<Node>, span: Span) -> EvalResult {
    check_arity!(args, 1, span, "cdr");
    match &args[0].kind {
        Sexpr::Pair(pair) => Ok(pair.cdr()),
        _ => Err(pair_mismatch(&args[0], "cdr")),
    }
}

pub fn prim_list(args: Vec<Node>, span: Span) -> EvalResult {
    // (list item1 item2 ...) -> new list containing items, '() when empty
    Ok(Node::new_list(args, span))
}

pub fn prim_set_car(args: Vec<Node>, span: Span) -> EvalResult {
    check_arity!(args, 2, span, "set-car!");
    match &args[0].kind {
        Sexpr::Pair(pair) => {
            pair.set_car(args[1].clone());
            Ok(Node::new_unspecified(span))
        }
        _ => Err(pair_mismatch(&args[0], "set-car!")),
    }
}

pub fn prim_set_cdr(args: Vec<Node>, span: Span) -> EvalResult {
    check_arity!(args, 2, span, "set-cdr!");
    match &args[0].kind {
        Sexpr::Pair(pair) => {
            pair.set_cdr(args[1].clone());
            Ok(Node::new_unspecified(span))
        }
        _ => Err(pair_mismatch(&args[0], "set-cdr!")),
    }
}

// --- Type Predicates ---

macro_rules! is_type {
    ($args:expr, $type:pat, $name:expr, $span:expr) => {{
        check_arity!($args, 1, $span, $name);
        Ok(Node::new_bool(matches!($args[0].kind, $type), $span))
    }};
}

pub fn prim_is_null(args: Vec<Node>, span: Span) -> EvalResult {
    is_type!(args, Sexpr::Nil, "null?", span)
}

pub fn prim_is_pair(args: Vec<Node>, span: Span) -> EvalResult {
    is_type!(args, Sexpr::Pair(_), "pair?", span)
}

pub fn prim_is_number(args: Vec<Node>, span: Span) -> EvalResult {
    is_type!(args, Sexpr::Number(_), "number?", span)
}

pub fn prim_is_boolean(args: Vec<Node>, span: Span) -> EvalResult {
    is_type!(args, Sexpr::Boolean(_), "boolean?", span)
}

pub fn prim_is_symbol(args: Vec<Node>, span: Span) -> EvalResult {
    is_type!(args, Sexpr::Symbol(_), "symbol?", span)
}

pub fn prim_is_procedure(args: Vec<Node>, span: Span) -> EvalResult {
    is_type!(args, Sexpr::Procedure(_), "procedure?", span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use crate::evaluator::Evaluator;
    use crate::parser::parse_str;

    fn eval_str(input: &str) -> EvalResult {
        let env = Environment::new_global_populated();
        let node = parse_str(input).expect("test input parses");
        Evaluator::default().evaluate(&node, &env)
    }

    fn assert_prints(input: &str, expected: &str) {
        match eval_str(input) {
            Ok(result) => assert_eq!(result.to_string(), expected, "Input: '{}'", input),
            Err(e) => panic!("Evaluation failed for input '{}': {}", input, e),
        }
    }

    fn num(n: i64) -> Node {
        Node::new_number(n, Span::default())
    }

    #[test]
    fn test_fold_is_left_to_right() {
        assert_prints("(- 100 10 1)", "89");
        assert_prints("(/ 100 10 3)", "3");
        assert_prints("(/ -7 2)", "-3");
    }

    #[test]
    fn test_overflow_is_reported() {
        assert!(matches!(
            eval_str("(+ 9223372036854775807 1)"),
            Err(EvalError::Arithmetic(_, _))
        ));
        assert!(matches!(
            eval_str("(* 4611686018427387904 2)"),
            Err(EvalError::Arithmetic(_, _))
        ));
        assert!(matches!(
            eval_str("(- -9223372036854775808)"),
            Err(EvalError::Arithmetic(_, _))
        ));
        assert!(matches!(
            eval_str("(/ -9223372036854775808 -1)"),
            Err(EvalError::Arithmetic(_, _))
        ));
    }

    #[test]
    fn test_division_by_zero_points_at_divisor() {
        match eval_str("(/ 10 2 0)") {
            Err(EvalError::Arithmetic(message, span)) => {
                assert_eq!(message, "division by zero");
                assert_eq!(span, Span::new(8, 9));
            }
            other => panic!("expected division by zero, got {:?}", other),
        }
    }

    #[test]
    fn test_type_mismatch_reports_position() {
        match prim_add(vec![num(1), num(2), Node::new_bool(true, Span::new(4, 6))], Span::default()) {
            Err(EvalError::TypeMismatch {
                operator,
                position,
                span,
                ..
            }) => {
                assert_eq!(operator, "+");
                assert_eq!(position, 3);
                assert_eq!(span, Span::new(4, 6));
            }
            other => panic!("expected a type mismatch, got {:?}", other),
        }
        let err = prim_sub(vec![num(1), Node::new_nil(Span::default())], Span::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "- expects an integer for argument 2, got nil");
    }

    #[test]
    fn test_arity_messages() {
        let err = prim_div(vec![num(1)], Span::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "procedure '/' expects at least 2 arguments, got 1"
        );
        let err = prim_car(vec![], Span::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "procedure 'car' expects exactly 1 argument, got 0"
        );
    }

    #[test]
    fn test_comparisons() {
        assert_prints("(= 5 5 5)", "#t");
        assert_prints("(= 5 6)", "#f");
        assert_prints("(< 1 2 3)", "#t");
        assert_prints("(< 1 3 2)", "#f");
        assert_prints("(<= 2 2 3)", "#t");
        assert_prints("(> 3 2 1)", "#t");
        assert_prints("(>= 3 3 4)", "#f");
        assert!(matches!(
            eval_str("(= 1)"),
            Err(EvalError::ArityMismatch { .. })
        ));
        assert!(matches!(
            eval_str("(< 1 #f)"),
            Err(EvalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_list_primitives() {
        assert_prints("(cons 1 2)", "(1 . 2)");
        assert_prints("(cons 1 (cons 2 ()))", "(1 2)");
        assert_prints("(list 1 2 3)", "(1 2 3)");
        assert_prints("(list)", "()");
        assert_prints("(car (list 1 2 3))", "1");
        assert_prints("(cdr (list 1 2 3))", "(2 3)");
        assert_prints("(cdr (list 1))", "()");
        assert!(matches!(
            eval_str("(car ())"),
            Err(EvalError::TypeMismatch { .. })
        ));
        assert!(matches!(
            eval_str("(cons 1)"),
            Err(EvalError::ArityMismatch { .. })
        ));
    }

    #[test]
    fn test_pair_mutation() {
        let env = Environment::new_global_populated();
        let mut evaluator = Evaluator::default();
        let mut run = |input: &str| {
            let node = parse_str(input).expect("parses");
            evaluator
                .evaluate(&node, &env)
                .map(|result| result.to_string())
        };
        assert_eq!(run("(define p (list 1 2))"), Ok("p".to_string()));
        assert_eq!(run("(define q p)"), Ok("q".to_string()));
        assert_eq!(run("(set-car! p 10)"), Ok("#<unspecified>".to_string()));
        assert_eq!(run("(set-cdr! (cdr p) (list 3))"), Ok("#<unspecified>".to_string()));
        assert_eq!(run("q"), Ok("(10 2 3)".to_string()));
        assert!(run("(set-car! 1 2)").is_err());
    }

    #[test]
    fn test_predicates() {
        assert_prints("(null? ())", "#t");
        assert_prints("(null? (list 1))", "#f");
        assert_prints("(pair? (cons 1 2))", "#t");
        assert_prints("(pair? ())", "#f");
        assert_prints("(number? 1)", "#t");
        assert_prints("(boolean? #f)", "#t");
        assert_prints("(symbol? (quote a))", "#t");
        assert_prints("(symbol? 1)", "#f");
        assert_prints("(procedure? +)", "#t");
        assert_prints("(procedure? (lambda (x) x))", "#t");
        assert!(matches!(
            eval_str("(null?)"),
            Err(EvalError::ArityMismatch { .. })
        ));
    }
}
