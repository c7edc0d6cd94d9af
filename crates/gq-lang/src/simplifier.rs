use smol_str::SmolStr;

use crate::ast::{Args, Expr, Node};

/// Rewrites `node` into its canonical form.
///
/// Two rewrites run bottom-up until nothing changes:
///
/// * a zero-argument call `(f)` of a function whose declared arity is
///   positive becomes the bare symbol `f`, unless `f` is a lambda parameter
///   in scope;
/// * eta-reduction: `{a, b -> f x a b}` becomes `f x`, and `{a -> f a}`
///   becomes `f`. A lambda is only reduced when none of its parameters
///   occurs free in `f` or in the arguments that are kept.
///
/// This makes implicit lambdas such as `map (get "name")` identical to their
/// explicit form `map {f -> get "name" f}`. The function is pure and
/// idempotent.
pub fn simplify<F>(node: &Node, arity: &F) -> Node
where
    F: Fn(&str) -> Option<usize>,
{
    Simplifier {
        arity,
        bound: Vec::new(),
    }
    .simplify(node)
}

struct Simplifier<'a, F> {
    arity: &'a F,
    /// Lambda parameters in scope, innermost last.
    bound: Vec<SmolStr>,
}

impl<F> Simplifier<'_, F>
where
    F: Fn(&str) -> Option<usize>,
{
    fn simplify(&mut self, node: &Node) -> Node {
        match &node.expr {
            Expr::Symbol(_) | Expr::Literal(_) => node.clone(),
            Expr::Call {
                function,
                args,
                pipelined,
            } => {
                let function = self.simplify(function);
                let args = args.iter().map(|arg| self.simplify(arg)).collect::<Args>();

                if args.is_empty() && self.is_elidable(&function) {
                    tracing::trace!(call = %function, "elided zero-argument call");
                    return function.with_range(node.range);
                }

                Node {
                    range: node.range,
                    expr: Expr::Call {
                        function: Box::new(function),
                        args,
                        pipelined: *pipelined,
                    },
                }
            }
            Expr::Lambda { params, body } => {
                let depth = self.bound.len();
                self.bound.extend(params.iter().cloned());
                let body = self.simplify(body);
                self.bound.truncate(depth);

                match eta_reduce(params, &body) {
                    Some(reduced) => {
                        tracing::trace!(from = %body, to = %reduced, "eta-reduced lambda");
                        self.simplify(&reduced.with_range(node.range))
                    }
                    None => Node {
                        range: node.range,
                        expr: Expr::Lambda {
                            params: params.clone(),
                            body: Box::new(body),
                        },
                    },
                }
            }
        }
    }

    fn is_elidable(&self, function: &Node) -> bool {
        match function.as_symbol() {
            Some(name) => {
                !self.bound.contains(name) && (self.arity)(name).is_some_and(|arity| arity > 0)
            }
            None => false,
        }
    }
}

fn eta_reduce(params: &[SmolStr], body: &Node) -> Option<Node> {
    let Expr::Call {
        function,
        args,
        pipelined,
    } = &body.expr
    else {
        return None;
    };

    if params.is_empty() || args.len() < params.len() {
        return None;
    }

    let (kept, trailing) = args.split_at(args.len() - params.len());
    let forwards_params = trailing
        .iter()
        .zip(params)
        .all(|(arg, param)| arg.as_symbol() == Some(param));
    let distinct = params
        .iter()
        .enumerate()
        .all(|(i, param)| !params[..i].contains(param));

    if !forwards_params || !distinct {
        return None;
    }

    if params
        .iter()
        .any(|param| occurs_free(function, param) || kept.iter().any(|arg| occurs_free(arg, param)))
    {
        return None;
    }

    if kept.is_empty() {
        return Some(function.as_ref().clone());
    }

    Some(Node::new(Expr::Call {
        function: function.clone(),
        args: kept.to_vec(),
        pipelined: *pipelined,
    }))
}

fn occurs_free(node: &Node, name: &str) -> bool {
    match &node.expr {
        Expr::Symbol(symbol) => symbol == name,
        Expr::Literal(_) => false,
        Expr::Call { function, args, .. } => {
            occurs_free(function, name) || args.iter().any(|arg| occurs_free(arg, name))
        }
        Expr::Lambda { params, body } => {
            !params.iter().any(|param| param == name) && occurs_free(body, name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use rstest::rstest;

    fn arity(name: &str) -> Option<usize> {
        match name {
            "add" | "get" | "map" | "filter" => Some(2),
            "area" | "count" | "find" => Some(1),
            "all-areas" | "collection" => Some(0),
            _ => None,
        }
    }

    fn simplified(code: &str) -> Node {
        simplify(&parse(code).unwrap(), &arity)
    }

    #[rstest]
    #[case::implicit_lambda("map {f -> get \"name\" f}", "map (get \"name\")")]
    #[case::bare_function("map {f -> area f}", "map area")]
    #[case::zero_arg_call_of_function("(area)", "area")]
    #[case::zero_arg_call_inside_pipeline("(all-areas) | map (area)", "(all-areas) | map area")]
    #[case::zero_arity_function_is_called("(all-areas)", "(all-areas)")]
    #[case::variadic_with_no_required_args("{}", "{}")]
    #[case::unknown_function("(something)", "(something)")]
    #[case::two_params("{a, b -> add a b}", "add")]
    #[case::pipelined_body("{x -> x | area}", "area")]
    #[case::nested_lambdas("{a -> {b -> add a b}}", "add")]
    #[case::param_in_kept_args("{a -> add a a}", "{a -> add a a}")]
    #[case::param_is_function("{a -> a a}", "{a -> a a}")]
    #[case::swapped_params("{a, b -> add b a}", "{a, b -> add b a}")]
    #[case::not_a_call("{a -> a}", "{a -> a}")]
    #[case::literal_last_arg("{f -> f 1}", "{f -> f 1}")]
    #[case::bound_zero_arg_call("{area -> (area)}", "{area -> (area)}")]
    #[case::param_free_in_nested_lambda("{a -> map {b -> add a b} a}", "{a -> map (add a) a}")]
    #[case::shadowed_param_is_not_free("{a -> map {a -> add a a} a}", "map {a -> add a a}")]
    fn test_simplify(#[case] code: &str, #[case] expected: &str) {
        assert_eq!(simplified(code), parse(expected).unwrap());
    }

    #[rstest]
    #[case("map {f -> get \"name\" f}")]
    #[case("{a -> {b -> add a b}}")]
    #[case("(all-areas) | filter {x -> (area)}")]
    #[case("{a -> map {a -> add a a} a}")]
    fn test_simplify_is_idempotent(#[case] code: &str) {
        let once = simplified(code);
        assert_eq!(simplify(&once, &arity), once);
    }
}
