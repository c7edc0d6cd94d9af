use std::fmt::Write;

use itertools::Itertools;

use crate::{
    geo::{LatLng, quote},
    number::format_float,
};

use super::{
    node::{Expr, Literal, Node},
    parser::{COLLECTION, PAIR},
};

impl Node {
    /// Renders the node back to expression text.
    ///
    /// Parsing the output yields an equal node. Text the parser accepted in
    /// canonical spacing renders back unchanged, for example
    /// `find-feature /a/427900370 | area`. Collections built from `pair`
    /// calls are re-sugared into `{...}`.
    pub fn to_code(&self) -> String {
        let mut output = String::new();
        self.format_to_code(&mut output, false);
        output
    }

    /// `nested` is set in argument position, where a call needs parentheses.
    fn format_to_code(&self, buf: &mut String, nested: bool) {
        match &self.expr {
            Expr::Symbol(name) => buf.push_str(name),
            Expr::Literal(literal) => format_literal(literal, buf),
            Expr::Lambda { params, body } => {
                buf.push('{');
                if params.is_empty() {
                    buf.push_str("-> ");
                } else {
                    write!(buf, "{} -> ", params.iter().join(", ")).unwrap();
                }
                body.format_to_code(buf, false);
                buf.push('}');
            }
            Expr::Call { function, args, .. } if is_collection(function, args) => {
                format_collection(args, buf);
            }
            Expr::Call { function, args, .. } if args.is_empty() => {
                buf.push('(');
                if reads_as_callee(function) {
                    function.format_to_code(buf, true);
                } else {
                    buf.push('(');
                    function.format_to_code(buf, false);
                    buf.push(')');
                }
                buf.push(')');
            }
            Expr::Call {
                function,
                args,
                pipelined,
            } => {
                if nested {
                    buf.push('(');
                }

                let rest = if *pipelined {
                    args[0].format_to_code(buf, false);
                    buf.push_str(" | ");
                    &args[1..]
                } else {
                    &args[..]
                };

                function.format_to_code(buf, true);
                for arg in rest {
                    buf.push(' ');
                    arg.format_to_code(buf, true);
                }

                if nested {
                    buf.push(')');
                }
            }
        }
    }
}

/// Whether `function` renders as a symbol, a lambda or a parenthesised
/// call, the forms the parser reads as the callee of `(f)`.
fn reads_as_callee(function: &Node) -> bool {
    match &function.expr {
        Expr::Symbol(_) | Expr::Lambda { .. } => true,
        Expr::Call { function, args, .. } => !is_collection(function, args),
        Expr::Literal(_) => false,
    }
}

fn is_collection(function: &Node, args: &[Node]) -> bool {
    function.as_symbol().is_some_and(|name| name == COLLECTION)
        && args.iter().all(|arg| pair_parts(arg).is_some())
}

fn pair_parts(node: &Node) -> Option<(&Node, &Node)> {
    match &node.expr {
        Expr::Call {
            function,
            args,
            pipelined: false,
        } if function.as_symbol().is_some_and(|name| name == PAIR) => match args.as_slice() {
            [key, value] => Some((key, value)),
            _ => None,
        },
        _ => None,
    }
}

fn format_collection(pairs: &[Node], buf: &mut String) {
    let parts = pairs.iter().filter_map(pair_parts).collect::<Vec<_>>();
    let positional = parts
        .iter()
        .enumerate()
        .all(|(i, (key, _))| key.expr == Expr::Literal(Literal::Int(i as i64)));

    buf.push('{');
    for (i, (key, value)) in parts.into_iter().enumerate() {
        if i > 0 {
            buf.push_str(", ");
        }
        if !positional {
            key.format_to_code(buf, false);
            buf.push_str(": ");
        }
        value.format_to_code(buf, false);
    }
    buf.push('}');
}

fn format_literal(literal: &Literal, buf: &mut String) {
    match literal {
        Literal::Bool(b) => write!(buf, "{}", b).unwrap(),
        Literal::Int(n) => write!(buf, "{}", n).unwrap(),
        Literal::Float(n) => buf.push_str(&format_float(*n)),
        Literal::String(s) => buf.push_str(&quote(s)),
        Literal::FeatureId(id) => write!(buf, "{}", id).unwrap(),
        Literal::Point(ll) => write!(buf, "{}", ll).unwrap(),
        Literal::Path(points) => {
            buf.push('(');
            format_path(points, buf);
            buf.push(')');
        }
        Literal::Area(rings) => {
            buf.push_str("(polygon");
            for ring in rings {
                buf.push_str(" (");
                format_path(ring, buf);
                buf.push(')');
            }
            buf.push(')');
        }
        Literal::Tag(tag) => write!(buf, "{}", tag).unwrap(),
        Literal::Query(query) => write!(buf, "{}", query).unwrap(),
        Literal::Collection(entries) => {
            buf.push('{');
            for (i, (key, value)) in entries.iter().enumerate() {
                if i > 0 {
                    buf.push_str(", ");
                }
                format_literal(key, buf);
                buf.push_str(": ");
                format_literal(value, buf);
            }
            buf.push('}');
        }
    }
}

fn format_path(points: &[LatLng], buf: &mut String) {
    buf.push_str("path");
    for point in points {
        write!(buf, " {}", point).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        geo::{Query, Tag},
        parse,
    };
    use rstest::rstest;

    #[rstest]
    #[case::pipeline("find-feature /a/427900370 | area")]
    #[case::nested_call("add (add 1 2) 3")]
    #[case::zero_arg_call("(all-areas) | count")]
    #[case::lambda("map {a -> add a 1}")]
    #[case::lambda_without_params("call {-> 42}")]
    #[case::multi_param_lambda("{a, b -> add a b}")]
    #[case::collection("{10, 20}")]
    #[case::keyed_collection("{\"a\": 1, \"b\": add 1 1}")]
    #[case::empty_collection("{}")]
    #[case::query("find [#building=yes & #levels | @name]")]
    #[case::grouped_query("[(#a | #b) & #c]")]
    #[case::tag("get #building")]
    #[case::lat_lng("51.5,-0.1")]
    #[case::strings("\"a \\\"quoted\\\" word\"")]
    #[case::float("divide 1.0 2.5")]
    #[case::piped_lambda("1 | {x -> x}")]
    #[case::pipeline_with_args("1 | add 2 | multiply 3")]
    fn test_canonical_text_round_trips(#[case] code: &str) {
        let node = parse(code).unwrap();
        assert_eq!(node.to_code(), code);
    }

    #[rstest]
    #[case::lambda(Node::lambda(Vec::<&str>::new(), Node::literal(Literal::Int(42))), "({-> 42})")]
    #[case::call(Node::call(Node::symbol("add"), vec![Node::literal(Literal::Int(1))]), "((add 1))")]
    #[case::zero_arg_call(Node::call(Node::symbol("all-areas"), vec![]), "((all-areas))")]
    #[case::literal(Node::literal(Literal::Int(1)), "((1))")]
    #[case::collection(
        Node::call(Node::symbol("collection"), vec![]),
        "(({}))"
    )]
    fn test_zero_arg_call_of_expression(#[case] function: Node, #[case] expected: &str) {
        let node = Node::call(function, vec![]);
        assert_eq!(node.to_code(), expected);
        assert_eq!(parse(expected).unwrap(), node);
    }

    #[test]
    fn test_pipeline_inside_argument_is_parenthesised() {
        let node = Node::call(
            Node::symbol("count"),
            vec![Node::pipelined_call(Node::symbol("area"), vec![Node::symbol("x")])],
        );
        assert_eq!(node.to_code(), "count (x | area)");
        assert_eq!(parse(&node.to_code()).unwrap(), node);
    }

    #[rstest]
    #[case(Literal::Path(vec![LatLng::new(1.0, 2.0), LatLng::new(3.0, 4.5)]), "(path 1.0,2.0 3.0,4.5)")]
    #[case(Literal::Area(vec![vec![LatLng::new(0.0, 0.0)]]), "(polygon (path 0.0,0.0))")]
    #[case(
        Literal::Collection(vec![(Literal::String("k".to_string()), Literal::Tag(Tag::new("#a", "b")))]),
        "{\"k\": #a=b}"
    )]
    #[case(Literal::Query(Query::All), "[]")]
    #[case(Literal::Float(1e20), "1e20")]
    #[case(Literal::Float(f64::NEG_INFINITY), "-inf")]
    #[case(Literal::Point(LatLng::new(f64::INFINITY, 0.5)), "inf,0.5")]
    fn test_literal_code(#[case] literal: Literal, #[case] expected: &str) {
        assert_eq!(Node::literal(literal).to_code(), expected);
    }

    #[rstest]
    #[case::large_float(Literal::Float(1e20))]
    #[case::tiny_float(Literal::Float(-2.5e-300))]
    #[case::infinity(Literal::Float(f64::INFINITY))]
    #[case::extreme_point(Literal::Point(LatLng::new(1e17, f64::NEG_INFINITY)))]
    #[case::nested_all(Literal::Query(Query::Union(vec![Query::Keyed("#a".into()), Query::All])))]
    #[case::nested_groups(Literal::Query(Query::Intersection(vec![
        Query::Intersection(vec![Query::Keyed("#a".into()), Query::Keyed("#b".into())]),
        Query::Union(vec![Query::Tagged(Tag::new("#c", "")), Query::Union(vec![])]),
    ])))]
    fn test_literal_reparses(#[case] literal: Literal) {
        let node = Node::literal(literal);
        assert_eq!(parse(&node.to_code()).unwrap(), node);
    }

    #[test]
    fn test_nan_reparses_as_nan() {
        let node = Node::literal(Literal::Float(f64::NAN));
        assert!(matches!(
            parse(&node.to_code()).unwrap().expr,
            Expr::Literal(Literal::Float(n)) if n.is_nan()
        ));
    }
}
