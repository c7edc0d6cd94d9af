use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::{
    geo::{FeatureId, LatLng, Query, Tag},
    range::Range,
};

pub type Params = SmallVec<[SmolStr; 4]>;
pub type Args = Vec<Node>;

/// An expression together with the source range it was parsed from.
///
/// Nodes built by hand or by a rewrite may have no range. Equality compares
/// the expression only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    pub expr: Expr,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Expr {
    Symbol(SmolStr),
    Literal(Literal),
    Call {
        function: Box<Node>,
        args: Args,
        #[serde(default)]
        pipelined: bool,
    },
    Lambda {
        params: Params,
        body: Box<Node>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    FeatureId(FeatureId),
    Point(LatLng),
    Path(Vec<LatLng>),
    Area(Vec<Vec<LatLng>>),
    Tag(Tag),
    Query(Query),
    Collection(Vec<(Literal, Literal)>),
}

impl Node {
    pub fn new(expr: Expr) -> Self {
        Node { range: None, expr }
    }

    pub fn with_range(mut self, range: Option<Range>) -> Self {
        self.range = range;
        self
    }

    pub fn symbol(name: impl Into<SmolStr>) -> Self {
        Node::new(Expr::Symbol(name.into()))
    }

    pub fn literal(literal: Literal) -> Self {
        Node::new(Expr::Literal(literal))
    }

    pub fn call(function: Node, args: Args) -> Self {
        Node::new(Expr::Call {
            function: Box::new(function),
            args,
            pipelined: false,
        })
    }

    /// A call written `args[0] | function args[1..]`.
    pub fn pipelined_call(function: Node, args: Args) -> Self {
        Node::new(Expr::Call {
            function: Box::new(function),
            args,
            pipelined: true,
        })
    }

    pub fn lambda<S: Into<SmolStr>>(params: impl IntoIterator<Item = S>, body: Node) -> Self {
        Node::new(Expr::Lambda {
            params: params.into_iter().map(Into::into).collect(),
            body: Box::new(body),
        })
    }

    /// A copy of the tree with every source range removed.
    pub fn without_ranges(&self) -> Node {
        let expr = match &self.expr {
            Expr::Call {
                function,
                args,
                pipelined,
            } => Expr::Call {
                function: Box::new(function.without_ranges()),
                args: args.iter().map(Node::without_ranges).collect(),
                pipelined: *pipelined,
            },
            Expr::Lambda { params, body } => Expr::Lambda {
                params: params.clone(),
                body: Box::new(body.without_ranges()),
            },
            expr => expr.clone(),
        };
        Node::new(expr)
    }

    pub fn as_symbol(&self) -> Option<&SmolStr> {
        match &self.expr {
            Expr::Symbol(name) => Some(name),
            _ => None,
        }
    }

    /// Serializes the node as the opaque JSON form callers may store or send.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Node, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_code())
    }
}

impl From<Literal> for Node {
    fn from(literal: Literal) -> Self {
        Node::literal(literal)
    }
}

impl From<i64> for Literal {
    fn from(n: i64) -> Self {
        Literal::Int(n)
    }
}

impl From<f64> for Literal {
    fn from(n: f64) -> Self {
        Literal::Float(n)
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Bool(b)
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::String(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_equality_ignores_range() {
        let with_range = Node::symbol("area").with_range(Some(Range::new(0, 4)));
        assert_eq!(with_range, Node::symbol("area"));
    }

    #[test]
    fn test_clone_is_independent() {
        let original = Node::call(Node::symbol("add"), vec![Literal::Int(1).into()]);
        let mut copy = original.clone();
        if let Expr::Call { args, .. } = &mut copy.expr {
            args.push(Literal::Int(2).into());
        }
        assert_ne!(original, copy);
    }

    #[rstest]
    #[case::symbol(Node::symbol("area"))]
    #[case::call(Node::pipelined_call(
        Node::symbol("area"),
        vec![Node::call(
            Node::symbol("find-feature"),
            vec![Literal::FeatureId(FeatureId::area("openstreetmap.org/way", 427900370)).into()],
        )],
    ))]
    #[case::lambda(Node::lambda(["f"], Node::call(Node::symbol("get"), vec![Literal::from("name").into(), Node::symbol("f")])))]
    #[case::collection_literal(Node::literal(Literal::Collection(vec![(Literal::Int(0), Literal::Float(1.5))])))]
    #[case::query(Node::literal(Literal::Query(Query::Union(vec![Query::Keyed("#a".into()), Query::All]))))]
    fn test_json_round_trip(#[case] node: Node) {
        let json = node.to_json().unwrap();
        assert_eq!(Node::from_json(&json).unwrap(), node);
    }

    #[test]
    fn test_json_shape() {
        let node = Node::symbol("area").with_range(Some(Range::new(0, 4)));
        let json: serde_json::Value = serde_json::from_str(&node.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "range": {"start": 0, "end": 4},
                "expr": {"kind": "symbol", "value": "area"}
            })
        );
    }
}
