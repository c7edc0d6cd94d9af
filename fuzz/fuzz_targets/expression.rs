#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use itertools::Itertools;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum Expr {
    Call(String, Vec<String>),
    Lambda(Vec<String>, String),
    Collection(Vec<(String, String)>),
    Query(Vec<String>),
    Raw(String),
}

impl Expr {
    fn to_code(&self) -> String {
        match self {
            Expr::Call(name, args) => format!("{} {}", name, args.join(" ")),
            Expr::Lambda(params, body) => format!("{{{} -> {}}}", params.join(", "), body),
            Expr::Collection(pairs) => format!(
                "{{{}}}",
                pairs.iter().map(|(k, v)| format!("{}: {}", k, v)).join(", ")
            ),
            Expr::Query(keys) => format!("[{}]", keys.iter().map(|k| format!("#{}", k)).join(" & ")),
            Expr::Raw(code) => code.clone(),
        }
    }
}

#[derive(Debug, Clone, Arbitrary)]
struct Context {
    raw_expression: Option<String>,
    pipeline: Option<Vec<Expr>>,
}

fuzz_target!(|context: Context| {
    let code = match (&context.raw_expression, &context.pipeline) {
        (Some(raw), _) => raw.clone(),
        (_, Some(pipeline)) => pipeline.iter().map(Expr::to_code).join(" | "),
        _ => String::new(),
    };

    let Ok(node) = gq_lang::parse(&code) else {
        return;
    };
    let canonical = node.to_code();
    let reparsed = gq_lang::parse(&canonical).expect("canonical text must parse");
    // Compared as text since `nan` literals never equal themselves.
    assert_eq!(reparsed.to_code(), canonical);

    let Ok(mut engine) = gq_lang::Engine::standard() else {
        return;
    };
    engine.set_timeout(Some(Duration::from_millis(50)));
    engine.set_max_call_depth(64);
    engine.set_parallelism(2);
    let _ = engine.evaluate_node(&node, &gq_lang::MemoryWorld::fixture());
});
