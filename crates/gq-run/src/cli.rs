use clap::{CommandFactory, Parser, Subcommand};
use gq_lang::{Engine, MemoryWorld, SharedWorld};
use itertools::Itertools;
use miette::{Context, IntoDiagnostic, miette};
use std::io::{self, BufWriter, Write};
use std::time::Duration;
use std::{fs, path::PathBuf};

#[derive(Parser, Debug)]
#[command(name = "gq")]
#[command(version)]
#[command(after_help = "Examples:\n\n\
    To count the buildings in the bundled world:\n\
    $ gq 'find [#building] | count'\n\n\
    To evaluate against a world loaded from JSON:\n\
    $ gq --world city.json 'find [#leisure=park] | map area'\n\n\
    To tag features and write the world back:\n\
    $ gq --world city.json --apply 'find [#building] | map {b -> add-tag b (tag \"#roof\" \"flat\")}'")]
#[command(
    about = "gq evaluates pipeline expressions over a world of geographic features.",
    long_about = None
)]
pub struct Cli {
    #[clap(flatten)]
    input: InputArgs,

    #[clap(flatten)]
    engine: EngineArgs,

    #[clap(flatten)]
    output: OutputArgs,

    #[clap(subcommand)]
    commands: Option<Commands>,

    expression: Option<String>,
}

#[derive(Clone, Debug, clap::Args, Default)]
struct InputArgs {
    /// Load the expression from the file
    #[arg(short, long)]
    from_file: Option<PathBuf>,

    /// Load the world from a JSON file instead of the bundled fixture
    #[arg(short, long, value_name = "FILE")]
    world: Option<PathBuf>,
}

#[derive(Clone, Debug, clap::Args, Default)]
struct EngineArgs {
    /// Compile the expression exactly as parsed
    #[arg(long)]
    no_simplify: bool,

    /// Abort evaluation after this many milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Number of workers `map-parallel` splits its input across
    #[arg(long)]
    parallelism: Option<usize>,

    /// Maximum depth of nested lambda calls
    #[arg(long)]
    max_call_depth: Option<usize>,
}

#[derive(Clone, Debug, clap::Args, Default)]
struct OutputArgs {
    /// Print the expression tree as JSON instead of evaluating
    #[arg(long, group = "mode")]
    ast: bool,

    /// Print the expression in canonical form instead of evaluating
    #[arg(long, group = "mode")]
    unparse: bool,

    /// Apply the change the expression produces to the world
    #[arg(short, long, group = "mode")]
    apply: bool,

    /// Write the world after applying a change to the specified file
    #[arg(short = 'o', long = "output", value_name = "FILE", requires = "apply")]
    output_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the host functions available to expressions
    Functions,
}

impl Cli {
    pub fn run(&self) -> miette::Result<()> {
        if self.commands.is_none() && self.expression.is_none() && self.input.from_file.is_none() {
            return Cli::command().print_help().into_diagnostic();
        }

        let engine = self.create_engine()?;

        match &self.commands {
            Some(Commands::Functions) => self.print_functions(&engine),
            None => {
                let expression = self.get_expression()?;

                if self.output.ast || self.output.unparse {
                    let node = engine.parse(&expression)?;
                    let node = if self.engine.no_simplify {
                        node
                    } else {
                        engine.simplify(&node)
                    };

                    let text = if self.output.ast {
                        node.to_json_pretty().into_diagnostic()?
                    } else {
                        node.to_code()
                    };
                    return self.print(&text);
                }

                let world = self.load_world()?;
                if self.output.apply {
                    self.apply(&engine, &expression, world)
                } else {
                    let value = engine.evaluate(&expression, &world)?;
                    self.print(&value.to_string())
                }
            }
        }
    }

    fn create_engine(&self) -> miette::Result<Engine> {
        let mut engine = Engine::standard()?;
        engine.set_simplify(!self.engine.no_simplify);
        engine.set_timeout(self.engine.timeout_ms.map(Duration::from_millis));

        if let Some(parallelism) = self.engine.parallelism {
            engine.set_parallelism(parallelism);
        }

        if let Some(depth) = self.engine.max_call_depth {
            engine.set_max_call_depth(depth);
        }

        tracing::debug!(options = ?engine.options(), "created engine");
        Ok(engine)
    }

    fn get_expression(&self) -> miette::Result<String> {
        match &self.input.from_file {
            Some(file) => fs::read_to_string(file)
                .into_diagnostic()
                .wrap_err_with(|| format!("Failed to read {}", file.display()))
                .map(|expression| expression.trim().to_string()),
            None => Ok(self.expression.clone().unwrap_or_default()),
        }
    }

    fn load_world(&self) -> miette::Result<MemoryWorld> {
        let Some(path) = &self.input.world else {
            return Ok(MemoryWorld::fixture());
        };

        let json = fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
        let world = MemoryWorld::from_json(&json)
            .into_diagnostic()
            .wrap_err_with(|| format!("Invalid world in {}", path.display()))?;
        tracing::debug!(features = world.len(), path = %path.display(), "loaded world");
        Ok(world)
    }

    fn apply(&self, engine: &Engine, expression: &str, world: MemoryWorld) -> miette::Result<()> {
        let world = SharedWorld::new(world);
        let applied = engine.evaluate_and_apply(expression, &world)?;

        if applied.modified.is_empty() {
            return Err(miette!("`{}` did not produce a change", applied.value));
        }

        self.print(&applied.modified.iter().join("\n"))?;

        let Some(path) = self.output.output_file.as_ref().or(self.input.world.as_ref()) else {
            return Ok(());
        };

        let json = serde_json::to_string_pretty(&world.into_inner()).into_diagnostic()?;
        fs::write(path, json)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote world");
        Ok(())
    }

    fn print_functions(&self, engine: &Engine) -> miette::Result<()> {
        let registry = engine.registry();
        let text = registry
            .names()
            .into_iter()
            .filter_map(|name| registry.get(name))
            .map(|function| {
                format!(
                    "{}({}) -> {}",
                    function.name,
                    function.arg_kinds().iter().join(", "),
                    function.result
                )
            })
            .join("\n");
        self.print(&text)
    }

    fn print(&self, text: &str) -> miette::Result<()> {
        let stdout = io::stdout();
        let mut handle = BufWriter::new(stdout.lock());
        writeln!(handle, "{}", text).into_diagnostic()?;
        handle.flush().into_diagnostic()
    }
}
