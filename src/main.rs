use std::fs;
use std::io::{self, Read};
use std::process::ExitCode;

use clap::{Parser as ClapParser, Subcommand};
use classad::{ClassAd, EvalState, ExprTree, Value};

#[derive(ClapParser)]
#[command(name = "classad")]
#[command(about = "Parse, evaluate and match ClassAd expressions and records")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate an expression, optionally against a context record
    Eval {
        /// The expression to evaluate
        expr: String,

        /// File holding the context record ("-" for stdin; piped stdin is
        /// used automatically)
        #[arg(short, long)]
        context: Option<String>,

        /// Print the result as JSON instead of ClassAd text
        #[arg(long)]
        json: bool,

        /// Enable legacy evaluation semantics
        #[arg(long)]
        legacy: bool,
    },

    /// Check the syntax of a record or expression and print it back
    Parse {
        /// Input text (reads from stdin if not provided)
        input: Option<String>,

        /// Pretty-print the parsed input
        #[arg(short, long)]
        pretty: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Eval {
            expr,
            context,
            json,
            legacy,
        } => run_eval(&expr, context, json, legacy),
        Commands::Parse { input, pretty } => run_parse(input, pretty),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
    }
}

fn read_stdin() -> Result<String, String> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .map_err(|e| format!("reading stdin: {}", e))?;
    Ok(buffer)
}

fn run_eval(
    expr: &str,
    context: Option<String>,
    json: bool,
    legacy: bool,
) -> Result<(), String> {
    let context_text = match context {
        Some(path) if path == "-" => Some(read_stdin()?),
        Some(path) => Some(fs::read_to_string(&path).map_err(|e| format!("{}: {}", path, e))?),
        None if !atty::is(atty::Stream::Stdin) => {
            let text = read_stdin()?;
            if text.trim().is_empty() {
                None
            } else {
                Some(text)
            }
        }
        None => None,
    };

    let ad = match context_text {
        Some(text) => ClassAd::parse(text.trim()).map_err(|e| e.to_string())?,
        None => ClassAd::new(),
    };
    let tree = classad::parse_expression(expr).map_err(|e| e.to_string())?;

    let mut state = EvalState::new(&ad);
    state.set_legacy_semantics(legacy);
    let value = ad.evaluate_expr_with(&tree, &mut state);

    if json {
        let rendered = serde_json::to_string(&value_to_json(&value))
            .map_err(|e| format!("encoding result: {}", e))?;
        println!("{}", rendered);
    } else {
        println!("{}", classad::unparse_value(&value));
    }
    Ok(())
}

fn run_parse(input: Option<String>, pretty: bool) -> Result<(), String> {
    let text = match input {
        Some(text) => text,
        None => read_stdin()?,
    };
    let text = text.trim();

    // a record first, then a bare expression
    match ClassAd::parse(text) {
        Ok(ad) => {
            if pretty {
                println!("{}", classad::unparse_classad_pretty(&ad));
            } else {
                println!("{}", ad);
            }
            Ok(())
        }
        Err(record_err) => match classad::parse_expression(text) {
            Ok(expr) => {
                if pretty {
                    println!("{}", classad::unparse_pretty(&expr));
                } else {
                    println!("{}", expr);
                }
                Ok(())
            }
            Err(expr_err) => {
                // report whichever parse got further; for non-record input
                // that is the expression error
                if text.starts_with('[') {
                    Err(record_err.to_string())
                } else {
                    Err(expr_err.to_string())
                }
            }
        },
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Undefined => serde_json::Value::Null,
        Value::Error => serde_json::Value::String("error".to_string()),
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::Number((*i).into()),
        Value::Real(r) => match serde_json::Number::from_f64(*r) {
            Some(n) => serde_json::Value::Number(n),
            None => serde_json::Value::Null,
        },
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::AbsoluteTime(t) => {
            serde_json::Value::String(classad::value::format_abs_time(t))
        }
        Value::RelativeTime(r) => {
            serde_json::Value::String(classad::value::format_rel_time(*r))
        }
        Value::List(_) | Value::ClassAd(_) => tree_to_json(&value.to_expr()),
    }
}

fn tree_to_json(expr: &ExprTree) -> serde_json::Value {
    match expr {
        ExprTree::Literal(lit) => value_to_json(&Value::from_literal(lit)),
        ExprTree::List(items) => {
            serde_json::Value::Array(items.iter().map(tree_to_json).collect())
        }
        ExprTree::Record(ad) => serde_json::Value::Object(
            ad.attributes()
                .map(|(name, e)| (name.to_string(), tree_to_json(e)))
                .collect(),
        ),
        other => serde_json::Value::String(classad::unparse(other)),
    }
}
