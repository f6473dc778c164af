mod loader;

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use alien::{ArgSpec, CallDescriptor, Status, TypeTag, Value, host};
use clap::{ArgAction, Parser, Subcommand};
use log::info;

use crate::loader::Library;

#[derive(Parser)]
#[command(name = "alien", version, about = host::DESCRIPTION)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG
    /// overrides this.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Call a native function and print what it returns.
    Call {
        /// Shared library to look SYMBOL up in. Defaults to the running
        /// program and everything it links.
        #[arg(short, long)]
        library: Option<PathBuf>,

        /// Call as a variadic function with N fixed arguments.
        #[arg(long, value_name = "N")]
        variadic: Option<usize>,

        symbol: String,

        /// Return type name.
        rtype: String,

        /// Arguments as TYPE=VALUE, e.g. `int32=-7`, `pointer=hello`,
        /// `pointer=null`.
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// List type names and status codes.
    Types,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level),
    )
    .init();

    let result = match cli.command {
        Command::Call {
            library,
            variadic,
            symbol,
            rtype,
            args,
        } => call(library, variadic, &symbol, &rtype, &args),
        Command::Types => {
            types();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("alien: {err}");
            ExitCode::FAILURE
        }
    }
}

fn call(
    library: Option<PathBuf>,
    variadic: Option<usize>,
    symbol: &str,
    rtype: &str,
    args: &[String],
) -> Result<(), Box<dyn Error>> {
    let (names, values): (Vec<&str>, Vec<Value>) = args
        .iter()
        .map(|arg| parse_arg(arg))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .unzip();

    let lib = Library::open(library.as_deref())?;
    let target = lib.symbol(symbol)?;
    info!("resolved {symbol} at {:p}", target.code_ptr().as_ptr());

    let descriptor = match variadic {
        Some(fixed) => CallDescriptor::build_variadic(
            target.code_ptr(),
            fixed,
            rtype,
            &names,
        )?,
        None => CallDescriptor::build_fixed(target.code_ptr(), rtype, &names)?,
    };
    if descriptor.status() != Status::Ok {
        return Err(format!(
            "cannot prepare call to {symbol}: {}",
            descriptor.status()
        )
        .into());
    }

    // SAFETY: whoever typed the command line vouches for the signature.
    if let Some(value) = unsafe { descriptor.invoke(&values) }? {
        println!("{value}");
    }
    Ok(())
}

fn types() {
    println!("{} - {}", host::VERSION, host::DESCRIPTION);
    println!();
    for tag in TypeTag::ALL {
        println!("  {tag}");
    }
    println!();
    for (name, value) in host::constants() {
        println!("  {name:<12} {value}");
    }
}

/// Split `TYPE=VALUE` and parse VALUE for that type.
fn parse_arg(text: &str) -> Result<(&str, Value), String> {
    let (name, raw) = text
        .split_once('=')
        .ok_or_else(|| format!("expected TYPE=VALUE, got '{text}'"))?;
    let spec = ArgSpec::parse(name).map_err(|err| err.to_string())?;
    let value = parse_value(spec.tag(), raw)
        .ok_or_else(|| format!("'{raw}' is not a valid {}", spec.tag()))?;
    Ok((name, value))
}

fn parse_value(tag: TypeTag, raw: &str) -> Option<Value> {
    match tag {
        TypeTag::Pointer if raw == "null" => Some(Value::Nil),
        TypeTag::Pointer => Some(Value::string(raw)),
        TypeTag::Void => Some(Value::Nil),
        t if t.is_integer() => parse_integer(raw).map(Value::Integer),
        _ => raw.parse().ok().map(Value::Number),
    }
}

/// Decimal or `0x` hex, optionally negative. Values above `i64::MAX` wrap,
/// which is what an unsigned 64-bit argument wants.
fn parse_integer(raw: &str) -> Option<i64> {
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let magnitude: u64 = match digits.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };
    let n = magnitude as i64;
    Some(if negative { n.wrapping_neg() } else { n })
}
