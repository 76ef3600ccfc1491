use codegen::Operation;
use std::path::PathBuf;

pub struct Args {
    pub operation: Operation,
    pub config: Option<PathBuf>,
    pub root: PathBuf,
    pub verbose: bool,
}

pub const USAGE: &str = "usage: shadercompiler -build|-clean|-rebuild|-test [-c <config.kdl>] [-r <root folder>] [-verbose]";

impl Args {
    pub fn parse() -> Result<Args, String> {
        Args::parse_from(std::env::args().skip(1))
    }

    pub fn parse_from(args: impl IntoIterator<Item = String>) -> Result<Args, String> {
        let mut operation = None;
        let mut config = None;
        let mut root = None;
        let mut verbose = false;
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.to_ascii_lowercase().as_str() {
                "-build" => operation = Some(Operation::Build),
                "-clean" => operation = Some(Operation::Clean),
                "-rebuild" => operation = Some(Operation::Rebuild),
                "-test" => operation = Some(Operation::Test),
                "-c" => config = Some(PathBuf::from(value(&mut args, "-c")?)),
                "-r" => root = Some(PathBuf::from(value(&mut args, "-r")?)),
                "-verbose" => verbose = true,
                _ => return Err(format!("unknown argument \"{arg}\"")),
            }
        }
        Ok(Args {
            operation: operation.ok_or("expected an operation")?,
            config,
            root: root.unwrap_or_else(|| PathBuf::from(".")),
            verbose,
        })
    }
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next().ok_or_else(|| format!("{flag} expects a value"))
}

#[cfg(test)]
fn parse(args: &[&str]) -> Result<Args, String> {
    Args::parse_from(args.iter().map(|arg| arg.to_string()))
}

#[test]
fn full_command_line() {
    let args = parse(&["-Rebuild", "-c", "shaders.kdl", "-r", "../engine", "-verbose"]).unwrap();
    assert_eq!(args.operation, Operation::Rebuild);
    assert_eq!(args.config, Some(PathBuf::from("shaders.kdl")));
    assert_eq!(args.root, PathBuf::from("../engine"));
    assert!(args.verbose);
}

#[test]
fn operation_is_required() {
    assert!(parse(&["-c", "shaders.kdl"]).is_err());
    assert!(parse(&["-build", "-c"]).is_err());
    assert!(parse(&["-build", "--fast"]).is_err());
}
