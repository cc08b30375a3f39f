use std::env::args;
use std::path::{Path, PathBuf};

use pegc::ctx::ErrorAccumulator;
use pegc::grammar::Grammar;
use pegc::line_col;
use pegc::parse::parse_grammar;
use pegc_gen::compile::{compile, CompiledGrammar};
use pegc_gen::program::display_program;

trait IoError<T> {
    fn pretty_error(self, path: &Path, message: &str) -> Result<T, ()>;
}

impl<T> IoError<T> for std::io::Result<T> {
    fn pretty_error(self, path: &Path, message: &str) -> Result<T, ()> {
        self.map_err(|e| {
            let path = path.display();
            eprintln!("{message} `{path}`\n  {e}");
        })
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(()) => 2,
    };
    std::process::exit(code);
}

struct StdoutSink;

impl std::fmt::Write for StdoutSink {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        use std::io::Write as _;
        std::io::stdout()
            .write_all(s.as_bytes())
            .map_err(|_| std::fmt::Error)
    }
}

fn print_usage() {
    eprintln!("usage: pegc [--rule NAME] [--rules] [--code] <grammar-file> [input]");
}

fn run() -> Result<i32, ()> {
    let args = args().skip(1).collect::<Vec<_>>();

    let mut do_rules = false;
    let mut do_code = false;
    let mut main_rule: Option<String> = None;

    let mut positional = Vec::new();
    let mut iter = args.iter().map(String::as_str);

    while let Some(arg) = iter.next() {
        match arg {
            "--rules" => do_rules = true,
            "--code" => do_code = true,
            "--rule" => {
                let Some(next) = iter.next() else {
                    eprintln!("--rule expects an argument");
                    return Err(());
                };
                main_rule = Some(next.to_owned());
            }
            "--help" => {
                print_usage();
                return Ok(0);
            }
            _ => positional.push(arg),
        }
    }

    if positional.is_empty() || positional.len() > 2 {
        print_usage();
        return Err(());
    }

    let path: PathBuf = positional[0].into();
    let src = std::fs::read_to_string(&path).pretty_error(&path, "Failed to read")?;

    let err = ErrorAccumulator::new();
    let grammar = parse_grammar(&src, &err);
    let compiled = compile(&grammar, &err);

    if !err.is_empty() {
        let file = path.display();
        for e in err.get().iter() {
            let (line, col) = line_col(&src, e.span.start);
            eprintln!("{file}:{line}:{col} {}", e.err);
        }
        return Ok(2);
    }

    if do_rules {
        let mut sink = StdoutSink;
        grammar.display_into(&mut sink);
    }

    if do_code {
        for (handle, program) in compiled.programs.iter() {
            let mut sink = StdoutSink;
            display_program(&mut sink, &grammar.rule_name(handle), program, &grammar);
            println!();
        }
    }

    let Some(input) = positional.get(1) else {
        if !(do_rules || do_code) {
            print_usage();
            return Err(());
        }
        return Ok(0);
    };

    let main = match resolve_main(&grammar, main_rule.as_deref()) {
        Ok(main) => main,
        Err(message) => {
            eprintln!("{message}");
            return Err(());
        }
    };

    run_parse(&compiled, main, input)
}

fn resolve_main(
    grammar: &Grammar,
    requested: Option<&str>,
) -> Result<pegc::grammar::RuleHandle, String> {
    match requested {
        Some(name) => grammar
            .lookup(name)
            .ok_or_else(|| format!("no rule named `{name}`")),
        None => grammar
            .first_rule()
            .ok_or_else(|| "the grammar defines no rules".to_owned()),
    }
}

fn run_parse(
    compiled: &CompiledGrammar,
    main: pegc::grammar::RuleHandle,
    input: &str,
) -> Result<i32, ()> {
    match compiled.parse(main, input.as_bytes()) {
        Ok(tree) => {
            println!("{tree}");
            Ok(0)
        }
        Err(e) => {
            println!("null");
            eprintln!("{e}");
            Ok(1)
        }
    }
}
