use std::{
    env, fs,
    process::ExitCode,
    str::FromStr,
    time::{Duration, Instant},
};

use byterun::{Exception, LimitedTracker, ProfilingTracer, ResourceLimits, Runner, StderrTracer, StdPrint, Value};

const USAGE: &str = "usage: byterun <code.json> [--dis] [--trace] [--profile] [--max-ops N] [--max-depth N] [--max-result-bytes N] [--timeout-ms N]";

/// Parsed command line.
#[derive(Debug, Default)]
struct Options {
    file_path: String,
    disassemble: bool,
    trace: bool,
    profile: bool,
    limits: ResourceLimits,
}

fn main() -> ExitCode {
    let options = match parse_args(env::args().skip(1)) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("error: {err}\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    let json = match read_file(&options.file_path) {
        Ok(json) => json,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let runner = match Runner::from_json(&json) {
        Ok(runner) => runner,
        Err(err) => {
            eprintln!("error: {} is not a valid code object: {err}", options.file_path);
            return ExitCode::FAILURE;
        }
    };

    if options.disassemble {
        print!("{}", runner.code().disassemble());
        println!();
    }

    let tracker = LimitedTracker::new(options.limits);
    let start = Instant::now();
    let result = if options.profile {
        let (result, tracer) = runner.run_traced(vec![], tracker, &mut StdPrint, ProfilingTracer::new());
        eprintln!("{}", tracer.report());
        result
    } else if options.trace {
        runner
            .run_traced(vec![], tracker, &mut StdPrint, StderrTracer::new())
            .0
    } else {
        runner.run(vec![], tracker, &mut StdPrint)
    };
    report(result, start.elapsed())
}

fn report(result: Result<Value, Exception>, elapsed: Duration) -> ExitCode {
    match result {
        Ok(value) => {
            eprintln!("success after: {elapsed:?}");
            println!("{}", value.py_repr());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error after: {elapsed:?}\n{err}");
            ExitCode::FAILURE
        }
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options::default();
    let mut file_path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dis" => options.disassemble = true,
            "--trace" => options.trace = true,
            "--profile" => options.profile = true,
            "--max-ops" => {
                options.limits = options.limits.max_operations(number_arg(&arg, args.next())?);
            }
            "--max-depth" => {
                options.limits = options.limits.max_recursion_depth(Some(number_arg(&arg, args.next())?));
            }
            "--max-result-bytes" => {
                options.limits = options.limits.max_result_bytes(number_arg(&arg, args.next())?);
            }
            "--timeout-ms" => {
                let millis = number_arg(&arg, args.next())?;
                options.limits = options.limits.max_duration(Duration::from_millis(millis));
            }
            flag if flag.starts_with("--") => return Err(format!("unknown option {flag}")),
            _ if file_path.is_some() => return Err(format!("unexpected argument {arg}")),
            _ => file_path = Some(arg),
        }
    }
    options.file_path = file_path.ok_or("missing code file")?;
    Ok(options)
}

fn number_arg<N: FromStr>(flag: &str, value: Option<String>) -> Result<N, String> {
    let value = value.ok_or_else(|| format!("{flag} needs a value"))?;
    value
        .parse()
        .map_err(|_| format!("{flag} expects a non-negative integer, got {value:?}"))
}

fn read_file(file_path: &str) -> Result<String, String> {
    match fs::metadata(file_path) {
        Ok(metadata) => {
            if !metadata.is_file() {
                return Err(format!("{file_path} is not a file"));
            }
        }
        Err(err) => {
            return Err(format!("reading {file_path}: {err}"));
        }
    }
    fs::read_to_string(file_path).map_err(|err| format!("reading {file_path}: {err}"))
}
