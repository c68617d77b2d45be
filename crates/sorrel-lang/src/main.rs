use std::env;
use std::fs;
use std::io;

use sorrel_core::error::{format_error, ERROR_TAG};

use sorrel_lang::{create_runtime, repl, run_at, shebang_offset};

fn help() -> ! {
    println!("Usage: sorrel [--repl] [--version] [-e CODE] [file]");
    println!();
    println!("Options:");
    println!("  --repl       Start the REPL, or enter it after running a script in the same context");
    println!("  -e CODE      Evaluate CODE and exit");
    println!("  --version    Show version");
    println!("  -h, --help   Show this help");
    std::process::exit(0);
}

fn unknown_option(opt: &str) -> ! {
    eprintln!("unknown option: {}", opt);
    help();
}

fn main() {
    let mut args = env::args().skip(1).collect::<Vec<_>>();

    let mut source = None;
    let mut repl_after_run = false;

    loop {
        if args.first().map(|s| s.as_str()) == Some("-e") && args.len() >= 2 && source.is_none() {
            source = Some(args[1].clone());
            args.drain(0..2);
            continue;
        }
        match args.first().map(|s| s.as_str()) {
            Some("--repl") => {
                repl_after_run = true;
                args.remove(0);
            }
            Some("--version") => {
                println!("{}", env!("CARGO_PKG_VERSION"));
                return;
            }
            Some("-h") | Some("--help") => help(),
            Some(s) if s.starts_with('-') => unknown_option(s),
            _ => break,
        }
    }

    let repl_mode = source.is_none() && args.is_empty();

    let mut vm = match create_runtime() {
        Ok(vm) => vm,
        Err(err) => {
            eprintln!("{}", format_error(&err));
            std::process::exit(1);
        }
    };

    if repl_mode {
        repl::interactive_repl(vm);
        return;
    }

    if let Some(code) = source {
        run_and_report(&mut vm, &code, 0);
        if repl_after_run {
            repl::interactive_repl(vm);
        }
        return;
    }

    let file = match args.first() {
        Some(file) => file.clone(),
        None => help(),
    };
    let code = match fs::read_to_string(&file) {
        Ok(code) => code,
        Err(e) => {
            if e.kind() == io::ErrorKind::NotFound {
                eprintln!("{} File not found: {}", ERROR_TAG, file);
            } else {
                eprintln!("{} Failed to read {}: {}", ERROR_TAG, file, e);
            }
            std::process::exit(1);
        }
    };
    run_and_report(&mut vm, &code, shebang_offset(&code));
    if repl_after_run {
        repl::interactive_repl(vm);
    }
}

fn run_and_report(vm: &mut sorrel_core::Vm, source: &str, offset: usize) {
    match run_at(vm, source, offset) {
        Ok(value) => println!("{}", value),
        Err(err) => {
            eprintln!("{}", format_error(&err));
            std::process::exit(1);
        }
    }
}
