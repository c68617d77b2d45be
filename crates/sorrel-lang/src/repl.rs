use reedline::{DefaultPrompt, DefaultPromptSegment, Reedline, Signal};

use sorrel_core::error::{format_error, SorrelError};
use sorrel_core::{parser, stream, Value, Vm};

const META_COMMANDS: &[&str] = &[":q", ":quit", ":h", ":help"];

/// Read-eval-print loop over one persistent VM: words defined on one
/// line stay available on the next.
pub fn interactive_repl(mut vm: Vm) {
    let mut editor = Reedline::create();
    let prompt = DefaultPrompt::new(
        DefaultPromptSegment::Basic("sorrel".to_string()),
        DefaultPromptSegment::Empty,
    );

    loop {
        match editor.read_line(&prompt) {
            Ok(Signal::Success(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line.starts_with(':') {
                    match line {
                        ":q" | ":quit" => break,
                        ":h" | ":help" => {
                            println!("meta commands: {}", META_COMMANDS.join(" "));
                            continue;
                        }
                        _ => {}
                    }
                }
                match eval_line(&mut vm, line) {
                    Ok(value) => println!("{}", value),
                    Err(err) => eprintln!("{}", format_error(&err)),
                }
            }
            Ok(Signal::CtrlC) => continue,
            Ok(Signal::CtrlD) => break,
            Err(err) => {
                eprintln!("readline error: {}", err);
                break;
            }
        }
    }
}

fn eval_line(vm: &mut Vm, line: &str) -> Result<Value, SorrelError> {
    let mut code = parser::parse(line)?;
    vm.bind(&mut code);
    let value = vm.eval(&code)?;
    stream::collect_result(vm, value)
}
