//! Interactive read-eval-print loop
//!
//! Line editing and history via rustyline; history persists under the
//! user's home directory. Incomplete input (an open list or string)
//! continues on the next line instead of erroring.
//!
//! Commands:
//!   :quit, :q     exit
//!   :dis <expr>   disassemble instead of running

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use arcueid_compiler::{compile_expr, eval_source, EvalError, ReadError, Reader};
use arcueid_core::code::disassemble;
use arcueid_core::pprint::write_value;
use arcueid_core::Interp;

const PROMPT: &str = "arc> ";
const CONT_PROMPT: &str = "...> ";

pub fn run(c: &mut Interp) -> Result<(), ReadlineError> {
    let mut rl = DefaultEditor::new()?;
    let history = home::home_dir().map(|d| d.join(".arcueid_history"));
    if let Some(path) = &history {
        let _ = rl.load_history(path);
    }

    let mut pending = String::new();
    loop {
        let prompt = if pending.is_empty() { PROMPT } else { CONT_PROMPT };
        match rl.readline(prompt) {
            Ok(line) => {
                if pending.is_empty() {
                    let trimmed = line.trim();
                    if trimmed == ":quit" || trimmed == ":q" {
                        break;
                    }
                    if let Some(rest) = trimmed.strip_prefix(":dis ") {
                        let _ = rl.add_history_entry(trimmed);
                        disassemble_line(c, rest);
                        continue;
                    }
                }
                pending.push_str(&line);
                pending.push('\n');
                match eval_source(c, &pending) {
                    Ok(v) => {
                        let _ = rl.add_history_entry(pending.trim());
                        pending.clear();
                        println!("{}", write_value(c, v, true));
                    }
                    Err(EvalError::Read(ReadError::UnexpectedEof { .. })) => {
                        // keep accumulating lines
                    }
                    Err(e) => {
                        let _ = rl.add_history_entry(pending.trim());
                        pending.clear();
                        eprintln!("Error: {}", e);
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                pending.clear();
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e),
        }
    }

    if let Some(path) = &history {
        let _ = rl.save_history(path);
    }
    Ok(())
}

fn disassemble_line(c: &mut Interp, src: &str) {
    let mut reader = Reader::new(src);
    match reader.read_expr(c) {
        Ok(Some((expr, _))) => match compile_expr(c, expr, None) {
            Ok(code) => print!("{}", disassemble(code)),
            Err(e) => eprintln!("Error: {}", e),
        },
        Ok(None) => {}
        Err(e) => eprintln!("Error: {}", e),
    }
}
