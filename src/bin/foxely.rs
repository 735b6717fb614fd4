// Foxely CLI - Command Line Interface
// Usage: foxely [FILE] [OPTIONS]

use clap::Parser;
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use foxely_core::compiler::compile_source;
use foxely_core::config::VmConfig;
use foxely_core::lexer::Scanner;
use foxely_core::parser;
use foxely_core::vm::{InterpretResult, VM};

/// Exit status for a program that failed to compile
const EXIT_COMPILE_ERROR: u8 = 65;
/// Exit status for a runtime error or an abort
const EXIT_RUNTIME_ERROR: u8 = 70;
const EXIT_IO_ERROR: u8 = 74;

/// Foxely - A class-based scripting language
#[derive(Parser)]
#[command(name = "foxely")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A class-based scripting language", long_about = None)]
struct Cli {
    /// Source file to run (.fox)
    file: Option<PathBuf>,

    /// Debug options: tokens, ast, asm, gc, trace (comma-separated)
    #[arg(short = 'd', long = "debug", value_delimiter = ',')]
    debug: Option<Vec<String>>,

    /// Execute inline code
    #[arg(short = 'e', long = "exec")]
    exec: Option<String>,

    /// Check for errors without running
    #[arg(long = "check")]
    check: bool,

    /// VM configuration file (JSON)
    #[arg(long = "config")]
    config: Option<PathBuf>,
}

#[derive(Default, Clone, Copy)]
struct DebugFlags {
    tokens: bool,
    ast: bool,
    asm: bool,
    gc: bool,
    trace: bool,
}

impl DebugFlags {
    fn from_options(opts: &Option<Vec<String>>) -> Self {
        let mut flags = Self::default();
        if let Some(opts) = opts {
            for opt in opts {
                match opt.as_str() {
                    "tokens" => flags.tokens = true,
                    "ast" => flags.ast = true,
                    "asm" => flags.asm = true,
                    "gc" => flags.gc = true,
                    "trace" => flags.trace = true,
                    _ => eprintln!("{} Unknown debug option: {}", "!".yellow(), opt),
                }
            }
        }
        flags
    }

    fn apply(self, mut config: VmConfig) -> VmConfig {
        config.print_bytecode |= self.asm;
        config.log_gc |= self.gc;
        config.trace_execution |= self.trace;
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let debug = DebugFlags::from_options(&cli.debug);

    let base_dir = cli
        .file
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let config = match load_config(cli.config.as_deref(), &base_dir) {
        Ok(config) => debug.apply(config).with_module_path(base_dir),
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return ExitCode::from(EXIT_IO_ERROR);
        }
    };

    let result = if let Some(code) = cli.exec {
        run_source("main", &code, config, debug, cli.check)
    } else if let Some(path) = cli.file {
        match fs::read_to_string(&path) {
            Ok(source) => run_source(&module_name(&path), &source, config, debug, cli.check),
            Err(e) => {
                eprintln!("{} Error reading file '{}': {}", "error:".red().bold(), path.display(), e);
                return ExitCode::from(EXIT_IO_ERROR);
            }
        }
    } else {
        return match repl(config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{}", e);
                ExitCode::FAILURE
            }
        };
    };

    match result {
        InterpretResult::Ok => ExitCode::SUCCESS,
        InterpretResult::CompileError => ExitCode::from(EXIT_COMPILE_ERROR),
        InterpretResult::RuntimeError | InterpretResult::Abort => ExitCode::from(EXIT_RUNTIME_ERROR),
    }
}

fn load_config(explicit: Option<&Path>, base_dir: &Path) -> Result<VmConfig, String> {
    match explicit {
        Some(path) => VmConfig::load(path).map_err(|e| e.to_string()),
        None => VmConfig::discover(base_dir).map_err(|e| e.to_string()),
    }
}

/// Scripts run in a module named after their file stem
fn module_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main".to_string())
}

fn run_source(module: &str, source: &str, config: VmConfig, debug: DebugFlags, check: bool) -> InterpretResult {
    if debug.tokens || debug.ast {
        if let Err(e) = dump_front_end(module, source, debug) {
            eprint!("{}", e.format());
            return InterpretResult::CompileError;
        }
    }

    if check {
        return match compile_source(source, module) {
            Ok(function) => {
                if debug.asm {
                    print!("{}", function.chunk.disassemble(module));
                }
                println!("{} No errors found", "✓".green());
                InterpretResult::Ok
            }
            Err(e) => {
                eprint!("{}", e.format());
                InterpretResult::CompileError
            }
        };
    }

    let mut vm = VM::new(config);
    vm.interpret(module, source)
}

fn dump_front_end(module: &str, source: &str, debug: DebugFlags) -> foxely_core::FoxResult<()> {
    let tokens = Scanner::new(source, module).scan_tokens()?;
    if debug.tokens {
        println!("{}", "-- Tokens --".cyan());
        for token in &tokens {
            println!("  {:?} '{}'", token.kind, token.lexeme);
        }
        println!();
    }

    if debug.ast {
        let program = parser::Parser::new(tokens, module, source).parse()?;
        println!("{}", "-- AST --".cyan());
        println!("{:#?}", program);
        println!();
    }
    Ok(())
}

fn repl(config: VmConfig) -> Result<(), String> {
    use reedline::{FileBackedHistory, Reedline, Signal};
    use std::io::Write;

    println!();
    println!(
        "  {}  {}",
        "Foxely".cyan().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    );
    println!("  {}", "Type .help for commands, .exit to quit".bright_black());
    println!();

    let history_path = dirs_home().join(".foxely_history");
    let history = Box::new(FileBackedHistory::with_file(1000, history_path).map_err(|e| e.to_string())?);
    let mut line_editor = Reedline::create().with_history(history);
    let main_prompt = prompt::Fox::Main;
    let continue_prompt = prompt::Fox::Continue;

    // One VM for the session so globals survive between lines
    let mut vm = VM::new(config.clone());
    let mut accumulated_input = String::new();

    loop {
        let prompt = if accumulated_input.is_empty() {
            &main_prompt
        } else {
            &continue_prompt
        };

        match line_editor.read_line(prompt) {
            Ok(Signal::Success(line)) => {
                let input = line.trim();

                if accumulated_input.is_empty() && input.starts_with('.') {
                    match input {
                        ".exit" | ".quit" => break,
                        ".help" => print_repl_help(),
                        ".clear" => {
                            print!("\x1B[2J\x1B[1;1H");
                            let _ = std::io::stdout().flush();
                        }
                        ".reset" => {
                            vm = VM::new(config.clone());
                            println!("{}", "  VM state reset".bright_black());
                        }
                        ".gc" => {
                            vm.collect_garbage();
                            let stats = vm.gc_stats();
                            println!(
                                "  {} collections, {} freed, {} live",
                                stats.collections, stats.freed, stats.live
                            );
                        }
                        _ => {
                            println!("{} Unknown command: {}", "!".red(), input);
                            println!("  Type {} for available commands", ".help".cyan());
                        }
                    }
                    continue;
                }

                if !accumulated_input.is_empty() {
                    accumulated_input.push('\n');
                }
                accumulated_input.push_str(&line);

                // An empty line forces execution of unbalanced input
                if is_incomplete(&accumulated_input) && !input.is_empty() {
                    continue;
                }

                let code = std::mem::take(&mut accumulated_input);
                if !code.trim().is_empty() {
                    vm.interpret("main", &code);
                }
            }
            Ok(Signal::CtrlC) => {
                if !accumulated_input.is_empty() {
                    accumulated_input.clear();
                    println!("{}", "^C (input cleared)".bright_black());
                } else {
                    println!("{}", "^C".bright_black());
                }
            }
            Ok(Signal::CtrlD) => break,
            Err(e) => return Err(e.to_string()),
        }
    }
    Ok(())
}

/// Unbalanced delimiters or an open string mean more lines are coming
fn is_incomplete(code: &str) -> bool {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut chars = code.chars();

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => {
                    chars.next();
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '(' | '[' => depth += 1,
            '}' | ')' | ']' => depth -= 1,
            _ => {}
        }
    }

    depth > 0 || in_string
}

mod prompt {
    use reedline::{Prompt, PromptEditMode, PromptHistorySearch, PromptHistorySearchStatus};
    use std::borrow::Cow;

    pub enum Fox {
        Main,
        Continue,
    }

    impl Prompt for Fox {
        fn render_prompt_left(&self) -> Cow<'_, str> {
            match self {
                Fox::Main => Cow::Borrowed("> "),
                Fox::Continue => Cow::Borrowed("... "),
            }
        }

        fn render_prompt_right(&self) -> Cow<'_, str> {
            Cow::Borrowed("")
        }

        fn render_prompt_indicator(&self, _: PromptEditMode) -> Cow<'_, str> {
            Cow::Borrowed("")
        }

        fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
            Cow::Borrowed("... ")
        }

        fn render_prompt_history_search_indicator(&self, history_search: PromptHistorySearch) -> Cow<'_, str> {
            let prefix = match history_search.status {
                PromptHistorySearchStatus::Passing => "",
                PromptHistorySearchStatus::Failing => "failing ",
            };
            Cow::Owned(format!("({}reverse-search: {}) ", prefix, history_search.term))
        }
    }
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

fn print_repl_help() {
    println!();
    println!("  {}", "REPL Commands:".cyan().bold());
    println!("    {}    Exit the REPL", ".exit".yellow());
    println!("    {}   Clear the screen", ".clear".yellow());
    println!("    {}   Reset VM state", ".reset".yellow());
    println!("    {}      Collect garbage and show GC stats", ".gc".yellow());
    println!("    {}    Show this help", ".help".yellow());
    println!();
    println!("  {}", "Keyboard Shortcuts:".cyan().bold());
    println!("    {}    Search history", "Ctrl+R".yellow());
    println!("    {}    Exit", "Ctrl+D".yellow());
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_input() {
        assert!(is_incomplete("fun f() {"));
        assert!(is_incomplete("print \"open"));
        assert!(!is_incomplete("print \"{\";"));
        assert!(!is_incomplete("var a = [1, 2];"));
    }

    #[test]
    fn test_module_name_from_path() {
        assert_eq!(module_name(Path::new("scripts/game.fox")), "game");
    }
}
