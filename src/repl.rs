mod commands;
pub mod format;
pub mod util;

use std::io::IsTerminal;

use log::{debug, info, warn};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::codegen::CodeGenerator;
use crate::config::Config;
use crate::engine::{ExecutionEngine, JitEngine};
use crate::error::{format_error, ReplError};
use crate::frontend::{DeclKind, DeclarationBody, FrontEnd, Input};
use crate::indirection::rewrite_calls;
use crate::namespace::Namespace;
use crate::partition::{partition, CompilationUnit};
use crate::session::ExecutionSession;

use commands::{parse_repl_command, ReplCommand, HELP};
pub use format::Binding;
use util::parens_balanced;

/// Number of the first input; `__repl_2` is the first entry function.
pub const FIRST_INPUT: u32 = 2;

/// Result of an input that was committed and, if it had top-level code, run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Executed {
    /// Variables declared by the input, in declaration order.
    pub bindings: Vec<Binding>,
}

/// One interactive session: namespace, code generator and execution session.
pub struct ReplSession<E: ExecutionEngine = JitEngine> {
    config: Config,
    namespace: Namespace,
    codegen: CodeGenerator,
    session: ExecutionSession<E>,
    next_input: u32,
}

impl ReplSession<JitEngine> {
    pub fn new(config: Config) -> Result<Self, ReplError> {
        let engine = JitEngine::new()?;
        Ok(Self::with_engine(config, engine))
    }
}

impl<E: ExecutionEngine> ReplSession<E> {
    pub fn with_engine(config: Config, engine: E) -> Self {
        let codegen = CodeGenerator::new(engine.default_call_conv());
        ReplSession {
            config,
            namespace: Namespace::new(),
            codegen,
            session: ExecutionSession::new(engine),
            next_input: FIRST_INPUT,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn execution(&self) -> &ExecutionSession<E> {
        &self.session
    }

    pub fn engine_mut(&mut self) -> &mut E {
        self.session.engine_mut()
    }

    /// Number the next input will get.
    pub fn next_input(&self) -> u32 {
        self.next_input
    }

    /// Compile, validate, load and run one input.
    ///
    /// The input number advances even when the input fails. Every error
    /// except `EntryInvocation` leaves the namespace, the engine and the
    /// slots as they were.
    pub fn process_input(&mut self, text: &str) -> Result<Executed, ReplError> {
        let number = self.next_input;
        self.next_input += 1;
        let input = Input::new(number, text);

        let declarations = FrontEnd::compile(&input, &self.namespace)?;
        if declarations.is_empty() {
            return Ok(Executed::default());
        }
        let module_name = input.module_name();
        let units = partition(declarations, &module_name, &self.namespace);

        let mut staged = self.namespace.clone();
        for unit in &units {
            staged
                .validate(unit, self.config.mode)
                .map_err(|r| ReplError::InvalidRedeclaration { name: r.name })?;
            staged.bind(unit, number);
        }

        self.session.begin_input();
        if let Err(e) = self.load_units(&units, number) {
            self.session.rollback_input();
            return Err(e);
        }
        self.session.commit_input();
        self.namespace = staged;
        info!("input {} committed: {} unit(s)", number, units.len());

        if units.iter().any(|u| u.is_entry) {
            self.session.invoke(&module_name)?;
        }

        let mut bindings = Vec::new();
        for unit in &units {
            if let DeclarationBody::Variable { ty, .. } = &unit.declaration.body {
                let Some(value) = self.session.read_value(&unit.identity) else {
                    warn!("no value cell for {}, binding not shown", unit.identity);
                    continue;
                };
                bindings.push(Binding {
                    name: unit.surface.to_string(),
                    ty: *ty,
                    value,
                });
            }
        }
        Ok(Executed { bindings })
    }

    /// Lower, rewrite, evict, load and repoint every unit of an input.
    fn load_units(&mut self, units: &[CompilationUnit], number: u32) -> Result<(), ReplError> {
        for unit in units {
            let mut module = self.codegen.lower(unit)?;
            rewrite_calls(&mut module, self.session.slots_mut());
            if unit.declaration.kind() == DeclKind::Function
                && self.namespace.owner(&unit.identity).is_some()
            {
                self.session.evict(&unit.identity)?;
            }
            let defined = self.session.load(module, number)?;
            self.session.repoint(&defined);
        }
        Ok(())
    }

    /// Rewritten CLIF of every loaded unit `name` refers to: an identity, a
    /// variable, an input's entry, or all overloads of a function.
    pub fn clif(&self, name: &str) -> Option<String> {
        let identities: Vec<String> = match self.namespace.owner(name) {
            Some(unit) if unit.kind == DeclKind::Function && unit.identity != name => self
                .namespace
                .overloads(name)
                .into_iter()
                .map(|u| u.identity.to_string())
                .collect(),
            Some(unit) => vec![unit.identity.to_string()],
            None => return None,
        };
        let texts: Vec<&str> = identities
            .iter()
            .filter_map(|id| self.session.loaded().get(id.as_str()))
            .map(|m| m.clif.as_str())
            .filter(|text| !text.is_empty())
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        }
    }

    /// Run a driver command. Returns true when the session should end.
    fn handle_command(&self, cmd: ReplCommand<'_>) -> bool {
        match cmd {
            ReplCommand::Quit => return true,
            ReplCommand::Help => println!("{}", HELP),
            ReplCommand::List => println!("{}", format::format_namespace(&self.namespace)),
            ReplCommand::Slots => println!("{}", format::format_slots(self.session.slots())),
            ReplCommand::Clif("") => eprintln!("usage: /clif <name>"),
            ReplCommand::Clif(name) => match self.clif(name) {
                Some(text) => println!("{}", text),
                None => eprintln!("error: no loaded code for `{}`", name),
            },
            ReplCommand::Unknown(cmd) => eprintln!("Unknown command /{}, try /help", cmd),
        }
        false
    }

    /// Process one input and report the outcome on stdout/stderr.
    fn handle_input(&mut self, text: &str) {
        match self.process_input(text) {
            Ok(executed) => {
                for binding in &executed.bindings {
                    println!("{}", binding);
                }
            }
            Err(ReplError::Compile(diagnostic)) => {
                eprintln!("error: {}", format_error(text, &diagnostic));
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }

    /// Interactive loop over stdin until `/quit` or end of input.
    pub fn run(&mut self) {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("Failed to initialize line editor: {}", e);
                return;
            }
        };
        if let Some(path) = &self.config.history {
            let _ = rl.load_history(path);
        }

        let is_tty = std::io::stdin().is_terminal();
        let mut input_buf = String::new();

        loop {
            let prompt = if input_buf.is_empty() {
                format!("{}> ", self.next_input)
            } else {
                let pad = self.next_input.to_string().len();
                format!("{}. ", ".".repeat(pad))
            };
            // rustyline suppresses prompts when stdin is piped; print them
            // and echo the line so transcripts read like a terminal session.
            let line = if is_tty {
                rl.readline(&prompt)
            } else {
                print!("{}", prompt);
                std::io::Write::flush(&mut std::io::stdout()).ok();
                let result = rl.readline("");
                if let Ok(ref line) = result {
                    println!("{}", line);
                }
                result
            };
            let line = match line {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) => {
                    input_buf.clear();
                    continue;
                }
                Err(ReadlineError::Eof) => break,
                Err(e) => {
                    debug!("line editor stopped: {}", e);
                    break;
                }
            };
            input_buf.push_str(&line);
            input_buf.push('\n');

            if !parens_balanced(&input_buf) {
                continue;
            }

            let input = input_buf.trim().to_string();
            input_buf.clear();

            if input.is_empty() {
                continue;
            }

            let _ = rl.add_history_entry(&input);

            if let Some(cmd) = parse_repl_command(&input) {
                if self.handle_command(cmd) {
                    break;
                }
                continue;
            }

            self.handle_input(&input);
        }

        if let Some(path) = &self.config.history {
            let _ = rl.save_history(path);
        }
    }

    /// End the session and release all JIT memory.
    pub fn shutdown(self) {
        info!("shutting down after {} input(s)", self.next_input - FIRST_INPUT);
        drop(self.namespace);
        self.session.shutdown();
    }
}

/// Launch an interactive session with the given settings.
pub fn run(config: Config) -> Result<(), ReplError> {
    let mut session = ReplSession::new(config)?;
    session.run();
    session.shutdown();
    Ok(())
}
