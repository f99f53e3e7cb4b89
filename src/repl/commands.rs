#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplCommand<'a> {
    Quit,
    Help,
    List,
    Slots,
    Clif(&'a str),
    Unknown(&'a str),
}

/// Recognise a driver command. Anything else is Splice source.
pub fn parse_repl_command(input: &str) -> Option<ReplCommand<'_>> {
    let trimmed = input.trim();
    if trimmed == "e" || trimmed == "exit" {
        return Some(ReplCommand::Quit);
    }
    let rest = trimmed.strip_prefix('/')?;
    let (cmd, arg) = match rest.find(char::is_whitespace) {
        Some(i) => (&rest[..i], rest[i..].trim()),
        None => (rest, ""),
    };
    Some(match cmd {
        "quit" | "q" => ReplCommand::Quit,
        "help" | "h" => ReplCommand::Help,
        "list" | "l" => ReplCommand::List,
        "slots" => ReplCommand::Slots,
        "clif" => ReplCommand::Clif(arg),
        _ => ReplCommand::Unknown(cmd),
    })
}

pub const HELP: &str = "\
Commands:
  /help, /h          show this help
  /quit, /q, exit    leave the session
  /list, /l          current declarations
  /slots             function pointer slots
  /clif <name>       rewritten IR of a loaded function or input";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands() {
        assert_eq!(parse_repl_command("/quit"), Some(ReplCommand::Quit));
        assert_eq!(parse_repl_command("  exit "), Some(ReplCommand::Quit));
        assert_eq!(parse_repl_command("e"), Some(ReplCommand::Quit));
        assert_eq!(parse_repl_command("/clif  fib "), Some(ReplCommand::Clif("fib")));
        assert_eq!(parse_repl_command("/bogus"), Some(ReplCommand::Unknown("bogus")));
    }

    #[test]
    fn source_is_not_a_command() {
        assert_eq!(parse_repl_command("exit_code + 1"), None);
        assert_eq!(parse_repl_command("let e = 1"), None);
        assert_eq!(parse_repl_command("4 / 2"), None);
    }
}
