//! ptywrap - run a command under a pseudo-terminal and relay its I/O.
//!
//! The child sees a real terminal (a PTY on Unix, a ConPTY pseudo-console
//! on Windows) while its input and output flow through this process. Exit
//! status is passed through: the child's own code, or 128 plus the signal
//! number when a signal killed it.
//!
//! ```text
//! ptywrap vim notes.txt
//! ptywrap --size 120x40 sh -c 'stty size'
//! ```

use crossterm::tty::IsTty;
use tracing_subscriber::{fmt, EnvFilter};

use ptywrap::config::Config;
use ptywrap::pty::PtySize;
use ptywrap::session::Session;
use ptywrap::term::{detect_size, RawModeGuard};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("ptywrap {}", VERSION);
}

fn print_usage() {
    eprintln!("ptywrap {} - run a command under a pseudo-terminal", VERSION);
    eprintln!();
    eprintln!("Usage: ptywrap [OPTIONS] <command> [args...]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --size <COLSxROWS>    Fixed terminal size (default: inherit, or 80x24)");
    eprintln!("  --term <NAME>         TERM value for the child (default: xterm-256color)");
    eprintln!("  --no-raw              Leave the controlling terminal in cooked mode");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
}

/// What the command line asked for.
struct Args {
    command: String,
    command_args: Vec<String>,
    size: Option<PtySize>,
    term: Option<String>,
    raw: bool,
}

enum ParseOutcome {
    Run(Args),
    /// Help or version was printed; exit cleanly.
    Done,
    /// Usage error, already reported.
    Invalid,
}

fn parse_args(argv: &[String]) -> ParseOutcome {
    let mut size = None;
    let mut term = None;
    let mut raw = true;
    let mut iter = argv.iter().peekable();

    while let Some(arg) = iter.peek() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                return ParseOutcome::Done;
            }
            "-v" | "--version" => {
                print_version();
                return ParseOutcome::Done;
            }
            "--no-raw" => {
                raw = false;
                iter.next();
            }
            "--size" => {
                iter.next();
                let Some(value) = iter.next() else {
                    eprintln!("ptywrap: --size requires a COLSxROWS value");
                    return ParseOutcome::Invalid;
                };
                let Some(parsed) = parse_size(value) else {
                    eprintln!("ptywrap: invalid size '{value}', expected e.g. 80x24");
                    return ParseOutcome::Invalid;
                };
                size = Some(parsed);
            }
            "--term" => {
                iter.next();
                let Some(value) = iter.next() else {
                    eprintln!("ptywrap: --term requires a value");
                    return ParseOutcome::Invalid;
                };
                term = Some(value.clone());
            }
            "--" => {
                iter.next();
                break;
            }
            flag if flag.starts_with('-') => {
                eprintln!("ptywrap: unknown option '{flag}'");
                print_usage();
                return ParseOutcome::Invalid;
            }
            _ => break,
        }
    }

    let Some(command) = iter.next() else {
        print_usage();
        return ParseOutcome::Invalid;
    };
    let command_args: Vec<String> = iter.cloned().collect();

    ParseOutcome::Run(Args {
        command: command.clone(),
        command_args,
        size,
        term,
        raw,
    })
}

fn parse_size(value: &str) -> Option<PtySize> {
    let value = value.to_ascii_lowercase();
    let (cols, rows) = value.split_once('x')?;
    let cols: u16 = cols.trim().parse().ok()?;
    let rows: u16 = rows.trim().parse().ok()?;
    if cols == 0 || rows == 0 {
        return None;
    }
    Some(PtySize::new(cols, rows))
}

/// TERM for the child: the flag wins, then the config file, then the
/// compiled-in default.
fn resolve_term(cli: Option<String>, config: &Config) -> String {
    cli.or_else(|| config.term.clone())
        .unwrap_or_else(|| "xterm-256color".to_string())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // Log lines share stderr with the child's terminal; no ANSI noise.
    fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&argv) {
        ParseOutcome::Run(args) => args,
        ParseOutcome::Done => return,
        ParseOutcome::Invalid => std::process::exit(1),
    };

    let config = Config::load();
    let size = args
        .size
        .unwrap_or_else(|| detect_size(PtySize::new(config.cols, config.rows)));
    let term = resolve_term(args.term, &config);

    let session = match Session::launch(&args.command, &args.command_args, size, &term) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("ptywrap: {e}");
            std::process::exit(1);
        }
    };

    let stdin_is_tty = std::io::stdin().is_tty();
    let guard = (args.raw && stdin_is_tty).then(RawModeGuard::enable);

    let disposition = run_session(session, &config, args.size.is_none() && stdin_is_tty);

    // Cooked mode back before the report so the line renders normally.
    drop(guard);
    eprintln!("[ptywrap: child {disposition}]");
    std::process::exit(disposition.exit_code());
}

#[cfg(unix)]
fn run_session(
    session: Session,
    _config: &Config,
    watch_resize: bool,
) -> ptywrap::session::Disposition {
    use std::os::fd::AsFd;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut output = stdout.lock();
    session.run(Some(stdin.as_fd()), &mut output, watch_resize)
}

#[cfg(windows)]
fn run_session(
    session: Session,
    config: &Config,
    _watch_resize: bool,
) -> ptywrap::session::Disposition {
    use std::time::Duration;

    use ptywrap::relay::ConsoleInput;

    let pace = Duration::from_millis(config.escape_delay_ms);
    let grace = Duration::from_millis(config.grace_period_ms);
    session.run(ConsoleInput::stdin(), Box::new(std::io::stdout()), pace, grace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_command_and_args() {
        let ParseOutcome::Run(args) = parse_args(&argv(&["vim", "notes.txt"])) else {
            panic!("expected a runnable parse");
        };
        assert_eq!(args.command, "vim");
        assert_eq!(args.command_args, vec!["notes.txt"]);
        assert!(args.raw);
        assert!(args.size.is_none());
    }

    #[test]
    fn flags_before_command_only() {
        // Flags after the command belong to the child.
        let ParseOutcome::Run(args) = parse_args(&argv(&["--no-raw", "ls", "--size"])) else {
            panic!("expected a runnable parse");
        };
        assert!(!args.raw);
        assert_eq!(args.command, "ls");
        assert_eq!(args.command_args, vec!["--size"]);
    }

    #[test]
    fn double_dash_ends_option_parsing() {
        let ParseOutcome::Run(args) = parse_args(&argv(&["--", "--no-raw"])) else {
            panic!("expected a runnable parse");
        };
        assert_eq!(args.command, "--no-raw");
        assert!(args.raw);
    }

    #[test]
    fn size_flag() {
        let ParseOutcome::Run(args) = parse_args(&argv(&["--size", "120x40", "sh"])) else {
            panic!("expected a runnable parse");
        };
        assert_eq!(args.size, Some(PtySize::new(120, 40)));
    }

    #[test]
    fn bad_size_is_rejected() {
        assert!(matches!(
            parse_args(&argv(&["--size", "huge", "sh"])),
            ParseOutcome::Invalid
        ));
        assert!(parse_size("0x24").is_none());
        assert!(parse_size("80").is_none());
    }

    #[test]
    fn term_resolution_precedence() {
        let mut config = Config::default();
        config.term = Some("vt220".to_string());
        assert_eq!(resolve_term(Some("vt100".to_string()), &config), "vt100");
        assert_eq!(resolve_term(None, &config), "vt220");
        // The config stays usable after resolution.
        assert_eq!(config.grace_period_ms, 2000);
        assert_eq!(resolve_term(None, &Config::default()), "xterm-256color");
    }

    #[test]
    fn missing_command_is_a_usage_error() {
        assert!(matches!(parse_args(&argv(&[])), ParseOutcome::Invalid));
        assert!(matches!(
            parse_args(&argv(&["--no-raw"])),
            ParseOutcome::Invalid
        ));
    }
}
