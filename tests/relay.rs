//! End-to-end relay tests: launch a real child under the pseudo-terminal
//! and check the relayed output and the reported disposition.

#![cfg(unix)]

use ptywrap::error::Error;
use ptywrap::pty::PtySize;
use ptywrap::session::{Disposition, Session};

fn run_sh(script: &str) -> (Vec<u8>, Disposition) {
    run_sh_with(script, PtySize::default(), "xterm-256color")
}

fn run_sh_with(script: &str, size: PtySize, term: &str) -> (Vec<u8>, Disposition) {
    let session = Session::launch("sh", &["-c".into(), script.into()], size, term)
        .expect("launch sh");
    let mut output = Vec::new();
    let disposition = session.run(None, &mut output, false);
    (output, disposition)
}

#[test]
fn relays_child_output() {
    let (output, disposition) = run_sh("echo hello");
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("hello"), "output was: {text:?}");
    assert_eq!(disposition, Disposition::Exited(0));
    assert_eq!(disposition.exit_code(), 0);
}

#[test]
fn missing_command_fails_at_launch() {
    let result = Session::launch(
        "definitely-not-a-real-command-ptywrap",
        &[],
        PtySize::default(),
        "xterm-256color",
    );
    let Err(err) = result else {
        panic!("launch of a missing command unexpectedly succeeded");
    };
    assert!(matches!(err, Error::Launch { .. }), "got: {err}");
}

#[test]
fn exit_code_passes_through() {
    let (_, disposition) = run_sh("exit 7");
    assert_eq!(disposition, Disposition::Exited(7));
    assert_eq!(disposition.exit_code(), 7);
}

#[test]
fn sigkill_reports_128_plus_signal() {
    let (_, disposition) = run_sh("kill -KILL $$");
    assert!(
        matches!(disposition, Disposition::Signaled { signal: 9, .. }),
        "got: {disposition:?}"
    );
    assert_eq!(disposition.exit_code(), 137);
}

#[test]
fn sigterm_reports_128_plus_signal() {
    let (_, disposition) = run_sh("kill -TERM $$");
    assert!(
        matches!(disposition, Disposition::Signaled { signal: 15, .. }),
        "got: {disposition:?}"
    );
    assert_eq!(disposition.exit_code(), 143);
}

#[test]
fn child_sees_the_requested_term() {
    let (output, disposition) =
        run_sh_with("printf '<%s>' \"$TERM\"", PtySize::default(), "vt220");
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("<vt220>"), "output was: {text:?}");
    assert_eq!(disposition, Disposition::Exited(0));
}

#[test]
fn child_sees_the_requested_window_size() {
    let (output, disposition) = run_sh_with("stty size", PtySize::new(40, 12), "xterm-256color");
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("12 40"), "output was: {text:?}");
    assert_eq!(disposition, Disposition::Exited(0));
}

// Teardown-ordering guard: everything the child printed before exiting must
// reach the output, even the tail it wrote right before the exit.
#[test]
fn drains_all_output_before_reporting() {
    let (output, disposition) =
        run_sh("i=0; while [ $i -lt 500 ]; do echo line$i; i=$((i+1)); done");
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("line0\r\n") || text.contains("line0\n"));
    assert!(text.contains("line499"), "tail missing from output");
    assert_eq!(disposition, Disposition::Exited(0));
}

// An outbound channel error ends the relay but never the disposition
// report: a session whose external output rejects every write still comes
// back with the child's real exit status.
#[test]
fn output_failure_does_not_mask_the_disposition() {
    struct RefusingWriter;

    impl std::io::Write for RefusingWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let session = Session::launch(
        "sh",
        &["-c".into(), "echo boom; exit 5".into()],
        PtySize::default(),
        "xterm-256color",
    )
    .expect("launch sh");
    let disposition = session.run(None, &mut RefusingWriter, false);
    assert_eq!(disposition, Disposition::Exited(5));
}

// A child that closes its end early must not wedge the relay; end-of-stream
// on the child-output side ends the session once the child is reaped.
#[test]
fn survives_child_output_closing_early() {
    let (output, disposition) = run_sh("echo early; exec >/dev/null 2>&1; sleep 0.2; exit 3");
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("early"), "output was: {text:?}");
    assert_eq!(disposition, Disposition::Exited(3));
}
