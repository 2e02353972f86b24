//! `convoy-hook`: the thin binary wiring the auto-trim hook protocol
//! to the `convoy` library. Mirrors the teacher's
//! `main.rs` shape — one stdin read, one dispatch, print-or-swallow on
//! the way out — generalized from a multi-event dispatch table to the
//! two triggers this protocol defines.

use anyhow::{Context, Result};
use convoy::hook::{self, HookOutcome, HookTriggerInput};
use std::io::Read;
use std::process;
use std::sync::mpsc;
use std::time::Duration;

const STDIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Read stdin on a spawned thread and wait on it with a bound, so a host
/// that never closes stdin can't hang this hook.
fn read_stdin_with_timeout() -> Result<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buffer = String::new();
        let result = std::io::stdin()
            .read_to_string(&mut buffer)
            .map(|_| buffer)
            .context("reading stdin");
        let _ = tx.send(result);
    });
    rx.recv_timeout(STDIN_TIMEOUT)
        .context("timed out waiting for stdin")?
}

fn debug_enabled() -> bool {
    std::env::var("CONVOY_DEBUG").map(|v| v == "1").unwrap_or(false)
}

fn main() {
    // §6.4 step 7: every error path anywhere in the hook exits 0 silently,
    // so the host assistant is never broken by this hook. In debug mode we
    // print the chained error first.
    let outcome: Result<HookOutcome> = (|| {
        let input = read_stdin_with_timeout()?;
        let trigger_input: HookTriggerInput =
            serde_json::from_str(&input).context("parsing hook input")?;
        Ok(hook::run_hook(&trigger_input))
    })();

    match outcome {
        Ok(HookOutcome::Error(msg)) if debug_enabled() => {
            eprintln!("convoy-hook: {msg}");
        }
        Err(err) if debug_enabled() => {
            eprintln!("convoy-hook: {err:#}");
        }
        _ => {}
    }

    process::exit(0);
}
