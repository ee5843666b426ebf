use std::io;
use std::process::{Command, Stdio};
use std::thread;

use tracing::{info, warn};

/// Runs `cmdline` through `sh -c` without waiting for it.
///
/// The command shares our stdio; its failure is only logged.
pub fn run_background_command(cmdline: &str) {
    if cmdline.is_empty() {
        return;
    }

    info!("Executing command: {cmdline}");
    if let Err(err) = spawn(cmdline) {
        warn!("Command error: {err}");
    }
}

fn spawn(cmdline: &str) -> io::Result<()> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(cmdline)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()?;

    let cmdline = cmdline.to_owned();
    thread::Builder::new()
        .name("background command".to_owned())
        .spawn(move || match child.wait() {
            Ok(status) if !status.success() => warn!("Command {cmdline:?} exited with {status}"),
            Ok(_) => (),
            Err(err) => warn!("Command error: {err}"),
        })?;
    Ok(())
}
