//! Worker process for document isolation.
//!
//! Reads one request envelope from stdin, runs it and writes one response
//! line to stdout. Logs go to stderr.

use std::io::{Read, Write};

use anyhow::{bail, Context as _, Result};
use tessera_sandbox::{run_module, ExecutionLimits, SandboxRequest, SandboxResponse};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

fn parse_limits(mut args: impl Iterator<Item = String>) -> Result<ExecutionLimits> {
    let mut limits = ExecutionLimits::default();
    while let Some(flag) = args.next() {
        let value = args.next().with_context(|| format!("{} needs a value", flag))?;
        match flag.as_str() {
            "--loop-limit" => limits.loop_iteration_limit = value.parse().context("invalid --loop-limit")?,
            "--recursion-limit" => limits.recursion_limit = value.parse().context("invalid --recursion-limit")?,
            other => bail!("unknown argument {}", other),
        }
    }
    Ok(limits)
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let limits = parse_limits(std::env::args().skip(1))?;

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read request from stdin")?;

    let response = match serde_json::from_str::<SandboxRequest>(&input) {
        Ok(request) => match request.validate() {
            Ok(()) => run_module(&request, &limits),
            Err(e) => SandboxResponse::failure(&request.id, e.to_string()),
        },
        Err(e) => SandboxResponse::failure("", format!("malformed request: {}", e)),
    };

    let line = match serde_json::to_string(&response) {
        Ok(line) => line,
        Err(e) => serde_json::json!({
            "id": response.id,
            "ok": false,
            "error": format!("response not serializable: {}", e),
        })
        .to_string(),
    };

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", line).context("failed to write response")?;
    stdout.flush()?;
    Ok(())
}
