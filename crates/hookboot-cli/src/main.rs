//! hookboot host tool.
//!
//! Creates a control channel, injects the bootstrap library into a target
//! process, and drives the channel until the injected entry point is up.

#[cfg(windows)]
mod host;
#[cfg(windows)]
mod inject;
#[cfg(windows)]
mod process;

use clap::{Parser, Subcommand};
use hookboot_shared::{Error, PluginValue, Result};

#[derive(Parser)]
#[command(name = "hookboot")]
#[command(about = "Runs user modules inside remote processes via a managed bootstrap")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List running processes
    List,
    /// Inject the bootstrap into a process and run a user module
    Inject {
        /// Process ID to target
        #[arg(short, long, group = "target")]
        pid: Option<u32>,
        /// Process name to target (e.g., "notepad.exe" or "notepad")
        #[arg(short, long, group = "target")]
        name: Option<String>,
        /// Path to the user module
        #[arg(short, long)]
        module: String,
        /// Logical module name for shared deployments
        #[arg(long, default_value = "")]
        identity: String,
        /// Entry point arguments as kind=value specs (i32=5, str=hello, null)
        #[arg(short, long = "arg")]
        args: Vec<String>,
        /// Control channel name (generated when omitted)
        #[arg(long)]
        channel: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(windows)]
fn run(cli: Cli) -> Result<i32> {
    use hookboot_shared::RemoteInfo;
    use hookboot_shared::ipc::ControlHost;

    match cli.command {
        Commands::List => {
            for (pid, name) in process::list_processes()? {
                println!("{pid:>8}  {name}");
            }
            Ok(0)
        }
        Commands::Inject {
            pid,
            name,
            module,
            identity,
            args,
            channel,
        } => {
            let target_pid = process::resolve_target(pid, name)?;
            let values = args
                .iter()
                .map(|spec| parse_arg_spec(spec))
                .collect::<Result<Vec<_>>>()?;

            let channel_name = channel.unwrap_or_else(|| generate_channel(target_pid));
            let module_path = std::path::absolute(&module)
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or(module);

            let info = RemoteInfo {
                channel_name: channel_name.clone(),
                host_pid: std::process::id(),
                module_path,
                module_identity: identity,
                user_args: values.iter().map(PluginValue::encode).collect(),
            };

            // the channel must exist before the bootstrap looks for it
            let mut control = ControlHost::create(&channel_name, std::process::id())?;
            inject::inject_bootstrap(target_pid, &info)?;

            match host::wait_for_outcome(&mut control) {
                host::Outcome::Completed(pid) => {
                    tracing::info!(pid, channel = %channel_name, "entry point is running");
                    Ok(0)
                }
                host::Outcome::Failed(pid, message) => {
                    eprintln!("Injection into {pid} failed: {message}");
                    Ok(1)
                }
            }
        }
    }
}

#[cfg(not(windows))]
fn run(_cli: Cli) -> Result<i32> {
    Err(Error::Other(
        "hookboot drives Windows processes; this build has no injector".into(),
    ))
}

/// Channel names are unique per injection session.
#[cfg(windows)]
fn generate_channel(target_pid: u32) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("hb_{target_pid}_{nanos:x}")
}

/// Parse one `kind=value` argument spec into a typed value.
fn parse_arg_spec(spec: &str) -> Result<PluginValue> {
    if spec == "null" {
        return Ok(PluginValue::Null);
    }

    let (kind, value) = spec.split_once('=').ok_or_else(|| {
        Error::Other(format!("argument spec '{spec}' is not kind=value or null"))
    })?;

    let bad = |e: &dyn std::fmt::Display| Error::Other(format!("bad {kind} value '{value}': {e}"));

    Ok(match kind {
        "bool" => PluginValue::Bool(value.parse().map_err(|e| bad(&e))?),
        "i32" => PluginValue::I32(value.parse().map_err(|e| bad(&e))?),
        "i64" => PluginValue::I64(value.parse().map_err(|e| bad(&e))?),
        "u64" => PluginValue::U64(value.parse().map_err(|e| bad(&e))?),
        "f64" => PluginValue::F64(value.parse().map_err(|e| bad(&e))?),
        "str" => PluginValue::Str(value.to_owned()),
        "bytes" => PluginValue::Bytes(parse_hex(value)?),
        other => {
            return Err(Error::Other(format!(
                "unknown argument kind '{other}' in '{spec}'"
            )));
        }
    })
}

/// Decode a hex string into bytes.
fn parse_hex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(Error::Other(format!("hex value '{s}' has odd length")));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|e| Error::Other(format!("hex value '{s}': {e}")))
        })
        .collect()
}
