//! muster-ctl — command-line interface for the muster daemon.

mod cmd;

use std::net::{IpAddr, Ipv4Addr};

use anyhow::{bail, Context, Result};

use muster_core::wire::{Command, RegisterRequest};

use cmd::Target;

const DEFAULT_HTTP_PORT: u16 = 8090;
const DEFAULT_TCP_PORT: u16 = 3333;

#[derive(Debug, PartialEq, Eq)]
enum Action {
    Status,
    List { tcp: bool },
    Announce(RegisterRequest),
    Help,
}

fn parse_args(args: &[String]) -> Result<(Target, Action)> {
    let mut target = Target {
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        http_port: DEFAULT_HTTP_PORT,
        tcp_port: DEFAULT_TCP_PORT,
    };
    let mut tcp = false;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                i += 1;
                target.host = args
                    .get(i)
                    .context("--host requires a value")?
                    .parse()
                    .context("--host must be an IP address")?;
            }
            "--port" => {
                i += 1;
                target.http_port = args
                    .get(i)
                    .context("--port requires a value")?
                    .parse()
                    .context("--port must be a number")?;
            }
            "--tcp-port" => {
                i += 1;
                target.tcp_port = args
                    .get(i)
                    .context("--tcp-port requires a value")?
                    .parse()
                    .context("--tcp-port must be a number")?;
            }
            "--tcp" => tcp = true,
            other => remaining.push(other),
        }
        i += 1;
    }

    let action = match remaining.as_slice() {
        ["status"] | [] => Action::Status,
        ["list"] => Action::List { tcp },
        ["announce", rest @ ..] => {
            let line = format!("regserv {}", rest.join(" "));
            match Command::parse(&line) {
                Ok(Command::Register(request)) => Action::Announce(request),
                Ok(_) => bail!("announce: expected <port> <name> <version> <key>"),
                Err(e) => bail!("announce: {e}"),
            }
        }
        ["help"] | ["--help"] | ["-h"] => Action::Help,
        other => bail!("unknown command: {}", other.join(" ")),
    };
    Ok((target, action))
}

fn print_usage() {
    println!("Usage: muster-ctl [options] <command>");
    println!();
    println!("Commands:");
    println!("  status                                 Show registry status");
    println!("  list [--tcp]                           Print the server list");
    println!("  announce <port> <name> <version> <key> Register as a host and answer heartbeats");
    println!();
    println!("Options:");
    println!("  --host <ip>         Daemon address (default: 127.0.0.1)");
    println!("  --port <port>       HTTP port (default: {DEFAULT_HTTP_PORT})");
    println!("  --tcp-port <port>   Command port (default: {DEFAULT_TCP_PORT})");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let (target, action) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{e:#}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    match action {
        Action::Status => cmd::status::cmd_status(&target).await,
        Action::List { tcp: false } => cmd::list::cmd_list(&target).await,
        Action::List { tcp: true } => cmd::list::cmd_list_tcp(&target).await,
        Action::Announce(request) => cmd::announce::cmd_announce(&target, request).await,
        Action::Help => {
            print_usage();
            Ok(())
        }
    }
}
