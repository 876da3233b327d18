//! Helper utility to run a single ServerQuery command and dump the payload
use std::process;

use anyhow::{Context, Result};
use clap::Parser;

use ts3metrics::query::{Protocol, QueryClient};

#[derive(Debug, clap::Parser)]
struct Cli {
    /// IP address or DNS name of the TeamSpeak server
    host: String,
    /// TCP port of the ServerQuery interface
    port: u16,
    /// ServerQuery protocol ('ssh' or 'raw')
    protocol: String,
    /// ServerQuery username (eg. 'serveradmin')
    user: String,
    /// ServerQuery password
    password: String,
    /// ServerQuery command to execute (eg. 'hostinfo')
    command: String,
}

fn main() -> Result<()> {
    let cli: Cli = Cli::parse();

    let protocol: Protocol = match cli.protocol.parse() {
        Ok(protocol) => protocol,
        Err(_) => {
            eprintln!(
                "Unsupported protocol '{}'. Either use 'ssh' (secured) or 'raw' (telnet; deprecated).",
                cli.protocol
            );
            process::exit(1);
        }
    };

    let mut client = QueryClient::connect(protocol, &cli.host, cli.port)?;
    client.login(&cli.user, &cli.password).context("authenticating")?;

    let payload = client
        .execute(&cli.command)
        .with_context(|| format!("executing {}", cli.command))?;
    client.logout().context("closing session")?;

    println!("{}", payload);

    Ok(())
}
