use std::process;

use anyhow::{Context, Result};
use clap::Parser;

use ts3metrics::metrics::VirtualServerMetrics;
use ts3metrics::query::{Protocol, QueryClient};
use ts3metrics::xml::Document;

/// Commands polled on every run, in order.  serverlist is handled separately
/// because it only feeds the derived counters.
const COMMANDS: [&str; 4] = ["version", "bindinglist", "instanceinfo", "hostinfo"];

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
}

/// Parse the protocol selector, complaining loudly on an unsupported one.
fn parse_protocol(selector: &str) -> Protocol {
    match selector.parse() {
        Ok(protocol) => protocol,
        Err(_) => {
            eprintln!(
                "Unsupported protocol '{}'. Either use 'ssh' (secured) or 'raw' (telnet; deprecated).",
                selector
            );
            process::exit(1);
        }
    }
}

fn main() -> Result<()> {
    let cli: Cli = Cli::parse();
    let protocol = parse_protocol(&cli.protocol);

    let mut client = QueryClient::connect(protocol, &cli.host, cli.port)?;
    client.login(&cli.user, &cli.password).context("authenticating")?;

    let mut doc = Document::new();
    for command in COMMANDS {
        let response = client
            .execute(command)
            .with_context(|| format!("executing {}", command))?;
        doc.merge(command, &response);
    }

    let serverlist = client.execute("serverlist").context("executing serverlist")?;
    let metrics = VirtualServerMetrics::from_serverlist(&serverlist);
    doc.merge("virtualserver_metrics", &metrics.as_record());

    client.logout().context("closing session")?;

    println!("{}", doc.to_xml_string()?);

    Ok(())
}
