use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use lb_agent::api::{AgentClient, ClientConfig};
use lb_agent::load_balancer::HostAddr;

#[derive(Parser)]
#[command(name = "lb-cli")]
#[command(about = "Query a running lb-agent", long_about = None)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    agent: IpAddr,

    #[arg(long, default_value_t = 8888)]
    base_port: u16,

    #[arg(long, default_value_t = 3)]
    shards: u16,

    /// Heartbeat file to check first; pass an empty string to skip.
    #[arg(long, default_value = "/tmp/hb_map.bin")]
    heartbeat: String,

    /// Reply timeout in ms (clamped to 10..=1000).
    #[arg(short, long, default_value_t = 100)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask for one host of an endpoint
    GetHost { modid: u32, cmdid: u32 },
    /// Report the outcome of a call
    Report {
        modid: u32,
        cmdid: u32,
        ip: Ipv4Addr,
        port: u16,
        /// Mark the call as failed
        #[arg(long)]
        failed: bool,
        /// Call duration in ms
        #[arg(long)]
        cost: Option<u64>,
    },
    /// List every host of an endpoint
    Route { modid: u32, cmdid: u32 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = ClientConfig {
        agent_ip: cli.agent,
        base_port: cli.base_port,
        shards: cli.shards,
        heartbeat_path: (!cli.heartbeat.is_empty()).then(|| PathBuf::from(&cli.heartbeat)),
    };
    let mut client = AgentClient::connect(config).await?;

    match cli.command {
        Commands::GetHost { modid, cmdid } => {
            let host = client.get_host(modid, cmdid, cli.timeout).await?;
            println!("{host}");
        }
        Commands::Report {
            modid,
            cmdid,
            ip,
            port,
            failed,
            cost,
        } => {
            client.report(modid, cmdid, HostAddr::new(ip, port), !failed, cost).await?;
        }
        Commands::Route { modid, cmdid } => {
            let hosts = client.get_route(modid, cmdid, cli.timeout).await?;
            println!("{}", serde_json::to_string_pretty(&hosts)?);
        }
    }

    Ok(())
}
