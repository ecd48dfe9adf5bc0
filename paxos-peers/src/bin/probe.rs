use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use paxos_common::{PrepareReq, ProposalNumber, RoleId};
use paxos_peers::{logging::init_tracing, Cluster, ClusterConfig};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "paxos-probe")]
#[command(about = "Checks reachability of the peers of a Paxos cluster")]
struct Cli {
    /// Cluster config file
    #[arg(short, long, value_name = "FILE", default_value = "cluster.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file from `ROLE=HOST:PORT` pairs
    Init {
        #[arg(value_name = "ROLE=ADDR", required = true)]
        peers: Vec<String>,
    },
    /// Connect to every peer and print the peer table
    Status,
    /// Connect, send one heartbeat to every peer and wait for the acks
    Heartbeat {
        #[arg(long, default_value_t = 0)]
        from: u64,
    },
    /// Connect and broadcast one prepare request, printing each reply
    Prepare {
        #[arg(long, default_value_t = 0)]
        from: u64,
        #[arg(long, default_value_t = 1)]
        round: u64,
        #[arg(long, default_value_t = 0)]
        index: u64,
    },
}

fn parse_peer(raw: &str) -> Result<(RoleId, String), String> {
    let (role, addr) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ROLE=ADDR, got {}", raw))?;
    let role = role.parse::<RoleId>().map_err(|e| format!("bad role id {}: {}", role, e))?;
    Ok((role, addr.to_string()))
}

async fn connected_cluster(config: &Path) -> Result<Cluster, Box<dyn std::error::Error>> {
    let config = ClusterConfig::load_from_file(config)?;
    let cluster = Cluster::from_config(&config)?;
    cluster.connect().await?;
    Ok(cluster)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("info,paxos_peers=debug");
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { peers } => {
            let peers = peers
                .iter()
                .map(|raw| parse_peer(raw))
                .collect::<Result<BTreeMap<_, _>, _>>()?;
            let config = ClusterConfig::new(peers);
            config.validate()?;
            config.save_to_file(&cli.config)?;
            info!("Wrote {} peers to {}", config.peers.len(), cli.config.display());
        }
        Commands::Status => {
            let cluster = connected_cluster(&cli.config).await?;
            for status in cluster.peer_statuses().await {
                println!(
                    "{}\t{}\tconnected={}\trequire_promise={}",
                    status.role_id, status.address, status.connected, status.require_promise
                );
            }
        }
        Commands::Heartbeat { from } => {
            let cluster = connected_cluster(&cli.config).await?;
            let mut acks = cluster.heartbeat_with_acks(RoleId(from)).await?;
            info!("Heartbeat sent to {} peers", acks.expected());

            while let Some(ack) = acks.recv().await {
                match ack.outcome {
                    Ok(_) => println!("{}\tack", ack.peer),
                    Err(e) => println!("{}\terror={}", ack.peer, e),
                }
            }
            if acks.is_expired() {
                error!("Aggregation window closed before every peer acknowledged");
            }
        }
        Commands::Prepare { from, round, index } => {
            let cluster = connected_cluster(&cli.config).await?;
            let request = PrepareReq {
                proposer: RoleId(from),
                proposal: ProposalNumber::new(round, RoleId(from)),
                index,
            };

            let (sent, mut replies) = cluster.broadcast_prepare_request(&request).await?;
            info!("Prepare sent to {} peers", sent);

            while let Some(reply) = replies.recv().await {
                match reply.outcome {
                    Ok(resp) => println!("{}\tpromised={}\tmin_proposal={:?}", reply.peer, resp.promised, resp.min_proposal),
                    Err(e) => println!("{}\terror={}", reply.peer, e),
                }
            }
            if replies.is_expired() {
                error!("Aggregation window closed before every peer replied");
            }
        }
    }

    Ok(())
}
