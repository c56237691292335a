use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use driftnetwork::config::{generate_encryption_key, generate_node_id};
use driftnetwork::{Node, NodeConfig, PathTransform};
use tokio::io::AsyncReadExt;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single node, bootstrapping from the given peers.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:3000")]
        listen: SocketAddr,
        /// Peer addresses to dial on startup.
        #[arg(long, value_delimiter = ',')]
        bootstrap: Vec<SocketAddr>,
        /// Directory to store files under.
        #[arg(long, default_value = "driftnetwork-data")]
        root: PathBuf,
        /// Hex-encoded 32-byte AES key shared by the whole network. Generated
        /// randomly if left unset -- only useful for a single-node demo.
        #[arg(long)]
        key: Option<String>,
    },
    /// Seeds a three-node topology and runs the store -> delete-local ->
    /// fetch-from-peer round trip.
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Serve { listen, bootstrap, root, key } => run_serve(listen, bootstrap, root, key).await,
        Commands::Demo => run_demo().await,
    }
}

async fn run_serve(
    listen_addr: SocketAddr,
    bootstrap_nodes: Vec<SocketAddr>,
    storage_root: PathBuf,
    key_hex: Option<String>,
) -> anyhow::Result<()> {
    let encryption_key = match key_hex {
        Some(hex_key) => {
            let bytes = hex::decode(hex_key)?;
            bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("key must decode to exactly 32 bytes"))?
        }
        None => {
            let key = generate_encryption_key();
            tracing::warn!(key = %hex::encode(key), "no --key given, generated an ephemeral one");
            key
        }
    };

    let config = NodeConfig {
        listen_addr,
        encryption_key,
        storage_root,
        path_transform: PathTransform::ContentAddressed,
        bootstrap_nodes,
        node_id: Some(generate_node_id()),
    };
    let node = Node::new(config)?;
    tracing::info!(id = %node.id, addr = %listen_addr, "starting node");

    let shutdown_node = node.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received ctrl-c, shutting down");
        shutdown_node.shutdown();
    });

    node.start().await
}

async fn run_demo() -> anyhow::Result<()> {
    let key = generate_encryption_key();
    let root = tempfile::tempdir()?;

    let addr_a = reserve_addr().await?;
    let addr_b = reserve_addr().await?;
    let addr_c = reserve_addr().await?;

    let node_a = spawn_node("node-a", addr_a, Vec::new(), &key, root.path().join("a"))?;
    let node_b = spawn_node("node-b", addr_b, vec![addr_a], &key, root.path().join("b"))?;
    let node_c = spawn_node("node-c", addr_c, vec![addr_a, addr_b], &key, root.path().join("c"))?;

    for node in [&node_a, &node_b, &node_c] {
        let n = node.clone();
        tokio::spawn(async move {
            let _ = n.start().await;
        });
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    println!(
        "topology ready: A({} peers) B({} peers) C({} peers)",
        node_a.peer_count(),
        node_b.peer_count(),
        node_c.peer_count()
    );

    println!("storing \"pic_0.png\" on node A (replicates to B and C)...");
    node_a.store(b"pic_0.png", std::io::Cursor::new(b"hello".to_vec())).await?;
    tokio::time::sleep(Duration::from_millis(150)).await;

    println!("deleting the local copy on node A...");
    node_a.delete_local(b"pic_0.png").await?;

    println!("fetching \"pic_0.png\" back on node A from the network...");
    let (size, mut file) = node_a.get(b"pic_0.png").await?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).await?;
    println!("recovered {size} bytes from a peer: {contents:?}");

    node_a.shutdown();
    node_b.shutdown();
    node_c.shutdown();
    Ok(())
}

fn spawn_node(
    label: &str,
    listen_addr: SocketAddr,
    bootstrap_nodes: Vec<SocketAddr>,
    key: &[u8; driftnetwork::crypto::KEY_LEN],
    storage_root: PathBuf,
) -> anyhow::Result<std::sync::Arc<Node>> {
    let config = NodeConfig {
        listen_addr,
        encryption_key: *key,
        storage_root,
        path_transform: PathTransform::ContentAddressed,
        bootstrap_nodes,
        node_id: Some(label.to_string()),
    };
    Ok(Node::new(config)?)
}

async fn reserve_addr() -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?)
}
