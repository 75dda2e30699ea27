use anyhow::Context;
use clap::Parser;
use log::info;
use std::thread;
use std::time::Duration;
use volume_server::{MockTcpServer, MockUdpServer, SharedMixer};

#[derive(Parser, Debug)]
#[command(name = "mock_volume_server")]
#[command(about = "Mock volume control server speaking the TCP and UDP protocols")]
struct Args {
    /// Address to bind both servers to
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// TCP port (0 picks a free one)
    #[arg(long, default_value = "4000")]
    tcp_port: u16,

    /// UDP port (0 picks a free one)
    #[arg(long, default_value = "4000")]
    udp_port: u16,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    info!("🚀 Starting mock volume server with args: {:?}", args);

    let mixer = SharedMixer::new();
    let tcp = MockTcpServer::new(mixer.clone())
        .start_background(&format!("{}:{}", args.bind, args.tcp_port))
        .context("Failed to start TCP server")?;
    let udp = MockUdpServer::new(mixer)
        .start_background(&format!("{}:{}", args.bind, args.udp_port))
        .context("Failed to start UDP server")?;

    info!("🎚️ Serving TCP on port {} and UDP on port {}", tcp.port, udp.port);

    // Both servers run until the process is killed
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}
