//! `fatbootd`: a read-only TFTP server feeding boot files to
//! single-board computers straight out of FAT partitions inside disk
//! images, without mounting anything.

use anyhow::{Context, bail};
use clap::Parser;
use fatboot_tftp::{Board, BootHandler, TftpServer};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Arguments {
    /// The address on which to listen for connections
    #[arg(long, default_value = "::")]
    listen: String,

    /// The port on which to listen for connections
    #[arg(long, default_value_t = 69)]
    port: u16,

    /// Defines a board to serve a boot image to over TFTP; can be given
    /// multiple times. If PART is omitted the default is 1; if IP is
    /// omitted the client address is not checked.
    #[arg(long = "board", value_name = "SERIAL,FILENAME[,PART[,IP]]", value_parser = parse_board)]
    boards: Vec<Board>,
}

fn parse_board(spec: &str) -> Result<Board, String> {
    Board::from_spec(spec)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Arguments::parse();
    if args.boards.is_empty() {
        bail!("no boards defined");
    }

    let handler = BootHandler::new(args.boards);
    let server = TftpServer::bind((args.listen.as_str(), args.port), handler)
        .with_context(|| format!("binding [{}]:{}", args.listen, args.port))?;
    tracing::info!("ready on {}", server.local_addr()?);
    server.serve_forever()?;
    Ok(())
}
