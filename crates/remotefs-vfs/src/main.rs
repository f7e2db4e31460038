//! rfs: browse a directory tree through the remotefs VFS layer

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use remotefs_vfs::local::LocalBackend;
use remotefs_vfs::{Fs, MountConfig, Node};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const READ_CHUNK: usize = 64 * 1024;

#[derive(Parser)]
#[command(name = "rfs")]
#[command(about = "Browse a backend through the remotefs VFS layer", long_about = None)]
struct Cli {
    /// TOML or JSON mount configuration
    #[arg(short, long, env = "RFS_CONFIG")]
    config: Option<PathBuf>,

    /// Directory served by the local backend, overrides the config file
    #[arg(short, long)]
    source: Option<PathBuf>,

    #[arg(long)]
    read_only: bool,

    #[arg(long)]
    no_seek: bool,

    #[arg(long)]
    no_checksum: bool,

    #[arg(long)]
    no_modtime: bool,

    /// Seconds a directory listing stays cached
    #[arg(long)]
    dir_cache_time: Option<f64>,

    /// Seconds between change polls, 0 disables polling
    #[arg(long)]
    poll_interval: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "")]
        path: String,
    },
    /// Show the metadata of one node
    Stat { path: String },
    /// Print the tree below a directory
    Tree {
        #[arg(default_value = "")]
        path: String,
        #[arg(short, long, default_value = "8")]
        depth: usize,
    },
    /// Write a file to stdout, verifying its checksum
    Cat { path: String },
}

impl Cli {
    fn mount_config(&self) -> Result<MountConfig> {
        let mut config = match &self.config {
            Some(path) => MountConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => MountConfig::default(),
        };

        if let Some(source) = &self.source {
            config.source = source.clone();
        }
        let opt = &mut config.options;
        opt.read_only |= self.read_only;
        opt.no_seek |= self.no_seek;
        opt.no_checksum |= self.no_checksum;
        opt.no_mod_time |= self.no_modtime;
        if let Some(secs) = self.dir_cache_time {
            opt.dir_cache_time = Duration::try_from_secs_f64(secs)
                .context("invalid --dir-cache-time")?;
        }
        if let Some(secs) = self.poll_interval {
            opt.poll_interval =
                Duration::try_from_secs_f64(secs).context("invalid --poll-interval")?;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.mount_config()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    tracing::info!("rfs: serving {}", config.source.display());

    let backend = LocalBackend::new(&config.source)
        .with_context(|| format!("opening {}", config.source.display()))?;
    let fs = Arc::new(Fs::new(Arc::new(backend), config.options));

    let command = cli.command;
    let worker = Arc::clone(&fs);
    tokio::task::spawn_blocking(move || run(&worker, command)).await??;

    tracing::debug!("rfs: cache stats {:?}", fs.cache_stats());
    Ok(())
}

fn run(fs: &Fs, command: Command) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match command {
        Command::Ls { path } => match fs.lookup(&path)? {
            Node::Dir(dir) => {
                for node in dir.read_dir_all()? {
                    writeln!(out, "{}", format_line(&node))?;
                }
            }
            file => writeln!(out, "{}", format_line(&file))?,
        },
        Command::Stat { path } => {
            let node = fs.lookup(&path)?;
            let meta = node.metadata();
            writeln!(out, "  Path: /{}", node.remote())?;
            writeln!(out, " Inode: {}", meta.inode)?;
            writeln!(out, "  Type: {}", if meta.is_dir { "directory" } else { "file" })?;
            writeln!(out, "  Size: {}", meta.size)?;
            writeln!(out, "  Mode: {:o}", meta.mode)?;
            writeln!(out, "Modify: {}", unix_secs(&node))?;
        }
        Command::Tree { path, depth } => {
            let node = fs.lookup(&path)?;
            writeln!(out, "{}", node)?;
            print_tree(&mut out, &node, 1, depth)?;
        }
        Command::Cat { path } => {
            let node = fs.lookup(&path)?;
            let file = node
                .as_file()
                .with_context(|| format!("{} is a directory", node))?;
            let handle = file.open_read()?;
            let mut offset = 0u64;
            loop {
                let chunk = handle.read_at(offset, READ_CHUNK)?;
                if chunk.is_empty() {
                    break;
                }
                out.write_all(&chunk)?;
                offset += chunk.len() as u64;
            }
            handle.release()?;
        }
    }
    out.flush()?;
    Ok(())
}

fn print_tree(out: &mut impl Write, node: &Node, level: usize, max_depth: usize) -> Result<()> {
    let Node::Dir(dir) = node else {
        return Ok(());
    };
    if level > max_depth {
        return Ok(());
    }
    for child in dir.read_dir_all()? {
        let suffix = if child.is_dir() { "/" } else { "" };
        writeln!(out, "{}{}{}", "  ".repeat(level), child.name(), suffix)?;
        print_tree(out, &child, level + 1, max_depth)?;
    }
    Ok(())
}

fn unix_secs(node: &Node) -> u64 {
    node.mod_time()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn format_line(node: &Node) -> String {
    let meta = node.metadata();
    let suffix = if meta.is_dir { "/" } else { "" };
    format!(
        "{:>8} {:>6o} {:>12} {:>12} {}{}",
        meta.inode,
        meta.mode & 0o7777,
        meta.size,
        unix_secs(node),
        meta.name,
        suffix
    )
}
