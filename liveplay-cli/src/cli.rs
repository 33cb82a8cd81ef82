use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Parser, Debug)]
#[command(author, version, about = "Play a live HLS playlist into a fragmented MP4 file or pipe", long_about = None)]
pub struct Args {
    /// URL of the live media playlist (.m3u8)
    pub url: String,

    /// Output file, or `-` for stdout
    #[arg(short, long, default_value = "-")]
    pub output: String,

    /// Overall timeout for each HTTP request, in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Lower bound for the manifest poll interval, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 500)]
    pub min_poll_ms: u64,

    /// User-Agent header sent with every request
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Extra request header in `name:value` form (repeatable)
    #[arg(short = 'H', long = "header", value_name = "NAME:VALUE")]
    pub headers: Vec<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Output path, `None` for stdout.
    pub fn output_path(&self) -> Option<PathBuf> {
        (self.output != "-").then(|| PathBuf::from(&self.output))
    }
}
