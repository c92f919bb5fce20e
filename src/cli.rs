use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the web interface.
    Serve {
        /// Address to listen on. Overrides `server.bind` in config.yaml
        #[clap(short, long)]
        addr: Option<String>,
    },
    /// Recommend places for a free-text description and print them as json
    Search {
        /// What you are looking for, e.g. "quiet cafe with good coffee"
        query: String,

        /// Minimum similarity (0.0 - 1.0)
        #[clap(short, long)]
        min_similarity: Option<f32>,

        /// Number of places to return
        #[clap(short = 'n', long)]
        max_results: Option<usize>,

        /// Skip geocoding and only rank
        #[clap(long, default_value = "false")]
        no_geocode: bool,
    },
    /// Look up coordinates of a single place
    Geocode {
        /// Place name
        name: String,

        /// Street address
        address: String,
    },
    /// Print catalog and embedding model info
    Inspect {},
}
