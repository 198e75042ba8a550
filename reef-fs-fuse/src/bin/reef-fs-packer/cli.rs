use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Disk image to operate on
    #[arg(long, short)]
    pub image: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the image and format a fresh filesystem onto it
    Format {
        /// Image size in sectors
        #[arg(long, default_value_t = 16384)]
        sectors: u32,
    },
    /// Copy host files into the image's root directory
    Put {
        /// Host files to import
        sources: Vec<PathBuf>,
    },
    /// List a directory inside the image
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print a file from the image to stdout
    Cat { path: String },
}
