use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "control-escolar")]
#[command(author, version, about = "School management database administration")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending migrations
    Migrate {
        /// Run the *.sql files of this directory instead of the built-in set
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// List migrations and whether they have been applied
    Status {
        /// Directory of *.sql migrations to list instead of the built-in set
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that every expected table and column exists
    Verify,

    /// Open every database role and show where each connection came from
    Connections {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a user account
    CreateUser {
        #[arg(long)]
        email: String,

        #[arg(long)]
        name: String,

        /// admin, teacher or student
        #[arg(long, default_value = "student")]
        role: String,

        /// Password; a temporary one is generated and printed when omitted
        #[arg(long)]
        password: Option<String>,
    },

    /// Generate a bcrypt password hash
    HashPassword {
        /// Password to hash
        password: String,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
