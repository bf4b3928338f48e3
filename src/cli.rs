//! Interface de linha de comando baseada em clap.
//!
//! Os comandos de estágio recebem uma URL de objeto e executam um único
//! estágio; os comandos `dispatch-*` enfileiram jobs para tudo que aguarda
//! em um estágio.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::object::ObjectId;

/// Moves cold data through restore, archive and purge.
#[derive(Debug, Parser)]
#[command(name = "mothball-pipeline", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file [default: mothball.toml if present].
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Request restores for every cold object under the URL.
    Restore {
        /// Object to process, as s3://<container>/<path>.
        object: ObjectId,
    },

    /// Package the object's data with the archiving tool.
    Archive { object: ObjectId },

    /// Delete the originals of an archived object.
    Purge { object: ObjectId },

    /// Queue restore jobs for objects waiting in the restore stage.
    DispatchRestore(DispatchArgs),

    /// Queue archive jobs for objects whose restore has settled.
    DispatchArchive(DispatchArgs),

    /// Queue purge jobs for archived objects.
    DispatchPurge(DispatchArgs),

    /// Show how many objects sit in each stage.
    Status,
}

#[derive(Debug, Args)]
pub struct DispatchArgs {
    /// Batch queue to submit to.
    pub queue: String,

    /// Job definition the submitted jobs use.
    pub job_definition: String,

    /// Maximum number of jobs to submit; 0 submits everything eligible.
    #[arg(long, default_value_t = 1)]
    pub limit: usize,
}
