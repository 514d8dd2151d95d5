//! rteval submission-queue parser daemon.
//!
//! Polls the submission queue table for notifications about new inserts and
//! hands each submission to a pool of worker threads that transform the
//! submitted XML into a persisted report plus database rows.

use clap::Parser;

mod cli;
mod core;
mod pidfile;
mod signals;
mod xslt;

fn main() {
    let options = cli::Cli::parse();
    std::process::exit(core::run(options));
}
