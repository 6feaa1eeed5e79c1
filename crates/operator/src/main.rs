// CLI modules
mod cli;

use clap::{Parser, Subcommand};
use cli::{args::Args, op::Op, Crds, Lookup, Run, Version};

command_enum! {
    (Crds, Crds),
    (Lookup, Lookup),
    (Run, Run),
    (Version, Version),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let overrides = args.overrides();

    let ctx = match cli::op::OpContext::new(args.config_path, overrides) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
