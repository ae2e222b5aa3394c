use clap::Parser;
use std::process::ExitCode;
use xchat::cli::{self, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    xchat::init_tracing();
    let cli = Cli::parse();

    let (output, code) = match cli::run(cli).await {
        Ok(output) => (output, ExitCode::SUCCESS),
        Err(err) => (err.to_json(), ExitCode::FAILURE),
    };
    match serde_json::to_string_pretty(&output) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", output),
    }
    code
}
