use clap::Parser;

use lstags::cli::{Options, Runner};

#[tokio::main]
async fn main() {
    let options = Options::parse();

    let exit_code = match Runner::new(options) {
        Ok(mut runner) => runner.run().await,
        Err(err) => {
            eprintln!("{}", err);
            1
        }
    };

    std::process::exit(exit_code);
}
