use clap::Parser;

fn main() {
    let cli = gatingctl::Cli::parse();
    if let Err(err) = gatingctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
