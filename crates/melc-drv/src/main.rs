use clap::Parser;
use melc_drv::Options;
use std::io::Read;

fn main() {
    let args = melc_drv::normalize_args(std::env::args());
    let opts = Options::parse_from(args);
    melc_drv::init_logging(&opts);

    let mut source = String::new();
    if let Err(e) = std::io::stdin().read_to_string(&mut source) {
        eprintln!("error: could not read standard input: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = melc_drv::run(&opts, &source) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
