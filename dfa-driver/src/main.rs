use std::process::ExitCode;

use clap::Parser;
use dfa_driver::Opt;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use utils::DiagnosticEmitter;

fn main() -> ExitCode {
    let opts = Opt::parse();
    let _ = TermLogger::init(
        opts.log_level(),
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );

    let mut diag = DiagnosticEmitter::new(Box::new(std::io::stdout()), Box::new(std::io::stderr()));
    let contents = std::fs::read_to_string(&opts.filename).expect("Failed to read input file.");

    if dfa_driver::process_source(&contents, &mut diag, &opts).is_none() {
        return ExitCode::from(1);
    }

    ExitCode::from(0)
}
