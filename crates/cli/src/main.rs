use std::process::ExitCode;

fn main() -> ExitCode {
    jobflow_cli::run()
}
