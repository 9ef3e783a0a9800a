use std::process::ExitCode;

fn main() -> ExitCode {
    cloudpilot_cli::run()
}
