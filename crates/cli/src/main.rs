use std::process::ExitCode;

fn main() -> ExitCode {
    deferra_cli::run()
}
