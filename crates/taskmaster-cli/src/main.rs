use std::process::ExitCode;

fn main() -> ExitCode {
    match taskmaster_core::run(std::env::args_os().collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("taskmaster: {err:#}");
            ExitCode::FAILURE
        }
    }
}
