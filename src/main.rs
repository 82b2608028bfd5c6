fn main() -> std::process::ExitCode {
    match docia_lib::run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Fatal startup error");
            eprintln!("docia: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}
