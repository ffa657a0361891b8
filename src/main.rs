//! Consultancy CMS - binary entry point
//! Delegates to the library for all app logic.

#[tokio::main]
async fn main() -> std::process::ExitCode {
    match consultancy_cms::run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Fatal: {}", e);
            eprintln!("Fatal: {}", e);
            std::process::ExitCode::FAILURE
        }
    }
}
