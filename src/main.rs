use clap::Parser;
use log::{error, info};
use logtail::server::shutdown_signal;
use logtail::{Config, ControlServer, ServerLogger};
use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    let logger = match ServerLogger::init(&config.logger_config()) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("failed to open log file {}: {e}", config.log_file.display());
            return ExitCode::FAILURE;
        }
    };
    info!(
        "starting control server log_level={} port={} log_file={}",
        config.log_level,
        config.control_server_port,
        config.log_file.display()
    );

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.control_server_port));
    let code = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            let server = ControlServer::new(&config.log_file);
            match server
                .serve(listener, shutdown_signal(), config.shutdown_grace())
                .await
            {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!("control server failed: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            ExitCode::FAILURE
        }
    };

    if let Err(e) = logger.shutdown() {
        eprintln!("failed to close log file: {e}");
    }
    code
}
