use tracing::{error, info};

fn main() {
    gateway_core::init_logging(true);
    info!(event = "gateway.start_started");

    let exit_code = match run() {
        Ok(()) => {
            info!(event = "gateway.start_completed");
            0
        }
        Err(e) => {
            error!(event = "gateway.start_failed", error = %e);
            eprintln!("gatewayd: {e}");
            1
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = gateway_server::GatewayConfig::load(&args).map_err(|e| {
        error!(event = "gateway.config_load_failed", error = %e);
        e
    })?;

    let rt = tokio::runtime::Runtime::new().map_err(|e| {
        error!(event = "gateway.runtime_init_failed", error = %e);
        e
    })?;

    rt.block_on(async {
        gateway_server::run(config).await.map_err(|e| {
            error!(event = "gateway.server_failed", error = %e);
            e
        })
    })?;

    Ok(())
}
