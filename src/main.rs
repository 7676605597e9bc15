/// Entry point for envprobe.
///
/// Probes the environment once and prints a timestamped report to stdout. Diagnostic logging
/// goes to stderr and is controlled through `RUST_LOG`.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the report cannot be written.
///
/// # Examples
///
/// ```bash
/// RUST_LOG=debug ENVPROBE_ROOTFS=/rootfs envprobe
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let vars: std::collections::HashMap<String, String> = std::env::vars().collect();
    let config = envprobe::config::Config::from_vars(&vars)?;
    log::debug!("Configuration: {config:?}");

    let mut stdout = std::io::stdout().lock();
    envprobe::run(&config, vars, &mut stdout).await?;
    Ok(())
}
