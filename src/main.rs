use mqweather::shutdown::{wait_for_termination, DISCONNECT_GRACE};
use mqweather::{Config, MqttBroker, PublishLoop, WundergroundClient};
use tokio::sync::watch;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config);

    info!(station = %config.station, "starting mqweather");

    let broker = MqttBroker::connect(&config.broker, &config.client_id());
    let fetcher = WundergroundClient::new(&config.provider)?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let publish_loop = PublishLoop::new(
        fetcher,
        broker.publisher(),
        config.station.clone(),
        config.interval,
    );
    let _loop_handle = publish_loop.spawn(stop_rx);

    let signal = wait_for_termination().await?;
    info!(signal, "shutting down");

    // The loop may already have exited; nothing to tell it then
    let _ = stop_tx.send(true);
    broker.disconnect(DISCONNECT_GRACE).await;

    Ok(())
}

fn init_tracing(config: &Config) {
    let level = if config.debug {
        Level::TRACE
    } else if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(config.debug)
        .with_file(config.debug)
        .with_line_number(config.debug)
        .init();
}
