use futures::FutureExt;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use mpd_connector::{Connector, ConnectorConfig, ConnectorEvent, ConnectorHooks, Subsystem};

// Hooks run on the connector's dispatcher task, one at a time
struct PrintHooks;

impl ConnectorHooks for PrintHooks {
    fn on_connected(&self) {
        println!("Connected");
    }

    fn on_subsystem_changed(&self, subsystem: Subsystem) {
        println!(
            "{} changed, refresh {:?}",
            subsystem,
            subsystem.refresh_target()
        );
    }
}

/// Connects to the MPD server named by MPD_HOST / MPD_PORT (or a .env file),
/// prints changes and playback progress, and stops on Ctrl-C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ConnectorConfig::from_env();
    println!("Connecting to {}", config.address());

    let connector = Connector::new(config, Arc::new(PrintHooks));
    let mut events = connector.event_receiver();
    connector.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ConnectorEvent::Connected) => {
                    println!("Playlists: {:?}", connector.playlists().await);
                    let queue = connector
                        .with_session(|session| async move { session.queue().await }.boxed())
                        .await;
                    if let Some(Ok(songs)) = queue {
                        for song in songs {
                            println!("  {}", song.display_title());
                        }
                    }
                }
                Ok(ConnectorEvent::Heartbeat) => {
                    let status = connector.status();
                    println!(
                        "[{}] {:.1}%",
                        status.player_state().as_str(),
                        status.progress_percentage()
                    );
                }
                Ok(ConnectorEvent::Disconnected) => println!("Connection lost, retrying"),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    }

    connector.stop().await?;
    Ok(())
}
