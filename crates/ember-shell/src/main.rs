use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use ember_core::{ChannelTransport, Config, ConversationChanged, Ember};
use ember_types::api::RegisterRequest;
use ember_types::events::TransportEvent;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ember=debug".into()),
        )
        .init();

    // Config
    let config = Config::from_env()?;
    info!("Opening store in {}", config.data_dir.display());

    let (transport, mut outbound) = ChannelTransport::new();
    let ember = Ember::open_in_dir(config, Arc::new(transport))?;

    // Nothing is connected on the other end; log what would go out.
    tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            debug!("Outbound {} to {}", payload.id, payload.contact_id);
        }
    });

    if let Ok(secret) = std::env::var("EMBER_SECRET") {
        unlock(&ember, &secret).await?;
    } else {
        warn!("EMBER_SECRET not set; new content is stored unencrypted");
    }

    let mut changes = ember.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut applied = 0usize;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: TransportEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping malformed event: {}", e);
                continue;
            }
        };

        match ember.reconciler().apply(event) {
            Ok(outcome) => {
                debug!("Applied {:?}", outcome);
                applied += 1;
            }
            Err(e) => warn!("Failed to apply event: {}", e),
        }

        print_touched(&ember, &mut changes);
    }

    ember.flush()?;
    info!("Applied {} events", applied);
    Ok(())
}

/// Register on first run, then derive the session key.
async fn unlock(ember: &Ember, secret: &str) -> anyhow::Result<()> {
    if ember.accounts().profile()?.is_none() {
        let display_name = std::env::var("EMBER_DISPLAY_NAME").unwrap_or_else(|_| "operator".into());
        let profile = ember.accounts().register(RegisterRequest {
            display_name,
            secret: secret.to_string(),
            ..Default::default()
        })?;
        info!("Registered {}", profile.display_name);
    }

    ember.login(secret).await?;
    Ok(())
}

fn print_touched(ember: &Ember, changes: &mut broadcast::Receiver<ConversationChanged>) {
    let mut touched = BTreeSet::new();
    loop {
        match changes.try_recv() {
            Ok(change) => {
                touched.insert(change.contact_id);
            }
            Err(TryRecvError::Lagged(skipped)) => warn!("Missed {} change notifications", skipped),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }

    for contact_id in touched {
        match ember.get_conversation(&contact_id) {
            Ok(messages) => {
                println!("== {} ({} messages)", contact_id, messages.len());
                for m in messages {
                    println!("{} [{}] {}: {}", m.timestamp, m.state, m.role, m.content);
                }
            }
            Err(e) => warn!("Cannot read {}: {}", contact_id, e),
        }
    }
}
