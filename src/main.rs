use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use popsub_client::config::{Settings, load_config};
use popsub_client::utils::logging;
use popsub_client::{BoxError, MemoryConnection};
use tracing::{info, warn};

const BURST: usize = 100;

fn main() -> Result<(), BoxError> {
    let (settings, config_error) = match load_config() {
        Ok(settings) => (settings, None),
        Err(err) => (Settings::default(), Some(err)),
    };
    logging::init(&settings.client.log_level);
    if let Some(err) = config_error {
        warn!(error = %err, "failed to load configuration, using defaults");
    }

    let conn = MemoryConnection::with_settings(settings);

    let counted = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = mpsc::channel();
    let dispatcher = {
        let counted = Arc::clone(&counted);
        conn.create_dispatcher(move |msg| {
            if msg.subject == "demo.done" {
                done_tx.send(())?;
            } else {
                counted.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })?
    };
    dispatcher.subscribe("demo.events")?;
    dispatcher.subscribe("demo.done")?;

    let audit = conn.subscribe("demo.>")?;

    for i in 0..BURST {
        conn.publish("demo.events", format!("event {i}"))?;
    }
    conn.publish("demo.done", "")?;

    done_rx.recv_timeout(Duration::from_secs(5))?;

    let mut audited = 0;
    while audit.next_message(Some(Duration::ZERO)).is_ok() {
        audited += 1;
    }

    let stats = conn.statistics();
    info!(
        dispatched = counted.load(Ordering::SeqCst),
        audited,
        routed = stats.routed,
        dropped = stats.dropped,
        "demo finished"
    );

    conn.close();
    Ok(())
}
