//! Vital-sign subscriber.
//!
//! Connects to a broadcast server (or, with `--local`, runs the generator
//! in-process and feeds it straight into the listeners) and logs what it
//! receives: every alarm and error as it arrives, and a per-type count every
//! few seconds.

use anyhow::Result;
use lib_vitals::generator::Generator;
use lib_vitals::transport::{LoopbackTransport, WsTransport};
use lib_vitals::{listener, Envelope, MessageKind, VitalsClient};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::interval;

mod vitals_logic;
use vitals_logic::{config, logger, shutdown};

const REPORT_PERIOD: Duration = Duration::from_secs(5);

type Counters = Arc<Mutex<BTreeMap<MessageKind, u64>>>;

fn register_listeners(client: &VitalsClient) -> Counters {
    let counters: Counters = Arc::new(Mutex::new(BTreeMap::new()));

    for kind in MessageKind::TELEMETRY {
        let counters = Arc::clone(&counters);
        client.on(kind.as_str(), listener(move |envelope: &Envelope| {
            if let Ok(mut counts) = counters.lock() {
                *counts.entry(envelope.kind()).or_default() += 1;
            }
            Ok(())
        }));
    }

    client.on_message(MessageKind::Alarm.as_str(), |envelope| {
        if let Envelope::Alarm(alarm) = envelope {
            log::warn!(
                "ALARM {} ({}) for {}: {:.0}s over {:.0}s threshold",
                alarm.code, alarm.alarm_type, alarm.user_id, alarm.duration_s, alarm.threshold_s
            );
        }
        Ok(())
    });
    client.on_message(MessageKind::AlarmClear.as_str(), |envelope| {
        if let Envelope::AlarmClear(alarm) = envelope {
            log::info!("Alarm {} cleared for {}", alarm.code, alarm.user_id);
        }
        Ok(())
    });
    client.on_message(MessageKind::Error.as_str(), |envelope| {
        if let Envelope::Error(error) = envelope {
            log::error!("Error from {}: {}", error.origin, error.msg);
        }
        Ok(())
    });
    client.on(MessageKind::Subscribed.as_str(), listener(|envelope| {
        if let Envelope::Subscribed(ack) = envelope {
            log::info!("Subscribed to {:?}", ack.channels);
        }
        Ok(())
    }));

    counters
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = config::load_config()?;
    logger::setup_logging(&settings.log_dir, &settings.log_level, "vitals_client")?;

    let mut generator = None;
    let client = if settings.local {
        log::info!("Running in local mode, no server connection");
        let client = Arc::new(VitalsClient::new("local://", LoopbackTransport::new()));
        generator = Some(Generator::new(settings.generator.clone(), client.normalizer()));
        client
    } else {
        Arc::new(VitalsClient::new(settings.ws_url.as_str(), WsTransport::new()))
    };

    let counters = register_listeners(&client);

    if let Some(generator) = &generator {
        generator.start();
    } else {
        // Ask for the telemetry channels every time the connection comes up
        let mut connected = client.watch_connected();
        let subscriber = Arc::clone(&client);
        tokio::spawn(async move {
            while connected.changed().await.is_ok() {
                if *connected.borrow_and_update() {
                    subscriber.subscribe(MessageKind::TELEMETRY.map(MessageKind::as_str));
                }
            }
        });
        client.connect();
    }

    let mut report = interval(REPORT_PERIOD);
    report.tick().await;
    let reporter = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            loop {
                report.tick().await;
                let counts = counters.lock().map(|c| c.clone()).unwrap_or_default();
                log::info!(
                    "subject={} connected={} recorded={} counts={:?}",
                    client.subject(),
                    client.is_connected(),
                    client.messages().len(),
                    counts
                );
                client.clear_messages();
            }
        })
    };

    shutdown::wait_for_signal().await;

    reporter.abort();
    if let Some(generator) = &generator {
        generator.stop();
    }
    client.shutdown().await;

    log::info!("Shutdown complete.");
    Ok(())
}
