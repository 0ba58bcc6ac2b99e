//! Minimal interactive host: one device, one configured peer, commands on
//! stdin (`call`, `accept`, `reject`, `end`, `mute`, `video`, `quit`).

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use relaycall::call_engine::{StaticRtpMedia, WebRtcTransportFactory};
use relaycall::signaling::{FirebaseRelayStore, SessionRecord};
use relaycall::{CallClient, CallConfig, CallEvent};

#[tokio::main]
async fn main() -> Result<()> {
    relaycall::init_tracing();

    let mut args = std::env::args().skip(1);
    let database_url = args
        .next()
        .context("usage: relaycall <database-url> <device-id> <peer-id>")?;
    let device_id = args.next().context("missing device id")?;
    let peer_id = args.next().context("missing peer id")?;

    let client = CallClient::new(
        CallConfig::new(device_id, peer_id),
        Arc::new(FirebaseRelayStore::new(database_url)),
        Arc::new(WebRtcTransportFactory::new()),
        Arc::new(StaticRtpMedia::new("relaycall")),
    );

    // Latest unanswered incoming call, consumed by `accept` / `reject`.
    let pending: Arc<Mutex<Option<(String, SessionRecord)>>> = Arc::new(Mutex::new(None));

    let mut events = client.subscribe();
    Arc::clone(&client).run().await?;

    let pending_writer = Arc::clone(&pending);
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                CallEvent::IncomingCall { session_id, record } => {
                    println!("incoming call {} from {}", session_id, record.caller);
                    *pending_writer.lock() = Some((session_id, record));
                }
                CallEvent::Connected { session_id } => println!("connected: {}", session_id),
                CallEvent::Ended { session_id, reason } => {
                    println!("ended: {} ({:?})", session_id, reason)
                }
                other => tracing::debug!("event: {:?}", other),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "call" => match client.start_call().await {
                Ok(session_id) => println!("calling ({})", session_id),
                Err(err) => println!("call failed: {}", err),
            },
            "accept" => {
                let taken = pending.lock().take();
                match taken {
                    Some((session_id, record)) => {
                        if let Err(err) = client.accept_call(&session_id, &record).await {
                            println!("accept failed: {}", err);
                        }
                    }
                    None => println!("no pending call"),
                }
            }
            "reject" => {
                let taken = pending.lock().take();
                match taken {
                    Some((session_id, _)) => {
                        if let Err(err) = client.reject_call(&session_id).await {
                            println!("reject failed: {}", err);
                        }
                    }
                    None => println!("no pending call"),
                }
            }
            "end" => client.end_call().await,
            "mute" => println!("audio enabled: {}", client.toggle_audio()),
            "video" => println!("video enabled: {}", client.toggle_video()),
            "quit" => break,
            "" => {}
            other => println!("unknown command: {}", other),
        }
    }

    client.end_call().await;
    Ok(())
}
