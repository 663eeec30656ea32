use anyhow::Result;
use std::{sync::Arc, time::Duration};
use xrelay::{
    broadcast::{FlvBroadcaster, HlsBroadcaster},
    config::{self, ChannelKind},
    logger,
    server::{AppContext, Service},
};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const HARD_DEADLINE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let settings = config::get_setting();
    logger::init(&settings.common.log)?;

    let ctx = Arc::new(AppContext::new(&settings));

    for channel in &settings.live.channels {
        match channel.kind {
            ChannelKind::Flv => {
                let broadcaster = FlvBroadcaster::spawn(&channel.key, &channel.upstream);
                ctx.flv.add(&channel.key, broadcaster)?;
            }
            ChannelKind::Hls => {
                let broadcaster = HlsBroadcaster::spawn(
                    &channel.key,
                    &channel.upstream,
                    &channel.variant,
                    settings.live.hls_buffer,
                );
                ctx.hls.add(&channel.key, broadcaster)?;
            }
        }
        log::info!("channel {} provisioned from config", channel.key);
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let service = Service::new(ctx.clone());
    let port = settings.http.port;
    let mut server_task = tokio::spawn(async move {
        if let Err(e) = service
            .run(port, async {
                let _ = shutdown_rx.await;
            })
            .await
        {
            log::error!("HTTP server error: {}", e);
        }
    });

    wait_for_shutdown_signal().await;
    log::info!("shutdown signal received");

    let _ = shutdown_tx.send(());
    let shutdown_seq = async {
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut server_task)
            .await
            .is_err()
        {
            log::warn!("HTTP drain exceeded {:?}, aborting server", DRAIN_TIMEOUT);
            server_task.abort();
        }
        ctx.shutdown_broadcasters();
        // let subscriber write loops observe the close
        tokio::time::sleep(Duration::from_millis(200)).await;
    };
    let _ = tokio::time::timeout(HARD_DEADLINE, shutdown_seq).await;

    log::info!("relay stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).ok();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = async {
                match term.as_mut() {
                    Some(term) => {
                        term.recv().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
