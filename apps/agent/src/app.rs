//! Application orchestrator: wires the frame server, controller and
//! directory producer together.

use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Context;
use framecast_server::{ConnectionPolicy, FrameServer, ServerConfig, StreamMode};
use framecast_streamer::{ControllerConfig, StreamingController, StreamingEvent};
use tokio::sync::broadcast::error::RecvError;

use crate::config::Config;
use crate::producer::DirectoryProducer;

/// Runs the agent until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let controller = build_controller(&config)?;

    let mut events = controller.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(StreamingEvent::Started { addr }) => {
                    tracing::info!(%addr, "MJPEG stream available at http://{addr}/");
                }
                Ok(StreamingEvent::Stopped) => tracing::info!("MJPEG stream stopped"),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    if config.auto_start {
        controller
            .start_server()
            .await
            .context("failed to start frame server")?;
    } else {
        tracing::info!("auto_start disabled, frame server idle");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("SIGINT received, shutting down");

    controller.stop_server().await;
    drop(controller);
    let _ = event_log.await;

    Ok(())
}

fn build_controller(config: &Config) -> anyhow::Result<StreamingController> {
    let bind_address: IpAddr = config
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind_address {:?}", config.bind_address))?;

    let policy = if config.concurrent_connections {
        ConnectionPolicy::Concurrent
    } else {
        ConnectionPolicy::Sequential
    };
    let server = Arc::new(FrameServer::new(ServerConfig {
        bind_address,
        policy,
        ..ServerConfig::default()
    }));

    let mode = if config.single_frame {
        StreamMode::SingleFrame
    } else {
        StreamMode::Continuous
    };
    let producer = DirectoryProducer::new(&config.frames_dir, config.frame_rate);

    Ok(StreamingController::new(
        server,
        producer,
        ControllerConfig {
            server_port: config.server_port,
            mode,
            ..ControllerConfig::default()
        },
    ))
}
