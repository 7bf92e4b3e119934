//! SFU server bootstrap

use crate::config::ServerConfig;
use tracing::info;
use voxshift_core::{Room, VoxResult, Worker};
use voxshift_signaling::SignalingServer;

/// Start the media worker, build the room and bind the signaling listener
///
/// The returned server is not yet accepting; call
/// [`SignalingServer::run`] on it.
pub async fn bind_server(config: &ServerConfig) -> VoxResult<SignalingServer> {
    config.validate()?;

    let worker = Worker::spawn(config.worker.clone()).await?;
    let router = worker.create_router(&config.media_codecs)?;
    let room = Room::new(router, config.room.clone());
    info!(
        "Media worker {} ready (RTC ports {}-{})",
        worker.id(),
        config.worker.rtc_min_port,
        config.worker.rtc_max_port
    );

    let server = SignalingServer::bind(config.listen, room)
        .await?
        .with_engine_grace(config.engine_grace())
        .with_ice_servers(config.ice_servers.clone());
    Ok(server)
}
