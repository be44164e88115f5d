#![allow(clippy::unwrap_used, clippy::expect_used)]
#![cfg(unix)]

use {
    switchboard_ipc::{CoordinatorClient, IpcServer, ServerEvent},
    switchboard_protocol::{ChannelStatusReply, ClientMessage, names},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
};

#[tokio::test]
async fn request_round_trip_over_unix_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run").join("coordinator.sock");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    // A leftover socket file from a crashed coordinator.
    std::fs::write(&path, b"").unwrap();

    let server = IpcServer::bind(&path).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let server_task = tokio::spawn(server.run(tx, cancel.clone()));

    // Minimal coordinator: answer channel status queries.
    let responder = tokio::spawn(async move {
        let mut handles = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                ServerEvent::Connected(handle) => handles.push(handle),
                ServerEvent::Message { from, envelope } => {
                    let msg = ClientMessage::from_envelope(&envelope).unwrap();
                    if let ClientMessage::CheckChannelStatus(q) = msg {
                        let handle = handles.iter().find(|h| h.id == from).unwrap();
                        handle.emit(
                            names::CALLBACK_CHECK_CHANNEL_STATUS,
                            &ChannelStatusReply::new(q.channel_id, true),
                        );
                    }
                },
                ServerEvent::Disconnected(_) => return,
            }
        }
    });

    let client = CoordinatorClient::connect(&path).await.unwrap();
    let reply = client.channel_status("c42").await.unwrap();
    assert_eq!(reply.channel_id, "c42");
    assert!(reply.is_disabled);
    assert!(!reply.is_enabled);

    drop(client);
    responder.await.unwrap();
    cancel.cancel();
    server_task.await.unwrap();
    assert!(!path.exists());
}
