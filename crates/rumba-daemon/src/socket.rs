use rumba_core::Controller;
use rumba_proto::protocol::{Broadcast, Command, Message, MAX_COMMAND_LEN, PROTOCOL_VERSION};
use rumba_proto::{Event, Notification};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub fn start_server(
    bind_address: String,
    port: u16,
    ctl: Arc<Controller>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);
        serve(listener, ctl).await;
    })
}

/// Accept devices until the controller shuts down.
pub async fn serve(listener: TcpListener, ctl: Arc<Controller>) {
    let token = ctl.cancellation_token();
    let mut client_id = 0usize;

    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                info!("Client {} connected from {}", id, peer);

                let ctl = ctl.clone();
                tokio::spawn(async move {
                    handle_client(stream, ctl, id).await;
                    info!("Client {} disconnected", id);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
    debug!("TCP server stopped");
}

async fn handle_client(stream: TcpStream, ctl: Arc<Controller>, client_id: usize) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    let bus = ctl.bus().clone();
    let (sub_id, mut events) = bus.subscribe_channel(&format!("socket-{}", client_id));

    // Events up to `hello_seq` may already be reflected in the snapshot;
    // later ones are sent even if the snapshot caught them too.
    let hello_seq = bus.last_seq();
    let hello = Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        seq: hello_seq,
        state: ctl.snapshot().await,
    };
    if send(&mut write_half, hello).await.is_err() {
        bus.unsubscribe(sub_id);
        return;
    }

    // every input runs as its own task so the busy gate can drop repeats
    // and a pending ask can be answered from the same device
    let mut inputs = JoinSet::new();

    'client: loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        while let Some(len) = Message::frame_len(&read_buf) {
                            if len > MAX_COMMAND_LEN {
                                warn!("Client {} announced a {} byte frame, disconnecting", client_id, len);
                                break 'client;
                            }
                            if read_buf.len() < 4 + len {
                                break;
                            }
                            let decoded = Message::decode(&read_buf);
                            read_buf.drain(..4 + len);
                            match decoded {
                                Ok((Message::Command(cmd), _)) => {
                                    debug!("Client {} sent command: {:?}", client_id, cmd);
                                    match cmd {
                                        Command::Input { action, value } => {
                                            let ctl = ctl.clone();
                                            inputs.spawn(async move { ctl.on_input(&action, value).await });
                                        }
                                        Command::GetState => {
                                            let state = Broadcast::State { data: ctl.snapshot().await };
                                            if send(&mut write_half, state).await.is_err() {
                                                break 'client;
                                            }
                                        }
                                    }
                                }
                                Ok(_) => {}
                                Err(e) => warn!("Client {} sent a malformed frame: {}", client_id, e),
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            notification = events.recv() => {
                let Some(notification) = notification else { break };
                if notification.seq <= hello_seq {
                    continue;
                }
                if forward(&mut write_half, &notification).await.is_err() {
                    break;
                }
                if notification.event == Event::Shutdown {
                    break;
                }
            }

            Some(_) = inputs.join_next(), if !inputs.is_empty() => {}
        }
    }

    bus.unsubscribe(sub_id);
    // inputs already started still finish
    while inputs.join_next().await.is_some() {}
}

async fn forward(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    notification: &Notification,
) -> anyhow::Result<()> {
    let frame = Broadcast::Event {
        seq: notification.seq,
        event: notification.event.clone(),
    };
    send(write_half, frame).await
}

async fn send(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    broadcast: Broadcast,
) -> anyhow::Result<()> {
    let encoded = Message::Broadcast(broadcast).encode()?;
    if let Err(e) = write_half.write_all(&encoded).await {
        warn!("Write to client failed: {}", e);
        return Err(e.into());
    }
    Ok(())
}
