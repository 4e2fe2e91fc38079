use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::AbortHandle;
use yard_codec::channel::ControlChannel;
use yard_registry::{ClientRegistry, ConnId};

use crate::config::Config;
use crate::dispatch::{self, Deps, Outcome, Request};
use crate::monitor::Monitor;
use crate::rendezvous::Rendezvous;

/// Accept loop plus UDP rendezvous loop, matching the one-task-per-stream
/// layout of the control-accept/UDP-receive singletons.
pub async fn run(config: Arc<Config>) -> anyhow::Result<()> {
    let registry = Arc::new(ClientRegistry::new(config.server.id_len));
    let rendezvous = Rendezvous::new(Duration::from_secs(config.server.rendezvous_timeout_secs));
    let monitor = Arc::new(Monitor::new());

    let deps = Arc::new(Deps {
        registry,
        rendezvous: rendezvous.clone(),
        monitor,
        config: config.clone(),
    });

    let bind_host = if config.server.hostname.is_empty() {
        "0.0.0.0".to_string()
    } else {
        config.server.hostname.clone()
    };
    let bind_addr = format!("{}:{}", bind_host, config.server.port);

    let tcp = TcpListener::bind(&bind_addr).await?;
    let udp = Arc::new(UdpSocket::bind(&bind_addr).await?);

    log::info!("control listener bound on {}", bind_addr);
    tokio::spawn(udp_loop(udp, rendezvous));

    let next_conn_id = Arc::new(AtomicU64::new(1));
    let connections: Arc<Mutex<HashMap<ConnId, AbortHandle>>> = Arc::new(Mutex::new(HashMap::new()));

    loop {
        let (stream, addr) = tcp.accept().await?;
        let _ = stream.set_nodelay(true);

        let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);
        let deps = deps.clone();
        let connections_for_task = connections.clone();

        let handle = tokio::spawn(async move {
            handle_connection(deps, conn_id, stream, addr, connections_for_task).await;
        });

        connections.lock().insert(conn_id, handle.abort_handle());
    }
}

async fn udp_loop(socket: Arc<UdpSocket>, rendezvous: Arc<Rendezvous>) {
    let mut buf = vec![0u8; 1024];
    loop {
        let (n, source) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("udp rendezvous recv failed: {}", e);
                continue;
            }
        };

        if let Ok(token) = std::str::from_utf8(&buf[..n]) {
            log::trace!("rendezvous token from {}", source);
            rendezvous.record(token.to_owned(), source);
        }
    }
}

async fn handle_connection(
    deps: Arc<Deps>,
    conn_id: ConnId,
    stream: TcpStream,
    addr: SocketAddr,
    connections: Arc<Mutex<HashMap<ConnId, AbortHandle>>>,
) {
    let channel = ControlChannel::new(stream);
    let mut current_client: Option<String> = None;

    loop {
        let frame = match channel.receive().await {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("control stream {} closed: {:?}", addr, e);
                break;
            }
        };

        if let Some(id) = &current_client {
            deps.monitor.record_in(id, frame.payload.len());
        }

        let access_code = frame.access_code;
        let request = Request {
            session: frame.session,
            typ: frame.typ,
            payload: frame.payload,
        };

        let outcome = dispatch::dispatch(&deps, conn_id, addr.ip(), &mut current_client, request).await;

        match outcome {
            Outcome::Reply(reply) => {
                if let Some(id) = &current_client {
                    deps.monitor.record_out(id, reply.payload.len());
                }

                if channel
                    .send(reply.session, reply.typ, access_code, &reply.payload)
                    .await
                    .is_err()
                {
                    break;
                }

                if let Some(displaced) = reply.displaced {
                    if let Some(handle) = connections.lock().remove(&displaced) {
                        handle.abort();
                    }
                }
            }
            Outcome::ReplyThenClose(reply) => {
                let _ = channel.send(reply.session, reply.typ, access_code, &reply.payload).await;
                break;
            }
            Outcome::Close => break,
        }
    }

    connections.lock().remove(&conn_id);
    if let Some(id) = current_client {
        deps.registry.mark_offline(&id);
        deps.monitor.remove(&id);
    }
}
