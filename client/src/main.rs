use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::net::{TcpStream, UdpSocket};

use yard_client::agent::{FAST_PING_INTERVAL, PingCadence, Routed, SignalingAgent};
use yard_client::config::Cli;
use yard_client::error::ClientError;
use yard_client::identity::Identity;
use yard_client::protocol::SubMessage;
use yard_client::transmission::PeerUdpAgent;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// State kept between issuing a CONN INIT (as the caller) and validating
/// the ACC it expects back.
struct PendingCall {
    pending_password: String,
    udp_pass: String,
}

fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    simple_logger::init_with_level(log::Level::Info)?;

    let identity = Identity::load_or_create(&cli.identity_file)?;
    log::info!("identity fingerprint: {}", identity.fingerprint);

    let stream = TcpStream::connect(&cli.server).await?;
    let agent = Arc::new(SignalingAgent::new(yard_codec::channel::ControlChannel::new(stream)));

    let (client_id, remote_ip) = agent.init(identity.fingerprint).await?;
    log::info!("initialized as {} (seen from {})", client_id, remote_ip);

    let cadence = Arc::new(PingCadence::default());
    let pending_calls: Arc<Mutex<HashMap<u8, PendingCall>>> = Arc::new(Mutex::new(HashMap::new()));

    if let Some(target) = cli.call.clone() {
        if let Err(e) = call_peer(&agent, &cadence, &pending_calls, &cli, &identity, &client_id, &target).await {
            log::error!("call to {} failed: {:?}", target, e);
        }
    }

    loop {
        match agent.ping().await {
            Ok(Some(routed)) => {
                cadence.reset();
                if let Err(e) = handle_routed(&agent, &cadence, &pending_calls, &cli, &identity, &client_id, routed).await {
                    log::warn!("routed signaling message failed: {:?}", e);
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::error!("ping failed: {:?}", e);
                break;
            }
        }

        tokio::time::sleep(cadence.get()).await;
    }

    Ok(())
}

/// Caller side: REQ the target through the server, then CONN it an INIT
/// carrying our public endpoint and a locally entered password.
async fn call_peer(
    agent: &SignalingAgent,
    cadence: &PingCadence,
    pending_calls: &Mutex<HashMap<u8, PendingCall>>,
    cli: &Cli,
    identity: &Identity,
    my_id: &str,
    target_id: &str,
) -> anyhow::Result<()> {
    let secret = random_token(cli.password_len);
    let server_addr: SocketAddr = cli
        .server
        .parse()
        .or_else(|_| -> anyhow::Result<SocketAddr> {
            let mut addrs = std::net::ToSocketAddrs::to_socket_addrs(&cli.server)?;
            addrs.next().ok_or_else(|| anyhow::anyhow!("could not resolve {}", cli.server))
        })?;

    let rendezvous_socket = UdpSocket::bind("0.0.0.0:0").await?;
    rendezvous_socket.send_to(secret.as_bytes(), server_addr).await?;
    rendezvous_socket.send_to(secret.as_bytes(), server_addr).await?;

    let Some((session, my_public)) = agent.req(target_id, &secret).await? else {
        anyhow::bail!("rendezvous with {target_id} failed or it does not exist");
    };

    let expected_password = cli.password.clone().unwrap_or_default();
    let pending_password = random_token(cli.password_len);
    let udp_pass = random_token(16);

    let init_msg = SubMessage::Init {
        fingerprint: identity.fingerprint,
        client_id: my_id.to_owned(),
        public_ip: my_public.ip(),
        public_port: my_public.port(),
        expected_password,
        pending_password: pending_password.clone(),
        udp_pass: udp_pass.clone(),
    };

    agent.conn(session, &init_msg).await?;
    cadence.force(FAST_PING_INTERVAL);

    pending_calls.lock().insert(
        session,
        PendingCall {
            pending_password,
            udp_pass,
        },
    );

    log::info!("sent CONN INIT to {} on session {}", target_id, session);
    Ok(())
}

async fn handle_routed(
    agent: &SignalingAgent,
    cadence: &PingCadence,
    pending_calls: &Mutex<HashMap<u8, PendingCall>>,
    cli: &Cli,
    identity: &Identity,
    my_id: &str,
    routed: Routed,
) -> anyhow::Result<()> {
    match routed.message {
        SubMessage::Init {
            client_id: caller_id,
            public_ip,
            public_port,
            expected_password,
            pending_password,
            udp_pass,
            ..
        } => {
            let our_password = cli.password.clone().unwrap_or_default();
            if expected_password != our_password {
                log::warn!("CONN INIT on session {} failed password check", routed.session);
                agent.conn(routed.session, &SubMessage::Term { reason: "Not permitted".into() }).await?;
                return Err(ClientError::NotPermitted.into());
            }

            let caller_endpoint = SocketAddr::new(public_ip, public_port);

            let secret = random_token(cli.password_len);
            let server_addr: SocketAddr = cli.server.parse()?;
            let rendezvous_socket = UdpSocket::bind("0.0.0.0:0").await?;
            rendezvous_socket.send_to(secret.as_bytes(), server_addr).await?;
            rendezvous_socket.send_to(secret.as_bytes(), server_addr).await?;

            let Some((_, my_public)) = agent.req(&caller_id, &secret).await? else {
                log::warn!("could not discover our own public endpoint for session {}", routed.session);
                return Ok(());
            };

            let our_udp_pass = random_token(16);
            let acc = SubMessage::Acc {
                fingerprint: identity.fingerprint,
                client_id: my_id.to_owned(),
                public_ip: my_public.ip(),
                public_port: my_public.port(),
                pending_password,
                udp_pass: our_udp_pass.clone(),
            };
            agent.conn(routed.session, &acc).await?;
            cadence.force(FAST_PING_INTERVAL);

            spawn_hole_punch(cli.buffer, caller_endpoint, udp_pass);
        }
        SubMessage::Acc {
            public_ip,
            public_port,
            pending_password,
            udp_pass,
            ..
        } => {
            let Some(call) = pending_calls.lock().remove(&routed.session) else {
                log::warn!("ACC for unknown session {}", routed.session);
                return Ok(());
            };

            if pending_password != call.pending_password {
                log::warn!("ACC on session {} failed password check", routed.session);
                agent.conn(routed.session, &SubMessage::Term { reason: "Not permitted".into() }).await?;
                return Err(ClientError::NotPermitted.into());
            }

            let peer_endpoint = SocketAddr::new(public_ip, public_port);
            spawn_hole_punch(cli.buffer, peer_endpoint, udp_pass);
            log::info!("session {} established with {}", routed.session, peer_endpoint);
        }
        SubMessage::Term { reason } => {
            log::info!("session {} terminated: {}", routed.session, reason);
        }
        SubMessage::Warn { reason } => {
            log::warn!("session {} warning: {}", routed.session, reason);
        }
        SubMessage::Err { reason } => {
            log::error!("session {} error: {}", routed.session, reason);
        }
    }

    Ok(())
}

fn spawn_hole_punch(buffer: usize, target: SocketAddr, udp_pass: String) {
    tokio::spawn(async move {
        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(s) => s,
            Err(e) => {
                log::error!("failed to bind UDP transmission socket: {:?}", e);
                return;
            }
        };

        let channel = yard_codec::transmission::TransmissionChannel::new(socket, buffer);
        let peer = PeerUdpAgent::new(channel, target, yard_codec::transmission::DEFAULT_DGRAM_SIZE);

        match peer.punch_hole(&udp_pass).await {
            Ok(()) => log::info!("hole punched to {}", target),
            Err(e) => log::error!("hole punch to {} failed: {:?}", target, e),
        }
    });
}
