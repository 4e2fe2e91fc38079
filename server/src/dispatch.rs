//! Control-message dispatch: one call per frame read off a control stream.
//! Mirrors the message table in the header one-for-one; every branch either
//! produces a reply using the request's access code or tears the stream
//! down. Internal `dispatch_*` functions report failures as a `ServerError`;
//! `dispatch` is the one call site that translates an error into the wire
//! reply and decides whether the stream stays open.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;
use yard_codec::control::MessageType;
use yard_registry::{ClientRegistry, ConnId, Session};

use crate::config::Config;
use crate::error::ServerError;
use crate::monitor::Monitor;
use crate::rendezvous::Rendezvous;

pub struct Deps {
    pub registry: Arc<ClientRegistry>,
    pub rendezvous: Arc<Rendezvous>,
    pub monitor: Arc<Monitor>,
    pub config: Arc<Config>,
}

pub struct Reply {
    pub session: u8,
    pub typ: MessageType,
    pub payload: String,
    /// A previously live connection displaced by this one (INIT/REN
    /// reconnect); the caller should tear that stream down.
    pub displaced: Option<ConnId>,
}

impl Reply {
    fn simple(session: u8, typ: MessageType, payload: impl Into<String>) -> Self {
        Self {
            session,
            typ,
            payload: payload.into(),
            displaced: None,
        }
    }
}

pub enum Outcome {
    Reply(Reply),
    ReplyThenClose(Reply),
    Close,
}

pub struct Request {
    pub session: u8,
    pub typ: MessageType,
    pub payload: String,
}

/// Dispatches one frame. `current_client` is this stream's bound client id,
/// if INIT or REN has already succeeded on it; dispatch updates it in
/// place when INIT/REN succeeds.
pub async fn dispatch(
    deps: &Deps,
    conn: ConnId,
    peer_ip: IpAddr,
    current_client: &mut Option<String>,
    request: Request,
) -> Outcome {
    match request.typ {
        MessageType::Close => Outcome::Close,

        MessageType::Init => to_outcome(dispatch_init(deps, conn, peer_ip, current_client, &request.payload), 0),

        MessageType::Ren => to_outcome(dispatch_ren(deps, conn, peer_ip, current_client, &request.payload), 0),

        MessageType::Ping => match current_client {
            None => to_outcome(Err(ServerError::NotInitialized), 0),
            Some(id) => to_outcome(Ok(dispatch_ping(deps, id)), 0),
        },

        MessageType::Req => match current_client {
            None => to_outcome(Err(ServerError::NotInitialized), 0),
            Some(id) => to_outcome(dispatch_req(deps, id, peer_ip, &request.payload).await, 0),
        },

        MessageType::Conn => match current_client {
            None => to_outcome(Err(ServerError::NotInitialized), request.session),
            Some(id) => to_outcome(dispatch_conn(deps, id, request.session, &request.payload), request.session),
        },

        MessageType::Term => match current_client {
            None => to_outcome(Err(ServerError::NotInitialized), request.session),
            Some(id) => to_outcome(dispatch_term(deps, id, request.session), request.session),
        },

        MessageType::Ans | MessageType::Err | MessageType::Warn => {
            // These are server-to-client message types; a client sending
            // one is a protocol violation.
            to_outcome(Err(ServerError::FormatError("Unexpected message type")), 0)
        }
    }
}

/// The one place a `ServerError` becomes a wire reply. Format/framing
/// problems and an unauthenticated stream are fatal; everything else is
/// reported to the caller and the stream stays open.
fn to_outcome(result: Result<Reply, ServerError>, session: u8) -> Outcome {
    match result {
        Ok(reply) => Outcome::Reply(reply),
        Err(ServerError::FormatError(msg)) => Outcome::ReplyThenClose(Reply::simple(0, MessageType::Err, msg)),
        Err(ServerError::NotInitialized) => {
            Outcome::ReplyThenClose(Reply::simple(0, MessageType::Err, "Not initialized"))
        }
        Err(ServerError::SessionMissing(msg)) => Outcome::Reply(Reply::simple(session, MessageType::Warn, msg)),
        Err(ServerError::PeerOffline(msg)) => Outcome::Reply(Reply::simple(session, MessageType::Warn, msg)),
        Err(ServerError::ResourceExhausted(msg)) => Outcome::Reply(Reply::simple(session, MessageType::Err, msg)),
        Err(ServerError::Timeout) => Outcome::Reply(Reply::simple(session, MessageType::Err, "Timed out")),
        Err(ServerError::ConnectionAborted) => Outcome::Close,
    }
}

fn parse_fingerprint(text: &str) -> Option<Uuid> {
    let uuid = Uuid::parse_str(text.trim()).ok()?;
    if uuid.get_version_num() != 4 {
        return None;
    }
    Some(uuid)
}

fn dispatch_init(
    deps: &Deps,
    conn: ConnId,
    peer_ip: IpAddr,
    current_client: &mut Option<String>,
    payload: &str,
) -> Result<Reply, ServerError> {
    let fingerprint = parse_fingerprint(payload).ok_or(ServerError::FormatError("Bad fingerprint"))?;

    let (client, displaced) = deps.registry.create_client(fingerprint, conn);
    *current_client = Some(client.client_id.clone());

    Ok(Reply {
        session: 0,
        typ: MessageType::Ans,
        payload: format!("{} {}", client.client_id, peer_ip),
        displaced,
    })
}

fn dispatch_ren(
    deps: &Deps,
    conn: ConnId,
    peer_ip: IpAddr,
    current_client: &mut Option<String>,
    payload: &str,
) -> Result<Reply, ServerError> {
    let fingerprint = parse_fingerprint(payload).ok_or(ServerError::FormatError("Bad fingerprint"))?;

    let client = deps
        .registry
        .rename(fingerprint, conn)
        .map_err(|_| ServerError::SessionMissing("Unknown fingerprint"))?;

    *current_client = Some(client.client_id.clone());
    Ok(Reply::simple(0, MessageType::Ans, format!("{} {}", client.client_id, peer_ip)))
}

fn dispatch_ping(deps: &Deps, client_id: &str) -> Reply {
    match deps.registry.pop_pending(client_id) {
        Some(frame) => Reply::simple(frame.session, MessageType::Ans, frame.payload),
        None => Reply::simple(0, MessageType::Ans, ""),
    }
}

async fn dispatch_req(deps: &Deps, client_id: &str, peer_ip: IpAddr, payload: &str) -> Result<Reply, ServerError> {
    let mut parts = payload.splitn(2, ' ');
    let (Some(target_id), Some(secret)) = (parts.next(), parts.next()) else {
        return Err(ServerError::FormatError("Bad REQ arity"));
    };

    if deps.registry.get_by_id(target_id).is_none() {
        return Ok(Reply::simple(0, MessageType::Ans, ""));
    }

    let timeout = Duration::from_secs(deps.config.server.rendezvous_timeout_secs);
    let Some(endpoint) = deps.rendezvous.wait_for(secret, peer_ip, timeout).await else {
        return Ok(Reply::simple(0, MessageType::Ans, ""));
    };

    let session = deps.registry.create_session(client_id, target_id)?;
    Ok(Reply::simple(
        0,
        MessageType::Ans,
        format!("{} {} {}", session, endpoint.ip(), endpoint.port()),
    ))
}

fn dispatch_conn(deps: &Deps, client_id: &str, session: u8, payload: &str) -> Result<Reply, ServerError> {
    let client = deps
        .registry
        .get_by_id(client_id)
        .ok_or(ServerError::SessionMissing("Session does not exist"))?;

    let bound_session: Arc<Session> = client
        .sessions
        .get(&session)
        .cloned()
        .ok_or(ServerError::SessionMissing("Session does not exist"))?;

    let peer_id = bound_session
        .other(client_id)
        .cloned()
        .ok_or(ServerError::SessionMissing("Session does not exist"))?;

    let peer = deps.registry.get_by_id(&peer_id).ok_or(ServerError::PeerOffline("Target is not online"))?;
    if !peer.online {
        return Err(ServerError::PeerOffline("Target is not online"));
    }

    deps.registry
        .push_pending(&peer_id, session, payload.to_owned())
        .map_err(|_| ServerError::PeerOffline("Target is not online"))?;

    Ok(Reply::simple(session, MessageType::Ans, ""))
}

fn dispatch_term(deps: &Deps, client_id: &str, session: u8) -> Result<Reply, ServerError> {
    deps.registry.remove_session(client_id, session)?;
    Ok(Reply::simple(session, MessageType::Ans, ""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn deps() -> Deps {
        Deps {
            registry: Arc::new(ClientRegistry::new(8)),
            rendezvous: Rendezvous::new(Duration::from_secs(1)),
            monitor: Arc::new(Monitor::new()),
            config: Arc::new(Config::default()),
        }
    }

    fn peer_ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5))
    }

    fn request(session: u8, typ: MessageType, payload: &str) -> Request {
        Request {
            session,
            typ,
            payload: payload.to_owned(),
        }
    }

    #[tokio::test]
    async fn cold_init_assigns_eight_char_uppercase_id() {
        let deps = deps();
        let mut current = None;
        let fp = Uuid::new_v4().to_string();

        let outcome = dispatch(&deps, 1, peer_ip(), &mut current, request(0, MessageType::Init, &fp)).await;

        let Outcome::Reply(reply) = outcome else { panic!("expected reply") };
        assert_eq!(reply.typ, MessageType::Ans);
        let id = reply.payload.split(' ').next().unwrap();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_uppercase()));
        assert!(reply.payload.ends_with("203.0.113.5"));
        assert_eq!(current, Some(id.to_owned()));
    }

    #[tokio::test]
    async fn reinit_with_same_fingerprint_displaces_old_connection() {
        let deps = deps();
        let fp = Uuid::new_v4().to_string();
        let mut first = None;
        dispatch(&deps, 1, peer_ip(), &mut first, request(0, MessageType::Init, &fp)).await;

        let mut second = None;
        let outcome = dispatch(&deps, 2, peer_ip(), &mut second, request(0, MessageType::Init, &fp)).await;

        let Outcome::Reply(reply) = outcome else { panic!("expected reply") };
        assert_eq!(reply.displaced, Some(1));
    }

    #[tokio::test]
    async fn conn_without_session_warns() {
        let deps = deps();
        let mut a = None;
        dispatch(&deps, 1, peer_ip(), &mut a, request(0, MessageType::Init, &Uuid::new_v4().to_string())).await;

        let outcome = dispatch(&deps, 1, peer_ip(), &mut a, request(1, MessageType::Conn, "hello")).await;
        let Outcome::Reply(reply) = outcome else { panic!("expected reply") };
        assert_eq!(reply.typ, MessageType::Warn);
    }

    #[tokio::test]
    async fn routed_conn_surfaces_on_peers_next_ping() {
        let deps = deps();
        let mut a = None;
        let Outcome::Reply(a_init) =
            dispatch(&deps, 1, peer_ip(), &mut a, request(0, MessageType::Init, &Uuid::new_v4().to_string())).await
        else {
            panic!()
        };
        let a_id = a_init.payload.split(' ').next().unwrap().to_owned();

        let mut b = None;
        let Outcome::Reply(b_init) =
            dispatch(&deps, 2, peer_ip(), &mut b, request(0, MessageType::Init, &Uuid::new_v4().to_string())).await
        else {
            panic!()
        };
        let b_id = b_init.payload.split(' ').next().unwrap().to_owned();

        deps.registry.create_session(&a_id, &b_id).unwrap();

        dispatch(&deps, 1, peer_ip(), &mut a, request(1, MessageType::Conn, "hello")).await;

        let outcome = dispatch(&deps, 2, peer_ip(), &mut b, request(0, MessageType::Ping, "")).await;
        let Outcome::Reply(reply) = outcome else { panic!("expected reply") };
        assert_eq!(reply.session, 1);
        assert_eq!(reply.payload, "hello");
    }

    #[tokio::test]
    async fn ping_with_empty_queue_replies_empty_on_session_zero() {
        let deps = deps();
        let mut a = None;
        dispatch(&deps, 1, peer_ip(), &mut a, request(0, MessageType::Init, &Uuid::new_v4().to_string())).await;

        let outcome = dispatch(&deps, 1, peer_ip(), &mut a, request(0, MessageType::Ping, "")).await;
        let Outcome::Reply(reply) = outcome else { panic!("expected reply") };
        assert_eq!(reply.session, 0);
        assert_eq!(reply.payload, "");
    }

    #[tokio::test]
    async fn req_without_udp_ping_returns_empty_ans_after_timeout() {
        let deps = deps();
        let mut a = None;
        dispatch(&deps, 1, peer_ip(), &mut a, request(0, MessageType::Init, &Uuid::new_v4().to_string())).await;
        let mut b = None;
        dispatch(&deps, 2, peer_ip(), &mut b, request(0, MessageType::Init, &Uuid::new_v4().to_string())).await;
        let b_id = b.clone().unwrap();

        let outcome = dispatch(&deps, 1, peer_ip(), &mut a, request(0, MessageType::Req, &format!("{b_id} tok-1"))).await;
        let Outcome::Reply(reply) = outcome else { panic!("expected reply") };
        assert_eq!(reply.payload, "");
    }

    #[tokio::test]
    async fn term_cascades_to_both_peers_and_their_pending() {
        let deps = deps();
        let mut a = None;
        let Outcome::Reply(a_init) =
            dispatch(&deps, 1, peer_ip(), &mut a, request(0, MessageType::Init, &Uuid::new_v4().to_string())).await
        else {
            panic!()
        };
        let a_id = a_init.payload.split(' ').next().unwrap().to_owned();
        let mut b = None;
        let Outcome::Reply(b_init) =
            dispatch(&deps, 2, peer_ip(), &mut b, request(0, MessageType::Init, &Uuid::new_v4().to_string())).await
        else {
            panic!()
        };
        let b_id = b_init.payload.split(' ').next().unwrap().to_owned();

        deps.registry.create_session(&a_id, &b_id).unwrap();
        dispatch(&deps, 1, peer_ip(), &mut a, request(1, MessageType::Conn, "hello")).await;

        dispatch(&deps, 1, peer_ip(), &mut a, request(1, MessageType::Term, "")).await;

        let outcome = dispatch(&deps, 2, peer_ip(), &mut b, request(0, MessageType::Ping, "")).await;
        let Outcome::Reply(reply) = outcome else { panic!("expected reply") };
        assert_eq!(reply.payload, "");
    }

    #[tokio::test]
    async fn term_on_unknown_session_warns_without_closing() {
        let deps = deps();
        let mut a = None;
        dispatch(&deps, 1, peer_ip(), &mut a, request(0, MessageType::Init, &Uuid::new_v4().to_string())).await;

        let outcome = dispatch(&deps, 1, peer_ip(), &mut a, request(9, MessageType::Term, "")).await;
        let Outcome::Reply(reply) = outcome else { panic!("expected reply, stream should stay open") };
        assert_eq!(reply.typ, MessageType::Warn);
    }
}
