//! The peer-to-peer signaling sub-protocol carried inside CONN payloads:
//! space-delimited text with positional arity, modeled as a tagged variant
//! with an explicit parser rather than ad-hoc string splitting.

use std::net::IpAddr;

use uuid::Uuid;

use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubMessage {
    Init {
        fingerprint: Uuid,
        client_id: String,
        public_ip: IpAddr,
        public_port: u16,
        expected_password: String,
        pending_password: String,
        udp_pass: String,
    },
    Acc {
        fingerprint: Uuid,
        client_id: String,
        public_ip: IpAddr,
        public_port: u16,
        pending_password: String,
        udp_pass: String,
    },
    Term {
        reason: String,
    },
    Warn {
        reason: String,
    },
    Err {
        reason: String,
    },
}

impl SubMessage {
    pub fn parse(text: &str) -> Result<Self, ClientError> {
        let mut tokens = text.trim().split(' ');
        let command = tokens.next().ok_or(ClientError::BadSubProtocol)?;
        let rest: Vec<&str> = tokens.collect();

        match command {
            "INIT" => {
                let [fingerprint, client_id, public_ip, public_port, expected_password, pending_password, udp_pass] =
                    <[&str; 7]>::try_from(rest).map_err(|_| ClientError::BadSubProtocol)?;
                Ok(Self::Init {
                    fingerprint: fingerprint.parse().map_err(|_| ClientError::BadSubProtocol)?,
                    client_id: client_id.to_owned(),
                    public_ip: public_ip.parse().map_err(|_| ClientError::BadSubProtocol)?,
                    public_port: public_port.parse().map_err(|_| ClientError::BadSubProtocol)?,
                    expected_password: expected_password.to_owned(),
                    pending_password: pending_password.to_owned(),
                    udp_pass: udp_pass.to_owned(),
                })
            }
            "ACC" => {
                let [fingerprint, client_id, public_ip, public_port, pending_password, udp_pass] =
                    <[&str; 6]>::try_from(rest).map_err(|_| ClientError::BadSubProtocol)?;
                Ok(Self::Acc {
                    fingerprint: fingerprint.parse().map_err(|_| ClientError::BadSubProtocol)?,
                    client_id: client_id.to_owned(),
                    public_ip: public_ip.parse().map_err(|_| ClientError::BadSubProtocol)?,
                    public_port: public_port.parse().map_err(|_| ClientError::BadSubProtocol)?,
                    pending_password: pending_password.to_owned(),
                    udp_pass: udp_pass.to_owned(),
                })
            }
            "TERM" => Ok(Self::Term {
                reason: rest.join(" "),
            }),
            "WARN" => Ok(Self::Warn {
                reason: rest.join(" "),
            }),
            "ERR" => Ok(Self::Err {
                reason: rest.join(" "),
            }),
            _ => Err(ClientError::BadSubProtocol),
        }
    }

    pub fn to_wire(&self) -> String {
        match self {
            Self::Init {
                fingerprint,
                client_id,
                public_ip,
                public_port,
                expected_password,
                pending_password,
                udp_pass,
            } => format!(
                "INIT {fingerprint} {client_id} {public_ip} {public_port} {expected_password} {pending_password} {udp_pass}"
            ),
            Self::Acc {
                fingerprint,
                client_id,
                public_ip,
                public_port,
                pending_password,
                udp_pass,
            } => format!(
                "ACC {fingerprint} {client_id} {public_ip} {public_port} {pending_password} {udp_pass}"
            ),
            Self::Term { reason } => format!("TERM {reason}"),
            Self::Warn { reason } => format!("WARN {reason}"),
            Self::Err { reason } => format!("ERR {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_round_trips() {
        let msg = SubMessage::Init {
            fingerprint: Uuid::new_v4(),
            client_id: "ABCDEFGH".into(),
            public_ip: "203.0.113.5".parse().unwrap(),
            public_port: 40000,
            expected_password: "secretpw".into(),
            pending_password: "pend123".into(),
            udp_pass: "udptok".into(),
        };
        let parsed = SubMessage::parse(&msg.to_wire()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn acc_round_trips() {
        let msg = SubMessage::Acc {
            fingerprint: Uuid::new_v4(),
            client_id: "IJKLMNOP".into(),
            public_ip: "198.51.100.9".parse().unwrap(),
            public_port: 50000,
            pending_password: "pend123".into(),
            udp_pass: "udptok".into(),
        };
        let parsed = SubMessage::parse(&msg.to_wire()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn term_carries_free_text_reason() {
        let parsed = SubMessage::parse("TERM Not permitted").unwrap();
        assert_eq!(
            parsed,
            SubMessage::Term {
                reason: "Not permitted".into()
            }
        );
    }

    #[test]
    fn wrong_arity_is_rejected() {
        assert!(matches!(
            SubMessage::parse("INIT only-one-token"),
            Err(ClientError::BadSubProtocol)
        ));
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(matches!(SubMessage::parse("HELLO there"), Err(ClientError::BadSubProtocol)));
    }
}
