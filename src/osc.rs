use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use rosc::{OscMessage, OscPacket, OscType, encoder};
use thiserror::Error;

pub const DEFAULT_OSC_HOST: &str = "127.0.0.1";
pub const DEFAULT_OSC_PORT: u16 = 8000;

#[derive(Debug, Error)]
pub enum OscError {
    #[error("failed to bind local UDP socket: {0}")]
    Bind(#[source] std::io::Error),
    #[error("could not resolve OSC target {target}")]
    Resolve { target: String },
    #[error("failed to encode OSC message for {address}: {reason}")]
    Encode { address: String, reason: String },
    #[error("failed to send OSC datagram to {target}: {source}")]
    Send {
        target: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Connectionless sink for keypoint messages. Implementations must not
/// block on delivery; a returned error only means the local send failed.
pub trait OscTransport: Send {
    fn send(&self, address: &str, point: [f32; 2]) -> Result<(), OscError>;
}

pub fn build_message(address: &str, point: [f32; 2]) -> OscMessage {
    OscMessage {
        addr: address.to_string(),
        args: vec![OscType::Float(point[0]), OscType::Float(point[1])],
    }
}

pub fn encode_message(msg: &OscMessage) -> Result<Vec<u8>, OscError> {
    encoder::encode(&OscPacket::Message(msg.clone())).map_err(|err| OscError::Encode {
        address: msg.addr.clone(),
        reason: format!("{err:?}"),
    })
}

pub struct UdpOscTransport {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpOscTransport {
    pub fn new(host: &str, port: u16) -> Result<Self, OscError> {
        let target = (host, port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| OscError::Resolve {
                target: format!("{host}:{port}"),
            })?;
        let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).map_err(OscError::Bind)?;
        log::info!("OSC target set to {target}");
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl OscTransport for UdpOscTransport {
    fn send(&self, address: &str, point: [f32; 2]) -> Result<(), OscError> {
        let data = encode_message(&build_message(address, point))?;
        self.socket
            .send_to(&data, self.target)
            .map_err(|source| OscError::Send {
                target: self.target,
                source,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rosc::decoder;

    use super::*;

    #[test]
    fn message_carries_two_floats() {
        let msg = build_message("/character/0/nose", [12.5, 40.0]);
        assert_eq!(msg.addr, "/character/0/nose");
        assert_eq!(
            msg.args,
            vec![OscType::Float(12.5), OscType::Float(40.0)]
        );
        assert!(!encode_message(&msg).unwrap().is_empty());
    }

    #[test]
    fn unresolvable_host_is_rejected() {
        let err = UdpOscTransport::new("host.invalid.", 9000).err().unwrap();
        assert!(matches!(err, OscError::Resolve { .. }));
    }

    #[test]
    fn sends_a_datagram_over_loopback() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let transport = UdpOscTransport::new("127.0.0.1", port).unwrap();
        assert_eq!(transport.target().port(), port);
        transport
            .send("/character/1/left_wrist", [320.0, 240.5])
            .unwrap();

        let mut buf = [0u8; 1024];
        let n = receiver.recv(&mut buf).unwrap();
        let (_, packet) = decoder::decode_udp(&buf[..n]).unwrap();
        match packet {
            OscPacket::Message(msg) => {
                assert_eq!(msg.addr, "/character/1/left_wrist");
                assert_eq!(
                    msg.args,
                    vec![OscType::Float(320.0), OscType::Float(240.5)]
                );
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }
}
