//! MQTT 3.1.1 control packets.
//!
//! Only the packets a QoS 0/1 client exchanges are modelled. Packets are
//! carried in WebSocket binary frames; a frame may hold a partial packet or
//! several packets, so [`Packet::decode`] works on an accumulating buffer and
//! reports how many bytes it consumed.

use sangi_core::prelude::*;

use crate::transport::QoS;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;

/// Largest value the variable-length remaining-length field can hold.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// SUBACK return code for a refused subscription.
pub const SUBACK_FAILURE: u8 = 0x80;

mod kind {
    pub const CONNECT: u8 = 1;
    pub const CONNACK: u8 = 2;
    pub const PUBLISH: u8 = 3;
    pub const PUBACK: u8 = 4;
    pub const SUBSCRIBE: u8 = 8;
    pub const SUBACK: u8 = 9;
    pub const UNSUBSCRIBE: u8 = 10;
    pub const UNSUBACK: u8 = 11;
    pub const PINGREQ: u8 = 12;
    pub const PINGRESP: u8 = 13;
    pub const DISCONNECT: u8 = 14;
}

// ─────────────────────────────────────────────────────────────────────────────
// Packet types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck { packet_id: u16 },
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck { packet_id: u16 },
    PingReq,
    PingResp,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    /// Keep-alive interval in seconds; 0 disables it.
    pub keep_alive: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

impl Connect {
    pub fn new(client_id: impl Into<String>, keep_alive: u16) -> Self {
        Self {
            client_id: client_id.into(),
            keep_alive,
            clean_session: true,
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadCredentials,
    NotAuthorized,
}

impl ConnectReturnCode {
    pub fn from_u8(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Self::Accepted,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadCredentials,
            5 => Self::NotAuthorized,
            other => return Err(Error::protocol(format!("unknown CONNACK code {other}"))),
        })
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Accepted => 0,
            Self::UnacceptableProtocolVersion => 1,
            Self::IdentifierRejected => 2,
            Self::ServerUnavailable => 3,
            Self::BadCredentials => 4,
            Self::NotAuthorized => 5,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Accepted => "connection accepted",
            Self::UnacceptableProtocolVersion => "unacceptable protocol version",
            Self::IdentifierRejected => "client identifier rejected",
            Self::ServerUnavailable => "server unavailable",
            Self::BadCredentials => "bad user name or password",
            Self::NotAuthorized => "not authorized",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub code: ConnectReturnCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    /// Present iff `qos` is at least once.
    pub packet_id: Option<u16>,
}

impl Publish {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain: false,
            dup: false,
            packet_id: None,
        }
    }

    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub filters: Vec<(String, QoS)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    pub return_codes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub topics: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────────

impl Packet {
    /// Serialize to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        let header = match self {
            Packet::Connect(connect) => {
                write_str(&mut body, PROTOCOL_NAME)?;
                body.push(PROTOCOL_LEVEL);
                let mut flags = 0u8;
                if connect.clean_session {
                    flags |= 0x02;
                }
                if connect.username.is_some() {
                    flags |= 0x80;
                }
                if connect.password.is_some() {
                    flags |= 0x40;
                }
                body.push(flags);
                body.extend_from_slice(&connect.keep_alive.to_be_bytes());
                write_str(&mut body, &connect.client_id)?;
                if let Some(username) = &connect.username {
                    write_str(&mut body, username)?;
                }
                if let Some(password) = &connect.password {
                    write_bytes(&mut body, password)?;
                }
                kind::CONNECT << 4
            }
            Packet::ConnAck(ack) => {
                body.push(u8::from(ack.session_present));
                body.push(ack.code.as_u8());
                kind::CONNACK << 4
            }
            Packet::Publish(publish) => {
                write_str(&mut body, &publish.topic)?;
                match (publish.qos, publish.packet_id) {
                    (QoS::AtMostOnce, _) => {}
                    (QoS::AtLeastOnce, Some(id)) => body.extend_from_slice(&id.to_be_bytes()),
                    (QoS::AtLeastOnce, None) => {
                        return Err(Error::protocol("QoS 1 PUBLISH requires a packet id"))
                    }
                }
                body.extend_from_slice(&publish.payload);
                let mut header = kind::PUBLISH << 4;
                if publish.dup {
                    header |= 0x08;
                }
                header |= publish.qos.as_u8() << 1;
                if publish.retain {
                    header |= 0x01;
                }
                header
            }
            Packet::PubAck { packet_id } => {
                body.extend_from_slice(&packet_id.to_be_bytes());
                kind::PUBACK << 4
            }
            Packet::Subscribe(subscribe) => {
                if subscribe.filters.is_empty() {
                    return Err(Error::protocol("SUBSCRIBE requires at least one filter"));
                }
                body.extend_from_slice(&subscribe.packet_id.to_be_bytes());
                for (filter, qos) in &subscribe.filters {
                    write_str(&mut body, filter)?;
                    body.push(qos.as_u8());
                }
                (kind::SUBSCRIBE << 4) | 0x02
            }
            Packet::SubAck(ack) => {
                body.extend_from_slice(&ack.packet_id.to_be_bytes());
                body.extend_from_slice(&ack.return_codes);
                kind::SUBACK << 4
            }
            Packet::Unsubscribe(unsubscribe) => {
                if unsubscribe.topics.is_empty() {
                    return Err(Error::protocol("UNSUBSCRIBE requires at least one topic"));
                }
                body.extend_from_slice(&unsubscribe.packet_id.to_be_bytes());
                for topic in &unsubscribe.topics {
                    write_str(&mut body, topic)?;
                }
                (kind::UNSUBSCRIBE << 4) | 0x02
            }
            Packet::UnsubAck { packet_id } => {
                body.extend_from_slice(&packet_id.to_be_bytes());
                kind::UNSUBACK << 4
            }
            Packet::PingReq => kind::PINGREQ << 4,
            Packet::PingResp => kind::PINGRESP << 4,
            Packet::Disconnect => kind::DISCONNECT << 4,
        };

        let mut out = Vec::with_capacity(body.len() + 5);
        out.push(header);
        write_remaining_length(&mut out, body.len())?;
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode one packet from the front of `buf`.
    ///
    /// Returns `Ok(None)` if `buf` does not yet hold a complete packet,
    /// otherwise the packet and the number of bytes it occupied.
    pub fn decode(buf: &[u8]) -> Result<Option<(Packet, usize)>> {
        let Some(&header) = buf.first() else {
            return Ok(None);
        };
        let Some((remaining, len_bytes)) = read_remaining_length(&buf[1..])? else {
            return Ok(None);
        };
        let total = 1 + len_bytes + remaining;
        if buf.len() < total {
            return Ok(None);
        }

        let mut r = Reader::new(&buf[1 + len_bytes..total]);
        let flags = header & 0x0F;
        let packet = match header >> 4 {
            kind::CONNECT => {
                let name = r.string()?;
                let level = r.u8()?;
                if name != PROTOCOL_NAME || level != PROTOCOL_LEVEL {
                    return Err(Error::protocol(format!(
                        "unsupported protocol {name} level {level}"
                    )));
                }
                let connect_flags = r.u8()?;
                let keep_alive = r.u16()?;
                let client_id = r.string()?;
                if connect_flags & 0x04 != 0 {
                    return Err(Error::protocol("will messages are not supported"));
                }
                let username = if connect_flags & 0x80 != 0 {
                    Some(r.string()?)
                } else {
                    None
                };
                let password = if connect_flags & 0x40 != 0 {
                    Some(r.binary()?)
                } else {
                    None
                };
                Packet::Connect(Connect {
                    client_id,
                    keep_alive,
                    clean_session: connect_flags & 0x02 != 0,
                    username,
                    password,
                })
            }
            kind::CONNACK => {
                let ack_flags = r.u8()?;
                let code = ConnectReturnCode::from_u8(r.u8()?)?;
                Packet::ConnAck(ConnAck {
                    session_present: ack_flags & 0x01 != 0,
                    code,
                })
            }
            kind::PUBLISH => {
                let qos = QoS::from_u8((flags >> 1) & 0x03).ok_or_else(|| {
                    Error::protocol("QoS 2 PUBLISH is not supported")
                })?;
                let topic = r.string()?;
                let packet_id = match qos {
                    QoS::AtMostOnce => None,
                    QoS::AtLeastOnce => Some(r.u16()?),
                };
                Packet::Publish(Publish {
                    topic,
                    payload: r.rest().to_vec(),
                    qos,
                    retain: flags & 0x01 != 0,
                    dup: flags & 0x08 != 0,
                    packet_id,
                })
            }
            kind::PUBACK => Packet::PubAck {
                packet_id: r.u16()?,
            },
            kind::SUBSCRIBE => {
                let packet_id = r.u16()?;
                let mut filters = Vec::new();
                while !r.is_empty() {
                    let filter = r.string()?;
                    let qos = QoS::from_u8(r.u8()? & 0x03).unwrap_or(QoS::AtLeastOnce);
                    filters.push((filter, qos));
                }
                Packet::Subscribe(Subscribe { packet_id, filters })
            }
            kind::SUBACK => Packet::SubAck(SubAck {
                packet_id: r.u16()?,
                return_codes: r.rest().to_vec(),
            }),
            kind::UNSUBSCRIBE => {
                let packet_id = r.u16()?;
                let mut topics = Vec::new();
                while !r.is_empty() {
                    topics.push(r.string()?);
                }
                Packet::Unsubscribe(Unsubscribe { packet_id, topics })
            }
            kind::UNSUBACK => Packet::UnsubAck {
                packet_id: r.u16()?,
            },
            kind::PINGREQ => Packet::PingReq,
            kind::PINGRESP => Packet::PingResp,
            kind::DISCONNECT => Packet::Disconnect,
            other => {
                return Err(Error::protocol(format!("unsupported packet type {other}")));
            }
        };
        Ok(Some((packet, total)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire helpers
// ─────────────────────────────────────────────────────────────────────────────

fn write_remaining_length(out: &mut Vec<u8>, mut len: usize) -> Result<()> {
    if len > MAX_REMAINING_LENGTH {
        return Err(Error::protocol(format!("packet too large ({len} bytes)")));
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            return Ok(());
        }
    }
}

/// `Ok(None)` when more bytes are needed.
fn read_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, byte) in buf.iter().enumerate() {
        if i == 4 {
            return Err(Error::protocol("malformed remaining length"));
        }
        value += (*byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if buf.len() >= 4 {
        return Err(Error::protocol("malformed remaining length"));
    }
    Ok(None)
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let len = u16::try_from(bytes.len())
        .map_err(|_| Error::protocol(format!("field too long ({} bytes)", bytes.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

fn write_str(out: &mut Vec<u8>, s: &str) -> Result<()> {
    write_bytes(out, s.as_bytes())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| Error::protocol("packet truncated"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn binary(&mut self) -> Result<Vec<u8>> {
        let len = self.u16()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn string(&mut self) -> Result<String> {
        let bytes = self.binary()?;
        String::from_utf8(bytes).map_err(|_| Error::protocol("string is not valid UTF-8"))
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(bytes: &[u8]) -> Packet {
        let (packet, used) = Packet::decode(bytes).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        packet
    }

    #[test]
    fn test_pingreq_wire_format() {
        assert_eq!(Packet::PingReq.encode().unwrap(), vec![0xC0, 0x00]);
        assert_eq!(Packet::Disconnect.encode().unwrap(), vec![0xE0, 0x00]);
    }

    #[test]
    fn test_connect_wire_format() {
        let bytes = Packet::Connect(Connect::new("ab", 60)).encode().unwrap();
        assert_eq!(
            bytes,
            vec![
                0x10, 14, // fixed header
                0, 4, b'M', b'Q', b'T', b'T', // protocol name
                4,    // level
                0x02, // clean session
                0, 60, // keep alive
                0, 2, b'a', b'b', // client id
            ]
        );
    }

    #[test]
    fn test_connack_rejection_code() {
        let packet = decode_one(&[0x20, 0x02, 0x00, 0x05]);
        assert_eq!(
            packet,
            Packet::ConnAck(ConnAck {
                session_present: false,
                code: ConnectReturnCode::NotAuthorized,
            })
        );
        assert_eq!(ConnectReturnCode::NotAuthorized.description(), "not authorized");
    }

    #[test]
    fn test_connack_unknown_code_is_error() {
        assert!(Packet::decode(&[0x20, 0x02, 0x00, 0x09]).is_err());
    }

    #[test]
    fn test_publish_qos0_has_no_packet_id() {
        let bytes = Packet::Publish(Publish::new("a/b", "hi", QoS::AtMostOnce))
            .encode()
            .unwrap();
        assert_eq!(bytes, vec![0x30, 7, 0, 3, b'a', b'/', b'b', b'h', b'i']);
    }

    #[test]
    fn test_publish_qos1_flags_and_id() {
        let mut publish = Publish::new("t", "x", QoS::AtLeastOnce);
        publish.packet_id = Some(0x0102);
        publish.dup = true;
        let bytes = Packet::Publish(publish.clone()).encode().unwrap();
        assert_eq!(bytes[0], 0x3A);
        assert_eq!(&bytes[5..7], &[0x01, 0x02]);
        assert_eq!(decode_one(&bytes), Packet::Publish(publish));
    }

    #[test]
    fn test_publish_qos1_without_id_is_rejected() {
        let publish = Publish::new("t", "x", QoS::AtLeastOnce);
        assert!(Packet::Publish(publish).encode().is_err());
    }

    #[test]
    fn test_publish_qos2_is_rejected_on_decode() {
        // QoS bits = 2
        let bytes = [0x34, 5, 0, 1, b't', 0, 1];
        assert!(Packet::decode(&bytes).is_err());
    }

    #[test]
    fn test_subscribe_sets_reserved_flags() {
        let bytes = Packet::Subscribe(Subscribe {
            packet_id: 7,
            filters: vec![("sangi/status/battery".into(), QoS::AtMostOnce)],
        })
        .encode()
        .unwrap();
        assert_eq!(bytes[0], 0x82);
    }

    #[test]
    fn test_empty_subscribe_is_rejected() {
        let packet = Packet::Subscribe(Subscribe {
            packet_id: 1,
            filters: vec![],
        });
        assert!(packet.encode().is_err());
    }

    #[test]
    fn test_suback_failure_code() {
        let packet = decode_one(&[0x90, 0x03, 0x00, 0x07, SUBACK_FAILURE]);
        assert_eq!(
            packet,
            Packet::SubAck(SubAck {
                packet_id: 7,
                return_codes: vec![SUBACK_FAILURE],
            })
        );
    }

    #[test]
    fn test_remaining_length_multi_byte() {
        let payload = vec![b'x'; 200];
        let bytes = Packet::Publish(Publish::new("t", payload.clone(), QoS::AtMostOnce))
            .encode()
            .unwrap();
        // 3 bytes of topic + 200 payload = 203 = 0xCB 0x01
        assert_eq!(&bytes[1..3], &[0xCB, 0x01]);
        match decode_one(&bytes) {
            Packet::Publish(p) => assert_eq!(p.payload, payload),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_remaining_length_boundaries() {
        for (len, expected) in [
            (0usize, vec![0x00]),
            (127, vec![0x7F]),
            (128, vec![0x80, 0x01]),
            (16_383, vec![0xFF, 0x7F]),
            (16_384, vec![0x80, 0x80, 0x01]),
            (MAX_REMAINING_LENGTH, vec![0xFF, 0xFF, 0xFF, 0x7F]),
        ] {
            let mut out = Vec::new();
            write_remaining_length(&mut out, len).unwrap();
            assert_eq!(out, expected, "len {len}");
            assert_eq!(
                read_remaining_length(&out).unwrap(),
                Some((len, expected.len()))
            );
        }
        assert!(write_remaining_length(&mut Vec::new(), MAX_REMAINING_LENGTH + 1).is_err());
    }

    #[test]
    fn test_malformed_remaining_length() {
        assert!(Packet::decode(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]).is_err());
    }

    #[test]
    fn test_partial_packet_needs_more_bytes() {
        let bytes = Packet::Publish(Publish::new("sangi/logs/serial", "{}", QoS::AtMostOnce))
            .encode()
            .unwrap();
        for cut in 0..bytes.len() {
            assert!(Packet::decode(&bytes[..cut]).unwrap().is_none(), "cut {cut}");
        }
    }

    #[test]
    fn test_two_packets_in_one_buffer() {
        let mut buf = Packet::PingResp.encode().unwrap();
        buf.extend(Packet::PubAck { packet_id: 3 }.encode().unwrap());

        let (first, used) = Packet::decode(&buf).unwrap().unwrap();
        assert_eq!(first, Packet::PingResp);
        let (second, _) = Packet::decode(&buf[used..]).unwrap().unwrap();
        assert_eq!(second, Packet::PubAck { packet_id: 3 });
    }

    #[test]
    fn test_truncated_body_is_error() {
        // Topic length prefix overruns the 2-byte body.
        assert!(Packet::decode(&[0x30, 0x02, 0x00, 0x05]).is_err());
    }

    #[test]
    fn test_connect_decodes_credentials() {
        let mut connect = Connect::new("sangi-web-1", 30);
        connect.username = Some("user".into());
        connect.password = Some(b"pw".to_vec());
        let bytes = Packet::Connect(connect.clone()).encode().unwrap();
        assert_eq!(decode_one(&bytes), Packet::Connect(connect));
    }

    #[test]
    fn test_unsubscribe_decodes_topics() {
        let packet = Packet::Unsubscribe(Unsubscribe {
            packet_id: 9,
            topics: vec!["a".into(), "b".into()],
        });
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes[0], 0xA2);
        assert_eq!(decode_one(&bytes), packet);
    }
}
