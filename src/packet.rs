//! # MQTT Packet Structures and Serialization
//!
//! This module defines the MQTT 3.1.1 control packets the client exchanges with
//! a broker and the traits for encoding and decoding them to and from a byte
//! buffer. Decoders operate on exactly one frame; use [`frame_length`] to find
//! frame boundaries in a stream of received bytes.

use crate::error::ProtocolError;
use crate::util::{
    self, read_u16, read_utf8_string, utf8_string_len, write_u16, write_utf8_string,
};
use heapless::Vec;

/// Maximum number of topic filters carried by one SUBSCRIBE / SUBACK.
pub const MAX_SUBSCRIBE_TOPICS: usize = 8;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::MalformedPacket),
        }
    }
}

/// A trait for packets that can be encoded into a byte buffer.
pub trait EncodePacket {
    /// First byte of the fixed header: packet type and flags.
    fn header(&self) -> u8;

    /// Length of the variable header plus payload.
    fn remaining_length(&self) -> usize;

    /// Writes the variable header and payload starting at `cursor`.
    fn encode_body(&self, cursor: &mut usize, buf: &mut [u8]) -> Result<(), ProtocolError>;

    /// Total number of bytes `encode` will write.
    fn encoded_len(&self) -> usize {
        let remaining = self.remaining_length();
        1 + util::variable_byte_integer_len(remaining) + remaining
    }

    /// Encodes the whole packet, returning the number of bytes written.
    ///
    /// Nothing is written when `buf` is too small.
    fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        if buf.len() < self.encoded_len() {
            return Err(ProtocolError::PacketTooLarge);
        }
        buf[0] = self.header();
        let mut cursor = 1;
        util::write_variable_byte_integer(&mut cursor, buf, self.remaining_length())?;
        self.encode_body(&mut cursor, buf)?;
        Ok(cursor)
    }
}

/// A trait for packets that can be decoded from a single frame.
pub trait DecodePacket<'a>: Sized {
    fn decode(frame: &'a [u8]) -> Result<Self, ProtocolError>;
}

/// An enumeration of all MQTT control packets understood by the client.
#[derive(Debug)]
pub enum MqttPacket<'a> {
    Connect(Connect<'a>),
    ConnAck(ConnAck),
    Publish(Publish<'a>),
    PubAck(PubAck),
    Subscribe(Subscribe<'a>),
    SubAck(SubAck),
    PingReq,
    PingResp,
    Disconnect,
}

/// Returns the length of the first complete frame in `buf`.
///
/// `Ok(None)` means more bytes are needed before the frame is complete.
pub fn frame_length(buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let Some(rest) = buf.get(1..) else {
        return Ok(None);
    };
    let Some((remaining, used)) = util::decode_variable_byte_integer(rest)? else {
        return Ok(None);
    };
    let total = 1 + used + remaining;
    Ok((buf.len() >= total).then_some(total))
}

/// Decodes one complete frame into an `MqttPacket`.
pub fn decode(frame: &[u8]) -> Result<MqttPacket<'_>, ProtocolError> {
    let first = *frame.first().ok_or(ProtocolError::MalformedPacket)?;
    let packet_type = first >> 4;
    let packet = match packet_type {
        1 => MqttPacket::Connect(Connect::decode(frame)?),
        2 => MqttPacket::ConnAck(ConnAck::decode(frame)?),
        3 => MqttPacket::Publish(Publish::decode(frame)?),
        4 => MqttPacket::PubAck(PubAck::decode(frame)?),
        8 => MqttPacket::Subscribe(Subscribe::decode(frame)?),
        9 => MqttPacket::SubAck(SubAck::decode(frame)?),
        12 => {
            split_frame(frame)?;
            MqttPacket::PingReq
        }
        13 => {
            split_frame(frame)?;
            MqttPacket::PingResp
        }
        14 => {
            split_frame(frame)?;
            MqttPacket::Disconnect
        }
        _ => return Err(ProtocolError::InvalidPacketType(packet_type)),
    };
    Ok(packet)
}

/// Splits a frame into its header flags and its body, checking that the
/// declared remaining length matches the frame exactly.
fn split_frame(frame: &[u8]) -> Result<(u8, &[u8]), ProtocolError> {
    let first = *frame.first().ok_or(ProtocolError::MalformedPacket)?;
    let mut cursor = 1;
    let remaining = util::read_variable_byte_integer(&mut cursor, frame)?;
    if frame.len() != cursor + remaining {
        return Err(ProtocolError::MalformedPacket);
    }
    Ok((first & 0x0F, &frame[cursor..]))
}

// --- CONNECT Packet ---
#[derive(Debug)]
pub struct Connect<'a> {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: &'a str,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
}

impl<'a> Connect<'a> {
    pub fn new(client_id: &'a str, keep_alive: u16, clean_session: bool) -> Self {
        Self {
            client_id,
            keep_alive,
            clean_session,
            username: None,
            password: None,
        }
    }

    /// Attaches credentials. Empty strings are treated as absent.
    pub fn with_credentials(mut self, username: &'a str, password: &'a str) -> Self {
        self.username = (!username.is_empty()).then_some(username);
        self.password = (!password.is_empty()).then_some(password);
        self
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.clean_session {
            flags |= 0x02;
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        flags
    }
}

impl EncodePacket for Connect<'_> {
    fn header(&self) -> u8 {
        0x10
    }

    fn remaining_length(&self) -> usize {
        utf8_string_len(PROTOCOL_NAME)
            + 1 // protocol level
            + 1 // connect flags
            + 2 // keep alive
            + utf8_string_len(self.client_id)
            + self.username.map_or(0, utf8_string_len)
            + self.password.map_or(0, utf8_string_len)
    }

    fn encode_body(&self, cursor: &mut usize, buf: &mut [u8]) -> Result<(), ProtocolError> {
        write_utf8_string(cursor, buf, PROTOCOL_NAME)?;
        buf[*cursor] = PROTOCOL_LEVEL;
        buf[*cursor + 1] = self.flags();
        *cursor += 2;
        write_u16(cursor, buf, self.keep_alive)?;
        write_utf8_string(cursor, buf, self.client_id)?;
        if let Some(username) = self.username {
            write_utf8_string(cursor, buf, username)?;
        }
        if let Some(password) = self.password {
            write_utf8_string(cursor, buf, password)?;
        }
        Ok(())
    }
}

impl<'a> DecodePacket<'a> for Connect<'a> {
    fn decode(frame: &'a [u8]) -> Result<Self, ProtocolError> {
        let (_, body) = split_frame(frame)?;
        let mut cursor = 0;
        if read_utf8_string(&mut cursor, body)? != PROTOCOL_NAME {
            return Err(ProtocolError::MalformedPacket);
        }
        let level = *body.get(cursor).ok_or(ProtocolError::MalformedPacket)?;
        let flags = *body.get(cursor + 1).ok_or(ProtocolError::MalformedPacket)?;
        if level != PROTOCOL_LEVEL {
            return Err(ProtocolError::MalformedPacket);
        }
        cursor += 2;
        let keep_alive = read_u16(&mut cursor, body)?;
        let client_id = read_utf8_string(&mut cursor, body)?;
        let username = if flags & 0x80 != 0 {
            Some(read_utf8_string(&mut cursor, body)?)
        } else {
            None
        };
        let password = if flags & 0x40 != 0 {
            Some(read_utf8_string(&mut cursor, body)?)
        } else {
            None
        };
        Ok(Self {
            clean_session: flags & 0x02 != 0,
            keep_alive,
            client_id,
            username,
            password,
        })
    }
}

// --- CONNACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: u8,
}

impl EncodePacket for ConnAck {
    fn header(&self) -> u8 {
        0x20
    }

    fn remaining_length(&self) -> usize {
        2
    }

    fn encode_body(&self, cursor: &mut usize, buf: &mut [u8]) -> Result<(), ProtocolError> {
        buf[*cursor] = self.session_present as u8;
        buf[*cursor + 1] = self.return_code;
        *cursor += 2;
        Ok(())
    }
}

impl DecodePacket<'_> for ConnAck {
    fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let (_, body) = split_frame(frame)?;
        let [ack_flags, return_code] = body else {
            return Err(ProtocolError::MalformedPacket);
        };
        Ok(Self {
            session_present: (ack_flags & 0x01) != 0,
            return_code: *return_code,
        })
    }
}

// --- PUBLISH Packet ---
#[derive(Debug)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub qos: QoS,
    pub retain: bool,
    pub payload: &'a [u8],
    pub packet_id: Option<u16>,
}

impl<'a> Publish<'a> {
    /// A QoS 0 publish without the retain flag.
    pub fn new(topic: &'a str, payload: &'a [u8]) -> Self {
        Self {
            topic,
            qos: QoS::AtMostOnce,
            retain: false,
            payload,
            packet_id: None,
        }
    }
}

impl EncodePacket for Publish<'_> {
    fn header(&self) -> u8 {
        0x30 | ((self.qos as u8) << 1) | self.retain as u8
    }

    fn remaining_length(&self) -> usize {
        let packet_id = if self.qos != QoS::AtMostOnce { 2 } else { 0 };
        utf8_string_len(self.topic) + packet_id + self.payload.len()
    }

    fn encode_body(&self, cursor: &mut usize, buf: &mut [u8]) -> Result<(), ProtocolError> {
        write_utf8_string(cursor, buf, self.topic)?;
        if self.qos != QoS::AtMostOnce {
            write_u16(cursor, buf, self.packet_id.unwrap_or(1))?;
        }
        buf[*cursor..*cursor + self.payload.len()].copy_from_slice(self.payload);
        *cursor += self.payload.len();
        Ok(())
    }
}

impl<'a> DecodePacket<'a> for Publish<'a> {
    fn decode(frame: &'a [u8]) -> Result<Self, ProtocolError> {
        let (flags, body) = split_frame(frame)?;
        let qos = QoS::try_from((flags >> 1) & 0x03)?;
        let mut cursor = 0;
        let topic = read_utf8_string(&mut cursor, body)?;
        let packet_id = if qos != QoS::AtMostOnce {
            Some(read_u16(&mut cursor, body)?)
        } else {
            None
        };
        Ok(Self {
            topic,
            qos,
            retain: flags & 0x01 != 0,
            payload: &body[cursor..],
            packet_id,
        })
    }
}

// --- PUBACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubAck {
    pub packet_id: u16,
}

impl EncodePacket for PubAck {
    fn header(&self) -> u8 {
        0x40
    }

    fn remaining_length(&self) -> usize {
        2
    }

    fn encode_body(&self, cursor: &mut usize, buf: &mut [u8]) -> Result<(), ProtocolError> {
        write_u16(cursor, buf, self.packet_id)
    }
}

impl DecodePacket<'_> for PubAck {
    fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let (_, body) = split_frame(frame)?;
        if body.len() != 2 {
            return Err(ProtocolError::MalformedPacket);
        }
        let mut cursor = 0;
        Ok(Self {
            packet_id: read_u16(&mut cursor, body)?,
        })
    }
}

// --- SUBSCRIBE Packet ---
#[derive(Debug)]
pub struct Subscribe<'a> {
    pub packet_id: u16,
    pub topics: Vec<(&'a str, QoS), MAX_SUBSCRIBE_TOPICS>,
}

impl<'a> Subscribe<'a> {
    /// Creates a new Subscribe packet with a single topic.
    pub fn new(packet_id: u16, topic: &'a str, qos: QoS) -> Self {
        let mut topics = Vec::new();
        let _ = topics.push((topic, qos));
        Self { packet_id, topics }
    }
}

impl EncodePacket for Subscribe<'_> {
    fn header(&self) -> u8 {
        // SUBSCRIBE packet type (8) with reserved bits (0x02)
        0x82
    }

    fn remaining_length(&self) -> usize {
        2 + self
            .topics
            .iter()
            .map(|(topic, _)| utf8_string_len(topic) + 1)
            .sum::<usize>()
    }

    fn encode_body(&self, cursor: &mut usize, buf: &mut [u8]) -> Result<(), ProtocolError> {
        write_u16(cursor, buf, self.packet_id)?;
        for (topic, qos) in &self.topics {
            write_utf8_string(cursor, buf, topic)?;
            buf[*cursor] = *qos as u8;
            *cursor += 1;
        }
        Ok(())
    }
}

impl<'a> DecodePacket<'a> for Subscribe<'a> {
    fn decode(frame: &'a [u8]) -> Result<Self, ProtocolError> {
        let (_, body) = split_frame(frame)?;
        let mut cursor = 0;
        let packet_id = read_u16(&mut cursor, body)?;
        let mut topics = Vec::new();
        while cursor < body.len() {
            let topic = read_utf8_string(&mut cursor, body)?;
            let qos = QoS::try_from(*body.get(cursor).ok_or(ProtocolError::MalformedPacket)?)?;
            cursor += 1;
            topics
                .push((topic, qos))
                .map_err(|_| ProtocolError::PacketTooLarge)?;
        }
        Ok(Self { packet_id, topics })
    }
}

// --- SUBACK Packet ---
#[derive(Debug)]
pub struct SubAck {
    pub packet_id: u16,
    pub return_codes: Vec<u8, MAX_SUBSCRIBE_TOPICS>,
}

impl SubAck {
    /// Return code signalling a rejected subscription.
    pub const FAILURE: u8 = 0x80;
}

impl EncodePacket for SubAck {
    fn header(&self) -> u8 {
        0x90
    }

    fn remaining_length(&self) -> usize {
        2 + self.return_codes.len()
    }

    fn encode_body(&self, cursor: &mut usize, buf: &mut [u8]) -> Result<(), ProtocolError> {
        write_u16(cursor, buf, self.packet_id)?;
        for code in &self.return_codes {
            buf[*cursor] = *code;
            *cursor += 1;
        }
        Ok(())
    }
}

impl DecodePacket<'_> for SubAck {
    fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let (_, body) = split_frame(frame)?;
        let mut cursor = 0;
        let packet_id = read_u16(&mut cursor, body)?;
        let return_codes =
            Vec::from_slice(&body[cursor..]).map_err(|_| ProtocolError::PacketTooLarge)?;
        Ok(Self {
            packet_id,
            return_codes,
        })
    }
}

// --- PINGREQ Packet ---
#[derive(Debug)]
pub struct PingReq;

impl EncodePacket for PingReq {
    fn header(&self) -> u8 {
        0xC0
    }

    fn remaining_length(&self) -> usize {
        0
    }

    fn encode_body(&self, _cursor: &mut usize, _buf: &mut [u8]) -> Result<(), ProtocolError> {
        Ok(())
    }
}

// --- PINGRESP Packet ---
#[derive(Debug)]
pub struct PingResp;

impl EncodePacket for PingResp {
    fn header(&self) -> u8 {
        0xD0
    }

    fn remaining_length(&self) -> usize {
        0
    }

    fn encode_body(&self, _cursor: &mut usize, _buf: &mut [u8]) -> Result<(), ProtocolError> {
        Ok(())
    }
}

// --- DISCONNECT Packet ---
#[derive(Debug)]
pub struct Disconnect;

impl EncodePacket for Disconnect {
    fn header(&self) -> u8 {
        0xE0
    }

    fn remaining_length(&self) -> usize {
        0
    }

    fn encode_body(&self, _cursor: &mut usize, _buf: &mut [u8]) -> Result<(), ProtocolError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_to_vec<P: EncodePacket>(packet: &P) -> ([u8; 256], usize) {
        let mut buf = [0u8; 256];
        let len = packet.encode(&mut buf).unwrap();
        (buf, len)
    }

    #[test]
    fn connect_carries_credentials_and_keepalive() {
        let packet = Connect::new("dev-1", 30, true).with_credentials("user", "secret");
        let (buf, len) = encode_to_vec(&packet);

        assert_eq!(buf[0], 0x10);
        assert_eq!(len, packet.encoded_len());
        // 0x80 username, 0x40 password, 0x02 clean session
        assert_eq!(buf[9], 0xC2);

        let MqttPacket::Connect(decoded) = decode(&buf[..len]).unwrap() else {
            panic!("expected CONNECT");
        };
        assert_eq!(decoded.client_id, "dev-1");
        assert_eq!(decoded.keep_alive, 30);
        assert_eq!(decoded.username, Some("user"));
        assert_eq!(decoded.password, Some("secret"));
        assert!(decoded.clean_session);
    }

    #[test]
    fn connect_without_credentials_omits_flags() {
        let packet = Connect::new("", 10, true).with_credentials("", "");
        let (buf, len) = encode_to_vec(&packet);
        assert_eq!(buf[9], 0x02);
        assert_eq!(
            &buf[..len],
            &[0x10, 12, 0, 4, b'M', b'Q', b'T', b'T', 4, 0x02, 0, 10, 0, 0]
        );
    }

    #[test]
    fn connack_decodes_return_code() {
        let MqttPacket::ConnAck(ack) = decode(&[0x20, 0x02, 0x01, 0x05]).unwrap() else {
            panic!("expected CONNACK");
        };
        assert!(ack.session_present);
        assert_eq!(ack.return_code, 5);
    }

    #[test]
    fn connack_with_wrong_length_is_malformed() {
        assert!(matches!(
            decode(&[0x20, 0x03, 0x00, 0x00, 0x00]),
            Err(ProtocolError::MalformedPacket)
        ));
    }

    #[test]
    fn publish_qos0_layout() {
        let packet = Publish::new("a/b", b"hi");
        let (buf, len) = encode_to_vec(&packet);
        assert_eq!(&buf[..len], &[0x30, 7, 0, 3, b'a', b'/', b'b', b'h', b'i']);
    }

    #[test]
    fn publish_retain_sets_header_bit() {
        let mut packet = Publish::new("a", b"");
        packet.retain = true;
        let (buf, _) = encode_to_vec(&packet);
        assert_eq!(buf[0], 0x31);
    }

    #[test]
    fn publish_qos1_decodes_packet_id() {
        let frame = [0x32, 7, 0, 1, b't', 0x12, 0x34, b'o', b'k'];
        let MqttPacket::Publish(publish) = decode(&frame).unwrap() else {
            panic!("expected PUBLISH");
        };
        assert_eq!(publish.topic, "t");
        assert_eq!(publish.qos, QoS::AtLeastOnce);
        assert_eq!(publish.packet_id, Some(0x1234));
        assert_eq!(publish.payload, b"ok");
    }

    #[test]
    fn publish_with_qos3_is_malformed() {
        let frame = [0x36, 3, 0, 1, b't'];
        assert!(matches!(decode(&frame), Err(ProtocolError::MalformedPacket)));
    }

    #[test]
    fn publish_with_truncated_topic_is_malformed() {
        let frame = [0x30, 3, 0, 9, b't'];
        assert!(matches!(decode(&frame), Err(ProtocolError::MalformedPacket)));
    }

    #[test]
    fn subscribe_layout() {
        let packet = Subscribe::new(10, "a/+", QoS::AtMostOnce);
        let (buf, len) = encode_to_vec(&packet);
        assert_eq!(&buf[..len], &[0x82, 8, 0, 10, 0, 3, b'a', b'/', b'+', 0]);
    }

    #[test]
    fn suback_decodes_return_codes() {
        let MqttPacket::SubAck(ack) = decode(&[0x90, 0x04, 0x00, 0x07, 0x00, 0x80]).unwrap()
        else {
            panic!("expected SUBACK");
        };
        assert_eq!(ack.packet_id, 7);
        assert_eq!(ack.return_codes.as_slice(), &[0x00, SubAck::FAILURE]);
    }

    #[test]
    fn control_packets_are_two_bytes() {
        assert_eq!(encode_to_vec(&PingReq).0[..2], [0xC0, 0x00]);
        assert_eq!(encode_to_vec(&Disconnect).0[..2], [0xE0, 0x00]);
        assert_eq!(
            encode_to_vec(&PubAck { packet_id: 3 }).0[..4],
            [0x40, 0x02, 0x00, 0x03]
        );
        assert!(matches!(decode(&[0xD0, 0x00]), Ok(MqttPacket::PingResp)));
    }

    #[test]
    fn encode_into_short_buffer_writes_nothing() {
        let mut buf = [0xAAu8; 4];
        assert_eq!(
            Publish::new("topic", b"payload").encode(&mut buf),
            Err(ProtocolError::PacketTooLarge)
        );
        assert_eq!(buf, [0xAA; 4]);
    }

    #[test]
    fn unknown_packet_type_is_rejected() {
        assert!(matches!(
            decode(&[0xF0, 0x00]),
            Err(ProtocolError::InvalidPacketType(15))
        ));
    }

    #[test]
    fn frame_length_waits_for_complete_frames() {
        assert_eq!(frame_length(&[]), Ok(None));
        assert_eq!(frame_length(&[0x30]), Ok(None));
        assert_eq!(frame_length(&[0x30, 0x80]), Ok(None));
        assert_eq!(frame_length(&[0x30, 0x03, 0x00]), Ok(None));
        assert_eq!(frame_length(&[0xD0, 0x00, 0x30]), Ok(Some(2)));
        assert_eq!(frame_length(&[0x30, 0x80, 0x01]), Ok(None));
    }
}
