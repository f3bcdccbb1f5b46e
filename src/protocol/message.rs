use bytes::Bytes;

use crate::core::{Address, Error, Result, TestDefinition, TRANSPORT_HEADER_LEN};

/// Size of the message header: type byte followed by a big-endian sequence id
pub const HEADER_LEN: usize = 3;

/// Types of message carried inside a transport frame.
///
/// These sit inside the transport payload, so `Ack`/`Nack` are protocol level
/// replies and unrelated to the transport's own acknowledgments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Unconfigured or unrecognised message
    Invalid = 0,
    /// General success acknowledgment
    Ack = 1,
    /// General failure acknowledgment
    Nack = 2,
    /// Query whether a peer is ready to run a test
    TestQuery = 3,
    /// Reply that the sender is ready to run a test
    TestReady = 4,
    /// Carries a serialized test definition
    TestDefinition = 5,
    /// Burst packet
    TestPacket = 6,
    /// Liveness check
    Heartbeat = 7,
}

impl From<u8> for MessageType {
    fn from(value: u8) -> Self {
        match value {
            1 => MessageType::Ack,
            2 => MessageType::Nack,
            3 => MessageType::TestQuery,
            4 => MessageType::TestReady,
            5 => MessageType::TestDefinition,
            6 => MessageType::TestPacket,
            7 => MessageType::Heartbeat,
            _ => MessageType::Invalid,
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        value as u8
    }
}

/// Commands a responder acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Invalid,
    TestDef,
    Heartbeat,
}

impl From<MessageType> for CommandType {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::TestQuery => CommandType::TestDef,
            MessageType::Heartbeat => CommandType::Heartbeat,
            _ => CommandType::Invalid,
        }
    }
}

/// Fixed header preceding every payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: MessageType,
    pub sequence_id: u16,
}

/// A protocol message: header plus optional payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub payload: Bytes,
}

impl Message {
    /// Creates a message without payload
    pub fn empty(message_type: MessageType) -> Self {
        Message {
            header: MessageHeader {
                message_type,
                sequence_id: 0,
            },
            payload: Bytes::new(),
        }
    }

    pub fn query() -> Self {
        Self::empty(MessageType::TestQuery)
    }

    pub fn ready() -> Self {
        Self::empty(MessageType::TestReady)
    }

    pub fn heartbeat() -> Self {
        Self::empty(MessageType::Heartbeat)
    }

    pub fn ack() -> Self {
        Self::empty(MessageType::Ack)
    }

    /// Creates a message carrying a serialized test definition
    pub fn definition(definition: &TestDefinition) -> Result<Self> {
        let payload = bincode::serialize(definition)
            .map_err(|e| Error::codec(format!("Failed to serialize test definition: {}", e)))?;
        Ok(Message {
            header: MessageHeader {
                message_type: MessageType::TestDefinition,
                sequence_id: 0,
            },
            payload: Bytes::from(payload),
        })
    }

    /// Creates a burst packet
    pub fn packet(sequence_id: u16, payload: Bytes) -> Self {
        Message {
            header: MessageHeader {
                message_type: MessageType::TestPacket,
                sequence_id,
            },
            payload,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }

    pub fn sequence_id(&self) -> u16 {
        self.header.sequence_id
    }

    /// Bytes this message occupies inside a transport frame
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Decodes the payload of a definition message
    pub fn to_definition(&self) -> Result<TestDefinition> {
        if self.header.message_type != MessageType::TestDefinition {
            return Err(Error::protocol_violation(format!(
                "expected a test definition, got {:?}",
                self.header.message_type
            )));
        }
        bincode::deserialize(&self.payload)
            .map_err(|e| Error::codec(format!("Failed to deserialize test definition: {}", e)))
    }
}

/// A decoded message together with the transport addressing it arrived with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFrame {
    pub from: Address,
    pub to: Address,
    pub message: Message,
}

impl MessageFrame {
    pub fn message_type(&self) -> MessageType {
        self.message.message_type()
    }

    /// Length of the frame on air, transport header included
    pub fn wire_len(&self) -> usize {
        TRANSPORT_HEADER_LEN + self.message.encoded_len()
    }

    /// Whether the frame has the expected type and addressing
    pub fn matches(&self, message_type: MessageType, from: Address, to: Address) -> bool {
        self.message_type() == message_type && self.from == from && self.to == to
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RadioConfig;

    #[test]
    fn test_message_type_conversion() {
        for raw in 0u8..=7 {
            assert_eq!(u8::from(MessageType::from(raw)), raw);
        }
        assert_eq!(MessageType::from(200), MessageType::Invalid);
    }

    #[test]
    fn test_command_mapping() {
        assert_eq!(CommandType::from(MessageType::TestQuery), CommandType::TestDef);
        assert_eq!(CommandType::from(MessageType::Heartbeat), CommandType::Heartbeat);
        assert_eq!(CommandType::from(MessageType::TestReady), CommandType::Invalid);
        assert_eq!(CommandType::from(MessageType::Ack), CommandType::Invalid);
    }

    #[test]
    fn test_definition_payload() {
        let definition = TestDefinition::new("Test_A", 3, 10, 60, RadioConfig::BASE).unwrap();
        let message = Message::definition(&definition).unwrap();
        assert_eq!(message.message_type(), MessageType::TestDefinition);
        assert_eq!(message.to_definition().unwrap(), definition);

        // Other message types never yield a definition
        assert!(matches!(
            Message::ready().to_definition(),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_frame_matching() {
        let frame = MessageFrame {
            from: 0x41,
            to: 0x81,
            message: Message::ready(),
        };
        assert!(frame.matches(MessageType::TestReady, 0x41, 0x81));
        assert!(!frame.matches(MessageType::TestReady, 0x42, 0x81));
        assert!(!frame.matches(MessageType::TestQuery, 0x41, 0x81));
        assert_eq!(frame.wire_len(), TRANSPORT_HEADER_LEN + HEADER_LEN);
    }
}
