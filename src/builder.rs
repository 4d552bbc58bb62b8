use core::marker::PhantomData;

use crate::error::CoapError;
use crate::{
    Code, HEADER_SIZE, MAX_TOKEN_LENGTH, MessageIdSource, MessageType, OptionNumber,
    PAYLOAD_MARKER, Version,
};

type BuilderResult<'buf, T> = core::result::Result<MessageBuilder<'buf, T>, CoapError>;

/// Largest value a delta or length field can carry: `u16::MAX` through the
/// 2-byte extension, plus its offset of 269.
const MAX_FIELD_VALUE: u32 = 65804;

/// Converts an unsigned integer to minimal byte representation (big-endian,
/// no leading zeros). According to RFC 7252 Section 3.2, 0 is represented as
/// an empty slice. Returns a tuple of (byte array, start index) where the
/// meaningful bytes are from start..8.
fn uint_to_minimal_bytes(value: u64) -> ([u8; 8], usize) {
    (value.to_be_bytes(), (value.leading_zeros() / 8) as usize)
}

/// Extra bytes a delta or length field needs beyond its nibble.
fn extension_len(field: u32) -> usize {
    match field {
        0..=12 => 0,
        13..=268 => 1,
        _ => 2,
    }
}

/// Size of one option header: the delta/length byte plus extensions.
fn option_header_len(delta: u32, value_len: u32) -> usize {
    1 + extension_len(delta) + extension_len(value_len)
}

/// Splits a delta or length field into its nibble and extension bytes.
fn encode_extended(field: u32) -> (u8, [u8; 2], usize) {
    match field {
        0..=12 => (field as u8, [0; 2], 0),
        13..=268 => (13, [(field - 13) as u8, 0], 1),
        _ => (14, ((field - 269) as u16).to_be_bytes(), 2),
    }
}

/// State for receiving the buffer.
#[derive(Debug)]
pub struct NeedsBuffer;
/// State for constructing the header.
#[derive(Debug)]
pub struct NeedsHeader;
/// State for adding the message ID.
#[derive(Debug)]
pub struct NeedsMessageId;
/// State for adding the token and setting the token length.
#[derive(Debug)]
pub struct NeedsToken;
/// State for adding options and/or payload.
#[derive(Debug)]
pub struct NeedsPayload;
/// State for completing the packet.
#[derive(Debug)]
pub struct Complete;

/// Builder for CoAP messages.
///
/// Writes append into a caller-owned buffer in wire order: header, message
/// id, token, options, payload. The typestate parameter enforces that order
/// at compile time, so the payload is always the last thing written and no
/// option can follow it.
#[derive(Debug)]
pub struct MessageBuilder<'buf, State> {
    buffer: &'buf mut [u8],
    offset: usize,
    last_option_number: u32,
    _state: PhantomData<State>,
}

impl<'buf, State> MessageBuilder<'buf, State> {
    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.offset
    }

    fn transition<Next>(self) -> MessageBuilder<'buf, Next> {
        MessageBuilder {
            buffer: self.buffer,
            offset: self.offset,
            last_option_number: self.last_option_number,
            _state: PhantomData,
        }
    }
}

impl<'buf> MessageBuilder<'buf, NeedsBuffer> {
    /// Create a new message builder over the given buffer, which must be able
    /// to hold at least the fixed header.
    pub fn new(buffer: &'buf mut [u8]) -> BuilderResult<'buf, NeedsHeader> {
        if buffer.len() < HEADER_SIZE {
            return Err(CoapError::InsufficientBuffer);
        }

        Ok(MessageBuilder {
            buffer,
            offset: 0,
            last_option_number: 0,
            _state: PhantomData,
        })
    }
}

impl<'buf> MessageBuilder<'buf, NeedsHeader> {
    /// Write the version, type and code fields.
    ///
    /// The token-length bits of the shared first byte are left clear and
    /// OR-ed in when the token is written.
    pub fn header(mut self, message_type: MessageType, code: Code) -> MessageBuilder<'buf, NeedsMessageId> {
        // ver 0..2 | type 2..4 | token_len 4..8 (set later)
        self.buffer[0] = (u8::from(Version::V1) << 6) | (u8::from(message_type) << 4);
        self.buffer[1] = u8::from(code);

        self.offset = 2;

        self.transition()
    }

    /// Convenience method for constructing an Empty message.
    pub fn empty(self, message_type: MessageType) -> MessageBuilder<'buf, NeedsMessageId> {
        self.header(message_type, Code::Empty)
    }

    /// Convenience method for constructing a CoAP ping (Empty + Confirmable).
    pub fn ping(self) -> MessageBuilder<'buf, NeedsMessageId> {
        self.header(MessageType::Confirmable, Code::Empty)
    }
}

impl<'buf> MessageBuilder<'buf, NeedsMessageId> {
    /// Write the message ID (big-endian). The header is complete after this.
    pub fn message_id(mut self, id: u16) -> MessageBuilder<'buf, NeedsToken> {
        self.buffer[self.offset..self.offset + 2].copy_from_slice(&id.to_be_bytes());
        self.offset += 2;

        self.transition()
    }

    /// Draw the message ID from the platform's random source.
    pub fn random_message_id(self, source: &mut impl MessageIdSource) -> MessageBuilder<'buf, NeedsToken> {
        let id = source.get_random();
        self.message_id(id)
    }
}

impl<'buf> MessageBuilder<'buf, NeedsToken> {
    /// Add a token of between 0 and 8 bytes.
    pub fn token(mut self, token: &[u8]) -> BuilderResult<'buf, NeedsPayload> {
        let token_len = token.len();
        if token_len > MAX_TOKEN_LENGTH {
            return Err(CoapError::InvalidTokenLength);
        }

        if self.offset + token_len > self.buffer.len() {
            return Err(CoapError::InsufficientBuffer);
        }

        // Update TKL in the shared first byte.
        self.buffer[0] |= token_len as u8 & 0x0F;

        self.buffer[self.offset..self.offset + token_len].copy_from_slice(token);
        self.offset += token_len;

        Ok(self.transition())
    }

    /// Skip adding a token (uses a zero-length token).
    pub fn no_token(self) -> BuilderResult<'buf, NeedsPayload> {
        // TKL is already set to 0, just transition state.
        Ok(self.transition())
    }
}

impl<'buf> MessageBuilder<'buf, NeedsPayload> {
    /// Append an option.
    ///
    /// Options must be appended in non-decreasing number order; the wire
    /// carries each option as a delta from its predecessor. All checks run
    /// before any byte is written, so a failed append leaves the buffer
    /// untouched.
    pub fn option(
        mut self,
        number: impl Into<OptionNumber>,
        value: &[u8],
    ) -> BuilderResult<'buf, NeedsPayload> {
        let number = number.into();
        if number.is_reserved() {
            return Err(CoapError::InvalidOption);
        }
        let number = u32::from(number);

        // The order check comes first: the wire delta is unsigned and cannot
        // express a regression.
        let Some(delta) = number.checked_sub(self.last_option_number) else {
            return Err(CoapError::OptionsOutOfOrder);
        };
        if delta > MAX_FIELD_VALUE {
            return Err(CoapError::InvalidOption);
        }

        let value_len = u32::try_from(value.len()).map_err(|_| CoapError::InvalidOption)?;
        if value_len > MAX_FIELD_VALUE {
            return Err(CoapError::InvalidOption);
        }

        let header_len = option_header_len(delta, value_len);
        if self.offset + header_len + value.len() > self.buffer.len() {
            return Err(CoapError::InsufficientBuffer);
        }

        let (delta_nibble, delta_ext, delta_ext_len) = encode_extended(delta);
        let (length_nibble, length_ext, length_ext_len) = encode_extended(value_len);

        // Write the header byte.
        self.buffer[self.offset] = (delta_nibble << 4) | length_nibble;
        self.offset += 1;

        // Write the delta and length extensions. Empty extensions write nothing.
        self.buffer[self.offset..self.offset + delta_ext_len]
            .copy_from_slice(&delta_ext[..delta_ext_len]);
        self.offset += delta_ext_len;

        self.buffer[self.offset..self.offset + length_ext_len]
            .copy_from_slice(&length_ext[..length_ext_len]);
        self.offset += length_ext_len;

        // Write the value.
        self.buffer[self.offset..self.offset + value.len()].copy_from_slice(value);
        self.offset += value.len();

        self.last_option_number = number;

        Ok(self)
    }

    /// Append an option with a UTF-8 string value.
    pub fn option_string(
        self,
        number: impl Into<OptionNumber>,
        value: &str,
    ) -> BuilderResult<'buf, NeedsPayload> {
        self.option(number, value.as_bytes())
    }

    /// Append an option with an unsigned integer value.
    /// The integer will be encoded with minimal bytes according to RFC 7252
    /// Section 3.2. The value 0 is encoded as an empty option value.
    pub fn option_uint(
        self,
        number: impl Into<OptionNumber>,
        value: impl Into<u64>,
    ) -> BuilderResult<'buf, NeedsPayload> {
        let (bytes, start) = uint_to_minimal_bytes(value.into());
        self.option(number, &bytes[start..])
    }

    /// Append the payload marker and the payload. This is terminal: nothing
    /// may be written after the payload.
    pub fn payload(mut self, payload: &[u8]) -> BuilderResult<'buf, Complete> {
        if payload.is_empty() {
            return Err(CoapError::InvalidPayload);
        }

        if self.offset + 1 + payload.len() > self.buffer.len() {
            return Err(CoapError::InsufficientBuffer);
        }

        self.buffer[self.offset] = PAYLOAD_MARKER;
        self.offset += 1;

        self.buffer[self.offset..self.offset + payload.len()].copy_from_slice(payload);
        self.offset += payload.len();

        Ok(self.transition())
    }

    /// Skip adding a payload. A message without payload carries no marker.
    pub fn no_payload(self) -> MessageBuilder<'buf, Complete> {
        self.transition()
    }
}

impl<'buf> MessageBuilder<'buf, Complete> {
    /// Finish, returning the written prefix of the buffer.
    pub fn build(self) -> &'buf [u8] {
        &self.buffer[..self.offset]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::Message;

    #[test]
    fn minimal_con_get() -> Result<(), CoapError> {
        let mut tx_buf = [0; 128];

        let packet = MessageBuilder::new(&mut tx_buf)?
            .header(MessageType::Confirmable, Code::Get)
            .message_id(0x1234)
            .no_token()?
            .no_payload()
            .build();

        assert_eq!(packet, &[0x40, 0x01, 0x12, 0x34]);

        Ok(())
    }

    #[test]
    fn header_length_is_fixed() -> Result<(), CoapError> {
        let mut tx_buf = [0; 128];

        let builder = MessageBuilder::new(&mut tx_buf)?
            .header(MessageType::Confirmable, Code::Get)
            .message_id(0x1234);
        assert_eq!(builder.len(), 4);

        let builder = builder.token(&[0xDE, 0xAD])?;
        assert_eq!(builder.len(), 6);

        Ok(())
    }

    #[test]
    fn uri_path_option_bytes() -> Result<(), CoapError> {
        let mut tx_buf = [0; 128];

        let packet = MessageBuilder::new(&mut tx_buf)?
            .header(MessageType::Confirmable, Code::Get)
            .message_id(0x1234)
            .no_token()?
            .option(OptionNumber::UriPath, b"a")?
            .option(OptionNumber::UriPath, b"b")?
            .no_payload()
            .build();

        assert_eq!(&packet[4..], &[0xB1, 0x61, 0x01, 0x62]);

        Ok(())
    }

    #[test]
    fn payload_bytes() -> Result<(), CoapError> {
        let mut tx_buf = [0; 128];

        let packet = MessageBuilder::new(&mut tx_buf)?
            .header(MessageType::Confirmable, Code::Post)
            .message_id(0x1234)
            .no_token()?
            .payload(b"hi")?
            .build();

        assert_eq!(&packet[4..], &[0xFF, 0x68, 0x69]);

        Ok(())
    }

    #[test]
    fn delta_escape_bytes() -> Result<(), CoapError> {
        let mut tx_buf = [0; 128];

        // Number 30 from previous 0: delta nibble 13, extension 30 - 13 = 17.
        let packet = MessageBuilder::new(&mut tx_buf)?
            .header(MessageType::Confirmable, Code::Get)
            .message_id(0x1234)
            .no_token()?
            .option(30u32, b"")?
            .no_payload()
            .build();

        assert_eq!(&packet[4..], &[0xD0, 0x11]);

        Ok(())
    }

    #[test]
    fn length_escape_bytes() -> Result<(), CoapError> {
        let mut tx_buf = [0; 512];

        let packet = MessageBuilder::new(&mut tx_buf)?
            .header(MessageType::Confirmable, Code::Post)
            .message_id(0x1234)
            .no_token()?
            .option(OptionNumber::UriPath, &[0x61; 269])?
            .no_payload()
            .build();

        // Length 269 is the first value needing the 2-byte escape.
        assert_eq!(&packet[4..7], &[0xBE, 0x00, 0x00]);
        assert_eq!(packet.len(), 4 + 3 + 269);

        Ok(())
    }

    #[test]
    fn out_of_order_option_rejected() -> Result<(), CoapError> {
        let mut buffer = [0; 64];
        {
            let builder = MessageBuilder::new(&mut buffer)?
                .header(MessageType::Confirmable, Code::Get)
                .message_id(0x1234)
                .no_token()?
                .option(OptionNumber::UriPath, b"a")?;
            assert_eq!(builder.len(), 6);

            let err = builder
                .option(OptionNumber::UriPort, &[0x16, 0x33])
                .unwrap_err();
            assert_eq!(err, CoapError::OptionsOutOfOrder);
        }

        // Nothing past the first option was written.
        assert_eq!(&buffer[..8], &[0x40, 0x01, 0x12, 0x34, 0xB1, 0x61, 0x00, 0x00]);

        Ok(())
    }

    #[test]
    fn reserved_option_rejected() -> Result<(), CoapError> {
        let mut tx_buf = [0; 64];

        let err = MessageBuilder::new(&mut tx_buf)?
            .header(MessageType::Confirmable, Code::Get)
            .message_id(0x1234)
            .no_token()?
            .option(2u32, b"")
            .unwrap_err();
        assert_eq!(err, CoapError::InvalidOption);

        let mut tx_buf = [0; 64];
        let err = MessageBuilder::new(&mut tx_buf)?
            .header(MessageType::Confirmable, Code::Get)
            .message_id(0x1234)
            .no_token()?
            .option(128u32, b"")
            .unwrap_err();
        assert_eq!(err, CoapError::InvalidOption);

        Ok(())
    }

    #[test]
    fn repeated_option_delta_zero() -> Result<(), CoapError> {
        let mut tx_buf = [0; 64];

        let builder = MessageBuilder::new(&mut tx_buf)?
            .header(MessageType::Confirmable, Code::Get)
            .message_id(0x1234)
            .no_token()?
            .option(OptionNumber::IfMatch, &[0x01])?
            .option(OptionNumber::IfMatch, &[0x02])?;

        // Same number twice is legal; the second instance has delta 0.
        assert_eq!(builder.len(), 4 + 2 + 2);

        Ok(())
    }

    #[test]
    fn token_too_long() -> Result<(), CoapError> {
        let mut tx_buf = [0; 64];

        let err = MessageBuilder::new(&mut tx_buf)?
            .header(MessageType::Confirmable, Code::Get)
            .message_id(0x1234)
            .token(&[0; 9])
            .unwrap_err();
        assert_eq!(err, CoapError::InvalidTokenLength);

        Ok(())
    }

    #[test]
    fn empty_payload_rejected() -> Result<(), CoapError> {
        let mut tx_buf = [0; 64];

        let err = MessageBuilder::new(&mut tx_buf)?
            .header(MessageType::Confirmable, Code::Post)
            .message_id(0x1234)
            .no_token()?
            .payload(b"")
            .unwrap_err();
        assert_eq!(err, CoapError::InvalidPayload);

        Ok(())
    }

    #[test]
    fn buffer_too_small() {
        let mut tx_buf = [0; 3];
        assert_eq!(
            MessageBuilder::new(&mut tx_buf).map(|_| ()),
            Err(CoapError::InsufficientBuffer)
        );

        let mut tx_buf = [0; 5];
        let err = MessageBuilder::new(&mut tx_buf)
            .unwrap()
            .header(MessageType::Confirmable, Code::Post)
            .message_id(0x1234)
            .no_token()
            .unwrap()
            .payload(b"too big")
            .unwrap_err();
        assert_eq!(err, CoapError::InsufficientBuffer);
    }

    #[test]
    fn option_growth_matches_header_sizing() -> Result<(), CoapError> {
        let mut tx_buf = [0; 2048];

        // Deltas 12, 13, 268 and 269 cross the three encodings.
        let builder = MessageBuilder::new(&mut tx_buf)?
            .header(MessageType::Confirmable, Code::Get)
            .message_id(0x1234)
            .no_token()?;
        assert_eq!(builder.len(), 4);

        let builder = builder.option(12u32, b"")?;
        assert_eq!(builder.len(), 4 + 1);

        let builder = builder.option(25u32, b"")?; // delta 13
        assert_eq!(builder.len(), 4 + 1 + 2);

        let builder = builder.option(293u32, b"")?; // delta 268
        assert_eq!(builder.len(), 4 + 1 + 2 + 2);

        let builder = builder.option(562u32, b"")?; // delta 269
        assert_eq!(builder.len(), 4 + 1 + 2 + 2 + 3);

        Ok(())
    }

    #[test]
    fn header_len_escape_boundaries() {
        assert_eq!(option_header_len(0, 0), 1);
        assert_eq!(option_header_len(12, 12), 1);
        assert_eq!(option_header_len(13, 0), 2);
        assert_eq!(option_header_len(268, 268), 3);
        assert_eq!(option_header_len(269, 0), 3);
        assert_eq!(option_header_len(269, 269), 5);
        assert_eq!(option_header_len(65804, 65804), 5);
    }

    #[test]
    fn random_message_id_uses_source() -> Result<(), CoapError> {
        let mut tx_buf = [0; 64];

        let packet = MessageBuilder::new(&mut tx_buf)?
            .header(MessageType::Confirmable, Code::Get)
            .random_message_id(&mut || 0xBEEF_u16)
            .no_token()?
            .no_payload()
            .build();

        assert_eq!(&packet[2..4], &[0xBE, 0xEF]);

        Ok(())
    }

    #[test]
    fn ping_message() -> Result<(), CoapError> {
        let mut tx_buf = [0; 64];

        let packet = MessageBuilder::new(&mut tx_buf)?
            .ping()
            .message_id(0x0042)
            .no_token()?
            .no_payload()
            .build();

        assert_eq!(packet, &[0x40, 0x00, 0x00, 0x42]);

        Ok(())
    }

    #[test]
    fn uint_to_minimal_bytes_boundaries() {
        let cases: [(u64, &[u8]); 6] = [
            (0, &[]),
            (1, &[1]),
            (255, &[255]),
            (256, &[1, 0]),
            (65535, &[255, 255]),
            (65536, &[1, 0, 0]),
        ];

        for (value, expected) in cases {
            let (bytes, start) = uint_to_minimal_bytes(value);
            assert_eq!(&bytes[start..], expected, "value {value}");
        }
    }

    #[test]
    fn option_uint_zero_is_empty() -> Result<(), CoapError> {
        let mut tx_buf = [0; 64];

        let packet = MessageBuilder::new(&mut tx_buf)?
            .header(MessageType::Confirmable, Code::Get)
            .message_id(0x1234)
            .no_token()?
            .option_uint(OptionNumber::Accept, 0u8)?
            .no_payload()
            .build();

        let message = Message::parse(packet).unwrap();
        let accept = message.option_at(0).unwrap();

        assert_eq!(accept.number, OptionNumber::Accept);
        assert_eq!(accept.value, &[]);
        assert_eq!(accept.as_uint(), Some(0));

        Ok(())
    }

    #[test]
    fn option_string_round_trip() -> Result<(), CoapError> {
        let mut tx_buf = [0; 64];

        let packet = MessageBuilder::new(&mut tx_buf)?
            .header(MessageType::Confirmable, Code::Get)
            .message_id(0x1234)
            .no_token()?
            .option_string(OptionNumber::UriHost, "example.org")?
            .no_payload()
            .build();

        let message = Message::parse(packet).unwrap();
        let host = message.option_at(0).unwrap();

        assert_eq!(host.number, OptionNumber::UriHost);
        assert_eq!(host.as_str(), Ok("example.org"));

        Ok(())
    }
}
