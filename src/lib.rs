//! # `coap-wire`
//!
//! A zero-copy codec for CoAP (Constrained Application Protocol) messages,
//! built for constrained devices that speak CoAP over UDP.
//!
//! The crate covers the wire format of [RFC 7252](https://datatracker.ietf.org/doc/html/rfc7252):
//! the 4-byte fixed header, the token, the delta-encoded option sequence and
//! the `0xFF`-marked payload. Decoding is a set of non-mutating views over a
//! caller-owned buffer; encoding appends into a caller-owned buffer through a
//! typestate builder. The codec never allocates.
//!
//! Retransmission, deduplication and transport concerns live above this
//! crate; it only reads and writes bytes.

#![no_std]
#![deny(clippy::cargo, missing_docs)]
#![warn(clippy::all)]

use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};

mod builder;
pub(crate) mod error;
mod parser;

pub use builder::MessageBuilder;
#[doc(hidden)]
pub use builder::{Complete, NeedsBuffer, NeedsHeader, NeedsMessageId, NeedsPayload, NeedsToken};
pub use error::CoapError;
pub use parser::{CoapOption, Message, OptionIterator, OptionStep};

/// Default UDP port for CoAP.
///
/// Source: [RFC 7252 6.1](https://datatracker.ietf.org/doc/html/rfc7252#section-6.1)
pub const DEFAULT_PORT: u16 = 5683;

/// Largest datagram this codec is expected to handle: one UDP payload that
/// fits an unfragmented Ethernet frame.
pub const MAX_DATAGRAM_SIZE: usize = 1460;

/// Size of the fixed CoAP header in bytes.
pub const HEADER_SIZE: usize = 4;

/// Maximum token length in bytes. Token-length values `9..=15` are reserved.
///
/// Source: [RFC 7252 3](https://datatracker.ietf.org/doc/html/rfc7252#section-3)
pub const MAX_TOKEN_LENGTH: usize = 8;

/// The byte separating the option sequence from the payload. Only present
/// when at least one payload byte follows.
pub const PAYLOAD_MARKER: u8 = 0xFF;

#[macro_export]
/// Converts a CoAP code into a u8 value.
macro_rules! coap_code {
    ($class:expr, $detail:expr) => {{
        const CLASS: u8 = $class;
        const DETAIL: u8 = $detail;

        const {
            assert!(CLASS <= 0b111, "CoAP class must be between 0 and 7");
            assert!(DETAIL <= 0b11111, "CoAP detail must be between 0 and 31");
        };

        (CLASS << 5) | DETAIL
    }};
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
/// CoAP specification version
pub enum Version {
    /// Version 1 ([RFC 7252](https://datatracker.ietf.org/doc/html/rfc7252))
    V1 = 0b01,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
/// CoAP message type
pub enum MessageType {
    /// A message that requires an acknowledgement. When no packets are lost,
    /// each Confirmable message elicits exactly one return message of type
    /// [`Acknowledgement`](MessageType::Acknowledgement) or
    /// [`Reset`](MessageType::Reset).
    ///
    /// Source: [RFC 7252 1.2](https://datatracker.ietf.org/doc/html/rfc7252#section-1.2)
    Confirmable = 0,
    /// A message that does not require an acknowledgement, typically used for
    /// data that is repeated regularly anyway, such as sensor readings.
    ///
    /// Source: [RFC 7252 1.2](https://datatracker.ietf.org/doc/html/rfc7252#section-1.2)
    NonConfirmable = 1,
    /// Acknowledges that a specific Confirmable message arrived. May also
    /// carry a piggybacked response.
    ///
    /// Source: [RFC 7252 1.2](https://datatracker.ietf.org/doc/html/rfc7252#section-1.2)
    Acknowledgement = 2,
    /// Indicates that a specific message was received but some context is
    /// missing to process it, usually because the receiver has rebooted.
    /// Provoking a Reset (by sending an Empty Confirmable message) doubles as
    /// a cheap liveness check ("CoAP ping").
    ///
    /// Source: [RFC 7252 1.2](https://datatracker.ietf.org/doc/html/rfc7252#section-1.2)
    Reset = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
/// The CoAP code register: request methods, response codes and the Empty
/// code, surfaced as the raw `class.detail` byte.
///
/// Decoding accepts exactly this set; any other code byte is rejected as
/// unknown.
///
/// Source: [RFC 7252 12.1](https://datatracker.ietf.org/doc/html/rfc7252#section-12.1)
pub enum Code {
    /// The Empty code 0.00, used for bare ACK/RST messages and for CoAP ping.
    Empty = coap_code!(0, 00),

    /// The GET method retrieves the representation of the resource identified
    /// by the request URI. Safe and idempotent.
    ///
    /// Source: [RFC 7252 5.8.1](https://datatracker.ietf.org/doc/html/rfc7252#section-5.8.1)
    Get = coap_code!(0, 01),
    /// The POST method requests that the enclosed representation be
    /// processed; usually this creates or updates a resource. Neither safe
    /// nor idempotent.
    ///
    /// Source: [RFC 7252 5.8.2](https://datatracker.ietf.org/doc/html/rfc7252#section-5.8.2)
    Post = coap_code!(0, 02),
    /// The PUT method requests that the resource identified by the request
    /// URI be updated or created with the enclosed representation. Not safe
    /// but idempotent.
    ///
    /// Source: [RFC 7252 5.8.3](https://datatracker.ietf.org/doc/html/rfc7252#section-5.8.3)
    Put = coap_code!(0, 03),
    /// The DELETE method requests that the resource identified by the request
    /// URI be deleted. Not safe but idempotent.
    ///
    /// Source: [RFC 7252 5.8.4](https://datatracker.ietf.org/doc/html/rfc7252#section-5.8.4)
    Delete = coap_code!(0, 04),

    /// 2.01 Created, like HTTP 201 but only used in response to POST and PUT.
    Created = coap_code!(2, 01),
    /// 2.02 Deleted, used in response to DELETE and to POSTs that delete.
    Deleted = coap_code!(2, 02),
    /// 2.03 Valid, indicates that the representation identified by the ETag
    /// option is still current.
    Valid = coap_code!(2, 03),
    /// 2.04 Changed, like HTTP 204 but only used in response to POST and PUT.
    Changed = coap_code!(2, 04),
    /// 2.05 Content, like HTTP 200 but only used in response to GET.
    Content = coap_code!(2, 05),

    /// 4.00 Bad Request.
    BadRequest = coap_code!(4, 00),
    /// 4.01 Unauthorized.
    Unauthorized = coap_code!(4, 01),
    /// 4.02 Bad Option: one or more options could not be understood.
    BadOption = coap_code!(4, 02),
    /// 4.03 Forbidden.
    Forbidden = coap_code!(4, 03),
    /// 4.04 Not Found.
    NotFound = coap_code!(4, 04),
    /// 4.05 Method Not Allowed.
    MethodNotAllowed = coap_code!(4, 05),
    /// 4.06 Not Acceptable.
    NotAcceptable = coap_code!(4, 06),
    /// 4.12 Precondition Failed.
    PreconditionFailed = coap_code!(4, 12),
    /// 4.13 Request Entity Too Large. The response SHOULD include a Size1
    /// option naming the largest request entity the server will take.
    RequestEntityTooLarge = coap_code!(4, 13),
    /// 4.15 Unsupported Content-Format.
    UnsupportedContentFormat = coap_code!(4, 15),

    /// 5.00 Internal Server Error.
    InternalServerError = coap_code!(5, 00),
    /// 5.01 Not Implemented.
    NotImplemented = coap_code!(5, 01),
    /// 5.02 Bad Gateway.
    BadGateway = coap_code!(5, 02),
    /// 5.03 Service Unavailable. Uses Max-Age in place of HTTP Retry-After.
    ServiceUnavailable = coap_code!(5, 03),
    /// 5.04 Gateway Timeout.
    GatewayTimeout = coap_code!(5, 04),
    /// 5.05 Proxying Not Supported.
    ProxyingNotSupported = coap_code!(5, 05),
}

impl Code {
    /// Extract the class portion of the code (upper 3 bits).
    pub fn class(&self) -> u8 {
        u8::from(*self) >> 5
    }

    /// Extract the detail portion of the code (lower 5 bits).
    pub fn detail(&self) -> u8 {
        u8::from(*self) & 0x1F
    }

    /// Check if this code names a request method.
    pub fn is_request(&self) -> bool {
        self.class() == 0 && self.detail() != 0
    }

    /// Check if this code names a response.
    pub fn is_response(&self) -> bool {
        matches!(self.class(), 2 | 4 | 5)
    }

    /// Check if this is the Empty code 0.00.
    pub fn is_empty(&self) -> bool {
        *self == Code::Empty
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
/// CoAP option numbers as defined in RFC 7252.
///
/// On the wire an option does not carry its number directly; each instance
/// carries a delta from the previous option's number, and the absolute number
/// is recovered while walking the sequence. Accumulated numbers can exceed
/// `u16::MAX`, hence the `u32` representation.
///
/// Source: [RFC 7252 5.10](https://datatracker.ietf.org/doc/html/rfc7252#section-5.10)
pub enum OptionNumber {
    /// Makes a request conditional on the current existence or ETag of the
    /// target resource. May occur multiple times; the condition holds if any
    /// instance matches.
    ///
    /// Source: [RFC 7252 5.10.8.1](https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.8.1)
    IfMatch = 1,
    /// The Internet host of the resource being requested. Typically only
    /// sent when an endpoint hosts multiple virtual servers.
    ///
    /// Source: [RFC 7252 5.10.1](https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.1)
    UriHost = 3,
    /// The entity-tag of the representation carried in a response, or in a
    /// request, the tags of representations the client already holds.
    ///
    /// Source: [RFC 7252 5.10.6](https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.6)
    Etag = 4,
    /// Makes a request conditional on the nonexistence of the target
    /// resource; carries no value.
    ///
    /// Source: [RFC 7252 5.10.8.2](https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.8.2)
    IfNoneMatch = 5,
    /// The transport-layer port number of the resource; defaults to the
    /// destination UDP port when absent.
    ///
    /// Source: [RFC 7252 5.10.1](https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.1)
    UriPort = 7,
    /// One segment of the absolute path of a resource created in response to
    /// a POST.
    ///
    /// Source: [RFC 7252 5.10.7](https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.7)
    LocationPath = 8,
    /// One segment of the absolute path to the target resource. May not be
    /// "." or "..".
    ///
    /// Source: [RFC 7252 5.10.1](https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.1)
    UriPath = 11,
    /// The representation format of the message payload, as a numeric
    /// identifier from the CoAP Content-Formats registry.
    ///
    /// Source: [RFC 7252 5.10.3](https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.3)
    ContentFormat = 12,
    /// The maximum time, in seconds, a response may be cached before it is
    /// considered not fresh. Defaults to 60 when absent.
    ///
    /// Source: [RFC 7252 5.10.5](https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.5)
    MaxAge = 14,
    /// One argument parameterizing the target resource.
    ///
    /// Source: [RFC 7252 5.10.1](https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.1)
    UriQuery = 15,
    /// The Content-Format acceptable to the client. If it cannot be honored,
    /// the server responds 4.06 Not Acceptable.
    ///
    /// Source: [RFC 7252 5.10.4](https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.4)
    Accept = 17,
    /// One argument of the query string of a resource created in response to
    /// a POST.
    ///
    /// Source: [RFC 7252 5.10.7](https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.7)
    LocationQuery = 20,
    /// The absolute URI of a request made through a forward-proxy. Takes
    /// precedence over the Uri-Host, Uri-Port, Uri-Path and Uri-Query
    /// options, which must not appear alongside it.
    ///
    /// Source: [RFC 7252 5.10.2](https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.2)
    ProxyUri = 35,
    /// Replaces the scheme of a URI assembled from the Uri-* options, for
    /// proxy requests that can otherwise be expressed with those options.
    ///
    /// Source: [RFC 7252 5.10.2](https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.2)
    ProxyScheme = 39,
    /// The size of the request entity: an estimate of the total
    /// representation size in a request, or in a 4.13 response, the maximum
    /// the server will take.
    ///
    /// Source: [RFC 7252 5.10.9](https://datatracker.ietf.org/doc/html/rfc7252#section-5.10.9)
    Size1 = 60,

    /// An option number this implementation does not recognize. Elective
    /// unknown options may be ignored; critical ones require a 4.02 (Bad
    /// Option) rejection.
    #[num_enum(catch_all)]
    Unknown(u32),
}

impl OptionNumber {
    /// Checks if the option number is critical.
    pub fn is_critical(&self) -> bool {
        u32::from(*self) & 1 == 1
    }

    /// Checks if the option number is unsafe to forward.
    pub fn is_unsafe(&self) -> bool {
        u32::from(*self) & 2 == 2
    }

    /// Checks if the option number is reserved by RFC 7252 and may never be
    /// placed in a message.
    pub fn is_reserved(&self) -> bool {
        matches!(u32::from(*self), 2 | 9 | 10 | 128 | 132 | 136 | 140)
    }
}

/// CoAP Content-Format identifiers from the CoAP Content-Formats registry,
/// carried in the Content-Format and Accept options.
///
/// Source: [RFC 7252 12.3](https://datatracker.ietf.org/doc/html/rfc7252#section-12.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum ContentFormat {
    /// text/plain; charset=utf-8
    TextPlain = 0,
    /// application/link-format
    ApplicationLinkFormat = 40,
    /// application/xml
    ApplicationXml = 41,
    /// application/octet-stream
    ApplicationOctetStream = 42,
    /// application/exi
    ApplicationExi = 47,
    /// application/json
    ApplicationJson = 50,

    /// A registered content format beyond the base set.
    #[num_enum(catch_all)]
    Unknown(u16),
}

/// Source of message-id values.
///
/// Message ids deduplicate messages at the transport layer and are normally
/// drawn from a platform RNG. The codec only consumes this single-call
/// interface; where the entropy comes from is the platform's business.
/// Closures returning `u16` implement it directly.
pub trait MessageIdSource {
    /// Returns the next 16-bit message id.
    fn get_random(&mut self) -> u16;
}

impl<F: FnMut() -> u16> MessageIdSource for F {
    fn get_random(&mut self) -> u16 {
        self()
    }
}
