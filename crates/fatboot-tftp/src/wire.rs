//! TFTP packet encoding and decoding.
//!
//! All integers on the wire are unsigned big-endian 16-bit. Senders
//! pack canonical forms; receivers tolerate UTF-8 in filenames but
//! require ASCII for the mode and for option names and values.

use std::time::Duration;

pub const TFTP_BLKSIZE: &str = "blksize";
pub const TFTP_TSIZE: &str = "tsize";
pub const TFTP_TIMEOUT: &str = "timeout";
pub const TFTP_UTIMEOUT: &str = "utimeout";

/// Option names the server understands; everything else is dropped
/// during negotiation.
pub const TFTP_OPTIONS: [&str; 4] = [TFTP_BLKSIZE, TFTP_TSIZE, TFTP_TIMEOUT, TFTP_UTIMEOUT];

pub const TFTP_MIN_BLKSIZE: usize = 8;
pub const TFTP_DEF_BLKSIZE: usize = 512;
pub const TFTP_MAX_BLKSIZE: usize = 65464;

pub const TFTP_MIN_TIMEOUT: Duration = Duration::from_millis(10);
pub const TFTP_DEF_TIMEOUT: Duration = Duration::from_secs(1);
pub const TFTP_MAX_TIMEOUT: Duration = Duration::from_secs(255);

/// The transfer mode of a read request. `mail` is long dead and write
/// requests are not served, so only these two exist here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Octet,
    Netascii,
}

impl Mode {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "octet" => Some(Mode::Octet),
            "netascii" => Some(Mode::Netascii),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Octet => "octet",
            Mode::Netascii => "netascii",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
enum OpCode {
    Rrq = 1,
    Wrq = 2,
    Data = 3,
    Ack = 4,
    Error = 5,
    Oack = 6,
}

/// TFTP error codes, as carried in ERROR packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    Undefined = 0,
    NotFound = 1,
    NotAuth = 2,
    DiskFull = 3,
    BadOp = 4,
    UnknownId = 5,
    Exists = 6,
    UnknownUser = 7,
    InvalidOpt = 8,
}

impl ErrorCode {
    /// Unknown codes decode as [`ErrorCode::Undefined`].
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::NotFound,
            2 => Self::NotAuth,
            3 => Self::DiskFull,
            4 => Self::BadOp,
            5 => Self::UnknownId,
            6 => Self::Exists,
            7 => Self::UnknownUser,
            8 => Self::InvalidOpt,
            _ => Self::Undefined,
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            Self::Undefined => "Undefined error",
            Self::NotFound => "File not found",
            Self::NotAuth => "Access violation",
            Self::DiskFull => "Disk full or allocation exceeded",
            Self::BadOp => "Illegal TFTP operation",
            Self::UnknownId => "Unknown transfer ID",
            Self::Exists => "File already exists",
            Self::UnknownUser => "No such user",
            Self::InvalidOpt => "Invalid options",
        }
    }
}

/// Errors raised while decoding a datagram.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("truncated packet")]
    Truncated,

    #[error("unknown opcode {0}")]
    BadOpcode(u16),

    /// A well-formed packet for an operation this server does not
    /// perform (write requests).
    #[error("unsupported operation {0}")]
    Unsupported(&'static str),

    #[error("badly formed packet: {0}")]
    Malformed(String),
}

/// One TFTP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Rrq {
        filename: String,
        mode: Mode,
        /// Options in client order, names and values lowercased.
        options: Vec<(String, String)>,
    },
    Data {
        block: u16,
        data: Vec<u8>,
    },
    Ack {
        block: u16,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    Oack {
        options: Vec<(String, String)>,
    },
}

impl Packet {
    pub fn error(code: ErrorCode) -> Self {
        Packet::Error {
            code,
            message: code.default_message().into(),
        }
    }

    pub fn error_with(code: ErrorCode, message: impl Into<String>) -> Self {
        Packet::Error {
            code,
            message: message.into(),
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Packet, WireError> {
        if buf.len() < 2 {
            return Err(WireError::Truncated);
        }
        let opcode = u16::from_be_bytes([buf[0], buf[1]]);
        let body = &buf[2..];
        match opcode {
            x if x == OpCode::Rrq as u16 => parse_rrq(body),
            x if x == OpCode::Wrq as u16 => Err(WireError::Unsupported("WRQ")),
            x if x == OpCode::Data as u16 => {
                if body.len() < 2 {
                    return Err(WireError::Truncated);
                }
                Ok(Packet::Data {
                    block: u16::from_be_bytes([body[0], body[1]]),
                    data: body[2..].to_vec(),
                })
            }
            x if x == OpCode::Ack as u16 => {
                if body.len() < 2 {
                    return Err(WireError::Truncated);
                }
                Ok(Packet::Ack {
                    block: u16::from_be_bytes([body[0], body[1]]),
                })
            }
            x if x == OpCode::Error as u16 => {
                if body.len() < 2 {
                    return Err(WireError::Truncated);
                }
                let code = ErrorCode::from_u16(u16::from_be_bytes([body[0], body[1]]));
                let message = body[2..]
                    .split(|&b| b == 0)
                    .next()
                    .unwrap_or(&[])
                    .iter()
                    .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
                    .collect();
                Ok(Packet::Error { code, message })
            }
            x if x == OpCode::Oack as u16 => Ok(Packet::Oack {
                options: parse_options(body)?,
            }),
            other => Err(WireError::BadOpcode(other)),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Packet::Rrq {
                filename,
                mode,
                options,
            } => {
                out.extend((OpCode::Rrq as u16).to_be_bytes());
                out.extend(filename.as_bytes());
                out.push(0);
                out.extend(mode.as_str().as_bytes());
                out.push(0);
                push_options(&mut out, options);
            }
            Packet::Data { block, data } => {
                out.extend((OpCode::Data as u16).to_be_bytes());
                out.extend(block.to_be_bytes());
                out.extend(data);
            }
            Packet::Ack { block } => {
                out.extend((OpCode::Ack as u16).to_be_bytes());
                out.extend(block.to_be_bytes());
            }
            Packet::Error { code, message } => {
                out.extend((OpCode::Error as u16).to_be_bytes());
                out.extend((*code as u16).to_be_bytes());
                out.extend(message.as_bytes());
                out.push(0);
            }
            Packet::Oack { options } => {
                out.extend((OpCode::Oack as u16).to_be_bytes());
                push_options(&mut out, options);
            }
        }
        out
    }
}

fn push_options(out: &mut Vec<u8>, options: &[(String, String)]) {
    for (name, value) in options {
        out.extend(name.as_bytes());
        out.push(0);
        out.extend(value.as_bytes());
        out.push(0);
    }
}

fn parse_rrq(body: &[u8]) -> Result<Packet, WireError> {
    let mut fields = body.split(|&b| b == 0);
    let filename = fields
        .next()
        .filter(|f| !f.is_empty() && f.iter().all(|&b| b >= 0x20))
        .ok_or_else(|| WireError::Malformed("badly formed RRQ packet".into()))?;
    // ASCII is a strict subset of UTF-8 and UTF-8 cannot carry NULs, so
    // there is no harm in tolerating UTF-8 filenames
    let filename = String::from_utf8(filename.to_vec())
        .map_err(|_| WireError::Malformed("filename is not valid UTF-8".into()))?;
    let mode = fields
        .next()
        .filter(|m| !m.is_empty() && m.iter().all(u8::is_ascii_alphabetic))
        .ok_or_else(|| WireError::Malformed("badly formed RRQ packet".into()))?;
    let mode = Mode::parse(std::str::from_utf8(mode).expect("checked ASCII"))
        .ok_or_else(|| WireError::Malformed("unsupported file mode".into()))?;
    let rest: Vec<&[u8]> = fields.collect();
    // A trailing empty element is the artifact of the final NUL
    let rest = match rest.split_last() {
        Some((last, head)) if last.is_empty() => head,
        _ => &rest[..],
    };
    let mut options = Vec::new();
    for pair in rest.chunks(2) {
        let [name, value] = pair else {
            return Err(WireError::Malformed("dangling option name".into()));
        };
        if name.is_empty() || !name.iter().all(u8::is_ascii) || !value.iter().all(u8::is_ascii) {
            return Err(WireError::Malformed("non-ASCII option".into()));
        }
        options.push((
            std::str::from_utf8(name).expect("checked ASCII").to_ascii_lowercase(),
            std::str::from_utf8(value).expect("checked ASCII").to_ascii_lowercase(),
        ));
    }
    Ok(Packet::Rrq {
        filename,
        mode,
        options,
    })
}

fn parse_options(body: &[u8]) -> Result<Vec<(String, String)>, WireError> {
    let fields: Vec<&[u8]> = body.split(|&b| b == 0).collect();
    let fields = match fields.split_last() {
        Some((last, head)) if last.is_empty() => head,
        _ => &fields[..],
    };
    let mut options = Vec::new();
    for pair in fields.chunks(2) {
        let [name, value] = pair else {
            return Err(WireError::Malformed("dangling option name".into()));
        };
        if !name.iter().all(u8::is_ascii) || !value.iter().all(u8::is_ascii) {
            return Err(WireError::Malformed("non-ASCII option".into()));
        }
        options.push((
            std::str::from_utf8(name).expect("checked ASCII").to_ascii_lowercase(),
            std::str::from_utf8(value).expect("checked ASCII").to_ascii_lowercase(),
        ));
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rrq_round_trip() {
        let packet = Packet::Rrq {
            filename: "cmdline.txt".into(),
            mode: Mode::Octet,
            options: vec![("blksize".into(), "128".into())],
        };
        let bytes = packet.to_bytes();
        assert_eq!(
            bytes,
            b"\x00\x01cmdline.txt\0octet\0blksize\0128\0".to_vec()
        );
        assert_eq!(Packet::parse(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_rrq_mode_case_and_option_order() {
        let bytes = b"\x00\x01f\0NETASCII\0TSIZE\00\0Blksize\01432\0";
        let Packet::Rrq {
            mode, options, ..
        } = Packet::parse(bytes).unwrap()
        else {
            panic!("not an RRQ");
        };
        assert_eq!(mode, Mode::Netascii);
        assert_eq!(
            options,
            vec![
                ("tsize".to_string(), "0".to_string()),
                ("blksize".to_string(), "1432".to_string()),
            ]
        );
    }

    #[test]
    fn test_rrq_bad_mode_rejected() {
        assert!(matches!(
            Packet::parse(b"\x00\x01f\0mail\0"),
            Err(WireError::Malformed(_))
        ));
        assert!(matches!(
            Packet::parse(b"\x00\x01\0octet\0"),
            Err(WireError::Malformed(_))
        ));
    }

    #[test]
    fn test_wrq_unsupported() {
        assert!(matches!(
            Packet::parse(b"\x00\x02f\0octet\0"),
            Err(WireError::Unsupported("WRQ"))
        ));
    }

    #[test]
    fn test_data_ack_round_trip() {
        let data = Packet::Data {
            block: 7,
            data: vec![1, 2, 3],
        };
        assert_eq!(data.to_bytes(), vec![0, 3, 0, 7, 1, 2, 3]);
        assert_eq!(Packet::parse(&data.to_bytes()).unwrap(), data);

        let ack = Packet::Ack { block: 65535 };
        assert_eq!(ack.to_bytes(), vec![0, 4, 0xFF, 0xFF]);
        assert_eq!(Packet::parse(&ack.to_bytes()).unwrap(), ack);
    }

    #[test]
    fn test_error_round_trip_and_unknown_code() {
        let err = Packet::error(ErrorCode::NotFound);
        let bytes = err.to_bytes();
        assert_eq!(&bytes[..4], &[0, 5, 0, 1]);
        assert_eq!(*bytes.last().unwrap(), 0);
        assert_eq!(Packet::parse(&bytes).unwrap(), err);

        // Unknown code 99 decodes as Undefined
        let Packet::Error { code, .. } =
            Packet::parse(b"\x00\x05\x00\x63boom\0").unwrap()
        else {
            panic!("not an error packet");
        };
        assert_eq!(code, ErrorCode::Undefined);
    }

    #[test]
    fn test_oack_round_trip() {
        let oack = Packet::Oack {
            options: vec![
                ("blksize".into(), "128".into()),
                ("tsize".into(), "42".into()),
            ],
        };
        assert_eq!(Packet::parse(&oack.to_bytes()).unwrap(), oack);
    }

    #[test]
    fn test_bad_opcode() {
        assert!(matches!(
            Packet::parse(b"\x00\x09whatever"),
            Err(WireError::BadOpcode(9))
        ));
        assert!(matches!(Packet::parse(b"\x00"), Err(WireError::Truncated)));
    }
}
