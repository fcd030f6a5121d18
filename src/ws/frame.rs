//! WebSocket frame parsing and serialization (RFC 6455 §5).

/// Largest payload a control frame may carry.
const MAX_CONTROL_PAYLOAD: usize = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn from_u8(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// One physical frame. `payload` is always unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// More bytes are needed before a frame can be decoded.
    Incomplete,
    ReservedBits,
    UnknownOpcode(u8),
    FragmentedControl,
    ControlTooLong(usize),
    TooLarge,
}

impl Frame {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Text,
            payload: text.into().into_bytes(),
        }
    }

    pub fn binary(payload: impl Into<Vec<u8>>, fin: bool) -> Self {
        Self {
            fin,
            opcode: Opcode::Binary,
            payload: payload.into(),
        }
    }

    pub fn continuation(payload: impl Into<Vec<u8>>, fin: bool) -> Self {
        Self {
            fin,
            opcode: Opcode::Continuation,
            payload: payload.into(),
        }
    }

    pub fn close(code: Option<u16>) -> Self {
        let payload = code.map(|c| c.to_be_bytes().to_vec()).unwrap_or_default();
        Self {
            fin: true,
            opcode: Opcode::Close,
            payload,
        }
    }

    pub fn ping(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Ping,
            payload: payload.into(),
        }
    }

    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode: Opcode::Pong,
            payload: payload.into(),
        }
    }

    /// Status code carried by a close frame, if any.
    pub fn close_code(&self) -> Option<u16> {
        if self.opcode != Opcode::Close || self.payload.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.payload[0], self.payload[1]]))
    }
}

/// Decodes one frame from the front of `buf`.
///
/// Returns the frame and the number of bytes it occupied. Masked payloads
/// (client to server) are unmasked; unmasked payloads are accepted as-is.
pub fn parse_frame(buf: &[u8]) -> Result<(Frame, usize), FrameError> {
    if buf.len() < 2 {
        return Err(FrameError::Incomplete);
    }

    let fin = buf[0] & 0x80 != 0;
    if buf[0] & 0x70 != 0 {
        return Err(FrameError::ReservedBits);
    }
    let opcode_bits = buf[0] & 0x0F;
    let opcode = Opcode::from_u8(opcode_bits).ok_or(FrameError::UnknownOpcode(opcode_bits))?;

    let masked = buf[1] & 0x80 != 0;
    let (len, mut offset) = match buf[1] & 0x7F {
        126 => {
            if buf.len() < 4 {
                return Err(FrameError::Incomplete);
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
        }
        127 => {
            if buf.len() < 10 {
                return Err(FrameError::Incomplete);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(raw), 10)
        }
        n => (n as u64, 2),
    };
    let len = usize::try_from(len).map_err(|_| FrameError::TooLarge)?;

    if opcode.is_control() {
        if !fin {
            return Err(FrameError::FragmentedControl);
        }
        if len > MAX_CONTROL_PAYLOAD {
            return Err(FrameError::ControlTooLong(len));
        }
    }

    let mask = if masked {
        if buf.len() < offset + 4 {
            return Err(FrameError::Incomplete);
        }
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };

    let end = offset.checked_add(len).ok_or(FrameError::TooLarge)?;
    if buf.len() < end {
        return Err(FrameError::Incomplete);
    }

    let mut payload = buf[offset..end].to_vec();
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok((Frame { fin, opcode, payload }, end))
}

/// Serializes a frame. Servers pass `None`; clients must pass a mask key.
pub fn encode_frame(frame: &Frame, mask: Option<[u8; 4]>) -> Vec<u8> {
    let len = frame.payload.len();
    let mut buf = Vec::with_capacity(len + 14);

    let fin_bit = if frame.fin { 0x80 } else { 0x00 };
    buf.push(fin_bit | frame.opcode.as_u8());

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if len < 126 {
        buf.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        buf.push(mask_bit | 126);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(mask_bit | 127);
        buf.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            buf.extend_from_slice(&key);
            let start = buf.len();
            buf.extend_from_slice(&frame.payload);
            apply_mask(&mut buf[start..], key);
        }
        None => buf.extend_from_slice(&frame.payload),
    }

    buf
}

fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}
