//! AMF0 decoding for FLV script tags, enough to read `onMetaData`.

pub const NUMBER: u8 = 0x00;
pub const BOOLEAN: u8 = 0x01;
pub const STRING: u8 = 0x02;
pub const OBJECT: u8 = 0x03;
pub const NULL: u8 = 0x05;
pub const UNDEFINED: u8 = 0x06;
pub const ECMA_ARRAY: u8 = 0x08;
pub const OBJECT_END: u8 = 0x09;
pub const DATE: u8 = 0x0B;

const MAX_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum Amf0Value {
    Number(f64),
    Boolean(bool),
    String(String),
    Object(Vec<(String, Amf0Value)>),
    EcmaArray(Vec<(String, Amf0Value)>),
    Null,
    Undefined,
    Date { unix_ms: f64, tz_offset: i16 },
}

impl Amf0Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Amf0Error {
    UnexpectedEnd,
    InvalidString,
    Unsupported(u8),
    DepthExceeded,
}

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Amf0Error> {
        if self.pos + n > self.buf.len() {
            return Err(Amf0Error::UnexpectedEnd);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, Amf0Error> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, Amf0Error> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, Amf0Error> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_f64(&mut self) -> Result<f64, Amf0Error> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(f64::from_be_bytes(raw))
    }

    fn read_string(&mut self) -> Result<String, Amf0Error> {
        let len = self.read_u16()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| Amf0Error::InvalidString)
    }

    fn at_object_end(&mut self) -> bool {
        if self.pos + 3 <= self.buf.len()
            && self.buf[self.pos] == 0
            && self.buf[self.pos + 1] == 0
            && self.buf[self.pos + 2] == OBJECT_END
        {
            self.pos += 3;
            return true;
        }
        false
    }

    fn read_value(&mut self, depth: usize) -> Result<Amf0Value, Amf0Error> {
        match self.read_u8()? {
            NUMBER => Ok(Amf0Value::Number(self.read_f64()?)),
            BOOLEAN => Ok(Amf0Value::Boolean(self.read_u8()? != 0)),
            STRING => Ok(Amf0Value::String(self.read_string()?)),
            OBJECT => {
                if depth >= MAX_DEPTH {
                    return Err(Amf0Error::DepthExceeded);
                }
                Ok(Amf0Value::Object(self.read_pairs(depth + 1)?))
            }
            NULL => Ok(Amf0Value::Null),
            UNDEFINED => Ok(Amf0Value::Undefined),
            ECMA_ARRAY => {
                if depth >= MAX_DEPTH {
                    return Err(Amf0Error::DepthExceeded);
                }
                // declared element count, not trusted
                let _ = self.read_u32()?;
                Ok(Amf0Value::EcmaArray(self.read_pairs(depth + 1)?))
            }
            DATE => {
                let unix_ms = self.read_f64()?;
                let tz = self.read_u16()? as i16;
                Ok(Amf0Value::Date {
                    unix_ms,
                    tz_offset: tz,
                })
            }
            x => Err(Amf0Error::Unsupported(x)),
        }
    }

    fn read_pairs(&mut self, depth: usize) -> Result<Vec<(String, Amf0Value)>, Amf0Error> {
        let mut pairs = Vec::new();
        loop {
            if self.at_object_end() {
                return Ok(pairs);
            }
            let name = self.read_string()?;
            let value = self.read_value(depth)?;
            pairs.push((name, value));
        }
    }
}

/// Parsed script tag payload: the leading name (usually `onMetaData`)
/// and the property map that follows.
///
/// Decoding is best-effort: a malformed or truncated field terminates
/// parsing and whatever was collected so far is kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptData {
    pub name: Option<String>,
    pub values: Vec<(String, Amf0Value)>,
}

impl ScriptData {
    pub fn parse(payload: &[u8]) -> Self {
        let mut out = Self::default();
        let mut d = Decoder::new(payload);

        match d.read_value(0) {
            Ok(Amf0Value::String(name)) => out.name = Some(name),
            _ => return out,
        }

        match d.read_u8() {
            Ok(OBJECT) => {}
            Ok(ECMA_ARRAY) => {
                if d.read_u32().is_err() {
                    return out;
                }
            }
            _ => return out,
        }

        loop {
            if d.at_object_end() {
                break;
            }
            let name = match d.read_string() {
                Ok(n) => n,
                Err(_) => break,
            };
            match d.read_value(1) {
                Ok(value) => out.values.push((name, value)),
                Err(_) => break,
            }
        }
        out
    }

    pub fn get(&self, key: &str) -> Option<&Amf0Value> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Amf0Value::as_number)
    }

    pub fn boolean(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Amf0Value::as_boolean)
    }

    pub fn width(&self) -> Option<f64> {
        self.number("width")
    }

    pub fn height(&self) -> Option<f64> {
        self.number("height")
    }

    pub fn frame_rate(&self) -> Option<f64> {
        self.number("framerate").or_else(|| self.number("fps"))
    }

    pub fn video_data_rate(&self) -> Option<f64> {
        self.number("videodatarate")
    }

    pub fn audio_data_rate(&self) -> Option<f64> {
        self.number("audiodatarate")
    }

    pub fn audio_sample_rate(&self) -> Option<f64> {
        self.number("audiosamplerate")
    }

    pub fn audio_sample_size(&self) -> Option<f64> {
        self.number("audiosamplesize")
    }

    pub fn stereo(&self) -> Option<bool> {
        self.boolean("stereo")
    }

    pub fn duration(&self) -> Option<f64> {
        self.number("duration")
    }

    pub fn video_codec_id(&self) -> Option<f64> {
        self.number("videocodecid")
    }

    pub fn audio_codec_id(&self) -> Option<f64> {
        self.number("audiocodecid")
    }
}

pub fn encode_number(value: f64) -> [u8; 9] {
    let mut out = [0u8; 9];
    out[0] = NUMBER;
    out[1..9].copy_from_slice(&value.to_be_bytes());
    out
}

pub fn decode_number(buf: &[u8]) -> Option<f64> {
    let mut d = Decoder::new(buf);
    d.read_value(0).ok().and_then(|v| v.as_number())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn put_string(buf: &mut Vec<u8>, s: &str) {
        buf.push(STRING);
        buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    fn put_key(buf: &mut Vec<u8>, key: &str) {
        buf.extend_from_slice(&(key.len() as u16).to_be_bytes());
        buf.extend_from_slice(key.as_bytes());
    }

    fn put_key_number(buf: &mut Vec<u8>, key: &str, value: f64) {
        put_key(buf, key);
        buf.extend_from_slice(&encode_number(value));
    }

    fn put_object_end(buf: &mut Vec<u8>) {
        buf.extend_from_slice(&[0, 0, OBJECT_END]);
    }

    /// `onMetaData` payload with an ECMA array body.
    pub(crate) fn on_metadata_payload(entries: &[(&str, f64)]) -> Vec<u8> {
        let mut buf = Vec::new();
        put_string(&mut buf, "onMetaData");
        buf.push(ECMA_ARRAY);
        buf.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        for (key, value) in entries {
            put_key_number(&mut buf, key, *value);
        }
        put_object_end(&mut buf);
        buf
    }

    #[test]
    fn number_round_trip_preserves_bits() {
        for v in [0.0, -1.5, 1280.0, f64::MAX, 1.0 / 3.0] {
            let encoded = encode_number(v);
            let decoded = decode_number(&encoded).unwrap();
            assert_eq!(decoded.to_bits(), v.to_bits());
        }
    }

    #[test]
    fn parses_on_metadata_ecma_array() {
        let payload = on_metadata_payload(&[("width", 1280.0), ("height", 720.0), ("fps", 30.0)]);
        let script = ScriptData::parse(&payload);
        assert_eq!(script.name.as_deref(), Some("onMetaData"));
        assert_eq!(script.width(), Some(1280.0));
        assert_eq!(script.height(), Some(720.0));
        assert_eq!(script.frame_rate(), Some(30.0));
        assert_eq!(script.duration(), None);
    }

    #[test]
    fn unknown_keys_are_preserved() {
        let payload = on_metadata_payload(&[("mycustomkey", 7.0)]);
        let script = ScriptData::parse(&payload);
        assert_eq!(script.number("mycustomkey"), Some(7.0));
    }

    #[test]
    fn parses_object_body_with_mixed_types() {
        let mut buf = Vec::new();
        put_string(&mut buf, "onMetaData");
        buf.push(OBJECT);
        put_key(&mut buf, "stereo");
        buf.extend_from_slice(&[BOOLEAN, 1]);
        put_key(&mut buf, "encoder");
        put_string(&mut buf, "Lavf58");
        put_key(&mut buf, "missing");
        buf.push(NULL);
        put_object_end(&mut buf);

        let script = ScriptData::parse(&buf);
        assert_eq!(script.stereo(), Some(true));
        assert_eq!(
            script.get("encoder").and_then(Amf0Value::as_str),
            Some("Lavf58")
        );
        assert_eq!(script.get("missing"), Some(&Amf0Value::Null));
    }

    #[test]
    fn truncated_value_keeps_earlier_fields() {
        let mut payload = on_metadata_payload(&[("width", 1920.0), ("height", 1080.0)]);
        // chop into the middle of the "height" number
        payload.truncate(payload.len() - 8);
        let script = ScriptData::parse(&payload);
        assert_eq!(script.width(), Some(1920.0));
        assert_eq!(script.height(), None);
    }

    #[test]
    fn unsupported_marker_stops_parsing() {
        let mut buf = Vec::new();
        put_string(&mut buf, "onMetaData");
        buf.push(ECMA_ARRAY);
        buf.extend_from_slice(&2u32.to_be_bytes());
        put_key_number(&mut buf, "width", 640.0);
        put_key(&mut buf, "weird");
        buf.push(0x0A); // strict array, unhandled
        buf.extend_from_slice(&[0, 0, 0, 0]);
        put_object_end(&mut buf);

        let script = ScriptData::parse(&buf);
        assert_eq!(script.width(), Some(640.0));
        assert_eq!(script.get("weird"), None);
    }

    #[test]
    fn nested_object_depth_is_capped() {
        let mut buf = Vec::new();
        put_string(&mut buf, "onMetaData");
        buf.push(OBJECT);
        put_key(&mut buf, "a");
        for _ in 0..6 {
            buf.push(OBJECT);
            put_key(&mut buf, "b");
        }
        let script = ScriptData::parse(&buf);
        assert!(script.values.is_empty());
    }

    #[test]
    fn non_script_payload_yields_empty() {
        let script = ScriptData::parse(&[0xFF, 0x01, 0x02]);
        assert_eq!(script.name, None);
        assert!(script.values.is_empty());
    }
}
