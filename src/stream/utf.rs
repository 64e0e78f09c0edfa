//! 长度前缀字符串编码
//!
//! ```text
//! ┌──────────────────────┬───────────────────────────────┐
//! │ utf_len (u16 BE)     │ 编码后的字节（utf_len 个）     │
//! └──────────────────────┴───────────────────────────────┘
//! ```
//!
//! 按 UTF-16 码元逐个编码：
//! - `[0x00, 0x7F]`   → 1 字节 `0xxxxxxx`
//! - `[0x80, 0x7FF]`  → 2 字节 `110xxxxx 10xxxxxx`
//! - 其余             → 3 字节 `1110xxxx 10xxxxxx 10xxxxxx`
//!
//! BMP 以外的码点先拆成代理对，两个代理码元各自按 3 字节编码。

use crate::common::{DataFileError, Result};

/// 长度前缀为 u16，单个字符串编码后最多 65535 字节
pub const MAX_ENCODED_LEN: usize = u16::MAX as usize;

/// 编码后的字节数（不含 2 字节前缀）
pub fn encoded_len(s: &str) -> usize {
    s.encode_utf16()
        .map(|u| match u {
            0x0000..=0x007F => 1,
            0x0080..=0x07FF => 2,
            _               => 3,
        })
        .sum()
}

/// 追加 `[u16 长度][字节]` 到 `out`
pub fn encode_into(s: &str, out: &mut Vec<u8>) -> Result<()> {
    let len = encoded_len(s);
    if len > MAX_ENCODED_LEN {
        return Err(DataFileError::Framing(format!(
            "encoded string too long: {len} bytes (max {MAX_ENCODED_LEN})"
        )));
    }
    out.reserve(2 + len);
    out.extend_from_slice(&(len as u16).to_be_bytes());
    for u in s.encode_utf16() {
        match u {
            0x0000..=0x007F => out.push(u as u8),
            0x0080..=0x07FF => {
                out.push(0xC0 | ((u >> 6) & 0x1F) as u8);
                out.push(0x80 | (u & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((u >> 12) & 0x0F) as u8);
                out.push(0x80 | ((u >> 6) & 0x3F) as u8);
                out.push(0x80 | (u & 0x3F) as u8);
            }
        }
    }
    Ok(())
}

/// 解码长度前缀之后的字节体
pub fn decode(bytes: &[u8]) -> Result<String> {
    let n = bytes.len();
    let mut units: Vec<u16> = Vec::with_capacity(n);
    let mut i = 0usize;

    while i < n {
        let c = bytes[i] as u16;
        match c >> 4 {
            0..=7 => {
                units.push(c);
                i += 1;
            }
            12 | 13 => {
                if i + 2 > n {
                    return Err(partial_at_end());
                }
                let c2 = bytes[i + 1] as u16;
                if c2 & 0xC0 != 0x80 {
                    return Err(malformed(i + 1));
                }
                units.push(((c & 0x1F) << 6) | (c2 & 0x3F));
                i += 2;
            }
            14 => {
                if i + 3 > n {
                    return Err(partial_at_end());
                }
                let c2 = bytes[i + 1] as u16;
                let c3 = bytes[i + 2] as u16;
                if c2 & 0xC0 != 0x80 || c3 & 0xC0 != 0x80 {
                    return Err(malformed(i + 1));
                }
                units.push(((c & 0x0F) << 12) | ((c2 & 0x3F) << 6) | (c3 & 0x3F));
                i += 3;
            }
            // 10xxxxxx 或 1111xxxx 不能作为首字节
            _ => return Err(malformed(i)),
        }
    }

    String::from_utf16(&units)
        .map_err(|_| DataFileError::Framing("unpaired surrogate in string".into()))
}

fn partial_at_end() -> DataFileError {
    DataFileError::Framing("malformed input: partial character at end".into())
}

fn malformed(at: usize) -> DataFileError {
    DataFileError::Framing(format!("malformed input around byte {at}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(s: &str) -> Vec<u8> {
        let mut out = Vec::new();
        encode_into(s, &mut out).unwrap();
        out
    }

    #[test]
    fn ascii_is_one_byte_per_char() {
        assert_eq!(encode("Alice"), vec![0, 5, b'A', b'l', b'i', b'c', b'e']);
        assert_eq!(encode(""), vec![0, 0]);
        // U+0000 也落在单字节区间
        assert_eq!(encode("\0"), vec![0, 1, 0]);
    }

    #[test]
    fn two_and_three_byte_forms() {
        // é = U+00E9
        assert_eq!(encode("é"), vec![0, 2, 0xC3, 0xA9]);
        // € = U+20AC
        assert_eq!(encode("€"), vec![0, 3, 0xE2, 0x82, 0xAC]);
    }

    #[test]
    fn supplementary_plane_uses_surrogate_pairs() {
        // 😀 = U+1F600 → D83D DE00，每个代理码元 3 字节
        let bytes = encode("😀");
        assert_eq!(bytes, vec![0, 6, 0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]);
        assert_eq!(decode(&bytes[2..]).unwrap(), "😀");
    }

    #[test]
    fn decode_mixed() {
        let s = "Zoë — 東京 😀 ok";
        let bytes = encode(s);
        assert_eq!(bytes.len(), 2 + encoded_len(s));
        assert_eq!(decode(&bytes[2..]).unwrap(), s);
    }

    #[test]
    fn invalid_continuation_byte() {
        let err = decode(&[0xC3, 0x29]).unwrap_err();
        assert!(matches!(err, DataFileError::Framing(_)));
        let err = decode(&[0xE2, 0x82, 0x2C]).unwrap_err();
        assert!(matches!(err, DataFileError::Framing(_)));
        // 孤立的续字节
        assert!(decode(&[0x80]).is_err());
        // 1111xxxx
        assert!(decode(&[0xF0, 0x9F, 0x98, 0x80]).is_err());
    }

    #[test]
    fn truncated_tail() {
        let err = decode(&[b'a', 0xE2, 0x82]).unwrap_err();
        assert!(err.to_string().contains("partial character"));
    }

    #[test]
    fn too_long_is_rejected() {
        let s = "é".repeat(MAX_ENCODED_LEN / 2 + 1);
        let mut out = Vec::new();
        assert!(encode_into(&s, &mut out).is_err());
        let ok = "a".repeat(MAX_ENCODED_LEN);
        assert!(encode_into(&ok, &mut out).is_ok());
    }
}
