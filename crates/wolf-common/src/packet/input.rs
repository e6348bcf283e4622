//! `INPUT_DATA` subtype decoding. Struct layouts are grounded on
//! `input/input/input.hpp`'s `INPUT_PKT` family; field order there matches
//! the wire layout, but every multi-byte field travels big-endian on the
//! wire (the source reads them through `boost::endian` big-endian views).

use crate::error::{HResult, HostError};

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    MouseMoveRel = 0x08,
    MouseMoveAbs = 0x0e,
    MouseButton = 0x05,
    KeyboardOrScroll = 0x0a,
    ControllerMulti = 0x1e,
    Controller = 0x18,
}

impl InputType {
    fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0x08 => Self::MouseMoveRel,
            0x0e => Self::MouseMoveAbs,
            0x05 => Self::MouseButton,
            0x0a => Self::KeyboardOrScroll,
            0x1e => Self::ControllerMulti,
            0x18 => Self::Controller,
            _ => return None,
        })
    }
}

pub const KEYBOARD_BUTTON_RELEASED: u8 = 0x04;
pub const MOUSE_BUTTON_RELEASED: u8 = 0x09;

#[derive(Debug, Clone, Copy)]
pub struct MouseMoveRelative {
    pub delta_x: i16,
    pub delta_y: i16,
}

#[derive(Debug, Clone, Copy)]
pub struct MouseMoveAbsolute {
    pub x: i16,
    pub y: i16,
    pub width: i16,
    pub height: i16,
}

#[derive(Debug, Clone, Copy)]
pub struct MouseButton {
    pub action: u8,
    pub button: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct MouseScroll {
    pub scroll_amount: i16,
}

#[derive(Debug, Clone, Copy)]
pub struct KeyboardKey {
    pub key_action: u8,
    pub key_code: i16,
    pub modifiers: u8,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerState {
    pub controller_number: Option<i16>,
    pub active_gamepad_mask: Option<i16>,
    pub button_flags: i16,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub left_stick_x: i16,
    pub left_stick_y: i16,
    pub right_stick_x: i16,
    pub right_stick_y: i16,
}

/// A decoded `INPUT_DATA` payload (the first 2 bytes, the inner control
/// packet type, have already been stripped by the caller).
#[derive(Debug, Clone)]
pub enum InputPacket {
    MouseMoveRelative(MouseMoveRelative),
    MouseMoveAbsolute(MouseMoveAbsolute),
    MouseButton(MouseButton),
    MouseScroll(MouseScroll),
    KeyboardKey(KeyboardKey),
    TextInput(String),
    Controller(ControllerState),
}

fn read_i16(buf: &[u8], offset: usize) -> HResult<i16> {
    let bytes: [u8; 2] = buf.get(offset..offset + 2).ok_or_else(|| HostError::MalformedPacket("short input packet".into()))?.try_into().unwrap();
    Ok(i16::from_be_bytes(bytes))
}

fn read_i32(buf: &[u8], offset: usize) -> HResult<i32> {
    let bytes: [u8; 4] = buf.get(offset..offset + 4).ok_or_else(|| HostError::MalformedPacket("short input packet".into()))?.try_into().unwrap();
    Ok(i32::from_be_bytes(bytes))
}

/// Decodes an `INPUT_DATA` packet body. `body` excludes the 2-byte
/// `INPUT_DATA` control type but includes the 4-byte input-type tag.
pub fn decode(body: &[u8]) -> HResult<InputPacket> {
    let type_tag = read_i32(body, 0)?;

    // UTF-32 text input does not share the INPUT_TYPE tag space: it is
    // recognized by payload shape at the call site (control.rs routes it
    // separately), so `decode_text` is exposed alongside `decode`.
    let input_type = InputType::from_i32(type_tag).ok_or_else(|| HostError::MalformedPacket(format!("unknown input type {type_tag:#x}")))?;

    match input_type {
        InputType::MouseMoveRel => Ok(InputPacket::MouseMoveRelative(MouseMoveRelative {
            delta_x: read_i16(body, 4)?,
            delta_y: read_i16(body, 6)?,
        })),
        InputType::MouseMoveAbs => Ok(InputPacket::MouseMoveAbsolute(MouseMoveAbsolute {
            x: read_i16(body, 4)?,
            y: read_i16(body, 6)?,
            width: read_i16(body, 10)?,
            height: read_i16(body, 12)?,
        })),
        InputType::MouseButton => Ok(InputPacket::MouseButton(MouseButton {
            action: *body.get(4).ok_or_else(|| HostError::MalformedPacket("short mouse button packet".into()))?,
            button: read_i32(body, 5)?,
        })),
        InputType::KeyboardOrScroll => decode_keyboard_or_scroll(body),
        InputType::ControllerMulti => Ok(InputPacket::Controller(ControllerState {
            controller_number: Some(read_i16(body, 8)?),
            active_gamepad_mask: Some(read_i16(body, 10)?),
            button_flags: read_i16(body, 14)?,
            left_trigger: *body.get(16).unwrap_or(&0),
            right_trigger: *body.get(17).unwrap_or(&0),
            left_stick_x: read_i16(body, 18)?,
            left_stick_y: read_i16(body, 20)?,
            right_stick_x: read_i16(body, 22)?,
            right_stick_y: read_i16(body, 24)?,
        })),
        InputType::Controller => Ok(InputPacket::Controller(ControllerState {
            controller_number: None,
            active_gamepad_mask: None,
            button_flags: read_i16(body, 6)?,
            left_trigger: *body.get(8).unwrap_or(&0),
            right_trigger: *body.get(9).unwrap_or(&0),
            left_stick_x: read_i16(body, 10)?,
            left_stick_y: read_i16(body, 12)?,
            right_stick_x: read_i16(body, 14)?,
            right_stick_y: read_i16(body, 16)?,
        })),
    }
}

/// `0x0a` is shared between scroll and keyboard-key packets; `magic_a`
/// at offset 4 tells them apart — scroll packets repeat the `0x0a` tag,
/// keyboard packets carry a key-action byte there instead.
fn decode_keyboard_or_scroll(body: &[u8]) -> HResult<InputPacket> {
    let discriminant = *body.get(4).ok_or_else(|| HostError::MalformedPacket("short keyboard/scroll packet".into()))?;
    if discriminant == 0x0a {
        Ok(InputPacket::MouseScroll(MouseScroll { scroll_amount: read_i16(body, 10)? }))
    } else {
        Ok(InputPacket::KeyboardKey(KeyboardKey {
            key_action: discriminant,
            key_code: read_i16(body, 7)?,
            modifiers: *body.get(11).unwrap_or(&0),
        }))
    }
}

/// Decodes hex-ASCII UTF-32 text input: every 6 hex characters is one
/// code point, 3 bytes big-endian.
pub fn decode_text_input(hex_ascii: &[u8]) -> HResult<String> {
    let hex_str = std::str::from_utf8(hex_ascii).map_err(|_| HostError::MalformedPacket("text input is not valid ASCII".into()))?;
    if hex_str.len() % 6 != 0 {
        return Err(HostError::MalformedPacket("text input hex length not a multiple of 6".into()));
    }

    let mut out = String::new();
    for chunk in hex_str.as_bytes().chunks(6) {
        let chunk_str = std::str::from_utf8(chunk).unwrap();
        let code_point = u32::from_str_radix(chunk_str, 16).map_err(|_| HostError::MalformedPacket("invalid hex in text input".into()))?;
        let ch = char::from_u32(code_point).ok_or_else(|| HostError::MalformedPacket("invalid unicode code point".into()))?;
        out.push(ch);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_relative_mouse_move() {
        let mut body = vec![0u8; 8];
        body[0..4].copy_from_slice(&(InputType::MouseMoveRel as i32).to_be_bytes());
        body[4..6].copy_from_slice(&10i16.to_be_bytes());
        body[6..8].copy_from_slice(&(-5i16).to_be_bytes());

        let decoded = decode(&body).unwrap();
        match decoded {
            InputPacket::MouseMoveRelative(m) => {
                assert_eq!(m.delta_x, 10);
                assert_eq!(m.delta_y, -5);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn decodes_poop_emoji_text_input() {
        let text = decode_text_input(b"01F4A9").unwrap();
        assert_eq!(text, "\u{1F4A9}");
    }

    #[test]
    fn rejects_unknown_input_type() {
        let mut body = vec![0u8; 8];
        body[0..4].copy_from_slice(&0xFFi32.to_be_bytes());
        assert!(decode(&body).is_err());
    }
}
