//! Windows Virtual-Key to macOS CGKeyCode translation table.
//!
//! CGKeyCode values are the ANSI key-position codes from Carbon's
//! `Events.h` (HIToolbox framework); they identify physical key positions,
//! not characters. Windows VK values are from `winuser.h`.

/// Translates a Windows Virtual-Key number to a macOS `CGKeyCode`.
///
/// Covers letters, digits, F1–F12, arrows, modifiers, navigation keys, the
/// numpad, and common punctuation. Returns `None` for anything else; the
/// injector drops unmapped keys silently.
pub fn vk_to_cgkeycode(vk: u16) -> Option<u16> {
    match vk {
        // Letters (VK 0x41–0x5A = 'A'–'Z'; CG uses ANSI position codes)
        0x41 => Some(0x00), // A  kVK_ANSI_A
        0x42 => Some(0x0B), // B
        0x43 => Some(0x08), // C
        0x44 => Some(0x02), // D
        0x45 => Some(0x0E), // E
        0x46 => Some(0x03), // F
        0x47 => Some(0x05), // G
        0x48 => Some(0x04), // H
        0x49 => Some(0x22), // I
        0x4A => Some(0x26), // J
        0x4B => Some(0x28), // K
        0x4C => Some(0x25), // L
        0x4D => Some(0x2E), // M
        0x4E => Some(0x2D), // N
        0x4F => Some(0x1F), // O
        0x50 => Some(0x23), // P
        0x51 => Some(0x0C), // Q
        0x52 => Some(0x0F), // R
        0x53 => Some(0x01), // S
        0x54 => Some(0x11), // T
        0x55 => Some(0x20), // U
        0x56 => Some(0x09), // V
        0x57 => Some(0x0D), // W
        0x58 => Some(0x07), // X
        0x59 => Some(0x10), // Y
        0x5A => Some(0x06), // Z

        // Top-row digits (VK 0x30–0x39 = '0'–'9')
        0x30 => Some(0x1D), // 0
        0x31 => Some(0x12), // 1
        0x32 => Some(0x13), // 2
        0x33 => Some(0x14), // 3
        0x34 => Some(0x15), // 4
        0x35 => Some(0x17), // 5
        0x36 => Some(0x16), // 6
        0x37 => Some(0x1A), // 7
        0x38 => Some(0x1C), // 8
        0x39 => Some(0x19), // 9

        // Control / whitespace
        0x0D => Some(0x24), // VK_RETURN    kVK_Return
        0x1B => Some(0x35), // VK_ESCAPE    kVK_Escape
        0x08 => Some(0x33), // VK_BACK      kVK_Delete (backspace)
        0x09 => Some(0x30), // VK_TAB       kVK_Tab
        0x20 => Some(0x31), // VK_SPACE     kVK_Space
        0x14 => Some(0x39), // VK_CAPITAL   kVK_CapsLock

        // Navigation cluster
        0x2D => Some(0x72), // VK_INSERT    kVK_Help
        0x2E => Some(0x75), // VK_DELETE    kVK_ForwardDelete
        0x24 => Some(0x73), // VK_HOME      kVK_Home
        0x23 => Some(0x77), // VK_END       kVK_End
        0x21 => Some(0x74), // VK_PRIOR     kVK_PageUp
        0x22 => Some(0x79), // VK_NEXT      kVK_PageDown
        0x2C => Some(0x69), // VK_SNAPSHOT  kVK_F13 (PrintScreen)
        0x91 => Some(0x6B), // VK_SCROLL    kVK_F14 (ScrollLock)
        0x13 => Some(0x71), // VK_PAUSE     kVK_F15

        // Arrows
        0x25 => Some(0x7B), // VK_LEFT      kVK_LeftArrow
        0x26 => Some(0x7E), // VK_UP        kVK_UpArrow
        0x27 => Some(0x7C), // VK_RIGHT     kVK_RightArrow
        0x28 => Some(0x7D), // VK_DOWN      kVK_DownArrow

        // Function keys
        0x70 => Some(0x7A), // F1
        0x71 => Some(0x78), // F2
        0x72 => Some(0x63), // F3
        0x73 => Some(0x76), // F4
        0x74 => Some(0x60), // F5
        0x75 => Some(0x61), // F6
        0x76 => Some(0x62), // F7
        0x77 => Some(0x64), // F8
        0x78 => Some(0x65), // F9
        0x79 => Some(0x6D), // F10
        0x7A => Some(0x67), // F11
        0x7B => Some(0x6F), // F12

        // Modifiers (left/right where macOS distinguishes them)
        0xA0 => Some(0x38), // VK_LSHIFT    kVK_Shift
        0xA1 => Some(0x3C), // VK_RSHIFT    kVK_RightShift
        0xA2 => Some(0x3B), // VK_LCONTROL  kVK_Control
        0xA3 => Some(0x3E), // VK_RCONTROL  kVK_RightControl
        0xA4 => Some(0x3A), // VK_LMENU     kVK_Option
        0xA5 => Some(0x3D), // VK_RMENU     kVK_RightOption
        0x5B => Some(0x37), // VK_LWIN      kVK_Command
        0x5C => Some(0x36), // VK_RWIN      kVK_RightCommand
        // Generic (non-sided) modifier VKs as reported by some sources
        0x10 => Some(0x38), // VK_SHIFT
        0x11 => Some(0x3B), // VK_CONTROL
        0x12 => Some(0x3A), // VK_MENU

        // Numpad
        0x90 => Some(0x47), // VK_NUMLOCK   kVK_ANSI_KeypadClear
        0x60 => Some(0x52), // VK_NUMPAD0
        0x61 => Some(0x53), // VK_NUMPAD1
        0x62 => Some(0x54), // VK_NUMPAD2
        0x63 => Some(0x55), // VK_NUMPAD3
        0x64 => Some(0x56), // VK_NUMPAD4
        0x65 => Some(0x57), // VK_NUMPAD5
        0x66 => Some(0x58), // VK_NUMPAD6
        0x67 => Some(0x59), // VK_NUMPAD7
        0x68 => Some(0x5B), // VK_NUMPAD8
        0x69 => Some(0x5C), // VK_NUMPAD9
        0x6A => Some(0x43), // VK_MULTIPLY  kVK_ANSI_KeypadMultiply
        0x6B => Some(0x45), // VK_ADD       kVK_ANSI_KeypadPlus
        0x6D => Some(0x4E), // VK_SUBTRACT  kVK_ANSI_KeypadMinus
        0x6E => Some(0x41), // VK_DECIMAL   kVK_ANSI_KeypadDecimal
        0x6F => Some(0x4B), // VK_DIVIDE    kVK_ANSI_KeypadDivide

        // Punctuation (US layout OEM keys)
        0xBA => Some(0x29), // VK_OEM_1     ;:   kVK_ANSI_Semicolon
        0xBB => Some(0x18), // VK_OEM_PLUS  =+   kVK_ANSI_Equal
        0xBC => Some(0x2B), // VK_OEM_COMMA ,<   kVK_ANSI_Comma
        0xBD => Some(0x1B), // VK_OEM_MINUS -_   kVK_ANSI_Minus
        0xBE => Some(0x2F), // VK_OEM_PERIOD .>  kVK_ANSI_Period
        0xBF => Some(0x2C), // VK_OEM_2     /?   kVK_ANSI_Slash
        0xC0 => Some(0x32), // VK_OEM_3     `~   kVK_ANSI_Grave
        0xDB => Some(0x21), // VK_OEM_4     [{   kVK_ANSI_LeftBracket
        0xDC => Some(0x2A), // VK_OEM_5     \|   kVK_ANSI_Backslash
        0xDD => Some(0x1E), // VK_OEM_6     ]}   kVK_ANSI_RightBracket
        0xDE => Some(0x27), // VK_OEM_7     '"   kVK_ANSI_Quote

        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
