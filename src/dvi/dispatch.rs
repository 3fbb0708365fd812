//! The DVI opcode table.
//!
//! Different opcodes are allowed in different contexts, so the reader keeps
//! a parser state:
//!
//!   pre:       expecting the preamble
//!   outer:     between pages (followed by a page or the postamble, also
//!              e.g. font definitions are allowed)
//!   inpage:    processing a page
//!   post_post: after the postamble; reading stops here
//!   finale:    the finale, which is never entered

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum DVIState {
    Pre,
    Outer,
    InPage,
    PostPost,
    Finale,
}

/// How to read one argument of an opcode. DVI opcodes often encode the
/// number of argument bytes in the difference between the opcode and the
/// minimum opcode with the same meaning; `delta` below refers to that
/// difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSpec {
    /// `delta` itself, without reading anything from the file.
    Raw,
    /// One unsigned byte.
    U1,
    /// Four bytes, unsigned.
    U4,
    /// Four bytes, signed.
    S4,
    /// `delta` bytes, signed; zero bytes means "no new value".
    Slen,
    /// `delta + 1` bytes, signed.
    Slen1,
    /// `delta + 1` bytes, unsigned.
    Ulen1,
    /// `delta + 1` bytes, unsigned below four bytes and signed at four.
    Olen1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    SetChar,
    SetRule,
    PutChar,
    PutRule,
    Nop,
    Bop,
    Eop,
    Push,
    Pop,
    Right,
    RightW,
    RightX,
    Down,
    DownY,
    DownZ,
    FntNum,
    Special,
    FntDef,
    Pre,
    Post,
    PostPost,
    Unknown,
}

pub struct OpcodeEntry {
    pub min_opcode: u8,
    pub state: Option<DVIState>,
    pub args: &'static [ArgSpec],
    pub handler: Handler,
}

/// The complete 256-entry dispatch table, one row per opcode range. The VF
/// packet interpreter shares this table, gating off the opcodes that are
/// illegal inside a packet.
pub fn entry_for(opcode: u8) -> OpcodeEntry {
    use ArgSpec::*;
    use DVIState::{InPage, Outer};
    use Handler::*;

    let entry = |min_opcode, state, args, handler| OpcodeEntry {
        min_opcode,
        state,
        args,
        handler,
    };

    match opcode {
        0..=127 => entry(0, Some(InPage), &[Raw], SetChar),
        128..=131 => entry(128, Some(InPage), &[Olen1], SetChar),
        132 => entry(132, Some(InPage), &[S4, S4], SetRule),
        133..=136 => entry(133, Some(InPage), &[Olen1], PutChar),
        137 => entry(137, Some(InPage), &[S4, S4], PutRule),
        138 => entry(138, None, &[], Nop),
        139 => entry(
            139,
            Some(Outer),
            &[S4, S4, S4, S4, S4, S4, S4, S4, S4, S4, S4],
            Bop,
        ),
        140 => entry(140, Some(InPage), &[], Eop),
        141 => entry(141, Some(InPage), &[], Push),
        142 => entry(142, Some(InPage), &[], Pop),
        143..=146 => entry(143, Some(InPage), &[Slen1], Right),
        147..=151 => entry(147, Some(InPage), &[Slen], RightW),
        152..=156 => entry(152, Some(InPage), &[Slen], RightX),
        157..=160 => entry(157, Some(InPage), &[Slen1], Down),
        161..=165 => entry(161, Some(InPage), &[Slen], DownY),
        166..=170 => entry(166, Some(InPage), &[Slen], DownZ),
        171..=234 => entry(171, Some(InPage), &[Raw], FntNum),
        235..=238 => entry(235, Some(InPage), &[Olen1], FntNum),
        239..=242 => entry(239, None, &[Ulen1], Special),
        243..=246 => entry(243, None, &[Olen1, U4, U4, U4, U1, U1], FntDef),
        247 => entry(247, Some(DVIState::Pre), &[U1, U4, U4, U4, U1], Pre),
        248 => entry(248, Some(Outer), &[], Post),
        249 => entry(249, None, &[], PostPost),
        250..=255 => entry(250, None, &[], Unknown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_opcode_has_an_entry_in_its_range() {
        for opcode in 0..=255u8 {
            let entry = entry_for(opcode);
            assert!(entry.min_opcode <= opcode, "opcode {}", opcode);
            // The delta must stay small enough to be an argument length.
            assert!(opcode - entry.min_opcode < 128, "opcode {}", opcode);
        }
    }

    #[test]
    fn movement_opcodes_carry_length_encoded_arguments() {
        assert_eq!(entry_for(143).args, &[ArgSpec::Slen1]);
        assert_eq!(entry_for(147).args, &[ArgSpec::Slen]);
        assert_eq!(entry_for(147).min_opcode, 147);
        assert_eq!(entry_for(170).min_opcode, 166);
        assert_eq!(entry_for(234).handler, Handler::FntNum);
        assert_eq!(entry_for(238).args, &[ArgSpec::Olen1]);
    }
}
