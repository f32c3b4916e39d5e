//! Low-level field extraction for the DAQ word formats.
//!
//! Both input formats pack their headers into 16 and 32 bit words. The
//! functions here pull individual fields out with bitwise operations so the
//! decoders only deal with named values.

// ============================================================================
// Word-tagged (Nevis) format
// Bits: [15:12] flag | [11:0] data
// ============================================================================

/// Flag of the three event barrier words.
pub const FLAG_BARRIER: u8 = 0xF;
/// Data of the three event barrier words.
pub const DATA_BARRIER: u16 = 0xFFF;
/// ADC sample (or filler outside a channel).
pub const FLAG_SAMPLE: u8 = 0x0;
/// Start of a channel, data is the channel number.
pub const FLAG_CHANNEL_START: u8 = 0x4;
/// End of a channel.
pub const FLAG_CHANNEL_END: u8 = 0x5;
/// End of the event.
pub const FLAG_EVENT_END: u8 = 0xE;

/// Extracts the 4-bit flag from a 16-bit word.
#[inline]
pub fn word_flag(word: u16) -> u8 {
    ((word >> 12) & 0xF) as u8
}

/// Extracts the 12-bit payload from a 16-bit word.
#[inline]
pub fn word_data(word: u16) -> u16 {
    word & 0x0FFF
}

/// Returns true if the word is one of the event barrier words.
#[inline]
pub fn is_barrier(word: u16) -> bool {
    word_flag(word) == FLAG_BARRIER && word_data(word) == DATA_BARRIER
}

/// Combines two 12-bit data fields into one value.
///
/// The hardware multiplies the high part by 4095 rather than 4096, so this
/// is not a plain bit concatenation.
#[inline]
pub fn combine_4095(high: u16, low: u16) -> u32 {
    4095 * u32::from(word_data(high)) + u32::from(word_data(low))
}

// ============================================================================
// Crate/card/channel (UBDAQ) format
// ============================================================================

/// Trailer that closes the last crate block of an event.
pub const END_OF_EVENT_TRAILER: u32 = 0xE000_0000;
/// Trailer written after every other crate block.
pub const CRATE_TRAILER: u32 = 0xC000_0000;
/// Marker word opening a crate payload.
pub const CRATE_EVENT_MARKER: u32 = 0xFFFF_FFFF;
/// Low half of a card header's first word.
pub const CARD_HEADER_MARKER: u32 = 0xFFFF;
/// Any bit of this mask set marks a channel trailer word.
pub const CHANNEL_TRAILER_MASK: u16 = 0x5000;
/// Leading nibble written on channel header words.
pub const CHANNEL_HEADER_FLAG: u16 = 0x4000;

// Card header word 0
// Bits: [27:21] crate id | [20:16] module | [15:0] marker (0xFFFF)

/// Extracts the module id from a card header's first word.
#[inline]
pub fn card_module(word: u32) -> u32 {
    (word >> 16) & 0x1F
}

/// Extracts the crate id from a card header's first word.
#[inline]
pub fn card_crate_id(word: u32) -> u32 {
    (word >> 21) & 0x7F
}

/// Returns true if the first card header word carries the header marker.
#[inline]
pub fn has_card_marker(word: u32) -> bool {
    word & 0xFFFF == CARD_HEADER_MARKER
}

/// Builds a card header's first word.
#[inline]
pub fn pack_card_id(crate_id: u32, module: u32) -> u32 {
    ((crate_id & 0x7F) << 21) | ((module & 0x1F) << 16) | CARD_HEADER_MARKER
}

// Card header words 1..4
// Bits: [27:16] low 12 bits of value | [11:0] high 12 bits of value

/// Extracts a 24-bit value split across the two halves of a header word.
#[inline]
pub fn split_24(word: u32) -> u32 {
    ((word >> 16) & 0xFFF) | ((word & 0xFFF) << 12)
}

/// Packs a 24-bit value into the split header word layout.
#[inline]
pub fn pack_split_24(value: u32) -> u32 {
    ((value & 0xFFF) << 16) | ((value >> 12) & 0xFFF)
}

/// Extracts the channel number from a channel header word.
#[inline]
pub fn channel_number(header: u16) -> u16 {
    header & 0x0FFF
}

/// Returns true if the word closes a channel.
#[inline]
pub fn is_channel_trailer(word: u16) -> bool {
    word & CHANNEL_TRAILER_MASK != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_fields() {
        let word: u16 = 0x4ABC;
        assert_eq!(word_flag(word), FLAG_CHANNEL_START);
        assert_eq!(word_data(word), 0xABC);
        assert!(is_barrier(0xFFFF));
        assert!(!is_barrier(0xFFFE));
    }

    #[test]
    fn test_combine_4095() {
        assert_eq!(combine_4095(0x0000, 0x0007), 7);
        assert_eq!(combine_4095(0x0001, 0x0000), 4095);
        assert_eq!(combine_4095(0x0002, 0x0003), 2 * 4095 + 3);
        // Flags are ignored
        assert_eq!(combine_4095(0xF001, 0xF001), 4096);
    }

    #[test]
    fn test_card_id_word() {
        let word = pack_card_id(3, 17);
        assert!(has_card_marker(word));
        assert_eq!(card_module(word), 17);
        assert_eq!(card_crate_id(word), 3);
        assert!(!has_card_marker(0x0011_0000));
    }

    #[test]
    fn test_split_24() {
        for value in [0u32, 1, 0xFFF, 0x1000, 0x123456, 0xFFFFFF] {
            assert_eq!(split_24(pack_split_24(value)), value);
        }
        assert_eq!(split_24(0x0ABC_0123), 0x123ABC);
    }

    #[test]
    fn test_channel_words() {
        assert_eq!(channel_number(0x4021), 0x21);
        assert!(is_channel_trailer(0x5021));
        assert!(is_channel_trailer(0x1000));
        assert!(!is_channel_trailer(0x0FFF));
    }
}
