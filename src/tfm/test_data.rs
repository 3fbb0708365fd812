#[rustfmt::skip]
pub static BASIC_TFM: [u8; 60] = [
    // File length (unused by the reader)
    0x00, 0x0F,
    // Header length
    0x00, 0x02,
    // First character ('a')
    0x00, 0x61,
    // Last character ('a')
    0x00, 0x61,
    // Number of widths
    0x00, 0x02,
    // Number of heights
    0x00, 0x02,
    // Number of depths
    0x00, 0x02,
    // Italic corrections, lig/kerns, kerns, extensible recipes, params
    0x00, 0x00,
    0x00, 0x00,
    0x00, 0x00,
    0x00, 0x00,
    0x00, 0x00,

    // Header: checksum, design size (10.0 as a fix word)
    0xAB, 0xCD, 0xEF, 0xAB,
    0x00, 0xA0, 0x00, 0x00,

    // The single character: width index 1, height index 1, depth index 1
    0b0000_0001, 0b0001_0001, 0b0000_0000, 0b0000_0000,

    // 2 widths
    0x00, 0x00, 0x00, 0x00,
    0x00, 0x38, 0x00, 0x00,

    // 2 heights
    0x00, 0x00, 0x00, 0x00,
    0x00, 0x58, 0x00, 0x00,

    // 2 depths
    0x00, 0x00, 0x00, 0x00,
    0x00, 0x08, 0x00, 0x00,
];
