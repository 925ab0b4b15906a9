// ABOUTME: CRC-64 with the ISO 3309 polynomial, used to derive pseudo ids for guild channels
// ABOUTME: Matches the reflected, inverted-register variant common in OneBot implementations

/// CRC-64/GO-ISO: polynomial 0x1B (x^64 + x^4 + x^3 + x + 1) in reflected
/// form, init and xorout all ones, input and output reflected.
const ISO_POLY: u64 = 0xD800_0000_0000_0000;

const fn make_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u64;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 == 1 {
                (crc >> 1) ^ ISO_POLY
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Byte-at-a-time lookup for [`ISO_POLY`], built at compile time.
static TABLE: [u64; 256] = make_table();

/// Streaming checksum; feed parts with [`Crc64Iso::update`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Crc64Iso(u64);

impl Crc64Iso {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn update(&mut self, bytes: &[u8]) {
        let mut crc = !self.0;
        for &b in bytes {
            crc = TABLE[((crc as u8) ^ b) as usize] ^ (crc >> 8);
        }
        self.0 = !crc;
    }

    pub fn finish(&self) -> u64 {
        self.0
    }
}

pub fn checksum(bytes: &[u8]) -> u64 {
    let mut crc = Crc64Iso::new();
    crc.update(bytes);
    crc.finish()
}

/// Folds a checksum into a positive id that sits above the 32-bit account range.
pub fn pseudo_id(sum: u64) -> i64 {
    let mut id = sum & 0x7fff_ffff_ffff_ffff;
    if id <= 0xffff_ffff {
        id |= 0x1_0000_0000;
    }
    id as i64
}

/// Pseudo id over the concatenation of `parts`.
pub fn pseudo_id_of(parts: &[&str]) -> i64 {
    let mut crc = Crc64Iso::new();
    for part in parts {
        crc.update(part.as_bytes());
    }
    pseudo_id(crc.finish())
}
