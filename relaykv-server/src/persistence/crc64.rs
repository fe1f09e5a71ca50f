/// CRC-64/Jones (reflected), the checksum trailing RDB snapshots.
pub struct Crc64 {
    crc: u64,
}

const POLY_REFLECTED: u64 = 0x95AC_9329_AC4B_C9B5;

impl Crc64 {
    pub fn new() -> Self {
        Self { crc: 0 }
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.crc ^= byte as u64;
            for _ in 0..8 {
                if self.crc & 1 == 1 {
                    self.crc = (self.crc >> 1) ^ POLY_REFLECTED;
                } else {
                    self.crc >>= 1;
                }
            }
        }
    }

    pub fn finalize(self) -> u64 {
        self.crc
    }
}

impl Default for Crc64 {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum of a complete buffer
pub fn checksum(data: &[u8]) -> u64 {
    let mut crc = Crc64::new();
    crc.update(data);
    crc.finalize()
}
