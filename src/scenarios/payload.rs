//! Payload builders.
//!
//! Big payloads are built by repeating a template block. The blocks carry
//! multi-byte UTF-8 on purpose: a server that counts characters where it
//! should count bytes (or splits a frame mid-character) fails these tests.

use serde::Serialize;

use crate::transport::Payload;

pub const SHORT_MESSAGE: &str = "This is a test";

const BIG_BLOCK: &str = "Edificio Alius A, Oficina 102, C/ Antonio Suárez Nº 10, \
Alcalá de Henares 28802 Madrid, España. ";

const REALLY_BIG_BLOCK: &str = "El veloz murciélago hindú comía feliz cardillo y kiwi. \
La cigüeña tocaba el saxofón detrás del palenque de paja. Ω≈ç√∫ 東京 ☃ 🚀\n";

/// Repeats of [`BIG_BLOCK`]: a few hundred bytes.
const BIG_REPEATS: usize = 4;
/// Repeats of [`REALLY_BIG_BLOCK`]: tens of kilobytes.
const REALLY_BIG_REPEATS: usize = 250;
/// Repeats of [`REALLY_BIG_BLOCK`]: well over 10^5 characters.
const REALLY_BIG2_REPEATS: usize = 1_200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageSize {
    Short,
    Big,
    ReallyBig,
    ReallyBig2,
}

impl MessageSize {
    pub fn build(self) -> Payload {
        match self {
            MessageSize::Short => Payload::text(SHORT_MESSAGE),
            MessageSize::Big => Payload::Text(BIG_BLOCK.repeat(BIG_REPEATS)),
            MessageSize::ReallyBig => Payload::Text(REALLY_BIG_BLOCK.repeat(REALLY_BIG_REPEATS)),
            MessageSize::ReallyBig2 => Payload::Text(REALLY_BIG_BLOCK.repeat(REALLY_BIG2_REPEATS)),
        }
    }
}

/// ASCII text of exactly `len` bytes.
pub fn filler(len: usize) -> String {
    const PATTERN: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    PATTERN.iter().cycle().take(len).map(|&b| b as char).collect()
}

/// `count` messages alternating between `small` and `large` bytes, small first.
pub fn burst(count: usize, small: usize, large: usize) -> Vec<Payload> {
    let small = Payload::Text(filler(small));
    let large = Payload::Text(filler(large));
    (0..count)
        .map(|i| if i % 2 == 0 { small.clone() } else { large.clone() })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_grow() {
        let short = MessageSize::Short.build().len();
        let big = MessageSize::Big.build().len();
        let really_big = MessageSize::ReallyBig.build().len();
        let really_big2 = MessageSize::ReallyBig2.build().len();

        assert_eq!(short, 14);
        assert!((100..1_000).contains(&big), "big = {}", big);
        assert!((10_000..100_000).contains(&really_big), "really big = {}", really_big);
        assert!(really_big2 > 100_000, "really big 2 = {}", really_big2);
    }

    #[test]
    fn test_big_payloads_carry_multibyte_text() {
        for size in [MessageSize::Big, MessageSize::ReallyBig, MessageSize::ReallyBig2] {
            let Payload::Text(text) = size.build() else {
                panic!("expected text payload");
            };
            assert!(text.len() > text.chars().count(), "{:?} is pure ASCII", size);
        }
    }

    #[test]
    fn test_really_big2_char_count() {
        let Payload::Text(text) = MessageSize::ReallyBig2.build() else {
            panic!("expected text payload");
        };
        assert!(text.chars().count() > 100_000);
    }

    #[test]
    fn test_filler_is_exact_length() {
        assert_eq!(filler(0), "");
        assert_eq!(filler(50).len(), 50);
        assert_eq!(filler(50_000).len(), 50_000);
    }

    #[test]
    fn test_burst_alternates() {
        let msgs = burst(500, 50, 50_000);
        assert_eq!(msgs.len(), 500);
        assert_eq!(msgs[0].len(), 50);
        assert_eq!(msgs[1].len(), 50_000);
        assert_eq!(msgs[498].len(), 50);
        assert_eq!(msgs[499].len(), 50_000);
    }
}
