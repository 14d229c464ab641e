//! LZ string compression in the URI-component format of the `lz-string`
//! JavaScript library, so links shared by browser peers decode here and
//! ours decode there.
//!
//! Strings are handled as UTF-16 code units, like JavaScript does.

use std::collections::{HashMap, HashSet};

const URI_ALPHABET: &[u8; 65] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+-$";
const BITS_PER_CHAR: u32 = 6;
const END_OF_STREAM: u32 = 2;

#[derive(Default)]
struct BitWriter {
    out: String,
    val: u32,
    position: u32,
}

impl BitWriter {
    fn push_bit(&mut self, bit: u32) {
        self.val = (self.val << 1) | bit;
        if self.position == BITS_PER_CHAR - 1 {
            self.position = 0;
            self.out.push(char::from(URI_ALPHABET[self.val as usize]));
            self.val = 0;
        } else {
            self.position += 1;
        }
    }

    /// `n` low bits of `value`, least significant first
    fn push_bits(&mut self, mut value: u32, n: u32) {
        for _ in 0..n {
            self.push_bit(value & 1);
            value >>= 1;
        }
    }

    fn finish(mut self) -> String {
        loop {
            self.val <<= 1;
            if self.position == BITS_PER_CHAR - 1 {
                self.out.push(char::from(URI_ALPHABET[self.val as usize]));
                return self.out;
            }
            self.position += 1;
        }
    }
}

struct Compressor {
    dictionary: HashMap<Vec<u16>, u32>,
    pending_literals: HashSet<Vec<u16>>,
    dict_size: u32,
    enlarge_in: u32,
    num_bits: u32,
    out: BitWriter,
}

impl Compressor {
    fn new() -> Self {
        Self {
            dictionary: HashMap::new(),
            pending_literals: HashSet::new(),
            dict_size: 3,
            enlarge_in: 2,
            num_bits: 2,
            out: BitWriter::default(),
        }
    }

    fn tick(&mut self) {
        self.enlarge_in -= 1;
        if self.enlarge_in == 0 {
            self.enlarge_in = 1 << self.num_bits;
            self.num_bits += 1;
        }
    }

    /// Emit the code for phrase `w`; a first-seen character goes out as a literal
    fn emit(&mut self, w: &[u16]) {
        if self.pending_literals.remove(w) {
            let unit = u32::from(w[0]);
            if unit < 256 {
                self.out.push_bits(0, self.num_bits);
                self.out.push_bits(unit, 8);
            } else {
                self.out.push_bits(1, self.num_bits);
                self.out.push_bits(unit, 16);
            }
            self.tick();
        } else if let Some(&code) = self.dictionary.get(w) {
            self.out.push_bits(code, self.num_bits);
        }
        self.tick();
    }

    fn add(&mut self, phrase: Vec<u16>) {
        self.dictionary.insert(phrase, self.dict_size);
        self.dict_size += 1;
    }
}

/// Equivalent of `LZString.compressToEncodedURIComponent`
pub fn compress_to_uri(input: &str) -> String {
    let mut lz = Compressor::new();
    let mut w: Vec<u16> = Vec::new();

    for c in input.encode_utf16() {
        let single = vec![c];
        if !lz.dictionary.contains_key(&single) {
            lz.add(single.clone());
            lz.pending_literals.insert(single);
        }

        let mut wc = w.clone();
        wc.push(c);
        if lz.dictionary.contains_key(&wc) {
            w = wc;
            continue;
        }
        lz.emit(&w);
        lz.add(wc);
        w = vec![c];
    }
    if !w.is_empty() {
        lz.emit(&w);
    }

    let num_bits = lz.num_bits;
    lz.out.push_bits(END_OF_STREAM, num_bits);
    lz.out.finish()
}

struct BitReader {
    values: Vec<u32>,
    val: u32,
    position: u32,
    index: usize,
}

impl BitReader {
    const RESET: u32 = 1 << (BITS_PER_CHAR - 1);

    fn read_bits(&mut self, n: u32) -> u32 {
        let mut bits = 0;
        for i in 0..n {
            let bit = self.val & self.position;
            self.position >>= 1;
            if self.position == 0 {
                self.position = Self::RESET;
                // past the end reads as zero bits
                self.val = self.values.get(self.index).copied().unwrap_or(0);
                self.index += 1;
            }
            if bit > 0 {
                bits |= 1 << i;
            }
        }
        bits
    }
}

/// Equivalent of `LZString.decompressFromEncodedURIComponent`. `None` for
/// characters outside the alphabet, a corrupt stream, or output longer than
/// `max_units` UTF-16 code units.
pub fn decompress_from_uri(input: &str, max_units: usize) -> Option<String> {
    // form-encoded links turn '+' into ' '
    let values = input
        .bytes()
        .map(|b| if b == b' ' { b'+' } else { b })
        .map(|b| URI_ALPHABET.iter().position(|&a| a == b).map(|p| p as u32))
        .collect::<Option<Vec<u32>>>()?;
    let first = *values.first()?;
    let length = values.len();
    let mut reader = BitReader {
        values,
        val: first,
        position: BitReader::RESET,
        index: 1,
    };

    let first = match reader.read_bits(2) {
        0 => reader.read_bits(8),
        1 => reader.read_bits(16),
        END_OF_STREAM => return Some(String::new()),
        _ => return None,
    };
    // codes 0..=2 are control codes, never looked up
    let mut dictionary: Vec<Vec<u16>> = vec![Vec::new(), Vec::new(), Vec::new()];
    let mut w = vec![first as u16];
    dictionary.push(w.clone());
    let mut result = w.clone();
    let mut enlarge_in: u32 = 4;
    let mut num_bits: u32 = 3;

    loop {
        if reader.index > length || result.len() > max_units {
            return None;
        }
        let mut code = reader.read_bits(num_bits) as usize;
        match code {
            0 | 1 => {
                let width = if code == 0 { 8 } else { 16 };
                dictionary.push(vec![reader.read_bits(width) as u16]);
                code = dictionary.len() - 1;
                enlarge_in -= 1;
            }
            2 => return String::from_utf16(&result).ok(),
            _ => {}
        }
        if enlarge_in == 0 {
            enlarge_in = 1 << num_bits;
            num_bits += 1;
        }

        let entry = if code < dictionary.len() {
            dictionary[code].clone()
        } else if code == dictionary.len() {
            let mut entry = w.clone();
            entry.push(w[0]);
            entry
        } else {
            return None;
        };
        result.extend_from_slice(&entry);

        let mut phrase = w;
        phrase.push(entry[0]);
        dictionary.push(phrase);
        enlarge_in -= 1;
        w = entry;
        if enlarge_in == 0 {
            enlarge_in = 1 << num_bits;
            num_bits += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 64 * 1024;

    #[test]
    fn matches_browser_output() {
        assert_eq!(compress_to_uri(""), "Q");
        assert_eq!(compress_to_uri("aaaaaaaaaaaaaaaaaaaaaaaa"), "IY18aQ");
        assert_eq!(
            decompress_from_uri("IY18aQ", LIMIT).as_deref(),
            Some("aaaaaaaaaaaaaaaaaaaaaaaa")
        );
    }

    #[test]
    fn wide_characters_survive() {
        let text = "Zoë 🙂 says héllo, Zoë 🙂 says héllo";
        let packed = compress_to_uri(text);
        assert!(packed.bytes().all(|b| URI_ALPHABET.contains(&b)));
        assert_eq!(decompress_from_uri(&packed, LIMIT).as_deref(), Some(text));
    }

    #[test]
    fn space_is_read_as_plus() {
        let text = r#"{"n":1,"msg":"hello hello hello"}"#;
        let packed = "N4IgdiBcCMA0IFsDOBzKIAWBTANjg9gATZ5EkEgC+QA";
        assert_eq!(compress_to_uri(text), packed);
        let mangled = packed.replace('+', " ");
        assert_eq!(decompress_from_uri(&mangled, LIMIT).as_deref(), Some(text));
    }

    #[test]
    fn rejects_foreign_characters_and_oversized_output() {
        assert_eq!(decompress_from_uri("", LIMIT), None);
        assert_eq!(decompress_from_uri("abc=", LIMIT), None);
        assert_eq!(decompress_from_uri("!!", LIMIT), None);

        let big = "x".repeat(10_000);
        let packed = compress_to_uri(&big);
        assert_eq!(decompress_from_uri(&packed, 1_000), None);
        assert_eq!(decompress_from_uri(&packed, LIMIT).as_deref(), Some(big.as_str()));
    }
}
