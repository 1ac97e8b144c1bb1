//! # Codec: RSA Block Encoding
//!
//! Turns text into plaintext block integers below the modulus and back,
//! with `mod_pow` wrapped around the block transforms for the actual
//! encrypt/decrypt. Three framings:
//!
//! - **fixed-width numeric**: each symbol becomes exactly two decimal
//!   digits; the digit stream is sliced into fixed-width chunks and the
//!   final chunk is right-padded with the alphabet's pad symbol.
//! - **radix (b-adic)**: symbol indices packed positionally in base
//!   `radix`; block size is the largest `k` with `radix^k < n`.
//! - **PKCS#1 v1.5**: the byte message wrapped as
//!   `00 02 | PS | 00 | M` with at least 8 nonzero random padding bytes,
//!   carried as a single block.
//!
//! A plaintext block at or above `n` is a hard `Encoding` failure in
//! every mode, never a silent truncation.

use std::collections::HashMap;

use rug::integer::Order;
use rug::Integer;
use serde::{Deserialize, Serialize};

use crate::arith::mod_pow;
use crate::error::{EngineError, Result};
use crate::random::fill_random_bytes;

/// Block framing applied before and after modular exponentiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingMode {
    FixedWidthNumeric,
    Radix,
    Pkcs1V15,
}

/// A bijection between symbols and the values `[offset, offset + radix)`.
#[derive(Clone, Debug)]
pub enum Alphabet {
    /// Fixed 7-bit ASCII: code points 0..128, offset 0.
    Ascii,
    /// Explicit symbol table. `index` inverts `symbols` and is built at
    /// construction, where the bijection is validated.
    Table {
        symbols: Vec<char>,
        offset: u32,
        index: HashMap<char, u32>,
    },
}

impl Alphabet {
    pub fn ascii() -> Self {
        Alphabet::Ascii
    }

    /// Build a table alphabet. Fails on an empty table or a repeated
    /// symbol (the symbol-to-value map must be a bijection).
    pub fn from_symbols(symbols: &str, offset: u32) -> Result<Self> {
        let symbols: Vec<char> = symbols.chars().collect();
        if symbols.is_empty() {
            return Err(EngineError::validation(
                "alphabet",
                "must contain at least one symbol",
            ));
        }
        let mut index = HashMap::with_capacity(symbols.len());
        for (i, &c) in symbols.iter().enumerate() {
            if index.insert(c, i as u32).is_some() {
                return Err(EngineError::Validation {
                    field: "alphabet".into(),
                    reason: format!("symbol {c:?} appears more than once"),
                    expected: Some("distinct symbols".into()),
                });
            }
        }
        Ok(Alphabet::Table {
            symbols,
            offset,
            index,
        })
    }

    pub fn radix(&self) -> u32 {
        match self {
            Alphabet::Ascii => 128,
            Alphabet::Table { symbols, .. } => symbols.len() as u32,
        }
    }

    pub fn offset(&self) -> u32 {
        match self {
            Alphabet::Ascii => 0,
            Alphabet::Table { offset, .. } => *offset,
        }
    }

    /// 0-based position of a symbol within the alphabet.
    fn index_of(&self, c: char) -> Result<u32> {
        match self {
            Alphabet::Ascii => {
                let code = c as u32;
                if code < 128 {
                    Ok(code)
                } else {
                    Err(EngineError::Encoding(format!(
                        "character {c:?} is outside the 7-bit ASCII alphabet"
                    )))
                }
            }
            Alphabet::Table { index, .. } => index.get(&c).copied().ok_or_else(|| {
                EngineError::Encoding(format!("character {c:?} is not in the alphabet"))
            }),
        }
    }

    /// Mapped value of a symbol: `offset + index`.
    fn value_of(&self, c: char) -> Result<u32> {
        Ok(self.offset() + self.index_of(c)?)
    }

    fn char_at(&self, index: u32) -> Result<char> {
        match self {
            Alphabet::Ascii => {
                if index < 128 {
                    Ok(index as u8 as char)
                } else {
                    Err(EngineError::Encoding(format!(
                        "value {index} has no 7-bit ASCII symbol"
                    )))
                }
            }
            Alphabet::Table { symbols, .. } => {
                symbols.get(index as usize).copied().ok_or_else(|| {
                    EngineError::Encoding(format!("value {index} has no alphabet symbol"))
                })
            }
        }
    }

    fn char_for_value(&self, value: u32) -> Result<char> {
        let offset = self.offset();
        if value < offset {
            return Err(EngineError::Encoding(format!(
                "value {value} is below the alphabet offset {offset}"
            )));
        }
        self.char_at(value - offset)
    }

    /// Padding symbol for fixed-width framing: the literal `X` when the
    /// alphabet has one, otherwise the highest-valued symbol.
    fn pad_symbol(&self) -> char {
        match self {
            Alphabet::Ascii => 'X',
            Alphabet::Table { symbols, .. } => {
                if symbols.contains(&'X') {
                    'X'
                } else {
                    symbols[symbols.len() - 1]
                }
            }
        }
    }
}

fn check_block_in_range(block: &Integer, n: &Integer) -> Result<()> {
    if *block < 0u32 || block >= n {
        return Err(EngineError::Encoding(format!(
            "block {block} is outside [0, n)"
        )));
    }
    Ok(())
}

/// Symbols per block in fixed-width framing: each symbol occupies two
/// decimal digits and the full block must stay below `n`, so the frame
/// width is `digits(n) - 1` digits.
fn fixed_width_symbols_per_block(n: &Integer) -> Result<usize> {
    let per_block = ((crate::exact_digits(n) as usize) - 1) / 2;
    if per_block == 0 {
        return Err(EngineError::Encoding(format!(
            "modulus {n} is too small for fixed-width blocks"
        )));
    }
    Ok(per_block)
}

/// Largest `k` with `radix^k < n`, the b-adic block size.
fn radix_block_size(radix: u32, n: &Integer) -> Result<usize> {
    let mut k = 0usize;
    let mut power = Integer::from(radix);
    while power < *n {
        k += 1;
        power *= radix;
    }
    if k == 0 {
        return Err(EngineError::Encoding(format!(
            "modulus {n} is too small for radix-{radix} blocks"
        )));
    }
    Ok(k)
}

fn modulus_byte_len(n: &Integer) -> usize {
    ((n.significant_bits() + 7) / 8) as usize
}

fn encode_fixed_width(message: &str, alphabet: &Alphabet, n: &Integer) -> Result<Vec<Integer>> {
    let per_block = fixed_width_symbols_per_block(n)?;
    let mut values = Vec::new();
    for c in message.chars() {
        let v = alphabet.value_of(c)?;
        if v > 99 {
            return Err(EngineError::Encoding(format!(
                "symbol {c:?} maps to {v}, outside the two-digit range"
            )));
        }
        values.push(v);
    }
    let pad = alphabet.value_of(alphabet.pad_symbol())?;
    if pad > 99 {
        return Err(EngineError::Encoding(format!(
            "pad symbol maps to {pad}, outside the two-digit range"
        )));
    }

    let mut blocks = Vec::new();
    for chunk in values.chunks(per_block) {
        let mut digits = String::with_capacity(2 * per_block);
        for v in chunk {
            digits.push_str(&format!("{v:02}"));
        }
        for _ in chunk.len()..per_block {
            digits.push_str(&format!("{pad:02}"));
        }
        let block: Integer = digits
            .parse()
            .map_err(|_| EngineError::Encoding("malformed digit block".into()))?;
        if block >= *n {
            return Err(EngineError::Encoding(format!(
                "plaintext block {block} is not below the modulus {n}"
            )));
        }
        blocks.push(block);
    }
    Ok(blocks)
}

fn decode_fixed_width(blocks: &[Integer], alphabet: &Alphabet, n: &Integer) -> Result<String> {
    let per_block = fixed_width_symbols_per_block(n)?;
    let width = 2 * per_block;
    let pad = alphabet.pad_symbol();
    let last = blocks.len().saturating_sub(1);

    let mut out = String::new();
    for (i, block) in blocks.iter().enumerate() {
        check_block_in_range(block, n)?;
        let digits = block.to_string();
        if digits.len() > width {
            return Err(EngineError::Encoding(format!(
                "block {block} is wider than the {width}-digit frame"
            )));
        }
        let digits = format!("{digits:0>width$}");
        let mut symbols = Vec::with_capacity(per_block);
        for pair in digits.as_bytes().chunks(2) {
            let value = (pair[0] - b'0') as u32 * 10 + (pair[1] - b'0') as u32;
            symbols.push(alphabet.char_for_value(value)?);
        }
        // Right-padding only ever lands at the end of the final block.
        if i == last {
            while symbols.last() == Some(&pad) {
                symbols.pop();
            }
        }
        out.extend(symbols);
    }
    Ok(out)
}

fn encode_radix(message: &str, alphabet: &Alphabet, n: &Integer) -> Result<Vec<Integer>> {
    let radix = alphabet.radix();
    let k = radix_block_size(radix, n)?;
    let indices: Vec<u32> = message
        .chars()
        .map(|c| alphabet.index_of(c))
        .collect::<Result<_>>()?;

    let mut blocks = Vec::new();
    for chunk in indices.chunks(k) {
        let mut block = Integer::from(0);
        for &idx in chunk {
            block = block * radix + idx;
        }
        if block >= *n {
            return Err(EngineError::Encoding(format!(
                "plaintext block {block} is not below the modulus {n}"
            )));
        }
        blocks.push(block);
    }
    Ok(blocks)
}

fn decode_radix(blocks: &[Integer], alphabet: &Alphabet, n: &Integer) -> Result<String> {
    let radix = alphabet.radix();
    let k = radix_block_size(radix, n)?;
    let last = blocks.len().saturating_sub(1);

    let mut out = String::new();
    for (i, block) in blocks.iter().enumerate() {
        check_block_in_range(block, n)?;
        let mut value = block.clone();
        let mut indices = Vec::new();
        while value > 0u32 {
            let (q, r) = value.div_rem(Integer::from(radix));
            indices.push(r.to_u32().unwrap_or(0));
            value = q;
        }
        if indices.is_empty() {
            indices.push(0);
        }
        indices.reverse();
        if indices.len() > k {
            return Err(EngineError::Encoding(format!(
                "block {block} exceeds the radix-{radix} frame of {k} symbols"
            )));
        }
        // Interior blocks are full frames; restore leading symbol-0s lost
        // in the integer form. The final block keeps its natural length.
        let lead = if i < last { k - indices.len() } else { 0 };
        for _ in 0..lead {
            out.push(alphabet.char_at(0)?);
        }
        for idx in indices {
            out.push(alphabet.char_at(idx)?);
        }
    }
    Ok(out)
}

fn random_nonzero_byte() -> u8 {
    let mut b = [0u8; 1];
    loop {
        fill_random_bytes(&mut b);
        if b[0] != 0 {
            return b[0];
        }
    }
}

fn encode_pkcs1(message: &str, n: &Integer) -> Result<Vec<Integer>> {
    let k = modulus_byte_len(n);
    let msg = message.as_bytes();
    if msg.len() + 11 > k {
        return Err(EngineError::Encoding(format!(
            "message of {} bytes does not fit a {k}-byte modulus (needs 11 bytes of overhead)",
            msg.len()
        )));
    }

    let ps_len = k - 3 - msg.len();
    let mut eb = Vec::with_capacity(k);
    eb.push(0x00);
    eb.push(0x02);
    for _ in 0..ps_len {
        eb.push(random_nonzero_byte());
    }
    eb.push(0x00);
    eb.extend_from_slice(msg);

    let block = Integer::from_digits(&eb, Order::Msf);
    // The leading zero byte already forces block < n.
    check_block_in_range(&block, n)?;
    Ok(vec![block])
}

fn decode_pkcs1(blocks: &[Integer], n: &Integer) -> Result<String> {
    if blocks.len() != 1 {
        return Err(EngineError::Encoding(format!(
            "PKCS#1 v1.5 carries exactly one block, got {}",
            blocks.len()
        )));
    }
    let block = &blocks[0];
    check_block_in_range(block, n)?;

    let k = modulus_byte_len(n);
    if k < 11 {
        return Err(EngineError::Encoding(format!(
            "modulus {n} is too small for PKCS#1 v1.5"
        )));
    }
    let raw = block.to_digits::<u8>(Order::Msf);
    if raw.len() > k {
        return Err(EngineError::Encoding("block wider than the modulus".into()));
    }
    let mut eb = vec![0u8; k - raw.len()];
    eb.extend_from_slice(&raw);

    if eb[0] != 0x00 || eb[1] != 0x02 {
        return Err(EngineError::Encoding(
            "malformed PKCS#1 header, expected 00 02".into(),
        ));
    }
    let separator = eb[2..]
        .iter()
        .position(|&b| b == 0x00)
        .map(|p| p + 2)
        .ok_or_else(|| EngineError::Encoding("missing PKCS#1 padding separator".into()))?;
    // PS must span at least 8 bytes; a zero inside that region is a
    // malformed (or tampered) block.
    if separator < 10 {
        return Err(EngineError::Encoding(
            "PKCS#1 padding shorter than 8 bytes".into(),
        ));
    }
    String::from_utf8(eb[separator + 1..].to_vec())
        .map_err(|_| EngineError::Encoding("decoded message is not valid UTF-8".into()))
}

/// Frame a message into plaintext block integers, each strictly below `n`.
pub fn encode_blocks(
    message: &str,
    alphabet: &Alphabet,
    mode: EncodingMode,
    n: &Integer,
) -> Result<Vec<Integer>> {
    if *n < 2u32 {
        return Err(EngineError::InvalidArgument(format!(
            "modulus {n} must be >= 2"
        )));
    }
    match mode {
        EncodingMode::FixedWidthNumeric => encode_fixed_width(message, alphabet, n),
        EncodingMode::Radix => encode_radix(message, alphabet, n),
        EncodingMode::Pkcs1V15 => encode_pkcs1(message, n),
    }
}

/// Recover the message from plaintext block integers.
pub fn decode_blocks(
    blocks: &[Integer],
    alphabet: &Alphabet,
    mode: EncodingMode,
    n: &Integer,
) -> Result<String> {
    if *n < 2u32 {
        return Err(EngineError::InvalidArgument(format!(
            "modulus {n} must be >= 2"
        )));
    }
    match mode {
        EncodingMode::FixedWidthNumeric => decode_fixed_width(blocks, alphabet, n),
        EncodingMode::Radix => decode_radix(blocks, alphabet, n),
        EncodingMode::Pkcs1V15 => decode_pkcs1(blocks, n),
    }
}

/// Frame and encrypt: `c_i = m_i^e mod n` per block.
pub fn encrypt_message(
    message: &str,
    alphabet: &Alphabet,
    mode: EncodingMode,
    e: &Integer,
    n: &Integer,
) -> Result<Vec<Integer>> {
    encode_blocks(message, alphabet, mode, n)?
        .iter()
        .map(|block| mod_pow(block, e, n))
        .collect()
}

/// Decrypt and unframe: `m_i = c_i^d mod n` per block.
pub fn decrypt_message(
    blocks: &[Integer],
    alphabet: &Alphabet,
    mode: EncodingMode,
    d: &Integer,
    n: &Integer,
) -> Result<String> {
    let plain: Vec<Integer> = blocks
        .iter()
        .map(|block| mod_pow(block, d, n))
        .collect::<Result<_>>()?;
    decode_blocks(&plain, alphabet, mode, n)
}
