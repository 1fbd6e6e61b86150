//! AES-128-OCB3 composition (RFC 7253).
//!
//! Built directly on the AES block cipher because the wire format's tag-64
//! variant uses 4-byte nonces, below what packaged OCB implementations
//! accept. Nonces of 1 to 15 bytes and tags of 8 or 16 bytes are supported;
//! the tag comparison on open is constant-time.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use subtle::ConstantTimeEq;

use crate::core::{CryptoError, SESSION_KEY_SIZE};

type Block = [u8; 16];

fn xor(a: &Block, b: &Block) -> Block {
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = a[i] ^ b[i];
    }
    out
}

fn xor_assign(a: &mut Block, b: &Block) {
    for i in 0..16 {
        a[i] ^= b[i];
    }
}

/// Doubling in GF(2^128) with the x^128 + x^7 + x^2 + x + 1 polynomial.
fn double(block: &Block) -> Block {
    let mut out = [0u8; 16];
    let carry = block[0] >> 7;
    for i in 0..15 {
        out[i] = (block[i] << 1) | (block[i + 1] >> 7);
    }
    out[15] = block[15] << 1;
    if carry == 1 {
        out[15] ^= 0x87;
    }
    out
}

fn ntz(i: usize) -> usize {
    i.trailing_zeros() as usize
}

/// Key-derived OCB state: the block cipher plus the L mask table.
struct Ocb {
    cipher: Aes128,
    l_star: Block,
    l_dollar: Block,
    l: Vec<Block>,
}

impl Ocb {
    fn new(key: &[u8; SESSION_KEY_SIZE], max_blocks: usize) -> Self {
        let cipher = Aes128::new(GenericArray::from_slice(key));
        let mut zero = GenericArray::clone_from_slice(&[0u8; 16]);
        cipher.encrypt_block(&mut zero);
        let mut l_star = [0u8; 16];
        l_star.copy_from_slice(&zero);
        let l_dollar = double(&l_star);

        let mut l = vec![double(&l_dollar)];
        while (1usize << l.len()) <= max_blocks {
            let next = double(&l[l.len() - 1]);
            l.push(next);
        }
        Self {
            cipher,
            l_star,
            l_dollar,
            l,
        }
    }

    fn enc(&self, block: Block) -> Block {
        let mut b = GenericArray::clone_from_slice(&block);
        self.cipher.encrypt_block(&mut b);
        let mut out = [0u8; 16];
        out.copy_from_slice(&b);
        out
    }

    fn dec(&self, block: Block) -> Block {
        let mut b = GenericArray::clone_from_slice(&block);
        self.cipher.decrypt_block(&mut b);
        let mut out = [0u8; 16];
        out.copy_from_slice(&b);
        out
    }

    /// HASH(K, A) over the associated data.
    fn hash(&self, aad: &[u8]) -> Block {
        let mut sum = [0u8; 16];
        let mut offset = [0u8; 16];
        let full = aad.len() / 16;
        for i in 1..=full {
            let mut chunk = [0u8; 16];
            chunk.copy_from_slice(&aad[(i - 1) * 16..i * 16]);
            xor_assign(&mut offset, &self.l[ntz(i)]);
            xor_assign(&mut sum, &self.enc(xor(&chunk, &offset)));
        }
        let rem = &aad[full * 16..];
        if !rem.is_empty() {
            xor_assign(&mut offset, &self.l_star);
            let mut chunk = [0u8; 16];
            chunk[..rem.len()].copy_from_slice(rem);
            chunk[rem.len()] = 0x80;
            xor_assign(&mut sum, &self.enc(xor(&chunk, &offset)));
        }
        sum
    }

    /// Offset_0 derived from the nonce and tag length.
    fn initial_offset(&self, nonce: &[u8], tag_len: usize) -> Result<Block, CryptoError> {
        if nonce.is_empty() || nonce.len() > 15 {
            return Err(CryptoError::NonceLength(nonce.len()));
        }
        let mut n = [0u8; 16];
        n[0] = ((tag_len * 8 % 128) as u8) << 1;
        n[15 - nonce.len()] |= 0x01;
        n[16 - nonce.len()..].copy_from_slice(nonce);

        let bottom = (n[15] & 0x3F) as usize;
        n[15] &= 0xC0;
        let ktop = self.enc(n);

        let mut stretch = [0u8; 24];
        stretch[..16].copy_from_slice(&ktop);
        for i in 0..8 {
            stretch[16 + i] = ktop[i] ^ ktop[i + 1];
        }

        let mut offset = [0u8; 16];
        let byte = bottom / 8;
        let bit = bottom % 8;
        for i in 0..16 {
            offset[i] = if bit == 0 {
                stretch[byte + i]
            } else {
                (stretch[byte + i] << bit) | (stretch[byte + i + 1] >> (8 - bit))
            };
        }
        Ok(offset)
    }
}

/// OCB3-encrypt `plaintext`, returning `ciphertext || tag`.
pub(crate) fn seal(
    key: &[u8; SESSION_KEY_SIZE],
    nonce: &[u8],
    aad: &[u8],
    plaintext: &[u8],
    tag_len: usize,
) -> Result<Vec<u8>, CryptoError> {
    debug_assert!(tag_len == 8 || tag_len == 16);
    let max_blocks = (aad.len() / 16).max(plaintext.len() / 16).max(1);
    let ocb = Ocb::new(key, max_blocks);
    let mut offset = ocb.initial_offset(nonce, tag_len)?;
    let mut checksum = [0u8; 16];
    let mut out = Vec::with_capacity(plaintext.len() + tag_len);

    let full = plaintext.len() / 16;
    for i in 1..=full {
        let mut chunk = [0u8; 16];
        chunk.copy_from_slice(&plaintext[(i - 1) * 16..i * 16]);
        xor_assign(&mut offset, &ocb.l[ntz(i)]);
        out.extend_from_slice(&xor(&ocb.enc(xor(&chunk, &offset)), &offset));
        xor_assign(&mut checksum, &chunk);
    }
    let rem = &plaintext[full * 16..];
    if !rem.is_empty() {
        xor_assign(&mut offset, &ocb.l_star);
        let pad = ocb.enc(offset);
        for (j, b) in rem.iter().enumerate() {
            out.push(b ^ pad[j]);
            checksum[j] ^= b;
        }
        checksum[rem.len()] ^= 0x80;
    }

    let mut tag_block = xor(&checksum, &offset);
    xor_assign(&mut tag_block, &ocb.l_dollar);
    let tag = xor(&ocb.enc(tag_block), &ocb.hash(aad));
    out.extend_from_slice(&tag[..tag_len]);
    Ok(out)
}

/// OCB3-decrypt `ciphertext || tag`, verifying the tag in constant time.
pub(crate) fn open(
    key: &[u8; SESSION_KEY_SIZE],
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag_len: usize,
) -> Result<Vec<u8>, CryptoError> {
    debug_assert!(tag_len == 8 || tag_len == 16);
    if ciphertext.len() < tag_len {
        return Err(CryptoError::AuthFailure);
    }
    let (body, tag) = ciphertext.split_at(ciphertext.len() - tag_len);

    let max_blocks = (aad.len() / 16).max(body.len() / 16).max(1);
    let ocb = Ocb::new(key, max_blocks);
    let mut offset = ocb.initial_offset(nonce, tag_len)?;
    let mut checksum = [0u8; 16];
    let mut out = Vec::with_capacity(body.len());

    let full = body.len() / 16;
    for i in 1..=full {
        let mut chunk = [0u8; 16];
        chunk.copy_from_slice(&body[(i - 1) * 16..i * 16]);
        xor_assign(&mut offset, &ocb.l[ntz(i)]);
        let plain = xor(&ocb.dec(xor(&chunk, &offset)), &offset);
        out.extend_from_slice(&plain);
        xor_assign(&mut checksum, &plain);
    }
    let rem = &body[full * 16..];
    if !rem.is_empty() {
        xor_assign(&mut offset, &ocb.l_star);
        let pad = ocb.enc(offset);
        for (j, b) in rem.iter().enumerate() {
            let p = b ^ pad[j];
            out.push(p);
            checksum[j] ^= p;
        }
        checksum[rem.len()] ^= 0x80;
    }

    let mut tag_block = xor(&checksum, &offset);
    xor_assign(&mut tag_block, &ocb.l_dollar);
    let expected = xor(&ocb.enc(tag_block), &ocb.hash(aad));

    if bool::from(expected[..tag_len].ct_eq(tag)) {
        Ok(out)
    } else {
        Err(CryptoError::AuthFailure)
    }
}
