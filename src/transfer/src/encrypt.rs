// Copyright 2025 Snowflake Computing Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Client-side encryption for staged files.
//!
//! Every file gets a fresh file-encryption key (FEK) the same size as the
//! stage master key. The body is encrypted with the FEK — AES-CBC with
//! PKCS#7 padding, or AES-GCM on stages that negotiate it — and the IV is
//! written once at the start of the encrypted body. The FEK itself travels
//! wrapped with the query stage master key in the object's metadata:
//! AES-ECB wrap for CBC stages, RFC 3394 key wrap for GCM stages.

use crate::plan::EncryptionMaterial;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore as _;
use snowflake_core::Result;
use snowflake_core::error::Error;

const CBC_IV_LEN: usize = 16;
const GCM_NONCE_LEN: usize = 12;

/// The cipher used for the file body and the matching key-wrap mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Cbc,
    Gcm,
}

/// An encrypted body plus the metadata the stage object must carry.
#[derive(Clone, Debug)]
pub struct Encrypted {
    /// IV-prefixed ciphertext.
    pub body: Vec<u8>,
    /// Base64 of the wrapped FEK.
    pub wrapped_key: String,
    /// The material descriptor JSON recorded with the object.
    pub mat_desc: String,
}

/// The master key decoded from the encryption material.
fn master_key(material: &EncryptionMaterial) -> Result<Vec<u8>> {
    let key = STANDARD
        .decode(&material.query_stage_master_key)
        .map_err(|_| Error::transfer("stage master key is not valid base64"))?;
    match key.len() {
        16 | 32 => Ok(key),
        n => Err(Error::transfer(format!(
            "unsupported stage master key length: {n} bytes"
        ))),
    }
}

/// The material descriptor recorded with every encrypted object.
pub fn mat_desc(material: &EncryptionMaterial, key_len: usize) -> String {
    serde_json::json!({
        "queryId": material.query_id,
        "smkId": material.smk_id.to_string(),
        "keySize": (key_len * 8).to_string(),
    })
    .to_string()
}

/// Encrypts `plaintext` under a fresh FEK.
pub fn encrypt(material: &EncryptionMaterial, plaintext: &[u8], mode: Mode) -> Result<Encrypted> {
    let kek = master_key(material)?;
    let mut fek = vec![0_u8; kek.len()];
    rand::rng().fill_bytes(&mut fek);

    let body = match mode {
        Mode::Cbc => {
            let mut iv = [0_u8; CBC_IV_LEN];
            rand::rng().fill_bytes(&mut iv);
            let mut body = iv.to_vec();
            body.extend_from_slice(&cbc_encrypt(&fek, &iv, plaintext)?);
            body
        }
        Mode::Gcm => {
            let mut nonce = [0_u8; GCM_NONCE_LEN];
            rand::rng().fill_bytes(&mut nonce);
            let mut body = nonce.to_vec();
            body.extend_from_slice(&gcm_encrypt(&fek, &nonce, plaintext)?);
            body
        }
    };
    let wrapped = match mode {
        Mode::Cbc => ecb_wrap(&kek, &fek)?,
        Mode::Gcm => rfc3394_wrap(&kek, &fek)?,
    };
    Ok(Encrypted {
        body,
        wrapped_key: STANDARD.encode(wrapped),
        mat_desc: mat_desc(material, kek.len()),
    })
}

/// Decrypts an IV-prefixed body using the wrapped FEK from the object
/// metadata.
pub fn decrypt(
    material: &EncryptionMaterial,
    body: &[u8],
    wrapped_key: &str,
    mode: Mode,
) -> Result<Vec<u8>> {
    let kek = master_key(material)?;
    let wrapped = STANDARD
        .decode(wrapped_key)
        .map_err(|_| Error::transfer("wrapped file key is not valid base64"))?;
    let fek = match mode {
        Mode::Cbc => ecb_unwrap(&kek, &wrapped)?,
        Mode::Gcm => rfc3394_unwrap(&kek, &wrapped)?,
    };
    match mode {
        Mode::Cbc => {
            if body.len() < CBC_IV_LEN {
                return Err(Error::transfer("encrypted body is shorter than its IV"));
            }
            let (iv, ciphertext) = body.split_at(CBC_IV_LEN);
            cbc_decrypt(&fek, iv, ciphertext)
        }
        Mode::Gcm => {
            if body.len() < GCM_NONCE_LEN {
                return Err(Error::transfer("encrypted body is shorter than its nonce"));
            }
            let (nonce, ciphertext) = body.split_at(GCM_NONCE_LEN);
            gcm_decrypt(&fek, nonce, ciphertext)
        }
    }
}

fn cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    use aes::cipher::block_padding::Pkcs7;
    use aes::cipher::{BlockEncryptMut, KeyIvInit};
    Ok(match key.len() {
        16 => cbc::Encryptor::<aes::Aes128>::new_from_slices(key, iv)
            .map_err(Error::transfer)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        _ => cbc::Encryptor::<aes::Aes256>::new_from_slices(key, iv)
            .map_err(Error::transfer)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    })
}

fn cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    use aes::cipher::block_padding::Pkcs7;
    use aes::cipher::{BlockDecryptMut, KeyIvInit};
    match key.len() {
        16 => cbc::Decryptor::<aes::Aes128>::new_from_slices(key, iv)
            .map_err(Error::transfer)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| Error::transfer("bad padding in encrypted body")),
        _ => cbc::Decryptor::<aes::Aes256>::new_from_slices(key, iv)
            .map_err(Error::transfer)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| Error::transfer("bad padding in encrypted body")),
    }
}

fn gcm_encrypt(key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    use aes_gcm::aead::Aead;
    use aes_gcm::{Aes128Gcm, Aes256Gcm, KeyInit, Nonce};
    let nonce = Nonce::from_slice(nonce);
    match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .map_err(Error::transfer)?
            .encrypt(nonce, plaintext)
            .map_err(|_| Error::transfer("AES-GCM encryption failed")),
        _ => Aes256Gcm::new_from_slice(key)
            .map_err(Error::transfer)?
            .encrypt(nonce, plaintext)
            .map_err(|_| Error::transfer("AES-GCM encryption failed")),
    }
}

fn gcm_decrypt(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    use aes_gcm::aead::Aead;
    use aes_gcm::{Aes128Gcm, Aes256Gcm, KeyInit, Nonce};
    let nonce = Nonce::from_slice(nonce);
    match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .map_err(Error::transfer)?
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::transfer("AES-GCM authentication failed")),
        _ => Aes256Gcm::new_from_slice(key)
            .map_err(Error::transfer)?
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::transfer("AES-GCM authentication failed")),
    }
}

fn ecb_blocks(kek: &[u8], data: &mut [u8], decrypt: bool) -> Result<()> {
    if data.len() % 16 != 0 {
        return Err(Error::transfer("wrapped key is not block aligned"));
    }
    match kek.len() {
        16 => {
            let cipher = aes::Aes128::new_from_slice(kek).map_err(Error::transfer)?;
            for chunk in data.chunks_mut(16) {
                let block = GenericArray::from_mut_slice(chunk);
                if decrypt {
                    cipher.decrypt_block(block);
                } else {
                    cipher.encrypt_block(block);
                }
            }
        }
        _ => {
            let cipher = aes::Aes256::new_from_slice(kek).map_err(Error::transfer)?;
            for chunk in data.chunks_mut(16) {
                let block = GenericArray::from_mut_slice(chunk);
                if decrypt {
                    cipher.decrypt_block(block);
                } else {
                    cipher.encrypt_block(block);
                }
            }
        }
    }
    Ok(())
}

/// Legacy key wrap: the FEK encrypted block-by-block with AES-ECB.
fn ecb_wrap(kek: &[u8], fek: &[u8]) -> Result<Vec<u8>> {
    let mut out = fek.to_vec();
    ecb_blocks(kek, &mut out, false)?;
    Ok(out)
}

fn ecb_unwrap(kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>> {
    let mut out = wrapped.to_vec();
    ecb_blocks(kek, &mut out, true)?;
    Ok(out)
}

const RFC3394_IV: u64 = 0xA6A6_A6A6_A6A6_A6A6;

fn aes_encrypt_block(kek: &[u8], block: &mut [u8; 16]) -> Result<()> {
    let mut data = *block;
    ecb_blocks(kek, &mut data, false)?;
    *block = data;
    Ok(())
}

fn aes_decrypt_block(kek: &[u8], block: &mut [u8; 16]) -> Result<()> {
    let mut data = *block;
    ecb_blocks(kek, &mut data, true)?;
    *block = data;
    Ok(())
}

/// RFC 3394 key wrap.
fn rfc3394_wrap(kek: &[u8], fek: &[u8]) -> Result<Vec<u8>> {
    if fek.len() % 8 != 0 || fek.is_empty() {
        return Err(Error::transfer("file key length must be a multiple of 8"));
    }
    let n = fek.len() / 8;
    let mut a = RFC3394_IV;
    let mut r: Vec<u64> = fek
        .chunks(8)
        .map(|c| u64::from_be_bytes(c.try_into().expect("chunks of 8")))
        .collect();
    for j in 0..6 {
        for (i, ri) in r.iter_mut().enumerate() {
            let mut block = [0_u8; 16];
            block[..8].copy_from_slice(&a.to_be_bytes());
            block[8..].copy_from_slice(&ri.to_be_bytes());
            aes_encrypt_block(kek, &mut block)?;
            let t = (n * j + i + 1) as u64;
            a = u64::from_be_bytes(block[..8].try_into().expect("eight bytes")) ^ t;
            *ri = u64::from_be_bytes(block[8..].try_into().expect("eight bytes"));
        }
    }
    let mut out = a.to_be_bytes().to_vec();
    for ri in r {
        out.extend_from_slice(&ri.to_be_bytes());
    }
    Ok(out)
}

/// RFC 3394 key unwrap, verifying the integrity value.
fn rfc3394_unwrap(kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>> {
    if wrapped.len() % 8 != 0 || wrapped.len() < 24 {
        return Err(Error::transfer("wrapped key has an invalid length"));
    }
    let n = wrapped.len() / 8 - 1;
    let mut a = u64::from_be_bytes(wrapped[..8].try_into().expect("eight bytes"));
    let mut r: Vec<u64> = wrapped[8..]
        .chunks(8)
        .map(|c| u64::from_be_bytes(c.try_into().expect("chunks of 8")))
        .collect();
    for j in (0..6).rev() {
        for i in (0..n).rev() {
            let t = (n * j + i + 1) as u64;
            let mut block = [0_u8; 16];
            block[..8].copy_from_slice(&(a ^ t).to_be_bytes());
            block[8..].copy_from_slice(&r[i].to_be_bytes());
            aes_decrypt_block(kek, &mut block)?;
            a = u64::from_be_bytes(block[..8].try_into().expect("eight bytes"));
            r[i] = u64::from_be_bytes(block[8..].try_into().expect("eight bytes"));
        }
    }
    if a != RFC3394_IV {
        return Err(Error::transfer("wrapped key failed its integrity check"));
    }
    let mut out = Vec::with_capacity(n * 8);
    for ri in r {
        out.extend_from_slice(&ri.to_be_bytes());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn material(key_bytes: usize) -> EncryptionMaterial {
        let key = vec![7_u8; key_bytes];
        serde_json::from_value(serde_json::json!({
            "queryStageMasterKey": STANDARD.encode(key),
            "queryId": "01b2-0009",
            "smkId": 99,
        }))
        .unwrap()
    }

    #[test_case(Mode::Cbc, 16)]
    #[test_case(Mode::Cbc, 32)]
    #[test_case(Mode::Gcm, 16)]
    #[test_case(Mode::Gcm, 32)]
    fn encrypt_decrypt_round_trip(mode: Mode, key_bytes: usize) {
        let material = material(key_bytes);
        let plaintext = b"the quick brown fox jumps over the lazy dog".repeat(37);
        let encrypted = encrypt(&material, &plaintext, mode).unwrap();
        assert_ne!(encrypted.body, plaintext);
        let decrypted = decrypt(&material, &encrypted.body, &encrypted.wrapped_key, mode).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn cbc_pads_to_block_size() {
        let material = material(16);
        // One byte body still produces a full padded block after the IV.
        let encrypted = encrypt(&material, b"x", Mode::Cbc).unwrap();
        assert_eq!(encrypted.body.len(), 16 + 16);
    }

    #[test]
    fn distinct_files_get_distinct_keys() {
        let material = material(16);
        let a = encrypt(&material, b"same plaintext", Mode::Cbc).unwrap();
        let b = encrypt(&material, b"same plaintext", Mode::Cbc).unwrap();
        assert_ne!(a.wrapped_key, b.wrapped_key);
        assert_ne!(a.body, b.body);
    }

    #[test]
    fn rfc3394_matches_test_vector() {
        // RFC 3394 section 4.1: wrap 128 bits of key data with a 128-bit KEK.
        let kek = hex::decode("000102030405060708090A0B0C0D0E0F").unwrap();
        let key = hex::decode("00112233445566778899AABBCCDDEEFF").unwrap();
        let wrapped = rfc3394_wrap(&kek, &key).unwrap();
        assert_eq!(
            hex::encode_upper(&wrapped),
            "1FA68B0A8112B447AEF34BD8FB5A7B829D3E862371D2CFE5"
        );
        assert_eq!(rfc3394_unwrap(&kek, &wrapped).unwrap(), key);
    }

    #[test]
    fn tampered_wrap_fails_integrity() {
        let kek = vec![1_u8; 16];
        let mut wrapped = rfc3394_wrap(&kek, &[2_u8; 16]).unwrap();
        wrapped[3] ^= 0xff;
        assert!(rfc3394_unwrap(&kek, &wrapped).is_err());
    }

    #[test]
    fn gcm_rejects_tampered_body() {
        let material = material(16);
        let mut encrypted = encrypt(&material, b"payload", Mode::Gcm).unwrap();
        let last = encrypted.body.len() - 1;
        encrypted.body[last] ^= 0xff;
        assert!(decrypt(&material, &encrypted.body, &encrypted.wrapped_key, Mode::Gcm).is_err());
    }

    #[test]
    fn mat_desc_contents() {
        let material = material(16);
        let desc: serde_json::Value = serde_json::from_str(&mat_desc(&material, 16)).unwrap();
        assert_eq!(desc["queryId"], "01b2-0009");
        assert_eq!(desc["smkId"], "99");
        assert_eq!(desc["keySize"], "128");
    }
}
