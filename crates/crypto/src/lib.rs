//! 口令加密信封
//!
//! 文件格式：
//!
//! ```text
//! magic "RDX1" | version u8 | m_cost u32 | t_cost u32 | p_cost u32 | salt[16] | nonce[24] | ciphertext+tag
//! ```
//!
//! 密钥由 Argon2id 从口令派生，数据由 XChaCha20-Poly1305 加密。
//! 认证数据为 `header || aad`，口令、AAD、头部或密文任一不符都会解密失败，
//! 且失败时不会写出任何明文。

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use zeroize::Zeroizing;

const MAGIC: &[u8; 4] = b"RDX1";
const VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const HEADER_LEN: usize = 4 + 1 + 4 * 3 + SALT_LEN + NONCE_LEN;
const TAG_LEN: usize = 16;

// 解析头部时的参数上限，防止恶意文件耗尽内存
const MAX_M_COST: u32 = 1 << 20;
const MAX_T_COST: u32 = 64;
const MAX_P_COST: u32 = 64;

pub type Result<T> = std::result::Result<T, EnvelopeError>;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope malformed: {0}")]
    Malformed(&'static str),
    #[error("key derivation failed: {0}")]
    Kdf(String),
    #[error("encryption failed")]
    Encrypt,
    /// 口令或 AAD 不匹配，或数据被篡改
    #[error("authentication failed")]
    AuthenticationFailure,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Argon2id 参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KdfParams {
    /// 内存开销（KiB）
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    fn validate(&self) -> Result<()> {
        if self.memory_kib > MAX_M_COST || self.iterations > MAX_T_COST || self.parallelism > MAX_P_COST {
            return Err(EnvelopeError::Malformed("kdf parameters out of range"));
        }
        Ok(())
    }
}

/// 口令加密信封
#[derive(Debug, Clone, Copy, Default)]
pub struct Envelope {
    params: KdfParams,
}

impl Envelope {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    /// 加密 `input_path` 写出到 `output_path`
    pub fn encrypt_file(
        &self,
        input_path: &Path,
        output_path: &Path,
        passphrase: &str,
        aad: &[u8],
    ) -> Result<()> {
        let plaintext = Zeroizing::new(fs::read(input_path)?);
        let sealed = self.seal(&plaintext, passphrase, aad)?;
        fs::write(output_path, sealed)?;
        log::info!(
            "[Envelope] 加密完成: {} 字节 -> {:?}",
            plaintext.len(),
            output_path
        );
        Ok(())
    }

    /// 解密 `encrypted_path` 写出到 `output_path`
    ///
    /// 输出文件归调用方所有，由调用方负责删除。新建的输出文件权限为 0600。
    pub fn decrypt_file(
        &self,
        encrypted_path: &Path,
        output_path: &Path,
        passphrase: &str,
        aad: &[u8],
    ) -> Result<()> {
        let sealed = fs::read(encrypted_path)?;
        let plaintext = Zeroizing::new(open(&sealed, passphrase, aad)?);
        write_private(output_path, plaintext.as_slice())?;
        log::info!(
            "[Envelope] 解密完成: {:?} ({} 字节)",
            encrypted_path,
            plaintext.len()
        );
        Ok(())
    }

    pub fn seal(&self, plaintext: &[u8], passphrase: &str, aad: &[u8]) -> Result<Vec<u8>> {
        self.params.validate()?;

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(MAGIC);
        header.push(VERSION);
        header.extend_from_slice(&self.params.memory_kib.to_be_bytes());
        header.extend_from_slice(&self.params.iterations.to_be_bytes());
        header.extend_from_slice(&self.params.parallelism.to_be_bytes());
        header.extend_from_slice(&salt);
        header.extend_from_slice(&nonce);

        let key = derive_key(passphrase, &salt, &self.params)?;
        let cipher = XChaCha20Poly1305::new_from_slice(key.as_slice())
            .map_err(|_| EnvelopeError::Encrypt)?;
        let bound = bind_aad(&header, aad);
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &bound,
                },
            )
            .map_err(|_| EnvelopeError::Encrypt)?;

        let mut output = header;
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }
}

/// 解密信封数据
///
/// KDF 参数取自头部，与当前配置无关。
pub fn open(sealed: &[u8], passphrase: &str, aad: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < HEADER_LEN + TAG_LEN {
        return Err(EnvelopeError::Malformed("envelope too short"));
    }
    if &sealed[0..4] != MAGIC {
        return Err(EnvelopeError::Malformed("bad magic"));
    }
    if sealed[4] != VERSION {
        return Err(EnvelopeError::Malformed("unsupported version"));
    }

    let params = KdfParams {
        memory_kib: read_u32(&sealed[5..9]),
        iterations: read_u32(&sealed[9..13]),
        parallelism: read_u32(&sealed[13..17]),
    };
    params.validate()?;

    let salt = &sealed[17..17 + SALT_LEN];
    let nonce = &sealed[17 + SALT_LEN..HEADER_LEN];
    let header = &sealed[..HEADER_LEN];

    let key = derive_key(passphrase, salt, &params)?;
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_slice())
        .map_err(|_| EnvelopeError::AuthenticationFailure)?;
    let bound = bind_aad(header, aad);
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: &sealed[HEADER_LEN..],
                aad: &bound,
            },
        )
        .map_err(|_| {
            log::warn!("[Envelope] 认证失败，拒绝输出明文");
            EnvelopeError::AuthenticationFailure
        })
}

fn derive_key(passphrase: &str, salt: &[u8], params: &KdfParams) -> Result<Zeroizing<[u8; 32]>> {
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(32),
    )
    .map_err(|e| EnvelopeError::Kdf(format!("{e:?}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);
    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut *key)
        .map_err(|e| EnvelopeError::Kdf(format!("{e:?}")))?;
    Ok(key)
}

fn bind_aad(header: &[u8], aad: &[u8]) -> Vec<u8> {
    let mut bound = Vec::with_capacity(header.len() + aad.len());
    bound.extend_from_slice(header);
    bound.extend_from_slice(aad);
    bound
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(buf)
}

/// 写出明文；新建文件仅所有者可读写，已存在的文件保留原权限
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}
